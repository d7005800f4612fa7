//! MQTT session driver
//!
//! [`MqttSession`] hands requests to [`session_task`], which owns the TCP
//! socket and the MQTT client. The task keeps the broker connection going
//! across link loss on its own and mirrors every change into
//! [`SESSION_STATE`].

use core::convert::Infallible;
use core::net::Ipv4Addr;

use embassy_futures::select::{Either, select};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer, with_timeout};
use heapless::Vec;
use log::{debug, error, info, warn};
use myrtio_mqtt::{MqttClient, MqttOptions, TcpTransport};
use thiserror_no_std::Error;

use tether_core::config::{Endpoint, Topic, split_endpoint};
use tether_core::session::{PublishError, QoS, SessionDriver, SessionEvent, SessionState};

/// Session status as last reported by the session task
pub static SESSION_STATE: SessionState = SessionState::new();

const CLIENT_ID: &str = "tether-node";
const PAYLOAD_CAPACITY: usize = 16;
const SOCKET_BUFFER_SIZE: usize = 1024;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct PublishRequest {
    topic: Topic,
    payload: Vec<u8, PAYLOAD_CAPACITY>,
    qos: myrtio_mqtt::QoS,
}

static ENDPOINT: Signal<CriticalSectionRawMutex, Endpoint> = Signal::new();
static PUBLISH_REQUESTS: Channel<CriticalSectionRawMutex, PublishRequest, 1> = Channel::new();
static PUBLISH_RESULTS: Channel<CriticalSectionRawMutex, Result<(), PublishError>, 1> =
    Channel::new();

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
enum SessionError {
    #[error("broker address did not resolve")]
    Resolve,
    #[error("TCP connect failed")]
    Connect,
    #[error("MQTT handshake failed")]
    Handshake,
    #[error("publish failed on the wire")]
    Transport,
    #[error("network went down")]
    LinkLost,
}

/// Proof that [`MqttSession::start`] ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle(());

/// Handle to the session task.
#[derive(Debug, Default)]
pub struct MqttSession;

impl MqttSession {
    pub const fn new() -> Self {
        Self
    }
}

fn wire_qos(qos: QoS) -> Option<myrtio_mqtt::QoS> {
    match qos {
        QoS::AtMostOnce => Some(myrtio_mqtt::QoS::AtMostOnce),
        QoS::AtLeastOnce => Some(myrtio_mqtt::QoS::AtLeastOnce),
        QoS::ExactlyOnce => None,
    }
}

impl SessionDriver for MqttSession {
    type Handle = SessionHandle;

    fn start(&mut self, endpoint: &Endpoint) -> Self::Handle {
        ENDPOINT.signal(endpoint.clone());
        SessionHandle(())
    }

    async fn publish(
        &mut self,
        _handle: &Self::Handle,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        // The client only speaks QoS 0/1 and never sets the retain flag.
        let qos = wire_qos(qos).ok_or(PublishError::Rejected)?;
        if retain {
            return Err(PublishError::Rejected);
        }
        if !SESSION_STATE.is_up() {
            return Err(PublishError::NotConnected);
        }

        let request = PublishRequest {
            topic: Topic::try_from(topic).map_err(|_| PublishError::Rejected)?,
            payload: Vec::from_slice(payload).map_err(|_| PublishError::Rejected)?,
            qos,
        };

        // Drop answers to requests that timed out earlier.
        while PUBLISH_RESULTS.try_receive().is_ok() {}
        PUBLISH_REQUESTS
            .try_send(request)
            .map_err(|_| PublishError::Transport)?;

        match with_timeout(PUBLISH_TIMEOUT, PUBLISH_RESULTS.receive()).await {
            Ok(result) => result,
            Err(_) => {
                // Withdraw the request if the task never picked it up.
                let _ = PUBLISH_REQUESTS.try_receive();
                Err(PublishError::Transport)
            }
        }
    }
}

async fn resolve(stack: Stack<'static>, host: &str) -> Result<IpAddress, SessionError> {
    if let Ok(address) = host.parse::<Ipv4Addr>() {
        return Ok(IpAddress::Ipv4(address));
    }
    stack
        .dns_query(host, DnsQueryType::A)
        .await
        .ok()
        .and_then(|addresses| addresses.first().copied())
        .ok_or(SessionError::Resolve)
}

/// Connect once and serve publish requests until something breaks.
async fn run_session(
    stack: Stack<'static>,
    host: &str,
    port: u16,
    rx_buffer: &mut [u8],
    tx_buffer: &mut [u8],
) -> Result<Infallible, SessionError> {
    let address = resolve(stack, host).await?;

    let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
    socket.set_timeout(Some(SOCKET_TIMEOUT));
    socket
        .connect((address, port))
        .await
        .map_err(|_| SessionError::Connect)?;

    let transport = TcpTransport::new(socket, SOCKET_TIMEOUT);
    let mut client = MqttClient::<_, 5, 256>::new(transport, MqttOptions::new(CLIENT_ID));
    client.connect().await.map_err(|_| SessionError::Handshake)?;

    info!("MQTT connected to {}:{}", host, port);
    SESSION_STATE.on_event(SessionEvent::Up);

    loop {
        let request = match select(PUBLISH_REQUESTS.receive(), stack.wait_config_down()).await {
            Either::First(request) => request,
            Either::Second(()) => return Err(SessionError::LinkLost),
        };

        let result = client
            .publish(request.topic.as_str(), &request.payload, request.qos)
            .await
            .map_err(|_| PublishError::Transport);
        let failed = result.is_err();
        if PUBLISH_RESULTS.try_send(result).is_err() {
            debug!("Publish result dropped; the caller already gave up");
        }
        if failed {
            return Err(SessionError::Transport);
        }
    }
}

/// Waits for [`MqttSession::start`], then keeps a broker connection up for
/// as long as the node runs.
#[embassy_executor::task]
pub async fn session_task(stack: Stack<'static>) {
    let endpoint = ENDPOINT.wait().await;
    let Some((host, port)) = split_endpoint(&endpoint) else {
        error!("Unusable broker endpoint {}", endpoint);
        return;
    };

    let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_SIZE];

    loop {
        stack.wait_config_up().await;

        let Err(e) = run_session(stack, host, port, &mut rx_buffer, &mut tx_buffer).await;
        warn!("MQTT session to {} ended: {}", endpoint, e);
        SESSION_STATE.on_event(SessionEvent::Down);

        Timer::after(RECONNECT_DELAY).await;
    }
}
