//! Wi-Fi station link driver
//!
//! [`WifiLink`] is the handle the agent drives. It forwards every request
//! to [`link_task`], which owns the radio controller. Station events from the
//! radio and the DHCP lease from the network stack are mirrored into
//! [`LINK_STATE`]; nothing else writes it.

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use esp_radio::wifi::event::{self, EventExt};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use log::{debug, info, warn};

use tether_core::config::NetworkCredentials;
use tether_core::link::{LinkDriver, LinkEvent, LinkState};

/// Link status as last reported by the radio or the network stack
pub static LINK_STATE: LinkState = LinkState::new();

const COMMAND_QUEUE_DEPTH: usize = 4;

enum LinkCommand {
    Begin(NetworkCredentials),
    Connect,
    Stop,
}

static LINK_COMMANDS: Channel<CriticalSectionRawMutex, LinkCommand, COMMAND_QUEUE_DEPTH> =
    Channel::new();

/// Handle to the station task. Requests return at once.
#[derive(Debug, Default)]
pub struct WifiLink;

impl WifiLink {
    pub const fn new() -> Self {
        Self
    }

    fn send(&self, command: LinkCommand) {
        if LINK_COMMANDS.try_send(command).is_err() {
            warn!("Link command queue full; request dropped");
        }
    }
}

impl LinkDriver for WifiLink {
    fn begin(&mut self, credentials: &NetworkCredentials) {
        self.send(LinkCommand::Begin(credentials.clone()));
    }

    fn connect(&mut self) {
        self.send(LinkCommand::Connect);
    }

    fn stop(&mut self) {
        self.send(LinkCommand::Stop);
    }

    fn is_up(&self) -> bool {
        LINK_STATE.is_up()
    }
}

fn install_event_handlers() {
    event::StaStart::update_handler(|_| LINK_STATE.on_event(LinkEvent::Started));
    event::StaDisconnected::update_handler(|event| {
        debug!("Station disconnected, reason {}", event.reason());
        LINK_STATE.on_event(LinkEvent::Disconnected);
    });
}

fn station_config(credentials: &NetworkCredentials) -> ModeConfig {
    ModeConfig::Client(
        ClientConfig::default()
            .with_ssid(credentials.id.as_str().into())
            .with_password(credentials.secret.as_str().into()),
    )
}

/// Owns the radio controller and executes [`WifiLink`] requests in order.
///
/// After a successful association the task also waits for the DHCP lease;
/// the link only counts as up once an address is configured.
#[embassy_executor::task]
pub async fn link_task(mut controller: WifiController<'static>, stack: Stack<'static>) {
    install_event_handlers();
    let mut awaiting_address = false;

    loop {
        let command = if awaiting_address {
            match select(LINK_COMMANDS.receive(), stack.wait_config_up()).await {
                Either::First(command) => command,
                Either::Second(()) => {
                    awaiting_address = false;
                    if let Some(config) = stack.config_v4() {
                        info!("Got address {}", config.address);
                    }
                    LINK_STATE.on_event(LinkEvent::GotAddress);
                    continue;
                }
            }
        } else {
            LINK_COMMANDS.receive().await
        };

        match command {
            LinkCommand::Begin(credentials) => {
                awaiting_address = false;
                if matches!(controller.is_started(), Ok(true)) {
                    if let Err(e) = controller.stop_async().await {
                        debug!("Radio stop before reconfigure: {:?}", e);
                    }
                }
                info!("Configuring station for '{}'", credentials.id);
                if let Err(e) = controller.set_config(&station_config(&credentials)) {
                    warn!("Station config rejected: {:?}", e);
                    LINK_STATE.on_event(LinkEvent::Disconnected);
                    continue;
                }
                if let Err(e) = controller.start_async().await {
                    warn!("Radio start failed: {:?}", e);
                    LINK_STATE.on_event(LinkEvent::Disconnected);
                }
            }
            LinkCommand::Connect => match controller.connect_async().await {
                Ok(()) => {
                    debug!("Associated; waiting for DHCP lease");
                    awaiting_address = true;
                }
                Err(e) => {
                    warn!("Association failed: {:?}", e);
                    LINK_STATE.on_event(LinkEvent::Disconnected);
                }
            },
            LinkCommand::Stop => {
                awaiting_address = false;
                if let Err(e) = controller.disconnect_async().await {
                    debug!("Radio disconnect: {:?}", e);
                }
                if let Err(e) = controller.stop_async().await {
                    debug!("Radio stop: {:?}", e);
                }
                LINK_STATE.on_event(LinkEvent::Disconnected);
            }
        }
    }
}
