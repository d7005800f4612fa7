//! Desktop simulator for the tether sensor node.
//!
//! Runs the complete agent on the host. stdin/stdout stand in for the serial
//! console, a directory holds the credential store, and the radio and MQTT
//! client are simulated by background threads that report status the same
//! way the firmware's event handlers do.
//!
//! # Environment
//!
//! | Variable                     | Default          | Meaning                                 |
//! |------------------------------|------------------|-----------------------------------------|
//! | `TETHER_STORE_DIR`           | `./tether-store` | Directory with one file per stored key  |
//! | `TETHER_SIM_DROP_AFTER_SECS` | unset            | Drop the link this long after it is up  |
//! | `RUST_LOG`                   | `info`           | Log filter; logs go to stderr           |
//!
//! The simulated access point accepts any network name together with a
//! secret of at least eight characters.
//!
//! The terminal stays in line mode: typed characters show up twice and a
//! masked secret is visible while it is being typed.

use std::env;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read as _, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use log::{debug, error, info, warn};
use rand_core::{OsRng, TryRngCore};

use tether_core::agent::Agent;
use tether_core::config::{Endpoint, NetworkCredentials};
use tether_core::console::Console;
use tether_core::link::{LinkDriver, LinkEvent, LinkState};
use tether_core::readings::UniformReadings;
use tether_core::session::{PublishError, QoS, SessionDriver, SessionEvent, SessionState};
use tether_core::store::{CredentialStore, StoreError};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

const STORE_DIR_VAR: &str = "TETHER_STORE_DIR";
const DEFAULT_STORE_DIR: &str = "./tether-store";
const DROP_AFTER_VAR: &str = "TETHER_SIM_DROP_AFTER_SECS";

/// Time from `begin` until the radio reports it has started.
const LINK_START_DELAY: Duration = Duration::from_millis(50);

/// Time for association plus a DHCP lease.
const ASSOCIATE_DELAY: Duration = Duration::from_millis(1500);

/// Shortest secret the simulated access point accepts (WPA2 minimum).
const MIN_SECRET_LEN: usize = 8;

/// Time between link up and the broker's CONNACK.
const SESSION_CONNECT_DELAY: Duration = Duration::from_millis(300);

/// How often the session thread looks at the link.
const SESSION_POLL: Duration = Duration::from_millis(200);

/// Status cells written from the simulation threads, read by the agent.
static LINK_STATE: LinkState = LinkState::new();
static SESSION_STATE: SessionState = SessionState::new();

// ---------------------------------------------------------------------------
// Serial console over stdio
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StdioError(io::ErrorKind);

impl fmt::Display for StdioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stdio error: {}", self.0)
    }
}

impl std::error::Error for StdioError {}

impl embedded_io_async::Error for StdioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// stdin/stdout as a byte-oriented serial port.
///
/// Reads block the executor; nothing else runs on it while the operator is
/// being prompted.
struct StdioSerial {
    stdin: io::Stdin,
    stdout: io::Stdout,
}

impl StdioSerial {
    fn new() -> Self {
        Self {
            stdin: io::stdin(),
            stdout: io::stdout(),
        }
    }
}

impl ErrorType for StdioSerial {
    type Error = StdioError;
}

impl Read for StdioSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stdin.read(buf).map_err(|e| StdioError(e.kind()))
    }
}

impl Write for StdioSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stdout.write(buf).map_err(|e| StdioError(e.kind()))
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.stdout.flush().map_err(|e| StdioError(e.kind()))
    }
}

// ---------------------------------------------------------------------------
// Directory-backed credential store
// ---------------------------------------------------------------------------

/// One file per key inside a host directory.
struct DirStore {
    root: PathBuf,
}

impl DirStore {
    fn open(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn write_synced(&self, key: &str, value: &str) -> io::Result<()> {
        let mut file = File::create(self.root.join(key))?;
        file.write_all(value.as_bytes())?;
        file.sync_all()
    }
}

impl CredentialStore for DirStore {
    fn store(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_synced(key, value).map_err(|e| {
            debug!("Writing '{}' failed: {}", key, e);
            StoreError::WriteFailed
        })
    }

    fn load<const N: usize>(&self, key: &str) -> Result<heapless::String<N>, StoreError> {
        let bytes = match fs::read(self.root.join(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => {
                debug!("Reading '{}' failed: {}", key, e);
                return Err(StoreError::Medium);
            }
        };
        if bytes.len() > N {
            return Err(StoreError::TooLarge);
        }
        let text = std::str::from_utf8(&bytes).map_err(|_| StoreError::Medium)?;
        heapless::String::try_from(text).map_err(|_| StoreError::TooLarge)
    }
}

// ---------------------------------------------------------------------------
// Simulated link driver
// ---------------------------------------------------------------------------

/// Wi-Fi station whose events arrive from short-lived timer threads.
///
/// Every `begin` and `stop` starts a new generation; events scheduled by an
/// older generation are dropped when they fire.
struct SimLink {
    state: &'static LinkState,
    generation: Arc<AtomicU64>,
    joinable: bool,
    drop_after: Option<Duration>,
}

impl SimLink {
    fn new(state: &'static LinkState, drop_after: Option<Duration>) -> Self {
        Self {
            state,
            generation: Arc::new(AtomicU64::new(0)),
            joinable: false,
            drop_after,
        }
    }

    fn deliver_after(&self, delay: Duration, event: LinkEvent) {
        let generation = Arc::clone(&self.generation);
        let expected = generation.load(Ordering::SeqCst);
        let state = self.state;
        thread::spawn(move || {
            thread::sleep(delay);
            if generation.load(Ordering::SeqCst) == expected {
                debug!("sim link: {:?}", event);
                state.on_event(event);
            }
        });
    }
}

impl LinkDriver for SimLink {
    fn begin(&mut self, credentials: &NetworkCredentials) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.joinable = credentials.secret.as_str().len() >= MIN_SECRET_LEN;
        info!("sim link: station configured for '{}'", credentials.id);
        self.deliver_after(LINK_START_DELAY, LinkEvent::Started);
    }

    fn connect(&mut self) {
        if !self.joinable {
            warn!("sim link: access point will refuse this secret");
            self.deliver_after(ASSOCIATE_DELAY, LinkEvent::Disconnected);
            return;
        }
        self.deliver_after(ASSOCIATE_DELAY, LinkEvent::GotAddress);
        if let Some(after) = self.drop_after {
            self.deliver_after(ASSOCIATE_DELAY + after, LinkEvent::Disconnected);
        }
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.on_event(LinkEvent::Disconnected);
    }

    fn is_up(&self) -> bool {
        self.state.is_up()
    }
}

// ---------------------------------------------------------------------------
// Simulated session driver
// ---------------------------------------------------------------------------

/// MQTT client stand-in. Once started it follows the link: up a moment
/// after the link is, down as soon as the link drops.
struct SimSession {
    link: &'static LinkState,
    state: &'static SessionState,
}

impl SimSession {
    fn new(link: &'static LinkState, state: &'static SessionState) -> Self {
        Self { link, state }
    }
}

impl SessionDriver for SimSession {
    type Handle = Endpoint;

    fn start(&mut self, endpoint: &Endpoint) -> Self::Handle {
        info!("sim session: client for {}", endpoint);
        let (link, state) = (self.link, self.state);
        thread::spawn(move || {
            loop {
                match (link.is_up(), state.is_up()) {
                    (true, false) => {
                        thread::sleep(SESSION_CONNECT_DELAY);
                        if link.is_up() {
                            info!("sim session: connected");
                            state.on_event(SessionEvent::Up);
                        }
                    }
                    (false, true) => {
                        info!("sim session: connection lost");
                        state.on_event(SessionEvent::Down);
                    }
                    _ => {}
                }
                thread::sleep(SESSION_POLL);
            }
        });
        endpoint.clone()
    }

    async fn publish(
        &mut self,
        handle: &Self::Handle,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        if !self.state.is_up() {
            return Err(PublishError::NotConnected);
        }
        info!(
            "sim session: {} {} <- {} ({:?}, retain {})",
            handle,
            topic,
            String::from_utf8_lossy(payload),
            qos,
            retain
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Blocking delay; the agent is the only future on the executor.
struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns.into()));
    }

    async fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting tether simulator");

    let store_dir = env::var_os(STORE_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    let store = match DirStore::open(store_dir.clone()) {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot open store at {}: {}", store_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("Credential store: {}", store_dir.display());

    let drop_after = env::var(DROP_AFTER_VAR)
        .ok()
        .and_then(|secs| secs.parse().ok())
        .map(Duration::from_secs);
    if let Some(after) = drop_after {
        info!("Link will drop {:?} after each connect", after);
    }

    let mut agent = Agent::new(
        Console::new(StdioSerial::new()),
        store,
        SimLink::new(&LINK_STATE, drop_after),
        &LINK_STATE,
        SimSession::new(&LINK_STATE, &SESSION_STATE),
        &SESSION_STATE,
        UniformReadings::new(OsRng.unwrap_err()),
        StdDelay,
    );

    let Err(e) = block_on(agent.run());
    error!("Agent stopped: {}", e);
    ExitCode::FAILURE
}
