//! Boot-time provisioning state machine
//!
//! Decides, from the persisted configuration and live link status, whether
//! the node can auto-connect or needs the operator to enter credentials:
//!
//! ```text
//! BootMenu ──O──▶ AutoLoadAttempt ──ok──▶ Provisioned
//!    ▲ │                │ fail
//!    │ └─N──▶ WizardNetwork ◀─┐ fail
//!    │             │ ok   └───┘
//!    │             ▼
//!    └─(cancel) WizardBroker ──▶ Provisioned
//! ```
//!
//! Configuration is written at exactly two points: the network fields after
//! a successful link attempt, and the broker fields once they are entered.

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use heapless::String;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::{
    BROKER_MAX_LEN, BrokerAddress, Configuration, NETWORK_ID_MAX_LEN, NetworkCredentials,
    SECRET_MAX_LEN, Secret, TOPIC_MAX_LEN, Timings, Topic,
};
use crate::console::{Console, ConsoleError};
use crate::link::{LinkDriver, LinkState, LinkStatus};
use crate::store::{self, CredentialStore};

const MENU: &[&str] = &[
    "",
    "===================================",
    "   BOOT MENU",
    "   [O] Auto Connect (Load saved)",
    "   [N] New Setup (Manual Entry)",
    "===================================",
];
const MENU_PROMPT: &str = "Select >> ";
const MSG_INVALID_SELECTION: &str = "Invalid selection.";
const MSG_LOADING: &str = "Loading saved configuration...";
const MSG_NO_CONFIG: &str = "No saved configuration found! Please use New Setup [N].";
const MSG_AUTO_FAILED: &str = "Failed to connect! Please use New Setup [N].";
const MSG_WIZARD: &str = "--- STARTING WIZARD ---";
const MSG_WIZARD_CANCELLED: &str = "Setup cancelled.";
const MSG_ATTEMPTING: &str = "Attempting connection...";
const MSG_LINK_OK: &str = "Wi-Fi Connected! Saving...";
const MSG_LINK_FAILED: &str = "Connection Failed. Try again.";

const PROMPT_NETWORK_ID: &str = "Enter SSID (empty to cancel): ";
const PROMPT_SECRET: &str = "Enter Password: ";
const PROMPT_BROKER: &str = "Enter MQTT Broker IP: ";
const PROMPT_TOPIC: &str = "Enter MQTT Topic: ";

/// Operator's choice at the boot menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    AutoLoad,
    Wizard,
}

impl BootDecision {
    /// Parse a menu selection. Case-insensitive `O` or `N`; anything else is `None`.
    pub fn from_selection(selection: &str) -> Option<Self> {
        match selection.as_bytes() {
            [b'o' | b'O'] => Some(Self::AutoLoad),
            [b'n' | b'N'] => Some(Self::Wizard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    BootMenu,
    AutoLoadAttempt,
    WizardNetwork,
    /// Network fields are validated and persisted; broker entry is next.
    WizardBroker(NetworkCredentials),
    Provisioned(Configuration),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("console unavailable: {0}")]
    Console(#[from] ConsoleError),
}

/// Bring the link up with `credentials` and wait for it within the window.
///
/// Resets the status, starts the driver, issues `connect` and polls the
/// status every `link_poll_ms`. Returns `true` as soon as the link is seen
/// up, `false` once `link_timeout_ms` has passed without it.
pub async fn attempt_link<L, D>(
    link: &mut L,
    link_state: &LinkState,
    delay: &mut D,
    timings: &Timings,
    credentials: &NetworkCredentials,
) -> bool
where
    L: LinkDriver,
    D: DelayNs,
{
    info!("Link attempt for network '{}'", credentials.id);

    link_state.set(LinkStatus::Down);
    link.begin(credentials);
    link.connect();

    for poll in 0..timings.link_polls() {
        if link_state.is_up() {
            info!("Link up after {} ms", poll * timings.link_poll_ms);
            return true;
        }
        delay.delay_ms(timings.link_poll_ms).await;
    }

    if link_state.is_up() {
        info!("Link up after {} ms", timings.link_timeout_ms);
        true
    } else {
        warn!("Link attempt timed out after {} ms", timings.link_timeout_ms);
        false
    }
}

/// Drives the operator through provisioning until a usable configuration
/// exists and the link is up.
pub struct Provisioner<'a, IO, S, L, D> {
    console: &'a mut Console<IO>,
    store: &'a mut S,
    link: &'a mut L,
    link_state: &'a LinkState,
    delay: &'a mut D,
    timings: Timings,
}

impl<'a, IO, S, L, D> Provisioner<'a, IO, S, L, D>
where
    IO: Read + Write,
    S: CredentialStore,
    L: LinkDriver,
    D: DelayNs,
{
    pub fn new(
        console: &'a mut Console<IO>,
        store: &'a mut S,
        link: &'a mut L,
        link_state: &'a LinkState,
        delay: &'a mut D,
    ) -> Self {
        Self {
            console,
            store,
            link,
            link_state,
            delay,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Run from the boot menu to `Provisioned`.
    ///
    /// Only a console failure ends this early; every other failure loops back
    /// to a prompt or to the menu.
    pub async fn run(&mut self) -> Result<Configuration, ProvisionError> {
        let mut state = ProvisioningState::BootMenu;
        loop {
            state = match state {
                ProvisioningState::Provisioned(config) => {
                    info!("Provisioned for network '{}'", config.network.id);
                    return Ok(config);
                }
                other => self.step(other).await?,
            };
        }
    }

    /// Perform one transition
    pub async fn step(
        &mut self,
        state: ProvisioningState,
    ) -> Result<ProvisioningState, ProvisionError> {
        match state {
            ProvisioningState::BootMenu => self.boot_menu().await,
            ProvisioningState::AutoLoadAttempt => self.auto_load().await,
            ProvisioningState::WizardNetwork => self.wizard_network().await,
            ProvisioningState::WizardBroker(network) => self.wizard_broker(network).await,
            provisioned @ ProvisioningState::Provisioned(_) => Ok(provisioned),
        }
    }

    async fn boot_menu(&mut self) -> Result<ProvisioningState, ProvisionError> {
        for line in MENU {
            self.console.write_line(line).await?;
        }

        let selection: String<1> = self.console.read_line(MENU_PROMPT, false).await?;
        match BootDecision::from_selection(&selection) {
            Some(BootDecision::AutoLoad) => Ok(ProvisioningState::AutoLoadAttempt),
            Some(BootDecision::Wizard) => {
                self.console.write_line(MSG_WIZARD).await?;
                Ok(ProvisioningState::WizardNetwork)
            }
            None => {
                self.console.write_line(MSG_INVALID_SELECTION).await?;
                Ok(ProvisioningState::BootMenu)
            }
        }
    }

    async fn auto_load(&mut self) -> Result<ProvisioningState, ProvisionError> {
        self.console.write_line(MSG_LOADING).await?;

        let config = match store::load_configuration(&*self.store) {
            Ok(config) => config,
            Err(failure) => {
                warn!("Saved configuration unusable: {}", failure);
                self.console.write_line(MSG_NO_CONFIG).await?;
                return Ok(ProvisioningState::BootMenu);
            }
        };

        self.console.write_str("Credentials found for SSID: ").await?;
        self.console.write_line(&config.network.id).await?;
        self.console.write_line("Connecting...").await?;

        if self.attempt(&config.network).await {
            Ok(ProvisioningState::Provisioned(config))
        } else {
            self.link.stop();
            self.console.write_line(MSG_AUTO_FAILED).await?;
            Ok(ProvisioningState::BootMenu)
        }
    }

    async fn wizard_network(&mut self) -> Result<ProvisioningState, ProvisionError> {
        let id: String<NETWORK_ID_MAX_LEN> =
            self.console.read_line(PROMPT_NETWORK_ID, false).await?;
        if id.is_empty() {
            self.console.write_line(MSG_WIZARD_CANCELLED).await?;
            return Ok(ProvisioningState::BootMenu);
        }
        let secret: String<SECRET_MAX_LEN> = self.read_required(PROMPT_SECRET, true).await?;

        let network = NetworkCredentials {
            id,
            secret: Secret::new(secret),
        };

        self.console.write_line(MSG_ATTEMPTING).await?;
        if self.attempt(&network).await {
            self.console.write_line(MSG_LINK_OK).await?;
            store::persist_network(self.store, &network);
            Ok(ProvisioningState::WizardBroker(network))
        } else {
            self.console.write_line(MSG_LINK_FAILED).await?;
            // Release the half-established link before the next attempt.
            self.link.stop();
            Ok(ProvisioningState::WizardNetwork)
        }
    }

    async fn wizard_broker(
        &mut self,
        network: NetworkCredentials,
    ) -> Result<ProvisioningState, ProvisionError> {
        let broker: BrokerAddress = self
            .read_required::<BROKER_MAX_LEN>(PROMPT_BROKER, false)
            .await?;
        let topic: Topic = self.read_required::<TOPIC_MAX_LEN>(PROMPT_TOPIC, false).await?;

        // Reachability is only proven once the session connects.
        store::persist_broker(self.store, &broker, &topic);

        Ok(ProvisioningState::Provisioned(Configuration {
            network,
            broker,
            topic,
        }))
    }

    /// Prompt until the operator enters something.
    async fn read_required<const N: usize>(
        &mut self,
        prompt: &str,
        masked: bool,
    ) -> Result<String<N>, ProvisionError> {
        loop {
            let value: String<N> = self.console.read_line(prompt, masked).await?;
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    async fn attempt(&mut self, network: &NetworkCredentials) -> bool {
        attempt_link(
            self.link,
            self.link_state,
            self.delay,
            &self.timings,
            network,
        )
        .await
    }
}
