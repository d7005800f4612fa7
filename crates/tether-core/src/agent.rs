//! Top-level agent: provisioning, then the publish loop for good.

use core::convert::Infallible;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};
use log::info;

use crate::config::Timings;
use crate::console::Console;
use crate::link::{LinkDriver, LinkState};
use crate::provisioning::{ProvisionError, Provisioner};
use crate::readings::ReadingSource;
use crate::session::{SessionDriver, SessionState};
use crate::steady_state::SteadyState;
use crate::store::CredentialStore;

const MSG_RUNNING: &str = "--- SYSTEM RUNNING ---";

/// Everything the node needs at boot, wired together.
///
/// The status cells are borrowed because the platform's event handlers
/// write them from outside the agent.
pub struct Agent<'a, IO, S, L, M, R, D> {
    console: Console<IO>,
    store: S,
    link: L,
    link_state: &'a LinkState,
    session: M,
    session_state: &'a SessionState,
    readings: R,
    delay: D,
    timings: Timings,
}

impl<'a, IO, S, L, M, R, D> Agent<'a, IO, S, L, M, R, D>
where
    IO: Read + Write,
    S: CredentialStore,
    L: LinkDriver,
    M: SessionDriver,
    R: ReadingSource,
    D: DelayNs,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        console: Console<IO>,
        store: S,
        link: L,
        link_state: &'a LinkState,
        session: M,
        session_state: &'a SessionState,
        readings: R,
        delay: D,
    ) -> Self {
        Self {
            console,
            store,
            link,
            link_state,
            session,
            session_state,
            readings,
            delay,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Provision, start the session and publish forever.
    ///
    /// Returns only if the console fails during provisioning.
    pub async fn run(&mut self) -> Result<Infallible, ProvisionError> {
        let config = Provisioner::new(
            &mut self.console,
            &mut self.store,
            &mut self.link,
            self.link_state,
            &mut self.delay,
        )
        .with_timings(self.timings)
        .run()
        .await?;

        self.console.write_line(MSG_RUNNING).await?;

        let endpoint = config.endpoint();
        info!("Starting session with {}", endpoint);
        let handle = self.session.start(&endpoint);

        SteadyState::new(
            &mut self.link,
            self.link_state,
            &mut self.session,
            self.session_state,
            handle,
            config.topic,
            &mut self.readings,
            &mut self.delay,
        )
        .with_timings(self.timings)
        .run()
        .await
    }
}
