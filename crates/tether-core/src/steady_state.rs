//! Steady-state publish loop
//!
//! Once provisioned, the node wakes every period and looks at the mirrored
//! link and session status:
//!
//! | Link | Session | Action                         |
//! |------|---------|--------------------------------|
//! | Up   | Up      | publish one reading            |
//! | Down | any     | re-issue `connect` on the link |
//! | else | else    | log the degraded state only    |
//!
//! Status is only ever changed by driver events; nothing here writes it.
//! The loop never hands control back to provisioning.

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

use crate::config::{Timings, Topic};
use crate::link::{LinkDriver, LinkState, LinkStatus};
use crate::readings::{Reading, ReadingSource};
use crate::session::{PublishError, QoS, SessionDriver, SessionState};

/// Delivery guarantee for published readings
pub const PUBLISH_QOS: QoS = QoS::AtLeastOnce;
/// Readings are never retained by the broker
pub const PUBLISH_RETAIN: bool = false;

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published(Reading),
    PublishFailed(Reading, PublishError),
    /// Link was down; a reconnect was requested
    Reconnecting,
    /// Link up or coming up, but no session; nothing to do this tick
    Degraded,
}

pub struct SteadyState<'a, L, M, R, D>
where
    M: SessionDriver,
{
    link: &'a mut L,
    link_state: &'a LinkState,
    session: &'a mut M,
    session_state: &'a SessionState,
    handle: M::Handle,
    topic: Topic,
    readings: R,
    delay: &'a mut D,
    timings: Timings,
}

impl<'a, L, M, R, D> SteadyState<'a, L, M, R, D>
where
    L: LinkDriver,
    M: SessionDriver,
    R: ReadingSource,
    D: DelayNs,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: &'a mut L,
        link_state: &'a LinkState,
        session: &'a mut M,
        session_state: &'a SessionState,
        handle: M::Handle,
        topic: Topic,
        readings: R,
        delay: &'a mut D,
    ) -> Self {
        Self {
            link,
            link_state,
            session,
            session_state,
            handle,
            topic,
            readings,
            delay,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Act on the status as it is at this instant
    pub async fn tick(&mut self) -> TickOutcome {
        match (self.link_state.get(), self.session_state.is_up()) {
            (LinkStatus::Up, true) => self.publish_reading().await,
            (LinkStatus::Down, _) => {
                warn!("Link lost. Reconnecting...");
                self.link.connect();
                TickOutcome::Reconnecting
            }
            (link, session_up) => {
                warn!(
                    "Degraded: link {:?}, session {}",
                    link,
                    if session_up { "up" } else { "down" }
                );
                TickOutcome::Degraded
            }
        }
    }

    async fn publish_reading(&mut self) -> TickOutcome {
        let reading = self.readings.next_reading();
        let payload = reading.to_payload();

        match self
            .session
            .publish(
                &self.handle,
                &self.topic,
                payload.as_bytes(),
                PUBLISH_QOS,
                PUBLISH_RETAIN,
            )
            .await
        {
            Ok(()) => {
                info!("Published: {} to '{}'", payload, self.topic);
                TickOutcome::Published(reading)
            }
            Err(e) => {
                warn!("Publish of {} failed: {}", payload, e);
                TickOutcome::PublishFailed(reading, e)
            }
        }
    }

    /// Tick forever, one tick per publish period
    pub async fn run(&mut self) -> ! {
        info!(
            "Publishing to '{}' every {} ms",
            self.topic, self.timings.publish_period_ms
        );
        loop {
            self.tick().await;
            self.delay.delay_ms(self.timings.publish_period_ms).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkEvent;
    use crate::readings::UniformReadings;
    use crate::session::SessionEvent;
    use crate::testing::{LinkCall, ScriptedLink, ScriptedSession, SequenceRng, VirtualDelay, World};
    use core::str::FromStr;
    use embassy_futures::select::{Either, select};
    use embassy_futures::{block_on, yield_now};

    fn topic() -> Topic {
        Topic::from_str("sensors/a").unwrap()
    }

    fn readings() -> UniformReadings<SequenceRng> {
        UniformReadings::new(SequenceRng::new(&[42, 7, 99]))
    }

    #[test]
    fn test_publishes_when_link_and_session_up() {
        let world = World::new();
        world.link_state.on_event(LinkEvent::GotAddress);
        world.session_state.on_event(SessionEvent::Up);

        let mut link = ScriptedLink::new(&world, &[]);
        let mut session = ScriptedSession::new();
        let mut delay = VirtualDelay::new(&world);
        let mut steady = SteadyState::new(
            &mut link,
            &world.link_state,
            &mut session,
            &world.session_state,
            1,
            topic(),
            readings(),
            &mut delay,
        );

        let outcome = block_on(steady.tick());
        assert_eq!(outcome, TickOutcome::Published(Reading::new(42).unwrap()));

        let published = session.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "sensors/a");
        assert_eq!(published[0].payload, "42");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(!published[0].retain);
        assert!(link.calls().is_empty());
    }

    #[test]
    fn test_no_publish_while_session_down() {
        let world = World::new();
        world.link_state.on_event(LinkEvent::GotAddress);

        let mut link = ScriptedLink::new(&world, &[]);
        let mut session = ScriptedSession::new();
        let mut delay = VirtualDelay::new(&world);
        let mut steady = SteadyState::new(
            &mut link,
            &world.link_state,
            &mut session,
            &world.session_state,
            1,
            topic(),
            readings(),
            &mut delay,
        );

        assert_eq!(block_on(steady.tick()), TickOutcome::Degraded);
        assert!(session.published().is_empty());
        assert!(link.calls().is_empty());
    }

    #[test]
    fn test_link_down_issues_single_connect() {
        for session_up in [false, true] {
            let world = World::new();
            if session_up {
                world.session_state.on_event(SessionEvent::Up);
            }

            let mut link = ScriptedLink::new(&world, &[]);
            let mut session = ScriptedSession::new();
            let mut delay = VirtualDelay::new(&world);
            let mut steady = SteadyState::new(
                &mut link,
                &world.link_state,
                &mut session,
                &world.session_state,
                1,
                topic(),
                readings(),
                &mut delay,
            );

            assert_eq!(block_on(steady.tick()), TickOutcome::Reconnecting);
            assert_eq!(link.connect_count(), 1);
            assert_eq!(link.stop_count(), 0);
            assert_eq!(link.calls(), [LinkCall::Connect]);
            assert!(session.published().is_empty());
        }
    }

    #[test]
    fn test_connecting_link_takes_no_action() {
        let world = World::new();
        world.link_state.on_event(LinkEvent::Started);
        world.session_state.on_event(SessionEvent::Up);

        let mut link = ScriptedLink::new(&world, &[]);
        let mut session = ScriptedSession::new();
        let mut delay = VirtualDelay::new(&world);
        let mut steady = SteadyState::new(
            &mut link,
            &world.link_state,
            &mut session,
            &world.session_state,
            1,
            topic(),
            readings(),
            &mut delay,
        );

        assert_eq!(block_on(steady.tick()), TickOutcome::Degraded);
        assert!(link.calls().is_empty());
        assert!(session.published().is_empty());
    }

    #[test]
    fn test_publish_failure_leaves_status_alone() {
        let world = World::new();
        world.link_state.on_event(LinkEvent::GotAddress);
        world.session_state.on_event(SessionEvent::Up);

        let mut link = ScriptedLink::new(&world, &[]);
        let mut session = ScriptedSession::new();
        session.fail_publishes(true);
        let mut delay = VirtualDelay::new(&world);
        let mut steady = SteadyState::new(
            &mut link,
            &world.link_state,
            &mut session,
            &world.session_state,
            1,
            topic(),
            readings(),
            &mut delay,
        );

        let outcome = block_on(steady.tick());
        assert_eq!(
            outcome,
            TickOutcome::PublishFailed(Reading::new(42).unwrap(), PublishError::Transport)
        );
        assert_eq!(world.link_state.get(), LinkStatus::Up);
        assert!(world.session_state.is_up());

        // The next tick tries again with a fresh reading.
        let outcome = block_on(steady.tick());
        assert_eq!(
            outcome,
            TickOutcome::PublishFailed(Reading::new(7).unwrap(), PublishError::Transport)
        );
    }

    #[test]
    fn test_run_ticks_once_per_period() {
        let world = World::new();
        world.link_state.on_event(LinkEvent::GotAddress);
        world.session_state.on_event(SessionEvent::Up);

        let mut link = ScriptedLink::new(&world, &[]);
        let mut session = ScriptedSession::new();
        let mut delay = VirtualDelay::new(&world);

        {
            let mut steady = SteadyState::new(
                &mut link,
                &world.link_state,
                &mut session,
                &world.session_state,
                1,
                topic(),
                readings(),
                &mut delay,
            );
            // Stop once 35 s of virtual time have passed.
            let outcome = block_on(select(steady.run(), async {
                while world.now_ms() < 35_000 {
                    yield_now().await;
                }
            }));
            assert!(matches!(outcome, Either::Second(())));
        }

        // Ticks at 0, 10, 20 and 30 s.
        let payloads: std::vec::Vec<&str> =
            session.published().iter().map(|p| p.payload.as_str()).collect();
        assert_eq!(payloads, ["42", "7", "99", "42"]);
    }

    #[test]
    fn test_link_recovery_resumes_publishing() {
        let world = World::new();
        world.session_state.on_event(SessionEvent::Up);

        let mut link = ScriptedLink::new(&world, &[Some(2_000)]);
        let mut session = ScriptedSession::new();
        let mut delay = VirtualDelay::new(&world);
        let mut steady = SteadyState::new(
            &mut link,
            &world.link_state,
            &mut session,
            &world.session_state,
            1,
            topic(),
            readings(),
            &mut delay,
        );

        assert_eq!(block_on(steady.tick()), TickOutcome::Reconnecting);
        world.advance(10_000);
        assert!(matches!(block_on(steady.tick()), TickOutcome::Published(_)));
    }
}
