use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    daemon::{events::TrackerEvent, processing::broadcaster::EventBroadcaster},
    utils::clock::Clock,
};

use super::{idle::IdleMonitor, lock_state, SharedStateMachine};

/// Periodically tells observers which session is open and for how long.
pub struct HeartbeatEmitter {
    state: SharedStateMachine,
    idle_monitor: Arc<IdleMonitor>,
    broadcaster: Arc<EventBroadcaster>,
    shutdown: CancellationToken,
    period: Duration,
    clock: Arc<dyn Clock>,
}

impl HeartbeatEmitter {
    pub fn new(
        state: SharedStateMachine,
        idle_monitor: Arc<IdleMonitor>,
        broadcaster: Arc<EventBroadcaster>,
        shutdown: CancellationToken,
        period: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            idle_monitor,
            broadcaster,
            shutdown,
            period,
            clock,
        }
    }

    /// Heartbeat for the current moment. Nothing while idle or when no session is open.
    pub fn beat(&self) -> Option<TrackerEvent> {
        let is_idle = self.idle_monitor.is_user_idle();
        if is_idle {
            return None;
        }
        let now = self.clock.time();
        let view = lock_state(&self.state).view(now, is_idle)?;
        Some(TrackerEvent::heartbeat(view, now))
    }

    pub async fn run(self) -> Result<()> {
        let mut beat_point = self.clock.instant();
        loop {
            beat_point += self.period;
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(beat_point) => (),
            }

            if let Some(event) = self.beat() {
                debug!("Heartbeat {event:?}");
                self.broadcaster.publish(&event);
            }
        }
        info!("Heartbeat stopped");
        Ok(())
    }
}
