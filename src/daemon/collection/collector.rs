use std::{
    sync::{Arc, Mutex, TryLockError},
    time::Duration,
};

use anyhow::Result;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    daemon::{
        events::TrackerEvent, processing::broadcaster::EventBroadcaster, session::ClosedSession,
    },
    utils::{clock::Clock, time::format_duration},
    window_api::{ActiveWindowData, WindowProbe},
};

use super::{
    idle::{IdleMonitor, IdleTransition},
    lock_state,
    state_machine::Transition,
    SharedStateMachine,
};

pub type SharedProbe = Arc<Mutex<Box<dyn WindowProbe>>>;

/// Where transitions go: closed sessions are queued for persistence, every transition is
/// published.
#[derive(Clone)]
pub struct SessionOutput {
    broadcaster: Arc<EventBroadcaster>,
    persist_queue: mpsc::Sender<ClosedSession>,
}

impl SessionOutput {
    pub fn new(
        broadcaster: Arc<EventBroadcaster>,
        persist_queue: mpsc::Sender<ClosedSession>,
    ) -> Self {
        Self {
            broadcaster,
            persist_queue,
        }
    }

    pub fn publish(&self, event: &TrackerEvent) {
        self.broadcaster.publish(event);
    }

    pub fn dispatch(&self, transitions: impl IntoIterator<Item = Transition>) {
        for transition in transitions {
            match transition {
                Transition::Ended(session) => {
                    info!(
                        "Session of {} ended after {}",
                        session.app_name,
                        format_duration(session.duration())
                    );
                    let event = TrackerEvent::session_end(&session);
                    // Never wait on storage from the tracking loop.
                    match self.persist_queue.try_send(session) {
                        Ok(()) => (),
                        Err(TrySendError::Full(session)) => {
                            error!("Persistence queue is full, dropping {session:?}")
                        }
                        Err(TrySendError::Closed(session)) => {
                            error!("Persistence worker is gone, dropping {session:?}")
                        }
                    }
                    self.publish(&event);
                }
                Transition::Started(session) => {
                    info!("Session of {} started", session.app_name);
                    self.publish(&TrackerEvent::session_start(&session));
                }
            }
        }
    }
}

/// The tracking loop. Once per tick it probes the foreground window and feeds the result into
/// the state machine. Idle notifications are handled between ticks.
pub struct DataCollectionModule {
    state: SharedStateMachine,
    probe: SharedProbe,
    idle_monitor: Arc<IdleMonitor>,
    idle_events: mpsc::UnboundedReceiver<IdleTransition>,
    output: SessionOutput,
    shutdown: CancellationToken,
    tick_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl DataCollectionModule {
    pub fn new(
        state: SharedStateMachine,
        probe: SharedProbe,
        (idle_monitor, idle_events): (Arc<IdleMonitor>, mpsc::UnboundedReceiver<IdleTransition>),
        output: SessionOutput,
        shutdown: CancellationToken,
        tick_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            probe,
            idle_monitor,
            idle_events,
            output,
            shutdown,
            tick_interval,
            clock,
        }
    }

    /// Runs one probe on the blocking pool. Overrunning the tick, panicking or still being busy
    /// with the previous tick all count as no result.
    async fn probe_window(&self) -> Option<ActiveWindowData> {
        let probe = self.probe.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut probe = match probe.try_lock() {
                Ok(probe) => probe,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    debug!("Previous probe is still running");
                    return None;
                }
            };
            probe.poll()
        });

        match tokio::time::timeout(self.tick_interval, task).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                error!("Window probe crashed {e:?}");
                None
            }
            Err(_) => {
                warn!("Window probe took longer than {:?}", self.tick_interval);
                None
            }
        }
    }

    /// Evaluates a single tick.
    pub async fn tick(&mut self) {
        let is_idle = self.idle_monitor.is_user_idle();
        if is_idle {
            // The sampler may not have seen this episode yet.
            if let Some(transition) = self.idle_monitor.claim_idle_episode() {
                self.handle_idle(transition);
            }
        }

        let now = self.clock.time();
        let snapshot = if is_idle {
            None
        } else {
            self.probe_window().await
        };

        let transitions = lock_state(&self.state).tick(now, is_idle, snapshot.as_ref());
        self.output.dispatch(transitions);
    }

    /// Going idle closes the open session before the idle event goes out.
    pub fn handle_idle(&mut self, transition: IdleTransition) {
        match transition {
            IdleTransition::Idle { idle_for } => {
                let now = self.clock.time();
                let closed = lock_state(&self.state).close(now);
                self.output.dispatch(closed.map(Transition::Ended));

                let idle_for = chrono::Duration::from_std(idle_for).unwrap_or_default();
                info!("User went idle {} ago", format_duration(idle_for));
                self.output.publish(&TrackerEvent::idle(idle_for, now));
            }
            IdleTransition::Active => {
                info!("User is back");
            }
        }
    }

    /// Closes whatever is open. Used when tracking stops.
    pub fn finish(&mut self) {
        let now = self.clock.time();
        let closed = lock_state(&self.state).close(now);
        self.output.dispatch(closed.map(Transition::Ended));
    }

    /// Executes the tracking loop until shutdown, then closes the open session. Dropping the
    /// module afterwards drops the persistence sender, which lets the worker drain and stop.
    pub async fn run(mut self) -> Result<()> {
        info!("Tracking started");
        let mut tick_point = self.clock.instant();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(transition) = self.idle_events.recv() => {
                    self.handle_idle(transition);
                    continue;
                }
                _ = self.clock.sleep_until(tick_point) => (),
            }

            tick_point += self.tick_interval;
            self.tick().await;
        }

        self.finish();
        info!("Tracking stopped");
        Ok(())
    }
}

/// Wraps a probe so it can be shared with the blocking pool.
pub fn shared_probe(probe: impl WindowProbe + 'static) -> SharedProbe {
    let probe: Box<dyn WindowProbe> = Box::new(probe);
    Arc::new(Mutex::new(probe))
}
