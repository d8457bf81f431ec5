use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

use crate::{utils::clock::Clock, window_api::WindowProbe};

use super::{
    categorize::{CategoryResolver, StaticCategoryResolver},
    collection::{
        collector::{shared_probe, DataCollectionModule, SessionOutput, SharedProbe},
        heartbeat::HeartbeatEmitter,
        idle::IdleMonitor,
        input::{InputHook, InputHookHandle},
        lock_state,
        state_machine::{SessionStateMachine, Transition},
        SharedStateMachine,
    },
    config::TrackerConfig,
    processing::{
        broadcaster::{EventBroadcaster, Subscriber, SubscriberId},
        persister::{RetryPolicy, SessionPersister},
        ProcessingModule,
    },
    session::SessionView,
    storage::session_storage::SessionSink,
};

/// How long [Tracker::stop] waits for every task.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the whole tracking pipeline: probing, idle detection, heartbeats, persistence and the
/// broadcaster. Tasks run on the ambient tokio runtime between [Tracker::start] and
/// [Tracker::stop].
pub struct Tracker<S> {
    config: TrackerConfig,
    probe: SharedProbe,
    input_hook: Box<dyn InputHook>,
    sink: Arc<S>,
    clock: Arc<dyn Clock>,
    broadcaster: Arc<EventBroadcaster>,
    state: SharedStateMachine,
    running: Option<RunningTracker>,
}

struct RunningTracker {
    shutdown: DropGuard,
    output: SessionOutput,
    idle_monitor: Arc<IdleMonitor>,
    input: Option<InputHookHandle>,
    collector: JoinHandle<anyhow::Result<()>>,
    heartbeat: JoinHandle<anyhow::Result<()>>,
    idle: JoinHandle<()>,
    processor: JoinHandle<anyhow::Result<()>>,
}

impl<S: SessionSink + 'static> Tracker<S> {
    pub fn new(
        config: TrackerConfig,
        probe: impl WindowProbe + 'static,
        input_hook: impl InputHook + 'static,
        sink: S,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = Self::state_machine(&config, Arc::new(StaticCategoryResolver));
        Self {
            config,
            probe: shared_probe(probe),
            input_hook: Box::new(input_hook),
            sink: Arc::new(sink),
            clock,
            broadcaster: Arc::new(EventBroadcaster::new()),
            state,
            running: None,
        }
    }

    /// Replaces the built in category table.
    pub fn with_resolver(mut self, resolver: Arc<dyn CategoryResolver>) -> Self {
        self.state = Self::state_machine(&self.config, resolver);
        self
    }

    fn state_machine(
        config: &TrackerConfig,
        resolver: Arc<dyn CategoryResolver>,
    ) -> SharedStateMachine {
        Arc::new(Mutex::new(SessionStateMachine::new(
            config.min_session_duration(),
            config.window_title_max_len,
            resolver,
        )))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn subscribe<T: Subscriber + 'static>(&self, subscriber: &Arc<T>) -> SubscriberId {
        self.broadcaster.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    /// Snapshot of the open session. [None] when stopped or nothing is open.
    pub fn current_session(&self) -> Option<SessionView> {
        let running = self.running.as_ref()?;
        let is_idle = running.idle_monitor.is_user_idle();
        lock_state(&self.state).view(self.clock.time(), is_idle)
    }

    /// Spawns the tracking tasks. Starting a running tracker does nothing.
    pub fn start(&mut self) {
        if self.running.is_some() {
            warn!("Tracker is already running");
            return;
        }

        let config = &self.config;
        let shutdown = CancellationToken::new();

        let (idle_monitor, idle_events) =
            IdleMonitor::new(config.idle_threshold, self.clock.clone());
        let input = match self.input_hook.install(idle_monitor.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to observe input: {e}");
                idle_monitor.disable();
                None
            }
        };

        let (sender, receiver) = mpsc::channel(config.persist_queue_capacity.max(1));
        let output = SessionOutput::new(self.broadcaster.clone(), sender);

        let persister = SessionPersister::new(
            self.sink.clone(),
            RetryPolicy {
                max_attempts: config.persist_max_attempts,
                initial_backoff: config.persist_initial_backoff,
            },
            self.clock.clone(),
        );
        let processor = tokio::spawn(ProcessingModule::new(receiver, persister).run());

        let collector = DataCollectionModule::new(
            self.state.clone(),
            self.probe.clone(),
            (idle_monitor.clone(), idle_events),
            output.clone(),
            shutdown.clone(),
            config.tick_interval,
            self.clock.clone(),
        );
        let collector = tokio::spawn(collector.run());

        let heartbeat = HeartbeatEmitter::new(
            self.state.clone(),
            idle_monitor.clone(),
            self.broadcaster.clone(),
            shutdown.clone(),
            config.heartbeat_interval,
            self.clock.clone(),
        );
        let heartbeat = tokio::spawn(heartbeat.run());

        let idle = tokio::spawn(
            idle_monitor
                .clone()
                .run(config.idle_sample_interval, shutdown.clone()),
        );

        self.running = Some(RunningTracker {
            shutdown: shutdown.drop_guard(),
            output,
            idle_monitor,
            input,
            collector,
            heartbeat,
            idle,
            processor,
        });
        info!("Tracker started");
    }

    /// Stops every task, closing and persisting the open session. Waits at most a few seconds
    /// for the tasks to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let RunningTracker {
            shutdown,
            output,
            idle_monitor: _,
            input,
            collector,
            heartbeat,
            idle,
            processor,
        } = running;

        drop(shutdown);
        let deadline = Instant::now() + STOP_TIMEOUT;

        if let Some(input) = input {
            input.cancel(deadline).await;
        }
        join_until("tracking loop", collector, deadline).await;

        // The tracking loop closes the session on its way out. If it didn't make it, close from
        // here, an already closed session makes this a no-op.
        let closed = lock_state(&self.state).close(self.clock.time());
        output.dispatch(closed.map(Transition::Ended));
        drop(output);

        join_until("heartbeat", heartbeat, deadline).await;
        join_until("idle monitor", idle, deadline).await;
        join_until("persistence worker", processor, deadline).await;
        info!("Tracker stopped");
    }
}

trait TaskOutcome {
    fn report(self, name: &str);
}

impl TaskOutcome for () {
    fn report(self, _: &str) {}
}

impl TaskOutcome for anyhow::Result<()> {
    fn report(self, name: &str) {
        if let Err(e) = self {
            error!("The {name} failed {e:?}");
        }
    }
}

/// Waits for `handle` until `deadline`, aborting the task when it doesn't finish in time.
async fn join_until<T: TaskOutcome>(name: &str, mut handle: JoinHandle<T>, deadline: Instant) {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(outcome)) => outcome.report(name),
        Ok(Err(e)) => error!("The {name} crashed {e:?}"),
        Err(_) => {
            error!("The {name} didn't stop in time");
            handle.abort();
        }
    }
}
