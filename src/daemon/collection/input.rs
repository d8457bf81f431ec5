use std::{
    sync::{Arc, Mutex, PoisonError, TryLockError},
    time::Duration,
};

use anyhow::anyhow;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

use crate::{utils::clock::Clock, window_api::WindowManager};

use super::idle::IdleMonitor;

#[derive(Debug, Error)]
pub enum InputHookError {
    #[error("input activity can't be observed: {0}")]
    Unavailable(String),
}

/// Source of global input activity. Installing feeds every observed input into the monitor until
/// the returned handle is cancelled or dropped.
pub trait InputHook: Send + Sync {
    fn install(&self, monitor: Arc<IdleMonitor>) -> Result<InputHookHandle, InputHookError>;
}

pub struct InputHookHandle {
    guard: DropGuard,
    task: Option<JoinHandle<()>>,
}

impl InputHookHandle {
    pub fn new(token: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self {
            guard: token.drop_guard(),
            task,
        }
    }

    /// Stops the hook and waits for it to wind down until `deadline`. A hook that is still
    /// running by then is aborted.
    pub async fn cancel(self, deadline: Instant) {
        drop(self.guard);
        let Some(mut task) = self.task else {
            return;
        };
        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(result) => {
                let _ = result.inspect_err(|e| error!("Input hook ended abnormally {e:?}"));
            }
            Err(_) => {
                error!("Input hook didn't stop in time");
                task.abort();
            }
        }
    }
}

/// Polls the platform's "time since last input" counter. Requires a running tokio runtime.
pub struct SystemInputHook<W> {
    manager: Arc<Mutex<W>>,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl<W: WindowManager + 'static> SystemInputHook<W> {
    pub fn new(manager: W, poll_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            poll_interval,
            clock,
        }
    }

    /// The platform query may block, keep it off the async workers. Gives up after `deadline`;
    /// a query still hanging from an earlier poll makes the next one fail right away.
    async fn query_idle_time(manager: &Arc<Mutex<W>>, deadline: Duration) -> anyhow::Result<u32> {
        let manager = manager.clone();
        let query = tokio::task::spawn_blocking(move || match manager.try_lock() {
            Ok(mut manager) => manager.get_idle_time(),
            Err(TryLockError::Poisoned(e)) => e.into_inner().get_idle_time(),
            Err(TryLockError::WouldBlock) => Err(anyhow!("Previous idle query is still running")),
        });
        tokio::time::timeout(deadline, query)
            .await
            .map_err(|_| anyhow!("Idle query took longer than {deadline:?}"))??
    }

    async fn poll_loop(
        manager: Arc<Mutex<W>>,
        monitor: Arc<IdleMonitor>,
        poll_interval: Duration,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) {
        let mut poll_point = clock.instant();
        let mut warned = false;
        loop {
            poll_point += poll_interval;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = clock.sleep_until(poll_point) => (),
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = Self::query_idle_time(&manager, poll_interval) => result,
            };
            match result {
                Ok(idle_ms) => {
                    warned = false;
                    let last_input = clock.time() - chrono::Duration::milliseconds(idle_ms.into());
                    monitor.record_activity_at(last_input);
                }
                Err(e) if !warned => {
                    warned = true;
                    warn!("Failed to read time since last input {e:?}");
                }
                Err(_) => (),
            }
        }
        debug!("Input polling stopped");
    }
}

impl<W: WindowManager + 'static> InputHook for SystemInputHook<W> {
    fn install(&self, monitor: Arc<IdleMonitor>) -> Result<InputHookHandle, InputHookError> {
        let idle_ms = self
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_idle_time()
            .map_err(|e| InputHookError::Unavailable(format!("{e:#}")))?;
        monitor.record_activity_at(
            self.clock.time() - chrono::Duration::milliseconds(idle_ms.into()),
        );

        let token = CancellationToken::new();
        let task = tokio::spawn(Self::poll_loop(
            self.manager.clone(),
            monitor,
            self.poll_interval,
            self.clock.clone(),
            token.clone(),
        ));
        Ok(InputHookHandle::new(token, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::anyhow;

    use crate::{
        daemon::collection::idle::IdleMonitor,
        utils::clock::{test_clock::TestClock, Clock, DefaultClock},
        window_api::MockWindowManager,
    };

    use super::{InputHook, InputHookError, SystemInputHook};

    const THRESHOLD: Duration = Duration::from_secs(180);

    #[tokio::test(start_paused = true)]
    async fn test_install_fails_without_idle_time() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let (monitor, _rx) = IdleMonitor::new(THRESHOLD, clock.clone());
        let mut manager = MockWindowManager::new();
        manager
            .expect_get_idle_time()
            .returning(|| Err(anyhow!("no screensaver extension")));

        let hook = SystemInputHook::new(manager, Duration::from_secs(1), clock);
        let result = hook.install(monitor);

        assert!(matches!(result, Err(InputHookError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_feeds_monitor() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let (monitor, _rx) = IdleMonitor::new(THRESHOLD, clock.clone());

        // Idle counter keeps growing, the user touched nothing since the start.
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(move || {
            let polled = counter.fetch_add(1, Ordering::SeqCst);
            Ok(polled * 10_000)
        });

        let hook = SystemInputHook::new(manager, Duration::from_secs(10), clock.clone());
        let handle = hook.install(monitor.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert!(monitor.is_user_idle());
        assert!(polls.load(Ordering::SeqCst) >= 18);

        handle
            .cancel(tokio::time::Instant::now() + Duration::from_secs(5))
            .await;
        let polled = polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(polls.load(Ordering::SeqCst), polled);
    }

    #[tokio::test]
    async fn test_hanging_idle_query_does_not_block_cancel() {
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let (monitor, _rx) = IdleMonitor::new(THRESHOLD, clock.clone());

        // Answers the install query, then hangs like a stuck display server.
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                std::thread::sleep(Duration::from_millis(1500));
            }
            Ok(0)
        });

        let hook = SystemInputHook::new(manager, Duration::from_millis(50), clock);
        let handle = hook.install(monitor).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = tokio::time::Instant::now();
        handle.cancel(started + Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        // Later polls find the hanging query still holding the manager.
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }
}
