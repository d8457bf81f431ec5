use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::utils::clock::Clock;

/// Reported by [IdleMonitor] when the user goes away or comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    Idle { idle_for: Duration },
    Active,
}

/// Tracks the moment of the last user input. Idleness is derived from it on every read, so the
/// monitor itself only holds atomics and can be fed from any thread.
pub struct IdleMonitor {
    threshold: Duration,
    last_activity_ms: AtomicI64,
    idle_reported: AtomicBool,
    disabled: AtomicBool,
    notifier: mpsc::UnboundedSender<IdleTransition>,
    clock: Arc<dyn Clock>,
}

impl IdleMonitor {
    /// The receiver gets every transition. Sending is best effort, nobody listening is fine.
    pub fn new(
        threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<IdleTransition>) {
        let (notifier, receiver) = mpsc::unbounded_channel();
        let now = clock.time().timestamp_millis();
        let monitor = Self {
            threshold,
            last_activity_ms: AtomicI64::new(now),
            idle_reported: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            notifier,
            clock,
        };
        (Arc::new(monitor), receiver)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn record_activity(&self) {
        self.record_activity_at(self.clock.time());
    }

    /// Same as [Self::record_activity] for input that happened at `at`. Older moments than the
    /// one already known are ignored.
    pub fn record_activity_at(&self, at: DateTime<Utc>) {
        self.last_activity_ms
            .fetch_max(at.timestamp_millis(), Ordering::AcqRel);

        if !self.is_user_idle() && self.idle_reported.swap(false, Ordering::AcqRel) {
            debug!("User is active again");
            let _ = self.notifier.send(IdleTransition::Active);
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::Acquire);
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    pub fn idle_duration(&self) -> Duration {
        (self.clock.time() - self.last_activity())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Always false while disabled.
    pub fn is_user_idle(&self) -> bool {
        !self.is_disabled() && self.idle_duration() >= self.threshold
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Switches idle detection off, the user is considered active from now on.
    pub fn disable(&self) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            warn!("Idle detection is disabled, the user is always considered active");
        }
    }

    /// Marks the current idle episode as reported without notifying anyone, the caller handles
    /// the returned transition. [None] while active or when the episode was already reported.
    pub fn claim_idle_episode(&self) -> Option<IdleTransition> {
        if !self.is_user_idle() || self.idle_reported.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(IdleTransition::Idle {
            idle_for: self.idle_duration(),
        })
    }

    /// Reports the start of an idle episode to the receiver. Returns [None] while active or when
    /// the current episode was already reported.
    pub fn sample(&self) -> Option<IdleTransition> {
        let transition = self.claim_idle_episode()?;
        let _ = self.notifier.send(transition);
        Some(transition)
    }

    /// Samples idleness every `interval` until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut sample_point = self.clock.instant();
        loop {
            sample_point += interval;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.clock.sleep_until(sample_point) => (),
            }

            if let Some(IdleTransition::Idle { idle_for }) = self.sample() {
                info!("User is idle for {idle_for:?}");
            }
        }
        debug!("Idle monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio_util::sync::CancellationToken;

    use crate::utils::clock::{test_clock::TestClock, Clock};

    use super::{IdleMonitor, IdleTransition};

    const THRESHOLD: Duration = Duration::from_secs(180);

    #[tokio::test(start_paused = true)]
    async fn test_idle_is_derived_from_last_activity() {
        let (monitor, _rx) = IdleMonitor::new(THRESHOLD, Arc::new(TestClock::new()));
        assert!(!monitor.is_user_idle());

        tokio::time::advance(Duration::from_secs(179)).await;
        assert!(!monitor.is_user_idle());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(monitor.is_user_idle());

        monitor.record_activity();
        assert!(!monitor.is_user_idle());
        assert_eq!(monitor.idle_duration(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_reported_once_per_episode() {
        let (monitor, mut rx) = IdleMonitor::new(THRESHOLD, Arc::new(TestClock::new()));

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(
            monitor.sample(),
            Some(IdleTransition::Idle {
                idle_for: Duration::from_secs(200)
            })
        );
        assert_eq!(monitor.sample(), None);

        monitor.record_activity();
        tokio::time::advance(Duration::from_secs(180)).await;
        assert!(monitor.sample().is_some());

        let received = std::iter::from_fn(|| rx.try_recv().ok()).collect::<Vec<_>>();
        assert_eq!(
            received,
            vec![
                IdleTransition::Idle {
                    idle_for: Duration::from_secs(200)
                },
                IdleTransition::Active,
                IdleTransition::Idle {
                    idle_for: Duration::from_secs(180)
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_activity_does_not_wake_up() {
        let clock = Arc::new(TestClock::new());
        let (monitor, mut rx) = IdleMonitor::new(THRESHOLD, clock.clone());

        tokio::time::advance(Duration::from_secs(300)).await;
        monitor.sample();
        monitor.record_activity_at(clock.time() - chrono::Duration::seconds(200));

        assert!(monitor.is_user_idle());
        assert_eq!(monitor.sample(), None);
        assert!(matches!(rx.try_recv(), Ok(IdleTransition::Idle { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_episode_is_not_sampled_again() {
        let (monitor, mut rx) = IdleMonitor::new(THRESHOLD, Arc::new(TestClock::new()));

        tokio::time::advance(Duration::from_secs(181)).await;
        assert!(matches!(
            monitor.claim_idle_episode(),
            Some(IdleTransition::Idle { .. })
        ));
        assert_eq!(monitor.sample(), None);
        assert_eq!(monitor.claim_idle_episode(), None);
        assert!(rx.try_recv().is_err());

        monitor.record_activity();
        assert_eq!(rx.try_recv().ok(), Some(IdleTransition::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_is_never_idle() {
        let (monitor, _rx) = IdleMonitor::new(THRESHOLD, Arc::new(TestClock::new()));
        monitor.disable();
        monitor.disable();

        tokio::time::advance(Duration::from_secs(1000)).await;
        assert!(!monitor.is_user_idle());
        assert_eq!(monitor.sample(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_notifies_and_stops() {
        let (monitor, mut rx) = IdleMonitor::new(THRESHOLD, Arc::new(TestClock::new()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            monitor
                .clone()
                .run(Duration::from_secs(5), shutdown.clone()),
        );

        let transition = rx.recv().await;
        assert!(matches!(transition, Some(IdleTransition::Idle { .. })));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
