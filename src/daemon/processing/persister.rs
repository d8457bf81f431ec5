use std::{sync::Arc, time::Duration};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    daemon::{
        session::{ClosedSession, SessionKey},
        storage::{
            entities::SessionRecordEntity,
            session_storage::{SessionSink, StorageError},
        },
    },
    utils::clock::Clock,
};

use super::module::EventProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `attempt`, which is 1 based.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage stayed busy after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Bridges [ProcessingModule](super::ProcessingModule) and a [SessionSink]. Contention is
/// retried with exponential backoff, everything else is reported right away.
pub struct SessionPersister<S> {
    sink: S,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    last_persisted: Option<SessionKey>,
}

impl<S: SessionSink> SessionPersister<S> {
    pub fn new(sink: S, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            policy,
            clock,
            last_persisted: None,
        }
    }

    #[instrument(skip_all, fields(app = %session.app_name))]
    pub async fn persist(&self, session: &ClosedSession) -> Result<(), PersistError> {
        let record = SessionRecordEntity::from(session);
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.sink.save(&record).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_contention() && attempt < max_attempts => {
                    let backoff = self.policy.backoff(attempt);
                    warn!("Storage is busy ({attempt}/{max_attempts}), retrying in {backoff:?}");
                    self.clock.sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_contention() => {
                    return Err(PersistError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<S: SessionSink> EventProcessor for SessionPersister<S> {
    async fn process_next(&mut self, session: ClosedSession) -> Result<()> {
        let key = session.key();
        if self.last_persisted.as_ref() == Some(&key) {
            debug!("Session {key:?} was already persisted");
            return Ok(());
        }

        self.persist(&session).await?;
        self.last_persisted = Some(key);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}
