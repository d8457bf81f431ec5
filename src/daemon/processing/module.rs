use std::future::Future;

use anyhow::Result;

use crate::daemon::session::ClosedSession;

/// Represents a consumer of finished sessions. Local storage is the only one so far, a remote
/// server would be another.
pub trait EventProcessor: Send {
    fn process_next(&mut self, session: ClosedSession) -> impl Future<Output = Result<()>> + Send;

    fn finalize(&mut self) -> impl Future<Output = Result<()>> + Send;
}
