use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    daemon::{categorize::Category, events::SOURCE_OS, session::ClosedSession},
    utils::time::duration_secs,
};

/// The shape a finished session takes on disk. One entity per line in the record file of the
/// UTC day the session started.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct SessionRecordEntity {
    pub app_name: Arc<str>,
    pub window_title: Arc<str>,
    pub category: Category,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub source_os: Arc<str>,
}

impl From<&ClosedSession> for SessionRecordEntity {
    fn from(session: &ClosedSession) -> Self {
        SessionRecordEntity {
            app_name: session.app_name.clone(),
            window_title: session.window_title.clone(),
            category: session.category,
            start_time: session.start_time,
            end_time: session.end_time,
            duration: session.duration(),
            source_os: SOURCE_OS.into(),
        }
    }
}
