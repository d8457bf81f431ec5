use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::duration_secs;

use super::{
    categorize::Category,
    session::{ClosedSession, Session, SessionView},
};

/// Operating system recorded alongside every finished session.
pub const SOURCE_OS: &str = std::env::consts::OS;

/// Everything observers can see. Serialized as `{"event": "session_start", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    SessionStart {
        app: Arc<str>,
        window: Arc<str>,
        category: Category,
        timestamp: DateTime<Utc>,
    },
    SessionEnd {
        app: Arc<str>,
        window: Arc<str>,
        #[serde(with = "duration_secs")]
        duration: Duration,
        category: Category,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source_os: Arc<str>,
    },
    Heartbeat {
        app: Arc<str>,
        window: Arc<str>,
        #[serde(with = "duration_secs")]
        elapsed: Duration,
        category: Category,
        is_idle: bool,
        timestamp: DateTime<Utc>,
    },
    Idle {
        #[serde(with = "duration_secs")]
        idle_duration: Duration,
        timestamp: DateTime<Utc>,
    },
}

impl TrackerEvent {
    pub fn session_start(session: &Session) -> Self {
        Self::SessionStart {
            app: session.app_name.clone(),
            window: session.window_title.clone(),
            category: session.category,
            timestamp: session.start_time,
        }
    }

    pub fn session_end(session: &ClosedSession) -> Self {
        Self::SessionEnd {
            app: session.app_name.clone(),
            window: session.window_title.clone(),
            duration: session.duration(),
            category: session.category,
            start: session.start_time,
            end: session.end_time,
            source_os: SOURCE_OS.into(),
        }
    }

    pub fn heartbeat(view: SessionView, timestamp: DateTime<Utc>) -> Self {
        Self::Heartbeat {
            app: view.app_name,
            window: view.window_title,
            elapsed: view.elapsed,
            category: view.category,
            is_idle: view.is_idle,
            timestamp,
        }
    }

    pub fn idle(idle_duration: Duration, timestamp: DateTime<Utc>) -> Self {
        Self::Idle {
            idle_duration,
            timestamp,
        }
    }

    /// Name used on the wire and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TrackerEvent::SessionStart { .. } => "session_start",
            TrackerEvent::SessionEnd { .. } => "session_end",
            TrackerEvent::Heartbeat { .. } => "heartbeat",
            TrackerEvent::Idle { .. } => "idle",
        }
    }
}
