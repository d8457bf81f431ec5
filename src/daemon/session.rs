use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

use crate::utils::time::duration_secs;

use super::categorize::Category;

/// The session currently holding foreground focus. Only
/// [SessionStateMachine](super::collection::state_machine::SessionStateMachine) owns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub app_name: Arc<str>,
    pub window_title: Arc<str>,
    pub category: Category,
    pub start_time: DateTime<Utc>,
}

impl Session {
    pub fn open(
        app_name: impl Into<Arc<str>>,
        window_title: impl Into<Arc<str>>,
        category: Category,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            window_title: window_title.into(),
            category,
            start_time,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).max(Duration::zero())
    }

    pub fn close(self, end_time: DateTime<Utc>) -> ClosedSession {
        ClosedSession {
            app_name: self.app_name,
            window_title: self.window_title,
            category: self.category,
            start_time: self.start_time,
            end_time,
        }
    }

    pub fn view(&self, now: DateTime<Utc>, is_idle: bool) -> SessionView {
        SessionView {
            app_name: self.app_name.clone(),
            window_title: self.window_title.clone(),
            category: self.category,
            start_time: self.start_time,
            elapsed: self.elapsed(now),
            is_idle,
        }
    }
}

/// A finished session on its way to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    pub app_name: Arc<str>,
    pub window_title: Arc<str>,
    pub category: Category,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ClosedSession {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.app_name.clone(), self.start_time)
    }
}

/// Identifies a close event. Two closes of the same session share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    app_name: Arc<str>,
    start_time: DateTime<Utc>,
}

impl SessionKey {
    pub fn new(app_name: Arc<str>, start_time: DateTime<Utc>) -> Self {
        let start_time = start_time
            .duration_trunc(Duration::seconds(1))
            .unwrap_or(start_time);
        Self {
            app_name,
            start_time,
        }
    }
}

/// Read only snapshot of the open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub app_name: Arc<str>,
    pub window_title: Arc<str>,
    pub category: Category,
    pub start_time: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub is_idle: bool,
}
