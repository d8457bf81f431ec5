//! Decides when sessions start and end. The machine is pure: it is fed the current time, the idle
//! state and the latest probe result, and answers with the transitions that happened. Emitting
//! events and persisting is left to the caller.

use std::{mem, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    daemon::{
        categorize::{normalize_app_name, sanitize_window_title, CategoryResolver},
        session::{ClosedSession, Session, SessionView},
    },
    window_api::ActiveWindowData,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Started(Session),
    Ended(ClosedSession),
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    NoSession,
    Open(Session),
}

pub struct SessionStateMachine {
    state: SessionState,
    min_session_duration: chrono::Duration,
    window_title_max_len: usize,
    resolver: Arc<dyn CategoryResolver>,
}

impl SessionStateMachine {
    pub fn new(
        min_session_duration: Duration,
        window_title_max_len: usize,
        resolver: Arc<dyn CategoryResolver>,
    ) -> Self {
        Self {
            state: SessionState::NoSession,
            min_session_duration: chrono::Duration::from_std(min_session_duration)
                .unwrap_or(chrono::Duration::seconds(1)),
            window_title_max_len,
            resolver,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        match &self.state {
            SessionState::NoSession => None,
            SessionState::Open(session) => Some(session),
        }
    }

    pub fn view(&self, now: DateTime<Utc>, is_idle: bool) -> Option<SessionView> {
        self.current().map(|session| session.view(now, is_idle))
    }

    /// Evaluates one tick. Ended transitions always precede started ones.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        is_idle: bool,
        snapshot: Option<&ActiveWindowData>,
    ) -> Vec<Transition> {
        let mut transitions = vec![];

        if is_idle {
            transitions.extend(self.close(now).map(Transition::Ended));
            return transitions;
        }

        let Some(snapshot) = snapshot else {
            return transitions;
        };

        let app_name = normalize_app_name(&snapshot.app_name);
        let window_title = sanitize_window_title(&snapshot.window_title, self.window_title_max_len);

        match &mut self.state {
            SessionState::Open(session) if *session.app_name == *app_name => {
                if *session.window_title != *window_title {
                    session.category = self.resolver.categorize(&app_name, &window_title);
                    session.window_title = window_title.into();
                }
            }
            _ => {
                transitions.extend(self.close(now).map(Transition::Ended));

                let category = self.resolver.categorize(&app_name, &window_title);
                let session = Session::open(app_name, window_title, category, now);
                debug!("Opened session {session:?}");
                self.state = SessionState::Open(session.clone());
                transitions.push(Transition::Started(session));
            }
        }

        transitions
    }

    /// Closes the open session at `now`. Returns [None] when nothing was open or the session was
    /// too short to be kept.
    pub fn close(&mut self, now: DateTime<Utc>) -> Option<ClosedSession> {
        let SessionState::Open(session) = mem::take(&mut self.state) else {
            return None;
        };

        let closed = session.close(now);
        if closed.duration() < self.min_session_duration {
            debug!("Dropping short session {closed:?}");
            return None;
        }
        Some(closed)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{DateTime, TimeZone, Utc};

    use crate::{
        daemon::{
            categorize::{Category, StaticCategoryResolver},
            config::TrackerConfig,
        },
        utils::clock::test_clock::TEST_START_DATE,
        window_api::ActiveWindowData,
    };

    use super::{SessionStateMachine, Transition};

    fn machine() -> SessionStateMachine {
        SessionStateMachine::new(Duration::from_secs(1), 200, Arc::new(StaticCategoryResolver))
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE) + chrono::Duration::seconds(seconds)
    }

    fn window(app: &str, title: &str) -> ActiveWindowData {
        ActiveWindowData {
            window_title: title.into(),
            app_name: app.into(),
        }
    }

    #[test]
    fn test_switch_closes_and_opens_at_same_moment() {
        let mut machine = machine();
        machine.tick(at(0), false, Some(&window("slack", "general")));

        let transitions = machine.tick(at(4), false, Some(&window("zoom", "standup")));

        let [Transition::Ended(ended), Transition::Started(started)] = transitions.as_slice()
        else {
            panic!("unexpected transitions {transitions:?}");
        };
        assert_eq!(&*ended.app_name, "Slack");
        assert_eq!(ended.end_time, at(4));
        assert_eq!(ended.duration(), chrono::Duration::seconds(4));
        assert_eq!(&*started.app_name, "Zoom");
        assert_eq!(started.start_time, at(4));
        assert_eq!(started.category, Category::Communication);
    }

    #[test]
    fn test_title_change_mutates_in_place() {
        let mut machine = machine();
        machine.tick(at(0), false, Some(&window("firefox", "Weather")));

        let transitions = machine.tick(at(1), false, Some(&window("firefox", "YouTube")));

        assert!(transitions.is_empty());
        let current = machine.current().unwrap();
        assert_eq!(&*current.window_title, "YouTube");
        assert_eq!(current.category, Category::Entertainment);
        assert_eq!(current.start_time, at(0));
    }

    #[test]
    fn test_same_app_from_different_paths_is_one_session() {
        let mut machine = machine();
        machine.tick(at(0), false, Some(&window("/usr/bin/code", "a")));
        let transitions = machine.tick(
            at(1),
            false,
            Some(&window(r"C:\Program Files\Code\Code.exe", "a")),
        );
        assert!(transitions.is_empty());
    }

    #[test]
    fn test_failed_probe_changes_nothing() {
        let mut machine = machine();
        machine.tick(at(0), false, Some(&window("slack", "general")));
        assert!(machine.tick(at(1), false, None).is_empty());
        assert_eq!(machine.current().unwrap().start_time, at(0));
    }

    #[test]
    fn test_short_sessions_are_dropped() {
        let mut machine = SessionStateMachine::new(
            Duration::from_secs(2),
            200,
            Arc::new(StaticCategoryResolver),
        );
        machine.tick(at(0), false, Some(&window("slack", "general")));

        let transitions = machine.tick(at(1), false, Some(&window("zoom", "standup")));

        assert!(matches!(transitions.as_slice(), [Transition::Started(_)]));
    }

    fn configured_machine() -> SessionStateMachine {
        let config = TrackerConfig::default();
        SessionStateMachine::new(
            config.min_session_duration(),
            config.window_title_max_len,
            Arc::new(StaticCategoryResolver),
        )
    }

    fn at_millis(millis: i64) -> DateTime<Utc> {
        at(0) + chrono::Duration::milliseconds(millis)
    }

    #[test]
    fn test_one_tick_session_survives_jitter() {
        let mut machine = configured_machine();
        machine.tick(at_millis(0), false, Some(&window("code", "main.rs")));
        // The tick that saw slack woke up late, the next one on time.
        machine.tick(at_millis(1004), false, Some(&window("slack", "general")));

        let transitions = machine.tick(at_millis(2001), false, Some(&window("zoom", "standup")));

        let [Transition::Ended(ended), Transition::Started(_)] = transitions.as_slice() else {
            panic!("unexpected transitions {transitions:?}");
        };
        assert_eq!(&*ended.app_name, "Slack");
        assert_eq!(ended.duration(), chrono::Duration::milliseconds(997));
    }

    #[test]
    fn test_stop_inside_first_tick_drops_session() {
        let mut machine = configured_machine();
        machine.tick(at_millis(0), false, Some(&window("slack", "general")));
        assert!(machine.close(at_millis(500)).is_none());
    }

    #[test]
    fn test_idle_never_opens() {
        let mut machine = machine();
        assert!(machine
            .tick(at(0), true, Some(&window("slack", "general")))
            .is_empty());
        assert!(machine.current().is_none());
    }

    #[test]
    fn test_second_close_is_noop() {
        let mut machine = machine();
        machine.tick(at(0), false, Some(&window("slack", "general")));

        assert!(machine.close(at(3)).is_some());
        assert!(machine.close(at(3)).is_none());
        assert!(machine.tick(at(4), true, None).is_empty());
    }

    #[test]
    fn test_at_most_one_open_session() {
        let mut machine = machine();
        let apps = ["slack", "slack", "zoom", "code", "code", "zoom", "slack"];
        for (i, app) in apps.iter().enumerate() {
            let transitions = machine.tick(at(i as i64), false, Some(&window(app, "")));
            let started = transitions
                .iter()
                .filter(|t| matches!(t, Transition::Started(_)))
                .count();
            let ended = transitions
                .iter()
                .filter(|t| matches!(t, Transition::Ended(_)))
                .count();
            assert!(started <= 1 && ended <= started);
            assert!(machine.current().is_some());
        }
    }
}
