use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use state_machine::SessionStateMachine;

pub mod collector;
pub mod heartbeat;
pub mod idle;
pub mod input;
pub mod state_machine;

/// The single place the open session lives. Never hold the guard across an `.await`.
pub type SharedStateMachine = Arc<Mutex<SessionStateMachine>>;

pub fn lock_state(state: &SharedStateMachine) -> MutexGuard<'_, SessionStateMachine> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
