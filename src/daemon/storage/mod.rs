//! Storage is organized through [session_storage::SessionStorageImpl].
//! The basic idea is:
//!  - There is a directory with all the session files.
//!  - Each file holds the sessions started during one UTC day, named `YYYY-MM-DD`.
//!  - Sessions are appended as single json lines, so a crash can at most corrupt the last line.

pub mod entities;
pub mod session_storage;
