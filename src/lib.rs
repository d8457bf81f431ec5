//! Tracks which application has focus, groups the time into sessions and keeps them on disk.
//! Runs as a lightweight daemon next to a small cli for reading the history back.

pub mod cli;
pub mod daemon;
pub mod utils;
pub mod window_api;
