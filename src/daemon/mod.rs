use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use collection::input::{InputHook, SystemInputHook};
use config::TrackerConfig;
use processing::broadcaster::LogSubscriber;
use storage::session_storage::SessionStorageImpl;
use tokio_util::sync::CancellationToken;
use tracker::Tracker;

use crate::{
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericWindowManager, WindowProbe},
};

pub mod args;
pub mod categorize;
pub mod collection;
pub mod config;
pub mod events;
pub mod processing;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod tracker;

/// Directory inside the application directory holding the day files.
pub const SESSION_DIR: &str = "sessions";

/// Represents the starting point for the daemon. Tracks until a shutdown signal arrives.
pub async fn start_daemon(dir: PathBuf, config: TrackerConfig) -> Result<()> {
    std::env::set_current_dir("/")?;

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    // The input hook polls on its own connection, so it never waits behind a window query.
    let input_hook = SystemInputHook::new(
        GenericWindowManager::new(),
        config.input_poll_interval,
        clock.clone(),
    );
    let mut tracker = create_tracker(
        dir,
        config,
        GenericWindowManager::new(),
        input_hook,
        clock,
    )?;

    let log_subscriber = Arc::new(LogSubscriber);
    tracker.subscribe(&log_subscriber);

    tracker.start();
    shutdown::detect_shutdown(CancellationToken::new()).await;
    tracker.stop().await;

    Ok(())
}

fn create_tracker(
    dir: PathBuf,
    config: TrackerConfig,
    probe: impl WindowProbe + 'static,
    input_hook: impl InputHook + 'static,
    clock: Arc<dyn Clock>,
) -> Result<Tracker<SessionStorageImpl>> {
    let storage = SessionStorageImpl::new(dir.join(SESSION_DIR))?;
    Ok(Tracker::new(config, probe, input_hook, storage, clock))
}
