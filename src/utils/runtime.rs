use anyhow::Result;

/// Runtime used by the daemon. Two workers are enough for the tracking loops, platform queries
/// run on the blocking pool.
pub fn daemon_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("screentime-worker")
        .enable_all()
        .build()?)
}
