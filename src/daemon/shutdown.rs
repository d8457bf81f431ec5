use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for Ctrl-C, SIGTERM on unix, or `cancellation` and then cancels `cancellation`.
///
/// On Windows detached processes can't detect signals sent to them, `screentime stop` terminates
/// the process there.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C");
        },
        _ = terminate() => {
            info!("Received SIGTERM");
        },
        _ = cancellation.cancelled() => (),
    };
    cancellation.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            terminate.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to listen for SIGTERM {e:?}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
