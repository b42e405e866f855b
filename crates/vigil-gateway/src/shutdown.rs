//! Process shutdown: signal handling and bounded-grace teardown of the
//! scheduler task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Resolve on Ctrl-C, SIGTERM, or when `cancel` fires elsewhere. Cancels
/// `cancel` on the way out so every subsystem sees the same signal.
pub async fn signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received"),
        _ = terminate => info!("SIGTERM received"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}

/// Wait up to `grace` for a cancelled background task, then abort it.
pub async fn join_with_grace(name: &str, task: JoinHandle<()>, grace: Duration) {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(())) => info!(task = name, "stopped"),
        Ok(Err(e)) => error!(task = name, "task failed: {e}"),
        Err(_) => {
            warn!(task = name, grace_secs = grace.as_secs(), "did not stop in time, aborting");
            abort.abort();
        }
    }
}
