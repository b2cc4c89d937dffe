//! OS termination signals.

use tracing::warn;

/// Resolves on the first SIGINT (Ctrl-C) or SIGTERM and names the signal.
///
/// If a handler cannot be installed that source never fires; the other one
/// (and any cancellation token raced against this) still works.
pub async fn termination_signal() -> &'static str {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// [`termination_signal`] when `enabled`, otherwise never.
pub(crate) async fn signal_if(enabled: bool) -> &'static str {
    if enabled {
        termination_signal().await
    } else {
        std::future::pending().await
    }
}
