use std::time::Duration;

use tokio::signal;

/// Wait for a shutdown signal (SIGINT or SIGTERM). Returns which one arrived.
///
/// If a handler cannot be installed, that signal is simply never observed.
pub async fn wait_for_shutdown() -> String {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling run...");
            "interrupted (SIGINT)".to_string()
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, cancelling run...");
            "terminated (SIGTERM)".to_string()
        }
    }
}

/// Resolve after `budget`, or never when there is none.
pub async fn deadline(budget: Option<Duration>) -> String {
    match budget {
        Some(budget) => {
            tokio::time::sleep(budget).await;
            tracing::warn!(budget_secs = budget.as_secs(), "Run exceeded its time budget");
            format!("exceeded the {}s runtime budget", budget.as_secs())
        }
        None => std::future::pending().await,
    }
}

/// Whichever comes first: a shutdown signal or the runtime budget.
pub async fn cancellation(budget: Option<Duration>) -> String {
    tokio::select! {
        reason = wait_for_shutdown() => reason,
        reason = deadline(budget) => reason,
    }
}
