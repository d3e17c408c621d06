use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `cancellation` on Ctrl-C. Returns early once the token is cancelled elsewhere.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted by user");
            cancellation.cancel();
        },
        _ = cancellation.cancelled() => {},
    };
}
