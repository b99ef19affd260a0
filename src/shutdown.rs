use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Token cancelled on the first SIGTERM or SIGINT.
///
/// The controller treats it as its `alive` flag: the current job stops at
/// the next boundary, running directives are cancelled and no result is
/// delivered.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping resource");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping resource");
            }
        }
        stop.cancel();
    });

    Ok(token)
}
