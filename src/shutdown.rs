use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
/// The worker pool goes quiet on it and drains running jobs. The memory
/// killer's own SIGTERM lands here too.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}

/// Install a handler for SIGTSTP, the "stop fetching new jobs" request.
///
/// Returns a token that is cancelled on the first SIGTSTP. Without a handler
/// the signal would suspend the whole process.
pub fn install_quiet_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigtstp = signal(SignalKind::from_raw(Signal::SIGTSTP as i32))?;

    tokio::spawn(async move {
        if sigtstp.recv().await.is_some() {
            tracing::warn!("Received SIGTSTP, no longer starting new jobs");
            token_clone.cancel();
        }
    });

    Ok(token)
}
