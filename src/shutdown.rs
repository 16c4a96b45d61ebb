use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel a token on the first SIGTERM or SIGINT.
///
/// Hand the token to [`BatchScheduler::with_shutdown`](crate::batch::BatchScheduler::with_shutdown):
/// running jobs finish, but nothing new is dispatched and pending joins return.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let received = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        tracing::info!(signal = received, "Stopping dispatch of queued jobs");
        cancel.cancel();
    });

    Ok(token)
}
