//! Background reconnect loop.
//!
//! Runs as its own task so the call that detected the disconnect returns
//! immediately. Each attempt is a `Reconnect` command processed by the
//! actor, which keeps connect + login serialized with push handling.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::SessionCommand;

/// Spawns the loop. It ends when an attempt succeeds, an attempt fails with
/// a non-connectivity error, the actor is gone, or `cancel_token` fires.
pub(crate) fn spawn_reconnect_loop(
    commands: mpsc::WeakSender<SessionCommand>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            // Upgrade per attempt so the loop does not keep the actor alive
            let Some(sender) = commands.upgrade() else {
                debug!("Reconnect loop stopping: session actor gone");
                return;
            };

            let (tx, rx) = oneshot::channel();
            if sender
                .send(SessionCommand::Reconnect { respond_to: tx })
                .await
                .is_err()
            {
                debug!("Reconnect loop stopping: command channel closed");
                return;
            }
            drop(sender);

            match rx.await {
                Ok(Ok(())) => {
                    info!(attempt, "Reconnect loop finished");
                    return;
                }
                Ok(Err(e)) if e.is_retryable() => {
                    debug!(attempt, error = %e, "Reconnect attempt failed, will retry");
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Giving up reconnect");
                    return;
                }
                Err(_) => {
                    debug!("Reconnect loop stopping: actor dropped response");
                    return;
                }
            }

            tokio::select! {
                _ = sleep(interval) => {}
                _ = cancel_token.cancelled() => {
                    info!("Reconnect loop cancelled");
                    return;
                }
            }
        }
    });
}
