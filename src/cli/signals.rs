//! Signal handling for graceful shutdown
//!
//! An interrupt never kills the loop mid-write: it cancels the token, and the
//! controller stops before the next iteration with the target in a
//! consistent state.

use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation token for async operations
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create a new cancellation token
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancel the token
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Check if cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGINT/SIGTERM and cancel `token`
pub async fn setup_signal_handlers(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error = %e, "failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => {
                eprintln!("\nReceived SIGINT, stopping after the current attempt...");
            }
            _ = sigterm.recv() => {
                eprintln!("\nReceived SIGTERM, stopping after the current attempt...");
            }
        }

        token.cancel();
    }

    #[cfg(not(unix))]
    {
        use tokio::signal::ctrl_c;

        if let Err(e) = ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            return;
        }
        eprintln!("\nReceived Ctrl+C, stopping after the current attempt...");
        token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_new() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());

        // Idempotent
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        assert!(!token2.is_cancelled());
        token1.cancel();
        assert!(token2.is_cancelled());
    }
}
