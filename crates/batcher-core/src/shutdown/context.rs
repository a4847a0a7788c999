//! Signal-aware cancellation context.
//!
//! `ShutdownContext` owns a child `CancellationToken` and a background
//! listener. The first SIGINT or SIGTERM is logged, recorded as a
//! `SignalError` and cancels the token; after that the listener exits.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::signal::{ShutdownError, Signal, SignalError};

/// Cancellation token that also remembers which signal (if any) fired it.
///
/// Cloning produces a shared view of the same token and recorded cause.
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    token: CancellationToken,
    cause: Arc<OnceLock<SignalError>>,
}

impl ShutdownContext {
    /// Derive a context from `parent` and start listening for signals.
    ///
    /// Must be called from within a tokio runtime. The listener task stops as
    /// soon as the context is cancelled by any path. The process-wide SIGINT
    /// and SIGTERM handlers stay registered after that: tokio never
    /// unregisters them, so later signals no longer terminate the process by
    /// default.
    ///
    /// # Errors
    ///
    /// Returns an error if the SIGTERM handler cannot be registered.
    pub fn install(parent: &CancellationToken) -> std::io::Result<Self> {
        let ctx = Self {
            token: parent.child_token(),
            cause: Arc::new(OnceLock::new()),
        };

        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let listener = ctx.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            let terminate = terminate.recv();
            #[cfg(not(unix))]
            let terminate = std::future::pending::<Option<()>>();

            let signal = tokio::select! {
                _ = listener.token.cancelled() => return,
                Ok(()) = tokio::signal::ctrl_c() => Signal::Interrupt,
                Some(()) = terminate => Signal::Terminate,
            };
            listener.trigger(signal);
        });

        Ok(ctx)
    }

    /// Record `signal` as the cause and cancel.
    pub(crate) fn trigger(&self, signal: Signal) {
        info!(signal = %signal, "shutdown signal received");
        let _ = self.cause.set(SignalError { signal });
        self.token.cancel();
    }

    /// Cancel without a signal.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A token tied to this context, for handing to spawned work.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// `None` while running; otherwise the reason for cancellation.
    pub fn err(&self) -> Option<ShutdownError> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(match self.cause.get() {
            Some(signal) => ShutdownError::Signal(*signal),
            None => ShutdownError::Cancelled,
        })
    }
}
