//! Delayed application exit.
//!
//! Closing the app has to answer the browser before the process goes away,
//! so the exit is scheduled on a background task instead of happening
//! inline. The task cancels the application's exit token once the delay has
//! passed; `main` treats that token as the end of the process.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Time between the close request and the process exit.
pub const SHUTDOWN_DELAY: Duration = Duration::from_secs(2);

/// Status shown to the user once the exit is scheduled.
pub const CLOSING_MESSAGE: &str = "Closing the app...";

/// Schedules (and can revoke) the final exit.
pub struct ShutdownCoordinator {
    exit: CancellationToken,
    delay: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl ShutdownCoordinator {
    pub fn new(exit: CancellationToken, delay: Duration) -> Self {
        Self {
            exit,
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Token cancelled when the application should exit.
    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// Schedule the exit and return immediately.
    ///
    /// The deadline is fixed when this is called. Scheduling again while an
    /// exit is pending keeps the original deadline. Must be called from
    /// within a tokio runtime.
    pub fn schedule(&self) -> String {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() {
            debug!("Exit already scheduled");
            return CLOSING_MESSAGE.to_string();
        }

        let revoke = CancellationToken::new();
        let deadline = tokio::time::sleep(self.delay);
        let exit = self.exit.clone();
        let delay = self.delay;

        info!("Application exit scheduled in {:?}", delay);

        tokio::spawn({
            let revoke = revoke.clone();
            async move {
                tokio::select! {
                    _ = deadline => {
                        info!("Exiting application");
                        exit.cancel();
                    }
                    _ = revoke.cancelled() => {
                        debug!("Scheduled exit revoked");
                    }
                }
            }
        });

        *pending = Some(revoke);
        CLOSING_MESSAGE.to_string()
    }

    /// Revoke a pending exit. Returns false if nothing was pending or the
    /// exit already happened.
    pub fn cancel(&self) -> bool {
        if self.exit.is_cancelled() {
            return false;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.take() {
            Some(revoke) => {
                revoke.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
