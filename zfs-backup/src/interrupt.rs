//! Operator interrupt handling.
//!
//! Ctrl+C is only meaningful as "abort" during the countdown that precedes
//! a destroy. While such a window is open an interrupt cancels it; outside
//! one, an interrupt ends the process as it would without a handler.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit code conventionally used after SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Shared handle to the currently open cancellation window, if any
#[derive(Clone, Default)]
pub struct CancellationWindow {
    open: Arc<Mutex<Option<CancellationToken>>>,
}

impl CancellationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the Ctrl+C listener for the lifetime of the process
    pub fn listen_for_interrupts(&self) -> JoinHandle<()> {
        let window = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    return;
                }
                if window.interrupt() {
                    info!("Received SIGINT (Ctrl+C), aborting pending destroy");
                } else {
                    warn!("Received SIGINT (Ctrl+C), exiting");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        })
    }

    /// Cancel the open window. Returns `false` when none is open.
    pub fn interrupt(&self) -> bool {
        let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        match open.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Count down `delay`, printing a dot per second. Returns `true` when the
    /// delay elapsed and `false` when it was interrupted.
    pub async fn wait(&self, delay: Duration) -> bool {
        let token = CancellationToken::new();
        self.set(Some(token.clone()));

        let mut remaining = delay;
        let completed = loop {
            if token.is_cancelled() {
                break false;
            }
            if remaining.is_zero() {
                break true;
            }
            let step = remaining.min(Duration::from_secs(1));
            tokio::select! {
                _ = tokio::time::sleep(step) => {
                    remaining -= step;
                    print!(".");
                    let _ = std::io::stdout().flush();
                }
                _ = token.cancelled() => {}
            }
        };

        self.set(None);
        if !delay.is_zero() {
            println!();
        }
        completed
    }

    fn set(&self, token: Option<CancellationToken>) {
        *self.open.lock().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_delay_completes() {
        let window = CancellationWindow::new();
        assert!(window.wait(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_interrupt_without_window() {
        let window = CancellationWindow::new();
        assert!(!window.interrupt());
    }

    #[tokio::test]
    async fn test_interrupt_cancels_open_window() {
        let window = CancellationWindow::new();
        let waiter = window.clone();
        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(30)).await });

        // Keep trying until the waiter has opened its window
        let mut interrupted = false;
        for _ in 0..200 {
            if window.interrupt() {
                interrupted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(interrupted);
        assert!(!handle.await.unwrap());
        assert!(!window.interrupt());
    }
}
