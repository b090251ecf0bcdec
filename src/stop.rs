//! Graceful interruption.
//!
//! The first Ctrl-C asks the pipeline to stop taking new pages, so that we
//! can still write out everything we've finished. A second Ctrl-C exits
//! immediately.

use std::future;

use tokio::sync::watch;

use crate::prelude::*;

/// Exit status used when we're interrupted twice.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Used to request a stop.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Ask everyone watching the matching [`StopSignal`] to stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Used to find out whether a stop has been requested. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Create a linked [`StopHandle`] and [`StopSignal`].
    pub fn new() -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (StopHandle { tx }, StopSignal { rx })
    }

    /// A signal that never fires.
    #[cfg(test)]
    pub fn never() -> Self {
        Self::new().1
    }

    /// Listen for Ctrl-C in the background, and return a signal which fires
    /// the first time we see it.
    pub fn on_ctrl_c() -> Self {
        let (handle, signal) = Self::new();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {}", err);
                // Keep `handle` alive, so that we don't look like a stop.
                future::pending::<()>().await;
            }
            warn!("Interrupted, finishing up (press Ctrl-C again to exit now)");
            handle.stop();
            if tokio::signal::ctrl_c().await.is_ok() {
                error!("Interrupted twice, exiting without writing results");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        });
        signal
    }

    /// Has a stop been requested?
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until a stop is requested. If the [`StopHandle`] is dropped
    /// without requesting a stop, this never completes.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            future::pending::<()>().await;
        }
    }
}
