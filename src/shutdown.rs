//! Stop signalling for background loops.
//!
//! Loops check the token between discrete steps and sleep through
//! [`StopToken::sleep`], which wakes early when a stop is requested. Dropping
//! every [`StopHandle`] counts as a stop.

use std::time::Duration;
use tokio::sync::watch;

pub struct StopHandle {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

pub fn stop_pair() -> (StopHandle, StopToken) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopToken { rx })
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopToken {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration`; returns `false` if woken by a stop instead.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        }
    }
}
