//! Cooperative stop flags. One pair per call, recording or the whole node; loops check the flag
//! at every iteration and race blocking socket/device calls against it.

use std::future::Future;

use tokio::sync::watch;

/// Owner side. Dropping it counts as a stop.
#[derive(Debug)]
pub struct StopHandle(watch::Sender<bool>);

/// Observer side, cheap to clone into each task.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(tx), StopSignal(rx))
}

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal(self.0.subscribe())
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once stopped. Cancel-safe.
    pub async fn stopped(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run `fut` unless the flag flips first. None means stopped; `fut` is dropped mid-flight.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.stopped() => None,
            out = fut => Some(out),
        }
    }
}
