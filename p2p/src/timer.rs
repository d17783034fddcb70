//! Cancellable periodic tasks.

use {
    std::time::Duration,
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
};

/// Runs a closure every `period` after an initial delay, until cancelled.
///
/// The timer stops when either its own token or the parent token it was
/// derived from is cancelled. Cancelling twice is harmless.
pub struct PeriodicTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTimer {
    pub fn start<F>(parent: &CancellationToken, delay: Duration, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let token = parent.child_token();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => tick(),
                }
            }
        });
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
