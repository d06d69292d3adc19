//! Fixed-interval background work

use crate::error::{WalletError, WalletResult};

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Timer that fires immediately and then every `interval`.
///
/// Each tick's work is spawned on its own task, so stopping the timer never
/// cancels work that is already in flight.
pub struct PeriodicTask {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Cancel any running timer, then start a new one
    pub async fn start<F, Fut>(&self, period: Duration, work: F) -> WalletResult<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(WalletError::Config(format!(
                "{} interval must be non-zero",
                self.name
            )));
        }

        let mut handle = self.handle.lock().await;
        if let Some(previous) = handle.take() {
            previous.abort();
        }

        let name = self.name;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!("{} tick", name);
                tokio::spawn(work());
            }
        }));

        debug!("{} started with interval {:?}", self.name, period);
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            debug!("{} stopped", self.name);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
