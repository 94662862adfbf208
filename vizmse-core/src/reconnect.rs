//! Debounced reconnect scheduling.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct ReconnectState {
    /// Pending or running reconnect loop. At most one.
    timer: Option<JoinHandle<()>>,
    last_attempt: Option<Instant>,
    /// Set when a schedule request arrives while the loop runs.
    requested: bool,
}

/// Schedules reconnect attempts for one session.
///
/// Repeated [`schedule`](Self::schedule) calls while a timer is pending are
/// folded into it: a request that arrives while an attempt is in flight
/// makes the loop run one more attempt instead of exiting. The first attempt waits out whatever is left of `delay` since
/// the previous attempt; failed attempts are retried every `delay`.
#[derive(Debug)]
pub struct Reconnector {
    delay: Duration,
    state: Arc<parking_lot::Mutex<ReconnectState>>,
}

impl Reconnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(parking_lot::Mutex::new(ReconnectState::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Records a connection attempt made outside the scheduler.
    pub fn record_attempt(&self) {
        self.state.lock().last_attempt = Some(Instant::now());
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.state.lock().last_attempt
    }

    /// Returns whether a reconnect timer is pending or running.
    pub fn is_pending(&self) -> bool {
        self.state
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Starts a reconnect loop unless one is already pending.
    ///
    /// `attempt` returns whether the connection is up. Returns whether a new
    /// loop was started.
    pub fn schedule<F, Fut>(&self, attempt: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.timer.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("reconnect already scheduled");
            state.requested = true;
            return false;
        }
        state.requested = false;

        let delay = self.delay;
        let shared = self.state.clone();
        let first_wait = state
            .last_attempt
            .map(|at| delay.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO);
        tracing::debug!("reconnecting in {}ms", first_wait.as_millis());

        let timer = tokio::spawn(async move {
            let mut wait = first_wait;
            loop {
                tokio::time::sleep(wait).await;
                {
                    let mut state = shared.lock();
                    state.last_attempt = Some(Instant::now());
                    state.requested = false;
                }
                if attempt().await {
                    let mut state = shared.lock();
                    if !state.requested {
                        state.timer = None;
                        break;
                    }
                    tracing::debug!("connection lost during reconnect, retrying");
                }
                wait = delay;
            }
        });
        state.timer = Some(timer);
        true
    }

    /// Stops any pending reconnect loop.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.requested = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.cancel();
    }
}
