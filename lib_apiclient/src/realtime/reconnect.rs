//! Reconnect backoff shared by every real-time transport.
//!
//! `Disconnected → Connecting → Connected`; on an unexpected close the connection
//! moves to `Reconnecting` while `attempts < max_attempts`, sleeping
//! `base_delay * 2^(attempts - 1)` before each try. A successful reconnect resets
//! the counter; exhausting it leaves the connection `Disconnected` for good.

use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::configs::collection_config::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY_MS};

/// Lifecycle of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Attempt counter driven by the connection task.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Registers a failure. Returns the delay before the next attempt, or `None`
    /// once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Connection state plus the token that owns the running driver task.
///
/// Both transports share this so that `disconnect()` cancels the session and any
/// pending backoff sleep in one step.
pub(crate) struct Lifecycle {
    state: Mutex<ConnectionState>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            shutdown: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().expect("Lifecycle lock poisoned")
    }

    /// Updates the state on behalf of a driver, ignoring drivers already cancelled.
    pub(crate) fn set_state_for(&self, token: &CancellationToken, state: ConnectionState) {
        let mut current = self.state.lock().expect("Lifecycle lock poisoned");
        if !token.is_cancelled() {
            *current = state;
        }
    }

    /// Cancels any previous driver, issues a token for a new one and moves to
    /// `Connecting`. Holds the state lock throughout, so `end()` runs wholly
    /// before or wholly after it.
    pub(crate) fn begin(&self) -> CancellationToken {
        let mut state = self.state.lock().expect("Lifecycle lock poisoned");
        let token = CancellationToken::new();
        let previous = self
            .shutdown
            .lock()
            .expect("Lifecycle lock poisoned")
            .replace(token.clone());
        if let Some(old) = previous {
            old.cancel();
        }
        *state = ConnectionState::Connecting;
        token
    }

    /// Marks the connection live unless `token` was cancelled meanwhile.
    /// Runs `install` under the state lock so a concurrent `end()` cannot interleave.
    pub(crate) fn activate(&self, token: &CancellationToken, install: impl FnOnce()) -> bool {
        let mut state = self.state.lock().expect("Lifecycle lock poisoned");
        if token.is_cancelled() {
            return false;
        }
        install();
        *state = ConnectionState::Connected;
        true
    }

    /// Cancels the driver and marks the connection disconnected.
    pub(crate) fn end(&self) {
        let mut state = self.state.lock().expect("Lifecycle lock poisoned");
        if let Some(token) = self.shutdown.lock().expect("Lifecycle lock poisoned").take() {
            token.cancel();
        }
        *state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_from_one_second_and_stops_after_five() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        let delays: Vec<u64> = std::iter::from_fn(|| state.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(state.attempts(), 5);
        assert!(state.next_delay().is_none());
    }

    #[test]
    fn end_after_begin_is_final_for_that_token() {
        let lifecycle = Lifecycle::new();
        let token = lifecycle.begin();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);

        lifecycle.end();
        assert!(token.is_cancelled());
        lifecycle.set_state_for(&token, ConnectionState::Reconnecting);
        assert!(!lifecycle.activate(&token, || {}));
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn begin_and_end_from_many_threads_never_strand_connecting() {
        let lifecycle = std::sync::Arc::new(Lifecycle::new());
        for _ in 0..200 {
            let racer = std::sync::Arc::clone(&lifecycle);
            let ender = std::thread::spawn(move || racer.end());
            let token = lifecycle.begin();
            ender.join().unwrap();
            // Either `end` came first and this token is live, or it came second and cancelled it
            if token.is_cancelled() {
                assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
            } else {
                assert_eq!(lifecycle.state(), ConnectionState::Connecting);
            }
            lifecycle.end();
        }
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut state = ReconnectState::new(ReconnectPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        });
        assert_eq!(state.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(state.next_delay(), None);
        state.reset();
        assert_eq!(state.next_delay(), Some(Duration::from_millis(10)));
    }
}
