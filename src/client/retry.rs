//! Retry policy
//!
//! One retry loop shape serves every request path; the paths differ only in
//! how they pick a broker before each attempt. Connection-dead failures
//! retry on their own budget because a dead connection says nothing about
//! whether the request itself is sound.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Tracks attempts and the per-key retry window for one logical request.
pub(crate) struct RetryState {
    tries: u32,
    started: Instant,
    retry_timeout: Duration,
}

impl RetryState {
    pub(crate) fn new(cfg: &ClientConfig, key: i16) -> Self {
        Self {
            tries: 0,
            started: Instant::now(),
            retry_timeout: (cfg.retry_timeout)(key),
        }
    }

    /// Record the start of an attempt and return its 1-based number.
    pub(crate) fn attempt(&mut self) -> u32 {
        self.tries += 1;
        self.tries
    }

    pub(crate) fn tries(&self) -> u32 {
        self.tries
    }

    /// Whether the policy permits another attempt after `err`.
    ///
    /// The window check comes first: a zero window means unbounded.
    pub(crate) fn may_retry(&self, cfg: &ClientConfig, err: &ClientError) -> bool {
        if !self.retry_timeout.is_zero() && self.started.elapsed() > self.retry_timeout {
            return false;
        }
        (err.is_conn_dead() && self.tries < cfg.broker_conn_dead_retries)
            || (err.is_retriable() && self.tries < cfg.retries)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        self.started -= by;
    }
}

/// Sleep out the backoff for attempt `tries`.
///
/// Returns false if the caller's context or the client itself was cancelled
/// first, in which case the request gives up instead of retrying.
pub(crate) async fn wait_tries(
    cfg: &ClientConfig,
    ctx: &CancellationToken,
    shutdown: &CancellationToken,
    tries: u32,
) -> bool {
    let backoff = (cfg.retry_backoff)(tries);
    tokio::select! {
        _ = ctx.cancelled() => false,
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(backoff) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KafkaErrorCode, TransportError};
    use crate::testing::MockCluster;
    use std::sync::Arc;

    fn cfg() -> ClientConfig {
        ClientConfig::new(MockCluster::new().factory())
            .with_seed_brokers(["127.0.0.1"])
            .with_retries(3)
            .with_broker_conn_dead_retries(5)
            .with_retry_timeout(Arc::new(|_| Duration::from_secs(60)))
    }

    fn retriable() -> ClientError {
        ClientError::Kafka(KafkaErrorCode::NotCoordinator)
    }

    fn fatal() -> ClientError {
        ClientError::Kafka(KafkaErrorCode::InvalidRequest)
    }

    fn conn_dead() -> ClientError {
        ClientError::Transport(TransportError::ConnectionDead)
    }

    #[test]
    fn test_retriable_errors_respect_retries_budget() {
        let cfg = cfg();
        let mut state = RetryState::new(&cfg, 3);
        for _ in 0..2 {
            state.attempt();
            assert!(state.may_retry(&cfg, &retriable()));
        }
        state.attempt();
        assert!(!state.may_retry(&cfg, &retriable()));
    }

    #[test]
    fn test_conn_dead_uses_its_own_budget() {
        let cfg = cfg();
        let mut state = RetryState::new(&cfg, 3);
        // retries budget (3) exhausted, conn-dead budget (5) not yet
        for _ in 0..4 {
            state.attempt();
        }
        assert!(!state.may_retry(&cfg, &retriable()));
        assert!(state.may_retry(&cfg, &conn_dead()));
        state.attempt();
        assert!(!state.may_retry(&cfg, &conn_dead()));
    }

    #[test]
    fn test_fatal_errors_never_retry() {
        let cfg = cfg();
        let mut state = RetryState::new(&cfg, 3);
        state.attempt();
        assert!(!state.may_retry(&cfg, &fatal()));
        assert!(!state.may_retry(&cfg, &ClientError::ClientClosed));
        assert!(!state.may_retry(&cfg, &ClientError::Cancelled));
    }

    #[test]
    fn test_elapsed_window_fails_even_retriable_errors() {
        let cfg = cfg();
        let mut state = RetryState::new(&cfg, 3);
        state.attempt();
        assert!(state.may_retry(&cfg, &retriable()));
        state.backdate(Duration::from_secs(120));
        assert!(!state.may_retry(&cfg, &retriable()));
    }

    #[test]
    fn test_zero_window_is_unbounded() {
        let cfg = cfg().with_retry_timeout(Arc::new(|_| Duration::ZERO));
        let mut state = RetryState::new(&cfg, 3);
        state.attempt();
        state.backdate(Duration::from_secs(3600));
        assert!(state.may_retry(&cfg, &retriable()));
    }

    #[tokio::test]
    async fn test_wait_tries_aborts_on_cancellation() {
        let cfg = cfg().with_retry_backoff(Arc::new(|_| Duration::from_secs(300)));
        let ctx = CancellationToken::new();
        let shutdown = CancellationToken::new();

        ctx.cancel();
        assert!(!wait_tries(&cfg, &ctx, &shutdown, 1).await);

        let ctx = CancellationToken::new();
        shutdown.cancel();
        assert!(!wait_tries(&cfg, &ctx, &shutdown, 1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_tries_elapses_backoff() {
        let cfg = cfg().with_retry_backoff(Arc::new(|_| Duration::from_millis(50)));
        let ctx = CancellationToken::new();
        let shutdown = CancellationToken::new();
        assert!(wait_tries(&cfg, &ctx, &shutdown, 1).await);
    }
}
