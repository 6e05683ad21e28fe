//! Client configuration
//!
//! Plain builder-style configuration. File/env parsing and CLI flags are the
//! embedding application's concern; everything here is programmatic.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{ClientError, Result};
use crate::transport::{CompressionCodec, TransportFactory};

/// Computes the backoff before retry attempt `n` (1-based).
pub type RetryBackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Computes the total retry window for a request key. Zero means unbounded.
pub type RetryTimeoutFn = Arc<dyn Fn(i16) -> Duration + Send + Sync>;

const DEFAULT_CONN_TIMEOUT_OVERHEAD: Duration = Duration::from_secs(5);
const DEFAULT_METADATA_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RETRIES: u32 = 20;
const DEFAULT_CONN_DEAD_RETRIES: u32 = 20;

// JoinGroup, Heartbeat and SyncGroup ride the rebalance state machine;
// bounding their retry window would fight the group coordinator.
const UNBOUNDED_RETRY_KEYS: [i16; 3] = [11, 12, 14];

/// Configuration for [`crate::Client`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Bootstrap brokers, `host` or `host:port`. Default port 9092;
    /// `localhost` is normalized to `127.0.0.1`.
    pub seed_brokers: Vec<String>,

    /// Propagated into every metadata request the client issues.
    pub allow_auto_topic_creation: bool,

    /// Compression codecs in preference order, initialized eagerly at
    /// construction through the transport factory.
    pub compression: Vec<CompressionCodec>,

    /// Baseline added to per-request write deadlines.
    pub conn_timeout_overhead: Duration,

    /// Attempt budget for retriable errors.
    pub retries: u32,

    /// Attempt budget for the connection-dead sentinel specifically.
    pub broker_conn_dead_retries: u32,

    /// Backoff between attempts.
    pub retry_backoff: RetryBackoffFn,

    /// Per-request-key total retry window; zero disables the window.
    pub retry_timeout: RetryTimeoutFn,

    /// Cadence of the background metadata refresh.
    pub metadata_refresh_interval: Duration,

    /// Seam to the per-broker connection manager.
    pub transport: Arc<dyn TransportFactory>,
}

impl ClientConfig {
    /// A configuration with defaults for everything but the seeds and the
    /// transport.
    pub fn new(transport: Arc<dyn TransportFactory>) -> Self {
        Self {
            seed_brokers: Vec::new(),
            allow_auto_topic_creation: false,
            compression: vec![CompressionCodec::None],
            conn_timeout_overhead: DEFAULT_CONN_TIMEOUT_OVERHEAD,
            retries: DEFAULT_RETRIES,
            broker_conn_dead_retries: DEFAULT_CONN_DEAD_RETRIES,
            retry_backoff: Arc::new(default_retry_backoff),
            retry_timeout: Arc::new(default_retry_timeout),
            metadata_refresh_interval: DEFAULT_METADATA_REFRESH_INTERVAL,
            transport,
        }
    }

    pub fn with_seed_brokers<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_brokers = seeds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allow_auto_topic_creation(mut self, allow: bool) -> Self {
        self.allow_auto_topic_creation = allow;
        self
    }

    pub fn with_compression(mut self, codecs: Vec<CompressionCodec>) -> Self {
        self.compression = codecs;
        self
    }

    pub fn with_conn_timeout_overhead(mut self, overhead: Duration) -> Self {
        self.conn_timeout_overhead = overhead;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_broker_conn_dead_retries(mut self, retries: u32) -> Self {
        self.broker_conn_dead_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: RetryBackoffFn) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_retry_timeout(mut self, timeout: RetryTimeoutFn) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_metadata_refresh_interval(mut self, interval: Duration) -> Self {
        self.metadata_refresh_interval = interval;
        self
    }

    /// Validate the configuration. Called by `Client::new`.
    pub fn validate(&self) -> Result<()> {
        if self.seed_brokers.is_empty() {
            return Err(ClientError::config(
                "seed_brokers",
                "at least one seed broker is required",
            ));
        }
        if self.compression.is_empty() {
            return Err(ClientError::config(
                "compression",
                "at least one codec is required (use CompressionCodec::None)",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("seed_brokers", &self.seed_brokers)
            .field("allow_auto_topic_creation", &self.allow_auto_topic_creation)
            .field("compression", &self.compression)
            .field("conn_timeout_overhead", &self.conn_timeout_overhead)
            .field("retries", &self.retries)
            .field("broker_conn_dead_retries", &self.broker_conn_dead_retries)
            .field("metadata_refresh_interval", &self.metadata_refresh_interval)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff, 100ms doubling to a 1s cap, with jitter so a broker
/// restart does not synchronize every waiting request.
fn default_retry_backoff(tries: u32) -> Duration {
    let base = Duration::from_millis(100)
        .saturating_mul(1u32 << tries.min(4))
        .min(Duration::from_secs(1));
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter)
}

fn default_retry_timeout(key: i16) -> Duration {
    if UNBOUNDED_RETRY_KEYS.contains(&key) {
        Duration::ZERO
    } else {
        Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullFactory;

    impl TransportFactory for NullFactory {
        fn connect(
            &self,
            _addr: &str,
            _broker_id: i32,
            _buf_pool: Arc<crate::transport::BufPool>,
        ) -> Arc<dyn crate::transport::BrokerTransport> {
            unreachable!("validation tests never dial")
        }
    }

    #[test]
    fn test_validate_requires_seeds() {
        let config = ClientConfig::new(Arc::new(NullFactory));
        assert!(config.validate().is_err());

        let config = config.with_seed_brokers(["localhost:9092"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_codec() {
        let config = ClientConfig::new(Arc::new(NullFactory))
            .with_seed_brokers(["kafka-1"])
            .with_compression(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_backoff_is_capped() {
        for tries in 1..10 {
            let backoff = default_retry_backoff(tries);
            assert!(backoff >= Duration::from_millis(100));
            assert!(backoff <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_default_retry_timeout_exempts_group_requests() {
        assert_eq!(default_retry_timeout(11), Duration::ZERO); // JoinGroup
        assert_eq!(default_retry_timeout(14), Duration::ZERO); // SyncGroup
        assert_eq!(default_retry_timeout(3), Duration::from_secs(30));
    }
}
