//! Per-request timeout policy
//!
//! Requests are built in memory and flushed in one go, so writes get a flat
//! deadline. Reads scale with whatever the request itself is willing to
//! wait for: produce/fetch embed their own timeout, admin requests carry a
//! `timeout_ms`, and the group handshake stretches to the rebalance
//! timeout.

use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::KafkaRequest;

const SASL_READ_TIMEOUT: Duration = Duration::from_secs(30);

fn millis(ms: i32) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Computes `(read, write)` deadlines for a request.
///
/// Scoped per client: the JoinGroup/SyncGroup handoff below is state, and
/// two clients in one process must not share it.
pub(crate) struct TimeoutPolicy {
    default: Duration,
    // SyncGroup has no timeout field of its own, but the flow is always
    // join-then-sync, so the join's rebalance timeout is stashed here and
    // applied to the following sync.
    last_rebalance: Mutex<Option<Duration>>,
}

impl TimeoutPolicy {
    pub(crate) fn new(default: Duration) -> Self {
        Self {
            default,
            last_rebalance: Mutex::new(None),
        }
    }

    pub(crate) fn timeouts(&self, req: &KafkaRequest) -> (Duration, Duration) {
        let def = self.default;
        match req {
            // SASL may interact with an external system; give each read a
            // generous deadline.
            KafkaRequest::SaslHandshake(_) | KafkaRequest::SaslAuthenticate(_) => {
                (SASL_READ_TIMEOUT, def)
            }

            KafkaRequest::JoinGroup(t) => {
                let rebalance = millis(t.rebalance_timeout_ms);
                *self.last_rebalance.lock() = Some(rebalance);
                (def + rebalance, def)
            }
            KafkaRequest::SyncGroup(_) => {
                // No prior join observed means the 5s default, which can be
                // short for externally initiated rebalances.
                let read = (*self.last_rebalance.lock()).unwrap_or(def);
                (read, def)
            }

            KafkaRequest::Produce(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::Fetch(t) => (def + millis(t.max_wait_ms), def),

            // Everything below forwards the request's own TimeoutMillis.
            KafkaRequest::CreateTopics(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::DeleteTopics(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::DeleteRecords(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::CreatePartitions(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::ElectLeaders(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::AlterPartitionReassignments(t) => (def + millis(t.timeout_ms), def),
            KafkaRequest::ListPartitionReassignments(t) => (def + millis(t.timeout_ms), def),

            _ => (def, def),
        }
    }
}
