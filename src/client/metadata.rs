//! Metadata service
//!
//! Issues metadata requests, reconciles the broker registry and controller
//! id, and publishes the topics snapshot. Reads of the snapshot are
//! lock-free (atomic pointer load); writers serialize on a mutex and
//! clone-and-swap. The produce and fetch hot paths depend on reads never
//! taking a lock, so that split is load-bearing, not a style choice.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
use kafka_protocol::messages::{MetadataRequest, MetadataResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, KafkaErrorCode, Result};
use crate::protocol::{KafkaRequest, KafkaResponse};

use super::pipeline::RecordBuffer;
use super::retry::{wait_tries, RetryState};
use super::{Client, ClientInner};

/// How long each pass of a metadata wait blocks before re-checking.
pub(crate) const WAITMETA_SLICE: Duration = Duration::from_secs(5);

/// One partition as the router sees it.
#[derive(Debug)]
pub(crate) struct PartitionMeta {
    pub(crate) leader: i32,
    pub(crate) load_err: Option<KafkaErrorCode>,
    /// Records parked by the producer pipeline, failed at client close.
    pub(crate) records: Arc<RecordBuffer>,
}

/// The partitions of one tracked topic.
#[derive(Debug, Default)]
pub(crate) struct TopicPartitions {
    pub(crate) load_err: Option<KafkaErrorCode>,
    pub(crate) partitions: HashMap<i32, PartitionMeta>,
}

pub(crate) type TopicsMap = HashMap<String, Arc<TopicPartitions>>;

/// Atomically published view of tracked topics.
pub(crate) struct TopicsSnapshot {
    current: ArcSwap<TopicsMap>,
    // serializes writers only; readers go straight through the ArcSwap
    write_lock: Mutex<()>,
}

impl TopicsSnapshot {
    pub(crate) fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TopicsMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// The current immutable snapshot.
    pub(crate) fn load(&self) -> Arc<TopicsMap> {
        self.current.load_full()
    }

    /// Make sure every name has an entry, inserting empty ones as needed.
    pub(crate) fn ensure_topics(&self, names: &[String]) {
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();
        if names.iter().all(|name| current.contains_key(name)) {
            return;
        }
        let mut next: TopicsMap = (*current).clone();
        for name in names {
            next.entry(name.clone()).or_default();
        }
        self.current.store(Arc::new(next));
    }

    /// Fold a metadata response into the snapshot.
    ///
    /// Only topics already tracked are updated; a caller-issued metadata
    /// request for unrelated topics must not grow the tracked set. Record
    /// buffers survive the rebuild so pending produce acks are not lost.
    pub(crate) fn apply_metadata(&self, meta: &MetadataResponse) {
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();
        let mut next: TopicsMap = (*current).clone();
        let mut changed = false;

        for topic in &meta.topics {
            let Some(name) = topic.name.as_ref() else {
                continue;
            };
            let name = name.as_str();
            let Some(existing) = next.get(name) else {
                continue;
            };

            let load_err = nonzero_code(topic.error_code);
            let mut partitions = HashMap::with_capacity(topic.partitions.len());
            for partition in &topic.partitions {
                let index = partition.partition_index;
                let records = existing
                    .partitions
                    .get(&index)
                    .map(|p| p.records.clone())
                    .unwrap_or_default();
                partitions.insert(
                    index,
                    PartitionMeta {
                        leader: partition.leader_id.0,
                        load_err: nonzero_code(partition.error_code),
                        records,
                    },
                );
            }

            next.insert(
                name.to_string(),
                Arc::new(TopicPartitions {
                    load_err,
                    partitions,
                }),
            );
            changed = true;
        }

        if changed {
            self.current.store(Arc::new(next));
        }
    }
}

impl Default for TopicsSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

fn nonzero_code(code: i16) -> Option<KafkaErrorCode> {
    if code == 0 {
        None
    } else {
        Some(KafkaErrorCode::from_code(code))
    }
}

impl Client {
    /// Issue a metadata request and fold the response into the client.
    ///
    /// `all == true` requests every topic (wire-level nil list); otherwise
    /// exactly `topics` is requested, where an empty slice means "no
    /// topics", not "all topics". The distinction is carried end-to-end via
    /// `Option` on the wire type.
    pub(crate) async fn fetch_metadata(
        &self,
        ctx: &CancellationToken,
        all: bool,
        topics: &[String],
    ) -> Result<MetadataResponse> {
        let cfg = &self.inner.cfg;
        let mut retry = RetryState::new(cfg, 3);
        loop {
            retry.attempt();

            let broker = self
                .inner
                .registry
                .any_broker()
                .ok_or(ClientError::ClientClosed)?;

            let mut req = MetadataRequest::default()
                .with_allow_auto_topic_creation(cfg.allow_auto_topic_creation);
            req.topics = if all {
                None
            } else {
                Some(
                    topics
                        .iter()
                        .map(|topic| {
                            MetadataRequestTopic::default().with_name(Some(TopicName::from(
                                StrBytes::from_string(topic.clone()),
                            )))
                        })
                        .collect(),
                )
            };

            match broker
                .wait_resp(&self.inner.timeouts, &KafkaRequest::Metadata(req))
                .await
            {
                Ok(KafkaResponse::Metadata(meta)) => {
                    if meta.controller_id.0 >= 0 {
                        self.inner
                            .controller_id
                            .store(meta.controller_id.0, Ordering::Release);
                    }
                    self.inner.registry.update_brokers(&meta.brokers, cfg);
                    self.inner.topics.apply_metadata(&meta);
                    // Wakes waitmeta callers and the unknown-topic buffer.
                    self.inner.meta_generation.send_modify(|gen| *gen += 1);
                    return Ok(meta);
                }
                Ok(_) => {
                    return Err(ClientError::Transport(
                        crate::error::TransportError::Io("mismatched response type".into()),
                    ))
                }
                Err(err) => {
                    if retry.may_retry(cfg, &err)
                        && wait_tries(cfg, ctx, &self.inner.shutdown, retry.tries()).await
                    {
                        debug!(error = %err, tries = retry.tries(), "retrying metadata fetch");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Metadata fetch solely for broker/controller information.
    pub(crate) async fn fetch_broker_metadata(&self, ctx: &CancellationToken) -> Result<()> {
        self.fetch_metadata(ctx, false, &[]).await.map(|_| ())
    }

    /// The controller broker, forcing an initial broker load if necessary.
    pub(crate) async fn controller(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Arc<super::registry::Broker>> {
        let mut id = self.inner.controller_id.load(Ordering::Acquire);
        if id < 0 {
            self.fetch_broker_metadata(ctx).await?;
            id = self.inner.controller_id.load(Ordering::Acquire);
            if id < 0 {
                return Err(ClientError::UnknownController(id));
            }
        }
        self.inner
            .registry
            .broker_or_err(id, ClientError::UnknownController(id))
    }

    /// Ask the refresh loop for an immediate update and wait up to
    /// `max_wait` for one to land.
    pub(crate) async fn waitmeta(&self, ctx: &CancellationToken, max_wait: Duration) {
        let mut generation = self.inner.meta_generation.subscribe();
        generation.borrow_and_update();
        let _ = self.inner.update_metadata_now_tx.try_send(());
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = self.inner.shutdown.cancelled() => {}
            _ = tokio::time::sleep(max_wait) => {}
            _ = generation.changed() => {}
        }
    }

    /// Nudge the refresh loop without blocking; coalesces with any trigger
    /// already queued.
    #[allow(dead_code)]
    pub(crate) fn trigger_metadata_update(&self) {
        let _ = self.inner.update_metadata_tx.try_send(());
    }
}

/// The background refresh loop.
///
/// Holds only a weak handle so a client dropped without close does not keep
/// itself alive through its own task. Exits on shutdown or when the client
/// is gone, then signals the done channel `close` blocks on.
pub(crate) async fn metadata_refresh_loop(
    inner: Weak<ClientInner>,
    shutdown: CancellationToken,
    mut update_rx: mpsc::Receiver<()>,
    mut update_now_rx: mpsc::Receiver<()>,
    refresh_interval: Duration,
    done_tx: oneshot::Sender<()>,
) {
    // interval_at: the first refresh comes from the first caller that needs
    // metadata, not from loop startup.
    let mut tick = tokio::time::interval_at(
        tokio::time::Instant::now() + refresh_interval,
        refresh_interval,
    );
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = update_now_rx.recv() => {
                if received.is_none() {
                    break;
                }
            }
            received = update_rx.recv() => {
                if received.is_none() {
                    break;
                }
            }
            _ = tick.tick() => {}
        }

        let Some(strong) = inner.upgrade() else {
            break;
        };
        let client = Client { inner: strong };
        let tracked: Vec<String> = client.inner.topics.load().keys().cloned().collect();
        if let Err(err) = client.fetch_metadata(&shutdown, false, &tracked).await {
            if client.inner.shutdown.is_cancelled() {
                break;
            }
            warn!(error = %err, "metadata refresh failed");
        }
    }

    let _ = done_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_protocol::messages::metadata_response::{
        MetadataResponsePartition, MetadataResponseTopic,
    };

    fn topic_meta(name: &str, error_code: i16, partitions: Vec<(i32, i32, i16)>) -> MetadataResponseTopic {
        MetadataResponseTopic::default()
            .with_name(Some(TopicName::from(StrBytes::from_string(name.to_string()))))
            .with_error_code(error_code)
            .with_partitions(
                partitions
                    .into_iter()
                    .map(|(index, leader, code)| {
                        MetadataResponsePartition::default()
                            .with_partition_index(index)
                            .with_leader_id(leader.into())
                            .with_error_code(code)
                    })
                    .collect(),
            )
    }

    #[test]
    fn test_snapshot_tracks_only_known_topics() {
        let snapshot = TopicsSnapshot::new();
        snapshot.ensure_topics(&["events".to_string()]);

        let meta = MetadataResponse::default().with_topics(vec![
            topic_meta("events", 0, vec![(0, 1, 0), (1, 2, 0)]),
            topic_meta("other", 0, vec![(0, 3, 0)]),
        ]);
        snapshot.apply_metadata(&meta);

        let topics = snapshot.load();
        assert_eq!(topics.len(), 1);
        let events = &topics["events"];
        assert_eq!(events.partitions.len(), 2);
        assert_eq!(events.partitions[&0].leader, 1);
        assert_eq!(events.partitions[&1].leader, 2);
    }

    #[test]
    fn test_snapshot_records_partition_errors() {
        let snapshot = TopicsSnapshot::new();
        snapshot.ensure_topics(&["events".to_string()]);

        let meta = MetadataResponse::default()
            .with_topics(vec![topic_meta("events", 0, vec![(0, -1, 5)])]);
        snapshot.apply_metadata(&meta);

        let topics = snapshot.load();
        assert_eq!(
            topics["events"].partitions[&0].load_err,
            Some(KafkaErrorCode::LeaderNotAvailable)
        );
    }

    #[test]
    fn test_snapshot_preserves_record_buffers_across_updates() {
        let snapshot = TopicsSnapshot::new();
        snapshot.ensure_topics(&["events".to_string()]);
        snapshot.apply_metadata(
            &MetadataResponse::default().with_topics(vec![topic_meta("events", 0, vec![(0, 1, 0)])]),
        );

        let before = snapshot.load()["events"].partitions[&0].records.clone();
        let _pending = before.buffer();

        // leader moves; the buffer must ride along
        snapshot.apply_metadata(
            &MetadataResponse::default().with_topics(vec![topic_meta("events", 0, vec![(0, 2, 0)])]),
        );

        let after = snapshot.load();
        assert_eq!(after["events"].partitions[&0].leader, 2);
        assert!(Arc::ptr_eq(&before, &after["events"].partitions[&0].records));
    }

    #[test]
    fn test_readers_see_consistent_generations() {
        let snapshot = TopicsSnapshot::new();
        snapshot.ensure_topics(&["a".to_string(), "b".to_string()]);

        let view = snapshot.load();
        snapshot.apply_metadata(
            &MetadataResponse::default().with_topics(vec![topic_meta("a", 0, vec![(0, 1, 0)])]),
        );

        // the old view is untouched; the new view has the update
        assert!(view["a"].partitions.is_empty());
        assert_eq!(snapshot.load()["a"].partitions[&0].leader, 1);
    }
}
