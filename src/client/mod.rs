//! Client construction, lifecycle and direct-broker handles
//!
//! The [`Client`] is a cheap-to-clone handle over shared state: the broker
//! registry, controller id, coordinator cache, topics snapshot and the
//! background metadata loop. Construction parses the seed list and spawns
//! the loop; [`Client::close`] tears everything down in an order that
//! cannot lose wakeups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{KafkaRequest, KafkaResponse};

pub(crate) mod coordinator;
pub(crate) mod metadata;
pub(crate) mod pipeline;
pub(crate) mod registry;
pub(crate) mod retry;
pub(crate) mod router;
pub(crate) mod timeout;

use coordinator::CoordinatorCache;
use metadata::TopicsSnapshot;
use pipeline::ConsumerState;
use registry::{parse_seed_addr, unknown_seed_id, BrokerRegistry, UNKNOWN_CONTROLLER_ID};
use timeout::TimeoutPolicy;

pub(crate) struct ClientInner {
    pub(crate) cfg: ClientConfig,
    /// Root cancellation: cancelled exactly once, by close.
    pub(crate) shutdown: CancellationToken,
    pub(crate) registry: BrokerRegistry,
    pub(crate) controller_id: AtomicI32,
    pub(crate) coordinators: CoordinatorCache,
    pub(crate) topics: TopicsSnapshot,
    pub(crate) timeouts: TimeoutPolicy,
    pub(crate) update_metadata_tx: mpsc::Sender<()>,
    pub(crate) update_metadata_now_tx: mpsc::Sender<()>,
    pub(crate) meta_generation: watch::Sender<u64>,
    metadone: Mutex<Option<oneshot::Receiver<()>>>,
    consumer: Mutex<ConsumerState>,
}

/// A client for issuing typed requests to a Kafka cluster.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client from configuration, spawning the metadata refresh
    /// loop onto the current Tokio runtime. Fails only on invalid
    /// configuration.
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;

        // Codecs initialize eagerly so a bad compression list fails here,
        // not on the first produce.
        cfg.transport
            .init_compression(&cfg.compression)
            .map_err(|err| ClientError::config("compression", err.to_string()))?;

        let mut seed_addrs = Vec::with_capacity(cfg.seed_brokers.len());
        for seed in &cfg.seed_brokers {
            seed_addrs.push(parse_seed_addr(seed)?);
        }

        let registry = BrokerRegistry::new();
        for (index, addr) in seed_addrs.into_iter().enumerate() {
            registry.add_seed(unknown_seed_id(index), addr, cfg.transport.as_ref());
        }

        let (update_metadata_tx, update_rx) = mpsc::channel(1);
        let (update_metadata_now_tx, update_now_rx) = mpsc::channel(1);
        let (meta_generation, _) = watch::channel(0u64);
        let (done_tx, done_rx) = oneshot::channel();

        let shutdown = CancellationToken::new();
        let refresh_interval = cfg.metadata_refresh_interval;
        let timeouts = TimeoutPolicy::new(cfg.conn_timeout_overhead);

        let inner = Arc::new(ClientInner {
            cfg,
            shutdown: shutdown.clone(),
            registry,
            controller_id: AtomicI32::new(UNKNOWN_CONTROLLER_ID),
            coordinators: CoordinatorCache::default(),
            topics: TopicsSnapshot::new(),
            timeouts,
            update_metadata_tx,
            update_metadata_now_tx,
            meta_generation,
            metadone: Mutex::new(Some(done_rx)),
            consumer: Mutex::new(ConsumerState::default()),
        });

        tokio::spawn(metadata::metadata_refresh_loop(
            Arc::downgrade(&inner),
            shutdown,
            update_rx,
            update_now_rx,
            refresh_interval,
            done_tx,
        ));

        info!(seeds = inner.cfg.seed_brokers.len(), "client started");
        Ok(Self { inner })
    }

    /// Replace the consumer's partition assignment. An empty assignment
    /// drains all source consumers. A no-op once the client is closed.
    pub fn assign_partitions(&self, assignment: HashMap<String, Vec<i32>>) {
        let mut consumer = self.inner.consumer.lock();
        if consumer.dead {
            return;
        }
        consumer.assign(assignment);
    }

    /// Shut the client down.
    ///
    /// Strictly ordered to avoid lost wakeups: the consumer dies first (no
    /// new assigns), then the root context cancels, then every broker is
    /// stopped and its queues woken under the registry write lock, then the
    /// metadata loop is joined, and finally all still-buffered records fail
    /// with [`ClientError::BrokerDead`]. Safe to call any number of times.
    pub async fn close(&self) {
        {
            let mut consumer = self.inner.consumer.lock();
            if consumer.dead {
                // already closed
                return;
            }
            consumer.dead = true;
        }
        self.inner.consumer.lock().assign(HashMap::new());

        self.inner.shutdown.cancel();

        // stop_all latches the registry so a racing metadata response
        // cannot resurrect a broker after this point
        self.inner.registry.stop_all();

        // Wait for the metadata loop so no more erroring topic partitions
        // can be created underneath the final failure sweep.
        let done = self.inner.metadone.lock().take();
        if let Some(done) = done {
            let _ = done.await;
        }

        let mut failed = 0usize;
        for partitions in self.inner.topics.load().values() {
            for partition in partitions.partitions.values() {
                partition.records.fail_all(&ClientError::BrokerDead);
                failed += 1;
            }
        }
        debug!(partitions = failed, "client closed");
    }

    /// A handle for directly issuing requests to a specific broker.
    ///
    /// There is no guarantee the broker exists; requests through the handle
    /// fail with [`ClientError::UnknownBroker`] if it does not.
    pub fn broker(&self, id: i32) -> BrokerHandle {
        BrokerHandle {
            id,
            client: self.clone(),
        }
    }

    /// Handles for all brokers discovered from metadata responses so far.
    ///
    /// Does not itself fetch metadata, and does not include seed brokers
    /// (though a seed that also appeared in metadata shows up under its
    /// real id).
    pub fn discovered_brokers(&self) -> Vec<BrokerHandle> {
        self.inner
            .registry
            .non_seed_brokers()
            .into_iter()
            .map(|broker| BrokerHandle {
                id: broker.id,
                client: self.clone(),
            })
            .collect()
    }

    /// Handles for the configured seed brokers, in original seed order.
    pub fn seed_brokers(&self) -> Vec<BrokerHandle> {
        let mut handles = Vec::new();
        for index in 0.. {
            let id = unknown_seed_id(index);
            if !self.inner.registry.contains(id) {
                break;
            }
            handles.push(BrokerHandle {
                id,
                client: self.clone(),
            });
        }
        handles
    }
}

/// A caller-obtained handle pairing a broker id with the client.
#[derive(Clone)]
pub struct BrokerHandle {
    id: i32,
    client: Client,
}

impl BrokerHandle {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Issue a request directly to this broker, with no routing and no
    /// retries. On a registry miss the client reloads broker metadata once
    /// and tries again; a second miss is [`ClientError::UnknownBroker`].
    pub async fn request(
        &self,
        ctx: &CancellationToken,
        req: KafkaRequest,
    ) -> Result<KafkaResponse> {
        if self.client.inner.shutdown.is_cancelled() {
            return Err(ClientError::ClientClosed);
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ClientError::Cancelled),
            _ = self.client.inner.shutdown.cancelled() => Err(ClientError::ClientClosed),
            result = self.request_inner(ctx, &req) => result,
        }
    }

    async fn request_inner(&self, ctx: &CancellationToken, req: &KafkaRequest) -> Result<KafkaResponse> {
        let client = &self.client;
        let broker = match client
            .inner
            .registry
            .broker_or_err(self.id, ClientError::UnknownBroker(self.id))
        {
            Ok(broker) => broker,
            Err(_) => {
                client.fetch_broker_metadata(ctx).await?;
                client
                    .inner
                    .registry
                    .broker_or_err(self.id, ClientError::UnknownBroker(self.id))?
            }
        };
        broker.wait_resp(&client.inner.timeouts, req).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.inner.shutdown.is_cancelled())
            .field(
                "controller_id",
                &self.inner.controller_id.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle").field("id", &self.id).finish()
    }
}
