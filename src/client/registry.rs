//! Broker registry and any-broker rotation
//!
//! Owns the `broker_id -> Broker` map and the shuffled rotation used when a
//! request does not bind to a specific broker. Seed brokers live under
//! reserved negative ids and survive every metadata update; real brokers
//! come and go as the cluster reports them.

use std::collections::HashMap;
use std::sync::Arc;

use kafka_protocol::messages::metadata_response::MetadataResponseBroker;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{KafkaRequest, KafkaResponse};
use crate::transport::{BrokerTransport, BufPool, TransportFactory};

use super::timeout::TimeoutPolicy;

/// Controller id before any metadata response reported one.
pub(crate) const UNKNOWN_CONTROLLER_ID: i32 = -1;

/// The reserved id for the `index`-th configured seed broker.
///
/// Seeds count down from -2 so they can never collide with real broker ids
/// (>= 0) or the unknown-controller sentinel (-1).
pub(crate) fn unknown_seed_id(index: usize) -> i32 {
    -2 - index as i32
}

/// Parse a configured seed into a dialable `host:port`.
pub(crate) fn parse_seed_addr(seed: &str) -> Result<String> {
    let (mut host, port) = match seed.find(':') {
        Some(colon) if colon > 0 => {
            let port: u16 = seed[colon + 1..].parse().map_err(|_| {
                ClientError::config(
                    "seed_brokers",
                    format!("unable to parse addr:port in {seed:?}"),
                )
            })?;
            (&seed[..colon], port)
        }
        Some(_) => {
            return Err(ClientError::config(
                "seed_brokers",
                format!("unable to parse addr:port in {seed:?}"),
            ))
        }
        None => (seed, 9092),
    };
    if host == "localhost" {
        host = "127.0.0.1";
    }
    Ok(format!("{host}:{port}"))
}

/// A broker the client can issue requests to.
#[derive(Debug)]
pub(crate) struct Broker {
    pub(crate) id: i32,
    pub(crate) addr: String,
    transport: Arc<dyn BrokerTransport>,
}

impl Broker {
    fn new(
        id: i32,
        addr: String,
        factory: &dyn TransportFactory,
        buf_pool: Arc<BufPool>,
    ) -> Arc<Self> {
        let transport = factory.connect(&addr, id, buf_pool);
        Arc::new(Self {
            id,
            addr,
            transport,
        })
    }

    /// Issue `req` and await the response, applying the per-kind timeouts.
    pub(crate) async fn wait_resp(
        &self,
        timeouts: &TimeoutPolicy,
        req: &KafkaRequest,
    ) -> Result<KafkaResponse> {
        let (read, write) = timeouts.timeouts(req);
        self.transport
            .wait_resp(req, read, write)
            .await
            .map_err(ClientError::from)
    }

    pub(crate) fn stop_forever(&self) {
        self.transport.stop_forever();
    }

    pub(crate) fn wake_sink(&self) {
        self.transport.wake_sink();
    }

    pub(crate) fn wake_source(&self) {
        self.transport.wake_source();
    }
}

struct BrokerMap {
    by_id: HashMap<i32, Arc<Broker>>,
    // Latched at close; update_brokers becomes a no-op so nothing is
    // resurrected after teardown.
    stopped: bool,
}

struct Rotation {
    order: Vec<Arc<Broker>>,
    idx: usize,
    rng: StdRng,
}

/// The shared broker map plus the any-broker rotation.
pub(crate) struct BrokerRegistry {
    brokers: RwLock<BrokerMap>,
    rotation: Mutex<Rotation>,
    // One pool of request-serialization buffers, shared by every transport
    // this registry creates.
    buf_pool: Arc<BufPool>,
}

impl BrokerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            brokers: RwLock::new(BrokerMap {
                by_id: HashMap::new(),
                stopped: false,
            }),
            rotation: Mutex::new(Rotation {
                order: Vec::new(),
                idx: 0,
                rng: StdRng::from_entropy(),
            }),
            buf_pool: Arc::new(BufPool::new()),
        }
    }

    fn new_broker(&self, id: i32, addr: String, factory: &dyn TransportFactory) -> Arc<Broker> {
        Broker::new(id, addr, factory, self.buf_pool.clone())
    }

    /// Register a seed broker during construction.
    pub(crate) fn add_seed(&self, id: i32, addr: String, factory: &dyn TransportFactory) {
        let broker = self.new_broker(id, addr, factory);
        self.brokers.write().by_id.insert(broker.id, broker.clone());
        self.rotation.lock().order.push(broker);
    }

    /// The next broker in the rotation.
    ///
    /// O(1) when uncontended; the vector is reshuffled each time the index
    /// wraps, which gives long-run fairness without per-call randomness.
    pub(crate) fn any_broker(&self) -> Option<Arc<Broker>> {
        let mut rotation = self.rotation.lock();
        if rotation.idx >= rotation.order.len() {
            // a metadata update shrank the rotation under us
            rotation.idx = 0;
        }
        if rotation.order.is_empty() {
            return None;
        }
        let broker = rotation.order[rotation.idx].clone();
        rotation.idx += 1;
        if rotation.idx == rotation.order.len() {
            rotation.idx = 0;
            let Rotation { order, rng, .. } = &mut *rotation;
            order.shuffle(rng);
        }
        Some(broker)
    }

    /// Look up a broker id, or fail with the caller's error.
    pub(crate) fn broker_or_err(&self, id: i32, err: ClientError) -> Result<Arc<Broker>> {
        match self.brokers.read().by_id.get(&id) {
            Some(broker) => Ok(broker.clone()),
            None => Err(err),
        }
    }

    pub(crate) fn contains(&self, id: i32) -> bool {
        self.brokers.read().by_id.contains_key(&id)
    }

    /// Run `f` against the broker map under the read lock.
    pub(crate) fn with_brokers<R>(&self, f: impl FnOnce(&HashMap<i32, Arc<Broker>>) -> R) -> R {
        f(&self.brokers.read().by_id)
    }

    /// Brokers with real (cluster-assigned) ids, for whole-cluster fan-out.
    pub(crate) fn non_seed_brokers(&self) -> Vec<Arc<Broker>> {
        let map = self.brokers.read();
        let mut brokers: Vec<_> = map
            .by_id
            .values()
            .filter(|b| b.id >= 0)
            .cloned()
            .collect();
        brokers.sort_by_key(|b| b.id);
        brokers
    }

    /// Reconcile the registry with the broker list of a metadata response.
    ///
    /// Every metadata response carries all live brokers, so the list is
    /// authoritative: new ids are created, ids whose address moved are
    /// replaced (the old instance stopped), and real ids that disappeared
    /// are stopped and dropped. Seed brokers always survive.
    pub(crate) fn update_brokers(
        &self,
        brokers: &[MetadataResponseBroker],
        cfg: &ClientConfig,
    ) {
        let mut map = self.brokers.write();
        if map.stopped {
            return;
        }

        let mut new_by_id = HashMap::with_capacity(brokers.len());
        let mut new_order = Vec::with_capacity(brokers.len());

        for broker in brokers {
            let id = broker.node_id.0;
            let addr = format!("{}:{}", broker.host.as_str(), broker.port);

            let entry = match map.by_id.remove(&id) {
                Some(existing) if existing.addr == addr => existing,
                Some(moved) => {
                    debug!(broker = id, old = %moved.addr, new = %addr, "broker moved, replacing connection");
                    moved.stop_forever();
                    self.new_broker(id, addr, cfg.transport.as_ref())
                }
                None => self.new_broker(id, addr, cfg.transport.as_ref()),
            };

            new_order.push(entry.clone());
            new_by_id.insert(id, entry);
        }

        for (gone_id, gone) in map.by_id.drain() {
            if gone_id < -1 {
                // seed broker, always keep
                new_order.push(gone.clone());
                new_by_id.insert(gone_id, gone);
            } else {
                debug!(broker = gone_id, "broker no longer in cluster, stopping");
                gone.stop_forever();
            }
        }

        map.by_id = new_by_id;

        let mut rotation = self.rotation.lock();
        rotation.order = new_order;
        if rotation.idx >= rotation.order.len() {
            rotation.idx = 0;
        }
    }

    /// Stop every broker forever and latch the registry shut. Wake hooks
    /// fire so produce/fetch tasks parked in backoff observe shutdown
    /// instead of sleeping through it.
    pub(crate) fn stop_all(&self) {
        let mut map = self.brokers.write();
        map.stopped = true;
        for broker in map.by_id.values() {
            broker.stop_forever();
            broker.wake_sink();
            broker.wake_source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockCluster, MockTransportFactory};

    fn test_config(factory: Arc<MockTransportFactory>) -> ClientConfig {
        ClientConfig::new(factory).with_seed_brokers(["127.0.0.1:9092"])
    }

    #[test]
    fn test_unknown_seed_ids() {
        assert_eq!(unknown_seed_id(0), -2);
        assert_eq!(unknown_seed_id(1), -3);
        assert_eq!(unknown_seed_id(5), -7);
        assert!(unknown_seed_id(0) < UNKNOWN_CONTROLLER_ID);
    }

    #[test]
    fn test_parse_seed_addr() {
        assert_eq!(parse_seed_addr("localhost").unwrap(), "127.0.0.1:9092");
        assert_eq!(parse_seed_addr("kafka-1:9093").unwrap(), "kafka-1:9093");
        assert_eq!(parse_seed_addr("10.0.0.5").unwrap(), "10.0.0.5:9092");
        assert!(parse_seed_addr("10.0.0.5:abc").is_err());
        assert!(parse_seed_addr(":9092").is_err());
    }

    #[test]
    fn test_rotation_fairness() {
        let cluster = MockCluster::new();
        let factory = cluster.factory();
        let registry = BrokerRegistry::new();
        for i in 0..4 {
            registry.add_seed(unknown_seed_id(i), format!("seed-{i}:9092"), factory.as_ref());
        }

        // Over k*n selections with a stable registry of n brokers, every
        // broker shows up at least k-1 times.
        let k = 10;
        let mut counts: HashMap<i32, usize> = HashMap::new();
        for _ in 0..k * 4 {
            let broker = registry.any_broker().unwrap();
            *counts.entry(broker.id).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        for (_, count) in counts {
            assert!(count >= k - 1);
        }
    }

    #[test]
    fn test_any_broker_on_empty_registry() {
        let registry = BrokerRegistry::new();
        assert!(registry.any_broker().is_none());
    }

    #[test]
    fn test_update_brokers_replaces_moved_broker() {
        let cluster = MockCluster::new();
        let factory = cluster.factory();
        let cfg = test_config(factory.clone());
        let registry = BrokerRegistry::new();
        registry.add_seed(unknown_seed_id(0), "127.0.0.1:9092".into(), factory.as_ref());

        registry.update_brokers(&[meta_broker(1, "a", 9092)], &cfg);
        assert_eq!(
            registry.broker_or_err(1, ClientError::UnknownBroker(1)).unwrap().addr,
            "a:9092"
        );

        registry.update_brokers(
            &[meta_broker(1, "b", 9092), meta_broker(2, "c", 9092)],
            &cfg,
        );

        // old instance was stopped, new address visible, seed retained
        assert_eq!(cluster.stopped_addrs(), vec!["a:9092".to_string()]);
        assert_eq!(
            registry.broker_or_err(1, ClientError::UnknownBroker(1)).unwrap().addr,
            "b:9092"
        );
        assert!(registry.contains(2));
        assert!(registry.contains(unknown_seed_id(0)));
        registry.with_brokers(|map| assert_eq!(map.len(), 3));
    }

    #[test]
    fn test_update_brokers_drops_gone_real_brokers_keeps_seeds() {
        let cluster = MockCluster::new();
        let factory = cluster.factory();
        let cfg = test_config(factory.clone());
        let registry = BrokerRegistry::new();
        registry.add_seed(unknown_seed_id(0), "127.0.0.1:9092".into(), factory.as_ref());
        registry.update_brokers(&[meta_broker(1, "a", 9092), meta_broker(2, "b", 9092)], &cfg);

        // cluster reports zero brokers: only the seed remains
        registry.update_brokers(&[], &cfg);
        registry.with_brokers(|map| {
            assert_eq!(map.len(), 1);
            assert!(map.contains_key(&unknown_seed_id(0)));
        });
        let seed = registry.any_broker().unwrap();
        assert_eq!(seed.id, unknown_seed_id(0));
    }

    #[test]
    fn test_update_brokers_noop_after_stop() {
        let cluster = MockCluster::new();
        let factory = cluster.factory();
        let cfg = test_config(factory.clone());
        let registry = BrokerRegistry::new();
        registry.add_seed(unknown_seed_id(0), "127.0.0.1:9092".into(), factory.as_ref());

        registry.stop_all();
        registry.update_brokers(&[meta_broker(1, "a", 9092)], &cfg);
        assert!(!registry.contains(1));
    }

    fn meta_broker(id: i32, host: &str, port: i32) -> MetadataResponseBroker {
        use kafka_protocol::protocol::StrBytes;
        MetadataResponseBroker::default()
            .with_node_id(id.into())
            .with_host(StrBytes::from_string(host.to_string()))
            .with_port(port)
    }
}
