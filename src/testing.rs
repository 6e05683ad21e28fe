//! Testing utilities for Routeline
//!
//! This module provides a scriptable in-memory cluster for exercising the
//! router without sockets: a [`MockCluster`] hands out
//! [`crate::transport::BrokerTransport`] implementations whose responses
//! are driven by per-address responder closures, and records every stop and
//! wake so lifecycle ordering can be asserted.
//!
//! # Example
//!
//! ```ignore
//! use routeline::testing::MockCluster;
//!
//! let cluster = MockCluster::new();
//! cluster.on_any(|req| match req {
//!     KafkaRequest::Metadata(_) => Ok(KafkaResponse::Metadata(
//!         metadata_response(&[(1, "b1", 9092)], 1, &[]),
//!     )),
//!     _ => Err(TransportError::Io("unexpected".into())),
//! });
//! let config = ClientConfig::new(cluster.factory()).with_seed_brokers(["localhost"]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kafka_protocol::messages::metadata_response::{
    MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::{FindCoordinatorResponse, MetadataResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::client::Client;
use crate::error::{Result, TransportError};
use crate::protocol::{KafkaRequest, KafkaResponse};
use crate::transport::{BrokerTransport, BufPool, TransportFactory};

/// A scripted reply for one broker.
pub type Responder =
    Arc<dyn Fn(&KafkaRequest) -> std::result::Result<KafkaResponse, TransportError> + Send + Sync>;

#[derive(Default)]
struct ClusterState {
    responders: Mutex<HashMap<String, Responder>>,
    fallback: Mutex<Option<Responder>>,
    stopped: Mutex<Vec<String>>,
    wakes: Mutex<Vec<(String, &'static str)>>,
    requests: Mutex<Vec<(String, i16)>>,
}

/// A scriptable in-memory cluster.
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<ClusterState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transport factory to hand to [`crate::ClientConfig`].
    pub fn factory(&self) -> Arc<MockTransportFactory> {
        Arc::new(MockTransportFactory {
            state: self.state.clone(),
        })
    }

    /// Script the broker at `addr` (`host:port`).
    pub fn on_addr<F>(&self, addr: impl Into<String>, responder: F)
    where
        F: Fn(&KafkaRequest) -> std::result::Result<KafkaResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        self.state
            .responders
            .lock()
            .insert(addr.into(), Arc::new(responder));
    }

    /// Script every broker without an address-specific responder.
    pub fn on_any<F>(&self, responder: F)
    where
        F: Fn(&KafkaRequest) -> std::result::Result<KafkaResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        *self.state.fallback.lock() = Some(Arc::new(responder));
    }

    /// Addresses whose transports were stopped forever, in stop order.
    pub fn stopped_addrs(&self) -> Vec<String> {
        self.state.stopped.lock().clone()
    }

    /// `(addr, "sink" | "source")` wake events, in order.
    pub fn wakes(&self) -> Vec<(String, &'static str)> {
        self.state.wakes.lock().clone()
    }

    /// `(addr, api_key)` for every request issued, in order.
    pub fn requests(&self) -> Vec<(String, i16)> {
        self.state.requests.lock().clone()
    }

    /// Requests that hit a specific address.
    pub fn requests_to(&self, addr: &str) -> Vec<i16> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, key)| *key)
            .collect()
    }
}

/// Factory producing [`MockTransport`]s wired to the cluster state.
#[derive(Debug)]
pub struct MockTransportFactory {
    state: Arc<ClusterState>,
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("stopped", &self.stopped.lock().len())
            .finish_non_exhaustive()
    }
}

impl TransportFactory for MockTransportFactory {
    fn connect(
        &self,
        addr: &str,
        broker_id: i32,
        _buf_pool: Arc<BufPool>,
    ) -> Arc<dyn BrokerTransport> {
        Arc::new(MockTransport {
            addr: addr.to_string(),
            broker_id,
            state: self.state.clone(),
            stopped: AtomicBool::new(false),
        })
    }
}

/// One scripted broker connection.
pub struct MockTransport {
    addr: String,
    #[allow(dead_code)]
    broker_id: i32,
    state: Arc<ClusterState>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("addr", &self.addr)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn wait_resp(
        &self,
        req: &KafkaRequest,
        _read_timeout: Duration,
        _write_timeout: Duration,
    ) -> std::result::Result<KafkaResponse, TransportError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TransportError::Stopped);
        }
        self.state
            .requests
            .lock()
            .push((self.addr.clone(), req.key()));

        let responder = self
            .state
            .responders
            .lock()
            .get(&self.addr)
            .cloned()
            .or_else(|| self.state.fallback.lock().clone());
        match responder {
            Some(responder) => responder(req),
            None => Err(TransportError::Io(format!(
                "no responder scripted for {}",
                self.addr
            ))),
        }
    }

    fn stop_forever(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.state.stopped.lock().push(self.addr.clone());
        }
    }

    fn wake_sink(&self) {
        self.state.wakes.lock().push((self.addr.clone(), "sink"));
    }

    fn wake_source(&self) {
        self.state.wakes.lock().push((self.addr.clone(), "source"));
    }
}

/// Build a metadata response broker entry.
pub fn metadata_broker(id: i32, host: &str, port: i32) -> MetadataResponseBroker {
    MetadataResponseBroker::default()
        .with_node_id(id.into())
        .with_host(StrBytes::from_string(host.to_string()))
        .with_port(port)
}

/// Build a metadata response topic with `(partition, leader)` pairs.
pub fn metadata_topic(name: &str, partitions: &[(i32, i32)]) -> MetadataResponseTopic {
    MetadataResponseTopic::default()
        .with_name(Some(TopicName::from(StrBytes::from_string(
            name.to_string(),
        ))))
        .with_partitions(
            partitions
                .iter()
                .map(|&(index, leader)| {
                    MetadataResponsePartition::default()
                        .with_partition_index(index)
                        .with_leader_id(leader.into())
                })
                .collect(),
        )
}

/// Build a full metadata response: brokers as `(id, host, port)` triples,
/// the controller id, and topics.
pub fn metadata_response(
    brokers: &[(i32, &str, i32)],
    controller_id: i32,
    topics: &[MetadataResponseTopic],
) -> MetadataResponse {
    MetadataResponse::default()
        .with_brokers(
            brokers
                .iter()
                .map(|&(id, host, port)| metadata_broker(id, host, port))
                .collect(),
        )
        .with_controller_id(controller_id.into())
        .with_topics(topics.to_vec())
}

/// Build a FindCoordinator response pointing at `node_id`.
pub fn find_coordinator_response(node_id: i32, error_code: i16) -> FindCoordinatorResponse {
    FindCoordinatorResponse::default()
        .with_error_code(error_code)
        .with_node_id(node_id.into())
}

/// Park a record on a tracked partition, as the producer pipeline would.
/// Returns `None` if the partition is not in the topics snapshot.
pub fn buffer_record(
    client: &Client,
    topic: &str,
    partition: i32,
) -> Option<oneshot::Receiver<Result<()>>> {
    let topics = client.inner.topics.load();
    let tracked = topics.get(topic)?;
    Some(tracked.partitions.get(&partition)?.records.buffer())
}

/// Mark topics as tracked so metadata responses populate them, without
/// going through a ListOffsets request.
pub fn track_topics(client: &Client, topics: &[&str]) {
    let names: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
    client.inner.topics.ensure_topics(&names);
}
