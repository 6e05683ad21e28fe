#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Routeline
//!
//! Routeline is the broker-routing core of a Kafka protocol client. It
//! accepts a typed Kafka request, decides which broker or brokers must
//! handle it, issues it with per-kind timeouts and retries, and reassembles
//! fan-out responses into one.
//!
//! ## What it owns
//!
//! - **Cluster view**: live brokers (seeds under reserved negative ids,
//!   discovered brokers under their cluster ids), the controller id, and
//!   the group/transaction coordinator cache
//! - **Metadata**: a background refresh loop and an atomically published
//!   topics snapshot with lock-free reads
//! - **Dispatch**: a typed switch routing each request to any-broker, the
//!   controller, a resolved coordinator, or a per-partition / per-broker
//!   fan-out with response merging
//! - **Policies**: per-request read/write timeouts, retry budgets and
//!   backoff, and ordered shutdown
//!
//! ## What it does not own
//!
//! The wire codec and per-broker connection management live behind
//! [`transport::BrokerTransport`]; record batching, partition consumers and
//! the rebalance loop are clients of this crate, not part of it.
//!
//! ## Library usage
//!
//! ```ignore
//! use routeline::{Client, ClientConfig, KafkaRequest};
//! use kafka_protocol::messages::MetadataRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> routeline::Result<()> {
//!     let config = ClientConfig::new(transport_factory)
//!         .with_seed_brokers(["localhost:9092", "kafka-1:9093"]);
//!     let client = Client::new(config)?;
//!
//!     let ctx = CancellationToken::new();
//!     let resp = client
//!         .request(&ctx, KafkaRequest::Metadata(MetadataRequest::default()))
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`client`]: construction, lifecycle, routing and the broker registry
//! - [`protocol`]: the typed request/response taxonomy
//! - [`transport`]: the seam to the out-of-scope connection manager
//! - [`config`]: programmatic client configuration
//! - [`error`]: error types, Kafka error codes and retriability
//! - [`testing`]: a scriptable in-memory cluster for tests

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{BrokerHandle, Client};
pub use config::ClientConfig;
pub use error::{ClientError, KafkaErrorCode, Result, TransportError};
pub use protocol::{CoordinatorKind, KafkaRequest, KafkaResponse};
pub use transport::{BrokerTransport, BufPool, CompressionCodec, TransportFactory};
