//! Transport seam between the routing core and per-broker connections
//!
//! The routing core never dials sockets. Each broker the client knows is
//! backed by a [`BrokerTransport`] produced by the configured
//! [`TransportFactory`]; the connection manager behind it owns TCP, TLS,
//! SASL, framing and in-flight correlation. The core only needs "send this
//! typed request, await a typed response or a transport error" plus a
//! terminal stop and two idempotent wake hooks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

use crate::error::TransportError;
use crate::protocol::{KafkaRequest, KafkaResponse};

#[cfg(test)]
mod pool_test;

/// Compression codecs the client may negotiate, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

/// A single broker connection as seen by the routing core.
#[async_trait]
pub trait BrokerTransport: Send + Sync + fmt::Debug {
    /// Issue a typed request and await the typed response.
    ///
    /// The timeouts are computed by the client per request kind; the
    /// transport applies them to its write and read halves. A request may
    /// already be on the wire when the caller gives up, in which case the
    /// eventual response is discarded by the transport.
    async fn wait_resp(
        &self,
        req: &KafkaRequest,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> std::result::Result<KafkaResponse, TransportError>;

    /// Permanently stop this connection. Idempotent; all pending and future
    /// requests fail with [`TransportError::Stopped`]. Must not block: the
    /// registry calls this under its write lock.
    fn stop_forever(&self);

    /// Wake the produce queue attached to this broker so a task parked in
    /// backoff re-checks for shutdown. Idempotent, may be a no-op.
    fn wake_sink(&self) {}

    /// Same as [`BrokerTransport::wake_sink`] for the fetch side.
    fn wake_source(&self) {}
}

/// Produces transports for broker addresses.
///
/// Implemented by the out-of-scope connection manager; tests script it.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Build a transport for `addr` (always `host:port`). Called whenever a
    /// metadata response introduces a broker id or moves one to a new
    /// address. All transports of one client receive the same `buf_pool`
    /// for request serialization.
    fn connect(&self, addr: &str, broker_id: i32, buf_pool: Arc<BufPool>)
        -> Arc<dyn BrokerTransport>;

    /// Initialize the compression codecs the client was configured with.
    ///
    /// Invoked eagerly during client construction so a bad codec list fails
    /// `Client::new` instead of the first produce.
    fn init_compression(
        &self,
        codecs: &[CompressionCodec],
    ) -> std::result::Result<(), TransportError> {
        let _ = codecs;
        Ok(())
    }
}

const POOL_BUFFERS: usize = 1024;
const POOL_BUFFER_CAPACITY: usize = 16 * 1024;

/// A pool of reusable request-serialization buffers shared by all brokers.
///
/// Purely a hot-path allocation optimization; behavior is identical with an
/// empty pool. Buffers above the bucket capacity are left for the allocator
/// rather than pinned in the queue.
pub struct BufPool {
    buffers: ArrayQueue<BytesMut>,
}

impl BufPool {
    pub fn new() -> Self {
        Self {
            buffers: ArrayQueue::new(POOL_BUFFERS),
        }
    }

    /// Get a cleared buffer with at least the requested capacity.
    pub fn get(&self, capacity: usize) -> BytesMut {
        if capacity <= POOL_BUFFER_CAPACITY {
            if let Some(mut buf) = self.buffers.pop() {
                buf.clear();
                return buf;
            }
        }
        BytesMut::with_capacity(capacity.max(POOL_BUFFER_CAPACITY))
    }

    /// Return a buffer to the pool. Oversized or surplus buffers are
    /// dropped.
    pub fn put(&self, buf: BytesMut) {
        if buf.capacity() >= POOL_BUFFER_CAPACITY && buf.capacity() < 2 * POOL_BUFFER_CAPACITY {
            let _ = self.buffers.push(buf);
        }
    }
}

impl Default for BufPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufPool")
            .field("pooled", &self.buffers.len())
            .finish()
    }
}
