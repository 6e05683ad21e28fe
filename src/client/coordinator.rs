//! Coordinator cache and resolution
//!
//! Group and transaction coordinators are cached as `(name, kind) ->
//! broker_id`. Entries are purged when a response carries one of the three
//! coordinator error codes, so the next attempt re-resolves through
//! FindCoordinator; everything else leaves the cache alone.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use kafka_protocol::messages::FindCoordinatorRequest;
use kafka_protocol::protocol::StrBytes;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, KafkaErrorCode, Result};
use crate::protocol::{CoordinatorKind, KafkaRequest, KafkaResponse};

use super::registry::Broker;
use super::retry::{wait_tries, RetryState};
use super::Client;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CoordinatorKey {
    pub(crate) name: String,
    pub(crate) kind: CoordinatorKind,
}

/// The `(name, kind) -> broker_id` cache.
#[derive(Default)]
pub(crate) struct CoordinatorCache {
    entries: Mutex<HashMap<CoordinatorKey, i32>>,
}

impl CoordinatorCache {
    pub(crate) fn get(&self, key: &CoordinatorKey) -> Option<i32> {
        self.entries.lock().get(key).copied()
    }

    pub(crate) fn insert(&self, key: CoordinatorKey, node_id: i32) {
        self.entries.lock().insert(key, node_id);
    }

    /// Drop the entries for every name under `kind`.
    pub(crate) fn evict(&self, kind: CoordinatorKind, names: &[String]) {
        let mut entries = self.entries.lock();
        for name in names {
            entries.remove(&CoordinatorKey {
                name: name.clone(),
                kind,
            });
        }
    }
}

impl Client {
    /// Resolve the coordinator broker for `key`, retrying as necessary.
    pub(crate) async fn load_coordinator(
        &self,
        ctx: &CancellationToken,
        key: CoordinatorKey,
    ) -> Result<Arc<Broker>> {
        // If there is no controller, brokers were never loaded; force a
        // load now so the NodeID FindCoordinator returns can be resolved.
        if self.inner.controller_id.load(Ordering::Acquire) < 0 {
            self.controller(ctx).await?;
        }

        let cfg = &self.inner.cfg;
        let mut retry = RetryState::new(cfg, 10);
        loop {
            if let Some(node_id) = self.inner.coordinators.get(&key) {
                return self.inner.registry.broker_or_err(
                    node_id,
                    ClientError::UnknownCoordinator {
                        node_id,
                        name: key.name.clone(),
                        kind: key.kind,
                    },
                );
            }

            retry.attempt();
            let broker = self
                .inner
                .registry
                .any_broker()
                .ok_or(ClientError::ClientClosed)?;
            let req = FindCoordinatorRequest::default()
                .with_key(StrBytes::from_string(key.name.clone()))
                .with_key_type(key.kind.as_i8());

            let result = match broker
                .wait_resp(&self.inner.timeouts, &KafkaRequest::FindCoordinator(req))
                .await
            {
                Ok(KafkaResponse::FindCoordinator(resp)) => {
                    match KafkaErrorCode::err_for_code(resp.error_code) {
                        Some(err) => Err(err),
                        None => Ok(resp),
                    }
                }
                Ok(_) => Err(ClientError::Transport(crate::error::TransportError::Io(
                    "mismatched response type".into(),
                ))),
                Err(err) => Err(err),
            };

            match result {
                Ok(resp) => {
                    let node_id = resp.node_id.0;
                    debug!(name = %key.name, kind = ?key.kind, node_id, "resolved coordinator");
                    self.inner.coordinators.insert(key.clone(), node_id);
                    return self.inner.registry.broker_or_err(
                        node_id,
                        ClientError::UnknownCoordinator {
                            node_id,
                            name: key.name.clone(),
                            kind: key.kind,
                        },
                    );
                }
                Err(err) => {
                    if retry.may_retry(cfg, &err)
                        && wait_tries(cfg, ctx, &self.inner.shutdown, retry.tries()).await
                    {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Concurrently resolve coordinators for many names.
    ///
    /// The first failure cancels the remaining lookups; the partial map is
    /// returned alongside that first error.
    pub(crate) async fn load_coordinators(
        &self,
        ctx: &CancellationToken,
        kind: CoordinatorKind,
        names: &[String],
    ) -> (HashMap<String, Arc<Broker>>, Option<ClientError>) {
        let child = ctx.child_token();
        let mut tasks = JoinSet::new();
        for name in names {
            let client = self.clone();
            let child = child.clone();
            let key = CoordinatorKey {
                name: name.clone(),
                kind,
            };
            tasks.spawn(async move {
                let name = key.name.clone();
                (name, client.load_coordinator(&child, key).await)
            });
        }

        let mut resolved = HashMap::new();
        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            let Ok((name, result)) = joined else {
                continue;
            };
            match result {
                Ok(broker) => {
                    resolved.insert(name, broker);
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                        child.cancel();
                    }
                }
            }
        }

        (resolved, first_err)
    }
}
