//! Request router
//!
//! A typed switch over [`KafkaRequest`]: any-broker by default, controller
//! for admin requests, coordinator resolution for group and transaction
//! requests, per-partition fan-out for ListOffsets/OffsetForLeaderEpoch,
//! and whole-cluster fan-out for ListGroups. One retry loop wraps the
//! switch; the metadata hijack is the only path that bypasses it because
//! the metadata service retries on its own.

use std::collections::HashMap;
use std::sync::Arc;

use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::offset_for_leader_epoch_request::{
    OffsetForLeaderPartition, OffsetForLeaderTopic,
};
use kafka_protocol::messages::offset_for_leader_epoch_response::{
    EpochEndOffset, OffsetForLeaderTopicResult,
};
use kafka_protocol::messages::{
    DeleteGroupsRequest, DeleteGroupsResponse, DescribeGroupsRequest, DescribeGroupsResponse,
    GroupId, ListGroupsRequest, ListGroupsResponse, ListOffsetsRequest, ListOffsetsResponse,
    OffsetForLeaderEpochRequest, OffsetForLeaderEpochResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, KafkaErrorCode, Result};
use crate::protocol::{CoordinatorKind, KafkaRequest, KafkaResponse};

use super::coordinator::CoordinatorKey;
use super::metadata::WAITMETA_SLICE;
use super::registry::Broker;
use super::retry::{wait_tries, RetryState};
use super::Client;

impl Client {
    /// Issue a typed request, routing it to the broker(s) that must handle
    /// it, and return the (possibly merged) response.
    ///
    /// Cancellation always wins: a cancelled context returns promptly even
    /// if a request is already on the wire, in which case the eventual
    /// broker response is simply never observed by the caller.
    pub async fn request(
        &self,
        ctx: &CancellationToken,
        req: KafkaRequest,
    ) -> Result<KafkaResponse> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ClientError::ClientClosed);
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ClientError::Cancelled),
            _ = self.inner.shutdown.cancelled() => Err(ClientError::ClientClosed),
            result = self.dispatch(ctx, &req) => result,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, req), fields(api_key = req.key()))]
    async fn dispatch(&self, ctx: &CancellationToken, req: &KafkaRequest) -> Result<KafkaResponse> {
        // Metadata is hijacked so our own brokers and controller id stay
        // current; the metadata service has its own retry loop.
        if let KafkaRequest::Metadata(meta) = req {
            let all = meta.topics.is_none();
            let topics: Vec<String> = meta
                .topics
                .iter()
                .flatten()
                .filter_map(|t| t.name.as_ref())
                .map(|name| name.as_str().to_string())
                .collect();
            return self
                .fetch_metadata(ctx, all, &topics)
                .await
                .map(KafkaResponse::Metadata);
        }

        let cfg = &self.inner.cfg;
        let mut retry = RetryState::new(cfg, req.key());
        loop {
            retry.attempt();
            match self.route_once(ctx, req).await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if retry.may_retry(cfg, &err)
                        && wait_tries(cfg, ctx, &self.inner.shutdown, retry.tries()).await
                    {
                        debug!(error = %err, tries = retry.tries(), "retrying request");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn route_once(&self, ctx: &CancellationToken, req: &KafkaRequest) -> Result<KafkaResponse> {
        match req {
            KafkaRequest::Metadata(_) => unreachable!("metadata is hijacked in dispatch"),

            req if req.is_admin() => self.handle_admin(ctx, req).await,

            KafkaRequest::OffsetCommit(_)
            | KafkaRequest::TxnOffsetCommit(_)
            | KafkaRequest::OffsetFetch(_)
            | KafkaRequest::JoinGroup(_)
            | KafkaRequest::Heartbeat(_)
            | KafkaRequest::LeaveGroup(_)
            | KafkaRequest::SyncGroup(_)
            | KafkaRequest::DescribeGroups(_)
            | KafkaRequest::DeleteGroups(_)
            | KafkaRequest::InitProducerId(_)
            | KafkaRequest::AddPartitionsToTxn(_)
            | KafkaRequest::AddOffsetsToTxn(_)
            | KafkaRequest::EndTxn(_) => self.handle_coordinator_req(ctx, req).await,

            KafkaRequest::ListOffsets(t) => self.handle_list_offsets(ctx, t).await,
            KafkaRequest::OffsetForLeaderEpoch(t) => {
                self.handle_offset_for_leader_epoch(ctx, t).await
            }
            KafkaRequest::ListGroups(t) => self.handle_list_groups(ctx, t).await,

            _ => {
                let broker = self.any_broker_or_closed()?;
                broker.wait_resp(&self.inner.timeouts, req).await
            }
        }
    }

    pub(crate) fn any_broker_or_closed(&self) -> Result<Arc<Broker>> {
        self.inner
            .registry
            .any_broker()
            .ok_or(ClientError::ClientClosed)
    }

    /// Issue an admin request to the controller.
    async fn handle_admin(&self, ctx: &CancellationToken, req: &KafkaRequest) -> Result<KafkaResponse> {
        let controller = self.controller(ctx).await?;
        controller.wait_resp(&self.inner.timeouts, req).await
    }

    /// Group and transaction coordinator dispatch.
    ///
    /// Most requests bind to a single coordinator and are simple. The two
    /// multi-group shapes split into one sub-request per owning broker and
    /// merge; only if every sub-request errors does an error surface.
    async fn handle_coordinator_req(
        &self,
        ctx: &CancellationToken,
        req: &KafkaRequest,
    ) -> Result<KafkaResponse> {
        match req {
            KafkaRequest::InitProducerId(t) => match t.transactional_id.as_ref() {
                Some(txn_id) => {
                    let name = txn_id.as_str().to_string();
                    self.handle_coordinator_req_simple(ctx, CoordinatorKind::Txn, name, req)
                        .await
                }
                None => {
                    // With no transactional id this can go to any broker.
                    // Routing through the coordinator wrapper keeps the
                    // retriable-error parsing; the empty names list means
                    // nothing can be evicted.
                    let broker = self.any_broker_or_closed()?;
                    self.handle_req_with_coordinator(broker, CoordinatorKind::Txn, &[], req)
                        .await
                }
            },
            KafkaRequest::AddPartitionsToTxn(t) => {
                let name = t.v3_and_below_transactional_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Txn, name, req)
                    .await
            }
            KafkaRequest::AddOffsetsToTxn(t) => {
                let name = t.transactional_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Txn, name, req)
                    .await
            }
            KafkaRequest::EndTxn(t) => {
                let name = t.transactional_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Txn, name, req)
                    .await
            }

            KafkaRequest::OffsetCommit(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }
            KafkaRequest::TxnOffsetCommit(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }
            KafkaRequest::OffsetFetch(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }
            KafkaRequest::JoinGroup(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }
            KafkaRequest::Heartbeat(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }
            KafkaRequest::LeaveGroup(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }
            KafkaRequest::SyncGroup(t) => {
                let name = t.group_id.as_str().to_string();
                self.handle_coordinator_req_simple(ctx, CoordinatorKind::Group, name, req)
                    .await
            }

            KafkaRequest::DescribeGroups(t) => self.handle_describe_groups(ctx, t).await,
            KafkaRequest::DeleteGroups(t) => self.handle_delete_groups(ctx, t).await,

            // Every coordinator request should be matched above; anything
            // else is a request this client predates.
            _ => Err(ClientError::ClientTooOld),
        }
    }

    /// Resolve the coordinator for a single name and issue the request.
    async fn handle_coordinator_req_simple(
        &self,
        ctx: &CancellationToken,
        kind: CoordinatorKind,
        name: String,
        req: &KafkaRequest,
    ) -> Result<KafkaResponse> {
        let coordinator = self
            .load_coordinator(
                ctx,
                CoordinatorKey {
                    name: name.clone(),
                    kind,
                },
            )
            .await?;
        self.handle_req_with_coordinator(coordinator, kind, &[name], req)
            .await
    }

    /// Issue a request to a resolved coordinator and post-process the
    /// response.
    ///
    /// The representative error code is inspected; the three coordinator
    /// codes evict the cache entries for all `names` and surface as the
    /// mapped error so the outer retry layer can re-resolve. Responses with
    /// many partition errors need only the first inspected: coordinator
    /// errors are common to every partition on that broker.
    async fn handle_req_with_coordinator(
        &self,
        coordinator: Arc<Broker>,
        kind: CoordinatorKind,
        names: &[String],
        req: &KafkaRequest,
    ) -> Result<KafkaResponse> {
        let resp = coordinator.wait_resp(&self.inner.timeouts, req).await?;

        let code = KafkaErrorCode::from_code(coordinator_error_code(&resp));
        if matches!(
            code,
            KafkaErrorCode::CoordinatorNotAvailable
                | KafkaErrorCode::CoordinatorLoadInProgress
                | KafkaErrorCode::NotCoordinator
        ) {
            debug!(?kind, ?names, ?code, "evicting coordinator cache entries");
            self.inner.coordinators.evict(kind, names);
            return Err(ClientError::Kafka(code));
        }

        Ok(resp)
    }

    async fn handle_describe_groups(
        &self,
        ctx: &CancellationToken,
        t: &DescribeGroupsRequest,
    ) -> Result<KafkaResponse> {
        let names: Vec<String> = t.groups.iter().map(|g| g.as_str().to_string()).collect();
        let (coordinators, err) = self
            .load_coordinators(ctx, CoordinatorKind::Group, &names)
            .await;
        if let Some(err) = err {
            return Err(err);
        }

        let mut by_broker: HashMap<i32, (Arc<Broker>, Vec<GroupId>)> = HashMap::new();
        for group in &t.groups {
            let broker = coordinators[group.as_str()].clone();
            by_broker
                .entry(broker.id)
                .or_insert_with(|| (broker, Vec::new()))
                .1
                .push(group.clone());
        }

        let mut tasks = JoinSet::new();
        for (_, (broker, groups)) in by_broker {
            let sub = DescribeGroupsRequest::default()
                .with_include_authorized_operations(t.include_authorized_operations)
                .with_groups(groups);
            let client = self.clone();
            let names = names.clone();
            tasks.spawn(async move {
                client
                    .handle_req_with_coordinator(
                        broker,
                        CoordinatorKind::Group,
                        &names,
                        &KafkaRequest::DescribeGroups(sub),
                    )
                    .await
            });
        }

        let total = tasks.len();
        let mut merged = DescribeGroupsResponse::default();
        let mut first_err = None;
        let mut errs = 0;
        while let Some(joined) = tasks.join_next().await {
            match flatten_join(joined) {
                Ok(KafkaResponse::DescribeGroups(resp)) => {
                    merged.throttle_time_ms = resp.throttle_time_ms;
                    merged.groups.extend(resp.groups);
                }
                Ok(_) => {}
                Err(err) => {
                    errs += 1;
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        all_errored(total, errs, first_err)?;
        Ok(KafkaResponse::DescribeGroups(merged))
    }

    async fn handle_delete_groups(
        &self,
        ctx: &CancellationToken,
        t: &DeleteGroupsRequest,
    ) -> Result<KafkaResponse> {
        let names: Vec<String> = t
            .groups_names
            .iter()
            .map(|g| g.as_str().to_string())
            .collect();
        let (coordinators, err) = self
            .load_coordinators(ctx, CoordinatorKind::Group, &names)
            .await;
        if let Some(err) = err {
            return Err(err);
        }

        let mut by_broker: HashMap<i32, (Arc<Broker>, Vec<GroupId>)> = HashMap::new();
        for group in &t.groups_names {
            let broker = coordinators[group.as_str()].clone();
            by_broker
                .entry(broker.id)
                .or_insert_with(|| (broker, Vec::new()))
                .1
                .push(group.clone());
        }

        let mut tasks = JoinSet::new();
        for (_, (broker, groups)) in by_broker {
            let sub = DeleteGroupsRequest::default().with_groups_names(groups);
            let client = self.clone();
            let names = names.clone();
            tasks.spawn(async move {
                client
                    .handle_req_with_coordinator(
                        broker,
                        CoordinatorKind::Group,
                        &names,
                        &KafkaRequest::DeleteGroups(sub),
                    )
                    .await
            });
        }

        let total = tasks.len();
        let mut merged = DeleteGroupsResponse::default();
        let mut first_err = None;
        let mut errs = 0;
        while let Some(joined) = tasks.join_next().await {
            match flatten_join(joined) {
                Ok(KafkaResponse::DeleteGroups(resp)) => {
                    merged.throttle_time_ms = resp.throttle_time_ms;
                    merged.results.extend(resp.results);
                }
                Ok(_) => {}
                Err(err) => {
                    errs += 1;
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        all_errored(total, errs, first_err)?;
        Ok(KafkaResponse::DeleteGroups(merged))
    }

    /// Issue ListGroups to every real broker after a broker metadata
    /// refresh; groups merge, the first non-zero error code is kept.
    async fn handle_list_groups(
        &self,
        ctx: &CancellationToken,
        t: &ListGroupsRequest,
    ) -> Result<KafkaResponse> {
        self.fetch_broker_metadata(ctx).await?;

        let brokers = self.inner.registry.non_seed_brokers();
        let mut tasks = JoinSet::new();
        for broker in brokers {
            let client = self.clone();
            let sub = t.clone();
            tasks.spawn(async move {
                broker
                    .wait_resp(&client.inner.timeouts, &KafkaRequest::ListGroups(sub))
                    .await
            });
        }

        let total = tasks.len();
        let mut merged = ListGroupsResponse::default();
        let mut first_err = None;
        let mut errs = 0;
        while let Some(joined) = tasks.join_next().await {
            match flatten_join(joined) {
                Ok(KafkaResponse::ListGroups(resp)) => {
                    if merged.error_code == 0 {
                        merged.error_code = resp.error_code;
                    }
                    merged.throttle_time_ms = resp.throttle_time_ms;
                    merged.groups.extend(resp.groups);
                }
                Ok(_) => {}
                Err(err) => {
                    errs += 1;
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        all_errored(total, errs, first_err)?;
        Ok(KafkaResponse::ListGroups(merged))
    }

    /// Block until every requested topic has partitions or a load error in
    /// the snapshot, or the caller gives up.
    async fn await_topic_metadata(
        &self,
        ctx: &CancellationToken,
        need: &[String],
    ) -> Result<Arc<super::metadata::TopicsMap>> {
        self.inner.topics.ensure_topics(need);
        loop {
            let topics = self.inner.topics.load();
            let need_load = need.iter().any(|name| {
                topics
                    .get(name)
                    .map_or(true, |tp| tp.partitions.is_empty() && tp.load_err.is_none())
            });
            if !need_load {
                return Ok(topics);
            }
            if ctx.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            self.waitmeta(ctx, WAITMETA_SLICE).await;
        }
    }

    /// Per-partition fan-out of a ListOffsets request to partition leaders.
    async fn handle_list_offsets(
        &self,
        ctx: &CancellationToken,
        t: &ListOffsetsRequest,
    ) -> Result<KafkaResponse> {
        let need: Vec<String> = t
            .topics
            .iter()
            .map(|topic| topic.name.as_str().to_string())
            .collect();
        let topics = self.await_topic_metadata(ctx, &need).await?;

        // Partition every requested partition into synthesized-error or
        // route-to-leader, with the brokers read lock held so leader
        // lookups and liveness agree.
        let mut resp_parts: HashMap<String, Vec<ListOffsetsPartitionResponse>> = HashMap::new();
        let mut by_broker: HashMap<i32, (Arc<Broker>, HashMap<String, Vec<ListOffsetsPartition>>)> =
            HashMap::new();

        self.inner.registry.with_brokers(|brokers| {
            for topic in &t.topics {
                let name = topic.name.as_str().to_string();
                let tracked = topics.get(&name);
                for partition in &topic.partitions {
                    let meta =
                        tracked.and_then(|tp| tp.partitions.get(&partition.partition_index));
                    let Some(meta) = meta else {
                        resp_parts.entry(name.clone()).or_default().push(
                            ListOffsetsPartitionResponse::default()
                                .with_partition_index(partition.partition_index)
                                .with_error_code(
                                    KafkaErrorCode::UnknownTopicOrPartition.as_i16(),
                                ),
                        );
                        continue;
                    };

                    let leader = brokers.get(&meta.leader);
                    match leader {
                        Some(leader) if meta.load_err.is_none() => {
                            by_broker
                                .entry(leader.id)
                                .or_insert_with(|| (leader.clone(), HashMap::new()))
                                .1
                                .entry(name.clone())
                                .or_default()
                                .push(partition.clone());
                        }
                        _ => {
                            let code = meta
                                .load_err
                                .unwrap_or(KafkaErrorCode::UnknownServerError)
                                .as_i16();
                            resp_parts.entry(name.clone()).or_default().push(
                                ListOffsetsPartitionResponse::default()
                                    .with_partition_index(partition.partition_index)
                                    .with_error_code(code),
                            );
                        }
                    }
                }
            }
        });

        let mut tasks = JoinSet::new();
        for (_, (broker, broker_topics)) in by_broker {
            let mut sub = ListOffsetsRequest::default()
                .with_replica_id(t.replica_id)
                .with_isolation_level(t.isolation_level);
            sub.topics = broker_topics
                .into_iter()
                .map(|(name, partitions)| {
                    ListOffsetsTopic::default()
                        .with_name(TopicName::from(StrBytes::from_string(name)))
                        .with_partitions(partitions)
                })
                .collect();
            let client = self.clone();
            tasks.spawn(async move {
                broker
                    .wait_resp(&client.inner.timeouts, &KafkaRequest::ListOffsets(sub))
                    .await
            });
        }

        let total = tasks.len();
        let mut throttle = 0;
        let mut first_err = None;
        let mut errs = 0;
        while let Some(joined) = tasks.join_next().await {
            match flatten_join(joined) {
                Ok(KafkaResponse::ListOffsets(resp)) => {
                    throttle = resp.throttle_time_ms;
                    for topic in resp.topics {
                        resp_parts
                            .entry(topic.name.as_str().to_string())
                            .or_default()
                            .extend(topic.partitions);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    errs += 1;
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        all_errored(total, errs, first_err)?;

        let mut resp = ListOffsetsResponse::default().with_throttle_time_ms(throttle);
        resp.topics = resp_parts
            .into_iter()
            .map(|(name, partitions)| {
                ListOffsetsTopicResponse::default()
                    .with_name(TopicName::from(StrBytes::from_string(name)))
                    .with_partitions(partitions)
            })
            .collect();
        Ok(KafkaResponse::ListOffsets(resp))
    }

    /// Same split/merge as ListOffsets for OffsetForLeaderEpoch; only the
    /// types differ.
    async fn handle_offset_for_leader_epoch(
        &self,
        ctx: &CancellationToken,
        t: &OffsetForLeaderEpochRequest,
    ) -> Result<KafkaResponse> {
        let need: Vec<String> = t
            .topics
            .iter()
            .map(|topic| topic.topic.as_str().to_string())
            .collect();
        let topics = self.await_topic_metadata(ctx, &need).await?;

        let mut resp_parts: HashMap<String, Vec<EpochEndOffset>> = HashMap::new();
        let mut by_broker: HashMap<
            i32,
            (Arc<Broker>, HashMap<String, Vec<OffsetForLeaderPartition>>),
        > = HashMap::new();

        self.inner.registry.with_brokers(|brokers| {
            for topic in &t.topics {
                let name = topic.topic.as_str().to_string();
                let tracked = topics.get(&name);
                for partition in &topic.partitions {
                    let meta = tracked.and_then(|tp| tp.partitions.get(&partition.partition));
                    let Some(meta) = meta else {
                        resp_parts.entry(name.clone()).or_default().push(
                            EpochEndOffset::default()
                                .with_partition(partition.partition)
                                .with_error_code(
                                    KafkaErrorCode::UnknownTopicOrPartition.as_i16(),
                                ),
                        );
                        continue;
                    };

                    let leader = brokers.get(&meta.leader);
                    match leader {
                        Some(leader) if meta.load_err.is_none() => {
                            by_broker
                                .entry(leader.id)
                                .or_insert_with(|| (leader.clone(), HashMap::new()))
                                .1
                                .entry(name.clone())
                                .or_default()
                                .push(partition.clone());
                        }
                        _ => {
                            let code = meta
                                .load_err
                                .unwrap_or(KafkaErrorCode::UnknownServerError)
                                .as_i16();
                            resp_parts.entry(name.clone()).or_default().push(
                                EpochEndOffset::default()
                                    .with_partition(partition.partition)
                                    .with_error_code(code),
                            );
                        }
                    }
                }
            }
        });

        let mut tasks = JoinSet::new();
        for (_, (broker, broker_topics)) in by_broker {
            let mut sub = OffsetForLeaderEpochRequest::default().with_replica_id(t.replica_id);
            sub.topics = broker_topics
                .into_iter()
                .map(|(name, partitions)| {
                    OffsetForLeaderTopic::default()
                        .with_topic(TopicName::from(StrBytes::from_string(name)))
                        .with_partitions(partitions)
                })
                .collect();
            let client = self.clone();
            tasks.spawn(async move {
                broker
                    .wait_resp(
                        &client.inner.timeouts,
                        &KafkaRequest::OffsetForLeaderEpoch(sub),
                    )
                    .await
            });
        }

        let total = tasks.len();
        let mut throttle = 0;
        let mut first_err = None;
        let mut errs = 0;
        while let Some(joined) = tasks.join_next().await {
            match flatten_join(joined) {
                Ok(KafkaResponse::OffsetForLeaderEpoch(resp)) => {
                    throttle = resp.throttle_time_ms;
                    for topic in resp.topics {
                        resp_parts
                            .entry(topic.topic.as_str().to_string())
                            .or_default()
                            .extend(topic.partitions);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    errs += 1;
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        all_errored(total, errs, first_err)?;

        let mut resp = OffsetForLeaderEpochResponse::default().with_throttle_time_ms(throttle);
        resp.topics = resp_parts
            .into_iter()
            .map(|(name, partitions)| {
                OffsetForLeaderTopicResult::default()
                    .with_topic(TopicName::from(StrBytes::from_string(name)))
                    .with_partitions(partitions)
            })
            .collect();
        Ok(KafkaResponse::OffsetForLeaderEpoch(resp))
    }
}

/// The representative error code of a coordinator response.
///
/// Partition-keyed responses use the first partition's code; OffsetFetch
/// carries a top-level code from wire v2 on, so a non-zero top-level code
/// wins there. Anything unlisted reports success and is left to the
/// caller.
fn coordinator_error_code(resp: &KafkaResponse) -> i16 {
    match resp {
        KafkaResponse::InitProducerId(t) => t.error_code,
        KafkaResponse::AddOffsetsToTxn(t) => t.error_code,
        KafkaResponse::EndTxn(t) => t.error_code,
        KafkaResponse::AddPartitionsToTxn(t) => t
            .results_by_topic_v3_and_below
            .first()
            .and_then(|topic| topic.results_by_partition.first())
            .map(|partition| partition.partition_error_code)
            .unwrap_or(0),

        KafkaResponse::OffsetCommit(t) => t
            .topics
            .first()
            .and_then(|topic| topic.partitions.first())
            .map(|partition| partition.error_code)
            .unwrap_or(0),
        KafkaResponse::TxnOffsetCommit(t) => t
            .topics
            .first()
            .and_then(|topic| topic.partitions.first())
            .map(|partition| partition.error_code)
            .unwrap_or(0),
        KafkaResponse::OffsetFetch(t) => {
            if t.error_code != 0 {
                t.error_code
            } else {
                t.topics
                    .first()
                    .and_then(|topic| topic.partitions.first())
                    .map(|partition| partition.error_code)
                    .unwrap_or(0)
            }
        }
        KafkaResponse::JoinGroup(t) => t.error_code,
        KafkaResponse::Heartbeat(t) => t.error_code,
        KafkaResponse::LeaveGroup(t) => t.error_code,
        KafkaResponse::SyncGroup(t) => t.error_code,
        KafkaResponse::DescribeGroups(t) => {
            t.groups.first().map(|group| group.error_code).unwrap_or(0)
        }
        KafkaResponse::DeleteGroups(t) => {
            t.results.first().map(|result| result.error_code).unwrap_or(0)
        }
        _ => 0,
    }
}

fn flatten_join(
    joined: std::result::Result<Result<KafkaResponse>, tokio::task::JoinError>,
) -> Result<KafkaResponse> {
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(ClientError::Transport(crate::error::TransportError::Io(
            format!("fan-out task failed: {join_err}"),
        ))),
    }
}

/// Fan-out contract: succeed if any sub-request succeeded, otherwise the
/// first observed error.
fn all_errored(total: usize, errs: usize, first_err: Option<ClientError>) -> Result<()> {
    if total > 0 && errs == total {
        Err(first_err.unwrap_or(ClientError::Transport(
            crate::error::TransportError::Io("all fan-out requests failed".into()),
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_protocol::messages::offset_fetch_response::{
        OffsetFetchResponsePartition, OffsetFetchResponseTopic,
    };
    use kafka_protocol::messages::{HeartbeatResponse, OffsetFetchResponse};

    #[test]
    fn test_coordinator_error_code_top_level() {
        let resp = KafkaResponse::Heartbeat(HeartbeatResponse::default().with_error_code(16));
        assert_eq!(coordinator_error_code(&resp), 16);
    }

    #[test]
    fn test_coordinator_error_code_offset_fetch_prefers_top_level() {
        let resp = OffsetFetchResponse::default()
            .with_error_code(15)
            .with_topics(vec![OffsetFetchResponseTopic::default().with_partitions(
                vec![OffsetFetchResponsePartition::default().with_error_code(16)],
            )]);
        assert_eq!(
            coordinator_error_code(&KafkaResponse::OffsetFetch(resp)),
            15
        );

        let resp = OffsetFetchResponse::default().with_topics(vec![
            OffsetFetchResponseTopic::default().with_partitions(vec![
                OffsetFetchResponsePartition::default().with_error_code(16),
            ]),
        ]);
        assert_eq!(
            coordinator_error_code(&KafkaResponse::OffsetFetch(resp)),
            16
        );
    }

    #[test]
    fn test_coordinator_error_code_empty_response_is_success() {
        let resp = KafkaResponse::OffsetCommit(Default::default());
        assert_eq!(coordinator_error_code(&resp), 0);
    }

    #[test]
    fn test_all_errored_contract() {
        assert!(all_errored(0, 0, None).is_ok());
        assert!(all_errored(3, 2, Some(ClientError::ClientTooOld)).is_ok());
        assert!(all_errored(3, 3, Some(ClientError::ClientTooOld)).is_err());
    }
}
