//! Typed Kafka request and response taxonomy
//!
//! The router dispatches on a closed sum type rather than reflection or raw
//! API keys: every request the client can issue is a variant here, wrapping
//! the corresponding `kafka_protocol` message. The wire codec (framing,
//! versioning, compression) lives behind the transport seam and never leaks
//! into this module.

use kafka_protocol::messages::{
    AddOffsetsToTxnRequest, AddOffsetsToTxnResponse, AddPartitionsToTxnRequest,
    AddPartitionsToTxnResponse, AlterConfigsRequest, AlterConfigsResponse,
    AlterPartitionReassignmentsRequest, AlterPartitionReassignmentsResponse, ApiKey,
    ApiVersionsRequest, ApiVersionsResponse, CreatePartitionsRequest, CreatePartitionsResponse,
    CreateTopicsRequest, CreateTopicsResponse, DeleteGroupsRequest, DeleteGroupsResponse,
    DeleteRecordsRequest, DeleteRecordsResponse, DeleteTopicsRequest, DeleteTopicsResponse,
    DescribeClusterRequest, DescribeClusterResponse, DescribeConfigsRequest,
    DescribeConfigsResponse, DescribeGroupsRequest, DescribeGroupsResponse, ElectLeadersRequest,
    ElectLeadersResponse, EndTxnRequest, EndTxnResponse, FetchRequest, FetchResponse,
    FindCoordinatorRequest, FindCoordinatorResponse, HeartbeatRequest, HeartbeatResponse,
    InitProducerIdRequest, InitProducerIdResponse, JoinGroupRequest, JoinGroupResponse,
    LeaveGroupRequest, LeaveGroupResponse, ListGroupsRequest, ListGroupsResponse,
    ListOffsetsRequest, ListOffsetsResponse, ListPartitionReassignmentsRequest,
    ListPartitionReassignmentsResponse, MetadataRequest, MetadataResponse, OffsetCommitRequest,
    OffsetCommitResponse, OffsetFetchRequest, OffsetFetchResponse, OffsetForLeaderEpochRequest,
    OffsetForLeaderEpochResponse, ProduceRequest, ProduceResponse, SaslAuthenticateRequest,
    SaslAuthenticateResponse, SaslHandshakeRequest, SaslHandshakeResponse, SyncGroupRequest,
    SyncGroupResponse, TxnOffsetCommitRequest, TxnOffsetCommitResponse,
};

/// Which kind of coordinator a name resolves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorKind {
    Group,
    Txn,
}

impl CoordinatorKind {
    /// The `key_type` value used on the wire in FindCoordinator.
    pub fn as_i8(self) -> i8 {
        match self {
            CoordinatorKind::Group => 0,
            CoordinatorKind::Txn => 1,
        }
    }
}

/// A typed request the client knows how to route.
#[derive(Debug, Clone)]
pub enum KafkaRequest {
    Produce(ProduceRequest),
    Fetch(FetchRequest),
    ListOffsets(ListOffsetsRequest),
    Metadata(MetadataRequest),
    OffsetCommit(OffsetCommitRequest),
    OffsetFetch(OffsetFetchRequest),
    FindCoordinator(FindCoordinatorRequest),
    JoinGroup(JoinGroupRequest),
    Heartbeat(HeartbeatRequest),
    LeaveGroup(LeaveGroupRequest),
    SyncGroup(SyncGroupRequest),
    DescribeGroups(DescribeGroupsRequest),
    ListGroups(ListGroupsRequest),
    SaslHandshake(SaslHandshakeRequest),
    ApiVersions(ApiVersionsRequest),
    CreateTopics(CreateTopicsRequest),
    DeleteTopics(DeleteTopicsRequest),
    DeleteRecords(DeleteRecordsRequest),
    InitProducerId(InitProducerIdRequest),
    OffsetForLeaderEpoch(OffsetForLeaderEpochRequest),
    AddPartitionsToTxn(AddPartitionsToTxnRequest),
    AddOffsetsToTxn(AddOffsetsToTxnRequest),
    EndTxn(EndTxnRequest),
    TxnOffsetCommit(TxnOffsetCommitRequest),
    DescribeConfigs(DescribeConfigsRequest),
    AlterConfigs(AlterConfigsRequest),
    SaslAuthenticate(SaslAuthenticateRequest),
    CreatePartitions(CreatePartitionsRequest),
    DeleteGroups(DeleteGroupsRequest),
    ElectLeaders(ElectLeadersRequest),
    AlterPartitionReassignments(AlterPartitionReassignmentsRequest),
    ListPartitionReassignments(ListPartitionReassignmentsRequest),
    DescribeCluster(DescribeClusterRequest),
}

impl KafkaRequest {
    /// The Kafka API key for this request.
    pub fn api_key(&self) -> ApiKey {
        match self {
            KafkaRequest::Produce(_) => ApiKey::ProduceKey,
            KafkaRequest::Fetch(_) => ApiKey::FetchKey,
            KafkaRequest::ListOffsets(_) => ApiKey::ListOffsetsKey,
            KafkaRequest::Metadata(_) => ApiKey::MetadataKey,
            KafkaRequest::OffsetCommit(_) => ApiKey::OffsetCommitKey,
            KafkaRequest::OffsetFetch(_) => ApiKey::OffsetFetchKey,
            KafkaRequest::FindCoordinator(_) => ApiKey::FindCoordinatorKey,
            KafkaRequest::JoinGroup(_) => ApiKey::JoinGroupKey,
            KafkaRequest::Heartbeat(_) => ApiKey::HeartbeatKey,
            KafkaRequest::LeaveGroup(_) => ApiKey::LeaveGroupKey,
            KafkaRequest::SyncGroup(_) => ApiKey::SyncGroupKey,
            KafkaRequest::DescribeGroups(_) => ApiKey::DescribeGroupsKey,
            KafkaRequest::ListGroups(_) => ApiKey::ListGroupsKey,
            KafkaRequest::SaslHandshake(_) => ApiKey::SaslHandshakeKey,
            KafkaRequest::ApiVersions(_) => ApiKey::ApiVersionsKey,
            KafkaRequest::CreateTopics(_) => ApiKey::CreateTopicsKey,
            KafkaRequest::DeleteTopics(_) => ApiKey::DeleteTopicsKey,
            KafkaRequest::DeleteRecords(_) => ApiKey::DeleteRecordsKey,
            KafkaRequest::InitProducerId(_) => ApiKey::InitProducerIdKey,
            KafkaRequest::OffsetForLeaderEpoch(_) => ApiKey::OffsetForLeaderEpochKey,
            KafkaRequest::AddPartitionsToTxn(_) => ApiKey::AddPartitionsToTxnKey,
            KafkaRequest::AddOffsetsToTxn(_) => ApiKey::AddOffsetsToTxnKey,
            KafkaRequest::EndTxn(_) => ApiKey::EndTxnKey,
            KafkaRequest::TxnOffsetCommit(_) => ApiKey::TxnOffsetCommitKey,
            KafkaRequest::DescribeConfigs(_) => ApiKey::DescribeConfigsKey,
            KafkaRequest::AlterConfigs(_) => ApiKey::AlterConfigsKey,
            KafkaRequest::SaslAuthenticate(_) => ApiKey::SaslAuthenticateKey,
            KafkaRequest::CreatePartitions(_) => ApiKey::CreatePartitionsKey,
            KafkaRequest::DeleteGroups(_) => ApiKey::DeleteGroupsKey,
            KafkaRequest::ElectLeaders(_) => ApiKey::ElectLeadersKey,
            KafkaRequest::AlterPartitionReassignments(_) => ApiKey::AlterPartitionReassignmentsKey,
            KafkaRequest::ListPartitionReassignments(_) => ApiKey::ListPartitionReassignmentsKey,
            KafkaRequest::DescribeCluster(_) => ApiKey::DescribeClusterKey,
        }
    }

    /// The stable numeric request key, used by the per-key retry window
    /// configuration and in log fields.
    pub fn key(&self) -> i16 {
        self.api_key() as i16
    }

    /// True for requests the router sends to the cluster controller.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            KafkaRequest::CreateTopics(_)
                | KafkaRequest::DeleteTopics(_)
                | KafkaRequest::DeleteRecords(_)
                | KafkaRequest::CreatePartitions(_)
                | KafkaRequest::ElectLeaders(_)
                | KafkaRequest::AlterPartitionReassignments(_)
                | KafkaRequest::ListPartitionReassignments(_)
                | KafkaRequest::DescribeConfigs(_)
                | KafkaRequest::AlterConfigs(_)
        )
    }
}

/// A typed response, mirroring [`KafkaRequest`].
#[derive(Debug, Clone)]
pub enum KafkaResponse {
    Produce(ProduceResponse),
    Fetch(FetchResponse),
    ListOffsets(ListOffsetsResponse),
    Metadata(MetadataResponse),
    OffsetCommit(OffsetCommitResponse),
    OffsetFetch(OffsetFetchResponse),
    FindCoordinator(FindCoordinatorResponse),
    JoinGroup(JoinGroupResponse),
    Heartbeat(HeartbeatResponse),
    LeaveGroup(LeaveGroupResponse),
    SyncGroup(SyncGroupResponse),
    DescribeGroups(DescribeGroupsResponse),
    ListGroups(ListGroupsResponse),
    SaslHandshake(SaslHandshakeResponse),
    ApiVersions(ApiVersionsResponse),
    CreateTopics(CreateTopicsResponse),
    DeleteTopics(DeleteTopicsResponse),
    DeleteRecords(DeleteRecordsResponse),
    InitProducerId(InitProducerIdResponse),
    OffsetForLeaderEpoch(OffsetForLeaderEpochResponse),
    AddPartitionsToTxn(AddPartitionsToTxnResponse),
    AddOffsetsToTxn(AddOffsetsToTxnResponse),
    EndTxn(EndTxnResponse),
    TxnOffsetCommit(TxnOffsetCommitResponse),
    DescribeConfigs(DescribeConfigsResponse),
    AlterConfigs(AlterConfigsResponse),
    SaslAuthenticate(SaslAuthenticateResponse),
    CreatePartitions(CreatePartitionsResponse),
    DeleteGroups(DeleteGroupsResponse),
    ElectLeaders(ElectLeadersResponse),
    AlterPartitionReassignments(AlterPartitionReassignmentsResponse),
    ListPartitionReassignments(ListPartitionReassignmentsResponse),
    DescribeCluster(DescribeClusterResponse),
}

impl KafkaResponse {
    /// The metadata payload, if this is a metadata response.
    pub fn into_metadata(self) -> Option<MetadataResponse> {
        match self {
            KafkaResponse::Metadata(meta) => Some(meta),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keys_are_stable() {
        let req = KafkaRequest::Metadata(MetadataRequest::default());
        assert_eq!(req.key(), 3);
        let req = KafkaRequest::FindCoordinator(FindCoordinatorRequest::default());
        assert_eq!(req.key(), 10);
        let req = KafkaRequest::ListOffsets(ListOffsetsRequest::default());
        assert_eq!(req.key(), 2);
    }

    #[test]
    fn test_admin_classification() {
        assert!(KafkaRequest::CreateTopics(CreateTopicsRequest::default()).is_admin());
        assert!(KafkaRequest::ElectLeaders(ElectLeadersRequest::default()).is_admin());
        assert!(!KafkaRequest::Produce(ProduceRequest::default()).is_admin());
        assert!(!KafkaRequest::Metadata(MetadataRequest::default()).is_admin());
    }

    #[test]
    fn test_coordinator_kind_wire_value() {
        assert_eq!(CoordinatorKind::Group.as_i8(), 0);
        assert_eq!(CoordinatorKind::Txn.as_i8(), 1);
    }
}
