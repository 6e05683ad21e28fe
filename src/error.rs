//! Error types for Routeline
//!
//! This module defines the main error types used throughout Routeline and
//! provides mapping from Kafka protocol error codes so the retry layer can
//! classify broker responses.

use thiserror::Error;

/// Result type alias for Routeline operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Kafka protocol error codes
/// See: <https://kafka.apache.org/protocol.html#protocol_error_codes>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaErrorCode {
    /// No error
    None = 0,
    /// Unknown server error
    UnknownServerError = -1,
    /// The requested offset is outside the range of offsets
    OffsetOutOfRange = 1,
    /// Message failed its CRC check or is otherwise corrupt
    CorruptMessage = 2,
    /// Unknown topic or partition
    UnknownTopicOrPartition = 3,
    /// Invalid message size
    InvalidMessageSize = 4,
    /// Leader not available
    LeaderNotAvailable = 5,
    /// Not leader for partition
    NotLeaderOrFollower = 6,
    /// Request timed out
    RequestTimedOut = 7,
    /// Broker not available
    BrokerNotAvailable = 8,
    /// Replica not available
    ReplicaNotAvailable = 9,
    /// Message too large
    MessageTooLarge = 10,
    /// Stale controller epoch
    StaleControllerEpoch = 11,
    /// Offset metadata string too large
    OffsetMetadataTooLarge = 12,
    /// Broker is shutting down
    NetworkException = 13,
    /// Coordinator load in progress
    CoordinatorLoadInProgress = 14,
    /// Coordinator not available
    CoordinatorNotAvailable = 15,
    /// Not coordinator for group
    NotCoordinator = 16,
    /// Invalid topic
    InvalidTopicException = 17,
    /// Batch larger than max configured size
    RecordListTooLarge = 18,
    /// Not enough in-sync replicas
    NotEnoughReplicas = 19,
    /// Not enough in-sync replicas after append
    NotEnoughReplicasAfterAppend = 20,
    /// Invalid required acks
    InvalidRequiredAcks = 21,
    /// Illegal generation
    IllegalGeneration = 22,
    /// Inconsistent group protocol
    InconsistentGroupProtocol = 23,
    /// Invalid group id
    InvalidGroupId = 24,
    /// Unknown member
    UnknownMemberId = 25,
    /// Invalid session timeout
    InvalidSessionTimeout = 26,
    /// Rebalance in progress
    RebalanceInProgress = 27,
    /// Invalid commit offset size
    InvalidCommitOffsetSize = 28,
    /// Topic authorization failed
    TopicAuthorizationFailed = 29,
    /// Group authorization failed
    GroupAuthorizationFailed = 30,
    /// Cluster authorization failed
    ClusterAuthorizationFailed = 31,
    /// Invalid timestamp
    InvalidTimestamp = 32,
    /// Unsupported SASL mechanism
    UnsupportedSaslMechanism = 33,
    /// Illegal SASL state
    IllegalSaslState = 34,
    /// Unsupported version
    UnsupportedVersion = 35,
    /// Topic already exists
    TopicAlreadyExists = 36,
    /// Invalid partitions
    InvalidPartitions = 37,
    /// Invalid replication factor
    InvalidReplicationFactor = 38,
    /// Invalid replica assignment
    InvalidReplicaAssignment = 39,
    /// Invalid config
    InvalidConfig = 40,
    /// Not controller
    NotController = 41,
    /// Invalid request
    InvalidRequest = 42,
    /// Unsupported for message format
    UnsupportedForMessageFormat = 43,
    /// Policy violation
    PolicyViolation = 44,
    /// Out of order sequence number
    OutOfOrderSequenceNumber = 45,
    /// Duplicate sequence number
    DuplicateSequenceNumber = 46,
    /// Invalid producer epoch
    InvalidProducerEpoch = 47,
    /// Invalid txn state
    InvalidTxnState = 48,
    /// Invalid producer id mapping
    InvalidProducerIdMapping = 49,
    /// Invalid transaction timeout
    InvalidTransactionTimeout = 50,
    /// Concurrent transactions
    ConcurrentTransactions = 51,
    /// Transaction coordinator fenced
    TransactionCoordinatorFenced = 52,
    /// Transactional id authorization failed
    TransactionalIdAuthorizationFailed = 53,
    /// Security disabled
    SecurityDisabled = 54,
    /// Operation not attempted
    OperationNotAttempted = 55,
    /// Kafka storage error
    KafkaStorageError = 56,
    /// Log dir not found
    LogDirNotFound = 57,
    /// SASL authentication failed
    SaslAuthenticationFailed = 58,
    /// Unknown producer id
    UnknownProducerId = 59,
    /// Reassignment in progress
    ReassignmentInProgress = 60,
    /// Delegation token auth disabled
    DelegationTokenAuthDisabled = 61,
    /// Delegation token not found
    DelegationTokenNotFound = 62,
    /// Delegation token owner mismatch
    DelegationTokenOwnerMismatch = 63,
    /// Delegation token request not allowed
    DelegationTokenRequestNotAllowed = 64,
    /// Delegation token authorization failed
    DelegationTokenAuthorizationFailed = 65,
    /// Delegation token expired
    DelegationTokenExpired = 66,
    /// Invalid principal type
    InvalidPrincipalType = 67,
    /// Non empty group
    NonEmptyGroup = 68,
    /// Group id not found
    GroupIdNotFound = 69,
    /// Fetch session id not found
    FetchSessionIdNotFound = 70,
    /// Invalid fetch session epoch
    InvalidFetchSessionEpoch = 71,
    /// Listener not found
    ListenerNotFound = 72,
    /// Topic deletion disabled
    TopicDeletionDisabled = 73,
    /// Fenced leader epoch
    FencedLeaderEpoch = 74,
    /// Unknown leader epoch
    UnknownLeaderEpoch = 75,
    /// Unsupported compression type
    UnsupportedCompressionType = 76,
    /// Stale broker epoch
    StaleBrokerEpoch = 77,
    /// Offset not available
    OffsetNotAvailable = 78,
    /// Member id required
    MemberIdRequired = 79,
    /// Preferred leader not available
    PreferredLeaderNotAvailable = 80,
    /// Group max size reached
    GroupMaxSizeReached = 81,
    /// Fenced instance id
    FencedInstanceId = 82,
    /// Eligible leaders not available
    EligibleLeadersNotAvailable = 83,
    /// Election not needed
    ElectionNotNeeded = 84,
    /// No reassignment in progress
    NoReassignmentInProgress = 85,
    /// Group subscribed to topic
    GroupSubscribedToTopic = 86,
    /// Invalid record
    InvalidRecord = 87,
    /// Unstable offset commit
    UnstableOffsetCommit = 88,
    /// Throttling quota exceeded
    ThrottlingQuotaExceeded = 89,
    /// Producer fenced
    ProducerFenced = 90,
}

impl KafkaErrorCode {
    /// Returns true if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KafkaErrorCode::CorruptMessage
                | KafkaErrorCode::UnknownTopicOrPartition
                | KafkaErrorCode::LeaderNotAvailable
                | KafkaErrorCode::NotLeaderOrFollower
                | KafkaErrorCode::RequestTimedOut
                | KafkaErrorCode::ReplicaNotAvailable
                | KafkaErrorCode::NetworkException
                | KafkaErrorCode::CoordinatorLoadInProgress
                | KafkaErrorCode::CoordinatorNotAvailable
                | KafkaErrorCode::NotCoordinator
                | KafkaErrorCode::NotEnoughReplicas
                | KafkaErrorCode::NotEnoughReplicasAfterAppend
                | KafkaErrorCode::KafkaStorageError
                | KafkaErrorCode::FetchSessionIdNotFound
                | KafkaErrorCode::OffsetNotAvailable
                | KafkaErrorCode::PreferredLeaderNotAvailable
                | KafkaErrorCode::UnstableOffsetCommit
                | KafkaErrorCode::ThrottlingQuotaExceeded
        )
    }

    /// Convert to the i16 error code used in Kafka protocol
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Map a wire error code to a known code.
    ///
    /// Codes this build does not know (brokers newer than the client) come
    /// back as `UnknownServerError` rather than being dropped, so the retry
    /// layer still sees an error.
    pub fn from_code(code: i16) -> KafkaErrorCode {
        match code {
            0 => KafkaErrorCode::None,
            1 => KafkaErrorCode::OffsetOutOfRange,
            2 => KafkaErrorCode::CorruptMessage,
            3 => KafkaErrorCode::UnknownTopicOrPartition,
            4 => KafkaErrorCode::InvalidMessageSize,
            5 => KafkaErrorCode::LeaderNotAvailable,
            6 => KafkaErrorCode::NotLeaderOrFollower,
            7 => KafkaErrorCode::RequestTimedOut,
            8 => KafkaErrorCode::BrokerNotAvailable,
            9 => KafkaErrorCode::ReplicaNotAvailable,
            10 => KafkaErrorCode::MessageTooLarge,
            11 => KafkaErrorCode::StaleControllerEpoch,
            12 => KafkaErrorCode::OffsetMetadataTooLarge,
            13 => KafkaErrorCode::NetworkException,
            14 => KafkaErrorCode::CoordinatorLoadInProgress,
            15 => KafkaErrorCode::CoordinatorNotAvailable,
            16 => KafkaErrorCode::NotCoordinator,
            17 => KafkaErrorCode::InvalidTopicException,
            18 => KafkaErrorCode::RecordListTooLarge,
            19 => KafkaErrorCode::NotEnoughReplicas,
            20 => KafkaErrorCode::NotEnoughReplicasAfterAppend,
            21 => KafkaErrorCode::InvalidRequiredAcks,
            22 => KafkaErrorCode::IllegalGeneration,
            23 => KafkaErrorCode::InconsistentGroupProtocol,
            24 => KafkaErrorCode::InvalidGroupId,
            25 => KafkaErrorCode::UnknownMemberId,
            26 => KafkaErrorCode::InvalidSessionTimeout,
            27 => KafkaErrorCode::RebalanceInProgress,
            28 => KafkaErrorCode::InvalidCommitOffsetSize,
            29 => KafkaErrorCode::TopicAuthorizationFailed,
            30 => KafkaErrorCode::GroupAuthorizationFailed,
            31 => KafkaErrorCode::ClusterAuthorizationFailed,
            32 => KafkaErrorCode::InvalidTimestamp,
            33 => KafkaErrorCode::UnsupportedSaslMechanism,
            34 => KafkaErrorCode::IllegalSaslState,
            35 => KafkaErrorCode::UnsupportedVersion,
            36 => KafkaErrorCode::TopicAlreadyExists,
            37 => KafkaErrorCode::InvalidPartitions,
            38 => KafkaErrorCode::InvalidReplicationFactor,
            39 => KafkaErrorCode::InvalidReplicaAssignment,
            40 => KafkaErrorCode::InvalidConfig,
            41 => KafkaErrorCode::NotController,
            42 => KafkaErrorCode::InvalidRequest,
            43 => KafkaErrorCode::UnsupportedForMessageFormat,
            44 => KafkaErrorCode::PolicyViolation,
            45 => KafkaErrorCode::OutOfOrderSequenceNumber,
            46 => KafkaErrorCode::DuplicateSequenceNumber,
            47 => KafkaErrorCode::InvalidProducerEpoch,
            48 => KafkaErrorCode::InvalidTxnState,
            49 => KafkaErrorCode::InvalidProducerIdMapping,
            50 => KafkaErrorCode::InvalidTransactionTimeout,
            51 => KafkaErrorCode::ConcurrentTransactions,
            52 => KafkaErrorCode::TransactionCoordinatorFenced,
            53 => KafkaErrorCode::TransactionalIdAuthorizationFailed,
            54 => KafkaErrorCode::SecurityDisabled,
            55 => KafkaErrorCode::OperationNotAttempted,
            56 => KafkaErrorCode::KafkaStorageError,
            57 => KafkaErrorCode::LogDirNotFound,
            58 => KafkaErrorCode::SaslAuthenticationFailed,
            59 => KafkaErrorCode::UnknownProducerId,
            60 => KafkaErrorCode::ReassignmentInProgress,
            61 => KafkaErrorCode::DelegationTokenAuthDisabled,
            62 => KafkaErrorCode::DelegationTokenNotFound,
            63 => KafkaErrorCode::DelegationTokenOwnerMismatch,
            64 => KafkaErrorCode::DelegationTokenRequestNotAllowed,
            65 => KafkaErrorCode::DelegationTokenAuthorizationFailed,
            66 => KafkaErrorCode::DelegationTokenExpired,
            67 => KafkaErrorCode::InvalidPrincipalType,
            68 => KafkaErrorCode::NonEmptyGroup,
            69 => KafkaErrorCode::GroupIdNotFound,
            70 => KafkaErrorCode::FetchSessionIdNotFound,
            71 => KafkaErrorCode::InvalidFetchSessionEpoch,
            72 => KafkaErrorCode::ListenerNotFound,
            73 => KafkaErrorCode::TopicDeletionDisabled,
            74 => KafkaErrorCode::FencedLeaderEpoch,
            75 => KafkaErrorCode::UnknownLeaderEpoch,
            76 => KafkaErrorCode::UnsupportedCompressionType,
            77 => KafkaErrorCode::StaleBrokerEpoch,
            78 => KafkaErrorCode::OffsetNotAvailable,
            79 => KafkaErrorCode::MemberIdRequired,
            80 => KafkaErrorCode::PreferredLeaderNotAvailable,
            81 => KafkaErrorCode::GroupMaxSizeReached,
            82 => KafkaErrorCode::FencedInstanceId,
            83 => KafkaErrorCode::EligibleLeadersNotAvailable,
            84 => KafkaErrorCode::ElectionNotNeeded,
            85 => KafkaErrorCode::NoReassignmentInProgress,
            86 => KafkaErrorCode::GroupSubscribedToTopic,
            87 => KafkaErrorCode::InvalidRecord,
            88 => KafkaErrorCode::UnstableOffsetCommit,
            89 => KafkaErrorCode::ThrottlingQuotaExceeded,
            90 => KafkaErrorCode::ProducerFenced,
            _ => KafkaErrorCode::UnknownServerError,
        }
    }

    /// Convert a wire error code into an error, or `None` when the code
    /// signals success.
    pub fn err_for_code(code: i16) -> Option<ClientError> {
        if code == 0 {
            return None;
        }
        Some(ClientError::Kafka(Self::from_code(code)))
    }
}

/// Errors produced by the transport seam.
///
/// The connection manager behind [`crate::transport::BrokerTransport`] owns
/// dialing, SASL, and the in-flight correlation map; all the routing core
/// sees is this classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection died with the request possibly in flight.
    #[error("connection to broker is dead")]
    ConnectionDead,

    #[error("i/o failure: {0}")]
    Io(String),

    /// The per-request read or write deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The transport was stopped forever and will accept no more requests.
    #[error("transport stopped")]
    Stopped,
}

impl TransportError {
    /// Returns true if the routing core may reissue the request elsewhere.
    ///
    /// `ConnectionDead` is deliberately excluded: it retries on its own
    /// budget (`broker_conn_dead_retries`).
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Timeout(_))
    }
}

/// Main error type for Routeline
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Invalid configuration, returned only from [`crate::Client::new`].
    #[error("Configuration error: {setting}: {reason}")]
    Config { setting: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A Kafka protocol error code returned by a broker.
    #[error("Kafka error: {0:?}")]
    Kafka(KafkaErrorCode),

    /// The requested broker id is not in the registry.
    #[error("Unknown broker: {0}")]
    UnknownBroker(i32),

    /// The cluster never reported a controller.
    #[error("Unknown controller: {0}")]
    UnknownController(i32),

    /// FindCoordinator named a broker the registry does not know.
    #[error("Unknown coordinator {node_id} for {kind:?} {name:?}")]
    UnknownCoordinator {
        node_id: i32,
        name: String,
        kind: crate::protocol::CoordinatorKind,
    },

    /// The router cannot type-dispatch this request.
    #[error("Client is too old to route this request")]
    ClientTooOld,

    /// The client was closed.
    #[error("Client closed")]
    ClientClosed,

    /// The caller's context was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// Buffered records were failed because their broker went away.
    #[error("Broker connection has died")]
    BrokerDead,
}

impl ClientError {
    pub fn config(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        ClientError::Config {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error is the connection-dead sentinel, which
    /// retries on its own budget.
    pub fn is_conn_dead(&self) -> bool {
        matches!(self, ClientError::Transport(TransportError::ConnectionDead))
    }

    /// Returns true if the retry policy may reissue the request.
    pub fn is_retriable(&self) -> bool {
        match self {
            ClientError::Kafka(code) => code.is_retriable(),
            ClientError::Transport(err) => err.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kafka_error_code_as_i16() {
        assert_eq!(KafkaErrorCode::None.as_i16(), 0);
        assert_eq!(KafkaErrorCode::UnknownServerError.as_i16(), -1);
        assert_eq!(KafkaErrorCode::UnknownTopicOrPartition.as_i16(), 3);
        assert_eq!(KafkaErrorCode::NotCoordinator.as_i16(), 16);
        assert_eq!(KafkaErrorCode::ProducerFenced.as_i16(), 90);
    }

    #[test]
    fn test_from_code_roundtrip() {
        for code in [0i16, 3, 6, 14, 15, 16, 35, 56, 89] {
            assert_eq!(KafkaErrorCode::from_code(code).as_i16(), code);
        }
        // Unknown codes collapse to the unknown-server sentinel.
        assert_eq!(
            KafkaErrorCode::from_code(9999),
            KafkaErrorCode::UnknownServerError
        );
    }

    #[test]
    fn test_err_for_code() {
        assert!(KafkaErrorCode::err_for_code(0).is_none());
        match KafkaErrorCode::err_for_code(16) {
            Some(ClientError::Kafka(KafkaErrorCode::NotCoordinator)) => {}
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_is_retriable() {
        // Retriable errors
        assert!(KafkaErrorCode::NotLeaderOrFollower.is_retriable());
        assert!(KafkaErrorCode::RequestTimedOut.is_retriable());
        assert!(KafkaErrorCode::CoordinatorNotAvailable.is_retriable());
        assert!(KafkaErrorCode::NotCoordinator.is_retriable());

        // Non-retriable errors
        assert!(!KafkaErrorCode::TopicAlreadyExists.is_retriable());
        assert!(!KafkaErrorCode::InvalidRequest.is_retriable());
        assert!(!KafkaErrorCode::SaslAuthenticationFailed.is_retriable());
    }

    #[test]
    fn test_transport_classification() {
        assert!(!TransportError::ConnectionDead.is_retriable());
        assert!(TransportError::Io("reset".into()).is_retriable());
        assert!(TransportError::Timeout(std::time::Duration::from_secs(5)).is_retriable());
        assert!(!TransportError::Stopped.is_retriable());

        let err: ClientError = TransportError::ConnectionDead.into();
        assert!(err.is_conn_dead());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::config("seed_brokers", "unable to parse port in \"10.0.0.5:abc\"");
        assert!(err.to_string().contains("Configuration error"));

        let err = ClientError::UnknownBroker(42);
        assert_eq!(err.to_string(), "Unknown broker: 42");
    }
}
