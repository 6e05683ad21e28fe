//! Fan-out routing: ListOffsets split by partition leader, merge and
//! partial-failure behavior, and whole-cluster ListGroups.


use std::time::Duration;

use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::list_groups_response::ListedGroup;
use kafka_protocol::messages::{
    ListGroupsRequest, ListGroupsResponse, ListOffsetsRequest, ListOffsetsResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use routeline::testing::{metadata_response, metadata_topic, MockCluster};
use routeline::{ClientError, KafkaErrorCode, KafkaRequest, KafkaResponse, TransportError};
use routing_test_helpers::{client_with, ctx};

fn topic_name(name: &str) -> TopicName {
    TopicName::from(StrBytes::from_string(name.to_string()))
}

fn list_offsets_request(topic: &str, partitions: &[i32]) -> ListOffsetsRequest {
    ListOffsetsRequest::default().with_topics(vec![ListOffsetsTopic::default()
        .with_name(topic_name(topic))
        .with_partitions(
            partitions
                .iter()
                .map(|&p| {
                    ListOffsetsPartition::default()
                        .with_partition_index(p)
                        .with_timestamp(-1)
                })
                .collect(),
        )])
}

fn list_offsets_reply(topic: &str, partitions: &[(i32, i64)]) -> ListOffsetsResponse {
    ListOffsetsResponse::default().with_topics(vec![ListOffsetsTopicResponse::default()
        .with_name(topic_name(topic))
        .with_partitions(
            partitions
                .iter()
                .map(|&(p, offset)| {
                    ListOffsetsPartitionResponse::default()
                        .with_partition_index(p)
                        .with_offset(offset)
                })
                .collect(),
        )])
}

/// Script a two-broker cluster with topic `t` led by broker 1 (partition 0)
/// and broker 2 (partition 1).
fn two_leader_cluster(cluster: &MockCluster) {
    cluster.on_any(|req| match req {
        KafkaRequest::Metadata(_) => Ok(KafkaResponse::Metadata(metadata_response(
            &[(1, "b1", 9092), (2, "b2", 9092)],
            1,
            &[metadata_topic("t", &[(0, 1), (1, 2)])],
        ))),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    cluster.on_addr("b1:9092", |req| match req {
        KafkaRequest::ListOffsets(_) => {
            Ok(KafkaResponse::ListOffsets(list_offsets_reply("t", &[(0, 100)])))
        }
        _ => Err(TransportError::Io("unscripted".into())),
    });
    cluster.on_addr("b2:9092", |req| match req {
        KafkaRequest::ListOffsets(_) => {
            Ok(KafkaResponse::ListOffsets(list_offsets_reply("t", &[(1, 200)])))
        }
        _ => Err(TransportError::Io("unscripted".into())),
    });
}

#[tokio::test]
async fn test_list_offsets_splits_by_leader_and_merges() {
    let cluster = MockCluster::new();
    two_leader_cluster(&cluster);
    let client = client_with(&cluster, &["seed:9092"]);

    let resp = client
        .request(&ctx(), KafkaRequest::ListOffsets(list_offsets_request("t", &[0, 1])))
        .await
        .expect("list offsets");

    let KafkaResponse::ListOffsets(resp) = resp else {
        panic!("expected ListOffsets response");
    };
    assert_eq!(resp.topics.len(), 1);
    let mut partitions = resp.topics[0].partitions.clone();
    partitions.sort_by_key(|p| p.partition_index);
    assert_eq!(partitions.len(), 2);
    assert_eq!((partitions[0].partition_index, partitions[0].offset), (0, 100));
    assert_eq!((partitions[1].partition_index, partitions[1].offset), (1, 200));

    // one sub-request per leader
    assert_eq!(cluster.requests_to("b1:9092"), vec![2]);
    assert_eq!(cluster.requests_to("b2:9092"), vec![2]);

    client.close().await;
}

#[tokio::test]
async fn test_list_offsets_synthesizes_unknown_partition_errors() {
    let cluster = MockCluster::new();
    two_leader_cluster(&cluster);
    let client = client_with(&cluster, &["seed:9092"]);

    let resp = client
        .request(
            &ctx(),
            KafkaRequest::ListOffsets(list_offsets_request("t", &[0, 5])),
        )
        .await
        .expect("list offsets");

    let KafkaResponse::ListOffsets(resp) = resp else {
        panic!("expected ListOffsets response");
    };
    let mut partitions = resp.topics[0].partitions.clone();
    partitions.sort_by_key(|p| p.partition_index);
    assert_eq!(partitions[0].error_code, 0);
    assert_eq!(
        partitions[1].error_code,
        KafkaErrorCode::UnknownTopicOrPartition.as_i16()
    );

    client.close().await;
}

#[tokio::test]
async fn test_list_offsets_partial_failure_returns_partial_response() {
    let cluster = MockCluster::new();
    two_leader_cluster(&cluster);
    // broker 2 fails terminally; its partitions simply go missing
    cluster.on_addr("b2:9092", |_| Err(TransportError::Stopped));
    let client = client_with(&cluster, &["seed:9092"]);

    let resp = client
        .request(&ctx(), KafkaRequest::ListOffsets(list_offsets_request("t", &[0, 1])))
        .await
        .expect("partial success is success");

    let KafkaResponse::ListOffsets(resp) = resp else {
        panic!("expected ListOffsets response");
    };
    let partitions = &resp.topics[0].partitions;
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].partition_index, 0);

    client.close().await;
}

#[tokio::test]
async fn test_list_offsets_all_failures_return_first_error() {
    let cluster = MockCluster::new();
    two_leader_cluster(&cluster);
    cluster.on_addr("b1:9092", |_| Err(TransportError::Stopped));
    cluster.on_addr("b2:9092", |_| Err(TransportError::Stopped));
    let client = client_with(&cluster, &["seed:9092"]);

    let err = client
        .request(&ctx(), KafkaRequest::ListOffsets(list_offsets_request("t", &[0, 1])))
        .await
        .expect_err("all sub-requests failed");
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::Stopped)
    ));

    client.close().await;
}

#[tokio::test]
async fn test_list_offsets_unloadable_topic_respects_cancellation() {
    let cluster = MockCluster::new();
    // metadata never learns about the requested topic
    cluster.on_any(|req| match req {
        KafkaRequest::Metadata(_) => Ok(KafkaResponse::Metadata(metadata_response(
            &[(1, "b1", 9092)],
            1,
            &[],
        ))),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    let client = client_with(&cluster, &["seed:9092"]);

    let cancel = ctx();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        client.request(
            &cancel,
            KafkaRequest::ListOffsets(list_offsets_request("ghost", &[0])),
        ),
    )
    .await
    .expect("must return promptly on cancellation")
    .expect_err("cancelled");
    assert!(matches!(err, ClientError::Cancelled));

    client.close().await;
}

#[tokio::test]
async fn test_list_groups_fans_out_to_real_brokers_only() {
    let cluster = MockCluster::new();
    cluster.on_any(|req| match req {
        KafkaRequest::Metadata(_) => Ok(KafkaResponse::Metadata(metadata_response(
            &[(1, "b1", 9092), (2, "b2", 9092)],
            1,
            &[],
        ))),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    cluster.on_addr("b1:9092", |req| match req {
        KafkaRequest::ListGroups(_) => Ok(KafkaResponse::ListGroups(
            ListGroupsResponse::default().with_groups(vec![
                ListedGroup::default().with_group_id(kafka_protocol::messages::GroupId::from(
                    StrBytes::from_static_str("a"),
                )),
            ]),
        )),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    cluster.on_addr("b2:9092", |req| match req {
        KafkaRequest::ListGroups(_) => Ok(KafkaResponse::ListGroups(
            ListGroupsResponse::default().with_groups(vec![
                ListedGroup::default().with_group_id(kafka_protocol::messages::GroupId::from(
                    StrBytes::from_static_str("b"),
                )),
            ]),
        )),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    let client = client_with(&cluster, &["seed:9092"]);

    let resp = client
        .request(&ctx(), KafkaRequest::ListGroups(ListGroupsRequest::default()))
        .await
        .expect("list groups");

    let KafkaResponse::ListGroups(merged) = resp else {
        panic!("expected ListGroups response");
    };
    assert_eq!(merged.groups.len(), 2);

    // seeds are skipped in the fan-out
    assert!(cluster.requests_to("seed:9092").iter().all(|key| *key != 16));

    client.close().await;
}

#[tokio::test]
async fn test_list_groups_partial_failure_keeps_responding_brokers() {
    let cluster = MockCluster::new();
    cluster.on_any(|req| match req {
        KafkaRequest::Metadata(_) => Ok(KafkaResponse::Metadata(metadata_response(
            &[(1, "b1", 9092), (2, "b2", 9092)],
            1,
            &[],
        ))),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    cluster.on_addr("b1:9092", |req| match req {
        KafkaRequest::ListGroups(_) => Ok(KafkaResponse::ListGroups(
            ListGroupsResponse::default().with_groups(vec![ListedGroup::default()]),
        )),
        _ => Err(TransportError::Io("unscripted".into())),
    });
    cluster.on_addr("b2:9092", |_| Err(TransportError::Stopped));
    let client = client_with(&cluster, &["seed:9092"]);

    let resp = client
        .request(&ctx(), KafkaRequest::ListGroups(ListGroupsRequest::default()))
        .await
        .expect("partial list groups");
    let KafkaResponse::ListGroups(merged) = resp else {
        panic!("expected ListGroups response");
    };
    assert_eq!(merged.groups.len(), 1);

    client.close().await;
}
