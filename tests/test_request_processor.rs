//! Request processor integration tests: blocking dispatch, content
//! validation, and the error routing policy (PCP for format errors, PXP
//! for everything request-scoped).


use rexd::processor::RequestProcessor;
use rexd::protocol::messages::DataChunk;
use rexd::protocol::ParsedChunks;
use rexd::request::RequestType;
use rexd::testing::mocks::MockConnector;
use serde_json::json;
use std::sync::Arc;
use test_helpers::{chunks_for, envelope, request_data, test_config};

async fn processor_without_external_modules(
    spool: &std::path::Path,
) -> (RequestProcessor<MockConnector>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let processor = RequestProcessor::new(Arc::clone(&connector), &test_config(spool))
        .await
        .unwrap();
    (processor, connector)
}

#[tokio::test]
async fn test_internal_modules_are_loaded() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, _connector) = processor_without_external_modules(spool.path()).await;

    assert_eq!(processor.module_names(), ["echo", "ping", "status"]);
    assert!(processor.has_module("ping"));
    assert!(!processor.has_module("reverse"));
}

#[tokio::test]
async fn test_blocking_ping() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    let chunks = ParsedChunks::new(
        envelope("req-1", "S", "t1"),
        request_data("ping", "ping", json!({"sender_timestamp": "0"}), false, "t1"),
    )
    .with_debug(vec![json!({"hops": [{"server": "A"}]})]);

    processor.process_request(RequestType::Blocking, chunks).await;

    let responses = connector.get_blocking_responses().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0],
        json!({
            "transaction_id": "t1",
            "results": {"request_hops": [{"server": "A"}]}
        })
    );

    // Exactly one response, nothing else
    assert!(connector.get_pxp_errors().await.is_empty());
    assert!(connector.get_pcp_errors().await.is_empty());
    assert!(connector.get_provisional_responses().await.is_empty());
}

#[tokio::test]
async fn test_blocking_ping_missing_debug() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    let chunks = ParsedChunks::new(
        envelope("req-1", "S", "t1"),
        request_data("ping", "ping", json!({"sender_timestamp": "0"}), false, "t1"),
    );

    processor.process_request(RequestType::Blocking, chunks).await;

    let errors = connector.get_pxp_errors().await;
    assert_eq!(errors.len(), 1);
    let (request_id, transaction_id, description) = &errors[0];
    assert_eq!(request_id, "req-1");
    assert_eq!(transaction_id, "t1");
    assert!(description.contains("no debug entry"));
    assert!(connector.get_blocking_responses().await.is_empty());
}

#[tokio::test]
async fn test_blocking_echo() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    processor
        .process_request(
            RequestType::Blocking,
            chunks_for("echo", "echo", json!({"argument": "maradona"}), false, "t2"),
        )
        .await;

    let responses = connector.get_blocking_responses().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["results"], json!({"outcome": "maradona"}));
}

#[tokio::test]
async fn test_unknown_module() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    processor
        .process_request(
            RequestType::Blocking,
            chunks_for("nope", "x", json!({}), false, "t3"),
        )
        .await;

    let errors = connector.get_pxp_errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].2, "unknown module: nope");
}

#[tokio::test]
async fn test_unknown_action() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    processor
        .process_request(
            RequestType::Blocking,
            chunks_for("ping", "pong", json!({}), false, "t4"),
        )
        .await;

    let errors = connector.get_pxp_errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].2, "unknown action 'pong' for module 'ping'");
}

#[tokio::test]
async fn test_internal_module_rejects_non_blocking() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    processor
        .process_request(
            RequestType::NonBlocking,
            chunks_for("ping", "ping", json!({"sender_timestamp": "0"}), false, "t5"),
        )
        .await;

    let errors = connector.get_pxp_errors().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].2.contains("supports only blocking"));

    // No spool state for the rejected request
    assert!(!spool.path().join("t5").exists());
    assert!(connector.get_provisional_responses().await.is_empty());
    assert!(processor.mutex_table().is_empty());
}

#[tokio::test]
async fn test_invalid_input_params() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    // echo requires an "argument" param
    processor
        .process_request(
            RequestType::Blocking,
            chunks_for("echo", "echo", json!({}), false, "t6"),
        )
        .await;

    let errors = connector.get_pxp_errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].2, "invalid input for 'echo echo'");
}

#[tokio::test]
async fn test_malformed_envelope_becomes_pcp_error() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    // No transaction_id in the envelope
    let chunks = ParsedChunks::new(
        json!({"id": "req-7", "sender": "S"}),
        request_data("ping", "ping", json!({}), false, "t7"),
    );

    processor.process_request(RequestType::Blocking, chunks).await;

    let errors = connector.get_pcp_errors().await;
    assert_eq!(errors.len(), 1);
    let (id, description, endpoints) = &errors[0];
    assert_eq!(id, "req-7");
    assert!(description.contains("transaction_id"));
    assert_eq!(endpoints, &vec!["S".to_string()]);
    assert!(connector.get_pxp_errors().await.is_empty());
}

#[tokio::test]
async fn test_binary_data_chunk_becomes_pcp_error() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    let chunks = ParsedChunks {
        envelope: envelope("req-8", "S", "t8"),
        data: Some(DataChunk::Binary(vec![0xca, 0xfe])),
        debug: Vec::new(),
        num_invalid_debug: 0,
    };

    processor.process_request(RequestType::Blocking, chunks).await;

    let errors = connector.get_pcp_errors().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("binary data"));
}

#[tokio::test]
async fn test_transaction_id_mismatch_becomes_pcp_error() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    let chunks = ParsedChunks::new(
        envelope("req-9", "S", "t9"),
        request_data("ping", "ping", json!({}), false, "other"),
    );

    processor.process_request(RequestType::Blocking, chunks).await;

    assert_eq!(connector.get_pcp_errors().await.len(), 1);
}

#[tokio::test]
async fn test_status_query_for_unknown_transaction() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    processor
        .process_request(
            RequestType::Blocking,
            chunks_for(
                "status",
                "status",
                json!({"transaction_id": "never-seen"}),
                false,
                "t10",
            ),
        )
        .await;

    let errors = connector.get_pxp_errors().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].2.contains("found no results"));
}

#[tokio::test]
async fn test_connector_failure_does_not_panic() {
    let spool = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::with_failure());
    let processor = RequestProcessor::new(Arc::clone(&connector), &test_config(spool.path()))
        .await
        .unwrap();

    // Both the blocking response and the fallback PXP error fail to send;
    // the processor logs and carries on.
    processor
        .process_request(
            RequestType::Blocking,
            chunks_for("echo", "echo", json!({"argument": "x"}), false, "t-down"),
        )
        .await;

    assert!(connector.get_blocking_responses().await.is_empty());
    assert!(connector.get_pxp_errors().await.is_empty());
}

#[tokio::test]
async fn test_sequential_requests_are_independent() {
    let spool = tempfile::tempdir().unwrap();
    let (processor, connector) = processor_without_external_modules(spool.path()).await;

    for i in 0..3 {
        processor
            .process_request(
                RequestType::Blocking,
                chunks_for(
                    "echo",
                    "echo",
                    json!({"argument": i}),
                    false,
                    &format!("seq-{i}"),
                ),
            )
            .await;
    }

    let responses = connector.get_blocking_responses().await;
    assert_eq!(responses.len(), 3);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response["transaction_id"], json!(format!("seq-{i}")));
        assert_eq!(response["results"], json!({"outcome": i}));
    }
}
