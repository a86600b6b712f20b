mod common;

use common::collection::{order_document, order_store, orders_binding, webhook_endpoint};
use std::time::Duration;

use futures::stream;
use materialize::binding::Binding;
use materialize::concurrency::shutdown::create_shutdown_channel;
use materialize::destination::{Adapter, Destination, OpenOptions, apply};
use materialize::error::ErrorKind;
use materialize::pipeline::MaterializationPipeline;
use materialize::types::{ChangeEvent, Checkpoint};
use materialize_config::shared::EndpointConfig;
use materialize_telemetry::init_test_tracing;
use serde_json::{Value, json};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer, paths: &[&str]) -> (EndpointConfig, Vec<Binding>) {
    let endpoint = webhook_endpoint(&format!("{}/hooks/", server.uri()));
    let bindings = paths
        .iter()
        .enumerate()
        .map(|(index, path)| orders_binding(&endpoint, index, json!({"relativePath": path})))
        .collect();

    (endpoint, bindings)
}

fn array_body(documents: &[Value]) -> String {
    let documents = documents
        .iter()
        .map(|document| serde_json::to_string(document).unwrap())
        .collect::<Vec<_>>();

    format!("[\n{}\n]", documents.join(",\n"))
}

async fn open(endpoint: &EndpointConfig, bindings: &[Binding]) -> Destination {
    let (destination, checkpoint) =
        Destination::open(endpoint, bindings, &OpenOptions::new("acme/orders-hook"))
            .await
            .unwrap();
    assert_eq!(checkpoint, None);

    destination
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_is_posted_as_one_json_array() {
    init_test_tracing();
    let server = MockServer::start().await;
    let (endpoint, bindings) = setup(&server, &["orders"]);

    let documents = vec![
        order_document(1, true, 1.0, "a"),
        order_document(2, false, 2.0, "b"),
        order_document(3, true, 3.0, "c"),
    ];
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .and(header("content-type", "application/json"))
        .and(body_string(array_body(&documents)))
        .respond_with(ResponseTemplate::new(200))
        .named("orders webhook")
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(apply(&endpoint, &bindings).await.unwrap(), "");

    let mut destination = open(&endpoint, &bindings).await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    destination
        .prepare(&Checkpoint::from(b"C1".as_slice()))
        .unwrap();
    destination
        .store(
            documents
                .iter()
                .map(|document| order_store(&bindings[0], document.clone(), false))
                .collect(),
        )
        .unwrap();
    destination.commit(shutdown_rx.clone()).await.unwrap();

    // The body was consumed, so the next transaction starts clean.
    destination
        .prepare(&Checkpoint::from(b"C2".as_slice()))
        .unwrap();
    destination.commit(shutdown_rx).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_requests_are_retried_until_accepted() {
    init_test_tracing();
    let server = MockServer::start().await;
    let (endpoint, bindings) = setup(&server, &["orders"]);

    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .named("failing webhook")
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .named("recovered webhook")
        .expect(1)
        .mount(&server)
        .await;

    let mut destination = open(&endpoint, &bindings).await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    destination
        .prepare(&Checkpoint::from(b"C1".as_slice()))
        .unwrap();
    destination
        .store(vec![order_store(
            &bindings[0],
            order_document(1, true, 1.0, "a"),
            false,
        )])
        .unwrap();
    destination.commit(shutdown_rx).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn bindings_without_documents_are_not_posted() {
    init_test_tracing();
    let server = MockServer::start().await;
    let (endpoint, bindings) = setup(&server, &["orders", "refunds"]);

    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/refunds"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut destination = open(&endpoint, &bindings).await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    destination
        .prepare(&Checkpoint::from(b"C1".as_slice()))
        .unwrap();
    destination
        .store(vec![order_store(
            &bindings[1],
            order_document(7, false, 7.0, "refund"),
            false,
        )])
        .unwrap();
    destination.commit(shutdown_rx).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_retrying_commit() {
    init_test_tracing();
    let server = MockServer::start().await;
    let (endpoint, bindings) = setup(&server, &["orders"]);

    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut destination = open(&endpoint, &bindings).await;
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    destination
        .prepare(&Checkpoint::from(b"C1".as_slice()))
        .unwrap();
    destination
        .store(vec![order_store(
            &bindings[0],
            order_document(1, true, 1.0, "a"),
            false,
        )])
        .unwrap();
    shutdown_tx.shutdown();

    let err = destination.commit(shutdown_rx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);

    // The canceled body is discarded.
    destination
        .prepare(&Checkpoint::from(b"C2".as_slice()))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_hanging_request() {
    init_test_tracing();
    let server = MockServer::start().await;
    let (endpoint, bindings) = setup(&server, &["orders"]);

    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let mut destination = open(&endpoint, &bindings).await;
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    destination
        .prepare(&Checkpoint::from(b"C1".as_slice()))
        .unwrap();
    destination
        .store(vec![order_store(
            &bindings[0],
            order_document(1, true, 1.0, "a"),
            false,
        )])
        .unwrap();

    let shutdown = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.shutdown();
    });

    let err = tokio::time::timeout(Duration::from_secs(2), destination.commit(shutdown_rx))
        .await
        .expect("commit kept waiting on the endpoint after shutdown")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    shutdown.await.unwrap();

    destination
        .prepare(&Checkpoint::from(b"C2".as_slice()))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_posts_every_transaction() {
    init_test_tracing();
    let server = MockServer::start().await;
    let (endpoint, bindings) = setup(&server, &["orders"]);

    let first = vec![
        order_document(1, true, 1.0, "a"),
        order_document(2, true, 2.0, "b"),
    ];
    let second = vec![order_document(1, true, 3.0, "a2")];
    for documents in [&first, &second] {
        Mock::given(method("POST"))
            .and(path("/hooks/orders"))
            .and(body_string(array_body(documents)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut events = Vec::new();
    for document in &first {
        events.push(ChangeEvent::from_document(&bindings[0], document.clone()));
    }
    events.push(Ok(ChangeEvent::Commit {
        checkpoint: Checkpoint::from(b"C1".as_slice()),
    }));
    for document in &second {
        events.push(ChangeEvent::from_document(&bindings[0], document.clone()));
    }
    events.push(Ok(ChangeEvent::Commit {
        checkpoint: Checkpoint::from(b"C2".as_slice()),
    }));

    let destination = open(&endpoint, &bindings).await;
    let pipeline = MaterializationPipeline::new(destination, bindings);
    let stats = pipeline.run(stream::iter(events)).await.unwrap();

    assert_eq!(stats.transactions, 2);
    assert_eq!(stats.documents, 3);
}
