//! The Transkribus and Baserow clients against a local HTTP server.
//!
//! These tests cover:
//! - 429 with `Retry-After` followed by success
//! - 5xx retried until success or exhaustion
//! - 404 mapped to not-found and skipped by the fetch stage
//! - 401/403 mapped to fatal authentication errors

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use okar_core::config::{MetadataConfig, PathsConfig, PlatformConfig};
use okar_core::fetcher::Fetcher;
use okar_core::retry::Retryable;
use okar_core::testing::fixtures;
use okar_core::{
    BaserowClient, Credentials, DocumentPlatform, ExhaustionPolicy, MetadataError, MetadataStore,
    Pipeline, PlatformError, RetryPolicy, Stage, StageKind, TranskribusClient,
};

const COLLECTION: u64 = 258178;

fn platform_config(server: &MockServer) -> PlatformConfig {
    PlatformConfig {
        base_url: server.uri(),
        collections: vec![COLLECTION],
        timeout_secs: 5,
        ..PlatformConfig::default()
    }
}

fn transkribus(server: &MockServer, attempts: u32) -> TranskribusClient {
    TranskribusClient::new(
        &platform_config(server),
        Credentials::Token("secret".to_string()),
        RetryPolicy::immediate(attempts),
    )
    .unwrap()
}

fn baserow(server: &MockServer, attempts: u32) -> BaserowClient {
    let config = MetadataConfig {
        base_url: server.uri(),
        table_id: Some(42),
        key_field: "Filename".to_string(),
        timeout_secs: 5,
        ..MetadataConfig::default()
    };
    BaserowClient::new(
        config,
        Credentials::Token("db-token".to_string()),
        RetryPolicy::immediate(attempts),
    )
    .unwrap()
}

fn fulldoc(doc_id: &str, title: &str) -> serde_json::Value {
    json!({
        "md": {"docId": doc_id.parse::<u64>().unwrap(), "title": title,
               "nrOfTranscribedLines": 40, "nrOfTranscribedPages": 2},
        "pageList": {"pages": [
            {"pageNr": 1, "imgFileName": "WSTLA_OKA_B1_1_095_1_1.jpg",
             "tsList": {"transcripts": [{"status": "IN_PROGRESS"}]}},
            {"pageNr": 2, "imgFileName": "WSTLA_OKA_B1_1_095_1_2.jpg",
             "tsList": {"transcripts": [{"status": "IN_PROGRESS"}]}}
        ]}
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_rate_limited_listing_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/list", COLLECTION)))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/list", COLLECTION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"docId": 6981834, "title": "1750_WSTLA-OKA-B1-1-095-1"}
        ])))
        .mount(&server)
        .await;

    let docs = transkribus(&server, 3).list_documents(COLLECTION).await.unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].doc_id, "6981834");
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_server_errors_are_retried_then_succeed() {
    let server = MockServer::start().await;
    let mets = fixtures::transkribus_mets("6981834", "1750_WSTLA-OKA-B1-1-095-1", 2);
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/6981834/mets", COLLECTION)))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/6981834/mets", COLLECTION)))
        .respond_with(ResponseTemplate::new(200).set_body_string(mets.clone()))
        .mount(&server)
        .await;

    let body = transkribus(&server, 3).fetch_mets(COLLECTION, "6981834").await.unwrap();

    assert_eq!(body, mets);
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/6981834/mets", COLLECTION)))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = transkribus(&server, 2)
        .fetch_mets(COLLECTION, "6981834")
        .await
        .unwrap_err();

    assert!(matches!(err, PlatformError::Http { status: 502, .. }));
    assert!(err.is_retryable());
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_missing_document_is_not_found_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/7714156/fulldoc", COLLECTION)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = transkribus(&server, 3)
        .document_overview(COLLECTION, "7714156")
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_fetch_stage_skips_missing_document_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/6981834/fulldoc", COLLECTION)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fulldoc("6981834", "1750_WSTLA-OKA-B1-1-095-1")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/6981834/mets", COLLECTION)))
        .respond_with(ResponseTemplate::new(200).set_body_string(fixtures::transkribus_mets(
            "6981834",
            "1750_WSTLA-OKA-B1-1-095-1",
            2,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/7714156/fulldoc", COLLECTION)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = Fetcher::new(
        Arc::new(transkribus(&server, 3)),
        platform_config(&server),
        ExhaustionPolicy::SkipItem,
    )
    .unwrap();
    let pipeline = Pipeline::new(PathsConfig::rooted(temp.path()))
        .with_doc_ids(["6981834".to_string(), "7714156".to_string()]);

    let report = fetcher.run(&pipeline.context(StageKind::Fetch)).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "7714156");
    let raw = temp.path().join("data/mets").join(COLLECTION.to_string());
    assert!(raw.join("6981834_mets.xml").exists());
    assert!(raw.join("6981834_image_name.xml").exists());
    assert!(!raw.join("7714156_mets.xml").exists());
}

#[tokio::test]
async fn test_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{}/list", COLLECTION)))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = transkribus(&server, 3).list_documents(COLLECTION).await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(request_count(&server).await, 1);

    let temp = TempDir::new().unwrap();
    let fetcher = Fetcher::new(
        Arc::new(transkribus(&server, 3)),
        platform_config(&server),
        ExhaustionPolicy::SkipItem,
    )
    .unwrap();
    let pipeline = Pipeline::new(PathsConfig::rooted(temp.path()));
    let err = fetcher
        .run(&pipeline.context(StageKind::Fetch))
        .await
        .unwrap_err();
    assert!(err.is_auth());
    assert!(!temp.path().join("data/mets").exists());
}

#[tokio::test]
async fn test_rejected_login_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = TranskribusClient::new(
        &platform_config(&server),
        Credentials::Password {
            username: "archiv@example.org".to_string(),
            password: "wrong".to_string(),
        },
        RetryPolicy::immediate(3),
    )
    .unwrap();

    let err = client.authenticate().await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_baserow_lookup_retries_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/database/rows/table/42/"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/database/rows/table/42/"))
        .and(query_param("user_field_names", "true"))
        .and(query_param("filter__Filename__equal", "WSTLA-OKA-B1-1-095-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "results": [{"id": 1, "Filename": "WSTLA-OKA-B1-1-095-1", "Title": " Rechnung 1750 "}]
        })))
        .mount(&server)
        .await;

    let store = baserow(&server, 3);
    store.authenticate().await.unwrap();
    let record = store.lookup("WSTLA-OKA-B1-1-095-1").await.unwrap().unwrap();

    assert_eq!(record.fields["Title"], "Rechnung 1750");
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_baserow_empty_result_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/database/rows/table/42/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "results": []})))
        .mount(&server)
        .await;

    assert!(baserow(&server, 3).lookup("WSTLA-OKA-B1-1-999-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_baserow_server_error_exhausts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/database/rows/table/42/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = baserow(&server, 2).lookup("WSTLA-OKA-B1-1-095-1").await.unwrap_err();

    assert!(matches!(err, MetadataError::Http { status: 500, .. }));
    assert!(err.is_retryable());
    assert!(!err.is_fatal());
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_baserow_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/database/rows/table/42/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = baserow(&server, 3).lookup("WSTLA-OKA-B1-1-095-1").await.unwrap_err();

    assert!(matches!(err, MetadataError::Auth(_)));
    assert!(err.is_fatal());
    assert_eq!(request_count(&server).await, 1);
}
