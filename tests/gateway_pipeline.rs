//! End-to-end tests of the guard chain on the public surface.

mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};
use watchgate::config::GatewayConfig;

/// Base config for pipeline tests: generous rate limit, guards toggled per
/// test so each one exercises a single stage.
fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.rate_limit.max_requests = 1_000;
    config.csrf.enabled = false;
    config
}

#[tokio::test]
async fn sixth_request_in_window_is_rate_limited() {
    let mut config = base_config();
    config.rate_limit.max_requests = 5;
    config.rate_limit.window_ms = 60_000;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    for i in 0..5 {
        let res = client.get(gateway.url("/api/entries")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK, "request {i} should pass");
    }

    let res = client.get(gateway.url("/api/entries")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after <= 60);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate limit exceeded");
    assert!(body["retry_after_ms"].as_u64().unwrap() <= 60_000);
}

#[tokio::test]
async fn progressive_blocks_report_violation_counts() {
    let mut config = base_config();
    config.rate_limit.strategy = watchgate::config::RateLimitStrategy::Progressive;
    config.rate_limit.max_requests = 2;
    config.rate_limit.window_ms = 60_000;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/api/entries")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client.get(gateway.url("/api/entries")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["violations"], json!(1));
}

#[tokio::test]
async fn csrf_token_lifecycle_over_http() {
    let mut config = base_config();
    config.csrf.enabled = true;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    // A mutating request without a token is rejected.
    let res = client
        .post(gateway.url("/api/entries"))
        .header("X-Session-Id", "session-A")
        .json(&json!({ "note": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Token issuance is itself CSRF-exempt.
    let res = client
        .get(gateway.url("/csrf/token"))
        .header("X-Session-Id", "session-A")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let token = body["csrf_token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    // The issued token admits the request; a wrong one does not.
    let res = client
        .post(gateway.url("/api/entries"))
        .header("X-Session-Id", "session-A")
        .header("X-CSRF-Token", &token)
        .json(&json!({ "note": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(gateway.url("/api/entries"))
        .header("X-Session-Id", "session-A")
        .header("X-CSRF-Token", "wrong-token")
        .json(&json!({ "note": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "CSRF validation failed");

    // Safe methods bypass validation entirely.
    let res = client.get(gateway.url("/api/entries")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn injection_attempts_are_rejected_with_field_detail() {
    let gateway = common::start_gateway(base_config()).await;
    let client = common::client();

    let res = client
        .post(gateway.url("/api/entries"))
        .json(&json!({ "comment": "admin' OR '1'='1'" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation failed");
    let fields = body["fields"].as_array().unwrap();
    assert!(fields
        .iter()
        .any(|f| f["message"].as_str().unwrap().contains("SQL injection")));

    let res = client
        .post(gateway.url("/api/entries"))
        .json(&json!({ "bio": "<script>alert(1)</script>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert!(body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["message"].as_str().unwrap().contains("XSS")));
}

#[tokio::test]
async fn accepted_bodies_are_sanitized_before_the_handler() {
    let gateway = common::start_gateway(base_config()).await;
    let client = common::client();

    // The echo handler returns what it received, so the response shows the
    // sanitized rewrite.
    let res = client
        .post(gateway.url("/api/entries"))
        .json(&json!({ "note": "  a <b>quiet</b> day  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["note"], "a &lt;b&gt;quiet&lt;/b&gt; day");
}

#[tokio::test]
async fn field_rules_reject_out_of_shape_input() {
    let mut config = base_config();
    config.validation.rules.push(watchgate::config::schema::FieldRuleConfig {
        field: "email".into(),
        kind: "email".into(),
        required: true,
        min_len: None,
        max_len: None,
        min: None,
        max: None,
        pattern: None,
        one_of: None,
        sanitize: true,
        allow_html: false,
    });
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let res = client
        .post(gateway.url("/api/signup"))
        .json(&json!({ "email": "not-an-email" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // A valid address passes and is normalized to lowercase.
    let res = client
        .post(gateway.url("/api/signup"))
        .json(&json!({ "email": "User@Example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["email"], "user@example.com");
}

#[tokio::test]
async fn clean_upload_is_scanned_and_persisted() {
    let gateway = common::start_gateway(base_config()).await;
    let client = common::client();

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"Dear diary, a calm day.".to_vec())
            .file_name("note.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let res = client
        .post(gateway.url("/uploads"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "stored");
    assert_eq!(body["files"][0]["file_name"], "note.txt");

    let metrics = gateway.state.orchestrator.metrics();
    assert_eq!(metrics.uploads.saved_files, 1);
    assert_eq!(metrics.uploads.threats_found, 0);
}

#[tokio::test]
async fn executable_upload_is_quarantined() {
    let gateway = common::start_gateway(base_config()).await;
    let client = common::client();

    let mut payload = b"MZ".to_vec();
    payload.extend_from_slice(b"this pretends to be a text file");
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(payload)
            .file_name("innocent.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let res = client
        .post(gateway.url("/uploads"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upload rejected");
    assert!(body["threats"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t.as_str().unwrap().contains("dos_executable")));

    // Blob and sidecar both land in the quarantine area.
    let entries = gateway
        .state
        .orchestrator
        .uploads
        .quarantine_store()
        .list()
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].original_name, "innocent.txt");
    let quarantine_dir = gateway.data_dir.path().join("quarantine");
    assert!(quarantine_dir.join(&entries[0].id).exists());
    assert!(quarantine_dir.join(format!("{}.json", entries[0].id)).exists());

    assert_eq!(gateway.state.orchestrator.metrics().uploads.quarantined_files, 1);
}

#[tokio::test]
async fn oversized_upload_is_rejected_regardless_of_content() {
    let mut config = base_config();
    config.upload.max_file_size = 16;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(vec![b'a'; 64])
            .file_name("big.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let res = client
        .post(gateway.url("/uploads"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert!(body["threats"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t.as_str().unwrap().contains("maximum size")));
}

#[tokio::test]
async fn rejections_surface_in_the_event_log() {
    let gateway = common::start_gateway(base_config()).await;
    let client = common::client();

    let res = client
        .post(gateway.url("/api/entries"))
        .json(&json!({ "q": "1; DROP TABLE users" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let events = gateway
        .state
        .orchestrator
        .events(&watchgate::security::events::EventFilter::default());
    assert!(!events.is_empty());
    assert_eq!(events[0].source, "127.0.0.1");
    assert_eq!(events[0].endpoint.as_deref(), Some("/api/entries"));
}

#[tokio::test]
async fn health_endpoint_reports_overall_status() {
    let gateway = common::start_gateway(base_config()).await;
    let client = common::client();

    let res = client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["overall"], "healthy");
    assert_eq!(body["rate_limit"], "healthy");
}
