#[path = "support/mod.rs"]
mod support;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE};
use serde_json::{Value, json};
use support::auth::TestAuth;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use vault_bridge_broker::telemetry::CORRELATION_ID_HEADER;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn drain(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("background task did not finish")
            .expect("background task panicked");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn operations_are_counted_in_influx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(query_param("db", "bridge"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let auth = TestAuth::new();
    let mut config = auth.config();
    config.influx.enabled = true;
    config.influx.url = server.uri();
    config.influx.database = "bridge".into();
    config.influx.flush_interval_ms = 20;

    let (state, background) = vault_bridge_broker::build_state(&config).await.unwrap();
    assert_eq!(background.len(), 1);
    let app = vault_bridge_broker::http::router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/key/tenants/rolex/f1/alpha")
        .header(AUTHORIZATION, format!("Bearer {}", auth.token("rolex", "f1")))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"key": "s3cr3t"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    drop(app);
    drain(background).await;

    let body: String = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| String::from_utf8_lossy(&request.body).into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(
        body.contains("vault_counter,method=writekey,error=false count=1 "),
        "{body}"
    );
    assert!(
        body.contains("vault_histogram,method=writekey,error=false value="),
        "{body}"
    );
    assert!(!body.contains("s3cr3t"));
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_are_forwarded_to_the_alert_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let auth = TestAuth::new();
    let mut config = auth.config();
    config.alerting.webhook_url = Some(format!("{}/alerts", server.uri()));
    config.alerting.environment = Some("staging".into());

    let (state, background) = vault_bridge_broker::build_state(&config).await.unwrap();
    let app = vault_bridge_broker::http::router(state);

    let request = Request::builder()
        .method("GET")
        .uri("/key/tenants/rolex/f1/alpha")
        .header(AUTHORIZATION, format!("Bearer {}", auth.anonymous_token()))
        .header(CORRELATION_ID_HEADER, "corr-alert")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ok = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(ok).await.unwrap();

    drop(app);
    drain(background).await;

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let event: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(event["code"], "authorization");
    assert_eq!(event["environment"], "staging");
    assert_eq!(event["tags"]["method"], "readkey");
    assert_eq!(event["tags"]["path"], "tenants/rolex/f1/alpha");
    assert_eq!(event["tags"]["correlation_id"], "corr-alert");
}
