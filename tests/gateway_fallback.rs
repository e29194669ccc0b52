use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use axum_checkout_api::config::ScbConfig;
use axum_checkout_api::services::promptpay;
use axum_checkout_api::services::scb::{ApiVersion, GatewayError, ScbClient};
use rust_decimal::Decimal;

const MAINTENANCE_BODY: &str =
    r#"{"status":{"code":9990,"description":"Service not available"}}"#;
const INVALID_REQUEST_BODY: &str =
    r#"{"status":{"code":1101,"description":"Invalid request"}}"#;

#[derive(Clone)]
struct MockGateway {
    v2_status: StatusCode,
    v2_body: &'static str,
    v1_hits: Arc<AtomicUsize>,
}

async fn v2_create(State(mock): State<MockGateway>) -> (StatusCode, String) {
    (mock.v2_status, mock.v2_body.to_string())
}

async fn v1_create(State(mock): State<MockGateway>) -> Json<serde_json::Value> {
    mock.v1_hits.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({
        "data": {
            "qrRawData": promptpay::append_checksum("000201010212"),
            "transactionId": "tx-v1",
        }
    }))
}

/// Bind a throwaway gateway on an ephemeral port: configurable v2 endpoint,
/// always-succeeding v1 endpoint, and a counter for v1 hits.
async fn spawn_gateway(
    v2_status: StatusCode,
    v2_body: &'static str,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let v1_hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/v2/payment/qrcode/create", post(v2_create))
        .route("/v1/payment/qrcode/create", post(v1_create))
        .with_state(MockGateway {
            v2_status,
            v2_body,
            v1_hits: v1_hits.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock gateway");
    let addr = listener.local_addr().expect("mock gateway addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock gateway");
    });
    (addr, v1_hits)
}

fn client_for(addr: SocketAddr) -> ScbClient {
    ScbClient::new(ScbConfig {
        base_url: format!("http://{addr}"),
        api_key: "test-key".into(),
        api_secret: "test-secret".into(),
        client_id: "test-key".into(),
        client_secret: "test-secret".into(),
        biller_id: "011556677889900".into(),
        ref3_prefix: "SHP".into(),
        callback_url: None,
        webhook_secret: "test-webhook-secret".into(),
    })
    .expect("build gateway client")
}

#[tokio::test]
async fn maintenance_on_v2_falls_back_to_v1() {
    let (addr, v1_hits) = spawn_gateway(StatusCode::SERVICE_UNAVAILABLE, MAINTENANCE_BODY).await;
    let client = client_for(addr);

    let amount: Decimal = "100.00".parse().unwrap();
    let created = client
        .create_qr_with_fallback("token", amount, "ORD0000000001", "1", "WEB")
        .await
        .expect("fallback must produce a QR");

    assert_eq!(created.version, ApiVersion::V1);
    assert!(created.qr_raw_data.is_some());
    assert!(created.qr_image_url.is_none());
    assert_eq!(created.transaction_id.as_deref(), Some("tx-v1"));
    assert_eq!(v1_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_maintenance_errors_propagate_without_retry() {
    let (addr, v1_hits) = spawn_gateway(StatusCode::BAD_REQUEST, INVALID_REQUEST_BODY).await;
    let client = client_for(addr);

    let amount: Decimal = "100.00".parse().unwrap();
    let result = client
        .create_qr_with_fallback("token", amount, "ORD0000000001", "1", "WEB")
        .await;

    assert!(matches!(
        result,
        Err(GatewayError::Request { status: 400, .. })
    ));
    assert_eq!(v1_hits.load(Ordering::SeqCst), 0, "v1 must not be attempted");
}
