use std::convert::Infallible;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt, stream};

use crate::{
    dto::payment::{PaymentStatusData, QrIssueData, StatusQuery},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    let router = Router::new()
        .route("/checkout-qr", post(checkout_qr))
        .route("/status", get(status))
        .route("/webhook", post(webhook))
        .route("/events/{order_id}", get(events));

    #[cfg(feature = "sandbox")]
    let router = router.route("/simulate-paid", post(simulate_paid));

    router
}

#[utoipa::path(
    post,
    path = "/api/payment/checkout-qr",
    responses(
        (status = 201, description = "QR issued against the user's PENDING order", body = ApiResponse<QrIssueData>),
        (status = 400, description = "Empty cart or invalid payment input"),
        (status = 401, description = "Unauthenticated"),
        (status = 502, description = "Gateway failure"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn checkout_qr(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<ApiResponse<QrIssueData>>)> {
    let resp = payment_service::issue_qr(&state, &user).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/payment/status",
    params(
        ("order_id" = Option<i64>, Query, description = "Order ID (required)"),
        ("transaction_id" = Option<String>, Query, description = "Gateway transaction id, when known")
    ),
    responses(
        (status = 200, description = "Current gateway-reported status", body = ApiResponse<PaymentStatusData>),
        (status = 400, description = "Missing order_id"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn status(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<ApiResponse<PaymentStatusData>>> {
    let resp = payment_service::check_status(&state, &user, query).await?;
    Ok(Json(resp))
}

/// Gateway callback. Authenticated by HMAC over the raw bytes, not by user
/// identity; the body must reach us unparsed, which is why this handler takes
/// `Bytes`. The gateway expects a 2xx once we have processed (or safely
/// ignored) the event, otherwise it keeps retrying.
#[utoipa::path(
    post,
    path = "/api/payment/webhook",
    request_body(content = String, description = "Raw gateway callback payload"),
    responses(
        (status = 200, description = "Callback received"),
        (status = 400, description = "Invalid signature"),
    ),
    tag = "Payment"
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let signature = headers.get("x-signature").and_then(|v| v.to_str().ok());
    payment_service::confirm_webhook(&state, &body, signature).await?;
    Ok(Json(serde_json::json!({ "received": true })))
}

/// Server-push stream of order status changes. Emits an initial ping so
/// buffering intermediaries flush the response headers right away.
pub async fn events(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.events.subscribe(order_id);

    let ping = stream::once(async { Ok(Event::default().event("ping").data("\"ok\"")) });
    let updates = subscription.map(|event| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    Sse::new(ping.chain(updates)).keep_alive(KeepAlive::default())
}

#[cfg(feature = "sandbox")]
pub async fn simulate_paid(
    State(state): State<AppState>,
    Json(payload): Json<crate::dto::payment::SimulatePaidRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let transitioned = payment_service::simulate_paid(&state, payload.order_id).await?;
    Ok(Json(ApiResponse::success(
        "OK",
        serde_json::json!({ "ok": transitioned }),
        None,
    )))
}
