use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder};
use serde_json::Value;

use crate::{
    audit::log_audit,
    dto::payment::{PaymentStatusData, QrIssueData, StatusQuery},
    entity::orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
    error::{AppError, AppResult},
    events::OrderEvent,
    middleware::auth::AuthUser,
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    services::{order_service, scb},
    state::AppState,
};

/// Fixed ref3 channel tag appended to the configured prefix.
const CHANNEL_TAG: &str = "WEB";

/// How long a freshly issued QR is presented as valid. This local deadline is
/// what the UI enforces; the gateway's own expiry is ignored.
const QR_VALIDITY_MINUTES: i64 = 15;

/// Reuse the newest PENDING order if the user has one, otherwise run checkout.
/// Revisiting the payment screen before paying must never mint a second order
/// from the same cart.
pub async fn ensure_pending_order(state: &AppState, user: &AuthUser) -> AppResult<OrderModel> {
    let existing = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Status.eq(OrderStatus::Pending.as_str())),
        )
        .order_by_desc(OrderCol::CreatedAt)
        .one(&state.orm)
        .await?;

    if let Some(order) = existing {
        return Ok(order);
    }

    let (order, _) = order_service::checkout_order(state, user).await?;
    Ok(order)
}

/// Issue a payment QR scoped to the user's PENDING order. The amount always
/// comes from the order's fixed grand total, never recomputed from the cart.
pub async fn issue_qr(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<QrIssueData>> {
    let order = ensure_pending_order(state, user).await?;

    let access_token = state.gateway.get_access_token().await?;
    let order_ref = scb::make_order_ref(order.id);
    let created = state
        .gateway
        .create_qr_with_fallback(
            &access_token,
            order.grand_total,
            &order_ref,
            &user.user_id.to_string(),
            CHANNEL_TAG,
        )
        .await?;

    // The QR is already in the user's hands at this point; failing to store
    // the correlation ids must not fail the request.
    let persisted = sqlx::query(
        "UPDATE orders SET scb_transaction_id = $2, scb_qr_id = $3, updated_at = now() WHERE id = $1",
    )
    .bind(order.id)
    .bind(&created.transaction_id)
    .bind(&created.qr_id)
    .execute(&state.pool)
    .await;
    if let Err(err) = persisted {
        tracing::warn!(error = %err, order_id = order.id, "failed to persist gateway correlation ids");
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "qr_issued",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "transaction_id": created.transaction_id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let data = QrIssueData {
        order_id: order.id,
        amount: scb::format_amount(order.grand_total)?,
        qr_image_url: created.qr_image_url,
        qr_raw_data: created.qr_raw_data,
        transaction_id: created.transaction_id,
        expires_at: Utc::now() + Duration::minutes(QR_VALIDITY_MINUTES),
    };

    Ok(ApiResponse::success("QR issued", data, Some(Meta::empty())))
}

/// Webhook confirmation path. Signature is verified over the exact raw bytes
/// before anything is parsed; an invalid signature changes no state.
pub async fn confirm_webhook(
    state: &AppState,
    raw_body: &[u8],
    signature: Option<&str>,
) -> AppResult<()> {
    if !state.gateway.verify_signature(raw_body, signature) {
        return Err(AppError::InvalidSignature);
    }

    // Once the signature checks out the callback is acknowledged no matter
    // what the body holds; a non-2xx would only make the gateway retry the
    // same payload.
    let payload: Value = match serde_json::from_slice(raw_body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed webhook payload");
            return Ok(());
        }
    };

    match extract_confirmation(&payload) {
        Some((order_id, status)) if is_success_status(&status) => {
            mark_paid(state, order_id).await?;
        }
        other => {
            tracing::info!(?other, "webhook carried no success confirmation");
        }
    }

    Ok(())
}

/// Polling fallback to the webhook. Symmetric side effects: whichever path
/// confirms first wins, the other becomes a no-op.
pub async fn check_status(
    state: &AppState,
    user: &AuthUser,
    query: StatusQuery,
) -> AppResult<ApiResponse<PaymentStatusData>> {
    let order_id = query
        .order_id
        .ok_or_else(|| AppError::BadRequest("Missing order_id".into()))?;

    // The caller picks the inquiry arguments, so make sure the order they
    // would flip is actually theirs before talking to the gateway.
    let owned = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .one(&state.orm)
        .await?;
    if owned.is_none() {
        return Err(AppError::NotFound);
    }

    let access_token = state.gateway.get_access_token().await?;

    let inquiry = match query.transaction_id.as_deref() {
        Some(transaction_id) => {
            state
                .gateway
                .inquiry_by_transaction(&access_token, transaction_id)
                .await
        }
        None => {
            state
                .gateway
                .inquiry_by_reference(
                    &access_token,
                    &scb::make_order_ref(order_id),
                    &user.user_id.to_string(),
                )
                .await
        }
    };

    let status = match inquiry {
        Ok(status) => status,
        // The payment may still be in flight; gateway downtime means
        // "don't know yet", not failure. Keep the client polling.
        Err(err) if err.is_maintenance() => scb::TransactionStatus {
            status: OrderStatus::Pending.as_str().into(),
            raw: serde_json::json!({ "note": "gateway maintenance" }),
        },
        Err(err) => return Err(err.into()),
    };

    if status.is_success() {
        mark_paid(state, order_id).await?;
    }

    Ok(ApiResponse::success(
        "OK",
        PaymentStatusData {
            status: status.status,
            raw: status.raw,
        },
        Some(Meta::empty()),
    ))
}

/// Idempotent PENDING -> PAID transition. The conditional update is the
/// serialization point: concurrent webhook and polling confirmations race on
/// it safely, and only the winner performs the side effects. Returns whether
/// this call moved the order.
pub async fn mark_paid(state: &AppState, order_id: i64) -> AppResult<bool> {
    let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(&state.pool)
        .await?;
    let Some(order) = order else {
        tracing::warn!(order_id, "payment confirmation for unknown order");
        return Ok(false);
    };

    let updated = sqlx::query(
        "UPDATE orders SET status = 'PAID', updated_at = now() WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(order_id)
    .execute(&state.pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    // Leftover cart lines from a pre-order flow; normally checkout already
    // consumed them.
    sqlx::query("DELETE FROM cart_items WHERE cart_id IN (SELECT id FROM carts WHERE user_id = $1)")
        .bind(order.user_id)
        .execute(&state.pool)
        .await?;

    state.events.publish(
        order_id,
        OrderEvent {
            order_id,
            status: OrderStatus::Paid.as_str().into(),
        },
    );

    if let Err(err) = log_audit(
        &state.pool,
        Some(order.user_id),
        "order_paid",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(true)
}

/// Sandbox-only manual override; compiled out of production builds.
#[cfg(feature = "sandbox")]
pub async fn simulate_paid(state: &AppState, order_id: i64) -> AppResult<bool> {
    mark_paid(state, order_id).await
}

/// Pulls `(order id, status)` out of a webhook payload, whether the gateway
/// nested it under `data` or not, and whatever it called the reference field.
fn extract_confirmation(payload: &Value) -> Option<(i64, String)> {
    let data = payload.get("data").unwrap_or(payload);

    let reference = data.get("ref1").or_else(|| data.get("reference1"))?;
    let order_id = match reference {
        Value::String(s) => scb::parse_order_ref(s)?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };

    let status = data
        .get("status")
        .or_else(|| data.get("transactionStatus"))
        .and_then(Value::as_str)?
        .to_uppercase();

    Some((order_id, status))
}

fn is_success_status(status: &str) -> bool {
    status == "PAID" || status == "SUCCESS"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_is_extracted_from_enveloped_payloads() {
        let payload = serde_json::json!({
            "data": { "ref1": "ORD0000000042", "status": "paid" }
        });
        assert_eq!(extract_confirmation(&payload), Some((42, "PAID".into())));
    }

    #[test]
    fn confirmation_is_extracted_from_flat_payloads() {
        let payload = serde_json::json!({
            "reference1": 7, "transactionStatus": "SUCCESS"
        });
        assert_eq!(extract_confirmation(&payload), Some((7, "SUCCESS".into())));
    }

    #[test]
    fn payloads_without_reference_or_status_are_ignored() {
        assert_eq!(
            extract_confirmation(&serde_json::json!({ "status": "PAID" })),
            None
        );
        assert_eq!(
            extract_confirmation(&serde_json::json!({ "ref1": "ORD0000000001" })),
            None
        );
        assert_eq!(extract_confirmation(&serde_json::json!({})), None);
    }

    #[test]
    fn only_paid_and_success_confirm() {
        assert!(is_success_status("PAID"));
        assert!(is_success_status("SUCCESS"));
        assert!(!is_success_status("PENDING"));
        assert!(!is_success_status("CANCELLED"));
        assert!(!is_success_status(""));
    }
}
