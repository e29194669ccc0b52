use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Client-facing QR issuance result. Exactly one of `qr_image_url` (v2) and
/// `qr_raw_data` (v1 fallback) is set.
#[derive(Debug, Serialize, ToSchema)]
pub struct QrIssueData {
    pub order_id: i64,
    #[schema(example = "250.00")]
    pub amount: String,
    pub qr_image_url: Option<String>,
    pub qr_raw_data: Option<String>,
    pub transaction_id: Option<String>,
    /// Local wall-clock deadline the UI enforces, independent of any
    /// gateway-declared expiry.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusQuery {
    pub order_id: Option<i64>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusData {
    pub status: String,
    #[schema(value_type = Object)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SimulatePaidRequest {
    pub order_id: i64,
}
