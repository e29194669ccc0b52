use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Order payment lifecycle. `Pending -> Paid` is the only modeled transition;
/// the column stays a plain string in the database so further states can be
/// added without a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct CartLine {
    pub id: i64,
    pub cart_id: i64,
    pub variant_id: i64,
    pub qty: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub status: String,
    #[schema(value_type = String, example = "250.00")]
    pub subtotal: Decimal,
    #[schema(value_type = String, example = "0.00")]
    pub shipping_fee: Decimal,
    #[schema(value_type = String, example = "0.00")]
    pub discount_total: Decimal,
    #[schema(value_type = String, example = "250.00")]
    pub grand_total: Decimal,
    pub scb_transaction_id: Option<String>,
    pub scb_qr_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable price/description snapshot taken at checkout time. Intentionally
/// decoupled from live catalog rows so historical orders stay stable.
#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub variant_id: i64,
    pub name: String,
    pub shade_name: Option<String>,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    pub qty: i32,
    #[schema(value_type = String)]
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}
