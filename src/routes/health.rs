use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::response::{ApiResponse, Meta};

#[derive(Serialize, ToSchema)]
pub struct HealthData {
    status: String,
}

/// Liveness probe. Deliberately touches neither the database nor the payment
/// gateway; it answers as long as the process is serving requests.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = ApiResponse<HealthData>),
    ),
    tag = "Health"
)]
pub async fn health_check() -> Json<ApiResponse<HealthData>> {
    Json(ApiResponse::success(
        "OK",
        HealthData {
            status: "ok".to_string(),
        },
        Some(Meta::empty()),
    ))
}
