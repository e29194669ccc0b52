use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::{ApiResponse, Meta};
use crate::services::scb::GatewayError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Not Found")]
    NotFound,

    #[error("Cart not found")]
    CartNotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotFound | AppError::CartNotFound => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::EmptyCart | AppError::BadRequest(_) | AppError::InvalidSignature => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            // Codec rejections happen before any network call and are the
            // caller's to fix; upstream failures are the gateway's.
            AppError::Gateway(err) => match err {
                GatewayError::InvalidAmount(_) | GatewayError::InvalidReference(_) => {
                    (StatusCode::BAD_REQUEST, self.to_string())
                }
                _ => (StatusCode::BAD_GATEWAY, self.to_string()),
            },
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = ApiResponse {
            message,
            data: Some(ErrorData {
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
