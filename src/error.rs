use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::{database::StoreError, email::EmailError, processor::ProcessorError};

/// Every failure a workflow can surface to a caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Profile not found")]
    ProfileNotFound,
    #[error("{0}")]
    NotFound(String),
    #[error("Practitioner not connected to Stripe")]
    PractitionerNotConnected,
    #[error("Product not found or inactive")]
    ProductNotFound,
    #[error("Connect account not found")]
    AccountNotFound,
    #[error("Payment processor error")]
    Processor(#[from] ProcessorError),
    #[error("Database error")]
    Persistence(#[from] StoreError),
    #[error("Failed to send email")]
    Email(#[from] EmailError),
}

/// Uniform JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AppError {
    pub fn missing_field(field: &str) -> Self {
        Self::Validation(format!("Missing required field: {field}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PractitionerNotConnected => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ProfileNotFound
            | Self::NotFound(_)
            | Self::ProductNotFound
            | Self::AccountNotFound => StatusCode::NOT_FOUND,
            Self::Processor(_) | Self::Persistence(_) | Self::Email(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            error: self.to_string(),
            details: None,
            error_type: None,
            code: None,
        };
        match self {
            Self::Processor(ProcessorError::Api {
                message,
                error_type,
                code,
                ..
            }) => {
                body.details = Some(message.clone());
                body.error_type = Some(error_type.clone());
                body.code = code.clone();
            }
            Self::Processor(e) => body.details = Some(e.to_string()),
            Self::Persistence(e) => body.details = Some(e.to_string()),
            Self::Email(e) => body.details = Some(e.to_string()),
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {self:?}");
        }
        (status, Json(self.body())).into_response()
    }
}
