use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(domain) => match domain {
                DomainError::PaymentNotFound { .. }
                | DomainError::PaymentNotFoundByExternalId { .. }
                | DomainError::BackendNotConfigured { .. } => StatusCode::NOT_FOUND,
                DomainError::InvalidSignature
                | DomainError::UnsupportedCurrency { .. }
                | DomainError::InvalidExternalId { .. } => StatusCode::BAD_REQUEST,
                DomainError::DuplicatePayment { .. } => StatusCode::CONFLICT,
            },
            AppErrorKind::External(ExternalError::SecurityViolation { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AppErrorKind::External(_) => StatusCode::BAD_GATEWAY,
            AppErrorKind::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
