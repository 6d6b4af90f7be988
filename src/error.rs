//! Application error types
//!
//! Errors are grouped the same way the gateways report them: problems with the
//! payment itself (domain), problems talking to a bank (external) and problems
//! with the process around them (infrastructure).

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
#[error("{kind}{}", .context.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Payment {id} not found")]
    PaymentNotFound { id: i64 },

    #[error("No payment with external id '{external_id}'")]
    PaymentNotFoundByExternalId { external_id: String },

    #[error("Callback signature is invalid")]
    InvalidSignature,

    #[error("Currency '{currency}' is not supported by this backend")]
    UnsupportedCurrency { currency: String },

    #[error("External id '{value}' is malformed")]
    InvalidExternalId { value: String },

    #[error("Backend '{backend}' is not configured")]
    BackendNotConfigured { backend: String },

    #[error("Payment {id} already exists")]
    DuplicatePayment { id: i64 },
}

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error(
        "{provider} API error: status code {status}, {name}: {message}. Details: {detail}. Transaction id: {}",
        .transaction_id.as_deref().unwrap_or("None")
    )]
    GatewayApi {
        provider: String,
        status: u16,
        name: String,
        message: String,
        detail: String,
        transaction_id: Option<String>,
    },

    #[error("{provider} security violation: {message}")]
    SecurityViolation { provider: String, message: String },

    #[error("{provider} returned an unexpected response: {message}")]
    MalformedResponse { provider: String, message: String },

    /// The gateway answered with something that is not an API envelope at all
    #[error("{provider} unavailable: HTTP {status}: {message}")]
    Unavailable {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} request failed: {message}")]
    Network {
        provider: String,
        message: String,
        is_retryable: bool,
    },
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Scheduler error: {message}")]
    Scheduler { message: String },
}

impl AppError {
    pub fn new(kind: impl Into<AppErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::External(
                ExternalError::Network {
                    is_retryable: true,
                    ..
                } | ExternalError::Unavailable { .. }
            )
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(
                DomainError::PaymentNotFound { .. } | DomainError::PaymentNotFoundByExternalId { .. }
            )
        )
    }

    /// The bank answered, but the answer means the payment cannot be confirmed.
    pub fn is_gateway_rejection(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::External(
                ExternalError::GatewayApi { .. } | ExternalError::MalformedResponse { .. }
            )
        )
    }

    pub fn network(provider: &str, err: reqwest::Error) -> Self {
        let is_retryable = err.is_timeout() || err.is_connect();
        Self::new(ExternalError::Network {
            provider: provider.to_string(),
            message: err.to_string(),
            is_retryable,
        })
    }

    pub fn malformed(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ExternalError::MalformedResponse {
            provider: provider.to_string(),
            message: message.into(),
        })
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(InfrastructureError::Configuration {
            message: message.into(),
        })
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        Self::new(err)
    }
}

impl From<ExternalError> for AppError {
    fn from(err: ExternalError) -> Self {
        Self::new(err)
    }
}

impl From<InfrastructureError> for AppError {
    fn from(err: InfrastructureError) -> Self {
        Self::new(err)
    }
}
