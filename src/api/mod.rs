//! HTTP surface: bank callbacks, customer redirects and health
#![cfg(feature = "server")]

pub mod error;
pub mod eservice;
pub mod health;
pub mod payments;
pub mod saferpay;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ReturnRoutes;
use crate::error::{AppResult, DomainError};
use crate::payments::providers::{eservice as eservice_backend, EserviceAdapter, SaferpayAdapter};
use crate::payments::repository::PaymentRepository;
use crate::payments::types::RequestContext;
use crate::payments::GatewayAdapter;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<dyn PaymentRepository>,
    pub eservice: Option<Arc<EserviceAdapter>>,
    pub saferpay: Option<Arc<SaferpayAdapter>>,
    pub routes: ReturnRoutes,
    pub environment: String,
}

impl AppState {
    pub fn backends(&self) -> Vec<&'static str> {
        let mut backends = Vec::new();
        if let Some(adapter) = &self.eservice {
            backends.push(adapter.backend());
        }
        if let Some(adapter) = &self.saferpay {
            backends.push(adapter.backend());
        }
        backends
    }

    pub fn adapter(&self, backend: &str) -> AppResult<Arc<dyn GatewayAdapter>> {
        let adapter: Option<Arc<dyn GatewayAdapter>> = match backend {
            eservice_backend::BACKEND_NAME => self
                .eservice
                .clone()
                .map(|a| a as Arc<dyn GatewayAdapter>),
            crate::payments::providers::saferpay::BACKEND_NAME => self
                .saferpay
                .clone()
                .map(|a| a as Arc<dyn GatewayAdapter>),
            _ => None,
        };
        adapter.ok_or_else(|| {
            DomainError::BackendNotConfigured {
                backend: backend.to_string(),
            }
            .into()
        })
    }

    pub fn eservice(&self) -> AppResult<&Arc<EserviceAdapter>> {
        self.eservice.as_ref().ok_or_else(|| {
            DomainError::BackendNotConfigured {
                backend: eservice_backend::BACKEND_NAME.to_string(),
            }
            .into()
        })
    }

    pub fn saferpay(&self) -> AppResult<&Arc<SaferpayAdapter>> {
        self.saferpay.as_ref().ok_or_else(|| {
            DomainError::BackendNotConfigured {
                backend: crate::payments::providers::saferpay::BACKEND_NAME.to_string(),
            }
            .into()
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(eservice_backend::PENDING_PATH, post(eservice::pending))
        .route(eservice_backend::SUCCESS_PATH, post(eservice::success))
        .route(eservice_backend::FAILURE_PATH, post(eservice::failure))
        .route("/saferpay/success/:pk/", get(saferpay::assert_payment))
        .route("/saferpay/failure/:pk/", get(saferpay::assert_payment))
        .route("/payments", post(payments::create_payment))
        .route("/payments/:pk/gateway", get(payments::redirect_to_gateway))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

/// Plain 302 redirect
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Scheme and host the customer used to reach us
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let scheme = header_value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let domain = header_value("x-forwarded-host")
        .or_else(|| header_value(header::HOST.as_str()))
        .unwrap_or_else(|| "localhost".to_string());
    RequestContext::new(scheme, domain)
}
