//! Host-side payment endpoints used by the reference binary
//!
//! Registering a payment and sending the customer to its gateway. A real host
//! application would do this from its own checkout flow.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{found, request_context, AppState};
use crate::error::{AppResult, DomainError};
use crate::payments::types::{Order, Payment, PaymentId, RedirectMethod};

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub id: PaymentId,
    pub order: Order,
    pub amount: Decimal,
    pub currency: String,
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct GatewayForm {
    pub url: String,
    pub params: Vec<(String, String)>,
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<Payment>)> {
    let adapter = state.adapter(&req.backend)?;
    if !adapter.accepted_currencies().contains(&req.currency.as_str()) {
        return Err(DomainError::UnsupportedCurrency {
            currency: req.currency,
        }
        .into());
    }
    let payment = Payment::new(req.id, req.order, req.amount, req.currency, adapter.backend());
    // a taken id is refused by the repository itself
    let payment = state.payments.insert(payment).await?;
    info!(
        "Registered payment {} for {} {} via {}",
        payment.id, payment.amount, payment.currency, payment.backend
    );
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn redirect_to_gateway(
    State(state): State<AppState>,
    Path(pk): Path<PaymentId>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let mut payment = state.payments.get(pk).await?;
    let adapter = state.adapter(&payment.backend)?;
    let redirect = adapter
        .get_gateway_url(&mut payment, &request_context(&headers))
        .await?;

    Ok(match redirect.method {
        RedirectMethod::Get => found(&redirect.url),
        RedirectMethod::Post => Json(GatewayForm {
            url: redirect.url,
            params: redirect.params,
        })
        .into_response(),
    })
}
