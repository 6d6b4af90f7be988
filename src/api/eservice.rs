//! eService callback endpoints
//!
//! The bank posts a signed form to one of these after the customer leaves the
//! payment page. Each handler checks the hash, finds the payment by `OrderId`,
//! applies the matching lifecycle step and sends the browser on.

use axum::extract::State;
use axum::response::Response;
use axum::Form;
use tracing::{info, warn};

use crate::api::{found, AppState};
use crate::error::{AppResult, DomainError};
use crate::payments::providers::eservice::{CallbackParams, EserviceAdapter};
use crate::payments::types::Payment;

async fn verified_payment(adapter: &EserviceAdapter, params: &CallbackParams) -> AppResult<Payment> {
    if !adapter.validate_hash(params) {
        return Err(DomainError::InvalidSignature.into());
    }
    let external_id = params.get("OrderId").cloned().unwrap_or_default();
    adapter
        .payments()
        .find_by_external_id(&external_id)
        .await?
        .ok_or_else(|| DomainError::PaymentNotFoundByExternalId { external_id }.into())
}

fn md_status(params: &CallbackParams) -> &str {
    params.get("mdStatus").map(String::as_str).unwrap_or("")
}

/// Decode the HTML entities eService puts into `mdErrorMsg`
fn unescape_html(value: &str) -> String {
    html_escape::decode_html_entities(value).into_owned()
}

pub async fn pending(
    State(state): State<AppState>,
    Form(params): Form<CallbackParams>,
) -> AppResult<Response> {
    let adapter = state.eservice()?;
    let payment = verified_payment(adapter, &params).await?;
    info!(
        "Payment {} still pending with status {}",
        payment.id,
        md_status(&params)
    );
    adapter.pending_payment(payment.id).await?;
    Ok(found(&state.routes.pending_for(payment.id)))
}

pub async fn success(
    State(state): State<AppState>,
    Form(params): Form<CallbackParams>,
) -> AppResult<Response> {
    let adapter = state.eservice()?;
    let payment = verified_payment(adapter, &params).await?;
    info!(
        "Payment {} successful with status {}",
        payment.id,
        md_status(&params)
    );
    adapter.accept_payment(payment.id).await?;
    Ok(found(&state.routes.success_for(payment.id)))
}

pub async fn failure(
    State(state): State<AppState>,
    Form(params): Form<CallbackParams>,
) -> AppResult<Response> {
    let adapter = state.eservice()?;
    let payment = verified_payment(adapter, &params).await?;
    let error_message = unescape_html(params.get("mdErrorMsg").map(String::as_str).unwrap_or(""));
    warn!(
        "Payment {} failed on backend error {} with status {}",
        payment.id,
        error_message,
        md_status(&params)
    );
    adapter.payment_error(payment.id).await?;
    Ok(found(&state.routes.failure_for(payment.id)))
}
