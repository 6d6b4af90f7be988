//! Saferpay return endpoints
//!
//! Saferpay sends the browser back to `success` or `fail`; either way the
//! page is asserted and the result decides where the customer lands.

use axum::extract::{Path, State};
use axum::response::Response;

use crate::api::{found, AppState};
use crate::error::AppResult;
use crate::payments::types::PaymentId;

pub async fn assert_payment(
    State(state): State<AppState>,
    Path(pk): Path<PaymentId>,
) -> AppResult<Response> {
    let adapter = state.saferpay()?;
    if adapter.assert_payment(pk).await? {
        return Ok(found(&state.routes.success_for(pk)));
    }
    Ok(found(&state.routes.failure_for(pk)))
}
