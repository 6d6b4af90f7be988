//! Gateway backend trait definitions
//!
//! Defines the common interface that every payment gateway backend implements.

use crate::error::AppResult;
use crate::payments::types::{GatewayRedirect, Payment, PaymentId, PaymentOutcome, RequestContext};
use async_trait::async_trait;

/// Trait for gateway backend implementations
///
/// A backend translates the host's payment into the bank's protocol and back.
/// It never creates or deletes payments; state changes go through the
/// repository it was built with.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Short backend name, also stored on the payments it handles
    fn backend(&self) -> &'static str;

    /// Currencies the bank accepts for this merchant
    fn accepted_currencies(&self) -> &'static [&'static str];

    /// Correlation id sent to the gateway for this payment
    fn generate_payment_id(&self, payment: &Payment) -> String;

    /// Prepare the payment at the gateway and return where to send the customer
    ///
    /// Sets `payment.external_id` and persists it, so the callbacks can find
    /// the payment again.
    async fn get_gateway_url(
        &self,
        payment: &mut Payment,
        request: &RequestContext,
    ) -> AppResult<GatewayRedirect>;

    /// Ask the gateway where the payment stands and apply the answer
    async fn update_payment_status(&self, payment_id: PaymentId) -> AppResult<PaymentOutcome>;
}
