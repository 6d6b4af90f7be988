//! Saferpay payment gateway backend
//!
//! Uses the Saferpay JSON API: a payment page is initialized, the customer
//! is redirected to it, and when the browser comes back the page is asserted
//! to learn the final transaction status.

use crate::config::{HttpClientSettings, SaferpaySettings};
use crate::error::{AppError, AppResult, DomainError, ExternalError};
use crate::payments::host::OrderIdAccessor;
use crate::payments::repository::PaymentRepository;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::{GatewayRedirect, Payment, PaymentId, PaymentOutcome, RequestContext};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "Saferpay";

pub const BACKEND_NAME: &str = "saferpay";
pub const ACCEPTED_CURRENCIES: &[&str] = &["EUR", "USD", "GBP", "CHF"];

pub const INITIALIZE_PATH: &str = "Payment/v1/PaymentPage/Initialize";
pub const ASSERT_PATH: &str = "Payment/v1/PaymentPage/Assert";

/// Transaction statuses that mean the money is secured
pub const SUCCESS_STATUSES: &[&str] = &["AUTHORIZED", "CAPTURED"];

pub fn success_path(pk: PaymentId) -> String {
    format!("/saferpay/success/{}/", pk)
}

pub fn failure_path(pk: PaymentId) -> String {
    format!("/saferpay/failure/{}/", pk)
}

/// `{token}_{transaction_id}`; the transaction id is empty until the page is asserted
pub fn pack_external_id(token: &str, transaction_id: Option<&str>) -> String {
    format!("{}_{}", token, transaction_id.unwrap_or_default())
}

pub fn unpack_external_id(external_id: &str) -> AppResult<(String, Option<String>)> {
    let parts: Vec<&str> = external_id.split('_').collect();
    match parts.as_slice() {
        [token, transaction_id] => {
            let transaction_id = Some(transaction_id.to_string()).filter(|t| !t.is_empty());
            Ok((token.to_string(), transaction_id))
        }
        _ => Err(DomainError::InvalidExternalId {
            value: external_id.to_string(),
        }
        .into()),
    }
}

/// Issues `rid{millis}` request ids, strictly increasing within the process
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicI64,
}

impl RequestIdGenerator {
    pub fn next_id(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        format!("rid{}", now.max(previous + 1))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitializeResponse {
    token: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssertResponse {
    pub transaction: AssertTransaction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssertTransaction {
    pub status: String,
    pub amount: AssertAmount,
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssertAmount {
    pub value: String,
    pub currency_code: String,
}

/// Build the gateway error carried by a non-200 answer
fn api_error(status: u16, body: &Value) -> ExternalError {
    let text = |key: &str| match body.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    ExternalError::GatewayApi {
        provider: PROVIDER.to_string(),
        status,
        name: text("ErrorName"),
        message: text("ErrorMessage"),
        detail: text("ErrorDetail"),
        transaction_id: Some(text("TransactionId")).filter(|t| !t.is_empty()),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> AppResult<T> {
    serde_json::from_value(value).map_err(|e| AppError::malformed(PROVIDER, e.to_string()))
}

/// Saferpay gateway backend
pub struct SaferpayAdapter {
    settings: SaferpaySettings,
    client: Client,
    payments: Arc<dyn PaymentRepository>,
    order_id: OrderIdAccessor,
    request_ids: RequestIdGenerator,
}

impl SaferpayAdapter {
    pub fn new(
        settings: SaferpaySettings,
        http: &HttpClientSettings,
        payments: Arc<dyn PaymentRepository>,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;
        let order_id = OrderIdAccessor::from_field(&settings.order_unique_id_field);

        Ok(Self {
            settings,
            client,
            payments,
            order_id,
            request_ids: RequestIdGenerator::default(),
        })
    }

    pub fn with_order_id_accessor(mut self, accessor: OrderIdAccessor) -> Self {
        self.order_id = accessor;
        self
    }

    pub fn payments(&self) -> &Arc<dyn PaymentRepository> {
        &self.payments
    }

    /// POST a JSON call with the Saferpay request header attached.
    ///
    /// The response must echo our request id; anything else is refused.
    async fn post(&self, path: &str, mut body: Value) -> AppResult<Value> {
        let request_id = self.request_ids.next_id();
        body["RequestHeader"] = json!({
            "SpecVersion": self.settings.api_version,
            "CustomerId": self.settings.customer_id,
            "RequestId": request_id,
            "RetryIndicator": 0,
        });

        let url = format!("{}{}", self.settings.api_url(), path);
        info!("Calling Saferpay {} (request id {})", path, request_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("Accept", "application/json")
            .basic_auth(&self.settings.api_username, Some(&self.settings.api_password))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::network(PROVIDER, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::network(PROVIDER, e))?;
        // Outage pages and proxies answer without a JSON envelope
        let response_json: Value = serde_json::from_str(&text).map_err(|e| {
            warn!("Saferpay answered HTTP {} without a JSON body", status);
            AppError::new(ExternalError::Unavailable {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message: format!("invalid JSON: {}", e),
            })
        })?;

        let echoed = response_json
            .get("ResponseHeader")
            .and_then(|h| h.get("RequestId"))
            .and_then(Value::as_str);
        if echoed != Some(request_id.as_str()) {
            warn!(
                "Saferpay response request id {:?} does not match {}",
                echoed, request_id
            );
            return Err(ExternalError::SecurityViolation {
                provider: PROVIDER.to_string(),
                message: "RequestId does not match the response".to_string(),
            }
            .into());
        }

        if status != reqwest::StatusCode::OK {
            let err = api_error(status.as_u16(), &response_json);
            warn!("{}", err);
            return Err(err.into());
        }

        Ok(response_json)
    }

    fn initialize_request(&self, payment: &Payment, request: &RequestContext) -> Value {
        let mut body = json!({
            "TerminalId": self.settings.terminal_id,
            "Payment": {
                "Amount": {
                    "Value": payment.amount.to_string(),
                    "CurrencyCode": payment.currency,
                },
                "OrderId": payment.order.id.to_string(),
                "Description": payment.order.description,
            },
            "ReturnUrls": {
                "Success": request.build_absolute_uri(&success_path(payment.id)),
                "Fail": request.build_absolute_uri(&failure_path(payment.id)),
            },
        });

        if let Some(field) = &self.settings.recurring_field {
            if payment.order.flag(field) {
                body["RecurringOptions"] = json!({ "Initial": true });
            }
        }
        body
    }

    /// Assert the payment page and record the result.
    ///
    /// Returns `true` when the transaction is authorized or captured. Gateway
    /// errors and incomplete answers fail the payment; transport errors,
    /// non-JSON answers and request id mismatches are returned without
    /// touching it.
    pub async fn assert_payment(&self, payment_id: PaymentId) -> AppResult<bool> {
        let payment = self.payments.get(payment_id).await?;
        let external_id = payment.external_id.clone().unwrap_or_default();
        let (token, _) = unpack_external_id(&external_id)?;

        let asserted = match self.post(ASSERT_PATH, json!({ "Token": token })).await {
            Ok(response) => decode::<AssertResponse>(response).and_then(|assert| {
                let amount = Decimal::from_str(&assert.transaction.amount.value).map_err(|e| {
                    AppError::malformed(PROVIDER, format!("Invalid amount: {}", e))
                })?;
                Ok((assert.transaction, amount))
            }),
            Err(e) => Err(e),
        };

        let (transaction, amount) = match asserted {
            Ok(asserted) => asserted,
            Err(e) if e.is_gateway_rejection() => {
                info!("Payment {} rejected. Info: {}", payment_id, e);
                self.payments
                    .atomic_update(payment_id, Box::new(|p: &mut Payment| p.on_failure()))
                    .await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let external_id = pack_external_id(&token, Some(&transaction.id));

        if SUCCESS_STATUSES.contains(&transaction.status.as_str()) {
            info!(
                "Payment {} accepted with status {} and amount {} {}.",
                payment_id, transaction.status, amount, transaction.amount.currency_code
            );
            self.payments
                .atomic_update(
                    payment_id,
                    Box::new(move |p: &mut Payment| {
                        p.external_id = Some(external_id);
                        p.on_success(Some(amount));
                    }),
                )
                .await?;
            return Ok(true);
        }

        info!(
            "Payment {} returned status {} and amount {} {}, which is neither authorized nor captured, rejecting.",
            payment_id, transaction.status, amount, transaction.amount.currency_code
        );
        self.payments
            .atomic_update(
                payment_id,
                Box::new(move |p: &mut Payment| {
                    p.external_id = Some(external_id);
                    p.on_failure();
                }),
            )
            .await?;
        Ok(false)
    }
}

#[async_trait]
impl GatewayAdapter for SaferpayAdapter {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    fn accepted_currencies(&self) -> &'static [&'static str] {
        ACCEPTED_CURRENCIES
    }

    fn generate_payment_id(&self, payment: &Payment) -> String {
        self.order_id.get(&payment.order)
    }

    async fn get_gateway_url(
        &self,
        payment: &mut Payment,
        request: &RequestContext,
    ) -> AppResult<GatewayRedirect> {
        let body = self.initialize_request(payment, request);
        let response: InitializeResponse = decode(self.post(INITIALIZE_PATH, body).await?)?;

        let external_id = pack_external_id(&response.token, None);
        payment.external_id = Some(external_id.clone());
        self.payments
            .atomic_update(
                payment.id,
                Box::new(move |p: &mut Payment| p.external_id = Some(external_id)),
            )
            .await?;

        info!("Saferpay payment page initialized for payment {}", payment.id);
        Ok(GatewayRedirect::get(response.redirect_url))
    }

    async fn update_payment_status(&self, payment_id: PaymentId) -> AppResult<PaymentOutcome> {
        Ok(if self.assert_payment(payment_id).await? {
            PaymentOutcome::Success
        } else {
            PaymentOutcome::Failure
        })
    }
}
