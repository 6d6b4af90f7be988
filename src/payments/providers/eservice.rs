//! eService payment gateway backend
//!
//! The customer is redirected to the eService hosted page with a one-time
//! token. The bank posts the result back to the pending/success/failure
//! callbacks, signed with a SHA1 hash of the store password. Final settlement
//! is confirmed by polling the XML order status API.

use crate::config::{EserviceSettings, HttpClientSettings};
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::host::{EnrichmentProvider, NoEnrichment, OrderIdAccessor, StatusTaskScheduler};
use crate::payments::repository::PaymentRepository;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::{
    GatewayRedirect, Payment, PaymentId, PaymentOutcome, PaymentStatus, RedirectMethod,
    RequestContext, UserData,
};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PROVIDER: &str = "eService";

pub const BACKEND_NAME: &str = "eservice";
pub const ACCEPTED_CURRENCIES: &[&str] = &["PLN"];
pub const ACCEPTED_LANGS: &[&str] = &["pl", "en"];

pub const PENDING_PATH: &str = "/eservice/pending/";
pub const SUCCESS_PATH: &str = "/eservice/success/";
pub const FAILURE_PATH: &str = "/eservice/failure/";

/// Currencies eService understands, with their ISO-4217 numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EserviceCurrency {
    Pln,
    Eur,
    Usd,
    Gbp,
    Chf,
    Dkk,
    Cad,
    Nok,
    Sek,
    Rub,
    Ltl,
    Ron,
    Czk,
    Jpy,
    Huf,
    Hrk,
    Uah,
    Try,
}

impl EserviceCurrency {
    pub const ALL: [EserviceCurrency; 18] = [
        Self::Pln,
        Self::Eur,
        Self::Usd,
        Self::Gbp,
        Self::Chf,
        Self::Dkk,
        Self::Cad,
        Self::Nok,
        Self::Sek,
        Self::Rub,
        Self::Ltl,
        Self::Ron,
        Self::Czk,
        Self::Jpy,
        Self::Huf,
        Self::Hrk,
        Self::Uah,
        Self::Try,
    ];

    pub fn numeric_code(self) -> u16 {
        match self {
            Self::Pln => 985,
            Self::Eur => 978,
            Self::Usd => 840,
            Self::Gbp => 826,
            Self::Chf => 756,
            Self::Dkk => 208,
            Self::Cad => 124,
            Self::Nok => 578,
            Self::Sek => 752,
            Self::Rub => 643,
            Self::Ltl => 440,
            Self::Ron => 946,
            Self::Czk => 203,
            Self::Jpy => 392,
            Self::Huf => 348,
            Self::Hrk => 191,
            Self::Uah => 980,
            Self::Try => 949,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pln => "PLN",
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Gbp => "GBP",
            Self::Chf => "CHF",
            Self::Dkk => "DKK",
            Self::Cad => "CAD",
            Self::Nok => "NOK",
            Self::Sek => "SEK",
            Self::Rub => "RUB",
            Self::Ltl => "LTL",
            Self::Ron => "RON",
            Self::Czk => "CZK",
            Self::Jpy => "JPY",
            Self::Huf => "HUF",
            Self::Hrk => "HRK",
            Self::Uah => "UAH",
            Self::Try => "TRY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Numeric code for a currency name, `None` when eService has no mapping
    pub fn get_by_name(name: &str) -> Option<u16> {
        Self::from_name(name).map(Self::numeric_code)
    }
}

/// `TRANS_STAT` values reported by the order status API
pub struct EserviceTransactionStatus;

impl EserviceTransactionStatus {
    pub const DECLINED: &'static str = "D";
    pub const PRE_APPROVED: &'static str = "A";
    pub const APPROVED: &'static str = "C";
    pub const DEPOSITED: &'static str = "S";
    pub const PENDING: &'static str = "PN";
    pub const CANCELED: &'static str = "V";

    pub const SUCCESS_STATUSES: &'static [&'static str] = &[Self::APPROVED, Self::DEPOSITED];
    pub const ERROR_STATUSES: &'static [&'static str] = &[Self::CANCELED];
}

/// Form fields posted by the bank to the callback endpoints
pub type CallbackParams = HashMap<String, String>;

#[derive(Debug, Serialize)]
#[serde(rename = "CC5Request")]
struct OrderStatusRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
    #[serde(rename = "ClientId")]
    client_id: &'a str,
    #[serde(rename = "OrderId")]
    order_id: &'a str,
    #[serde(rename = "Extra")]
    extra: OrderStatusQuery,
}

#[derive(Debug, Serialize)]
struct OrderStatusQuery {
    #[serde(rename = "ORDERSTATUS")]
    order_status: &'static str,
}

/// Parsed `CC5Response` document; only the `Extra` block matters
#[derive(Debug, Default, Deserialize)]
pub struct OrderStatusResponse {
    #[serde(rename = "Extra", default)]
    pub extra: Option<OrderStatusExtra>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderStatusExtra {
    #[serde(rename = "PROC_RET_CD", default)]
    pub proc_ret_cd: Option<String>,
    #[serde(rename = "TRANS_STAT", default)]
    pub trans_stat: Option<String>,
}

impl OrderStatusResponse {
    pub fn from_xml(body: &str) -> AppResult<Self> {
        quick_xml::de::from_str(body.trim())
            .map_err(|e| AppError::malformed(PROVIDER, format!("Invalid order status XML: {}", e)))
    }

    fn proc_ret_cd(&self) -> Option<&str> {
        self.extra.as_ref().and_then(|e| e.proc_ret_cd.as_deref())
    }

    fn trans_stat(&self) -> Option<&str> {
        self.extra.as_ref().and_then(|e| e.trans_stat.as_deref())
    }
}

/// Map an order status answer onto the three payment outcomes.
///
/// Anything but `PROC_RET_CD == "00"` means the bank has not processed the
/// order yet, whatever `TRANS_STAT` says.
pub fn classify_order_status(response: &OrderStatusResponse) -> PaymentOutcome {
    if response.proc_ret_cd() != Some("00") {
        return PaymentOutcome::Pending;
    }
    match response.trans_stat() {
        Some(status) if EserviceTransactionStatus::SUCCESS_STATUSES.contains(&status) => {
            PaymentOutcome::Success
        }
        Some(status) if EserviceTransactionStatus::ERROR_STATUSES.contains(&status) => {
            PaymentOutcome::Failure
        }
        _ => PaymentOutcome::Pending,
    }
}

/// `base64(sha1(hash_data + secret))`
pub fn compute_hash(hash_data: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(hash_data.as_bytes());
    hasher.update(secret.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parse a `key=value&key=value` body as returned by the token endpoint
pub fn unpack_response_data(data: &str) -> HashMap<String, String> {
    data.trim()
        .split('&')
        .filter_map(|entry| entry.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Pick the page language: the customer's first, then the configured default
pub fn negotiate_language(customer: Option<&str>, configured: Option<&str>) -> Option<String> {
    [customer, configured]
        .into_iter()
        .flatten()
        .map(|lang| lang.to_lowercase())
        .find(|lang| ACCEPTED_LANGS.contains(&lang.as_str()))
}

/// eService gateway backend
pub struct EserviceAdapter {
    settings: EserviceSettings,
    client: Client,
    payments: Arc<dyn PaymentRepository>,
    scheduler: Arc<dyn StatusTaskScheduler>,
    enrichment: Arc<dyn EnrichmentProvider>,
    order_id: OrderIdAccessor,
}

impl EserviceAdapter {
    pub fn new(
        settings: EserviceSettings,
        http: &HttpClientSettings,
        payments: Arc<dyn PaymentRepository>,
        scheduler: Arc<dyn StatusTaskScheduler>,
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
            scheduler,
            enrichment: Arc::new(NoEnrichment),
            order_id,
        })
    }

    pub fn with_enrichment(mut self, enrichment: Arc<dyn EnrichmentProvider>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_order_id_accessor(mut self, accessor: OrderIdAccessor) -> Self {
        self.order_id = accessor;
        self
    }

    pub fn payments(&self) -> &Arc<dyn PaymentRepository> {
        &self.payments
    }

    /// Check the bank's signature on a callback.
    ///
    /// The signed string is taken from `HASHPARAMSVAL` as sent by the bank
    /// rather than rebuilt from the fields listed in `HASHPARAMS`: on errors
    /// eService leaves some of those fields out of the hash.
    pub fn validate_hash(&self, params: &CallbackParams) -> bool {
        let (Some(hash_data), Some(supplied)) = (params.get("HASHPARAMSVAL"), params.get("HASH"))
        else {
            warn!("Callback without HASHPARAMSVAL or HASH, aborting");
            return false;
        };

        if let Some(hashparams) = params.get("HASHPARAMS") {
            let rebuilt: String = hashparams
                .split(':')
                .filter(|name| !name.is_empty())
                .filter_map(|name| params.get(name).map(String::as_str))
                .collect();
            if &rebuilt != hash_data {
                debug!("HASHPARAMSVAL differs from the fields listed in HASHPARAMS");
            }
        }

        let calculated = compute_hash(hash_data, &self.settings.password);
        let matches = constant_time_eq(calculated.as_bytes(), supplied.as_bytes());
        if !matches {
            warn!("Malformed hash value for transaction, aborting");
        }
        matches
    }

    /// Request a one-time payment token. `None` when the gateway refuses.
    pub async fn get_token(&self, params: &[(&str, String)]) -> AppResult<Option<String>> {
        let url = format!("{}pg/token", self.settings.gateway_url);
        let body = serde_urlencoded::to_string(params)
            .map_err(|e| AppError::malformed(PROVIDER, format!("Cannot encode token request: {}", e)))?;

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::network(PROVIDER, e))?;
        let text = response
            .text()
            .await
            .map_err(|e| AppError::network(PROVIDER, e))?;

        let data = unpack_response_data(&text);
        let message = data.get("msg").cloned().unwrap_or_default();
        if data.get("status").map(String::as_str) == Some("ok") {
            if !message.is_empty() {
                return Ok(Some(message));
            }
            error!("Get token method returned OK status, but no token was provided");
        }
        error!("Get token method ERROR. Message: {}", message);
        Ok(None)
    }

    /// Query the XML API for the order and apply a terminal answer.
    ///
    /// Returns `true` once the payment reached success or failure, `false`
    /// when the caller should ask again later.
    pub async fn check_order_status(&self, payment_id: PaymentId) -> AppResult<bool> {
        Ok(self.query_order_status(payment_id).await?.is_terminal())
    }

    async fn query_order_status(&self, payment_id: PaymentId) -> AppResult<PaymentOutcome> {
        let payment = self.payments.get(payment_id).await?;
        let order_id = payment
            .external_id
            .clone()
            .unwrap_or_else(|| self.generate_payment_id(&payment));

        let request = OrderStatusRequest {
            name: &self.settings.api_user,
            password: &self.settings.api_password,
            client_id: &self.settings.client_id,
            order_id: &order_id,
            extra: OrderStatusQuery {
                order_status: "QUERY",
            },
        };
        let xml = quick_xml::se::to_string(&request)
            .map_err(|e| AppError::malformed(PROVIDER, format!("Cannot encode status query: {}", e)))?;
        let body = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}", xml);

        let response = self
            .client
            .post(&self.settings.api_url)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::network(PROVIDER, e))?;
        let text = response
            .text()
            .await
            .map_err(|e| AppError::network(PROVIDER, e))?;
        let status = OrderStatusResponse::from_xml(&text)?;

        let outcome = classify_order_status(&status);
        match outcome {
            PaymentOutcome::Pending if status.proc_ret_cd() != Some("00") => {
                warn!("Payment {} not processed yet", payment_id);
            }
            PaymentOutcome::Pending => {
                warn!(
                    "Received status {:?} for payment {}, waiting for a final one",
                    status.trans_stat(),
                    payment_id
                );
            }
            PaymentOutcome::Success => {
                info!(
                    "Processing success for payment {} (status {:?})",
                    payment_id,
                    status.trans_stat()
                );
                self.payments
                    .atomic_update(payment_id, Box::new(|p: &mut Payment| p.on_success(None)))
                    .await?;
            }
            PaymentOutcome::Failure => {
                info!(
                    "Processing failure for payment {} (status {:?})",
                    payment_id,
                    status.trans_stat()
                );
                self.payments
                    .atomic_update(payment_id, Box::new(|p: &mut Payment| p.on_failure()))
                    .await?;
            }
        }
        Ok(outcome)
    }

    /// Payment was confirmed
    pub async fn accept_payment(&self, payment_id: PaymentId) -> AppResult<Payment> {
        self.payments
            .atomic_update(payment_id, Box::new(|p: &mut Payment| p.on_success(None)))
            .await
    }

    /// Payment was accepted into the queue for processing
    pub async fn pending_payment(&self, payment_id: PaymentId) -> AppResult<Payment> {
        let payment = self
            .payments
            .atomic_update(
                payment_id,
                Box::new(|p: &mut Payment| p.change_status(PaymentStatus::InProgress)),
            )
            .await?;
        self.scheduler.schedule(payment_id)?;
        Ok(payment)
    }

    /// Payment was cancelled
    pub async fn payment_error(&self, payment_id: PaymentId) -> AppResult<Payment> {
        self.payments
            .atomic_update(payment_id, Box::new(|p: &mut Payment| p.on_failure()))
            .await
    }

    fn redirect_params(
        &self,
        payment: &Payment,
        external_id: &str,
        currency: EserviceCurrency,
        token: Option<String>,
        user_data: &UserData,
        request: &RequestContext,
    ) -> Vec<(String, String)> {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();

        let mut params: Vec<(String, String)> = vec![
            ("ClientId".into(), self.settings.client_id.clone()),
            ("OrderId".into(), external_id.to_string()),
            ("Total".into(), payment.amount.to_string()),
            ("Currency".into(), currency.numeric_code().to_string()),
            // A missing token is sent as the literal "None"
            ("Token".into(), token.unwrap_or_else(|| "None".to_string())),
        ];

        if let Some(lang) =
            negotiate_language(user_data.lang.as_deref(), self.settings.lang.as_deref())
        {
            params.push(("lang".into(), lang));
        }

        let bill_to_name = match user_data.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{} {}", field(&user_data.first_name), field(&user_data.last_name)),
        };

        params.extend([
            ("okUrl".into(), request.build_absolute_uri(SUCCESS_PATH)),
            ("failUrl".into(), request.build_absolute_uri(FAILURE_PATH)),
            ("pendingUrl".into(), request.build_absolute_uri(PENDING_PATH)),
            ("StoreType".into(), self.settings.store_type.clone()),
            ("TranType".into(), "Auth".to_string()),
            ("ConsumerName".into(), field(&user_data.first_name)),
            ("ConsumerSurname".into(), field(&user_data.last_name)),
            ("ShipToName".into(), field(&user_data.shipping_country)),
            ("ShipToPostalCode".into(), field(&user_data.shipping_zip_code)),
            ("ShipToStreet1".into(), field(&user_data.shipping_address)),
            ("ShipToCity".into(), field(&user_data.shipping_city)),
            ("ShipToCountry".into(), "PL".to_string()),
            ("BillToName".into(), bill_to_name),
            ("BillToPostalCode".into(), field(&user_data.billing_zip_code)),
            ("BillToStreet1".into(), field(&user_data.billing_address)),
            ("BillToCity".into(), field(&user_data.billing_city)),
            ("BillToCountry".into(), field(&user_data.billing_country)),
        ]);
        params
    }
}

#[async_trait]
impl GatewayAdapter for EserviceAdapter {
    fn backend(&self) -> &'static str {
        BACKEND_NAME
    }

    fn accepted_currencies(&self) -> &'static [&'static str] {
        ACCEPTED_CURRENCIES
    }

    fn generate_payment_id(&self, payment: &Payment) -> String {
        format!("{}{}", self.order_id.get(&payment.order), payment.id)
    }

    async fn get_gateway_url(
        &self,
        payment: &mut Payment,
        request: &RequestContext,
    ) -> AppResult<GatewayRedirect> {
        let currency = EserviceCurrency::from_name(&payment.currency).ok_or_else(|| {
            DomainError::UnsupportedCurrency {
                currency: payment.currency.clone(),
            }
        })?;

        let external_id = self.generate_payment_id(payment);
        payment.external_id = Some(external_id.clone());

        let token_params = [
            ("ClientId", self.settings.client_id.clone()),
            ("Password", self.settings.password.clone()),
            ("OrderId", external_id.clone()),
            ("Total", payment.amount.to_string()),
            ("Currency", currency.numeric_code().to_string()),
        ];
        let token = self.get_token(&token_params).await?;
        if token.is_none() {
            // TODO: abort the redirect once the gateway's behaviour for a "None" token is confirmed
            error!("No token could be retrieved for payment {}", payment.id);
        }

        let user_data = self.enrichment.fetch(&payment.order);
        let params = self.redirect_params(payment, &external_id, currency, token, &user_data, request);

        let stored_id = external_id.clone();
        self.payments
            .atomic_update(payment.id, Box::new(move |p: &mut Payment| p.external_id = Some(stored_id)))
            .await?;

        let gateway = format!("{}fim/eservicegate", self.settings.gateway_url);
        let url = url::Url::parse_with_params(&gateway, &params)
            .map_err(|e| AppError::configuration(format!("Invalid eService gateway URL: {}", e)))?;

        info!(
            "New eService payment {} using GET, order id {}",
            payment.id, external_id
        );

        Ok(GatewayRedirect {
            url: url.to_string(),
            method: RedirectMethod::Get,
            params: Vec::new(),
        })
    }

    async fn update_payment_status(&self, payment_id: PaymentId) -> AppResult<PaymentOutcome> {
        self.query_order_status(payment_id).await
    }
}
