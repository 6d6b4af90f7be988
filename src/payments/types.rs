//! Payment types shared by all gateway backends
//!
//! The host owns these records; backends only read them and move them through
//! the lifecycle methods on [`Payment`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Primary key of a host payment
pub type PaymentId = i64;

/// Host order a payment belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    /// Human readable description sent to gateways that display one
    pub description: String,
    /// Extra host fields (alternative unique ids, recurring flags, ...)
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Order {
    pub fn new(id: i64, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Truthiness of an attribute: `true`, a non-zero number or a non-empty string.
    pub fn flag(&self, name: &str) -> bool {
        match self.attributes.get(name) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
            Some(serde_json::Value::Null) | None => false,
        }
    }
}

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    New,
    InProgress,
    PartiallyPaid,
    Paid,
    Failed,
    /// Polling budget exhausted without a terminal answer from the bank
    Abandoned,
}

impl PaymentStatus {
    pub fn outcome(&self) -> PaymentOutcome {
        match self {
            PaymentStatus::New | PaymentStatus::InProgress | PaymentStatus::PartiallyPaid => {
                PaymentOutcome::Pending
            }
            PaymentStatus::Paid => PaymentOutcome::Success,
            PaymentStatus::Failed | PaymentStatus::Abandoned => PaymentOutcome::Failure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::New => "new",
            PaymentStatus::InProgress => "in_progress",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Abandoned => "abandoned",
        }
    }
}

/// Three-state result of asking a gateway about a payment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Pending,
    Failure,
}

impl PaymentOutcome {
    /// Success and failure need no further polling
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentOutcome::Pending)
    }
}

/// Host payment record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: PaymentId,
    pub order: Order,
    pub amount: Decimal,
    pub currency: String,
    pub backend: String,
    pub external_id: Option<String>,
    pub status: PaymentStatus,
    pub amount_paid: Decimal,
    pub paid_on: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        id: PaymentId,
        order: Order,
        amount: Decimal,
        currency: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            id,
            order,
            amount,
            currency: currency.into(),
            backend: backend.into(),
            external_id: None,
            status: PaymentStatus::New,
            amount_paid: Decimal::ZERO,
            paid_on: None,
        }
    }

    /// Record money received. Without an amount the full payment amount is assumed.
    pub fn on_success(&mut self, amount: Option<Decimal>) {
        self.amount_paid += amount.unwrap_or(self.amount);
        self.paid_on = Some(Utc::now());
        self.status = if self.amount_paid >= self.amount {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        };
    }

    pub fn on_failure(&mut self) {
        self.status = PaymentStatus::Failed;
    }

    pub fn change_status(&mut self, status: PaymentStatus) {
        self.status = status;
    }

    pub fn abandon(&mut self) {
        if !self.status.outcome().is_terminal() {
            self.status = PaymentStatus::Abandoned;
        }
    }
}

/// Scheme and host of the inbound browser request, used for absolute return URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub scheme: String,
    pub domain: String,
}

impl RequestContext {
    pub fn new(scheme: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            domain: domain.into(),
        }
    }

    pub fn build_absolute_uri(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.domain, path)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RedirectMethod {
    Get,
    Post,
}

/// Where to send the customer to pay: the `(url, method, extra_params)` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRedirect {
    pub url: String,
    pub method: RedirectMethod,
    pub params: Vec<(String, String)>,
}

impl GatewayRedirect {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: RedirectMethod::Get,
            params: Vec::new(),
        }
    }
}

/// Customer details supplied by the host for gateways that want them
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserData {
    pub lang: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub shipping_country: Option<String>,
    pub shipping_zip_code: Option<String>,
    pub shipping_address: Option<String>,
    pub shipping_city: Option<String>,
    pub billing_zip_code: Option<String>,
    pub billing_address: Option<String>,
    pub billing_city: Option<String>,
    pub billing_country: Option<String>,
}
