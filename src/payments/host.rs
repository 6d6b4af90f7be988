//! Capabilities the host application injects into the backends

use crate::error::AppResult;
use crate::payments::types::{Order, PaymentId, UserData};
use std::sync::Arc;

/// Supplies customer details for an order (language, billing and shipping data)
pub trait EnrichmentProvider: Send + Sync {
    fn fetch(&self, order: &Order) -> UserData;
}

/// Host without customer data to share
pub struct NoEnrichment;

impl EnrichmentProvider for NoEnrichment {
    fn fetch(&self, _order: &Order) -> UserData {
        UserData::default()
    }
}

impl<F> EnrichmentProvider for F
where
    F: Fn(&Order) -> UserData + Send + Sync,
{
    fn fetch(&self, order: &Order) -> UserData {
        self(order)
    }
}

/// Queues an out-of-band status check for a payment
pub trait StatusTaskScheduler: Send + Sync {
    fn schedule(&self, payment_id: PaymentId) -> AppResult<()>;
}

/// Stable identifier of an order as sent to a gateway
#[derive(Clone)]
pub struct OrderIdAccessor(Arc<dyn Fn(&Order) -> String + Send + Sync>);

impl OrderIdAccessor {
    pub fn new<F>(accessor: F) -> Self
    where
        F: Fn(&Order) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(accessor))
    }

    /// Reads the named order field. `id` is the primary key; any other name is
    /// looked up in the order attributes and falls back to the primary key.
    pub fn from_field(field: &str) -> Self {
        if field == "id" {
            return Self::new(|order| order.id.to_string());
        }
        let field = field.to_string();
        Self::new(move |order| match order.attributes.get(&field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => order.id.to_string(),
            Some(other) => other.to_string(),
        })
    }

    pub fn get(&self, order: &Order) -> String {
        (self.0)(order)
    }
}

impl std::fmt::Debug for OrderIdAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OrderIdAccessor")
    }
}
