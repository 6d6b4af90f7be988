//! Payment persistence capability
//!
//! Backends never own payment rows. The host hands them a [`PaymentRepository`]
//! and every state change goes through [`PaymentRepository::atomic_update`],
//! which the host runs inside its own transaction scope.

use crate::error::{AppResult, DomainError};
use crate::payments::types::{Payment, PaymentId};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Mutation applied to a payment while the host holds its transaction
pub type PaymentUpdate = Box<dyn FnOnce(&mut Payment) + Send>;

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fetch a payment by primary key
    async fn get(&self, id: PaymentId) -> AppResult<Payment>;

    /// Look a payment up by the correlation key a backend assigned to it
    async fn find_by_external_id(&self, external_id: &str) -> AppResult<Option<Payment>>;

    /// Store a new payment, failing with `DuplicatePayment` if the id is taken
    async fn insert(&self, payment: Payment) -> AppResult<Payment>;

    /// Load, mutate and persist a payment as one atomic step
    async fn atomic_update(&self, id: PaymentId, update: PaymentUpdate) -> AppResult<Payment>;

    /// Check if a payment exists
    async fn exists(&self, id: PaymentId) -> AppResult<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Process-local repository, used by the reference binary and in tests
#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: RwLock<HashMap<PaymentId, Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free primary key
    pub async fn next_id(&self) -> PaymentId {
        let payments = self.payments.read().await;
        payments.keys().max().copied().unwrap_or(0) + 1
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn get(&self, id: PaymentId) -> AppResult<Payment> {
        let payments = self.payments.read().await;
        payments
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::PaymentNotFound { id }.into())
    }

    async fn find_by_external_id(&self, external_id: &str) -> AppResult<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn insert(&self, payment: Payment) -> AppResult<Payment> {
        let mut payments = self.payments.write().await;
        match payments.entry(payment.id) {
            Entry::Occupied(_) => Err(DomainError::DuplicatePayment { id: payment.id }.into()),
            Entry::Vacant(slot) => {
                debug!("Inserting payment {}", payment.id);
                slot.insert(payment.clone());
                Ok(payment)
            }
        }
    }

    async fn atomic_update(&self, id: PaymentId, update: PaymentUpdate) -> AppResult<Payment> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&id)
            .ok_or(DomainError::PaymentNotFound { id })?;
        update(payment);
        debug!("Payment {} is now {}", id, payment.status.as_str());
        Ok(payment.clone())
    }
}
