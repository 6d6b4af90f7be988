#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use getpaid_gateways::config::{EserviceSettings, HttpClientSettings, ReturnRoutes, SaferpaySettings};
use getpaid_gateways::error::AppResult;
use getpaid_gateways::payments::host::StatusTaskScheduler;
use getpaid_gateways::payments::repository::{
    InMemoryPaymentRepository, PaymentRepository, PaymentUpdate,
};
use getpaid_gateways::payments::types::{Order, Payment, PaymentId};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serve a fake bank on an ephemeral port and return its base URL (with trailing slash)
pub async fn spawn_bank(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/", addr)
}

/// Repository that counts state changes
#[derive(Default)]
pub struct CountingRepository {
    inner: InMemoryPaymentRepository,
    updates: AtomicUsize,
}

impl CountingRepository {
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentRepository for CountingRepository {
    async fn get(&self, id: PaymentId) -> AppResult<Payment> {
        self.inner.get(id).await
    }

    async fn find_by_external_id(&self, external_id: &str) -> AppResult<Option<Payment>> {
        self.inner.find_by_external_id(external_id).await
    }

    async fn insert(&self, payment: Payment) -> AppResult<Payment> {
        self.inner.insert(payment).await
    }

    async fn atomic_update(&self, id: PaymentId, update: PaymentUpdate) -> AppResult<Payment> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.atomic_update(id, update).await
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<PaymentId>>,
}

impl RecordingScheduler {
    pub fn scheduled(&self) -> Vec<PaymentId> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl StatusTaskScheduler for RecordingScheduler {
    fn schedule(&self, payment_id: PaymentId) -> AppResult<()> {
        self.scheduled.lock().unwrap().push(payment_id);
        Ok(())
    }
}

pub fn decimal(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

pub fn payment(id: PaymentId, order_id: i64, amount: &str, currency: &str, backend: &str) -> Payment {
    Payment::new(
        id,
        Order::new(order_id, format!("Order {}", order_id)),
        decimal(amount),
        currency,
        backend,
    )
}

pub fn eservice_settings(base_url: &str) -> EserviceSettings {
    EserviceSettings {
        client_id: "600100000".to_string(),
        password: "STORE_KEY".to_string(),
        api_user: "apiuser".to_string(),
        api_password: "apipass".to_string(),
        store_type: "3d_pay_hosting".to_string(),
        order_unique_id_field: "id".to_string(),
        lang: Some("PL".to_string()),
        test: true,
        gateway_url: base_url.to_string(),
        api_url: format!("{}fim/api", base_url),
    }
}

pub fn saferpay_settings(base_url: &str) -> SaferpaySettings {
    SaferpaySettings {
        customer_id: "401860".to_string(),
        api_username: "API_401860_80003225".to_string(),
        api_password: "C-y*bv8346Ze5-T8".to_string(),
        terminal_id: "17795278".to_string(),
        api_version: "1.3".to_string(),
        recurring_field: None,
        order_unique_id_field: "id".to_string(),
        test: true,
        api_url: Some(base_url.to_string()),
    }
}

pub fn http_settings() -> HttpClientSettings {
    HttpClientSettings { timeout_secs: 5 }
}

pub fn routes() -> ReturnRoutes {
    ReturnRoutes::default()
}
