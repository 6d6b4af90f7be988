mod common;

use axum::body::Body;
use axum::extract::{Form, State};
use axum::http::{header, Request, StatusCode};
use axum::routing::post;
use axum::Router;
use common::{CountingRepository, RecordingScheduler};
use getpaid_gateways::api::{self, AppState};
use getpaid_gateways::config::PollingPolicy;
use getpaid_gateways::error::{AppErrorKind, DomainError};
use getpaid_gateways::payments::providers::eservice::{compute_hash, EserviceAdapter};
use getpaid_gateways::payments::repository::PaymentRepository;
use getpaid_gateways::payments::host::{EnrichmentProvider, NoEnrichment};
use getpaid_gateways::payments::types::{
    Order, Payment, PaymentStatus, RedirectMethod, RequestContext, UserData,
};
use getpaid_gateways::payments::GatewayAdapter;
use getpaid_gateways::tasks::{self, PollOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

const PAYMENT_ID: i64 = 7;
// order 1001 + payment 7
const ORDER_ID: &str = "10017";

#[derive(Clone, Default)]
struct FakeBank {
    token_reply: Arc<Mutex<String>>,
    status_reply: Arc<Mutex<String>>,
    token_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    status_requests: Arc<Mutex<Vec<String>>>,
}

impl FakeBank {
    fn reply_status(&self, proc_ret_cd: &str, trans_stat: &str) {
        *self.status_reply.lock().unwrap() = status_xml(proc_ret_cd, trans_stat);
    }

    fn status_calls(&self) -> usize {
        self.status_requests.lock().unwrap().len()
    }
}

fn status_xml(proc_ret_cd: &str, trans_stat: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<CC5Response>
  <OrderId>{}</OrderId>
  <Extra>
    <PROC_RET_CD>{}</PROC_RET_CD>
    <TRANS_STAT>{}</TRANS_STAT>
  </Extra>
</CC5Response>"#,
        ORDER_ID, proc_ret_cd, trans_stat
    )
}

async fn token(State(bank): State<FakeBank>, Form(form): Form<HashMap<String, String>>) -> String {
    bank.token_requests.lock().unwrap().push(form);
    bank.token_reply.lock().unwrap().clone()
}

async fn order_status(State(bank): State<FakeBank>, body: String) -> String {
    bank.status_requests.lock().unwrap().push(body);
    bank.status_reply.lock().unwrap().clone()
}

struct Harness {
    bank: FakeBank,
    repo: Arc<CountingRepository>,
    scheduler: Arc<RecordingScheduler>,
    adapter: Arc<EserviceAdapter>,
}

async fn harness(currency: &str) -> Harness {
    harness_with(currency, Arc::new(NoEnrichment)).await
}

async fn harness_with(currency: &str, enrichment: Arc<dyn EnrichmentProvider>) -> Harness {
    let bank = FakeBank::default();
    *bank.token_reply.lock().unwrap() = "status=ok&msg=TOKEN123".to_string();
    bank.reply_status("99", "PN");

    let base_url = common::spawn_bank(
        Router::new()
            .route("/pg/token", post(token))
            .route("/fim/api", post(order_status))
            .with_state(bank.clone()),
    )
    .await;

    let repo = Arc::new(CountingRepository::default());
    repo.insert(common::payment(PAYMENT_ID, 1001, "123.45", currency, "eservice"))
        .await
        .unwrap();
    let scheduler = Arc::new(RecordingScheduler::default());
    let adapter = EserviceAdapter::new(
        common::eservice_settings(&base_url),
        &common::http_settings(),
        repo.clone(),
        scheduler.clone(),
    )
    .unwrap()
    .with_enrichment(enrichment);

    Harness {
        bank,
        repo,
        scheduler,
        adapter: Arc::new(adapter),
    }
}

impl Harness {
    fn state(&self) -> AppState {
        AppState {
            payments: self.repo.clone(),
            eservice: Some(self.adapter.clone()),
            saferpay: None,
            routes: common::routes(),
            environment: "test".to_string(),
        }
    }

    async fn set_external_id(&self) {
        self.repo
            .atomic_update(
                PAYMENT_ID,
                Box::new(|p: &mut Payment| p.external_id = Some(ORDER_ID.to_string())),
            )
            .await
            .unwrap();
    }

    async fn status(&self) -> PaymentStatus {
        self.repo.get(PAYMENT_ID).await.unwrap().status
    }
}

fn signed_callback(order_id: &str, md_status: &str, password: &str) -> String {
    signed_callback_with("OrderId:mdStatus:", order_id, md_status, password)
}

fn signed_callback_with(hashparams: &str, order_id: &str, md_status: &str, password: &str) -> String {
    let hash_data = format!("{}{}", order_id, md_status);
    serde_urlencoded::to_string([
        ("OrderId", order_id),
        ("mdStatus", md_status),
        ("HASHPARAMS", hashparams),
        ("HASHPARAMSVAL", hash_data.as_str()),
        ("HASH", compute_hash(&hash_data, password).as_str()),
        ("mdErrorMsg", "Karta &quot;odrzucona&quot;"),
    ])
    .unwrap()
}

fn callback_request(path: &str, form: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_gateway_url_carries_token_and_order() {
    let customer = |_: &Order| UserData {
        lang: Some("EN".to_string()),
        first_name: Some("Jan".to_string()),
        last_name: Some("Kowalski".to_string()),
        ..UserData::default()
    };
    let h = harness_with("PLN", Arc::new(customer)).await;
    let mut payment = h.repo.get(PAYMENT_ID).await.unwrap();
    let ctx = RequestContext::new("https", "shop.example.com");

    let redirect = h.adapter.get_gateway_url(&mut payment, &ctx).await.unwrap();
    assert_eq!(redirect.method, RedirectMethod::Get);

    let url = url::Url::parse(&redirect.url).unwrap();
    assert_eq!(url.path(), "/fim/eservicegate");
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    assert_eq!(query["ClientId"], "600100000");
    assert_eq!(query["OrderId"], ORDER_ID);
    assert_eq!(query["Total"], "123.45");
    assert_eq!(query["Currency"], "985");
    assert_eq!(query["Token"], "TOKEN123");
    assert_eq!(query["lang"], "en");
    assert_eq!(query["okUrl"], "https://shop.example.com/eservice/success/");
    assert_eq!(query["failUrl"], "https://shop.example.com/eservice/failure/");
    assert_eq!(query["pendingUrl"], "https://shop.example.com/eservice/pending/");
    assert_eq!(query["TranType"], "Auth");
    assert_eq!(query["ConsumerName"], "Jan");
    assert_eq!(query["BillToName"], "Jan Kowalski");
    assert_eq!(query["ShipToCountry"], "PL");
    assert!(!query.contains_key("Password"));

    assert_eq!(payment.external_id.as_deref(), Some(ORDER_ID));
    let stored = h.repo.get(PAYMENT_ID).await.unwrap();
    assert_eq!(stored.external_id.as_deref(), Some(ORDER_ID));
    assert_eq!(stored.status, PaymentStatus::New);

    let token_requests = h.bank.token_requests.lock().unwrap();
    assert_eq!(token_requests.len(), 1);
    assert_eq!(token_requests[0]["Password"], "STORE_KEY");
    assert_eq!(token_requests[0]["OrderId"], ORDER_ID);
    assert_eq!(token_requests[0]["Total"], "123.45");
    assert_eq!(token_requests[0]["Currency"], "985");
}

#[tokio::test]
async fn test_refused_token_is_sent_as_none() {
    let h = harness("PLN").await;
    *h.bank.token_reply.lock().unwrap() = "status=error&msg=Invalid+client".to_string();
    let mut payment = h.repo.get(PAYMENT_ID).await.unwrap();

    let redirect = h
        .adapter
        .get_gateway_url(&mut payment, &RequestContext::new("http", "localhost"))
        .await
        .unwrap();

    let url = url::Url::parse(&redirect.url).unwrap();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    assert_eq!(query["Token"], "None");
    // configured default language
    assert_eq!(query["lang"], "pl");
}

#[tokio::test]
async fn test_unknown_currency_rejected_before_calling_bank() {
    let h = harness("XYZ").await;
    let mut payment = h.repo.get(PAYMENT_ID).await.unwrap();

    let err = h
        .adapter
        .get_gateway_url(&mut payment, &RequestContext::new("http", "localhost"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        AppErrorKind::Domain(DomainError::UnsupportedCurrency { .. })
    ));
    assert!(h.bank.token_requests.lock().unwrap().is_empty());
    assert_eq!(h.repo.updates(), 0);
}

#[tokio::test]
async fn test_unprocessed_order_leaves_payment_untouched() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    let updates = h.repo.updates();

    for trans_stat in ["C", "S", "V"] {
        h.bank.reply_status("99", trans_stat);
        assert!(!h.adapter.check_order_status(PAYMENT_ID).await.unwrap());
    }

    assert_eq!(h.repo.updates(), updates);
    assert_eq!(h.status().await, PaymentStatus::New);
    let requests = h.bank.status_requests.lock().unwrap();
    assert!(requests[0].starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><CC5Request>"));
    assert!(requests[0].contains("<Name>apiuser</Name>"));
    assert!(requests[0].contains("<OrderId>10017</OrderId>"));
    assert!(requests[0].contains("<ORDERSTATUS>QUERY</ORDERSTATUS>"));
}

#[tokio::test]
async fn test_settled_order_applies_success_once() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    let updates = h.repo.updates();
    h.bank.reply_status("00", "S");

    assert!(h.adapter.check_order_status(PAYMENT_ID).await.unwrap());

    assert_eq!(h.repo.updates(), updates + 1);
    let payment = h.repo.get(PAYMENT_ID).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(payment.amount_paid, common::decimal("123.45"));
}

#[tokio::test]
async fn test_canceled_order_applies_failure_once() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    let updates = h.repo.updates();
    h.bank.reply_status("00", "V");

    assert!(h.adapter.check_order_status(PAYMENT_ID).await.unwrap());

    assert_eq!(h.repo.updates(), updates + 1);
    assert_eq!(h.status().await, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_pending_trans_stat_is_not_terminal() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    h.bank.reply_status("00", "PN");

    assert!(!h.adapter.check_order_status(PAYMENT_ID).await.unwrap());
    assert_eq!(h.status().await, PaymentStatus::New);
}

fn quick_policy(max_retries: u32) -> PollingPolicy {
    PollingPolicy {
        max_retries,
        delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_polling_gives_up_and_abandons() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    h.bank.reply_status("00", "PN");

    let outcome = tasks::poll_payment_status(&h.adapter, PAYMENT_ID, &quick_policy(2)).await;

    assert_eq!(outcome, PollOutcome::Abandoned);
    assert_eq!(h.bank.status_calls(), 3);
    assert_eq!(h.status().await, PaymentStatus::Abandoned);
}

#[tokio::test]
async fn test_polling_retries_after_bad_answers() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    *h.bank.status_reply.lock().unwrap() = "<html>maintenance".to_string();

    let outcome = tasks::poll_payment_status(&h.adapter, PAYMENT_ID, &quick_policy(1)).await;

    assert_eq!(outcome, PollOutcome::Abandoned);
    assert_eq!(h.bank.status_calls(), 2);
}

#[tokio::test]
async fn test_polling_stops_at_first_terminal_answer() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    h.bank.reply_status("00", "C");

    let outcome = tasks::poll_payment_status(&h.adapter, PAYMENT_ID, &quick_policy(5)).await;

    assert_eq!(outcome, PollOutcome::Settled);
    assert_eq!(h.bank.status_calls(), 1);
    assert_eq!(h.status().await, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_polling_missing_payment() {
    let h = harness("PLN").await;

    let outcome = tasks::poll_payment_status(&h.adapter, 999, &quick_policy(5)).await;

    assert_eq!(outcome, PollOutcome::PaymentMissing);
    assert_eq!(h.bank.status_calls(), 0);
}

#[tokio::test]
async fn test_pending_callback_schedules_status_check() {
    let h = harness("PLN").await;
    h.set_external_id().await;

    let response = api::router(h.state())
        .oneshot(callback_request(
            "/eservice/pending/",
            signed_callback(ORDER_ID, "1", "STORE_KEY"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/payments/7/pending");
    assert_eq!(h.status().await, PaymentStatus::InProgress);
    assert_eq!(h.scheduler.scheduled(), vec![PAYMENT_ID]);
}

#[tokio::test]
async fn test_pending_callback_without_trailing_separator() {
    let h = harness("PLN").await;
    h.set_external_id().await;

    let response = api::router(h.state())
        .oneshot(callback_request(
            "/eservice/pending/",
            signed_callback_with("OrderId:mdStatus", ORDER_ID, "1", "STORE_KEY"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/payments/7/pending");
    assert_eq!(h.status().await, PaymentStatus::InProgress);
    assert_eq!(h.scheduler.scheduled(), vec![PAYMENT_ID]);
}

#[tokio::test]
async fn test_success_callback_marks_paid() {
    let h = harness("PLN").await;
    h.set_external_id().await;

    let response = api::router(h.state())
        .oneshot(callback_request(
            "/eservice/success/",
            signed_callback(ORDER_ID, "1", "STORE_KEY"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/payments/7/success");
    assert_eq!(h.status().await, PaymentStatus::Paid);
    assert!(h.scheduler.scheduled().is_empty());
}

#[tokio::test]
async fn test_failure_callback_marks_failed() {
    let h = harness("PLN").await;
    h.set_external_id().await;

    let response = api::router(h.state())
        .oneshot(callback_request(
            "/eservice/failure/",
            signed_callback(ORDER_ID, "0", "STORE_KEY"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/payments/7/failure");
    assert_eq!(h.status().await, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_callback_with_bad_hash_is_rejected() {
    let h = harness("PLN").await;
    h.set_external_id().await;
    let updates = h.repo.updates();

    let response = api::router(h.state())
        .oneshot(callback_request(
            "/eservice/success/",
            signed_callback(ORDER_ID, "1", "WRONG_KEY"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.repo.updates(), updates);
    assert_eq!(h.status().await, PaymentStatus::New);
    assert!(h.scheduler.scheduled().is_empty());
}

#[tokio::test]
async fn test_callback_for_unknown_order_is_not_found() {
    let h = harness("PLN").await;

    let response = api::router(h.state())
        .oneshot(callback_request(
            "/eservice/success/",
            signed_callback("55555", "1", "STORE_KEY"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pending_callback_is_settled_by_worker() {
    let bank = FakeBank::default();
    bank.reply_status("00", "C");
    let base_url = common::spawn_bank(
        Router::new()
            .route("/pg/token", post(token))
            .route("/fim/api", post(order_status))
            .with_state(bank.clone()),
    )
    .await;

    let repo = Arc::new(CountingRepository::default());
    let mut payment = common::payment(PAYMENT_ID, 1001, "50.00", "PLN", "eservice");
    payment.external_id = Some(ORDER_ID.to_string());
    repo.insert(payment).await.unwrap();

    let (queue, receiver) = tasks::status_task_channel();
    let adapter = Arc::new(
        EserviceAdapter::new(
            common::eservice_settings(&base_url),
            &common::http_settings(),
            repo.clone(),
            Arc::new(queue),
        )
        .unwrap(),
    );
    tokio::spawn(tasks::run_status_worker(
        receiver,
        adapter.clone(),
        quick_policy(3),
    ));

    let state = AppState {
        payments: repo.clone(),
        eservice: Some(adapter),
        saferpay: None,
        routes: common::routes(),
        environment: "test".to_string(),
    };
    let response = api::router(state)
        .oneshot(callback_request(
            "/eservice/pending/",
            signed_callback(ORDER_ID, "1", "STORE_KEY"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let mut status = PaymentStatus::InProgress;
    for _ in 0..100 {
        status = repo.get(PAYMENT_ID).await.unwrap().status;
        if status == PaymentStatus::Paid {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, PaymentStatus::Paid);
    assert_eq!(bank.status_calls(), 1);
}
