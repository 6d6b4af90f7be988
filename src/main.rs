use getpaid_gateways::api::{self, AppState};
use getpaid_gateways::config::Config;
use getpaid_gateways::payments::providers::{EserviceAdapter, SaferpayAdapter};
use getpaid_gateways::payments::repository::{InMemoryPaymentRepository, PaymentRepository};
use getpaid_gateways::tasks;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_tracing(&config.server.log_format);

    tracing::info!("Starting getpaid gateways");
    tracing::info!("Environment: {}", config.server.environment);

    let payments: Arc<dyn PaymentRepository> = Arc::new(InMemoryPaymentRepository::new());

    let eservice = match config.eservice.clone() {
        Some(settings) => {
            let (queue, receiver) = tasks::status_task_channel();
            let adapter = Arc::new(EserviceAdapter::new(
                settings,
                &config.http,
                payments.clone(),
                Arc::new(queue),
            )?);
            tokio::spawn(tasks::run_status_worker(
                receiver,
                adapter.clone(),
                config.polling.clone(),
            ));
            tracing::info!("eService backend enabled");
            Some(adapter)
        }
        None => None,
    };

    let saferpay = match config.saferpay.clone() {
        Some(settings) => {
            tracing::info!("Saferpay backend enabled (API at {})", settings.api_url());
            Some(Arc::new(SaferpayAdapter::new(
                settings,
                &config.http,
                payments.clone(),
            )?))
        }
        None => None,
    };

    let state = AppState {
        payments,
        eservice,
        saferpay,
        routes: config.routes.clone(),
        environment: config.server.environment.clone(),
    };
    let app = api::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
