use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const ESERVICE_GATEWAY_URL: &str = "https://pay.eservice.com.pl/";
pub const ESERVICE_TEST_GATEWAY_URL: &str = "https://testvpos.eservice.com.pl/";
pub const ESERVICE_API_URL: &str = "https://pay.eservice.com.pl:19445/fim/api";

pub const SAFERPAY_API_URL: &str = "https://www.saferpay.com/api/";
pub const SAFERPAY_TEST_API_URL: &str = "https://test.saferpay.com/api/";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub routes: ReturnRoutes,
    pub http: HttpClientSettings,
    pub polling: PollingPolicy,
    pub eservice: Option<EserviceSettings>,
    pub saferpay: Option<SaferpaySettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_format: String,
}

/// Landing routes owned by the host application. `{pk}` is replaced by the
/// payment primary key.
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnRoutes {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

impl Default for ReturnRoutes {
    fn default() -> Self {
        Self {
            success: "/payments/{pk}/success".to_string(),
            failure: "/payments/{pk}/failure".to_string(),
            pending: "/payments/{pk}/pending".to_string(),
        }
    }
}

impl ReturnRoutes {
    pub fn success_for(&self, pk: i64) -> String {
        self.success.replace("{pk}", &pk.to_string())
    }

    pub fn failure_for(&self, pk: i64) -> String {
        self.failure.replace("{pk}", &pk.to_string())
    }

    pub fn pending_for(&self, pk: i64) -> String {
        self.pending.replace("{pk}", &pk.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientSettings {
    pub timeout_secs: u64,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Retry budget for the eService status poller.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            max_retries: 50,
            delay: Duration::from_secs(2 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EserviceSettings {
    pub client_id: String,
    pub password: String,
    pub api_user: String,
    pub api_password: String,
    pub store_type: String,
    pub order_unique_id_field: String,
    pub lang: Option<String>,
    pub test: bool,
    pub gateway_url: String,
    pub api_url: String,
}

impl EserviceSettings {
    /// Returns `None` when the backend is not configured at all.
    pub fn from_env() -> Result<Option<Self>> {
        let client_id = match env::var("ESERVICE_CLIENT_ID") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        let test = parse_flag("ESERVICE_TEST")?;
        let default_gateway = if test {
            ESERVICE_TEST_GATEWAY_URL
        } else {
            ESERVICE_GATEWAY_URL
        };

        Ok(Some(Self {
            client_id,
            password: env::var("ESERVICE_PASSWORD").context("ESERVICE_PASSWORD not set")?,
            api_user: env::var("ESERVICE_API_USER").context("ESERVICE_API_USER not set")?,
            api_password: env::var("ESERVICE_API_PASSWORD")
                .context("ESERVICE_API_PASSWORD not set")?,
            store_type: env::var("ESERVICE_STORE_TYPE").context("ESERVICE_STORE_TYPE not set")?,
            order_unique_id_field: env::var("ESERVICE_ORDER_UNIQUE_ID_FIELD")
                .unwrap_or_else(|_| "id".to_string()),
            lang: env::var("ESERVICE_LANG").ok().filter(|s| !s.trim().is_empty()),
            test,
            gateway_url: env::var("ESERVICE_GATEWAY_URL")
                .unwrap_or_else(|_| default_gateway.to_string()),
            api_url: env::var("ESERVICE_API_URL").unwrap_or_else(|_| ESERVICE_API_URL.to_string()),
        }))
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("ESERVICE_CLIENT_ID", &self.client_id),
            ("ESERVICE_PASSWORD", &self.password),
            ("ESERVICE_API_USER", &self.api_user),
            ("ESERVICE_API_PASSWORD", &self.api_password),
            ("ESERVICE_STORE_TYPE", &self.store_type),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(anyhow!("{} cannot be empty", name));
            }
        }
        if !self.gateway_url.ends_with('/') {
            return Err(anyhow!(
                "ESERVICE_GATEWAY_URL must end with '/', got {}",
                self.gateway_url
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaferpaySettings {
    pub customer_id: String,
    pub api_username: String,
    pub api_password: String,
    pub terminal_id: String,
    pub api_version: String,
    pub recurring_field: Option<String>,
    pub order_unique_id_field: String,
    pub test: bool,
    pub api_url: Option<String>,
}

impl SaferpaySettings {
    pub fn from_env() -> Result<Option<Self>> {
        let customer_id = match env::var("SAFERPAY_CUSTOMER_ID") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };

        Ok(Some(Self {
            customer_id,
            api_username: env::var("SAFERPAY_API_USERNAME")
                .context("SAFERPAY_API_USERNAME not set")?,
            api_password: env::var("SAFERPAY_API_PASSWORD")
                .context("SAFERPAY_API_PASSWORD not set")?,
            terminal_id: env::var("SAFERPAY_TERMINAL_ID").context("SAFERPAY_TERMINAL_ID not set")?,
            api_version: env::var("SAFERPAY_API_VERSION").unwrap_or_else(|_| "1.3".to_string()),
            recurring_field: env::var("SAFERPAY_RECURRING_FIELD")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            order_unique_id_field: env::var("SAFERPAY_ORDER_UNIQUE_ID_FIELD")
                .unwrap_or_else(|_| "id".to_string()),
            test: parse_flag("SAFERPAY_TEST")?,
            api_url: env::var("SAFERPAY_API_URL").ok(),
        }))
    }

    /// Root of the REST API, honouring the sandbox toggle.
    pub fn api_url(&self) -> &str {
        match &self.api_url {
            Some(url) => url,
            None if self.test => SAFERPAY_TEST_API_URL,
            None => SAFERPAY_API_URL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("SAFERPAY_CUSTOMER_ID", &self.customer_id),
            ("SAFERPAY_API_USERNAME", &self.api_username),
            ("SAFERPAY_API_PASSWORD", &self.api_password),
            ("SAFERPAY_TERMINAL_ID", &self.terminal_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(anyhow!("{} cannot be empty", name));
            }
        }
        if !self.api_url().ends_with('/') {
            return Err(anyhow!("SAFERPAY_API_URL must end with '/', got {}", self.api_url()));
        }
        Ok(())
    }
}

fn parse_flag(name: &str) -> Result<bool> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow!("{} must be a boolean, got {}", name, other)),
        },
        Err(_) => Ok(false),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string()),
        };

        let defaults = ReturnRoutes::default();
        let routes = ReturnRoutes {
            success: env::var("RETURN_SUCCESS_ROUTE").unwrap_or(defaults.success),
            failure: env::var("RETURN_FAILURE_ROUTE").unwrap_or(defaults.failure),
            pending: env::var("RETURN_PENDING_ROUTE").unwrap_or(defaults.pending),
        };

        let http = HttpClientSettings {
            timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("GATEWAY_TIMEOUT_SECS must be a valid number")?,
        };

        let default_policy = PollingPolicy::default();
        let polling = PollingPolicy {
            max_retries: match env::var("ESERVICE_POLL_MAX_RETRIES") {
                Ok(value) => value
                    .parse()
                    .context("ESERVICE_POLL_MAX_RETRIES must be a valid number")?,
                Err(_) => default_policy.max_retries,
            },
            delay: match env::var("ESERVICE_POLL_DELAY_SECS") {
                Ok(value) => Duration::from_secs(
                    value
                        .parse()
                        .context("ESERVICE_POLL_DELAY_SECS must be a valid number")?,
                ),
                Err(_) => default_policy.delay,
            },
        };

        let config = Config {
            server,
            routes,
            http,
            polling,
            eservice: EserviceSettings::from_env()?,
            saferpay: SaferpaySettings::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        let valid_formats = ["plain", "json"];
        if !valid_formats.contains(&self.server.log_format.as_str()) {
            return Err(anyhow!(
                "LOG_FORMAT must be one of: {:?}, got {}",
                valid_formats,
                self.server.log_format
            ));
        }

        for (name, route) in [
            ("RETURN_SUCCESS_ROUTE", &self.routes.success),
            ("RETURN_FAILURE_ROUTE", &self.routes.failure),
            ("RETURN_PENDING_ROUTE", &self.routes.pending),
        ] {
            if route.trim().is_empty() {
                return Err(anyhow!("{} cannot be empty", name));
            }
        }

        if self.http.timeout_secs == 0 {
            return Err(anyhow!("GATEWAY_TIMEOUT_SECS must be greater than 0"));
        }

        if self.eservice.is_none() && self.saferpay.is_none() {
            return Err(anyhow!(
                "At least one backend must be configured (ESERVICE_CLIENT_ID or SAFERPAY_CUSTOMER_ID)"
            ));
        }

        if let Some(eservice) = &self.eservice {
            eservice.validate()?;
        }
        if let Some(saferpay) = &self.saferpay {
            saferpay.validate()?;
        }

        Ok(())
    }
}
