//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::UserId;
use saga::{MpesaConfig, MpesaEnvironment, StripeConfig};
use thiserror::Error;

/// A configuration value that is present but unusable.
#[derive(Debug, Error)]
#[error("invalid {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// A bearer token accepted without calling the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticToken {
    pub token: String,
    pub user_id: UserId,
    pub role: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for human-readable
/// - `DATABASE_URL`: PostgreSQL; without it everything is kept in memory
/// - `STOCK_SERVICE_URL`: catalog service; without it an in-memory catalog is used
/// - `AUTH_SERVICE_URL`: token verification service
/// - `AUTH_STATIC_TOKENS`: `token=user-uuid[:role]` pairs separated by commas,
///   used when `AUTH_SERVICE_URL` is unset
/// - `ORDER_SERVICE_URL`: when set, payment outcomes are sent there instead of
///   being applied in-process
/// - `INTERNAL_API_TOKEN`: required on `/internal/*` when set; mandatory
///   once any peer service URL is configured
/// - `COMPENSATION_INTERVAL_SECS`: pending compensation sweep period (default 30)
/// - `MPESA_*` and `STRIPE_*`: gateway credentials; a gateway without
///   credentials is not registered
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub stock_service_url: Option<String>,
    pub auth_service_url: Option<String>,
    pub static_tokens: Vec<StaticToken>,
    pub order_service_url: Option<String>,
    pub internal_api_token: Option<String>,
    pub compensation_interval: Duration,
    pub mpesa: Option<MpesaConfig>,
    pub stripe: Option<StripeConfig>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Empty values count as unset.
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError {
                key: "PORT",
                reason: format!("{raw:?} is not a port number"),
            })?,
            None => defaults.port,
        };
        let compensation_interval = match get("COMPENSATION_INTERVAL_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError {
                        key: "COMPENSATION_INTERVAL_SECS",
                        reason: format!("{raw:?} is not a positive number of seconds"),
                    });
                }
            },
            None => defaults.compensation_interval,
        };
        let log_format = match get("LOG_FORMAT").as_deref() {
            Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let static_tokens = match get("AUTH_STATIC_TOKENS") {
            Some(raw) => parse_static_tokens(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: get("DATABASE_URL"),
            stock_service_url: get("STOCK_SERVICE_URL"),
            auth_service_url: get("AUTH_SERVICE_URL"),
            static_tokens,
            order_service_url: get("ORDER_SERVICE_URL"),
            internal_api_token: get("INTERNAL_API_TOKEN"),
            compensation_interval,
            mpesa: mpesa_config(&get)?,
            stripe: get("STRIPE_SECRET_KEY").map(|secret_key| StripeConfig {
                secret_key,
                webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
                api_base: get("STRIPE_API_BASE"),
            }),
        })
    }

    /// True when no peer service is configured and everything runs in-process.
    pub fn is_standalone(&self) -> bool {
        self.stock_service_url.is_none()
            && self.auth_service_url.is_none()
            && self.order_service_url.is_none()
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            stock_service_url: None,
            auth_service_url: None,
            static_tokens: Vec::new(),
            order_service_url: None,
            internal_api_token: None,
            compensation_interval: Duration::from_secs(30),
            mpesa: None,
            stripe: None,
        }
    }
}

fn mpesa_config(get: &impl Fn(&str) -> Option<String>) -> Result<Option<MpesaConfig>, ConfigError> {
    let (
        Some(consumer_key),
        Some(consumer_secret),
        Some(shortcode),
        Some(passkey),
        Some(callback_url),
    ) = (
        get("MPESA_CONSUMER_KEY"),
        get("MPESA_CONSUMER_SECRET"),
        get("MPESA_SHORTCODE"),
        get("MPESA_PASSKEY"),
        get("MPESA_CALLBACK_URL"),
    )
    else {
        return Ok(None);
    };

    let environment = match get("MPESA_ENVIRONMENT") {
        Some(raw) => raw.parse::<MpesaEnvironment>().map_err(|e| ConfigError {
            key: "MPESA_ENVIRONMENT",
            reason: e.to_string(),
        })?,
        None => MpesaEnvironment::Sandbox,
    };

    Ok(Some(MpesaConfig {
        consumer_key,
        consumer_secret,
        shortcode,
        passkey,
        callback_url,
        callback_token: get("MPESA_CALLBACK_TOKEN"),
        environment,
        base_url: get("MPESA_BASE_URL"),
    }))
}

fn parse_static_tokens(raw: &str) -> Result<Vec<StaticToken>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = |reason: String| ConfigError {
                key: "AUTH_STATIC_TOKENS",
                reason,
            };
            let (token, rest) = entry
                .split_once('=')
                .ok_or_else(|| invalid(format!("{entry:?} is not token=user-id")))?;
            let (user, role) = rest.split_once(':').unwrap_or((rest, "customer"));
            let user_id = UserId::parse(user)
                .map_err(|e| invalid(format!("{user:?} is not a UUID: {e}")))?;
            Ok(StaticToken {
                token: token.to_string(),
                user_id,
                role: role.to_string(),
            })
        })
        .collect()
}
