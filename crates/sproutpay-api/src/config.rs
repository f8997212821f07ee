use std::env;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use url::Url;

const DEFAULT_WS_URL: &str = "wss://clearnet-sandbox.yellow.com/ws";
const DEFAULT_APP_NAME: &str = "SproutPay";
const DEFAULT_DB_PATH: &str = "./sproutpay.db";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_RATE_LIMIT_RPM: u32 = 100;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

#[derive(Clone)]
pub struct SproutConfig {
    /// Service wallet used to authenticate with the settlement network
    pub signer: PrivateKeySigner,
    /// ClearNode WebSocket endpoint
    pub ws_url: String,
    /// Application name announced during authentication
    pub app_name: String,
    /// SQLite database path
    pub db_path: String,
    /// Server port
    pub port: u16,
    /// Base URL share links point at
    pub frontend_url: String,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Channel monitor sweep interval
    pub monitor_interval: Duration,
    /// Fall back to a placeholder channel when opening a session fails
    pub virtual_channel_fallback: bool,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for SproutConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SproutConfig")
            .field("signer", &"[REDACTED]")
            .field("service_address", &self.signer.address())
            .field("ws_url", &self.ws_url)
            .field("app_name", &self.app_name)
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("frontend_url", &self.frontend_url)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("monitor_interval", &self.monitor_interval)
            .field("virtual_channel_fallback", &self.virtual_channel_fallback)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl SproutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Required: service wallet key
        let key = var("YELLOW_PRIVATE_KEY")
            .ok_or(ConfigError::MissingRequired("YELLOW_PRIVATE_KEY"))?;
        let signer = sproutpay::security::parse_private_key(&key)
            .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;

        let ws_url = var("YELLOW_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let parsed = Url::parse(&ws_url).map_err(|_| ConfigError::InvalidUrl(ws_url.clone()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl(format!(
                "{ws_url} (expected ws:// or wss://)"
            )));
        }

        let app_name = var("YELLOW_APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        let db_path = var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;

        let frontend_url = var("FRONTEND_URL")
            .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Url::parse(&frontend_url).map_err(|_| ConfigError::InvalidUrl(frontend_url.clone()))?;

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm = parse_or("RATE_LIMIT_RPM", var("RATE_LIMIT_RPM"), DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_RPM",
                value: "0".to_string(),
            });
        }

        let monitor_secs = parse_or(
            "CHANNEL_MONITOR_INTERVAL_SECS",
            var("CHANNEL_MONITOR_INTERVAL_SECS"),
            DEFAULT_MONITOR_INTERVAL_SECS,
        )?;
        if monitor_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHANNEL_MONITOR_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        let virtual_channel_fallback = match var("VIRTUAL_CHANNEL_FALLBACK").as_deref() {
            None => true,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "VIRTUAL_CHANNEL_FALLBACK",
                    value: other.to_string(),
                })
            }
        };

        let metrics_token = var("METRICS_TOKEN");

        if allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("ALLOWED_ORIGINS contains '*'; any site can call the payment API");
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }
        if !virtual_channel_fallback {
            tracing::info!("virtual channel fallback disabled; accepts fail when the network is unavailable");
        }

        Ok(Self {
            signer,
            ws_url,
            app_name,
            db_path,
            port,
            frontend_url,
            allowed_origins,
            rate_limit_rpm,
            monitor_interval: Duration::from_secs(monitor_secs),
            virtual_channel_fallback,
            metrics_token,
        })
    }

    pub fn share_url(&self, short_id: &str) -> String {
        format!("{}/link/{}", self.frontend_url, short_id)
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
