use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEFAULT_RELAY_BUFFER: usize = 64;
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Shared bearer token checked in front of /api and /ws
    pub api_token: Secret<String>,

    pub cors_origins: Vec<String>,

    // Per-connection outbound queue for real-time pushes
    pub relay_buffer: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            api_token: Secret::new(config.get("api_token")?),

            cors_origins: parse_list(
                &config
                    .get::<String>("cors_origins")
                    .unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.to_string()),
            ),

            relay_buffer: config
                .get("relay_buffer")
                .unwrap_or(DEFAULT_RELAY_BUFFER),
        })
    }
}

/// Settings for the client-side reconciliation layer
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub api_token: Option<Secret<String>>,
    pub actor_id: String,
    // Upper bound on a backend round-trip before switching to demo mode
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url, actor_id: impl Into<String>) -> Self {
        Self {
            base_url,
            api_token: None,
            actor_id: actor_id.into(),
            request_timeout: Duration::from_millis(DEFAULT_CLIENT_TIMEOUT_MS),
        }
    }

    pub fn from_env() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("client")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let base_url: String = config.get("base_url")?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| config::ConfigError::Message(format!("Invalid CLIENT_BASE_URL: {}", e)))?;

        Ok(Self {
            base_url,
            api_token: config.get::<String>("api_token").ok().map(Secret::new),
            actor_id: config.get("actor_id")?,
            request_timeout: Duration::from_millis(
                config
                    .get("timeout_ms")
                    .unwrap_or(DEFAULT_CLIENT_TIMEOUT_MS),
            ),
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
