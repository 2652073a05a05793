use std::time::Duration;

use clap::Parser;
use url::Url;

/// Identity used in stub mode when no `USER_ID` is configured.
pub const STUB_USER_ID: &str = "stub";

/// Startup configuration, resolved once from flags and environment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "stas-bridge",
    version,
    about = "STAS connector bridge: plan resources and tools over HTTP/SSE"
)]
pub struct BridgeConfig {
    /// Gateway base URL. Absent means stub mode with canned data
    #[arg(long, env = "BRIDGE_BASE")]
    pub bridge_base: Option<String>,

    /// Bearer credential forwarded to the gateway
    #[arg(long, env = "BRIDGE_TOKEN", hide_env_values = true)]
    pub bridge_token: Option<String>,

    /// Fixed identity; takes priority over connection links
    #[arg(long, env = "USER_ID")]
    pub user_id: Option<String>,

    /// Operator secret required as a bearer credential on `POST /link`.
    /// Absent means linking over HTTP is disabled
    #[arg(long, env = "BRIDGE_LINK_SECRET", hide_env_values = true)]
    pub link_secret: Option<String>,

    /// Allow `session.set_user_id` to act for another user in this process
    #[arg(long, env = "BRIDGE_ALLOW_SESSION_USER", default_value_t = false)]
    pub allow_session_user: bool,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Seconds between SSE ping events
    #[arg(long, env = "BRIDGE_PING_INTERVAL_SECS", default_value_t = 25)]
    pub ping_interval_secs: u64,

    /// Gateway request timeout in seconds
    #[arg(long, env = "BRIDGE_REQUEST_TIMEOUT_SECS", default_value_t = 25)]
    pub request_timeout_secs: u64,

    /// PostgreSQL URL for durable connection links. Absent means in-memory links
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Extra CORS origins, comma-separated
    #[arg(long, env = "BRIDGE_CORS_ORIGINS", default_value = "http://localhost:3000")]
    pub cors_origins: String,
}

/// Which gateway implementation the bridge runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Bridge { base: Url, token: Option<String> },
    Stub,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Bridge { .. } => "bridge",
            Mode::Stub => "stub",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BRIDGE_BASE is not a valid URL: {0}")]
    InvalidBase(#[from] url::ParseError),
    #[error("BRIDGE_BASE must be an http(s) URL, got scheme '{0}'")]
    UnsupportedScheme(String),
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl BridgeConfig {
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        let Some(base) = non_empty(&self.bridge_base) else {
            return Ok(Mode::Stub);
        };
        let base = Url::parse(&base)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(base.scheme().to_string()));
        }
        Ok(Mode::Bridge {
            base,
            token: non_empty(&self.bridge_token),
        })
    }

    /// Identity that bypasses linking. Stub mode always has one.
    pub fn fixed_user_id(&self, mode: &Mode) -> Option<String> {
        non_empty(&self.user_id).or_else(|| match mode {
            Mode::Stub => Some(STUB_USER_ID.to_string()),
            Mode::Bridge { .. } => None,
        })
    }

    pub fn link_secret(&self) -> Option<String> {
        non_empty(&self.link_secret)
    }

    pub fn database_url(&self) -> Option<String> {
        non_empty(&self.database_url)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
