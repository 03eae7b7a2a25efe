use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::ratelimit::RateLimits;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub data_dir: PathBuf,
    pub persist_interval: Duration,
    pub sweep_interval: Duration,
    pub jwt_secret: String,
    pub jwt_previous_secret: Option<String>,
    pub session_ttl: Duration,
    pub challenge_ttl: Duration,
    pub secret_rotation_grace: Duration,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimits,
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

/// Per-process secret for when none is configured. Sessions die with
/// the process.
fn ephemeral_secret() -> String {
    tracing::warn!("JWT_SECRET not set, using a random per-process secret");
    hex::encode(crate::crypto::generate_nonce())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            version: env!("CARGO_PKG_VERSION").into(),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            persist_interval: env_secs("PERSIST_INTERVAL_SECS", 30),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", 60),
            jwt_secret: env::var("JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(ephemeral_secret),
            jwt_previous_secret: env::var("JWT_PREVIOUS_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            session_ttl: env_secs("SESSION_TTL_SECS", 24 * 60 * 60),
            challenge_ttl: env_secs("CHALLENGE_TTL_SECS", 60),
            secret_rotation_grace: env_secs("SECRET_ROTATION_GRACE_SECS", 24 * 60 * 60),
            rate_limit_enabled: env::var("RATE_LIMIT_ENABLED")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            rate_limits: RateLimits::default(),
        }
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
