use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::middleware::{ActionClass, FailMode, TrustTier};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Per-action quota limits, one per trust tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub standard: u64,
    pub elevated: u64,
}

impl TierLimits {
    pub fn for_tier(&self, tier: TrustTier) -> u64 {
        match tier {
            TrustTier::Standard => self.standard,
            TrustTier::Elevated => self.elevated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub window_secs: u64,
    pub upload: TierLimits,
    pub preview_link: TierLimits,
    pub fail_mode: FailMode,
}

impl QuotaConfig {
    pub fn limits(&self, action: ActionClass) -> TierLimits {
        match action {
            ActionClass::Upload => self.upload,
            ActionClass::PreviewLink => self.preview_link,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window_secs: 86_400,
            upload: TierLimits {
                standard: 10,
                elevated: 100,
            },
            preview_link: TierLimits {
                standard: 50,
                elevated: 500,
            },
            fail_mode: FailMode::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub signing_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub media_base_url: String,
    pub quota: QuotaConfig,
    pub store_timeout_ms: u64,
    pub signed_url_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub media_cache_ttl_secs: u64,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = QuotaConfig::default();
        let quota = QuotaConfig {
            window_secs: optional("QUOTA_WINDOW", defaults.window_secs)?,
            upload: TierLimits {
                standard: optional("UPLOAD_LIMIT_STANDARD", defaults.upload.standard)?,
                elevated: optional("UPLOAD_LIMIT_ELEVATED", defaults.upload.elevated)?,
            },
            preview_link: TierLimits {
                standard: optional("PREVIEW_LIMIT_STANDARD", defaults.preview_link.standard)?,
                elevated: optional("PREVIEW_LIMIT_ELEVATED", defaults.preview_link.elevated)?,
            },
            fail_mode: optional("QUOTA_FAIL_MODE", defaults.fail_mode)?,
        };
        if quota.window_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "QUOTA_WINDOW",
                value: "0".into(),
            });
        }

        let sweep_interval_secs: u64 = optional("SWEEP_INTERVAL", 300)?;
        if sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SWEEP_INTERVAL",
                value: "0".into(),
            });
        }

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            signing_secret: required("SIGNING_SECRET")?,
            server_host: optional("SERVER_HOST", "0.0.0.0".to_string())?,
            server_port: optional("SERVER_PORT", 3000)?,
            api_base_uri: optional("API_BASE_URI", "/api".to_string())?,
            media_base_url: optional("MEDIA_BASE_URL", String::new())?,
            quota,
            store_timeout_ms: optional("STORE_TIMEOUT_MS", 250)?,
            signed_url_ttl_secs: optional("SIGNED_URL_TTL", 3600)?,
            sweep_interval_secs,
            media_cache_ttl_secs: optional("MEDIA_CACHE_TTL", 60)?,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn media_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.media_cache_ttl_secs)
    }
}
