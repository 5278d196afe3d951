use std::net::SocketAddr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub channels: ChannelConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub refresh_secret: String,
    pub token_expiry_minutes: i64,
    pub refresh_expiry_days: i64,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
    pub auto_close_cron: String,
    pub campaign_cron: String,
    pub scheduled_messages_cron: String,
    pub flow_timeout_cron: String,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub whatsapp_api_base: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("token_expiry_minutes", &self.token_expiry_minutes)
            .field("refresh_expiry_days", &self.refresh_expiry_days)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL"))?;

        let server = ServerConfig {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: parse_env("SERVER_PORT", 8080)?,
            cors_origins: env_or("CORS_ORIGINS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set, using development secret - DO NOT USE IN PRODUCTION");
            "dev-secret-key-change-in-production-minimum-32-chars".to_string()
        });
        let refresh_secret =
            std::env::var("JWT_REFRESH_SECRET").unwrap_or_else(|_| format!("{jwt_secret}-refresh"));

        let auth = AuthConfig {
            jwt_secret,
            refresh_secret,
            token_expiry_minutes: parse_env("JWT_EXPIRY_MINUTES", 15)?,
            refresh_expiry_days: parse_env("JWT_REFRESH_EXPIRY_DAYS", 7)?,
        };

        let scheduler = SchedulerConfig {
            tick_seconds: parse_env("SCHEDULER_TICK_SECONDS", 10)?,
            auto_close_cron: env_or("AUTO_CLOSE_CRON", "0 */5 * * * *"),
            campaign_cron: env_or("CAMPAIGN_CRON", "*/30 * * * * *"),
            scheduled_messages_cron: env_or("SCHEDULED_MESSAGES_CRON", "0 * * * * *"),
            flow_timeout_cron: env_or("FLOW_TIMEOUT_CRON", "0 * * * * *"),
        };

        let channels = ChannelConfig {
            whatsapp_api_base: env_or("WHATSAPP_API_BASE", "https://graph.facebook.com/v17.0"),
        };

        Ok(Self {
            database_url,
            server,
            auth,
            scheduler,
            channels,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.server.host, self.server.port);
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "SERVER_HOST",
            value: raw,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_default_when_missing() {
        let port: u16 = parse_env("CHATDESK_TEST_UNSET_PORT", 9000).unwrap();
        assert_eq!(port, 9000);
    }

    #[test]
    fn test_auth_config_debug_redacts_secrets() {
        let auth = AuthConfig {
            jwt_secret: "super-secret".into(),
            refresh_secret: "other-secret".into(),
            token_expiry_minutes: 15,
            refresh_expiry_days: 7,
        };
        let printed = format!("{auth:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("REDACTED"));
    }
}
