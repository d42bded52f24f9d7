//! Environment-built runtime configuration. Read once at startup into an
//! immutable struct; components receive what they need explicitly.

use thiserror::Error;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// Redis endpoint. Absent = hub runs local-only (single instance).
    pub broker_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry_min: i64,
    pub allowed_origins: Vec<String>,
    pub score_refresh_secs: u64,
    pub session_idle_secs: u64,
    pub port: u16,
    pub push_credentials_path: Option<String>,
    pub sms_sender_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "JWT_SECRET",
                "must be at least 32 bytes".into(),
            ));
        }
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            broker_url: std::env::var("BROKER_URL").ok().filter(|v| !v.is_empty()),
            jwt_secret,
            jwt_expiry_min: parsed("JWT_EXPIRY_MIN", 1440)?,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            score_refresh_secs: parsed("SCORE_REFRESH_SECS", 30)?,
            session_idle_secs: parsed("SESSION_IDLE_SECS", 120)?,
            port: parsed("PORT", 8080)?,
            push_credentials_path: std::env::var("PUSH_CREDENTIALS_PATH").ok(),
            sms_sender_id: std::env::var("SMS_SENDER_ID").ok(),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name, v)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test so they
    // cannot race each other under the parallel test runner.
    #[test]
    fn from_env_roundtrip() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/safehorizon");
        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
        std::env::set_var("ALLOWED_ORIGINS", "https://a.example, https://b.example");
        std::env::remove_var("BROKER_URL");
        std::env::remove_var("JWT_EXPIRY_MIN");
        std::env::remove_var("SCORE_REFRESH_SECS");
        std::env::remove_var("SESSION_IDLE_SECS");
        std::env::remove_var("PORT");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.jwt_expiry_min, 1440);
        assert_eq!(cfg.score_refresh_secs, 30);
        assert_eq!(cfg.session_idle_secs, 120);
        assert_eq!(cfg.port, 8080);
        assert!(cfg.broker_url.is_none());
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);

        std::env::set_var("JWT_SECRET", "short");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("JWT_SECRET", _))
        ));

        std::env::remove_var("JWT_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
    }
}
