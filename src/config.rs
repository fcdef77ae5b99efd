use anyhow::Result;
use std::env;

/// Upper bound for day-valued settings, well inside what `chrono::Duration` holds.
pub const MAX_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiration_days: i64,
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub frontend_url: String,
    pub cors_origin: String,
    pub invitation_ttl_days: i64,
    /// Seconds between expiry sweeps; 0 disables the sweep.
    pub invitation_sweep_secs: u64,
    pub mail_from: String,
    pub mail_queue_capacity: usize,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_env_only()
    }

    /// Load configuration from environment variables only (without loading .env files)
    /// This is useful for testing where you want to control the environment directly
    pub fn from_env_only() -> Result<Self> {
        let frontend_url = var_or("FRONTEND_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();

        let jwt_secret = var_or(
            "JWT_SECRET",
            "your-super-secret-jwt-key-change-this-in-production-12345",
        );
        let environment = var_or("ENVIRONMENT", "development");

        if environment == "production" && jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters in production");
        }

        Ok(Config {
            database_url: var_or("DATABASE_URL", "postgres://@localhost:5432/hrm"),
            database_max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
            jwt_secret,
            jwt_expiration_days: parsed_or("JWT_EXPIRATION_DAYS", 30).clamp(1, MAX_DAYS),
            host: var_or("HOST", "127.0.0.1"),
            port: parsed_or("PORT", 8080),
            environment,
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| frontend_url.clone()),
            frontend_url,
            invitation_ttl_days: parsed_or("INVITATION_TTL_DAYS", 7).clamp(1, MAX_DAYS),
            invitation_sweep_secs: parsed_or("INVITATION_SWEEP_SECS", 3600),
            mail_from: var_or("MAIL_FROM", "no-reply@hrm.local"),
            mail_queue_capacity: parsed_or("MAIL_QUEUE_CAPACITY", 256).max(1),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fixed configuration for unit tests.
    pub fn test_config() -> Self {
        Config {
            database_url: "postgres://@localhost:5432/hrm_test".to_string(),
            database_max_connections: 1,
            jwt_secret: "test-jwt-secret-key-that-is-long-enough".to_string(),
            jwt_expiration_days: 1,
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            frontend_url: "http://frontend.test".to_string(),
            cors_origin: "http://frontend.test".to_string(),
            invitation_ttl_days: 7,
            invitation_sweep_secs: 0,
            mail_from: "no-reply@hrm.test".to_string(),
            mail_queue_capacity: 16,
        }
    }
}
