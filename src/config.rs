use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Redis configuration (event bus + user cache)
    pub redis_url: String,
    pub cache_ttl: u64,

    // Authentication configuration
    pub jwt_secret: String,
    pub jwt_expiry_secs: u64,

    // Event bus configuration
    pub notification_stream: String,
    pub notification_group: String,
    pub dead_letter_stream: String,
    pub dispatcher_count: usize,
    pub bus_block_ms: u64,
    pub bus_batch_size: usize,
    pub bus_claim_interval_secs: u64,
    pub bus_claim_min_idle_secs: u64,
    pub bus_max_deliveries: u64,

    // Streaming configuration
    pub stream_idle_timeout_secs: u64,
    pub stream_channel_capacity: usize,

    // Content settings
    pub max_post_length: usize,
    pub max_comment_length: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,

    // Rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_window: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "sns".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "pulse".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            cache_ttl: env::var("CACHE_TTL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            jwt_expiry_secs: env::var("JWT_EXPIRY_SECS")
                .unwrap_or_else(|_| "2592000".to_string())
                .parse()?,

            notification_stream: env::var("NOTIFICATION_STREAM")
                .unwrap_or_else(|_| "notifications".to_string()),
            notification_group: env::var("NOTIFICATION_GROUP")
                .unwrap_or_else(|_| "notification-dispatchers".to_string()),
            dead_letter_stream: env::var("DEAD_LETTER_STREAM")
                .unwrap_or_else(|_| "notifications:dead-letter".to_string()),
            dispatcher_count: env::var("DISPATCHER_COUNT")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            bus_block_ms: env::var("BUS_BLOCK_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            bus_batch_size: env::var("BUS_BATCH_SIZE")
                .unwrap_or_else(|_| "32".to_string())
                .parse()?,
            bus_claim_interval_secs: env::var("BUS_CLAIM_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            bus_claim_min_idle_secs: env::var("BUS_CLAIM_MIN_IDLE_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            bus_max_deliveries: env::var("BUS_MAX_DELIVERIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            stream_idle_timeout_secs: env::var("STREAM_IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
            stream_channel_capacity: env::var("STREAM_CHANNEL_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,

            max_post_length: env::var("MAX_POST_LENGTH")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            max_comment_length: env::var("MAX_COMMENT_LENGTH")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            default_page_size: env::var("DEFAULT_PAGE_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            max_page_size: env::var("MAX_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            rate_limit_window: env::var("RATE_LIMIT_WINDOW")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            database_url: "http://localhost:8000".to_string(),
            database_namespace: "sns".to_string(),
            database_name: "pulse".to_string(),
            database_username: "root".to_string(),
            database_password: "root".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            cache_ttl: 3600,
            jwt_secret: "change-me".to_string(),
            jwt_expiry_secs: 2_592_000,
            notification_stream: "notifications".to_string(),
            notification_group: "notification-dispatchers".to_string(),
            dead_letter_stream: "notifications:dead-letter".to_string(),
            dispatcher_count: 2,
            bus_block_ms: 5000,
            bus_batch_size: 32,
            bus_claim_interval_secs: 30,
            bus_claim_min_idle_secs: 60,
            bus_max_deliveries: 5,
            stream_idle_timeout_secs: 3600,
            stream_channel_capacity: 64,
            max_post_length: 10_000,
            max_comment_length: 1000,
            default_page_size: 20,
            max_page_size: 100,
            rate_limit_requests: 100,
            rate_limit_window: 60,
            cors_allowed_origins: "http://localhost:3001".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_applies_defaults() {
        env::set_var("JWT_SECRET", "test-secret");

        let config = Config::from_env().unwrap();
        assert_eq!(config.jwt_secret, "test-secret");
        assert_eq!(config.server_host, "0.0.0.0");
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.notification_stream, "notifications");
        assert_eq!(config.dead_letter_stream, "notifications:dead-letter");
        assert_eq!(config.bus_max_deliveries, 5);
        assert_eq!(config.stream_idle_timeout_secs, 3600);
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn test_environment_helpers() {
        let mut config = Config::default();
        assert!(config.is_development());
        assert!(!config.is_production());

        config.environment = "production".to_string();
        assert!(config.is_production());
        assert!(!config.is_development());
    }
}
