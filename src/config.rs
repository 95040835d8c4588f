use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub catalog: CatalogConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub topic_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    /// Points charged per unit of catalog price, rounded up per product.
    pub points_per_unit: i64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditConfig {
    pub default_query_limit: i64,
    pub max_query_limit: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8084)?
            .set_default("server.workers", 4)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("nats.topic_prefix", "rewards")?
            .set_default("catalog.base_url", "https://fakestoreapi.com")?
            .set_default("catalog.points_per_unit", 100)?
            .set_default("catalog.timeout_seconds", 5)?
            .set_default("audit.default_query_limit", 100)?
            .set_default("audit.max_query_limit", 500)?
            .set_default("simulator.enabled", false)?
            .set_default("simulator.interval_seconds", 60)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("REWARDS_ENGINE")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("security.jwt_secret", secret)?;
        }

        if let Ok(port) = env::var("REWARDS_ENGINE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        // Validate configuration
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("Database pool bounds are inconsistent".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.catalog.base_url.is_empty() {
            return Err("Catalog base URL is required".to_string());
        }

        if self.catalog.points_per_unit <= 0 {
            return Err("Catalog points_per_unit must be positive".to_string());
        }

        if self.security.jwt_secret.is_empty() {
            return Err("JWT secret is required".to_string());
        }

        if self.audit.default_query_limit <= 0
            || self.audit.max_query_limit < self.audit.default_query_limit
        {
            return Err("Audit query limits are inconsistent".to_string());
        }

        if self.simulator.interval_seconds == 0 {
            return Err("Simulator interval cannot be 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8084,
                workers: 4,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/rewards".to_string(),
                max_connections: 10,
                min_connections: 2,
            },
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                topic_prefix: "rewards".to_string(),
            },
            catalog: CatalogConfig {
                base_url: "https://fakestoreapi.com".to_string(),
                points_per_unit: 100,
                timeout_seconds: 5,
            },
            security: SecurityConfig {
                jwt_secret: "test-secret".to_string(),
            },
            audit: AuditConfig {
                default_query_limit: 100,
                max_query_limit: 500,
            },
            simulator: SimulatorConfig {
                enabled: false,
                interval_seconds: 60,
            },
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = base_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pool_bounds_must_be_ordered() {
        let mut config = base_config();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn audit_limits_must_be_ordered() {
        let mut config = base_config();
        config.audit.max_query_limit = 10;
        assert!(config.validate().is_err());
    }
}
