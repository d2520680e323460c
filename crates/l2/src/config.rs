//! Environment-driven configuration for an L2 shard node.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct L2Config {
    pub shard_id: String,
    pub client_group: String,
    pub l2_node_id: String,
    pub http_port: u16,
    pub db: DbConfig,
    pub l1_endpoint: String,
}

impl L2Config {
    /// Reads `SHARD_ID`, `CLIENT_GROUP`, `L2_NODE_ID`, `HTTP_PORT`, `DB_*`,
    /// and `L1_ENDPOINT` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let shard_id = required("SHARD_ID")?;
        let client_group = required("CLIENT_GROUP")?;
        let l1_endpoint = required("L1_ENDPOINT")?;
        let l2_node_id = optional("L2_NODE_ID", &format!("{}-node", shard_id));

        let http_port = optional("HTTP_PORT", "8090")
            .parse::<u16>()
            .map_err(|e| ConfigError::Invalid("HTTP_PORT", e.to_string()))?;
        let db_port = optional("DB_PORT", "5432")
            .parse::<u16>()
            .map_err(|e| ConfigError::Invalid("DB_PORT", e.to_string()))?;

        Ok(Self {
            shard_id,
            client_group,
            l2_node_id,
            http_port,
            db: DbConfig {
                host: optional("DB_HOST", "localhost"),
                port: db_port,
                user: optional("DB_USER", "postgres"),
                password: optional("DB_PASSWORD", "postgres"),
                name: optional("DB_NAME", "l2"),
            },
            l1_endpoint,
        })
    }
}
