//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{Result, SaleError};
use crate::types::Address;

#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint used for reads and, with a wallet address,
    /// for submitting purchases
    pub rpc_url: String,
    /// GraphQL endpoint serving project metadata
    pub graphql_url: String,
    /// Optional API key sent as `x-api-key` to the GraphQL endpoint
    pub graphql_api_key: Option<String>,
    /// Project to sell. Without one the sale is ineligible.
    pub project_id: Option<String>,
    /// Node-managed account to purchase from
    pub wallet_address: Option<Address>,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Delay between live sale data reads
    pub live_sale_poll_interval_secs: u64,
    /// Delay between receipt lookups for submitted purchases
    pub receipt_poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            graphql_url: env_var("GRAPHQL_URL").map_err(|_| {
                SaleError::Config("GRAPHQL_URL environment variable is required".to_string())
            })?,
            graphql_api_key: env_var("GRAPHQL_API_KEY").ok(),
            project_id: env_var("PROJECT_ID").ok().filter(|id| !id.trim().is_empty()),
            wallet_address: env_var("WALLET_ADDRESS")
                .ok()
                .map(|raw| {
                    raw.parse()
                        .map_err(|_| SaleError::Config("Invalid WALLET_ADDRESS".to_string()))
                })
                .transpose()?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./primary_sale.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3002".to_string())
                .parse()
                .map_err(|_| SaleError::Config("Invalid API_PORT".to_string()))?,
            live_sale_poll_interval_secs: interval_secs(
                "LIVE_SALE_POLL_INTERVAL_SECS",
                env_var("LIVE_SALE_POLL_INTERVAL_SECS").ok(),
                10,
            )?,
            receipt_poll_interval_secs: interval_secs(
                "RECEIPT_POLL_INTERVAL_SECS",
                env_var("RECEIPT_POLL_INTERVAL_SECS").ok(),
                4,
            )?,
        })
    }

    pub fn live_sale_poll_interval(&self) -> Duration {
        Duration::from_secs(self.live_sale_poll_interval_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_secs(self.receipt_poll_interval_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| SaleError::Config(format!("Missing env var: {key}")))
}

/// Poll intervals must be whole, non-zero seconds.
fn interval_secs(key: &str, raw: Option<String>, default: u64) -> Result<u64> {
    let secs = match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SaleError::Config(format!("Invalid {key}")))?,
        None => default,
    };
    if secs == 0 {
        return Err(SaleError::Config(format!("{key} must be greater than zero")));
    }
    Ok(secs)
}
