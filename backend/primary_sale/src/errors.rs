//! Application-wide error types.
//!
//! Expected business outcomes (`NoProjectId`, `NoMinterConfigured`,
//! `UserRejected`, ...) get their own variants so callers can branch on them
//! without inspecting messages.

use thiserror::Error;

use crate::types::Address;

#[derive(Debug, Error)]
pub enum SaleError {
    #[error("No project id was provided")]
    NoProjectId,

    #[error("Project {0} was not found")]
    ProjectNotFound(String),

    #[error("Project has no minter configured")]
    NoMinterConfigured,

    #[error("User rejected the request")]
    UserRejected,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Live sale data is not available yet")]
    LiveSaleDataUnavailable,

    #[error("Allowlist does not match the configured merkle root")]
    AllowlistRootMismatch,

    #[error("Token {contract} #{token_id} does not make this wallet eligible")]
    HolderTokenNotEligible { contract: Address, token_id: u128 },

    #[error("Missing purchase data: {0}")]
    MissingPurchaseData(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SaleError>;
