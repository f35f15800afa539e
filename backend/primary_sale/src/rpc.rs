//! Ethereum JSON-RPC clients: contract reads for the sale actors and a
//! node-managed wallet for submitting purchases.
//!
//! ## Resilience
//!
//! * Reads back off exponentially (from [`INITIAL_BACKOFF_SECS`] up to
//!   [`MAX_BACKOFF_SECS`]) on transport errors, rate limiting and soft RPC
//!   errors, giving up after [`MAX_READ_ATTEMPTS`].
//! * Transaction submission is attempted exactly once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::abi::{decode_bool, decode_u128, decode_u64, encode_call, words, Token};
use crate::clients::{ChainReader, WalletClient};
use crate::errors::{Result, SaleError};
use crate::types::{
    Address, PriceInfo, Project, ProjectState, TransactionReceipt, TransactionRequest, TxHash,
};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_READ_ATTEMPTS: u32 = 5;

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    /// Malformed requests, unknown methods and reverts will not succeed on
    /// a retry.
    fn is_hard(&self) -> bool {
        matches!(self.code, -32600 | -32601 | -32602 | 3 | USER_REJECTED_CODE)
    }

    fn into_error(self) -> SaleError {
        if self.code == USER_REJECTED_CODE {
            SaleError::UserRejected
        } else {
            SaleError::Rpc {
                code: self.code,
                message: self.message,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: TxHash,
    block_number: Option<String>,
    status: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EthRpcClient {
    client: Client,
    rpc_url: String,
}

impl EthRpcClient {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
        }
    }

    /// Issue a read, retrying transient failures with back-off.
    async fn read<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            let err = match self.call_once::<T>(method, &params).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.retryable || attempt >= MAX_READ_ATTEMPTS {
                return Err(err.error);
            }
            warn!(
                method,
                attempt, "RPC read failed (will retry in {backoff}s): {}", err.error
            );
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            attempt += 1;
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> std::result::Result<T, CallFailure> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(CallFailure::transport)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallFailure {
                error: SaleError::Rpc {
                    code: 429,
                    message: "rate limited".to_string(),
                },
                retryable: true,
            });
        }

        let body: RpcResponse<T> = response.json().await.map_err(CallFailure::transport)?;
        if let Some(err) = body.error {
            return Err(CallFailure {
                retryable: !err.is_hard(),
                error: err.into_error(),
            });
        }
        body.result.ok_or_else(|| CallFailure {
            error: SaleError::Rpc {
                code: 0,
                message: format!("Empty result from {method}"),
            },
            retryable: false,
        })
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        let raw: String = self
            .read(
                "eth_call",
                json!([{ "to": to, "data": hex_data(&data) }, "latest"]),
            )
            .await?;
        decode_hex_data(&raw)
    }
}

struct CallFailure {
    error: SaleError,
    retryable: bool,
}

impl CallFailure {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            error: SaleError::Http(err),
            retryable: true,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Hex helpers
// ─────────────────────────────────────────────────────────

fn hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn decode_hex_data(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(trimmed).map_err(|_| SaleError::InvalidHex(raw.to_string()))
}

fn parse_quantity(raw: &str) -> Result<u64> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(trimmed, 16).map_err(|_| SaleError::InvalidHex(raw.to_string()))
}

fn quantity(value: u128) -> String {
    format!("{value:#x}")
}

// ─────────────────────────────────────────────────────────
// Chain reads
// ─────────────────────────────────────────────────────────

#[async_trait]
impl ChainReader for EthRpcClient {
    async fn price_info(&self, project: &Project) -> Result<PriceInfo> {
        let minter = project
            .minter
            .as_ref()
            .ok_or(SaleError::NoMinterConfigured)?;
        let data = encode_call(
            "getPriceInfo(uint256,address)",
            &[
                Token::Uint(u128::from(project.project_index)),
                Token::Address(project.core_contract),
            ],
        );
        let out = self.eth_call(minter.address, data).await?;
        // (bool isConfigured, uint256 tokenPriceInWei, string symbol, address currency)
        let w = words(&out, 2)?;
        Ok(PriceInfo {
            is_configured: decode_bool(&w[0])?,
            token_price_in_wei: decode_u128(&w[1])?,
        })
    }

    async fn project_state(&self, project: &Project) -> Result<ProjectState> {
        let data = encode_call(
            "projectStateData(uint256)",
            &[Token::Uint(u128::from(project.project_index))],
        );
        let out = self.eth_call(project.core_contract, data).await?;
        // (invocations, maxInvocations, active, paused, completedTimestamp, locked)
        let w = words(&out, 5)?;
        let completed = decode_u64(&w[4])?;
        let state = ProjectState {
            invocations: decode_u64(&w[0])?,
            max_invocations: decode_u64(&w[1])?,
            active: decode_bool(&w[2])?,
            paused: decode_bool(&w[3])?,
            completed_timestamp: (completed != 0).then_some(completed),
        };
        debug!(project_id = %project.id, ?state, "Project state read");
        Ok(state)
    }

    async fn merkle_mints_remaining(
        &self,
        project: &Project,
        account: Address,
    ) -> Result<Option<u64>> {
        let minter = project
            .minter
            .as_ref()
            .ok_or(SaleError::NoMinterConfigured)?;
        let data = encode_call(
            "projectRemainingInvocationsForAddress(uint256,address,address)",
            &[
                Token::Uint(u128::from(project.project_index)),
                Token::Address(project.core_contract),
                Token::Address(account),
            ],
        );
        let out = self.eth_call(minter.address, data).await?;
        // (bool projectLimitsMintInvocationsPerAddress, uint256 remaining)
        let w = words(&out, 2)?;
        if decode_bool(&w[0])? {
            Ok(Some(decode_u64(&w[1])?))
        } else {
            Ok(None)
        }
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<u128> {
        let data = encode_call("balanceOf(address)", &[Token::Address(owner)]);
        let out = self.eth_call(token, data).await?;
        decode_u128(&words(&out, 1)?[0])
    }

    async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<u128> {
        let data = encode_call(
            "allowance(address,address)",
            &[Token::Address(owner), Token::Address(spender)],
        );
        let out = self.eth_call(token, data).await?;
        decode_u128(&words(&out, 1)?[0])
    }

    async fn erc20_decimals(&self, token: Address) -> Result<u8> {
        let out = self.eth_call(token, encode_call("decimals()", &[])).await?;
        let decimals = decode_u64(&words(&out, 1)?[0])?;
        u8::try_from(decimals).map_err(|_| SaleError::Abi(format!("invalid decimals {decimals}")))
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let raw: Option<RawReceipt> = match self
            .call_once("eth_getTransactionReceipt", &json!([tx_hash]))
            .await
        {
            Ok(receipt) => receipt,
            // `null` results (not yet mined) surface as an empty result.
            Err(CallFailure {
                error: SaleError::Rpc { code: 0, .. },
                ..
            }) => None,
            Err(failure) => return Err(failure.error),
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        let Some(block_number) = raw.block_number.as_deref() else {
            return Ok(None);
        };
        Ok(Some(TransactionReceipt {
            tx_hash: raw.transaction_hash,
            block_number: parse_quantity(block_number)?,
            success: raw.status.as_deref().map(parse_quantity).transpose()? == Some(1),
        }))
    }
}

// ─────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────

/// Wallet backed by an account the node manages (`eth_sendTransaction`).
#[derive(Debug, Clone)]
pub struct EthRpcWallet {
    rpc: EthRpcClient,
    account: Address,
}

impl EthRpcWallet {
    pub fn new(rpc: EthRpcClient, account: Address) -> Self {
        Self { rpc, account }
    }
}

#[async_trait]
impl WalletClient for EthRpcWallet {
    fn account(&self) -> Option<Address> {
        Some(self.account)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let params = json!([{
            "from": tx.from,
            "to": tx.to,
            "data": hex_data(&tx.data),
            "value": quantity(tx.value),
        }]);
        self.rpc
            .call_once("eth_sendTransaction", &params)
            .await
            .map_err(|failure| failure.error)
    }
}
