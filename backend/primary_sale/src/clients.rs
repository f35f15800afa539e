//! Collaborator interfaces consumed by the sale actors.
//!
//! Concrete implementations live in [`crate::rpc`] (chain reads and the
//! wallet) and [`crate::graphql`] (project metadata). The actors only ever
//! see these traits, so hosts can swap clients at runtime and tests can use
//! in-memory fakes.

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{
    Address, OwnedToken, PriceInfo, Project, ProjectState, TransactionReceipt,
    TransactionRequest, TxHash,
};

/// Read-only access to chain state. Implementations must tolerate
/// concurrent calls on the same instance.
#[async_trait]
pub trait ChainReader: Send + Sync + 'static {
    /// Current price for the project on its assigned minter.
    ///
    /// Fails with [`crate::errors::SaleError::NoMinterConfigured`] when the
    /// project has no minter.
    async fn price_info(&self, project: &Project) -> Result<PriceInfo>;

    async fn project_state(&self, project: &Project) -> Result<ProjectState>;

    /// Remaining allowlist mints for `account`, or `None` when the minter
    /// does not limit mints per address.
    async fn merkle_mints_remaining(&self, project: &Project, account: Address)
        -> Result<Option<u64>>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<u128>;

    async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address)
        -> Result<u128>;

    async fn erc20_decimals(&self, token: Address) -> Result<u8>;

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>>;
}

/// A connected wallet able to submit transactions for its account.
#[async_trait]
pub trait WalletClient: Send + Sync + 'static {
    /// The active account, if the wallet currently exposes one.
    fn account(&self) -> Option<Address>;

    /// Submits a transaction. A dismissed signing prompt surfaces as
    /// [`crate::errors::SaleError::UserRejected`].
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;
}

/// Off-chain project metadata (the platform's GraphQL backend).
#[async_trait]
pub trait ProjectSource: Send + Sync + 'static {
    /// Fails with [`crate::errors::SaleError::ProjectNotFound`] for unknown ids.
    async fn fetch_project(&self, project_id: &str) -> Result<Project>;

    async fn fetch_allowlist(&self, project: &Project) -> Result<Vec<Address>>;

    /// Tokens owned by any of `owners` that belong to one of `project_ids`.
    async fn fetch_owned_tokens(
        &self,
        owners: &[Address],
        project_ids: &[String],
    ) -> Result<Vec<OwnedToken>>;

    /// Vault addresses that delegated to `delegate`.
    async fn fetch_delegation_vaults(&self, delegate: Address) -> Result<Vec<Address>>;
}
