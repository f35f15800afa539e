//! In-memory fakes for the collaborator traits, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::clients::{ChainReader, ProjectSource, WalletClient};
use crate::errors::{Result, SaleError};
use crate::types::{
    Address, Currency, LiveSaleData, MinterConfiguration, OwnedToken, PriceInfo, Project,
    ProjectState, TransactionReceipt, TransactionRequest, TxHash, H256,
};

pub fn addr(byte: u8) -> Address {
    Address([byte; 20])
}

pub const ARTIST: u8 = 0xa1;
pub const CORE: u8 = 0xaa;
pub const MINTER: u8 = 0xbb;
pub const PRICE: u128 = 100_000_000_000_000_000;

pub fn sample_project(minter_type: &str) -> Project {
    Project {
        id: "proj-1".to_string(),
        project_index: 1,
        core_contract: addr(CORE),
        artist_address: addr(ARTIST),
        name: "Fidenza".to_string(),
        complete: false,
        auction_start_time: None,
        auction_end_time: None,
        currency: Currency::default(),
        minter: Some(MinterConfiguration {
            address: addr(MINTER),
            minter_type: minter_type.to_string(),
            merkle_root: None,
            allowlisted_projects: Vec::new(),
        }),
    }
}

pub fn sample_live_data() -> LiveSaleData {
    LiveSaleData {
        is_configured: true,
        token_price_in_wei: PRICE,
        invocations: 10,
        max_invocations: 100,
        active: true,
        paused: false,
        completed_timestamp: None,
    }
}

// ─────────────────────────────────────────────────────────
// Chain reads
// ─────────────────────────────────────────────────────────

pub struct FakeChain {
    price: Mutex<PriceInfo>,
    state: Mutex<ProjectState>,
    failure: Mutex<Option<String>>,
    merkle_remaining: Mutex<Option<u64>>,
    erc20: Mutex<(u128, u128, u8)>,
    receipts: Mutex<HashMap<TxHash, TransactionReceipt>>,
    pub price_reads: AtomicUsize,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            price: Mutex::new(PriceInfo {
                is_configured: true,
                token_price_in_wei: PRICE,
            }),
            state: Mutex::new(ProjectState {
                invocations: 10,
                max_invocations: 100,
                active: true,
                paused: false,
                completed_timestamp: None,
            }),
            failure: Mutex::new(None),
            merkle_remaining: Mutex::new(None),
            erc20: Mutex::new((0, 0, 18)),
            receipts: Mutex::new(HashMap::new()),
            price_reads: AtomicUsize::new(0),
        }
    }
}

impl FakeChain {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_price(&self, price: PriceInfo) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_state(&self, state: ProjectState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_reads(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_merkle_mints_remaining(&self, remaining: Option<u64>) {
        *self.merkle_remaining.lock().unwrap() = remaining;
    }

    pub fn set_erc20(&self, balance: u128, allowance: u128, decimals: u8) {
        *self.erc20.lock().unwrap() = (balance, allowance, decimals);
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        self.receipts.lock().unwrap().insert(receipt.tx_hash, receipt);
    }

    pub fn reads(&self) -> usize {
        self.price_reads.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(SaleError::Rpc {
                code: -32000,
                message,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn price_info(&self, project: &Project) -> Result<PriceInfo> {
        self.price_reads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if project.minter.is_none() {
            return Err(SaleError::NoMinterConfigured);
        }
        Ok(*self.price.lock().unwrap())
    }

    async fn project_state(&self, _project: &Project) -> Result<ProjectState> {
        self.check_failure()?;
        Ok(*self.state.lock().unwrap())
    }

    async fn merkle_mints_remaining(
        &self,
        _project: &Project,
        _account: Address,
    ) -> Result<Option<u64>> {
        self.check_failure()?;
        Ok(*self.merkle_remaining.lock().unwrap())
    }

    async fn erc20_balance(&self, _token: Address, _owner: Address) -> Result<u128> {
        self.check_failure()?;
        Ok(self.erc20.lock().unwrap().0)
    }

    async fn erc20_allowance(
        &self,
        _token: Address,
        _owner: Address,
        _spender: Address,
    ) -> Result<u128> {
        self.check_failure()?;
        Ok(self.erc20.lock().unwrap().1)
    }

    async fn erc20_decimals(&self, _token: Address) -> Result<u8> {
        self.check_failure()?;
        Ok(self.erc20.lock().unwrap().2)
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.check_failure()?;
        Ok(self.receipts.lock().unwrap().get(&tx_hash).copied())
    }
}

// ─────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────

/// Wallet that answers from a queue of scripted results, falling back to
/// sequential fake hashes once the queue is empty.
pub struct FakeWallet {
    account: Option<Address>,
    scripted: Mutex<VecDeque<Result<TxHash>>>,
    pub sent: Mutex<Vec<TransactionRequest>>,
}

impl FakeWallet {
    pub fn new(account: Option<Address>) -> Self {
        Self {
            account,
            scripted: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(account: Address) -> Arc<Self> {
        Arc::new(Self::new(Some(account)))
    }

    pub fn push_result(&self, result: Result<TxHash>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl WalletClient for FakeWallet {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let scripted = self.scripted.lock().unwrap().pop_front();
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx);
        match scripted {
            Some(result) => result,
            None => Ok(H256([sent.len() as u8; 32])),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Project metadata
// ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSource {
    project: Mutex<Option<Project>>,
    failure: Mutex<Option<String>>,
    allowlist: Mutex<Vec<Address>>,
    owned_tokens: Mutex<Vec<OwnedToken>>,
    vaults: Mutex<Vec<Address>>,
    allowlist_gate: Mutex<Option<Arc<Semaphore>>>,
    pub project_fetches: AtomicUsize,
    pub allowlist_fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with_project(project: Project) -> Self {
        let source = Self::default();
        *source.project.lock().unwrap() = Some(project);
        source
    }

    pub fn failing(message: &str) -> Self {
        let source = Self::default();
        *source.failure.lock().unwrap() = Some(message.to_string());
        source
    }

    pub fn set_allowlist(&self, allowlist: Vec<Address>) {
        *self.allowlist.lock().unwrap() = allowlist;
    }

    pub fn set_owned_tokens(&self, tokens: Vec<OwnedToken>) {
        *self.owned_tokens.lock().unwrap() = tokens;
    }

    pub fn set_vaults(&self, vaults: Vec<Address>) {
        *self.vaults.lock().unwrap() = vaults;
    }

    /// Hold every allowlist fetch until `gate` hands out a permit.
    pub fn gate_allowlist(&self, gate: Arc<Semaphore>) {
        *self.allowlist_gate.lock().unwrap() = Some(gate);
    }

    pub fn allowlist_fetches(&self) -> usize {
        self.allowlist_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectSource for FakeSource {
    async fn fetch_project(&self, project_id: &str) -> Result<Project> {
        self.project_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(SaleError::GraphQl(message));
        }
        match self.project.lock().unwrap().clone() {
            Some(project) if project.id == project_id => Ok(project),
            _ => Err(SaleError::ProjectNotFound(project_id.to_string())),
        }
    }

    async fn fetch_allowlist(&self, _project: &Project) -> Result<Vec<Address>> {
        self.allowlist_fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.allowlist_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(self.allowlist.lock().unwrap().clone())
    }

    async fn fetch_owned_tokens(
        &self,
        owners: &[Address],
        project_ids: &[String],
    ) -> Result<Vec<OwnedToken>> {
        Ok(self
            .owned_tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| owners.contains(&t.owner) && project_ids.contains(&t.project_id))
            .cloned()
            .collect())
    }

    async fn fetch_delegation_vaults(&self, _delegate: Address) -> Result<Vec<Address>> {
        Ok(self.vaults.lock().unwrap().clone())
    }
}
