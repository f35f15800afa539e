//! Purchase initiator.
//!
//! Spawned by the sale manager while the sale is ready. It first checks
//! whether the connected wallet may buy through the project's minter, then
//! waits for `InitiatePurchase` commands and submits the minter-specific
//! transaction(s).
//!
//! ```text
//! checkingEligibility ──► readyForPurchase ◄──► initiatingPurchase
//!        │                                           │
//!        ├──► userIneligibleForPurchase              │
//!        └──► error ◄────────────────────────────────┘
//! ```
//!
//! `Reset` is accepted in every phase and restarts at `checkingEligibility`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::clients::{ChainReader, ProjectSource, WalletClient};
use crate::errors::{Result, SaleError};
use crate::minter::{
    Eligibility, EligibilityContext, EligibilityDetails, HolderToken, MinterKind, PurchaseParams,
};
use crate::sale_manager::{ChildEvent, ParentHandle};
use crate::types::{Address, LiveSaleData, Project, TxHash};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PurchasePhase {
    #[default]
    CheckingEligibility,
    ReadyForPurchase,
    InitiatingPurchase,
    UserIneligibleForPurchase,
    Error,
}

/// Extra per-purchase input, e.g. which held token unlocks a holder-gated
/// purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalPurchaseData {
    pub holder_token: Option<HolderToken>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PurchaseRequest {
    /// Defaults to the wallet's own account.
    pub purchase_to: Option<Address>,
    pub additional_purchase_data: Option<AdditionalPurchaseData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseCommand {
    InitiatePurchase(PurchaseRequest),
    Reset,
}

/// Observable state of the initiator, mirrored into the sale snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSnapshot {
    pub phase: PurchasePhase,
    pub eligibility: Option<EligibilityDetails>,
    pub user_ineligibility_reason: Option<String>,
    pub error_message: Option<String>,
    pub purchase_to_address: Option<Address>,
    pub additional_purchase_data: Option<AdditionalPurchaseData>,
    pub last_tx_hash: Option<TxHash>,
}

/// Read-only inputs fixed at spawn time. `live` tracks the manager's most
/// recent live sale data so submissions always use the current price.
pub struct PurchaseInitiatorInput {
    pub project: Project,
    pub minter: MinterKind,
    pub chain: Arc<dyn ChainReader>,
    pub wallet: Arc<dyn WalletClient>,
    pub source: Arc<dyn ProjectSource>,
    pub live: watch::Receiver<Option<LiveSaleData>>,
}

/// Everything a submission needs, captured when the purchase starts.
#[derive(Debug, Clone)]
struct PurchasePlan {
    account: Address,
    purchase_to: Address,
    eligibility: Option<EligibilityDetails>,
    selected_token: Option<HolderToken>,
}

pub struct PurchaseInitiator {
    input: PurchaseInitiatorInput,
    parent: ParentHandle,
    commands: mpsc::UnboundedReceiver<PurchaseCommand>,
    state: PurchaseSnapshot,
    published: Option<PurchaseSnapshot>,
}

impl PurchaseInitiator {
    pub fn new(
        input: PurchaseInitiatorInput,
        parent: ParentHandle,
        commands: mpsc::UnboundedReceiver<PurchaseCommand>,
    ) -> Self {
        Self {
            input,
            parent,
            commands,
            state: PurchaseSnapshot::default(),
            published: None,
        }
    }

    /// Run until the parent stops this initiator or drops its command
    /// sender.
    pub async fn run(mut self) {
        loop {
            self.publish();
            match self.state.phase {
                PurchasePhase::CheckingEligibility => {
                    let price = current_price(&self.input.live);
                    let result = {
                        let check = check_eligibility(&self.input, price);
                        tokio::pin!(check);
                        loop {
                            tokio::select! {
                                biased;
                                _ = self.parent.stopped() => return,
                                command = self.commands.recv() => match command {
                                    Some(PurchaseCommand::Reset) => break None,
                                    Some(PurchaseCommand::InitiatePurchase(_)) => {
                                        warn!("Purchase requested while checking eligibility; ignored");
                                    }
                                    None => return,
                                },
                                result = &mut check => break Some(result),
                            }
                        }
                    };
                    // Reset drops the running check and starts a fresh one.
                    let Some(result) = result else {
                        self.reset();
                        continue;
                    };
                    match result {
                        Ok(Eligibility::Eligible(details)) => {
                            debug!(project_id = %self.input.project.id, "Wallet eligible for purchase");
                            self.state.eligibility = Some(details);
                            self.state.phase = PurchasePhase::ReadyForPurchase;
                        }
                        Ok(Eligibility::Ineligible(reason)) => {
                            info!(project_id = %self.input.project.id, "Wallet ineligible: {reason}");
                            self.state.user_ineligibility_reason = Some(reason);
                            self.state.phase = PurchasePhase::UserIneligibleForPurchase;
                        }
                        Err(err) => {
                            warn!(project_id = %self.input.project.id, "Eligibility check failed: {err}");
                            self.state.error_message = Some(err.to_string());
                            self.state.phase = PurchasePhase::Error;
                            self.parent.send(ChildEvent::ExternalError(err.to_string()));
                        }
                    }
                }

                PurchasePhase::ReadyForPurchase => {
                    tokio::select! {
                        biased;
                        _ = self.parent.stopped() => return,
                        command = self.commands.recv() => match command {
                            Some(PurchaseCommand::InitiatePurchase(request)) => {
                                self.begin_purchase(request);
                            }
                            Some(PurchaseCommand::Reset) => self.reset(),
                            None => return,
                        },
                    }
                }

                PurchasePhase::InitiatingPurchase => {
                    let plan = self.plan();
                    let price = current_price(&self.input.live);
                    let result = {
                        let submission = submit_purchase(&self.input, plan, price);
                        tokio::pin!(submission);
                        loop {
                            tokio::select! {
                                biased;
                                _ = self.parent.stopped() => return,
                                command = self.commands.recv() => match command {
                                    Some(PurchaseCommand::Reset) => break None,
                                    Some(PurchaseCommand::InitiatePurchase(_)) => {
                                        warn!("Purchase already in flight; request ignored");
                                    }
                                    None => return,
                                },
                                result = &mut submission => break Some(result),
                            }
                        }
                    };
                    match result {
                        None => self.state = PurchaseSnapshot::default(),
                        Some(Ok(tx_hash)) => self.purchase_submitted(tx_hash),
                        Some(Err(SaleError::UserRejected)) => {
                            info!(project_id = %self.input.project.id, "Purchase declined in wallet");
                            self.state.phase = PurchasePhase::ReadyForPurchase;
                        }
                        Some(Err(err)) => {
                            warn!(project_id = %self.input.project.id, "Purchase failed: {err}");
                            self.state.error_message = Some(err.to_string());
                            self.state.phase = PurchasePhase::Error;
                            self.parent.send(ChildEvent::ExternalError(err.to_string()));
                        }
                    }
                }

                PurchasePhase::UserIneligibleForPurchase | PurchasePhase::Error => {
                    tokio::select! {
                        biased;
                        _ = self.parent.stopped() => return,
                        command = self.commands.recv() => match command {
                            Some(PurchaseCommand::Reset) => self.reset(),
                            Some(PurchaseCommand::InitiatePurchase(_)) => {
                                debug!(phase = ?self.state.phase, "Purchase requested in a final phase; ignored");
                            }
                            None => return,
                        },
                    }
                }
            }
        }
    }

    fn publish(&mut self) {
        if self.published.as_ref() == Some(&self.state) {
            return;
        }
        self.parent
            .send(ChildEvent::PurchaseStateChanged(self.state.clone()));
        self.published = Some(self.state.clone());
    }

    fn reset(&mut self) {
        debug!(project_id = %self.input.project.id, "Purchase state reset");
        self.state = PurchaseSnapshot::default();
    }

    fn begin_purchase(&mut self, request: PurchaseRequest) {
        let Some(account) = self.input.wallet.account() else {
            warn!("Wallet has no account; purchase ignored");
            return;
        };
        self.state.purchase_to_address = Some(request.purchase_to.unwrap_or(account));
        self.state.additional_purchase_data = request.additional_purchase_data;
        self.state.error_message = None;
        self.state.phase = PurchasePhase::InitiatingPurchase;
    }

    fn plan(&self) -> Option<PurchasePlan> {
        let account = self.input.wallet.account()?;
        let selected_token = self
            .state
            .additional_purchase_data
            .as_ref()
            .and_then(|data| data.holder_token.clone())
            .or_else(|| match &self.state.eligibility {
                Some(EligibilityDetails::Holder { tokens }) => tokens.first().cloned(),
                _ => None,
            });
        Some(PurchasePlan {
            account,
            purchase_to: self.state.purchase_to_address.unwrap_or(account),
            eligibility: self.state.eligibility.clone(),
            selected_token,
        })
    }

    fn purchase_submitted(&mut self, tx_hash: TxHash) {
        let purchase_to = self
            .state
            .purchase_to_address
            .take()
            .or_else(|| self.input.wallet.account())
            .unwrap_or_default();
        info!(project_id = %self.input.project.id, %tx_hash, "Purchase transaction submitted");
        self.parent.send(ChildEvent::PurchaseSubmitted {
            tx_hash,
            purchase_to,
        });
        self.state.additional_purchase_data = None;
        self.state.error_message = None;
        self.state.last_tx_hash = Some(tx_hash);
        self.state.phase = PurchasePhase::ReadyForPurchase;
    }
}

fn current_price(live: &watch::Receiver<Option<LiveSaleData>>) -> Option<u128> {
    live.borrow().map(|data| data.token_price_in_wei)
}

async fn check_eligibility(
    input: &PurchaseInitiatorInput,
    price_in_wei: Option<u128>,
) -> Result<Eligibility> {
    let minter = input
        .project
        .minter
        .as_ref()
        .ok_or(SaleError::NoMinterConfigured)?;
    let account = input
        .wallet
        .account()
        .ok_or(SaleError::MissingPurchaseData("wallet account"))?;
    let ctx = EligibilityContext {
        project: &input.project,
        minter,
        account,
        price_in_wei,
        chain: input.chain.as_ref(),
        source: input.source.as_ref(),
    };
    input.minter.check_eligibility(&ctx).await
}

/// Submit every transaction the minter needs, in order, and return the hash
/// of the last one (the purchase itself).
async fn submit_purchase(
    input: &PurchaseInitiatorInput,
    plan: Option<PurchasePlan>,
    price_in_wei: Option<u128>,
) -> Result<TxHash> {
    let plan = plan.ok_or(SaleError::MissingPurchaseData("wallet account"))?;
    let price_in_wei = price_in_wei.ok_or(SaleError::LiveSaleDataUnavailable)?;
    let minter = input
        .project
        .minter
        .as_ref()
        .ok_or(SaleError::NoMinterConfigured)?;
    let details = plan
        .eligibility
        .ok_or(SaleError::MissingPurchaseData("eligibility details"))?;

    let params = PurchaseParams {
        project: &input.project,
        minter,
        account: plan.account,
        purchase_to: plan.purchase_to,
        price_in_wei,
        details: &details,
        selected_token: plan.selected_token.as_ref(),
        chain: input.chain.as_ref(),
    };
    let transactions = input.minter.purchase_transactions(&params).await?;

    let mut last = None;
    for tx in transactions {
        debug!(to = %tx.to, value = tx.value, "Sending transaction");
        last = Some(input.wallet.send_transaction(tx).await?);
    }
    last.ok_or(SaleError::MissingPurchaseData("purchase transaction"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Semaphore;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::abi::selector;
    use crate::sale_manager::{ChildMessage, ChildSlot};
    use crate::test_utils::{
        addr, sample_live_data, sample_project, FakeChain, FakeSource, FakeWallet, PRICE,
    };
    use crate::types::H256;

    struct Harness {
        commands: mpsc::UnboundedSender<PurchaseCommand>,
        messages: mpsc::UnboundedReceiver<ChildMessage>,
        live: watch::Sender<Option<LiveSaleData>>,
        wallet: Arc<FakeWallet>,
        source: Arc<FakeSource>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn spawn(minter_type: &str, source: FakeSource) -> Self {
            let source = Arc::new(source);
            let project = sample_project(minter_type);
            let minter = MinterKind::classify(minter_type).unwrap();
            let wallet = FakeWallet::shared(addr(1));
            let (live_tx, live_rx) = watch::channel(Some(sample_live_data()));
            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let (child_tx, child_rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let parent = ParentHandle::new(child_tx, ChildSlot::PurchaseInitiation, 1, cancel.clone());
            let input = PurchaseInitiatorInput {
                project,
                minter,
                chain: FakeChain::shared(),
                wallet: wallet.clone(),
                source: source.clone(),
                live: live_rx,
            };
            tokio::spawn(PurchaseInitiator::new(input, parent, commands_rx).run());
            Self {
                commands: commands_tx,
                messages: child_rx,
                live: live_tx,
                wallet,
                source,
                cancel,
            }
        }

        async fn next_event(&mut self) -> ChildEvent {
            timeout(Duration::from_secs(5), self.messages.recv())
                .await
                .expect("timed out waiting for the initiator")
                .expect("initiator channel closed")
                .event
        }

        async fn wait_phase(&mut self, phase: PurchasePhase) -> PurchaseSnapshot {
            loop {
                if let ChildEvent::PurchaseStateChanged(snapshot) = self.next_event().await {
                    if snapshot.phase == phase {
                        return snapshot;
                    }
                }
            }
        }

        fn initiate(&self, purchase_to: Option<Address>) {
            // The initiator may already have exited in stop tests.
            let _ = self
                .commands
                .send(PurchaseCommand::InitiatePurchase(PurchaseRequest {
                    purchase_to,
                    additional_purchase_data: None,
                }));
        }
    }

    #[tokio::test]
    async fn open_minter_purchase_reports_the_hash_once() {
        let mut harness = Harness::spawn("MinterSetPriceV5", FakeSource::default());
        let ready = harness.wait_phase(PurchasePhase::ReadyForPurchase).await;
        assert_eq!(ready.eligibility, Some(EligibilityDetails::Open));

        let tx_hash = H256([7; 32]);
        harness.wallet.push_result(Ok(tx_hash));
        harness.initiate(None);

        let mut submitted = Vec::new();
        let snapshot = loop {
            match harness.next_event().await {
                ChildEvent::PurchaseSubmitted { tx_hash, purchase_to } => {
                    submitted.push((tx_hash, purchase_to))
                }
                ChildEvent::PurchaseStateChanged(s) if s.last_tx_hash.is_some() => break s,
                _ => {}
            }
        };
        assert_eq!(submitted, vec![(tx_hash, addr(1))]);
        assert_eq!(snapshot.phase, PurchasePhase::ReadyForPurchase);
        assert!(snapshot.purchase_to_address.is_none());
        assert!(snapshot.additional_purchase_data.is_none());

        let sent = harness.wallet.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value, PRICE);
        assert_eq!(sent[0].data[..4], selector("purchase(uint256,address)"));
    }

    #[tokio::test]
    async fn user_rejection_returns_to_ready_without_error() {
        let mut harness = Harness::spawn("MinterSetPriceV5", FakeSource::default());
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;

        harness.wallet.push_result(Err(SaleError::UserRejected));
        harness.initiate(None);
        harness.wait_phase(PurchasePhase::InitiatingPurchase).await;
        let snapshot = harness.wait_phase(PurchasePhase::ReadyForPurchase).await;
        assert!(snapshot.error_message.is_none());
        assert!(snapshot.last_tx_hash.is_none());
        assert!(harness.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn submission_failure_is_an_error_and_reported() {
        let mut harness = Harness::spawn("MinterSetPriceV5", FakeSource::default());
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;

        harness.wallet.push_result(Err(SaleError::Rpc {
            code: -32000,
            message: "insufficient funds".into(),
        }));
        harness.initiate(None);

        let mut reported = None;
        let snapshot = loop {
            match harness.next_event().await {
                ChildEvent::ExternalError(error) => reported = Some(error),
                ChildEvent::PurchaseStateChanged(s) if s.phase == PurchasePhase::Error => break s,
                _ => {}
            }
        };
        assert!(reported.unwrap().contains("insufficient funds"));
        assert!(snapshot.error_message.unwrap().contains("insufficient funds"));
    }

    #[tokio::test]
    async fn reset_after_error_checks_eligibility_again() {
        let mut harness = Harness::spawn("MinterSetPriceV5", FakeSource::default());
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;
        harness.wallet.push_result(Err(SaleError::Rpc {
            code: -32000,
            message: "nonce too low".into(),
        }));
        harness.initiate(None);
        harness.wait_phase(PurchasePhase::Error).await;

        harness.commands.send(PurchaseCommand::Reset).unwrap();
        let checking = harness.wait_phase(PurchasePhase::CheckingEligibility).await;
        assert_eq!(checking, PurchaseSnapshot::default());
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;
    }

    #[tokio::test]
    async fn reset_while_checking_restarts_the_check() {
        let gate = Arc::new(Semaphore::new(0));
        let source = FakeSource::default();
        source.set_allowlist(vec![addr(2)]);
        source.gate_allowlist(gate.clone());
        let mut harness = Harness::spawn("MinterMerkleV5", source);

        timeout(Duration::from_secs(5), async {
            while harness.source.allowlist_fetches() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        harness.source.set_allowlist(vec![addr(1), addr(2)]);
        harness.commands.send(PurchaseCommand::Reset).unwrap();
        timeout(Duration::from_secs(5), async {
            while harness.source.allowlist_fetches() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        gate.add_permits(1);

        let ready = harness.wait_phase(PurchasePhase::ReadyForPurchase).await;
        assert!(matches!(
            ready.eligibility,
            Some(EligibilityDetails::Allowlisted { .. })
        ));
        assert_eq!(harness.source.allowlist_fetches(), 2);
    }

    #[tokio::test]
    async fn wallet_off_the_allowlist_is_ineligible() {
        let source = FakeSource::default();
        source.set_allowlist(vec![addr(2), addr(3)]);
        let mut harness = Harness::spawn("MinterMerkleV5", source);

        let snapshot = harness
            .wait_phase(PurchasePhase::UserIneligibleForPurchase)
            .await;
        assert!(snapshot.user_ineligibility_reason.is_some());
        assert!(snapshot.error_message.is_none());

        harness.initiate(None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.wallet.sent_count(), 0);
    }

    #[tokio::test]
    async fn submission_uses_the_latest_price() {
        let mut harness = Harness::spawn("MinterDAExpV5", FakeSource::default());
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;

        harness.live.send_replace(Some(LiveSaleData {
            token_price_in_wei: PRICE / 2,
            ..sample_live_data()
        }));
        harness.initiate(Some(addr(9)));
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;

        let sent = harness.wallet.sent.lock().unwrap().clone();
        assert_eq!(sent[0].value, PRICE / 2);
        assert_eq!(
            sent[0].data[..4],
            selector("purchaseTo(address,uint256,address)")
        );
    }

    #[tokio::test]
    async fn stopped_initiator_sends_nothing() {
        let mut harness = Harness::spawn("MinterSetPriceV5", FakeSource::default());
        harness.wait_phase(PurchasePhase::ReadyForPurchase).await;
        harness.cancel.cancel();
        harness.initiate(None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.wallet.sent_count(), 0);
        assert!(harness.messages.try_recv().is_err());
    }
}
