//! The sale manager task and the handle hosts use to drive it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::clients::{ChainReader, ProjectSource, WalletClient};
use crate::errors::{Result, SaleError};
use crate::minter::MinterSupport;
use crate::persist::{SaleContextSnapshot, SaleSnapshot};
use crate::poller::{LiveSaleDataPoller, LIVE_SALE_DATA_POLLING_INTERVAL};
use crate::purchase::{
    PurchaseCommand, PurchaseInitiator, PurchaseInitiatorInput, PurchaseRequest, PurchaseSnapshot,
};
use crate::tracker::PurchaseTrackerMessage;
use crate::types::{LiveSaleData, Project};

use super::children::{ChildEvent, ChildMessage, ChildSlot, ParentHandle};
use super::decision::{settle, SaleAction};
use super::{SaleContext, SalePhase};

/// Caller-supplied starting point. Either `project_id` or a pre-fetched
/// `project` should be present; with neither the project is ineligible.
#[derive(Clone, Default)]
pub struct SaleManagerInput {
    pub project_id: Option<String>,
    pub chain_read_client: Option<Arc<dyn ChainReader>>,
    pub wallet_client: Option<Arc<dyn WalletClient>>,
    pub project: Option<Project>,
    /// Last known metadata for `project_id`, used only when fetching it
    /// fails for a reason other than the project not existing.
    pub stored_project: Option<Project>,
}

/// Long-lived collaborators shared with the workers.
#[derive(Clone)]
pub struct SaleServices {
    pub project_source: Arc<dyn ProjectSource>,
    pub purchase_tracker: Option<mpsc::UnboundedSender<PurchaseTrackerMessage>>,
    pub live_sale_poll_interval: Duration,
}

impl SaleServices {
    pub fn new(project_source: Arc<dyn ProjectSource>) -> Self {
        Self {
            project_source,
            purchase_tracker: None,
            live_sale_poll_interval: LIVE_SALE_DATA_POLLING_INTERVAL,
        }
    }
}

/// Events a host can send to the manager.
pub enum SaleEvent {
    ChainClientAvailable(Arc<dyn ChainReader>),
    ChainClientUnavailable,
    WalletClientAvailable(Arc<dyn WalletClient>),
    WalletClientUnavailable,
    LiveSaleDataFetched(LiveSaleData),
    ExternalError(String),
    /// Forwarded to the purchase initiator when one is running.
    InitiatePurchase(PurchaseRequest),
    /// Forwarded to the purchase initiator when one is running.
    ResetPurchase,
}

impl SaleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::ChainClientAvailable(_) => "chain_client_available",
            Self::ChainClientUnavailable => "chain_client_unavailable",
            Self::WalletClientAvailable(_) => "wallet_client_available",
            Self::WalletClientUnavailable => "wallet_client_unavailable",
            Self::LiveSaleDataFetched(_) => "live_sale_data_fetched",
            Self::ExternalError(_) => "external_error",
            Self::InitiatePurchase(_) => "initiate_purchase",
            Self::ResetPurchase => "reset_purchase",
        }
    }
}

/// Host-side handle. Dropping it disposes the manager and its workers.
pub struct SaleManagerHandle {
    events: mpsc::UnboundedSender<SaleEvent>,
    snapshots: watch::Receiver<SaleSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _dispose_on_drop: DropGuard,
}

impl SaleManagerHandle {
    /// Returns `false` if the manager has already shut down.
    pub fn send(&self, event: SaleEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn snapshot(&self) -> SaleSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaleSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&SaleSnapshot) -> bool) -> SaleSnapshot {
        let mut rx = self.snapshots.clone();
        let result = match rx.wait_for(predicate).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        result
    }

    /// Stop the manager and every worker, waiting for the manager task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!("Sale manager task ended abnormally: {err}");
        }
    }
}

/// Start a sale manager in `fetchingProjectData`.
pub fn spawn_sale_manager(input: SaleManagerInput, services: SaleServices) -> SaleManagerHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (child_tx, child_rx) = mpsc::unbounded_channel();
    let (live_tx, _) = watch::channel(None);
    let cancel = CancellationToken::new();

    let context = SaleContext {
        project_id: input.project_id.clone(),
        chain_read_client: input.chain_read_client,
        wallet_client: input.wallet_client,
        project: None,
        live_sale_data: None,
        error_message: None,
        project_ineligible_reason: None,
    };

    let initial = SaleSnapshot {
        phase: SalePhase::FetchingProjectData,
        context: SaleContextSnapshot::from(&context),
        purchase: None,
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);

    let fetch = fetch_project_data(
        services.project_source.clone(),
        input.project_id,
        input.project,
        input.stored_project,
    );

    let manager = SaleManager {
        phase: SalePhase::FetchingProjectData,
        context,
        services,
        poller: None,
        initiator: None,
        purchase: None,
        generation: 0,
        child_tx,
        live_tx,
        snapshot_tx,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(manager.run(events_rx, child_rx, fetch));

    SaleManagerHandle {
        events: events_tx,
        snapshots: snapshot_rx,
        cancel: cancel.clone(),
        task,
        _dispose_on_drop: cancel.drop_guard(),
    }
}

async fn fetch_project_data(
    source: Arc<dyn ProjectSource>,
    project_id: Option<String>,
    prefetched: Option<Project>,
    stored: Option<Project>,
) -> Result<Project> {
    if let Some(project) = prefetched {
        return Ok(project);
    }
    let project_id = project_id.ok_or(SaleError::NoProjectId)?;
    match source.fetch_project(&project_id).await {
        Err(err) if !matches!(err, SaleError::ProjectNotFound(_)) => match stored {
            Some(project) if project.id == project_id => {
                warn!(%project_id, "Project metadata fetch failed, using stored metadata: {err}");
                Ok(project)
            }
            _ => Err(err),
        },
        result => result,
    }
}

struct ChildRef {
    generation: u64,
    cancel: CancellationToken,
}

impl ChildRef {
    fn stop(self) {
        self.cancel.cancel();
    }
}

struct InitiatorRef {
    child: ChildRef,
    commands: mpsc::UnboundedSender<PurchaseCommand>,
}

struct SaleManager {
    phase: SalePhase,
    context: SaleContext,
    services: SaleServices,
    poller: Option<ChildRef>,
    initiator: Option<InitiatorRef>,
    purchase: Option<PurchaseSnapshot>,
    generation: u64,
    child_tx: mpsc::UnboundedSender<ChildMessage>,
    live_tx: watch::Sender<Option<LiveSaleData>>,
    snapshot_tx: watch::Sender<SaleSnapshot>,
    cancel: CancellationToken,
}

impl SaleManager {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SaleEvent>,
        mut children: mpsc::UnboundedReceiver<ChildMessage>,
        fetch: impl Future<Output = Result<Project>>,
    ) {
        tokio::pin!(fetch);
        let mut fetch_pending = true;
        debug!(project_id = ?self.context.project_id, "Sale manager started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = &mut fetch, if fetch_pending => {
                    fetch_pending = false;
                    self.on_project_fetched(result);
                }
                event = events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => break,
                },
                Some(message) = children.recv() => self.on_child_message(message),
            }
            self.settle();
        }

        self.cancel.cancel();
        self.stop_poller();
        self.stop_initiator();
        info!(project_id = ?self.context.project_id, phase = %self.phase, "Sale manager disposed");
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    // ─────────────────────────────────────────────────────
    // Inputs
    // ─────────────────────────────────────────────────────

    fn on_project_fetched(&mut self, result: Result<Project>) {
        match result {
            Ok(project) => {
                info!(project_id = %project.id, "Project metadata fetched");
                if self.context.project_id.is_none() {
                    self.context.project_id = Some(project.id.clone());
                }
                self.context.project = Some(project);
            }
            Err(SaleError::NoProjectId) => {
                info!("No project id supplied; project is ineligible");
                self.context.project_ineligible_reason = Some(SaleError::NoProjectId.to_string());
            }
            Err(err) => {
                warn!(project_id = ?self.context.project_id, "Project metadata fetch failed: {err}");
                self.context.error_message = Some(err.to_string());
            }
        }
        self.phase = SalePhase::Idle;
    }

    fn on_event(&mut self, event: SaleEvent) {
        debug!(event = event.name(), phase = %self.phase, "Sale event");
        match event {
            SaleEvent::ChainClientAvailable(client) => {
                let same = self
                    .context
                    .chain_read_client
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &client));
                if !same {
                    // Workers hold the old client; restart them with the new one.
                    self.context.chain_read_client = Some(client);
                    self.drop_chain_state();
                }
            }
            SaleEvent::ChainClientUnavailable => {
                self.context.chain_read_client = None;
                self.drop_chain_state();
            }
            SaleEvent::WalletClientAvailable(client) => {
                let same = self
                    .context
                    .wallet_client
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &client));
                if !same {
                    self.context.wallet_client = Some(client);
                    self.stop_initiator();
                }
            }
            SaleEvent::WalletClientUnavailable => {
                self.context.wallet_client = None;
                self.stop_initiator();
            }
            SaleEvent::LiveSaleDataFetched(data) => self.apply_live_sale_data(data),
            SaleEvent::ExternalError(message) => self.record_error(message),
            SaleEvent::InitiatePurchase(request) => {
                self.forward_purchase_command(PurchaseCommand::InitiatePurchase(request))
            }
            SaleEvent::ResetPurchase => self.forward_purchase_command(PurchaseCommand::Reset),
        }
    }

    fn on_child_message(&mut self, message: ChildMessage) {
        let current = match message.slot {
            ChildSlot::LiveSaleDataPolling => self.poller.as_ref().map(|c| c.generation),
            ChildSlot::PurchaseInitiation => self.initiator.as_ref().map(|i| i.child.generation),
        };
        if current != Some(message.generation) {
            debug!(
                slot = message.slot.id(),
                generation = message.generation,
                "Discarding message from a stopped child"
            );
            return;
        }

        match message.event {
            ChildEvent::LiveSaleDataFetched(data) => self.apply_live_sale_data(data),
            ChildEvent::ExternalError(error) => {
                if message.slot == ChildSlot::LiveSaleDataPolling {
                    // The poller terminates after reporting an error.
                    self.poller = None;
                }
                self.record_error(error);
            }
            ChildEvent::PurchaseStateChanged(snapshot) => self.purchase = Some(snapshot),
            ChildEvent::PurchaseSubmitted {
                tx_hash,
                purchase_to,
            } => {
                info!(%tx_hash, %purchase_to, "Purchase submitted");
                let Some(tracker) = &self.services.purchase_tracker else {
                    return;
                };
                let project_id = self
                    .context
                    .project
                    .as_ref()
                    .map(|p| p.id.clone())
                    .or_else(|| self.context.project_id.clone())
                    .unwrap_or_default();
                let sent = tracker.send(PurchaseTrackerMessage::PurchaseInitiated {
                    project_id,
                    tx_hash,
                    purchase_to,
                });
                if sent.is_err() {
                    warn!(%tx_hash, "Purchase tracker is gone; purchase will not be tracked");
                }
            }
        }
    }

    /// Live data belongs to the client that read it.
    fn drop_chain_state(&mut self) {
        self.stop_poller();
        self.stop_initiator();
        self.context.live_sale_data = None;
        self.live_tx.send_replace(None);
    }

    fn apply_live_sale_data(&mut self, data: LiveSaleData) {
        self.context.live_sale_data = Some(data);
        self.live_tx.send_replace(Some(data));
        if !data.is_configured && self.context.project_ineligible_reason.is_none() {
            self.context.project_ineligible_reason =
                Some("Project price is not configured on its minter".to_string());
        }
    }

    fn record_error(&mut self, message: String) {
        // The first error is the root cause; keep it.
        if self.context.error_message.is_none() {
            warn!(project_id = ?self.context.project_id, "Sale error: {message}");
            self.context.error_message = Some(message);
        }
    }

    fn forward_purchase_command(&mut self, command: PurchaseCommand) {
        match &self.initiator {
            Some(initiator) => {
                if initiator.commands.send(command).is_err() {
                    warn!("Purchase initiator is no longer running");
                }
            }
            None => warn!(phase = %self.phase, "No purchase initiator running; command ignored"),
        }
    }

    // ─────────────────────────────────────────────────────
    // Decision + side effects
    // ─────────────────────────────────────────────────────

    fn settle(&mut self) {
        let decision = settle(self.phase, &self.context, Utc::now());
        for action in decision.actions {
            self.apply(action);
        }
        if decision.phase != self.phase {
            info!(
                project_id = ?self.context.project_id,
                from = %self.phase,
                to = %decision.phase,
                "Sale phase changed"
            );
            self.phase = decision.phase;
        }
        self.publish();
    }

    fn apply(&mut self, action: SaleAction) {
        match action {
            SaleAction::StartLiveSaleDataPolling => self.start_poller(),
            SaleAction::StopLiveSaleDataPolling => self.stop_poller(),
            SaleAction::StartPurchaseInitiation => self.start_initiator(),
            SaleAction::StopPurchaseInitiation => self.stop_initiator(),
            SaleAction::RecordIneligibility(reason) => {
                info!(project_id = ?self.context.project_id, "Project ineligible: {reason}");
                self.context.project_ineligible_reason = Some(reason);
            }
        }
    }

    fn publish(&self) {
        let snapshot = SaleSnapshot {
            phase: self.phase,
            context: SaleContextSnapshot::from(&self.context),
            purchase: self.purchase.clone(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn start_poller(&mut self) {
        if self.poller.is_some() {
            return;
        }
        let (Some(project), Some(client)) =
            (self.context.project.clone(), self.context.chain_read_client.clone())
        else {
            return;
        };

        let generation = self.next_generation();
        let cancel = self.cancel.child_token();
        let parent = ParentHandle::new(
            self.child_tx.clone(),
            ChildSlot::LiveSaleDataPolling,
            generation,
            cancel.clone(),
        );
        let poller =
            LiveSaleDataPoller::new(project, client, parent, self.services.live_sale_poll_interval);
        tokio::spawn(async move {
            let exit = poller.run().await;
            debug!(generation, ?exit, "Live sale data poller exited");
        });
        self.poller = Some(ChildRef { generation, cancel });
        debug!(generation, "Live sale data polling started");
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            debug!(generation = poller.generation, "Live sale data polling stopped");
            poller.stop();
        }
    }

    fn start_initiator(&mut self) {
        if self.initiator.is_some() {
            return;
        }
        let (Some(project), Some(chain), Some(wallet)) = (
            self.context.project.clone(),
            self.context.chain_read_client.clone(),
            self.context.wallet_client.clone(),
        ) else {
            return;
        };
        let MinterSupport::Supported(minter) = MinterSupport::of(&project) else {
            return;
        };

        let generation = self.next_generation();
        let cancel = self.cancel.child_token();
        let parent = ParentHandle::new(
            self.child_tx.clone(),
            ChildSlot::PurchaseInitiation,
            generation,
            cancel.clone(),
        );
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let input = PurchaseInitiatorInput {
            project,
            minter,
            chain,
            wallet,
            source: self.services.project_source.clone(),
            live: self.live_tx.subscribe(),
        };
        tokio::spawn(PurchaseInitiator::new(input, parent, commands_rx).run());
        self.initiator = Some(InitiatorRef {
            child: ChildRef { generation, cancel },
            commands: commands_tx,
        });
        self.purchase = Some(PurchaseSnapshot::default());
        debug!(generation, "Purchase initiation started");
    }

    fn stop_initiator(&mut self) {
        if let Some(initiator) = self.initiator.take() {
            debug!(generation = initiator.child.generation, "Purchase initiation stopped");
            initiator.child.stop();
        }
        self.purchase = None;
    }
}
