//! Background task that records submitted purchases and follows them until
//! their receipts land on chain.
//!
//! The sale manager only ever sends to the tracker; nothing flows back.
//! Purchases still pending at shutdown are picked up again on the next
//! start.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::ChainReader;
use crate::db::{self, PurchaseStatus};
use crate::types::{Address, TxHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseTrackerMessage {
    PurchaseInitiated {
        project_id: String,
        tx_hash: TxHash,
        purchase_to: Address,
    },
}

pub struct PurchaseTracker {
    chain: Arc<dyn ChainReader>,
    pool: SqlitePool,
    receipt_poll_interval: Duration,
}

impl PurchaseTracker {
    pub fn new(chain: Arc<dyn ChainReader>, pool: SqlitePool, receipt_poll_interval: Duration) -> Self {
        Self {
            chain,
            pool,
            receipt_poll_interval,
        }
    }

    /// Spawn the tracker as a background [`tokio`] task.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (mpsc::UnboundedSender<PurchaseTrackerMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx, cancel));
        (tx, task)
    }

    pub async fn run(
        self,
        mut messages: mpsc::UnboundedReceiver<PurchaseTrackerMessage>,
        cancel: CancellationToken,
    ) {
        let mut pending = match db::pending_purchases(&self.pool).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Could not load pending purchases: {e}");
                Vec::new()
            }
        };
        if !pending.is_empty() {
            info!("Resuming tracking of {} pending purchases", pending.len());
        }

        let mut ticker = tokio::time::interval(self.receipt_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => self.record(message, &mut pending).await,
                    None => break,
                },
                _ = ticker.tick(), if !pending.is_empty() => {
                    self.poll_receipts(&mut pending).await;
                }
            }
        }
        info!("Purchase tracker stopped with {} pending purchases", pending.len());
    }

    async fn record(&self, message: PurchaseTrackerMessage, pending: &mut Vec<TxHash>) {
        let PurchaseTrackerMessage::PurchaseInitiated {
            project_id,
            tx_hash,
            purchase_to,
        } = message;
        match db::insert_purchase(&self.pool, &project_id, &tx_hash, &purchase_to).await {
            Ok(true) => {
                info!(%project_id, %tx_hash, %purchase_to, "Tracking purchase");
                pending.push(tx_hash);
            }
            Ok(false) => warn!(%tx_hash, "Purchase already tracked"),
            Err(e) => error!(%tx_hash, "Could not record purchase: {e}"),
        }
    }

    async fn poll_receipts(&self, pending: &mut Vec<TxHash>) {
        let mut still_pending = Vec::with_capacity(pending.len());
        for tx_hash in pending.drain(..) {
            let receipt = match self.chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => {
                    still_pending.push(tx_hash);
                    continue;
                }
                Err(e) => {
                    warn!(%tx_hash, "Receipt lookup failed: {e}");
                    still_pending.push(tx_hash);
                    continue;
                }
            };

            let status = if receipt.success {
                PurchaseStatus::Confirmed
            } else {
                PurchaseStatus::Reverted
            };
            match db::mark_purchase_mined(&self.pool, &tx_hash, status, receipt.block_number).await {
                Ok(()) => info!(
                    %tx_hash,
                    block_number = receipt.block_number,
                    status = status.as_str(),
                    "Purchase mined"
                ),
                Err(e) => {
                    error!(%tx_hash, "Could not update purchase: {e}");
                    still_pending.push(tx_hash);
                }
            }
        }
        *pending = still_pending;
    }
}
