//! Parent/child plumbing between the sale manager and its workers.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::purchase::PurchaseSnapshot;
use crate::types::{Address, LiveSaleData, TxHash};

/// Fixed per-parent slots. At most one live child per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildSlot {
    LiveSaleDataPolling,
    PurchaseInitiation,
}

impl ChildSlot {
    pub fn id(&self) -> &'static str {
        match self {
            Self::LiveSaleDataPolling => "liveSaleDataPolling",
            Self::PurchaseInitiation => "purchaseInitiation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    LiveSaleDataFetched(LiveSaleData),
    ExternalError(String),
    PurchaseStateChanged(PurchaseSnapshot),
    PurchaseSubmitted {
        tx_hash: TxHash,
        purchase_to: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildMessage {
    pub slot: ChildSlot,
    /// Spawn counter of the sender, used by the parent to drop messages from
    /// children it has already replaced.
    pub generation: u64,
    pub event: ChildEvent,
}

/// Send-only handle a child uses to reach its parent.
///
/// Once the parent stops the child, [`ParentHandle::send`] becomes a no-op,
/// so nothing a child does after being stopped reaches the parent.
#[derive(Debug, Clone)]
pub struct ParentHandle {
    tx: mpsc::UnboundedSender<ChildMessage>,
    slot: ChildSlot,
    generation: u64,
    cancel: CancellationToken,
}

impl ParentHandle {
    pub fn new(
        tx: mpsc::UnboundedSender<ChildMessage>,
        slot: ChildSlot,
        generation: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            slot,
            generation,
            cancel,
        }
    }

    /// Returns `false` if the child has been stopped or the parent is gone.
    pub fn send(&self, event: ChildEvent) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx
            .send(ChildMessage {
                slot: self.slot,
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the parent stops this child.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_stop_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let parent = ParentHandle::new(tx, ChildSlot::LiveSaleDataPolling, 3, cancel.clone());

        assert!(parent.send(ChildEvent::ExternalError("first".into())));
        cancel.cancel();
        assert!(!parent.send(ChildEvent::ExternalError("second".into())));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.generation, 3);
        assert_eq!(message.event, ChildEvent::ExternalError("first".into()));
        assert!(rx.try_recv().is_err());
    }
}
