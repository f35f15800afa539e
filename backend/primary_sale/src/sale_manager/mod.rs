//! # Sale manager
//!
//! Top-level orchestrator for one project's primary sale. It owns the
//! [`SaleContext`], decides the sale phase from that context, and spawns or
//! stops the two workers:
//!
//! - [`crate::poller::LiveSaleDataPoller`] keeps `live_sale_data` fresh;
//! - [`crate::purchase::PurchaseInitiator`] checks the wallet's eligibility
//!   and submits purchases.
//!
//! ```text
//! fetchingProjectData ──► idle ──► readyForSale
//!                          │  ◄──────┘
//!                          ├──► error
//!                          ├──► projectIneligibleForPrimarySale
//!                          └──► projectSaleComplete
//! ```
//!
//! Phase changes are computed by [`decision::settle`], a pure function of the
//! current phase and context, after every mutation.

mod actor;
mod children;
pub mod decision;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::{ChainReader, WalletClient};
use crate::predicates;
use crate::types::{Address, LiveSaleData, Project};

pub use actor::{spawn_sale_manager, SaleEvent, SaleManagerHandle, SaleManagerInput, SaleServices};
pub use children::{ChildEvent, ChildMessage, ChildSlot, ParentHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SalePhase {
    FetchingProjectData,
    Idle,
    ReadyForSale,
    ProjectSaleComplete,
    Error,
    ProjectIneligibleForPrimarySale,
}

impl SalePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchingProjectData => "fetchingProjectData",
            Self::Idle => "idle",
            Self::ReadyForSale => "readyForSale",
            Self::ProjectSaleComplete => "projectSaleComplete",
            Self::Error => "error",
            Self::ProjectIneligibleForPrimarySale => "projectIneligibleForPrimarySale",
        }
    }

    /// Stable end states for this manager instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ProjectSaleComplete | Self::Error | Self::ProjectIneligibleForPrimarySale
        )
    }
}

impl fmt::Display for SalePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the manager knows about the sale. Owned by the manager task;
/// children only ever receive copies of the parts they need.
#[derive(Clone, Default)]
pub struct SaleContext {
    pub project_id: Option<String>,
    pub chain_read_client: Option<Arc<dyn ChainReader>>,
    pub wallet_client: Option<Arc<dyn WalletClient>>,
    pub project: Option<Project>,
    pub live_sale_data: Option<LiveSaleData>,
    pub error_message: Option<String>,
    pub project_ineligible_reason: Option<String>,
}

impl SaleContext {
    pub fn wallet_account(&self) -> Option<Address> {
        self.wallet_client.as_ref().and_then(|wallet| wallet.account())
    }

    pub fn is_purchasable(&self, now: DateTime<Utc>) -> bool {
        predicates::is_purchasable(
            self.project.as_ref(),
            self.live_sale_data.as_ref(),
            self.wallet_account(),
            now,
        )
    }
}

impl fmt::Debug for SaleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaleContext")
            .field("project_id", &self.project_id)
            .field("has_chain_read_client", &self.chain_read_client.is_some())
            .field("wallet_account", &self.wallet_account())
            .field("project", &self.project.as_ref().map(|p| &p.id))
            .field("live_sale_data", &self.live_sale_data)
            .field("error_message", &self.error_message)
            .field("project_ineligible_reason", &self.project_ineligible_reason)
            .finish()
    }
}
