//! Snapshot (de)hydration for carrying a sale session across a process
//! boundary.
//!
//! Client handles cannot be serialized. On the way out they become `null`
//! when present and are omitted when absent; on the way in, the caller's live
//! clients are re-injected only where the serialized context had the field.

use std::sync::Arc;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::clients::{ChainReader, WalletClient};
use crate::db;
use crate::errors::Result;
use crate::purchase::PurchaseSnapshot;
use crate::sale_manager::{SaleContext, SaleManagerInput, SalePhase};
use crate::types::{LiveSaleData, Project};

/// Stand-in for a client reference. Serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientPlaceholder;

impl Serialize for ClientPlaceholder {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

/// A present key means a client was connected, whatever its value.
fn present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<ClientPlaceholder>, D::Error> {
    IgnoredAny::deserialize(deserializer)?;
    Ok(Some(ClientPlaceholder))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleContextSnapshot {
    pub project_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub chain_read_client: Option<ClientPlaceholder>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub wallet_client: Option<ClientPlaceholder>,
    pub project: Option<Project>,
    pub live_sale_data: Option<LiveSaleData>,
    pub error_message: Option<String>,
    pub project_ineligible_reason: Option<String>,
}

impl From<&SaleContext> for SaleContextSnapshot {
    fn from(ctx: &SaleContext) -> Self {
        Self {
            project_id: ctx.project_id.clone(),
            chain_read_client: ctx.chain_read_client.as_ref().map(|_| ClientPlaceholder),
            wallet_client: ctx.wallet_client.as_ref().map(|_| ClientPlaceholder),
            project: ctx.project.clone(),
            live_sale_data: ctx.live_sale_data,
            error_message: ctx.error_message.clone(),
            project_ineligible_reason: ctx.project_ineligible_reason.clone(),
        }
    }
}

/// Everything a host can observe about a running sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleSnapshot {
    pub phase: SalePhase,
    pub context: SaleContextSnapshot,
    pub purchase: Option<PurchaseSnapshot>,
}

/// A snapshot with live clients re-attached.
pub struct HydratedSale {
    pub phase: SalePhase,
    pub context: SaleContext,
    pub purchase: Option<PurchaseSnapshot>,
}

impl HydratedSale {
    /// Input for a new manager. Metadata is fetched again; the stored project
    /// only covers a failed fetch, and not at all once the stored sale had
    /// reached an end state, so a restart re-evaluates it.
    pub fn into_input(self) -> SaleManagerInput {
        let stored_project = if self.phase.is_terminal() {
            None
        } else {
            self.context.project
        };
        SaleManagerInput {
            project_id: self.context.project_id,
            chain_read_client: self.context.chain_read_client,
            wallet_client: self.context.wallet_client,
            project: None,
            stored_project,
        }
    }
}

/// Manager input for `project_id`, picking up the stored snapshot when there
/// is a readable one. The clients of this process always win over whatever
/// the snapshot recorded.
pub async fn restore_input(
    pool: &SqlitePool,
    project_id: Option<String>,
    chain_read_client: Option<Arc<dyn ChainReader>>,
    wallet_client: Option<Arc<dyn WalletClient>>,
) -> Result<SaleManagerInput> {
    let fresh = SaleManagerInput {
        project_id: project_id.clone(),
        chain_read_client: chain_read_client.clone(),
        wallet_client: wallet_client.clone(),
        ..Default::default()
    };
    let Some(id) = project_id.as_deref() else {
        return Ok(fresh);
    };
    let Some(stored) = db::load_snapshot(pool, id).await? else {
        return Ok(fresh);
    };

    match hydrate(&stored, chain_read_client.clone(), wallet_client.clone()) {
        Ok(hydrated) => {
            info!(project_id = id, stored_phase = %hydrated.phase, "Restoring stored sale snapshot");
            Ok(SaleManagerInput {
                project_id,
                chain_read_client,
                wallet_client,
                ..hydrated.into_input()
            })
        }
        Err(e) => {
            warn!(project_id = id, "Ignoring unreadable sale snapshot: {e}");
            Ok(fresh)
        }
    }
}

pub fn dehydrate(snapshot: &SaleSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

pub fn hydrate(
    serialized: &str,
    chain_read_client: Option<Arc<dyn ChainReader>>,
    wallet_client: Option<Arc<dyn WalletClient>>,
) -> Result<HydratedSale> {
    let snapshot: SaleSnapshot = serde_json::from_str(serialized)?;
    let ctx = snapshot.context;
    Ok(HydratedSale {
        phase: snapshot.phase,
        context: SaleContext {
            project_id: ctx.project_id,
            chain_read_client: ctx.chain_read_client.and(chain_read_client),
            wallet_client: ctx.wallet_client.and(wallet_client),
            project: ctx.project,
            live_sale_data: ctx.live_sale_data,
            error_message: ctx.error_message,
            project_ineligible_reason: ctx.project_ineligible_reason,
        },
        purchase: snapshot.purchase,
    })
}
