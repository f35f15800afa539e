//! Live sale data poller.
//!
//! Refreshes price and project state for a fixed `(project, client)` pair
//! and pushes every result to the sale manager. A failed read is reported
//! once and ends the poller; the manager decides what happens next.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clients::ChainReader;
use crate::errors::Result;
use crate::sale_manager::{ChildEvent, ParentHandle};
use crate::types::{LiveSaleData, Project};

pub const LIVE_SALE_DATA_POLLING_INTERVAL: Duration = Duration::from_secs(10);

/// Why a poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    Cancelled,
    Failed,
}

pub struct LiveSaleDataPoller {
    project: Project,
    client: Arc<dyn ChainReader>,
    parent: ParentHandle,
    interval: Duration,
}

impl LiveSaleDataPoller {
    pub fn new(
        project: Project,
        client: Arc<dyn ChainReader>,
        parent: ParentHandle,
        interval: Duration,
    ) -> Self {
        Self {
            project,
            client,
            parent,
            interval,
        }
    }

    pub async fn run(self) -> PollerExit {
        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.parent.stopped() => return PollerExit::Cancelled,
                result = fetch_live_sale_data(self.client.as_ref(), &self.project) => result,
            };

            match fetched {
                Ok(data) => {
                    debug!(
                        project_id = %self.project.id,
                        price = data.token_price_in_wei,
                        invocations = data.invocations,
                        "Live sale data fetched"
                    );
                    if !self.parent.send(ChildEvent::LiveSaleDataFetched(data)) {
                        return PollerExit::Cancelled;
                    }
                }
                Err(err) => {
                    warn!(project_id = %self.project.id, "Live sale data fetch failed: {err}");
                    self.parent.send(ChildEvent::ExternalError(err.to_string()));
                    return PollerExit::Failed;
                }
            }

            tokio::select! {
                biased;
                _ = self.parent.stopped() => return PollerExit::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Read price and project state concurrently.
pub async fn fetch_live_sale_data(
    client: &dyn ChainReader,
    project: &Project,
) -> Result<LiveSaleData> {
    let (price, state) = tokio::try_join!(client.price_info(project), client.project_state(project))?;
    Ok(LiveSaleData::from_reads(price, state))
}
