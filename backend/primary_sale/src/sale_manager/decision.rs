//! Pure phase decision for the sale manager.
//!
//! [`decide`] takes one step from the current phase; [`settle`] repeats it
//! until the phase stops changing. Neither touches the runtime: they return
//! the side effects to perform as [`SaleAction`]s, which the actor applies.

use chrono::{DateTime, Utc};

use crate::predicates::{is_project_complete, project_ineligibility_reason};

use super::{SaleContext, SalePhase};

/// Upper bound on chained transitions in one settle pass. The longest real
/// chain is readyForSale → idle → terminal.
const MAX_TRANSITIONS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleAction {
    /// Ensure the poller runs (no-op when already running).
    StartLiveSaleDataPolling,
    StopLiveSaleDataPolling,
    /// Ensure the purchase initiator runs (no-op when already running).
    StartPurchaseInitiation,
    StopPurchaseInitiation,
    /// Store a derived ineligibility reason in the context.
    RecordIneligibility(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub phase: SalePhase,
    pub actions: Vec<SaleAction>,
}

impl Decision {
    fn stay(phase: SalePhase) -> Self {
        Self {
            phase,
            actions: Vec::new(),
        }
    }
}

/// Why the project cannot be sold at all, from the recorded reason or the
/// project's minter.
fn ineligibility(ctx: &SaleContext) -> Option<String> {
    if let Some(reason) = &ctx.project_ineligible_reason {
        return Some(reason.clone());
    }
    match &ctx.project {
        Some(project) => project_ineligibility_reason(project),
        None => Some("Project metadata is unavailable".to_string()),
    }
}

/// `readyForSale` holds while the sale is purchasable, a chain client is
/// connected and nothing has annotated the context with an error or
/// ineligibility.
fn sale_ready(ctx: &SaleContext, now: DateTime<Utc>) -> bool {
    ctx.error_message.is_none()
        && ctx.project_ineligible_reason.is_none()
        && ctx.chain_read_client.is_some()
        && ctx.is_purchasable(now)
}

/// A ready sale keeps polling so price, pause and completion stay current
/// while purchases are offered. Both starts are no-ops for running workers.
fn ready_actions() -> Vec<SaleAction> {
    vec![
        SaleAction::StartLiveSaleDataPolling,
        SaleAction::StartPurchaseInitiation,
    ]
}

/// One decision step from `phase`.
pub fn decide(phase: SalePhase, ctx: &SaleContext, now: DateTime<Utc>) -> Decision {
    match phase {
        SalePhase::Idle => decide_idle(ctx, now),
        SalePhase::ReadyForSale => {
            if sale_ready(ctx, now) {
                Decision {
                    phase: SalePhase::ReadyForSale,
                    actions: ready_actions(),
                }
            } else {
                Decision {
                    phase: SalePhase::Idle,
                    actions: vec![SaleAction::StopPurchaseInitiation],
                }
            }
        }
        SalePhase::FetchingProjectData
        | SalePhase::ProjectSaleComplete
        | SalePhase::Error
        | SalePhase::ProjectIneligibleForPrimarySale => Decision::stay(phase),
    }
}

fn decide_idle(ctx: &SaleContext, now: DateTime<Utc>) -> Decision {
    let stop_workers = || {
        vec![
            SaleAction::StopLiveSaleDataPolling,
            SaleAction::StopPurchaseInitiation,
        ]
    };

    if ctx.error_message.is_some() {
        return Decision {
            phase: SalePhase::Error,
            actions: stop_workers(),
        };
    }

    if let Some(reason) = ineligibility(ctx) {
        let mut actions = stop_workers();
        if ctx.project_ineligible_reason.is_none() {
            actions.push(SaleAction::RecordIneligibility(reason));
        }
        return Decision {
            phase: SalePhase::ProjectIneligibleForPrimarySale,
            actions,
        };
    }

    if ctx
        .project
        .as_ref()
        .is_some_and(|project| is_project_complete(project, ctx.live_sale_data.as_ref()))
    {
        return Decision {
            phase: SalePhase::ProjectSaleComplete,
            actions: stop_workers(),
        };
    }

    if sale_ready(ctx, now) {
        return Decision {
            phase: SalePhase::ReadyForSale,
            actions: ready_actions(),
        };
    }

    if ctx.chain_read_client.is_none() {
        return Decision {
            phase: SalePhase::Idle,
            actions: vec![SaleAction::StopLiveSaleDataPolling],
        };
    }

    Decision {
        phase: SalePhase::Idle,
        actions: vec![SaleAction::StartLiveSaleDataPolling],
    }
}

/// Run [`decide`] until the phase is stable, collecting every action in
/// order. Settling a settled phase yields the same phase again.
pub fn settle(phase: SalePhase, ctx: &SaleContext, now: DateTime<Utc>) -> Decision {
    let mut current = phase;
    let mut actions = Vec::new();
    for _ in 0..MAX_TRANSITIONS {
        let step = decide(current, ctx, now);
        actions.extend(step.actions);
        if step.phase == current {
            break;
        }
        current = step.phase;
    }
    Decision {
        phase: current,
        actions,
    }
}
