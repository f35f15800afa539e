//! Pure predicates over the sale context, shared by the decision function
//! and the host surface.

use chrono::{DateTime, Utc};

use crate::minter::MinterSupport;
use crate::types::{Address, LiveSaleData, Project};

/// Reason the project can never be sold through its current minter, if any.
pub fn project_ineligibility_reason(project: &Project) -> Option<String> {
    MinterSupport::of(project).ineligibility_reason()
}

pub fn is_project_eligible(project: &Project) -> bool {
    project_ineligibility_reason(project).is_none()
}

/// Complete either by metadata flag or by an on-chain completion timestamp.
pub fn is_project_complete(project: &Project, live: Option<&LiveSaleData>) -> bool {
    project.complete || live.map_or(false, |data| data.completed_timestamp.is_some())
}

/// Whether `account` may purchase right now.
///
/// Requires live data, a connected account, an eligible and incomplete
/// project, the artist as caller while paused, and a start time (if any)
/// in the past.
pub fn is_purchasable(
    project: Option<&Project>,
    live: Option<&LiveSaleData>,
    account: Option<Address>,
    now: DateTime<Utc>,
) -> bool {
    let (Some(project), Some(live), Some(account)) = (project, live, account) else {
        return false;
    };
    if is_project_complete(project, Some(live)) || !is_project_eligible(project) {
        return false;
    }
    if live.paused && account != project.artist_address {
        return false;
    }
    if let Some(start) = project.auction_start_time {
        if now < start {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::test_utils::{addr, sample_live_data, sample_project, ARTIST};

    #[test]
    fn no_wallet_is_never_purchasable() {
        let project = sample_project("MinterSetPriceV5");
        let live = sample_live_data();
        assert!(!is_purchasable(Some(&project), Some(&live), None, Utc::now()));
        assert!(is_purchasable(
            Some(&project),
            Some(&live),
            Some(addr(1)),
            Utc::now()
        ));
    }

    #[test]
    fn paused_project_only_sells_to_the_artist() {
        let project = sample_project("MinterSetPriceV5");
        let live = LiveSaleData {
            paused: true,
            ..sample_live_data()
        };
        assert!(!is_purchasable(
            Some(&project),
            Some(&live),
            Some(addr(1)),
            Utc::now()
        ));
        assert!(is_purchasable(
            Some(&project),
            Some(&live),
            Some(addr(ARTIST)),
            Utc::now()
        ));
    }

    #[test]
    fn future_start_time_blocks_purchase() {
        let mut project = sample_project("MinterDAExpV5");
        let now = Utc::now();
        project.auction_start_time = Some(now + Duration::minutes(5));
        let live = sample_live_data();
        assert!(!is_purchasable(Some(&project), Some(&live), Some(addr(1)), now));
        assert!(is_purchasable(
            Some(&project),
            Some(&live),
            Some(addr(1)),
            now + Duration::minutes(6)
        ));
    }

    #[test]
    fn completion_by_flag_or_timestamp() {
        let mut project = sample_project("MinterSetPriceV5");
        let live = LiveSaleData {
            completed_timestamp: Some(1_700_000_000),
            ..sample_live_data()
        };
        assert!(is_project_complete(&project, Some(&live)));
        assert!(!is_project_complete(&project, None));
        project.complete = true;
        assert!(is_project_complete(&project, None));
    }

    #[test]
    fn unsupported_minter_is_ineligible() {
        let project = sample_project("MinterSEAV1");
        assert!(!is_project_eligible(&project));
        assert!(!is_purchasable(
            Some(&project),
            Some(&sample_live_data()),
            Some(addr(1)),
            Utc::now()
        ));
    }
}
