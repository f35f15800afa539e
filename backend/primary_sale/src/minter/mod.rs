//! Supported minter kinds and their per-kind purchase flows.
//!
//! Each project is sold through exactly one minter contract. The minter's
//! on-chain type string is classified into the closed [`MinterKind`] enum;
//! every variant knows how to probe a wallet's eligibility and how to shape
//! the purchase transaction(s). Types we do not recognise are reported as
//! [`MinterSupport::Unsupported`] and make the project ineligible.

mod erc20;
mod holder;
pub mod merkle;

use serde::{Deserialize, Serialize};

use crate::abi::{encode_call, Token};
use crate::clients::{ChainReader, ProjectSource};
use crate::errors::Result;
use crate::types::{decimal_u128, Address, MinterConfiguration, Project, TransactionRequest, H256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MinterKind {
    SetPrice,
    SetPriceErc20,
    DaExp,
    DaLin,
    DaExpSettlement,
    Merkle,
    Holder,
}

impl MinterKind {
    /// Classify an on-chain minter type such as `MinterDAExpV5`. The version
    /// suffix is ignored.
    pub fn classify(minter_type: &str) -> Option<Self> {
        let base = minter_type.trim_end_matches(|c: char| c.is_ascii_digit());
        let base = base.strip_suffix('V').unwrap_or(base);
        match base {
            "MinterSetPrice" => Some(Self::SetPrice),
            "MinterSetPriceERC20" => Some(Self::SetPriceErc20),
            "MinterDAExp" => Some(Self::DaExp),
            "MinterDALin" => Some(Self::DaLin),
            "MinterDAExpSettlement" => Some(Self::DaExpSettlement),
            "MinterSetPriceMerkle" | "MinterMerkle" => Some(Self::Merkle),
            "MinterSetPriceHolder" | "MinterHolder" => Some(Self::Holder),
            _ => None,
        }
    }

    /// Probe whether the wallet in `ctx` may purchase through this minter.
    pub async fn check_eligibility(&self, ctx: &EligibilityContext<'_>) -> Result<Eligibility> {
        match self {
            Self::Merkle => merkle::check_eligibility(ctx).await,
            Self::Holder => holder::check_eligibility(ctx).await,
            Self::SetPriceErc20 => erc20::check_eligibility(ctx).await,
            Self::SetPrice | Self::DaExp | Self::DaLin | Self::DaExpSettlement => {
                Ok(Eligibility::Eligible(EligibilityDetails::Open))
            }
        }
    }

    /// Build the transaction(s) to submit, in order.
    pub async fn purchase_transactions(
        &self,
        params: &PurchaseParams<'_>,
    ) -> Result<Vec<TransactionRequest>> {
        match self {
            Self::Merkle => merkle::purchase_transactions(params),
            Self::Holder => holder::purchase_transactions(params),
            Self::SetPriceErc20 => erc20::purchase_transactions(params).await,
            Self::SetPrice | Self::DaExp | Self::DaLin | Self::DaExpSettlement => {
                Ok(vec![base_purchase(params)])
            }
        }
    }
}

/// Whether a project's assigned minter can be used for a primary sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinterSupport {
    Supported(MinterKind),
    NotAssigned,
    Unsupported(String),
}

impl MinterSupport {
    pub fn of(project: &Project) -> Self {
        match &project.minter {
            None => Self::NotAssigned,
            Some(minter) => match MinterKind::classify(&minter.minter_type) {
                Some(kind) => Self::Supported(kind),
                None => Self::Unsupported(minter.minter_type.clone()),
            },
        }
    }

    pub fn ineligibility_reason(&self) -> Option<String> {
        match self {
            Self::Supported(_) => None,
            Self::NotAssigned => Some("Project has no minter assigned".to_string()),
            Self::Unsupported(minter_type) => Some(format!(
                "Minter type {minter_type} is not supported for primary sales"
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Eligibility
// ─────────────────────────────────────────────────────────

pub struct EligibilityContext<'a> {
    pub project: &'a Project,
    pub minter: &'a MinterConfiguration,
    pub account: Address,
    pub price_in_wei: Option<u128>,
    pub chain: &'a dyn ChainReader,
    pub source: &'a dyn ProjectSource,
}

/// A token that unlocks a holder-gated purchase, and the vault holding it
/// when it is not held by the wallet directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderToken {
    pub contract_address: Address,
    #[serde(with = "decimal_u128")]
    pub token_id: u128,
    pub vault: Option<Address>,
}

/// Data gathered while checking eligibility that the purchase call needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EligibilityDetails {
    Open,
    #[serde(rename_all = "camelCase")]
    Allowlisted {
        proof: Vec<H256>,
        mints_remaining: Option<u64>,
    },
    Holder {
        tokens: Vec<HolderToken>,
    },
    #[serde(rename_all = "camelCase")]
    Erc20 {
        currency_address: Address,
        #[serde(with = "decimal_u128")]
        balance: u128,
        #[serde(with = "decimal_u128")]
        allowance: u128,
        decimals: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible(EligibilityDetails),
    /// Business outcome, not a failure. Carries a user-facing reason.
    Ineligible(String),
}

// ─────────────────────────────────────────────────────────
// Purchase
// ─────────────────────────────────────────────────────────

pub struct PurchaseParams<'a> {
    pub project: &'a Project,
    pub minter: &'a MinterConfiguration,
    pub account: Address,
    pub purchase_to: Address,
    pub price_in_wei: u128,
    pub details: &'a EligibilityDetails,
    pub selected_token: Option<&'a HolderToken>,
    pub chain: &'a dyn ChainReader,
}

fn base_purchase(params: &PurchaseParams<'_>) -> TransactionRequest {
    let project_index = Token::Uint(u128::from(params.project.project_index));
    let core = Token::Address(params.project.core_contract);
    let data = if params.purchase_to == params.account {
        encode_call("purchase(uint256,address)", &[project_index, core])
    } else {
        encode_call(
            "purchaseTo(address,uint256,address)",
            &[Token::Address(params.purchase_to), project_index, core],
        )
    };
    TransactionRequest {
        from: params.account,
        to: params.minter.address,
        data,
        value: params.price_in_wei,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::selector;
    use crate::test_utils::{addr, sample_project, FakeChain};

    #[test]
    fn classify_ignores_version_suffix() {
        assert_eq!(MinterKind::classify("MinterSetPriceV5"), Some(MinterKind::SetPrice));
        assert_eq!(MinterKind::classify("MinterSetPriceV4"), Some(MinterKind::SetPrice));
        assert_eq!(
            MinterKind::classify("MinterSetPriceERC20V5"),
            Some(MinterKind::SetPriceErc20)
        );
        assert_eq!(MinterKind::classify("MinterDAExpV5"), Some(MinterKind::DaExp));
        assert_eq!(
            MinterKind::classify("MinterDAExpSettlementV3"),
            Some(MinterKind::DaExpSettlement)
        );
        assert_eq!(MinterKind::classify("MinterDALinV5"), Some(MinterKind::DaLin));
        assert_eq!(MinterKind::classify("MinterMerkleV5"), Some(MinterKind::Merkle));
        assert_eq!(
            MinterKind::classify("MinterSetPriceHolderV5"),
            Some(MinterKind::Holder)
        );
        assert_eq!(MinterKind::classify("MinterSEAV1"), None);
        assert_eq!(MinterKind::classify(""), None);
    }

    #[test]
    fn support_reports_missing_and_unknown_minters() {
        let mut project = sample_project("MinterSetPriceV5");
        assert_eq!(
            MinterSupport::of(&project),
            MinterSupport::Supported(MinterKind::SetPrice)
        );

        project.minter.as_mut().unwrap().minter_type = "MinterRAMV0".into();
        let support = MinterSupport::of(&project);
        assert_eq!(support, MinterSupport::Unsupported("MinterRAMV0".into()));
        assert!(support.ineligibility_reason().unwrap().contains("MinterRAMV0"));

        project.minter = None;
        assert_eq!(MinterSupport::of(&project), MinterSupport::NotAssigned);
        assert!(MinterSupport::NotAssigned.ineligibility_reason().is_some());
    }

    #[tokio::test]
    async fn base_purchase_uses_purchase_to_for_other_recipients() {
        let project = sample_project("MinterSetPriceV5");
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        let buyer = addr(0x11);
        let friend = addr(0x22);

        let mut params = PurchaseParams {
            project: &project,
            minter: &minter,
            account: buyer,
            purchase_to: buyer,
            price_in_wei: 42,
            details: &EligibilityDetails::Open,
            selected_token: None,
            chain: &chain,
        };
        let own = MinterKind::SetPrice.purchase_transactions(&params).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].data[..4], selector("purchase(uint256,address)"));
        assert_eq!(own[0].value, 42);
        assert_eq!(own[0].to, minter.address);

        params.purchase_to = friend;
        let gift = MinterKind::SetPrice.purchase_transactions(&params).await.unwrap();
        assert_eq!(
            gift[0].data[..4],
            selector("purchaseTo(address,uint256,address)")
        );
        assert_eq!(&gift[0].data[16..36], friend.as_bytes());
    }
}
