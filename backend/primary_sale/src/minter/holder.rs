//! Holder-gated minters: the wallet, or a vault that delegated to it, must
//! own a token from one of the minter's allowlisted projects.

use crate::abi::{encode_call, Token};
use crate::errors::{Result, SaleError};
use crate::types::TransactionRequest;

use super::{Eligibility, EligibilityContext, EligibilityDetails, HolderToken, PurchaseParams};

pub(super) async fn check_eligibility(ctx: &EligibilityContext<'_>) -> Result<Eligibility> {
    let allowed = &ctx.minter.allowlisted_projects;
    if allowed.is_empty() {
        return Ok(Eligibility::Ineligible(
            "No projects are allowlisted for this holder minter".to_string(),
        ));
    }

    let vaults = ctx.source.fetch_delegation_vaults(ctx.account).await?;
    let mut owners = vec![ctx.account];
    owners.extend(vaults.into_iter().filter(|vault| *vault != ctx.account));

    let mut tokens: Vec<HolderToken> = ctx
        .source
        .fetch_owned_tokens(&owners, allowed)
        .await?
        .into_iter()
        .filter(|token| owners.contains(&token.owner))
        .map(|token| HolderToken {
            contract_address: token.contract_address,
            token_id: token.token_id,
            vault: (token.owner != ctx.account).then_some(token.owner),
        })
        .collect();

    if tokens.is_empty() {
        return Ok(Eligibility::Ineligible(
            "Connected wallet does not hold a token from an allowlisted project".to_string(),
        ));
    }

    // Directly held tokens first; they need no delegation on chain.
    tokens.sort_by_key(|token| token.vault.is_some());
    Ok(Eligibility::Eligible(EligibilityDetails::Holder { tokens }))
}

pub(super) fn purchase_transactions(params: &PurchaseParams<'_>) -> Result<Vec<TransactionRequest>> {
    let EligibilityDetails::Holder { tokens } = params.details else {
        return Err(SaleError::MissingPurchaseData("holder token"));
    };
    // A selected token must be one eligibility found; its vault comes from there too.
    let token = match params.selected_token {
        Some(selected) => tokens
            .iter()
            .find(|token| {
                token.contract_address == selected.contract_address
                    && token.token_id == selected.token_id
            })
            .ok_or(SaleError::HolderTokenNotEligible {
                contract: selected.contract_address,
                token_id: selected.token_id,
            })?,
        None => tokens
            .first()
            .ok_or(SaleError::MissingPurchaseData("holder token"))?,
    };

    let mut args = vec![
        Token::Address(params.purchase_to),
        Token::Uint(u128::from(params.project.project_index)),
        Token::Address(params.project.core_contract),
        Token::Address(token.contract_address),
        Token::Uint(token.token_id),
    ];
    let signature = match token.vault {
        Some(vault) => {
            args.push(Token::Address(vault));
            "purchaseTo(address,uint256,address,address,uint256,address)"
        }
        None => "purchaseTo(address,uint256,address,address,uint256)",
    };

    Ok(vec![TransactionRequest {
        from: params.account,
        to: params.minter.address,
        data: encode_call(signature, &args),
        value: params.price_in_wei,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::selector;
    use crate::minter::MinterKind;
    use crate::test_utils::{addr, sample_project, FakeChain, FakeSource};
    use crate::types::OwnedToken;

    fn holder_project() -> crate::types::Project {
        let mut project = sample_project("MinterSetPriceHolderV5");
        project.minter.as_mut().unwrap().allowlisted_projects = vec!["0xcore-7".to_string()];
        project
    }

    #[tokio::test]
    async fn token_held_by_vault_makes_wallet_eligible() {
        let project = holder_project();
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        let source = FakeSource::with_project(project.clone());
        let wallet = addr(1);
        let vault = addr(2);
        source.set_vaults(vec![vault]);
        source.set_owned_tokens(vec![OwnedToken {
            contract_address: addr(0xc0),
            token_id: 7_000_001,
            owner: vault,
            project_id: "0xcore-7".into(),
        }]);

        let ctx = EligibilityContext {
            project: &project,
            minter: &minter,
            account: wallet,
            price_in_wei: Some(1),
            chain: &chain,
            source: &source,
        };
        let result = MinterKind::Holder.check_eligibility(&ctx).await.unwrap();
        assert_eq!(
            result,
            Eligibility::Eligible(EligibilityDetails::Holder {
                tokens: vec![HolderToken {
                    contract_address: addr(0xc0),
                    token_id: 7_000_001,
                    vault: Some(vault),
                }]
            })
        );
    }

    #[tokio::test]
    async fn wallet_without_tokens_is_ineligible() {
        let project = holder_project();
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        let source = FakeSource::with_project(project.clone());

        let ctx = EligibilityContext {
            project: &project,
            minter: &minter,
            account: addr(1),
            price_in_wei: Some(1),
            chain: &chain,
            source: &source,
        };
        let result = MinterKind::Holder.check_eligibility(&ctx).await.unwrap();
        assert!(matches!(result, Eligibility::Ineligible(_)));
    }

    #[tokio::test]
    async fn vault_tokens_use_the_vault_call_shape() {
        let project = holder_project();
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        let details = EligibilityDetails::Holder {
            tokens: vec![HolderToken {
                contract_address: addr(0xc0),
                token_id: 5,
                vault: Some(addr(2)),
            }],
        };
        let params = PurchaseParams {
            project: &project,
            minter: &minter,
            account: addr(1),
            purchase_to: addr(1),
            price_in_wei: 10,
            details: &details,
            selected_token: None,
            chain: &chain,
        };
        let txs = MinterKind::Holder.purchase_transactions(&params).await.unwrap();
        assert_eq!(
            txs[0].data[..4],
            selector("purchaseTo(address,uint256,address,address,uint256,address)")
        );
        assert_eq!(txs[0].data.len(), 4 + 6 * 32);
    }

    #[tokio::test]
    async fn selected_token_must_come_from_eligibility() {
        let project = holder_project();
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        let owned = HolderToken {
            contract_address: addr(0xc0),
            token_id: 5,
            vault: None,
        };
        let details = EligibilityDetails::Holder {
            tokens: vec![owned.clone()],
        };
        let foreign = HolderToken {
            contract_address: addr(0xc0),
            token_id: 6,
            vault: None,
        };
        let mut params = PurchaseParams {
            project: &project,
            minter: &minter,
            account: addr(1),
            purchase_to: addr(1),
            price_in_wei: 10,
            details: &details,
            selected_token: Some(&foreign),
            chain: &chain,
        };
        let err = MinterKind::Holder
            .purchase_transactions(&params)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SaleError::HolderTokenNotEligible { token_id: 6, .. }
        ));

        params.selected_token = Some(&owned);
        let txs = MinterKind::Holder.purchase_transactions(&params).await.unwrap();
        assert_eq!(
            txs[0].data[..4],
            selector("purchaseTo(address,uint256,address,address,uint256)")
        );
    }
}
