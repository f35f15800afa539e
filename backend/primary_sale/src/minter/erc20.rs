//! ERC-20 priced minters. The buyer needs enough balance, and the minter
//! needs an allowance covering the price before the purchase call.

use crate::abi::{encode_call, Token};
use crate::errors::{Result, SaleError};
use crate::types::TransactionRequest;

use super::{Eligibility, EligibilityContext, EligibilityDetails, PurchaseParams};

pub(super) async fn check_eligibility(ctx: &EligibilityContext<'_>) -> Result<Eligibility> {
    let currency = ctx
        .project
        .currency
        .address
        .ok_or(SaleError::MissingPurchaseData("ERC-20 currency address"))?;
    let price = ctx.price_in_wei.ok_or(SaleError::LiveSaleDataUnavailable)?;

    let (balance, allowance, decimals) = tokio::try_join!(
        ctx.chain.erc20_balance(currency, ctx.account),
        ctx.chain
            .erc20_allowance(currency, ctx.account, ctx.minter.address),
        ctx.chain.erc20_decimals(currency),
    )?;

    if balance < price {
        return Ok(Eligibility::Ineligible(format!(
            "Insufficient {} balance",
            ctx.project.currency.symbol
        )));
    }

    Ok(Eligibility::Eligible(EligibilityDetails::Erc20 {
        currency_address: currency,
        balance,
        allowance,
        decimals,
    }))
}

pub(super) async fn purchase_transactions(
    params: &PurchaseParams<'_>,
) -> Result<Vec<TransactionRequest>> {
    let EligibilityDetails::Erc20 {
        currency_address, ..
    } = params.details
    else {
        return Err(SaleError::MissingPurchaseData("ERC-20 eligibility details"));
    };
    let currency = *currency_address;

    // The allowance seen at eligibility time is consumed by earlier purchases.
    let allowance = params
        .chain
        .erc20_allowance(currency, params.account, params.minter.address)
        .await?;

    let mut txs = Vec::with_capacity(2);
    if allowance < params.price_in_wei {
        txs.push(TransactionRequest {
            from: params.account,
            to: currency,
            data: encode_call(
                "approve(address,uint256)",
                &[
                    Token::Address(params.minter.address),
                    Token::Uint(params.price_in_wei),
                ],
            ),
            value: 0,
        });
    }

    txs.push(TransactionRequest {
        from: params.account,
        to: params.minter.address,
        data: encode_call(
            "purchaseTo(address,uint256,address,uint256,address)",
            &[
                Token::Address(params.purchase_to),
                Token::Uint(u128::from(params.project.project_index)),
                Token::Address(params.project.core_contract),
                Token::Uint(params.price_in_wei),
                Token::Address(currency),
            ],
        ),
        value: 0,
    });
    Ok(txs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::selector;
    use crate::minter::MinterKind;
    use crate::test_utils::{addr, sample_project, FakeChain, FakeSource};
    use crate::types::Currency;

    fn erc20_project() -> crate::types::Project {
        let mut project = sample_project("MinterSetPriceERC20V5");
        project.currency = Currency {
            symbol: "USDC".into(),
            address: Some(addr(0xee)),
        };
        project
    }

    #[tokio::test]
    async fn low_balance_is_ineligible() {
        let project = erc20_project();
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        chain.set_erc20(50, 0, 6);
        let source = FakeSource::with_project(project.clone());

        let ctx = EligibilityContext {
            project: &project,
            minter: &minter,
            account: addr(1),
            price_in_wei: Some(100),
            chain: &chain,
            source: &source,
        };
        let result = MinterKind::SetPriceErc20.check_eligibility(&ctx).await.unwrap();
        assert_eq!(
            result,
            Eligibility::Ineligible("Insufficient USDC balance".into())
        );
    }

    #[tokio::test]
    async fn missing_allowance_adds_an_approval() {
        let project = erc20_project();
        let minter = project.minter.clone().unwrap();
        let chain = FakeChain::default();
        chain.set_erc20(500, 0, 6);
        let details = EligibilityDetails::Erc20 {
            currency_address: addr(0xee),
            balance: 500,
            allowance: 0,
            decimals: 6,
        };
        let params = PurchaseParams {
            project: &project,
            minter: &minter,
            account: addr(1),
            purchase_to: addr(1),
            price_in_wei: 100,
            details: &details,
            selected_token: None,
            chain: &chain,
        };

        let txs = MinterKind::SetPriceErc20
            .purchase_transactions(&params)
            .await
            .unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].to, addr(0xee));
        assert_eq!(txs[0].data[..4], selector("approve(address,uint256)"));
        assert_eq!(txs[1].value, 0);

        chain.set_erc20(500, 100, 6);
        let txs = MinterKind::SetPriceErc20
            .purchase_transactions(&params)
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
    }
}
