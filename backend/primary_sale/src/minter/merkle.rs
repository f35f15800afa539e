//! Allowlist minters: membership is proven with a merkle proof over
//! `keccak256(address)` leaves, hashed as sorted pairs.

use crate::abi::{encode_call, keccak256, Token};
use crate::errors::{Result, SaleError};
use crate::types::{Address, TransactionRequest, H256};

use super::{Eligibility, EligibilityContext, EligibilityDetails, PurchaseParams};

pub fn leaf_for(address: &Address) -> H256 {
    H256(keccak256(address.as_bytes()))
}

fn hash_pair(a: &H256, b: &H256) -> H256 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(low.as_bytes());
    buf[32..].copy_from_slice(high.as_bytes());
    H256(keccak256(&buf))
}

/// Sorted-pair merkle tree. An unpaired node at the end of a layer is
/// promoted to the next layer unchanged.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    layers: Vec<Vec<H256>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<H256>) -> Self {
        let mut layers = vec![leaves];
        while layers.last().map_or(false, |layer| layer.len() > 1) {
            let current = &layers[layers.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            layers.push(next);
        }
        Self { layers }
    }

    pub fn root(&self) -> Option<H256> {
        self.layers.last().and_then(|layer| layer.first()).copied()
    }

    /// Sibling path from `leaf` to the root, or `None` if `leaf` is not in
    /// the tree.
    pub fn proof(&self, leaf: &H256) -> Option<Vec<H256>> {
        let mut index = self.layers.first()?.iter().position(|l| l == leaf)?;
        let mut proof = Vec::new();
        for layer in &self.layers[..self.layers.len() - 1] {
            if let Some(sibling) = layer.get(index ^ 1) {
                proof.push(*sibling);
            }
            index /= 2;
        }
        Some(proof)
    }
}

pub fn verify(proof: &[H256], root: &H256, leaf: &H256) -> bool {
    let computed = proof.iter().fold(*leaf, |acc, node| hash_pair(&acc, node));
    &computed == root
}

pub(super) async fn check_eligibility(ctx: &EligibilityContext<'_>) -> Result<Eligibility> {
    let allowlist = ctx.source.fetch_allowlist(ctx.project).await?;
    let tree = MerkleTree::new(allowlist.iter().map(leaf_for).collect());

    if let (Some(expected), Some(actual)) = (ctx.minter.merkle_root, tree.root()) {
        if expected != actual {
            return Err(SaleError::AllowlistRootMismatch);
        }
    }

    let Some(proof) = tree.proof(&leaf_for(&ctx.account)) else {
        return Ok(Eligibility::Ineligible(
            "Connected wallet is not on the allowlist for this project".to_string(),
        ));
    };

    let mints_remaining = ctx
        .chain
        .merkle_mints_remaining(ctx.project, ctx.account)
        .await?;
    if mints_remaining == Some(0) {
        return Ok(Eligibility::Ineligible(
            "Connected wallet has no allowlist mints remaining".to_string(),
        ));
    }

    Ok(Eligibility::Eligible(EligibilityDetails::Allowlisted {
        proof,
        mints_remaining,
    }))
}

pub(super) fn purchase_transactions(params: &PurchaseParams<'_>) -> Result<Vec<TransactionRequest>> {
    let EligibilityDetails::Allowlisted { proof, .. } = params.details else {
        return Err(SaleError::MissingPurchaseData("allowlist proof"));
    };
    let data = encode_call(
        "purchaseTo(address,uint256,address,bytes32[])",
        &[
            Token::Address(params.purchase_to),
            Token::Uint(u128::from(params.project.project_index)),
            Token::Address(params.project.core_contract),
            Token::Bytes32Array(proof.clone()),
        ],
    );
    Ok(vec![TransactionRequest {
        from: params.account,
        to: params.minter.address,
        data,
        value: params.price_in_wei,
    }])
}
