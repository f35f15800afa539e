//! Primary-sale orchestration for generative-art minters.
//!
//! A [`sale_manager`] actor owns one project's sale: it fetches the project
//! metadata, keeps live sale data fresh through a [`poller`], and while the
//! connected wallet can buy it runs a [`purchase`] initiator that checks
//! eligibility against the project's [`minter`] and submits purchases.
//! Submitted purchases are followed to their receipts by the [`tracker`].

pub mod abi;
pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod errors;
pub mod graphql;
pub mod minter;
pub mod persist;
pub mod poller;
pub mod predicates;
pub mod purchase;
pub mod rpc;
pub mod sale_manager;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod test_utils;
