//! Use cases shared by the sync engine and the conflict resolver
//!
//! - [`fetch_content`] - materialize content, refreshing an expired locator once
//! - [`copy_item`] - transfer one item between drives and capture both states

pub mod transfer;

pub use transfer::{copy_item, fetch_content, TransferOutcome};
