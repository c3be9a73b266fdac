//! Text encodings for on-chain values.
//!
//! Ids and amounts are decimal strings of the `uint256`; addresses are
//! lowercase `0x` hex. Parsing failures mean the database was written by
//! something else and are reported as corruption.

use std::str::FromStr;

use alloy_primitives::{Address, I256, U256};
use arenaindex_core::IndexerError;

pub(crate) fn dec(v: U256) -> String {
    v.to_string()
}

pub(crate) fn addr(a: Address) -> String {
    format!("{a:#x}")
}

pub(crate) fn parse_u256(s: &str) -> Result<U256, IndexerError> {
    U256::from_str(s).map_err(|e| IndexerError::StoreCorrupted(format!("bad uint256 '{s}': {e}")))
}

pub(crate) fn parse_i256(s: &str) -> Result<I256, IndexerError> {
    I256::from_dec_str(s).map_err(|e| IndexerError::StoreCorrupted(format!("bad int256 '{s}': {e}")))
}

pub(crate) fn parse_addr(s: &str) -> Result<Address, IndexerError> {
    Address::from_str(s).map_err(|e| IndexerError::StoreCorrupted(format!("bad address '{s}': {e}")))
}

pub(crate) fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::StoreTransactionFailure(e.to_string())
}

pub(crate) fn json_err(e: serde_json::Error) -> IndexerError {
    IndexerError::StoreCorrupted(e.to_string())
}
