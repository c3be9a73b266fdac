//! ABI helpers shared by the decoder, enrichment and the price feed.
//!
//! Signatures are hashed with keccak256 (topic 0 for events, the first four
//! bytes for function selectors). Payloads are encoded and decoded with
//! alloy's `dyn-abi`.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
pub use alloy_primitives::keccak256;
use alloy_primitives::{Address, B256, U256};

/// Topic 0 of an event with the canonical `signature`.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// First four bytes of keccak256 of a function `signature`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Selector followed by the ABI-encoded `args`.
pub fn encode_call(signature: &str, args: Vec<DynSolValue>) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(DynSolValue::Tuple(args).abi_encode_params());
    out
}

/// Split calldata into the arguments of `signature`, or `None` if the
/// selector is different.
pub fn strip_selector<'a>(calldata: &'a [u8], signature: &str) -> Option<&'a [u8]> {
    if calldata.len() < 4 || calldata[..4] != selector(signature) {
        return None;
    }
    Some(&calldata[4..])
}

/// Decode `data` as the parameter list `types`.
pub fn decode_params(data: &[u8], types: &[DynSolType]) -> Result<Vec<DynSolValue>, String> {
    let decoded = DynSolType::Tuple(types.to_vec())
        .abi_decode_params(data)
        .map_err(|e| e.to_string())?;
    let values = match decoded {
        DynSolValue::Tuple(values) => values,
        other => vec![other],
    };
    if values.len() != types.len() {
        return Err(format!("expected {} values, decoded {}", types.len(), values.len()));
    }
    Ok(values)
}

/// Parse a 32-byte hex word (topic or hash).
pub fn parse_word(s: &str) -> Result<B256, String> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| format!("invalid hex '{s}': {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("expected 32 bytes, got {} in '{s}'", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Parse `0x`-prefixed (or bare) hex data.
pub fn parse_data(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| format!("invalid hex data: {e}"))
}

/// An indexed `uint256` topic.
pub fn topic_uint(word: &B256) -> U256 {
    U256::from_be_bytes(word.0)
}

/// An indexed `address` topic. The upper 12 bytes must be zero.
pub fn topic_address(word: &B256) -> Result<Address, String> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(format!("topic {word} is not a left-padded address"));
    }
    Ok(Address::from_word(*word))
}

// ─── Value accessors ────────────────────────────────────────────────────────

/// A decoded unsigned integer narrowed to `T`.
pub fn uint<T: TryFrom<U256>>(value: &DynSolValue, field: &str) -> Result<T, String> {
    let (n, _) = value.as_uint().ok_or_else(|| format!("{field}: expected uint"))?;
    T::try_from(n).map_err(|_| format!("{field}: {n} out of range"))
}

pub fn address(value: &DynSolValue, field: &str) -> Result<Address, String> {
    value.as_address().ok_or_else(|| format!("{field}: expected address"))
}

pub fn word(value: &DynSolValue, field: &str) -> Result<B256, String> {
    match value.as_fixed_bytes() {
        Some((bytes, 32)) => Ok(B256::from_slice(bytes)),
        _ => Err(format!("{field}: expected bytes32")),
    }
}

pub fn boolean(value: &DynSolValue, field: &str) -> Result<bool, String> {
    value.as_bool().ok_or_else(|| format!("{field}: expected bool"))
}

pub fn string(value: &DynSolValue, field: &str) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("{field}: expected string"))
}

pub fn uint_array(value: &DynSolValue, field: &str) -> Result<Vec<U256>, String> {
    let items = value.as_array().ok_or_else(|| format!("{field}: expected array"))?;
    items.iter().map(|item| uint::<U256>(item, field)).collect()
}
