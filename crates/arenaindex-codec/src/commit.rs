//! Commit-reveal digest.
//!
//! Reproduces the contract's pure `computeCommitHash(arenaId, player, salt, predWords)`:
//!
//! ```text
//! keccak256( arenaId (32 bytes BE) ‖ player (20 bytes) ‖ salt (32 bytes) ‖ predWords[0..n] (32 bytes BE each) )
//! ```
//!
//! A reveal is rejected on-chain unless this digest matches the committed one
//! exactly, so the byte layout here is load-bearing.

use alloy_primitives::{Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};

use crate::error::CodecError;
use crate::predictions::encode_predictions;

/// Compute the commitment digest for a packed prediction sequence.
pub fn compute_commit_hash(arena_id: U256, player: Address, salt: B256, words: &[U256]) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(&arena_id.to_be_bytes::<32>());
    hasher.update(player.as_slice());
    hasher.update(salt.as_slice());
    for word in words {
        hasher.update(&word.to_be_bytes::<32>());
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Draw a fresh 256-bit salt from the OS CSPRNG.
///
/// Every commitment needs its own salt; reusing one makes two commitments
/// with equal predictions linkable.
pub fn generate_salt() -> Result<B256, CodecError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| CodecError::Entropy {
        reason: e.to_string(),
    })?;
    Ok(B256::from(bytes))
}

/// Everything a player must keep locally between commit and reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub arena_id: U256,
    pub player: Address,
    pub salt: B256,
    pub words: Vec<U256>,
    pub digest: B256,
}

impl Commitment {
    /// Commit to `predictions` with a freshly generated salt.
    pub fn new(arena_id: U256, player: Address, predictions: &[bool]) -> Result<Self, CodecError> {
        Ok(Self::with_salt(arena_id, player, generate_salt()?, predictions))
    }

    /// Commit with a caller-supplied salt.
    pub fn with_salt(arena_id: U256, player: Address, salt: B256, predictions: &[bool]) -> Self {
        let words = encode_predictions(predictions);
        let digest = compute_commit_hash(arena_id, player, salt, &words);
        Self {
            arena_id,
            player,
            salt,
            words,
            digest,
        }
    }

    /// Returns `true` if a reveal of `(salt, words)` reproduces `expected`.
    pub fn verify(
        expected: B256,
        arena_id: U256,
        player: Address,
        salt: B256,
        words: &[U256],
    ) -> bool {
        compute_commit_hash(arena_id, player, salt, words) == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn player() -> Address {
        Address::repeat_byte(0xAA)
    }

    #[test]
    fn digest_matches_manual_packed_layout() {
        let arena_id = U256::from(42u64);
        let salt = B256::repeat_byte(0x11);
        let words = vec![U256::from(5u64), U256::MAX];

        let mut packed = Vec::new();
        packed.extend_from_slice(&arena_id.to_be_bytes::<32>());
        packed.extend_from_slice(player().as_slice());
        packed.extend_from_slice(salt.as_slice());
        for w in &words {
            packed.extend_from_slice(&w.to_be_bytes::<32>());
        }
        assert_eq!(packed.len(), 32 + 20 + 32 + 64);

        assert_eq!(
            compute_commit_hash(arena_id, player(), salt, &words),
            alloy_primitives::keccak256(&packed)
        );
    }

    #[test]
    fn empty_input_digest_is_keccak_of_prefix() {
        let digest = compute_commit_hash(U256::ZERO, Address::ZERO, B256::ZERO, &[]);
        assert_eq!(digest, alloy_primitives::keccak256([0u8; 84]));
    }

    #[test]
    fn digest_is_deterministic() {
        let salt = B256::repeat_byte(7);
        let words = encode_predictions(&[true, false, true]);
        let a = compute_commit_hash(U256::from(1u64), player(), salt, &words);
        let b = compute_commit_hash(U256::from(1u64), player(), salt, &words);
        assert_eq!(a, b);
    }

    #[test]
    fn any_single_field_change_changes_digest() {
        let salt = B256::repeat_byte(7);
        let preds: Vec<bool> = (0..300).map(|i| i % 3 == 0).collect();
        let base = Commitment::with_salt(U256::from(42u64), player(), salt, &preds);

        let mut flipped = preds.clone();
        flipped[299] = !flipped[299];
        let other_bit = Commitment::with_salt(U256::from(42u64), player(), salt, &flipped);
        let other_arena = Commitment::with_salt(U256::from(43u64), player(), salt, &preds);
        let other_player =
            Commitment::with_salt(U256::from(42u64), Address::repeat_byte(0xAB), salt, &preds);
        let other_salt =
            Commitment::with_salt(U256::from(42u64), player(), B256::repeat_byte(8), &preds);

        for other in [other_bit, other_arena, other_player, other_salt] {
            assert_ne!(base.digest, other.digest);
        }
    }

    #[test]
    fn reveal_verifies_against_commitment() {
        let preds: Vec<bool> = (0..1500).map(|i| i % 2 == 1).collect();
        let c = Commitment::new(U256::from(9u64), player(), &preds).unwrap();
        assert!(Commitment::verify(c.digest, c.arena_id, c.player, c.salt, &c.words));
        assert!(!Commitment::verify(
            c.digest,
            c.arena_id,
            c.player,
            B256::ZERO,
            &c.words
        ));
    }

    #[test]
    fn generated_salts_are_fresh() {
        let salts: HashSet<B256> = (0..64).map(|_| generate_salt().unwrap()).collect();
        assert_eq!(salts.len(), 64);
        assert!(!salts.contains(&B256::ZERO));
    }

    #[test]
    fn reused_salt_makes_commitments_linkable() {
        // Salt reuse is a caller error: same player, same predictions and the
        // same salt give identical digests, revealing the link between them.
        let salt = B256::repeat_byte(3);
        let preds = vec![true; 10];
        let first = Commitment::with_salt(U256::from(1u64), player(), salt, &preds);
        let second = Commitment::with_salt(U256::from(1u64), player(), salt, &preds);
        assert_eq!(first.digest, second.digest, "salt reuse must be caught by callers");

        let fresh = Commitment::new(U256::from(1u64), player(), &preds).unwrap();
        assert_ne!(first.digest, fresh.digest);
    }
}
