//! arenaindex-codec: the two numeric protocols the ArenaEngine contract scores with.
//!
//! - [`price_tape`]: 32-bit price samples packed 8 per `uint256` word
//! - [`predictions`]: up/down predictions packed 256 per `uint256` word
//! - [`commit`]: the `computeCommitHash` digest and salt generation
//!
//! Everything here is a pure function of its inputs (salt generation aside) and
//! must agree with the contract's storage layout exactly.

pub mod commit;
pub mod error;
pub mod predictions;
pub mod price_tape;

pub use commit::{compute_commit_hash, generate_salt, Commitment};
pub use error::CodecError;
pub use predictions::{
    bitstring_to_predictions, decode_predictions, encode_predictions, predictions_to_bitstring,
    TICKS_PER_WORD,
};

pub use alloy_primitives::{Address, B256, U256};
