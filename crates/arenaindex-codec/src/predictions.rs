//! Bit-packed prediction encoding.
//!
//! One bit per tick, `true` = up. Tick `i` lives in bit `i % 256` of word
//! `i / 256`, so 1500 ticks pack into `ceil(1500 / 256) = 6` words.

use alloy_primitives::U256;

use crate::error::CodecError;

/// Ticks held by one word.
pub const TICKS_PER_WORD: usize = 256;

/// Number of words needed for `ticks` predictions.
pub fn word_count(ticks: usize) -> usize {
    ticks.div_ceil(TICKS_PER_WORD)
}

/// Pack a prediction sequence into words.
pub fn encode_predictions(predictions: &[bool]) -> Vec<U256> {
    let mut words = vec![U256::ZERO; word_count(predictions.len())];
    for (i, up) in predictions.iter().enumerate() {
        if *up {
            words[i / TICKS_PER_WORD].set_bit(i % TICKS_PER_WORD, true);
        }
    }
    words
}

/// Unpack `ticks` predictions. Ticks past the last word read as down.
pub fn decode_predictions(words: &[U256], ticks: usize) -> Vec<bool> {
    (0..ticks)
        .map(|i| {
            words
                .get(i / TICKS_PER_WORD)
                .is_some_and(|w| w.bit(i % TICKS_PER_WORD))
        })
        .collect()
}

/// Render predictions as a `'1'`/`'0'` string, tick 0 first.
pub fn predictions_to_bitstring(predictions: &[bool]) -> String {
    predictions.iter().map(|up| if *up { '1' } else { '0' }).collect()
}

/// Parse a `'1'`/`'0'` string produced by [`predictions_to_bitstring`].
pub fn bitstring_to_predictions(bits: &str) -> Result<Vec<bool>, CodecError> {
    bits.chars()
        .enumerate()
        .map(|(position, c)| match c {
            '1' => Ok(true),
            '0' => Ok(false),
            found => Err(CodecError::InvalidBitString { position, found }),
        })
        .collect()
}
