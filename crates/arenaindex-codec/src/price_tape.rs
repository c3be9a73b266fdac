//! Price tape codec.
//!
//! The contract stores one 32-bit price per tick, eight ticks per `uint256`
//! word, lowest tick in the lowest bits:
//!
//! ```text
//! word[i / 8] bits [32 * (i % 8), 32 * (i % 8) + 32)  ←  price[i] & 0xFFFF_FFFF
//! ```
//!
//! Prices wider than 32 bits are masked, never clamped or rounded.

use alloy_primitives::U256;

/// Number of 32-bit samples held by one word.
pub const PRICES_PER_WORD: usize = 8;

/// Width of one sample in bits.
pub const PRICE_BITS: usize = 32;

/// Truncate a price to the 32 bits the contract keeps.
pub fn mask(price: u64) -> u32 {
    (price & 0xFFFF_FFFF) as u32
}

/// Truncate a `uint256` price to its low 32 bits.
pub fn mask_u256(price: U256) -> u32 {
    (price.as_limbs()[0] & 0xFFFF_FFFF) as u32
}

/// Number of words needed for `len` samples.
pub fn word_count(len: usize) -> usize {
    len.div_ceil(PRICES_PER_WORD)
}

/// Pack prices into tape words.
pub fn encode(prices: &[u64]) -> Vec<U256> {
    prices
        .chunks(PRICES_PER_WORD)
        .map(|chunk| {
            let mut limbs = [0u64; 4];
            for (j, price) in chunk.iter().enumerate() {
                limbs[j / 2] |= (mask(*price) as u64) << (PRICE_BITS * (j % 2));
            }
            U256::from_limbs(limbs)
        })
        .collect()
}

/// Unpack `count` prices from tape words. Ticks past the last word read as 0.
pub fn decode(words: &[U256], count: usize) -> Vec<u32> {
    (0..count)
        .map(|i| match words.get(i / PRICES_PER_WORD) {
            Some(word) => {
                let j = i % PRICES_PER_WORD;
                let limb = word.as_limbs()[j / 2];
                ((limb >> (PRICE_BITS * (j % 2))) & 0xFFFF_FFFF) as u32
            }
            None => 0,
        })
        .collect()
}
