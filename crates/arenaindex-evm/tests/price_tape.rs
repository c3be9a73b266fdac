mod common;

use alloy_core::dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};

use arenaindex_codec::price_tape;
use arenaindex_evm::abi;
use arenaindex_evm::price_feed::{feed_id, GET_PRICE_AT_BLOCK};
use arenaindex_evm::PriceTapeBuilder;

use common::{u, MockChain};

fn feed() -> Address {
    Address::repeat_byte(0xFE)
}

fn price_call(pair: &str, block: u64) -> Vec<u8> {
    abi::encode_call(
        GET_PRICE_AT_BLOCK,
        vec![
            DynSolValue::FixedBytes(feed_id(pair).unwrap(), 32),
            DynSolValue::Uint(u(block), 256),
        ],
    )
}

fn price_output(price: U256) -> Vec<u8> {
    DynSolValue::Tuple(vec![DynSolValue::Uint(price, 256)]).abi_encode_params()
}

#[tokio::test]
async fn samples_every_block_in_order() {
    let chain = MockChain::new(0);
    for block in 100..=139 {
        chain.on_call(feed(), price_call("ETH/USD", block), price_output(u(3_000_000 + block)));
    }

    let tape = PriceTapeBuilder::new(&chain, feed(), 4)
        .build("ETH/USD", 100, 139)
        .await
        .unwrap();

    let expected: Vec<u64> = (100..=139).map(|b| 3_000_000 + b).collect();
    assert_eq!(tape.samples, expected);
    assert!(tape.failed_blocks.is_empty());
    assert_eq!(tape.words.len(), 5);
    assert_eq!(tape.words, price_tape::encode(&expected));
    let decoded: Vec<u64> = price_tape::decode(&tape.words, 40).into_iter().map(u64::from).collect();
    assert_eq!(decoded, expected);
}

#[tokio::test]
async fn unreadable_blocks_are_recorded_as_zero() {
    let chain = MockChain::new(0);
    for block in 10..=17 {
        if block == 12 {
            chain.fail_call(feed(), price_call("BTC/USD", block));
        } else if block != 15 {
            chain.on_call(feed(), price_call("BTC/USD", block), price_output(u(60_000)));
        }
    }

    let tape = PriceTapeBuilder::new(&chain, feed(), 3)
        .build("BTC/USD", 10, 17)
        .await
        .unwrap();

    assert_eq!(tape.samples, vec![60_000, 60_000, 0, 60_000, 60_000, 0, 60_000, 60_000]);
    assert_eq!(tape.failed_blocks, vec![12, 15]);
}

#[tokio::test]
async fn prices_wider_than_a_slot_are_masked() {
    let chain = MockChain::new(0);
    let wide = (U256::from(1u64) << 200) | U256::from(0x1234_5678_9ABCu64);
    chain.on_call(feed(), price_call("ETH/USD", 5), price_output(wide));

    let tape = PriceTapeBuilder::new(&chain, feed(), 1)
        .build("ETH/USD", 5, 5)
        .await
        .unwrap();

    assert_eq!(tape.samples, vec![0x5678_9ABC]);
}

#[tokio::test]
async fn inverted_range_is_a_config_error() {
    let chain = MockChain::new(0);
    let err = PriceTapeBuilder::new(&chain, feed(), 1)
        .build("ETH/USD", 20, 10)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("before start block"), "{err}");
}
