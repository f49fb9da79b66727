//! Bitcoin 签名器集成测试
//!
//! 测试覆盖：能力门控、粉尘阈值、签名往返、平台服务费输出、历史分页

mod common;

use std::sync::Arc;

use bitcoin::{consensus::deserialize, Address, Amount, Transaction};
use common::{key, utxo, MockBitcoinProvider};
use ironcore_engine::{
    config::NetworkConfig,
    domain::{
        ChainId, Direction, FeeDetails, HistoryQuery, PlatformFee, PlatformFeeMode, TransferIntent,
        TxStatus,
    },
    infrastructure::bitcoin_provider::{
        BtcHistoryBatch, BtcPrevout, BtcTx, BtcTxStatus, BtcVin, BtcVout,
    },
    service::wallet_builder::{ChainTransports, WalletBuilder},
    signer::{bitcoin::dust_threshold, ChainSigner},
};
use std::str::FromStr;

const RECIPIENT: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
const FEE_RECEIVER: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

fn signer(provider: Arc<MockBitcoinProvider>) -> Arc<dyn ChainSigner> {
    WalletBuilder::build_with(
        ChainId::Bitcoin,
        &NetworkConfig::default_for(ChainId::Bitcoin),
        key(ChainId::Bitcoin),
        &[],
        ChainTransports::Bitcoin(provider),
    )
    .unwrap()
}

fn script_of(address: &str) -> bitcoin::ScriptBuf {
    Address::from_str(address)
        .unwrap()
        .assume_checked()
        .script_pubkey()
}

#[tokio::test]
async fn test_contract_call_not_supported_before_key_use() {
    let provider = MockBitcoinProvider::new(vec![utxo(1, 0, 100_000, true)], 5);
    let key = key(ChainId::Bitcoin);
    let signer = WalletBuilder::build_with(
        ChainId::Bitcoin,
        &NetworkConfig::default_for(ChainId::Bitcoin),
        key.clone(),
        &[],
        ChainTransports::Bitcoin(provider.clone()),
    )
    .unwrap();
    let before = key.derivation_count();

    let intent = TransferIntent::contract_call(RECIPIENT, "0", "0x");
    let err = signer.build(&intent).await.unwrap_err();
    assert_eq!(err.code(), "NOT_SUPPORTED");
    assert_eq!(key.derivation_count(), before);
    assert_eq!(*provider.unspent_calls.lock().unwrap(), 0);

    let err = signer
        .estimate(&TransferIntent::token("token", RECIPIENT, "1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_SUPPORTED");
}

#[tokio::test]
async fn test_dust_rejected_and_threshold_accepted() {
    let fee_rate = 10;
    let dust = dust_threshold(fee_rate);
    assert_eq!(dust, 930);
    let signer = signer(MockBitcoinProvider::new(vec![utxo(1, 0, 1_000_000, true)], fee_rate));

    let below = TransferIntent::native(RECIPIENT, "0.00000929");
    let err = signer.estimate(&below).await.unwrap_err();
    assert_eq!(err.code(), "AMOUNT_TOO_SMALL");

    let at = TransferIntent::native(RECIPIENT, "0.0000093");
    let quote = signer.estimate(&at).await.unwrap();
    assert!(quote.fee_raw > 0);
    assert_eq!(quote.fee_symbol, "BTC");
}

#[tokio::test]
async fn test_fee_rate_clamped_to_min_relay() {
    let signer = signer(MockBitcoinProvider::new(vec![utxo(1, 0, 1_000_000, true)], 0));
    let quote = signer
        .estimate(&TransferIntent::native(RECIPIENT, "0.001"))
        .await
        .unwrap();
    match quote.details {
        FeeDetails::Bitcoin(details) => {
            assert_eq!(details.fee_rate, 1);
            assert_eq!(details.dust_threshold, 93);
        }
        other => panic!("unexpected details {other:?}"),
    }
}

#[tokio::test]
async fn test_estimate_is_idempotent() {
    let signer = signer(MockBitcoinProvider::new(
        vec![utxo(1, 0, 40_000, true), utxo(2, 1, 80_000, true)],
        3,
    ));
    let intent = TransferIntent::native(RECIPIENT, "0.0005");
    let a = signer.estimate(&intent).await.unwrap();
    let b = signer.estimate(&intent).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_build_sign_send_round_trip() {
    let provider = MockBitcoinProvider::new(
        vec![utxo(1, 0, 30_000, true), utxo(2, 1, 120_000, true)],
        2,
    );
    let signer = signer(provider.clone());
    let intent = TransferIntent::native(RECIPIENT, "0.001");

    let unsigned = signer.build(&intent).await.unwrap();
    assert_eq!(unsigned.len(), 1);
    let signed = signer.sign(unsigned).await.unwrap();
    assert_eq!(signed.len(), 1);

    let tx: Transaction = deserialize(&hex::decode(signed[0].raw()).unwrap()).unwrap();
    assert_eq!(tx.output[0].value, Amount::from_sat(100_000));
    assert_eq!(tx.output[0].script_pubkey, script_of(RECIPIENT));
    // 最大的 UTXO 足够支付
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].witness.len(), 2);

    let own = signer.active_account().unwrap().address;
    let change = tx.output.iter().find(|o| o.script_pubkey == script_of(&own));
    let change_value = change.map(|o| o.value.to_sat()).unwrap_or(0);
    let fee = 120_000 - 100_000 - change_value;
    assert!(fee >= tx.vsize() as u64 * 2 - 10, "fee {fee} too low for vsize {}", tx.vsize());

    let txids = signer.send(signed).await.unwrap();
    assert_eq!(txids, vec![tx.txid().to_string()]);
    assert_eq!(provider.broadcasts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sign_rejects_inputs_of_another_account() {
    let provider = MockBitcoinProvider::new(vec![utxo(1, 0, 200_000, true)], 2);
    let signer = signer(provider.clone());
    let unsigned = signer
        .build(&TransferIntent::native(RECIPIENT, "0.001"))
        .await
        .unwrap();

    signer.use_account(1).unwrap();
    let err = signer.sign(unsigned.clone()).await.unwrap_err();
    assert_eq!(err.code(), "REJECTED");
    assert!(provider.broadcasts.lock().unwrap().is_empty());

    signer.use_account(0).unwrap();
    assert_eq!(signer.sign(unsigned).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_platform_fee_subtract_adds_output() {
    let signer = signer(MockBitcoinProvider::new(vec![utxo(1, 0, 500_000, true)], 1));
    let intent = TransferIntent::native(RECIPIENT, "0.001").with_platform_fee(PlatformFee {
        receiver: FEE_RECEIVER.into(),
        percent: Some("1".into()),
        fixed: None,
        mode: PlatformFeeMode::Subtract,
    });

    let quote = signer.estimate(&intent).await.unwrap();
    let breakdown = quote.details.platform_fee().unwrap().clone();
    assert_eq!(breakdown.platform_fee_raw, 1_000);
    assert_eq!(
        breakdown.actual_receive_raw + breakdown.platform_fee_raw,
        breakdown.total_amount_send_raw
    );

    let unsigned = signer.build(&intent).await.unwrap();
    assert_eq!(unsigned.len(), 1);
    let signed = signer.sign(unsigned).await.unwrap();
    let tx: Transaction = deserialize(&hex::decode(signed[0].raw()).unwrap()).unwrap();
    assert_eq!(tx.output[0].value, Amount::from_sat(99_000));
    assert_eq!(tx.output[1].value, Amount::from_sat(1_000));
    assert_eq!(tx.output[1].script_pubkey, script_of(FEE_RECEIVER));
}

#[tokio::test]
async fn test_platform_fee_below_dust_is_waived() {
    let signer = signer(MockBitcoinProvider::new(vec![utxo(1, 0, 500_000, true)], 1));
    let intent = TransferIntent::native(RECIPIENT, "0.001").with_platform_fee(PlatformFee {
        receiver: FEE_RECEIVER.into(),
        percent: Some("0.01".into()),
        fixed: None,
        mode: PlatformFeeMode::Subtract,
    });

    let quote = signer.estimate(&intent).await.unwrap();
    match &quote.details {
        FeeDetails::Bitcoin(details) => assert!(details.platform_fee_waived),
        other => panic!("unexpected details {other:?}"),
    }
    let breakdown = quote.details.platform_fee().unwrap();
    assert_eq!(breakdown.platform_fee_raw, 0);
    assert_eq!(breakdown.actual_receive_raw, 100_000);
}

#[tokio::test]
async fn test_insufficient_funds() {
    let signer = signer(MockBitcoinProvider::new(vec![utxo(1, 0, 10_000, true)], 1));
    let err = signer
        .build(&TransferIntent::native(RECIPIENT, "0.001"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
}

#[tokio::test]
async fn test_invalid_recipient() {
    let signer = signer(MockBitcoinProvider::new(vec![utxo(1, 0, 10_000, true)], 1));
    let err = signer
        .estimate(&TransferIntent::native("0x9858EfFD232B4033E47d90003D41EC34EcaEda94", "0.0001"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ADDRESS");
}

#[tokio::test]
async fn test_native_balance_sums_utxos() {
    let signer = signer(MockBitcoinProvider::new(
        vec![utxo(1, 0, 10_000, true), utxo(2, 0, 2_500, false)],
        1,
    ));
    assert_eq!(signer.get_native_balance().await.unwrap(), 12_500);
    assert_eq!(
        signer.get_token_balance("anything").await.unwrap_err().code(),
        "NOT_SUPPORTED"
    );
}

fn history_tx(txid: &str, own: &str, incoming: bool, time: Option<i64>) -> BtcTx {
    let other = RECIPIENT.to_string();
    let (input_owner, output_owner) = if incoming {
        (other.clone(), own.to_string())
    } else {
        (own.to_string(), other.clone())
    };
    BtcTx {
        txid: txid.to_string(),
        vin: vec![BtcVin {
            prevout: Some(BtcPrevout {
                scriptpubkey_address: Some(input_owner),
                value: 60_000,
            }),
        }],
        vout: vec![BtcVout {
            scriptpubkey_address: Some(output_owner),
            value: 50_000,
        }],
        fee: Some(10_000),
        status: BtcTxStatus {
            confirmed: time.is_some(),
            block_height: time.map(|_| 800_000),
            block_time: time,
        },
    }
}

fn hash(c: char) -> String {
    c.to_string().repeat(64)
}

/// 逐页拉取直到游标耗尽
async fn collect_history(signer: &Arc<dyn ChainSigner>, limit: usize) -> Vec<String> {
    let mut seen = Vec::new();
    let mut query = HistoryQuery::native(limit);
    for _ in 0..10 {
        let page = signer.get_transaction_history(&query).await.unwrap();
        seen.extend(page.items.into_iter().map(|i| i.hash));
        match page.cursor {
            Some(cursor) => query = HistoryQuery::native(limit).after(cursor),
            None => return seen,
        }
    }
    panic!("history did not terminate");
}

#[tokio::test]
async fn test_history_merges_mempool_and_confirmed() {
    let own = key(ChainId::Bitcoin).address().to_string();
    let provider = MockBitcoinProvider::new(vec![], 1)
        .with_history(
            None,
            BtcHistoryBatch {
                mempool: vec![history_tx(&hash('a'), &own, true, None)],
                confirmed: vec![
                    history_tx(&hash('b'), &own, false, Some(1_700_000_100)),
                    history_tx(&hash('c'), &own, true, Some(1_700_000_000)),
                ],
            },
        )
        .with_history(
            Some(&hash('b')),
            BtcHistoryBatch {
                mempool: vec![],
                confirmed: vec![history_tx(&hash('c'), &own, true, Some(1_700_000_000))],
            },
        );
    let signer = signer(provider);

    let page = signer
        .get_transaction_history(&HistoryQuery::native(1))
        .await
        .unwrap();
    let hashes: Vec<_> = page.items.iter().map(|i| i.hash.clone()).collect();
    assert_eq!(hashes, vec![hash('a'), hash('b')]);
    assert_eq!(page.items[0].status, Some(TxStatus::Pending));
    let outgoing = &page.items[1];
    assert_eq!(outgoing.direction, Direction::Out);
    assert_eq!(outgoing.status, Some(TxStatus::Confirmed));
    assert!(outgoing.explorer_url.ends_with(&hash('b')));
    assert_eq!(page.cursor, Some(hash('b')));

    let next = signer
        .get_transaction_history(&HistoryQuery::native(1).after(hash('b')))
        .await
        .unwrap();
    assert_eq!(next.items.len(), 1);
    assert_eq!(next.items[0].hash, hash('c'));
    assert_eq!(next.items[0].direction, Direction::In);
    assert_eq!(next.cursor, None);

    let err = signer
        .get_transaction_history(&HistoryQuery::token("x", 10))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_SUPPORTED");
}

#[tokio::test]
async fn test_history_mempool_filling_page_loses_nothing() {
    let own = key(ChainId::Bitcoin).address().to_string();
    let confirmed = |c: char, t: i64| history_tx(&hash(c), &own, true, Some(t));
    let provider = MockBitcoinProvider::new(vec![], 1)
        .with_history(
            None,
            BtcHistoryBatch {
                mempool: vec![
                    history_tx(&hash('a'), &own, true, None),
                    history_tx(&hash('d'), &own, false, None),
                    history_tx(&hash('e'), &own, true, None),
                ],
                confirmed: vec![confirmed('b', 1_700_000_100), confirmed('c', 1_700_000_000)],
            },
        )
        .with_history(
            Some(&hash('b')),
            BtcHistoryBatch {
                mempool: vec![],
                confirmed: vec![confirmed('c', 1_700_000_000)],
            },
        );
    let signer = signer(provider);

    let first = signer
        .get_transaction_history(&HistoryQuery::native(1))
        .await
        .unwrap();
    // 内存池交易数超过 limit 时仍然全部返回，并保留已确认游标
    assert_eq!(first.items.len(), 4);
    assert_eq!(first.cursor, Some(hash('b')));

    let mut all = collect_history(&signer, 1).await;
    all.sort();
    assert_eq!(all, vec![hash('a'), hash('b'), hash('c'), hash('d'), hash('e')]);
}
