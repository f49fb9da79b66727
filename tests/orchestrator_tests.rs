//! 编排器集成测试
//!
//! 测试覆盖：初始化接线、余额刷新（失败记 0）、代币增删、账户切换、发送结果、恢复

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use common::{utxo, MockBitcoinProvider, MockRpc, MNEMONIC};
use ethers::{
    types::{transaction::eip2718::TypedTransaction, Address},
    utils::rlp::Rlp,
};
use ironcore_engine::{
    config::{EngineSettings, NetworkConfig},
    domain::{
        derivation::DerivationContext, ChainId, ChainKind, DappTransactionRequest, PlatformFee,
        PlatformFeeMode, TokenInfo, TransferIntent,
    },
    error::{Result, WalletError},
    infrastructure::{
        registry::{InMemoryTokenRegistry, NetworkRegistry, TokenRegistry},
        vault::MemoryMnemonicStore,
    },
    service::{
        keyring::{KeyHandle, Keyring},
        orchestrator::{SignerFactory, WalletOrchestrator},
        wallet_builder::{ChainTransports, WalletBuilder},
    },
    signer::ChainSigner,
};
use serde_json::json;

const ETH_ADDRESS: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";
const USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";
const FEE_RECEIVER: &str = "0x2222222222222222222222222222222222222222";
const HASH_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// 按链族分发到脚本化传输层
struct MockFactory {
    evm: Arc<MockRpc>,
    btc: Arc<MockBitcoinProvider>,
    created: Mutex<Vec<ChainId>>,
}

impl MockFactory {
    fn new(evm: Arc<MockRpc>, btc: Arc<MockBitcoinProvider>) -> Arc<Self> {
        Arc::new(Self {
            evm,
            btc,
            created: Mutex::new(Vec::new()),
        })
    }
}

impl SignerFactory for MockFactory {
    fn create(
        &self,
        chain: ChainId,
        config: &NetworkConfig,
        key: KeyHandle,
        tokens: &[TokenInfo],
    ) -> Result<Arc<dyn ChainSigner>> {
        self.created.lock().unwrap().push(chain);
        let transports = match chain.kind() {
            ChainKind::Evm => ChainTransports::Evm {
                rpc: self.evm.clone(),
                explorer: None,
            },
            ChainKind::Btc => ChainTransports::Bitcoin(self.btc.clone()),
            _ => return Err(WalletError::not_supported(format!("{chain} has no mock transport"))),
        };
        WalletBuilder::build_with(chain, config, key, tokens, transports)
    }
}

/// 总是失败的代币注册表
struct BrokenRegistry;

#[async_trait]
impl TokenRegistry for BrokenRegistry {
    async fn enabled_tokens(&self, _chain: ChainId) -> anyhow::Result<Vec<TokenInfo>> {
        Err(anyhow!("database unavailable"))
    }

    async fn save_token(&self, _chain: ChainId, _token: &TokenInfo) -> anyhow::Result<()> {
        Err(anyhow!("database unavailable"))
    }

    async fn remove_token(&self, _chain: ChainId, _address: &str) -> anyhow::Result<()> {
        Err(anyhow!("database unavailable"))
    }
}

fn networks() -> NetworkRegistry {
    NetworkRegistry::new(vec![
        NetworkConfig::default_for(ChainId::Ethereum),
        NetworkConfig::default_for(ChainId::Bitcoin),
    ])
}

fn evm_rpc() -> Arc<MockRpc> {
    let rpc = MockRpc::new();
    rpc.on("eth_getBlockByNumber", json!({}))
        .on("eth_gasPrice", json!("0x37e11d600"))
        .on("eth_estimateGas", json!("0x5208"))
        .on("eth_getBalance", json!("0xde0b6b3a7640000"))
        .on("eth_getTransactionCount", json!("0x0"))
        .fail("eth_call", "execution reverted");
    rpc
}

fn btc_provider() -> Arc<MockBitcoinProvider> {
    MockBitcoinProvider::new(
        vec![utxo(1, 0, 50_000, true), utxo(2, 1, 25_000, true)],
        2,
    )
}

struct Harness {
    orchestrator: WalletOrchestrator,
    rpc: Arc<MockRpc>,
    btc: Arc<MockBitcoinProvider>,
    registry: Arc<InMemoryTokenRegistry>,
}

fn harness() -> Harness {
    let rpc = evm_rpc();
    let btc = btc_provider();
    let registry = Arc::new(InMemoryTokenRegistry::with_tokens(vec![(
        ChainId::Ethereum,
        TokenInfo::new(USDT, "USDT", 6),
    )]));
    let orchestrator = WalletOrchestrator::new(
        Keyring::new(Arc::new(MemoryMnemonicStore::new()), DerivationContext::default()),
        networks(),
        registry.clone(),
        MockFactory::new(rpc.clone(), btc.clone()),
        EngineSettings::default(),
    );
    Harness {
        orchestrator,
        rpc,
        btc,
        registry,
    }
}

#[tokio::test]
async fn test_init_wires_configured_chains() {
    let h = harness();
    let outcome = h.orchestrator.init(MNEMONIC).await.unwrap();

    assert_eq!(outcome.chains.len(), 2);
    assert_eq!(outcome.accounts[&ChainId::Ethereum].address, ETH_ADDRESS);
    assert!(!format!("{outcome:?}").contains("abandon"));
    assert_eq!(outcome.mnemonic.as_str(), MNEMONIC);

    let assets = h.orchestrator.assets().await;
    assert_eq!(assets.len(), 3);
    let usdt = assets
        .iter()
        .find(|a| a.token_address.as_deref() == Some(USDT))
        .expect("registered token becomes an asset");
    assert_eq!(usdt.address, ETH_ADDRESS);
    assert_eq!(usdt.balance_formatted, "0");

    let chains = h.orchestrator.chains().await;
    assert!(chains.contains(&ChainId::Bitcoin) && chains.contains(&ChainId::Ethereum));
    let err = h.orchestrator.signer(ChainId::Solana).await.err().unwrap();
    assert_eq!(err.code(), "NOT_SUPPORTED");
}

#[tokio::test]
async fn test_init_rejects_invalid_mnemonic() {
    let h = harness();
    let err = h
        .orchestrator
        .init("abandon abandon abandon")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_ARG");
    assert!(h.orchestrator.chains().await.is_empty());
}

#[tokio::test]
async fn test_token_registry_failure_yields_no_tokens() {
    let orchestrator = WalletOrchestrator::new(
        Keyring::new(Arc::new(MemoryMnemonicStore::new()), DerivationContext::default()),
        networks(),
        Arc::new(BrokenRegistry),
        MockFactory::new(evm_rpc(), btc_provider()),
        EngineSettings::default(),
    );
    orchestrator.init(MNEMONIC).await.unwrap();
    let assets = orchestrator.assets().await;
    assert_eq!(assets.len(), 2);
    assert!(assets.iter().all(|a| a.token_address.is_none()));

    let err = orchestrator
        .add_token(ChainId::Ethereum, TokenInfo::new(DAI, "DAI", 18))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL");
}

#[tokio::test]
async fn test_fetch_balances_reports_zero_on_failure() {
    let h = harness();
    h.orchestrator.init(MNEMONIC).await.unwrap();

    let assets = h.orchestrator.fetch_balances().await.unwrap();
    let eth = assets
        .iter()
        .find(|a| a.chain == ChainId::Ethereum && a.token_address.is_none())
        .unwrap();
    assert_eq!(eth.balance, 1_000_000_000_000_000_000);
    assert_eq!(eth.balance_formatted, "1");

    let usdt = assets
        .iter()
        .find(|a| a.token_address.as_deref() == Some(USDT))
        .unwrap();
    assert_eq!(usdt.balance, 0);

    let btc = assets.iter().find(|a| a.chain == ChainId::Bitcoin).unwrap();
    assert_eq!(btc.balance, 75_000);
    assert_eq!(btc.balance_formatted, "0.00075");

    // 结果顺序与资产列表一致
    let order: Vec<_> = h.orchestrator.assets().await.into_iter().map(|a| a.symbol).collect();
    let refreshed: Vec<_> = assets.into_iter().map(|a| a.symbol).collect();
    assert_eq!(order, refreshed);
}

#[tokio::test]
async fn test_add_and_remove_token() {
    let h = harness();
    h.orchestrator.init(MNEMONIC).await.unwrap();

    let dai = TokenInfo::new(DAI, "DAI", 18);
    let entry = h.orchestrator.add_token(ChainId::Ethereum, dai.clone()).await.unwrap();
    assert_eq!(entry.symbol, "DAI");
    assert_eq!(entry.address, ETH_ADDRESS);
    // 重复添加不产生重复条目
    h.orchestrator.add_token(ChainId::Ethereum, dai.clone()).await.unwrap();
    assert_eq!(h.orchestrator.assets().await.len(), 4);
    assert_eq!(h.registry.enabled_tokens(ChainId::Ethereum).await.unwrap().len(), 2);
    let signer = h.orchestrator.signer(ChainId::Ethereum).await.unwrap();
    assert!(signer.list_tokens().iter().any(|t| t.symbol == "DAI"));

    h.orchestrator
        .remove_token(ChainId::Ethereum, &DAI.to_lowercase())
        .await
        .unwrap();
    assert_eq!(h.orchestrator.assets().await.len(), 3);
    assert_eq!(h.registry.enabled_tokens(ChainId::Ethereum).await.unwrap().len(), 1);
    assert!(!signer.list_tokens().iter().any(|t| t.symbol == "DAI"));
}

#[tokio::test]
async fn test_use_account_rebuilds_chain_assets() {
    let h = harness();
    h.orchestrator.init(MNEMONIC).await.unwrap();
    let btc_before: Vec<_> = h
        .orchestrator
        .assets()
        .await
        .into_iter()
        .filter(|a| a.chain == ChainId::Bitcoin)
        .collect();

    let account = h.orchestrator.use_account(ChainId::Ethereum, 1).await.unwrap();
    assert_ne!(account.address, ETH_ADDRESS);
    assert_eq!(account.index, 1);

    let assets = h.orchestrator.assets().await;
    let eth: Vec<_> = assets.iter().filter(|a| a.chain == ChainId::Ethereum).collect();
    assert_eq!(eth.len(), 2);
    assert!(eth.iter().all(|a| a.address == account.address));
    let btc_after: Vec<_> = assets
        .into_iter()
        .filter(|a| a.chain == ChainId::Bitcoin)
        .collect();
    assert_eq!(btc_before, btc_after);

    let accounts = h.orchestrator.list_accounts(ChainId::Ethereum).await.unwrap();
    assert!(accounts.iter().any(|a| a.index == 1));
}

#[tokio::test]
async fn test_send_reports_platform_fee_txid() {
    let h = harness();
    h.rpc
        .on("eth_sendRawTransaction", json!(HASH_A))
        .on("eth_sendRawTransaction", json!(HASH_B));
    h.orchestrator.init(MNEMONIC).await.unwrap();

    let intent = TransferIntent::native(RECIPIENT, "0.5").with_platform_fee(PlatformFee {
        receiver: FEE_RECEIVER.into(),
        percent: Some("1".into()),
        fixed: None,
        mode: PlatformFeeMode::Additive,
    });
    let preflight = h
        .orchestrator
        .preflight_send(ChainId::Ethereum, &intent)
        .await
        .unwrap();
    assert_eq!(preflight.chain, ChainId::Ethereum);
    assert_eq!(preflight.fee_raw, 2 * 21_000 * 15_000_000_000);

    let outcome = h
        .orchestrator
        .send_transaction(ChainId::Ethereum, &intent)
        .await
        .unwrap();
    assert_eq!(outcome.txid, HASH_A);
    assert_eq!(outcome.platform_fee_txid.as_deref(), Some(HASH_B));
    assert_eq!(outcome.txids.len(), 2);
    assert!(outcome.explorer_url.ends_with(HASH_A));
}

#[tokio::test]
async fn test_bitcoin_send_single_tx() {
    let h = harness();
    h.orchestrator.init(MNEMONIC).await.unwrap();

    let outcome = h
        .orchestrator
        .send_transaction(
            ChainId::Bitcoin,
            &TransferIntent::native("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", "0.0002"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.txids.len(), 1);
    assert_eq!(outcome.platform_fee_txid, None);
    assert_eq!(h.btc.broadcasts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_sends_on_one_chain_both_complete() {
    let h = harness();
    h.rpc.on("eth_sendRawTransaction", json!(HASH_A));
    h.orchestrator.init(MNEMONIC).await.unwrap();

    let intent = TransferIntent::native(RECIPIENT, "0.01");
    let (a, b) = tokio::join!(
        h.orchestrator.send_transaction(ChainId::Ethereum, &intent),
        h.orchestrator.send_transaction(ChainId::Ethereum, &intent)
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.rpc.calls("eth_sendRawTransaction").len(), 2);
}

#[tokio::test]
async fn test_account_switch_waits_for_inflight_send() {
    let h = harness();
    h.rpc.on("eth_sendRawTransaction", json!(HASH_A));
    h.orchestrator.init(MNEMONIC).await.unwrap();
    h.rpc.set_delay(Duration::from_millis(20));

    let intent = TransferIntent::native(RECIPIENT, "0.01");
    let (sent, switched) = tokio::join!(
        h.orchestrator.send_transaction(ChainId::Ethereum, &intent),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.orchestrator.use_account(ChainId::Ethereum, 1).await
        }
    );
    assert_eq!(sent.unwrap().txid, HASH_A);
    let switched = switched.unwrap();
    assert_eq!(switched.index, 1);

    // 进行中的发送全程使用切换前的账户
    let params = h.rpc.calls("eth_sendRawTransaction");
    let raw = params[0][0].as_str().unwrap();
    let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
    let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(&bytes)).unwrap();
    let sender = signature.recover(tx.sighash()).unwrap();
    assert_eq!(sender, ETH_ADDRESS.parse::<Address>().unwrap());
    let nonce_queries = h.rpc.calls("eth_getTransactionCount");
    assert!(!nonce_queries.is_empty());
    assert!(nonce_queries
        .iter()
        .all(|q| q[0].as_str().unwrap().eq_ignore_ascii_case(ETH_ADDRESS)));

    let assets = h.orchestrator.assets().await;
    assert!(assets
        .iter()
        .filter(|a| a.chain == ChainId::Ethereum)
        .all(|a| a.address == switched.address));
}

#[tokio::test]
async fn test_dapp_transaction_only_on_evm() {
    let h = harness();
    h.orchestrator.init(MNEMONIC).await.unwrap();
    let err = h
        .orchestrator
        .send_dapp_transaction(
            ChainId::Bitcoin,
            &DappTransactionRequest {
                from: "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_SUPPORTED");
}

#[tokio::test]
async fn test_portfolio_groups_by_chain() {
    let h = harness();
    h.orchestrator.init(MNEMONIC).await.unwrap();
    let portfolio = h.orchestrator.portfolio().await;
    assert_eq!(portfolio.chains.len(), 2);
    assert_eq!(portfolio.asset_count(), 3);
    let eth = portfolio
        .chains
        .iter()
        .find(|c| c.chain == ChainId::Ethereum)
        .unwrap();
    assert_eq!(eth.native.as_ref().unwrap().symbol, "ETH");
    assert_eq!(eth.tokens.len(), 1);
}

#[tokio::test]
async fn test_restore_after_init() {
    let store = Arc::new(MemoryMnemonicStore::new());
    let build = |store: Arc<MemoryMnemonicStore>| {
        WalletOrchestrator::new(
            Keyring::new(store, DerivationContext::default()),
            networks(),
            Arc::new(InMemoryTokenRegistry::new()),
            MockFactory::new(evm_rpc(), btc_provider()),
            EngineSettings::default(),
        )
    };

    let fresh = build(Arc::new(MemoryMnemonicStore::new()));
    assert!(fresh.restore().await.unwrap().is_none());

    build(store.clone()).init(MNEMONIC).await.unwrap();
    let restored = build(store).restore().await.unwrap().expect("mnemonic persisted");
    assert_eq!(restored.accounts[&ChainId::Ethereum].address, ETH_ADDRESS);
}
