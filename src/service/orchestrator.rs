//! 多链钱包编排器
//!
//! 持有 `{ chain -> 签名器 }` 与扁平资产列表，负责：
//! - 初始化（派生、构建签名器、注册已启用代币）
//! - 余额刷新（链间并行，链内有界并发）
//! - 代币增删（签名器 / 注册表 / 资产列表三处同步）
//! - 发送与预检（同链串行，账户切换同样持有该链的锁）

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex as StdMutex},
};

use futures::{future::join_all, stream, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroizing;

use crate::{
    config::{EngineSettings, NetworkConfig},
    domain::{
        units::format_units, Account, ChainId, DappTransactionRequest, FeeQuote, HistoryPage,
        HistoryQuery, MessageRequest, PreflightResult, TokenInfo, TransferIntent,
    },
    error::{Result, WalletError},
    infrastructure::{
        log_redact::{redact_address, scrub_secrets},
        registry::{NetworkRegistry, TokenRegistry},
    },
    service::{
        keyring::{KeyHandle, Keyring, KeyringSnapshot},
        wallet_builder::WalletBuilder,
    },
    signer::{ChainSigner, SignedPayload, TxRole},
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 签名器工厂
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 签名器工厂（测试时注入 mock 传输层）
pub trait SignerFactory: Send + Sync {
    fn create(
        &self,
        chain: ChainId,
        config: &NetworkConfig,
        key: KeyHandle,
        tokens: &[TokenInfo],
    ) -> Result<Arc<dyn ChainSigner>>;
}

/// 默认工厂：reqwest 传输层
pub struct HttpSignerFactory {
    settings: EngineSettings,
}

impl HttpSignerFactory {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl SignerFactory for HttpSignerFactory {
    fn create(
        &self,
        chain: ChainId,
        config: &NetworkConfig,
        key: KeyHandle,
        tokens: &[TokenInfo],
    ) -> Result<Arc<dyn ChainSigner>> {
        WalletBuilder::build(chain, config, key, tokens, &self.settings)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 结果类型
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 资产条目（原生币或代币，每个钱包地址一条）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    pub chain: ChainId,
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// 代币合约 / mint；原生币为 None
    pub token_address: Option<String>,
    pub logo_url: Option<String>,
    /// 最小单位
    pub balance: u128,
    pub balance_formatted: String,
}

impl AssetEntry {
    fn native(signer: &dyn ChainSigner, address: &str, logo_url: Option<String>) -> Self {
        let info = signer.wallet_info();
        Self {
            chain: info.chain,
            address: address.to_string(),
            symbol: info.symbol.clone(),
            name: info.symbol.clone(),
            decimals: info.decimals,
            token_address: None,
            logo_url,
            balance: 0,
            balance_formatted: format_units(0, info.decimals),
        }
    }

    fn token(chain: ChainId, address: &str, token: &TokenInfo) -> Self {
        Self {
            chain,
            address: address.to_string(),
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            decimals: token.decimals,
            token_address: Some(token.address.clone()),
            logo_url: token.logo_url.clone(),
            balance: 0,
            balance_formatted: format_units(0, token.decimals),
        }
    }

    fn is_token(&self, address: &str) -> bool {
        self.token_address
            .as_deref()
            .map(|a| a.eq_ignore_ascii_case(address))
            .unwrap_or(false)
    }
}

/// 初始化结果
pub struct InitOutcome {
    pub mnemonic: Zeroizing<String>,
    pub accounts: BTreeMap<ChainId, Account>,
    pub chains: Vec<ChainId>,
}

impl std::fmt::Debug for InitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitOutcome")
            .field("mnemonic", &"[REDACTED]")
            .field("accounts", &self.accounts)
            .field("chains", &self.chains)
            .finish()
    }
}

/// 链无关的发送结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub chain: ChainId,
    pub txid: String,
    pub platform_fee_txid: Option<String>,
    pub txids: Vec<String>,
    pub explorer_url: String,
}

/// 单链资产视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainPortfolio {
    pub chain: ChainId,
    pub address: String,
    pub native: Option<AssetEntry>,
    pub tokens: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Portfolio {
    pub chains: Vec<ChainPortfolio>,
}

impl Portfolio {
    pub fn asset_count(&self) -> usize {
        self.chains
            .iter()
            .map(|c| c.tokens.len() + usize::from(c.native.is_some()))
            .sum()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 编排器
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WalletOrchestrator {
    keyring: Keyring,
    networks: NetworkRegistry,
    token_registry: Arc<dyn TokenRegistry>,
    factory: Arc<dyn SignerFactory>,
    settings: EngineSettings,
    signers: RwLock<HashMap<ChainId, Arc<dyn ChainSigner>>>,
    assets: RwLock<Vec<AssetEntry>>,
    /// (链, 地址) -> 发送锁
    /// 每条链一把锁：发送流水线与账户切换互斥
    send_locks: StdMutex<HashMap<ChainId, Arc<Mutex<()>>>>,
}

impl WalletOrchestrator {
    pub fn new(
        keyring: Keyring,
        networks: NetworkRegistry,
        token_registry: Arc<dyn TokenRegistry>,
        factory: Arc<dyn SignerFactory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            keyring,
            networks,
            token_registry,
            factory,
            settings,
            signers: RwLock::new(HashMap::new()),
            assets: RwLock::new(Vec::new()),
            send_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// 使用 HTTP 传输层
    pub fn with_http(
        keyring: Keyring,
        networks: NetworkRegistry,
        token_registry: Arc<dyn TokenRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let factory = Arc::new(HttpSignerFactory::new(settings.clone()));
        Self::new(keyring, networks, token_registry, factory, settings)
    }

    /// 派生所有链、构建签名器、注册已启用代币并生成资产列表
    pub async fn init(&self, mnemonic: &str) -> Result<InitOutcome> {
        let snapshot = self.keyring.init(mnemonic).await?;
        self.wire(snapshot).await
    }

    /// 从助记词存储恢复；没有已保存的助记词时返回 None
    pub async fn restore(&self) -> Result<Option<InitOutcome>> {
        match self.keyring.restore().await? {
            Some(snapshot) => self.wire(snapshot).await.map(Some),
            None => Ok(None),
        }
    }

    async fn wire(&self, snapshot: KeyringSnapshot) -> Result<InitOutcome> {
        let mut signers = HashMap::new();
        let mut assets = Vec::new();
        let mut accounts = BTreeMap::new();

        for chain in self.networks.chains() {
            let config = self.networks.get_config(chain)?;
            let account = snapshot.account(chain)?;

            let tokens = match self.token_registry.enabled_tokens(chain).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    tracing::warn!(chain = %chain, error = %scrub_secrets(&format!("{e:#}")), "enabled tokens unavailable");
                    Vec::new()
                }
            };
            let signer = self
                .factory
                .create(chain, config, account.key.clone(), &tokens)?;

            let active = signer.active_account()?;
            assets.extend(Self::assets_for(signer.as_ref(), &active.address, config));
            accounts.insert(chain, active);
            signers.insert(chain, signer);
        }

        let chains: Vec<ChainId> = accounts.keys().copied().collect();
        tracing::info!(chains = chains.len(), assets = assets.len(), "wallet initialised");

        *self.signers.write().await = signers;
        *self.assets.write().await = assets;
        Ok(InitOutcome {
            mnemonic: snapshot.mnemonic,
            accounts,
            chains,
        })
    }

    fn assets_for(signer: &dyn ChainSigner, address: &str, config: &NetworkConfig) -> Vec<AssetEntry> {
        let chain = signer.wallet_info().chain;
        let mut assets = vec![AssetEntry::native(signer, address, config.logo_url.clone())];
        assets.extend(
            signer
                .list_tokens()
                .iter()
                .map(|token| AssetEntry::token(chain, address, token)),
        );
        assets
    }

    pub async fn signer(&self, chain: ChainId) -> Result<Arc<dyn ChainSigner>> {
        self.signers
            .read()
            .await
            .get(&chain)
            .cloned()
            .ok_or_else(|| WalletError::not_supported(format!("{chain} is not initialised")))
    }

    pub async fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.signers.read().await.keys().copied().collect();
        chains.sort();
        chains
    }

    pub async fn assets(&self) -> Vec<AssetEntry> {
        self.assets.read().await.clone()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 余额
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 刷新所有资产余额；单个资产失败时余额记为 0
    pub async fn fetch_balances(&self) -> Result<Vec<AssetEntry>> {
        let snapshot = self.assets().await;
        let signers = self.signers.read().await.clone();
        let concurrency = self.settings.balance_concurrency.max(1);

        let mut by_chain: BTreeMap<ChainId, Vec<(usize, AssetEntry)>> = BTreeMap::new();
        for (position, asset) in snapshot.into_iter().enumerate() {
            by_chain.entry(asset.chain).or_default().push((position, asset));
        }

        let per_chain = by_chain.into_iter().map(|(chain, assets)| {
            let signer = signers.get(&chain).cloned();
            async move {
                let Some(signer) = signer else {
                    return assets;
                };
                stream::iter(assets)
                    .map(|(position, asset)| {
                        let signer = signer.clone();
                        async move { (position, Self::refresh_asset(signer.as_ref(), asset).await) }
                    })
                    .buffer_unordered(concurrency)
                    .collect::<Vec<_>>()
                    .await
            }
        });

        let mut refreshed: Vec<(usize, AssetEntry)> =
            join_all(per_chain).await.into_iter().flatten().collect();
        refreshed.sort_by_key(|(position, _)| *position);
        let refreshed: Vec<AssetEntry> = refreshed.into_iter().map(|(_, asset)| asset).collect();

        // 刷新期间资产列表可能被修改，只回写仍存在的条目
        let mut assets = self.assets.write().await;
        for asset in assets.iter_mut() {
            if let Some(fresh) = refreshed.iter().find(|f| {
                f.chain == asset.chain && f.address == asset.address && f.token_address == asset.token_address
            }) {
                asset.balance = fresh.balance;
                asset.balance_formatted = fresh.balance_formatted.clone();
            }
        }
        Ok(assets.clone())
    }

    async fn refresh_asset(signer: &dyn ChainSigner, mut asset: AssetEntry) -> AssetEntry {
        let balance = match asset.token_address.as_deref() {
            Some(token) => signer.get_token_balance(token).await,
            None => signer.get_native_balance().await,
        };
        asset.balance = match balance {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(
                    chain = %asset.chain,
                    symbol = %asset.symbol,
                    address = %redact_address(&asset.address),
                    error = %scrub_secrets(&e.to_string()),
                    "balance fetch failed, reporting zero"
                );
                0
            }
        };
        asset.balance_formatted = format_units(asset.balance, asset.decimals);
        asset
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 代币
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 启用代币：签名器注册（失败只记日志）-> 注册表持久化 -> 资产列表
    pub async fn add_token(&self, chain: ChainId, token: TokenInfo) -> Result<AssetEntry> {
        let signer = self.signer(chain).await?;
        if let Err(e) = signer.register_token(token.clone()) {
            tracing::warn!(chain = %chain, token = %token.address, error = %e, "signer token registration failed");
        }
        self.token_registry
            .save_token(chain, &token)
            .await
            .map_err(|e| WalletError::internal(format!("failed to persist token: {e:#}")))?;

        let address = signer.active_account()?.address;
        let entry = AssetEntry::token(chain, &address, &token);
        let mut assets = self.assets.write().await;
        match assets
            .iter()
            .position(|a| a.chain == chain && a.address == address && a.is_token(&token.address))
        {
            Some(existing) => Ok(assets[existing].clone()),
            None => {
                assets.push(entry.clone());
                tracing::info!(chain = %chain, symbol = %token.symbol, "token enabled");
                Ok(entry)
            }
        }
    }

    /// 停用代币：签名器注销 -> 注册表删除 -> 资产列表
    pub async fn remove_token(&self, chain: ChainId, token_address: &str) -> Result<()> {
        let signer = self.signer(chain).await?;
        if signer.unregister_token(token_address).is_none() {
            tracing::debug!(chain = %chain, token = %token_address, "token was not registered on signer");
        }
        self.token_registry
            .remove_token(chain, token_address)
            .await
            .map_err(|e| WalletError::internal(format!("failed to remove token: {e:#}")))?;
        self.assets
            .write()
            .await
            .retain(|a| !(a.chain == chain && a.is_token(token_address)));
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 账户
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn list_accounts(&self, chain: ChainId) -> Result<Vec<Account>> {
        Ok(self.signer(chain).await?.list_accounts())
    }

    /// 切换账户并重建该链的资产条目（等待该链进行中的发送完成）
    pub async fn use_account(&self, chain: ChainId, index: u32) -> Result<Account> {
        let signer = self.signer(chain).await?;
        let lock = self.send_lock(chain);
        let _guard = lock.lock().await;
        let account = signer.use_account(index)?;
        let config = self.networks.get_config(chain)?;
        let fresh = Self::assets_for(signer.as_ref(), &account.address, config);

        let mut assets = self.assets.write().await;
        assets.retain(|a| a.chain != chain);
        assets.extend(fresh);
        Ok(account)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 发送
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn send_lock(&self, chain: ChainId) -> Arc<Mutex<()>> {
        let mut locks = self.send_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(chain)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 费用预检（只读，可并发）
    pub async fn preflight_send(&self, chain: ChainId, intent: &TransferIntent) -> Result<PreflightResult> {
        let quote: FeeQuote = self.signer(chain).await?.estimate(intent).await?;
        Ok(PreflightResult::from_quote(chain, quote))
    }

    /// build -> sign -> send，同链串行
    pub async fn send_transaction(&self, chain: ChainId, intent: &TransferIntent) -> Result<SendOutcome> {
        let signer = self.signer(chain).await?;
        let lock = self.send_lock(chain);
        let _guard = lock.lock().await;
        let address = signer.active_account()?.address;

        let unsigned = signer.build(intent).await?;
        let roles: Vec<TxRole> = unsigned.iter().map(|tx| tx.role()).collect();
        let signed: Vec<SignedPayload> = signer.sign(unsigned).await?;
        let txids = match signer.send(signed).await {
            Ok(txids) => txids,
            Err(e) => {
                tracing::error!(
                    chain = %chain,
                    address = %redact_address(&address),
                    error = %scrub_secrets(&e.to_string()),
                    "send failed"
                );
                return Err(e);
            }
        };

        let find = |role: TxRole| {
            roles
                .iter()
                .zip(txids.iter())
                .find(|(r, _)| **r == role)
                .map(|(_, txid)| txid.clone())
        };
        let txid = find(TxRole::Main)
            .or_else(|| txids.first().cloned())
            .ok_or_else(|| WalletError::internal("signer returned no transaction id"))?;
        let outcome = SendOutcome {
            chain,
            explorer_url: signer.wallet_info().tx_url(&txid),
            platform_fee_txid: find(TxRole::PlatformFee),
            txid,
            txids,
        };
        tracing::info!(chain = %chain, txid = %outcome.txid, txs = outcome.txids.len(), "transaction sent");
        Ok(outcome)
    }

    /// DApp 交易（仅 EVM）
    pub async fn send_dapp_transaction(
        &self,
        chain: ChainId,
        request: &DappTransactionRequest,
    ) -> Result<String> {
        let signer = self.signer(chain).await?;
        let evm = signer
            .as_evm()
            .ok_or_else(|| WalletError::not_supported(format!("{chain} does not accept dapp transactions")))?;
        let lock = self.send_lock(chain);
        let _guard = lock.lock().await;
        evm.send_dapp_transaction(request).await
    }

    pub async fn sign_message(&self, chain: ChainId, request: &MessageRequest) -> Result<SignedPayload> {
        self.signer(chain).await?.sign_message(request).await
    }

    pub async fn get_transaction_history(&self, chain: ChainId, query: &HistoryQuery) -> Result<HistoryPage> {
        self.signer(chain).await?.get_transaction_history(query).await
    }

    /// 按链聚合的资产视图
    pub async fn portfolio(&self) -> Portfolio {
        let assets = self.assets().await;
        let mut chains: BTreeMap<ChainId, ChainPortfolio> = BTreeMap::new();
        for asset in assets {
            let entry = chains.entry(asset.chain).or_insert_with(|| ChainPortfolio {
                chain: asset.chain,
                address: asset.address.clone(),
                native: None,
                tokens: Vec::new(),
            });
            if asset.token_address.is_some() {
                entry.tokens.push(asset);
            } else {
                entry.native = Some(asset);
            }
        }
        Portfolio {
            chains: chains.into_values().collect(),
        }
    }
}
