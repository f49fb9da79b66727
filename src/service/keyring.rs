//! 助记词与密钥环
//!
//! 一份 BIP-39 助记词派生出所有链的账户。种子只保存在清零内存中，
//! 子私钥按需派生（[`KeyHandle::with_secret`]），闭包结束即清零。

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{
    domain::{
        derivation::{DerivationContext, DerivationStrategyFactory, SecretMaterial},
        ChainId,
    },
    error::{Result, WalletError},
    infrastructure::vault::MnemonicStore,
};

/// 助记词在存储中的键
pub const MNEMONIC_STORE_KEY: &str = "ironcore.mnemonic";

/// BIP-39 种子（64 字节，清零保存）
pub struct SeedSecret {
    seed: Zeroizing<[u8; 64]>,
    ctx: DerivationContext,
    derivations: AtomicU64,
}

impl SeedSecret {
    fn new(seed: [u8; 64], ctx: DerivationContext) -> Self {
        Self {
            seed: Zeroizing::new(seed),
            ctx,
            derivations: AtomicU64::new(0),
        }
    }

    /// 子私钥派生次数（只增不减）
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}

/// 某条链上某个账户的密钥句柄
///
/// 只携带种子引用和路径，本身不包含子私钥。
#[derive(Clone)]
pub struct KeyHandle {
    seed: Arc<SeedSecret>,
    chain: ChainId,
    index: u32,
    address: String,
    public_key: Vec<u8>,
}

impl KeyHandle {
    fn derive(seed: Arc<SeedSecret>, chain: ChainId, index: u32) -> Result<Self> {
        let derived = DerivationStrategyFactory::derive(&seed.seed[..], chain, index, &seed.ctx)?;
        // 地址派生时产生的私钥随 derived 一起清零
        Ok(Self {
            chain,
            index,
            address: derived.address,
            public_key: derived.public_key,
            seed,
        })
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn path(&self) -> String {
        self.chain.derivation_path(self.index)
    }

    pub fn bitcoin_network(&self) -> bitcoin::Network {
        self.seed.ctx.bitcoin_network
    }

    /// 同一种子、同一条链上的另一个账户
    pub fn for_index(&self, index: u32) -> Result<Self> {
        Self::derive(self.seed.clone(), self.chain, index)
    }

    /// 在闭包内使用子私钥，闭包返回后私钥清零
    pub fn with_secret<R>(&self, f: impl FnOnce(&SecretMaterial) -> Result<R>) -> Result<R> {
        let derived =
            DerivationStrategyFactory::derive(&self.seed.seed[..], self.chain, self.index, &self.seed.ctx)?;
        self.seed.derivations.fetch_add(1, Ordering::Relaxed);
        if derived.address != self.address {
            return Err(WalletError::internal("derived key does not match handle address"));
        }
        f(&derived.secret)
    }

    /// 子私钥派生次数（同一种子的所有句柄共享）
    pub fn derivation_count(&self) -> u64 {
        self.seed.derivation_count()
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("chain", &self.chain)
            .field("index", &self.index)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// 单链派生结果
#[derive(Debug, Clone)]
pub struct DerivedChainAccount {
    pub address: String,
    pub key: KeyHandle,
    pub path: String,
    pub label: String,
}

/// `derive_all_chains` 的结果
pub struct KeyringSnapshot {
    pub mnemonic: Zeroizing<String>,
    pub per_chain: BTreeMap<ChainId, DerivedChainAccount>,
}

impl KeyringSnapshot {
    pub fn account(&self, chain: ChainId) -> Result<&DerivedChainAccount> {
        self.per_chain
            .get(&chain)
            .ok_or_else(|| WalletError::internal(format!("no key material for {chain}")))
    }
}

impl fmt::Debug for KeyringSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringSnapshot")
            .field("mnemonic", &"[REDACTED]")
            .field("per_chain", &self.per_chain)
            .finish()
    }
}

/// 密钥环服务
pub struct Keyring {
    store: Arc<dyn MnemonicStore>,
    ctx: DerivationContext,
}

impl Keyring {
    pub fn new(store: Arc<dyn MnemonicStore>, ctx: DerivationContext) -> Self {
        Self { store, ctx }
    }

    /// 生成新助记词（12/15/18/21/24 词）
    pub fn generate(word_count: usize) -> Result<Zeroizing<String>> {
        let entropy_bytes = match word_count {
            12 => 16,
            15 => 20,
            18 => 24,
            21 => 28,
            24 => 32,
            other => {
                return Err(WalletError::invalid_arg(format!(
                    "unsupported mnemonic length: {other}"
                )))
            }
        };
        let mut entropy = Zeroizing::new(vec![0u8; entropy_bytes]);
        rand::thread_rng().fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| WalletError::internal(format!("failed to generate mnemonic: {e}")))?;
        Ok(Zeroizing::new(mnemonic.to_string()))
    }

    /// 从助记词派生所有链的 0 号账户（纯计算，无副作用）
    pub fn derive_all_chains(
        &self,
        mnemonic: &str,
        passphrase: Option<&str>,
    ) -> Result<KeyringSnapshot> {
        let normalized = Zeroizing::new(
            mnemonic
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(" "),
        );
        let parsed = Mnemonic::parse_in(Language::English, normalized.as_str())
            .map_err(|e| WalletError::invalid_arg(format!("invalid mnemonic: {e}")))?;
        let seed = Arc::new(SeedSecret::new(
            parsed.to_seed(passphrase.unwrap_or("")),
            self.ctx,
        ));

        let mut per_chain = BTreeMap::new();
        for chain in ChainId::ALL {
            let key = KeyHandle::derive(seed.clone(), chain, 0)?;
            per_chain.insert(
                chain,
                DerivedChainAccount {
                    address: key.address().to_string(),
                    path: key.path(),
                    label: format!("{} #0", chain.native_symbol()),
                    key,
                },
            );
        }

        tracing::info!(chains = per_chain.len(), "keyring derived");
        Ok(KeyringSnapshot {
            mnemonic: normalized,
            per_chain,
        })
    }

    /// 派生并持久化助记词
    pub async fn init(&self, mnemonic: &str) -> Result<KeyringSnapshot> {
        let snapshot = self.derive_all_chains(mnemonic, None)?;
        self.store
            .set(MNEMONIC_STORE_KEY, snapshot.mnemonic.as_bytes())
            .await
            .map_err(|e| WalletError::internal(format!("failed to persist mnemonic: {e:#}")))?;
        Ok(snapshot)
    }

    /// 从存储恢复；没有已保存的助记词时返回 None
    pub async fn restore(&self) -> Result<Option<KeyringSnapshot>> {
        let document = self
            .store
            .get(MNEMONIC_STORE_KEY)
            .await
            .map_err(|e| WalletError::internal(format!("failed to load mnemonic: {e:#}")))?;
        let Some(document) = document else {
            return Ok(None);
        };
        let mnemonic = std::str::from_utf8(&document)
            .map_err(|_| WalletError::internal("stored mnemonic is not valid UTF-8"))?;
        self.derive_all_chains(mnemonic, None).map(Some)
    }
}
