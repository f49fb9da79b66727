//! 链签名器
//!
//! 所有链通过同一个 [`ChainSigner`] 契约对外：估算 -> 构建 -> 签名 -> 广播。
//! `build` 总是返回 `Vec<UnsignedTx>`（一笔，或主交易 + 平台服务费交易两笔），
//! `sign` / `send` 保持相同的数量与顺序。

pub mod bitcoin;
pub mod evm;
pub mod solana;
pub mod tron;

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    domain::{
        Account, Capabilities, ChainId, FeeQuote, HistoryPage, HistoryQuery, MessageRequest,
        TokenBook, TokenInfo, TransferIntent, WalletInfo,
    },
    error::{Result, WalletError},
    service::keyring::KeyHandle,
};

pub use self::{
    bitcoin::{BitcoinSigner, BitcoinUnsigned},
    evm::{EvmSigner, EvmUnsigned},
    solana::{SolanaSigner, SolanaUnsigned},
    tron::{TronSigner, TronUnsigned},
};

/// 交易在一组交易中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxRole {
    Main,
    PlatformFee,
}

/// 未签名交易（按链区分）
#[derive(Debug, Clone)]
pub enum UnsignedTx {
    Bitcoin(BitcoinUnsigned),
    Evm(EvmUnsigned),
    Solana(SolanaUnsigned),
    Tron(TronUnsigned),
}

impl UnsignedTx {
    pub fn chain_label(&self) -> &'static str {
        match self {
            UnsignedTx::Bitcoin(_) => "bitcoin",
            UnsignedTx::Evm(_) => "evm",
            UnsignedTx::Solana(_) => "solana",
            UnsignedTx::Tron(_) => "tron",
        }
    }

    pub fn role(&self) -> TxRole {
        match self {
            UnsignedTx::Bitcoin(_) | UnsignedTx::Solana(_) => TxRole::Main,
            UnsignedTx::Evm(tx) => tx.role,
            UnsignedTx::Tron(tx) => tx.role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Tx,
    Message,
}

/// 已签名载荷（只能由签名器创建）
///
/// 携带签名器指纹（链 + 签名地址），`send` 拒绝其他签名器产生的载荷。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    kind: PayloadKind,
    raw: String,
    signature: Option<String>,
    chain: ChainId,
    signer: String,
}

impl SignedPayload {
    pub(crate) fn new(
        kind: PayloadKind,
        raw: String,
        signature: Option<String>,
        chain: ChainId,
        signer: &str,
    ) -> Self {
        Self {
            kind,
            raw,
            signature,
            chain,
            signer: signer.to_string(),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// 序列化后的交易（hex / base64 / JSON）或被签名的消息
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    /// 广播前检查：必须是本签名器当前账户签出的交易
    pub(crate) fn ensure_broadcastable(&self, chain: ChainId, signer: &str) -> Result<()> {
        if self.kind != PayloadKind::Tx {
            return Err(WalletError::invalid_arg("message signatures cannot be broadcast"));
        }
        if self.chain != chain || !self.signer.eq_ignore_ascii_case(signer) {
            return Err(WalletError::rejected(
                "payload was not signed by this signer",
            ));
        }
        Ok(())
    }
}

/// 签名器的账户簿
///
/// 0 号账户默认激活；切换到未派生过的索引时按需派生。
pub struct AccountBook {
    keys: RwLock<Vec<KeyHandle>>,
    active: RwLock<u32>,
}

impl AccountBook {
    pub fn new(key: KeyHandle) -> Self {
        let index = key.index();
        Self {
            keys: RwLock::new(vec![key]),
            active: RwLock::new(index),
        }
    }

    /// 当前账户的密钥句柄（克隆开销很小）
    pub fn active_key(&self) -> Result<KeyHandle> {
        let index = *self.active.read().unwrap_or_else(|e| e.into_inner());
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.iter()
            .find(|k| k.index() == index)
            .cloned()
            .ok_or_else(|| WalletError::internal(format!("account {index} not derived")))
    }

    pub fn active_account(&self) -> Result<Account> {
        Ok(Self::to_account(&self.active_key()?))
    }

    pub fn list(&self) -> Vec<Account> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let mut accounts: Vec<Account> = keys.iter().map(Self::to_account).collect();
        accounts.sort_by_key(|a| a.index);
        accounts
    }

    pub fn use_account(&self, index: u32) -> Result<Account> {
        let existing = {
            let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
            keys.iter().find(|k| k.index() == index).cloned()
        };
        let key = match existing {
            Some(key) => key,
            None => {
                let base = self.active_key()?;
                let key = base.for_index(index)?;
                self.keys
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(key.clone());
                key
            }
        };
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = index;
        Ok(Self::to_account(&key))
    }

    fn to_account(key: &KeyHandle) -> Account {
        Account {
            index: key.index(),
            address: key.address().to_string(),
            chain: key.chain(),
        }
    }
}

/// 链签名器契约
#[async_trait]
pub trait ChainSigner: Send + Sync {
    fn wallet_info(&self) -> &WalletInfo;

    fn capabilities(&self) -> &Capabilities;

    fn account_book(&self) -> &AccountBook;

    fn token_book(&self) -> &TokenBook;

    /// 费用估算（幂等，无副作用）
    async fn estimate(&self, intent: &TransferIntent) -> Result<FeeQuote>;

    /// 构建未签名交易（1 笔或 [主交易, 服务费交易]）
    async fn build(&self, intent: &TransferIntent) -> Result<Vec<UnsignedTx>>;

    /// 签名，数量与顺序不变
    async fn sign(&self, unsigned: Vec<UnsignedTx>) -> Result<Vec<SignedPayload>>;

    /// 广播，返回 txid，顺序不变
    async fn send(&self, signed: Vec<SignedPayload>) -> Result<Vec<String>>;

    async fn sign_message(&self, request: &MessageRequest) -> Result<SignedPayload> {
        Err(WalletError::not_supported(format!(
            "message signing ({:?}) is not supported on {}",
            request.scheme,
            self.wallet_info().chain
        )))
    }

    /// 原生币余额（最小单位）
    async fn get_native_balance(&self) -> Result<u128>;

    /// 代币余额（最小单位）
    async fn get_token_balance(&self, token_address: &str) -> Result<u128>;

    async fn get_transaction_history(&self, query: &HistoryQuery) -> Result<HistoryPage>;

    /// EVM 签名器的具体类型（DApp 通道）
    fn as_evm(&self) -> Option<&EvmSigner> {
        None
    }

    fn register_token(&self, token: TokenInfo) -> Result<()> {
        if token.address.trim().is_empty() {
            return Err(WalletError::invalid_arg("token address is empty"));
        }
        self.token_book().register(token);
        Ok(())
    }

    fn unregister_token(&self, token_address: &str) -> Option<TokenInfo> {
        self.token_book().unregister(token_address)
    }

    fn list_tokens(&self) -> Vec<TokenInfo> {
        self.token_book().list()
    }

    fn list_accounts(&self) -> Vec<Account> {
        self.account_book().list()
    }

    fn use_account(&self, index: u32) -> Result<Account> {
        self.account_book().use_account(index)
    }

    fn active_account(&self) -> Result<Account> {
        self.account_book().active_account()
    }
}

/// 取出 JSON 中的字符串字段，缺失时为 NETWORK 错误（节点响应格式异常）
pub(crate) fn json_str<'a>(value: &'a Value, pointer: &str) -> Result<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| WalletError::network(format!("unexpected node response: missing {pointer}")))
}

/// 构建 WalletInfo
pub(crate) fn wallet_info_from(config: &crate::config::NetworkConfig) -> WalletInfo {
    WalletInfo {
        chain: config.chain,
        kind: config.chain.kind(),
        symbol: config.symbol(),
        decimals: config.decimals(),
        explorer_tx_base: config.explorer_tx_base.clone(),
        explorer_address_base: config.explorer_address_base.clone(),
    }
}

/// 从未签名交易列表中取出指定链的变体
macro_rules! expect_variant {
    ($tx:expr, $variant:ident, $chain:expr) => {
        match $tx {
            $crate::signer::UnsignedTx::$variant(inner) => Ok(inner),
            other => Err($crate::error::WalletError::invalid_arg(format!(
                "{} signer cannot sign a {} transaction",
                $chain,
                other.chain_label()
            ))),
        }
    };
}
pub(crate) use expect_variant;
