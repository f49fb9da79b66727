//! 链标识与钱包元信息
//!
//! 引擎支持四个链族：Bitcoin（UTXO）、EVM（Ethereum/BSC/Polygon）、Solana、Tron。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::intent::IntentKind;
use crate::error::{Result, WalletError};

/// 链族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainKind {
    Evm,
    Btc,
    Sol,
    Tron,
}

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// secp256k1 (Bitcoin, EVM, Tron)
    Secp256k1,
    /// ed25519 (Solana)
    Ed25519,
}

/// 受支持的链
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Bsc,
    Polygon,
    Bitcoin,
    Solana,
    Tron,
}

impl ChainId {
    pub const ALL: [ChainId; 6] = [
        ChainId::Ethereum,
        ChainId::Bsc,
        ChainId::Polygon,
        ChainId::Bitcoin,
        ChainId::Solana,
        ChainId::Tron,
    ];

    pub fn kind(&self) -> ChainKind {
        match self {
            ChainId::Ethereum | ChainId::Bsc | ChainId::Polygon => ChainKind::Evm,
            ChainId::Bitcoin => ChainKind::Btc,
            ChainId::Solana => ChainKind::Sol,
            ChainId::Tron => ChainKind::Tron,
        }
    }

    pub fn is_evm(&self) -> bool {
        self.kind() == ChainKind::Evm
    }

    pub fn curve(&self) -> CurveType {
        match self {
            ChainId::Solana => CurveType::Ed25519,
            _ => CurveType::Secp256k1,
        }
    }

    /// 规范名称（小写）
    pub fn canonical_name(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Bsc => "bsc",
            ChainId::Polygon => "polygon",
            ChainId::Bitcoin => "bitcoin",
            ChainId::Solana => "solana",
            ChainId::Tron => "tron",
        }
    }

    /// SLIP-44 coin type
    ///
    /// EVM 链共用 60，同一助记词在三条 EVM 链上得到同一地址。
    pub fn coin_type(&self) -> u32 {
        match self {
            ChainId::Ethereum | ChainId::Bsc | ChainId::Polygon => 60,
            ChainId::Bitcoin => 0,
            ChainId::Solana => 501,
            ChainId::Tron => 195,
        }
    }

    /// 账户 `index` 的派生路径
    pub fn derivation_path(&self, index: u32) -> String {
        match self {
            // BIP84 native segwit
            ChainId::Bitcoin => format!("m/84'/0'/0'/0/{index}"),
            // SLIP-0010 只允许硬化派生
            ChainId::Solana => format!("m/44'/501'/{index}'/0'"),
            _ => format!("m/44'/{}'/0'/0/{index}", self.coin_type()),
        }
    }

    /// 默认原生币符号
    pub fn native_symbol(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ETH",
            ChainId::Bsc => "BNB",
            ChainId::Polygon => "MATIC",
            ChainId::Bitcoin => "BTC",
            ChainId::Solana => "SOL",
            ChainId::Tron => "TRX",
        }
    }

    pub fn native_decimals(&self) -> u8 {
        match self.kind() {
            ChainKind::Evm => 18,
            ChainKind::Btc => 8,
            ChainKind::Sol => 9,
            ChainKind::Tron => 6,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl FromStr for ChainId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        crate::utils::chain_normalizer::normalize_chain_identifier(s)
    }
}

/// 钱包元信息（构造后只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletInfo {
    pub chain: ChainId,
    pub kind: ChainKind,
    pub symbol: String,
    pub decimals: u8,
    pub explorer_tx_base: String,
    pub explorer_address_base: String,
}

impl WalletInfo {
    pub fn tx_url(&self, hash: &str) -> String {
        join_url(&self.explorer_tx_base, hash)
    }

    pub fn address_url(&self, address: &str) -> String {
        join_url(&self.explorer_address_base, address)
    }
}

fn join_url(base: &str, tail: &str) -> String {
    if base.is_empty() {
        return String::new();
    }
    format!("{}/{}", base.trim_end_matches('/'), tail)
}

/// 消息签名方案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageScheme {
    /// EIP-191 personal_sign
    PersonalSign,
    /// EIP-712 eth_signTypedData_v4
    TypedDataV4,
    /// ed25519 原始消息签名
    Ed25519Raw,
    /// Tron signMessageV2
    TronV2,
}

/// 能力集
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub native_transfer: bool,
    pub token_transfer: bool,
    pub contract_call: bool,
    pub psbt: bool,
    pub message_schemes: Vec<MessageScheme>,
}

impl Capabilities {
    pub fn for_kind(kind: ChainKind) -> Self {
        match kind {
            ChainKind::Btc => Self {
                native_transfer: true,
                token_transfer: false,
                contract_call: false,
                psbt: true,
                message_schemes: vec![],
            },
            ChainKind::Evm => Self {
                native_transfer: true,
                token_transfer: true,
                contract_call: true,
                psbt: false,
                message_schemes: vec![MessageScheme::PersonalSign, MessageScheme::TypedDataV4],
            },
            ChainKind::Sol => Self {
                native_transfer: true,
                token_transfer: true,
                contract_call: false,
                psbt: false,
                message_schemes: vec![MessageScheme::Ed25519Raw],
            },
            ChainKind::Tron => Self {
                native_transfer: true,
                token_transfer: true,
                contract_call: false,
                psbt: false,
                message_schemes: vec![MessageScheme::TronV2],
            },
        }
    }

    pub fn supports(&self, kind: IntentKind) -> bool {
        match kind {
            IntentKind::NativeTransfer => self.native_transfer,
            IntentKind::TokenTransfer => self.token_transfer,
            IntentKind::ContractCall => self.contract_call,
        }
    }

    /// 不支持时返回 NOT_SUPPORTED（在接触任何密钥之前调用）
    pub fn require(&self, chain: ChainId, kind: IntentKind) -> Result<()> {
        if self.supports(kind) {
            Ok(())
        } else {
            Err(WalletError::not_supported(format!(
                "{kind:?} is not supported on {chain}"
            )))
        }
    }

    pub fn require_message(&self, chain: ChainId, scheme: MessageScheme) -> Result<()> {
        if self.message_schemes.contains(&scheme) {
            Ok(())
        } else {
            Err(WalletError::not_supported(format!(
                "message scheme {scheme:?} is not supported on {chain}"
            )))
        }
    }
}

/// 账户
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub index: u32,
    pub address: String,
    pub chain: ChainId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_paths() {
        assert_eq!(ChainId::Ethereum.derivation_path(0), "m/44'/60'/0'/0/0");
        assert_eq!(ChainId::Bsc.derivation_path(2), "m/44'/60'/0'/0/2");
        assert_eq!(ChainId::Tron.derivation_path(0), "m/44'/195'/0'/0/0");
        assert_eq!(ChainId::Bitcoin.derivation_path(1), "m/84'/0'/0'/0/1");
        assert_eq!(ChainId::Solana.derivation_path(0), "m/44'/501'/0'/0'");
        assert_eq!(ChainId::Solana.derivation_path(3), "m/44'/501'/3'/0'");
    }

    #[test]
    fn test_kind_and_curve() {
        assert!(ChainId::Polygon.is_evm());
        assert_eq!(ChainId::Solana.curve(), CurveType::Ed25519);
        assert_eq!(ChainId::Tron.curve(), CurveType::Secp256k1);
        assert_eq!(ChainId::Bitcoin.native_decimals(), 8);
    }

    #[test]
    fn test_capability_gating() {
        let btc = Capabilities::for_kind(ChainKind::Btc);
        assert!(btc.require(ChainId::Bitcoin, IntentKind::NativeTransfer).is_ok());
        let err = btc
            .require(ChainId::Bitcoin, IntentKind::ContractCall)
            .unwrap_err();
        assert_eq!(err.code(), "NOT_SUPPORTED");
        assert!(btc
            .require_message(ChainId::Bitcoin, MessageScheme::PersonalSign)
            .is_err());
    }

    #[test]
    fn test_explorer_urls() {
        let info = WalletInfo {
            chain: ChainId::Ethereum,
            kind: ChainKind::Evm,
            symbol: "ETH".into(),
            decimals: 18,
            explorer_tx_base: "https://etherscan.io/tx/".into(),
            explorer_address_base: "https://etherscan.io/address".into(),
        };
        assert_eq!(info.tx_url("0xabc"), "https://etherscan.io/tx/0xabc");
        assert_eq!(info.address_url("0xdef"), "https://etherscan.io/address/0xdef");
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("ETH".parse::<ChainId>().unwrap(), ChainId::Ethereum);
        assert_eq!("trx".parse::<ChainId>().unwrap(), ChainId::Tron);
        assert!("dogecoin".parse::<ChainId>().is_err());
    }
}
