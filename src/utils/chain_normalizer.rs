//! 链标识符标准化
//!
//! 调用方可能传入 "ETH"、"eth"、"Ethereum"、"1" 等各种写法，统一映射到 [`ChainId`]。

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::{
    domain::ChainId,
    error::{Result, WalletError},
};

/// 链标识符配置
#[derive(Debug, Clone)]
pub struct ChainIdentifier {
    pub chain: ChainId,
    /// EVM chain id（非 EVM 链为 None）
    pub evm_chain_id: Option<u64>,
    pub full_name: &'static str,
    pub aliases: &'static [&'static str],
}

static CHAIN_IDENTIFIERS: Lazy<Vec<ChainIdentifier>> = Lazy::new(|| {
    vec![
        ChainIdentifier {
            chain: ChainId::Ethereum,
            evm_chain_id: Some(1),
            full_name: "Ethereum Mainnet",
            aliases: &["ethereum", "eth", "mainnet", "1"],
        },
        ChainIdentifier {
            chain: ChainId::Bsc,
            evm_chain_id: Some(56),
            full_name: "BNB Smart Chain",
            aliases: &["bsc", "binance", "bnb", "56"],
        },
        ChainIdentifier {
            chain: ChainId::Polygon,
            evm_chain_id: Some(137),
            full_name: "Polygon",
            aliases: &["polygon", "matic", "pol", "137"],
        },
        ChainIdentifier {
            chain: ChainId::Bitcoin,
            evm_chain_id: None,
            full_name: "Bitcoin",
            aliases: &["bitcoin", "btc"],
        },
        ChainIdentifier {
            chain: ChainId::Solana,
            evm_chain_id: None,
            full_name: "Solana",
            aliases: &["solana", "sol"],
        },
        ChainIdentifier {
            chain: ChainId::Tron,
            evm_chain_id: None,
            full_name: "Tron",
            aliases: &["tron", "trx"],
        },
    ]
});

/// 别名（小写）-> 链
static ALIAS_INDEX: Lazy<HashMap<&'static str, ChainId>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for ident in CHAIN_IDENTIFIERS.iter() {
        for alias in ident.aliases {
            map.insert(*alias, ident.chain);
        }
    }
    map
});

/// 标准化链标识符
pub fn normalize_chain_identifier(input: &str) -> Result<ChainId> {
    let key = input.trim().to_lowercase();
    ALIAS_INDEX
        .get(key.as_str())
        .copied()
        .ok_or_else(|| WalletError::not_supported(format!("unsupported chain: {input}")))
}

/// 查询链的静态信息
pub fn chain_identifier(chain: ChainId) -> Option<&'static ChainIdentifier> {
    CHAIN_IDENTIFIERS.iter().find(|c| c.chain == chain)
}

/// 默认 EVM chain id（配置未给出时使用）
pub fn default_evm_chain_id(chain: ChainId) -> Option<u64> {
    chain_identifier(chain).and_then(|c| c.evm_chain_id)
}
