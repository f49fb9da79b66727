//! 代币元数据与签名器内部的代币簿

use std::{collections::HashMap, sync::RwLock};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// 合约地址 / mint（保留原始大小写）
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

impl TokenInfo {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        let symbol = symbol.into();
        Self {
            address: address.into(),
            name: symbol.clone(),
            symbol,
            decimals,
            logo_url: None,
        }
    }

    pub fn key(&self) -> String {
        token_key(&self.address)
    }
}

/// 代币簿的键：小写地址
pub fn token_key(address: &str) -> String {
    address.trim().to_lowercase()
}

/// 每个签名器独占的代币簿
///
/// 注册幂等；读多写少，锁只在单次查找/插入期间持有。
#[derive(Debug, Default)]
pub struct TokenBook {
    tokens: RwLock<HashMap<String, TokenInfo>>,
}

impl TokenBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: &[TokenInfo]) -> Self {
        let book = Self::new();
        for token in tokens {
            book.register(token.clone());
        }
        book
    }

    pub fn register(&self, token: TokenInfo) {
        let mut map = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        map.insert(token.key(), token);
    }

    pub fn unregister(&self, address: &str) -> Option<TokenInfo> {
        let mut map = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        map.remove(&token_key(address))
    }

    pub fn get(&self, address: &str) -> Option<TokenInfo> {
        let map = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        map.get(&token_key(address)).cloned()
    }

    /// 按符号排序
    pub fn list(&self) -> Vec<TokenInfo> {
        let map = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        let mut tokens: Vec<TokenInfo> = map.values().cloned().collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.address.cmp(&b.address)));
        tokens
    }
}
