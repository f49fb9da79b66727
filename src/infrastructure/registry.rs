//! 网络注册表与代币注册表
//!
//! 二者都是引擎消费的外部协作方：网络注册表在构造时确定，只读；
//! 代币注册表保存用户启用的代币，可以是任何持久化实现。

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    config::NetworkConfig,
    domain::{token::token_key, ChainId, TokenInfo},
    error::{Result as WalletResult, WalletError},
};

/// 网络注册表
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    configs: HashMap<ChainId, NetworkConfig>,
}

impl NetworkRegistry {
    pub fn new(configs: impl IntoIterator<Item = NetworkConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.chain, c)).collect(),
        }
    }

    /// 未配置的链返回 NOT_SUPPORTED
    pub fn get_config(&self, chain: ChainId) -> WalletResult<&NetworkConfig> {
        self.configs
            .get(&chain)
            .ok_or_else(|| WalletError::not_supported(format!("network {chain} is not configured")))
    }

    /// 已配置的链（按 ChainId 排序）
    pub fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.configs.keys().copied().collect();
        chains.sort();
        chains
    }
}

/// 代币注册表（用户启用的代币）
#[async_trait]
pub trait TokenRegistry: Send + Sync {
    async fn enabled_tokens(&self, chain: ChainId) -> Result<Vec<TokenInfo>>;
    async fn save_token(&self, chain: ChainId, token: &TokenInfo) -> Result<()>;
    async fn remove_token(&self, chain: ChainId, address: &str) -> Result<()>;
}

/// 内存实现
#[derive(Default)]
pub struct InMemoryTokenRegistry {
    tokens: RwLock<HashMap<ChainId, Vec<TokenInfo>>>,
}

impl InMemoryTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(entries: impl IntoIterator<Item = (ChainId, TokenInfo)>) -> Self {
        let mut map: HashMap<ChainId, Vec<TokenInfo>> = HashMap::new();
        for (chain, token) in entries {
            map.entry(chain).or_default().push(token);
        }
        Self {
            tokens: RwLock::new(map),
        }
    }
}

#[async_trait]
impl TokenRegistry for InMemoryTokenRegistry {
    async fn enabled_tokens(&self, chain: ChainId) -> Result<Vec<TokenInfo>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(&chain)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_token(&self, chain: ChainId, token: &TokenInfo) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let list = tokens.entry(chain).or_default();
        list.retain(|t| t.key() != token.key());
        list.push(token.clone());
        Ok(())
    }

    async fn remove_token(&self, chain: ChainId, address: &str) -> Result<()> {
        let key = token_key(address);
        if let Some(list) = self.tokens.write().await.get_mut(&chain) {
            list.retain(|t| t.key() != key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_registry_lookup() {
        let registry = NetworkRegistry::new(vec![NetworkConfig::default_for(ChainId::Tron)]);
        assert_eq!(registry.get_config(ChainId::Tron).unwrap().chain, ChainId::Tron);
        let err = registry.get_config(ChainId::Solana).unwrap_err();
        assert_eq!(err.code(), "NOT_SUPPORTED");
        assert_eq!(registry.chains(), vec![ChainId::Tron]);
    }

    #[tokio::test]
    async fn test_token_registry_save_is_idempotent() {
        let registry = InMemoryTokenRegistry::new();
        let usdt = TokenInfo::new("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", "USDT", 6);
        registry.save_token(ChainId::Tron, &usdt).await.unwrap();
        registry.save_token(ChainId::Tron, &usdt).await.unwrap();
        assert_eq!(registry.enabled_tokens(ChainId::Tron).await.unwrap().len(), 1);

        registry
            .remove_token(ChainId::Tron, &usdt.address.to_lowercase())
            .await
            .unwrap();
        assert!(registry.enabled_tokens(ChainId::Tron).await.unwrap().is_empty());
    }
}
