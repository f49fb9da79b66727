//! 钱包构建器
//!
//! 无状态工厂：按链族创建签名器并注入传输层。每次调用都返回新的实例。

use std::{sync::Arc, time::Duration};

use crate::{
    config::{EngineSettings, NetworkConfig},
    domain::{ChainId, ChainKind, TokenInfo},
    error::{Result, WalletError},
    infrastructure::{
        bitcoin_provider::{BitcoinProvider, EsploraProvider},
        rpc::{build_http_client, HttpJsonRpc, HttpRest, JsonRpcTransport, RestTransport},
    },
    service::keyring::KeyHandle,
    signer::{
        wallet_info_from, BitcoinSigner, ChainSigner, EvmSigner, SolanaSigner, TronSigner,
    },
    utils::chain_normalizer::default_evm_chain_id,
};

/// TronGrid API key 请求头
const TRON_API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

/// 预先构建好的传输层（测试或自定义重试策略时注入）
#[derive(Clone)]
pub enum ChainTransports {
    Bitcoin(Arc<dyn BitcoinProvider>),
    Evm {
        rpc: Arc<dyn JsonRpcTransport>,
        explorer: Option<Arc<dyn RestTransport>>,
    },
    Solana(Arc<dyn JsonRpcTransport>),
    Tron {
        api: Arc<dyn RestTransport>,
        history: Option<Arc<dyn RestTransport>>,
    },
}

impl ChainTransports {
    fn kind(&self) -> ChainKind {
        match self {
            ChainTransports::Bitcoin(_) => ChainKind::Btc,
            ChainTransports::Evm { .. } => ChainKind::Evm,
            ChainTransports::Solana(_) => ChainKind::Sol,
            ChainTransports::Tron { .. } => ChainKind::Tron,
        }
    }

    /// 按网络配置创建 HTTP 传输层
    pub fn http(config: &NetworkConfig, settings: &EngineSettings) -> Self {
        let client = build_http_client(Duration::from_secs(settings.request_timeout_secs));
        match config.chain.kind() {
            ChainKind::Btc => {
                let rest = Arc::new(HttpRest::new(client, config.rpc_url.clone()));
                ChainTransports::Bitcoin(Arc::new(EsploraProvider::new(rest)))
            }
            ChainKind::Evm => ChainTransports::Evm {
                rpc: Arc::new(HttpJsonRpc::new(client.clone(), config.rpc_url.clone())),
                explorer: config.history_api_url.as_ref().map(|url| {
                    Arc::new(HttpRest::new(client.clone(), url.clone())) as Arc<dyn RestTransport>
                }),
            },
            ChainKind::Sol => {
                ChainTransports::Solana(Arc::new(HttpJsonRpc::new(client, config.rpc_url.clone())))
            }
            ChainKind::Tron => {
                let rest = |url: &str| {
                    let rest = HttpRest::new(client.clone(), url.to_string());
                    match config.api_key.as_ref() {
                        Some(key) => rest.with_api_key(TRON_API_KEY_HEADER, key.clone()),
                        None => rest,
                    }
                };
                ChainTransports::Tron {
                    api: Arc::new(rest(&config.rpc_url)),
                    history: config
                        .history_api_url
                        .as_deref()
                        .map(|url| Arc::new(rest(url)) as Arc<dyn RestTransport>),
                }
            }
        }
    }
}

pub struct WalletBuilder;

impl WalletBuilder {
    /// 使用 HTTP 传输层构建签名器
    pub fn build(
        chain: ChainId,
        config: &NetworkConfig,
        key: KeyHandle,
        tokens: &[TokenInfo],
        settings: &EngineSettings,
    ) -> Result<Arc<dyn ChainSigner>> {
        let transports = ChainTransports::http(config, settings);
        Self::build_with(chain, config, key, tokens, transports)
    }

    /// 使用注入的传输层构建签名器
    pub fn build_with(
        chain: ChainId,
        config: &NetworkConfig,
        key: KeyHandle,
        tokens: &[TokenInfo],
        transports: ChainTransports,
    ) -> Result<Arc<dyn ChainSigner>> {
        if config.chain != chain || key.chain() != chain {
            return Err(WalletError::invalid_arg(format!(
                "network config ({}) and key ({}) must both belong to {chain}",
                config.chain,
                key.chain()
            )));
        }
        if transports.kind() != chain.kind() {
            return Err(WalletError::invalid_arg(format!(
                "transports for {:?} cannot serve {chain}",
                transports.kind()
            )));
        }

        let info = wallet_info_from(config);
        let signer: Arc<dyn ChainSigner> = match transports {
            ChainTransports::Bitcoin(provider) => Arc::new(BitcoinSigner::new(info, key, provider)),
            ChainTransports::Evm { rpc, explorer } => {
                let chain_id = config
                    .chain_id
                    .or_else(|| default_evm_chain_id(chain))
                    .ok_or_else(|| WalletError::invalid_arg(format!("{chain} requires a chain id")))?;
                let signer = EvmSigner::new(info, chain_id, key, rpc);
                match explorer {
                    Some(explorer) => {
                        Arc::new(signer.with_explorer(explorer, config.history_api_key.clone()))
                    }
                    None => Arc::new(signer),
                }
            }
            ChainTransports::Solana(rpc) => Arc::new(SolanaSigner::new(info, key, rpc)),
            ChainTransports::Tron { api, history } => {
                let signer = TronSigner::new(info, key, api);
                match history {
                    Some(history) => Arc::new(signer.with_history(history)),
                    None => Arc::new(signer),
                }
            }
        };

        for token in tokens {
            if let Err(e) = signer.register_token(token.clone()) {
                tracing::warn!(chain = %chain, token = %token.address, error = %e, "token skipped");
            }
        }
        tracing::debug!(chain = %chain, tokens = tokens.len(), "signer built");
        Ok(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::derivation::DerivationContext, infrastructure::vault::MemoryMnemonicStore,
        service::keyring::Keyring,
    };

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn key(chain: ChainId) -> KeyHandle {
        Keyring::new(Arc::new(MemoryMnemonicStore::new()), DerivationContext::default())
            .derive_all_chains(MNEMONIC, None)
            .unwrap()
            .account(chain)
            .unwrap()
            .key
            .clone()
    }

    #[test]
    fn test_build_each_family() {
        let settings = EngineSettings::default();
        for chain in ChainId::ALL {
            let config = NetworkConfig::default_for(chain);
            let tokens = vec![TokenInfo::new("0xToken", "TKN", 6)];
            let signer = WalletBuilder::build(chain, &config, key(chain), &tokens, &settings).unwrap();
            assert_eq!(signer.wallet_info().chain, chain);
            assert_eq!(signer.list_tokens().len(), 1);
            assert_eq!(signer.as_evm().is_some(), chain.kind() == ChainKind::Evm);
        }
    }

    #[test]
    fn test_build_rejects_mismatched_key() {
        let config = NetworkConfig::default_for(ChainId::Ethereum);
        let err = WalletBuilder::build(
            ChainId::Ethereum,
            &config,
            key(ChainId::Tron),
            &[],
            &EngineSettings::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.code(), "INVALID_ARG");
    }

    #[test]
    fn test_build_returns_fresh_instances() {
        let config = NetworkConfig::default_for(ChainId::Solana);
        let settings = EngineSettings::default();
        let a = WalletBuilder::build(ChainId::Solana, &config, key(ChainId::Solana), &[], &settings).unwrap();
        let b = WalletBuilder::build(ChainId::Solana, &config, key(ChainId::Solana), &[], &settings).unwrap();
        a.register_token(TokenInfo::new("Mint111", "MNT", 6)).unwrap();
        assert!(b.list_tokens().is_empty());
    }
}
