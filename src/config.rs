//! 配置管理模块
//! 支持从环境变量（.env）和 TOML 配置文件加载配置

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{ChainId, ChainKind};

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// 引擎运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 单链内余额查询并发上限
    pub balance_concurrency: usize,
    /// HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
    /// bitcoin / testnet / signet / regtest
    pub bitcoin_network: String,
}

/// 单链网络配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain: ChainId,
    /// EVM/Solana 为 JSON-RPC 地址；Tron 为 TronGrid 地址；Bitcoin 为 Esplora 地址
    pub rpc_url: String,
    /// 历史记录索引服务（EVM 为 Etherscan 兼容接口）
    #[serde(default)]
    pub history_api_url: Option<String>,
    #[serde(default)]
    pub history_api_key: Option<String>,
    /// 节点 API key（例如 TRON-PRO-API-KEY）
    #[serde(default)]
    pub api_key: Option<String>,
    /// EIP-155 chain id（仅 EVM）
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub explorer_tx_base: String,
    #[serde(default)]
    pub explorer_address_base: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

impl NetworkConfig {
    pub fn symbol(&self) -> String {
        self.symbol
            .clone()
            .unwrap_or_else(|| self.chain.native_symbol().to_string())
    }

    pub fn decimals(&self) -> u8 {
        self.decimals.unwrap_or_else(|| self.chain.native_decimals())
    }

    /// 主网默认值，RPC 地址可由环境变量覆盖
    pub fn default_for(chain: ChainId) -> Self {
        let env = |key: &str, fallback: &str| std::env::var(key).unwrap_or_else(|_| fallback.into());
        let (rpc_url, history_api_url, explorer) = match chain {
            ChainId::Ethereum => (
                env("ETH_RPC_URL", "https://ethereum-rpc.publicnode.com"),
                Some(env("ETH_HISTORY_API_URL", "https://api.etherscan.io/api")),
                "https://etherscan.io",
            ),
            ChainId::Bsc => (
                env("BSC_RPC_URL", "https://bsc-dataseed1.binance.org"),
                Some(env("BSC_HISTORY_API_URL", "https://api.bscscan.com/api")),
                "https://bscscan.com",
            ),
            ChainId::Polygon => (
                env("POLYGON_RPC_URL", "https://polygon-rpc.com"),
                Some(env("POLYGON_HISTORY_API_URL", "https://api.polygonscan.com/api")),
                "https://polygonscan.com",
            ),
            ChainId::Bitcoin => (
                env("BITCOIN_API_URL", "https://mempool.space/api"),
                None,
                "https://mempool.space",
            ),
            ChainId::Solana => (
                env("SOLANA_RPC_URL", "https://api.mainnet-beta.solana.com"),
                None,
                "https://solscan.io",
            ),
            ChainId::Tron => (
                env("TRON_API_URL", "https://api.trongrid.io"),
                None,
                "https://tronscan.org/#",
            ),
        };
        let upper = chain.canonical_name().to_uppercase();

        Self {
            chain,
            rpc_url,
            history_api_url,
            history_api_key: std::env::var(format!("{upper}_HISTORY_API_KEY")).ok(),
            api_key: std::env::var(format!("{upper}_API_KEY")).ok(),
            chain_id: crate::utils::chain_normalizer::default_evm_chain_id(chain),
            symbol: None,
            decimals: None,
            explorer_tx_base: format!("{explorer}/tx"),
            explorer_address_base: format!("{explorer}/address"),
            logo_url: None,
        }
    }
}

fn default_networks() -> Vec<NetworkConfig> {
    ChainId::ALL.iter().map(|c| NetworkConfig::default_for(*c)).collect()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: std::env::var("LOG_FILE_ENABLED")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            balance_concurrency: std::env::var("BALANCE_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
            bitcoin_network: std::env::var("BITCOIN_NETWORK").unwrap_or_else(|_| "bitcoin".into()),
        }
    }
}

impl EngineSettings {
    pub fn bitcoin_network(&self) -> Result<bitcoin::Network> {
        match self.bitcoin_network.to_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(bitcoin::Network::Bitcoin),
            "testnet" => Ok(bitcoin::Network::Testnet),
            "signet" => Ok(bitcoin::Network::Signet),
            "regtest" => Ok(bitcoin::Network::Regtest),
            other => anyhow::bail!("Unknown bitcoin network: {}", other),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            engine: EngineSettings::default(),
            networks: default_networks(),
        }
    }
}

impl EngineConfig {
    /// 从环境变量加载配置（先读取 .env）
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::default())
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: EngineConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    pub fn network(&self, chain: ChainId) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain == chain)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.engine.balance_concurrency == 0 {
            anyhow::bail!("balance_concurrency must be at least 1");
        }
        if self.engine.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        self.engine.bitcoin_network()?;

        if self.networks.is_empty() {
            anyhow::bail!("at least one network must be configured");
        }
        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.chain) {
                anyhow::bail!("network {} configured twice", network.chain);
            }
            if !network.rpc_url.starts_with("http://") && !network.rpc_url.starts_with("https://")
            {
                anyhow::bail!("rpc_url for {} must be an http(s) URL", network.chain);
            }
            if network.chain.kind() == ChainKind::Evm && network.chain_id.is_none() {
                anyhow::bail!("chain_id is required for EVM network {}", network.chain);
            }
        }

        Ok(())
    }
}
