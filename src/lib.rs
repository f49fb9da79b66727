//! IronCore 多链钱包引擎
//!
//! 一份助记词派生 Bitcoin / EVM / Solana / Tron 账户，并通过统一的
//! `estimate -> build -> sign -> send` 流程在各链上转账。私钥只在签名闭包内存在。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod signer;
pub mod utils;

// 重新导出常用类型
pub use error::{ErrorKind, Result, WalletError};

pub mod prelude {
    pub use crate::{
        config::{EngineConfig, EngineSettings, NetworkConfig},
        domain::{
            ChainId, FeeQuote, HistoryPage, HistoryQuery, IntentKind, MessageRequest,
            MessageScheme, PlatformFee, PlatformFeeMode, TokenInfo, TransferIntent,
        },
        error::{ErrorKind, Result, WalletError},
        service::{Keyring, WalletBuilder, WalletOrchestrator},
        signer::{ChainSigner, SignedPayload, UnsignedTx},
    };
}
