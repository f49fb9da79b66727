//! Domain 模块
//!
//! 链标识、转账意图、单位换算、平台服务费与密钥派生等领域模型

pub mod chain;
pub mod derivation;
pub mod intent;
pub mod platform_fee;
pub mod token;
pub mod units;

// 重新导出常用类型
pub use chain::{
    Account, Capabilities, ChainId, ChainKind, CurveType, MessageScheme, WalletInfo,
};
pub use derivation::{DerivationContext, DerivationStrategy, DerivationStrategyFactory, SecretMaterial};
pub use intent::{
    BitcoinFeeDetails, DappTransactionRequest, Direction, EvmFeeDetails, FeeDetails, FeeQuote,
    GasModel, HistoryItem, HistoryPage, HistoryQuery, IntentKind, MessageRequest,
    PreflightResult, SolanaFeeDetails, TransferIntent, TronFeeDetails, TxStatus,
};
pub use platform_fee::{FeeSplit, PlatformFee, PlatformFeeBreakdown, PlatformFeeMode};
pub use token::{TokenBook, TokenInfo};
