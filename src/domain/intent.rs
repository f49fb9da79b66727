//! 转账意图、费用报价与历史记录
//!
//! 这些类型与链无关，由编排层传入签名器；签名器只借用，不修改。

use serde::{Deserialize, Serialize};

use super::{
    chain::{ChainId, MessageScheme},
    platform_fee::{PlatformFee, PlatformFeeBreakdown},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    NativeTransfer,
    TokenTransfer,
    ContractCall,
}

/// 转账意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub kind: IntentKind,
    pub to: String,
    /// 人类可读金额（合约调用时为随附的原生币数量）
    pub amount: String,
    #[serde(default)]
    pub token_address: Option<String>,
    /// 合约调用数据（0x 十六进制）
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub platform_fee: Option<PlatformFee>,
}

impl TransferIntent {
    pub fn native(to: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            kind: IntentKind::NativeTransfer,
            to: to.into(),
            amount: amount.into(),
            token_address: None,
            data: None,
            platform_fee: None,
        }
    }

    pub fn token(
        token_address: impl Into<String>,
        to: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            kind: IntentKind::TokenTransfer,
            to: to.into(),
            amount: amount.into(),
            token_address: Some(token_address.into()),
            data: None,
            platform_fee: None,
        }
    }

    pub fn contract_call(
        to: impl Into<String>,
        value: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            kind: IntentKind::ContractCall,
            to: to.into(),
            amount: value.into(),
            token_address: None,
            data: Some(data.into()),
            platform_fee: None,
        }
    }

    pub fn with_platform_fee(mut self, fee: PlatformFee) -> Self {
        self.platform_fee = Some(fee);
        self
    }
}

/// 费用报价
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    /// 人类可读网络费
    pub fee: String,
    pub fee_symbol: String,
    /// 网络费（最小单位）
    pub fee_raw: u128,
    pub details: FeeDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "chain", rename_all = "lowercase")]
pub enum FeeDetails {
    Bitcoin(BitcoinFeeDetails),
    Evm(EvmFeeDetails),
    Solana(SolanaFeeDetails),
    Tron(TronFeeDetails),
}

impl FeeDetails {
    pub fn platform_fee(&self) -> Option<&PlatformFeeBreakdown> {
        match self {
            FeeDetails::Bitcoin(d) => d.platform_fee.as_ref(),
            FeeDetails::Evm(d) => d.platform_fee.as_ref(),
            FeeDetails::Solana(d) => d.platform_fee.as_ref(),
            FeeDetails::Tron(d) => d.platform_fee.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitcoinFeeDetails {
    /// sats/vB
    pub fee_rate: u64,
    pub vbytes: u64,
    pub inputs: usize,
    pub outputs: usize,
    pub dust_threshold: u64,
    /// 找零低于粉尘阈值并入矿工费
    pub change_folded: bool,
    /// 服务费输出低于粉尘阈值被免除
    pub platform_fee_waived: bool,
    pub platform_fee: Option<PlatformFeeBreakdown>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GasModel {
    Eip1559,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvmFeeDetails {
    pub gas_model: GasModel,
    /// 每笔交易的 gas limit，顺序与 build 输出一致
    pub gas_limits: Vec<u64>,
    pub base_fee_per_gas: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub gas_price: Option<u128>,
    pub platform_fee: Option<PlatformFeeBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolanaFeeDetails {
    pub lamports_per_message: u64,
    pub instructions: usize,
    /// 需要为收款方创建的关联代币账户数量
    pub creates_token_accounts: usize,
    pub platform_fee: Option<PlatformFeeBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TronFeeDetails {
    pub bandwidth_required: u64,
    pub bandwidth_available: u64,
    pub bandwidth_shortfall: u64,
    pub energy_required: u64,
    pub energy_available: u64,
    pub energy_shortfall: u64,
    /// SUN / byte
    pub bandwidth_price: u64,
    /// SUN / energy
    pub energy_price: u64,
    pub fee_limit: Option<u64>,
    pub platform_fee: Option<PlatformFeeBreakdown>,
}

/// 消息签名请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub scheme: MessageScheme,
    /// 请求方声称的签名地址，必须等于签名器当前账户
    pub from: String,
    /// UTF-8 文本、0x 十六进制，或（EIP-712）JSON 文本
    pub payload: String,
}

/// 历史查询
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub cursor: Option<String>,
}

fn default_history_limit() -> usize {
    20
}

impl HistoryQuery {
    pub fn native(limit: usize) -> Self {
        Self {
            token_address: None,
            limit,
            cursor: None,
        }
    }

    pub fn token(token_address: impl Into<String>, limit: usize) -> Self {
        Self {
            token_address: Some(token_address.into()),
            limit,
            cursor: None,
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            default_history_limit()
        } else {
            self.limit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// 统一历史记录条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryItem {
    pub hash: String,
    pub direction: Direction,
    /// 人类可读金额
    pub value: String,
    pub symbol: String,
    /// Unix 秒
    pub timestamp: i64,
    pub explorer_url: String,
    pub block_number: Option<u64>,
    pub status: Option<TxStatus>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub fee: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    pub cursor: Option<String>,
}

/// DApp 提交的交易请求（EVM）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DappTransactionRequest {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    /// 0x 十六进制 wei
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// 编排层的预检结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightResult {
    pub chain: ChainId,
    pub fee: String,
    pub fee_symbol: String,
    pub fee_raw: u128,
    pub details: FeeDetails,
}

impl PreflightResult {
    pub fn from_quote(chain: ChainId, quote: FeeQuote) -> Self {
        Self {
            chain,
            fee: quote.fee,
            fee_symbol: quote.fee_symbol,
            fee_raw: quote.fee_raw,
            details: quote.details,
        }
    }
}
