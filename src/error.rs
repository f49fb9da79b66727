//! 统一错误类型
//!
//! 引擎对外只暴露一种错误：`WalletError { kind, message }`。
//! `kind` 是封闭集合，每个成员都有稳定的 SCREAMING_CASE 错误码，供调用方做分支判断。

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// 节点/索引服务请求失败（包括广播被节点拒绝）
    Network,
    /// 余额不足以覆盖转账金额 + 网络费
    InsufficientFunds,
    /// 金额低于链上可接受的最小值（例如 Bitcoin 粉尘阈值）
    AmountTooSmall,
    InvalidAddress,
    InvalidArg,
    /// 用户或策略拒绝
    Rejected,
    Timeout,
    /// 当前链/签名器不支持该操作
    NotSupported,
    /// 代币元数据无法解析
    UnknownToken,
    Internal,
}

impl ErrorKind {
    /// 稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::AmountTooSmall => "AMOUNT_TOO_SMALL",
            ErrorKind::InvalidAddress => "INVALID_ADDRESS",
            ErrorKind::InvalidArg => "INVALID_ARG",
            ErrorKind::Rejected => "REJECTED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NotSupported => "NOT_SUPPORTED",
            ErrorKind::UnknownToken => "UNKNOWN_TOKEN",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct WalletError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, WalletError>;

impl WalletError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    pub fn insufficient_funds(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientFunds, msg)
    }

    pub fn amount_too_small(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AmountTooSmall, msg)
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAddress, msg)
    }

    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArg, msg)
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, msg)
    }

    pub fn unknown_token(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownToken, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    /// 传输层错误 -> NETWORK / TIMEOUT
    ///
    /// 传输层内部使用 anyhow + context，这里保留完整的错误链（节点原始消息不丢失）。
    pub fn from_transport(err: anyhow::Error) -> Self {
        let timed_out = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout());
        if timed_out {
            Self::timeout(format!("{err:#}"))
        } else {
            Self::network(format!("{err:#}"))
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<anyhow::Error> for WalletError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("malformed payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorKind::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(ErrorKind::NotSupported.code(), "NOT_SUPPORTED");
        assert_eq!(WalletError::unknown_token("x").code(), "UNKNOWN_TOKEN");
    }

    #[test]
    fn test_display_contains_code_and_message() {
        let err = WalletError::amount_too_small("below dust threshold 279 sats");
        assert_eq!(
            err.to_string(),
            "AMOUNT_TOO_SMALL: below dust threshold 279 sats"
        );
    }

    #[test]
    fn test_transport_error_keeps_node_message() {
        let err = anyhow::anyhow!("insufficient funds for gas * price + value")
            .context("eth_sendRawTransaction failed");
        let wrapped = WalletError::from_transport(err);
        assert!(wrapped.is(ErrorKind::Network));
        assert!(wrapped.message.contains("insufficient funds for gas"));
    }

    #[test]
    fn test_anyhow_maps_to_internal() {
        let err: WalletError = anyhow::anyhow!("boom").into();
        assert!(err.is(ErrorKind::Internal));
    }

    #[test]
    fn test_serialized_kind_uses_code() {
        let json = serde_json::to_value(WalletError::invalid_arg("bad")).unwrap();
        assert_eq!(json["kind"], "INVALID_ARG");
    }
}
