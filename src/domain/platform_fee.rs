//! 平台服务费拆分
//!
//! 服务费 = 百分比部分 + 固定部分（均换算到发送资产的最小单位）。
//! - Subtract：从用户输入金额中扣除，收款方少收
//! - Additive：在用户输入金额之外额外支付

use serde::{Deserialize, Serialize};

use super::units::{apply_percent, format_units, parse_units};
use crate::error::{Result, WalletError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFeeMode {
    Additive,
    Subtract,
}

/// 平台服务费配置（随转账意图传入）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFee {
    pub receiver: String,
    /// 百分比，十进制字符串，例如 "0.5" = 0.5%
    #[serde(default)]
    pub percent: Option<String>,
    /// 固定金额（发送资产的人类可读单位）
    #[serde(default)]
    pub fixed: Option<String>,
    pub mode: PlatformFeeMode,
}

/// 拆分结果（最小单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub total_amount_send: u128,
    pub platform_fee_raw: u128,
    pub actual_receive: u128,
    pub mode: Option<PlatformFeeMode>,
}

impl FeeSplit {
    /// 不带服务费
    pub fn plain(amount: u128) -> Self {
        Self {
            total_amount_send: amount,
            platform_fee_raw: 0,
            actual_receive: amount,
            mode: None,
        }
    }

    pub fn has_fee(&self) -> bool {
        self.platform_fee_raw > 0
    }

    /// 从发送方账户流出的资产总量（不含网络费）
    pub fn sender_outflow(&self) -> Result<u128> {
        match self.mode {
            Some(PlatformFeeMode::Additive) => self
                .total_amount_send
                .checked_add(self.platform_fee_raw)
                .ok_or_else(|| WalletError::invalid_arg("amount plus platform fee overflows")),
            _ => Ok(self.total_amount_send),
        }
    }

    /// 放弃服务费（例如 Bitcoin 服务费输出低于粉尘阈值）
    pub fn waived(&self) -> Self {
        Self::plain(self.total_amount_send)
    }

    pub fn breakdown(&self, decimals: u8, receiver: Option<&str>) -> PlatformFeeBreakdown {
        PlatformFeeBreakdown {
            total_amount_send: format_units(self.total_amount_send, decimals),
            actual_receive: format_units(self.actual_receive, decimals),
            platform_fee: format_units(self.platform_fee_raw, decimals),
            total_amount_send_raw: self.total_amount_send,
            actual_receive_raw: self.actual_receive,
            platform_fee_raw: self.platform_fee_raw,
            mode: self.mode,
            receiver: receiver.map(str::to_string),
        }
    }
}

/// 对外展示的服务费明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformFeeBreakdown {
    pub total_amount_send: String,
    pub actual_receive: String,
    pub platform_fee: String,
    pub total_amount_send_raw: u128,
    pub actual_receive_raw: u128,
    pub platform_fee_raw: u128,
    pub mode: Option<PlatformFeeMode>,
    pub receiver: Option<String>,
}

/// 计算服务费拆分
///
/// 不变量：subtract 模式下 `actual_receive + platform_fee_raw == total_amount_send`，
/// 其余情况 `actual_receive == total_amount_send`。
pub fn split_amount(total: u128, fee: Option<&PlatformFee>, decimals: u8) -> Result<FeeSplit> {
    let Some(fee) = fee else {
        return Ok(FeeSplit::plain(total));
    };
    if fee.receiver.trim().is_empty() {
        return Err(WalletError::invalid_arg("platform fee receiver is empty"));
    }

    let percent_part = match fee.percent.as_deref() {
        Some(p) if !p.trim().is_empty() => apply_percent(total, p)?,
        _ => 0,
    };
    let fixed_part = match fee.fixed.as_deref() {
        Some(f) if !f.trim().is_empty() => parse_units(f, decimals)?,
        _ => 0,
    };
    let platform_fee_raw = percent_part
        .checked_add(fixed_part)
        .ok_or_else(|| WalletError::invalid_arg("platform fee overflows"))?;

    let actual_receive = match fee.mode {
        PlatformFeeMode::Subtract => {
            if platform_fee_raw >= total && platform_fee_raw > 0 {
                return Err(WalletError::amount_too_small(format!(
                    "platform fee {} consumes the whole amount {}",
                    format_units(platform_fee_raw, decimals),
                    format_units(total, decimals)
                )));
            }
            total - platform_fee_raw
        }
        PlatformFeeMode::Additive => {
            total
                .checked_add(platform_fee_raw)
                .ok_or_else(|| WalletError::invalid_arg("amount plus platform fee overflows"))?;
            total
        }
    };

    Ok(FeeSplit {
        total_amount_send: total,
        platform_fee_raw,
        actual_receive,
        mode: Some(fee.mode),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fee(percent: Option<&str>, fixed: Option<&str>, mode: PlatformFeeMode) -> PlatformFee {
        PlatformFee {
            receiver: "0x00000000000000000000000000000000000000fe".into(),
            percent: percent.map(Into::into),
            fixed: fixed.map(Into::into),
            mode,
        }
    }

    #[test]
    fn test_no_fee_is_identity() {
        let split = split_amount(12_345, None, 6).unwrap();
        assert_eq!(split.actual_receive, 12_345);
        assert!(!split.has_fee());
    }

    #[test]
    fn test_subtract_conserves_value() {
        let f = fee(Some("0.3"), Some("0.01"), PlatformFeeMode::Subtract);
        for total in [1_000_000u128, 7_777_777, 123_456_789_012] {
            let split = split_amount(total, Some(&f), 6).unwrap();
            assert_eq!(split.actual_receive + split.platform_fee_raw, total);
            assert_eq!(split.sender_outflow().unwrap(), total);
        }
    }

    #[test]
    fn test_additive_keeps_amount() {
        let f = fee(Some("1"), None, PlatformFeeMode::Additive);
        let split = split_amount(1_000, Some(&f), 0).unwrap();
        assert_eq!(split.actual_receive, 1_000);
        assert_eq!(split.platform_fee_raw, 10);
        assert_eq!(split.sender_outflow().unwrap(), 1_010);
    }

    #[test]
    fn test_additive_overflow_rejected() {
        let f = fee(None, Some("1"), PlatformFeeMode::Additive);
        let err = split_amount(u128::MAX, Some(&f), 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);

        let split = FeeSplit {
            total_amount_send: u128::MAX,
            platform_fee_raw: 1,
            actual_receive: u128::MAX,
            mode: Some(PlatformFeeMode::Additive),
        };
        assert_eq!(split.sender_outflow().unwrap_err().kind, ErrorKind::InvalidArg);
    }

    #[test]
    fn test_subtract_fee_larger_than_amount_rejected() {
        let f = fee(None, Some("2"), PlatformFeeMode::Subtract);
        let err = split_amount(1_000_000, Some(&f), 6).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmountTooSmall);
    }

    #[test]
    fn test_breakdown_strings() {
        let f = fee(Some("0.5"), None, PlatformFeeMode::Subtract);
        let split = split_amount(200_000_000, Some(&f), 8).unwrap();
        let b = split.breakdown(8, Some(&f.receiver));
        assert_eq!(b.total_amount_send, "2");
        assert_eq!(b.platform_fee, "0.01");
        assert_eq!(b.actual_receive, "1.99");
    }

    #[test]
    fn test_waived_drops_fee() {
        let f = fee(Some("0.1"), None, PlatformFeeMode::Subtract);
        let split = split_amount(10_000, Some(&f), 8).unwrap().waived();
        assert_eq!(split.platform_fee_raw, 0);
        assert_eq!(split.actual_receive, 10_000);
    }
}
