//! 单位换算
//!
//! 所有金额在引擎内部都以链的最小单位（sats / wei / lamports / sun）的整数表示，
//! 只有在边界处（用户输入、展示）才与十进制字符串互转。全程不使用浮点数。

use std::str::FromStr;

use ethers::types::U256;
use rust_decimal::Decimal;

use crate::error::{Result, WalletError};

/// 面额：最小单位与展示单位之间的换算规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denomination {
    pub symbol: &'static str,
    pub decimals: u8,
}

pub const SATOSHI: Denomination = Denomination {
    symbol: "BTC",
    decimals: 8,
};
pub const WEI: Denomination = Denomination {
    symbol: "ETH",
    decimals: 18,
};
pub const LAMPORT: Denomination = Denomination {
    symbol: "SOL",
    decimals: 9,
};
pub const SUN: Denomination = Denomination {
    symbol: "TRX",
    decimals: 6,
};

impl Denomination {
    /// 人类可读金额 -> 最小单位
    pub fn to_base(&self, amount: &str) -> Result<u128> {
        parse_units(amount, self.decimals)
    }

    /// 最小单位 -> 人类可读金额
    pub fn to_human(&self, value: u128) -> String {
        format_units(value, self.decimals)
    }
}

/// 解析十进制字符串为最小单位整数
///
/// 拒绝负数、科学计数法以及超出精度的小数位（不做静默截断）。
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(WalletError::invalid_arg("amount is empty"));
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(WalletError::invalid_arg(format!("invalid amount: {amount}")));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(WalletError::invalid_arg(format!("invalid amount: {amount}")));
    }
    if frac_part.len() > decimals as usize {
        return Err(WalletError::invalid_arg(format!(
            "amount {amount} has more than {decimals} decimal places"
        )));
    }

    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    for _ in frac_part.len()..decimals as usize {
        digits.push('0');
    }

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse::<u128>()
        .map_err(|_| WalletError::invalid_arg(format!("amount out of range: {amount}")))
}

/// 最小单位整数 -> 十进制字符串（去掉末尾多余的 0）
pub fn format_units(value: u128, decimals: u8) -> String {
    let raw = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return raw;
    }

    let padded = if raw.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - raw.len() + 1), raw)
    } else {
        raw
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// 按百分比取整（向下取整）
///
/// `percent` 为十进制字符串，例如 "0.5" 表示 0.5%。取值范围 [0, 100]。
pub fn apply_percent(value: u128, percent: &str) -> Result<u128> {
    let pct = Decimal::from_str(percent.trim())
        .map_err(|_| WalletError::invalid_arg(format!("invalid percent: {percent}")))?;
    if pct.is_sign_negative() || pct > Decimal::from(100) {
        return Err(WalletError::invalid_arg(format!(
            "percent must be within [0, 100]: {percent}"
        )));
    }

    let mantissa = u128::try_from(pct.mantissa())
        .map_err(|_| WalletError::invalid_arg(format!("invalid percent: {percent}")))?;
    let denominator = U256::from(100u8) * U256::exp10(pct.scale() as usize);
    let result = U256::from(value) * U256::from(mantissa) / denominator;
    // result <= value，必然落在 u128 内
    Ok(result.as_u128())
}

/// value * numerator / denominator，向下取整
pub fn mul_ratio(value: u128, numerator: u128, denominator: u128) -> Result<u128> {
    if denominator == 0 {
        return Err(WalletError::internal("ratio denominator is zero"));
    }
    let result = U256::from(value) * U256::from(numerator) / U256::from(denominator);
    if result > U256::from(u128::MAX) {
        return Err(WalletError::internal("ratio result overflows u128"));
    }
    Ok(result.as_u128())
}

/// U256 -> u128，超出范围报错
pub fn u256_to_u128(value: U256) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        return Err(WalletError::internal(format!(
            "value {value} exceeds supported range"
        )));
    }
    Ok(value.as_u128())
}
