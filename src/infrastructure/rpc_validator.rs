// RPC响应校验 - 防止畸形的链上数据进入金额计算

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC 2.0 标准错误码：参数无效
pub const INVALID_PARAMS: i64 = -32602;

/// 节点返回的 JSON-RPC `error` 对象
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// 在 anyhow 错误链中查找节点错误
    pub fn find(err: &anyhow::Error) -> Option<&RpcError> {
        err.chain().find_map(|cause| cause.downcast_ref::<RpcError>())
    }
}

/// 解析 0x 十六进制数量为 u128（余额、gas 价格、代币数量）
pub fn parse_quantity_u128(hex_value: &str) -> Result<u128> {
    let digits = strip_hex(hex_value);
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 64 {
        anyhow::bail!("Quantity hex string too long: {}", digits.len());
    }
    let significant = digits.trim_start_matches('0');
    if significant.len() > 32 {
        anyhow::bail!("Quantity exceeds u128: 0x{}", digits);
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(significant, 16).context("Failed to parse quantity from hex")
}

/// 解析 0x 十六进制数量为 u64（nonce、区块号）
pub fn parse_quantity_u64(hex_value: &str) -> Result<u64> {
    let digits = strip_hex(hex_value);
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 16 {
        anyhow::bail!("Quantity hex string too long: {}", digits.len());
    }
    u64::from_str_radix(digits, 16).context("Failed to parse quantity from hex")
}

/// 验证RPC返回的gas值
pub fn validate_gas(gas_hex: &str) -> Result<u64> {
    let gas = parse_quantity_u64(gas_hex).context("Failed to parse gas from hex")?;

    // 单笔交易 gas 不会超过区块上限
    const MAX_REASONABLE_GAS: u64 = 60_000_000;
    if gas > MAX_REASONABLE_GAS {
        anyhow::bail!("Gas exceeds reasonable maximum: {}", gas);
    }
    Ok(gas)
}

/// 验证交易哈希格式（32 字节十六进制）
pub fn validate_tx_hash(tx_hash: &str) -> Result<String> {
    let hash = strip_hex(tx_hash);
    if hash.len() != 64 {
        anyhow::bail!(
            "Invalid transaction hash length: expected 64, got {}",
            hash.len()
        );
    }
    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid transaction hash format: contains non-hex characters");
    }
    Ok(format!("0x{}", hash.to_lowercase()))
}

/// 验证 JSON-RPC 响应并取出 result
pub fn validate_rpc_response(json: Value) -> Result<Value> {
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Err(RpcError { code, message }.into());
    }

    if let Some(version) = json.get("jsonrpc") {
        if version.as_str() != Some("2.0") {
            anyhow::bail!("Unsupported JSON-RPC version: {:?}", version);
        }
    }

    match json {
        Value::Object(mut map) => map
            .remove("result")
            .context("Missing result field in RPC response"),
        _ => anyhow::bail!("RPC response is not an object"),
    }
}

/// 从 JSON 值中取出字符串字段
pub fn require_str<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("Missing string field `{field}`"))
}

fn strip_hex(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
