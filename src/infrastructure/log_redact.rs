//! 日志脱敏
//! 地址、原始交易只显示首尾；错误消息写入日志前清除疑似助记词和私钥的片段

use once_cell::sync::Lazy;
use regex::Regex;

/// 64 位及以上的连续十六进制（私钥、种子）
static LONG_HEX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(0x)?[0-9a-f]{64,}\b").ok());

/// 连续 12 个及以上的小写单词（疑似助记词）
static WORD_RUN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(?:[a-z]{3,8}\s+){11,}[a-z]{3,8}\b").ok());

/// 脱敏十六进制字符串（显示前缀和后缀）
pub fn redact_hex_string(hex: &str, show_chars: usize) -> String {
    if hex.len() <= show_chars * 2 {
        return "*".repeat(hex.len());
    }

    let prefix = &hex[..show_chars];
    let suffix = &hex[hex.len() - show_chars..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 || !address.is_ascii() {
        return "*".repeat(address.len());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 清除消息中的疑似密钥材料
pub fn scrub_secrets(message: &str) -> String {
    let mut scrubbed = message.to_string();
    if let Some(re) = LONG_HEX.as_ref() {
        scrubbed = re.replace_all(&scrubbed, "[REDACTED]").into_owned();
    }
    if let Some(re) = WORD_RUN.as_ref() {
        scrubbed = re.replace_all(&scrubbed, "[REDACTED MNEMONIC]").into_owned();
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hex_string() {
        let hex = "0x1234567890abcdef1234567890abcdef12345678";
        let redacted = redact_hex_string(hex, 10);
        assert_eq!(redacted, "0x12345678...ef12345678");
    }

    #[test]
    fn test_redact_address() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bFd2";
        assert_eq!(redact_address(address), "0x742d...bFd2");
        assert_eq!(redact_address("short"), "*****");
    }

    #[test]
    fn test_scrub_private_key() {
        let msg = format!("failed to sign with key {}", "ab".repeat(32));
        let scrubbed = scrub_secrets(&msg);
        assert!(!scrubbed.contains(&"ab".repeat(32)));
        assert!(scrubbed.contains("[REDACTED]"));
    }

    #[test]
    fn test_scrub_mnemonic() {
        let msg = "Init failed: abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let scrubbed = scrub_secrets(msg);
        assert!(!scrubbed.contains("abandon"));
        assert!(scrubbed.starts_with("Init failed: [REDACTED MNEMONIC]"));
    }

    #[test]
    fn test_scrub_keeps_normal_messages() {
        let msg = "RPC error -32000: insufficient funds for gas * price + value";
        assert_eq!(scrub_secrets(msg), msg);
    }
}
