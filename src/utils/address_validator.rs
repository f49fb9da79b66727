//! 地址验证与编码
//!
//! 统一各链地址校验：
//! - EVM：0x + 40 hex，含大写字母时校验 EIP-55
//! - Bitcoin：bitcoin crate 解析并核对网络
//! - Solana：Base58，解码后 32 字节
//! - Tron：Base58Check，0x41 前缀 + 20 字节

use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::{
    domain::{ChainId, ChainKind},
    error::{Result, WalletError},
};

const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    pub fn validate(chain: ChainId, address: &str, bitcoin_network: bitcoin::Network) -> bool {
        match chain.kind() {
            ChainKind::Evm => Self::validate_evm_address(address),
            ChainKind::Btc => Self::validate_bitcoin_address(address, bitcoin_network),
            ChainKind::Sol => Self::validate_solana_address(address),
            ChainKind::Tron => tron_address_to_bytes(address).is_ok(),
        }
    }

    /// 无效时返回 INVALID_ADDRESS
    pub fn require(chain: ChainId, address: &str, bitcoin_network: bitcoin::Network) -> Result<()> {
        if Self::validate(chain, address, bitcoin_network) {
            Ok(())
        } else {
            Err(WalletError::invalid_address(format!(
                "invalid {chain} address: {address}"
            )))
        }
    }

    /// 验证EVM地址（支持EIP-55 Checksum）
    pub fn validate_evm_address(address: &str) -> bool {
        let Some(hex_part) = address.strip_prefix("0x") else {
            return false;
        };
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }

        // 全小写或全大写视为未带校验和
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower {
            return Self::verify_eip55_checksum(address);
        }
        true
    }

    /// 验证EIP-55 Checksum
    /// https://eips.ethereum.org/EIPS/eip-55
    fn verify_eip55_checksum(address: &str) -> bool {
        match hex::decode(address[2..].to_lowercase()) {
            Ok(bytes) if bytes.len() == 20 => {
                let mut raw = [0u8; 20];
                raw.copy_from_slice(&bytes);
                evm_checksum_address(&raw) == address
            }
            _ => false,
        }
    }

    pub fn validate_bitcoin_address(address: &str, network: bitcoin::Network) -> bool {
        bitcoin::Address::from_str(address)
            .ok()
            .and_then(|a| a.require_network(network).ok())
            .is_some()
    }

    /// 验证Solana地址（Base58编码，32字节）
    pub fn validate_solana_address(address: &str) -> bool {
        if address.len() < 32 || address.len() > 44 {
            return false;
        }
        matches!(bs58::decode(address).into_vec(), Ok(decoded) if decoded.len() == 32)
    }
}

/// 20 字节 -> EIP-55 校验和地址
pub fn evm_checksum_address(raw: &[u8; 20]) -> String {
    use sha3::Keccak256;

    let lower = hex::encode(raw);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// 解析 EVM 地址（含 EIP-55 校验）
pub fn parse_evm_address(address: &str) -> Result<ethers::types::Address> {
    if !AddressValidator::validate_evm_address(address) {
        return Err(WalletError::invalid_address(format!(
            "invalid EVM address: {address}"
        )));
    }
    ethers::types::Address::from_str(address)
        .map_err(|_| WalletError::invalid_address(format!("invalid EVM address: {address}")))
}

/// 20 字节账户哈希 -> Tron Base58Check 地址 (T...)
pub fn tron_address_from_bytes(raw: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(TRON_ADDRESS_PREFIX);
    payload.extend_from_slice(raw);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

/// Tron Base58Check 地址 -> 20 字节
pub fn tron_address_to_bytes(address: &str) -> Result<[u8; 20]> {
    let invalid = || WalletError::invalid_address(format!("invalid Tron address: {address}"));

    let decoded = bs58::decode(address).into_vec().map_err(|_| invalid())?;
    if decoded.len() != 25 || decoded[0] != TRON_ADDRESS_PREFIX {
        return Err(invalid());
    }
    let checksum = double_sha256(&decoded[..21]);
    if checksum[..4] != decoded[21..] {
        return Err(invalid());
    }
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&decoded[1..21]);
    Ok(raw)
}

/// Tron 十六进制地址（41 + 40 hex）-> Base58
pub fn tron_hex_to_base58(hex_address: &str) -> Option<String> {
    let bytes = hex::decode(hex_address.trim_start_matches("0x")).ok()?;
    match bytes.len() {
        21 if bytes[0] == TRON_ADDRESS_PREFIX => {
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&bytes[1..]);
            Some(tron_address_from_bytes(&raw))
        }
        20 => {
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&bytes);
            Some(tron_address_from_bytes(&raw))
        }
        _ => None,
    }
}

/// Tron 地址统一为 Base58（已是 Base58 则原样返回）
pub fn tron_normalize(address: &str) -> String {
    if address.starts_with('T') {
        address.to_string()
    } else {
        tron_hex_to_base58(address).unwrap_or_else(|| address.to_string())
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}
