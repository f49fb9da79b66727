//! 密钥派生策略
//!
//! 为不同的加密曲线提供统一的派生接口：
//! - secp256k1：BIP-32（EVM / Tron / Bitcoin）
//! - ed25519：SLIP-0010，仅硬化派生（Solana）

use std::fmt;

use anyhow::{Context, Result};
use coins_bip32::path::DerivationPath;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use super::chain::{ChainId, ChainKind, CurveType};
use crate::utils::address_validator::{evm_checksum_address, tron_address_from_bytes};

type HmacSha512 = Hmac<Sha512>;

const HARDENED_OFFSET: u32 = 0x8000_0000;
const ED25519_SEED_KEY: &[u8] = b"ed25519 seed";

/// 派生上下文（与助记词无关的外部参数）
#[derive(Debug, Clone, Copy)]
pub struct DerivationContext {
    pub bitcoin_network: bitcoin::Network,
}

impl Default for DerivationContext {
    fn default() -> Self {
        Self {
            bitcoin_network: bitcoin::Network::Bitcoin,
        }
    }
}

/// 子私钥材料，离开作用域即清零
pub enum SecretMaterial {
    Secp256k1(Zeroizing<[u8; 32]>),
    /// SLIP-0010 派生出的 32 字节 ed25519 种子
    Ed25519(Zeroizing<[u8; 32]>),
}

impl SecretMaterial {
    pub fn curve(&self) -> CurveType {
        match self {
            SecretMaterial::Secp256k1(_) => CurveType::Secp256k1,
            SecretMaterial::Ed25519(_) => CurveType::Ed25519,
        }
    }

    pub fn secp256k1_bytes(&self) -> Result<&[u8; 32]> {
        match self {
            SecretMaterial::Secp256k1(bytes) => Ok(bytes),
            SecretMaterial::Ed25519(_) => anyhow::bail!("expected secp256k1 key material"),
        }
    }

    pub fn secp256k1_signing_key(&self) -> Result<k256::ecdsa::SigningKey> {
        let bytes = self.secp256k1_bytes()?;
        k256::ecdsa::SigningKey::from_slice(bytes).context("Invalid secp256k1 secret key")
    }

    pub fn ed25519_signing_key(&self) -> Result<ed25519_dalek::SigningKey> {
        match self {
            SecretMaterial::Ed25519(bytes) => Ok(ed25519_dalek::SigningKey::from_bytes(bytes)),
            SecretMaterial::Secp256k1(_) => anyhow::bail!("expected ed25519 key material"),
        }
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretMaterial::{:?}([REDACTED])", self.curve())
    }
}

/// 派生结果
#[derive(Debug)]
pub struct DerivedKey {
    pub public_key: Vec<u8>,
    pub address: String,
    pub secret: SecretMaterial,
}

/// 派生策略 trait
pub trait DerivationStrategy: Send + Sync {
    fn derive(
        &self,
        seed: &[u8],
        chain: ChainId,
        path: &str,
        ctx: &DerivationContext,
    ) -> Result<DerivedKey>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secp256k1 策略 (EVM, Tron, Bitcoin)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Secp256k1Strategy;

impl DerivationStrategy for Secp256k1Strategy {
    fn derive(
        &self,
        seed: &[u8],
        chain: ChainId,
        path: &str,
        ctx: &DerivationContext,
    ) -> Result<DerivedKey> {
        use coins_bip32::prelude::*;
        use k256::ecdsa::SigningKey;

        let derivation_path = path
            .parse::<DerivationPath>()
            .context("Invalid derivation path")?;

        let master_key =
            XPriv::root_from_seed(seed, None).context("Failed to derive master key")?;
        let derived_key = master_key
            .derive_path(&derivation_path)
            .context("Failed to derive key")?;

        // XPriv 实现 AsRef<SigningKey>
        let signing_key: &SigningKey = derived_key.as_ref();
        let secret = Zeroizing::new(<[u8; 32]>::from(signing_key.to_bytes()));
        let verifying_key = signing_key.verifying_key();

        let (public_key, address) = match chain.kind() {
            ChainKind::Evm => {
                let uncompressed = verifying_key.to_encoded_point(false);
                let address = evm_checksum_address(&keccak_address(&uncompressed.as_bytes()[1..]));
                (uncompressed.as_bytes().to_vec(), address)
            }
            ChainKind::Tron => {
                let uncompressed = verifying_key.to_encoded_point(false);
                let address = tron_address_from_bytes(&keccak_address(&uncompressed.as_bytes()[1..]));
                (uncompressed.as_bytes().to_vec(), address)
            }
            ChainKind::Btc => {
                let compressed = verifying_key.to_encoded_point(true);
                let address = p2wpkh_address(compressed.as_bytes(), ctx.bitcoin_network)?;
                (compressed.as_bytes().to_vec(), address)
            }
            ChainKind::Sol => anyhow::bail!("Solana keys are not secp256k1"),
        };

        Ok(self::DerivedKey {
            public_key,
            address,
            secret: SecretMaterial::Secp256k1(secret),
        })
    }
}

/// keccak256(未压缩公钥去掉 0x04 前缀) 的后 20 字节
pub fn keccak_address(public_key_xy: &[u8]) -> [u8; 20] {
    use sha3::{Digest, Keccak256};

    let hash = Keccak256::digest(public_key_xy);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// 压缩公钥 -> P2WPKH (bc1q...) 地址
pub fn p2wpkh_address(compressed_pubkey: &[u8], network: bitcoin::Network) -> Result<String> {
    use bitcoin::{secp256k1::PublicKey as Secp256k1PublicKey, Address, PublicKey};

    let secp_pubkey = Secp256k1PublicKey::from_slice(compressed_pubkey)
        .context("Invalid secp256k1 public key")?;
    let address = Address::p2wpkh(&PublicKey::new(secp_pubkey), network)
        .context("Failed to create P2WPKH address")?;
    Ok(address.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ed25519 策略 (Solana)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Ed25519Strategy;

impl DerivationStrategy for Ed25519Strategy {
    fn derive(
        &self,
        seed: &[u8],
        chain: ChainId,
        path: &str,
        _ctx: &DerivationContext,
    ) -> Result<DerivedKey> {
        if chain.curve() != CurveType::Ed25519 {
            anyhow::bail!("{chain} does not use ed25519");
        }
        let secret = slip10_ed25519(seed, path)?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&secret);
        let public_key = signing_key.verifying_key().to_bytes();

        Ok(DerivedKey {
            public_key: public_key.to_vec(),
            // Solana 地址就是公钥的 Base58 编码
            address: bs58::encode(public_key).into_string(),
            secret: SecretMaterial::Ed25519(secret),
        })
    }
}

/// SLIP-0010 ed25519 派生
pub fn slip10_ed25519(seed: &[u8], path: &str) -> Result<Zeroizing<[u8; 32]>> {
    let indices = parse_hardened_path(path)?;

    let mut digest = Zeroizing::new([0u8; 64]);
    hmac_sha512(ED25519_SEED_KEY, &[seed], &mut digest)?;

    for index in indices {
        let mut data = Zeroizing::new(Vec::with_capacity(37));
        data.push(0u8);
        data.extend_from_slice(&digest[..32]);
        data.extend_from_slice(&(index | HARDENED_OFFSET).to_be_bytes());

        let chain_code = Zeroizing::new(digest[32..].to_vec());
        hmac_sha512(&chain_code, &[data.as_slice()], &mut digest)?;
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest[..32]);
    Ok(key)
}

fn hmac_sha512(key: &[u8], parts: &[&[u8]], out: &mut [u8; 64]) -> Result<()> {
    let mut mac = HmacSha512::new_from_slice(key).context("HMAC init failed")?;
    for part in parts {
        mac.update(part);
    }
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(())
}

/// 解析只含硬化层级的路径，返回去掉硬化标记的索引
fn parse_hardened_path(path: &str) -> Result<Vec<u32>> {
    let rest = path
        .strip_prefix("m/")
        .or_else(|| if path == "m" { Some("") } else { None })
        .with_context(|| format!("Invalid derivation path: {path}"))?;

    rest.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let number = segment
                .strip_suffix('\'')
                .or_else(|| segment.strip_suffix('h'))
                .with_context(|| format!("ed25519 only supports hardened derivation: {path}"))?;
            let index: u32 = number
                .parse()
                .with_context(|| format!("Invalid path segment: {segment}"))?;
            if index >= HARDENED_OFFSET {
                anyhow::bail!("Path index out of range: {segment}");
            }
            Ok(index)
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 策略工厂
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DerivationStrategyFactory;

impl DerivationStrategyFactory {
    pub fn create_strategy(curve_type: CurveType) -> Box<dyn DerivationStrategy> {
        match curve_type {
            CurveType::Secp256k1 => Box::new(Secp256k1Strategy),
            CurveType::Ed25519 => Box::new(Ed25519Strategy),
        }
    }

    /// 按链派生账户 `index`
    pub fn derive(
        seed: &[u8],
        chain: ChainId,
        index: u32,
        ctx: &DerivationContext,
    ) -> Result<DerivedKey> {
        let path = chain.derivation_path(index);
        Self::create_strategy(chain.curve()).derive(seed, chain, &path, ctx)
    }
}

#[cfg(test)]
mod tests {
    use bip39::{Language, Mnemonic};

    use super::*;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn seed() -> [u8; 64] {
        Mnemonic::parse_in(Language::English, MNEMONIC)
            .unwrap()
            .to_seed("")
    }

    #[test]
    fn test_ethereum_derivation_vector() {
        let key = DerivationStrategyFactory::derive(
            &seed(),
            ChainId::Ethereum,
            0,
            &DerivationContext::default(),
        )
        .unwrap();
        assert_eq!(
            key.address.to_lowercase(),
            "0x9858effd232b4033e47d90003d23ec58e053e11f"
        );
    }

    #[test]
    fn test_bitcoin_bip84_vector() {
        let key = DerivationStrategyFactory::derive(
            &seed(),
            ChainId::Bitcoin,
            0,
            &DerivationContext::default(),
        )
        .unwrap();
        assert_eq!(key.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(key.public_key.len(), 33);
    }

    #[test]
    fn test_evm_chains_share_address() {
        let ctx = DerivationContext::default();
        let eth = DerivationStrategyFactory::derive(&seed(), ChainId::Ethereum, 0, &ctx).unwrap();
        let bsc = DerivationStrategyFactory::derive(&seed(), ChainId::Bsc, 0, &ctx).unwrap();
        assert_eq!(eth.address, bsc.address);
    }

    #[test]
    fn test_tron_address_format() {
        let key = DerivationStrategyFactory::derive(
            &seed(),
            ChainId::Tron,
            0,
            &DerivationContext::default(),
        )
        .unwrap();
        assert!(key.address.starts_with('T'));
        assert_eq!(key.address.len(), 34);
    }

    #[test]
    fn test_solana_slip10_derivation() {
        let ctx = DerivationContext::default();
        let a = DerivationStrategyFactory::derive(&seed(), ChainId::Solana, 0, &ctx).unwrap();
        let b = DerivationStrategyFactory::derive(&seed(), ChainId::Solana, 1, &ctx).unwrap();
        assert_eq!(bs58::decode(&a.address).into_vec().unwrap().len(), 32);
        assert_ne!(a.address, b.address);
        assert_eq!(a.secret.curve(), CurveType::Ed25519);
    }

    #[test]
    fn test_slip10_master_key_vector() {
        // SLIP-0010 官方测试向量 1（ed25519），路径 m/0'
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let key = slip10_ed25519(&seed, "m/0'").unwrap();
        assert_eq!(
            hex::encode(*key),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }

    #[test]
    fn test_slip10_rejects_non_hardened() {
        assert!(slip10_ed25519(&[0u8; 64], "m/44'/501'/0").is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let key = DerivationStrategyFactory::derive(
            &seed(),
            ChainId::Ethereum,
            0,
            &DerivationContext::default(),
        )
        .unwrap();
        let debug = format!("{:?}", key.secret);
        assert!(debug.contains("REDACTED"));
    }
}
