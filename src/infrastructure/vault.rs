//! 助记词持久化
//!
//! 引擎只通过 [`MnemonicStore`] 读写一个不透明文档，不关心存储介质。
//! 文件实现使用 AES-256-GCM 加密，密钥由 PBKDF2-SHA256 从口令派生：
//! `salt(16) || nonce(12) || ciphertext`。

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const KEY_LENGTH: usize = 32;

#[async_trait]
pub trait MnemonicStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;
    async fn set(&self, key: &str, document: &[u8]) -> Result<()>;
}

/// 内存实现（测试与临时会话）
#[derive(Default)]
pub struct MemoryMnemonicStore {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryMnemonicStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MnemonicStore for MemoryMnemonicStore {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, document: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Zeroizing::new(document.to_vec()));
        Ok(())
    }
}

/// 加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    /// 从口令派生
    fn derive(password: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Self { key }
    }
}

/// 加密：返回 salt || nonce || ciphertext
pub fn seal(plaintext: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = EncryptionKey::derive(password, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key.key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut out = Vec::with_capacity(SALT_LENGTH + NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// 解密 `seal` 的输出
pub fn open(sealed: &[u8], password: &str) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < SALT_LENGTH + NONCE_LENGTH {
        return Err(anyhow!("Encrypted data too short"));
    }
    let (salt, rest) = sealed.split_at(SALT_LENGTH);
    let (nonce, ciphertext) = rest.split_at(NONCE_LENGTH);
    let key = EncryptionKey::derive(password, salt);

    let cipher = Aes256Gcm::new_from_slice(&key.key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("Decryption failed: wrong password or corrupted vault"))?;
    Ok(Zeroizing::new(plaintext))
}

/// 加密文件实现：文件内容为 JSON `{ key: hex(sealed) }`
pub struct EncryptedFileStore {
    path: PathBuf,
    password: Zeroizing<String>,
    lock: RwLock<()>,
}

impl EncryptedFileStore {
    pub fn new(path: impl AsRef<Path>, password: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            password: Zeroizing::new(password.into()),
            lock: RwLock::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Corrupted vault file: {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read vault: {:?}", self.path)),
        }
    }
}

#[async_trait]
impl MnemonicStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let _guard = self.lock.read().await;
        let entries = self.read_all().await?;
        match entries.get(key) {
            Some(sealed_hex) => {
                let sealed = hex::decode(sealed_hex).context("Corrupted vault entry")?;
                Ok(Some(open(&sealed, &self.password)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, document: &[u8]) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), hex::encode(seal(document, &self.password)?));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write vault: {:?}", self.path))?;
        tracing::debug!(path = ?self.path, "vault entry written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal(b"Hello, World!", "pw").unwrap();
        assert_ne!(&sealed[SALT_LENGTH + NONCE_LENGTH..], b"Hello, World!");
        let opened = open(&sealed, "pw").unwrap();
        assert_eq!(opened.as_slice(), b"Hello, World!");
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = seal(b"secret", "right").unwrap();
        assert!(open(&sealed, "wrong").is_err());
        assert!(open(&sealed[..10], "right").is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryMnemonicStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", b"doc").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().as_slice(), b"doc");
    }

    #[tokio::test]
    async fn test_encrypted_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");

        let store = EncryptedFileStore::new(&path, "correct horse");
        store.set("mnemonic", b"abandon about").await.unwrap();

        // 文件中不应出现明文
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("abandon"));

        let reopened = EncryptedFileStore::new(&path, "correct horse");
        let doc = reopened.get("mnemonic").await.unwrap().unwrap();
        assert_eq!(doc.as_slice(), b"abandon about");

        let wrong = EncryptedFileStore::new(&path, "battery staple");
        assert!(wrong.get("mnemonic").await.is_err());
    }
}
