//! Service 层：密钥环、钱包构建器与多链编排器

pub mod keyring;
pub mod orchestrator;
pub mod wallet_builder;

pub use keyring::{KeyHandle, Keyring, KeyringSnapshot};
pub use orchestrator::{
    AssetEntry, HttpSignerFactory, InitOutcome, Portfolio, SendOutcome, SignerFactory,
    WalletOrchestrator,
};
pub use wallet_builder::{ChainTransports, WalletBuilder};
