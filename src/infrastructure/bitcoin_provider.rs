//! Bitcoin 数据提供方
//!
//! 默认实现对接 Esplora / mempool.space REST 接口：
//! - `GET /address/{a}/utxo`
//! - `GET /v1/fees/recommended`
//! - `POST /tx`（原始交易 hex，返回 txid 文本）
//! - `GET /tx/{txid}/hex`
//! - `GET /address/{a}/txs/mempool`、`GET /address/{a}/txs/chain[/{last_seen_txid}]`

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::rpc::RestTransport;

/// Esplora 每页确认交易数量
pub const CHAIN_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// sats
    pub value: u64,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcTxStatus {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcPrevout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcVin {
    #[serde(default)]
    pub prevout: Option<BtcPrevout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcVout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

/// Esplora 交易结构（只取用到的字段）
#[derive(Debug, Clone, Deserialize)]
pub struct BtcTx {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<BtcVin>,
    #[serde(default)]
    pub vout: Vec<BtcVout>,
    #[serde(default)]
    pub fee: Option<u64>,
    pub status: BtcTxStatus,
}

/// 一页历史：首页含 mempool，后续页只有已确认交易
#[derive(Debug, Clone, Default)]
pub struct BtcHistoryBatch {
    pub mempool: Vec<BtcTx>,
    pub confirmed: Vec<BtcTx>,
}

#[async_trait]
pub trait BitcoinProvider: Send + Sync {
    async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>>;

    /// sats/vB
    async fn fee_rate(&self) -> Result<u64>;

    /// 返回 txid；失败时错误中保留节点原始消息
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String>;

    async fn fetch_raw_tx_hex(&self, txid: &str) -> Result<String>;

    /// `cursor` 为上一页最后一笔已确认交易的 txid
    async fn tx_history(&self, address: &str, cursor: Option<&str>) -> Result<BtcHistoryBatch>;
}

/// Esplora 实现
pub struct EsploraProvider {
    rest: Arc<dyn RestTransport>,
}

impl EsploraProvider {
    pub fn new(rest: Arc<dyn RestTransport>) -> Self {
        Self { rest }
    }
}

#[derive(Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: BtcTxStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    #[serde(default)]
    half_hour_fee: Option<f64>,
    #[serde(default)]
    fastest_fee: Option<f64>,
    #[serde(default)]
    hour_fee: Option<f64>,
}

#[async_trait]
impl BitcoinProvider for EsploraProvider {
    async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>> {
        let value = self
            .rest
            .get_json(&format!("address/{address}/utxo"), &[])
            .await?;
        let utxos: Vec<EsploraUtxo> =
            serde_json::from_value(value).context("Unexpected UTXO response shape")?;
        Ok(utxos
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                confirmed: u.status.confirmed,
            })
            .collect())
    }

    async fn fee_rate(&self) -> Result<u64> {
        let value = self.rest.get_json("v1/fees/recommended", &[]).await?;
        let fees: RecommendedFees =
            serde_json::from_value(value).context("Unexpected fee response shape")?;
        // 费率不是金额，取整到整数 sats/vB（向上）
        let rate = fees
            .half_hour_fee
            .or(fees.hour_fee)
            .or(fees.fastest_fee)
            .context("Fee response has no usable rate")?;
        Ok(rate.max(0.0).ceil() as u64)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        let txid = self.rest.post_text("tx", raw_tx_hex.to_string()).await?;
        Ok(txid.trim().to_string())
    }

    async fn fetch_raw_tx_hex(&self, txid: &str) -> Result<String> {
        let hex = self.rest.get_text(&format!("tx/{txid}/hex")).await?;
        Ok(hex.trim().to_string())
    }

    async fn tx_history(&self, address: &str, cursor: Option<&str>) -> Result<BtcHistoryBatch> {
        match cursor {
            None => {
                let mempool = self
                    .rest
                    .get_json(&format!("address/{address}/txs/mempool"), &[])
                    .await?;
                let confirmed = self
                    .rest
                    .get_json(&format!("address/{address}/txs/chain"), &[])
                    .await?;
                Ok(BtcHistoryBatch {
                    mempool: serde_json::from_value(mempool)
                        .context("Unexpected mempool history shape")?,
                    confirmed: serde_json::from_value(confirmed)
                        .context("Unexpected chain history shape")?,
                })
            }
            Some(last_seen) => {
                let confirmed = self
                    .rest
                    .get_json(&format!("address/{address}/txs/chain/{last_seen}"), &[])
                    .await?;
                Ok(BtcHistoryBatch {
                    mempool: vec![],
                    confirmed: serde_json::from_value(confirmed)
                        .context("Unexpected chain history shape")?,
                })
            }
        }
    }
}
