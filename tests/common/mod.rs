//! 测试辅助模块
//! 提供脚本化的 mock 传输层和固定助记词派生的密钥

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ironcore_engine::{
    domain::{derivation::DerivationContext, ChainId},
    infrastructure::{
        bitcoin_provider::{BitcoinProvider, BtcHistoryBatch, Utxo},
        rpc::{JsonRpcTransport, RestTransport},
        rpc_validator::RpcError,
        vault::MemoryMnemonicStore,
    },
    service::keyring::{KeyHandle, Keyring, KeyringSnapshot},
};
use serde_json::Value;

pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn keyring() -> Keyring {
    Keyring::new(Arc::new(MemoryMnemonicStore::new()), DerivationContext::default())
}

pub fn snapshot() -> KeyringSnapshot {
    keyring()
        .derive_all_chains(MNEMONIC, None)
        .expect("Failed to derive test keyring")
}

pub fn key(chain: ChainId) -> KeyHandle {
    snapshot().account(chain).expect("chain not derived").key.clone()
}

/// 脚本化失败：可选的 JSON-RPC 错误码 + 消息
type Failure = (Option<i64>, String);

/// 按键排队的脚本化响应；队列只剩一个时重复返回
#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<std::result::Result<Value, Failure>>>,
    calls: Vec<(String, Value)>,
}

impl Script {
    fn push(&mut self, key: &str, response: std::result::Result<Value, Failure>) {
        self.responses.entry(key.to_string()).or_default().push_back(response);
    }

    fn next(&mut self, key: &str, params: Value) -> Result<Value> {
        self.calls.push((key.to_string(), params));
        let queue = self
            .responses
            .get_mut(key)
            .ok_or_else(|| anyhow!("no scripted response for {key}"))?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err((None, message))) => Err(anyhow!(message)),
            Some(Err((Some(code), message))) => Err(RpcError { code, message }.into()),
            None => Err(anyhow!("no scripted response for {key}")),
        }
    }
}

/// 脚本化 JSON-RPC（按方法名）
#[derive(Default)]
pub struct MockRpc {
    script: Mutex<Script>,
    delay: Mutex<Option<Duration>>,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: &str, result: Value) -> &Self {
        self.script.lock().unwrap().push(method, Ok(result));
        self
    }

    pub fn fail(&self, method: &str, message: &str) -> &Self {
        self.script.lock().unwrap().push(method, Err((None, message.to_string())));
        self
    }

    /// 以节点错误码失败
    pub fn fail_code(&self, method: &str, code: i64, message: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push(method, Err((Some(code), message.to_string())));
        self
    }

    /// 每次请求前等待，用于观察并发交错
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl JsonRpcTransport for MockRpc {
    fn endpoint(&self) -> &str {
        "mock://rpc"
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().unwrap().next(method, params)
    }
}

/// 脚本化 REST（按路径）
#[derive(Default)]
pub struct MockRest {
    script: Mutex<Script>,
}

impl MockRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, body: Value) -> &Self {
        self.script.lock().unwrap().push(path, Ok(body));
        self
    }

    pub fn fail(&self, path: &str, message: &str) -> &Self {
        self.script.lock().unwrap().push(path, Err((None, message.to_string())));
        self
    }

    pub fn calls(&self, path: &str) -> Vec<Value> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

#[async_trait]
impl RestTransport for MockRest {
    fn base_url(&self) -> &str {
        "mock://rest"
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let query: serde_json::Map<String, Value> = query
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
            .collect();
        self.script.lock().unwrap().next(path, Value::Object(query))
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        self.script.lock().unwrap().next(path, body)
    }

    async fn post_text(&self, path: &str, body: String) -> Result<String> {
        let value = self.script.lock().unwrap().next(path, Value::String(body))?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let value = self.script.lock().unwrap().next(path, Value::Null)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

/// 固定 UTXO / 费率的 Bitcoin 数据源
pub struct MockBitcoinProvider {
    pub utxos: Mutex<Vec<Utxo>>,
    pub fee_rate: u64,
    pub broadcasts: Mutex<Vec<String>>,
    pub history: Mutex<HashMap<Option<String>, BtcHistoryBatch>>,
    pub unspent_calls: Mutex<u32>,
}

impl MockBitcoinProvider {
    pub fn new(utxos: Vec<Utxo>, fee_rate: u64) -> Arc<Self> {
        Arc::new(Self {
            utxos: Mutex::new(utxos),
            fee_rate,
            broadcasts: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            unspent_calls: Mutex::new(0),
        })
    }

    pub fn with_history(self: Arc<Self>, cursor: Option<&str>, batch: BtcHistoryBatch) -> Arc<Self> {
        self.history
            .lock()
            .unwrap()
            .insert(cursor.map(String::from), batch);
        self
    }
}

pub fn utxo(seed: u8, vout: u32, value: u64, confirmed: bool) -> Utxo {
    Utxo {
        txid: hex::encode([seed; 32]),
        vout,
        value,
        confirmed,
    }
}

#[async_trait]
impl BitcoinProvider for MockBitcoinProvider {
    async fn list_unspent(&self, _address: &str) -> Result<Vec<Utxo>> {
        *self.unspent_calls.lock().unwrap() += 1;
        Ok(self.utxos.lock().unwrap().clone())
    }

    async fn fee_rate(&self) -> Result<u64> {
        Ok(self.fee_rate)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        self.broadcasts.lock().unwrap().push(raw_tx_hex.to_string());
        let bytes = hex::decode(raw_tx_hex)?;
        let tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&bytes)?;
        Ok(tx.txid().to_string())
    }

    async fn fetch_raw_tx_hex(&self, txid: &str) -> Result<String> {
        Err(anyhow!("raw transaction {txid} not available"))
    }

    async fn tx_history(&self, _address: &str, cursor: Option<&str>) -> Result<BtcHistoryBatch> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(&cursor.map(String::from))
            .cloned()
            .unwrap_or_default())
    }
}
