//! Tron 签名器
//!
//! 资源模型：带宽（按序列化字节）+ 能量（合约调用）。只对超出免费/质押额度的部分燃烧 TRX：
//! `fee = max(0, bytes − bandwidthLeft)·bandwidthPrice + max(0, energy − energyLeft)·energyPrice`。
//!
//! 交易由节点（TronGrid `/wallet/*`）构造，本地只做校验和签名：
//! 签名前确认 `txID == sha256(raw_data_hex)`，并核对合约参数与意图一致。

use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    types::{Address, U256},
};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use super::{
    evm::{decode_string, decode_uint},
    expect_variant, AccountBook, ChainSigner, PayloadKind, SignedPayload, TxRole, UnsignedTx,
};
use crate::{
    domain::{
        platform_fee::{split_amount, FeeSplit},
        units::{format_units, parse_units, u256_to_u128},
        Capabilities, ChainKind, Direction, FeeDetails, FeeQuote, HistoryItem, HistoryPage,
        HistoryQuery, IntentKind, MessageRequest, MessageScheme, TokenBook, TokenInfo,
        TransferIntent, TronFeeDetails, TxStatus, WalletInfo,
    },
    error::{Result, WalletError},
    infrastructure::rpc::RestTransport,
    service::keyring::KeyHandle,
    utils::address_validator::{tron_address_to_bytes, tron_normalize},
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 常量
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// feeLimit 下限（1 TRX）
pub const MIN_FEE_LIMIT_SUN: u64 = 1_000_000;
/// feeLimit 上限（100 TRX）
pub const MAX_FEE_LIMIT_SUN: u64 = 100_000_000;
/// feeLimit = 能量成本 × 1.25
const FEE_LIMIT_MARGIN_PERCENT: u64 = 25;

/// 链参数不可用时的默认单价
const DEFAULT_BANDWIDTH_PRICE: u64 = 1_000;
const DEFAULT_ENERGY_PRICE: u64 = 420;

/// 签名字段（tag + len + 65 字节）
const SIGNATURE_BYTES: u64 = 67;
/// raw_data 外层 protobuf 封装
const ENVELOPE_BYTES: u64 = 3;
/// 节点按交易结果预留的字节数
const MAX_RESULT_SIZE_IN_TX: u64 = 64;

const TRANSFER_SELECTOR: &str = "transfer(address,uint256)";
const TRANSFER_METHOD_ID: &str = "a9059cbb";

const TRON_MESSAGE_PREFIX: &str = "\x19TRON Signed Message:\n";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 资源计费
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 账户当前可用资源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub bandwidth_left: u64,
    pub energy_left: u64,
    pub bandwidth_price: u64,
    pub energy_price: u64,
}

/// 按资源缺口计算燃烧的 SUN
pub fn resource_fee(bytes: u64, energy: u64, resources: &ResourceSnapshot) -> (u64, TronFeeDetails) {
    let bandwidth_shortfall = bytes.saturating_sub(resources.bandwidth_left);
    let energy_shortfall = energy.saturating_sub(resources.energy_left);
    let fee = bandwidth_shortfall
        .saturating_mul(resources.bandwidth_price)
        .saturating_add(energy_shortfall.saturating_mul(resources.energy_price));
    let details = TronFeeDetails {
        bandwidth_required: bytes,
        bandwidth_available: resources.bandwidth_left,
        bandwidth_shortfall,
        energy_required: energy,
        energy_available: resources.energy_left,
        energy_shortfall,
        bandwidth_price: resources.bandwidth_price,
        energy_price: resources.energy_price,
        fee_limit: None,
        platform_fee: None,
    };
    (fee, details)
}

/// feeLimit = 能量成本 × 1.25，限制在 [MIN, MAX]
pub fn fee_limit_for(energy: u64, energy_price: u64) -> u64 {
    let cost = energy.saturating_mul(energy_price);
    let with_margin = cost.saturating_add(cost.saturating_mul(FEE_LIMIT_MARGIN_PERCENT) / 100);
    with_margin.clamp(MIN_FEE_LIMIT_SUN, MAX_FEE_LIMIT_SUN)
}

/// 签名后的交易在链上占用的带宽字节数
pub fn bandwidth_bytes(raw_data_hex: &str) -> u64 {
    (raw_data_hex.len() / 2) as u64 + ENVELOPE_BYTES + SIGNATURE_BYTES + MAX_RESULT_SIZE_IN_TX
}

/// TRC-20 `transfer(address,uint256)` 参数（不含 selector）
pub fn trc20_transfer_parameter(to: &[u8; 20], amount: u128) -> String {
    hex::encode(abi::encode(&[
        Token::Address(Address::from(*to)),
        Token::Uint(U256::from(amount)),
    ]))
}

fn address_parameter(address: &[u8; 20]) -> String {
    hex::encode(abi::encode(&[Token::Address(Address::from(*address))]))
}

/// `41 || 20 字节` 十六进制，raw_data_hex 中的地址形式
fn tron_hex(raw: &[u8; 20]) -> String {
    format!("41{}", hex::encode(raw))
}

/// 节点错误信息有时是 hex 编码的
fn node_message(value: &Value) -> String {
    let raw = value
        .pointer("/result/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("Error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown node error");
    hex::decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn parse_address(address: &str) -> Result<[u8; 20]> {
    tron_address_to_bytes(&tron_normalize(address.trim()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 交易
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 未签名的 Tron 交易（节点返回的 JSON）及签名前需要核对的预期值
#[derive(Debug, Clone)]
pub struct TronUnsigned {
    pub tx: Value,
    pub tx_id: String,
    /// Base58 收款地址
    pub to: String,
    pub amount: u128,
    /// TRC-20 合约（Base58）；原生 TRX 为 None
    pub token_contract: Option<String>,
    pub fee_limit: Option<u64>,
    pub role: TxRole,
}

#[derive(Debug, Clone)]
struct TronLeg {
    role: TxRole,
    to: String,
    to_bytes: [u8; 20],
    amount: u128,
}

struct TronPlan {
    legs: Vec<TronLeg>,
    split: FeeSplit,
    decimals: u8,
    token: Option<String>,
}

struct Draft {
    tx: Value,
    bytes: u64,
    energy: u64,
}

pub struct TronSigner {
    info: WalletInfo,
    capabilities: Capabilities,
    accounts: AccountBook,
    tokens: TokenBook,
    api: Arc<dyn RestTransport>,
    history: Arc<dyn RestTransport>,
}

impl TronSigner {
    pub fn new(info: WalletInfo, key: KeyHandle, api: Arc<dyn RestTransport>) -> Self {
        Self {
            info,
            capabilities: Capabilities::for_kind(ChainKind::Tron),
            accounts: AccountBook::new(key),
            tokens: TokenBook::new(),
            history: api.clone(),
            api,
        }
    }

    /// 历史记录使用单独的 TronGrid 实例
    pub fn with_history(mut self, history: Arc<dyn RestTransport>) -> Self {
        self.history = history;
        self
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.api
            .post_json(path, body)
            .await
            .map_err(WalletError::from_transport)
    }

    fn owner(&self) -> Result<(KeyHandle, String)> {
        let key = self.accounts.active_key()?;
        let address = key.address().to_string();
        Ok((key, address))
    }

    /// 常量调用（不上链）
    async fn constant_call(
        &self,
        owner: &str,
        contract: &str,
        selector: &str,
        parameter: String,
    ) -> Result<Value> {
        let response = self
            .post(
                "/wallet/triggerconstantcontract",
                json!({
                    "owner_address": owner,
                    "contract_address": contract,
                    "function_selector": selector,
                    "parameter": parameter,
                    "visible": true,
                }),
            )
            .await?;
        if response.pointer("/result/result").and_then(Value::as_bool) != Some(true) {
            return Err(WalletError::network(format!(
                "{selector} on {contract} failed: {}",
                node_message(&response)
            )));
        }
        Ok(response)
    }

    fn constant_result(response: &Value) -> Option<&str> {
        response.pointer("/constant_result/0").and_then(Value::as_str)
    }

    /// TRC-20 元数据：已注册优先，否则链上查询
    pub async fn token_metadata(&self, contract: &str) -> Result<TokenInfo> {
        if let Some(token) = self.tokens.get(contract) {
            return Ok(token);
        }
        let (_, owner) = self.owner()?;
        let unknown = || WalletError::unknown_token(format!("cannot resolve TRC-20 token {contract}"));

        let decimals = self
            .constant_call(&owner, contract, "decimals()", String::new())
            .await
            .map_err(|_| unknown())?;
        let decimals = Self::constant_result(&decimals)
            .and_then(|r| decode_uint(r).ok())
            .filter(|d| *d <= U256::from(u8::MAX))
            .map(|d| d.as_u32() as u8)
            .ok_or_else(unknown)?;
        let symbol = match self.constant_call(&owner, contract, "symbol()", String::new()).await {
            Ok(response) => Self::constant_result(&response).and_then(decode_string),
            Err(_) => None,
        }
        .unwrap_or_else(|| "TRC20".to_string());
        Ok(TokenInfo::new(contract, symbol, decimals))
    }

    pub async fn resources(&self, owner: &str) -> Result<ResourceSnapshot> {
        let account = self
            .post("/wallet/getaccountresource", json!({ "address": owner, "visible": true }))
            .await?;
        let field = |name: &str| account.get(name).and_then(Value::as_u64).unwrap_or(0);
        let free = field("freeNetLimit").saturating_sub(field("freeNetUsed"));
        let staked = field("NetLimit").saturating_sub(field("NetUsed"));
        let energy = field("EnergyLimit").saturating_sub(field("EnergyUsed"));

        let (bandwidth_price, energy_price) = self.resource_prices().await;
        Ok(ResourceSnapshot {
            bandwidth_left: free + staked,
            energy_left: energy,
            bandwidth_price,
            energy_price,
        })
    }

    async fn resource_prices(&self) -> (u64, u64) {
        let params = match self.post("/wallet/getchainparameters", json!({})).await {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(error = %e, "chain parameters unavailable, using default prices");
                return (DEFAULT_BANDWIDTH_PRICE, DEFAULT_ENERGY_PRICE);
            }
        };
        let lookup = |key: &str| {
            params
                .get("chainParameter")
                .and_then(Value::as_array)
                .and_then(|items| {
                    items
                        .iter()
                        .find(|p| p.get("key").and_then(Value::as_str) == Some(key))
                })
                .and_then(|p| p.get("value").and_then(Value::as_u64))
        };
        (
            lookup("getTransactionFee").unwrap_or(DEFAULT_BANDWIDTH_PRICE),
            lookup("getEnergyFee").unwrap_or(DEFAULT_ENERGY_PRICE),
        )
    }

    async fn plan(&self, intent: &TransferIntent) -> Result<TronPlan> {
        self.capabilities.require(self.info.chain, intent.kind)?;
        let to_bytes = parse_address(&intent.to)?;
        let to = tron_normalize(intent.to.trim());
        let fee_receiver = match intent.platform_fee.as_ref() {
            Some(fee) => Some((tron_normalize(fee.receiver.trim()), parse_address(&fee.receiver)?)),
            None => None,
        };

        let (decimals, token) = match intent.kind {
            IntentKind::NativeTransfer => (self.info.decimals, None),
            IntentKind::TokenTransfer => {
                let contract = intent
                    .token_address
                    .as_deref()
                    .ok_or_else(|| WalletError::invalid_arg("token transfer requires a contract"))?;
                parse_address(contract)?;
                let contract = tron_normalize(contract.trim());
                let meta = self.token_metadata(&contract).await?;
                (meta.decimals, Some(contract))
            }
            IntentKind::ContractCall => {
                return Err(WalletError::not_supported("contract calls are not supported on tron"))
            }
        };

        let amount = parse_units(&intent.amount, decimals)?;
        if amount == 0 {
            return Err(WalletError::invalid_arg("amount must be greater than zero"));
        }
        let split = split_amount(amount, intent.platform_fee.as_ref(), decimals)?;
        let mut legs = vec![TronLeg {
            role: TxRole::Main,
            to,
            to_bytes,
            amount: split.actual_receive,
        }];
        if let (Some((receiver, receiver_bytes)), true) = (fee_receiver, split.has_fee()) {
            legs.push(TronLeg {
                role: TxRole::PlatformFee,
                to: receiver,
                to_bytes: receiver_bytes,
                amount: split.platform_fee_raw,
            });
        }
        Ok(TronPlan {
            legs,
            split,
            decimals,
            token,
        })
    }

    /// 让节点构造真实交易以测量字节数和能量
    ///
    /// `fee_limit` 为 None 时 TRC-20 只做常量调用（估算）；否则构造可签名的合约交易。
    async fn draft(
        &self,
        owner: &str,
        leg: &TronLeg,
        token: Option<&str>,
        fee_limit: Option<u64>,
    ) -> Result<Draft> {
        match token {
            None => {
                let amount = u64::try_from(leg.amount)
                    .map_err(|_| WalletError::invalid_arg("amount exceeds u64"))?;
                let tx = self
                    .post(
                        "/wallet/createtransaction",
                        json!({
                            "owner_address": owner,
                            "to_address": leg.to,
                            "amount": amount,
                            "visible": true,
                        }),
                    )
                    .await?;
                if tx.get("txID").is_none() {
                    let message = node_message(&tx);
                    if message.contains("balance is not sufficient") {
                        return Err(WalletError::insufficient_funds(message));
                    }
                    return Err(WalletError::network(format!("createtransaction failed: {message}")));
                }
                let bytes = bandwidth_bytes(super::json_str(&tx, "/raw_data_hex")?);
                Ok(Draft { tx, bytes, energy: 0 })
            }
            Some(contract) => {
                let parameter = trc20_transfer_parameter(&leg.to_bytes, leg.amount);
                let trial = self
                    .constant_call(owner, contract, TRANSFER_SELECTOR, parameter.clone())
                    .await?;
                let energy = trial.get("energy_used").and_then(Value::as_u64).unwrap_or(0)
                    + trial.get("energy_penalty").and_then(Value::as_u64).unwrap_or(0);

                let Some(fee_limit) = fee_limit else {
                    let tx = trial.get("transaction").cloned().unwrap_or(Value::Null);
                    let bytes = bandwidth_bytes(super::json_str(&tx, "/raw_data_hex")?);
                    return Ok(Draft { tx, bytes, energy });
                };

                let response = self
                    .post(
                        "/wallet/triggersmartcontract",
                        json!({
                            "owner_address": owner,
                            "contract_address": contract,
                            "function_selector": TRANSFER_SELECTOR,
                            "parameter": parameter,
                            "fee_limit": fee_limit,
                            "call_value": 0,
                            "visible": true,
                        }),
                    )
                    .await?;
                if response.pointer("/result/result").and_then(Value::as_bool) != Some(true) {
                    return Err(WalletError::network(format!(
                        "triggersmartcontract failed: {}",
                        node_message(&response)
                    )));
                }
                let tx = response.get("transaction").cloned().unwrap_or(Value::Null);
                let bytes = bandwidth_bytes(super::json_str(&tx, "/raw_data_hex")?);
                Ok(Draft { tx, bytes, energy })
            }
        }
    }

    /// 签名前核对：txID 与 raw_data_hex 一致，合约参数与意图一致
    fn verify_unsigned(&self, owner: &str, unsigned: &TronUnsigned) -> Result<Vec<u8>> {
        let raw_hex = super::json_str(&unsigned.tx, "/raw_data_hex")?;
        let raw = hex::decode(raw_hex)
            .map_err(|_| WalletError::rejected("raw_data_hex is not valid hex"))?;
        let digest = Sha256::digest(&raw);
        let node_tx_id = unsigned.tx.get("txID").and_then(Value::as_str).unwrap_or_default();
        let computed = hex::encode(digest);
        if !computed.eq_ignore_ascii_case(node_tx_id) || !computed.eq_ignore_ascii_case(&unsigned.tx_id) {
            return Err(WalletError::rejected(format!(
                "txID {node_tx_id} does not match sha256(raw_data_hex) {computed}"
            )));
        }

        let contract = unsigned
            .tx
            .pointer("/raw_data/contract/0")
            .ok_or_else(|| WalletError::rejected("transaction has no contract"))?;
        let value = contract
            .pointer("/parameter/value")
            .ok_or_else(|| WalletError::rejected("transaction contract has no parameters"))?;
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(tron_normalize);
        if field("owner_address").as_deref() != Some(owner) {
            return Err(WalletError::rejected("transaction owner is not the active account"));
        }

        let to_bytes = parse_address(&unsigned.to)?;
        let raw_lower = raw_hex.to_ascii_lowercase();
        match unsigned.token_contract.as_deref() {
            None => {
                let amount = value.get("amount").and_then(Value::as_u64).map(u128::from);
                if contract.get("type").and_then(Value::as_str) != Some("TransferContract")
                    || field("to_address").as_deref() != Some(unsigned.to.as_str())
                    || amount != Some(unsigned.amount)
                    || !raw_lower.contains(&tron_hex(&to_bytes))
                {
                    return Err(WalletError::rejected(
                        "transfer parameters do not match the intent",
                    ));
                }
            }
            Some(token) => {
                let expected_data = format!(
                    "{TRANSFER_METHOD_ID}{}",
                    trc20_transfer_parameter(&to_bytes, unsigned.amount)
                );
                let data = value
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if contract.get("type").and_then(Value::as_str) != Some("TriggerSmartContract")
                    || field("contract_address").as_deref() != Some(token)
                    || data != expected_data
                    || !raw_lower.contains(&expected_data)
                {
                    return Err(WalletError::rejected(
                        "contract call parameters do not match the intent",
                    ));
                }
            }
        }
        Ok(digest.to_vec())
    }

    async fn account_balance(&self, owner: &str) -> Result<u128> {
        let account = self
            .post("/wallet/getaccount", json!({ "address": owner, "visible": true }))
            .await?;
        // 未激活账户返回空对象
        Ok(account.get("balance").and_then(Value::as_u64).unwrap_or(0) as u128)
    }

    async fn trc20_balance(&self, owner: &str, contract: &str) -> Result<u128> {
        let owner_bytes = parse_address(owner)?;
        let response = self
            .constant_call(owner, contract, "balanceOf(address)", address_parameter(&owner_bytes))
            .await?;
        let result = Self::constant_result(&response)
            .ok_or_else(|| WalletError::network("balanceOf returned no result"))?;
        u256_to_u128(decode_uint(result)?)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 历史记录
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn native_item(&self, owner: &str, tx: &Value) -> Option<HistoryItem> {
        let contract = tx.pointer("/raw_data/contract/0")?;
        if contract.get("type").and_then(Value::as_str) != Some("TransferContract") {
            return None;
        }
        let value = contract.pointer("/parameter/value")?;
        let from = tron_normalize(value.get("owner_address")?.as_str()?);
        let to = tron_normalize(value.get("to_address")?.as_str()?);
        let amount = value.get("amount").and_then(Value::as_u64).unwrap_or(0);
        let hash = tx.get("txID")?.as_str()?.to_string();
        let status = match tx.pointer("/ret/0/contractRet").and_then(Value::as_str) {
            Some("SUCCESS") => TxStatus::Confirmed,
            Some(_) => TxStatus::Failed,
            None => TxStatus::Pending,
        };
        let fee = tx.pointer("/ret/0/fee").and_then(Value::as_u64).unwrap_or(0)
            + tx.get("net_fee").and_then(Value::as_u64).unwrap_or(0);

        Some(HistoryItem {
            explorer_url: self.info.tx_url(&hash),
            hash,
            direction: if from == owner { Direction::Out } else { Direction::In },
            value: format_units(amount as u128, self.info.decimals),
            symbol: self.info.symbol.clone(),
            timestamp: tx.get("block_timestamp").and_then(Value::as_i64).unwrap_or(0) / 1000,
            block_number: tx.get("blockNumber").and_then(Value::as_u64),
            status: Some(status),
            from: Some(from),
            to: Some(to),
            fee: Some(format_units(fee as u128, self.info.decimals)),
        })
    }

    fn token_item(&self, owner: &str, tx: &Value) -> Option<HistoryItem> {
        let hash = tx.get("transaction_id")?.as_str()?.to_string();
        let from = tron_normalize(tx.get("from")?.as_str()?);
        let to = tron_normalize(tx.get("to")?.as_str()?);
        let decimals = tx
            .pointer("/token_info/decimals")
            .and_then(Value::as_u64)
            .and_then(|d| u8::try_from(d).ok())
            .unwrap_or(0);
        let raw: u128 = tx.get("value").and_then(Value::as_str)?.parse().ok()?;
        let symbol = tx
            .pointer("/token_info/symbol")
            .and_then(Value::as_str)
            .unwrap_or("TRC20")
            .to_string();

        Some(HistoryItem {
            explorer_url: self.info.tx_url(&hash),
            hash,
            direction: if from == owner { Direction::Out } else { Direction::In },
            value: format_units(raw, decimals),
            symbol,
            timestamp: tx.get("block_timestamp").and_then(Value::as_i64).unwrap_or(0) / 1000,
            block_number: None,
            status: Some(TxStatus::Confirmed),
            from: Some(from),
            to: Some(to),
            fee: None,
        })
    }
}

fn recoverable_signature(key: &SigningKey, digest: &[u8]) -> Result<[u8; 65]> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .map_err(|e| WalletError::internal(format!("signing failed: {e}")))?;
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = 27 + recovery_id.to_byte();
    Ok(out)
}

/// signMessageV2 摘要：keccak256("\x19TRON Signed Message:\n" + len + message)
pub fn tron_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(TRON_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

#[async_trait]
impl ChainSigner for TronSigner {
    fn wallet_info(&self) -> &WalletInfo {
        &self.info
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn account_book(&self) -> &AccountBook {
        &self.accounts
    }

    fn token_book(&self) -> &TokenBook {
        &self.tokens
    }

    async fn estimate(&self, intent: &TransferIntent) -> Result<FeeQuote> {
        let plan = self.plan(intent).await?;
        let (_, owner) = self.owner()?;

        let mut bytes = 0;
        let mut energy = 0;
        for leg in &plan.legs {
            let draft = self.draft(&owner, leg, plan.token.as_deref(), None).await?;
            bytes += draft.bytes;
            energy += draft.energy;
        }
        let resources = self.resources(&owner).await?;
        let (fee, mut details) = resource_fee(bytes, energy, &resources);
        if plan.token.is_some() {
            details.fee_limit = Some(fee_limit_for(energy, resources.energy_price));
        }
        let receiver = intent.platform_fee.as_ref().map(|f| f.receiver.as_str());
        details.platform_fee = intent
            .platform_fee
            .as_ref()
            .map(|_| plan.split.breakdown(plan.decimals, receiver));

        Ok(FeeQuote {
            fee: format_units(fee as u128, self.info.decimals),
            fee_symbol: self.info.symbol.clone(),
            fee_raw: fee as u128,
            details: FeeDetails::Tron(details),
        })
    }

    async fn build(&self, intent: &TransferIntent) -> Result<Vec<UnsignedTx>> {
        let plan = self.plan(intent).await?;
        let (_, owner) = self.owner()?;
        let resources = self.resources(&owner).await?;

        let mut drafts = Vec::with_capacity(plan.legs.len());
        let mut bytes = 0;
        let mut energy = 0;
        for leg in &plan.legs {
            let fee_limit = match plan.token {
                Some(_) => {
                    // 先测量能量，再按测量值设置 feeLimit
                    let trial = self.draft(&owner, leg, plan.token.as_deref(), None).await?;
                    Some(fee_limit_for(trial.energy, resources.energy_price))
                }
                None => None,
            };
            let draft = self.draft(&owner, leg, plan.token.as_deref(), fee_limit).await?;
            bytes += draft.bytes;
            energy += draft.energy;
            drafts.push((leg.clone(), draft, fee_limit));
        }

        let (fee, _) = resource_fee(bytes, energy, &resources);
        let trx = self.account_balance(&owner).await?;
        match plan.token.as_deref() {
            Some(contract) => {
                let balance = self.trc20_balance(&owner, contract).await?;
                let outflow = plan.split.sender_outflow()?;
                if balance < outflow {
                    return Err(WalletError::insufficient_funds(format!(
                        "token balance {} is below {}",
                        format_units(balance, plan.decimals),
                        format_units(outflow, plan.decimals)
                    )));
                }
                if trx < fee as u128 {
                    return Err(WalletError::insufficient_funds(format!(
                        "TRX balance {} cannot cover resource fee {}",
                        format_units(trx, self.info.decimals),
                        format_units(fee as u128, self.info.decimals)
                    )));
                }
            }
            None => {
                let required = plan
                    .split
                    .sender_outflow()?
                    .checked_add(fee as u128)
                    .ok_or_else(|| WalletError::invalid_arg("amount overflows"))?;
                if trx < required {
                    return Err(WalletError::insufficient_funds(format!(
                        "TRX balance {} is below amount + fee {}",
                        format_units(trx, self.info.decimals),
                        format_units(required, self.info.decimals)
                    )));
                }
            }
        }

        tracing::info!(
            chain = %self.info.chain,
            txs = drafts.len(),
            bandwidth = bytes,
            energy = energy,
            fee_sun = fee,
            "tron transactions built"
        );

        drafts
            .into_iter()
            .map(|(leg, draft, fee_limit)| {
                let tx_id = super::json_str(&draft.tx, "/txID")?.to_string();
                Ok(UnsignedTx::Tron(TronUnsigned {
                    tx: draft.tx,
                    tx_id,
                    to: leg.to,
                    amount: leg.amount,
                    token_contract: plan.token.clone(),
                    fee_limit,
                    role: leg.role,
                }))
            })
            .collect()
    }

    async fn sign(&self, unsigned: Vec<UnsignedTx>) -> Result<Vec<SignedPayload>> {
        let (key, owner) = self.owner()?;
        let mut signed = Vec::with_capacity(unsigned.len());
        for tx in unsigned {
            let unsigned_tx = expect_variant!(tx, Tron, self.info.chain)?;
            let digest = self.verify_unsigned(&owner, &unsigned_tx)?;

            let signature = key.with_secret(|secret| {
                let signing_key = secret.secp256k1_signing_key()?;
                recoverable_signature(&signing_key, &digest)
            })?;
            let signature_hex = hex::encode(signature);

            let mut tx = unsigned_tx.tx;
            tx["signature"] = json!([signature_hex]);
            let raw = serde_json::to_string(&tx)
                .map_err(|e| WalletError::internal(format!("cannot serialize transaction: {e}")))?;
            signed.push(SignedPayload::new(
                PayloadKind::Tx,
                raw,
                Some(signature_hex),
                self.info.chain,
                &owner,
            ));
        }
        Ok(signed)
    }

    async fn send(&self, signed: Vec<SignedPayload>) -> Result<Vec<String>> {
        let (_, owner) = self.owner()?;
        let mut txids = Vec::with_capacity(signed.len());
        for payload in signed {
            payload.ensure_broadcastable(self.info.chain, &owner)?;
            let tx: Value = serde_json::from_str(payload.raw())
                .map_err(|e| WalletError::invalid_arg(format!("signed payload is not JSON: {e}")))?;
            let response = match self.post("/wallet/broadcasttransaction", tx.clone()).await {
                Ok(response) => response,
                Err(e) if !txids.is_empty() => {
                    return Err(WalletError::new(
                        e.kind,
                        format!("{} (already sent: {})", e.message, txids.join(", ")),
                    ))
                }
                Err(e) => return Err(e),
            };
            if response.get("result").and_then(Value::as_bool) != Some(true) {
                let message = node_message(&response);
                let code = response.get("code").and_then(Value::as_str).unwrap_or("FAILED");
                let sent = if txids.is_empty() {
                    String::new()
                } else {
                    format!(" (already sent: {})", txids.join(", "))
                };
                return Err(WalletError::network(format!("broadcast rejected: {code}: {message}{sent}")));
            }
            let txid = response
                .get("txid")
                .and_then(Value::as_str)
                .or_else(|| tx.get("txID").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            tracing::info!(chain = %self.info.chain, txid = %txid, "tron transaction broadcast");
            txids.push(txid);
        }
        Ok(txids)
    }

    async fn sign_message(&self, request: &MessageRequest) -> Result<SignedPayload> {
        self.capabilities
            .require_message(self.info.chain, request.scheme)?;
        if request.scheme != MessageScheme::TronV2 {
            return Err(WalletError::not_supported("tron only signs signMessageV2 messages"));
        }
        let (key, owner) = self.owner()?;
        if tron_normalize(request.from.trim()) != owner {
            return Err(WalletError::rejected(format!(
                "message signer {} is not the active account",
                request.from
            )));
        }
        let digest = tron_message_hash(request.payload.as_bytes());
        let signature = key.with_secret(|secret| {
            let signing_key = secret.secp256k1_signing_key()?;
            recoverable_signature(&signing_key, &digest)
        })?;
        Ok(SignedPayload::new(
            PayloadKind::Message,
            request.payload.clone(),
            Some(format!("0x{}", hex::encode(signature))),
            self.info.chain,
            &owner,
        ))
    }

    async fn get_native_balance(&self) -> Result<u128> {
        let (_, owner) = self.owner()?;
        self.account_balance(&owner).await
    }

    async fn get_token_balance(&self, token_address: &str) -> Result<u128> {
        let (_, owner) = self.owner()?;
        parse_address(token_address)?;
        self.trc20_balance(&owner, &tron_normalize(token_address.trim()))
            .await
    }

    async fn get_transaction_history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let (_, owner) = self.owner()?;
        let mut params = vec![("limit", query.effective_limit().to_string())];
        if let Some(cursor) = query.cursor.as_deref() {
            params.push(("fingerprint", cursor.to_string()));
        }
        let path = match query.token_address.as_deref() {
            Some(contract) => {
                params.push(("contract_address", tron_normalize(contract.trim())));
                format!("/v1/accounts/{owner}/transactions/trc20")
            }
            None => format!("/v1/accounts/{owner}/transactions"),
        };

        let response = self
            .history
            .get_json(&path, &params)
            .await
            .map_err(WalletError::from_transport)?;
        if response.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(WalletError::network(format!(
                "history request failed: {}",
                node_message(&response)
            )));
        }

        let data = response
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let items = data
            .iter()
            .filter_map(|tx| match query.token_address {
                Some(_) => self.token_item(&owner, tx),
                None => self.native_item(&owner, tx),
            })
            .collect();
        let cursor = response
            .pointer("/meta/fingerprint")
            .and_then(Value::as_str)
            .map(String::from);
        Ok(HistoryPage { items, cursor })
    }
}
