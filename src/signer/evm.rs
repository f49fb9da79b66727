//! EVM 签名器（Ethereum / BSC / Polygon）
//!
//! 费用模型优先 EIP-1559（`maxFee = 2·baseFee + priority`），节点不支持时回退 legacy gasPrice。
//! 平台服务费作为第二笔交易（nonce + 1）发送，两种模式都一样。

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers::{
    abi::{self, ParamType, Token},
    signers::{LocalWallet, Signer},
    types::{
        transaction::{
            eip2718::TypedTransaction,
            eip712::{Eip712, TypedData},
        },
        Address, Bytes, Eip1559TransactionRequest, NameOrAddress, Signature, TransactionRequest,
        H256, U256,
    },
    utils::hash_message,
};
use serde_json::{json, Value};

use super::{
    expect_variant, AccountBook, ChainSigner, PayloadKind, SignedPayload, TxRole, UnsignedTx,
};
use crate::{
    domain::{
        derivation::SecretMaterial,
        platform_fee::{split_amount, FeeSplit},
        units::{format_units, parse_units, u256_to_u128},
        Capabilities, ChainKind, DappTransactionRequest, Direction, EvmFeeDetails, FeeDetails,
        FeeQuote, GasModel, HistoryItem, HistoryPage, HistoryQuery, IntentKind, MessageRequest,
        MessageScheme, TokenBook, TokenInfo, TransferIntent, TxStatus, WalletInfo,
    },
    error::{Result, WalletError},
    infrastructure::{
        rpc::{JsonRpcTransport, RestTransport},
        rpc_validator::{parse_quantity_u128, parse_quantity_u64, validate_gas, validate_tx_hash},
    },
    service::keyring::KeyHandle,
    utils::address_validator::parse_evm_address,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 常量
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 模拟失败时的 gas 下限
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
pub const TOKEN_TRANSFER_GAS: u64 = 65_000;
pub const CONTRACT_CALL_GAS: u64 = 100_000;

/// `eth_maxPriorityFeePerGas` 不可用时的小费（1.5 gwei）
const DEFAULT_PRIORITY_FEE: u128 = 1_500_000_000;
/// 非原生转账的 gas 余量（百分比）
const GAS_MARGIN_PERCENT: u64 = 20;

const SELECTOR_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const SELECTOR_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
const SELECTOR_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const SELECTOR_SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const SELECTOR_NAME: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];

/// ERC-20 `transfer(address,uint256)` 调用数据
pub fn erc20_transfer_data(to: Address, amount: U256) -> Bytes {
    let mut data = SELECTOR_TRANSFER.to_vec();
    data.extend(abi::encode(&[Token::Address(to), Token::Uint(amount)]));
    Bytes::from(data)
}

fn hex_quantity(value: U256) -> String {
    format!("0x{:x}", value)
}

fn hex_bytes(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn decode_hex_result(result: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(result.trim_start_matches("0x")).context("eth_call returned invalid hex")
}

pub(crate) fn decode_uint(result: &str) -> anyhow::Result<U256> {
    let bytes = decode_hex_result(result)?;
    let tokens = abi::decode(&[ParamType::Uint(256)], &bytes).context("eth_call result is not a uint")?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .context("eth_call result is empty")
}

/// 解析 `string` 返回值；部分老合约返回 bytes32
pub(crate) fn decode_string(result: &str) -> Option<String> {
    let bytes = decode_hex_result(result).ok()?;
    if let Ok(tokens) = abi::decode(&[ParamType::String], &bytes) {
        if let Some(Token::String(s)) = tokens.into_iter().next() {
            return Some(s);
        }
    }
    if bytes.len() == 32 {
        let trimmed: Vec<u8> = bytes.into_iter().take_while(|b| *b != 0).collect();
        return String::from_utf8(trimmed).ok().filter(|s| !s.is_empty());
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 费用数据
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmFees {
    Eip1559 {
        base_fee: u128,
        max_fee: u128,
        priority_fee: u128,
    },
    Legacy {
        gas_price: u128,
    },
}

impl EvmFees {
    /// 每单位 gas 的最高价格
    pub fn price_per_gas(&self) -> u128 {
        match self {
            EvmFees::Eip1559 { max_fee, .. } => *max_fee,
            EvmFees::Legacy { gas_price } => *gas_price,
        }
    }

    fn model(&self) -> GasModel {
        match self {
            EvmFees::Eip1559 { .. } => GasModel::Eip1559,
            EvmFees::Legacy { .. } => GasModel::Legacy,
        }
    }
}

/// 未签名的 EVM 交易
#[derive(Debug, Clone)]
pub struct EvmUnsigned {
    pub tx: TypedTransaction,
    pub role: TxRole,
}

struct EvmTxPlan {
    role: TxRole,
    to: Address,
    value: U256,
    data: Bytes,
    gas_limit: u64,
}

struct EvmPlan {
    txs: Vec<EvmTxPlan>,
    fees: EvmFees,
    split: FeeSplit,
    decimals: u8,
    token: Option<Address>,
}

impl EvmPlan {
    fn network_fee(&self) -> Result<u128> {
        self.txs.iter().try_fold(0u128, |acc, tx| {
            (tx.gas_limit as u128)
                .checked_mul(self.fees.price_per_gas())
                .and_then(|fee| acc.checked_add(fee))
                .ok_or_else(|| WalletError::invalid_arg("network fee overflows"))
        })
    }
}

pub struct EvmSigner {
    info: WalletInfo,
    capabilities: Capabilities,
    accounts: AccountBook,
    tokens: TokenBook,
    chain_id: u64,
    rpc: Arc<dyn JsonRpcTransport>,
    explorer: Option<Arc<dyn RestTransport>>,
    explorer_api_key: Option<String>,
}

impl EvmSigner {
    pub fn new(
        info: WalletInfo,
        chain_id: u64,
        key: KeyHandle,
        rpc: Arc<dyn JsonRpcTransport>,
    ) -> Self {
        Self {
            info,
            capabilities: Capabilities::for_kind(ChainKind::Evm),
            accounts: AccountBook::new(key),
            tokens: TokenBook::new(),
            chain_id,
            rpc,
            explorer: None,
            explorer_api_key: None,
        }
    }

    /// Etherscan 兼容的历史记录接口
    pub fn with_explorer(mut self, explorer: Arc<dyn RestTransport>, api_key: Option<String>) -> Self {
        self.explorer = Some(explorer);
        self.explorer_api_key = api_key;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        self.rpc
            .request(method, params)
            .await
            .map_err(WalletError::from_transport)
    }

    async fn rpc_str(&self, method: &str, params: Value) -> Result<String> {
        let value = self.rpc(method, params).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::network(format!("{method} returned a non-string result")))
    }

    fn active_address(&self) -> Result<(KeyHandle, Address)> {
        let key = self.accounts.active_key()?;
        let address = parse_evm_address(key.address())?;
        Ok((key, address))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 只读调用
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `eth_call`，返回 0x 十六进制结果
    pub async fn call(&self, to: &str, data: &str) -> Result<String> {
        let to = parse_evm_address(to)?;
        self.rpc_str("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    /// `eth_estimateGas` 原始结果（不加余量、不兜底）
    pub async fn estimate_gas(&self, to: &str, value: Option<u128>, data: Option<&str>) -> Result<u64> {
        let (_, from) = self.active_address()?;
        let to = parse_evm_address(to)?;
        let mut request = json!({ "from": from, "to": to });
        if let Some(value) = value {
            request["value"] = json!(hex_quantity(U256::from(value)));
        }
        if let Some(data) = data {
            request["data"] = json!(data);
        }
        let gas = self.rpc_str("eth_estimateGas", json!([request])).await?;
        validate_gas(&gas).map_err(|e| WalletError::network(format!("{e:#}")))
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let number = self.rpc_str("eth_blockNumber", json!([])).await?;
        parse_quantity_u64(&number).map_err(|e| WalletError::network(format!("{e:#}")))
    }

    /// 当前费用数据：EIP-1559 优先，失败回退 legacy
    pub async fn fee_data(&self) -> Result<EvmFees> {
        let base_fee = match self.rpc("eth_getBlockByNumber", json!(["latest", false])).await {
            Ok(block) => block
                .get("baseFeePerGas")
                .and_then(Value::as_str)
                .and_then(|hex| parse_quantity_u128(hex).ok()),
            Err(e) => {
                tracing::debug!(chain = %self.info.chain, error = %e, "latest block unavailable, using legacy gas price");
                None
            }
        };

        if let Some(base_fee) = base_fee {
            let priority_fee = match self.rpc_str("eth_maxPriorityFeePerGas", json!([])).await {
                Ok(hex) => parse_quantity_u128(&hex).unwrap_or(DEFAULT_PRIORITY_FEE),
                Err(_) => DEFAULT_PRIORITY_FEE,
            };
            let max_fee = base_fee
                .checked_mul(2)
                .and_then(|v| v.checked_add(priority_fee))
                .ok_or_else(|| WalletError::network("base fee overflows"))?;
            return Ok(EvmFees::Eip1559 {
                base_fee,
                max_fee,
                priority_fee,
            });
        }

        let gas_price = self.rpc_str("eth_gasPrice", json!([])).await?;
        let gas_price =
            parse_quantity_u128(&gas_price).map_err(|e| WalletError::network(format!("{e:#}")))?;
        Ok(EvmFees::Legacy { gas_price })
    }

    /// gas limit：模拟成功时非原生转账加 20% 余量；模拟失败时使用下限
    async fn gas_limit(&self, from: Address, tx: &EvmTxPlan, kind: IntentKind) -> u64 {
        let request = json!({
            "from": from,
            "to": tx.to,
            "value": hex_quantity(tx.value),
            "data": hex_bytes(&tx.data),
        });
        let simulated = match self.rpc_str("eth_estimateGas", json!([request])).await {
            Ok(hex) => validate_gas(&hex).ok(),
            Err(e) => {
                tracing::warn!(chain = %self.info.chain, error = %e, "gas simulation failed, using floor");
                None
            }
        };
        match (simulated, kind) {
            (Some(gas), IntentKind::NativeTransfer) => gas,
            (Some(gas), _) => gas + gas * GAS_MARGIN_PERCENT / 100,
            (None, IntentKind::NativeTransfer) => NATIVE_TRANSFER_GAS,
            (None, IntentKind::TokenTransfer) => TOKEN_TRANSFER_GAS,
            (None, IntentKind::ContractCall) => CONTRACT_CALL_GAS,
        }
    }

    /// 代币元数据：先查代币簿，再通过 `decimals()` / `symbol()` 查询（不缓存）
    pub async fn token_metadata(&self, token_address: &str) -> Result<TokenInfo> {
        if let Some(token) = self.tokens.get(token_address) {
            return Ok(token);
        }
        let token = parse_evm_address(token_address)?;
        let call = |selector: [u8; 4]| {
            json!([{ "to": token, "data": hex_bytes(&selector) }, "latest"])
        };

        let decimals = self
            .rpc_str("eth_call", call(SELECTOR_DECIMALS))
            .await
            .ok()
            .and_then(|r| decode_uint(&r).ok())
            .filter(|d| *d <= U256::from(u8::MAX))
            .ok_or_else(|| {
                WalletError::unknown_token(format!("cannot resolve decimals of token {token_address}"))
            })?;
        let symbol = match self.rpc_str("eth_call", call(SELECTOR_SYMBOL)).await {
            Ok(r) => decode_string(&r),
            Err(_) => None,
        }
        .ok_or_else(|| WalletError::unknown_token(format!("cannot resolve symbol of token {token_address}")))?;
        let name = match self.rpc_str("eth_call", call(SELECTOR_NAME)).await {
            Ok(r) => decode_string(&r),
            Err(_) => None,
        };

        let mut info = TokenInfo::new(token_address, symbol, decimals.as_u32() as u8);
        if let Some(name) = name {
            info.name = name;
        }
        Ok(info)
    }

    async fn token_balance_of(&self, token: Address, owner: Address) -> Result<u128> {
        let mut data = SELECTOR_BALANCE_OF.to_vec();
        data.extend(abi::encode(&[Token::Address(owner)]));
        let result = self
            .rpc_str("eth_call", json!([{ "to": token, "data": hex_bytes(&data) }, "latest"]))
            .await?;
        let balance = decode_uint(&result).map_err(|e| WalletError::network(format!("{e:#}")))?;
        u256_to_u128(balance)
    }

    async fn native_balance_of(&self, owner: Address) -> Result<u128> {
        let balance = self.rpc_str("eth_getBalance", json!([owner, "latest"])).await?;
        parse_quantity_u128(&balance).map_err(|e| WalletError::network(format!("{e:#}")))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 规划（estimate 与 build 共用）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn plan(&self, intent: &TransferIntent) -> Result<EvmPlan> {
        self.capabilities.require(self.info.chain, intent.kind)?;
        let (_, from) = self.active_address()?;
        let to = parse_evm_address(&intent.to)?;
        let fee_receiver = match intent.platform_fee.as_ref() {
            Some(fee) => Some(parse_evm_address(&fee.receiver)?),
            None => None,
        };

        let (mut txs, split, decimals, token) = match intent.kind {
            IntentKind::NativeTransfer => {
                let decimals = self.info.decimals;
                let amount = parse_units(&intent.amount, decimals)?;
                if amount == 0 {
                    return Err(WalletError::invalid_arg("amount must be greater than zero"));
                }
                let split = split_amount(amount, intent.platform_fee.as_ref(), decimals)?;
                let mut txs = vec![EvmTxPlan {
                    role: TxRole::Main,
                    to,
                    value: U256::from(split.actual_receive),
                    data: Bytes::default(),
                    gas_limit: 0,
                }];
                if let (Some(receiver), true) = (fee_receiver, split.has_fee()) {
                    txs.push(EvmTxPlan {
                        role: TxRole::PlatformFee,
                        to: receiver,
                        value: U256::from(split.platform_fee_raw),
                        data: Bytes::default(),
                        gas_limit: 0,
                    });
                }
                (txs, split, decimals, None)
            }
            IntentKind::TokenTransfer => {
                let token_address = intent
                    .token_address
                    .as_deref()
                    .ok_or_else(|| WalletError::invalid_arg("token transfer requires a token address"))?;
                let token = parse_evm_address(token_address)?;
                let meta = self.token_metadata(token_address).await?;
                let amount = parse_units(&intent.amount, meta.decimals)?;
                if amount == 0 {
                    return Err(WalletError::invalid_arg("amount must be greater than zero"));
                }
                let split = split_amount(amount, intent.platform_fee.as_ref(), meta.decimals)?;
                let mut txs = vec![EvmTxPlan {
                    role: TxRole::Main,
                    to: token,
                    value: U256::zero(),
                    data: erc20_transfer_data(to, U256::from(split.actual_receive)),
                    gas_limit: 0,
                }];
                if let (Some(receiver), true) = (fee_receiver, split.has_fee()) {
                    txs.push(EvmTxPlan {
                        role: TxRole::PlatformFee,
                        to: token,
                        value: U256::zero(),
                        data: erc20_transfer_data(receiver, U256::from(split.platform_fee_raw)),
                        gas_limit: 0,
                    });
                }
                (txs, split, meta.decimals, Some(token))
            }
            IntentKind::ContractCall => {
                if intent.platform_fee.is_some() {
                    return Err(WalletError::invalid_arg(
                        "platform fee cannot be attached to a contract call",
                    ));
                }
                let decimals = self.info.decimals;
                let value = if intent.amount.trim().is_empty() {
                    0
                } else {
                    parse_units(&intent.amount, decimals)?
                };
                let data = intent.data.as_deref().unwrap_or("0x");
                let data = hex::decode(data.trim_start_matches("0x"))
                    .map_err(|_| WalletError::invalid_arg("contract call data is not valid hex"))?;
                let txs = vec![EvmTxPlan {
                    role: TxRole::Main,
                    to,
                    value: U256::from(value),
                    data: Bytes::from(data),
                    gas_limit: 0,
                }];
                (txs, FeeSplit::plain(value), decimals, None)
            }
        };

        for tx in txs.iter_mut() {
            tx.gas_limit = self.gas_limit(from, tx, intent.kind).await;
        }
        let fees = self.fee_data().await?;

        Ok(EvmPlan {
            txs,
            fees,
            split,
            decimals,
            token,
        })
    }

    fn typed_transaction(
        &self,
        from: Address,
        tx: &EvmTxPlan,
        fees: EvmFees,
        nonce: U256,
    ) -> TypedTransaction {
        match fees {
            EvmFees::Eip1559 {
                max_fee,
                priority_fee,
                ..
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(tx.to)
                .value(tx.value)
                .data(tx.data.clone())
                .gas(tx.gas_limit)
                .nonce(nonce)
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(priority_fee)
                .chain_id(self.chain_id)
                .into(),
            EvmFees::Legacy { gas_price } => TransactionRequest::new()
                .from(from)
                .to(tx.to)
                .value(tx.value)
                .data(tx.data.clone())
                .gas(tx.gas_limit)
                .gas_price(gas_price)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .into(),
        }
    }

    async fn pending_nonce(&self, from: Address) -> Result<U256> {
        let nonce = self
            .rpc_str("eth_getTransactionCount", json!([from, "pending"]))
            .await?;
        parse_quantity_u64(&nonce)
            .map(U256::from)
            .map_err(|e| WalletError::network(format!("{e:#}")))
    }

    fn sign_typed(&self, key: &KeyHandle, tx: &TypedTransaction) -> Result<Bytes> {
        let chain_id = self.chain_id;
        key.with_secret(|secret| {
            let wallet = local_wallet(secret, chain_id)?;
            let signature = wallet
                .sign_transaction_sync(tx)
                .map_err(|e| WalletError::internal(format!("transaction signing failed: {e}")))?;
            Ok(tx.rlp_signed(&signature))
        })
    }

    async fn broadcast_raw(&self, raw: &str) -> Result<String> {
        let hash = self
            .rpc_str("eth_sendRawTransaction", json!([raw]))
            .await?;
        validate_tx_hash(&hash).map_err(|e| WalletError::network(format!("{e:#}")))
    }

    /// 签名并发送 DApp 提交的交易
    ///
    /// 费用字段原样使用，不走 `estimate`/`build` 的校验流程；`from` 仍必须是当前账户。
    pub async fn send_dapp_transaction(&self, request: &DappTransactionRequest) -> Result<String> {
        let (key, from) = self.active_address()?;
        if !request.from.eq_ignore_ascii_case(key.address()) {
            return Err(WalletError::rejected(format!(
                "request from {} does not match active account",
                request.from
            )));
        }
        tracing::warn!(
            chain = %self.info.chain,
            to = ?request.to,
            "signing dapp transaction with caller-supplied fields"
        );

        let quantity = |field: &str, value: &Option<String>| -> Result<Option<u128>> {
            value
                .as_deref()
                .map(|v| {
                    parse_quantity_u128(v)
                        .map_err(|e| WalletError::invalid_arg(format!("invalid {field}: {e:#}")))
                })
                .transpose()
        };
        let value = quantity("value", &request.value)?.unwrap_or(0);
        let gas_price = quantity("gasPrice", &request.gas_price)?;
        let max_fee = quantity("maxFeePerGas", &request.max_fee_per_gas)?;
        let max_priority = quantity("maxPriorityFeePerGas", &request.max_priority_fee_per_gas)?;
        let data = match request.data.as_deref() {
            Some(d) => Bytes::from(
                hex::decode(d.trim_start_matches("0x"))
                    .map_err(|_| WalletError::invalid_arg("dapp data is not valid hex"))?,
            ),
            None => Bytes::default(),
        };
        let to = request.to.as_deref().map(parse_evm_address).transpose()?;

        let gas = match request.gas.as_deref() {
            Some(g) => validate_gas(g).map_err(|e| WalletError::invalid_arg(format!("invalid gas: {e:#}")))?,
            None => {
                let mut call = json!({ "from": from, "value": hex_quantity(U256::from(value)), "data": hex_bytes(&data) });
                if let Some(to) = to {
                    call["to"] = json!(to);
                }
                let hex = self.rpc_str("eth_estimateGas", json!([call])).await?;
                validate_gas(&hex).map_err(|e| WalletError::network(format!("{e:#}")))?
            }
        };
        let nonce = match request.nonce.as_deref() {
            Some(n) => U256::from(
                parse_quantity_u64(n).map_err(|e| WalletError::invalid_arg(format!("invalid nonce: {e:#}")))?,
            ),
            None => self.pending_nonce(from).await?,
        };

        let fees = match (max_fee, max_priority, gas_price) {
            (Some(max_fee), Some(priority_fee), _) => EvmFees::Eip1559 {
                base_fee: 0,
                max_fee,
                priority_fee,
            },
            (_, _, Some(gas_price)) => EvmFees::Legacy { gas_price },
            _ => self.fee_data().await?,
        };

        let mut tx: TypedTransaction = match fees {
            EvmFees::Eip1559 {
                max_fee,
                priority_fee,
                ..
            } => Eip1559TransactionRequest::new()
                .from(from)
                .value(value)
                .data(data)
                .gas(gas)
                .nonce(nonce)
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(priority_fee)
                .chain_id(self.chain_id)
                .into(),
            EvmFees::Legacy { gas_price } => TransactionRequest::new()
                .from(from)
                .value(value)
                .data(data)
                .gas(gas)
                .gas_price(gas_price)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .into(),
        };
        if let Some(to) = to {
            tx.set_to(NameOrAddress::Address(to));
        }

        let raw = self.sign_typed(&key, &tx)?;
        let hash = self.broadcast_raw(&hex_bytes(&raw)).await?;
        tracing::info!(chain = %self.info.chain, txid = %hash, "dapp transaction broadcast");
        Ok(hash)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 历史记录（Etherscan 兼容接口）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn explorer_item(&self, row: &Value, own: &str, token: Option<&TokenInfo>) -> Option<HistoryItem> {
        let field = |name: &str| row.get(name).and_then(Value::as_str);
        let hash = field("hash")?.to_string();
        let from = field("from").unwrap_or_default().to_string();
        let to = field("to").unwrap_or_default().to_string();
        let raw_value: u128 = field("value").and_then(|v| v.parse().ok()).unwrap_or(0);

        let (symbol, decimals) = match token {
            Some(t) => (t.symbol.clone(), t.decimals),
            None => match (field("tokenSymbol"), field("tokenDecimal")) {
                (Some(symbol), Some(decimals)) => {
                    (symbol.to_string(), decimals.parse().unwrap_or(self.info.decimals))
                }
                _ => (self.info.symbol.clone(), self.info.decimals),
            },
        };

        let fee = match (
            field("gasUsed").and_then(|v| v.parse::<u128>().ok()),
            field("gasPrice").and_then(|v| v.parse::<u128>().ok()),
        ) {
            (Some(used), Some(price)) => used
                .checked_mul(price)
                .map(|f| format_units(f, self.info.decimals)),
            _ => None,
        };
        let status = match field("isError") {
            Some("1") => TxStatus::Failed,
            _ => TxStatus::Confirmed,
        };

        Some(HistoryItem {
            explorer_url: self.info.tx_url(&hash),
            hash,
            direction: if from.eq_ignore_ascii_case(own) {
                Direction::Out
            } else {
                Direction::In
            },
            value: format_units(raw_value, decimals),
            symbol,
            timestamp: field("timeStamp").and_then(|v| v.parse().ok()).unwrap_or(0),
            block_number: field("blockNumber").and_then(|v| v.parse().ok()),
            status: Some(status),
            from: Some(from),
            to: Some(to),
            fee,
        })
    }
}

fn local_wallet(secret: &SecretMaterial, chain_id: u64) -> Result<LocalWallet> {
    let bytes = secret.secp256k1_bytes()?;
    let wallet = LocalWallet::from_bytes(bytes)
        .map_err(|e| WalletError::internal(format!("invalid secp256k1 key: {e}")))?;
    Ok(wallet.with_chain_id(chain_id))
}

fn signature_hex(signature: &Signature) -> String {
    hex_bytes(&signature.to_vec())
}

#[async_trait]
impl ChainSigner for EvmSigner {
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

    fn as_evm(&self) -> Option<&EvmSigner> {
        Some(self)
    }

    async fn estimate(&self, intent: &TransferIntent) -> Result<FeeQuote> {
        let plan = self.plan(intent).await?;
        let fee_raw = plan.network_fee()?;
        let (base_fee, max_fee, priority_fee, gas_price) = match plan.fees {
            EvmFees::Eip1559 {
                base_fee,
                max_fee,
                priority_fee,
            } => (Some(base_fee), Some(max_fee), Some(priority_fee), None),
            EvmFees::Legacy { gas_price } => (None, None, None, Some(gas_price)),
        };
        let receiver = intent.platform_fee.as_ref().map(|f| f.receiver.as_str());

        Ok(FeeQuote {
            fee: format_units(fee_raw, self.info.decimals),
            fee_symbol: self.info.symbol.clone(),
            fee_raw,
            details: FeeDetails::Evm(EvmFeeDetails {
                gas_model: plan.fees.model(),
                gas_limits: plan.txs.iter().map(|t| t.gas_limit).collect(),
                base_fee_per_gas: base_fee,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority_fee,
                gas_price,
                platform_fee: intent
                    .platform_fee
                    .as_ref()
                    .map(|_| plan.split.breakdown(plan.decimals, receiver)),
            }),
        })
    }

    async fn build(&self, intent: &TransferIntent) -> Result<Vec<UnsignedTx>> {
        let plan = self.plan(intent).await?;
        let (_, from) = self.active_address()?;
        let network_fee = plan.network_fee()?;

        let native_balance = self.native_balance_of(from).await?;
        match plan.token {
            Some(token) => {
                let token_balance = self.token_balance_of(token, from).await?;
                let outflow = plan.split.sender_outflow()?;
                if token_balance < outflow {
                    return Err(WalletError::insufficient_funds(format!(
                        "token balance {} is below {}",
                        format_units(token_balance, plan.decimals),
                        format_units(outflow, plan.decimals)
                    )));
                }
                if native_balance < network_fee {
                    return Err(WalletError::insufficient_funds(format!(
                        "{} balance {} cannot cover network fee {}",
                        self.info.symbol,
                        format_units(native_balance, self.info.decimals),
                        format_units(network_fee, self.info.decimals)
                    )));
                }
            }
            None => {
                let required = plan
                    .split
                    .sender_outflow()?
                    .checked_add(network_fee)
                    .ok_or_else(|| WalletError::invalid_arg("amount overflows"))?;
                if native_balance < required {
                    return Err(WalletError::insufficient_funds(format!(
                        "{} balance {} is below amount + fee {}",
                        self.info.symbol,
                        format_units(native_balance, self.info.decimals),
                        format_units(required, self.info.decimals)
                    )));
                }
            }
        }

        let nonce = self.pending_nonce(from).await?;
        let unsigned = plan
            .txs
            .iter()
            .enumerate()
            .map(|(offset, tx)| {
                UnsignedTx::Evm(EvmUnsigned {
                    tx: self.typed_transaction(from, tx, plan.fees, nonce + U256::from(offset)),
                    role: tx.role,
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            chain = %self.info.chain,
            txs = unsigned.len(),
            nonce = %nonce,
            gas_model = ?plan.fees.model(),
            "evm transactions built"
        );
        Ok(unsigned)
    }

    async fn sign(&self, unsigned: Vec<UnsignedTx>) -> Result<Vec<SignedPayload>> {
        let (key, from) = self.active_address()?;
        let mut signed = Vec::with_capacity(unsigned.len());
        for tx in unsigned {
            let unsigned_tx = expect_variant!(tx, Evm, self.info.chain)?;
            if let Some(tx_from) = unsigned_tx.tx.from() {
                if *tx_from != from {
                    return Err(WalletError::rejected("transaction sender is not the active account"));
                }
            }
            if let Some(chain_id) = unsigned_tx.tx.chain_id() {
                if chain_id.as_u64() != self.chain_id {
                    return Err(WalletError::rejected(format!(
                        "transaction chain id {} does not match {}",
                        chain_id, self.chain_id
                    )));
                }
            }
            let raw = self.sign_typed(&key, &unsigned_tx.tx)?;
            signed.push(SignedPayload::new(
                PayloadKind::Tx,
                hex_bytes(&raw),
                None,
                self.info.chain,
                key.address(),
            ));
        }
        Ok(signed)
    }

    async fn send(&self, signed: Vec<SignedPayload>) -> Result<Vec<String>> {
        let key = self.accounts.active_key()?;
        for payload in &signed {
            payload.ensure_broadcastable(self.info.chain, key.address())?;
        }
        let mut hashes: Vec<String> = Vec::with_capacity(signed.len());
        for payload in signed {
            match self.broadcast_raw(payload.raw()).await {
                Ok(hash) => {
                    tracing::info!(chain = %self.info.chain, txid = %hash, "evm transaction broadcast");
                    hashes.push(hash);
                }
                Err(e) if !hashes.is_empty() => {
                    return Err(WalletError::new(
                        e.kind,
                        format!("{} (already broadcast: {})", e.message, hashes.join(", ")),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(hashes)
    }

    async fn sign_message(&self, request: &MessageRequest) -> Result<SignedPayload> {
        self.capabilities
            .require_message(self.info.chain, request.scheme)?;
        let key = self.accounts.active_key()?;
        if !request.from.eq_ignore_ascii_case(key.address()) {
            return Err(WalletError::rejected(format!(
                "message signer {} is not the active account",
                request.from
            )));
        }

        let hash = match request.scheme {
            MessageScheme::PersonalSign => {
                let payload = request.payload.as_str();
                let bytes = match payload.strip_prefix("0x").map(hex::decode) {
                    Some(Ok(bytes)) => bytes,
                    _ => payload.as_bytes().to_vec(),
                };
                hash_message(bytes)
            }
            MessageScheme::TypedDataV4 => {
                let typed: TypedData = serde_json::from_str(&request.payload)
                    .map_err(|e| WalletError::invalid_arg(format!("invalid typed data: {e}")))?;
                if let Some(chain_id) = typed.domain.chain_id {
                    if chain_id != U256::from(self.chain_id) {
                        return Err(WalletError::rejected(format!(
                            "typed data chain id {chain_id} does not match {}",
                            self.chain_id
                        )));
                    }
                }
                let digest = typed
                    .encode_eip712()
                    .map_err(|e| WalletError::invalid_arg(format!("cannot encode typed data: {e}")))?;
                H256::from(digest)
            }
            other => {
                return Err(WalletError::not_supported(format!(
                    "{other:?} is not an EVM message scheme"
                )))
            }
        };

        let chain_id = self.chain_id;
        let signature = key.with_secret(|secret| {
            local_wallet(secret, chain_id)?
                .sign_hash(hash)
                .map_err(|e| WalletError::internal(format!("message signing failed: {e}")))
        })?;

        Ok(SignedPayload::new(
            PayloadKind::Message,
            request.payload.clone(),
            Some(signature_hex(&signature)),
            self.info.chain,
            key.address(),
        ))
    }

    async fn get_native_balance(&self) -> Result<u128> {
        let (_, address) = self.active_address()?;
        self.native_balance_of(address).await
    }

    async fn get_token_balance(&self, token_address: &str) -> Result<u128> {
        let (_, address) = self.active_address()?;
        let token = parse_evm_address(token_address)?;
        self.token_balance_of(token, address).await
    }

    async fn get_transaction_history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let explorer = self.explorer.as_ref().ok_or_else(|| {
            WalletError::not_supported(format!("no history api configured for {}", self.info.chain))
        })?;
        let key = self.accounts.active_key()?;
        let limit = query.effective_limit();
        let page: u32 = match query.cursor.as_deref() {
            Some(c) => c
                .parse()
                .map_err(|_| WalletError::invalid_arg(format!("invalid history cursor: {c}")))?,
            None => 1,
        };

        let mut params: Vec<(&str, String)> = vec![
            ("module", "account".to_string()),
            ("address", key.address().to_string()),
            ("page", page.to_string()),
            ("offset", limit.to_string()),
            ("sort", "desc".to_string()),
        ];
        let token = match query.token_address.as_deref() {
            Some(token_address) => {
                parse_evm_address(token_address)?;
                params.push(("action", "tokentx".to_string()));
                params.push(("contractaddress", token_address.to_string()));
                self.tokens.get(token_address)
            }
            None => {
                params.push(("action", "txlist".to_string()));
                None
            }
        };
        if let Some(api_key) = &self.explorer_api_key {
            params.push(("apikey", api_key.clone()));
        }

        let response = explorer
            .get_json("", &params)
            .await
            .map_err(WalletError::from_transport)?;
        let rows = match response.get("result") {
            Some(Value::Array(rows)) => rows.clone(),
            Some(Value::String(message)) if response.get("status").and_then(Value::as_str) == Some("0") => {
                if message.is_empty() || message.to_lowercase().contains("no transactions") {
                    vec![]
                } else {
                    return Err(WalletError::network(format!("history api error: {message}")));
                }
            }
            _ => vec![],
        };

        let items: Vec<HistoryItem> = rows
            .iter()
            .filter_map(|row| self.explorer_item(row, key.address(), token.as_ref()))
            .collect();
        let cursor = (rows.len() >= limit).then(|| (page + 1).to_string());
        Ok(HistoryPage { items, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erc20_transfer_encoding() {
        let to: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        let data = erc20_transfer_data(to, U256::from(1_000_000u64));
        assert_eq!(&data[..4], &SELECTOR_TRANSFER);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(data[4 + 31], 0xaa);
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(1_000_000u64));
    }

    #[test]
    fn test_decode_uint_and_string() {
        let encoded = hex_bytes(&abi::encode(&[Token::Uint(U256::from(6u8))]));
        assert_eq!(decode_uint(&encoded).unwrap(), U256::from(6u8));

        let symbol = hex_bytes(&abi::encode(&[Token::String("USDT".into())]));
        assert_eq!(decode_string(&symbol).as_deref(), Some("USDT"));

        let mut bytes32 = b"MKR".to_vec();
        bytes32.resize(32, 0);
        assert_eq!(decode_string(&hex_bytes(&bytes32)).as_deref(), Some("MKR"));
    }

    #[test]
    fn test_fee_price_per_gas() {
        let legacy = EvmFees::Legacy { gas_price: 15_000_000_000 };
        assert_eq!(legacy.price_per_gas() * 21_000, 315_000_000_000_000);
        let eip1559 = EvmFees::Eip1559 {
            base_fee: 10,
            max_fee: 25,
            priority_fee: 5,
        };
        assert_eq!(eip1559.price_per_gas(), 25);
    }
}
