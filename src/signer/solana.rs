//! Solana 签名器
//!
//! 交易为单签名 legacy 消息；SPL 转账使用 TransferChecked，收款方关联代币账户不存在时
//! 在最前面插入 CreateIdempotent 指令。平台服务费作为同一笔交易中的额外指令。

pub mod message;

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::Signer as _;
use futures::future::join_all;
use serde_json::{json, Value};

use self::message::{
    create_associated_token_account_idempotent, encode_transaction, system_transfer,
    transfer_checked, Instruction, Message, Pubkey, TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use super::{expect_variant, AccountBook, ChainSigner, PayloadKind, SignedPayload, UnsignedTx};
use crate::{
    domain::{
        platform_fee::{split_amount, FeeSplit},
        units::{format_units, parse_units},
        Capabilities, ChainKind, Direction, FeeDetails, FeeQuote, HistoryItem, HistoryPage,
        HistoryQuery, IntentKind, MessageRequest, MessageScheme, SolanaFeeDetails, TokenBook,
        TransferIntent, TxStatus, WalletInfo,
    },
    error::{Result, WalletError},
    infrastructure::{
        rpc::JsonRpcTransport,
        rpc_validator::{RpcError, INVALID_PARAMS},
    },
    service::keyring::KeyHandle,
};

/// getFeeForMessage 无结果时每个签名的默认费用
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;
/// SPL 代币账户大小（租金豁免计算）
const TOKEN_ACCOUNT_SIZE: u64 = 165;

/// 未签名的 Solana 交易（序列化后的 legacy 消息）
#[derive(Debug, Clone)]
pub struct SolanaUnsigned {
    pub message: Vec<u8>,
    pub fee: u64,
    pub recent_blockhash: String,
}

struct MintInfo {
    program: Pubkey,
    decimals: u8,
}

struct TokenLeg {
    mint: Pubkey,
    program: Pubkey,
    source: Pubkey,
}

struct SolanaPlan {
    message: Message,
    instructions: usize,
    creates: usize,
    fee: u64,
    split: FeeSplit,
    decimals: u8,
    token: Option<TokenLeg>,
    blockhash: String,
}

pub struct SolanaSigner {
    info: WalletInfo,
    capabilities: Capabilities,
    accounts: AccountBook,
    tokens: TokenBook,
    rpc: Arc<dyn JsonRpcTransport>,
}

impl SolanaSigner {
    pub fn new(info: WalletInfo, key: KeyHandle, rpc: Arc<dyn JsonRpcTransport>) -> Self {
        Self {
            info,
            capabilities: Capabilities::for_kind(ChainKind::Sol),
            accounts: AccountBook::new(key),
            tokens: TokenBook::new(),
            rpc,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        self.rpc
            .request(method, params)
            .await
            .map_err(WalletError::from_transport)
    }

    fn owner(&self) -> Result<(KeyHandle, Pubkey)> {
        let key = self.accounts.active_key()?;
        let owner = Pubkey::from_str(key.address())?;
        Ok((key, owner))
    }

    async fn latest_blockhash(&self) -> Result<([u8; 32], String)> {
        let result = self
            .rpc("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        let blockhash = super::json_str(&result, "/value/blockhash")?.to_string();
        let bytes = Pubkey::from_str(&blockhash)
            .map_err(|_| WalletError::network(format!("node returned bad blockhash {blockhash}")))?
            .to_bytes();
        Ok((bytes, blockhash))
    }

    async fn fee_for_message(&self, message: &Message) -> Result<u64> {
        let encoded = BASE64.encode(message.serialize());
        let result = self
            .rpc("getFeeForMessage", json!([encoded, { "commitment": "processed" }]))
            .await?;
        match result.pointer("/value").and_then(Value::as_u64) {
            Some(fee) => Ok(fee),
            None => {
                tracing::debug!("getFeeForMessage returned no value, using signature count");
                Ok(LAMPORTS_PER_SIGNATURE * message.num_required_signatures as u64)
            }
        }
    }

    async fn account_info(&self, address: &Pubkey) -> Result<Option<Value>> {
        let result = self
            .rpc(
                "getAccountInfo",
                json!([address.to_string(), { "encoding": "jsonParsed" }]),
            )
            .await?;
        Ok(result.get("value").filter(|v| !v.is_null()).cloned())
    }

    /// mint 所属程序（SPL Token / Token-2022）与精度
    async fn mint_info(&self, mint: &Pubkey) -> Result<MintInfo> {
        let account = self
            .account_info(mint)
            .await?
            .ok_or_else(|| WalletError::unknown_token(format!("mint {mint} does not exist")))?;
        let owner = account.get("owner").and_then(Value::as_str).unwrap_or_default();
        let program = if owner == TOKEN_2022_PROGRAM_ID.to_string() {
            *TOKEN_2022_PROGRAM_ID
        } else if owner == TOKEN_PROGRAM_ID.to_string() {
            *TOKEN_PROGRAM_ID
        } else {
            return Err(WalletError::unknown_token(format!(
                "{mint} is not owned by a token program"
            )));
        };
        let decimals = account
            .pointer("/data/parsed/info/decimals")
            .and_then(Value::as_u64)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| WalletError::unknown_token(format!("cannot read decimals of mint {mint}")))?;
        Ok(MintInfo { program, decimals })
    }

    async fn rent_exempt_minimum(&self, size: u64) -> Result<u64> {
        let result = self
            .rpc("getMinimumBalanceForRentExemption", json!([size]))
            .await?;
        result
            .as_u64()
            .ok_or_else(|| WalletError::network("unexpected rent exemption response"))
    }

    async fn lamports_of(&self, address: &Pubkey) -> Result<u128> {
        let result = self.rpc("getBalance", json!([address.to_string()])).await?;
        result
            .pointer("/value")
            .and_then(Value::as_u64)
            .map(u128::from)
            .ok_or_else(|| WalletError::network("unexpected getBalance response"))
    }

    async fn token_account_amount(&self, account: &Pubkey) -> Result<u128> {
        match self
            .rpc
            .request("getTokenAccountBalance", json!([account.to_string()]))
            .await
        {
            Ok(result) => match result.get("value") {
                // 代币账户不存在时余额为 0
                None | Some(Value::Null) => Ok(0),
                Some(_) => super::json_str(&result, "/value/amount")?
                    .parse()
                    .map_err(|_| WalletError::network("unexpected token balance response")),
            },
            // 地址由本地推导，参数无效只可能是账户不存在
            Err(e) if RpcError::find(&e).map(|r| r.code) == Some(INVALID_PARAMS) => Ok(0),
            Err(e) => Err(WalletError::from_transport(e)),
        }
    }

    /// 收款方的关联代币账户；不存在时返回 CreateIdempotent 指令
    async fn destination_account(
        &self,
        payer: &Pubkey,
        recipient: &Pubkey,
        mint: &Pubkey,
        program: &Pubkey,
    ) -> Result<(Pubkey, Option<Instruction>)> {
        let ata = recipient.associated_token_address(mint, program)?;
        if self.account_info(&ata).await?.is_some() {
            return Ok((ata, None));
        }
        if !recipient.is_on_curve() {
            return Err(WalletError::invalid_arg(format!(
                "recipient {recipient} is an off-curve address without a token account"
            )));
        }
        let create = create_associated_token_account_idempotent(payer, recipient, mint, program)?;
        Ok((ata, Some(create)))
    }

    async fn plan(&self, intent: &TransferIntent) -> Result<SolanaPlan> {
        self.capabilities.require(self.info.chain, intent.kind)?;
        let (_, owner) = self.owner()?;
        let recipient = Pubkey::from_str(&intent.to)?;
        let fee_receiver = match intent.platform_fee.as_ref() {
            Some(fee) => Some(Pubkey::from_str(&fee.receiver)?),
            None => None,
        };
        let to_u64 = |value: u128| {
            u64::try_from(value).map_err(|_| WalletError::invalid_arg("amount exceeds u64"))
        };

        let mut creates = Vec::new();
        let mut transfers = Vec::new();
        let (split, decimals, token) = match intent.kind {
            IntentKind::NativeTransfer => {
                let decimals = self.info.decimals;
                let amount = parse_units(&intent.amount, decimals)?;
                if amount == 0 {
                    return Err(WalletError::invalid_arg("amount must be greater than zero"));
                }
                let split = split_amount(amount, intent.platform_fee.as_ref(), decimals)?;
                transfers.push(system_transfer(&owner, &recipient, to_u64(split.actual_receive)?));
                if let (Some(receiver), true) = (fee_receiver, split.has_fee()) {
                    transfers.push(system_transfer(&owner, &receiver, to_u64(split.platform_fee_raw)?));
                }
                (split, decimals, None)
            }
            IntentKind::TokenTransfer => {
                let mint_address = intent
                    .token_address
                    .as_deref()
                    .ok_or_else(|| WalletError::invalid_arg("token transfer requires a mint"))?;
                let mint = Pubkey::from_str(mint_address)?;
                let mint_info = self.mint_info(&mint).await?;
                let decimals = mint_info.decimals;
                let program = mint_info.program;
                let amount = parse_units(&intent.amount, decimals)?;
                if amount == 0 {
                    return Err(WalletError::invalid_arg("amount must be greater than zero"));
                }
                let split = split_amount(amount, intent.platform_fee.as_ref(), decimals)?;
                let source = owner.associated_token_address(&mint, &program)?;

                let (destination, create) =
                    self.destination_account(&owner, &recipient, &mint, &program).await?;
                creates.extend(create);
                transfers.push(transfer_checked(
                    &program,
                    &source,
                    &mint,
                    &destination,
                    &owner,
                    to_u64(split.actual_receive)?,
                    decimals,
                ));

                if let (Some(receiver), true) = (fee_receiver, split.has_fee()) {
                    let (fee_account, create) =
                        self.destination_account(&owner, &receiver, &mint, &program).await?;
                    creates.extend(create);
                    transfers.push(transfer_checked(
                        &program,
                        &source,
                        &mint,
                        &fee_account,
                        &owner,
                        to_u64(split.platform_fee_raw)?,
                        decimals,
                    ));
                }
                (split, decimals, Some(TokenLeg { mint, program, source }))
            }
            IntentKind::ContractCall => {
                return Err(WalletError::not_supported("contract calls are not supported on solana"))
            }
        };

        let creates_count = creates.len();
        let instructions: Vec<Instruction> = creates.into_iter().chain(transfers).collect();
        let (blockhash_bytes, blockhash) = self.latest_blockhash().await?;
        let message = Message::compile(&owner, &instructions, blockhash_bytes)?;
        let fee = self.fee_for_message(&message).await?;

        Ok(SolanaPlan {
            message,
            instructions: instructions.len(),
            creates: creates_count,
            fee,
            split,
            decimals,
            token,
            blockhash,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 历史记录
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn signatures_for(&self, address: &Pubkey, query: &HistoryQuery) -> Result<Vec<Value>> {
        let mut options = json!({ "limit": query.effective_limit() });
        if let Some(before) = query.cursor.as_deref() {
            options["before"] = json!(before);
        }
        let result = self
            .rpc("getSignaturesForAddress", json!([address.to_string(), options]))
            .await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    async fn parsed_transaction(&self, signature: &str) -> Option<Value> {
        let result = self
            .rpc(
                "getTransaction",
                json!([signature, { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }]),
            )
            .await;
        match result {
            Ok(tx) if !tx.is_null() => Some(tx),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(signature = %signature, error = %e, "transaction lookup failed");
                None
            }
        }
    }

    fn base_item(&self, signature: &str, tx: &Value) -> HistoryItem {
        let failed = tx.pointer("/meta/err").map(|e| !e.is_null()).unwrap_or(false);
        HistoryItem {
            hash: signature.to_string(),
            direction: Direction::In,
            value: "0".into(),
            symbol: self.info.symbol.clone(),
            timestamp: tx.get("blockTime").and_then(Value::as_i64).unwrap_or(0),
            explorer_url: self.info.tx_url(signature),
            block_number: tx.get("slot").and_then(Value::as_u64),
            status: Some(if failed { TxStatus::Failed } else { TxStatus::Confirmed }),
            from: None,
            to: None,
            fee: tx
                .pointer("/meta/fee")
                .and_then(Value::as_u64)
                .map(|f| format_units(f as u128, self.info.decimals)),
        }
    }

    fn native_item(&self, signature: &str, tx: &Value, owner: &str) -> Option<HistoryItem> {
        let keys = tx.pointer("/transaction/message/accountKeys")?.as_array()?;
        let index = keys.iter().position(|k| {
            k.get("pubkey").and_then(Value::as_str).or_else(|| k.as_str()) == Some(owner)
        })?;
        let balance = |field: &str| {
            tx.pointer(&format!("/meta/{field}/{index}"))
                .and_then(Value::as_u64)
                .map(i128::from)
        };
        let (pre, post) = (balance("preBalances")?, balance("postBalances")?);
        let fee = tx.pointer("/meta/fee").and_then(Value::as_u64).unwrap_or(0) as i128;
        let net = if index == 0 { post + fee - pre } else { post - pre };

        let mut item = self.base_item(signature, tx);
        item.direction = if net > 0 { Direction::In } else { Direction::Out };
        item.value = format_units(net.unsigned_abs(), self.info.decimals);

        let transfer = parsed_instructions(tx).into_iter().find(|ix| {
            ix.get("program").and_then(Value::as_str) == Some("system")
                && ix.pointer("/parsed/type").and_then(Value::as_str) == Some("transfer")
        });
        if let Some(ix) = transfer {
            item.from = ix.pointer("/parsed/info/source").and_then(Value::as_str).map(String::from);
            item.to = ix
                .pointer("/parsed/info/destination")
                .and_then(Value::as_str)
                .map(String::from);
        }
        Some(item)
    }

    fn token_item(
        &self,
        signature: &str,
        tx: &Value,
        token_accounts: &[String],
        symbol: &str,
        decimals: u8,
    ) -> Option<HistoryItem> {
        let is_own = |account: Option<&str>| {
            account.map(|a| token_accounts.iter().any(|t| t == a)).unwrap_or(false)
        };
        let mut received: u128 = 0;
        let mut sent: u128 = 0;
        let mut counterparty = None;
        let mut own_account = None;
        for ix in parsed_instructions(tx) {
            let program = ix.get("program").and_then(Value::as_str);
            if !matches!(program, Some("spl-token") | Some("spl-token-2022")) {
                continue;
            }
            let kind = ix.pointer("/parsed/type").and_then(Value::as_str);
            if !matches!(kind, Some("transfer") | Some("transferChecked")) {
                continue;
            }
            let Some(info) = ix.pointer("/parsed/info") else {
                continue;
            };
            let amount: u128 = info
                .get("amount")
                .and_then(Value::as_str)
                .or_else(|| info.pointer("/tokenAmount/amount").and_then(Value::as_str))
                .and_then(|a| a.parse().ok())
                .unwrap_or(0);
            let source = info.get("source").and_then(Value::as_str);
            let destination = info.get("destination").and_then(Value::as_str);
            if is_own(destination) {
                received += amount;
                own_account = own_account.or(destination.map(String::from));
                if !is_own(source) {
                    counterparty = counterparty.or(source.map(String::from));
                }
            } else if is_own(source) {
                sent += amount;
                own_account = own_account.or(source.map(String::from));
                counterparty = counterparty.or(destination.map(String::from));
            }
        }
        if received == 0 && sent == 0 {
            return None;
        }

        let mut item = self.base_item(signature, tx);
        item.symbol = symbol.to_string();
        if received >= sent {
            item.direction = Direction::In;
            item.value = format_units(received - sent, decimals);
            item.from = counterparty;
            item.to = own_account;
        } else {
            item.direction = Direction::Out;
            item.value = format_units(sent - received, decimals);
            item.from = own_account;
            item.to = counterparty;
        }
        Some(item)
    }
}

/// 顶层指令与内部指令（jsonParsed）
fn parsed_instructions(tx: &Value) -> Vec<&Value> {
    let mut out: Vec<&Value> = tx
        .pointer("/transaction/message/instructions")
        .and_then(Value::as_array)
        .map(|ixs| ixs.iter().collect())
        .unwrap_or_default();
    if let Some(inner) = tx.pointer("/meta/innerInstructions").and_then(Value::as_array) {
        for group in inner {
            if let Some(ixs) = group.get("instructions").and_then(Value::as_array) {
                out.extend(ixs.iter());
            }
        }
    }
    out
}

#[async_trait]
impl ChainSigner for SolanaSigner {
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
        let receiver = intent.platform_fee.as_ref().map(|f| f.receiver.as_str());
        Ok(FeeQuote {
            fee: format_units(plan.fee as u128, self.info.decimals),
            fee_symbol: self.info.symbol.clone(),
            fee_raw: plan.fee as u128,
            details: FeeDetails::Solana(SolanaFeeDetails {
                lamports_per_message: plan.fee,
                instructions: plan.instructions,
                creates_token_accounts: plan.creates,
                platform_fee: intent
                    .platform_fee
                    .as_ref()
                    .map(|_| plan.split.breakdown(plan.decimals, receiver)),
            }),
        })
    }

    async fn build(&self, intent: &TransferIntent) -> Result<Vec<UnsignedTx>> {
        let plan = self.plan(intent).await?;
        let (_, owner) = self.owner()?;

        let rent = if plan.creates > 0 {
            self.rent_exempt_minimum(TOKEN_ACCOUNT_SIZE).await? as u128 * plan.creates as u128
        } else {
            0
        };
        let lamports = self.lamports_of(&owner).await?;
        match plan.token.as_ref() {
            Some(leg) => {
                let balance = self.token_account_amount(&leg.source).await?;
                let outflow = plan.split.sender_outflow()?;
                if balance < outflow {
                    return Err(WalletError::insufficient_funds(format!(
                        "token balance {} is below {}",
                        format_units(balance, plan.decimals),
                        format_units(outflow, plan.decimals)
                    )));
                }
                let required = plan.fee as u128 + rent;
                if lamports < required {
                    return Err(WalletError::insufficient_funds(format!(
                        "SOL balance {} cannot cover fee and rent {}",
                        format_units(lamports, self.info.decimals),
                        format_units(required, self.info.decimals)
                    )));
                }
                tracing::debug!(
                    mint = %leg.mint,
                    program = %leg.program,
                    creates = plan.creates,
                    "spl transfer planned"
                );
            }
            None => {
                let required = plan
                    .split
                    .sender_outflow()?
                    .checked_add(plan.fee as u128)
                    .ok_or_else(|| WalletError::invalid_arg("amount overflows"))?;
                if lamports < required {
                    return Err(WalletError::insufficient_funds(format!(
                        "SOL balance {} is below amount + fee {}",
                        format_units(lamports, self.info.decimals),
                        format_units(required, self.info.decimals)
                    )));
                }
            }
        }

        tracing::info!(
            chain = %self.info.chain,
            instructions = plan.instructions,
            fee = plan.fee,
            "solana transaction built"
        );
        Ok(vec![UnsignedTx::Solana(SolanaUnsigned {
            message: plan.message.serialize(),
            fee: plan.fee,
            recent_blockhash: plan.blockhash,
        })])
    }

    async fn sign(&self, unsigned: Vec<UnsignedTx>) -> Result<Vec<SignedPayload>> {
        let (key, owner) = self.owner()?;
        let mut signed = Vec::with_capacity(unsigned.len());
        for tx in unsigned {
            let unsigned_tx = expect_variant!(tx, Solana, self.info.chain)?;
            let message = Message::deserialize(&unsigned_tx.message)?;
            if message.fee_payer() != Some(&owner) || message.num_required_signatures != 1 {
                return Err(WalletError::rejected(
                    "message must be paid and signed by the active account only",
                ));
            }

            let signature = key.with_secret(|secret| {
                let signing_key = secret.ed25519_signing_key()?;
                Ok(signing_key.sign(&unsigned_tx.message).to_bytes())
            })?;
            let wire = encode_transaction(&signature, &unsigned_tx.message);
            signed.push(SignedPayload::new(
                PayloadKind::Tx,
                BASE64.encode(wire),
                Some(bs58::encode(signature).into_string()),
                self.info.chain,
                key.address(),
            ));
        }
        Ok(signed)
    }

    async fn send(&self, signed: Vec<SignedPayload>) -> Result<Vec<String>> {
        let key = self.accounts.active_key()?;
        let mut signatures = Vec::with_capacity(signed.len());
        for payload in signed {
            payload.ensure_broadcastable(self.info.chain, key.address())?;
            let result = self
                .rpc(
                    "sendTransaction",
                    json!([payload.raw(), { "encoding": "base64", "preflightCommitment": "confirmed" }]),
                )
                .await?;
            let signature = result
                .as_str()
                .map(String::from)
                .ok_or_else(|| WalletError::network("sendTransaction returned no signature"))?;
            tracing::info!(chain = %self.info.chain, txid = %signature, "solana transaction broadcast");
            signatures.push(signature);
        }
        Ok(signatures)
    }

    async fn sign_message(&self, request: &MessageRequest) -> Result<SignedPayload> {
        self.capabilities
            .require_message(self.info.chain, request.scheme)?;
        if request.scheme != MessageScheme::Ed25519Raw {
            return Err(WalletError::not_supported("solana only signs raw ed25519 messages"));
        }
        let key = self.accounts.active_key()?;
        if request.from != key.address() {
            return Err(WalletError::rejected(format!(
                "message signer {} is not the active account",
                request.from
            )));
        }
        let signature = key.with_secret(|secret| {
            Ok(secret
                .ed25519_signing_key()?
                .sign(request.payload.as_bytes())
                .to_bytes())
        })?;
        Ok(SignedPayload::new(
            PayloadKind::Message,
            request.payload.clone(),
            Some(bs58::encode(signature).into_string()),
            self.info.chain,
            key.address(),
        ))
    }

    async fn get_native_balance(&self) -> Result<u128> {
        let (_, owner) = self.owner()?;
        self.lamports_of(&owner).await
    }

    async fn get_token_balance(&self, token_address: &str) -> Result<u128> {
        let (_, owner) = self.owner()?;
        let mint = Pubkey::from_str(token_address)?;
        let result = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([owner.to_string(), { "mint": mint.to_string() }, { "encoding": "jsonParsed" }]),
            )
            .await?;
        let accounts = result
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(accounts
            .iter()
            .filter_map(|a| {
                a.pointer("/account/data/parsed/info/tokenAmount/amount")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<u128>().ok())
            })
            .sum())
    }

    async fn get_transaction_history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let (key, owner) = self.owner()?;
        let limit = query.effective_limit();

        let (addresses, token) = match query.token_address.as_deref() {
            Some(mint_address) => {
                let mint = Pubkey::from_str(mint_address)?;
                let mint_info = self.mint_info(&mint).await?;
                let symbol = self
                    .tokens
                    .get(mint_address)
                    .map(|t| t.symbol)
                    .unwrap_or_else(|| mint_address.chars().take(4).collect());
                // 同一 mint 在两个代币程序下各有一个 ATA，都要查
                let other_program = if mint_info.program == *TOKEN_PROGRAM_ID {
                    *TOKEN_2022_PROGRAM_ID
                } else {
                    *TOKEN_PROGRAM_ID
                };
                let addresses = vec![
                    owner.associated_token_address(&mint, &mint_info.program)?,
                    owner.associated_token_address(&mint, &other_program)?,
                ];
                (addresses, Some((symbol, mint_info.decimals)))
            }
            None => (vec![owner], None),
        };

        let batches = futures::future::try_join_all(
            addresses.iter().map(|address| self.signatures_for(address, query)),
        )
        .await?;
        let page_full = batches.iter().any(|batch| batch.len() >= limit);

        // 按 slot 倒序合并，同一签名只保留一次
        let mut entries: Vec<(String, u64)> = Vec::new();
        for entry in batches.iter().flatten() {
            let Some(signature) = entry.get("signature").and_then(Value::as_str) else {
                continue;
            };
            if entries.iter().any(|(seen, _)| seen == signature) {
                continue;
            }
            let slot = entry.get("slot").and_then(Value::as_u64).unwrap_or(0);
            entries.push((signature.to_string(), slot));
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        let truncated = entries.len() > limit;
        entries.truncate(limit);
        let names: Vec<String> = entries.into_iter().map(|(signature, _)| signature).collect();
        let transactions = join_all(names.iter().map(|sig| self.parsed_transaction(sig))).await;

        let own = key.address().to_string();
        let accounts: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        let items = names
            .iter()
            .zip(transactions)
            .filter_map(|(signature, tx)| {
                let tx = tx?;
                match &token {
                    Some((symbol, decimals)) => {
                        self.token_item(signature, &tx, &accounts, symbol, *decimals)
                    }
                    None => self.native_item(signature, &tx, &own),
                }
            })
            .collect();

        let cursor = if page_full || truncated {
            names.last().cloned()
        } else {
            None
        };
        Ok(HistoryPage { items, cursor })
    }
}
