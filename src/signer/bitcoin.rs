//! Bitcoin 签名器（P2WPKH）
//!
//! - 费率来自数据提供方（sats/vB），不低于最低中继费率
//! - 贪心选币：从大到小，先用已确认 UTXO
//! - 找零低于粉尘阈值时并入矿工费
//! - PSBT 逐个输入签名，失败时回退到整体签名，最后 finalize

use std::{collections::BTreeMap, str::FromStr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    consensus::encode::{deserialize, serialize_hex},
    ecdsa,
    psbt::Psbt,
    secp256k1::{Message, Secp256k1, SecretKey},
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Address, Amount, OutPoint, PrivateKey, PublicKey, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};

use super::{expect_variant, AccountBook, ChainSigner, PayloadKind, SignedPayload, UnsignedTx};
use crate::{
    domain::{
        derivation::SecretMaterial,
        platform_fee::{split_amount, FeeSplit},
        units::{format_units, parse_units},
        BitcoinFeeDetails, Capabilities, ChainKind, Direction, FeeDetails, FeeQuote, HistoryItem,
        HistoryPage, HistoryQuery, TokenBook, TransferIntent, TxStatus, WalletInfo,
    },
    error::{Result, WalletError},
    infrastructure::{
        bitcoin_provider::{BitcoinProvider, BtcTx, Utxo, CHAIN_PAGE_SIZE},
        log_redact::redact_address,
    },
    utils::address_validator::AddressValidator,
};

/// 最低中继费率（sats/vB）
pub const MIN_RELAY_FEE_RATE: u64 = 1;
pub const SAFETY_MARGIN_VBYTES: u64 = 10;

const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;
const OVERHEAD_VBYTES: u64 = 10;
const DUST_MULTIPLIER: u64 = 3;
const BTC_DECIMALS: u8 = 8;

/// P2WPKH 交易的虚拟字节估算
pub fn estimate_vbytes(inputs: usize, outputs: usize) -> u64 {
    INPUT_VBYTES * inputs as u64 + OUTPUT_VBYTES * outputs as u64 + OVERHEAD_VBYTES + SAFETY_MARGIN_VBYTES
}

/// 粉尘阈值（sats）
pub fn dust_threshold(fee_rate: u64) -> u64 {
    OUTPUT_VBYTES * fee_rate * DUST_MULTIPLIER
}

/// 选币结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub selected: Vec<Utxo>,
    pub total_in: u64,
    /// 实际矿工费（含并入的找零）
    pub fee: u64,
    /// 0 表示没有找零输出
    pub change: u64,
    pub change_folded: bool,
    pub vbytes: u64,
}

impl CoinSelection {
    pub fn output_count(&self, fixed_outputs: usize) -> usize {
        fixed_outputs + usize::from(self.change > 0)
    }
}

/// 贪心选币
///
/// `target` 是固定输出（收款方 + 服务费）之和。先只用已确认 UTXO，不够时再纳入未确认的。
pub fn select_coins(
    utxos: &[Utxo],
    target: u64,
    fixed_outputs: usize,
    fee_rate: u64,
) -> Result<CoinSelection> {
    let mut confirmed: Vec<&Utxo> = utxos.iter().filter(|u| u.confirmed).collect();
    confirmed.sort_by(|a, b| b.value.cmp(&a.value));
    if let Some(selection) = select_from(&confirmed, target, fixed_outputs, fee_rate) {
        return Ok(selection);
    }

    let mut all: Vec<&Utxo> = utxos.iter().collect();
    all.sort_by(|a, b| b.value.cmp(&a.value));
    if let Some(selection) = select_from(&all, target, fixed_outputs, fee_rate) {
        tracing::debug!(inputs = selection.selected.len(), "coin selection uses unconfirmed outputs");
        return Ok(selection);
    }

    let available: u64 = utxos.iter().map(|u| u.value).sum();
    let needed = target.saturating_add(estimate_vbytes(utxos.len().max(1), fixed_outputs) * fee_rate);
    Err(WalletError::insufficient_funds(format!(
        "insufficient BTC: available {} BTC, need at least {} BTC",
        format_units(available as u128, BTC_DECIMALS),
        format_units(needed as u128, BTC_DECIMALS)
    )))
}

fn select_from(
    pool: &[&Utxo],
    target: u64,
    fixed_outputs: usize,
    fee_rate: u64,
) -> Option<CoinSelection> {
    let dust = dust_threshold(fee_rate);
    let mut selected = Vec::new();
    let mut total_in = 0u64;

    for utxo in pool {
        selected.push((*utxo).clone());
        total_in = total_in.saturating_add(utxo.value);

        let vbytes_with_change = estimate_vbytes(selected.len(), fixed_outputs + 1);
        let fee_with_change = vbytes_with_change * fee_rate;
        if total_in < target.saturating_add(fee_with_change) {
            continue;
        }

        let change = total_in - target - fee_with_change;
        if change >= dust {
            return Some(CoinSelection {
                selected,
                total_in,
                fee: fee_with_change,
                change,
                change_folded: false,
                vbytes: vbytes_with_change,
            });
        }
        return Some(CoinSelection {
            vbytes: estimate_vbytes(selected.len(), fixed_outputs),
            selected,
            total_in,
            fee: total_in - target,
            change: 0,
            change_folded: change > 0,
        });
    }
    None
}

/// 未签名的 Bitcoin 交易
#[derive(Debug, Clone)]
pub struct BitcoinUnsigned {
    pub psbt: Psbt,
    pub fee_sats: u64,
    pub fee_rate: u64,
    pub vbytes: u64,
}

struct BitcoinPlan {
    fee_rate: u64,
    dust: u64,
    split: FeeSplit,
    platform_fee_waived: bool,
    platform_receiver: Option<Address>,
    recipient: Address,
    selection: CoinSelection,
    fixed_outputs: usize,
}

pub struct BitcoinSigner {
    info: WalletInfo,
    capabilities: Capabilities,
    accounts: AccountBook,
    tokens: TokenBook,
    provider: Arc<dyn BitcoinProvider>,
    network: bitcoin::Network,
}

impl BitcoinSigner {
    pub fn new(
        info: WalletInfo,
        key: crate::service::keyring::KeyHandle,
        provider: Arc<dyn BitcoinProvider>,
    ) -> Self {
        let network = key.bitcoin_network();
        Self {
            info,
            capabilities: Capabilities::for_kind(ChainKind::Btc),
            accounts: AccountBook::new(key),
            tokens: TokenBook::new(),
            provider,
            network,
        }
    }

    fn parse_address(&self, address: &str) -> Result<Address> {
        AddressValidator::require(self.info.chain, address, self.network)?;
        Address::from_str(address)
            .ok()
            .and_then(|a| a.require_network(self.network).ok())
            .ok_or_else(|| WalletError::invalid_address(format!("invalid bitcoin address: {address}")))
    }

    async fn current_fee_rate(&self) -> Result<u64> {
        let rate = self
            .provider
            .fee_rate()
            .await
            .map_err(WalletError::from_transport)?;
        Ok(rate.max(MIN_RELAY_FEE_RATE))
    }

    async fn plan(&self, intent: &TransferIntent) -> Result<BitcoinPlan> {
        self.capabilities.require(self.info.chain, intent.kind)?;
        let recipient = self.parse_address(&intent.to)?;
        let amount = parse_units(&intent.amount, BTC_DECIMALS)?;
        let amount = u64::try_from(amount)
            .map_err(|_| WalletError::invalid_arg("amount exceeds the bitcoin supply"))?;

        let fee_rate = self.current_fee_rate().await?;
        let dust = dust_threshold(fee_rate);
        if amount < dust {
            return Err(WalletError::amount_too_small(format!(
                "amount {amount} sats is below the dust threshold {dust} sats"
            )));
        }

        let mut split = split_amount(amount as u128, intent.platform_fee.as_ref(), BTC_DECIMALS)?;
        let mut platform_fee_waived = false;
        let mut platform_receiver = None;
        if let Some(fee) = intent.platform_fee.as_ref() {
            let receiver = self.parse_address(&fee.receiver)?;
            if split.platform_fee_raw < dust as u128 {
                if split.has_fee() {
                    tracing::info!(
                        platform_fee = split.platform_fee_raw as u64,
                        dust,
                        "platform fee output below dust, waived"
                    );
                }
                split = split.waived();
                platform_fee_waived = true;
            } else {
                platform_receiver = Some(receiver);
            }
        }

        if split.actual_receive < dust as u128 {
            return Err(WalletError::amount_too_small(format!(
                "recipient output {} sats is below the dust threshold {dust} sats",
                split.actual_receive
            )));
        }

        let target = u64::try_from(split.sender_outflow()?)
            .map_err(|_| WalletError::invalid_arg("amount exceeds the bitcoin supply"))?;
        let fixed_outputs = 1 + usize::from(platform_receiver.is_some());

        let address = self.accounts.active_key()?.address().to_string();
        let utxos = self
            .provider
            .list_unspent(&address)
            .await
            .map_err(WalletError::from_transport)?;
        let selection = select_coins(&utxos, target, fixed_outputs, fee_rate)?;

        Ok(BitcoinPlan {
            fee_rate,
            dust,
            split,
            platform_fee_waived,
            platform_receiver,
            recipient,
            selection,
            fixed_outputs,
        })
    }

    fn own_script(&self, address: &str) -> Result<ScriptBuf> {
        Ok(self.parse_address(address)?.script_pubkey())
    }

    fn history_item(&self, tx: &BtcTx, own: &str) -> HistoryItem {
        let sent: u64 = tx
            .vin
            .iter()
            .filter_map(|vin| vin.prevout.as_ref())
            .filter(|p| p.scriptpubkey_address.as_deref() == Some(own))
            .map(|p| p.value)
            .sum();
        let received: u64 = tx
            .vout
            .iter()
            .filter(|o| o.scriptpubkey_address.as_deref() == Some(own))
            .map(|o| o.value)
            .sum();
        let to_others: u64 = tx
            .vout
            .iter()
            .filter(|o| o.scriptpubkey_address.as_deref() != Some(own))
            .map(|o| o.value)
            .sum();

        let (direction, value) = if sent > 0 {
            (Direction::Out, to_others)
        } else {
            (Direction::In, received)
        };
        let counterparty_out = tx
            .vout
            .iter()
            .find(|o| o.scriptpubkey_address.as_deref() != Some(own))
            .and_then(|o| o.scriptpubkey_address.clone());
        let counterparty_in = tx
            .vin
            .iter()
            .filter_map(|vin| vin.prevout.as_ref())
            .find_map(|p| p.scriptpubkey_address.clone());

        let (from, to) = match direction {
            Direction::Out => (Some(own.to_string()), counterparty_out),
            Direction::In => (counterparty_in, Some(own.to_string())),
        };

        HistoryItem {
            hash: tx.txid.clone(),
            direction,
            value: format_units(value as u128, BTC_DECIMALS),
            symbol: self.info.symbol.clone(),
            timestamp: tx
                .status
                .block_time
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            explorer_url: self.info.tx_url(&tx.txid),
            block_number: tx.status.block_height,
            status: Some(if tx.status.confirmed {
                TxStatus::Confirmed
            } else {
                TxStatus::Pending
            }),
            from,
            to,
            fee: tx.fee.map(|f| format_units(f as u128, BTC_DECIMALS)),
        }
    }
}

/// 所有输入都必须花费当前账户的 P2WPKH 输出
fn ensure_inputs_owned(psbt: &Psbt, own_script: &ScriptBuf) -> Result<()> {
    for (index, input) in psbt.inputs.iter().enumerate() {
        let owned = input
            .witness_utxo
            .as_ref()
            .map(|utxo| &utxo.script_pubkey == own_script)
            .unwrap_or(false);
        if !owned {
            return Err(WalletError::rejected(format!(
                "input {index} is not owned by the active account"
            )));
        }
    }
    Ok(())
}

/// 单个 P2WPKH 输入签名
fn sign_input(
    cache: &mut SighashCache<&Transaction>,
    psbt: &Psbt,
    index: usize,
    secret_key: &SecretKey,
    secp: &Secp256k1<bitcoin::secp256k1::All>,
) -> anyhow::Result<ecdsa::Signature> {
    let utxo = psbt.inputs[index]
        .witness_utxo
        .as_ref()
        .with_context(|| format!("input {index} has no witness utxo"))?;
    let sighash = cache
        .p2wpkh_signature_hash(index, &utxo.script_pubkey, utxo.value, EcdsaSighashType::All)
        .with_context(|| format!("failed to compute sighash for input {index}"))?;
    let message = Message::from_digest_slice(sighash.as_ref()).context("invalid sighash digest")?;
    Ok(ecdsa::Signature::sighash_all(secp.sign_ecdsa(&message, secret_key)))
}

/// 签名并 finalize PSBT，返回最终交易
fn sign_psbt(
    psbt: &mut Psbt,
    secret: &SecretMaterial,
    network: bitcoin::Network,
) -> anyhow::Result<Transaction> {
    let secp = Secp256k1::new();
    let secret_key =
        SecretKey::from_slice(secret.secp256k1_bytes()?).context("invalid secp256k1 secret key")?;
    let public_key = PublicKey::new(secret_key.public_key(&secp));

    let unsigned_tx = psbt.unsigned_tx.clone();
    let mut cache = SighashCache::new(&unsigned_tx);
    let mut unsigned_inputs = Vec::new();
    for index in 0..psbt.inputs.len() {
        match sign_input(&mut cache, psbt, index, &secret_key, &secp) {
            Ok(signature) => {
                psbt.inputs[index].partial_sigs.insert(public_key, signature);
            }
            Err(e) => {
                tracing::warn!(input = index, error = %e, "per-input signing failed");
                unsigned_inputs.push(index);
            }
        }
    }

    if !unsigned_inputs.is_empty() {
        let mut keys = BTreeMap::new();
        keys.insert(public_key, PrivateKey::new(secret_key, network));
        if let Err((_, errors)) = psbt.sign(&keys, &secp) {
            anyhow::bail!("PSBT signing failed: {:?}", errors);
        }
    }

    let mut tx = psbt.unsigned_tx.clone();
    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        let (pubkey, signature) = input
            .partial_sigs
            .iter()
            .next()
            .map(|(k, s)| (*k, *s))
            .with_context(|| format!("input {index} was not signed"))?;
        let mut witness = Witness::new();
        witness.push(signature.to_vec());
        witness.push(pubkey.to_bytes());
        input.final_script_witness = Some(witness.clone());
        input.partial_sigs.clear();
        tx.input[index].witness = witness;
    }
    Ok(tx)
}

#[async_trait]
impl ChainSigner for BitcoinSigner {
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
            fee: format_units(plan.selection.fee as u128, BTC_DECIMALS),
            fee_symbol: self.info.symbol.clone(),
            fee_raw: plan.selection.fee as u128,
            details: FeeDetails::Bitcoin(BitcoinFeeDetails {
                fee_rate: plan.fee_rate,
                vbytes: plan.selection.vbytes,
                inputs: plan.selection.selected.len(),
                outputs: plan.selection.output_count(plan.fixed_outputs),
                dust_threshold: plan.dust,
                change_folded: plan.selection.change_folded,
                platform_fee_waived: plan.platform_fee_waived,
                platform_fee: intent
                    .platform_fee
                    .as_ref()
                    .map(|_| plan.split.breakdown(BTC_DECIMALS, receiver)),
            }),
        })
    }

    async fn build(&self, intent: &TransferIntent) -> Result<Vec<UnsignedTx>> {
        let plan = self.plan(intent).await?;
        let own_address = self.accounts.active_key()?.address().to_string();
        let own_script = self.own_script(&own_address)?;

        let mut inputs = Vec::with_capacity(plan.selection.selected.len());
        for utxo in &plan.selection.selected {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|_| WalletError::network(format!("provider returned bad txid {}", utxo.txid)))?;
            inputs.push(TxIn {
                previous_output: OutPoint::new(txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            });
        }

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(plan.split.actual_receive as u64),
            script_pubkey: plan.recipient.script_pubkey(),
        }];
        if let Some(receiver) = plan.platform_receiver.as_ref() {
            outputs.push(TxOut {
                value: Amount::from_sat(plan.split.platform_fee_raw as u64),
                script_pubkey: receiver.script_pubkey(),
            });
        }
        if plan.selection.change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(plan.selection.change),
                script_pubkey: own_script.clone(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        };
        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| WalletError::internal(format!("failed to create PSBT: {e}")))?;

        for (index, utxo) in plan.selection.selected.iter().enumerate() {
            psbt.inputs[index].witness_utxo = Some(TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: own_script.clone(),
            });
            // 完整前序交易不是 segwit 签名所必需的，取不到时只记录
            match self.provider.fetch_raw_tx_hex(&utxo.txid).await {
                Ok(raw) => match hex::decode(&raw).ok().and_then(|b| deserialize::<Transaction>(&b).ok()) {
                    Some(prev) => psbt.inputs[index].non_witness_utxo = Some(prev),
                    None => tracing::debug!(txid = %utxo.txid, "previous transaction could not be decoded"),
                },
                Err(e) => tracing::debug!(txid = %utxo.txid, error = %e, "previous transaction unavailable"),
            }
        }

        tracing::info!(
            chain = %self.info.chain,
            inputs = plan.selection.selected.len(),
            fee = plan.selection.fee,
            fee_rate = plan.fee_rate,
            "bitcoin transaction built"
        );

        Ok(vec![UnsignedTx::Bitcoin(BitcoinUnsigned {
            psbt,
            fee_sats: plan.selection.fee,
            fee_rate: plan.fee_rate,
            vbytes: plan.selection.vbytes,
        })])
    }

    async fn sign(&self, unsigned: Vec<UnsignedTx>) -> Result<Vec<SignedPayload>> {
        let key = self.accounts.active_key()?;
        let own_script = self.own_script(key.address())?;
        let mut signed = Vec::with_capacity(unsigned.len());
        for tx in unsigned {
            let mut unsigned_tx = expect_variant!(tx, Bitcoin, self.info.chain)?;
            ensure_inputs_owned(&unsigned_tx.psbt, &own_script)?;
            let network = self.network;
            let final_tx = key.with_secret(|secret| {
                sign_psbt(&mut unsigned_tx.psbt, secret, network).map_err(WalletError::from)
            })?;

            let vsize = final_tx.vsize() as u64;
            if vsize > 0 {
                tracing::debug!(
                    txid = %final_tx.txid(),
                    planned_fee_rate = unsigned_tx.fee_rate,
                    actual_fee_rate = unsigned_tx.fee_sats as f64 / vsize as f64,
                    vsize,
                    "bitcoin transaction signed"
                );
            }

            signed.push(SignedPayload::new(
                PayloadKind::Tx,
                serialize_hex(&final_tx),
                None,
                self.info.chain,
                key.address(),
            ));
        }
        Ok(signed)
    }

    async fn send(&self, signed: Vec<SignedPayload>) -> Result<Vec<String>> {
        let key = self.accounts.active_key()?;
        let mut txids = Vec::with_capacity(signed.len());
        for payload in signed {
            payload.ensure_broadcastable(self.info.chain, key.address())?;
            let txid = self
                .provider
                .broadcast(payload.raw())
                .await
                .map_err(WalletError::from_transport)?;
            tracing::info!(chain = %self.info.chain, txid = %txid, "bitcoin transaction broadcast");
            txids.push(txid);
        }
        Ok(txids)
    }

    async fn get_native_balance(&self) -> Result<u128> {
        let key = self.accounts.active_key()?;
        let utxos = self
            .provider
            .list_unspent(key.address())
            .await
            .map_err(WalletError::from_transport)?;
        Ok(utxos.iter().map(|u| u.value as u128).sum())
    }

    async fn get_token_balance(&self, _token_address: &str) -> Result<u128> {
        Err(WalletError::not_supported("bitcoin has no token balances"))
    }

    async fn get_transaction_history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        if query.token_address.is_some() {
            return Err(WalletError::not_supported("bitcoin has no token history"));
        }
        let key = self.accounts.active_key()?;
        let own = key.address();
        let batch = self
            .provider
            .tx_history(own, query.cursor.as_deref())
            .await
            .map_err(WalletError::from_transport)?;

        // 内存池交易只在首页整体返回，limit 只约束已确认部分；
        // 游标始终指向本页最后一条已确认交易（按数据源顺序），不会跳过任何交易
        let mempool: &[BtcTx] = if query.cursor.is_none() {
            &batch.mempool
        } else {
            &[]
        };
        let limit = query.effective_limit();
        let confirmed_full = batch.confirmed.len() >= CHAIN_PAGE_SIZE;
        let kept = &batch.confirmed[..batch.confirmed.len().min(limit)];
        let has_more = batch.confirmed.len() > kept.len() || confirmed_full;

        let mut items: Vec<HistoryItem> = mempool.iter().map(|tx| self.history_item(tx, own)).collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.extend(kept.iter().map(|tx| self.history_item(tx, own)));

        let cursor = if has_more {
            kept.last().map(|tx| tx.txid.clone())
        } else {
            None
        };

        tracing::debug!(
            address = %redact_address(own),
            items = items.len(),
            has_more = cursor.is_some(),
            "bitcoin history fetched"
        );
        Ok(HistoryPage { items, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(id: u8, value: u64, confirmed: bool) -> Utxo {
        Utxo {
            txid: format!("{:064x}", id),
            vout: 0,
            value,
            confirmed,
        }
    }

    #[test]
    fn test_vbytes_and_dust() {
        assert_eq!(estimate_vbytes(1, 2), 68 + 62 + 20);
        assert_eq!(dust_threshold(1), 93);
        assert_eq!(dust_threshold(10), 930);
    }

    #[test]
    fn test_select_largest_first_with_change() {
        let utxos = vec![utxo(1, 5_000, true), utxo(2, 100_000, true), utxo(3, 20_000, true)];
        let selection = select_coins(&utxos, 50_000, 1, 2).unwrap();
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.selected[0].value, 100_000);
        assert_eq!(selection.fee, estimate_vbytes(1, 2) * 2);
        assert_eq!(selection.total_in, 50_000 + selection.fee + selection.change);
    }

    #[test]
    fn test_dust_change_folds_into_fee() {
        let fee_rate = 1;
        let target = 10_000;
        let input = target + estimate_vbytes(1, 2) * fee_rate + 50;
        let selection = select_coins(&[utxo(1, input, true)], target, 1, fee_rate).unwrap();
        assert_eq!(selection.change, 0);
        assert!(selection.change_folded);
        assert_eq!(selection.fee, input - target);
    }

    #[test]
    fn test_unconfirmed_used_only_when_needed() {
        let utxos = vec![utxo(1, 30_000, true), utxo(2, 500_000, false)];
        let small = select_coins(&utxos, 10_000, 1, 1).unwrap();
        assert!(small.selected.iter().all(|u| u.confirmed));

        let large = select_coins(&utxos, 100_000, 1, 1).unwrap();
        assert!(large.selected.iter().any(|u| !u.confirmed));
    }

    #[test]
    fn test_insufficient_funds() {
        let err = select_coins(&[utxo(1, 1_000, true)], 5_000, 1, 1).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    }
}
