//! Transaction construction, signing and validation

use std::collections::HashSet;

use tracing::debug;

use crate::constants::*;
use crate::crypto::{pubkey_hash_from_address, verify_signature, double_sha256, Wallet};
use crate::economic::calculate_fee;
use crate::encoding;
use crate::error::{LedgerError, Result};
use crate::script::{self, Script, SignatureChecker};
use crate::types::*;
use crate::utxo::UtxoView;

impl CoinbaseInput {
    /// Encode `height ‖ miner_data`, each with a one-byte length prefix.
    /// Miner data beyond 255 bytes is dropped.
    pub fn new(height: Height, miner_data: &str) -> Self {
        let height_bytes = height.to_le_bytes();
        let significant = height_bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let data = &miner_data.as_bytes()[..miner_data.len().min(u8::MAX as usize)];

        let mut coinbase = Vec::with_capacity(2 + significant + data.len());
        coinbase.push(significant as u8);
        coinbase.extend_from_slice(&height_bytes[..significant]);
        coinbase.push(data.len() as u8);
        coinbase.extend_from_slice(data);
        Self { coinbase }
    }

    /// Block height recorded in the coinbase field, `None` if the field is malformed
    pub fn height(&self) -> Option<Height> {
        let len = *self.coinbase.first()? as usize;
        if len > 8 {
            return None;
        }
        let bytes = self.coinbase.get(1..1 + len)?;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    }

    pub fn miner_data(&self) -> Option<&[u8]> {
        let height_len = *self.coinbase.first()? as usize;
        let data_len = *self.coinbase.get(1 + height_len)? as usize;
        let start = 2 + height_len;
        self.coinbase.get(start..start + data_len)
    }
}

impl Transaction {
    /// Coinbase paying `value` to `address`
    pub fn new_coinbase(height: Height, miner_data: &str, address: &str, value: Amount) -> Result<Self> {
        let pubkey_hash = pubkey_hash_from_address(address)?;
        Ok(Transaction {
            version: CURRENT_VERSION,
            inputs: TxInputs::Coinbase(CoinbaseInput::new(height, miner_data)),
            outputs: vec![TransactionOutput {
                value,
                locking_script: Script::p2pkh_locking(&pubkey_hash),
            }],
            lock_time: 0,
        })
    }

    /// Build and sign a payment from `wallet` to every `(address, amount)` in
    /// `recipients`, leaving `fee` unclaimed. Any overshoot of the selected
    /// outputs is returned to the sender as change.
    pub fn new_payment(
        wallet: &Wallet,
        recipients: &[(String, Amount)],
        fee: Amount,
        utxos: &dyn UtxoView,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(LedgerError::Validation("Payment needs at least one recipient".to_string()));
        }

        let mut outputs = Vec::with_capacity(recipients.len() + 1);
        for (address, amount) in recipients {
            let pubkey_hash = pubkey_hash_from_address(address)?;
            outputs.push(TransactionOutput {
                value: *amount,
                locking_script: Script::p2pkh_locking(&pubkey_hash),
            });
        }

        let needed = recipients
            .iter()
            .try_fold(fee, |acc, (_, amount)| acc.checked_add(*amount))
            .ok_or_else(|| LedgerError::Validation("Payment amount overflows".to_string()))?;

        let selection = utxos.find_spendable_for_address(&wallet.address(), needed)?;
        if selection.accumulated < needed {
            return Err(LedgerError::InsufficientFunds {
                needed,
                available: selection.accumulated,
            });
        }

        let change = selection.accumulated - needed;
        if change > 0 {
            outputs.push(TransactionOutput {
                value: change,
                locking_script: Script::p2pkh_locking(&wallet.pubkey_hash()),
            });
        }

        let inputs = selection
            .outputs
            .iter()
            .map(|(tx_id, index)| TransactionInput {
                source_tx_id: *tx_id,
                output_index: *index,
                unlocking_script: Script::default(),
            })
            .collect();

        let mut tx = Transaction {
            version: CURRENT_VERSION,
            inputs: TxInputs::Regular(inputs),
            outputs,
            lock_time: 0,
        };
        tx.sign(wallet)?;
        debug!(tx = %hex::encode(tx.id()?), needed, change, "payment built");
        Ok(tx)
    }

    /// Double SHA-256 of the serialized transaction
    pub fn id(&self) -> Result<Hash> {
        Ok(double_sha256(&encoding::serialize(self)?))
    }

    pub fn id_hex(&self) -> Result<String> {
        Ok(hex::encode(self.id()?))
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs, TxInputs::Coinbase(_))
    }

    /// Spend references; empty for a coinbase
    pub fn regular_inputs(&self) -> &[TransactionInput] {
        match &self.inputs {
            TxInputs::Regular(inputs) => inputs,
            TxInputs::Coinbase(_) => &[],
        }
    }

    pub fn coinbase_height(&self) -> Option<Height> {
        match &self.inputs {
            TxInputs::Coinbase(cb) => cb.height(),
            TxInputs::Regular(_) => None,
        }
    }

    /// Copy with every unlocking script cleared
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = match &self.inputs {
            TxInputs::Regular(inputs) => TxInputs::Regular(
                inputs
                    .iter()
                    .map(|input| TransactionInput {
                        source_tx_id: input.source_tx_id,
                        output_index: input.output_index,
                        unlocking_script: Script::default(),
                    })
                    .collect(),
            ),
            TxInputs::Coinbase(cb) => TxInputs::Coinbase(cb.clone()),
        };
        Transaction {
            version: self.version,
            inputs,
            outputs: self.outputs.clone(),
            lock_time: self.lock_time,
        }
    }

    /// Message signed for input `input_index`: the id of the trimmed copy in
    /// which only that input carries the bare public key.
    pub fn signature_hash(&self, input_index: usize, pubkey: &[u8]) -> Result<Hash> {
        let mut copy = self.trimmed_copy();
        match &mut copy.inputs {
            TxInputs::Regular(inputs) => {
                let input = inputs.get_mut(input_index).ok_or_else(|| {
                    LedgerError::Validation(format!("No input at index {}", input_index))
                })?;
                input.unlocking_script = Script::pubkey_placeholder(pubkey.to_vec());
            }
            TxInputs::Coinbase(_) => {
                return Err(LedgerError::Validation("Coinbase inputs carry no signature".to_string()));
            }
        }
        copy.id()
    }

    /// Sign every input with `wallet`, storing `signature ‖ publicKey`
    pub fn sign(&mut self, wallet: &Wallet) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        let pubkey = wallet.public_key_bytes();
        let count = self.regular_inputs().len();
        for i in 0..count {
            let digest = self.signature_hash(i, &pubkey)?;
            let signature = wallet.sign(&digest)?;
            if let TxInputs::Regular(inputs) = &mut self.inputs {
                inputs[i].unlocking_script = Script::p2pkh_unlocking(signature, pubkey.clone());
            }
        }
        Ok(())
    }

    pub fn to_hex(&self) -> Result<String> {
        encoding::to_hex(self)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        encoding::from_hex(text)
    }
}

/// Id of a transaction given in its hex transport form
pub fn tx_id_from_hex(serialized: &str) -> Result<Hash> {
    Transaction::from_hex(serialized)?.id()
}

/// Checks `OP_CHECKSIG` against the signature hash of one input
pub struct TransactionSignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
}

impl<'a> TransactionSignatureChecker<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize) -> Self {
        Self { tx, input_index }
    }
}

impl SignatureChecker for TransactionSignatureChecker<'_> {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> bool {
        match self.tx.signature_hash(self.input_index, pubkey) {
            Ok(digest) => verify_signature(pubkey, signature, &digest),
            Err(_) => false,
        }
    }
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx = (v, ins, outs, lt) is structurally valid if and only if:
/// 1. |outs| > 0, and |ins| > 0 unless tx is a coinbase
/// 2. ∀o ∈ outs: o.value ≤ M_max
/// 3. |ins| ≤ M_max_inputs
/// 4. |outs| ≤ M_max_outputs
pub fn check_transaction(tx: &Transaction) -> Result<ValidationResult> {
    if tx.outputs.is_empty() {
        return Ok(ValidationResult::Invalid("Empty outputs".to_string()));
    }
    if let TxInputs::Regular(inputs) = &tx.inputs {
        if inputs.is_empty() {
            return Ok(ValidationResult::Invalid("Empty inputs".to_string()));
        }
        if inputs.len() > MAX_INPUTS {
            return Ok(ValidationResult::Invalid(format!("Too many inputs: {}", inputs.len())));
        }
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value > MAX_MONEY {
            return Ok(ValidationResult::Invalid(format!(
                "Invalid output value {} at index {}",
                output.value, i
            )));
        }
    }

    if tx.outputs.len() > MAX_OUTPUTS {
        return Ok(ValidationResult::Invalid(format!("Too many outputs: {}", tx.outputs.len())));
    }

    Ok(ValidationResult::Valid)
}

/// CheckTxInputs: 𝒯𝒳 × 𝒰𝒮 → {valid, invalid} × ℤ
///
/// For transaction tx against UTXO view us:
/// 1. If tx is coinbase: return (valid, 0)
/// 2. Every input must reference a distinct unspent output in us
/// 3. Every input's unlocking script must satisfy the referenced locking script
/// 4. If total_in < total_out: return (invalid, 0)
/// 5. Return (valid, total_in - total_out)
pub fn check_tx_inputs(tx: &Transaction, utxos: &dyn UtxoView) -> Result<(ValidationResult, Amount)> {
    let inputs = match &tx.inputs {
        TxInputs::Coinbase(_) => return Ok((ValidationResult::Valid, 0)),
        TxInputs::Regular(inputs) => inputs,
    };

    let mut seen = HashSet::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        if !seen.insert((input.source_tx_id, input.output_index)) {
            return Ok((ValidationResult::Invalid(format!("Input {} spends an output twice", i)), 0));
        }
    }

    let referenced = utxos.find_outputs_for_inputs(inputs)?;
    let mut input_values = Vec::with_capacity(inputs.len());

    for (i, (input, output)) in inputs.iter().zip(referenced.iter()).enumerate() {
        let output = match output {
            Some(output) => output,
            None => {
                return Ok((
                    ValidationResult::Invalid(format!(
                        "Input {} references missing or spent output {}:{}",
                        i,
                        hex::encode(input.source_tx_id),
                        input.output_index
                    )),
                    0,
                ));
            }
        };

        let checker = TransactionSignatureChecker::new(tx, i);
        if let Err(err) = script::execute(&input.unlocking_script, &output.locking_script, &checker) {
            return Ok((ValidationResult::Invalid(format!("Invalid script at input {}: {}", i, err)), 0));
        }
        input_values.push(output.value);
    }

    match calculate_fee(&input_values, &tx.outputs) {
        Some(fee) => Ok((ValidationResult::Valid, fee)),
        None => Ok((ValidationResult::Invalid("Insufficient input value".to_string()), 0)),
    }
}

/// Full acceptance check for one transaction against a UTXO view
pub fn verify_transaction(tx: &Transaction, utxos: &dyn UtxoView) -> Result<ValidationResult> {
    let structure = check_transaction(tx)?;
    if !structure.is_valid() {
        return Ok(structure);
    }
    Ok(check_tx_inputs(tx, utxos)?.0)
}
