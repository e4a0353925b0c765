//! Core ledger types

use serde::{Deserialize, Serialize};

use crate::script::Script;

/// Hash type: 256-bit double SHA-256 digest
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Value in base units (see [`crate::constants::COIN`])
pub type Amount = u64;

/// Block height, genesis is 0
pub type Height = u64;

/// Transaction Output: value locked by a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Amount,
    pub locking_script: Script,
}

/// Transaction Input: spends output `output_index` of transaction `source_tx_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub source_tx_id: Hash,
    pub output_index: u32,
    pub unlocking_script: Script,
}

/// Coinbase input: carries the block height and free-form miner data.
///
/// Both fields are stored length-prefixed, the height as minimal
/// little-endian bytes, so the height can be recovered from the raw field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseInput {
    pub coinbase: ByteString,
}

/// The two kinds of transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxInputs {
    Regular(Vec<TransactionInput>),
    Coinbase(CoinbaseInput),
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: TxInputs,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

/// Block Header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub parent_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: i64,
    pub difficulty_bits: u32,
    pub nonce: u64,
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transaction_count: u32,
    pub transactions: Vec<Transaction>,
}

/// Unspent outputs of one transaction; `None` marks a spent slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub origin_tx_id: Hash,
    pub outputs: Vec<Option<TransactionOutput>>,
}

/// Persisted tip pointer of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipRecord {
    pub tip_hash: Hash,
    pub height: Height,
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Selection made by [`crate::utxo::UtxoSet::find_spendable_for_address`]:
/// accumulated value plus the `(tx id, output index)` slots chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpendableOutputs {
    pub accumulated: Amount,
    pub outputs: Vec<(Hash, u32)>,
}

impl UtxoRecord {
    pub fn new(origin_tx_id: Hash, outputs: &[TransactionOutput]) -> Self {
        Self {
            origin_tx_id,
            outputs: outputs.iter().cloned().map(Some).collect(),
        }
    }

    /// True once every slot has been spent
    pub fn is_fully_spent(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }
}
