//! Chain state over a persisted tip pointer
//!
//! Appending a block is all-or-nothing: the block is validated against a
//! staged view of the UTXO set, and only when every check passes are the
//! block, the new tip and every UTXO change written in one sled transaction.

use sled::transaction::{ConflictableTransactionError, TransactionResult, Transactional};
use tracing::{debug, info};

use crate::block::{connect_block, ChainPosition};
use crate::economic::format_amount;
use crate::encoding;
use crate::error::{LedgerError, Result};
use crate::storage::{Storage, TIP_KEY};
use crate::types::*;
use crate::utxo::UtxoSet;

#[derive(Clone)]
pub struct BlockChain {
    storage: Storage,
    utxos: UtxoSet,
    difficulty_bits: u32,
}

impl BlockChain {
    /// Every block on this chain must carry `difficulty_bits` in its header
    pub fn new(storage: Storage, difficulty_bits: u32) -> Self {
        let utxos = UtxoSet::new(storage.utxos().clone());
        Self {
            storage,
            utxos,
            difficulty_bits,
        }
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn tip(&self) -> Result<Option<TipRecord>> {
        match self.storage.blocks().get(TIP_KEY)? {
            Some(bytes) => Ok(Some(encoding::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// `None` until genesis is appended
    pub fn best_height(&self) -> Result<Option<Height>> {
        Ok(self.tip()?.map(|tip| tip.height))
    }

    pub fn best_block_hash(&self) -> Result<Option<Hash>> {
        Ok(self.tip()?.map(|tip| tip.tip_hash))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tip()?.is_none())
    }

    /// Where the next block attaches and the difficulty it must carry
    pub fn next_position(&self) -> Result<ChainPosition> {
        Ok(ChainPosition::after(self.tip()?, self.difficulty_bits))
    }

    /// Validate `block` as the next block on this chain without mutating anything
    pub fn verify_block(&self, block: &Block) -> Result<ValidationResult> {
        let position = self.next_position()?;
        Ok(connect_block(block, &self.utxos, position)?.0)
    }

    /// AddBlock: validate, then persist the block, move the tip and confirm
    /// its transactions as one atomic write. An invalid block leaves the
    /// chain untouched and is reported as `Ok(Invalid(reason))`.
    pub fn add_block(&self, block: &Block) -> Result<ValidationResult> {
        let position = self.next_position()?;
        let (result, staged) = connect_block(block, &self.utxos, position)?;
        if let ValidationResult::Invalid(reason) = &result {
            debug!(%reason, "block rejected");
            return Ok(result);
        }

        let hash = block.hash()?;
        let block_key = hex::encode(hash);
        let block_bytes = encoding::serialize(block)?;
        let tip_bytes = encoding::serialize(&TipRecord {
            tip_hash: hash,
            height: position.height,
        })?;
        let utxo_writes = staged
            .into_changes()
            .into_iter()
            .map(|(key, record)| Ok((key, record.map(|r| encoding::serialize(&r)).transpose()?)))
            .collect::<Result<Vec<_>>>()?;

        let committed: TransactionResult<(), ()> =
            (self.storage.blocks(), self.utxos.tree()).transaction(|(blocks, utxos)| {
                blocks.insert(block_key.as_bytes(), block_bytes.as_slice())?;
                blocks.insert(TIP_KEY, tip_bytes.as_slice())?;
                for (key, record) in &utxo_writes {
                    match record {
                        Some(bytes) => {
                            utxos.insert(key.as_bytes(), bytes.as_slice())?;
                        }
                        None => {
                            utxos.remove(key.as_bytes())?;
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            });
        committed.map_err(|err| LedgerError::Storage(format!("{:?}", err)))?;

        info!(
            height = position.height,
            hash = %block_key,
            transactions = block.transactions.len(),
            "block accepted"
        );
        Ok(ValidationResult::Valid)
    }

    /// Mine and append a height-0 block paying `subsidy(0)` to `address`
    pub fn create_genesis(&self, address: &str, coinbase_data: &str) -> Result<Block> {
        if !self.is_empty()? {
            return Err(LedgerError::Validation("Chain already has a genesis block".to_string()));
        }
        let genesis = Block::genesis(address, coinbase_data, self.difficulty_bits)?;
        match self.add_block(&genesis)? {
            ValidationResult::Valid => Ok(genesis),
            ValidationResult::Invalid(reason) => Err(LedgerError::Validation(reason)),
        }
    }

    /// Direct keyed read, used by the backward walk
    fn load_block(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.storage.blocks().get(hex::encode(hash))? {
            Some(bytes) => Ok(Some(encoding::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Blocks from the tip back to genesis
    pub fn blocks(&self) -> Result<BlockIter<'_>> {
        Ok(BlockIter {
            chain: self,
            next: self.best_block_hash()?,
        })
    }

    /// Walk from the tip following parent links; `None` if `hash` is not on this chain
    pub fn find_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        for block in self.blocks()? {
            let block = block?;
            if block.hash()? == *hash {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Walk from the tip looking for a confirmed transaction
    pub fn find_transaction(&self, tx_id: &Hash) -> Result<Option<Transaction>> {
        for block in self.blocks()? {
            for tx in block?.transactions {
                if tx.id()? == *tx_id {
                    return Ok(Some(tx));
                }
            }
        }
        Ok(None)
    }

    /// Every block, tip first, rendered as pretty JSON
    pub fn print_blocks(&self) -> Result<String> {
        let mut rendered = Vec::new();
        for block in self.blocks()? {
            rendered.push(serde_json::to_string_pretty(&block_json(&block?)?)?);
        }
        Ok(rendered.join("\n"))
    }
}

pub struct BlockIter<'a> {
    chain: &'a BlockChain,
    next: Option<Hash>,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.chain.load_block(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.next = Some(block.header.parent_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(LedgerError::MissingReference(format!("block {}", hex::encode(hash))))),
            Err(err) => Some(Err(err)),
        }
    }
}

fn block_json(block: &Block) -> Result<serde_json::Value> {
    let mut transactions = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let inputs: Vec<serde_json::Value> = match &tx.inputs {
            TxInputs::Coinbase(input) => vec![serde_json::json!({
                "coinbase": hex::encode(&input.coinbase),
                "height": input.height(),
                "miner_data": input.miner_data().map(String::from_utf8_lossy),
            })],
            TxInputs::Regular(inputs) => inputs
                .iter()
                .map(|input| {
                    serde_json::json!({
                        "source_tx_id": hex::encode(input.source_tx_id),
                        "output_index": input.output_index,
                        "unlocking_script": input.unlocking_script.to_string(),
                    })
                })
                .collect(),
        };
        let outputs: Vec<serde_json::Value> = tx
            .outputs
            .iter()
            .map(|output| {
                serde_json::json!({
                    "value": format_amount(output.value),
                    "locking_script": output.locking_script.to_string(),
                })
            })
            .collect();
        transactions.push(serde_json::json!({
            "id": tx.id_hex()?,
            "version": tx.version,
            "inputs": inputs,
            "outputs": outputs,
            "lock_time": tx.lock_time,
        }));
    }

    let timestamp = chrono::DateTime::from_timestamp(block.header.timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| block.header.timestamp.to_string());

    Ok(serde_json::json!({
        "hash": hex::encode(block.hash()?),
        "height": block.height(),
        "version": block.header.version,
        "parent_hash": hex::encode(block.header.parent_hash),
        "merkle_root": hex::encode(block.header.merkle_root),
        "timestamp": timestamp,
        "difficulty_bits": block.header.difficulty_bits,
        "nonce": block.header.nonce,
        "transactions": transactions,
    }))
}
