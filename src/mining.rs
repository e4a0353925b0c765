//! Block production from the memory pool

use tracing::{info, warn};

use crate::blockchain::BlockChain;
use crate::economic::get_block_subsidy;
use crate::error::Result;
use crate::mempool::MemoryPool;
use crate::transaction::{check_transaction, check_tx_inputs};
use crate::types::*;
use crate::utxo::StagedUtxos;

/// CreateNewBlock: 𝒰𝒮 × 𝒯𝒳* → ℬ
///
/// For the chain tip, UTXO set us and pooled transactions txs:
/// 1. Drain txs in FIFO order, keeping each tx that is valid against us
///    with every previously kept tx applied; dropping the rest
/// 2. Coinbase pays GetBlockSubsidy(height) + Σ fees of the kept txs
/// 3. Commit the Merkle root over coinbase ‖ kept txs and mine
///
/// The memory pool is left empty. The block is returned unappended.
pub fn produce_block(
    chain: &BlockChain,
    mempool: &mut MemoryPool,
    miner_address: &str,
    coinbase_data: &str,
) -> Result<Block> {
    let position = chain.next_position()?;
    let mut staged = StagedUtxos::new(chain.utxos());
    let mut selected = Vec::new();
    let mut fees: Amount = 0;

    while let Some(tx) = mempool.dequeue() {
        let tx_id = tx.id_hex()?;
        if tx.is_coinbase() {
            warn!(tx = %tx_id, "dropping pooled coinbase");
            continue;
        }
        if let ValidationResult::Invalid(reason) = check_transaction(&tx)? {
            warn!(tx = %tx_id, %reason, "dropping invalid transaction");
            continue;
        }
        match check_tx_inputs(&tx, &staged)? {
            (ValidationResult::Valid, fee) => {
                fees = fees.saturating_add(fee);
                staged.apply(&tx)?;
                selected.push(tx);
            }
            (ValidationResult::Invalid(reason), _) => {
                warn!(tx = %tx_id, %reason, "dropping invalid transaction");
            }
        }
    }

    let reward = get_block_subsidy(position.height).saturating_add(fees);
    let coinbase = Transaction::new_coinbase(position.height, coinbase_data, miner_address, reward)?;

    let mut transactions = Vec::with_capacity(selected.len() + 1);
    transactions.push(coinbase);
    transactions.extend(selected);

    let block = Block::assemble(position.parent_hash, transactions, position.difficulty_bits)?;
    info!(
        height = position.height,
        hash = %hex::encode(block.hash()?),
        nonce = block.header.nonce,
        transactions = block.transactions.len(),
        "produced block"
    );
    Ok(block)
}
