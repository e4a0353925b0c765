//! Block assembly and validation

use tracing::debug;

use crate::constants::*;
use crate::crypto::double_sha256;
use crate::economic::get_block_subsidy;
use crate::encoding;
use crate::error::Result;
use crate::merkle::merkle_root;
use crate::pow;
use crate::transaction::{check_transaction, check_tx_inputs};
use crate::types::*;
use crate::utxo::{StagedUtxos, UtxoView};

impl BlockHeader {
    /// Double SHA-256 of the serialized header
    pub fn hash(&self) -> Result<Hash> {
        Ok(double_sha256(&encoding::serialize(self)?))
    }
}

impl Block {
    /// Build an unmined block over `transactions`, stamped with the current time
    pub fn new(parent_hash: Hash, transactions: Vec<Transaction>, difficulty_bits: u32) -> Result<Self> {
        let merkle_root = compute_merkle_root(&transactions)?;
        Ok(Block {
            header: BlockHeader {
                version: CURRENT_VERSION,
                parent_hash,
                merkle_root,
                timestamp: chrono::Utc::now().timestamp(),
                difficulty_bits,
                nonce: 0,
            },
            transaction_count: transactions.len() as u32,
            transactions,
        })
    }

    /// Build and mine a block in one step
    pub fn assemble(parent_hash: Hash, transactions: Vec<Transaction>, difficulty_bits: u32) -> Result<Self> {
        let mut block = Self::new(parent_hash, transactions, difficulty_bits)?;
        let (hash, nonce) = pow::mine(&mut block.header)?;
        debug!(hash = %hex::encode(hash), nonce, "block mined");
        Ok(block)
    }

    /// Height-0 block paying `subsidy(0)` to `address`
    pub fn genesis(address: &str, coinbase_data: &str, difficulty_bits: u32) -> Result<Self> {
        let coinbase = Transaction::new_coinbase(0, coinbase_data, address, get_block_subsidy(0))?;
        Self::assemble(GENESIS_PARENT_HASH, vec![coinbase], difficulty_bits)
    }

    pub fn hash(&self) -> Result<Hash> {
        self.header.hash()
    }

    /// Height carried by the coinbase, `None` without a well-formed coinbase first
    pub fn height(&self) -> Option<Height> {
        self.transactions.first()?.coinbase_height()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.parent_hash == GENESIS_PARENT_HASH
    }

    pub fn to_hex(&self) -> Result<String> {
        encoding::to_hex(self)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        encoding::from_hex(text)
    }

    /// Recompute the Merkle root and compare with the header
    pub fn verify_merkle_root(&self) -> Result<bool> {
        if self.transactions.is_empty() {
            return Ok(false);
        }
        Ok(compute_merkle_root(&self.transactions)? == self.header.merkle_root)
    }
}

pub fn compute_merkle_root(transactions: &[Transaction]) -> Result<Hash> {
    let ids = transactions.iter().map(Transaction::id).collect::<Result<Vec<_>>>()?;
    merkle_root(&ids)
}

/// Where a block must attach (the current tip, or nothing for genesis) and
/// the difficulty the chain requires of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPosition {
    pub parent_hash: Hash,
    pub height: Height,
    pub difficulty_bits: u32,
}

impl ChainPosition {
    pub fn after(tip: Option<TipRecord>, difficulty_bits: u32) -> Self {
        match tip {
            Some(tip) => Self {
                parent_hash: tip.tip_hash,
                height: tip.height + 1,
                difficulty_bits,
            },
            None => Self {
                parent_hash: GENESIS_PARENT_HASH,
                height: 0,
                difficulty_bits,
            },
        }
    }
}

/// ConnectBlock: ℬ × 𝒰𝒮 × ℕ → {valid, invalid} × 𝒰𝒮
///
/// For block b = (h, txs) attaching at position p over UTXO view us:
/// 1. |txs| > 0 and h.transaction_count = |txs|
/// 2. h.parent_hash = p.parent_hash and height(b) = p.height
/// 3. h.difficulty_bits = p.difficulty_bits, CheckProofOfWork(h) and
///    MerkleRoot(txs) = h.merkle_root
/// 4. txs[0] is the only coinbase
/// 5. For each tx ∈ txs in order: CheckTransaction(tx), CheckTxInputs(tx, us'),
///    then apply tx to the staged view us'
/// 6. Coinbase outputs ≤ GetBlockSubsidy(p.height) + Σ fees
/// 7. Return (valid, us')
///
/// The base view is never written; the caller commits the returned stage.
pub fn connect_block<'a>(
    block: &Block,
    utxos: &'a dyn UtxoView,
    position: ChainPosition,
) -> Result<(ValidationResult, StagedUtxos<'a>)> {
    let mut staged = StagedUtxos::new(utxos);

    if block.transactions.is_empty() {
        return Ok((ValidationResult::Invalid("Block has no transactions".to_string()), staged));
    }
    if block.transaction_count as usize != block.transactions.len() {
        return Ok((
            ValidationResult::Invalid(format!(
                "Transaction count {} does not match {} transactions",
                block.transaction_count,
                block.transactions.len()
            )),
            staged,
        ));
    }

    if block.header.parent_hash != position.parent_hash {
        return Ok((ValidationResult::Invalid("Block does not extend the tip".to_string()), staged));
    }
    match block.height() {
        Some(height) if height == position.height => {}
        other => {
            return Ok((
                ValidationResult::Invalid(format!("Expected height {}, block claims {:?}", position.height, other)),
                staged,
            ));
        }
    }

    if block.header.difficulty_bits != position.difficulty_bits {
        return Ok((
            ValidationResult::Invalid(format!(
                "Unexpected difficulty bits {}, chain requires {}",
                block.header.difficulty_bits, position.difficulty_bits
            )),
            staged,
        ));
    }
    if !pow::verify(&block.header)? {
        return Ok((ValidationResult::Invalid("Proof of work below target".to_string()), staged));
    }
    if !block.verify_merkle_root()? {
        return Ok((ValidationResult::Invalid("Merkle root mismatch".to_string()), staged));
    }

    if let Some(i) = block.transactions.iter().skip(1).position(Transaction::is_coinbase) {
        return Ok((ValidationResult::Invalid(format!("Extra coinbase at index {}", i + 1)), staged));
    }

    let mut total_fees: Amount = 0;
    for (i, tx) in block.transactions.iter().enumerate() {
        if let ValidationResult::Invalid(reason) = check_transaction(tx)? {
            return Ok((ValidationResult::Invalid(format!("Transaction {}: {}", i, reason)), staged));
        }

        let (inputs_valid, fee) = check_tx_inputs(tx, &staged)?;
        if let ValidationResult::Invalid(reason) = inputs_valid {
            return Ok((ValidationResult::Invalid(format!("Transaction {}: {}", i, reason)), staged));
        }
        total_fees = match total_fees.checked_add(fee) {
            Some(total) => total,
            None => return Ok((ValidationResult::Invalid("Fee total overflows".to_string()), staged)),
        };

        staged.apply(tx)?;
    }

    let allowed = get_block_subsidy(position.height).saturating_add(total_fees);
    let claimed: u128 = block.transactions[0].outputs.iter().map(|o| o.value as u128).sum();
    if claimed > allowed as u128 {
        return Ok((
            ValidationResult::Invalid(format!("Coinbase claims {} but at most {} is allowed", claimed, allowed)),
            staged,
        ));
    }

    Ok((ValidationResult::Valid, staged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Wallet;
    use crate::utxo::MemoryUtxos;

    const BITS: u32 = 6;

    fn mine_next(position: ChainPosition, txs: Vec<Transaction>) -> Block {
        Block::assemble(position.parent_hash, txs, BITS).unwrap()
    }

    #[test]
    fn test_header_hash_is_deterministic_and_field_sensitive() {
        let block = Block::new([1; 32], vec![], BITS);
        assert!(block.is_err(), "empty transaction list has no merkle root");

        let wallet = Wallet::generate();
        let block = Block::genesis(&wallet.address(), "g", BITS).unwrap();
        let first = block.hash().unwrap();
        assert_eq!(first, block.hash().unwrap());

        let mut changed = block.header.clone();
        changed.timestamp += 1;
        assert_ne!(changed.hash().unwrap(), first);
    }

    #[test]
    fn test_genesis_connects_on_empty_chain() {
        let wallet = Wallet::generate();
        let genesis = Block::genesis(&wallet.address(), GENESIS_COINBASE_DATA, BITS).unwrap();
        assert_eq!(genesis.height(), Some(0));
        assert!(genesis.is_genesis());

        let utxos = MemoryUtxos::default();
        let (result, staged) = connect_block(&genesis, &utxos, ChainPosition::after(None, BITS)).unwrap();
        assert_eq!(result, ValidationResult::Valid);
        assert_eq!(staged.balance_of(&wallet.address()).unwrap(), get_block_subsidy(0));
    }

    #[test]
    fn test_rejects_wrong_parent_and_height() {
        let wallet = Wallet::generate();
        let genesis = Block::genesis(&wallet.address(), "g", BITS).unwrap();
        let tip = TipRecord { tip_hash: genesis.hash().unwrap(), height: 0 };
        let utxos = MemoryUtxos::default();

        // a second genesis does not extend the tip
        let (result, _) = connect_block(&genesis, &utxos, ChainPosition::after(Some(tip), BITS)).unwrap();
        assert!(!result.is_valid());

        // right parent, wrong height
        let coinbase = Transaction::new_coinbase(5, "x", &wallet.address(), 1).unwrap();
        let block = mine_next(ChainPosition::after(Some(tip), BITS), vec![coinbase]);
        let (result, _) = connect_block(&block, &utxos, ChainPosition::after(Some(tip), BITS)).unwrap();
        assert!(matches!(result, ValidationResult::Invalid(reason) if reason.contains("height")));
    }

    #[test]
    fn test_rejects_tampered_merkle_root_and_count() {
        let wallet = Wallet::generate();
        let utxos = MemoryUtxos::default();

        let mut block = Block::genesis(&wallet.address(), "g", BITS).unwrap();
        block.transaction_count = 2;
        let (result, _) = connect_block(&block, &utxos, ChainPosition::after(None, BITS)).unwrap();
        assert!(!result.is_valid());

        let mut block = Block::genesis(&wallet.address(), "g", BITS).unwrap();
        block.transactions[0].outputs[0].value += 1;
        assert!(!block.verify_merkle_root().unwrap());
        let (result, _) = connect_block(&block, &utxos, ChainPosition::after(None, BITS)).unwrap();
        assert!(!result.is_valid());
    }

    #[test]
    fn test_rejects_header_with_other_difficulty() {
        let wallet = Wallet::generate();
        let utxos = MemoryUtxos::default();

        // zero bits: any hash meets the target, nonce 0 is enough
        let coinbase = Transaction::new_coinbase(0, "g", &wallet.address(), get_block_subsidy(0)).unwrap();
        let zero_work = Block::new(GENESIS_PARENT_HASH, vec![coinbase], 0).unwrap();
        assert!(pow::verify(&zero_work.header).unwrap());
        let (result, _) = connect_block(&zero_work, &utxos, ChainPosition::after(None, BITS)).unwrap();
        assert!(matches!(result, ValidationResult::Invalid(reason) if reason.contains("Unexpected difficulty bits")));

        // harder than required is still a mismatch
        let harder = Block::genesis(&wallet.address(), "g", BITS + 1).unwrap();
        let (result, _) = connect_block(&harder, &utxos, ChainPosition::after(None, BITS)).unwrap();
        assert!(!result.is_valid());
    }

    #[test]
    fn test_rejects_overpaid_coinbase() {
        let wallet = Wallet::generate();
        let coinbase = Transaction::new_coinbase(0, "g", &wallet.address(), get_block_subsidy(0) + 1).unwrap();
        let block = mine_next(ChainPosition::after(None, BITS), vec![coinbase]);
        let (result, _) = connect_block(&block, &MemoryUtxos::default(), ChainPosition::after(None, BITS)).unwrap();
        assert!(matches!(result, ValidationResult::Invalid(reason) if reason.contains("Coinbase claims")));
    }

    #[test]
    fn test_rejects_double_spend_within_block() {
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        let genesis = Block::genesis(&alice.address(), "g", BITS).unwrap();

        let mut utxos = MemoryUtxos::default();
        let coinbase = &genesis.transactions[0];
        utxos.insert(UtxoRecord::new(coinbase.id().unwrap(), &coinbase.outputs));
        let tip = TipRecord { tip_hash: genesis.hash().unwrap(), height: 0 };

        let to_bob = Transaction::new_payment(&alice, &[(bob.address(), COIN)], 0, &utxos).unwrap();
        let to_bob_again = Transaction::new_payment(&alice, &[(bob.address(), 2 * COIN)], 0, &utxos).unwrap();

        let position = ChainPosition::after(Some(tip), BITS);
        let miner_cb = Transaction::new_coinbase(1, "m", &bob.address(), get_block_subsidy(1)).unwrap();
        let block = mine_next(position, vec![miner_cb.clone(), to_bob.clone()]);
        let (result, _) = connect_block(&block, &utxos, position).unwrap();
        assert_eq!(result, ValidationResult::Valid);

        let block = mine_next(position, vec![miner_cb, to_bob, to_bob_again]);
        let (result, _) = connect_block(&block, &utxos, position).unwrap();
        assert!(matches!(result, ValidationResult::Invalid(reason) if reason.starts_with("Transaction 2")));
    }

    #[test]
    fn test_hex_round_trip() {
        let wallet = Wallet::generate();
        let block = Block::genesis(&wallet.address(), "g", BITS).unwrap();
        assert_eq!(Block::from_hex(&block.to_hex().unwrap()).unwrap(), block);
    }
}
