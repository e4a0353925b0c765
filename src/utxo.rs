//! Unspent transaction output set
//!
//! Records are keyed by the hex id of the transaction that created them.
//! A spent output becomes a `None` slot; a record whose slots are all `None`
//! is deleted. "Storage order" is ascending key order, which every view
//! reproduces so that spend selection is the same whichever view it runs on.

use std::collections::BTreeMap;

use tracing::debug;

use crate::crypto::pubkey_hash_from_address;
use crate::encoding;
use crate::error::Result;
use crate::types::*;

/// Read access to a set of UTXO records
pub trait UtxoView {
    fn get_record(&self, tx_id: &Hash) -> Result<Option<UtxoRecord>>;

    /// Every record, in storage order
    fn records(&self) -> Result<Vec<UtxoRecord>>;

    /// Current output at `(tx_id, index)`, `None` if absent or spent
    fn find_output(&self, tx_id: &Hash, index: u32) -> Result<Option<TransactionOutput>> {
        Ok(self
            .get_record(tx_id)?
            .and_then(|record| record.outputs.get(index as usize).cloned().flatten()))
    }

    /// Resolve each input to the output it spends
    fn find_outputs_for_inputs(&self, inputs: &[TransactionInput]) -> Result<Vec<Option<TransactionOutput>>> {
        inputs
            .iter()
            .map(|input| self.find_output(&input.source_tx_id, input.output_index))
            .collect()
    }

    /// Greedy storage-order selection of outputs paying `address`, stopping
    /// as soon as the accumulated value exceeds `target`. The result is not
    /// the minimal set of outputs; it depends on storage order.
    fn find_spendable_for_address(&self, address: &str, target: Amount) -> Result<SpendableOutputs> {
        let pubkey_hash = pubkey_hash_from_address(address)?;
        let mut selection = SpendableOutputs::default();

        'scan: for record in self.records()? {
            for (index, slot) in record.outputs.iter().enumerate() {
                let output = match slot {
                    Some(output) if output.locking_script.pays_to(&pubkey_hash) => output,
                    _ => continue,
                };
                selection.accumulated += output.value;
                selection.outputs.push((record.origin_tx_id, index as u32));
                if selection.accumulated > target {
                    break 'scan;
                }
            }
        }

        Ok(selection)
    }

    fn balance_of(&self, address: &str) -> Result<Amount> {
        let pubkey_hash = pubkey_hash_from_address(address)?;
        let mut balance = 0;
        for record in self.records()? {
            balance += record
                .outputs
                .iter()
                .flatten()
                .filter(|output| output.locking_script.pays_to(&pubkey_hash))
                .map(|output| output.value)
                .sum::<Amount>();
        }
        Ok(balance)
    }
}

fn record_key(tx_id: &Hash) -> String {
    hex::encode(tx_id)
}

/// Mark each referenced slot spent in `records`, deleting exhausted records.
/// `records` maps key → record, where `None` stands for a deleted record.
fn spend_inputs<F>(inputs: &[TransactionInput], mut load: F, records: &mut BTreeMap<String, Option<UtxoRecord>>) -> Result<()>
where
    F: FnMut(&Hash) -> Result<Option<UtxoRecord>>,
{
    for input in inputs {
        let key = record_key(&input.source_tx_id);
        let current = match records.get(&key) {
            Some(staged) => staged.clone(),
            None => load(&input.source_tx_id)?,
        };
        let Some(mut record) = current else { continue };
        if let Some(slot) = record.outputs.get_mut(input.output_index as usize) {
            *slot = None;
        }
        let next = if record.is_fully_spent() { None } else { Some(record) };
        records.insert(key, next);
    }
    Ok(())
}

/// Persistent UTXO set backed by a sled tree
#[derive(Clone)]
pub struct UtxoSet {
    tree: sled::Tree,
}

impl UtxoSet {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    /// Insert or overwrite the record keyed by its origin transaction id
    pub fn add_utxo(&self, record: &UtxoRecord) -> Result<()> {
        self.tree
            .insert(record_key(&record.origin_tx_id), encoding::serialize(record)?)?;
        Ok(())
    }

    /// Mark every referenced slot `None`, deleting records once fully spent
    pub fn remove_spent(&self, inputs: &[TransactionInput]) -> Result<()> {
        let mut changes = BTreeMap::new();
        spend_inputs(inputs, |tx_id| self.get_record(tx_id), &mut changes)?;
        for (key, record) in changes {
            match record {
                Some(record) => {
                    self.tree.insert(key, encoding::serialize(&record)?)?;
                }
                None => {
                    self.tree.remove(key)?;
                    debug!("utxo record exhausted");
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl UtxoView for UtxoSet {
    fn get_record(&self, tx_id: &Hash) -> Result<Option<UtxoRecord>> {
        match self.tree.get(record_key(tx_id))? {
            Some(bytes) => Ok(Some(encoding::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn records(&self) -> Result<Vec<UtxoRecord>> {
        let mut records = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            records.push(encoding::deserialize(&value)?);
        }
        Ok(records)
    }
}

/// In-memory overlay of pending changes on top of another view.
///
/// Block validation applies each transaction here in order, so later
/// transactions see earlier spends, and the base view is only written once
/// the whole block has passed.
pub struct StagedUtxos<'a> {
    base: &'a dyn UtxoView,
    changes: BTreeMap<String, Option<UtxoRecord>>,
}

impl<'a> StagedUtxos<'a> {
    pub fn new(base: &'a dyn UtxoView) -> Self {
        Self { base, changes: BTreeMap::new() }
    }

    /// Stage the effect of confirming `tx`: spend its inputs, add its outputs
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        let base = self.base;
        spend_inputs(tx.regular_inputs(), |tx_id| base.get_record(tx_id), &mut self.changes)?;
        let record = UtxoRecord::new(tx.id()?, &tx.outputs);
        self.changes.insert(record_key(&record.origin_tx_id), Some(record));
        Ok(())
    }

    /// Pending writes: key → record, `None` meaning delete
    pub fn into_changes(self) -> BTreeMap<String, Option<UtxoRecord>> {
        self.changes
    }
}

impl UtxoView for StagedUtxos<'_> {
    fn get_record(&self, tx_id: &Hash) -> Result<Option<UtxoRecord>> {
        match self.changes.get(&record_key(tx_id)) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get_record(tx_id),
        }
    }

    fn records(&self) -> Result<Vec<UtxoRecord>> {
        let mut merged: BTreeMap<String, UtxoRecord> = self
            .base
            .records()?
            .into_iter()
            .map(|record| (record_key(&record.origin_tx_id), record))
            .collect();
        for (key, staged) in &self.changes {
            match staged {
                Some(record) => {
                    merged.insert(key.clone(), record.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_values().collect())
    }
}

/// Plain in-memory view for unit tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryUtxos {
    records: BTreeMap<String, UtxoRecord>,
}

#[cfg(test)]
impl MemoryUtxos {
    pub(crate) fn insert(&mut self, record: UtxoRecord) {
        self.records.insert(record_key(&record.origin_tx_id), record);
    }
}

#[cfg(test)]
impl UtxoView for MemoryUtxos {
    fn get_record(&self, tx_id: &Hash) -> Result<Option<UtxoRecord>> {
        Ok(self.records.get(&record_key(tx_id)).cloned())
    }

    fn records(&self) -> Result<Vec<UtxoRecord>> {
        Ok(self.records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::crypto::Wallet;
    use crate::script::Script;

    fn temp_set() -> UtxoSet {
        let db = sled::Config::new().temporary(true).open().unwrap();
        UtxoSet::new(db.open_tree("utxos").unwrap())
    }

    fn pay(wallet: &Wallet, value: Amount) -> TransactionOutput {
        TransactionOutput {
            value,
            locking_script: Script::p2pkh_locking(&wallet.pubkey_hash()),
        }
    }

    fn spend(tx_id: Hash, output_index: u32) -> TransactionInput {
        TransactionInput {
            source_tx_id: tx_id,
            output_index,
            unlocking_script: Script::default(),
        }
    }

    #[test]
    fn test_add_and_balance() {
        let set = temp_set();
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        set.add_utxo(&UtxoRecord::new([1; 32], &[pay(&alice, 5 * COIN), pay(&bob, 2 * COIN)])).unwrap();
        set.add_utxo(&UtxoRecord::new([2; 32], &[pay(&alice, COIN)])).unwrap();

        assert_eq!(set.balance_of(&alice.address()).unwrap(), 6 * COIN);
        assert_eq!(set.balance_of(&bob.address()).unwrap(), 2 * COIN);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_spent_nulls_then_deletes() {
        let set = temp_set();
        let alice = Wallet::generate();
        set.add_utxo(&UtxoRecord::new([1; 32], &[pay(&alice, 1), pay(&alice, 2)])).unwrap();

        set.remove_spent(&[spend([1; 32], 0)]).unwrap();
        let record = set.get_record(&[1; 32]).unwrap().unwrap();
        assert_eq!(record.outputs[0], None);
        assert!(record.outputs[1].is_some());
        assert_eq!(set.find_output(&[1; 32], 0).unwrap(), None);

        set.remove_spent(&[spend([1; 32], 1)]).unwrap();
        assert_eq!(set.get_record(&[1; 32]).unwrap(), None);
        assert!(set.is_empty());
    }

    #[test]
    fn test_find_outputs_for_inputs() {
        let set = temp_set();
        let alice = Wallet::generate();
        set.add_utxo(&UtxoRecord::new([1; 32], &[pay(&alice, 7)])).unwrap();

        let found = set
            .find_outputs_for_inputs(&[spend([1; 32], 0), spend([1; 32], 5), spend([9; 32], 0)])
            .unwrap();
        assert_eq!(found[0].as_ref().map(|o| o.value), Some(7));
        assert_eq!(found[1], None);
        assert_eq!(found[2], None);
    }

    #[test]
    fn test_greedy_selection_in_storage_order() {
        let set = temp_set();
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        // keys sort as 01.. < 02.. < 03..
        set.add_utxo(&UtxoRecord::new([3; 32], &[pay(&alice, 10)])).unwrap();
        set.add_utxo(&UtxoRecord::new([1; 32], &[pay(&alice, 4), pay(&bob, 100)])).unwrap();
        set.add_utxo(&UtxoRecord::new([2; 32], &[pay(&alice, 3)])).unwrap();

        let selection = set.find_spendable_for_address(&alice.address(), 5).unwrap();
        assert_eq!(selection.accumulated, 7);
        assert_eq!(selection.outputs, vec![([1; 32], 0), ([2; 32], 0)]);

        // not the single 10-unit output, even though it would suffice alone
        let selection = set.find_spendable_for_address(&alice.address(), 7).unwrap();
        assert_eq!(selection.accumulated, 17);
        assert_eq!(selection.outputs.len(), 3);

        let selection = set.find_spendable_for_address(&alice.address(), 1_000).unwrap();
        assert_eq!(selection.accumulated, 17);
    }

    #[test]
    fn test_staged_overlay_hides_spent_and_shows_new() {
        let set = temp_set();
        let alice = Wallet::generate();
        let source = crate::types::Transaction {
            version: 1,
            inputs: TxInputs::Regular(vec![spend([9; 32], 0)]),
            outputs: vec![pay(&alice, 4)],
            lock_time: 0,
        };
        set.add_utxo(&UtxoRecord::new([9; 32], &[pay(&alice, 5)])).unwrap();

        let mut staged = StagedUtxos::new(&set);
        staged.apply(&source).unwrap();
        assert_eq!(staged.find_output(&[9; 32], 0).unwrap(), None);
        assert_eq!(staged.balance_of(&alice.address()).unwrap(), 4);
        // base untouched
        assert_eq!(set.balance_of(&alice.address()).unwrap(), 5);

        let changes = staged.into_changes();
        assert_eq!(changes.get(&hex::encode([9u8; 32])), Some(&None));
        assert_eq!(changes.len(), 2);
    }
}
