//! End-to-end ledger tests over a persisted chain

use ledger_sim::*;
use ledger_sim::economic::get_block_subsidy;
use ledger_sim::mining::produce_block;
use ledger_sim::transaction::tx_id_from_hex;

const BITS: u32 = 8;

fn fresh_chain() -> BlockChain {
    BlockChain::new(Storage::temporary().unwrap(), BITS)
}

#[test]
fn test_genesis_payment_and_mined_fee() {
    let chain = fresh_chain();
    let alice = Wallet::generate();
    let bob = Wallet::generate();
    let miner = Wallet::generate();

    chain.create_genesis(&alice.address(), GENESIS_COINBASE_DATA).unwrap();
    assert_eq!(chain.utxos().balance_of(&alice.address()).unwrap(), get_block_subsidy(0));

    let fee = 5 * COIN / 100;
    let payment = Transaction::new_payment(&alice, &[(bob.address(), 10 * COIN)], fee, chain.utxos()).unwrap();

    let mut pool = MemoryPool::new();
    pool.enqueue(payment.clone());
    let block = produce_block(&chain, &mut pool, &miner.address(), "miner").unwrap();
    assert_eq!(block.transactions[0].outputs[0].value, get_block_subsidy(1) + fee);
    assert_eq!(chain.add_block(&block).unwrap(), ValidationResult::Valid);

    assert_eq!(chain.best_height().unwrap(), Some(1));
    assert_eq!(chain.best_block_hash().unwrap(), Some(block.hash().unwrap()));
    assert_eq!(
        chain.utxos().balance_of(&alice.address()).unwrap(),
        get_block_subsidy(0) - 10 * COIN - fee
    );
    assert_eq!(chain.utxos().balance_of(&bob.address()).unwrap(), 10 * COIN);
    assert_eq!(
        chain.utxos().balance_of(&miner.address()).unwrap(),
        get_block_subsidy(1) + fee
    );

    assert_eq!(chain.find_transaction(&payment.id().unwrap()).unwrap(), Some(payment.clone()));
    assert_eq!(tx_id_from_hex(&payment.to_hex().unwrap()).unwrap(), payment.id().unwrap());
}

#[test]
fn test_double_spend_rejected_after_confirmation() {
    let chain = fresh_chain();
    let alice = Wallet::generate();
    let bob = Wallet::generate();
    let carol = Wallet::generate();
    let genesis = chain.create_genesis(&alice.address(), "g").unwrap();

    // both spend the single genesis output
    let to_bob = Transaction::new_payment(&alice, &[(bob.address(), COIN)], 0, chain.utxos()).unwrap();
    let to_carol = Transaction::new_payment(&alice, &[(carol.address(), COIN)], 0, chain.utxos()).unwrap();
    assert_ne!(to_bob.id().unwrap(), to_carol.id().unwrap());

    let coinbase = Transaction::new_coinbase(1, "m", &bob.address(), get_block_subsidy(1)).unwrap();
    let first = Block::assemble(genesis.hash().unwrap(), vec![coinbase, to_bob], BITS).unwrap();
    assert_eq!(chain.add_block(&first).unwrap(), ValidationResult::Valid);

    let coinbase = Transaction::new_coinbase(2, "m", &bob.address(), get_block_subsidy(2)).unwrap();
    let second = Block::assemble(first.hash().unwrap(), vec![coinbase, to_carol.clone()], BITS).unwrap();
    assert!(!chain.add_block(&second).unwrap().is_valid());

    assert_eq!(chain.best_height().unwrap(), Some(1));
    assert_eq!(chain.utxos().balance_of(&carol.address()).unwrap(), 0);
    assert_eq!(chain.find_transaction(&to_carol.id().unwrap()).unwrap(), None);
}

#[test]
fn test_insufficient_funds_builds_nothing() {
    let chain = fresh_chain();
    let alice = Wallet::generate();
    let bob = Wallet::generate();
    chain.create_genesis(&alice.address(), "g").unwrap();

    let result = Transaction::new_payment(&alice, &[(bob.address(), 50 * COIN)], 1, chain.utxos());
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds { needed, available })
            if needed == 50 * COIN + 1 && available == 50 * COIN
    ));
}

#[test]
fn test_tampered_signature_invalidates_block() {
    let chain = fresh_chain();
    let alice = Wallet::generate();
    let bob = Wallet::generate();
    let genesis = chain.create_genesis(&alice.address(), "g").unwrap();

    let mut payment = Transaction::new_payment(&alice, &[(bob.address(), COIN)], 0, chain.utxos()).unwrap();
    payment.outputs[0].value = 2 * COIN;

    let coinbase = Transaction::new_coinbase(1, "m", &bob.address(), get_block_subsidy(1)).unwrap();
    let block = Block::assemble(genesis.hash().unwrap(), vec![coinbase, payment], BITS).unwrap();
    match chain.add_block(&block).unwrap() {
        ValidationResult::Invalid(reason) => assert!(reason.contains("script"), "{}", reason),
        ValidationResult::Valid => panic!("tampered payment accepted"),
    }
}

#[test]
fn test_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let alice = Wallet::generate();
    let tip = {
        let chain = BlockChain::new(Storage::open(dir.path()).unwrap(), BITS);
        chain.create_genesis(&alice.address(), "g").unwrap();
        let block = produce_block(&chain, &mut MemoryPool::new(), &alice.address(), "m").unwrap();
        assert!(chain.add_block(&block).unwrap().is_valid());
        chain.storage().flush().unwrap();
        chain.tip().unwrap()
    };

    let chain = BlockChain::new(Storage::open(dir.path()).unwrap(), BITS);
    assert_eq!(chain.tip().unwrap(), tip);
    assert_eq!(chain.blocks().unwrap().count(), 2);
    assert_eq!(
        chain.utxos().balance_of(&alice.address()).unwrap(),
        get_block_subsidy(0) + get_block_subsidy(1)
    );
}
