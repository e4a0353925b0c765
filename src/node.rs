//! Participant actor
//!
//! A node owns its chain, UTXO set, memory pool and wallet, and talks to
//! other nodes only through the shared [`Network`]. Its loop drains the inbox,
//! handles every message in order, then sleeps a random interval. Mining runs
//! on the same thread, so no messages are handled while a block is mined.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::blockchain::BlockChain;
use crate::config::NodeConfig;
use crate::crypto::{validate_address, Wallet};
use crate::economic::format_amount;
use crate::encoding;
use crate::error::{LedgerError, Result};
use crate::mempool::MemoryPool;
use crate::mining::produce_block;
use crate::network::*;
use crate::storage::Storage;
use crate::transaction::tx_id_from_hex;
use crate::types::*;
use crate::utxo::UtxoView;

pub struct Node {
    id: NodeId,
    config: NodeConfig,
    network: Arc<Network>,
    chain: BlockChain,
    mempool: MemoryPool,
    wallet: Wallet,
}

impl Node {
    /// Open the store, load or create the wallet, register on the bus, and
    /// mine genesis if configured to and the chain is empty
    pub fn new(config: NodeConfig, network: Arc<Network>) -> Result<Self> {
        config.validate()?;
        let storage = match &config.data_dir {
            Some(dir) => Storage::open(dir)?,
            None => Storage::temporary()?,
        };
        let wallet = storage.load_or_create_wallet()?;
        let chain = BlockChain::new(storage, config.difficulty_bits);

        if config.create_genesis && chain.is_empty()? {
            let genesis = chain.create_genesis(&wallet.address(), &config.coinbase_data)?;
            info!(node = %config.name, hash = %hex::encode(genesis.hash()?), "mined genesis");
        }

        let id = network.register(&config.name)?;
        info!(node = %config.name, id, address = %wallet.address(), "node started");
        Ok(Self {
            id,
            config,
            network,
            chain,
            mempool: MemoryPool::new(),
            wallet,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn address(&self) -> String {
        self.wallet.address()
    }

    pub fn chain(&self) -> &BlockChain {
        &self.chain
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    fn version(&self) -> Result<NetworkMessage> {
        Ok(NetworkMessage::Version(VersionMessage {
            height: self.chain.best_height()?,
        }))
    }

    /// Broadcast this node's height to every peer
    pub fn announce(&self) -> Result<()> {
        self.network.broadcast(self.id, &self.version()?);
        Ok(())
    }

    /// Drain the inbox and handle each message; returns how many were handled.
    /// A message that fails is logged and skipped.
    pub fn step(&mut self) -> usize {
        let envelopes = self.network.drain(self.id);
        let count = envelopes.len();
        for envelope in envelopes {
            let from = envelope.from;
            if let Err(err) = self.handle(envelope) {
                warn!(node = %self.config.name, from, %err, "message handling failed");
            }
        }
        count
    }

    /// Announce, then loop forever: step, sleep
    pub fn run(mut self) {
        if let Err(err) = self.announce() {
            warn!(node = %self.config.name, %err, "announce failed");
        }
        let mut rng = rand::thread_rng();
        loop {
            self.step();
            let pause = rng.gen_range(self.config.min_sleep_ms..=self.config.max_sleep_ms);
            thread::sleep(Duration::from_millis(pause));
        }
    }

    pub fn handle(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { from, message } = envelope;
        match message {
            NetworkMessage::Version(version) => self.on_version(from, version),
            NetworkMessage::GetBlocks => {
                let mut blocks = Vec::new();
                for block in self.chain.blocks()? {
                    blocks.push(block?.to_hex()?);
                }
                self.network.send(self.id, from, NetworkMessage::Blocks(BlocksMessage { blocks }))
            }
            NetworkMessage::Blocks(snapshot) => self.on_blocks(from, snapshot),
            NetworkMessage::GetUtxos => {
                let records = self
                    .chain
                    .utxos()
                    .records()?
                    .iter()
                    .map(encoding::to_hex)
                    .collect::<Result<Vec<_>>>()?;
                let tip = self.chain.tip()?;
                self.network.send(self.id, from, NetworkMessage::Utxos(UtxosMessage { tip, records }))
            }
            NetworkMessage::Utxos(snapshot) => self.on_utxos(from, snapshot),
            NetworkMessage::Transaction(hex_tx) => {
                let tx = Transaction::from_hex(&hex_tx)?;
                debug!(node = %self.config.name, tx = %tx.id_hex()?, "pooled relayed transaction");
                self.mempool.enqueue(tx);
                Ok(())
            }
            NetworkMessage::Block(hex_block) => self.on_block(from, &hex_block),
            NetworkMessage::Command(command) => {
                let reply = match self.execute(command) {
                    Ok(reply) => reply,
                    Err(err) => Reply::rejected(err.to_string()),
                };
                self.network.send(self.id, from, NetworkMessage::Reply(reply))
            }
            NetworkMessage::Reply(reply) => {
                debug!(node = %self.config.name, from, ?reply, "unexpected reply");
                Ok(())
            }
        }
    }

    fn on_version(&mut self, from: NodeId, version: VersionMessage) -> Result<()> {
        let mine = self.chain.best_height()?;
        if version.height > mine {
            debug!(node = %self.config.name, from, theirs = ?version.height, mine = ?mine, "peer ahead, syncing");
            self.network.send(self.id, from, NetworkMessage::GetBlocks)?;
            self.network.send(self.id, from, NetworkMessage::GetUtxos)?;
        } else if version.height < mine {
            self.announce()?;
        }
        Ok(())
    }

    /// Extend-only merge: append snapshot blocks above the local tip in height
    /// order through the normal validation path, stopping at the first failure
    fn on_blocks(&mut self, from: NodeId, snapshot: BlocksMessage) -> Result<()> {
        let mine = self.chain.best_height()?;
        let mut blocks = Vec::with_capacity(snapshot.blocks.len());
        for hex_block in &snapshot.blocks {
            let block = Block::from_hex(hex_block)?;
            let Some(height) = block.height() else { continue };
            if mine.map_or(true, |mine| height > mine) {
                blocks.push((height, block));
            }
        }
        blocks.sort_by_key(|(height, _)| *height);

        let mut appended = 0;
        for (height, block) in blocks {
            match self.chain.add_block(&block)? {
                ValidationResult::Valid => appended += 1,
                ValidationResult::Invalid(reason) => {
                    warn!(node = %self.config.name, from, height, %reason, "stopped merging peer chain");
                    break;
                }
            }
        }
        if appended > 0 {
            info!(node = %self.config.name, from, appended, height = ?self.chain.best_height()?, "merged peer chain");
        }
        Ok(())
    }

    /// The local set is derived from the local chain and is never overwritten;
    /// a snapshot from a peer at the same tip is only compared
    fn on_utxos(&mut self, from: NodeId, snapshot: UtxosMessage) -> Result<()> {
        let tip = self.chain.tip()?;
        if snapshot.tip != tip {
            debug!(node = %self.config.name, from, "utxo snapshot from another tip ignored");
            return Ok(());
        }
        let theirs = snapshot
            .records
            .iter()
            .map(|r| encoding::from_hex::<UtxoRecord>(r))
            .collect::<Result<Vec<_>>>()?;
        if theirs != self.chain.utxos().records()? {
            warn!(node = %self.config.name, from, "utxo snapshot diverges at the same tip");
        }
        Ok(())
    }

    fn on_block(&mut self, from: NodeId, hex_block: &str) -> Result<()> {
        let block = Block::from_hex(hex_block)?;
        match self.chain.add_block(&block)? {
            ValidationResult::Valid => {}
            ValidationResult::Invalid(reason) => {
                let mine = self.chain.best_height()?;
                let behind = match (block.height(), mine) {
                    (Some(theirs), Some(mine)) => theirs > mine + 1,
                    (Some(_), None) => true,
                    _ => false,
                };
                if behind {
                    debug!(node = %self.config.name, from, "block ahead of local tip, requesting chain");
                    self.network.send(self.id, from, NetworkMessage::GetBlocks)?;
                } else {
                    debug!(node = %self.config.name, from, %reason, "relayed block rejected");
                }
            }
        }
        Ok(())
    }

    /// Carry out an operator command. State changes are broadcast before the
    /// reply is produced. Local rejections (bad address, insufficient funds)
    /// surface as `Err` and become `Reply { ok: false, .. }`.
    pub fn execute(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::GetBalance { address } => {
                if !validate_address(&address) {
                    return Err(LedgerError::InvalidAddress(address));
                }
                Ok(Reply::ok(format_amount(self.chain.utxos().balance_of(&address)?)))
            }
            Command::CreateTx { to, amounts, fee } => {
                if to.len() != amounts.len() {
                    return Err(LedgerError::Validation(format!(
                        "{} recipients but {} amounts",
                        to.len(),
                        amounts.len()
                    )));
                }
                let recipients: Vec<(String, Amount)> = to.into_iter().zip(amounts).collect();
                let tx = Transaction::new_payment(&self.wallet, &recipients, fee, self.chain.utxos())?;
                let tx_id = tx.id_hex()?;
                self.network.broadcast(self.id, &NetworkMessage::Transaction(tx.to_hex()?));
                self.mempool.enqueue(tx);
                info!(node = %self.config.name, tx = %tx_id, "transaction created");
                Ok(Reply::ok(tx_id))
            }
            Command::CreateBlock => {
                let block = produce_block(
                    &self.chain,
                    &mut self.mempool,
                    &self.wallet.address(),
                    &self.config.coinbase_data,
                )?;
                if let ValidationResult::Invalid(reason) = self.chain.add_block(&block)? {
                    return Err(LedgerError::Validation(reason));
                }
                self.network.broadcast(self.id, &NetworkMessage::Block(block.to_hex()?));
                Ok(Reply::ok(hex::encode(block.hash()?)))
            }
            Command::GetBestHeight => Ok(Reply::ok(match self.chain.best_height()? {
                Some(height) => height.to_string(),
                None => "none".to_string(),
            })),
            Command::GetBestBlockHash => Ok(Reply::ok(match self.chain.best_block_hash()? {
                Some(hash) => hex::encode(hash),
                None => "none".to_string(),
            })),
            Command::ListAddress => Ok(Reply::ok(self.wallet.address())),
            Command::PrintBlocks => Ok(Reply::ok(self.chain.print_blocks()?)),
            Command::GetTx { id } => {
                let tx_id = encoding::hash_from_hex(&id)?;
                match self.chain.find_transaction(&tx_id)? {
                    Some(tx) => Ok(Reply::ok(tx.to_hex()?)),
                    None => Ok(Reply::rejected(format!("transaction {} not found", id))),
                }
            }
            Command::GetBlock { hash } => {
                let block_hash = encoding::hash_from_hex(&hash)?;
                match self.chain.find_block_by_hash(&block_hash)? {
                    Some(block) => Ok(Reply::ok(block.to_hex()?)),
                    None => Ok(Reply::rejected(format!("block {} not found", hash))),
                }
            }
            Command::TxId { serialized } => Ok(Reply::ok(hex::encode(tx_id_from_hex(&serialized)?))),
        }
    }
}

/// Start a node on its own thread and return its bus id
pub fn spawn_node(config: NodeConfig, network: Arc<Network>) -> Result<(NodeId, JoinHandle<()>)> {
    let node = Node::new(config, network)?;
    let id = node.id();
    let name = node.name().to_string();
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || node.run())
        .map_err(|e| LedgerError::Config(format!("failed to spawn node thread: {}", e)))?;
    Ok((id, handle))
}
