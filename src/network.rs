//! In-process message bus connecting node actors
//!
//! Every participant owns an inbox in one shared registry guarded by a
//! single mutex. Enqueueing and draining an inbox are atomic with respect to
//! that mutex; nothing orders deliveries across different inboxes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::OPERATOR_ID;
use crate::error::{LedgerError, Result};
use crate::types::*;

pub type NodeId = u32;

/// Messages exchanged between participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMessage {
    Version(VersionMessage),
    GetBlocks,
    Blocks(BlocksMessage),
    GetUtxos,
    Utxos(UtxosMessage),
    /// Hex-encoded transaction
    Transaction(String),
    /// Hex-encoded block
    Block(String),
    Command(Command),
    Reply(Reply),
}

/// Announces the sender's chain height; `None` for an empty chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub height: Option<Height>,
}

/// The sender's whole chain, tip first, hex-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksMessage {
    pub blocks: Vec<String>,
}

/// The sender's UTXO records, hex-encoded, tagged with the tip they derive from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxosMessage {
    pub tip: Option<TipRecord>,
    pub records: Vec<String>,
}

/// Operator-driven requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    GetBalance { address: String },
    /// Pay `amounts[i]` to `to[i]`, leaving `fee` for the miner
    CreateTx { to: Vec<String>, amounts: Vec<Amount>, fee: Amount },
    CreateBlock,
    GetBestHeight,
    GetBestBlockHash,
    ListAddress,
    PrintBlocks,
    /// Hex transaction id
    GetTx { id: String },
    /// Hex block hash
    GetBlock { hash: String },
    /// Id of a transaction given in hex transport form
    TxId { serialized: String },
}

/// Answer to exactly one operator command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    pub output: String,
}

impl Reply {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { ok: true, output: output.into() }
    }

    pub fn rejected(output: impl Into<String>) -> Self {
        Self { ok: false, output: output.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: NodeId,
    pub message: NetworkMessage,
}

#[derive(Default)]
struct Registry {
    next_id: NodeId,
    inboxes: HashMap<NodeId, VecDeque<Envelope>>,
    names: HashMap<String, NodeId>,
}

/// Shared message bus; hand each node an `Arc<Network>`
pub struct Network {
    registry: Mutex<Registry>,
    delivered: Condvar,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        let mut registry = Registry {
            next_id: 1,
            ..Registry::default()
        };
        registry.inboxes.insert(OPERATOR_ID, VecDeque::new());
        Self {
            registry: Mutex::new(registry),
            delivered: Condvar::new(),
        }
    }

    /// A panicking node must not take the bus down with it
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an inbox for `name` and return its id. Names are unique.
    pub fn register(&self, name: &str) -> Result<NodeId> {
        let mut registry = self.lock();
        if registry.names.contains_key(name) {
            return Err(LedgerError::Config(format!("node name {} already registered", name)));
        }
        let mut id = registry.next_id;
        if id == OPERATOR_ID {
            id += 1;
        }
        registry.next_id = id + 1;
        registry.inboxes.insert(id, VecDeque::new());
        registry.names.insert(name.to_string(), id);
        debug!(name, id, "registered node");
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.lock().names.get(name).copied()
    }

    /// Every registered node except `of` and the operator channel
    pub fn peers(&self, of: NodeId) -> Vec<NodeId> {
        let registry = self.lock();
        let mut peers: Vec<NodeId> = registry.names.values().copied().filter(|id| *id != of).collect();
        peers.sort_unstable();
        peers
    }

    pub fn send(&self, from: NodeId, to: NodeId, message: NetworkMessage) -> Result<()> {
        let mut registry = self.lock();
        let inbox = registry
            .inboxes
            .get_mut(&to)
            .ok_or_else(|| LedgerError::MissingReference(format!("node {}", to)))?;
        inbox.push_back(Envelope { from, message });
        drop(registry);
        self.delivered.notify_all();
        Ok(())
    }

    /// Send a copy of `message` to every peer of `from`
    pub fn broadcast(&self, from: NodeId, message: &NetworkMessage) {
        for peer in self.peers(from) {
            if let Err(err) = self.send(from, peer, message.clone()) {
                warn!(from, peer, %err, "broadcast delivery failed");
            }
        }
    }

    /// Remove and return everything queued for `id`, in arrival order
    pub fn drain(&self, id: NodeId) -> Vec<Envelope> {
        match self.lock().inboxes.get_mut(&id) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Block until something arrives for `id`, then take the oldest envelope.
    /// There is no timeout.
    pub fn wait_for(&self, id: NodeId) -> Result<Envelope> {
        let mut registry = self.lock();
        loop {
            let inbox = registry
                .inboxes
                .get_mut(&id)
                .ok_or_else(|| LedgerError::MissingReference(format!("node {}", id)))?;
            if let Some(envelope) = inbox.pop_front() {
                return Ok(envelope);
            }
            registry = self.delivered.wait(registry).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Client for the operator channel: sends one command and blocks on its reply
pub struct Operator<'a> {
    network: &'a Network,
    calls: Mutex<()>,
}

impl<'a> Operator<'a> {
    pub fn new(network: &'a Network) -> Self {
        Self {
            network,
            calls: Mutex::new(()),
        }
    }

    /// Blocks until `node` replies. An unresponsive node hangs the caller.
    pub fn call(&self, node: NodeId, command: Command) -> Result<Reply> {
        let _serialized = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        self.network.send(OPERATOR_ID, node, NetworkMessage::Command(command))?;
        loop {
            let envelope = self.network.wait_for(OPERATOR_ID)?;
            match envelope.message {
                NetworkMessage::Reply(reply) if envelope.from == node => return Ok(reply),
                other => debug!(from = envelope.from, ?other, "operator ignored message"),
            }
        }
    }

    pub fn call_by_name(&self, name: &str, command: Command) -> Result<Reply> {
        let node = self
            .network
            .lookup(name)
            .ok_or_else(|| LedgerError::MissingReference(format!("node {}", name)))?;
        self.call(node, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_register_and_lookup() {
        let network = Network::new();
        let a = network.register("a").unwrap();
        let b = network.register("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(network.lookup("b"), Some(b));
        assert_eq!(network.lookup("c"), None);
        assert!(network.register("a").is_err());
        assert_eq!(network.peers(a), vec![b]);
    }

    #[test]
    fn test_inbox_is_fifo_and_drained_once() {
        let network = Network::new();
        let a = network.register("a").unwrap();
        let b = network.register("b").unwrap();
        network.send(a, b, NetworkMessage::GetBlocks).unwrap();
        network.send(a, b, NetworkMessage::GetUtxos).unwrap();

        let drained = network.drain(b);
        assert_eq!(
            drained.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
            vec![NetworkMessage::GetBlocks, NetworkMessage::GetUtxos]
        );
        assert!(network.drain(b).is_empty());
        assert!(network.send(a, 999, NetworkMessage::GetBlocks).is_err());
    }

    #[test]
    fn test_broadcast_skips_sender_and_operator() {
        let network = Network::new();
        let a = network.register("a").unwrap();
        let b = network.register("b").unwrap();
        let c = network.register("c").unwrap();
        network.broadcast(a, &NetworkMessage::Version(VersionMessage { height: Some(3) }));
        assert!(network.drain(a).is_empty());
        assert!(network.drain(OPERATOR_ID).is_empty());
        assert_eq!(network.drain(b).len(), 1);
        assert_eq!(network.drain(c).len(), 1);
    }

    #[test]
    fn test_operator_blocks_for_reply() {
        let network = Arc::new(Network::new());
        let node = network.register("echo").unwrap();

        let responder = {
            let network = Arc::clone(&network);
            thread::spawn(move || loop {
                let envelope = network.wait_for(node).unwrap();
                if let NetworkMessage::Command(command) = envelope.message {
                    let reply = Reply::ok(format!("{:?}", command));
                    network.send(node, envelope.from, NetworkMessage::Reply(reply)).unwrap();
                    break;
                }
            })
        };

        let operator = Operator::new(&network);
        let reply = operator.call_by_name("echo", Command::ListAddress).unwrap();
        assert!(reply.ok);
        assert_eq!(reply.output, "ListAddress");
        responder.join().unwrap();
    }
}
