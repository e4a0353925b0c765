//! # Ledger-Sim
//!
//! A small Bitcoin-style ledger simulated as a peer-to-peer network running
//! inside one process.
//!
//! ## Architecture
//!
//! The crate is layered bottom-up:
//! - Records and encodings (`types`, `encoding`, `crypto`)
//! - Consensus rules (`script`, `merkle`, `economic`, `transaction`, `pow`, `block`)
//! - State (`utxo`, `mempool`, `storage`, `blockchain`, `mining`)
//! - Participants (`network`, `node`, `config`)
//!
//! ## Design Principles
//!
//! 1. **Typed inputs and scripts**: coinbase and regular inputs are enum
//!    variants; scripts are a closed opcode set plus opaque data pushes
//! 2. **Validation is a value**: consensus checks return
//!    `Result<ValidationResult>`, where `Err` means the check itself could
//!    not run (storage, encoding)
//! 3. **All-or-nothing blocks**: a block is validated against a staged UTXO
//!    view and committed in one store transaction
//! 4. **Actors over a bus**: nodes share nothing but the message bus
//!
//! ## Usage
//!
//! ```rust
//! use ledger_sim::{BlockChain, Storage, Wallet};
//! use ledger_sim::utxo::UtxoView;
//!
//! let chain = BlockChain::new(Storage::temporary().unwrap(), 4);
//! let wallet = Wallet::generate();
//! chain.create_genesis(&wallet.address(), "Hello Bitcoin!").unwrap();
//! assert_eq!(chain.utxos().balance_of(&wallet.address()).unwrap(), 50 * ledger_sim::COIN);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod encoding;
pub mod crypto;
pub mod script;
pub mod merkle;
pub mod economic;
pub mod transaction;
pub mod utxo;
pub mod mempool;
pub mod pow;
pub mod block;
pub mod storage;
pub mod blockchain;
pub mod mining;
pub mod config;
pub mod network;
pub mod node;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{LedgerError, Result};
pub use crypto::Wallet;
pub use script::{Opcode, Script, ScriptError, Token};
pub use utxo::{UtxoSet, UtxoView};
pub use mempool::MemoryPool;
pub use storage::Storage;
pub use blockchain::BlockChain;
pub use config::NodeConfig;
pub use network::{Command, Network, NetworkMessage, NodeId, Operator, Reply};
pub use node::{spawn_node, Node};
