//! Ledger constants

use crate::types::Amount;

/// Base units per coin
pub const COIN: Amount = 100_000_000;

/// Initial block subsidy: 50 coins in base units
pub const INITIAL_SUBSIDY: Amount = 50 * COIN;

/// Halving interval: 100 blocks
pub const HALVING_INTERVAL: u64 = 100;

/// Maximum money supply, bounds every single output value
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Maximum number of tokens in a combined unlocking + locking script
pub const MAX_SCRIPT_TOKENS: usize = 201;

/// Maximum stack depth during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Difficulty used when no configuration overrides it
pub const DEFAULT_DIFFICULTY_BITS: u32 = 16;

/// Version byte prepended to the public-key hash in an address
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of the address checksum suffix
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

/// Transaction and block header version
pub const CURRENT_VERSION: u32 = 1;

/// Parent hash carried by the genesis block
pub const GENESIS_PARENT_HASH: [u8; 32] = [0u8; 32];

/// Inbox id reserved for the operator channel
pub const OPERATOR_ID: u32 = 443;

/// Miner data written into the genesis coinbase
pub const GENESIS_COINBASE_DATA: &str = "Hello Bitcoin!";
