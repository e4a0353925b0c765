//! Error types for ledger validation, storage and networking

use thiserror::Error;

use crate::script::ScriptError;
use crate::types::Amount;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("Missing reference: {0}")]
    MissingReference(String),

    #[error("Script execution failed: {0}")]
    Script(#[from] ScriptError),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for LedgerError {
    fn from(err: hex::FromHexError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<secp256k1::Error> for LedgerError {
    fn from(err: secp256k1::Error) -> Self {
        LedgerError::Key(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
