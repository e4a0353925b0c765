//! Binary record format and its hexadecimal transport form
//!
//! Every persisted or transmitted object (header, transaction, block, UTXO
//! record) is encoded with bincode's default fixed-width little-endian
//! layout. The encoding is deterministic, which is what identity hashes
//! rely on.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Serialize and render as lowercase hex
pub fn to_hex<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(hex::encode(serialize(value)?))
}

pub fn from_hex<T: DeserializeOwned>(text: &str) -> Result<T> {
    let bytes = hex::decode(text)?;
    deserialize(&bytes)
}

/// Parse a 64-character hex string into a hash
pub fn hash_from_hex(text: &str) -> Result<crate::types::Hash> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(text, &mut hash)?;
    Ok(hash)
}
