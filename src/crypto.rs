//! Hashing, address encoding and key pairs

use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::constants::*;
use crate::error::{LedgerError, Result};
use crate::types::*;

/// SHA256(SHA256(data)), used for every identity hash and commitment
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// HASH160: RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = Sha256::digest(data);
    let ripemd160_hash = Ripemd160::digest(&sha256_hash);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd160_hash);
    out
}

/// Address: base58(version ‖ HASH160(pubkey) ‖ checksum[0:4])
pub fn address_from_pubkey_hash(pubkey_hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(1 + 20 + ADDRESS_CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pubkey_hash);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..ADDRESS_CHECKSUM_LEN]);
    bs58::encode(payload).into_string()
}

/// Decode an address back to its public-key hash, verifying the checksum
pub fn pubkey_hash_from_address(address: &str) -> Result<[u8; 20]> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", address, e)))?;
    if raw.len() != 1 + 20 + ADDRESS_CHECKSUM_LEN {
        return Err(LedgerError::InvalidAddress(format!(
            "{}: unexpected length {}",
            address,
            raw.len()
        )));
    }
    let (prefixed_hash, checksum) = raw.split_at(raw.len() - ADDRESS_CHECKSUM_LEN);
    if double_sha256(prefixed_hash)[..ADDRESS_CHECKSUM_LEN] != *checksum {
        return Err(LedgerError::InvalidAddress(format!("{}: bad checksum", address)));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&prefixed_hash[1..]);
    Ok(hash)
}

pub fn validate_address(address: &str) -> bool {
    pubkey_hash_from_address(address).is_ok()
}

/// Verify a DER signature over a 32-byte digest
pub fn verify_signature(pubkey_bytes: &[u8], signature_bytes: &[u8], digest: &Hash) -> bool {
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(signature_bytes) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(digest) {
        Ok(m) => m,
        Err(_) => return false,
    };
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &pubkey)
        .is_ok()
}

/// A single secp256k1 key pair owned by a participant
#[derive(Clone)]
pub struct Wallet {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Wallet {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        Self { secret_key, public_key }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self { secret_key, public_key })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Compressed SEC1 public key
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key.serialize())
    }

    pub fn address(&self) -> String {
        address_from_pubkey_hash(&self.pubkey_hash())
    }

    /// DER-encoded ECDSA signature over a 32-byte digest
    pub fn sign(&self, digest: &Hash) -> Result<Vec<u8>> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(digest)?;
        Ok(secp.sign_ecdsa(&message, &self.secret_key).serialize_der().to_vec())
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet").field("address", &self.address()).finish()
    }
}
