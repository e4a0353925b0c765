//! Persisted key-value store for one participant
//!
//! Three sled trees share one database:
//! * `blocks`: hex block hash → serialized block, plus [`TIP_KEY`] → [`TipRecord`]
//! * `utxos`: hex transaction id → serialized [`UtxoRecord`]
//! * `meta`: node-local values such as the wallet secret

use std::path::Path;

use tracing::info;

use crate::crypto::Wallet;
use crate::error::Result;

pub const BLOCKS_TREE: &str = "blocks";
pub const UTXOS_TREE: &str = "utxos";
pub const META_TREE: &str = "meta";

/// Reserved key in the blocks tree; never collides with a hex hash
pub const TIP_KEY: &str = "tip";

const WALLET_KEY: &str = "wallet";

#[derive(Clone)]
pub struct Storage {
    db: sled::Db,
    blocks: sled::Tree,
    utxos: sled::Tree,
    meta: sled::Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened store");
        Self::from_db(db)
    }

    /// Store removed from disk when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            blocks: db.open_tree(BLOCKS_TREE)?,
            utxos: db.open_tree(UTXOS_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
        })
    }

    pub fn blocks(&self) -> &sled::Tree {
        &self.blocks
    }

    pub fn utxos(&self) -> &sled::Tree {
        &self.utxos
    }

    pub fn meta(&self) -> &sled::Tree {
        &self.meta
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// The wallet stored in the meta tree, generating and saving one on first use
    pub fn load_or_create_wallet(&self) -> Result<Wallet> {
        if let Some(secret) = self.meta.get(WALLET_KEY)? {
            let secret = hex::decode(&secret)?;
            return Wallet::from_secret_bytes(&secret);
        }
        let wallet = Wallet::generate();
        self.meta.insert(WALLET_KEY, hex::encode(wallet.secret_bytes()).as_bytes())?;
        info!(address = %wallet.address(), "created wallet");
        Ok(wallet)
    }
}
