// This file is part of LATTICE.
//
// Copyright (C) 2022 Affidaty Spa.
//
// LATTICE is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// LATTICE is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with LATTICE. If not, see <https://www.gnu.org/licenses/>.

//! Chain storage over rocksdb.
//!
//! Every data domain lives in its own column family. Heights and round
//! numbers are encoded big-endian so that the natural key order matches the
//! chain order and the last entry of a family is the chain tail.

use crate::{
    base::{
        merkle::merkle_root,
        schema::{Block, ChainInfo, Receipt, Transaction},
        serialize::{rmp_deserialize, MessagePack},
    },
    consensus::Round,
    contract::ContractDescriptor,
    crypto::{Hash, HashAlgorithm},
    db::{Db, DbFork},
    Error, ErrorKind, Result,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::Arc,
};

const BLOCKS: &str = "blocks";
const TRANSACTIONS: &str = "transactions";
const RECEIPTS: &str = "receipts";
const MERKLE: &str = "merkle";
const MINERS: &str = "miners";
const CONTRACTS: &str = "contracts";
const CALLGRAPH: &str = "callgraph";
const STATE: &str = "state";
const META: &str = "meta";

const FAMILIES: [&str; 9] = [
    BLOCKS,
    TRANSACTIONS,
    RECEIPTS,
    MERKLE,
    MINERS,
    CONTRACTS,
    CALLGRAPH,
    STATE,
    META,
];

/// Chain bookkeeping key within the `meta` family.
const CHAIN_INFO_KEY: &[u8] = b"chain-info";

/// Merkle leaves key tags within the `merkle` family.
const TXS_TAG: u8 = b'T';
const RXS_TAG: u8 = b'R';

fn merkle_key(tag: u8, height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(tag);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// State keys are account-scoped: `<account>:<key>`.
fn state_key(account: &str, key: &str) -> Vec<u8> {
    format!("{}:{}", account, key).into_bytes()
}

fn state_prefix(account: &str) -> Vec<u8> {
    format!("{}:", account).into_bytes()
}

fn state_account(key: &[u8]) -> Option<String> {
    let pos = key.iter().position(|b| *b == b':')?;
    String::from_utf8(key[..pos].to_vec()).ok()
}

/// Call graph keys are method-scoped: `<contract>:<method>`.
fn method_key(contract: &str, method: &str) -> Vec<u8> {
    format!("{}:{}", contract, method).into_bytes()
}

fn family<'a>(backend: &'a DB, name: &str) -> &'a ColumnFamily {
    backend.cf_handle(name).unwrap_or_else(|| {
        panic!("'{}' column family opened with the database", name);
    })
}

fn fetch(backend: &DB, name: &str, key: &[u8]) -> Option<Vec<u8>> {
    backend.get_cf(family(backend, name), key).unwrap_or_default()
}

/// Value with the greatest key within a family.
fn fetch_last(backend: &DB, name: &str) -> Option<Vec<u8>> {
    backend
        .iterator_cf(family(backend, name), IteratorMode::End)
        .next()
        .and_then(|item| item.ok())
        .map(|(_, value)| value.into_vec())
}

fn prefix_scan<'a>(
    backend: &'a DB,
    name: &str,
    prefix: &'a [u8],
) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'a {
    backend
        .iterator_cf(
            family(backend, name),
            IteratorMode::From(prefix, Direction::Forward),
        )
        .filter_map(|item| item.ok())
        .take_while(move |(key, _)| key.starts_with(prefix))
}

/// Database implementation using rocks db.
pub struct RocksDb {
    /// Backend shared with the forks for read-through.
    backend: Arc<DB>,
}

/// Fork writes overlay, keyed by family name and raw key.
/// A `None` value marks a removal.
type Overlay = BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>;

/// Database writeable snapshot.
/// This structure is obtained via the `fork_create` method and accumulates
/// a set of changes applied atomically to the database on `fork_merge`.
/// Reads fall through the overlay to the committed state.
pub struct RocksDbFork {
    backend: Arc<DB>,
    /// Checkpointed writes, surviving a rollback.
    stable: Overlay,
    /// Writes since the last checkpoint.
    pending: Overlay,
}

impl RocksDb {
    /// Create/Open a database from the filesystem.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        options.set_compression_type(DBCompressionType::None);
        let families = FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let backend = DB::open_cf_descriptors(&options, path, families).unwrap_or_else(|err| {
            panic!("Error opening rocks-db backend: {}", err);
        });
        RocksDb {
            backend: Arc::new(backend),
        }
    }
}

impl Db for RocksDb {
    /// Fork type.
    type DbForkType = RocksDbFork;

    /// Check if transaction is present.
    fn contains_transaction(&self, hash: &Hash) -> bool {
        fetch(&self.backend, TRANSACTIONS, hash.as_bytes()).is_some()
    }

    /// Fetch transaction.
    fn load_transaction(&self, hash: &Hash) -> Option<Transaction> {
        let buf = fetch(&self.backend, TRANSACTIONS, hash.as_bytes())?;
        rmp_deserialize(&buf).ok()
    }

    /// Load transaction receipt using transaction hash.
    fn load_receipt(&self, hash: &Hash) -> Option<Receipt> {
        let buf = fetch(&self.backend, RECEIPTS, hash.as_bytes())?;
        rmp_deserialize(&buf).ok()
    }

    /// Get block at a given `height` (position in the blockchain).
    /// This can also be used to fetch the last block by passing u64::MAX as the height.
    fn load_block(&self, height: u64) -> Option<Block> {
        let buf = match height {
            u64::MAX => fetch_last(&self.backend, BLOCKS)?,
            _ => fetch(&self.backend, BLOCKS, &height.to_be_bytes())?,
        };
        rmp_deserialize(&buf).ok()
    }

    /// Get transactions hashes associated to a given block identified by `height`.
    fn load_transactions_hashes(&self, height: u64) -> Option<Vec<Hash>> {
        let buf = fetch(&self.backend, MERKLE, &merkle_key(TXS_TAG, height))?;
        rmp_deserialize(&buf).ok()
    }

    /// Load chain bookkeeping information.
    fn load_chain_info(&self) -> Option<ChainInfo> {
        let buf = fetch(&self.backend, META, CHAIN_INFO_KEY)?;
        rmp_deserialize(&buf).ok()
    }

    /// Load consensus round, u64::MAX for the latest one.
    fn load_round(&self, number: u64) -> Option<Round> {
        let buf = match number {
            u64::MAX => fetch_last(&self.backend, MINERS)?,
            _ => fetch(&self.backend, MINERS, &number.to_be_bytes())?,
        };
        rmp_deserialize(&buf).ok()
    }

    /// Fetch smart contract descriptor.
    fn load_contract(&self, name: &str) -> Option<ContractDescriptor> {
        let buf = fetch(&self.backend, CONTRACTS, name.as_bytes())?;
        rmp_deserialize(&buf).ok()
    }

    /// Fetch the state resources declared by a contract method.
    fn load_method_resources(&self, contract: &str, method: &str) -> Option<Vec<String>> {
        let buf = fetch(&self.backend, CALLGRAPH, &method_key(contract, method))?;
        rmp_deserialize(&buf).ok()
    }

    /// Load contract state data owned by the given `account`.
    fn load_state(&self, account: &str, key: &str) -> Option<Vec<u8>> {
        fetch(&self.backend, STATE, &state_key(account, key))
    }

    /// Load full keys list of the contract state owned by the given `account`.
    fn load_state_keys(&self, account: &str) -> Vec<String> {
        let prefix = state_prefix(account);
        prefix_scan(&self.backend, STATE, &prefix)
            .map(|(key, _)| String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
            .collect()
    }

    /// Create a fork.
    /// A fork is a set of uncommited modifications to the database.
    fn fork_create(&mut self) -> RocksDbFork {
        RocksDbFork {
            backend: Arc::clone(&self.backend),
            stable: Overlay::new(),
            pending: Overlay::new(),
        }
    }

    /// Commit a fork.
    /// The whole overlay, checkpointed or not, is applied with a single
    /// atomic write batch. Merging conflicting forks leaves the values of
    /// the last merged one.
    fn fork_merge(&mut self, mut fork: RocksDbFork) -> Result<()> {
        fork.flush();
        let mut batch = WriteBatch::default();
        for ((name, key), value) in &fork.stable {
            let cf = family(&self.backend, name);
            match value {
                Some(value) => batch.put_cf(cf, key, value),
                None => batch.delete_cf(cf, key),
            }
        }
        self.backend
            .write(batch)
            .map_err(|err| Error::new_ext(ErrorKind::DatabaseFault, err))
    }
}

impl RocksDbFork {
    fn write(&mut self, name: &'static str, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.pending.insert((name, key), value);
    }

    fn read(&self, name: &'static str, key: &[u8]) -> Option<Vec<u8>> {
        let overlay_key = (name, key.to_vec());
        if let Some(value) = self.pending.get(&overlay_key) {
            return value.clone();
        }
        if let Some(value) = self.stable.get(&overlay_key) {
            return value.clone();
        }
        fetch(&self.backend, name, key)
    }

    /// Merged view of an account state: committed entries plus the overlay,
    /// removals applied, sorted by key.
    fn state_entries(&self, account: &str) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let prefix = state_prefix(account);
        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = prefix_scan(&self.backend, STATE, &prefix)
            .map(|(key, value)| (key.into_vec(), value.into_vec()))
            .collect();
        for layer in [&self.stable, &self.pending] {
            for ((name, key), value) in layer.iter() {
                if *name != STATE || !key.starts_with(&prefix) {
                    continue;
                }
                match value {
                    Some(value) => entries.insert(key.clone(), value.clone()),
                    None => entries.remove(key),
                };
            }
        }
        entries
    }

    /// Accounts owning at least one state entry, committed or in overlay.
    fn state_accounts(&self) -> BTreeSet<String> {
        let mut accounts: BTreeSet<String> = self
            .backend
            .iterator_cf(family(&self.backend, STATE), IteratorMode::Start)
            .filter_map(|item| item.ok())
            .filter_map(|(key, _)| state_account(&key))
            .collect();
        for (name, key) in self.stable.keys().chain(self.pending.keys()) {
            if *name == STATE {
                if let Some(account) = state_account(key) {
                    accounts.insert(account);
                }
            }
        }
        accounts
    }

    /// Merkle root over the sorted account entries, each leaf hashing the
    /// key and value bytes.
    fn account_state_hash(&self, account: &str) -> Hash {
        let leaves: Vec<Hash> = self
            .state_entries(account)
            .iter()
            .map(|(key, value)| {
                let mut buf = Vec::with_capacity(key.len() + value.len());
                buf.extend_from_slice(key);
                buf.extend_from_slice(value);
                Hash::from_data(HashAlgorithm::Sha256, &buf)
            })
            .collect();
        merkle_root(&leaves)
    }
}

impl DbFork for RocksDbFork {
    /// Get state hash.
    /// The global digest folds the per-account roots and scans the full
    /// state family.
    fn state_hash(&self, account: &str) -> Hash {
        match account.is_empty() {
            false => self.account_state_hash(account),
            true => {
                let leaves: Vec<Hash> = self
                    .state_accounts()
                    .iter()
                    .map(|account| self.account_state_hash(account))
                    .collect();
                merkle_root(&leaves)
            }
        }
    }

    /// Load contract state data owned by the given `account`.
    fn load_state(&self, account: &str, key: &str) -> Option<Vec<u8>> {
        self.read(STATE, &state_key(account, key))
    }

    /// Store contract state data owned by the given `account`.
    fn store_state(&mut self, account: &str, key: &str, data: Vec<u8>) {
        self.write(STATE, state_key(account, key), Some(data));
    }

    /// Remove contract state data owned by the given `account`.
    fn remove_state(&mut self, account: &str, key: &str) {
        self.write(STATE, state_key(account, key), None);
    }

    /// Load full keys list of the contract state owned by the given `account`.
    fn load_state_keys(&self, account: &str) -> Vec<String> {
        let prefix = state_prefix(account);
        self.state_entries(account)
            .keys()
            .map(|key| String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
            .collect()
    }

    /// Insert transaction.
    fn store_transaction(&mut self, hash: &Hash, tx: Transaction) {
        self.write(TRANSACTIONS, hash.to_bytes(), Some(tx.serialize()));
    }

    /// Insert transaction result.
    fn store_receipt(&mut self, hash: &Hash, receipt: Receipt) {
        self.write(RECEIPTS, hash.to_bytes(), Some(receipt.serialize()));
    }

    /// Insert new block, keyed by its height.
    fn store_block(&mut self, block: Block) {
        let key = block.data.height.to_be_bytes().to_vec();
        self.write(BLOCKS, key, Some(block.serialize()));
    }

    /// Insert transactions hashes associated to a given block identified by `height`.
    /// Returns the merkle root of the hashes.
    fn store_transactions_hashes(&mut self, height: u64, hashes: Vec<Hash>) -> Hash {
        let root = merkle_root(&hashes);
        self.write(MERKLE, merkle_key(TXS_TAG, height), Some(hashes.serialize()));
        root
    }

    /// Insert the transactions results (receipts) hashes associated with a
    /// given block. Returns the merkle root of the hashes.
    fn store_receipts_hashes(&mut self, height: u64, hashes: Vec<Hash>) -> Hash {
        let root = merkle_root(&hashes);
        self.write(MERKLE, merkle_key(RXS_TAG, height), Some(hashes.serialize()));
        root
    }

    /// Store chain bookkeeping information.
    fn store_chain_info(&mut self, info: ChainInfo) {
        self.write(META, CHAIN_INFO_KEY.to_vec(), Some(info.serialize()));
    }

    /// Store consensus round, keyed by its number.
    fn store_round(&mut self, round: Round) {
        let key = round.number.to_be_bytes().to_vec();
        self.write(MINERS, key, Some(round.serialize()));
    }

    /// Store smart contract descriptor, keyed by the contract name.
    fn store_contract(&mut self, descriptor: ContractDescriptor) {
        let key = descriptor.name.clone().into_bytes();
        self.write(CONTRACTS, key, Some(descriptor.serialize()));
    }

    /// Store the state resources declared by a contract method.
    fn store_method_resources(&mut self, contract: &str, method: &str, resources: Vec<String>) {
        self.write(CALLGRAPH, method_key(contract, method), Some(resources.serialize()));
    }

    /// Absorb the modifications of another fork of the same database.
    /// Both overlay layers are imported, the absorbed fork entries win on
    /// key collisions.
    fn absorb(&mut self, mut fork: Self) {
        self.stable.append(&mut fork.stable);
        self.pending.append(&mut fork.pending);
    }

    /// Creates a fork checkpoint.
    fn flush(&mut self) {
        self.stable.append(&mut self.pending);
    }

    /// Rollback to the last checkpoint (`flush` point).
    fn rollback(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::tests::{create_test_block, create_test_chain_info, create_test_tx},
        consensus::round::tests::create_test_round,
        contract::tests::create_test_descriptor,
        crypto::Hashable,
    };
    use std::{
        fs,
        ops::{Deref, DerefMut},
        path::PathBuf,
    };
    use tempfile::TempDir;

    const ACCOUNT_ID1: &str = "QmNLei78zWmzUdbeRB3CiUfAizWUrbeeZh5K1rhAQKCh51";
    const ACCOUNT_ID2: &str = "QmYHnEQLdf5h7KYbjFPuHSRk2SPgdXrJWFh5W696HPfq7i";

    struct TempDb {
        inner: RocksDb,
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let path = TempDir::new().unwrap().into_path();
            let inner = RocksDb::new(path.clone());
            TempDb { inner, path }
        }
    }

    impl Deref for TempDb {
        type Target = RocksDb;

        fn deref(&self) -> &Self::Target {
            &self.inner
        }
    }

    impl DerefMut for TempDb {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.inner
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.path).unwrap_or_else(|err| {
                println!(
                    "failed to remove temporary db folder '{:?}' ({})",
                    self.path, err
                );
            });
        }
    }

    fn create_test_tx_with_nonce(nonce: u8) -> Transaction {
        let mut tx = create_test_tx();
        tx.data.nonce = vec![nonce];
        tx
    }

    #[test]
    fn store_state_no_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();

        fork.store_state(ACCOUNT_ID1, "data", vec![1, 2, 3]);

        assert_eq!(fork.load_state(ACCOUNT_ID1, "data"), Some(vec![1, 2, 3]));
        assert_eq!(db.load_state(ACCOUNT_ID1, "data"), None);
    }

    #[test]
    fn store_state_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        fork.store_state(ACCOUNT_ID1, "data", vec![1, 2, 3]);

        let result = db.fork_merge(fork);

        assert!(result.is_ok());
        assert_eq!(db.load_state(ACCOUNT_ID1, "data"), Some(vec![1, 2, 3]));
        assert_eq!(db.load_state(ACCOUNT_ID2, "data"), None);
    }

    #[test]
    fn remove_state_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        fork.store_state(ACCOUNT_ID1, "data1", vec![1, 2, 3]);
        fork.store_state(ACCOUNT_ID1, "data2", vec![4, 5, 6]);
        db.fork_merge(fork).unwrap();
        let mut fork = db.fork_create();
        fork.remove_state(ACCOUNT_ID1, "data1");

        db.fork_merge(fork).unwrap();

        assert_eq!(db.load_state(ACCOUNT_ID1, "data1"), None);
        assert_eq!(db.load_state(ACCOUNT_ID1, "data2"), Some(vec![4, 5, 6]));
    }

    #[test]
    fn get_state_keys() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        fork.store_state(ACCOUNT_ID1, "data2", vec![1, 2, 3]);
        db.fork_merge(fork).unwrap();
        let mut fork = db.fork_create();

        fork.store_state(ACCOUNT_ID1, "data1", vec![1, 2, 3]);
        fork.store_state(ACCOUNT_ID1, "data3", vec![1, 2, 3]);
        fork.store_state(ACCOUNT_ID2, "other", vec![1, 2, 3]);

        let res = fork.load_state_keys(ACCOUNT_ID1);

        assert_eq!(
            res,
            vec![
                "data1".to_string(),
                "data2".to_string(),
                "data3".to_string()
            ]
        );
        assert_eq!(db.load_state_keys(ACCOUNT_ID1), vec!["data2".to_string()]);
    }

    #[test]
    fn state_hash_tracks_account_state() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let bare = fork.state_hash(ACCOUNT_ID1);

        fork.store_state(ACCOUNT_ID1, "data", vec![1, 2, 3]);
        let first = fork.state_hash(ACCOUNT_ID1);
        fork.store_state(ACCOUNT_ID1, "data", vec![4, 5, 6]);
        let second = fork.state_hash(ACCOUNT_ID1);

        assert_eq!(bare, Hash::default());
        assert_ne!(bare, first);
        assert_ne!(first, second);
    }

    #[test]
    fn state_hash_removal_restores_digest() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        fork.store_state(ACCOUNT_ID1, "data", vec![1, 2, 3]);
        let digest = fork.state_hash(ACCOUNT_ID1);

        fork.store_state(ACCOUNT_ID1, "extra", vec![4, 5, 6]);
        assert_ne!(fork.state_hash(ACCOUNT_ID1), digest);
        fork.remove_state(ACCOUNT_ID1, "extra");

        assert_eq!(fork.state_hash(ACCOUNT_ID1), digest);
    }

    #[test]
    fn state_hash_survives_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        fork.store_state(ACCOUNT_ID1, "data", vec![1, 2, 3]);
        let expected = fork.state_hash(ACCOUNT_ID1);
        db.fork_merge(fork).unwrap();

        let fork = db.fork_create();

        assert_eq!(fork.state_hash(ACCOUNT_ID1), expected);
    }

    #[test]
    fn global_state_hash_folds_accounts() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        fork.store_state(ACCOUNT_ID1, "data", vec![1, 2, 3]);
        let single = fork.state_hash("");

        fork.store_state(ACCOUNT_ID2, "data", vec![4, 5, 6]);
        let double = fork.state_hash("");

        assert_ne!(single, Hash::default());
        assert_ne!(single, double);
        // Untouched account digests stay isolated.
        assert_eq!(
            fork.state_hash(ACCOUNT_ID1),
            fork.account_state_hash(ACCOUNT_ID1)
        );
    }

    #[test]
    fn store_transaction_no_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let tx = create_test_tx();
        let hash = tx.primary_hash();

        fork.store_transaction(&hash, tx);

        assert_eq!(db.load_transaction(&hash), None);
        assert!(!db.contains_transaction(&hash));
    }

    #[test]
    fn store_transaction_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let tx = create_test_tx();
        let hash = tx.primary_hash();
        fork.store_transaction(&hash, tx.clone());

        let result = db.fork_merge(fork);

        assert!(result.is_ok());
        assert!(db.contains_transaction(&hash));
        assert_eq!(db.load_transaction(&hash), Some(tx));
    }

    #[test]
    fn store_receipt_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let tx = create_test_tx();
        let hash = tx.primary_hash();
        let receipt = crate::base::schema::tests::create_test_receipt();
        fork.store_receipt(&hash, receipt.clone());

        db.fork_merge(fork).unwrap();

        assert_eq!(db.load_receipt(&hash), Some(receipt));
    }

    #[test]
    fn store_block_no_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let block = create_test_block();

        fork.store_block(block);

        assert_eq!(db.load_block(1), None);
    }

    #[test]
    fn store_block_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let block = create_test_block();
        fork.store_block(block.clone());

        let result = db.fork_merge(fork);

        assert!(result.is_ok());
        assert_eq!(db.load_block(1), Some(block.clone()));
        assert_eq!(db.load_block(u64::MAX), Some(block));
        assert_eq!(db.load_block(2), None);
    }

    #[test]
    fn load_last_block_of_many() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let mut block = create_test_block();
        fork.store_block(block.clone());
        block.data.height = 2;
        fork.store_block(block.clone());
        db.fork_merge(fork).unwrap();

        let last = db.load_block(u64::MAX).unwrap();

        assert_eq!(last.data.height, 2);
    }

    #[test]
    fn store_transactions_hashes() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let txs_hash = vec![
            "1220b706053eb366e5a649ec7117dd896c63707d52b9a02f38bb01f13ab17a798f61",
            "12200194fa02f34ddedb3f6d9bd09d774a865f26ec498e361e082240ac9ed1b82005",
            "1220b09d7f52bba3792ce81d011aa213c96de4ce4203312aa8fe1c3be933b3725df5",
            "1220816e1626269c0f8f7c1861101516f83cc6528cd59560f64cf13127f1fd0017b0",
        ];
        let txs_hash: Vec<Hash> = txs_hash
            .into_iter()
            .map(|h| Hash::from_hex(h).unwrap())
            .collect();

        let root_hash = fork.store_transactions_hashes(1, txs_hash.clone());

        assert_eq!(root_hash, merkle_root(&txs_hash));
        db.fork_merge(fork).unwrap();
        assert_eq!(db.load_transactions_hashes(1), Some(txs_hash));
        assert_eq!(db.load_transactions_hashes(2), None);
    }

    #[test]
    fn receipts_hashes_family_is_isolated() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let hashes = vec![Hash::default()];

        fork.store_receipts_hashes(1, hashes);
        db.fork_merge(fork).unwrap();

        // Same height, different tag.
        assert_eq!(db.load_transactions_hashes(1), None);
    }

    #[test]
    fn store_chain_info_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let info = create_test_chain_info();
        fork.store_chain_info(info.clone());

        assert_eq!(db.load_chain_info(), None);
        db.fork_merge(fork).unwrap();

        assert_eq!(db.load_chain_info(), Some(info));
    }

    #[test]
    fn store_round_merge_and_latest() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let mut round = create_test_round();
        fork.store_round(round.clone());
        round.number += 1;
        fork.store_round(round.clone());
        db.fork_merge(fork).unwrap();

        assert_eq!(db.load_round(2).unwrap().number, 2);
        assert_eq!(db.load_round(u64::MAX), Some(round));
        assert_eq!(db.load_round(9), None);
    }

    #[test]
    fn store_contract_merge() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();
        let descriptor = create_test_descriptor();
        fork.store_contract(descriptor.clone());
        fork.store_method_resources("kvstore", "put", vec!["caller".to_string()]);
        db.fork_merge(fork).unwrap();

        assert_eq!(db.load_contract("kvstore"), Some(descriptor));
        assert_eq!(db.load_contract("missing"), None);
        assert_eq!(
            db.load_method_resources("kvstore", "put"),
            Some(vec!["caller".to_string()])
        );
        assert_eq!(db.load_method_resources("kvstore", "missing"), None);
    }

    #[test]
    fn merge_conflict() {
        let mut db = TempDb::new();
        let mut fork1 = db.fork_create();
        let mut fork2 = db.fork_create();

        fork1.store_state("123", "abc", vec![1]);
        fork2.store_state("123", "abc", vec![3]);

        // Merge conflicting forks
        db.fork_merge(fork1).unwrap();
        db.fork_merge(fork2).unwrap();

        assert_eq!(db.load_state("123", "abc"), Some(vec![3]));
    }

    #[test]
    fn fork_rollback() {
        let mut db = TempDb::new();
        let mut fork = db.fork_create();

        // Modifications to hold.
        let t1 = create_test_tx_with_nonce(1);
        fork.store_state(ACCOUNT_ID1, "data", vec![1]);
        fork.store_transaction(&t1.primary_hash(), t1.clone());

        // Checkpoint.
        fork.flush();

        // Modifications to discard.
        let t2 = create_test_tx_with_nonce(2);
        fork.store_state(ACCOUNT_ID2, "data", vec![2]);
        fork.store_transaction(&t2.primary_hash(), t2.clone());

        // Rollback
        fork.rollback();

        // Add some other modifications to hold
        let t3 = create_test_tx_with_nonce(3);
        fork.store_state(ACCOUNT_ID1, "other", vec![3]);
        fork.store_transaction(&t3.primary_hash(), t3.clone());

        // Merge
        db.fork_merge(fork).unwrap();

        // Check that modifications between checkpoint and rollback are lost.
        assert_eq!(db.load_state(ACCOUNT_ID1, "data"), Some(vec![1]));
        assert_eq!(db.load_state(ACCOUNT_ID2, "data"), None);
        assert_eq!(db.load_state(ACCOUNT_ID1, "other"), Some(vec![3]));
        assert_eq!(db.load_transaction(&t1.primary_hash()), Some(t1));
        assert_eq!(db.load_transaction(&t2.primary_hash()), None);
        assert_eq!(db.load_transaction(&t3.primary_hash()), Some(t3));
    }

    #[test]
    fn fork_absorb() {
        let mut db = TempDb::new();
        let mut master = db.fork_create();
        let mut other = db.fork_create();

        master.store_state(ACCOUNT_ID1, "data", vec![1]);
        other.store_state(ACCOUNT_ID2, "data", vec![2]);
        other.flush();

        master.absorb(other);
        db.fork_merge(master).unwrap();

        assert_eq!(db.load_state(ACCOUNT_ID1, "data"), Some(vec![1]));
        assert_eq!(db.load_state(ACCOUNT_ID2, "data"), Some(vec![2]));
    }
}
