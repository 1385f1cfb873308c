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

use crate::{
    base::schema::{Block, ChainInfo, Receipt, Transaction},
    consensus::Round,
    contract::ContractDescriptor,
    crypto::Hash,
    error::*,
};
#[cfg(test)]
use mockall::automock;

#[cfg(feature = "with-rocksdb")]
pub mod rocks;
#[cfg(feature = "with-rocksdb")]
pub use rocks::{RocksDb, RocksDbFork};

/// Trait providing access to the database.
#[cfg_attr(test, automock(type DbForkType = MockDbFork;))]
pub trait Db: Send + Sync + 'static {
    /// Type representing a database fork.
    type DbForkType: DbFork;

    /// Check if transaction is present.
    fn contains_transaction(&self, hash: &Hash) -> bool;

    /// Load transaction by hash.
    fn load_transaction(&self, hash: &Hash) -> Option<Transaction>;

    /// Load transaction receipt using transaction data hash.
    fn load_receipt(&self, hash: &Hash) -> Option<Receipt>;

    /// Load block at a given `height` (position in the blockchain).
    /// This can be used to fetch the last block by passing u64::MAX as the height.
    fn load_block(&self, height: u64) -> Option<Block>;

    /// Get transactions hashes associated to a given block identified by `height`.
    /// The `height` refers to the block position within the blockchain.
    fn load_transactions_hashes(&self, height: u64) -> Option<Vec<Hash>>;

    /// Load chain bookkeeping information.
    fn load_chain_info(&self) -> Option<ChainInfo>;

    /// Load consensus round by round number.
    /// The latest round can be fetched by passing u64::MAX as the number.
    fn load_round(&self, number: u64) -> Option<Round>;

    /// Load smart contract descriptor by contract name.
    fn load_contract(&self, name: &str) -> Option<ContractDescriptor>;

    /// Load the state resources declared by a contract method.
    fn load_method_resources(&self, contract: &str, method: &str) -> Option<Vec<String>>;

    /// Load contract state data owned by the given `account`.
    fn load_state(&self, account: &str, key: &str) -> Option<Vec<u8>>;

    /// Load full keys list of the contract state owned by the given `account`.
    fn load_state_keys(&self, account: &str) -> Vec<String>;

    /// Create database fork.
    /// A fork is a set of uncommited modifications to the database.
    fn fork_create(&mut self) -> Self::DbForkType;

    /// Commit modifications contained in a database fork.
    fn fork_merge(&mut self, fork: Self::DbForkType) -> Result<()>;
}

/// Database fork trait.
/// Used to atomically apply a sequence of transactions to the database.
/// Instances of this trait cannot be safelly shared between threads.
#[cfg_attr(test, automock)]
pub trait DbFork: Send + 'static {
    /// Get state hash for the given `account`.
    /// For the global state hash use an empty string.
    fn state_hash(&self, account: &str) -> Hash;

    /// Load contract state data owned by the given `account`.
    fn load_state(&self, account: &str, key: &str) -> Option<Vec<u8>>;

    /// Store contract state data owned by the given `account`.
    fn store_state(&mut self, account: &str, key: &str, data: Vec<u8>);

    /// Remove contract state data owned by the given `account`.
    fn remove_state(&mut self, account: &str, key: &str);

    /// Load full keys list of the contract state owned by the given `account`.
    fn load_state_keys(&self, account: &str) -> Vec<String>;

    /// Store transaction using transaction hash as the key.
    fn store_transaction(&mut self, hash: &Hash, tx: Transaction);

    /// Store transaction execution receipt using transaction hash as the key.
    fn store_receipt(&mut self, hash: &Hash, receipt: Receipt);

    /// Insert block in the blockchain tail.
    fn store_block(&mut self, block: Block);

    /// Insert transactions hashes associated to a given block identified by `height`.
    /// The `height` refers to the block position within the blockchain.
    /// Returns the corresponding merkle tree root hash.
    fn store_transactions_hashes(&mut self, height: u64, hashes: Vec<Hash>) -> Hash;

    /// Insert transactions receipts hashes associated to a given block
    /// identified by `height`.
    /// Returns the corresponding merkle tree root hash.
    fn store_receipts_hashes(&mut self, height: u64, hashes: Vec<Hash>) -> Hash;

    /// Store chain bookkeeping information.
    fn store_chain_info(&mut self, info: ChainInfo);

    /// Store consensus round using the round number as the key.
    fn store_round(&mut self, round: Round);

    /// Store smart contract descriptor using the contract name as the key.
    fn store_contract(&mut self, descriptor: ContractDescriptor);

    /// Store the state resources declared by a contract method.
    fn store_method_resources(&mut self, contract: &str, method: &str, resources: Vec<String>);

    /// Absorb the modifications of another fork of the same database.
    /// The two write sets are expected to be disjoint, on key collisions
    /// the absorbed fork wins.
    fn absorb(&mut self, fork: Self)
    where
        Self: Sized;

    /// Creates a fork checkpoint.
    fn flush(&mut self);

    /// Rollback to the last checkpoint (`flush` point).
    fn rollback(&mut self);
}
