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

//! Blockchain outstanding transactions and blocks pool.
//!
//! Every transaction is anchored to a reference block and stays eligible for
//! inclusion only while the chain is within the anchor validity window.

use crate::{
    base::{
        queue_set::QueueSet,
        schema::{ref_block_prefix, Block, Transaction, TransactionData},
    },
    crypto::hash::Hash,
    Error, ErrorKind, Result,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Validity window of a transaction reference block, in blocks.
pub const REF_BLOCK_VALID_PERIOD: u64 = 64;

/// Expired transaction records are retained past the validity window to
/// reject late duplicates, then dropped for good.
const RECORD_PURGE_PERIOD: u64 = REF_BLOCK_VALID_PERIOD * 5 / 4;

/// Pending transaction condition relative to its reference block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefBlockStatus {
    /// Anchor block known and prefix matching.
    Valid,
    /// Anchored to a height the node doesn't know yet.
    Future,
    /// Prefix not matching the block at the anchored height.
    Invalid,
    /// Validity window over.
    Expired,
}

impl RefBlockStatus {
    /// Conversion suitable for submission handlers.
    pub fn as_result(self) -> Result<()> {
        match self {
            RefBlockStatus::Valid => Ok(()),
            RefBlockStatus::Future => Err(Error::new(ErrorKind::FutureRefBlock)),
            RefBlockStatus::Invalid => Err(Error::new(ErrorKind::RefBlockInvalid)),
            RefBlockStatus::Expired => Err(Error::new(ErrorKind::RefBlockExpired)),
        }
    }
}

/// Evaluate the reference block constraint of a transaction.
///
/// `current_height` is the best block height, `None` for an empty chain.
/// `ref_hash` is the hash of the block at the anchored height, when known.
/// Expiry is checked before the prefix, a transaction out of its window is
/// reported as such even when the prefix doesn't match.
pub fn ref_block_status(
    data: &TransactionData,
    current_height: Option<u64>,
    ref_hash: Option<&Hash>,
) -> RefBlockStatus {
    let current_height = match current_height {
        Some(height) => height,
        // An empty chain accepts anchor-free submissions only.
        None => match data.ref_block_height {
            0 => return RefBlockStatus::Valid,
            _ => return RefBlockStatus::Future,
        },
    };
    if current_height.saturating_sub(data.ref_block_height) > REF_BLOCK_VALID_PERIOD {
        return RefBlockStatus::Expired;
    }
    match ref_hash {
        Some(hash) => match ref_block_prefix(hash) == data.ref_block_prefix {
            true => RefBlockStatus::Valid,
            false => RefBlockStatus::Invalid,
        },
        None => RefBlockStatus::Future,
    }
}

/// Confirmed block information.
///
/// An entry is created either when the node earns the right to build the
/// next block or when a block confirmed by someone else is discovered from
/// the peers.
pub struct BlockInfo {
    /// Confirmed block header. This is `None` when we're the builder of
    /// the block since the content is unknown up to the execution phase.
    pub header: Option<Block>,
    /// Block transactions hashes. This is `None` when only the block header
    /// is known.
    pub txs_hashes: Option<Vec<Hash>>,
}

/// Pool of outstanding transactions and blocks.
/// The structure contains both confirmed and unconfirmed transactions.
#[derive(Default)]
pub struct Pool {
    /// Contains both confirmed and unconfirmed transactions payload.
    /// The payload may be temporarily missing in case of confirmed
    /// transactions discovered during synchronization.
    pub txs: HashMap<Hash, Option<Transaction>>,
    /// Unconfirmed transactions queue. This contains the transactions
    /// waiting to be inserted in a new confirmed block.
    pub unconfirmed: QueueSet<Hash>,
    /// Transactions anchored to a block the node doesn't know yet. Parked
    /// until the chain reaches the anchored height.
    pub future: QueueSet<Hash>,
    /// Confirmed blocks information.
    pub confirmed: BTreeMap<u64, BlockInfo>,
}

impl Pool {
    /// Parked transactions whose anchored height is now covered by the
    /// chain. The caller revalidates each candidate against the actual
    /// block hash before promoting or rejecting it.
    pub fn future_candidates(&self, current_height: u64) -> Vec<Hash> {
        self.future
            .iter()
            .filter(|hash| match self.txs.get(hash) {
                Some(Some(tx)) => tx.data.ref_block_height <= current_height,
                _ => false,
            })
            .copied()
            .collect()
    }

    /// Move a revalidated parked transaction to the unconfirmed queue.
    pub fn promote_future(&mut self, hash: &Hash) {
        if self.future.remove(hash) {
            self.unconfirmed.push(*hash);
        }
    }

    /// Drop a parked transaction that failed revalidation.
    pub fn reject_future(&mut self, hash: &Hash) {
        if self.future.remove(hash) {
            self.txs.remove(hash);
        }
    }

    /// Remove from the queues the transactions fallen out of the validity
    /// window. Expired records survive within the purge period to catch
    /// late duplicates. Transactions referenced by a confirmed block are
    /// never touched.
    pub fn purge_expired(&mut self, current_height: u64) {
        let confirmed_txs: HashSet<Hash> = self
            .confirmed
            .values()
            .filter_map(|info| info.txs_hashes.as_ref())
            .flatten()
            .copied()
            .collect();

        let mut expired = vec![];
        let mut stale = vec![];
        for (hash, tx) in &self.txs {
            let data = match tx {
                Some(tx) => &tx.data,
                None => continue,
            };
            if confirmed_txs.contains(hash) {
                continue;
            }
            let age = current_height.saturating_sub(data.ref_block_height);
            if age > RECORD_PURGE_PERIOD {
                stale.push(*hash);
            } else if age > REF_BLOCK_VALID_PERIOD {
                expired.push(*hash);
            }
        }
        for hash in &expired {
            self.unconfirmed.remove(hash);
            self.future.remove(hash);
        }
        for hash in &stale {
            self.unconfirmed.remove(hash);
            self.future.remove(hash);
            self.txs.remove(hash);
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_tx;

    const FOO_HASH_HEX: &str =
        "12202c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";
    const BAR_HASH_HEX: &str =
        "1220c57e36a21fb79c4a9c0384f6a2eca1df6258d10fd1f077b46c93e25983e22d71";

    pub fn create_pool() -> Pool {
        let mut pool = Pool::default();
        let mut txs_hashes = vec![];
        for i in 0..3 {
            let mut tx = create_test_tx();
            tx.data.nonce = vec![i as u8; 8];
            let hash = tx.primary_hash();
            pool.txs.insert(hash, Some(tx));
            txs_hashes.push(hash);
        }
        let blk_info = BlockInfo {
            header: None,
            txs_hashes: Some(txs_hashes),
        };
        pool.confirmed.insert(1, blk_info);
        pool
    }

    fn create_anchored_tx(ref_block_height: u64, nonce: u8) -> Transaction {
        let mut tx = create_test_tx();
        tx.data.ref_block_height = ref_block_height;
        tx.data.nonce = vec![nonce];
        tx
    }

    #[test]
    fn ref_block_status_matching_prefix() {
        let data = create_test_tx().data;
        let ref_hash = Hash::from_hex(FOO_HASH_HEX).unwrap();

        let status = ref_block_status(&data, Some(10), Some(&ref_hash));

        assert_eq!(status, RefBlockStatus::Valid);
        assert!(status.as_result().is_ok());
    }

    #[test]
    fn ref_block_status_prefix_mismatch() {
        let data = create_test_tx().data;
        let ref_hash = Hash::from_hex(BAR_HASH_HEX).unwrap();

        let status = ref_block_status(&data, Some(10), Some(&ref_hash));

        assert_eq!(status, RefBlockStatus::Invalid);
        let err = status.as_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::RefBlockInvalid);
    }

    #[test]
    fn ref_block_status_unknown_height() {
        let data = create_test_tx().data;

        let status = ref_block_status(&data, Some(4), None);

        assert_eq!(status, RefBlockStatus::Future);
        let err = status.as_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::FutureRefBlock);
    }

    #[test]
    fn ref_block_status_window_over() {
        let data = create_test_tx().data;
        let ref_hash = Hash::from_hex(FOO_HASH_HEX).unwrap();

        // Expiry wins over the prefix check.
        let status = ref_block_status(&data, Some(70), Some(&ref_hash));

        assert_eq!(status, RefBlockStatus::Expired);
        let err = status.as_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::RefBlockExpired);
    }

    #[test]
    fn ref_block_status_window_edge() {
        let data = create_test_tx().data;
        let ref_hash = Hash::from_hex(FOO_HASH_HEX).unwrap();

        let status = ref_block_status(
            &data,
            Some(data.ref_block_height + REF_BLOCK_VALID_PERIOD),
            Some(&ref_hash),
        );

        assert_eq!(status, RefBlockStatus::Valid);
    }

    #[test]
    fn ref_block_status_empty_chain() {
        let mut data = create_test_tx().data;

        assert_eq!(ref_block_status(&data, None, None), RefBlockStatus::Future);

        data.ref_block_height = 0;

        assert_eq!(ref_block_status(&data, None, None), RefBlockStatus::Valid);
    }

    #[test]
    fn purge_expired_transactions() {
        let mut pool = Pool::default();
        let mut hashes = vec![];
        for (i, height) in [5u64, 30, 100].iter().enumerate() {
            let tx = create_anchored_tx(*height, i as u8);
            let hash = tx.primary_hash();
            pool.txs.insert(hash, Some(tx));
            pool.unconfirmed.push(hash);
            hashes.push(hash);
        }

        pool.purge_expired(100);

        // Age 95: out of the purge period, record dropped.
        assert!(!pool.txs.contains_key(&hashes[0]));
        assert!(!pool.unconfirmed.contains(&hashes[0]));
        // Age 70: expired, record retained for duplicates detection.
        assert!(pool.txs.contains_key(&hashes[1]));
        assert!(!pool.unconfirmed.contains(&hashes[1]));
        // Age 0: still in its window.
        assert!(pool.txs.contains_key(&hashes[2]));
        assert!(pool.unconfirmed.contains(&hashes[2]));
    }

    #[test]
    fn purge_spares_confirmed_transactions() {
        let mut pool = create_pool();

        pool.purge_expired(200);

        assert_eq!(pool.txs.len(), 3);
    }

    #[test]
    fn future_transactions_candidates() {
        let mut pool = Pool::default();
        let tx = create_anchored_tx(8, 0);
        let hash = tx.primary_hash();
        pool.txs.insert(hash, Some(tx));
        pool.future.push(hash);

        assert!(pool.future_candidates(7).is_empty());
        assert_eq!(pool.future_candidates(8), vec![hash]);
    }

    #[test]
    fn future_transaction_promotion() {
        let mut pool = Pool::default();
        let tx = create_anchored_tx(8, 0);
        let hash = tx.primary_hash();
        pool.txs.insert(hash, Some(tx));
        pool.future.push(hash);

        pool.promote_future(&hash);

        assert!(!pool.future.contains(&hash));
        assert!(pool.unconfirmed.contains(&hash));
        assert!(pool.txs.contains_key(&hash));
    }

    #[test]
    fn future_transaction_rejection() {
        let mut pool = Pool::default();
        let tx = create_anchored_tx(8, 0);
        let hash = tx.primary_hash();
        pool.txs.insert(hash, Some(tx));
        pool.future.push(hash);

        pool.reject_future(&hash);

        assert!(pool.future.is_empty());
        assert!(!pool.txs.contains_key(&hash));
    }
}
