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

//! Blockchain component in charge of building candidate blocks by picking
//! unconfirmed transactions from the outstanding pool (`Pool`).
//!
//! The candidate is pushed in the pool confirmed blocks queue ready to be
//! picked up by the executor.
//!
//! This component runs when the node holds the current mining slot, the
//! scheduler decides the moment via the consensus round timetable.

use crate::{
    base::RwLock,
    blockchain::pool::{BlockInfo, Pool},
    db::Db,
};
use std::sync::Arc;

/// Builder context data.
pub(crate) struct Builder<D: Db> {
    /// Transactions per block upper limit.
    threshold: usize,
    /// Unconfirmed transactions pool.
    pool: Arc<RwLock<Pool>>,
    /// Instance of a type implementing Database trait.
    db: Arc<RwLock<D>>,
}

impl<D: Db> Clone for Builder<D> {
    fn clone(&self) -> Self {
        Builder {
            threshold: self.threshold,
            pool: self.pool.clone(),
            db: self.db.clone(),
        }
    }
}

impl<D: Db> Builder<D> {
    /// Constructs a new builder.
    pub fn new(threshold: usize, pool: Arc<RwLock<Pool>>, db: Arc<RwLock<D>>) -> Self {
        Builder {
            threshold,
            pool,
            db,
        }
    }

    /// Set the transactions per block upper limit.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    /// Adds one entry to the blockchain confirmed blocks queue.
    /// The added block is ready to be executed and will have at most
    /// `threshold` transactions. With `allow_empty` a candidate is queued
    /// even when the pool has nothing, round-closing blocks need this.
    ///
    /// Returns whether a candidate block has been queued.
    pub fn run(&mut self, allow_empty: bool) -> bool {
        let height = match self.pool.read().confirmed.iter().next_back() {
            Some((height, _)) => *height + 1,
            None => self
                .db
                .read()
                .load_block(u64::MAX)
                .map(|block| block.data.height + 1)
                .unwrap_or(1),
        };
        let mut pool = self.pool.write();
        let mut txs_hashes = vec![];
        for _ in 0..self.threshold {
            match pool.unconfirmed.pop() {
                Some(hash) => txs_hashes.push(hash),
                None => break,
            }
        }
        if txs_hashes.is_empty() && !allow_empty {
            return false;
        }
        debug!(
            "Queued candidate block {} with {} transactions",
            height,
            txs_hashes.len()
        );
        let blk_info = BlockInfo {
            header: None,
            txs_hashes: Some(txs_hashes),
        };
        pool.confirmed.insert(height, blk_info);
        true
    }
}
