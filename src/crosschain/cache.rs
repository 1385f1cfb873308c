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

//! Per-chain cache of not-yet-indexed foreign block data.
//!
//! Entries are accepted only at the next needed height, so the queue is
//! gapless by construction. Indexing consumes entries in order, validation
//! peeks at them without consuming.

use crate::base::schema::{ParentChainBlockData, SideChainBlockData};
use std::collections::VecDeque;

/// Entries that must be queued from the taken height onward before a
/// depth-limited take succeeds. Keeps the indexing a few blocks behind the
/// remote chain tip.
pub const MIN_CACHE_DEPTH: usize = 4;

/// Foreign block digest cached for indexing.
pub trait BlockDigest {
    fn chain(&self) -> &str;
    fn height(&self) -> u64;
}

impl BlockDigest for SideChainBlockData {
    fn chain(&self) -> &str {
        &self.chain
    }

    fn height(&self) -> u64 {
        self.height
    }
}

impl BlockDigest for ParentChainBlockData {
    fn chain(&self) -> &str {
        &self.chain
    }

    fn height(&self) -> u64 {
        self.height
    }
}

/// Cache of one remote chain's block digests.
pub struct ChainCache<T> {
    /// Remote chain identifier.
    chain: String,
    /// Last height consumed by an indexing step.
    recorded: u64,
    /// Contiguous entries starting at `recorded + 1`.
    queue: VecDeque<T>,
}

impl<T: BlockDigest> ChainCache<T> {
    /// New cache expecting `start_height` as the first entry.
    ///
    /// Chain heights start at 1, a zero start height is lifted to it.
    pub fn new(chain: String, start_height: u64) -> Self {
        ChainCache {
            chain,
            recorded: start_height.max(1) - 1,
            queue: VecDeque::new(),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Last height consumed by an indexing step.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Next height needed from the remote chain.
    pub fn target_height(&self) -> u64 {
        self.recorded + 1 + self.queue.len() as u64
    }

    /// Accepts an entry at exactly the target height, anything else is
    /// dropped. Returns whether the entry entered the queue.
    pub fn push(&mut self, item: T) -> bool {
        if item.chain() != self.chain || item.height() != self.target_height() {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    /// Cached entry at `height`, kept in the queue.
    pub fn peek(&self, height: u64) -> Option<&T> {
        if height <= self.recorded {
            return None;
        }
        self.queue.get((height - self.recorded - 1) as usize)
    }

    /// Consumes the entry at `height`.
    ///
    /// Entries leave the cache in order, so only `recorded + 1` can be
    /// taken. A depth-limited take additionally requires `MIN_CACHE_DEPTH`
    /// entries queued from the taken height onward.
    pub fn take(&mut self, height: u64, depth_limited: bool) -> Option<T> {
        if height != self.recorded + 1 {
            return None;
        }
        if depth_limited && self.queue.len() < MIN_CACHE_DEPTH {
            return None;
        }
        let item = self.queue.pop_front()?;
        self.recorded += 1;
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
