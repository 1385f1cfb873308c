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

//! Binary merkle tree over multihash leaves.
//!
//! Used to seal the block transactions and receipts roots. The reduction is
//! performed in place: levels with an odd number of nodes duplicate the last
//! node before hashing the pair.

use crate::crypto::{Hash, HashAlgorithm};

/// Computes the merkle root of the given leaf hashes.
///
/// An empty forest yields the default (null) hash and a single leaf is its
/// own root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::default();
    }

    let mut nodes = leaves.to_vec();
    let mut len = nodes.len();

    while len > 1 {
        let mut write = 0;
        let mut read = 0;

        while read < len {
            let left = nodes[read];
            let right = if read + 1 < len { nodes[read + 1] } else { left };

            nodes[write] = hash_pair(&left, &right);

            write += 1;
            read += 2;
        }

        len = write;
    }

    nodes[0]
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(left.size() + right.size());
    buf.extend_from_slice(left.as_bytes());
    buf.extend_from_slice(right.as_bytes());
    Hash::from_data(HashAlgorithm::Sha256, &buf)
}
