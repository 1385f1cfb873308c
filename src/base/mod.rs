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

//! Foundation types shared by every subsystem: schema structures, MessagePack
//! helpers, merkle tree reduction, pool queue and synchronization primitives.

pub mod merkle;
pub mod queue_set;
pub mod schema;
pub mod serialize;
pub mod sync;

pub use schema::{Block, BlockData, Receipt, Transaction, TransactionData};

/// Mutex alias to easily switch implementation.
pub type Mutex<T> = parking_lot::Mutex<T>;
/// RwLock alias to easily switch implementation.
pub type RwLock<T> = parking_lot::RwLock<T>;

/// Milliseconds elapsed since the unix epoch.
pub fn timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
