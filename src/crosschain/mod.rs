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

//! Cross-chain indexing components.
//!
//! A parent chain indexes the block digests of its registered side chains,
//! side chains index the parent chain blocks naming them. Block data moves
//! between chains through authenticated exchange endpoints and lands in
//! per-chain caches, consumed in height order as local blocks are committed.
//!
//! - cache: per-chain accumulation of not-yet-indexed foreign block data
//! - client: exchange client with certificate-based identity verification
//! - service: cross-chain service facade
//! - worker: indexing loop, exchange endpoint and data validation

pub(crate) mod cache;
pub(crate) mod client;
pub mod service;
pub mod worker;

pub use service::{CrossChainConfig, CrossChainEndpoint, CrossChainService};
pub use worker::CrossChainWorker;
