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

//! Smart contract execution module.
//!
//! The module provides a generic runtime trait plus a registry backed
//! implementation dispatching native methods.

use crate::{
    base::schema::{SmartContractEvent, TransactionData},
    crypto::Hash,
    db::DbFork,
    Result,
};

pub mod registry;

#[cfg(test)]
use mockall::automock;

pub use registry::ContractRegistry;

/// Smart contract runtime trait.
#[cfg_attr(test, automock)]
pub trait Runtime: Send + Sync + 'static {
    /// Execute the contract method targeted by the transaction `data`.
    /// It is required to pass a database fork to contextualize the state operations.
    fn call(
        &self,
        fork: &mut dyn DbFork,
        data: &TransactionData,
        tx_hash: Hash,
        events: &mut Vec<SmartContractEvent>,
    ) -> Result<Vec<u8>>;

    /// State resources touched by the transaction.
    /// Used by the grouper to partition a batch into conflict-free groups.
    fn resources(&self, data: &TransactionData) -> Result<Vec<String>>;
}

/// Contract registry entry persisted within the contracts namespace.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ContractDescriptor {
    /// Contract name, unique within the chain.
    pub name: String,
    /// Contract version.
    pub version: String,
    /// Exposed method names.
    pub methods: Vec<String>,
}
