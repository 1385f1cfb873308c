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

//! Registry backed native runtime.
//!
//! Contracts are plain Rust functions registered under a contract name and
//! a method name together with the resource tokens the method declares.
//! Tokens are resolved per transaction and drive the conflict grouping.

use crate::{
    base::{
        schema::{SmartContractEvent, TransactionData},
        serialize::rmp_deserialize,
    },
    contract::{ContractDescriptor, Runtime},
    crypto::Hash,
    db::DbFork,
    Error, ErrorKind, Result,
};
use std::collections::HashMap;

/// Resource token resolved to the transaction submitter account.
pub const RES_CALLER: &str = "caller";
/// Resource token resolved to the target contract identifier.
pub const RES_CONTRACT: &str = "contract";

/// Builtin key-value store contract name.
pub const KVSTORE_NAME: &str = "kvstore";
const KVSTORE_VERSION: &str = "0.1.0";

/// Native method entry point.
pub type MethodHandler = fn(&mut CallContext<'_>, &[u8]) -> Result<Vec<u8>>;

/// Execution context handed to native contract methods.
pub struct CallContext<'a> {
    /// Fork receiving the method state operations.
    pub fork: &'a mut dyn DbFork,
    /// Chain identifier.
    pub chain: &'a str,
    /// Transaction submitter account id.
    pub caller: &'a str,
    /// Target contract, owner of the touched state.
    pub contract: &'a str,
    /// Hash of the transaction being executed.
    pub tx_hash: Hash,
    /// Collector for the events risen by the method.
    pub events: &'a mut Vec<SmartContractEvent>,
}

struct MethodEntry {
    handler: MethodHandler,
    /// Declared resource tokens, resolved against the transaction data.
    resources: Vec<String>,
}

struct ContractEntry {
    descriptor: ContractDescriptor,
    methods: HashMap<String, MethodEntry>,
}

/// In-process contract registry implementing the `Runtime` trait.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, ContractEntry>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        ContractRegistry::default()
    }

    /// Registry pre-loaded with the builtin contracts.
    pub fn with_builtin() -> Self {
        let mut registry = ContractRegistry::new();
        registry.register_contract(KVSTORE_NAME, KVSTORE_VERSION);
        registry.register_method(KVSTORE_NAME, "put", &[RES_CALLER], kvstore_put);
        registry.register_method(KVSTORE_NAME, "get", &[RES_CALLER], kvstore_get);
        registry.register_method(KVSTORE_NAME, "remove", &[RES_CALLER], kvstore_remove);
        registry.register_method(KVSTORE_NAME, "emit", &[RES_CALLER], kvstore_emit);
        registry
    }

    /// Register a contract. Repeated registrations update the version.
    pub fn register_contract(&mut self, name: &str, version: &str) {
        let entry = self
            .contracts
            .entry(name.to_string())
            .or_insert_with(|| ContractEntry {
                descriptor: ContractDescriptor {
                    name: name.to_string(),
                    version: String::new(),
                    methods: vec![],
                },
                methods: HashMap::new(),
            });
        entry.descriptor.version = version.to_string();
    }

    /// Register a contract method. The contract entry is created on first use.
    pub fn register_method(
        &mut self,
        contract: &str,
        method: &str,
        resources: &[&str],
        handler: MethodHandler,
    ) {
        self.register_contract_if_missing(contract);
        let entry = match self.contracts.get_mut(contract) {
            Some(entry) => entry,
            None => return,
        };
        let resources = resources.iter().map(|res| res.to_string()).collect();
        let prev = entry
            .methods
            .insert(method.to_string(), MethodEntry { handler, resources });
        if prev.is_none() {
            entry.descriptor.methods.push(method.to_string());
        }
    }

    fn register_contract_if_missing(&mut self, name: &str) {
        if !self.contracts.contains_key(name) {
            self.register_contract(name, "0.0.0");
        }
    }

    /// Descriptor of a registered contract.
    pub fn descriptor(&self, name: &str) -> Option<ContractDescriptor> {
        self.contracts
            .get(name)
            .map(|entry| entry.descriptor.clone())
    }

    /// Descriptors of every registered contract.
    pub fn descriptors(&self) -> Vec<ContractDescriptor> {
        self.contracts
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Resource tokens declared by a contract method.
    pub fn method_resources(&self, contract: &str, method: &str) -> Option<Vec<String>> {
        self.contracts
            .get(contract)
            .and_then(|entry| entry.methods.get(method))
            .map(|method| method.resources.clone())
    }

    /// Write the registry content to the contracts and call graph namespaces.
    /// Performed once at chain bootstrap so that the declared resource sets
    /// are inspectable from the store.
    pub fn seed_fork(&self, fork: &mut dyn DbFork) {
        for entry in self.contracts.values() {
            fork.store_contract(entry.descriptor.clone());
            for (name, method) in &entry.methods {
                fork.store_method_resources(
                    &entry.descriptor.name,
                    name,
                    method.resources.clone(),
                );
            }
        }
    }

    fn method(&self, contract: &str, method: &str) -> Result<&MethodEntry> {
        let entry = self
            .contracts
            .get(contract)
            .ok_or_else(|| Error::new_ext(ErrorKind::SmartContractFault, "contract not found"))?;
        entry
            .methods
            .get(method)
            .ok_or_else(|| Error::new_ext(ErrorKind::SmartContractFault, "method not found"))
    }
}

/// Maps each declared token to a concrete resource name.
/// Unrecognized tokens become contract-scoped shared resources, serializing
/// every transaction that declares them against the same contract.
fn resolve_resources(tokens: &[String], data: &TransactionData) -> Vec<String> {
    tokens
        .iter()
        .map(|token| match token.as_str() {
            RES_CALLER => data.account.clone(),
            RES_CONTRACT => data.contract.clone(),
            shared => format!("{}:{}", data.contract, shared),
        })
        .collect()
}

impl Runtime for ContractRegistry {
    fn call(
        &self,
        fork: &mut dyn DbFork,
        data: &TransactionData,
        tx_hash: Hash,
        events: &mut Vec<SmartContractEvent>,
    ) -> Result<Vec<u8>> {
        let method = self.method(&data.contract, &data.method)?;
        trace!(
            "[contract] {}::{} invoked by {}",
            data.contract,
            data.method,
            data.account
        );
        let mut ctx = CallContext {
            fork,
            chain: &data.chain,
            caller: &data.account,
            contract: &data.contract,
            tx_hash,
            events,
        };
        (method.handler)(&mut ctx, &data.args)
    }

    fn resources(&self, data: &TransactionData) -> Result<Vec<String>> {
        let method = self.method(&data.contract, &data.method)?;
        if method.resources.is_empty() {
            // No declaration, fall back to the accounts involved.
            return Ok(vec![data.account.clone(), data.contract.clone()]);
        }
        Ok(resolve_resources(&method.resources, data))
    }
}

/// Arguments for the kvstore `put` method.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PutArgs<'a> {
    /// State key.
    pub key: &'a str,
    /// Value bytes stored under the key.
    #[serde(with = "serde_bytes")]
    pub value: &'a [u8],
}

/// Arguments for the kvstore `emit` method.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct EmitArgs<'a> {
    /// Event name.
    pub name: &'a str,
    /// Event payload.
    #[serde(with = "serde_bytes")]
    pub data: &'a [u8],
}

fn kvstore_put(ctx: &mut CallContext<'_>, args: &[u8]) -> Result<Vec<u8>> {
    let args: PutArgs = rmp_deserialize(args)?;
    ctx.fork.store_state(ctx.caller, args.key, args.value.to_vec());
    Ok(vec![])
}

fn kvstore_get(ctx: &mut CallContext<'_>, args: &[u8]) -> Result<Vec<u8>> {
    let key: &str = rmp_deserialize(args)?;
    ctx.fork
        .load_state(ctx.caller, key)
        .ok_or_else(|| Error::new_ext(ErrorKind::ResourceNotFound, "state key not found"))
}

fn kvstore_remove(ctx: &mut CallContext<'_>, args: &[u8]) -> Result<Vec<u8>> {
    let key: &str = rmp_deserialize(args)?;
    ctx.fork.remove_state(ctx.caller, key);
    Ok(vec![])
}

fn kvstore_emit(ctx: &mut CallContext<'_>, args: &[u8]) -> Result<Vec<u8>> {
    let args: EmitArgs = rmp_deserialize(args)?;
    ctx.events.push(SmartContractEvent {
        event_tx: ctx.tx_hash,
        emitter_account: ctx.caller.to_string(),
        event_name: args.name.to_string(),
        event_data: args.data.to_vec(),
    });
    Ok(vec![])
}
