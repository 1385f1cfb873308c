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

//! Cooperative synchronization helpers shared by the services.

use crate::base::RwLock;
use async_std::sync::RwLock as AsyncRwLock;
use std::{collections::HashMap, sync::Arc};

/// Cooperative reader-writer lock running closures over the protected value
/// under shared or exclusive access on the async task scheduler.
///
/// Multiple `read` closures may run concurrently, a `write` closure runs
/// alone. Tasks waiting for access yield instead of blocking the executor
/// thread.
pub struct ReaderWriterLock<T> {
    inner: AsyncRwLock<T>,
}

impl<T: Default> Default for ReaderWriterLock<T> {
    fn default() -> Self {
        ReaderWriterLock::new(T::default())
    }
}

impl<T> ReaderWriterLock<T> {
    pub fn new(value: T) -> Self {
        ReaderWriterLock {
            inner: AsyncRwLock::new(value),
        }
    }

    /// Runs the closure under shared access and returns its result.
    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().await;
        f(&guard)
    }

    /// Runs the closure under exclusive access and returns its result.
    pub async fn write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

/// Concurrent registry of per-chain components keyed by chain identifier.
///
/// Components are created lazily. When two tasks race on the same chain the
/// first stored component wins and the loser receives it, so a chain is
/// never served by two instances.
pub struct ChainComponents<T> {
    map: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for ChainComponents<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChainComponents<T> {
    pub fn new() -> Self {
        ChainComponents {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the component registered for the given chain, if any.
    pub fn get(&self, chain: &str) -> Option<Arc<T>> {
        self.map.read().get(chain).cloned()
    }

    /// Returns the component registered for the given chain, creating it
    /// when absent.
    pub fn get_or_create<F>(&self, chain: &str, create: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        if let Some(component) = self.map.read().get(chain) {
            return component.clone();
        }
        let mut map = self.map.write();
        map.entry(chain.to_string())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    /// Unregisters and returns the component for the given chain.
    pub fn remove(&self, chain: &str) -> Option<Arc<T>> {
        self.map.write().remove(chain)
    }

    /// Registered chain identifiers.
    pub fn chains(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
