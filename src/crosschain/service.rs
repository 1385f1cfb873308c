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

//! Cross-chain service.
//!
//! Runs the cross-chain worker within a dedicated thread and provides the
//! methods to query and control its execution.

use super::worker::CrossChainWorker;
use crate::{
    base::RwLock,
    blockchain::message::{BlockRequestSender, Message},
    channel::confirmed_channel,
    crypto::KeyPair,
    db::Db,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Remote chain exchange endpoint coordinates.
#[derive(Debug, Clone)]
pub struct CrossChainEndpoint {
    /// Remote chain identifier.
    pub chain: String,
    /// Remote endpoint address.
    pub addr: String,
    /// Remote endpoint port.
    pub port: u16,
    /// First remote block height to index.
    pub start_height: u64,
}

/// Cross-chain service configuration.
pub struct CrossChainConfig {
    /// Local chain identifier.
    pub chain: String,
    /// Exchange endpoint binding address.
    pub addr: String,
    /// Exchange endpoint binding port.
    pub port: u16,
    /// Directory holding the remote chains certificates.
    pub certs_dir: String,
    /// Node identity keypair, used to prove the local identity to remote chains.
    pub keypair: Arc<KeyPair>,
    /// Side chains to index.
    pub side_chains: Vec<CrossChainEndpoint>,
    /// Parent chain to index, when this node runs a side chain.
    pub parent: Option<CrossChainEndpoint>,
    /// Client polling period while the remote has fresh data (ms).
    pub poll_interval: u64,
    /// Client polling period once the caches caught up with the remote (ms).
    pub idle_interval: u64,
}

/// Cross-chain service data.
pub struct CrossChainService<D: Db> {
    /// Worker object.
    worker: Option<CrossChainWorker<D>>,
    /// Threads data.
    handler: Option<JoinHandle<CrossChainWorker<D>>>,
    /// To send messages to worker.
    tx_chan: BlockRequestSender,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl<D: Db> CrossChainService<D> {
    /// Create a new cross-chain service instance.
    /// The blockchain service request channel is used to follow block commits.
    pub fn new(config: CrossChainConfig, db: Arc<RwLock<D>>, bc_chan: BlockRequestSender) -> Self {
        let (tx_chan, rx_chan) = confirmed_channel::<Message, Message>();
        let worker = CrossChainWorker::new(config, db, rx_chan, bc_chan);

        CrossChainService {
            worker: Some(worker),
            handler: None,
            tx_chan,
            canary: Arc::new(()),
        }
    }

    /// Start cross-chain service.
    pub fn start(&mut self) {
        debug!("Starting cross-chain service");
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service was already running");
                return;
            }
        };

        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker.run_sync();
            worker
        });
        self.handler = Some(handle);
    }

    /// Stop cross-chain service.
    pub fn stop(&mut self) {
        debug!("Stopping cross-chain service");
        match self.handler.take() {
            Some(handle) => {
                if let Err(err) = self.tx_chan.send_sync(Message::Stop) {
                    error!("Error stopping cross-chain service thread: {:?}", err);
                }
                let worker = handle.join().unwrap();
                self.worker = Some(worker);
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.worker.is_none()
    }

    /// Get a clone of the service input channel.
    pub fn request_channel(&self) -> BlockRequestSender {
        self.tx_chan.clone()
    }
}
