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

//! Network service.
//!
//! Runs the network worker within a dedicated thread and provides the
//! methods to query and control its execution. The service channel accepts
//! the peer management requests, everything else travels through the
//! blockchain service subscription.

use super::worker;
use crate::{
    blockchain::message::{BlockRequestReceiver, BlockRequestSender, Message},
    channel::confirmed_channel,
    crypto::KeyPair,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Network service configuration.
pub struct NetworkConfig {
    /// Node identity keypair. Only ed25519 keys are usable as network
    /// identity, other key types fall back to an ephemeral one.
    pub keypair: Option<Arc<KeyPair>>,
    /// Listening address.
    pub addr: String,
    /// Listening TCP port.
    pub port: u16,
    /// Network identifier, used as gossip topic.
    pub network: String,
    /// Bootstrap peer address in the `<peer-id>@<multiaddr>` form.
    pub bootstrap_addr: Option<String>,
}

/// Network service data.
pub struct NetworkService {
    /// Network configuration.
    config: Arc<NetworkConfig>,
    /// To forward incoming messages to blockchain service.
    bc_chan: BlockRequestSender,
    /// To send messages to worker.
    tx_chan: BlockRequestSender,
    /// Worker input channel, consumed on start.
    rx_chan: Option<BlockRequestReceiver>,
    /// Threads data.
    handler: Option<JoinHandle<()>>,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl NetworkService {
    /// Create a new network service instance.
    pub fn new(config: NetworkConfig, bc_chan: BlockRequestSender) -> Self {
        let (tx_chan, rx_chan) = confirmed_channel::<Message, Message>();

        NetworkService {
            config: Arc::new(config),
            bc_chan,
            tx_chan,
            rx_chan: Some(rx_chan),
            handler: None,
            canary: Arc::new(()),
        }
    }

    /// Start network service.
    pub fn start(&mut self) {
        debug!("Starting network service");
        let rx_chan = match self.rx_chan.take() {
            Some(rx_chan) => rx_chan,
            None => {
                warn!("service was already running");
                return;
            }
        };

        let config = self.config.clone();
        let bc_chan = self.bc_chan.clone();
        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker::run(config, rx_chan, bc_chan);
        });
        self.handler = Some(handle);
    }

    /// Stop network service.
    pub fn stop(&mut self) {
        debug!("Stopping network service");
        match self.handler.take() {
            Some(handle) => {
                if let Err(err) = self.tx_chan.send_sync(Message::Stop) {
                    error!("Error stopping network service thread: {:?}", err);
                }
                if handle.join().is_err() {
                    error!("Error joining network service thread");
                }
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.rx_chan.is_none()
    }

    /// Get a clone of the service input channel.
    pub fn request_channel(&self) -> BlockRequestSender {
        self.tx_chan.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_network_service() -> (NetworkService, BlockRequestReceiver) {
        let config = NetworkConfig {
            keypair: None,
            addr: "127.0.0.1".to_owned(),
            port: 0,
            network: "lattice-test".to_owned(),
            bootstrap_addr: None,
        };
        let (bc_chan, bc_rx) = confirmed_channel::<Message, Message>();
        let service = NetworkService::new(config, bc_chan);
        (service, bc_rx)
    }

    #[test]
    fn start_stop() {
        let (mut svc, _bc_rx) = create_network_service();

        svc.start();
        // Worker startup outcome depends on the host network facilities,
        // stopping shall converge in any case.
        thread::sleep(Duration::from_millis(100));
        svc.stop();

        assert!(!svc.is_running());
    }

    #[test]
    fn stop_not_running() {
        let (mut svc, _bc_rx) = create_network_service();

        svc.stop();

        assert!(!svc.is_running());
    }
}
