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

//! Blockchain worker loop.
//!
//! Owns the pool and the blockchain sub-components. Messages arrive on the
//! service request channel and are dispatched concurrently; periodic timers
//! drive block execution and synchronization. Block production is triggered
//! exclusively by the consensus scheduler via `ProduceBlockRequest`, the
//! worker only checks that this node is entitled to mine.

use crate::{
    base::{serialize::MessagePack, Mutex, RwLock},
    blockchain::{
        builder::Builder, dispatcher::Dispatcher, executor::Executor, message::*, pool::Pool,
        pubsub::PubSub, BlockConfig,
    },
    consensus::Behaviour,
    contract::Runtime,
    db::Db,
    Transaction,
};

use async_std::task::{self, Context, Poll};
use futures::future::FutureExt;
use futures::{future, prelude::*};
use std::sync::Arc;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use super::synchronizer::Synchronizer;

pub struct BlockWorker<D: Db, W: Runtime> {
    /// Blockchain service configuration.
    config: Arc<Mutex<BlockConfig>>,
    /// Database shared reference.
    db: Arc<RwLock<D>>,
    /// Blockchain requests receiver.
    rx_chan: BlockRequestReceiver,
    /// Dispatcher subsystem, in charge of handling incoming blockchain messages.
    dispatcher: Dispatcher<D>,
    /// Builder subsystem, in charge of packing candidate blocks.
    builder: Builder<D>,
    /// Executor subsystem, in charge of executing confirmed blocks.
    executor: Executor<D, W>,
    /// Synchronizer subsystem, in charge of pulling missing chain pieces.
    synchronizer: Synchronizer<D>,
    /// Builder running flag.
    building: Arc<AtomicBool>,
    /// Executor running flag.
    executing: Arc<AtomicBool>,
    /// Synchronizer running flag.
    synchronizing: Arc<AtomicBool>,
}

impl<D: Db, W: Runtime> BlockWorker<D, W> {
    pub fn new(config: BlockConfig, db: D, runtime: W, rx_chan: BlockRequestReceiver) -> Self {
        let pool = Arc::new(RwLock::new(Pool::default()));
        let pubsub = Arc::new(Mutex::new(PubSub::new()));

        let config = Arc::new(Mutex::new(config));
        let db = Arc::new(RwLock::new(db));
        let runtime = Arc::new(runtime);

        let dispatcher = Dispatcher::new(config.clone(), pool.clone(), db.clone(), pubsub.clone());
        let builder = Builder::new(config.lock().threshold, pool.clone(), db.clone());
        let executor = Executor::new(
            pool.clone(),
            db.clone(),
            runtime,
            pubsub.clone(),
            config.clone(),
        );
        let synchronizer = Synchronizer::new(pool, db.clone(), pubsub);

        let building = Arc::new(AtomicBool::new(false));
        let executing = Arc::new(AtomicBool::new(false));
        let synchronizing = Arc::new(AtomicBool::new(false));

        Self {
            config,
            db,
            rx_chan,
            dispatcher,
            builder,
            executor,
            synchronizer,
            building,
            executing,
            synchronizing,
        }
    }

    /// Set the block configuration.
    pub fn set_config(&mut self, chain: String, threshold: usize, timeout: u16) {
        let mut config = self.config.lock();
        config.chain = chain;
        config.threshold = threshold;
        config.timeout = timeout;

        self.builder.set_threshold(threshold);
    }

    /// Insert transactions directly in the pool, skipping the ones already
    /// known or addressed to another chain. Used to seed the pool at boot.
    pub fn put_txs(&mut self, txs: Vec<Transaction>) {
        for tx in txs {
            let hash = tx.primary_hash();
            debug!("Received transaction: {}", hex::encode(hash));

            if self.config.lock().chain != tx.data.chain {
                warn!(
                    "Skipping transaction for a different chain: {}",
                    hex::encode(hash)
                );
                continue;
            }
            if self.db.read().contains_transaction(&hash) {
                continue;
            }

            let mut pool = self.executor.pool.write();
            if !pool.txs.contains_key(&hash) {
                pool.txs.insert(hash, Some(tx));
                pool.unconfirmed.push(hash);
            }
        }
    }

    /// Whether this node is entitled to produce the next block: member of
    /// the current round or, while the chain is empty, of the configured
    /// bootstrap miners.
    fn can_mine(&self) -> bool {
        let (keypair, miners) = {
            let config = self.config.lock();
            (config.keypair.clone(), config.miners.clone())
        };
        let miner = keypair.public_key().to_account_id();
        match self.db.read().load_round(u64::MAX) {
            Some(round) => round.is_miner(&miner),
            None => miners.iter().any(|id| id == &miner),
        }
    }

    /// Consensus production trigger. Returns whether a candidate block has
    /// been queued for execution.
    fn try_produce(&self, hint: &[u8]) -> bool {
        let behaviour = match Behaviour::deserialize(hint) {
            Ok(behaviour) => behaviour,
            Err(_) => {
                warn!("Malformed production hint");
                return false;
            }
        };
        if let Behaviour::Nothing = behaviour {
            return false;
        }
        if !self.can_mine() {
            debug!("Production trigger on a non-miner node");
            return false;
        }
        if self.building.swap(true, Ordering::Relaxed) {
            return false;
        }
        debug!("Production trigger: {:?}", behaviour);
        // Round-closing duties produce a block even with an empty pool.
        let queued = self.builder.clone().run(true);
        self.building.store(false, Ordering::Relaxed);
        if queued {
            self.try_exec_block();
        }
        queued
    }

    fn try_exec_block(&self) {
        if !self.executor.can_run(u64::MAX) {
            return;
        }
        if self.executing.swap(true, Ordering::Relaxed) {
            return;
        }

        let mut executor = self.executor.clone();
        let executing = self.executing.clone();
        task::spawn(async move {
            executor.run().await;
            executing.store(false, Ordering::Relaxed);
        });
    }

    fn try_synchronization(&self) {
        if self.synchronizing.swap(true, Ordering::Relaxed) {
            return;
        }

        let synchronizer = self.synchronizer.clone();
        let synchronizing = self.synchronizing.clone();
        task::spawn(async move {
            synchronizer.run();
            synchronizing.store(false, Ordering::Relaxed);
        });
    }

    fn handle_message(&self, req: Message, res_chan: BlockResponseSender) {
        let dispatcher = self.dispatcher.clone();
        task::spawn(async move {
            if let Some(res) = dispatcher.message_handler(req, &res_chan) {
                if let Err(_err) = res_chan.send(res).await {
                    warn!("blockchain response send error");
                }
            }
        });
    }

    /// Blockchain worker asynchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub async fn run(&mut self) {
        let exec_timeout = self.config.lock().timeout as u64;
        let sync_timeout = 3 * self.config.lock().timeout as u64;

        let mut exec_sleep = Box::pin(task::sleep(Duration::from_secs(exec_timeout)));
        let mut sync_sleep = Box::pin(task::sleep(Duration::from_secs(sync_timeout)));

        let future = future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
            while exec_sleep.poll_unpin(cx).is_ready() {
                self.try_exec_block();
                exec_sleep = Box::pin(task::sleep(Duration::from_secs(exec_timeout)));
            }

            while sync_sleep.poll_unpin(cx).is_ready() {
                self.try_synchronization();
                sync_sleep = Box::pin(task::sleep(Duration::from_secs(sync_timeout)));
            }

            loop {
                match self.rx_chan.poll_next_unpin(cx) {
                    Poll::Ready(Some((Message::Stop, _))) => return Poll::Ready(()),
                    Poll::Ready(Some((Message::ProduceBlockRequest { hint }, res_chan))) => {
                        let accepted = self.try_produce(&hint);
                        let res = Message::ProduceBlockResponse { accepted };
                        task::spawn(async move {
                            if res_chan.send(res).await.is_err() {
                                warn!("blockchain response send error");
                            }
                        });
                    }
                    Poll::Ready(Some((req, res_chan))) => self.handle_message(req, res_chan),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }

                self.try_exec_block();
            }
            Poll::Pending
        });

        future.await
    }

    /// Blockchain worker synchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }

    // Get a shared reference to the database.
    pub fn db_arc(&mut self) -> Arc<RwLock<D>> {
        self.db.clone()
    }
}
