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

//! Blockchain component in charge of confirmed blocks transactions execution.
//!
//! The block batch is partitioned in conflict-free groups, each group runs
//! on a private database fork and the forks are absorbed back in a master
//! fork once every group has joined. Receipts keep the in-block transaction
//! position regardless of the group that produced them.
//!
//! When the confirmed block comes with a header discovered from the peers,
//! the executor checks the previous-hash linkage, the header signature and
//! that the locally computed merkle roots and state hash match the declared
//! ones before committing anything.
//!
//! Every committed block also advances the consensus round. The transition
//! is derived from commit-time observables (block hash, producer, block
//! time) so that every replica applies the same round bookkeeping without
//! carrying consensus payloads within the block header.

use super::{
    grouper::group_with_cores,
    message::Message,
    pool::{BlockInfo, Pool},
    pubsub::{Event, PubSub},
    BlockConfig,
};
use crate::{
    base::{
        schema::{Block, BlockData, ChainInfo, Receipt},
        timestamp_millis, Mutex, RwLock,
    },
    consensus::Round,
    contract::Runtime,
    crypto::{Hash, HashAlgorithm, Hashable, KeyPair},
    db::{Db, DbFork},
    Error, ErrorKind, Result, Transaction,
};
use async_std::task;
use std::sync::Arc;

/// Executor context data.
pub(crate) struct Executor<D: Db, W: Runtime> {
    /// Outstanding transactions and blocks pool.
    pub pool: Arc<RwLock<Pool>>,
    /// Instance of a type implementing Database trait.
    db: Arc<RwLock<D>>,
    /// Smart contracts runtime.
    runtime: Arc<W>,
    /// PubSub subsystem to publish blockchain events.
    pubsub: Arc<Mutex<PubSub>>,
    /// Blockchain configuration.
    config: Arc<Mutex<BlockConfig>>,
}

impl<D: Db, W: Runtime> Clone for Executor<D, W> {
    fn clone(&self) -> Self {
        Executor {
            pool: self.pool.clone(),
            db: self.db.clone(),
            runtime: self.runtime.clone(),
            pubsub: self.pubsub.clone(),
            config: self.config.clone(),
        }
    }
}

/// Receipt payload for a failed transaction.
/// The full error description is reported only for faults the submitter
/// can act upon, internal conditions are not leaked.
fn failure_returns(err: &Error) -> Vec<u8> {
    let msg = match err.kind {
        ErrorKind::SmartContractFault | ErrorKind::ResourceNotFound => err.to_string_full(),
        _ => err.to_string(),
    };
    msg.into_bytes()
}

/// Execute one group of transactions on a private fork.
///
/// Each transaction gets a checkpoint before running so that a failed call
/// rolls back its own state changes only. Returns the fork together with
/// the receipts tagged by in-block position.
fn exec_group<F: DbFork>(
    runtime: &dyn Runtime,
    pubsub: Arc<Mutex<PubSub>>,
    mut fork: F,
    height: u64,
    txs: Vec<(usize, Transaction)>,
) -> (F, Vec<(usize, Receipt)>) {
    let mut receipts = Vec::with_capacity(txs.len());
    for (index, tx) in txs {
        let hash = tx.primary_hash();
        debug!("Executing transaction: {}", hex::encode(hash));
        fork.flush();
        let mut events = vec![];
        let result = runtime.call(&mut fork, &tx.data, hash, &mut events);
        let receipt = match result {
            Ok(returns) => {
                if !events.is_empty() && pubsub.lock().has_subscribers(Event::CONTRACT_EVENTS) {
                    for event in &events {
                        let msg = Message::ContractEvent {
                            event: event.clone(),
                        };
                        pubsub.lock().publish(Event::CONTRACT_EVENTS, msg);
                    }
                }
                let events = match events.is_empty() {
                    true => None,
                    false => Some(events),
                };
                Receipt {
                    height,
                    index: index as u32,
                    success: true,
                    returns,
                    events,
                }
            }
            Err(err) => {
                fork.rollback();
                debug!("Execution failure: {}", err.to_string_full());
                Receipt {
                    height,
                    index: index as u32,
                    success: false,
                    returns: failure_returns(&err),
                    events: None,
                }
            }
        };
        fork.store_transaction(&hash, tx);
        fork.store_receipt(&hash, receipt.clone());
        receipts.push((index, receipt));
    }
    (fork, receipts)
}

/// Round bookkeeping applied on block commit.
///
/// The mining data is derived from the block itself: the recorded in value
/// is the block hash, the out value its digest and the slot signature the
/// aggregate computed over the round. All inputs are observable by every
/// replica, so the resulting round state is identical network-wide.
///
/// Returns the rounds to persist: the updated current round, plus the
/// follow-up round when the term or the round is over.
fn advance_round(
    latest: Option<Round>,
    previous: Option<&Round>,
    miner: &str,
    block_hash: Hash,
    timestamp: u64,
    chain_start: u64,
    bootstrap_miners: &[String],
    bootstrap_interval: u64,
) -> Result<Vec<Round>> {
    let mut round = match latest {
        Some(round) => round,
        None => Round::first_of_term(bootstrap_miners, bootstrap_interval, timestamp, 0, 0),
    };
    let out_value = Hash::from_data(HashAlgorithm::Sha256, block_hash.as_bytes());
    let signature = round.calculate_signature(&out_value);
    round.apply_mining_data(miner, Some(block_hash), out_value, signature, timestamp)?;
    if let Some(slot) = round.slot_mut(miner) {
        slot.produced_blocks += 1;
    }

    let term_over = previous
        .map(|prev| round.is_time_to_change_term(prev, chain_start, round.term))
        .unwrap_or_default();
    if term_over {
        let ids: Vec<String> = round.miners.keys().cloned().collect();
        let next = Round::first_of_term(
            &ids,
            round.mining_interval(),
            timestamp,
            round.number,
            round.term,
        );
        return Ok(vec![round, next]);
    }
    if timestamp >= round.extra_block_mining_time() {
        let next = round.next_round(timestamp)?;
        return Ok(vec![round, next]);
    }
    Ok(vec![round])
}

impl<D: Db, W: Runtime> Executor<D, W> {
    /// Constructs a new executor.
    pub fn new(
        pool: Arc<RwLock<Pool>>,
        db: Arc<RwLock<D>>,
        runtime: Arc<W>,
        pubsub: Arc<Mutex<PubSub>>,
        config: Arc<Mutex<BlockConfig>>,
    ) -> Self {
        Executor {
            pool,
            db,
            runtime,
            pubsub,
            config,
        }
    }

    fn keypair(&self) -> Arc<KeyPair> {
        self.config.lock().keypair.clone()
    }

    async fn exec_block(
        &mut self,
        height: u64,
        txs_hashes: &[Hash],
        prev_hash: Hash,
        header: Option<Block>,
    ) -> Result<Hash> {
        debug!("Executing block {}", height);

        // Header sanity before spending any work on the batch.
        if let Some(ref header) = header {
            if header.data.prev_hash != prev_hash {
                return Err(Error::new_ext(
                    ErrorKind::UnlinkableBlock,
                    "previous block hash mismatch",
                ));
            }
            let validator = header.data.validator.as_ref().ok_or_else(|| {
                Error::new_ext(ErrorKind::Other, "missing block validator")
            })?;
            header.data.verify(validator, &header.signature)?;
        }

        // Payloads presence is guaranteed by `can_run`.
        let batch: Vec<Transaction> = {
            let pool = self.pool.read();
            txs_hashes
                .iter()
                .map(|hash| match pool.txs.get(hash) {
                    Some(Some(tx)) => tx.clone(),
                    _ => panic!(
                        "Unexpected missing transaction during execution: {}",
                        hex::encode(hash)
                    ),
                })
                .collect()
        };

        let (strategy, cores, chain, miners, interval) = {
            let config = self.config.lock();
            (
                config.strategy,
                config.cores,
                config.chain.clone(),
                config.miners.clone(),
                config.mining_interval,
            )
        };

        let grouped = group_with_cores(self.runtime.as_ref(), strategy, cores, &batch)?;

        let mut fork = self.db.write().fork_create();

        // Failed resource detection still yields a receipt at the original
        // in-block position, with no state side effects.
        let mut receipts: Vec<(usize, Receipt)> = vec![];
        for (index, err) in &grouped.failed {
            let receipt = Receipt {
                height,
                index: *index as u32,
                success: false,
                returns: failure_returns(err),
                events: None,
            };
            fork.store_transaction(&txs_hashes[*index], batch[*index].clone());
            fork.store_receipt(&txs_hashes[*index], receipt.clone());
            receipts.push((*index, receipt));
        }

        let mut handles = vec![];
        for group in grouped.groups {
            let group_fork = self.db.write().fork_create();
            let runtime = self.runtime.clone();
            let pubsub = self.pubsub.clone();
            let txs: Vec<(usize, Transaction)> =
                group.iter().map(|&i| (i, batch[i].clone())).collect();
            handles.push(task::spawn(async move {
                exec_group(runtime.as_ref(), pubsub, group_fork, height, txs)
            }));
        }
        for handle in handles {
            let (group_fork, mut group_receipts) = handle.await;
            fork.absorb(group_fork);
            receipts.append(&mut group_receipts);
        }
        receipts.sort_by_key(|(index, _)| *index);
        let rxs_hashes: Vec<Hash> = receipts.iter().map(|(_, rx)| rx.primary_hash()).collect();

        let txs_root = fork.store_transactions_hashes(height, txs_hashes.to_vec());
        let rxs_root = fork.store_receipts_hashes(height, rxs_hashes);
        let state_root = fork.state_hash("");

        let (validator, timestamp) = match &header {
            Some(header) => (header.data.validator.clone(), header.data.timestamp),
            None => (Some(self.keypair().public_key()), timestamp_millis()),
        };

        let data = BlockData::new(
            validator,
            chain.clone(),
            height,
            timestamp,
            txs_hashes.len() as u32,
            prev_hash,
            txs_root,
            rxs_root,
            state_root,
        );

        let built = header.is_none();
        let block = match header {
            Some(header) => {
                if header.data.txs_hash != txs_root {
                    return Err(Error::new_ext(
                        ErrorKind::Other,
                        "transactions merkle root mismatch",
                    ));
                }
                if header.data.rxs_hash != rxs_root {
                    return Err(Error::new_ext(
                        ErrorKind::Other,
                        "receipts merkle root mismatch",
                    ));
                }
                if header.data.state_hash != state_root {
                    return Err(Error::new_ext(ErrorKind::Other, "state hash mismatch"));
                }
                if data.primary_hash() != header.data.primary_hash() {
                    return Err(Error::new_ext(ErrorKind::Other, "unexpected block hash"));
                }
                header
            }
            None => {
                let signature = data.sign(&self.keypair())?;
                Block { data, signature }
            }
        };
        let block_hash = block.data.primary_hash();

        let miner = match &block.data.validator {
            Some(pk) => pk.to_account_id(),
            None => return Err(Error::new_ext(ErrorKind::Other, "missing block validator")),
        };

        let latest_round = self.db.read().load_round(u64::MAX);
        if let Some(ref round) = latest_round {
            if !round.is_miner(&miner) {
                return Err(Error::new_ext(ErrorKind::Other, "unexpected block validator"));
            }
        }
        let previous_round = latest_round.as_ref().and_then(|round| {
            match round.number > 1 {
                true => self.db.read().load_round(round.number - 1),
                false => None,
            }
        });

        let info = self.db.read().load_chain_info();
        let start_timestamp = info
            .as_ref()
            .map_or(block.data.timestamp, |info| info.start_timestamp);

        let rounds = advance_round(
            latest_round,
            previous_round.as_ref(),
            &miner,
            block_hash,
            block.data.timestamp,
            start_timestamp,
            &miners,
            interval,
        )?;
        for round in rounds {
            fork.store_round(round);
        }

        fork.store_chain_info(ChainInfo {
            chain,
            best_height: height,
            best_hash: block_hash,
            start_timestamp,
        });
        fork.store_block(block.clone());
        fork.flush();

        // Single atomic commit point.
        self.db.write().fork_merge(fork)?;

        if self.pubsub.lock().has_subscribers(Event::BLOCK) {
            let msg = Message::GetBlockResponse {
                block,
                txs: Some(txs_hashes.to_vec()),
            };
            self.pubsub.lock().publish(Event::BLOCK, msg);
        }
        if built {
            info!("Block {} built and committed", height);
        }

        Ok(block_hash)
    }

    /// Pool maintenance performed after every committed block: drop
    /// out-of-window transactions and revalidate the parked ones whose
    /// anchored height is now covered.
    fn refresh_pool(&self, height: u64) {
        use super::pool::{ref_block_status, RefBlockStatus};

        let mut pool = self.pool.write();
        pool.purge_expired(height);
        for hash in pool.future_candidates(height) {
            let status = match pool.txs.get(&hash) {
                Some(Some(tx)) => {
                    let ref_hash = self
                        .db
                        .read()
                        .load_block(tx.data.ref_block_height)
                        .map(|blk| blk.data.primary_hash());
                    ref_block_status(&tx.data, Some(height), ref_hash.as_ref())
                }
                _ => continue,
            };
            match status {
                RefBlockStatus::Valid => pool.promote_future(&hash),
                _ => pool.reject_future(&hash),
            }
        }
    }

    /// Check if the executor can be run to produce the block at the given height.
    /// If `height` is `u64::MAX` the test is performed using the height after
    /// the last block in the database.
    pub fn can_run(&self, mut height: u64) -> bool {
        if height == u64::MAX {
            height = self
                .db
                .read()
                .load_block(u64::MAX)
                .map(|blk| blk.data.height + 1)
                .unwrap_or(1);
        }
        let pool = self.pool.read();
        match pool.confirmed.get(&height) {
            Some(BlockInfo {
                header: _,
                txs_hashes: Some(hashes),
            }) => hashes
                .iter()
                .all(|hash| matches!(pool.txs.get(hash), Some(Some(_)))),
            _ => false,
        }
    }

    pub async fn run(&mut self) {
        let (mut prev_hash, mut height) = match self.db.read().load_block(u64::MAX) {
            Some(block) => (block.data.primary_hash(), block.data.height + 1),
            None => (Hash::default(), 1),
        };

        loop {
            // Steal the hashes vector leaving the height slot busy.
            let (header, txs_hashes) = match self.pool.write().confirmed.get_mut(&height) {
                Some(BlockInfo {
                    header,
                    txs_hashes: Some(hashes),
                }) => (header.clone(), std::mem::take(hashes)),
                _ => break,
            };

            match self
                .exec_block(height, &txs_hashes, prev_hash, header.clone())
                .await
            {
                Ok(hash) => {
                    {
                        let mut pool = self.pool.write();
                        pool.confirmed.remove(&height);
                        txs_hashes.iter().for_each(|hash| {
                            let _ = pool.txs.remove(hash);
                        });
                    }
                    self.refresh_pool(height);
                    prev_hash = hash;
                    height += 1;
                }
                Err(err) => {
                    let blk_info = BlockInfo {
                        header,
                        txs_hashes: Some(txs_hashes),
                    };
                    self.pool.write().confirmed.insert(height, blk_info);
                    error!("Block execution error: {}", err.to_string_full());
                    break;
                }
            }

            if !self.can_run(height) {
                break;
            }
        }
    }
}
