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

//! Blockchain component in charge of handling messages submitted via the
//! message queue exposed by the blockchain service.
//!
//! Messages can come from both internal and external components.
//! When a message is coming from an external component (e.g. received from a
//! network interface) its validation is typically left to the dispatcher and
//! the message payload is passed "as-is" using a dedicated message type (`Packed`).
//! In this case the message is assumed to be packed using MessagePack format.
//!
//! When the message is submitted as a `Packed` message:
//! - the payload can be a single packed `Message` or a vector of `Message`s.
//! - the response, when present, is packed as well. Subscriptions performed
//!   through a packed message yield packed event notifications, so that the
//!   submitter can relay the bytes without looking inside.
//!
//! Transactions are admitted to the unconfirmed queue only when their
//! reference block is within the validity window. Transactions anchored to a
//! not-yet-known height are parked in the future queue and revalidated as
//! the chain grows.

use crate::{
    base::{
        serialize::{rmp_deserialize, rmp_serialize},
        Mutex, RwLock,
    },
    blockchain::{
        message::*,
        pool::{ref_block_status, BlockInfo, Pool, RefBlockStatus},
        pubsub::{Event, PubSub},
        BlockConfig,
    },
    crypto::{Hash, Hashable},
    db::Db,
    Block, Error, ErrorKind, Result, Transaction,
};
use std::sync::Arc;

/// Dispatcher context data.
pub(crate) struct Dispatcher<D: Db> {
    /// Blockchain configuration.
    config: Arc<Mutex<BlockConfig>>,
    /// Outstanding blocks and transactions.
    pool: Arc<RwLock<Pool>>,
    /// Instance of a type implementing Database trait.
    db: Arc<RwLock<D>>,
    /// PubSub subsystem to publish blockchain events.
    pubsub: Arc<Mutex<PubSub>>,
}

impl<D: Db> Clone for Dispatcher<D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            pool: self.pool.clone(),
            db: self.db.clone(),
            pubsub: self.pubsub.clone(),
        }
    }
}

impl<D: Db> Dispatcher<D> {
    /// Constructs a new dispatcher.
    pub fn new(
        config: Arc<Mutex<BlockConfig>>,
        pool: Arc<RwLock<Pool>>,
        db: Arc<RwLock<D>>,
        pubsub: Arc<Mutex<PubSub>>,
    ) -> Self {
        Dispatcher {
            config,
            pool,
            db,
            pubsub,
        }
    }

    fn put_transaction_internal(&self, tx: Transaction) -> Result<Hash> {
        tx.verify()?;

        let hash = tx.primary_hash();
        debug!("Received transaction: {}", hex::encode(hash));

        // Check the chain identifier.
        if self.config.lock().chain != tx.data.chain {
            return Err(Error::new_ext(
                ErrorKind::Other,
                "transaction for a different chain",
            ));
        }

        // Anchor status against the current chain state.
        let current_height = self
            .db
            .read()
            .load_block(u64::MAX)
            .map(|blk| blk.data.height);
        let ref_hash = self
            .db
            .read()
            .load_block(tx.data.ref_block_height)
            .map(|blk| blk.data.primary_hash());
        let status = ref_block_status(&tx.data, current_height, ref_hash.as_ref());

        // Check if already present in db.
        if self.db.read().contains_transaction(&hash) {
            return Err(ErrorKind::DuplicatedConfirmedTx.into());
        }

        let mut pool = self.pool.write();
        match pool.txs.get_mut(&hash) {
            None => match status {
                RefBlockStatus::Valid => {
                    pool.txs.insert(hash, Some(tx));
                    pool.unconfirmed.push(hash);
                }
                RefBlockStatus::Future => {
                    debug!(
                        "Transaction {} parked until its anchor height is known",
                        hex::encode(hash)
                    );
                    pool.txs.insert(hash, Some(tx));
                    pool.future.push(hash);
                }
                _ => status.as_result()?,
            },
            Some(tx_ref @ None) => {
                // Payload awaited by a confirmed block, anchor already vouched.
                *tx_ref = Some(tx);
            }
            Some(Some(_)) => {
                return if pool.unconfirmed.contains(&hash) || pool.future.contains(&hash) {
                    Err(ErrorKind::DuplicatedUnconfirmedTx.into())
                } else {
                    Err(ErrorKind::DuplicatedConfirmedTx.into())
                };
            }
        }
        Ok(hash)
    }

    #[inline]
    fn broadcast_attempt(&self, tx: Transaction) {
        let mut sub = self.pubsub.lock();
        if sub.has_subscribers(Event::TRANSACTION) {
            sub.publish(Event::TRANSACTION, Message::GetTransactionResponse { tx });
        }
    }

    fn put_transaction_handler(&self, tx: Transaction) -> Message {
        let result = self.put_transaction_internal(tx.clone());
        match result {
            Ok(hash) => {
                self.broadcast_attempt(tx);
                Message::PutTransactionResponse { hash }
            }
            Err(err) => {
                debug!("Error: {}", err.to_string());
                Message::Exception(err)
            }
        }
    }

    fn get_transaction_handler(&self, hash: Hash) -> Message {
        let mut opt = self.db.read().load_transaction(&hash);
        if opt.is_none() {
            opt = match self.pool.read().txs.get(&hash) {
                Some(Some(tx)) => Some(tx.clone()),
                _ => None,
            }
        }
        match opt {
            Some(tx) => Message::GetTransactionResponse { tx },
            None => Message::Exception(ErrorKind::ResourceNotFound.into()),
        }
    }

    fn get_receipt_handler(&self, hash: Hash) -> Message {
        let opt = self.db.read().load_receipt(&hash);
        match opt {
            Some(rx) => Message::GetReceiptResponse { rx },
            None => Message::Exception(ErrorKind::ResourceNotFound.into()),
        }
    }

    fn get_block_handler(&self, height: u64, txs: bool) -> Message {
        let opt = self.db.read().load_block(height);
        match opt {
            Some(block) => {
                let blk_txs = if txs {
                    self.db.read().load_transactions_hashes(block.data.height)
                } else {
                    None
                };
                Message::GetBlockResponse {
                    block,
                    txs: blk_txs,
                }
            }
            None => Message::Exception(Error::new(ErrorKind::ResourceNotFound)),
        }
    }

    fn get_chain_info_handler(&self) -> Message {
        match self.db.read().load_chain_info() {
            Some(info) => Message::GetChainInfoResponse { info },
            None => Message::Exception(Error::new(ErrorKind::ResourceNotFound)),
        }
    }

    fn get_round_handler(&self, number: u64) -> Message {
        match self.db.read().load_round(number) {
            Some(round) => Message::GetRoundResponse { round },
            None => Message::Exception(Error::new(ErrorKind::ResourceNotFound)),
        }
    }

    fn get_transaction_res_handler(&self, transaction: Transaction) {
        let _ = self.put_transaction_internal(transaction);
    }

    fn get_block_res_handler(&self, block: Block, txs_hashes: Option<Vec<Hash>>) {
        let opt = self.db.read().load_block(u64::MAX);

        let mut missing_headers = match opt {
            Some(last) => last.data.height + 1..block.data.height,
            None => 1..block.data.height,
        };
        if txs_hashes.is_none() {
            missing_headers.end += 1;
        }

        if missing_headers.start <= block.data.height {
            let mut pool = self.pool.write();
            if let Some(ref hashes) = txs_hashes {
                for hash in hashes {
                    pool.unconfirmed.remove(hash);
                    pool.future.remove(hash);
                    if !pool.txs.contains_key(hash) {
                        pool.txs.insert(*hash, None);
                    }
                }
            }
            let height = block.data.height;
            let blk_info = BlockInfo {
                header: Some(block),
                txs_hashes,
            };
            pool.confirmed.insert(height, blk_info);
        }
    }

    fn packed_message_handler(
        &self,
        buf: Vec<u8>,
        res_chan: &BlockResponseSender,
        pack_level: usize,
    ) -> Option<Message> {
        trace!("RX ({}): {}", buf.len(), hex::encode(&buf));
        const ARRAY_HIGH_NIBBLE: u8 = 0x90;

        // Be sure that the client is using anonymous serialization format.
        let tag = buf.first().cloned().unwrap_or_default();
        if (tag & ARRAY_HIGH_NIBBLE) != ARRAY_HIGH_NIBBLE {
            let err = Error::new_ext(
                ErrorKind::MalformedData,
                "expected anonymous serialization format",
            );
            return Some(Message::Exception(err));
        }

        let res = match rmp_deserialize(&buf) {
            Ok(MultiMessage::Simple(req)) => self
                .message_handler_ext(req, res_chan, pack_level)
                .map(MultiMessage::Simple),
            Ok(MultiMessage::Sequence(requests)) => {
                let mut responses = Vec::with_capacity(requests.len());
                for req in requests.into_iter() {
                    if let Some(res) = self.message_handler_ext(req, res_chan, pack_level) {
                        responses.push(res);
                    };
                }
                match responses.is_empty() {
                    true => None,
                    false => Some(MultiMessage::Sequence(responses)),
                }
            }
            Err(_err) => {
                let res = Message::Exception(ErrorKind::MalformedData.into());
                Some(MultiMessage::Simple(res))
            }
        };
        res.map(|res| {
            let buf = rmp_serialize(&res).unwrap_or_default();
            trace!("TX ({}): {}", buf.len(), hex::encode(&buf));
            Message::Packed { buf }
        })
    }

    pub fn message_handler(&self, req: Message, res_chan: &BlockResponseSender) -> Option<Message> {
        self.message_handler_ext(req, res_chan, 0)
    }

    /// Message handler carrying the envelope nesting level. Subscriptions
    /// inherit the level so that notifications come back with the same
    /// packing the subscriber used.
    fn message_handler_ext(
        &self,
        req: Message,
        res_chan: &BlockResponseSender,
        pack_level: usize,
    ) -> Option<Message> {
        match req {
            Message::PutTransactionRequest { confirm, tx } => {
                let res = self.put_transaction_handler(tx);
                confirm.then(|| res)
            }
            Message::GetTransactionRequest { hash } => {
                let res = self.get_transaction_handler(hash);
                Some(res)
            }
            Message::GetReceiptRequest { hash } => {
                let res = self.get_receipt_handler(hash);
                Some(res)
            }
            Message::GetBlockRequest { height, txs } => {
                let res = self.get_block_handler(height, txs);
                Some(res)
            }
            Message::GetChainInfoRequest => {
                let res = self.get_chain_info_handler();
                Some(res)
            }
            Message::GetRoundRequest { number } => {
                let res = self.get_round_handler(number);
                Some(res)
            }
            Message::Subscribe { id, events } => {
                self.pubsub
                    .lock()
                    .subscribe(id, events, pack_level, res_chan.clone());
                None
            }
            Message::Unsubscribe { id, events } => {
                self.pubsub.lock().unsubscribe(id, events);
                None
            }
            Message::GetBlockResponse { block, txs } => {
                self.get_block_res_handler(block, txs);
                None
            }
            Message::GetTransactionResponse { tx } => {
                self.get_transaction_res_handler(tx);
                None
            }
            Message::Packed { buf } => self.packed_message_handler(buf, res_chan, pack_level + 1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::tests::{create_test_block, create_test_chain_info, create_test_tx},
        blockchain::grouper::GroupingStrategy,
        channel::simple_channel,
        consensus::round::tests::create_test_round,
        crypto::{ecdsa::tests::ecdsa_secp384_test_keypair, sign::tests::create_test_keypair, KeyPair},
        db::*,
        Error, ErrorKind,
    };

    fn create_dispatcher(db: MockDb) -> Dispatcher<MockDb> {
        let pool = Arc::new(RwLock::new(Pool::default()));
        let db = Arc::new(RwLock::new(db));
        let pubsub = Arc::new(Mutex::new(PubSub::default()));
        let keypair = Arc::new(create_test_keypair());
        let miner = keypair.public_key().to_account_id();
        let config = Arc::new(Mutex::new(BlockConfig {
            threshold: 42,
            timeout: 3,
            chain: "lattice".to_string(),
            keypair,
            miners: vec![miner],
            mining_interval: 4_000,
            strategy: GroupingStrategy::Naive,
            cores: 2,
        }));

        Dispatcher::new(config, pool, db, pubsub)
    }

    fn create_db_mock(tx_in_db: bool) -> MockDb {
        let mut db = MockDb::new();
        db.expect_load_block().returning(|height| match height {
            1 => Some(create_test_block()),
            _ => None,
        });
        db.expect_load_transaction().returning(|hash| {
            match *hash == create_test_tx().primary_hash() {
                true => Some(create_test_tx()),
                false => None,
            }
        });
        db.expect_load_chain_info()
            .returning(|| Some(create_test_chain_info()));
        db.expect_load_round().returning(|number| match number {
            2 | u64::MAX => Some(create_test_round()),
            _ => None,
        });
        db.expect_contains_transaction().returning(move |_| tx_in_db);
        db
    }

    /// Transaction variants signed on the fly, used to exercise the anchor
    /// window checks.
    fn create_signed_tx(ref_block_height: u64) -> Transaction {
        let mut data = crate::base::schema::tests::create_test_data();
        data.ref_block_height = ref_block_height;
        let keypair = KeyPair::Ecdsa(ecdsa_secp384_test_keypair());
        let signature = data.sign(&keypair).unwrap();
        Transaction { data, signature }
    }

    impl Dispatcher<MockDb> {
        fn message_handler_wrap(&self, req: Message) -> Option<Message> {
            let (tx_chan, _rx_chan) = simple_channel::<Message>();
            self.message_handler(req, &tx_chan)
        }
    }

    #[test]
    fn put_anchor_free_transaction() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let tx = create_signed_tx(0);
        let hash = tx.primary_hash();
        let req = Message::PutTransactionRequest { confirm: true, tx };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        assert_eq!(res, Message::PutTransactionResponse { hash });
        let pool = dispatcher.pool.read();
        assert!(pool.unconfirmed.contains(&hash));
    }

    #[test]
    fn put_future_anchored_transaction() {
        // The factory transaction is anchored to height 5, the mock chain
        // best block is at height 1.
        let dispatcher = create_dispatcher(create_db_mock(false));
        let tx = create_test_tx();
        let hash = tx.primary_hash();
        let req = Message::PutTransactionRequest { confirm: true, tx };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        assert_eq!(res, Message::PutTransactionResponse { hash });
        let pool = dispatcher.pool.read();
        assert!(pool.future.contains(&hash));
        assert!(!pool.unconfirmed.contains(&hash));
    }

    #[test]
    fn put_expired_anchored_transaction() {
        let mut db = MockDb::new();
        db.expect_load_block().returning(|height| match height {
            u64::MAX => {
                let mut block = create_test_block();
                block.data.height = 100;
                Some(block)
            }
            5 => Some(create_test_block()),
            _ => None,
        });
        db.expect_contains_transaction().returning(|_| false);
        let dispatcher = create_dispatcher(db);
        let req = Message::PutTransactionRequest {
            confirm: true,
            tx: create_signed_tx(5),
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::Exception(Error::new(ErrorKind::RefBlockExpired));
        assert_eq!(res, exp_res);
    }

    #[test]
    fn put_invalid_anchored_transaction() {
        // The block at the anchor height exists but its hash does not match
        // the transaction prefix.
        let mut db = MockDb::new();
        db.expect_load_block().returning(|height| match height {
            u64::MAX => {
                let mut block = create_test_block();
                block.data.height = 7;
                Some(block)
            }
            5 => Some(create_test_block()),
            _ => None,
        });
        db.expect_contains_transaction().returning(|_| false);
        let dispatcher = create_dispatcher(db);
        let req = Message::PutTransactionRequest {
            confirm: true,
            tx: create_signed_tx(5),
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::Exception(Error::new(ErrorKind::RefBlockInvalid));
        assert_eq!(res, exp_res);
    }

    #[test]
    fn put_bad_signature_transaction() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let mut tx = create_test_tx();
        tx.signature[0] = tx.signature[0].wrapping_add(1);
        let req = Message::PutTransactionRequest { confirm: true, tx };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        match res {
            Message::Exception(err) => {
                assert_eq!(err.kind, ErrorKind::InvalidSignature)
            }
            _ => panic!("Unexpected response"),
        }
    }

    #[test]
    fn put_foreign_chain_transaction() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let mut data = crate::base::schema::tests::create_test_data();
        data.chain = "mainnet".to_string();
        let keypair = KeyPair::Ecdsa(ecdsa_secp384_test_keypair());
        let signature = data.sign(&keypair).unwrap();
        let req = Message::PutTransactionRequest {
            confirm: true,
            tx: Transaction { data, signature },
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::Exception(Error::new_ext(
            ErrorKind::Other,
            "transaction for a different chain",
        ));
        assert_eq!(res, exp_res);
    }

    #[test]
    fn put_duplicated_unconfirmed_transaction() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let req = Message::PutTransactionRequest {
            confirm: true,
            tx: create_signed_tx(0),
        };
        dispatcher.message_handler_wrap(req.clone()).unwrap();

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::Exception(Error::new(ErrorKind::DuplicatedUnconfirmedTx));
        assert_eq!(res, exp_res);
    }

    #[test]
    fn put_duplicated_confirmed_transaction() {
        let dispatcher = create_dispatcher(create_db_mock(true));
        let req = Message::PutTransactionRequest {
            confirm: true,
            tx: create_test_tx(),
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::Exception(Error::new(ErrorKind::DuplicatedConfirmedTx));
        assert_eq!(res, exp_res);
    }

    #[test]
    fn get_transaction() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let req = Message::GetTransactionRequest {
            hash: create_test_tx().primary_hash(),
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::GetTransactionResponse {
            tx: create_test_tx(),
        };
        assert_eq!(res, exp_res);
    }

    #[test]
    fn get_block() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let req = Message::GetBlockRequest {
            height: 1,
            txs: false,
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::GetBlockResponse {
            block: create_test_block(),
            txs: None,
        };
        assert_eq!(res, exp_res);
    }

    #[test]
    fn get_chain_info() {
        let dispatcher = create_dispatcher(create_db_mock(false));

        let res = dispatcher
            .message_handler_wrap(Message::GetChainInfoRequest)
            .unwrap();

        let exp_res = Message::GetChainInfoResponse {
            info: create_test_chain_info(),
        };
        assert_eq!(res, exp_res);
    }

    #[test]
    fn get_latest_round() {
        let dispatcher = create_dispatcher(create_db_mock(false));
        let req = Message::GetRoundRequest { number: u64::MAX };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let exp_res = Message::GetRoundResponse {
            round: create_test_round(),
        };
        assert_eq!(res, exp_res);
    }

    #[test]
    fn block_response_parks_confirmed_info() {
        // Local chain is empty, the factory block at height 1 is the next
        // expected one.
        let mut db = MockDb::new();
        db.expect_load_block().returning(|_| None);
        let dispatcher = create_dispatcher(db);
        let block = create_test_block();
        let tx_hash = create_test_tx().primary_hash();
        let req = Message::GetBlockResponse {
            block: block.clone(),
            txs: Some(vec![tx_hash]),
        };

        let res = dispatcher.message_handler_wrap(req);

        assert!(res.is_none());
        let pool = dispatcher.pool.read();
        let info = pool.confirmed.get(&1).unwrap();
        assert_eq!(info.header, Some(block));
        assert!(pool.txs.contains_key(&tx_hash));
    }

    #[test]
    fn submit_packed() {
        let get_block_packed = hex::decode("93a13900c2").unwrap();
        let dispatcher = create_dispatcher(create_db_mock(false));
        let req = Message::Packed {
            buf: get_block_packed,
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        match res {
            Message::Packed { buf: _ } => (),
            _ => panic!("Unexpected response"),
        }
    }

    #[test]
    fn submit_packed_named() {
        let get_block_packed = hex::decode("83a474797065a139a668656967687400a3747873c2").unwrap();
        let dispatcher = create_dispatcher(create_db_mock(false));
        let req = Message::Packed {
            buf: get_block_packed,
        };

        let res = dispatcher.message_handler_wrap(req).unwrap();

        let err = Error::new_ext(
            ErrorKind::MalformedData,
            "expected anonymous serialization format",
        );
        assert_eq!(res, Message::Exception(err));
    }
}
