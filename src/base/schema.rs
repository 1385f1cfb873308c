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

use crate::{
    base::serialize::MessagePack,
    crypto::{Hash, Hashable, KeyPair, PublicKey},
    ErrorKind, Result,
};
use std::collections::BTreeMap;

/// Number of block hash bytes pinned by the transaction reference block.
pub const REF_BLOCK_PREFIX_LEN: usize = 4;

/// Reference block prefix, taken from the leading bytes of the block hash value.
pub fn ref_block_prefix(hash: &Hash) -> Vec<u8> {
    hash.hash_value()
        .iter()
        .take(REF_BLOCK_PREFIX_LEN)
        .copied()
        .collect()
}

/// Transaction payload.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct TransactionData {
    /// Submitter account identifier.
    pub account: String,
    /// Chain identifier.
    pub chain: String,
    /// Nonce to differentiate different transactions with same payload.
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    /// Height of the block this transaction is anchored to.
    pub ref_block_height: u64,
    /// Leading bytes of the hash of the block at `ref_block_height`.
    #[serde(with = "serde_bytes")]
    pub ref_block_prefix: Vec<u8>,
    /// Target smart contract identifier.
    pub contract: String,
    /// Method name.
    pub method: String,
    /// Submitter public key.
    pub caller: PublicKey,
    /// Smart contract arguments.
    #[serde(with = "serde_bytes")]
    pub args: Vec<u8>,
}

impl TransactionData {
    /// Sign transaction data.
    /// Serialization is performed using message pack format.
    pub fn sign(&self, keypair: &KeyPair) -> Result<Vec<u8>> {
        let data = self.serialize();
        keypair.sign(&data)
    }

    /// Transaction data signature verification.
    pub fn verify(&self, public_key: &PublicKey, sig: &[u8]) -> Result<()> {
        let data = self.serialize();
        match public_key.verify(&data, sig) {
            true => Ok(()),
            false => Err(ErrorKind::InvalidSignature.into()),
        }
    }
}

/// Signed transaction.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Transaction {
    /// Transaction payload.
    pub data: TransactionData,
    /// Data field signature verifiable using the `caller` within the `data`.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Signature verification using the embedded submitter key.
    pub fn verify(&self) -> Result<()> {
        self.data.verify(&self.data.caller, &self.signature)
    }

    /// Transaction content address. The signature is not part of it.
    pub fn primary_hash(&self) -> Hash {
        self.data.primary_hash()
    }
}

/// Events risen by the smart contract execution.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SmartContractEvent {
    /// Identifier of the transaction that produced this event.
    pub event_tx: Hash,
    /// The account that produced this event.
    pub emitter_account: String,
    /// Arbitrary name given to this event.
    pub event_name: String,
    /// Data emitted with this event.
    #[serde(with = "serde_bytes")]
    pub event_data: Vec<u8>,
}

/// Transaction execution receipt.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Receipt {
    /// Transaction block location.
    pub height: u64,
    /// Transaction index within the block.
    pub index: u32,
    /// Execution outcome.
    pub success: bool,
    // Follows contract specific result data.
    #[serde(with = "serde_bytes")]
    pub returns: Vec<u8>,
    /// Optional vector of smart contract events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<SmartContractEvent>>,
}

/// Block structure.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Block {
    /// Block content.
    pub data: BlockData,
    /// Block content signature performed by the validator.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Block content structure.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct BlockData {
    /// Block validator public key.
    pub validator: Option<PublicKey>,
    /// Chain identifier.
    pub chain: String,
    /// Index in the blockchain, which is also the number of ancestors blocks.
    pub height: u64,
    /// Production time, in milliseconds since the epoch.
    pub timestamp: u64,
    /// Number of transactions in this block.
    pub size: u32,
    /// Previous block hash.
    pub prev_hash: Hash,
    /// Root of the block transactions merkle tree.
    pub txs_hash: Hash,
    /// Root of the block receipts merkle tree.
    pub rxs_hash: Hash,
    /// Root of the accounts state after applying the block transactions.
    pub state_hash: Hash,
}

impl BlockData {
    /// Instance a new block data structure.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: Option<PublicKey>,
        chain: String,
        height: u64,
        timestamp: u64,
        size: u32,
        prev_hash: Hash,
        txs_hash: Hash,
        rxs_hash: Hash,
        state_hash: Hash,
    ) -> Self {
        BlockData {
            validator,
            chain,
            height,
            timestamp,
            size,
            prev_hash,
            txs_hash,
            rxs_hash,
            state_hash,
        }
    }

    /// Sign block data.
    pub fn sign(&self, keypair: &KeyPair) -> Result<Vec<u8>> {
        let data = self.serialize();
        keypair.sign(&data)
    }

    /// Block data signature verification.
    pub fn verify(&self, public_key: &PublicKey, sig: &[u8]) -> Result<()> {
        let data = self.serialize();
        match public_key.verify(&data, sig) {
            true => Ok(()),
            false => Err(ErrorKind::InvalidSignature.into()),
        }
    }
}

/// Chain bookkeeping record persisted within the metadata namespace.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ChainInfo {
    /// Chain identifier.
    pub chain: String,
    /// Height of the last committed block.
    pub best_height: u64,
    /// Hash of the last committed block.
    pub best_hash: Hash,
    /// Production time of the genesis block, in milliseconds since the epoch.
    pub start_timestamp: u64,
}

/// Side chain block digest indexed by the parent chain.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SideChainBlockData {
    /// Side chain identifier.
    pub chain: String,
    /// Side chain block height.
    pub height: u64,
    /// Side chain block header hash.
    pub block_hash: Hash,
    /// Root of the side chain block transactions merkle tree.
    pub txs_root: Hash,
}

/// Parent chain block digest replayed on the side chains.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ParentChainBlockData {
    /// Parent chain identifier.
    pub chain: String,
    /// Parent chain block height.
    pub height: u64,
    /// Root of the parent chain block transactions merkle tree.
    pub txs_root: Hash,
    /// Side chain heights indexed at this parent height.
    pub side_chain_heights: BTreeMap<String, u64>,
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::crypto::ecdsa::tests::{ecdsa_secp384_test_keypair, ecdsa_secp384_test_public_key};

    pub const CHAIN_NAME: &str = "lattice";
    pub const SIDE_CHAIN_NAME: &str = "lattice-s1";

    const TRANSACTION_DATA_HEX: &str = "99d92e516d59486e45514c64663568374b59626a4650754853526b325350676458724a5746683557363936485066713769a76c617474696365c408ab82b741e023a41205c4042c26b46ba66f7261636c65a97465726d696e61746593a56563647361a9736563703338347231c461045936d631b849bb5760bcf62e0d1261b6b6e227dc0a3892cbeec91be069aaa25996f276b271c2c53cba4be96d67edcadd66b793456290609102d5401f413cd1b5f4130b9cfaa68d30d0d25c3704cb72734cd32064365ff7042f5a3eee09b06cc1c40a4f706171756544617461";
    const TRANSACTION_HEX: &str = "9299d92e516d59486e45514c64663568374b59626a4650754853526b325350676458724a5746683557363936485066713769a76c617474696365c408ab82b741e023a41205c4042c26b46ba66f7261636c65a97465726d696e61746593a56563647361a9736563703338347231c461045936d631b849bb5760bcf62e0d1261b6b6e227dc0a3892cbeec91be069aaa25996f276b271c2c53cba4be96d67edcadd66b793456290609102d5401f413cd1b5f4130b9cfaa68d30d0d25c3704cb72734cd32064365ff7042f5a3eee09b06cc1c40a4f706171756544617461c4607a0e8f1c241f732743a82b3834d2819e6b52f1858058dfaed76432a4bd9e30039342ffeb63771325ded9ee70eabc30dadc667869ec7607788233f228dd35078e99c65b59f096176ab87d7028764e85850f273a9f7c06bdc34c0188c27801cc1f";
    const TRANSACTION_SIGN: &str = "7a0e8f1c241f732743a82b3834d2819e6b52f1858058dfaed76432a4bd9e30039342ffeb63771325ded9ee70eabc30dadc667869ec7607788233f228dd35078e99c65b59f096176ab87d7028764e85850f273a9f7c06bdc34c0188c27801cc1f";

    const RECEIPT_HEX: &str = "940309c3c40a4f706171756544617461";
    const RECEIPT_WITH_EVENTS_HEX: &str = "950309c3c40a4f7061717565446174619194c42212202c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7aea66f7261636c65a470696e67c403010203";
    const CONTRACT_EVENT_HEX: &str = "94c42212202c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7aea66f7261636c65a470696e67c403010203";

    const BLOCK_DATA_HEX: &str = "9993a56563647361a9736563703338347231c461045936d631b849bb5760bcf62e0d1261b6b6e227dc0a3892cbeec91be069aaa25996f276b271c2c53cba4be96d67edcadd66b793456290609102d5401f413cd1b5f4130b9cfaa68d30d0d25c3704cb72734cd32064365ff7042f5a3eee09b06cc1a76c61747469636501cd03e803c4221220c57e36a21fb79c4a9c0384f6a2eca1df6258d10fd1f077b46c93e25983e22d71c422122009cbff661455978715b32ab8bf6ab9a39e6d31ba85e446c34857b9d37f95e34cc422122051dca2c04df9e3dab6dcb424fbed09985730f10e1e9be93eaa61f02b50d286c5c42212208e2d21392c3750b30f8977e011a1c0ae28ff9ab140c2471f3b9c61b077cdd008";
    const BLOCK_HEX: &str = "929993a56563647361a9736563703338347231c461045936d631b849bb5760bcf62e0d1261b6b6e227dc0a3892cbeec91be069aaa25996f276b271c2c53cba4be96d67edcadd66b793456290609102d5401f413cd1b5f4130b9cfaa68d30d0d25c3704cb72734cd32064365ff7042f5a3eee09b06cc1a76c61747469636501cd03e803c4221220c57e36a21fb79c4a9c0384f6a2eca1df6258d10fd1f077b46c93e25983e22d71c422122009cbff661455978715b32ab8bf6ab9a39e6d31ba85e446c34857b9d37f95e34cc422122051dca2c04df9e3dab6dcb424fbed09985730f10e1e9be93eaa61f02b50d286c5c42212208e2d21392c3750b30f8977e011a1c0ae28ff9ab140c2471f3b9c61b077cdd008c403000102";

    const SIDE_CHAIN_DATA_HEX: &str = "94aa6c6174746963652d733107c4221220c57e36a21fb79c4a9c0384f6a2eca1df6258d10fd1f077b46c93e25983e22d71c422122009cbff661455978715b32ab8bf6ab9a39e6d31ba85e446c34857b9d37f95e34c";
    const PARENT_CHAIN_DATA_HEX: &str = "94a76c6174746963652ac422122009cbff661455978715b32ab8bf6ab9a39e6d31ba85e446c34857b9d37f95e34c81aa6c6174746963652d733107";

    const PREV_HASH_HEX: &str =
        "1220c57e36a21fb79c4a9c0384f6a2eca1df6258d10fd1f077b46c93e25983e22d71";
    const TXS_HASH_HEX: &str =
        "122009cbff661455978715b32ab8bf6ab9a39e6d31ba85e446c34857b9d37f95e34c";
    const RXS_HASH_HEX: &str =
        "122051dca2c04df9e3dab6dcb424fbed09985730f10e1e9be93eaa61f02b50d286c5";
    const STATE_HASH_HEX: &str =
        "12208e2d21392c3750b30f8977e011a1c0ae28ff9ab140c2471f3b9c61b077cdd008";
    const CONTRACT_EVENT_TX_HEX: &str =
        "12202c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    pub fn create_test_data() -> TransactionData {
        // Opaque information returned by the smart contract.
        let args = hex::decode("4f706171756544617461").unwrap();
        let public_key = PublicKey::Ecdsa(ecdsa_secp384_test_public_key());
        let account = public_key.to_account_id();

        TransactionData {
            account,
            chain: CHAIN_NAME.to_string(),
            nonce: [0xab, 0x82, 0xb7, 0x41, 0xe0, 0x23, 0xa4, 0x12].to_vec(),
            ref_block_height: 5,
            ref_block_prefix: vec![0x2c, 0x26, 0xb4, 0x6b],
            contract: "oracle".to_string(),
            method: "terminate".to_string(),
            caller: public_key,
            args,
        }
    }

    pub fn create_test_tx() -> Transaction {
        let signature = hex::decode(TRANSACTION_SIGN).unwrap();

        Transaction {
            data: create_test_data(),
            signature,
        }
    }

    pub fn create_test_contract_event() -> SmartContractEvent {
        SmartContractEvent {
            event_tx: Hash::from_hex(CONTRACT_EVENT_TX_HEX).unwrap(),
            emitter_account: "oracle".to_string(),
            event_name: "ping".to_string(),
            event_data: vec![1, 2, 3],
        }
    }

    pub fn create_test_receipt() -> Receipt {
        // Opaque information returned by the smart contract.
        let returns = hex::decode("4f706171756544617461").unwrap();
        Receipt {
            height: 3,
            index: 9,
            success: true,
            returns,
            events: None,
        }
    }

    pub fn create_test_block_data() -> BlockData {
        let public_key = PublicKey::Ecdsa(ecdsa_secp384_test_public_key());
        let prev_hash = Hash::from_hex(PREV_HASH_HEX).unwrap();
        let txs_hash = Hash::from_hex(TXS_HASH_HEX).unwrap();
        let rxs_hash = Hash::from_hex(RXS_HASH_HEX).unwrap();
        let state_hash = Hash::from_hex(STATE_HASH_HEX).unwrap();

        BlockData {
            validator: Some(public_key),
            chain: CHAIN_NAME.to_string(),
            height: 1,
            timestamp: 1000,
            size: 3,
            prev_hash,
            txs_hash,
            rxs_hash,
            state_hash,
        }
    }

    pub fn create_test_block() -> Block {
        Block {
            data: create_test_block_data(),
            signature: vec![0, 1, 2],
        }
    }

    pub fn create_test_chain_info() -> ChainInfo {
        ChainInfo {
            chain: CHAIN_NAME.to_string(),
            best_height: 1,
            best_hash: Hash::from_hex(PREV_HASH_HEX).unwrap(),
            start_timestamp: 1000,
        }
    }

    pub fn create_test_side_chain_data() -> SideChainBlockData {
        SideChainBlockData {
            chain: SIDE_CHAIN_NAME.to_string(),
            height: 7,
            block_hash: Hash::from_hex(PREV_HASH_HEX).unwrap(),
            txs_root: Hash::from_hex(TXS_HASH_HEX).unwrap(),
        }
    }

    pub fn create_test_parent_chain_data() -> ParentChainBlockData {
        let mut side_chain_heights = BTreeMap::new();
        side_chain_heights.insert(SIDE_CHAIN_NAME.to_string(), 7);
        ParentChainBlockData {
            chain: CHAIN_NAME.to_string(),
            height: 42,
            txs_root: Hash::from_hex(TXS_HASH_HEX).unwrap(),
            side_chain_heights,
        }
    }

    #[test]
    fn transaction_data_serialize() {
        let data = create_test_data();

        let buf = data.serialize();

        assert_eq!(hex::encode(buf), TRANSACTION_DATA_HEX);
    }

    #[test]
    fn transaction_data_deserialize() {
        let expected = create_test_data();
        let buf = hex::decode(TRANSACTION_DATA_HEX).unwrap();

        let data = TransactionData::deserialize(&buf).unwrap();

        assert_eq!(data, expected);
    }

    #[test]
    fn transaction_data_deserialize_fail() {
        let mut buf = hex::decode(TRANSACTION_DATA_HEX).unwrap();
        buf.pop(); // remove a byte to make it fail

        let error = TransactionData::deserialize(&buf).unwrap_err();

        assert_eq!(error.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn transaction_serialize() {
        let tx = create_test_tx();

        let buf = tx.serialize();

        assert_eq!(hex::encode(buf), TRANSACTION_HEX);
    }

    #[test]
    fn transaction_deserialize() {
        let expected = create_test_tx();
        let buf = hex::decode(TRANSACTION_HEX).unwrap();

        let tx = Transaction::deserialize(&buf).unwrap();

        assert_eq!(tx, expected);
    }

    #[test]
    fn transaction_deserialize_fail() {
        let mut buf = hex::decode(TRANSACTION_HEX).unwrap();
        buf.pop();

        let error = Transaction::deserialize(&buf).unwrap_err();

        assert_eq!(error.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn transaction_data_sign_verify() {
        let data = create_test_data();
        let keypair = KeyPair::Ecdsa(ecdsa_secp384_test_keypair());

        let signature = data.sign(&keypair).unwrap();
        let result = data.verify(&keypair.public_key(), &signature);

        assert!(result.is_ok());
    }

    #[test]
    fn transaction_data_verify_tampered() {
        let mut data = create_test_data();
        let keypair = KeyPair::Ecdsa(ecdsa_secp384_test_keypair());
        let signature = data.sign(&keypair).unwrap();

        data.nonce[0] ^= 0xff;
        let error = data.verify(&keypair.public_key(), &signature).unwrap_err();

        assert_eq!(error.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn transaction_hash_ignores_signature() {
        let mut tx = create_test_tx();
        let hash = tx.primary_hash();

        tx.signature[0] ^= 0xff;

        assert_eq!(tx.primary_hash(), hash);
    }

    #[test]
    fn transaction_hash_tracks_payload() {
        let mut tx = create_test_tx();
        let hash = tx.primary_hash();

        tx.data.nonce[0] ^= 0xff;

        assert_ne!(tx.primary_hash(), hash);
    }

    #[test]
    fn ref_block_prefix_value() {
        let hash = Hash::from_hex(PREV_HASH_HEX).unwrap();

        let prefix = ref_block_prefix(&hash);

        assert_eq!(prefix, vec![0xc5, 0x7e, 0x36, 0xa2]);
    }

    #[test]
    fn receipt_serialize() {
        let receipt = create_test_receipt();

        let buf = receipt.serialize();

        assert_eq!(hex::encode(buf), RECEIPT_HEX);
    }

    #[test]
    fn receipt_deserialize() {
        let expected = create_test_receipt();
        let buf = hex::decode(RECEIPT_HEX).unwrap();

        let receipt = Receipt::deserialize(&buf).unwrap();

        assert_eq!(receipt, expected);
    }

    #[test]
    fn receipt_deserialize_fail() {
        let mut buf = hex::decode(RECEIPT_HEX).unwrap();
        buf.pop(); // remove a byte to make it fail

        let err = Receipt::deserialize(&buf).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn receipt_with_events_serialize() {
        let mut receipt = create_test_receipt();
        receipt.events = Some(vec![create_test_contract_event()]);

        let buf = receipt.serialize();

        assert_eq!(hex::encode(buf), RECEIPT_WITH_EVENTS_HEX);
    }

    #[test]
    fn receipt_with_events_deserialize() {
        let mut expected = create_test_receipt();
        expected.events = Some(vec![create_test_contract_event()]);
        let buf = hex::decode(RECEIPT_WITH_EVENTS_HEX).unwrap();

        let receipt = Receipt::deserialize(&buf).unwrap();

        assert_eq!(receipt, expected);
    }

    #[test]
    fn contract_event_serialize() {
        let event = create_test_contract_event();

        let buf = event.serialize();

        assert_eq!(hex::encode(buf), CONTRACT_EVENT_HEX);
    }

    #[test]
    fn contract_event_deserialize() {
        let expected = create_test_contract_event();
        let buf = hex::decode(CONTRACT_EVENT_HEX).unwrap();

        let event = SmartContractEvent::deserialize(&buf).unwrap();

        assert_eq!(event, expected);
    }

    #[test]
    fn block_data_serialize() {
        let block_data = create_test_block_data();

        let buf = block_data.serialize();

        assert_eq!(hex::encode(buf), BLOCK_DATA_HEX);
    }

    #[test]
    fn block_data_deserialize() {
        let expected = create_test_block_data();
        let buf = hex::decode(BLOCK_DATA_HEX).unwrap();

        let block_data = BlockData::deserialize(&buf).unwrap();

        assert_eq!(block_data, expected);
    }

    #[test]
    fn block_serialize() {
        let block = create_test_block();

        let buf = block.serialize();

        assert_eq!(hex::encode(buf), BLOCK_HEX);
    }

    #[test]
    fn block_deserialize() {
        let expected = create_test_block();
        let buf = hex::decode(BLOCK_HEX).unwrap();

        let block = Block::deserialize(&buf).unwrap();

        assert_eq!(block, expected);
    }

    #[test]
    fn block_deserialize_fail() {
        let mut buf = hex::decode(BLOCK_HEX).unwrap();
        buf.pop(); // remove a byte to make it fail

        let error = Block::deserialize(&buf).unwrap_err();

        assert_eq!(error.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn block_data_sign_verify() {
        let data = create_test_block_data();
        let keypair = KeyPair::Ecdsa(ecdsa_secp384_test_keypair());

        let signature = data.sign(&keypair).unwrap();
        let result = data.verify(&keypair.public_key(), &signature);

        assert!(result.is_ok());
    }

    #[test]
    fn block_data_hash_tracks_content() {
        let mut data = create_test_block_data();
        let hash = data.primary_hash();

        data.height += 1;

        assert_ne!(data.primary_hash(), hash);
    }

    #[test]
    fn side_chain_data_serialize() {
        let data = create_test_side_chain_data();

        let buf = data.serialize();

        assert_eq!(hex::encode(buf), SIDE_CHAIN_DATA_HEX);
    }

    #[test]
    fn side_chain_data_deserialize() {
        let expected = create_test_side_chain_data();
        let buf = hex::decode(SIDE_CHAIN_DATA_HEX).unwrap();

        let data = SideChainBlockData::deserialize(&buf).unwrap();

        assert_eq!(data, expected);
    }

    #[test]
    fn parent_chain_data_serialize() {
        let data = create_test_parent_chain_data();

        let buf = data.serialize();

        assert_eq!(hex::encode(buf), PARENT_CHAIN_DATA_HEX);
    }

    #[test]
    fn parent_chain_data_deserialize() {
        let expected = create_test_parent_chain_data();
        let buf = hex::decode(PARENT_CHAIN_DATA_HEX).unwrap();

        let data = ParentChainBlockData::deserialize(&buf).unwrap();

        assert_eq!(data, expected);
    }
}
