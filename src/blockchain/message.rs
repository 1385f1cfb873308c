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

//! Messages used to interact with the blockchain service.
//! Message elements defined as "packed" are structures serialized in
//! "MessagePack" format.

use super::Event;
use crate::{
    base::schema::{
        Block, ChainInfo, ParentChainBlockData, Receipt, SideChainBlockData, SmartContractEvent,
        Transaction,
    },
    channel,
    consensus::Round,
    crypto::Hash,
    Error,
};

/// Message types enumeration.
///
/// TODO
/// Enum variants are internally tagged as strings.
/// We will switch to integer tags as soon as
/// [this](https://github.com/serde-rs/serde/pull/2056) is merged.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum Message {
    /// Exception response used for the full set of messages.
    #[serde(rename = "0")]
    Exception(Error),
    /// Subscribe to a set of blockchain events.
    #[serde(rename = "1")]
    Subscribe {
        /// Subscriber identifier.
        id: String,
        /// Events set (bitflags).
        events: Event,
    },
    /// Unsubscribe from a set of blockchain events.
    #[serde(rename = "2")]
    Unsubscribe {
        /// Subscriber identifier.
        id: String,
        /// Events set (bitflags).
        events: Event,
    },
    /// Add transaction request. Boolean is true if we require confirmation.
    #[serde(rename = "3")]
    PutTransactionRequest {
        /// Request for confirmation.
        confirm: bool,
        /// `Transaction` structure.
        tx: Transaction,
    },
    /// Put transaction response.
    /// This message is sent only if `PutTransactionRequest` confirmation is requested.
    #[serde(rename = "4")]
    PutTransactionResponse {
        /// Transaction `data` hash.
        hash: Hash,
    },
    /// Get transaction request.
    #[serde(rename = "5")]
    GetTransactionRequest {
        /// `Transaction::data` hash.
        hash: Hash,
    },
    /// Get transaction response.
    #[serde(rename = "6")]
    GetTransactionResponse { tx: Transaction },
    /// Get receipt request.
    #[serde(rename = "7")]
    GetReceiptRequest {
        /// `Transaction::data` hash.
        hash: Hash,
    },
    /// Get transaction receipt response.
    #[serde(rename = "8")]
    GetReceiptResponse {
        /// `Receipt` structure.
        rx: Receipt,
    },
    /// Get block request.
    #[serde(rename = "9")]
    GetBlockRequest {
        /// Block height, u64::MAX for the last block.
        height: u64,
        /// Request for block transactions hashes.
        txs: bool,
    },
    /// Get block response. Also gossiped to block subscribers on commit.
    #[serde(rename = "10")]
    GetBlockResponse {
        /// `Block` structure.
        block: Block,
        /// Block transactions hashes. `None` if not requested.
        txs: Option<Vec<Hash>>,
    },
    /// Get chain bookkeeping information request.
    #[serde(rename = "11")]
    GetChainInfoRequest,
    /// Get chain bookkeeping information response.
    #[serde(rename = "12")]
    GetChainInfoResponse {
        /// `ChainInfo` structure.
        info: ChainInfo,
    },
    /// Get consensus round request.
    #[serde(rename = "13")]
    GetRoundRequest {
        /// Round number, u64::MAX for the latest one.
        number: u64,
    },
    /// Get consensus round response.
    #[serde(rename = "14")]
    GetRoundResponse {
        /// `Round` structure.
        round: Round,
    },
    /// Block production trigger sent by the consensus scheduler.
    #[serde(rename = "15")]
    ProduceBlockRequest {
        /// Packed consensus `Behaviour`.
        #[serde(with = "serde_bytes")]
        hint: Vec<u8>,
    },
    /// Block production trigger outcome.
    #[serde(rename = "16")]
    ProduceBlockResponse {
        /// False when the trigger was discarded.
        accepted: bool,
    },
    /// Get side chain block data request, sent by the parent chain.
    #[serde(rename = "17")]
    GetSideChainDataRequest {
        /// Side chain identifier.
        chain: String,
        /// Requested height.
        height: u64,
    },
    /// Get side chain block data response.
    #[serde(rename = "18")]
    GetSideChainDataResponse {
        /// `SideChainBlockData` structure.
        data: SideChainBlockData,
    },
    /// Get parent chain block data request, sent by a side chain.
    #[serde(rename = "19")]
    GetParentChainDataRequest {
        /// Parent chain identifier.
        chain: String,
        /// First requested height.
        height: u64,
    },
    /// Get parent chain block data response.
    #[serde(rename = "20")]
    GetParentChainDataResponse {
        /// Bounded batch of `ParentChainBlockData`, heights in order.
        data: Vec<ParentChainBlockData>,
    },
    /// Add network peer request.
    #[serde(rename = "21")]
    AddPeerRequest {
        /// Peer multiaddress.
        address: String,
    },
    /// Add network peer response.
    #[serde(rename = "22")]
    AddPeerResponse { added: bool },
    /// Remove network peer request.
    #[serde(rename = "23")]
    RemovePeerRequest {
        /// Peer multiaddress.
        address: String,
    },
    /// Remove network peer response.
    #[serde(rename = "24")]
    RemovePeerResponse { removed: bool },
    /// Get connected peers request.
    #[serde(rename = "25")]
    GetPeersRequest,
    /// Get connected peers response.
    #[serde(rename = "26")]
    GetPeersResponse {
        /// Peers multiaddresses.
        peers: Vec<String>,
    },
    /// Smart contract event notification.
    #[serde(rename = "27")]
    ContractEvent {
        /// `SmartContractEvent` structure.
        event: SmartContractEvent,
    },
    /// Stop blockchain service.
    #[serde(rename = "254")]
    Stop,
    /// Packed message serialized using MessagePack.
    #[serde(rename = "255")]
    Packed {
        /// Serialized message bytes.
        #[serde(with = "serde_bytes")]
        buf: Vec<u8>,
    },
}

/// Helper structure to transparently deserialize both single and vector of
/// messages. Internally this is used by the blockchain listener to deserialize
/// the content of `Packed` message types.
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum MultiMessage {
    /// Simple message.
    Simple(Message),
    /// Vector of messages.
    Sequence(Vec<Message>),
}

/// Blockchain request sender alias.
pub type BlockRequestSender = channel::RequestSender<Message, Message>;

/// Blockchain request receiver alias.
pub type BlockRequestReceiver = channel::RequestReceiver<Message, Message>;

/// Blockchain response sender alias.
pub type BlockResponseSender = channel::Sender<Message>;

/// Blockchain response receiver alias.
pub type BlockResponseReceiver = channel::Receiver<Message>;
