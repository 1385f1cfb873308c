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

//! Network behaviour composition.
//!
//! Gossip propagates blocks and transactions, the fetch protocol serves
//! block and transaction requests peer to peer, identify, mdns and kademlia
//! take care of peer discovery. Incoming payloads are forwarded to the
//! blockchain service in packed form.

use crate::{
    base::serialize::rmp_serialize,
    blockchain::{BlockRequestSender, Message},
    error::NetworkFault,
    Error, ErrorKind, Result,
};
use async_std::task;
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite, AsyncWriteExt};
use libp2p::{
    core::{
        upgrade::{read_length_prefixed, write_length_prefixed},
        PublicKey,
    },
    gossipsub::{
        error::PublishError, Gossipsub, GossipsubConfigBuilder, GossipsubEvent, IdentTopic,
        MessageAuthenticity, ValidationMode,
    },
    identify::{Identify, IdentifyConfig, IdentifyEvent},
    kad::{
        record::store::MemoryStore, GetClosestPeersError, Kademlia, KademliaConfig, KademliaEvent,
        QueryResult,
    },
    mdns::{Mdns, MdnsConfig, MdnsEvent},
    request_response::{
        OutboundFailure, ProtocolName, ProtocolSupport, RequestResponse, RequestResponseCodec,
        RequestResponseConfig, RequestResponseEvent, RequestResponseMessage,
    },
    Multiaddr, NetworkBehaviour, PeerId,
};
use rand::Rng;
use std::{collections::HashMap, io, iter, str::FromStr};

const MAX_TRANSMIT_SIZE: usize = 524288;

/// Fetch protocol tag.
#[derive(Debug, Clone)]
pub(crate) struct FetchProtocol();

/// Fetch protocol codec. Payloads are length-prefixed packed messages.
#[derive(Clone)]
pub(crate) struct FetchCodec();

/// Packed message sent as a peer to peer request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FetchRequest(pub Vec<u8>);

/// Packed message sent back as the response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FetchResponse(pub Vec<u8>);

impl ProtocolName for FetchProtocol {
    fn protocol_name(&self) -> &[u8] {
        "/lattice/fetch/1.0.0".as_bytes()
    }
}

#[async_trait]
impl RequestResponseCodec for FetchCodec {
    type Protocol = FetchProtocol;
    type Request = FetchRequest;
    type Response = FetchResponse;

    async fn read_request<T>(&mut self, _: &FetchProtocol, io: &mut T) -> io::Result<FetchRequest>
    where
        T: AsyncRead + Unpin + Send,
    {
        let buf = read_length_prefixed(io, MAX_TRANSMIT_SIZE).await?;
        Ok(FetchRequest(buf))
    }

    async fn read_response<T>(&mut self, _: &FetchProtocol, io: &mut T) -> io::Result<FetchResponse>
    where
        T: AsyncRead + Unpin + Send,
    {
        let buf = read_length_prefixed(io, MAX_TRANSMIT_SIZE).await?;
        Ok(FetchResponse(buf))
    }

    async fn write_request<T>(
        &mut self,
        _: &FetchProtocol,
        io: &mut T,
        FetchRequest(buf): FetchRequest,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, buf).await?;
        io.close().await
    }

    async fn write_response<T>(
        &mut self,
        _: &FetchProtocol,
        io: &mut T,
        FetchResponse(buf): FetchResponse,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, buf).await?;
        io.close().await
    }
}

/// Aggregated behaviour events.
#[derive(Debug)]
pub(crate) enum ComposedEvent {
    Identify(IdentifyEvent),
    Gossip(GossipsubEvent),
    Mdns(MdnsEvent),
    Kademlia(KademliaEvent),
    ReqRes(RequestResponseEvent<FetchRequest, FetchResponse>),
}

impl From<IdentifyEvent> for ComposedEvent {
    fn from(event: IdentifyEvent) -> Self {
        ComposedEvent::Identify(event)
    }
}

impl From<GossipsubEvent> for ComposedEvent {
    fn from(event: GossipsubEvent) -> Self {
        ComposedEvent::Gossip(event)
    }
}

impl From<MdnsEvent> for ComposedEvent {
    fn from(event: MdnsEvent) -> Self {
        ComposedEvent::Mdns(event)
    }
}

impl From<KademliaEvent> for ComposedEvent {
    fn from(event: KademliaEvent) -> Self {
        ComposedEvent::Kademlia(event)
    }
}

impl From<RequestResponseEvent<FetchRequest, FetchResponse>> for ComposedEvent {
    fn from(event: RequestResponseEvent<FetchRequest, FetchResponse>) -> Self {
        ComposedEvent::ReqRes(event)
    }
}

/// Parses a peer address in the `<peer-id>@<multiaddr>` form.
pub(crate) fn parse_peer_address(address: &str) -> Result<(PeerId, Multiaddr)> {
    let (peer, addr) = address.split_once('@').ok_or_else(|| {
        Error::new_ext(
            ErrorKind::MalformedData,
            "address format should be <peer@multiaddr>",
        )
    })?;
    let peer =
        PeerId::from_str(peer).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
    let addr =
        Multiaddr::from_str(addr).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
    Ok((peer, addr))
}

/// Maps a fetch outbound failure to a network fault.
///
/// `Rpc` is worth a retry on the same peer, `PeerUnstable` marks a degraded
/// link, `Unrecoverable` means the peer cannot serve the fetch protocol and
/// is dropped.
pub(crate) fn classify_outbound_failure(failure: &OutboundFailure) -> NetworkFault {
    match failure {
        OutboundFailure::Timeout => NetworkFault::Rpc,
        OutboundFailure::DialFailure | OutboundFailure::ConnectionClosed => {
            NetworkFault::PeerUnstable
        }
        OutboundFailure::UnsupportedProtocols => NetworkFault::Unrecoverable,
    }
}

/// Network behavior for application level message processing.
#[derive(NetworkBehaviour)]
#[behaviour(out_event = "ComposedEvent")]
pub(crate) struct Behavior {
    /// Peer identification protocol.
    pub identify: Identify,
    /// Gossip-sub as pub/sub protocol.
    pub gossip: Gossipsub,
    /// mDNS for peer discovery.
    pub mdns: Mdns,
    /// Kademlia for peer discovery.
    pub kad: Kademlia<MemoryStore>,
    /// Fetch protocol for peer to peer block and transaction requests.
    pub reqres: RequestResponse<FetchCodec>,
    /// Gossip topic, one per network.
    #[behaviour(ignore)]
    pub topic: IdentTopic,
    /// Known peers with a reachable address.
    #[behaviour(ignore)]
    pub peers: HashMap<PeerId, Multiaddr>,
    /// To forward incoming messages to blockchain service.
    #[behaviour(ignore)]
    pub bc_chan: BlockRequestSender,
}

impl Behavior {
    fn identify_new(public_key: PublicKey) -> Result<Identify> {
        debug!("[network] identify start");
        let mut config = IdentifyConfig::new("lattice/1.0.0".to_owned(), public_key);
        config.push_listen_addr_updates = true;
        let identify = Identify::new(config);

        Ok(identify)
    }

    fn mdns_new() -> Result<Mdns> {
        debug!("[network] mdns start");
        let fut = Mdns::new(MdnsConfig::default());
        let mdns = task::block_on(fut).map_err(|err| Error::new_ext(ErrorKind::Other, err))?;

        Ok(mdns)
    }

    fn kad_new(peer_id: PeerId, bootaddr: Option<String>) -> Result<Kademlia<MemoryStore>> {
        debug!("[network] kad start");
        let store = MemoryStore::new(peer_id);
        let config = KademliaConfig::default();
        let mut kad = Kademlia::with_config(peer_id, store, config);

        if let Some(bootaddr) = bootaddr {
            let (boot_peer, boot_addr) = parse_peer_address(&bootaddr)?;
            kad.add_address(&boot_peer, boot_addr);

            let peer: PeerId = libp2p::identity::Keypair::generate_ed25519()
                .public()
                .into();
            kad.get_closest_peers(peer);
        }

        Ok(kad)
    }

    fn gossip_new(peer_id: PeerId, topic: &IdentTopic) -> Result<Gossipsub> {
        debug!("[network] gossip start");
        let privacy = MessageAuthenticity::Author(peer_id);
        let gossip_config = GossipsubConfigBuilder::default()
            .validation_mode(ValidationMode::Permissive)
            .max_transmit_size(MAX_TRANSMIT_SIZE)
            .build()
            .map_err(|err| Error::new_ext(ErrorKind::Other, err))?;
        let mut gossip = Gossipsub::new(privacy, gossip_config)
            .map_err(|err| Error::new_ext(ErrorKind::Other, err))?;

        gossip
            .subscribe(topic)
            .map_err(|err| Error::new_ext(ErrorKind::Other, format!("{:?}", err)))?;

        Ok(gossip)
    }

    fn reqres_new() -> RequestResponse<FetchCodec> {
        debug!("[network] fetch protocol start");
        let protocols = iter::once((FetchProtocol(), ProtocolSupport::Full));
        RequestResponse::new(FetchCodec(), protocols, RequestResponseConfig::default())
    }

    pub fn new(
        peer_id: PeerId,
        public_key: PublicKey,
        topic: IdentTopic,
        bootaddr: Option<String>,
        bc_chan: BlockRequestSender,
    ) -> Result<Self> {
        let identify = Self::identify_new(public_key)?;
        let gossip = Self::gossip_new(peer_id, &topic)?;
        let mdns = Self::mdns_new()?;
        let kad = Self::kad_new(peer_id, bootaddr)?;
        let reqres = Self::reqres_new();

        Ok(Behavior {
            identify,
            gossip,
            mdns,
            kad,
            reqres,
            topic,
            peers: HashMap::new(),
            bc_chan,
        })
    }

    /// Publishes a packed message to the gossip topic.
    pub fn broadcast(&mut self, buf: Vec<u8>) {
        if let Err(err) = self.gossip.publish(self.topic.clone(), buf) {
            if !matches!(err, PublishError::InsufficientPeers) {
                error!("[network] publish error: {:?}", err);
            }
        }
    }

    /// Sends a packed message to a random known peer over the fetch protocol.
    pub fn unicast(&mut self, buf: Vec<u8>) {
        let mut peers: Vec<PeerId> = self.peers.keys().cloned().collect();
        if peers.is_empty() {
            return;
        }
        let peer = peers.swap_remove(rand::thread_rng().gen_range(0, peers.len()));
        trace!("[network] fetch request to {}", peer);
        self.reqres.send_request(&peer, FetchRequest(buf));
    }

    pub fn has_peers(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Registers a peer given its `<peer-id>@<multiaddr>` address.
    /// Returns false when the peer was already known.
    pub fn add_peer(&mut self, address: &str) -> Result<bool> {
        let (peer, addr) = parse_peer_address(address)?;
        info!("[network] adding peer {} @ {}", peer, addr);
        self.kad.add_address(&peer, addr.clone());
        self.reqres.add_address(&peer, addr.clone());
        self.gossip.add_explicit_peer(&peer);
        Ok(self.peers.insert(peer, addr).is_none())
    }

    /// Unregisters a peer. Accepts both the `<peer-id>@<multiaddr>` form and
    /// the bare peer identifier. Returns false when the peer was not known.
    pub fn remove_peer(&mut self, address: &str) -> Result<bool> {
        let peer = match address.split_once('@') {
            Some((peer, _addr)) => peer,
            None => address,
        };
        let peer =
            PeerId::from_str(peer).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        info!("[network] removing peer {}", peer);
        let known = self.peers.contains_key(&peer);
        self.forget_peer(&peer);
        Ok(known)
    }

    /// Known peers as `<peer-id>@<multiaddr>` entries.
    pub fn peers(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|(peer, addr)| format!("{}@{}", peer, addr))
            .collect()
    }

    fn forget_peer(&mut self, peer: &PeerId) {
        self.gossip.remove_explicit_peer(peer);
        self.kad.remove_peer(peer);
        if let Some(addr) = self.peers.remove(peer) {
            self.reqres.remove_address(peer, &addr);
        }
    }

    pub fn identify_event_handler(&mut self, event: IdentifyEvent) {
        match event {
            IdentifyEvent::Received { peer_id, info } => {
                self.gossip.add_explicit_peer(&peer_id);
                for addr in info.listen_addrs {
                    debug!("[network] routing table add {} @ {}", peer_id, addr);
                    self.kad.add_address(&peer_id, addr.clone());
                    self.reqres.add_address(&peer_id, addr.clone());
                    self.peers.entry(peer_id).or_insert(addr);
                }
            }
            _ => debug!("[network] identify event: {:?}", event),
        }
    }

    pub fn mdns_event_handler(&mut self, event: MdnsEvent) {
        match event {
            MdnsEvent::Discovered(nodes) => {
                for (peer, addr) in nodes {
                    debug!("[network] discovered: {} @ {}", peer, addr);
                    self.gossip.add_explicit_peer(&peer);
                    self.reqres.add_address(&peer, addr.clone());
                    self.peers.entry(peer).or_insert(addr);
                }
            }
            MdnsEvent::Expired(nodes) => {
                for (peer, addr) in nodes {
                    debug!("[network] expired: {} @ {}", peer, addr);
                    self.gossip.remove_explicit_peer(&peer);
                    self.reqres.remove_address(&peer, &addr);
                    self.peers.remove(&peer);
                }
            }
        }
    }

    pub fn kad_event_handler(&mut self, event: KademliaEvent) {
        match event {
            KademliaEvent::RoutingUpdated {
                peer, addresses, ..
            } => {
                for addr in addresses.iter() {
                    debug!("[network] kad discovered: {} @ {}", peer, addr);
                }
                self.gossip.add_explicit_peer(&peer);
                let addr = addresses.first().clone();
                self.peers.entry(peer).or_insert(addr);
            }
            KademliaEvent::OutboundQueryCompleted {
                result: QueryResult::GetClosestPeers(result),
                ..
            } => match result {
                Ok(ok) if !ok.peers.is_empty() => {
                    debug!("[network] closest peers: {:?}", ok.peers)
                }
                Ok(_) => debug!("[network] no closest peers found"),
                Err(GetClosestPeersError::Timeout { peers, .. }) => {
                    debug!("[network] closest peers query timeout ({} found)", peers.len())
                }
            },
            _ => trace!("[network] kad event: {:?}", event),
        }
    }

    pub fn gossip_event_handler(&mut self, event: GossipsubEvent) {
        match event {
            GossipsubEvent::Message { message, .. } => {
                match self.bc_chan.send_sync(Message::Packed { buf: message.data }) {
                    Ok(res_chan) => {
                        // Direct response requested by the blockchain.
                        if let Ok(Message::Packed { buf }) = res_chan.recv_sync() {
                            self.broadcast(buf);
                        }
                    }
                    Err(_err) => warn!("[network] blockchain service seems down"),
                }
            }
            GossipsubEvent::Subscribed { peer_id, topic } => {
                debug!("[network] peer {} subscribed to {}", peer_id, topic);
                if self.gossip.all_peers().count() == 1 {
                    // First contact, ask around for the chain tip.
                    let msg = Message::GetBlockRequest {
                        height: u64::MAX,
                        txs: false,
                    };
                    let buf = rmp_serialize(&msg).unwrap_or_default();
                    self.broadcast(buf);
                }
            }
            GossipsubEvent::Unsubscribed { peer_id, topic } => {
                debug!("[network] peer {} unsubscribed from {}", peer_id, topic);
            }
            GossipsubEvent::GossipsubNotSupported { peer_id } => {
                self.forget_peer(&peer_id);
            }
        }
    }

    pub fn reqres_event_handler(
        &mut self,
        event: RequestResponseEvent<FetchRequest, FetchResponse>,
    ) {
        match event {
            RequestResponseEvent::Message { peer, message } => match message {
                RequestResponseMessage::Request {
                    request, channel, ..
                } => match self.bc_chan.send_sync(Message::Packed { buf: request.0 }) {
                    Ok(res_chan) => {
                        if let Ok(Message::Packed { buf }) = res_chan.recv_sync() {
                            if self
                                .reqres
                                .send_response(channel, FetchResponse(buf))
                                .is_err()
                            {
                                warn!("[network] fetch response to {} dropped", peer);
                            }
                        }
                    }
                    Err(_err) => warn!("[network] blockchain service seems down"),
                },
                RequestResponseMessage::Response { response, .. } => {
                    match self.bc_chan.send_sync(Message::Packed { buf: response.0 }) {
                        Ok(res_chan) => {
                            if let Ok(Message::Packed { buf }) = res_chan.recv_sync() {
                                self.broadcast(buf);
                            }
                        }
                        Err(_err) => warn!("[network] blockchain service seems down"),
                    }
                }
            },
            RequestResponseEvent::OutboundFailure { peer, error, .. } => {
                let fault = classify_outbound_failure(&error);
                warn!("[network] fetch from {} failed: {} ({:?})", peer, error, fault);
                if fault == NetworkFault::Unrecoverable {
                    self.forget_peer(&peer);
                }
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => {
                debug!("[network] inbound fetch from {} failed: {}", peer, error);
            }
            RequestResponseEvent::ResponseSent { .. } => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER_ID: &str = "12D3KooWFmmKJ7jXhTfoYDvKkPqe7s9pHH42iZdf2xRdM5ykma1p";

    #[test]
    fn parse_well_formed_peer_address() {
        let address = format!("{}@/ip4/127.0.0.1/tcp/30601", PEER_ID);

        let (peer, addr) = parse_peer_address(&address).unwrap();

        assert_eq!(peer.to_base58(), PEER_ID);
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/30601");
    }

    #[test]
    fn parse_peer_address_without_separator() {
        let err = parse_peer_address("/ip4/127.0.0.1/tcp/30601").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn parse_peer_address_bad_peer_id() {
        let err = parse_peer_address("garbage@/ip4/127.0.0.1/tcp/30601").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn outbound_failure_classification() {
        assert_eq!(
            classify_outbound_failure(&OutboundFailure::Timeout),
            NetworkFault::Rpc
        );
        assert_eq!(
            classify_outbound_failure(&OutboundFailure::DialFailure),
            NetworkFault::PeerUnstable
        );
        assert_eq!(
            classify_outbound_failure(&OutboundFailure::ConnectionClosed),
            NetworkFault::PeerUnstable
        );
        assert_eq!(
            classify_outbound_failure(&OutboundFailure::UnsupportedProtocols),
            NetworkFault::Unrecoverable
        );
    }
}
