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

//! Network worker loop.
//!
//! Drives the libp2p swarm together with the two message sources it bridges:
//! requests from the rest of the node (peer management and shutdown) and the
//! packed events published by the blockchain service, which are propagated to
//! the network via gossip or peer to peer fetch.

use crate::{
    base::serialize::{rmp_deserialize, rmp_serialize},
    blockchain::{pubsub::Event, BlockRequestReceiver, BlockRequestSender, Message},
    crypto::KeyPair,
    network::{
        behaviour::{Behavior, ComposedEvent},
        service::NetworkConfig,
    },
    Error, ErrorKind,
};
use async_std::task::{self, Context, Poll};
use futures::{future, prelude::*};
use libp2p::{
    core::{muxing::StreamMuxerBox, transport::Boxed, upgrade},
    gossipsub::IdentTopic,
    identity,
    mplex::MplexConfig,
    plaintext::PlainText2Config,
    swarm::SwarmEvent,
    tcp::TcpConfig,
    Multiaddr, PeerId, Swarm, Transport,
};
use std::sync::Arc;

/// Transport layer construction.
fn build_transport(keypair: &identity::Keypair) -> Boxed<(PeerId, StreamMuxerBox)> {
    let transport = TcpConfig::new().nodelay(true);
    // TODO: use noise protocol for traffic encryption.
    let auth = PlainText2Config {
        local_public_key: keypair.public(),
    };
    transport
        .upgrade(upgrade::Version::V1)
        .authenticate(auth)
        .multiplex(MplexConfig::new())
        .boxed()
}

/// Network identity from the node keypair. Falls back to an ephemeral
/// identity when the node key is missing or not an ed25519 one.
fn identity_from_config(config: &NetworkConfig) -> identity::Keypair {
    match config.keypair.as_deref() {
        Some(KeyPair::Ed25519(keypair)) => {
            let mut bytes = keypair.to_bytes();
            match identity::ed25519::Keypair::decode(&mut bytes) {
                Ok(keypair) => identity::Keypair::Ed25519(keypair),
                Err(err) => {
                    warn!("[network] unusable node keypair ({}), using ephemeral identity", err);
                    identity::Keypair::generate_ed25519()
                }
            }
        }
        Some(_) => {
            warn!("[network] only ed25519 node keys are supported, using ephemeral identity");
            identity::Keypair::generate_ed25519()
        }
        None => {
            info!("[network] using ephemeral network identity");
            identity::Keypair::generate_ed25519()
        }
    }
}

/// Peer management requests served in place.
fn peer_request_handler(behaviour: &mut Behavior, req: Message) -> Message {
    match req {
        Message::AddPeerRequest { address } => match behaviour.add_peer(&address) {
            Ok(added) => Message::AddPeerResponse { added },
            Err(err) => Message::Exception(err),
        },
        Message::RemovePeerRequest { address } => match behaviour.remove_peer(&address) {
            Ok(removed) => Message::RemovePeerResponse { removed },
            Err(err) => Message::Exception(err),
        },
        Message::GetPeersRequest => Message::GetPeersResponse {
            peers: behaviour.peers(),
        },
        _ => Message::Exception(Error::new(ErrorKind::NotImplemented)),
    }
}

/// Propagation of a packed blockchain event.
fn propagate(behaviour: &mut Behavior, buf: Vec<u8>) {
    match rmp_deserialize::<Message>(&buf) {
        Ok(Message::GetBlockRequest { .. }) | Ok(Message::GetTransactionRequest { .. }) => {
            // Solicitations go to a single peer when one is available.
            if behaviour.has_peers() {
                behaviour.unicast(buf);
            } else {
                behaviour.broadcast(buf);
            }
        }
        Ok(Message::GetBlockResponse { .. }) | Ok(Message::GetTransactionResponse { .. }) => {
            behaviour.broadcast(buf);
        }
        Ok(msg) => warn!("[network] unexpected propagation payload: {:?}", msg),
        Err(err) => warn!("[network] malformed propagation payload: {}", err),
    }
}

pub(crate) async fn run_async(
    config: Arc<NetworkConfig>,
    mut rx_chan: BlockRequestReceiver,
    bc_chan: BlockRequestSender,
) {
    let keypair = identity_from_config(&config);
    let public_key = keypair.public();
    let peer_id = public_key.to_peer_id();
    info!("[network] peer id: {}", peer_id);

    // Blockchain events of network interest, delivered in packed form.
    let msg = Message::Subscribe {
        id: "network".to_owned(),
        events: Event::BLOCK | Event::TRANSACTION | Event::GOSSIP_REQUEST,
    };
    let req = match rmp_serialize(&msg) {
        Ok(buf) => Message::Packed { buf },
        Err(err) => {
            error!("[network] subscription serialization error: {}", err);
            return;
        }
    };
    let mut block_rx = match bc_chan.send(req).await {
        Ok(chan) => chan,
        Err(_err) => {
            error!("[network] blockchain service seems down");
            return;
        }
    };

    let topic = IdentTopic::new(&config.network);
    let behaviour = match Behavior::new(
        peer_id,
        public_key,
        topic,
        config.bootstrap_addr.clone(),
        bc_chan,
    ) {
        Ok(behaviour) => behaviour,
        Err(err) => {
            error!("[network] behaviour initialization error: {}", err);
            return;
        }
    };

    let transport = build_transport(&keypair);
    let mut swarm = Swarm::new(transport, behaviour, peer_id);

    let addr = format!("/ip4/{}/tcp/{}", config.addr, config.port);
    match addr.parse::<Multiaddr>() {
        Ok(addr) => {
            if let Err(err) = swarm.listen_on(addr) {
                error!("[network] listen error: {}", err);
                return;
            }
        }
        Err(err) => {
            error!("[network] bad listen address '{}': {}", addr, err);
            return;
        }
    }

    let mut listening = false;
    future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
        loop {
            match rx_chan.poll_next_unpin(cx) {
                Poll::Ready(Some((Message::Stop, _res_chan))) => {
                    info!("[network] worker is shutting down");
                    return Poll::Ready(());
                }
                Poll::Ready(Some((req, res_chan))) => {
                    let res = peer_request_handler(swarm.behaviour_mut(), req);
                    task::spawn(async move {
                        if res_chan.send(res).await.is_err() {
                            warn!("[network] response send error");
                        }
                    });
                }
                Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => break,
            }
        }
        loop {
            match block_rx.poll_next_unpin(cx) {
                Poll::Ready(Some(Message::Packed { buf })) => {
                    propagate(swarm.behaviour_mut(), buf);
                }
                Poll::Ready(Some(msg)) => {
                    warn!("[network] unexpected blockchain event: {:?}", msg);
                }
                Poll::Ready(None) => {
                    warn!("[network] blockchain events stream closed");
                    return Poll::Ready(());
                }
                Poll::Pending => break,
            }
        }
        loop {
            match swarm.poll_next_unpin(cx) {
                Poll::Ready(Some(event)) => match event {
                    SwarmEvent::Behaviour(ComposedEvent::Identify(event)) => {
                        swarm.behaviour_mut().identify_event_handler(event);
                    }
                    SwarmEvent::Behaviour(ComposedEvent::Gossip(event)) => {
                        swarm.behaviour_mut().gossip_event_handler(event);
                    }
                    SwarmEvent::Behaviour(ComposedEvent::Mdns(event)) => {
                        swarm.behaviour_mut().mdns_event_handler(event);
                    }
                    SwarmEvent::Behaviour(ComposedEvent::Kademlia(event)) => {
                        swarm.behaviour_mut().kad_event_handler(event);
                    }
                    SwarmEvent::Behaviour(ComposedEvent::ReqRes(event)) => {
                        swarm.behaviour_mut().reqres_event_handler(event);
                    }
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!("[network] listening on {}", address);
                    }
                    _ => trace!("[network] swarm event: {:?}", event),
                },
                Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => {
                    if !listening {
                        for addr in Swarm::listeners(&swarm) {
                            debug!("[network] listener address {}", addr);
                            listening = true;
                        }
                    }
                    break;
                }
            }
        }
        Poll::Pending
    })
    .await;
}

pub(crate) fn run(
    config: Arc<NetworkConfig>,
    rx_chan: BlockRequestReceiver,
    bc_chan: BlockRequestSender,
) {
    let fut = run_async(config, rx_chan, bc_chan);
    task::block_on(fut);
}
