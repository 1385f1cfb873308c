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

//! Cross-chain worker loop.
//!
//! Owns the per-chain caches, the exchange clients and the local exchange
//! endpoint. Background poller tasks accumulate remote block data in the
//! caches; every `BLOCK` event published by the blockchain service consumes
//! one cached block per registered chain and re-publishes it to `CROSS_CHAIN`
//! subscribers. Data proposed by other nodes comes in through the request
//! channel and is accepted only when it matches the local cache content.

use crate::{
    base::{
        schema::{ParentChainBlockData, SideChainBlockData},
        serialize::{rmp_deserialize, MessagePack},
        sync::{ChainComponents, ReaderWriterLock},
        Mutex, RwLock,
    },
    blockchain::{message::*, pubsub::PubSub, Event},
    crosschain::{
        cache::ChainCache,
        client::{
            read_datagram, write_datagram, CertificateStore, ChainClient, HandshakeRequest,
            HandshakeResponse,
        },
        service::{CrossChainConfig, CrossChainEndpoint},
    },
    crypto::{Hashable, KeyPair},
    db::Db,
    Error, ErrorKind, Result,
};

use async_std::{
    net::{TcpListener, TcpStream},
    task::{self, Context, Poll},
};
use futures::{future, prelude::*};
use std::{collections::BTreeMap, collections::HashMap, sync::Arc, time::Duration};

/// Max number of parent chain blocks indexed (and served) per batch.
pub(crate) const PARENT_CHAIN_BATCH_MAX: usize = 32;

/// Number of local block heights the indexed side chain heights are kept for.
const INDEXED_RETENTION: u64 = 1024;

/// Side chain heights recorded at each local block height. Endpoint
/// connections read the map while the worker records new entries.
type IndexedHeights = Arc<ReaderWriterLock<BTreeMap<u64, BTreeMap<String, u64>>>>;

/// Builds the exchange digest of a local block, served to parent chains.
fn side_chain_data<D: Db>(
    db: &Arc<RwLock<D>>,
    chain: &str,
    height: u64,
) -> Option<SideChainBlockData> {
    let block = db.read().load_block(height)?;
    Some(SideChainBlockData {
        chain: chain.to_string(),
        height: block.data.height,
        block_hash: block.data.primary_hash(),
        txs_root: block.data.txs_hash,
    })
}

/// Builds the batch of local block digests served to side chains, starting at
/// the given height. The batch ends at the first missing block.
async fn parent_chain_data<D: Db>(
    db: &Arc<RwLock<D>>,
    indexed: &IndexedHeights,
    chain: &str,
    height: u64,
) -> Vec<ParentChainBlockData> {
    indexed
        .read(|indexed| {
            let db = db.read();
            let mut batch = Vec::new();
            for height in height..height.saturating_add(PARENT_CHAIN_BATCH_MAX as u64) {
                let block = match db.load_block(height) {
                    Some(block) => block,
                    None => break,
                };
                batch.push(ParentChainBlockData {
                    chain: chain.to_string(),
                    height,
                    txs_root: block.data.txs_hash,
                    side_chain_heights: indexed.get(&height).cloned().unwrap_or_default(),
                });
            }
            batch
        })
        .await
}

async fn remote_side_chain_data(client: &ChainClient, height: u64) -> Result<SideChainBlockData> {
    let mut stream = client.connect().await?;
    client.fetch_side_chain_data(&mut stream, height).await
}

async fn remote_parent_chain_data(
    client: &ChainClient,
    height: u64,
) -> Result<Vec<ParentChainBlockData>> {
    let mut stream = client.connect().await?;
    client.fetch_parent_chain_data(&mut stream, height).await
}

/// Serves one exchange connection opened by a remote chain node.
///
/// The server side of the handshake proves the local identity by signing the
/// received challenge. Afterwards the connection carries block data requests
/// until the remote hangs up.
async fn connection_handler<D: Db>(
    mut stream: TcpStream,
    chain: String,
    keypair: Arc<KeyPair>,
    db: Arc<RwLock<D>>,
    indexed: IndexedHeights,
) -> Result<()> {
    let buf = read_datagram(&mut stream).await?;
    let request = HandshakeRequest::deserialize(&buf)?;
    debug!("[crosschain] connection from chain '{}'", request.chain);

    let signature = keypair
        .sign(&request.challenge)
        .map_err(|err| Error::new_ext(ErrorKind::PrivateKeyFault, err))?;
    let response = HandshakeResponse {
        chain: chain.clone(),
        signature,
    };
    write_datagram(&mut stream, &response.serialize()).await?;

    loop {
        let buf = read_datagram(&mut stream).await?;
        let res = match rmp_deserialize::<Message>(&buf) {
            Ok(Message::GetSideChainDataRequest {
                chain: requested,
                height,
            }) if requested == chain => match side_chain_data(&db, &chain, height) {
                Some(data) => Message::GetSideChainDataResponse { data },
                None => Message::Exception(Error::new_ext(
                    ErrorKind::ResourceNotFound,
                    "block not found",
                )),
            },
            Ok(Message::GetParentChainDataRequest {
                chain: requested,
                height,
            }) if requested == chain => Message::GetParentChainDataResponse {
                data: parent_chain_data(&db, &indexed, &chain, height).await,
            },
            Ok(Message::GetSideChainDataRequest { .. })
            | Ok(Message::GetParentChainDataRequest { .. }) => Message::Exception(
                Error::new_ext(ErrorKind::ResourceNotFound, "unknown chain"),
            ),
            Ok(_) => Message::Exception(Error::new(ErrorKind::NotImplemented)),
            Err(err) => Message::Exception(err),
        };
        write_datagram(&mut stream, &res.serialize()).await?;
    }
}

enum Wake {
    Request(Message, BlockResponseSender),
    Block,
    BlocksClosed,
    Stop,
}

/// Waits for the next worker wake condition: an incoming request or a block
/// commit notification.
async fn wait_wake(
    requests: &mut BlockRequestReceiver,
    blocks: &mut Option<BlockResponseReceiver>,
) -> Wake {
    future::poll_fn(move |cx: &mut Context<'_>| {
        match requests.poll_next_unpin(cx) {
            Poll::Ready(Some((Message::Stop, _))) | Poll::Ready(None) => {
                return Poll::Ready(Wake::Stop)
            }
            Poll::Ready(Some((req, res_chan))) => {
                return Poll::Ready(Wake::Request(req, res_chan))
            }
            Poll::Pending => (),
        }
        if let Some(stream) = blocks.as_mut() {
            match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(_block)) => return Poll::Ready(Wake::Block),
                Poll::Ready(None) => return Poll::Ready(Wake::BlocksClosed),
                Poll::Pending => (),
            }
        }
        Poll::Pending
    })
    .await
}

pub struct CrossChainWorker<D: Db> {
    /// Local chain identifier.
    chain: String,
    /// Remote chains certificates store.
    store: CertificateStore,
    /// Keypair proving the local identity during handshakes.
    keypair: Arc<KeyPair>,
    /// Exchange endpoint binding address.
    addr: String,
    /// Exchange endpoint binding port.
    port: u16,
    /// Client polling period while the remote has fresh data (ms).
    poll_interval: u64,
    /// Client polling period once the caches caught up with the remote (ms).
    idle_interval: u64,
    /// Registered side chain endpoints.
    side_endpoints: Vec<CrossChainEndpoint>,
    /// Parent chain endpoint, when this node runs a side chain.
    parent_endpoint: Option<CrossChainEndpoint>,
    /// Exchange clients, one per remote chain.
    clients: Arc<ChainComponents<ChainClient>>,
    /// Not-yet-indexed side chain block data, one cache per side chain.
    side_caches: Arc<ChainComponents<Mutex<ChainCache<SideChainBlockData>>>>,
    /// Not-yet-indexed parent chain block data.
    parent_cache: Option<Arc<Mutex<ChainCache<ParentChainBlockData>>>>,
    /// Side chain heights recorded at each local block height.
    indexed: IndexedHeights,
    /// Database shared reference.
    db: Arc<RwLock<D>>,
    /// Cross-chain events publish subscribe context.
    pubsub: Arc<Mutex<PubSub>>,
    /// Worker input requests channel.
    rx_chan: BlockRequestReceiver,
    /// Blockchain service request channel, used to follow block commits.
    bc_chan: BlockRequestSender,
}

impl<D: Db> CrossChainWorker<D> {
    pub fn new(
        config: CrossChainConfig,
        db: Arc<RwLock<D>>,
        rx_chan: BlockRequestReceiver,
        bc_chan: BlockRequestSender,
    ) -> Self {
        let side_caches = Arc::new(ChainComponents::new());
        for endpoint in &config.side_chains {
            side_caches.get_or_create(&endpoint.chain, || {
                Mutex::new(ChainCache::new(endpoint.chain.clone(), endpoint.start_height))
            });
        }
        let parent_cache = config.parent.as_ref().map(|endpoint| {
            Arc::new(Mutex::new(ChainCache::new(
                endpoint.chain.clone(),
                endpoint.start_height,
            )))
        });

        CrossChainWorker {
            chain: config.chain,
            store: CertificateStore::new(config.certs_dir),
            keypair: config.keypair,
            addr: config.addr,
            port: config.port,
            poll_interval: config.poll_interval,
            idle_interval: config.idle_interval,
            side_endpoints: config.side_chains,
            parent_endpoint: config.parent,
            clients: Arc::new(ChainComponents::new()),
            side_caches,
            parent_cache,
            indexed: Arc::new(ReaderWriterLock::new(BTreeMap::new())),
            db,
            pubsub: Arc::new(Mutex::new(PubSub::new())),
            rx_chan,
            bc_chan,
        }
    }

    /// Spawns the exchange endpoint serving block data to remote chain nodes.
    fn start_endpoint(&self) {
        let addr = self.addr.clone();
        let port = self.port;
        let chain = self.chain.clone();
        let keypair = self.keypair.clone();
        let db = self.db.clone();
        let indexed = self.indexed.clone();

        task::spawn(async move {
            let listener = match TcpListener::bind((addr.as_str(), port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!("[crosschain] endpoint bind error: {}", err);
                    return;
                }
            };
            info!("[crosschain] endpoint listening on {}:{}", addr, port);
            listener
                .incoming()
                .for_each_concurrent(None, |stream| {
                    let chain = chain.clone();
                    let keypair = keypair.clone();
                    let db = db.clone();
                    let indexed = indexed.clone();
                    async move {
                        if let Ok(stream) = stream {
                            debug!("[crosschain] new endpoint connection");
                            let _ = connection_handler(stream, chain, keypair, db, indexed).await;
                            debug!("[crosschain] dropping endpoint connection");
                        }
                    }
                })
                .await;
        });
    }

    /// Spawns one poller task per registered remote chain.
    ///
    /// A chain without a certificate in the local store is skipped, its cache
    /// then only grows through data proposed by other nodes.
    fn start_clients(&self) {
        for endpoint in &self.side_endpoints {
            self.start_side_client(endpoint);
        }
        if let Some(endpoint) = &self.parent_endpoint {
            self.start_parent_client(endpoint);
        }
    }

    fn create_client(&self, endpoint: &CrossChainEndpoint) -> Option<Arc<ChainClient>> {
        let certificate = match self.store.load(&endpoint.chain) {
            Ok(certificate) => certificate,
            Err(err) => {
                error!(
                    "[crosschain] no certificate for chain '{}': {}",
                    endpoint.chain, err
                );
                return None;
            }
        };
        let client = self.clients.get_or_create(&endpoint.chain, || {
            ChainClient::new(
                endpoint.chain.clone(),
                endpoint.addr.clone(),
                endpoint.port,
                certificate,
                self.chain.clone(),
            )
        });
        Some(client)
    }

    fn start_side_client(&self, endpoint: &CrossChainEndpoint) {
        let client = match self.create_client(endpoint) {
            Some(client) => client,
            None => return,
        };
        let cache = match self.side_caches.get(&endpoint.chain) {
            Some(cache) => cache,
            None => return,
        };
        let poll_interval = self.poll_interval;
        let idle_interval = self.idle_interval;

        task::spawn(async move {
            loop {
                let mut stream = match client.connect().await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(
                            "[crosschain] side chain '{}' unreachable: {}",
                            client.chain(),
                            err
                        );
                        task::sleep(Duration::from_millis(idle_interval)).await;
                        continue;
                    }
                };
                loop {
                    let target = cache.lock().target_height();
                    match client.fetch_side_chain_data(&mut stream, target).await {
                        Ok(data) => {
                            if !cache.lock().push(data) {
                                warn!(
                                    "[crosschain] side chain '{}' data out of sequence",
                                    client.chain()
                                );
                            }
                            task::sleep(Duration::from_millis(poll_interval)).await;
                        }
                        // Caught up with the remote chain tip.
                        Err(err) if err.kind == ErrorKind::ResourceNotFound => {
                            task::sleep(Duration::from_millis(idle_interval)).await;
                        }
                        Err(err) => {
                            warn!(
                                "[crosschain] side chain '{}' request error: {}",
                                client.chain(),
                                err
                            );
                            break;
                        }
                    }
                }
            }
        });
    }

    fn start_parent_client(&self, endpoint: &CrossChainEndpoint) {
        let client = match self.create_client(endpoint) {
            Some(client) => client,
            None => return,
        };
        let cache = match &self.parent_cache {
            Some(cache) => cache.clone(),
            None => return,
        };
        let poll_interval = self.poll_interval;
        let idle_interval = self.idle_interval;

        task::spawn(async move {
            loop {
                let mut stream = match client.connect().await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(
                            "[crosschain] parent chain '{}' unreachable: {}",
                            client.chain(),
                            err
                        );
                        task::sleep(Duration::from_millis(idle_interval)).await;
                        continue;
                    }
                };
                loop {
                    let target = cache.lock().target_height();
                    match client.fetch_parent_chain_data(&mut stream, target).await {
                        // Caught up with the remote chain tip.
                        Ok(batch) if batch.is_empty() => {
                            task::sleep(Duration::from_millis(idle_interval)).await;
                        }
                        Ok(batch) => {
                            {
                                let mut cache = cache.lock();
                                for data in batch {
                                    if !cache.push(data) {
                                        warn!(
                                            "[crosschain] parent chain '{}' data out of sequence",
                                            client.chain()
                                        );
                                        break;
                                    }
                                }
                            }
                            task::sleep(Duration::from_millis(poll_interval)).await;
                        }
                        Err(err) => {
                            warn!(
                                "[crosschain] parent chain '{}' request error: {}",
                                client.chain(),
                                err
                            );
                            break;
                        }
                    }
                }
            }
        });
    }

    fn client(&self, chain: &str) -> Result<Arc<ChainClient>> {
        self.clients
            .get(chain)
            .ok_or_else(|| Error::new(ErrorKind::ClientNotFound))
    }

    /// Publishes a message to the `CROSS_CHAIN` subscribers.
    fn publish(&self, msg: Message) {
        let mut pubsub = self.pubsub.lock();
        if pubsub.has_subscribers(Event::CROSS_CHAIN) {
            pubsub.publish(Event::CROSS_CHAIN, msg);
        }
    }

    /// Records the side chain heights indexed so far, keyed by the local
    /// best block height. Served to side chains within parent chain data.
    async fn record_indexed(&self) {
        let best_height = self
            .db
            .read()
            .load_chain_info()
            .map(|info| info.best_height)
            .unwrap_or_default();

        let mut heights = BTreeMap::new();
        for chain in self.side_caches.chains() {
            if let Some(cache) = self.side_caches.get(&chain) {
                let recorded = cache.lock().recorded();
                if recorded > 0 {
                    heights.insert(chain, recorded);
                }
            }
        }
        if heights.is_empty() {
            return;
        }

        self.indexed
            .write(|indexed| {
                indexed.insert(best_height, heights);
                let cutoff = best_height.saturating_sub(INDEXED_RETENTION);
                indexed.retain(|height, _| *height > cutoff);
            })
            .await;
    }

    /// Checks side chain block data against the local caches.
    ///
    /// Every entry must sit at its chain's next expected height and match the
    /// cached content. Data for an unregistered chain is rejected.
    pub fn validate_side_chain_data(&self, data: &[SideChainBlockData]) -> bool {
        let mut expected: HashMap<&str, u64> = HashMap::new();
        for entry in data {
            let cache = match self.side_caches.get(&entry.chain) {
                Some(cache) => cache,
                None => return false,
            };
            let cache = cache.lock();
            let height = expected
                .entry(entry.chain.as_str())
                .or_insert_with(|| cache.recorded() + 1);
            if entry.height != *height {
                return false;
            }
            match cache.peek(entry.height) {
                Some(cached) if cached == entry => {}
                _ => return false,
            }
            *height += 1;
        }
        true
    }

    /// Checks parent chain block data against the local cache.
    ///
    /// The batch must be a contiguous run starting at the next expected
    /// height, matching the cached content entry by entry. An empty batch is
    /// valid, a batch over the indexing bound is not.
    pub fn validate_parent_chain_data(&self, data: &[ParentChainBlockData]) -> bool {
        if data.is_empty() {
            return true;
        }
        if data.len() > PARENT_CHAIN_BATCH_MAX {
            return false;
        }
        let cache = match &self.parent_cache {
            Some(cache) => cache,
            None => return false,
        };
        let cache = cache.lock();
        let mut expected = cache.recorded() + 1;
        for entry in data {
            if entry.height != expected {
                return false;
            }
            match cache.peek(entry.height) {
                Some(cached) if cached == entry => {}
                _ => return false,
            }
            expected += 1;
        }
        true
    }

    /// Side chain data indexed by another node. Accepted, consumed from the
    /// local cache and re-published only when the validation passes, so that
    /// the recorded heights converge across nodes.
    async fn handle_side_chain_proposal(&self, data: SideChainBlockData) {
        if !self.validate_side_chain_data(std::slice::from_ref(&data)) {
            warn!(
                "[crosschain] rejected side chain '{}' data at height {}",
                data.chain, data.height
            );
            return;
        }
        let cache = match self.side_caches.get(&data.chain) {
            Some(cache) => cache,
            None => return,
        };
        let taken = cache.lock().take(data.height, false);
        if let Some(data) = taken {
            self.record_indexed().await;
            self.publish(Message::GetSideChainDataResponse { data });
        }
    }

    fn handle_parent_chain_proposal(&self, data: Vec<ParentChainBlockData>) {
        if data.is_empty() {
            return;
        }
        if !self.validate_parent_chain_data(&data) {
            warn!(
                "[crosschain] rejected parent chain data batch at height {}",
                data[0].height
            );
            return;
        }
        let cache = match &self.parent_cache {
            Some(cache) => cache,
            None => return,
        };
        {
            let mut cache = cache.lock();
            for entry in &data {
                cache.take(entry.height, false);
            }
        }
        self.publish(Message::GetParentChainDataResponse { data });
    }

    /// Consumes cached foreign block data following a local block commit.
    ///
    /// At most one block per side chain and one bounded batch from the parent
    /// chain are indexed per step. Depth-limited takes keep the indexing a few
    /// blocks behind the remote tips.
    async fn indexing_step(&self) {
        let mut advanced = false;
        for chain in self.side_caches.chains() {
            let cache = match self.side_caches.get(&chain) {
                Some(cache) => cache,
                None => continue,
            };
            let taken = {
                let mut cache = cache.lock();
                let target = cache.recorded() + 1;
                cache.take(target, true)
            };
            if let Some(data) = taken {
                debug!(
                    "[crosschain] indexed side chain '{}' block {}",
                    data.chain, data.height
                );
                self.publish(Message::GetSideChainDataResponse { data });
                advanced = true;
            }
        }
        if advanced {
            self.record_indexed().await;
        }

        if let Some(cache) = &self.parent_cache {
            let mut batch = Vec::new();
            {
                let mut cache = cache.lock();
                while batch.len() < PARENT_CHAIN_BATCH_MAX {
                    let target = cache.recorded() + 1;
                    match cache.take(target, true) {
                        Some(data) => batch.push(data),
                        None => break,
                    }
                }
            }
            if !batch.is_empty() {
                debug!("[crosschain] indexed {} parent chain blocks", batch.len());
                self.publish(Message::GetParentChainDataResponse { data: batch });
            }
        }
    }

    /// Forwards a side chain data request to the remote chain client.
    fn proxy_side_chain_request(&self, chain: String, height: u64, res_chan: BlockResponseSender) {
        let client = self.client(&chain);
        task::spawn(async move {
            let res = match client {
                Ok(client) => match remote_side_chain_data(&client, height).await {
                    Ok(data) => Message::GetSideChainDataResponse { data },
                    Err(err) => Message::Exception(err),
                },
                Err(err) => {
                    warn!("[crosschain] no client registered for chain '{}'", chain);
                    Message::Exception(err)
                }
            };
            if res_chan.send(res).await.is_err() {
                warn!("[crosschain] response send error");
            }
        });
    }

    fn proxy_parent_chain_request(
        &self,
        chain: String,
        height: u64,
        res_chan: BlockResponseSender,
    ) {
        let client = self.client(&chain);
        task::spawn(async move {
            let res = match client {
                Ok(client) => match remote_parent_chain_data(&client, height).await {
                    Ok(data) => Message::GetParentChainDataResponse { data },
                    Err(err) => Message::Exception(err),
                },
                Err(err) => {
                    warn!("[crosschain] no client registered for chain '{}'", chain);
                    Message::Exception(err)
                }
            };
            if res_chan.send(res).await.is_err() {
                warn!("[crosschain] response send error");
            }
        });
    }

    fn send_response(res: Message, res_chan: BlockResponseSender) {
        task::spawn(async move {
            if res_chan.send(res).await.is_err() {
                warn!("[crosschain] response send error");
            }
        });
    }

    async fn handle_message(&self, req: Message, res_chan: BlockResponseSender) {
        match req {
            Message::Subscribe { id, events } => {
                self.pubsub.lock().subscribe(id, events, 0, res_chan);
            }
            Message::Unsubscribe { id, events } => {
                self.pubsub.lock().unsubscribe(id, events);
            }
            Message::GetSideChainDataRequest { chain, height } if chain == self.chain => {
                let res = match side_chain_data(&self.db, &self.chain, height) {
                    Some(data) => Message::GetSideChainDataResponse { data },
                    None => Message::Exception(Error::new_ext(
                        ErrorKind::ResourceNotFound,
                        "block not found",
                    )),
                };
                Self::send_response(res, res_chan);
            }
            Message::GetSideChainDataRequest { chain, height } => {
                self.proxy_side_chain_request(chain, height, res_chan);
            }
            Message::GetParentChainDataRequest { chain, height } if chain == self.chain => {
                let data = parent_chain_data(&self.db, &self.indexed, &self.chain, height).await;
                Self::send_response(Message::GetParentChainDataResponse { data }, res_chan);
            }
            Message::GetParentChainDataRequest { chain, height } => {
                self.proxy_parent_chain_request(chain, height, res_chan);
            }
            Message::GetSideChainDataResponse { data } => {
                self.handle_side_chain_proposal(data).await
            }
            Message::GetParentChainDataResponse { data } => self.handle_parent_chain_proposal(data),
            _ => {
                debug!("[crosschain] unhandled message: {:?}", req);
            }
        }
    }

    /// Cross-chain worker asynchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub async fn run(&mut self) {
        self.start_endpoint();
        self.start_clients();

        let request = Message::Subscribe {
            id: "crosschain".to_owned(),
            events: Event::BLOCK,
        };
        let mut blocks: Option<BlockResponseReceiver> = match self.bc_chan.send(request).await {
            Ok(receiver) => Some(receiver),
            Err(_err) => {
                warn!("[crosschain] blockchain service seems down, indexing disabled");
                None
            }
        };

        loop {
            match wait_wake(&mut self.rx_chan, &mut blocks).await {
                Wake::Request(req, res_chan) => self.handle_message(req, res_chan).await,
                Wake::Block => self.indexing_step().await,
                Wake::BlocksClosed => {
                    warn!("[crosschain] blockchain events stream closed, indexing disabled");
                    blocks = None;
                }
                Wake::Stop => break,
            }
        }
    }

    /// Cross-chain worker synchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }
}
