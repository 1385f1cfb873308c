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

//! Cross-chain exchange client, one per remote chain.
//!
//! Messages travel as length-prefixed MessagePack datagrams. A connection
//! starts with a challenge handshake proving the remote identity against the
//! certificate loaded from the local store.

use crate::{
    base::{
        schema::{ParentChainBlockData, SideChainBlockData},
        serialize::{rmp_deserialize, MessagePack},
    },
    blockchain::Message,
    crypto::PublicKey,
    error::NetworkFault,
    Error, ErrorKind, Result,
};
use async_std::net::TcpStream;
use futures::{AsyncReadExt, AsyncWriteExt};
use rand::Rng;
use std::path::PathBuf;

/// Handshake challenge length in bytes.
const CHALLENGE_SIZE: usize = 32;

fn net_unstable(err: std::io::Error) -> Error {
    Error::new_ext(ErrorKind::Network(NetworkFault::PeerUnstable), err)
}

/// Reads a length-prefixed datagram.
pub(crate) async fn read_datagram(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(net_unstable)?;
    let len = u32::from_be_bytes(head);

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await.map_err(net_unstable)?;
    Ok(buf)
}

/// Writes a length-prefixed datagram.
pub(crate) async fn write_datagram(stream: &mut TcpStream, buf: &[u8]) -> Result<()> {
    let head: [u8; 4] = (buf.len() as u32).to_be_bytes();
    stream.write_all(&head).await.map_err(net_unstable)?;
    stream.write_all(buf).await.map_err(net_unstable)?;
    Ok(())
}

/// First datagram exchanged on a new connection.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub(crate) struct HandshakeRequest {
    /// Caller chain identifier.
    pub chain: String,
    /// Challenge the callee signs with its service identity key.
    #[serde(with = "serde_bytes")]
    pub challenge: Vec<u8>,
}

/// Callee identity proof.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub(crate) struct HandshakeResponse {
    /// Callee chain identifier.
    pub chain: String,
    /// Signature over the challenge bytes.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Remote chain certificates store.
///
/// A certificate is the bs58 serialized public key of the remote chain
/// service identity, kept in a `<chain>.crt` file.
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        CertificateStore { dir: dir.into() }
    }

    /// Load the certificate of the given chain.
    pub fn load(&self, chain: &str) -> Result<PublicKey> {
        let path = self.dir.join(format!("{}.crt", chain));
        let content = std::fs::read_to_string(&path)
            .map_err(|err| Error::new_ext(ErrorKind::CertificateFault, err))?;
        let buf = bs58::decode(content.trim())
            .into_vec()
            .map_err(|err| Error::new_ext(ErrorKind::CertificateFault, err))?;
        PublicKey::deserialize(&buf)
            .map_err(|_err| Error::new_ext(ErrorKind::CertificateFault, "malformed certificate"))
    }
}

/// Client half of the cross-chain exchange.
pub(crate) struct ChainClient {
    /// Remote chain identifier.
    chain: String,
    /// Remote endpoint address.
    addr: String,
    /// Remote endpoint port.
    port: u16,
    /// Remote service identity, from the certificate store.
    certificate: PublicKey,
    /// Local chain identifier, sent within the handshake.
    local_chain: String,
}

impl ChainClient {
    pub fn new(
        chain: String,
        addr: String,
        port: u16,
        certificate: PublicKey,
        local_chain: String,
    ) -> Self {
        ChainClient {
            chain,
            addr,
            port,
            certificate,
            local_chain,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Connect to the remote endpoint and verify its identity.
    pub async fn connect(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect((self.addr.as_str(), self.port))
            .await
            .map_err(net_unstable)?;

        let challenge: [u8; CHALLENGE_SIZE] = rand::thread_rng().gen();
        let request = HandshakeRequest {
            chain: self.local_chain.clone(),
            challenge: challenge.to_vec(),
        };
        write_datagram(&mut stream, &request.serialize()).await?;

        let buf = read_datagram(&mut stream).await?;
        let response = HandshakeResponse::deserialize(&buf).map_err(|_err| {
            Error::new_ext(ErrorKind::CertificateFault, "malformed handshake response")
        })?;
        if response.chain != self.chain || !self.certificate.verify(&challenge, &response.signature)
        {
            return Err(Error::new_ext(
                ErrorKind::CertificateFault,
                "remote identity verification failed",
            ));
        }
        Ok(stream)
    }

    async fn send_recv(&self, stream: &mut TcpStream, request: Message) -> Result<Message> {
        write_datagram(stream, &request.serialize()).await?;
        let buf = read_datagram(stream).await?;
        rmp_deserialize(&buf)
    }

    /// Side chain digest at `height`. `ResourceNotFound` means the remote
    /// has not produced that block yet.
    pub async fn fetch_side_chain_data(
        &self,
        stream: &mut TcpStream,
        height: u64,
    ) -> Result<SideChainBlockData> {
        let request = Message::GetSideChainDataRequest {
            chain: self.chain.clone(),
            height,
        };
        match self.send_recv(stream, request).await? {
            Message::GetSideChainDataResponse { data } => Ok(data),
            Message::Exception(err) => Err(err),
            _ => Err(Error::new_ext(
                ErrorKind::Network(NetworkFault::Rpc),
                "unexpected cross-chain response",
            )),
        }
    }

    /// Parent chain digests batch starting at `height`, heights in order.
    /// An empty batch means the local indexing caught up with the remote.
    pub async fn fetch_parent_chain_data(
        &self,
        stream: &mut TcpStream,
        height: u64,
    ) -> Result<Vec<ParentChainBlockData>> {
        let request = Message::GetParentChainDataRequest {
            chain: self.chain.clone(),
            height,
        };
        match self.send_recv(stream, request).await? {
            Message::GetParentChainDataResponse { data } => Ok(data),
            Message::Exception(err) => Err(err),
            _ => Err(Error::new_ext(
                ErrorKind::Network(NetworkFault::Rpc),
                "unexpected cross-chain response",
            )),
        }
    }
}
