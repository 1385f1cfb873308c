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

//! Library error codes and results.

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Project-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Max string length when the error is converted to string using `to_string_full`.
const MAX_ERROR_SOURCE_STRING_LENGTH: usize = 128;

/// Recoverability class of a network error.
///
/// Drives the peer bookkeeping reaction: `Rpc` failures are retried on the
/// same peer, `PeerUnstable` failures lower the peer score and `Unrecoverable`
/// ones trigger the peer removal.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum NetworkFault {
    /// Transient call failure, the peer is still considered healthy.
    Rpc,
    /// Repeated failures, the peer connection is degraded.
    PeerUnstable,
    /// The peer is gone or misbehaving and must be dropped.
    Unrecoverable,
}

/// Error kind to better contextualize the returned error.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ErrorKind {
    MalformedData,
    InvalidSignature,
    DuplicatedUnconfirmedTx,
    DuplicatedConfirmedTx,
    DatabaseFault,
    SmartContractFault,
    ResourceNotFound,
    RefBlockExpired,
    RefBlockInvalid,
    FutureRefBlock,
    UnlinkableBlock,
    ClientNotFound,
    CertificateFault,
    PrivateKeyFault,
    ServerConfigurationFault,
    Network(NetworkFault),
    NotImplemented,
    Other,
}

/// Error kind strings.
pub(super) mod error_kind_str {
    pub const MALFORMED_DATA: &str = "malformed data";
    pub const INVALID_SIGNATURE: &str = "invalid signature";
    pub const DUPLICATED_UNCONFIRMED_TX: &str = "duplicated unconfirmed transaction";
    pub const DUPLICATED_CONFIRMED_TX: &str = "duplicated confirmed transaction";
    pub const RESOURCE_NOT_FOUND: &str = "resource not found";
    pub const DATABASE_FAULT: &str = "database fault";
    pub const SMART_CONTRACT_FAULT: &str = "smart contract fault";
    pub const REF_BLOCK_EXPIRED: &str = "expired reference block";
    pub const REF_BLOCK_INVALID: &str = "invalid reference block";
    pub const FUTURE_REF_BLOCK: &str = "future reference block";
    pub const UNLINKABLE_BLOCK: &str = "unlinkable block";
    pub const CLIENT_NOT_FOUND: &str = "cross-chain client not found";
    pub const CERTIFICATE_FAULT: &str = "certificate fault";
    pub const PRIVATE_KEY_FAULT: &str = "private key fault";
    pub const SERVER_CONFIGURATION_FAULT: &str = "server configuration fault";
    pub const NETWORK_RPC: &str = "network fault (rpc)";
    pub const NETWORK_PEER_UNSTABLE: &str = "network fault (peer unstable)";
    pub const NETWORK_UNRECOVERABLE: &str = "network fault (unrecoverable)";
    pub const NOT_IMPLEMENTED: &str = "not implemented";
    pub const OTHER: &str = "other";
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        let kind_str = match self {
            MalformedData => error_kind_str::MALFORMED_DATA,
            InvalidSignature => error_kind_str::INVALID_SIGNATURE,
            DuplicatedUnconfirmedTx => error_kind_str::DUPLICATED_UNCONFIRMED_TX,
            DuplicatedConfirmedTx => error_kind_str::DUPLICATED_CONFIRMED_TX,
            ResourceNotFound => error_kind_str::RESOURCE_NOT_FOUND,
            DatabaseFault => error_kind_str::DATABASE_FAULT,
            SmartContractFault => error_kind_str::SMART_CONTRACT_FAULT,
            RefBlockExpired => error_kind_str::REF_BLOCK_EXPIRED,
            RefBlockInvalid => error_kind_str::REF_BLOCK_INVALID,
            FutureRefBlock => error_kind_str::FUTURE_REF_BLOCK,
            UnlinkableBlock => error_kind_str::UNLINKABLE_BLOCK,
            ClientNotFound => error_kind_str::CLIENT_NOT_FOUND,
            CertificateFault => error_kind_str::CERTIFICATE_FAULT,
            PrivateKeyFault => error_kind_str::PRIVATE_KEY_FAULT,
            ServerConfigurationFault => error_kind_str::SERVER_CONFIGURATION_FAULT,
            Network(NetworkFault::Rpc) => error_kind_str::NETWORK_RPC,
            Network(NetworkFault::PeerUnstable) => error_kind_str::NETWORK_PEER_UNSTABLE,
            Network(NetworkFault::Unrecoverable) => error_kind_str::NETWORK_UNRECOVERABLE,
            NotImplemented => error_kind_str::NOT_IMPLEMENTED,
            Other => error_kind_str::OTHER,
        };
        write!(f, "{}", kind_str)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let msg = self.to_string();
        serializer.serialize_str(&msg)
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ErrorKindVisitor;

        impl<'de> Visitor<'de> for ErrorKindVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
                Ok(value.to_string())
            }
        }

        let kind = match deserializer.deserialize_str(ErrorKindVisitor)?.as_str() {
            error_kind_str::MALFORMED_DATA => ErrorKind::MalformedData,
            error_kind_str::INVALID_SIGNATURE => ErrorKind::InvalidSignature,
            error_kind_str::DUPLICATED_UNCONFIRMED_TX => ErrorKind::DuplicatedUnconfirmedTx,
            error_kind_str::DUPLICATED_CONFIRMED_TX => ErrorKind::DuplicatedConfirmedTx,
            error_kind_str::RESOURCE_NOT_FOUND => ErrorKind::ResourceNotFound,
            error_kind_str::DATABASE_FAULT => ErrorKind::DatabaseFault,
            error_kind_str::SMART_CONTRACT_FAULT => ErrorKind::SmartContractFault,
            error_kind_str::REF_BLOCK_EXPIRED => ErrorKind::RefBlockExpired,
            error_kind_str::REF_BLOCK_INVALID => ErrorKind::RefBlockInvalid,
            error_kind_str::FUTURE_REF_BLOCK => ErrorKind::FutureRefBlock,
            error_kind_str::UNLINKABLE_BLOCK => ErrorKind::UnlinkableBlock,
            error_kind_str::CLIENT_NOT_FOUND => ErrorKind::ClientNotFound,
            error_kind_str::CERTIFICATE_FAULT => ErrorKind::CertificateFault,
            error_kind_str::PRIVATE_KEY_FAULT => ErrorKind::PrivateKeyFault,
            error_kind_str::SERVER_CONFIGURATION_FAULT => ErrorKind::ServerConfigurationFault,
            error_kind_str::NETWORK_RPC => ErrorKind::Network(NetworkFault::Rpc),
            error_kind_str::NETWORK_PEER_UNSTABLE => ErrorKind::Network(NetworkFault::PeerUnstable),
            error_kind_str::NETWORK_UNRECOVERABLE => ErrorKind::Network(NetworkFault::Unrecoverable),
            error_kind_str::NOT_IMPLEMENTED => ErrorKind::NotImplemented,
            _ => ErrorKind::Other,
        };
        Ok(kind)
    }
}

/// Project-wide error type.
/// Contains a kind enumerate and a `source` to identify the subsystem that may
/// have propageted the error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Not propagated by blockchain messages.
    #[serde(serialize_with = "source_se", deserialize_with = "source_de")]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn source_se<S: Serializer>(
    source: &Option<Box<dyn std::error::Error + Send + Sync>>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match source {
        Some(b) => s.serialize_str(&b.to_string()),
        None => s.serialize_unit(),
    }
}

fn source_de<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Box<dyn std::error::Error + Send + Sync>>, D::Error> {
    struct ErrorVisitor;

    impl<'de> Visitor<'de> for ErrorVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string")
        }

        fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
            Ok(value.to_string())
        }
    }

    match d.deserialize_str(ErrorVisitor) {
        Ok(s) => Ok(Some(s.into())),
        Err(_err) => Ok(None),
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Error {
            kind: self.kind,
            source: None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::new_ext(ErrorKind::Other, s)
    }
}

impl<T> From<ErrorKind> for Result<T> {
    fn from(kind: ErrorKind) -> Self {
        Err(kind.into())
    }
}

impl Error {
    pub fn new_ext<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = error.into();
        Error {
            kind,
            source: Some(source),
        }
    }

    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub fn to_string_full(&self) -> String {
        let mut err_string = self.to_string();
        if let Some(ref source) = self.source {
            let detail = format!(": {}", source.to_string());
            let max_len = std::cmp::min(detail.len(), MAX_ERROR_SOURCE_STRING_LENGTH);
            err_string.push_str(&detail[..max_len]);
        }
        err_string
    }

    /// Network fault severity, `None` for non-network errors.
    pub fn network_fault(&self) -> Option<NetworkFault> {
        match self.kind {
            ErrorKind::Network(fault) => Some(fault),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.source.is_none() && other.source.is_none() {
            true
        } else if self.source.is_some() && other.source.is_some() {
            format!("{:?}", self.source) == format!("{:?}", other.source)
        } else {
            false
        }
    }
}

impl std::error::Error for Error {
    #[allow(clippy::all)]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        // Code suggested by clippy doesn't compile... further investigation required
        // self.source.as_ref().map(|source| source.as_ref())
        match self.source {
            None => None,
            Some(ref source) => Some(source.as_ref()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &format!("{}", self.kind))
    }
}
