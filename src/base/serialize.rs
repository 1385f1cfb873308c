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

use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Serialize using MessagePack format (without field names).
///
/// # Error
///
/// If the data cannot be serialized a `MalformedData` error kind is returned.
pub fn rmp_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    rmp_serde::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize using MessagePack format.
///
/// # Error
///
/// If the data cannot be deserialized a `MalformedData` error kind is returned.
pub fn rmp_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    rmp_serde::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Trait implemented by all types that can be serialized with MessagePack format.
pub trait MessagePack<'a>: Sized + Serialize + Deserialize<'a> {
    /// Serialize using MessagePack format.
    ///
    /// # Panics
    ///
    /// Panics if the concrete type cannot be serialized using message pack.
    fn serialize(&self) -> Vec<u8> {
        rmp_serialize(self).unwrap() // Safe for core structs.
    }

    /// Deserialize using MessagePack format.
    ///
    /// # Errors
    ///
    /// Propagates the message pack decoder error.
    fn deserialize(buf: &'a [u8]) -> Result<Self> {
        rmp_deserialize(buf)
    }
}

/// Blanket implementation for types implementing `Serialize` and `Deserialize`.
impl<'a, T: Serialize + Deserialize<'a>> MessagePack<'a> for T {}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
    struct SlotInfo<'a> {
        order: u32,
        owner: &'a str,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
    struct ChainAnchor<'a> {
        chain: &'a str,
        height: u64,
        #[serde(with = "serde_bytes")]
        root: &'a [u8],
        weights: Vec<u8>,
        peers: Vec<u16>,
        slots: BTreeMap<&'a str, SlotInfo<'a>>,
    }

    impl<'a> ChainAnchor<'a> {
        fn new() -> Self {
            let mut slots = BTreeMap::new();
            slots.insert(
                "m1",
                SlotInfo {
                    order: 123,
                    owner: "foo",
                },
            );
            slots.insert(
                "m2",
                SlotInfo {
                    order: 456,
                    owner: "bar",
                },
            );
            slots.insert(
                "m3",
                SlotInfo {
                    order: 789,
                    owner: "baz",
                },
            );
            Self {
                chain: "lattice",
                height: 42,
                root: &[0x01, 0xFF, 0x80],
                weights: vec![0x01, 0xFF, 0x80],
                peers: vec![0x01, 0xFF, 0x80],
                slots,
            }
        }
    }

    const ANCHOR_HEX: &str = "96a76c6174746963652ac40301ff809301ccffcc809301ccffcc8083a26d31927ba3666f6fa26d3292cd01c8a3626172a26d3392cd0315a362617a";

    #[test]
    fn chain_anchor_serialize() {
        let anchor = ChainAnchor::new();

        let buf = rmp_serialize(&anchor).unwrap();

        assert_eq!(hex::encode(&buf), ANCHOR_HEX);
    }

    #[test]
    fn chain_anchor_deserialize() {
        let exp = ChainAnchor::new();
        let buf = hex::decode(ANCHOR_HEX).unwrap();

        let anchor: ChainAnchor = rmp_deserialize(&buf).unwrap();

        assert_eq!(anchor, exp);
    }
}
