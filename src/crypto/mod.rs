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

//! Cryptographic primitives: hashing and digital signatures.

pub mod ecdsa;
pub mod ed25519;
pub mod hash;
pub mod sign;

pub use hash::{Hash, HashAlgorithm, Hashable, PRIMARY_HASH_ALGORITHM};
pub use sign::{KeyPair, PublicKey};
