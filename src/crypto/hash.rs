// dkim-signer – signing of email messages with DKIM signatures
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use crate::crypto::HashAlgorithm;
use digest::Digest;
#[cfg(feature = "pre-rfc8301")]
use sha1::Sha1;
use sha2::Sha256;

/// An incremental hasher for one of the supported hash algorithms.
#[derive(Clone)]
pub enum Hasher {
    #[cfg(feature = "pre-rfc8301")]
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(hash_alg: HashAlgorithm) -> Self {
        match hash_alg {
            #[cfg(feature = "pre-rfc8301")]
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            #[cfg(feature = "pre-rfc8301")]
            Self::Sha1(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
        }
    }

    pub fn finish(self) -> Box<[u8]> {
        match self {
            #[cfg(feature = "pre-rfc8301")]
            Self::Sha1(h) => Box::from(&h.finalize()[..]),
            Self::Sha256(h) => Box::from(&h.finalize()[..]),
        }
    }
}

/// Computes the message digest of the given bytes.
pub fn digest(hash_alg: HashAlgorithm, bytes: &[u8]) -> Box<[u8]> {
    let mut hasher = Hasher::new(hash_alg);
    hasher.update(bytes);
    hasher.finish()
}
