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

//! Cryptographic utilities.
//!
//! # Private key formats
//!
//! Signing keys are read from PEM-encoded documents. Two encodings are
//! recognised:
//!
//! * `PRIVATE KEY`: a PKCS#8 *PrivateKeyInfo* structure holding either an RSA
//!   or an Ed25519 private key. This is what `openssl genpkey` produces.
//! * `RSA PRIVATE KEY`: a PKCS#1 *RSAPrivateKey* structure. This is the
//!   traditional format produced by `openssl genrsa` and still the one most
//!   often found in DKIM signer configurations.
//!
//! RSA keys smaller than 1024 bits are rejected, see RFC 8301, section 3.2.
//! With feature `pre-rfc8301` the minimum is lowered to 512 bits.
//!
//! Decoded key material lives in zeroizing buffers and key types, so that it
//! is cleared from memory once a `SigningKey` is dropped.

mod ed25519;
mod hash;
mod rsa;

pub use self::{
    ed25519::sign_ed25519,
    hash::{digest, Hasher},
    rsa::{get_key_size, sign_rsa},
};

use crate::util::CanonicalStr;
use ::rsa::{pkcs1::DecodeRsaPrivateKey, RsaPrivateKey};
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use pkcs8::{der::SecretDocument, PrivateKeyInfo};
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    str,
};
use tracing::trace;

#[cfg(not(feature = "pre-rfc8301"))]
pub const MIN_RSA_KEY_BITS: usize = 1024;
#[cfg(feature = "pre-rfc8301")]
pub const MIN_RSA_KEY_BITS: usize = 512;

const PKCS8_LABEL: &str = "PRIVATE KEY";
const PKCS1_LABEL: &str = "RSA PRIVATE KEY";

/// A private key used to produce signatures.
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519SigningKey),
}

impl SigningKey {
    /// Reads a signing key from PEM-encoded key material.
    pub fn from_pem(input: impl AsRef<[u8]>) -> Result<Self, KeyError> {
        let s = str::from_utf8(input.as_ref()).map_err(|_| KeyError::NotPem)?;

        let (label, document) = SecretDocument::from_pem(s.trim()).map_err(|_| KeyError::NotPem)?;

        let key = match label {
            PKCS8_LABEL => {
                let pk = PrivateKeyInfo::try_from(document.as_bytes())
                    .map_err(|_| KeyError::InvalidKey)?;

                // lightweight (could be Copy), therefore clonable:
                if let Ok(k) = RsaPrivateKey::try_from(pk.clone()) {
                    Self::Rsa(k)
                } else if let Ok(k) = Ed25519SigningKey::try_from(pk) {
                    Self::Ed25519(k)
                } else {
                    return Err(KeyError::UnsupportedKeyType);
                }
            }
            PKCS1_LABEL => {
                let k = RsaPrivateKey::from_pkcs1_der(document.as_bytes())
                    .map_err(|_| KeyError::InvalidKey)?;
                Self::Rsa(k)
            }
            _ => return Err(KeyError::NotPem),
        };

        if let Self::Rsa(k) = &key {
            k.validate().map_err(|_| KeyError::InvalidKey)?;

            let bits = get_key_size(k);
            if bits < MIN_RSA_KEY_BITS {
                trace!("RSA key of {bits} bits is too small");
                return Err(KeyError::InsufficientKeySize);
            }
        }

        trace!("loaded {} signing key", key.key_type().canonical_str());

        Ok(key)
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Returns the length in bytes of signatures produced with this key.
    pub fn signature_length(&self) -> usize {
        match self {
            Self::Rsa(k) => get_key_size(k) / 8,
            Self::Ed25519(_) => ed25519_dalek::SIGNATURE_LENGTH,
        }
    }

    /// Signs the digest of `data`, computed with the given hash algorithm.
    pub fn sign(&self, hash_alg: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        let data_hash = digest(hash_alg, data);
        self.sign_digest(hash_alg, &data_hash)
    }

    /// Signs an already computed digest.
    pub fn sign_digest(
        &self,
        hash_alg: HashAlgorithm,
        data_hash: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        match self {
            Self::Rsa(k) => sign_rsa(hash_alg, k, data_hash),
            Self::Ed25519(k) => sign_ed25519(k, data_hash),
        }
    }
}

// private key material must not end up in logs
impl Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(k) => write!(f, "SigningKey::Rsa({} bits)", get_key_size(k)),
            Self::Ed25519(_) => write!(f, "SigningKey::Ed25519"),
        }
    }
}

/// A key type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl CanonicalStr for KeyType {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

/// A hash algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    #[cfg(feature = "pre-rfc8301")]
    Sha1,
    Sha256,
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            #[cfg(feature = "pre-rfc8301")]
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// An error that occurs when reading a signing key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyError {
    NotPem,
    InvalidKey,
    UnsupportedKeyType,
    InsufficientKeySize,
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPem => write!(f, "not a PEM-encoded private key"),
            Self::InvalidKey => write!(f, "invalid private key data"),
            Self::UnsupportedKeyType => write!(f, "unsupported private key type"),
            Self::InsufficientKeySize => write!(f, "private key too small"),
        }
    }
}

impl Error for KeyError {}

/// An error that occurs when producing a signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure => write!(f, "failed to produce signature"),
        }
    }
}

impl Error for SigningError {}
