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

use crate::crypto::SigningError;
use ed25519_dalek::{Signer, SigningKey};

/// Produces an Ed25519 signature over an already computed digest, as
/// specified for *ed25519-sha256* in RFC 8463.
pub fn sign_ed25519(signing_key: &SigningKey, data_hash: &[u8]) -> Result<Vec<u8>, SigningError> {
    let signature = signing_key
        .try_sign(data_hash)
        .map_err(|_| SigningError::SigningFailure)?;
    Ok(signature.to_bytes().to_vec())
}
