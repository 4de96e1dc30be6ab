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

//! Computation of the message hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer, CanonicalHeader},
    crypto::{self, HashAlgorithm, Hasher},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DKIM_SIGNATURE_NAME},
};

/// A producer of the *body hash*.
///
/// The body hasher canonicalises and hashes chunks of the message body. Chunks
/// may be split anywhere, also in the middle of a line break.
pub struct BodyHasher {
    canonicalizer: BodyCanonicalizer,
    hasher: Hasher,
    len: usize,
}

impl BodyHasher {
    pub fn new(hash_alg: HashAlgorithm, canon_alg: CanonicalizationAlgorithm) -> Self {
        Self {
            canonicalizer: BodyCanonicalizer::new(canon_alg),
            hasher: Hasher::new(hash_alg),
            len: 0,
        }
    }

    pub fn hash_chunk(&mut self, chunk: &[u8]) {
        let canonicalized_chunk = self.canonicalizer.canonicalize_chunk(chunk);
        self.update(&canonicalized_chunk);
    }

    /// Returns the body hash and the length of the canonicalised body.
    pub fn finish(self) -> (Box<[u8]>, usize) {
        let Self { canonicalizer, mut hasher, len } = self;

        let canonicalized_chunk = canonicalizer.finish();
        hasher.update(&canonicalized_chunk);

        (hasher.finish(), len + canonicalized_chunk.len())
    }

    fn update(&mut self, canonicalized_chunk: &[u8]) {
        self.len += canonicalized_chunk.len();
        self.hasher.update(canonicalized_chunk);
    }
}

/// Computes the body hash of an already canonicalised body.
pub fn body_hash(hash_alg: HashAlgorithm, canonical_body: &[u8]) -> Box<[u8]> {
    crypto::digest(hash_alg, canonical_body)
}

/// Assembles the input to the signing operation: the selected canonical
/// headers, each terminated with CRLF, followed by the canonical
/// *DKIM-Signature* header without a trailing CRLF.
pub fn signing_input(headers: &[CanonicalHeader], dkim_sig_header: &CanonicalHeader) -> Vec<u8> {
    let mut result = vec![];

    for header in headers {
        header.write_into(&mut result);
        result.extend(b"\r\n");
    }

    dkim_sig_header.write_into(&mut result);

    result
}

/// Computes the *data hash*, the digest of the signing input.
///
/// The formatted header value must contain an empty *b=* tag.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_header_name: &str,
    formatted_dkim_sig_header_value: &str,
) -> Box<[u8]> {
    debug_assert!(dkim_sig_header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME));

    // canonicalize selected headers
    let cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    // canonicalize DKIM-Signature header
    let csig = canonicalize::canonicalize_header(
        dkim_sig_header_name,
        formatted_dkim_sig_header_value,
        canon_alg,
    );

    // produce message digest of the canonicalized value
    crypto::digest(hash_alg, &signing_input(&cheaders, &csig))
}
