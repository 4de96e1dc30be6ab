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

use base64ct::{Base64, Encoding};
use std::borrow::Cow;

/// A trait for entities that have a canonical string representation.
pub trait CanonicalStr {
    /// Returns the canonical representation as a static string slice.
    fn canonical_str(&self) -> &'static str;
}

/// Encodes binary data as a Base64 string.
pub fn encode_base64<T: AsRef<[u8]>>(input: T) -> String {
    Base64::encode_string(input.as_ref())
}

/// Converts bare LF line endings to CRLF, leaving existing CRLF alone.
pub fn normalize_line_endings(input: &[u8]) -> Cow<'_, [u8]> {
    let needs_fix = input
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\n' && (i == 0 || input[i - 1] != b'\r'));

    if !needs_fix {
        return Cow::Borrowed(input);
    }

    let mut result = Vec::with_capacity(input.len() + input.len() / 16);
    let mut prev = None;
    for &b in input {
        if b == b'\n' && prev != Some(b'\r') {
            result.push(b'\r');
        }
        result.push(b);
        prev = Some(b);
    }
    Cow::Owned(result)
}
