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

use crate::{
    header::{FieldName, HeaderFields},
    signature::{Canonicalization, SignatureAlgorithm, DKIM_SIGNATURE_NAME},
};
use std::{
    fmt::{self, Debug, Formatter},
    num::NonZeroUsize,
};

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    /// Use the current system time, captured once per signing operation.
    #[default]
    Now,
    /// Use the given Unix timestamp.
    Exact(u64),
}

/// Selects all headers matching the predicate, in reverse (evaluation order).
pub fn select_headers<'a, 'b: 'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&str) -> bool + 'b,
) -> impl DoubleEndedIterator<Item = &'a str> + 'a {
    headers
        .as_ref()
        .iter()
        .rev()
        .filter_map(move |(name, _)| {
            let name: &str = name;
            if pred(name) { Some(name) } else { None }
        })
}

/// Selection of headers to include in the h= tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Given the message's header, select all occurrences of the headers in
    /// the default set.
    #[default]
    Auto,
    /// Use exactly the headers given here as contents of the h= tag.
    ///
    /// Names are matched case-insensitively. A name given *n* times selects
    /// the last *n* occurrences of that header in the message, and each of
    /// them must exist.
    Manual(Vec<String>),
}

/// Returns a collection of headers that should be signed.
///
/// RFC 6376 does not actually recommend a specific set of headers to be signed.
/// Instead, the collection returned here contains the so-called ‘examples’ from
/// section 5.4.1.
pub fn default_signed_headers() -> Vec<FieldName> {
    let names = [
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
    ];

    names
        .into_iter()
        .filter_map(|n| FieldName::new(n).ok())
        .collect()
}

/// Formatting options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputFormat {
    /// The header name, must be equal to `DKIM-Signature` ignoring case.
    pub header_name: String,
    /// The maximum line width in characters to use when breaking lines. When
    /// `None` (the default), the header is produced on a single line.
    pub line_width: Option<NonZeroUsize>,
    /// The indentation whitespace to use for continuation lines. Must be a
    /// non-empty sequence of space and tab characters. The default is `"\t"`.
    pub indentation: String,
}

impl OutputFormat {
    pub(crate) fn is_valid(&self) -> bool {
        self.header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME)
            && !self.indentation.is_empty()
            && self.indentation.chars().all(|c| matches!(c, ' ' | '\t'))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: None,
            indentation: "\t".into(),
        }
    }
}

/// Size bounds applied before signing.
///
/// The defaults are those of the libopendkim signer: 253 octets for selector
/// and domain, the maximum length of a domain name, 63 octets for each of
/// their dot-separated labels, and 4096 octets for the complete
/// *DKIM-Signature* header.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Limits {
    pub max_selector_len: usize,
    pub max_domain_len: usize,
    /// Bound on every label of selector and domain.
    pub max_label_len: usize,
    pub max_header_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_selector_len: 253,
            max_domain_len: 253,
            max_label_len: 63,
            max_header_len: 4096,
        }
    }
}

/// A request for creation of a DKIM signature.
#[derive(Clone)]
pub struct SignRequest<T> {
    /// The selector to use in the *s=* tag.
    pub selector: String,
    /// The signing domain to use in the *d=* tag.
    pub domain: String,
    /// The PEM-encoded private key to use for producing the cryptographic
    /// signature. It is decoded anew for every signature and not retained.
    pub signing_key: T,

    /// The selection of headers to include in the *h=* tag.
    pub header_selection: HeaderSelection,
    /// The canonicalization to use in the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The signature algorithm to use in the *a=* tag. Must be compatible with
    /// the signing key. When `None`, the algorithm is derived from the key
    /// type, with hash algorithm SHA-256.
    pub algorithm: Option<SignatureAlgorithm>,
    /// The timestamp value to record in the *t=* tag. When `None`, the *t=*
    /// tag is omitted.
    pub timestamp: Option<Timestamp>,
    /// Whether to normalize the message before signing. When `true` (the
    /// default), bare LF line endings are converted to CRLF and headers are
    /// canonicalized with the header algorithm in `canonicalization`.
    ///
    /// When `false`, message bytes are used verbatim and relaxed header
    /// canonicalization is bypassed: headers are signed with the *simple*
    /// algorithm, and the *c=* tag records this. The body algorithm is
    /// unaffected. Also determines whether the header name is included in
    /// the output of
    /// [`Signer::get_signature_header`][crate::signer::Signer::get_signature_header].
    pub normalized: bool,

    /// The formatting options to use for producing the formatted
    /// *DKIM-Signature* header.
    pub format: OutputFormat,
    /// The size bounds to enforce.
    pub limits: Limits,
}

impl<T> SignRequest<T> {
    pub fn new(
        selector: impl Into<String>,
        domain: impl Into<String>,
        signing_key: T,
        header_selection: HeaderSelection,
    ) -> Self {
        Self {
            selector: selector.into(),
            domain: domain.into(),
            signing_key,

            header_selection,
            canonicalization: Default::default(),
            algorithm: None,
            timestamp: Some(Timestamp::Now),
            normalized: true,

            format: Default::default(),
            limits: Default::default(),
        }
    }
}

// the key material is left out
impl<T> Debug for SignRequest<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignRequest")
            .field("selector", &self.selector)
            .field("domain", &self.domain)
            .field("header_selection", &self.header_selection)
            .field("canonicalization", &self.canonicalization)
            .field("algorithm", &self.algorithm)
            .field("timestamp", &self.timestamp)
            .field("normalized", &self.normalized)
            .field("format", &self.format)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
