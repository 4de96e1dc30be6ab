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
    header::FieldName,
    signature::{Canonicalization, DkimSignature, DomainName, Selector, SignatureAlgorithm},
    util::{self, CanonicalStr},
};
use std::{fmt::Write, iter};

// Note: Careful with offsets: formatting works with *characters*, not bytes!

/// DKIM signature data that does not yet have a cryptographic signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub signed_headers: Box<[FieldName]>,
}

impl UnsignedDkimSignature {
    /// Returns the formatted signature without the *b=* tag value, and the
    /// index where the *b=* tag value is to be inserted.
    ///
    /// `start` is the number of characters preceding the header value on the
    /// first line, ie the length of the header name plus colon.
    pub fn format_without_signature(
        &self,
        start: usize,
        width: Option<usize>,
        indent: &str,
        b_tag_len: usize,
    ) -> (String, usize) {
        format_without_signature(self, start, width.unwrap_or(usize::MAX), indent, b_tag_len)
    }

    pub fn into_signature(self, signature_data: Box<[u8]>) -> DkimSignature {
        DkimSignature {
            algorithm: self.algorithm,
            signature_data,
            body_hash: self.body_hash,
            canonicalization: self.canonicalization,
            domain: self.domain,
            selector: self.selector,
            timestamp: self.timestamp,
            signed_headers: self.signed_headers,
        }
    }
}

/// Returns the names of the tags included in the signature, in output order.
fn compute_tag_names(sig: &UnsignedDkimSignature) -> Vec<&'static str> {
    let mut names = Vec::with_capacity(9);

    names.push("v");
    names.push("a");
    names.push("c");
    names.push("d");
    names.push("s");
    sig.timestamp.is_some().then(|| names.push("t"));
    names.push("h");
    names.push("bh");
    names.push("b");

    names
}

// Ephemeral context holding current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

fn format_without_signature(
    sig: &UnsignedDkimSignature,
    start: usize,
    width: usize,
    indent: &str,
    b_tag_len: usize,
) -> (String, usize) {
    let tag_names = compute_tag_names(sig);
    let last_index = tag_names.len() - 1;

    // The starting point of cursor `i` is just past header name + ':'.
    // The insertion index will be used when inserting the signature value.
    let mut output = String::new();
    let mut i = start;
    let mut insertion_i = 0;

    let out = &mut output;
    let i = &mut i;

    for (index, tag_name) in tag_names.into_iter().enumerate() {
        let last = index == last_index;

        let fmt = Fmt { width, indent, last };

        match tag_name {
            "v" => format_tag(out, i, fmt, "v", "1"),
            "a" => format_tag(out, i, fmt, "a", sig.algorithm.canonical_str()),
            "c" => format_tag(out, i, fmt, "c", sig.canonicalization.canonical_str()),
            "d" => format_tag(out, i, fmt, "d", sig.domain.as_ref()),
            "s" => format_tag(out, i, fmt, "s", sig.selector.as_ref()),
            "t" => {
                if let Some(t) = sig.timestamp {
                    format_tag(out, i, fmt, "t", &t.to_string());
                }
            }
            "h" => format_tag_h(out, i, fmt, &sig.signed_headers),
            "bh" => format_tag_bh(out, i, fmt, &sig.body_hash),
            "b" => insertion_i = format_tag_name_b(out, i, fmt, b_tag_len),
            _ => {}
        }
    }

    (output, insertion_i)
}

// Note: Throughout, `out` is the final formatted output. `i` is the ‘cursor’ in
// the current line, based on *characters*, not bytes!

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    let Fmt { last, .. } = fmt;

    // name + '=' + val [+ ';']
    let taglen = name.len() + value.chars().count() + if last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(name);
    out.push('=');
    out.push_str(value);

    if !last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[FieldName]) {
    let Fmt { last, .. } = fmt;

    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let first_name = names.next().unwrap_or_default();

    // "h=" + name [+ ';'/':']
    let taglen = first_name.chars().count() + if names.peek().is_none() && last { 2 } else { 3 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str("h=");
    out.push_str(first_name);
    // now still need to write ;/: to match current i, this is done right away in the next stmt below

    while let Some(name) = names.next() {
        out.push(':');

        // name [+ ';'/':']
        let len = name.chars().count() + if names.peek().is_none() && last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
        // again, still need to write ;/:, it is done right away
    }

    if !last {
        out.push(';');
    }
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[u8]) {
    let Fmt { last, .. } = fmt;

    let value = util::encode_base64(value);

    // "bh=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 4;

    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("bh=");

    format_chunks_into_string(out, i, fmt, &value);

    // if final chunk makes line *width* chars long, the final ; will be
    // appended nevertheless (giving a width of *width + 1*; this is fine)
    if !last {
        out.push(';');
        *i += 1;
    }
}

// Returns the insertion index of the b= tag value.
fn format_tag_name_b(out: &mut String, i: &mut usize, fmt: Fmt<'_>, b_tag_len: usize) -> usize {
    let Fmt { width, indent, last } = fmt;

    // "b=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 3;
    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("b=");

    let insertion_i = out.len();

    // Where in the line are we now given the estimated b= tag value length?
    let chunk_len = width.saturating_sub(indent.len()).max(1);
    let remaining_len = width.saturating_sub(*i);
    if b_tag_len <= remaining_len {
        *i += b_tag_len;
    } else {
        let mut final_chunk_len = (b_tag_len - remaining_len) % chunk_len;
        if final_chunk_len == 0 {
            final_chunk_len = chunk_len;
        }
        *i = final_chunk_len + indent.len();
    }

    if !last {
        out.push(';');
        *i += 1;
    }

    insertion_i
}

/// Advances the cursor `i`, making space for an item of length `len`, inserting
/// line break and indentation if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if i.saturating_add(len) <= width {
        *i += len;
    } else {
        out.push_str("\r\n");
        out.push_str(indent);
        *i = indent.len() + len;
    }
}

fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    // + 1 for initial SP
    if i.saturating_add(len + 1) <= width {
        out.push(' ');
        *i += len + 1;
    } else {
        out.push_str("\r\n");
        out.push_str(indent);
        *i = indent.len() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, fmt: Fmt<'_>, mut s: &str) {
    let Fmt { width, indent, .. } = fmt;

    let first_chunk_len = width.saturating_sub(*i);
    let first_chunk_len = first_chunk_len.min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent.len()).max(1);  // no empty chunks
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            None
        } else {
            let chunk;
            match s.char_indices().nth(chunk_width) {
                Some((c, _)) => {
                    (chunk, s) = s.split_at(c);
                    Some(chunk)
                }
                None => {
                    (chunk, s) = s.split_at(s.len());
                    Some(chunk)
                }
            }
        }
    });

    for chunk in chunks {
        let _ = write!(out, "\r\n{indent}{chunk}");
        *i = chunk.chars().count() + indent.len();
    }
}

/// Inserts the Base64-encoded signature data as the *b=* tag value.
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    start: usize,
    signature_data: &[u8],
    width: Option<usize>,
    indent: &str,
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let width = width.unwrap_or(usize::MAX);
    let fmt = Fmt { width, indent, last: false /*notused*/ };

    let s = util::encode_base64(signature_data);
    // s contains only ASCII now

    let formatted_header_pre = &formatted_header[..insertion_index];

    let mut it = formatted_header_pre.rsplit("\r\n");
    let last_line = it.next().unwrap_or_default();
    let mut len = if it.next().is_some() {
        last_line.chars().count()
    } else {
        start + last_line.chars().count()
    };

    let mut result = String::with_capacity(s.len());
    format_chunks_into_string(&mut result, &mut len, fmt, &s);

    formatted_header.insert_str(insertion_index, &result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::CanonicalizationAlgorithm;

    fn example_signature(timestamp: Option<u64>) -> UnsignedDkimSignature {
        UnsignedDkimSignature {
            algorithm: SignatureAlgorithm::RsaSha256,
            body_hash: Box::from(*b"0123456789abcdef0123456789abcdef"),
            canonicalization: (CanonicalizationAlgorithm::Relaxed, CanonicalizationAlgorithm::Simple)
                .into(),
            domain: DomainName::new("example.com").unwrap(),
            selector: Selector::new("sel").unwrap(),
            timestamp,
            signed_headers: [
                FieldName::new("From").unwrap(),
                FieldName::new("To").unwrap(),
                FieldName::new("Subject").unwrap(),
            ]
            .into(),
        }
    }

    #[test]
    fn format_single_line() {
        let sig = example_signature(Some(1234));

        let (mut value, insertion_i) = sig.format_without_signature(15, None, "\t", 344);

        assert_eq!(
            value,
            " v=1; a=rsa-sha256; c=relaxed/simple; d=example.com; s=sel; t=1234; \
             h=From:To:Subject; bh=MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=; b="
        );
        assert_eq!(insertion_i, value.len());

        insert_signature_data(&mut value, insertion_i, 15, b"sig", None, "\t");

        assert!(value.ends_with("; b=c2ln"));
    }

    #[test]
    fn format_without_timestamp() {
        let sig = example_signature(None);

        let (value, _) = sig.format_without_signature(15, None, "\t", 4);

        assert!(value.starts_with(" v=1; a=rsa-sha256; c=relaxed/simple; d=example.com; s=sel; h="));
        assert!(!value.contains("t="));
    }

    #[test]
    fn format_folded() {
        let sig = example_signature(Some(1234));

        let (mut value, insertion_i) = sig.format_without_signature(15, Some(40), "  ", 8);

        insert_signature_data(&mut value, insertion_i, 15, b"signatur", Some(40), "  ");

        for line in format!("DKIM-Signature:{value}").split("\r\n") {
            assert!(line.chars().count() <= 41, "line too long: {line:?}");
        }
        for line in value.split("\r\n").skip(1) {
            assert!(line.starts_with("  "));
        }

        assert!(value.replace("\r\n  ", "").ends_with("b=c2lnbmF0dXI="));
    }

    #[test]
    fn format_tag_h_ok() {
        let mut out = String::new();
        let mut i = 0;
        let fmt = Fmt { width: 10, indent: "  ", last: false };
        let value = [FieldName::new("Ribbit").unwrap()];

        format_tag_h(&mut out, &mut i, fmt, &value);

        assert_eq!(out, " h=Ribbit;");
        assert_eq!(i, 10);
    }

    #[test]
    fn format_tag_h_folds_between_names() {
        let mut out = String::new();
        let mut i = 0;
        let fmt = Fmt { width: 10, indent: " ", last: true };
        let value = [FieldName::new("From").unwrap(), FieldName::new("Subject").unwrap()];

        format_tag_h(&mut out, &mut i, fmt, &value);

        assert_eq!(out, " h=From:\r\n Subject");
        assert_eq!(i, 8);
    }
}
