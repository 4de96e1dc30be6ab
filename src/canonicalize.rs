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

//! Canonicalization of header fields and body.
//!
//! Both algorithms of RFC 6376, section 3.4 are implemented. Canonicalization
//! operates on bytes: input need not be valid UTF-8, and bytes other than the
//! ones relevant to the algorithm pass through unchanged.

use crate::{
    header::{FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::{
    collections::HashSet,
    fmt::{self, Debug, Formatter},
};

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

// which state are we in = what did we see last?
#[derive(Clone, Copy)]
enum CanonState {
    Init,
    CrLf,
    Cr,
    Wsp,
    WspCr,
    Byte,
}

/// A streaming canonicalizer for the message body.
///
/// Feed the body in chunks of any size with
/// [`canonicalize_chunk`][BodyCanonicalizer::canonicalize_chunk], then
/// [`finish`][BodyCanonicalizer::finish]. The concatenated outputs form the
/// canonical body. Trailing empty lines are withheld until it is known whether
/// more content follows them.
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    state: CanonState,
    blank_line: bool,  // whether currently on an empty or blank line
    empty_lines: usize,  // number of empty lines seen
    content_seen: bool,
}

impl BodyCanonicalizer {
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            state: CanonState::Init,
            blank_line: true,
            empty_lines: 0,
            content_seen: false,
        }
    }

    // canonicalisation recognises only CRLF as line separator/terminator, stray
    // CR and LF are treated like other bytes
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.kind {
            CanonicalizationAlgorithm::Simple => self.canonicalize_chunk_simple(bytes),
            CanonicalizationAlgorithm::Relaxed => self.canonicalize_chunk_relaxed(bytes),
        }
    }

    fn canonicalize_chunk_simple(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(bytes.len());

        for &b in bytes {
            match self.state {
                CanonState::Init | CanonState::CrLf => {
                    if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Byte => {
                    if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        result.push(b);
                    }
                }
                CanonState::Wsp | CanonState::WspCr => unreachable!(),
            }
        }

        result
    }

    fn canonicalize_chunk_relaxed(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(bytes.len());

        for &b in bytes {
            match self.state {
                CanonState::Init | CanonState::CrLf => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        self.flush_empty_lines(&mut result);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Wsp => {
                    if b == CR {
                        self.state = CanonState::WspCr;
                    } else if !is_wsp(b) {
                        self.flush_empty_lines(&mut result);
                        result.push(SP);
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Cr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(CR);

                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b != CR {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::WspCr => {
                    if b == LF {
                        self.end_line(&mut result);
                        continue;
                    }

                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);

                    if b == CR {
                        self.state = CanonState::Cr;
                    } else if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else {
                        result.push(b);
                        self.state = CanonState::Byte;
                    }
                }
                CanonState::Byte => {
                    if is_wsp(b) {
                        self.state = CanonState::Wsp;
                    } else if b == CR {
                        self.state = CanonState::Cr;
                    } else {
                        result.push(b);
                    }
                }
            }
        }

        result
    }

    /// Completes canonicalization, returning the final piece of output.
    pub fn finish(mut self) -> Vec<u8> {
        match self.kind {
            CanonicalizationAlgorithm::Simple => match self.state {
                CanonState::Init => CRLF.to_vec(),  // empty body is CRLF
                CanonState::CrLf if !self.content_seen => CRLF.to_vec(),
                CanonState::CrLf => vec![],
                CanonState::Cr => {
                    let mut result = vec![];
                    self.flush_empty_lines(&mut result);
                    result.push(CR);
                    result.extend(CRLF);  // body needs final CRLF
                    result
                }
                CanonState::Byte => CRLF.to_vec(),  // body needs final CRLF
                CanonState::Wsp | CanonState::WspCr => unreachable!(),
            },
            CanonicalizationAlgorithm::Relaxed => match self.state {
                CanonState::Init | CanonState::CrLf => vec![],
                CanonState::Cr => {
                    let mut result = vec![];
                    self.flush_empty_lines(&mut result);
                    result.push(CR);
                    result.extend(CRLF);  // non-empty body needs final CRLF
                    result
                }
                CanonState::Wsp => {
                    // final WSP is trailing whitespace: drop it
                    if self.blank_line {
                        // only whitespace on the last line, which is now empty
                        vec![]
                    } else {
                        CRLF.to_vec()
                    }
                }
                CanonState::WspCr => {
                    let mut result = vec![];
                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);
                    result.extend(CRLF);  // non-empty body needs final CRLF
                    result
                }
                CanonState::Byte => CRLF.to_vec(),  // non-empty body needs final CRLF
            },
        }
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        if self.blank_line {
            self.empty_lines += 1;
        } else {
            result.extend(CRLF);
            self.blank_line = true;
        }
        self.state = CanonState::CrLf;
    }

    // write out remembered empty lines after encountering/before processing
    // byte that ends a section of empty lines
    fn flush_empty_lines(&mut self, result: &mut Vec<u8>) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;
        self.blank_line = false;
        self.content_seen = true;
    }
}

fn is_wsp(b: u8) -> bool {
    matches!(b, b'\t' | b' ')
}

/// Canonicalizes a complete message body.
pub fn canonicalize_body(body: &[u8], algorithm: CanonicalizationAlgorithm) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(algorithm);
    let mut result = canonicalizer.canonicalize_chunk(body);
    result.extend(canonicalizer.finish());
    result
}

/// A canonicalized header field.
#[derive(Clone, Eq, PartialEq)]
pub struct CanonicalHeader {
    pub name: Box<str>,
    pub value: Box<[u8]>,
}

impl CanonicalHeader {
    /// Appends `name:value` to the given output.
    pub fn write_into(&self, out: &mut Vec<u8>) {
        out.extend(self.name.bytes());
        out.push(b':');
        out.extend(&self.value[..]);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.name.len() + self.value.len() + 1);
        self.write_into(&mut result);
        result
    }
}

impl Debug for CanonicalHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalHeader")
            .field("name", &self.name)
            .field("value", &self.value.as_bstr())
            .finish()
    }
}

/// Canonicalizes a single header field.
///
/// A line break terminating the value, if present, is not part of the field
/// and is removed first.
pub fn canonicalize_header(
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
    algorithm: CanonicalizationAlgorithm,
) -> CanonicalHeader {
    let name = name.as_ref();
    let value = value.as_ref();
    let value = value.strip_suffix(&CRLF).unwrap_or(value);

    match algorithm {
        CanonicalizationAlgorithm::Simple => CanonicalHeader {
            name: name.into(),
            value: value.into(),
        },
        CanonicalizationAlgorithm::Relaxed => {
            let mut canonical_value = Vec::with_capacity(value.len());
            canonicalize_header_relaxed(&mut canonical_value, value);
            CanonicalHeader {
                name: name.to_ascii_lowercase().into(),
                value: canonical_value.into(),
            }
        }
    }
}

fn canonicalize_header_relaxed(out: &mut Vec<u8>, value: &[u8]) {
    // CR and LF are included so that folded lines are unfolded
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let value = value.trim_with(is_space);

    let mut compressing = false;
    for &b in value {
        if is_space(b.into()) {
            if !compressing {
                out.push(SP);
                compressing = true;
            }
        } else {
            out.push(b);
            compressing = false;
        }
    }
}

/// Selects and canonicalizes header fields, in order of selection.
///
/// Each selected name picks the last not yet picked occurrence of the field,
/// ie selection proceeds from the bottom of the header up. Names without a
/// remaining occurrence are skipped.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<CanonicalHeader> {
    let mut result = Vec::with_capacity(selected_headers.len());
    let mut processed_indexes = HashSet::with_capacity(selected_headers.len());

    for selected_header in selected_headers {
        let next = headers
            .as_ref()
            .iter()
            .rev()
            .enumerate()
            .filter(|(i, _)| !processed_indexes.contains(i))
            .find(|(_, (name, _))| *selected_header == **name);

        if let Some((i, (name, value))) = next {
            result.push(canonicalize_header(name, value, algorithm));
            processed_indexes.insert(i);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;
    use CanonicalizationAlgorithm::*;

    #[test]
    fn canonicalize_headers_relaxed_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("from".into(), b" Good \t ".to_vec()),
            ("to".into(), b" see   me".to_vec()),
            ("Date".into(), b" Fri 24\r\n\tfoo".to_vec()),
            ("To".into(), b" another one".to_vec()),
        ]);

        let selected_headers = vec![
            FieldName::new("to").unwrap(),
            FieldName::new("from").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("date").unwrap(),
        ];

        let cheaders = canonicalize_headers(Relaxed, &headers, &selected_headers);
        let result: Vec<u8> = cheaders
            .iter()
            .flat_map(|h| {
                let mut line = h.to_bytes();
                line.extend(CRLF);
                line
            })
            .collect();

        assert_eq!(
            BStr::new(&result),
            BStr::new(&b"to:another one\r\nfrom:Good\r\nto:see me\r\ndate:Fri 24 foo\r\n"[..]),
        );
    }

    #[test]
    fn canonicalize_headers_skips_exhausted_names() {
        let headers = HeaderFields::from_vec(vec![("From".into(), b" me".to_vec())]);

        let selected_headers = vec![
            FieldName::new("From").unwrap(),
            FieldName::new("From").unwrap(),
        ];

        let cheaders = canonicalize_headers(Simple, &headers, &selected_headers);

        assert_eq!(cheaders.len(), 1);
        assert_eq!(BStr::new(&cheaders[0].to_bytes()), BStr::new("From: me"));
    }

    #[test]
    fn canonicalize_header_simple_keeps_folding() {
        let h = canonicalize_header("Subject", b" a  b\r\n\tc \r\n", Simple);

        assert_eq!(&*h.name, "Subject");
        assert_eq!(BStr::new(&h.value), BStr::new(" a  b\r\n\tc "));
    }

    #[test]
    fn canonicalize_header_relaxed_unfolds() {
        let h = canonicalize_header("SubJect", b" \t Hello\r\n   World \t\r\n\tAgain  ", Relaxed);

        assert_eq!(&*h.name, "subject");
        assert_eq!(BStr::new(&h.value), BStr::new("Hello World Again"));
    }

    #[test]
    fn canonicalize_header_relaxed_idempotent() {
        let once = canonicalize_header("To", b"  A   <a@example.com>\r\n (x)", Relaxed);
        let twice = canonicalize_header(&once.name, &once.value, Relaxed);

        assert_eq!(once, twice);
    }

    #[test]
    fn body_canon_simple_ok() {
        let bc = BodyCanonicalizer::new(Simple);

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well  hello \r\n\r\n what agi \r\n");
    }

    #[test]
    fn body_canon_simple_empty() {
        assert_eq!(canonicalize_body(b"", Simple), b"\r\n");
        assert_eq!(canonicalize_body(b"\r\n\r\n", Simple), b"\r\n");
        assert_eq!(canonicalize_body(b"abc", Simple), b"abc\r\n");
    }

    #[test]
    fn body_canon_relaxed_basic() {
        let bc = BodyCanonicalizer::new(Relaxed);

        let body = canonicalize_chunks(
            bc,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canon_relaxed_small_chunks() {
        let bc = BodyCanonicalizer::new(Relaxed);

        let body = canonicalize_chunks(
            bc,
            &[
                b"well ",
                b" hello ",
                b"\r",
                b"\n\r",
                b"\n what agi \r\n\r\n",
                b"\r\n",
            ],
        );

        assert_eq!(body, b"well hello\r\n\r\n what agi\r\n");
    }

    #[test]
    fn body_canon_relaxed_initial_empty_lines() {
        let bc = BodyCanonicalizer::new(Relaxed);

        let body = canonicalize_chunks(bc, &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"]);

        assert_eq!(body, b"\r\n\r\n\ra\r\nb c\r\n");
    }

    #[test]
    fn body_canon_relaxed_empty() {
        assert_eq!(canonicalize_body(b"", Relaxed), b"");
        assert_eq!(canonicalize_body(b"\r\n \t\r\n", Relaxed), b"");
        assert_eq!(canonicalize_body(b"x\r\n  ", Relaxed), b"x\r\n");
        assert_eq!(canonicalize_body(b"x \t", Relaxed), b"x\r\n");
    }

    #[test]
    fn body_canon_relaxed_example_message() {
        assert_eq!(
            canonicalize_body(b"This is a message body.  Fun!\r\n", Relaxed),
            b"This is a message body. Fun!\r\n"
        );
    }

    fn canonicalize_chunks(mut bc: BodyCanonicalizer, chunks: &[&[u8]]) -> Vec<u8> {
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canonicalize_chunk(c));
        }
        result.extend(bc.finish());
        result
    }
}
