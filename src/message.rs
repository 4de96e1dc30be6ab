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

//! Email messages as seen by the signer.
//!
//! The signer does not parse MIME structure. It only needs the ordered list of
//! header fields, the body bytes, and a way to add a header field at the top.
//! Those are provided through the [`Message`] trait. [`EmailMessage`] is a
//! simple owned implementation with a lenient parser for raw message text.

use bstr::ByteSlice;
use std::fmt::{self, Debug, Formatter};

/// Access to an email message.
pub trait Message {
    /// Returns the header fields in order of appearance.
    ///
    /// A field value consists of the raw bytes after the colon, including
    /// leading whitespace and folded line breaks, but excluding the line break
    /// that terminates the field.
    fn header_fields(&self) -> Vec<(&str, &[u8])>;

    /// Returns the message body.
    fn body(&self) -> &[u8];

    /// Inserts a header field above all existing header fields.
    fn prepend_header_field(&mut self, name: &str, value: &[u8]);
}

/// An email message consisting of header fields and a body.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct EmailMessage {
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl EmailMessage {
    pub fn new(headers: Vec<(String, Vec<u8>)>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Parses raw message text.
    ///
    /// Lines may end with CRLF or LF. A line starting with space or tab
    /// continues the previous header field. The header ends at the first empty
    /// line, or at the first line that is neither a header field nor a
    /// continuation line, which then begins the body.
    pub fn parse(input: impl AsRef<[u8]>) -> Self {
        let input = input.as_ref();

        let mut headers = vec![];
        // name, start and end offset of the current field's value
        let mut current: Option<(&str, usize, usize)> = None;
        let mut pos = 0;

        let body_start = loop {
            if pos >= input.len() {
                break input.len();
            }

            let (line_end, next) = match input[pos..].find_byte(b'\n') {
                Some(i) => {
                    let lf = pos + i;
                    if lf > pos && input[lf - 1] == b'\r' {
                        (lf - 1, lf + 1)
                    } else {
                        (lf, lf + 1)
                    }
                }
                None => (input.len(), input.len()),
            };

            let line = &input[pos..line_end];

            if line.is_empty() {
                break next;
            }

            if matches!(line[0], b' ' | b'\t') {
                match &mut current {
                    Some((_, _, end)) => {
                        *end = line_end;
                        pos = next;
                        continue;
                    }
                    None => break pos,
                }
            }

            match split_field_name(line) {
                Some((name, value_offset)) => {
                    if let Some((name, start, end)) = current.take() {
                        headers.push((name.to_owned(), input[start..end].to_vec()));
                    }
                    current = Some((name, pos + value_offset, line_end));
                    pos = next;
                }
                None => break pos,
            }
        };

        if let Some((name, start, end)) = current {
            headers.push((name.to_owned(), input[start..end].to_vec()));
        }

        Self {
            headers,
            body: input[body_start..].to_vec(),
        }
    }

    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }

    /// Serializes the message, terminating header fields with CRLF.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = vec![];

        for (name, value) in &self.headers {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
            result.extend(b"\r\n");
        }

        result.extend(b"\r\n");
        result.extend(&self.body);

        result
    }
}

impl Message for EmailMessage {
    fn header_fields(&self) -> Vec<(&str, &[u8])> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
            .collect()
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn prepend_header_field(&mut self, name: &str, value: &[u8]) {
        self.headers.insert(0, (name.into(), value.into()));
    }
}

impl Debug for EmailMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailMessage")
            .field(
                "headers",
                &self
                    .headers
                    .iter()
                    .map(|(name, value)| (name, value.as_bstr()))
                    .collect::<Vec<_>>(),
            )
            .field("body", &self.body.as_bstr())
            .finish()
    }
}

// Returns the field name and the offset of the value, if the line begins with
// a well-formed field name. Whitespace before the colon is tolerated.
fn split_field_name(line: &[u8]) -> Option<(&str, usize)> {
    let colon = line.find_byte(b':')?;

    let name = line[..colon].trim_end_with(|c| matches!(c, ' ' | '\t'));

    if name.is_empty() || !name.iter().all(|b| matches!(b, b'!'..=b'9' | b';'..=b'~')) {
        return None;
    }

    // printable ASCII only, therefore valid UTF-8
    let name = std::str::from_utf8(name).ok()?;

    Some((name, colon + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_crlf() {
        let msg = EmailMessage::parse(
            "From: Me <me@example.com>\r\n\
             To: You\r\n\
             \r\n\
             Hello!\r\n",
        );

        assert_eq!(
            msg.header_fields(),
            [("From", &b" Me <me@example.com>"[..]), ("To", &b" You"[..])]
        );
        assert_eq!(msg.body(), b"Hello!\r\n");
    }

    #[test]
    fn parse_lf_with_folding() {
        let msg = EmailMessage::parse("Subject: one\n\ttwo\nTo: You\n\nbody\n");

        assert_eq!(
            msg.header_fields(),
            [("Subject", &b" one\n\ttwo"[..]), ("To", &b" You"[..])]
        );
        assert_eq!(msg.body(), b"body\n");
    }

    #[test]
    fn parse_header_ends_at_non_field_line() {
        let msg = EmailMessage::parse(
            "From: Example <example@example.com>\n        \nThis is a message body.  Fun!\n",
        );

        assert_eq!(
            msg.header_fields(),
            [("From", &b" Example <example@example.com>\n        "[..])]
        );
        assert_eq!(msg.body(), b"This is a message body.  Fun!\n");
    }

    #[test]
    fn parse_edge_cases() {
        let msg = EmailMessage::parse("");
        assert!(msg.header_fields().is_empty());
        assert!(msg.body().is_empty());

        let msg = EmailMessage::parse("From: me");
        assert_eq!(msg.header_fields(), [("From", &b" me"[..])]);
        assert!(msg.body().is_empty());

        let msg = EmailMessage::parse(" leading space\r\n");
        assert!(msg.header_fields().is_empty());
        assert_eq!(msg.body(), b" leading space\r\n");

        let msg = EmailMessage::parse("Subject :x\r\n\r\n");
        assert_eq!(msg.header_fields(), [("Subject", &b"x"[..])]);
    }

    #[test]
    fn prepend_and_serialize() {
        let mut msg = EmailMessage::parse("From: me\r\n\r\nbody\r\n");

        msg.prepend_header_field("DKIM-Signature", b" v=1");

        assert_eq!(
            msg.to_bytes().as_bstr(),
            "DKIM-Signature: v=1\r\nFrom: me\r\n\r\nbody\r\n"
        );
    }
}
