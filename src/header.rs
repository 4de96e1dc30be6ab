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

//! Representation of email header data.

use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
};

/// A header field as taken from a message: raw name and raw value.
pub type HeaderField = (Box<str>, Box<[u8]>);

/// An error indicating an invalid header field name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderFieldError;

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid header field name")
    }
}

impl Error for HeaderFieldError {}

/// A header field name usable in the *h=* tag.
///
/// Field names are compared case-insensitively. Besides the RFC 5322
/// restrictions (printable ASCII, no colon), names containing `;` are rejected,
/// as they cannot be represented in a tag-list.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        if !value.chars().all(|c| c.is_ascii_graphic() && !matches!(c, ':' | ';')) {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<str> for FieldName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A snapshot of a message's header fields, in order of appearance.
///
/// Names are kept as they appear in the message and are not validated; values
/// are raw bytes, possibly containing folded line breaks.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Self {
        Self(value.into())
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Self {
        value
            .into_iter()
            .map(|(name, value)| (name.into_boxed_str(), value.into_boxed_slice()))
            .collect()
    }

    /// Returns the number of fields with the given name.
    pub fn count(&self, name: &FieldName) -> usize {
        self.0.iter().filter(|(n, _)| *name == **n).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<HeaderField> for HeaderFields {
    fn from_iter<I: IntoIterator<Item = HeaderField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl Debug for HeaderFields {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(name, value)| (name, value.as_bstr())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_ok() {
        assert!(FieldName::new("abc").is_ok());
        assert!(FieldName::new("X-Mailer").is_ok());

        assert!(FieldName::new("").is_err());
        assert!(FieldName::new("abc ").is_err());
        assert!(FieldName::new("a:c").is_err());
        assert!(FieldName::new("a;c").is_err());
        assert!(FieldName::new("Füße").is_err());
    }

    #[test]
    fn field_name_case_insensitive() {
        let name = FieldName::new("From").unwrap();

        assert_eq!(name, FieldName::new("fROM").unwrap());
        assert!(name == "from");
        assert!(name != "to");
    }

    #[test]
    fn field_name_debug_and_display() {
        let name = FieldName::new("Message-ID").unwrap();

        assert_eq!(format!("{name:?}"), "\"Message-ID\"");
        assert_eq!(name.to_string(), "Message-ID");
    }

    #[test]
    fn header_fields_count() {
        let headers = HeaderFields::from_vec(vec![
            ("To".into(), b" a".to_vec()),
            ("From".into(), b" me".to_vec()),
            ("to".into(), b" b".to_vec()),
        ]);

        assert_eq!(headers.count(&FieldName::new("TO").unwrap()), 2);
        assert_eq!(headers.count(&FieldName::new("from").unwrap()), 1);
        assert_eq!(headers.count(&FieldName::new("Subject").unwrap()), 0);
    }
}
