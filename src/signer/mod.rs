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

//! Signer and supporting types.

mod format;
mod request;
mod sign;

pub use crate::signer::request::{
    default_signed_headers, select_headers, HeaderSelection, Limits, OutputFormat, SignRequest,
    Timestamp,
};

use crate::{
    crypto::{KeyError, SigningError},
    message::Message,
    signature::DkimSignature,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use tracing::debug;

/// An error that occurs when using a [`Signer`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignerError {
    /// The signature cannot be produced: the key is unusable or incompatible
    /// with the algorithm, selector or domain are malformed, or the signing
    /// operation failed.
    UnableToSign,
    /// The header selection is empty or contains an invalid header name, or
    /// the output format names an invalid header.
    InvalidHeaders,
    /// A header selected for signing does not occur (often enough) in the
    /// message.
    SpecifiedHeaderDoesNotExistsInProvidedMessage,
    /// Selector, domain, or the complete signature header exceed the
    /// configured size bounds.
    RessourceUnavailable,
    /// No signature is present. Reserved for verification; never produced by
    /// the signer.
    NoSignatureAvailable,
    /// A signature is present but failed. Reserved for verification; never
    /// produced by the signer.
    SignatureAvailableButFailed,
    /// An internal invariant was violated.
    InternalError,
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnableToSign => write!(f, "unable to sign message"),
            Self::InvalidHeaders => write!(f, "invalid headers"),
            Self::SpecifiedHeaderDoesNotExistsInProvidedMessage => {
                write!(f, "specified header does not exist in provided message")
            }
            Self::RessourceUnavailable => write!(f, "size limit exceeded"),
            Self::NoSignatureAvailable => write!(f, "no signature available"),
            Self::SignatureAvailableButFailed => write!(f, "signature available but failed"),
            Self::InternalError => write!(f, "internal error"),
        }
    }
}

impl Error for SignerError {}

impl From<KeyError> for SignerError {
    fn from(_: KeyError) -> Self {
        Self::UnableToSign
    }
}

impl From<SigningError> for SignerError {
    fn from(_: SigningError) -> Self {
        Self::UnableToSign
    }
}

/// The result of a successful signing operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningResult {
    /// The header name, as given in the output format.
    pub header_name: String,
    /// The formatted header value, including the leading space and any line
    /// breaks inserted for folding.
    pub header_value: String,
    /// The signature data.
    pub signature: DkimSignature,
}

impl SigningResult {
    /// Formats the complete header as `name:value`.
    ///
    /// Name and value are concatenated with only an intervening colon, no
    /// additional whitespace. This is vital for *simple* header
    /// canonicalization where whitespace changes are not allowed.
    pub fn format_header(&self) -> String {
        format!("{}:{}", self.header_name, self.header_value)
    }
}

/// A signer for email messages.
///
/// The signer holds only the sign request; it does not keep state between
/// signing operations and may be shared across threads.
pub struct Signer<T> {
    request: SignRequest<T>,
}

impl<T> Signer<T>
where
    T: AsRef<[u8]>,
{
    pub fn new(request: SignRequest<T>) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &SignRequest<T> {
        &self.request
    }

    /// Signs the message and returns the signature header.
    ///
    /// With a normalized request, the complete header field
    /// `DKIM-Signature: v=1; ...` is returned. Otherwise, only the header value
    /// `v=1; ...` is returned.
    pub fn get_signature_header<M>(&self, message: &M) -> Result<String, SignerError>
    where
        M: Message + ?Sized,
    {
        let result = self.sign(message)?;

        if self.request.normalized {
            Ok(result.format_header())
        } else {
            Ok(result.header_value.trim_start_matches(' ').into())
        }
    }

    /// Signs the message.
    pub fn sign<M>(&self, message: &M) -> Result<SigningResult, SignerError>
    where
        M: Message + ?Sized,
    {
        sign::perform_signing(&self.request, message)
    }

    /// Signs the message and adds the signature header at the top of its
    /// header. The message is modified only when signing succeeds.
    pub fn add_signature_to_message<M>(&self, message: &mut M) -> Result<(), SignerError>
    where
        M: Message + ?Sized,
    {
        let result = self.sign(message)?;

        message.prepend_header_field(&result.header_name, result.header_value.as_bytes());

        debug!("added {} header to message", result.header_name);

        Ok(())
    }
}

/// Signs the message and returns the signature header.
///
/// See [`Signer::get_signature_header`].
pub fn get_signature_header<T, M>(request: SignRequest<T>, message: &M) -> Result<String, SignerError>
where
    T: AsRef<[u8]>,
    M: Message + ?Sized,
{
    Signer::new(request).get_signature_header(message)
}

/// Signs the message and adds the signature header at the top of its header.
///
/// See [`Signer::add_signature_to_message`].
pub fn add_signature_to_message<T, M>(
    request: SignRequest<T>,
    message: &mut M,
) -> Result<(), SignerError>
where
    T: AsRef<[u8]>,
    M: Message + ?Sized,
{
    Signer::new(request).add_signature_to_message(message)
}
