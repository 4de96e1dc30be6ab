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
    crypto::{HashAlgorithm, SigningKey},
    header::{FieldName, HeaderFields},
    message::Message,
    message_hash::{self, BodyHasher},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, DomainName, Selector, SignatureAlgorithm,
    },
    signer::{
        self,
        format::{self, UnsignedDkimSignature},
        HeaderSelection, SignRequest, SignerError, SigningResult, Timestamp,
    },
    util::{self, CanonicalStr},
};
use std::{collections::HashSet, time::SystemTime};
use tracing::{debug, trace};

pub fn perform_signing<T, M>(
    request: &SignRequest<T>,
    message: &M,
) -> Result<SigningResult, SignerError>
where
    T: AsRef<[u8]>,
    M: Message + ?Sized,
{
    let format = &request.format;

    if !format.is_valid() {
        trace!("invalid output format");
        return Err(SignerError::InvalidHeaders);
    }

    let headers = snapshot_headers(message, request.normalized);

    // select headers

    let signed_headers = match &request.header_selection {
        HeaderSelection::Auto => select_signed_headers(&headers),
        HeaderSelection::Manual(names) => names
            .iter()
            .map(|name| FieldName::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SignerError::InvalidHeaders)?,
    };

    if signed_headers.is_empty() {
        trace!("no headers selected for signing");
        return Err(SignerError::InvalidHeaders);
    }

    check_headers_present(&headers, &signed_headers)?;

    // check selector and domain

    let limits = &request.limits;

    if request.selector.len() > limits.max_selector_len {
        trace!("selector exceeds {} octets", limits.max_selector_len);
        return Err(SignerError::RessourceUnavailable);
    }
    if request.domain.len() > limits.max_domain_len {
        trace!("domain exceeds {} octets", limits.max_domain_len);
        return Err(SignerError::RessourceUnavailable);
    }
    if has_long_label(&request.selector, limits.max_label_len)
        || has_long_label(&request.domain, limits.max_label_len)
    {
        trace!("selector or domain label exceeds {} octets", limits.max_label_len);
        return Err(SignerError::RessourceUnavailable);
    }

    let selector = Selector::new(&request.selector).map_err(|_| SignerError::UnableToSign)?;
    let domain = DomainName::new(&request.domain).map_err(|_| SignerError::UnableToSign)?;

    // load the key for the duration of this signing operation

    let signing_key = SigningKey::from_pem(request.signing_key.as_ref())?;

    let algorithm = match request.algorithm {
        Some(algorithm) => {
            if algorithm.key_type() != signing_key.key_type() {
                trace!("algorithm {algorithm} incompatible with signing key");
                return Err(SignerError::UnableToSign);
            }
            algorithm
        }
        None => SignatureAlgorithm::from_parts(signing_key.key_type(), HashAlgorithm::Sha256)
            .ok_or(SignerError::InternalError)?,
    };

    let canonicalization = if request.normalized {
        request.canonicalization
    } else {
        trace!("signing headers verbatim with simple canonicalization");
        Canonicalization {
            header: CanonicalizationAlgorithm::Simple,
            ..request.canonicalization
        }
    };
    let hash_alg = algorithm.hash_algorithm();

    // calculate body hash

    let body = message.body();
    let body = if request.normalized {
        util::normalize_line_endings(body)
    } else {
        body.into()
    };

    let mut body_hasher = BodyHasher::new(hash_alg, canonicalization.body);
    body_hasher.hash_chunk(&body);
    let (body_hash, body_len) = body_hasher.finish();

    debug!(
        "computed {} body hash over {body_len} canonical body bytes",
        canonicalization.body.canonical_str()
    );

    // calculate timestamp

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => now_unix_secs(),
        Timestamp::Exact(t) => t,
    });

    // prepare complete formatted signature header with body hash except with contents of b= tag

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash,
        canonicalization,
        domain,
        selector,
        timestamp,
        signed_headers: signed_headers.into(),
    };

    produce_signature(sig, &signing_key, request, &headers)
}

fn has_long_label(name: &str, max_len: usize) -> bool {
    name.split('.').any(|label| label.len() > max_len)
}

fn produce_signature<T>(
    sig: UnsignedDkimSignature,
    signing_key: &SigningKey,
    request: &SignRequest<T>,
    headers: &HeaderFields,
) -> Result<SigningResult, SignerError> {
    let format = &request.format;
    let header_name = &format.header_name;
    let start = header_name.chars().count() + 1;
    let width = format.line_width.map(usize::from);

    let b_len = estimate_b_tag_length(signing_key);

    let (mut formatted_header_value, insertion_index) =
        sig.format_without_signature(start, width, &format.indentation, b_len);

    let header_len = header_name.len() + 1 + formatted_header_value.len() + b_len;
    if header_len > request.limits.max_header_len {
        trace!(
            "signature header of {header_len} octets exceeds {} octets",
            request.limits.max_header_len
        );
        return Err(SignerError::RessourceUnavailable);
    }

    let algorithm = sig.algorithm;
    let hash_alg = algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        header_name,
        &formatted_header_value,
    );

    let signature_data = signing_key.sign_digest(hash_alg, &data_hash)?;

    trace!("{} signing successful", algorithm.canonical_str());

    let sig = sig.into_signature(signature_data.into_boxed_slice());

    // insert signature into formatted dkim-sig header

    format::insert_signature_data(
        &mut formatted_header_value,
        insertion_index,
        start,
        &sig.signature_data,
        width,
        &format.indentation,
    );

    debug!("created signature for domain {} with selector {}", sig.domain, sig.selector);

    Ok(SigningResult {
        header_name: header_name.clone(),
        header_value: formatted_header_value,
        signature: sig,
    })
}

fn snapshot_headers<M: Message + ?Sized>(message: &M, normalized: bool) -> HeaderFields {
    message
        .header_fields()
        .into_iter()
        .map(|(name, value)| {
            let value = if normalized {
                util::normalize_line_endings(value).into_owned()
            } else {
                value.to_vec()
            };
            (name.into(), value.into_boxed_slice())
        })
        .collect()
}

fn select_signed_headers(headers: &HeaderFields) -> Vec<FieldName> {
    let def: HashSet<_> = signer::default_signed_headers().into_iter().collect();

    signer::select_headers(headers, move |name| {
        FieldName::new(name).map_or(false, |name| def.contains(&name))
    })
    .filter_map(|name| FieldName::new(name).ok())
    .collect()
}

// Every occurrence of a name in the selection requires one occurrence of that
// header in the message.
fn check_headers_present(
    headers: &HeaderFields,
    signed_headers: &[FieldName],
) -> Result<(), SignerError> {
    let mut checked = HashSet::new();

    for name in signed_headers {
        if !checked.insert(name) {
            continue;
        }

        let requested = signed_headers.iter().filter(|n| *n == name).count();
        let available = headers.count(name);

        if requested > available {
            trace!("header {name} requested {requested} times, but present {available} times");
            return Err(SignerError::SpecifiedHeaderDoesNotExistsInProvidedMessage);
        }
    }

    Ok(())
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}

fn estimate_b_tag_length(signing_key: &SigningKey) -> usize {
    let n = signing_key.signature_length();
    // n is the signature length in bytes, now compute the length of the
    // base64-encoded value:
    (n + 2) / 3 * 4
}
