use dkim_signer::{
    canonicalize,
    crypto::{self, HashAlgorithm, SigningKey},
    message_hash, EmailMessage, HeaderFields, Message, SigningResult,
};
use ed25519_dalek::{Signature, Verifier};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use std::io;
use tokio::fs;

pub async fn read_key_file(file_name: &str) -> io::Result<Vec<u8>> {
    fs::read(file_name).await
}

/// A short message with bare LF line endings, where the only header field is
/// continued by a whitespace-only line.
pub fn make_example_message() -> EmailMessage {
    EmailMessage::parse("From: Example <example@example.com>\n        \nThis is a message body.  Fun!\n")
}

pub fn make_message() -> EmailMessage {
    EmailMessage::parse(
        "\
Message-ID: <1511928109048645963@gluet.ch>\r
Date: Fri, 9 Jun 2023 16:13:12 +0200\r
MIME-Version: 1.0\r
Content-Type: text/plain; charset=utf-8\r
References: <4344283917108237944@example.com>\r
 <3993077819152979884@gluet.ch>\r
In-Reply-To: <3993077819152979884@gluet.ch>\r
From: me <me@gluet.ch>\r
To: you@example.com\r
Subject:   wie   gohts?\r
\r
Hallo!\r
\r
Here is some trailing whitespace:  \r
  <- and some leading whitespace\r
\r
Das wars!\r
\r
\r
",
    )
}

/// Returns the header fields the way the signer sees them.
pub fn header_fields(message: &EmailMessage, normalized: bool) -> HeaderFields {
    message
        .header_fields()
        .into_iter()
        .map(|(name, value)| {
            let value = if normalized {
                dkim_signer::normalize_line_endings(value).into_owned()
            } else {
                value.to_vec()
            };
            (name.into(), value.into_boxed_slice())
        })
        .collect()
}

/// Returns the header value with the *b=* tag value removed.
pub fn strip_b_tag_value(header_value: &str) -> &str {
    let i = header_value
        .match_indices("b=")
        .find(|(i, _)| matches!(header_value.as_bytes().get(i.wrapping_sub(1)), Some(b' ' | b'\t')))
        .map(|(i, _)| i + 2)
        .unwrap();
    &header_value[..i]
}

/// Verifies the signature and the body hash in the signing result against the
/// public key belonging to the given PEM-encoded private key.
pub fn verify(message: &EmailMessage, normalized: bool, result: &SigningResult, key_pem: &[u8]) {
    let sig = &result.signature;
    let hash_alg = sig.algorithm.hash_algorithm();

    // body hash
    let body = if normalized {
        dkim_signer::normalize_line_endings(message.body())
    } else {
        message.body().into()
    };
    let cbody = canonicalize::canonicalize_body(&body, sig.canonicalization.body);
    assert_eq!(message_hash::body_hash(hash_alg, &cbody), sig.body_hash);

    // signature
    let headers = header_fields(message, normalized);
    let canon = sig.canonicalization.header;
    let cheaders = canonicalize::canonicalize_headers(canon, &headers, &sig.signed_headers);
    let csig = canonicalize::canonicalize_header(
        &result.header_name,
        strip_b_tag_value(&result.header_value),
        canon,
    );
    let data = message_hash::signing_input(&cheaders, &csig);
    let data_hash = crypto::digest(hash_alg, &data);

    assert_eq!(hash_alg, HashAlgorithm::Sha256);

    match SigningKey::from_pem(key_pem).unwrap() {
        SigningKey::Rsa(k) => {
            let public_key = RsaPublicKey::from(&k);
            public_key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &data_hash, &sig.signature_data)
                .unwrap();
        }
        SigningKey::Ed25519(k) => {
            let signature = Signature::from_slice(&sig.signature_data).unwrap();
            k.verifying_key().verify(&data_hash, &signature).unwrap();
        }
    }
}
