pub mod common;

use dkim_signer::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, HashAlgorithm, KeyType, SigningKey},
    header::FieldName,
    message_hash, CanonicalizationAlgorithm, HeaderSelection, Message, SignRequest, Signer,
    Timestamp,
};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;

// These tests exercise the low-level APIs, assembling a signature by hand
// without going through `Signer`, and comparing with what `Signer` produces.

#[tokio::test]
async fn low_level_sign() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();
    let headers = common::header_fields(&message, true);

    let hash_alg = HashAlgorithm::Sha256;
    let canon_alg = CanonicalizationAlgorithm::Relaxed;

    // canonicalize body and hash it
    let mut bc = BodyCanonicalizer::new(canon_alg);
    let mut cbody = bc.canonicalize_chunk(message.body());
    cbody.extend(bc.finish());
    let body_hash = dkim_signer::encode_base64(crypto::digest(hash_alg, &cbody));

    let sig_name = "DKIM-Signature";
    let mut sig_value = format!(
        " v=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=sel; t=1686737001; \
        h=From:To; bh={body_hash}; b="
    );

    let selected_headers = [
        FieldName::new("From").unwrap(),
        FieldName::new("To").unwrap(),
    ];

    // compute data hash

    let cheaders = canonicalize::canonicalize_headers(canon_alg, &headers, &selected_headers);
    let csig = canonicalize::canonicalize_header(sig_name, &sig_value, canon_alg);

    let data = message_hash::signing_input(&cheaders, &csig);

    // the signature header itself is not terminated with CRLF
    assert!(data.starts_with(b"from:me <me@gluet.ch>\r\nto:you@example.com\r\ndkim-signature:"));
    assert!(data.ends_with(b"; b="));

    let data_hash = crypto::digest(hash_alg, &data);

    // sign data hash

    let key = common::read_key_file("tests/keys/rsa2048.pem").await.unwrap();
    let signing_key = SigningKey::from_pem(&key).unwrap();
    assert_eq!(signing_key.key_type(), KeyType::Rsa);

    let signature = match &signing_key {
        SigningKey::Rsa(k) => crypto::sign_rsa(hash_alg, k, &data_hash).unwrap(),
        _ => panic!(),
    };

    // check with the public key

    let public_key = match &signing_key {
        SigningKey::Rsa(k) => RsaPublicKey::from(k),
        _ => panic!(),
    };
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &data_hash, &signature)
        .unwrap();

    // append to sig_value

    sig_value.push_str(&dkim_signer::encode_base64(&signature));

    // the same header is produced by the signer

    let mut request = SignRequest::new(
        "sel",
        "example.com",
        &key[..],
        HeaderSelection::Manual(vec!["From".into(), "To".into()]),
    );
    request.timestamp = Some(Timestamp::Exact(1686737001));

    let result = Signer::new(request).sign(&message).unwrap();

    assert_eq!(result.header_value, sig_value);
}

#[tokio::test]
async fn low_level_sign_ed25519() {
    let message = common::make_example_message();
    let headers = common::header_fields(&message, true);

    let key = common::read_key_file("tests/keys/ed25519.pem").await.unwrap();
    let signing_key = SigningKey::from_pem(&key).unwrap();

    assert_eq!(signing_key.key_type(), KeyType::Ed25519);
    assert_eq!(signing_key.signature_length(), 64);

    let canon_alg = CanonicalizationAlgorithm::Simple;

    let cheaders =
        canonicalize::canonicalize_headers(canon_alg, &headers, &[FieldName::new("From").unwrap()]);

    assert_eq!(cheaders.len(), 1);
    assert_eq!(
        cheaders[0].to_bytes(),
        b"From: Example <example@example.com>\r\n        "
    );

    let csig = canonicalize::canonicalize_header("DKIM-Signature", " v=1; b=", canon_alg);
    let data = message_hash::signing_input(&cheaders, &csig);

    let signature = signing_key.sign(HashAlgorithm::Sha256, &data).unwrap();
    let data_hash = crypto::digest(HashAlgorithm::Sha256, &data);

    assert_eq!(
        signing_key.sign_digest(HashAlgorithm::Sha256, &data_hash).unwrap(),
        signature
    );
}
