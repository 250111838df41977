// SPDX-License-Identifier: Apache-2.0

//! Asset tag issuance round trip and input validation.

use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha384};
use x509_parser::prelude::{FromDer, X509Certificate};

use asset_tag::{
    create_asset_tag, decode_attribute, deploy_asset_tag, TagCertConfig, TagKvAttribute,
};
use trustd_types::mem::MemHostConnector;
use trustd_types::Error;

const HW_UUID: &str = "803f6068-06da-e811-906e-00163566263e";

fn tag_ca() -> &'static (String, String) {
    static CA: std::sync::OnceLock<(String, String)> = std::sync::OnceLock::new();
    CA.get_or_init(|| {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key");
        let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
        let keypair =
            rcgen::KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA384).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "trustd Tag CA");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&keypair).unwrap();
        (key_pem, cert.pem())
    })
}

fn config() -> TagCertConfig {
    let (key_pem, ca_pem) = tag_ca().clone();
    TagCertConfig {
        subject_uuid: HW_UUID.to_string(),
        tag_attributes: vec![
            TagKvAttribute {
                key: "Country".to_string(),
                value: "US".to_string(),
            },
            TagKvAttribute {
                key: "Country".to_string(),
                value: "India".to_string(),
            },
        ],
        validity_seconds: 1000,
        private_key_pem: key_pem,
        ca_cert_pem: ca_pem,
    }
}

#[test]
fn created_tag_round_trips_subject_and_attributes() {
    let cfg = config();
    let der = create_asset_tag(&cfg).unwrap();

    let (_, cert) = X509Certificate::from_der(&der).unwrap();
    assert_eq!(
        cert.subject().iter_common_name().next().unwrap().as_str(),
        Ok(HW_UUID)
    );

    let decoded: Vec<TagKvAttribute> = cert
        .extensions()
        .iter()
        .filter(|e| e.oid.to_id_string() == "2.5.4.789.1")
        .map(|e| decode_attribute(e.value).unwrap())
        .collect();
    assert_eq!(decoded, cfg.tag_attributes);
}

#[test]
fn validation_failures_win_in_declaration_order() {
    let mut cfg = config();
    cfg.subject_uuid = String::new();
    cfg.tag_attributes = Vec::new();
    // Both are wrong; the subject UUID error must win.
    let err = create_asset_tag(&cfg).unwrap_err();
    assert!(matches!(&err, Error::InvalidInput(m) if m.contains("Subject UUID")));

    let mut cfg = config();
    cfg.tag_attributes = Vec::new();
    let err = create_asset_tag(&cfg).unwrap_err();
    assert!(matches!(&err, Error::InvalidInput(m) if m.contains("Tag key-value attributes")));

    let mut cfg = config();
    cfg.validity_seconds = 0;
    let err = create_asset_tag(&cfg).unwrap_err();
    assert!(
        matches!(&err, Error::InvalidInput(m) if m.contains("Certificate validity in seconds"))
    );

    let mut cfg = config();
    cfg.private_key_pem = String::new();
    let err = create_asset_tag(&cfg).unwrap_err();
    assert!(matches!(&err, Error::InvalidInput(m) if m.contains("Private key")));

    let mut cfg = config();
    cfg.ca_cert_pem = String::new();
    let err = create_asset_tag(&cfg).unwrap_err();
    assert!(matches!(&err, Error::InvalidInput(m) if m.contains("Tag CA-Certificate")));
}

#[test]
fn validity_window_matches_configuration() {
    let cfg = config();
    let der = create_asset_tag(&cfg).unwrap();
    let (_, cert) = X509Certificate::from_der(&der).unwrap();
    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    assert_eq!(not_after - not_before, cfg.validity_seconds as i64);
}

#[tokio::test]
async fn deploy_hands_digest_to_connector() {
    let connector = MemHostConnector::default();
    let der = create_asset_tag(&config()).unwrap();
    let digest = hex::encode(Sha384::digest(&der));

    // Trailing whitespace in the digest is tolerated.
    deploy_asset_tag(&connector, &format!("{digest}\n"), HW_UUID)
        .await
        .unwrap();

    let deployed = connector.deployed_tags();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].0.to_string(), HW_UUID);
    assert_eq!(hex::encode(&deployed[0].1), digest);
}

#[tokio::test]
async fn deploy_rejects_empty_arguments() {
    let connector = MemHostConnector::default();
    let err = deploy_asset_tag(&connector, "", HW_UUID).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = deploy_asset_tag(&connector, "aabb", "").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = deploy_asset_tag(&connector, "aabb", "not-a-uuid")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(connector.deployed_tags().is_empty());
}
