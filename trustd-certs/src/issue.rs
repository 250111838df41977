// SPDX-License-Identifier: Apache-2.0

//! Minimal X.509 v3 issuance.
//!
//! Certificate templates here are deliberately small: one common-name RDN
//! per side (or an empty subject), an arbitrary extension list written
//! verbatim, and a SHA-256/RSA signature. This is what the AIK certificate
//! profile needs; anything richer goes through `rcgen`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use yasna::models::{ObjectIdentifier, UTCTime};
use yasna::{DERWriter, Tag};

const OID_SHA256_WITH_RSA: &[u64] = &[1, 2, 840, 113549, 1, 1, 11];
const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];

/// An extension written into the certificate exactly as given; `value` is
/// the raw content of the extension OCTET STRING.
#[derive(Debug, Clone)]
pub struct RawExtension {
    pub oid: Vec<u64>,
    pub critical: bool,
    pub value: Vec<u8>,
}

/// Everything needed to issue a certificate.
#[derive(Debug, Clone)]
pub struct CertTemplate<'a> {
    /// Unsigned big-endian serial number.
    pub serial: &'a [u8],
    pub issuer_cn: &'a str,
    /// `None` yields an empty subject (identity carried elsewhere, e.g. in
    /// an extension).
    pub subject_cn: Option<&'a str>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// DER SubjectPublicKeyInfo of the certified key.
    pub spki_der: &'a [u8],
    pub extensions: &'a [RawExtension],
}

/// Issue a certificate from `template`, signed `sha256WithRSAEncryption`
/// by `signing_key`. Returns the DER encoding.
pub fn issue(template: &CertTemplate<'_>, signing_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let tbs = yasna::construct_der(|writer| write_tbs(writer, template));
    let digest = Sha256::digest(&tbs);
    let signature = signing_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .context("failed to sign certificate")?;
    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(&tbs);
            write_algorithm(writer.next());
            writer
                .next()
                .write_bitvec_bytes(&signature, signature.len() * 8);
        })
    }))
}

/// DER SubjectPublicKeyInfo for an RSA public key.
pub fn rsa_spki_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
    Ok(key
        .to_public_key_der()
        .context("failed to encode RSA public key")?
        .as_bytes()
        .to_vec())
}

/// Convenience for fixtures and bootstrap: a ten-year self-signed
/// certificate for `key` with `cn` on both sides and no extensions.
pub fn self_signed_ca(cn: &str, key: &RsaPrivateKey, serial: &[u8]) -> Result<Vec<u8>> {
    let not_before = Utc::now();
    let template = CertTemplate {
        serial,
        issuer_cn: cn,
        subject_cn: Some(cn),
        not_before,
        not_after: not_before + Duration::days(365 * 10),
        spki_der: &rsa_spki_der(&key.to_public_key())?,
        extensions: &[],
    };
    issue(&template, key)
}

fn write_tbs(writer: DERWriter, t: &CertTemplate<'_>) {
    writer.write_sequence(|writer| {
        // version v3
        writer
            .next()
            .write_tagged(Tag::context(0), |w| w.write_i64(2));
        writer.next().write_bigint_bytes(t.serial, true);
        write_algorithm(writer.next());
        write_name(writer.next(), Some(t.issuer_cn));
        writer.next().write_sequence(|w| {
            w.next().write_utctime(&UTCTime::from_datetime(
                time::OffsetDateTime::from_unix_timestamp(t.not_before.timestamp()).unwrap(),
            ));
            w.next().write_utctime(&UTCTime::from_datetime(
                time::OffsetDateTime::from_unix_timestamp(t.not_after.timestamp()).unwrap(),
            ));
        });
        write_name(writer.next(), t.subject_cn);
        writer.next().write_der(t.spki_der);
        if !t.extensions.is_empty() {
            writer.next().write_tagged(Tag::context(3), |w| {
                w.write_sequence(|w| {
                    for ext in t.extensions {
                        w.next().write_sequence(|w| {
                            w.next()
                                .write_oid(&ObjectIdentifier::from_slice(&ext.oid));
                            if ext.critical {
                                w.next().write_bool(true);
                            }
                            w.next().write_bytes(&ext.value);
                        });
                    }
                })
            });
        }
    })
}

fn write_algorithm(writer: DERWriter) {
    writer.write_sequence(|writer| {
        writer
            .next()
            .write_oid(&ObjectIdentifier::from_slice(OID_SHA256_WITH_RSA));
        writer.next().write_null();
    })
}

fn write_name(writer: DERWriter, cn: Option<&str>) {
    writer.write_sequence(|writer| {
        if let Some(cn) = cn {
            writer.next().write_set(|writer| {
                writer.next().write_sequence(|writer| {
                    writer
                        .next()
                        .write_oid(&ObjectIdentifier::from_slice(OID_COMMON_NAME));
                    writer.next().write_utf8_string(cn);
                });
            });
        }
    })
}
