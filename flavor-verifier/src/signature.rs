// SPDX-License-Identifier: Apache-2.0

//! Flavor and certificate signature checks.

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha384};
use x509_parser::prelude::{FromDer, X509Certificate};

use trustd_types::{Flavor, SignedFlavor};

/// Sign a flavor's canonical bytes (SHA-384, RSA PKCS#1 v1.5). The flavor
/// service uses this at creation time; tests use it to build fixtures.
pub fn sign_flavor(flavor: &Flavor, key: &RsaPrivateKey) -> Result<String> {
    let bytes = flavor
        .canonical_bytes()
        .context("failed to serialize flavor")?;
    let digest = Sha384::digest(&bytes);
    let signature = key
        .sign(Pkcs1v15Sign::new::<Sha384>(), &digest)
        .context("failed to sign flavor")?;
    Ok(BASE64.encode(signature))
}

pub(crate) fn verify_flavor_signature(signed: &SignedFlavor, cert_der: &[u8]) -> Result<()> {
    if signed.signature.trim().is_empty() {
        bail!("flavor carries no signature");
    }
    let signature = BASE64
        .decode(signed.signature.trim())
        .context("flavor signature is not valid base64")?;
    let bytes = signed
        .flavor
        .canonical_bytes()
        .context("failed to serialize flavor")?;
    let digest = Sha384::digest(&bytes);
    let key = rsa_public_from_cert_der(cert_der)?;
    key.verify(Pkcs1v15Sign::new::<Sha384>(), &digest, &signature)
        .context("flavor signature does not verify")
}

/// Check that `cert_der` is signed by `issuer_der` and currently valid.
pub(crate) fn verify_cert_issued_by(cert_der: &[u8], issuer_der: &[u8]) -> Result<()> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| anyhow!("unparseable certificate: {e}"))?;
    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| anyhow!("unparseable issuer certificate: {e}"))?;
    cert.verify_signature(Some(issuer.public_key()))
        .map_err(|e| anyhow!("certificate signature does not verify: {e}"))?;
    if !cert.validity().is_valid() {
        bail!("certificate is outside its validity window");
    }
    Ok(())
}

const OID_RSA_ENCRYPTION: &[u64] = &[1, 2, 840, 113549, 1, 1, 1];

pub(crate) fn rsa_public_from_cert_der(cert_der: &[u8]) -> Result<RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;

    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| anyhow!("unparseable certificate: {e}"))?;
    let spki = cert.public_key();
    let oid: Vec<u64> = spki
        .algorithm
        .algorithm
        .iter()
        .ok_or_else(|| anyhow!("invalid public key algorithm OID"))?
        .collect();
    if oid != OID_RSA_ENCRYPTION {
        bail!("certificate does not carry an RSA key");
    }
    RsaPublicKey::from_pkcs1_der(spki.subject_public_key.data.as_ref())
        .context("failed to decode RSA public key from certificate")
}
