// SPDX-License-Identifier: Apache-2.0

//! The two-round identity protocol engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{Months, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use trustd_certs::issue::{self, CertTemplate, RawExtension};
use trustd_certs::{CertRole, CertStore};
use trustd_types::stores::TpmEndorsementStore;
use trustd_types::{Error, IdentityChallengePayload, IdentityProofRequest, Result};

use crate::challenge::{ChallengeRecord, ChallengeStore};
use crate::credential;
use crate::ek::{common_name, EkTrustStatus, EndorsementAuthority};
use crate::envelope;

/// OID of the subject-alternative-name extension carrying the raw AIK name.
const SAN_OID: &[u64] = &[2, 5, 29, 17];

const CHALLENGE_NONCE_LEN: usize = 32;

fn default_validity_years() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyCaConfig {
    /// Directory holding in-flight challenge records. Must be per-service;
    /// it is created with mode 0700.
    pub challenge_dir: PathBuf,
    /// AIK certificate validity in years.
    #[serde(default = "default_validity_years")]
    pub validity_years: u32,
}

/// The privacy-CA engine. Stateless between rounds apart from the on-disk
/// challenge records; the signing key is read from the provider on every
/// round so provider reloads take effect immediately.
pub struct PrivacyCa {
    certs: Arc<CertStore>,
    endorsements: Arc<dyn TpmEndorsementStore>,
    challenges: ChallengeStore,
    validity_years: u32,
}

impl PrivacyCa {
    pub fn new(
        certs: Arc<CertStore>,
        endorsements: Arc<dyn TpmEndorsementStore>,
        config: PrivacyCaConfig,
    ) -> Self {
        Self {
            certs,
            endorsements,
            challenges: ChallengeStore::new(config.challenge_dir),
            validity_years: config.validity_years,
        }
    }

    pub fn challenge_store(&self) -> &ChallengeStore {
        &self.challenges
    }

    /// Round one: validate the EK, persist a challenge record and answer
    /// with a credential whose value is a fresh 32-byte nonce.
    pub async fn get_challenge(
        &self,
        payload: &IdentityChallengePayload,
    ) -> Result<IdentityProofRequest> {
        let pca_key = self
            .certs
            .private_key(CertRole::PrivacyCa)
            .map_err(Error::crypto)?;

        let ek_cert_der = envelope::open_challenge_payload(&pca_key, payload).map_err(|e| {
            debug!("round-1 envelope rejected: {e:#}");
            Error::invalid_input("unable to decrypt identity challenge payload")
        })?;

        let ek_public = {
            let (_, ek_cert) = X509Certificate::from_der(&ek_cert_der)
                .map_err(|_| Error::invalid_input("malformed endorsement certificate"))?;

            let authority = EndorsementAuthority::new(
                self.certs
                    .certificates(CertRole::EndorsementCa)
                    .map_err(Error::crypto)?,
            );
            let status = authority
                .verify(&ek_cert_der, self.endorsements.as_ref())
                .await?;
            if status == EkTrustStatus::Untrusted {
                warn!(
                    target: "security",
                    issuer = %common_name(ek_cert.issuer()),
                    "endorsement certificate is not trusted by any authority or registration"
                );
                return Err(Error::EkUntrusted);
            }
            debug!(?status, "endorsement certificate accepted");
            rsa_public_from_cert(&ek_cert)
                .map_err(|_| Error::invalid_input("endorsement certificate key is not RSA"))?
        };

        let mut nonce = [0u8; CHALLENGE_NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| Error::crypto(anyhow!("failed to draw challenge nonce: {e}")))?;

        self.challenges
            .store(
                &nonce,
                &ChallengeRecord {
                    ek_cert_der,
                    aik_modulus: payload.identity_request.aik_modulus.clone(),
                    aik_name: payload.identity_request.aik_name.clone(),
                },
            )
            .map_err(Error::storage)?;

        credential::seal_payload(&ek_public, &payload.identity_request.aik_name, &nonce)
            .map_err(Error::crypto)
    }

    /// Round two: the recovered plaintext must be a previously issued nonce;
    /// answer with the AIK certificate sealed against the recorded EK.
    /// Challenges are single use.
    pub async fn submit_response(
        &self,
        payload: &IdentityChallengePayload,
    ) -> Result<IdentityProofRequest> {
        let pca_key = self
            .certs
            .private_key(CertRole::PrivacyCa)
            .map_err(Error::crypto)?;
        let pca_cert_der = self.certs.leaf(CertRole::PrivacyCa).map_err(Error::crypto)?;

        let nonce = envelope::open_challenge_payload(&pca_key, payload).map_err(|e| {
            debug!("round-2 envelope rejected: {e:#}");
            Error::invalid_input("unable to decrypt identity challenge payload")
        })?;

        let stem = hex::encode(&nonce);
        let record = self
            .challenges
            .load(&stem)
            .map_err(Error::storage)?
            .ok_or_else(|| {
                warn!("challenge response does not match any outstanding challenge");
                Error::UnknownChallenge
            })?;

        let aik_cert = self.certify_aik(&pca_key, &pca_cert_der, &record)?;

        let ek_public = {
            let (_, ek_cert) = X509Certificate::from_der(&record.ek_cert_der)
                .map_err(|e| Error::crypto(anyhow!("stored EK certificate unparseable: {e}")))?;
            rsa_public_from_cert(&ek_cert).map_err(Error::crypto)?
        };

        let proof = credential::seal_payload(&ek_public, &record.aik_name, &aik_cert)
            .map_err(Error::crypto)?;

        // Consume the record; a failed delete must not fail the request,
        // replays are still rejected by the load above once it succeeds.
        if let Err(e) = self.challenges.remove(&stem) {
            warn!("failed to delete consumed challenge record: {e:#}");
        }
        info!("issued AIK certificate");
        Ok(proof)
    }

    /// Issue the AIK certificate: empty subject, issuer common name copied
    /// from the privacy-CA certificate's issuer, a random 128-bit serial and
    /// a single non-critical SAN extension holding the raw AIK name.
    fn certify_aik(
        &self,
        pca_key: &RsaPrivateKey,
        pca_cert_der: &[u8],
        record: &ChallengeRecord,
    ) -> Result<Vec<u8>> {
        let (_, pca_cert) = X509Certificate::from_der(pca_cert_der)
            .map_err(|e| Error::crypto(anyhow!("privacy-CA certificate unparseable: {e}")))?;
        let issuer_cn = common_name(pca_cert.issuer());

        let aik_public = RsaPublicKey::new(
            BigUint::from_bytes_be(&record.aik_modulus),
            BigUint::from(65537u32),
        )
        .map_err(|_| Error::invalid_input("AIK modulus is not a usable RSA modulus"))?;
        let spki_der = issue::rsa_spki_der(&aik_public).map_err(Error::crypto)?;

        let mut serial = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut serial)
            .map_err(|e| Error::crypto(anyhow!("failed to draw serial number: {e}")))?;

        let not_before = Utc::now();
        let not_after = not_before
            .checked_add_months(Months::new(self.validity_years * 12))
            .context("AIK validity overflows the calendar")
            .map_err(Error::crypto)?;

        issue::issue(
            &CertTemplate {
                serial: &serial,
                issuer_cn: &issuer_cn,
                subject_cn: None,
                not_before,
                not_after,
                spki_der: &spki_der,
                extensions: &[RawExtension {
                    oid: SAN_OID.to_vec(),
                    critical: false,
                    value: record.aik_name.clone(),
                }],
            },
            pca_key,
        )
        .map_err(Error::crypto)
    }
}

const OID_RSA_ENCRYPTION: &[u64] = &[1, 2, 840, 113549, 1, 1, 1];

fn rsa_public_from_cert(cert: &X509Certificate<'_>) -> anyhow::Result<RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;

    let spki = cert.public_key();
    let oid: Vec<u64> = spki
        .algorithm
        .algorithm
        .iter()
        .ok_or_else(|| anyhow!("invalid public key algorithm OID"))?
        .collect();
    if oid != OID_RSA_ENCRYPTION {
        return Err(anyhow!("certificate does not carry an RSA key"));
    }
    RsaPublicKey::from_pkcs1_der(spki.subject_public_key.data.as_ref())
        .context("failed to decode RSA public key from certificate")
}
