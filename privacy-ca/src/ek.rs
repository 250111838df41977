// SPDX-License-Identifier: Apache-2.0

//! Endorsement-key authority.
//!
//! An EK certificate is trusted when it chains to one of the configured
//! endorsement authorities, or when an exact copy has been registered in the
//! endorsement store. The issuer-matched fast path comes first; trying the
//! whole pool second tolerates TPMs with mis-populated issuer fields.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use trustd_types::stores::{TpmEndorsementFilter, TpmEndorsementStore};
use trustd_types::{Error, Result as CoreResult};

/// Outcome of an EK trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EkTrustStatus {
    /// The certificate chains to a configured endorsement authority.
    TrustedChain,
    /// An identical certificate is registered in the endorsement store.
    TrustedByRegistry,
    Untrusted,
}

/// Validates EK certificates against a pool of authority certificates and
/// the endorsement registry.
pub struct EndorsementAuthority {
    authorities: Vec<Vec<u8>>,
}

impl EndorsementAuthority {
    /// `authorities` are the DER certificates of the configured
    /// endorsement-CA pool.
    pub fn new(authorities: Vec<Vec<u8>>) -> Self {
        Self { authorities }
    }

    pub async fn verify(
        &self,
        ek_der: &[u8],
        registry: &dyn TpmEndorsementStore,
    ) -> CoreResult<EkTrustStatus> {
        let (_, ek) = X509Certificate::from_der(ek_der)
            .map_err(|_| Error::invalid_input("malformed endorsement certificate"))?;

        let issuer_cn = common_name(ek.issuer());
        // Fast path: the authority whose subject matches the EK issuer.
        for authority_der in &self.authorities {
            let Ok((_, authority)) = X509Certificate::from_der(authority_der) else {
                warn!("skipping unparseable endorsement authority certificate");
                continue;
            };
            if common_name(authority.subject()) == issuer_cn
                && ek.verify_signature(Some(authority.public_key())).is_ok()
            {
                return Ok(EkTrustStatus::TrustedChain);
            }
        }

        // Issuer fields lie sometimes; try every authority in the pool.
        for authority_der in &self.authorities {
            let Ok((_, authority)) = X509Certificate::from_der(authority_der) else {
                continue;
            };
            if ek.verify_signature(Some(authority.public_key())).is_ok() {
                debug!("EK verified by authority with non-matching subject");
                return Ok(EkTrustStatus::TrustedChain);
            }
        }

        // Air-gapped TPMs: the exact certificate may be registered directly.
        if self.is_registered(ek_der, &ek, registry).await? {
            return Ok(EkTrustStatus::TrustedByRegistry);
        }

        Ok(EkTrustStatus::Untrusted)
    }

    async fn is_registered(
        &self,
        ek_der: &[u8],
        ek: &X509Certificate<'_>,
        registry: &dyn TpmEndorsementStore,
    ) -> CoreResult<bool> {
        let issuer = normalized_issuer(ek);
        let registered = registry
            .search(&TpmEndorsementFilter {
                issuer_equal_to: Some(issuer.clone()),
            })
            .await?;
        if registered.is_empty() {
            debug!(issuer, "no registered endorsement certificates for issuer");
            return Ok(false);
        }
        for entry in &registered {
            match decode_registered_certificate(&entry.certificate) {
                Ok(der) => {
                    if der == ek_der {
                        return Ok(true);
                    }
                }
                Err(e) => warn!("skipping undecodable registered endorsement: {e:#}"),
            }
        }
        Ok(false)
    }
}

/// First common name of an X.509 name, with embedded NULs stripped.
pub fn common_name(name: &x509_parser::x509::X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .replace('\u{0}', "")
}

/// Full issuer distinguished name with all whitespace removed, the form
/// under which endorsements are registered.
pub fn normalized_issuer(cert: &X509Certificate<'_>) -> String {
    cert.issuer()
        .to_string()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Registered endorsements are stored base64-over-PEM.
fn decode_registered_certificate(encoded: &str) -> Result<Vec<u8>> {
    let pem_bytes = BASE64
        .decode(encoded.trim())
        .context("invalid base64 in registered endorsement")?;
    let block = pem::parse(&pem_bytes).context("invalid PEM in registered endorsement")?;
    if block.tag() != "CERTIFICATE" {
        return Err(anyhow!("unexpected PEM tag {}", block.tag()));
    }
    Ok(block.contents().to_vec())
}
