// SPDX-License-Identifier: Apache-2.0

//! Flavor verifier: scores one host manifest against one signed flavor.
//!
//! Every rule evaluation yields a [`trustd_types::RuleResult`]; deviations
//! become faults on the result, never errors. The flavor's verdict is the
//! conjunction of its rule results.

pub mod rules;
mod signature;

pub use signature::sign_flavor;

use tracing::debug;
use trustd_types::{FlavorRule, HostManifest, SignedFlavor, TrustReport};

/// Trust anchors the rules verify against, all DER. Absent anchors turn the
/// corresponding rules into faults rather than panics or errors.
#[derive(Debug, Clone, Default)]
pub struct VerifierCerts {
    /// Certificate the flavor signatures chain to.
    pub flavor_signing: Option<Vec<u8>>,
    /// Privacy-CA certificate anchoring AIK certificates.
    pub privacy_ca: Option<Vec<u8>>,
    /// Tag-CA certificate anchoring asset tag certificates.
    pub tag_ca: Option<Vec<u8>>,
}

pub struct FlavorVerifier {
    certs: VerifierCerts,
}

impl FlavorVerifier {
    pub fn new(certs: VerifierCerts) -> Self {
        Self { certs }
    }

    /// Evaluate `signed` against `manifest`. When `verify_signature` is set
    /// the flavor's own signature is checked first and reported as a
    /// `FlavorTrusted` rule result.
    pub fn verify(
        &self,
        manifest: &HostManifest,
        signed: &SignedFlavor,
        verify_signature: bool,
    ) -> TrustReport {
        let meta = &signed.flavor.meta;
        let mut report = TrustReport::new(manifest.clone());

        if verify_signature {
            report.add_result(rules::flavor_trusted(
                signed,
                self.certs.flavor_signing.as_deref(),
                meta,
            ));
        }

        for rule in &signed.flavor.rules {
            let result = match rule {
                FlavorRule::PcrMatchesConstant { pcr } => {
                    rules::pcr_matches_constant(manifest, pcr, meta)
                }
                FlavorRule::PcrEventLogEqualsExcluding {
                    pcr,
                    entries,
                    exclude_labels,
                } => rules::pcr_event_log_equals_excluding(
                    manifest,
                    pcr,
                    entries,
                    exclude_labels,
                    meta,
                ),
                FlavorRule::PcrEventLogIntegrity { pcr } => {
                    rules::pcr_event_log_integrity(manifest, pcr, meta)
                }
                FlavorRule::AikCertificateTrusted => rules::aik_certificate_trusted(
                    manifest,
                    self.certs.privacy_ca.as_deref(),
                    meta,
                ),
                FlavorRule::AssetTagMatches { expected_digest } => rules::asset_tag_matches(
                    manifest,
                    expected_digest,
                    self.certs.tag_ca.as_deref(),
                    meta,
                ),
            };
            report.add_result(result);
        }
        debug!(
            flavor = %meta.id,
            part = %meta.part,
            trusted = report.is_trusted(),
            results = report.results.len(),
            "evaluated flavor"
        );
        report
    }
}
