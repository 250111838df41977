// SPDX-License-Identifier: Apache-2.0

//! Rule evaluation. Each function returns a [`RuleResult`] whose faults
//! describe every deviation found; an empty fault list means the rule holds.

use sha2::{Digest, Sha256, Sha384};

use trustd_types::{
    Fault, FlavorMeta, HostManifest, MeasurementEvent, PcrBank, PcrValue, RuleInfo, RuleResult,
    SignedFlavor,
};

use crate::signature;

pub const RULE_PCR_MATCHES_CONSTANT: &str = "PcrMatchesConstant";
pub const RULE_PCR_EVENT_LOG_EQUALS_EXCLUDING: &str = "PcrEventLogEqualsExcluding";
pub const RULE_PCR_EVENT_LOG_INTEGRITY: &str = "PcrEventLogIntegrity";
pub const RULE_FLAVOR_TRUSTED: &str = "FlavorTrusted";
pub const RULE_AIK_CERTIFICATE_TRUSTED: &str = "AikCertificateTrusted";
pub const RULE_ASSET_TAG_MATCHES: &str = "AssetTagMatches";
/// Synthetic rule the orchestrator reports when a flavor group's match
/// policy cannot be satisfied by any flavor in the store.
pub const RULE_FLAVOR_GROUP_REQUIREMENT: &str = "FlavorGroupRequirement";

pub const FAULT_PCR_MANIFEST_MISSING: &str = "PcrManifestMissing";
pub const FAULT_PCR_VALUE_MISMATCH: &str = "PcrValueMismatch";
pub const FAULT_PCR_EVENT_LOG_MISSING: &str = "PcrEventLogMissing";
pub const FAULT_PCR_EVENT_LOG_MISSING_EXPECTED_ENTRIES: &str = "PcrEventLogMissingExpectedEntries";
pub const FAULT_PCR_EVENT_LOG_CONTAINS_UNEXPECTED_ENTRIES: &str =
    "PcrEventLogContainsUnexpectedEntries";
pub const FAULT_PCR_EVENT_LOG_INVALID: &str = "PcrEventLogInvalid";
pub const FAULT_FLAVOR_SIGNATURE_NOT_TRUSTED: &str = "FlavorSignatureNotTrusted";
pub const FAULT_AIK_CERTIFICATE_MISSING: &str = "AikCertificateMissing";
pub const FAULT_AIK_CERTIFICATE_NOT_TRUSTED: &str = "AikCertificateNotTrusted";
pub const FAULT_ASSET_TAG_MISSING: &str = "AssetTagMissing";
pub const FAULT_ASSET_TAG_NOT_TRUSTED: &str = "AssetTagNotTrusted";
pub const FAULT_ASSET_TAG_MISMATCH: &str = "AssetTagMismatch";
pub const FAULT_FLAVOR_GROUP_POLICY_UNSATISFIED: &str = "FlavorGroupPolicyUnsatisfied";

fn rule_info(name: &str, meta: &FlavorMeta, expected_pcr: Option<PcrValue>) -> RuleInfo {
    RuleInfo {
        name: name.to_string(),
        markers: vec![meta.part],
        expected_pcr,
    }
}

pub fn pcr_matches_constant(
    manifest: &HostManifest,
    expected: &PcrValue,
    meta: &FlavorMeta,
) -> RuleResult {
    let mut faults = Vec::new();
    match manifest.pcr(expected.bank, expected.index) {
        None => faults.push(
            Fault::new(
                FAULT_PCR_MANIFEST_MISSING,
                format!(
                    "host manifest has no value for {} PCR {}",
                    expected.bank, expected.index
                ),
            )
            .with_pcr(expected.index),
        ),
        Some(actual) => {
            if !actual.value.eq_ignore_ascii_case(&expected.value) {
                faults.push(
                    Fault::new(
                        FAULT_PCR_VALUE_MISMATCH,
                        format!(
                            "{} PCR {} does not match the flavor constant",
                            expected.bank, expected.index
                        ),
                    )
                    .with_pcr(expected.index)
                    .with_expected(expected.value.to_lowercase())
                    .with_actual(actual.value.to_lowercase()),
                );
            }
        }
    }
    RuleResult::new(
        rule_info(RULE_PCR_MATCHES_CONSTANT, meta, Some(expected.clone())),
        Some(meta.id),
        faults,
    )
}

pub fn pcr_event_log_equals_excluding(
    manifest: &HostManifest,
    expected_pcr: &PcrValue,
    expected_entries: &[MeasurementEvent],
    exclude_labels: &[String],
    meta: &FlavorMeta,
) -> RuleResult {
    let info = rule_info(
        RULE_PCR_EVENT_LOG_EQUALS_EXCLUDING,
        meta,
        Some(expected_pcr.clone()),
    );
    let Some(log) = manifest.event_log(expected_pcr.bank, expected_pcr.index) else {
        let fault = Fault::new(
            FAULT_PCR_EVENT_LOG_MISSING,
            format!(
                "host manifest has no event log for {} PCR {}",
                expected_pcr.bank, expected_pcr.index
            ),
        )
        .with_pcr(expected_pcr.index);
        return RuleResult::new(info, Some(meta.id), vec![fault]);
    };

    let measured: Vec<&MeasurementEvent> = log
        .events
        .iter()
        .filter(|e| !exclude_labels.contains(&e.label))
        .collect();

    let missing: Vec<MeasurementEvent> = expected_entries
        .iter()
        .filter(|want| {
            !measured
                .iter()
                .any(|got| got.label == want.label && got.digest == want.digest)
        })
        .cloned()
        .collect();
    let unexpected: Vec<MeasurementEvent> = measured
        .iter()
        .filter(|got| {
            !expected_entries
                .iter()
                .any(|want| got.label == want.label && got.digest == want.digest)
        })
        .map(|e| (*e).clone())
        .collect();

    let mut faults = Vec::new();
    if !missing.is_empty() {
        let mut fault = Fault::new(
            FAULT_PCR_EVENT_LOG_MISSING_EXPECTED_ENTRIES,
            format!(
                "event log for PCR {} lacks {} expected entries",
                expected_pcr.index,
                missing.len()
            ),
        )
        .with_pcr(expected_pcr.index);
        fault.missing_entries = missing;
        faults.push(fault);
    }
    if !unexpected.is_empty() {
        let mut fault = Fault::new(
            FAULT_PCR_EVENT_LOG_CONTAINS_UNEXPECTED_ENTRIES,
            format!(
                "event log for PCR {} contains {} unexpected entries",
                expected_pcr.index,
                unexpected.len()
            ),
        )
        .with_pcr(expected_pcr.index);
        fault.unexpected_entries = unexpected;
        faults.push(fault);
    }
    RuleResult::new(info, Some(meta.id), faults)
}

pub fn pcr_event_log_integrity(
    manifest: &HostManifest,
    expected_pcr: &PcrValue,
    meta: &FlavorMeta,
) -> RuleResult {
    let info = rule_info(
        RULE_PCR_EVENT_LOG_INTEGRITY,
        meta,
        Some(expected_pcr.clone()),
    );
    let Some(reported) = manifest.pcr(expected_pcr.bank, expected_pcr.index) else {
        let fault = Fault::new(
            FAULT_PCR_MANIFEST_MISSING,
            format!(
                "host manifest has no value for {} PCR {}",
                expected_pcr.bank, expected_pcr.index
            ),
        )
        .with_pcr(expected_pcr.index);
        return RuleResult::new(info, Some(meta.id), vec![fault]);
    };
    let Some(log) = manifest.event_log(expected_pcr.bank, expected_pcr.index) else {
        let fault = Fault::new(
            FAULT_PCR_EVENT_LOG_MISSING,
            format!(
                "host manifest has no event log for {} PCR {}",
                expected_pcr.bank, expected_pcr.index
            ),
        )
        .with_pcr(expected_pcr.index);
        return RuleResult::new(info, Some(meta.id), vec![fault]);
    };

    let replayed = hex::encode(replay(expected_pcr.bank, &log.events));
    let mut faults = Vec::new();
    if !replayed.eq_ignore_ascii_case(&reported.value) {
        faults.push(
            Fault::new(
                FAULT_PCR_EVENT_LOG_INVALID,
                format!(
                    "replaying the event log does not reproduce {} PCR {}",
                    expected_pcr.bank, expected_pcr.index
                ),
            )
            .with_pcr(expected_pcr.index)
            .with_expected(reported.value.to_lowercase())
            .with_actual(replayed),
        );
    }
    RuleResult::new(info, Some(meta.id), faults)
}

pub fn flavor_trusted(
    signed: &SignedFlavor,
    flavor_signing_cert: Option<&[u8]>,
    meta: &FlavorMeta,
) -> RuleResult {
    let mut faults = Vec::new();
    match flavor_signing_cert {
        None => faults.push(Fault::new(
            FAULT_FLAVOR_SIGNATURE_NOT_TRUSTED,
            "no flavor-signing certificate is configured",
        )),
        Some(cert) => {
            if let Err(e) = signature::verify_flavor_signature(signed, cert) {
                faults.push(Fault::new(
                    FAULT_FLAVOR_SIGNATURE_NOT_TRUSTED,
                    format!("flavor signature rejected: {e:#}"),
                ));
            }
        }
    }
    RuleResult::new(
        rule_info(RULE_FLAVOR_TRUSTED, meta, None),
        Some(meta.id),
        faults,
    )
}

pub fn aik_certificate_trusted(
    manifest: &HostManifest,
    privacy_ca_cert: Option<&[u8]>,
    meta: &FlavorMeta,
) -> RuleResult {
    let info = rule_info(RULE_AIK_CERTIFICATE_TRUSTED, meta, None);
    if manifest.aik_certificate.is_empty() {
        let fault = Fault::new(
            FAULT_AIK_CERTIFICATE_MISSING,
            "host manifest carries no AIK certificate",
        );
        return RuleResult::new(info, Some(meta.id), vec![fault]);
    }
    let mut faults = Vec::new();
    match privacy_ca_cert {
        None => faults.push(Fault::new(
            FAULT_AIK_CERTIFICATE_NOT_TRUSTED,
            "no privacy-CA certificate is configured",
        )),
        Some(anchor) => {
            if let Err(e) = signature::verify_cert_issued_by(&manifest.aik_certificate, anchor) {
                faults.push(Fault::new(
                    FAULT_AIK_CERTIFICATE_NOT_TRUSTED,
                    format!("AIK certificate rejected: {e:#}"),
                ));
            }
        }
    }
    RuleResult::new(info, Some(meta.id), faults)
}

pub fn asset_tag_matches(
    manifest: &HostManifest,
    expected_digest: &str,
    tag_ca_cert: Option<&[u8]>,
    meta: &FlavorMeta,
) -> RuleResult {
    let info = rule_info(RULE_ASSET_TAG_MATCHES, meta, None);
    if manifest.asset_tag_certificate.is_empty() {
        let fault = Fault::new(
            FAULT_ASSET_TAG_MISSING,
            "host manifest carries no asset tag certificate",
        );
        return RuleResult::new(info, Some(meta.id), vec![fault]);
    }
    let mut faults = Vec::new();
    match tag_ca_cert {
        None => faults.push(Fault::new(
            FAULT_ASSET_TAG_NOT_TRUSTED,
            "no tag-CA certificate is configured",
        )),
        Some(anchor) => {
            if let Err(e) = signature::verify_cert_issued_by(&manifest.asset_tag_certificate, anchor)
            {
                faults.push(Fault::new(
                    FAULT_ASSET_TAG_NOT_TRUSTED,
                    format!("asset tag certificate rejected: {e:#}"),
                ));
            }
        }
    }
    let actual = hex::encode(Sha384::digest(&manifest.asset_tag_certificate));
    if !actual.eq_ignore_ascii_case(expected_digest) {
        faults.push(
            Fault::new(
                FAULT_ASSET_TAG_MISMATCH,
                "asset tag certificate digest does not match the flavor",
            )
            .with_expected(expected_digest.to_lowercase())
            .with_actual(actual),
        );
    }
    RuleResult::new(info, Some(meta.id), faults)
}

/// Replay an event log by folding each digest into an all-zero register.
fn replay(bank: PcrBank, events: &[MeasurementEvent]) -> Vec<u8> {
    match bank {
        PcrBank::Sha256 => replay_with::<Sha256>(events),
        PcrBank::Sha384 => replay_with::<Sha384>(events),
    }
}

fn replay_with<D: Digest>(events: &[MeasurementEvent]) -> Vec<u8> {
    let mut register = vec![0u8; <D as Digest>::output_size()];
    for event in events {
        let mut hasher = D::new();
        hasher.update(&register);
        hasher.update(&event.digest);
        register = hasher.finalize().to_vec();
    }
    register
}
