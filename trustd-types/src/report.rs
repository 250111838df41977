// SPDX-License-Identifier: Apache-2.0

//! Trust report model returned by the flavor verifier and composed by the
//! host-trust orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flavor::FlavorPart;
use crate::manifest::{HostManifest, MeasurementEvent, PcrValue};

/// A single deviation found while evaluating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcr_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_entries: Vec<MeasurementEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected_entries: Vec<MeasurementEvent>,
}

impl Fault {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            pcr_index: None,
            expected_value: None,
            actual_value: None,
            missing_entries: Vec::new(),
            unexpected_entries: Vec::new(),
        }
    }

    pub fn with_pcr(mut self, index: u32) -> Self {
        self.pcr_index = Some(index);
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected_value = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual_value = Some(actual.into());
        self
    }
}

/// Description of the rule a result was produced by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub name: String,
    /// Flavor parts this rule was evaluated on behalf of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<FlavorPart>,
    /// Set for PCR-comparison rules; part of the result identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pcr: Option<PcrValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: RuleInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<Fault>,
    pub trusted: bool,
}

impl RuleResult {
    pub fn new(rule: RuleInfo, flavor_id: Option<Uuid>, faults: Vec<Fault>) -> Self {
        let trusted = faults.is_empty();
        Self {
            rule,
            flavor_id,
            faults,
            trusted,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Composed verdict over one host manifest.
///
/// A report is trusted iff it has at least one result and every result is
/// trusted; an empty report is untrusted by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustReport {
    pub host_manifest: HostManifest,
    #[serde(default)]
    pub results: Vec<RuleResult>,
}

impl TrustReport {
    pub fn new(host_manifest: HostManifest) -> Self {
        Self {
            host_manifest,
            results: Vec::new(),
        }
    }

    pub fn is_trusted(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.is_trusted())
    }

    pub fn is_trusted_for_marker(&self, marker: FlavorPart) -> bool {
        let mut any = false;
        for result in self.results_for_marker(marker) {
            any = true;
            if !result.is_trusted() {
                return false;
            }
        }
        any
    }

    pub fn results_for_marker(&self, marker: FlavorPart) -> impl Iterator<Item = &RuleResult> {
        self.results
            .iter()
            .filter(move |r| r.rule.markers.contains(&marker))
    }

    /// Append a result unless an equivalent one is already present.
    ///
    /// Two results are equivalent when they share the rule name and flavor
    /// id; for PCR-comparison rules (those carrying `expected_pcr`) the
    /// expected PCR must additionally be deep-equal.
    pub fn add_result(&mut self, result: RuleResult) {
        if !self.result_exists(&result) {
            self.results.push(result);
        }
    }

    pub fn extend_results(&mut self, results: impl IntoIterator<Item = RuleResult>) {
        for result in results {
            self.add_result(result);
        }
    }

    fn result_exists(&self, target: &RuleResult) -> bool {
        for present in self
            .results
            .iter()
            .filter(|r| r.rule.name == target.rule.name && r.flavor_id == target.flavor_id)
        {
            if target.rule.expected_pcr.is_some() || present.rule.expected_pcr.is_some() {
                if target.rule.expected_pcr == present.rule.expected_pcr {
                    return true;
                }
                continue;
            }
            // Non-PCR rules: a faulty duplicate is still appended so the
            // evidence is not lost.
            return target.faults.is_empty();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PcrBank;

    fn pcr_result(name: &str, flavor: Uuid, pcr: PcrValue) -> RuleResult {
        RuleResult::new(
            RuleInfo {
                name: name.to_string(),
                markers: vec![FlavorPart::Platform],
                expected_pcr: Some(pcr),
            },
            Some(flavor),
            Vec::new(),
        )
    }

    #[test]
    fn add_result_is_noop_for_equivalent_pcr_results() {
        let flavor = Uuid::new_v4();
        let pcr = PcrValue::new(0, PcrBank::Sha256, "aa".repeat(32));
        let mut report = TrustReport::new(HostManifest::default());

        report.add_result(pcr_result("PcrMatchesConstant", flavor, pcr.clone()));
        report.add_result(pcr_result("PcrMatchesConstant", flavor, pcr.clone()));
        assert_eq!(report.results.len(), 1);

        // Same rule and flavor but a different expected PCR is a new result.
        let other = PcrValue::new(1, PcrBank::Sha256, "bb".repeat(32));
        report.add_result(pcr_result("PcrMatchesConstant", flavor, other));
        assert_eq!(report.results.len(), 2);
    }

    #[test]
    fn add_result_distinguishes_flavors() {
        let pcr = PcrValue::new(0, PcrBank::Sha256, "aa".repeat(32));
        let mut report = TrustReport::new(HostManifest::default());
        report.add_result(pcr_result("PcrMatchesConstant", Uuid::new_v4(), pcr.clone()));
        report.add_result(pcr_result("PcrMatchesConstant", Uuid::new_v4(), pcr));
        assert_eq!(report.results.len(), 2);
    }

    #[test]
    fn empty_report_is_untrusted() {
        let report = TrustReport::new(HostManifest::default());
        assert!(!report.is_trusted());
    }

    #[test]
    fn report_trust_is_conjunction() {
        let flavor = Uuid::new_v4();
        let pcr = PcrValue::new(0, PcrBank::Sha256, "aa".repeat(32));
        let mut report = TrustReport::new(HostManifest::default());
        report.add_result(pcr_result("PcrMatchesConstant", flavor, pcr));
        assert!(report.is_trusted());

        report.add_result(RuleResult::new(
            RuleInfo {
                name: "AikCertificateTrusted".to_string(),
                markers: vec![FlavorPart::Platform],
                expected_pcr: None,
            },
            Some(flavor),
            vec![Fault::new("AikCertificateMissing", "no AIK certificate")],
        ));
        assert!(!report.is_trusted());
    }
}
