// SPDX-License-Identifier: Apache-2.0

//! Flavor model: declarative expected-measurement policies, their grouping
//! and the per-part match policies applied when a group is evaluated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::{MeasurementEvent, PcrValue};

/// The part of the platform a flavor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlavorPart {
    Platform,
    Os,
    HostUnique,
    Software,
    AssetTag,
}

impl std::fmt::Display for FlavorPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlavorPart::Platform => "PLATFORM",
            FlavorPart::Os => "OS",
            FlavorPart::HostUnique => "HOST_UNIQUE",
            FlavorPart::Software => "SOFTWARE",
            FlavorPart::AssetTag => "ASSET_TAG",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlavorMeta {
    pub id: Uuid,
    pub part: FlavorPart,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One verification rule declared by a flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FlavorRule {
    /// The named PCR must equal a constant.
    PcrMatchesConstant { pcr: PcrValue },
    /// The measured event log for a PCR must equal the expected entries after
    /// dropping measured entries whose label is in the exclusion list.
    PcrEventLogEqualsExcluding {
        pcr: PcrValue,
        entries: Vec<MeasurementEvent>,
        #[serde(default)]
        exclude_labels: Vec<String>,
    },
    /// Replaying the measured event log must reproduce the reported PCR.
    PcrEventLogIntegrity { pcr: PcrValue },
    /// The host's AIK certificate must chain to the privacy-CA anchor.
    AikCertificateTrusted,
    /// The host's asset tag certificate must chain to the tag CA and its
    /// digest must equal the expected value.
    AssetTagMatches { expected_digest: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub meta: FlavorMeta,
    pub rules: Vec<FlavorRule>,
}

impl Flavor {
    /// Canonical byte representation covered by the flavor signature.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A flavor plus its detached signature (base64, empty when unsigned).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedFlavor {
    pub flavor: Flavor,
    #[serde(default)]
    pub signature: String,
}

/// How the flavors of one part contribute to a group's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPolicy {
    /// At least one flavor of the part must verify.
    AnyOf,
    /// Every flavor of the part must verify.
    AllOf,
    /// The most recently created flavor of the part must verify.
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorMatchPolicy {
    pub part: FlavorPart,
    pub policy: MatchPolicy,
}

/// A named bundle of flavors applied collectively to a set of hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlavorGroup {
    pub id: Uuid,
    pub name: String,
    pub match_policy: Vec<FlavorMatchPolicy>,
}
