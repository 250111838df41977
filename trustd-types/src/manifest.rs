// SPDX-License-Identifier: Apache-2.0

//! Host manifest model: hardware identity, PCR values and measured event logs
//! as collected from a host on each attestation cycle.

use serde::{Deserialize, Serialize};

/// PCR bank (digest algorithm) a value was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PcrBank {
    Sha256,
    Sha384,
}

impl PcrBank {
    pub fn digest_len(&self) -> usize {
        match self {
            PcrBank::Sha256 => 32,
            PcrBank::Sha384 => 48,
        }
    }
}

impl std::fmt::Display for PcrBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcrBank::Sha256 => write!(f, "SHA256"),
            PcrBank::Sha384 => write!(f, "SHA384"),
        }
    }
}

/// A single PCR reading. `value` is the lowercase hex encoding of the
/// register contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrValue {
    pub index: u32,
    pub bank: PcrBank,
    pub value: String,
}

impl PcrValue {
    pub fn new(index: u32, bank: PcrBank, value: impl Into<String>) -> Self {
        Self {
            index,
            bank,
            value: value.into(),
        }
    }
}

/// One measurement extended into a PCR, as recorded in the host's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementEvent {
    /// Human-readable label of the measured component.
    pub label: String,
    /// Digest extended into the PCR.
    #[serde(with = "serde_human_bytes")]
    pub digest: Vec<u8>,
    /// Free-form classification tags (e.g. `"dynamic"` for entries that
    /// legitimately vary between boots).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The measured event log backing a single PCR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrEventLog {
    pub pcr_index: u32,
    pub bank: PcrBank,
    pub events: Vec<MeasurementEvent>,
}

/// Identity of the host the manifest was collected from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub os_name: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub bios_version: String,
    /// Hardware UUID reported by the platform firmware. Must parse as a
    /// non-nil UUID before any trust decision is made.
    pub hardware_uuid: String,
}

/// A signed set of host-side measurements: PCR values, event logs and the
/// certificates that anchor them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostManifest {
    pub host_info: HostInfo,
    #[serde(default)]
    pub pcrs: Vec<PcrValue>,
    #[serde(default)]
    pub event_logs: Vec<PcrEventLog>,
    /// AIK certificate (DER) issued by the privacy CA, empty if the host has
    /// not been enrolled yet.
    #[serde(with = "serde_human_bytes", default)]
    pub aik_certificate: Vec<u8>,
    /// Asset tag certificate (DER) currently deployed to the host, empty if
    /// no tag has been provisioned.
    #[serde(with = "serde_human_bytes", default)]
    pub asset_tag_certificate: Vec<u8>,
}

impl Default for PcrBank {
    fn default() -> Self {
        PcrBank::Sha256
    }
}

impl HostManifest {
    pub fn pcr(&self, bank: PcrBank, index: u32) -> Option<&PcrValue> {
        self.pcrs.iter().find(|p| p.bank == bank && p.index == index)
    }

    pub fn event_log(&self, bank: PcrBank, index: u32) -> Option<&PcrEventLog> {
        self.event_logs
            .iter()
            .find(|l| l.bank == bank && l.pcr_index == index)
    }
}
