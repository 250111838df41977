// SPDX-License-Identifier: Apache-2.0

//! Host connector contract: the channel back to a host's trust agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::{HostManifest, PcrValue};
use crate::Result;

/// A TPM quote over the requested PCR selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpmQuoteResponse {
    #[serde(with = "serde_human_bytes")]
    pub quote: Vec<u8>,
    #[serde(with = "serde_human_bytes")]
    pub signature: Vec<u8>,
    pub pcrs: Vec<PcrValue>,
}

/// An application measurement policy pushed to a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareManifest {
    pub uuid: Uuid,
    pub label: String,
    #[serde(default)]
    pub entries: Vec<String>,
}

/// A measurement taken by the host agent against a software manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub uuid: Uuid,
    pub label: String,
    #[serde(with = "serde_human_bytes")]
    pub digest: Vec<u8>,
}

/// Vendor-neutral contract to a host's trust agent. Implementations are
/// external; the core only consumes this interface.
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn get_host_manifest(&self) -> Result<HostManifest>;
    async fn get_tpm_quote(&self, nonce: &[u8], pcr_list: &[u32]) -> Result<TpmQuoteResponse>;
    /// Hand the SHA-384 digest of an asset tag certificate to the host's TPM
    /// so it becomes part of future PCR measurements.
    async fn deploy_asset_tag(&self, hardware_uuid: Uuid, tag_digest: &[u8]) -> Result<()>;
    async fn deploy_software_manifest(&self, manifest: SoftwareManifest) -> Result<()>;
    async fn get_measurement_from_manifest(
        &self,
        manifest: SoftwareManifest,
    ) -> Result<Measurement>;
}
