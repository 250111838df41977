// SPDX-License-Identifier: Apache-2.0

//! Store contracts consumed by the attestation core.
//!
//! The engines are written against these traits only; the backing
//! implementation (SQL, key-value, in-memory) is wired in at construction
//! time. All operations may suspend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flavor::{FlavorGroup, FlavorPart, SignedFlavor};
use crate::report::TrustReport;
use crate::Result;

/// Filter for [`FlavorStore::search`]. Unset fields do not constrain the
/// result; flavors come back in creation order.
#[derive(Debug, Clone, Default)]
pub struct FlavorFilter {
    pub ids: Vec<Uuid>,
    pub flavorgroup_id: Option<Uuid>,
    pub parts: Vec<FlavorPart>,
}

#[async_trait]
pub trait FlavorStore: Send + Sync {
    async fn create(&self, flavor: SignedFlavor) -> Result<SignedFlavor>;
    async fn retrieve(&self, id: Uuid) -> Result<SignedFlavor>;
    async fn search(&self, filter: &FlavorFilter) -> Result<Vec<SignedFlavor>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Filter for [`FlavorGroupStore::search`].
#[derive(Debug, Clone, Default)]
pub struct FlavorGroupFilter {
    pub id: Option<Uuid>,
    pub name_equal_to: Option<String>,
    pub name_contains: Option<String>,
    pub host_id: Option<Uuid>,
}

#[async_trait]
pub trait FlavorGroupStore: Send + Sync {
    async fn create(&self, group: FlavorGroup) -> Result<FlavorGroup>;
    async fn retrieve(&self, id: Uuid) -> Result<FlavorGroup>;
    async fn search(&self, filter: &FlavorGroupFilter) -> Result<Vec<FlavorGroup>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Per-host state: the trust cache memoizing which flavors currently verify
/// against the host's latest manifest.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Flavor ids cached as trusted for `(host_id, group_id)`.
    async fn retrieve_trust_cache_flavors(
        &self,
        host_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Uuid>>;
    async fn add_trust_cache_flavors(&self, host_id: Uuid, flavor_ids: &[Uuid]) -> Result<()>;
    async fn remove_trust_cache_flavors(&self, host_id: Uuid, flavor_ids: &[Uuid]) -> Result<()>;
}

/// A persisted attestation report: the composed trust report plus the signed
/// assertion conveying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub host_id: Uuid,
    pub trust_report: TrustReport,
    pub assertion_xml: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create(&self, report: Report) -> Result<Report>;
}

/// A TPM endorsement certificate registered out of band for hosts whose
/// vendor chain is not in the endorsement-authority pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpmEndorsement {
    pub id: Uuid,
    pub hardware_uuid: Uuid,
    /// Issuer distinguished name, whitespace-normalized.
    pub issuer: String,
    /// Certificate, base64 over its PEM encoding.
    pub certificate: String,
}

#[derive(Debug, Clone, Default)]
pub struct TpmEndorsementFilter {
    pub issuer_equal_to: Option<String>,
}

#[async_trait]
pub trait TpmEndorsementStore: Send + Sync {
    async fn search(&self, filter: &TpmEndorsementFilter) -> Result<Vec<TpmEndorsement>>;
}

/// The signed assertion produced by the external assertion signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAssertion {
    pub assertion_xml: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// External collaborator turning a composed trust report into a signed
/// assertion.
#[async_trait]
pub trait AssertionSigner: Send + Sync {
    async fn sign(&self, report: &TrustReport) -> Result<TrustAssertion>;
}
