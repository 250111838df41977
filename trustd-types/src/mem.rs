// SPDX-License-Identifier: Apache-2.0

//! In-memory implementations of the store contracts.
//!
//! One [`MemStore`] backs all traits so that cross-store links (group
//! membership, host association, trust cache) stay consistent, the way a
//! relational backend would keep them. Insertion order is preserved, which
//! makes the flavor-store iteration order the documented creation order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::connector::{HostConnector, Measurement, SoftwareManifest, TpmQuoteResponse};
use crate::flavor::{FlavorGroup, SignedFlavor};
use crate::manifest::HostManifest;
use crate::report::TrustReport;
use crate::stores::{
    AssertionSigner, FlavorFilter, FlavorGroupFilter, FlavorGroupStore, FlavorStore, HostStore,
    Report, ReportStore, TpmEndorsement, TpmEndorsementFilter, TpmEndorsementStore, TrustAssertion,
};
use crate::{Error, Result};

#[derive(Default)]
struct MemState {
    flavors: HashMap<Uuid, SignedFlavor>,
    flavor_order: Vec<Uuid>,
    groups: HashMap<Uuid, FlavorGroup>,
    group_order: Vec<Uuid>,
    group_flavors: HashMap<Uuid, Vec<Uuid>>,
    host_groups: HashMap<Uuid, Vec<Uuid>>,
    trust_cache: HashMap<Uuid, Vec<Uuid>>,
    reports: Vec<Report>,
    endorsements: Vec<TpmEndorsement>,
}

/// Shared in-memory backing store implementing every store contract.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<RwLock<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a flavor with a flavor group.
    pub fn link_flavor_to_group(&self, flavor_id: Uuid, group_id: Uuid) {
        let mut state = self.state.write().unwrap();
        let members = state.group_flavors.entry(group_id).or_default();
        if !members.contains(&flavor_id) {
            members.push(flavor_id);
        }
    }

    /// Associate a host with a flavor group.
    pub fn link_host_to_group(&self, host_id: Uuid, group_id: Uuid) {
        let mut state = self.state.write().unwrap();
        let groups = state.host_groups.entry(host_id).or_default();
        if !groups.contains(&group_id) {
            groups.push(group_id);
        }
    }

    pub fn add_endorsement(&self, endorsement: TpmEndorsement) {
        self.state.write().unwrap().endorsements.push(endorsement);
    }

    /// Snapshot of all persisted reports, in creation order.
    pub fn reports(&self) -> Vec<Report> {
        self.state.read().unwrap().reports.clone()
    }

    /// Snapshot of the trust cache for a host, in insertion order.
    pub fn cached_flavors(&self, host_id: Uuid) -> Vec<Uuid> {
        self.state
            .read()
            .unwrap()
            .trust_cache
            .get(&host_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl FlavorStore for MemStore {
    async fn create(&self, flavor: SignedFlavor) -> Result<SignedFlavor> {
        let mut state = self.state.write().unwrap();
        let id = flavor.flavor.meta.id;
        if state.flavors.insert(id, flavor.clone()).is_none() {
            state.flavor_order.push(id);
        }
        Ok(flavor)
    }

    async fn retrieve(&self, id: Uuid) -> Result<SignedFlavor> {
        self.state
            .read()
            .unwrap()
            .flavors
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::storage(anyhow!("flavor {id} not found")))
    }

    async fn search(&self, filter: &FlavorFilter) -> Result<Vec<SignedFlavor>> {
        let state = self.state.read().unwrap();
        let candidate_ids: Vec<Uuid> = match filter.flavorgroup_id {
            Some(group_id) => state
                .group_flavors
                .get(&group_id)
                .cloned()
                .unwrap_or_default(),
            None => state.flavor_order.clone(),
        };
        let result = candidate_ids
            .into_iter()
            .filter(|id| filter.ids.is_empty() || filter.ids.contains(id))
            .filter_map(|id| state.flavors.get(&id).cloned())
            .filter(|f| filter.parts.is_empty() || filter.parts.contains(&f.flavor.meta.part))
            .collect();
        Ok(result)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.flavors.remove(&id).is_none() {
            return Err(Error::storage(anyhow!("flavor {id} not found")));
        }
        state.flavor_order.retain(|f| *f != id);
        for members in state.group_flavors.values_mut() {
            members.retain(|f| *f != id);
        }
        for cached in state.trust_cache.values_mut() {
            cached.retain(|f| *f != id);
        }
        Ok(())
    }
}

#[async_trait]
impl FlavorGroupStore for MemStore {
    async fn create(&self, group: FlavorGroup) -> Result<FlavorGroup> {
        let mut state = self.state.write().unwrap();
        let id = group.id;
        if state.groups.insert(id, group.clone()).is_none() {
            state.group_order.push(id);
        }
        Ok(group)
    }

    async fn retrieve(&self, id: Uuid) -> Result<FlavorGroup> {
        self.state
            .read()
            .unwrap()
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::storage(anyhow!("flavor group {id} not found")))
    }

    async fn search(&self, filter: &FlavorGroupFilter) -> Result<Vec<FlavorGroup>> {
        let state = self.state.read().unwrap();
        let candidate_ids: Vec<Uuid> = match filter.host_id {
            Some(host_id) => state.host_groups.get(&host_id).cloned().unwrap_or_default(),
            None => state.group_order.clone(),
        };
        let result = candidate_ids
            .into_iter()
            .filter(|id| filter.id.map_or(true, |want| want == *id))
            .filter_map(|id| state.groups.get(&id).cloned())
            .filter(|g| {
                filter
                    .name_equal_to
                    .as_ref()
                    .map_or(true, |name| g.name == *name)
            })
            .filter(|g| {
                filter
                    .name_contains
                    .as_ref()
                    .map_or(true, |needle| g.name.contains(needle.as_str()))
            })
            .collect();
        Ok(result)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.groups.remove(&id).is_none() {
            return Err(Error::storage(anyhow!("flavor group {id} not found")));
        }
        state.group_order.retain(|g| *g != id);
        state.group_flavors.remove(&id);
        for groups in state.host_groups.values_mut() {
            groups.retain(|g| *g != id);
        }
        Ok(())
    }
}

#[async_trait]
impl HostStore for MemStore {
    async fn retrieve_trust_cache_flavors(
        &self,
        host_id: Uuid,
        group_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        let state = self.state.read().unwrap();
        let members = state.group_flavors.get(&group_id);
        let cached = state.trust_cache.get(&host_id);
        let (Some(members), Some(cached)) = (members, cached) else {
            return Ok(Vec::new());
        };
        Ok(cached
            .iter()
            .filter(|id| members.contains(id))
            .copied()
            .collect())
    }

    async fn add_trust_cache_flavors(&self, host_id: Uuid, flavor_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let cached = state.trust_cache.entry(host_id).or_default();
        for id in flavor_ids {
            if !cached.contains(id) {
                cached.push(*id);
            }
        }
        Ok(())
    }

    async fn remove_trust_cache_flavors(&self, host_id: Uuid, flavor_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(cached) = state.trust_cache.get_mut(&host_id) {
            cached.retain(|id| !flavor_ids.contains(id));
        }
        Ok(())
    }
}

#[async_trait]
impl ReportStore for MemStore {
    async fn create(&self, report: Report) -> Result<Report> {
        self.state.write().unwrap().reports.push(report.clone());
        Ok(report)
    }
}

#[async_trait]
impl TpmEndorsementStore for MemStore {
    async fn search(&self, filter: &TpmEndorsementFilter) -> Result<Vec<TpmEndorsement>> {
        let state = self.state.read().unwrap();
        Ok(state
            .endorsements
            .iter()
            .filter(|e| {
                filter
                    .issuer_equal_to
                    .as_ref()
                    .map_or(true, |issuer| e.issuer == *issuer)
            })
            .cloned()
            .collect())
    }
}

/// Assertion signer stub producing a minimal unsigned assertion document.
#[derive(Default)]
pub struct StubAssertionSigner {
    pub validity_hours: i64,
}

impl StubAssertionSigner {
    pub fn new() -> Self {
        Self { validity_hours: 24 }
    }
}

#[async_trait]
impl AssertionSigner for StubAssertionSigner {
    async fn sign(&self, report: &TrustReport) -> Result<TrustAssertion> {
        let created_at = Utc::now();
        let hours = if self.validity_hours > 0 {
            self.validity_hours
        } else {
            24
        };
        Ok(TrustAssertion {
            assertion_xml: format!(
                "<Assertion trusted=\"{}\" results=\"{}\"/>",
                report.is_trusted(),
                report.results.len()
            ),
            created_at,
            expires_at: created_at + Duration::hours(hours),
        })
    }
}

/// Host connector stub: serves a fixed manifest and records asset tag
/// deployments.
#[derive(Clone, Default)]
pub struct MemHostConnector {
    manifest: Arc<RwLock<HostManifest>>,
    deployed_tags: Arc<RwLock<Vec<(Uuid, Vec<u8>)>>>,
}

impl MemHostConnector {
    pub fn with_manifest(manifest: HostManifest) -> Self {
        Self {
            manifest: Arc::new(RwLock::new(manifest)),
            deployed_tags: Arc::default(),
        }
    }

    pub fn deployed_tags(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.deployed_tags.read().unwrap().clone()
    }
}

#[async_trait]
impl HostConnector for MemHostConnector {
    async fn get_host_manifest(&self) -> Result<HostManifest> {
        Ok(self.manifest.read().unwrap().clone())
    }

    async fn get_tpm_quote(&self, _nonce: &[u8], pcr_list: &[u32]) -> Result<TpmQuoteResponse> {
        let manifest = self.manifest.read().unwrap();
        Ok(TpmQuoteResponse {
            quote: Vec::new(),
            signature: Vec::new(),
            pcrs: manifest
                .pcrs
                .iter()
                .filter(|p| pcr_list.contains(&p.index))
                .cloned()
                .collect(),
        })
    }

    async fn deploy_asset_tag(&self, hardware_uuid: Uuid, tag_digest: &[u8]) -> Result<()> {
        self.deployed_tags
            .write()
            .unwrap()
            .push((hardware_uuid, tag_digest.to_vec()));
        Ok(())
    }

    async fn deploy_software_manifest(&self, _manifest: SoftwareManifest) -> Result<()> {
        Ok(())
    }

    async fn get_measurement_from_manifest(
        &self,
        manifest: SoftwareManifest,
    ) -> Result<Measurement> {
        Ok(Measurement {
            uuid: manifest.uuid,
            label: manifest.label,
            digest: Vec::new(),
        })
    }
}
