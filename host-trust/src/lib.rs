// SPDX-License-Identifier: Apache-2.0

//! Host-trust orchestrator.
//!
//! On each attestation cycle the orchestrator fetches the flavor groups
//! associated with the host, re-validates the per-(host, group) trust cache
//! against the submitted manifest, rebuilds the trusted set from the flavor
//! store where the cache no longer meets the group's match policy, and
//! composes the final trust report. A new signed assertion is generated and
//! persisted only when some group could not be served from the cache or the
//! caller flagged new host data; a stale-but-valid cached verdict stands.
//!
//! Work for one host is serialized behind a per-host lock so concurrent
//! verifies never interleave cache eviction and rebuild for the same host.

pub mod requirements;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flavor_verifier::rules::{RULE_FLAVOR_GROUP_REQUIREMENT, FAULT_FLAVOR_GROUP_POLICY_UNSATISFIED};
use flavor_verifier::FlavorVerifier;
use trustd_types::stores::{
    AssertionSigner, FlavorFilter, FlavorGroupFilter, FlavorGroupStore, FlavorStore, HostStore,
    Report, ReportStore,
};
use trustd_types::{
    Error, Fault, FlavorGroup, FlavorPart, HostManifest, MatchPolicy, Result, RuleInfo, RuleResult,
    SignedFlavor, TrustReport,
};

use requirements::{latest_of, GroupTrustRequirements};

/// Everything the orchestrator is wired with at construction time.
pub struct HostTrustConfig {
    pub flavor_store: Arc<dyn FlavorStore>,
    pub flavorgroup_store: Arc<dyn FlavorGroupStore>,
    pub host_store: Arc<dyn HostStore>,
    pub report_store: Arc<dyn ReportStore>,
    pub verifier: FlavorVerifier,
    pub signer: Arc<dyn AssertionSigner>,
    /// Whether flavor signatures are checked during verification.
    pub verify_flavor_signatures: bool,
}

pub struct HostTrustOrchestrator {
    flavor_store: Arc<dyn FlavorStore>,
    flavorgroup_store: Arc<dyn FlavorGroupStore>,
    host_store: Arc<dyn HostStore>,
    report_store: Arc<dyn ReportStore>,
    verifier: FlavorVerifier,
    signer: Arc<dyn AssertionSigner>,
    verify_flavor_signatures: bool,
    host_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

struct GroupOutcome {
    results: Vec<RuleResult>,
    /// The cached trusted set alone met the group's requirements.
    served_from_cache: bool,
}

impl HostTrustOrchestrator {
    pub fn new(config: HostTrustConfig) -> Self {
        Self {
            flavor_store: config.flavor_store,
            flavorgroup_store: config.flavorgroup_store,
            host_store: config.host_store,
            report_store: config.report_store,
            verifier: config.verifier,
            signer: config.signer,
            verify_flavor_signatures: config.verify_flavor_signatures,
            host_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate `manifest` for `host_id`. `new_data` forces a fresh report
    /// even when every group is served from the cache.
    pub async fn verify(
        &self,
        host_id: Uuid,
        manifest: &HostManifest,
        new_data: bool,
    ) -> Result<()> {
        let hardware_uuid = Uuid::parse_str(manifest.host_info.hardware_uuid.trim())
            .map_err(|_| Error::invalid_input("host manifest is missing a valid hardware uuid"))?;
        if hardware_uuid.is_nil() {
            return Err(Error::invalid_input(
                "host manifest is missing a valid hardware uuid",
            ));
        }

        let lock = self.host_lock(host_id).await;
        let _guard = lock.lock().await;

        let groups = self
            .flavorgroup_store
            .search(&FlavorGroupFilter {
                host_id: Some(host_id),
                ..Default::default()
            })
            .await?;

        let mut final_report = TrustReport::new(manifest.clone());
        let mut final_report_valid = true;
        for group in &groups {
            let outcome = self.evaluate_group(host_id, group, manifest).await?;
            if !outcome.served_from_cache {
                final_report_valid = false;
            }
            debug!(
                host = %host_id,
                group = %group.id,
                from_cache = outcome.served_from_cache,
                "evaluated flavor group"
            );
            final_report.extend_results(outcome.results);
        }

        // Persist only when the cached verdict was insufficient or the host
        // handed us new data; an idempotent re-verify writes nothing.
        if (!final_report.results.is_empty() && !final_report_valid) || new_data {
            info!(host = %host_id, trusted = final_report.is_trusted(), "storing new trust report");
            let assertion = self.signer.sign(&final_report).await?;
            self.report_store
                .create(Report {
                    id: Uuid::new_v4(),
                    host_id,
                    trust_report: final_report,
                    assertion_xml: assertion.assertion_xml,
                    created_at: assertion.created_at,
                    expires_at: assertion.expires_at,
                })
                .await?;
        }
        Ok(())
    }

    async fn evaluate_group(
        &self,
        host_id: Uuid,
        group: &FlavorGroup,
        manifest: &HostManifest,
    ) -> Result<GroupOutcome> {
        let requirements = GroupTrustRequirements::new(group);
        let candidates = self
            .flavor_store
            .search(&FlavorFilter {
                flavorgroup_id: Some(group.id),
                ..Default::default()
            })
            .await?;
        let candidate_ids: HashSet<Uuid> =
            candidates.iter().map(|f| f.flavor.meta.id).collect();

        let cached_ids = self
            .host_store
            .retrieve_trust_cache_flavors(host_id, group.id)
            .await?;

        // Cache invariant: entries whose flavor left the store are dropped.
        let stale: Vec<Uuid> = cached_ids
            .iter()
            .filter(|id| !candidate_ids.contains(id))
            .copied()
            .collect();
        if !stale.is_empty() {
            warn!(host = %host_id, group = %group.id, stale = stale.len(),
                "removing trust cache entries for deleted flavors");
            self.host_store
                .remove_trust_cache_flavors(host_id, &stale)
                .await?;
        }

        // Re-validate the cached flavors against the submitted manifest.
        let mut trusted: HashSet<Uuid> = HashSet::new();
        let mut results: Vec<RuleResult> = Vec::new();
        let mut evict: Vec<Uuid> = Vec::new();
        for flavor in candidates
            .iter()
            .filter(|f| cached_ids.contains(&f.flavor.meta.id))
        {
            let report = self
                .verifier
                .verify(manifest, flavor, self.verify_flavor_signatures);
            if report.is_trusted() {
                trusted.insert(flavor.flavor.meta.id);
                results.extend(report.results);
            } else {
                evict.push(flavor.flavor.meta.id);
            }
        }
        if !evict.is_empty() {
            debug!(host = %host_id, group = %group.id, evicted = evict.len(),
                "evicting flavors that no longer verify");
            self.host_store
                .remove_trust_cache_flavors(host_id, &evict)
                .await?;
        }

        if requirements.is_satisfied(&candidates, &trusted) {
            return Ok(GroupOutcome {
                results,
                served_from_cache: true,
            });
        }

        // The cache was not enough: rebuild from the flavor store.
        let mut newly_trusted: Vec<Uuid> = Vec::new();
        let mut unsatisfied_parts: Vec<FlavorPart> = Vec::new();
        for policy in requirements.policies() {
            if requirements.part_satisfied(policy, &candidates, &trusted) {
                continue;
            }
            let part_candidates: Vec<&SignedFlavor> = candidates
                .iter()
                .filter(|f| f.flavor.meta.part == policy.part)
                .collect();
            if part_candidates.is_empty() {
                unsatisfied_parts.push(policy.part);
                continue;
            }
            match policy.policy {
                MatchPolicy::AnyOf => {
                    // First flavor that verifies wins, in store order.
                    let mut failing: Vec<RuleResult> = Vec::new();
                    let mut satisfied = false;
                    let candidates: Vec<_> = part_candidates
                        .iter()
                        .copied()
                        .filter(|f| !trusted.contains(&f.flavor.meta.id))
                        .collect();
                    for flavor in candidates {
                        let report = self
                            .verifier
                            .verify(manifest, flavor, self.verify_flavor_signatures);
                        if report.is_trusted() {
                            trusted.insert(flavor.flavor.meta.id);
                            newly_trusted.push(flavor.flavor.meta.id);
                            results.extend(report.results);
                            satisfied = true;
                            break;
                        }
                        failing.extend(report.results);
                    }
                    if !satisfied {
                        results.extend(failing);
                        unsatisfied_parts.push(policy.part);
                    }
                }
                MatchPolicy::AllOf => {
                    let mut all_ok = true;
                    let candidates: Vec<_> = part_candidates
                        .iter()
                        .copied()
                        .filter(|f| !trusted.contains(&f.flavor.meta.id))
                        .collect();
                    for flavor in candidates {
                        let report = self
                            .verifier
                            .verify(manifest, flavor, self.verify_flavor_signatures);
                        if report.is_trusted() {
                            trusted.insert(flavor.flavor.meta.id);
                            newly_trusted.push(flavor.flavor.meta.id);
                        } else {
                            all_ok = false;
                        }
                        results.extend(report.results);
                    }
                    if !all_ok {
                        unsatisfied_parts.push(policy.part);
                    }
                }
                MatchPolicy::Latest => {
                    let Some(flavor) = latest_of(&part_candidates) else {
                        unsatisfied_parts.push(policy.part);
                        continue;
                    };
                    if trusted.contains(&flavor.flavor.meta.id) {
                        continue;
                    }
                    let report = self
                        .verifier
                        .verify(manifest, flavor, self.verify_flavor_signatures);
                    let ok = report.is_trusted();
                    results.extend(report.results);
                    if ok {
                        trusted.insert(flavor.flavor.meta.id);
                        newly_trusted.push(flavor.flavor.meta.id);
                    } else {
                        unsatisfied_parts.push(policy.part);
                    }
                }
            }
        }

        if !newly_trusted.is_empty() {
            self.host_store
                .add_trust_cache_flavors(host_id, &newly_trusted)
                .await?;
        }

        // An unmet policy is not an error; it surfaces as an untrusted
        // result so the composed report carries the verdict.
        if !unsatisfied_parts.is_empty() {
            results.push(RuleResult::new(
                RuleInfo {
                    name: RULE_FLAVOR_GROUP_REQUIREMENT.to_string(),
                    markers: unsatisfied_parts.clone(),
                    expected_pcr: None,
                },
                None,
                vec![Fault::new(
                    FAULT_FLAVOR_GROUP_POLICY_UNSATISFIED,
                    format!(
                        "flavor group {} match policy cannot be satisfied for parts {}",
                        group.name,
                        unsatisfied_parts
                            .iter()
                            .map(|p| p.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )],
            ));
        }

        Ok(GroupOutcome {
            results,
            served_from_cache: false,
        })
    }

    async fn host_lock(&self, host_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.host_locks.lock().await;
        locks
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
