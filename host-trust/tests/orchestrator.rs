// SPDX-License-Identifier: Apache-2.0

//! Orchestrator behavior against the in-memory stores: cache convergence,
//! idempotent verification, eviction and match-policy handling.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use flavor_verifier::{FlavorVerifier, VerifierCerts};
use host_trust::{HostTrustConfig, HostTrustOrchestrator};
use trustd_types::mem::{MemStore, StubAssertionSigner};
use trustd_types::{
    Error, Flavor, FlavorGroup, FlavorMatchPolicy, FlavorMeta, FlavorPart, FlavorRule, HostInfo,
    HostManifest, MatchPolicy, PcrBank, PcrValue, SignedFlavor,
};

const GOOD_PCR: &str = "1111111111111111111111111111111111111111111111111111111111111111";
const BAD_PCR: &str = "2222222222222222222222222222222222222222222222222222222222222222";

fn manifest(pcr_value: &str) -> HostManifest {
    HostManifest {
        host_info: HostInfo {
            hardware_uuid: "803f6068-06da-e811-906e-00163566263e".to_string(),
            ..Default::default()
        },
        pcrs: vec![PcrValue::new(0, PcrBank::Sha256, pcr_value)],
        ..Default::default()
    }
}

fn flavor(part: FlavorPart, expected_pcr: &str, age_minutes: i64) -> SignedFlavor {
    SignedFlavor {
        flavor: Flavor {
            meta: FlavorMeta {
                id: Uuid::new_v4(),
                part,
                description: String::new(),
                created_at: Utc::now() - Duration::minutes(age_minutes),
            },
            rules: vec![FlavorRule::PcrMatchesConstant {
                pcr: PcrValue::new(0, PcrBank::Sha256, expected_pcr),
            }],
        },
        signature: String::new(),
    }
}

struct Fixture {
    store: MemStore,
    orchestrator: HostTrustOrchestrator,
    host_id: Uuid,
    group_id: Uuid,
}

impl Fixture {
    async fn new(policy: MatchPolicy, flavors: Vec<SignedFlavor>) -> Self {
        use trustd_types::stores::{FlavorGroupStore, FlavorStore};

        let store = MemStore::new();
        let host_id = Uuid::new_v4();
        let group = FlavorGroup {
            id: Uuid::new_v4(),
            name: "automatic".to_string(),
            match_policy: vec![FlavorMatchPolicy {
                part: FlavorPart::Platform,
                policy,
            }],
        };
        FlavorGroupStore::create(&store, group.clone()).await.unwrap();
        store.link_host_to_group(host_id, group.id);
        for f in &flavors {
            FlavorStore::create(&store, f.clone()).await.unwrap();
            store.link_flavor_to_group(f.flavor.meta.id, group.id);
        }

        let orchestrator = HostTrustOrchestrator::new(HostTrustConfig {
            flavor_store: Arc::new(store.clone()),
            flavorgroup_store: Arc::new(store.clone()),
            host_store: Arc::new(store.clone()),
            report_store: Arc::new(store.clone()),
            verifier: FlavorVerifier::new(VerifierCerts::default()),
            signer: Arc::new(StubAssertionSigner::new()),
            verify_flavor_signatures: false,
        });
        Self {
            store,
            orchestrator,
            host_id,
            group_id: group.id,
        }
    }
}

#[tokio::test]
async fn manifest_without_hardware_uuid_is_rejected_without_state_change() {
    let fixture = Fixture::new(
        MatchPolicy::AnyOf,
        vec![flavor(FlavorPart::Platform, GOOD_PCR, 0)],
    )
    .await;

    let mut bad = manifest(GOOD_PCR);
    bad.host_info.hardware_uuid = String::new();
    let err = fixture
        .orchestrator
        .verify(fixture.host_id, &bad, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut nil = manifest(GOOD_PCR);
    nil.host_info.hardware_uuid = Uuid::nil().to_string();
    let err = fixture
        .orchestrator
        .verify(fixture.host_id, &nil, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert!(fixture.store.reports().is_empty());
    assert!(fixture.store.cached_flavors(fixture.host_id).is_empty());
}

#[tokio::test]
async fn first_verify_fills_cache_and_persists_one_report() {
    let good = flavor(FlavorPart::Platform, GOOD_PCR, 0);
    let fixture = Fixture::new(MatchPolicy::AnyOf, vec![good.clone()]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    let reports = fixture.store.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].trust_report.is_trusted());
    assert!(!reports[0].assertion_xml.is_empty());
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![good.flavor.meta.id]
    );

    // The group-scoped view agrees.
    use trustd_types::stores::HostStore;
    assert_eq!(
        fixture
            .store
            .retrieve_trust_cache_flavors(fixture.host_id, fixture.group_id)
            .await
            .unwrap(),
        vec![good.flavor.meta.id]
    );
}

#[tokio::test]
async fn repeated_verify_with_same_manifest_is_idempotent() {
    let fixture = Fixture::new(
        MatchPolicy::AnyOf,
        vec![flavor(FlavorPart::Platform, GOOD_PCR, 0)],
    )
    .await;
    let m = manifest(GOOD_PCR);

    fixture
        .orchestrator
        .verify(fixture.host_id, &m, false)
        .await
        .unwrap();
    let cache_after_first = fixture.store.cached_flavors(fixture.host_id);

    fixture
        .orchestrator
        .verify(fixture.host_id, &m, false)
        .await
        .unwrap();

    assert_eq!(fixture.store.reports().len(), 1);
    assert_eq!(fixture.store.cached_flavors(fixture.host_id), cache_after_first);
}

#[tokio::test]
async fn new_data_flag_forces_a_fresh_report() {
    let fixture = Fixture::new(
        MatchPolicy::AnyOf,
        vec![flavor(FlavorPart::Platform, GOOD_PCR, 0)],
    )
    .await;
    let m = manifest(GOOD_PCR);

    fixture
        .orchestrator
        .verify(fixture.host_id, &m, false)
        .await
        .unwrap();
    fixture
        .orchestrator
        .verify(fixture.host_id, &m, true)
        .await
        .unwrap();

    assert_eq!(fixture.store.reports().len(), 2);
    assert!(fixture.store.reports()[1].trust_report.is_trusted());
}

#[tokio::test]
async fn changed_manifest_evicts_cache_and_reports_untrusted() {
    let good = flavor(FlavorPart::Platform, GOOD_PCR, 0);
    let fixture = Fixture::new(MatchPolicy::AnyOf, vec![good.clone()]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![good.flavor.meta.id]
    );

    // The host's PCR changed: the cached flavor no longer verifies.
    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(BAD_PCR), false)
        .await
        .unwrap();

    assert!(fixture.store.cached_flavors(fixture.host_id).is_empty());
    let reports = fixture.store.reports();
    assert_eq!(reports.len(), 2);
    assert!(!reports[1].trust_report.is_trusted());
}

#[tokio::test]
async fn any_of_caches_exactly_the_flavors_that_verify() {
    let bad = flavor(FlavorPart::Platform, BAD_PCR, 10);
    let good = flavor(FlavorPart::Platform, GOOD_PCR, 5);
    let fixture = Fixture::new(MatchPolicy::AnyOf, vec![bad, good.clone()]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    // Only the verifying flavor lands in the cache and the report stays
    // trusted even though an earlier candidate failed.
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![good.flavor.meta.id]
    );
    let reports = fixture.store.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].trust_report.is_trusted());
}

#[tokio::test]
async fn latest_policy_requires_the_newest_flavor_to_verify() {
    // The newest flavor does not match the manifest; an older one does.
    let older_good = flavor(FlavorPart::Platform, GOOD_PCR, 60);
    let newest_bad = flavor(FlavorPart::Platform, BAD_PCR, 1);
    let fixture = Fixture::new(MatchPolicy::Latest, vec![older_good, newest_bad]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    let reports = fixture.store.reports();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].trust_report.is_trusted());
}

#[tokio::test]
async fn latest_policy_passes_when_newest_flavor_matches() {
    let older_bad = flavor(FlavorPart::Platform, BAD_PCR, 60);
    let newest_good = flavor(FlavorPart::Platform, GOOD_PCR, 1);
    let fixture = Fixture::new(MatchPolicy::Latest, vec![older_bad, newest_good.clone()]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    assert!(fixture.store.reports()[0].trust_report.is_trusted());
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![newest_good.flavor.meta.id]
    );
}

#[tokio::test]
async fn all_of_policy_fails_when_any_flavor_fails() {
    let good = flavor(FlavorPart::Platform, GOOD_PCR, 10);
    let bad = flavor(FlavorPart::Platform, BAD_PCR, 5);
    let fixture = Fixture::new(MatchPolicy::AllOf, vec![good.clone(), bad]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    let reports = fixture.store.reports();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].trust_report.is_trusted());
    // The verifying half is still cached; only it satisfies its rules.
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![good.flavor.meta.id]
    );
}

#[tokio::test]
async fn group_without_any_candidate_flavors_reports_policy_unsatisfied() {
    let fixture = Fixture::new(MatchPolicy::AnyOf, Vec::new()).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    let reports = fixture.store.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0].trust_report;
    assert!(!report.is_trusted());
    assert_eq!(report.results.len(), 1);
    assert_eq!(
        report.results[0].rule.name,
        flavor_verifier::rules::RULE_FLAVOR_GROUP_REQUIREMENT
    );
}

#[tokio::test]
async fn deleted_flavor_is_dropped_from_cache_on_next_verify() {
    use trustd_types::stores::FlavorStore;

    let good = flavor(FlavorPart::Platform, GOOD_PCR, 10);
    let replacement = flavor(FlavorPart::Platform, GOOD_PCR, 5);
    let fixture = Fixture::new(MatchPolicy::AnyOf, vec![good.clone(), replacement.clone()]).await;

    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![good.flavor.meta.id]
    );

    FlavorStore::delete(&fixture.store, good.flavor.meta.id)
        .await
        .unwrap();
    fixture
        .orchestrator
        .verify(fixture.host_id, &manifest(GOOD_PCR), false)
        .await
        .unwrap();

    // The cache converges on the surviving flavor.
    assert_eq!(
        fixture.store.cached_flavors(fixture.host_id),
        vec![replacement.flavor.meta.id]
    );
}
