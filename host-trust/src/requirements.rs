// SPDX-License-Identifier: Apache-2.0

//! Flavor-group trust requirements: which flavor parts must verify, and
//! under which match policy, for a group to be satisfied.

use std::collections::HashSet;

use uuid::Uuid;

use trustd_types::{FlavorGroup, FlavorMatchPolicy, MatchPolicy, SignedFlavor};

/// The per-part requirements derived from a group's match policy.
pub struct GroupTrustRequirements {
    policies: Vec<FlavorMatchPolicy>,
}

impl GroupTrustRequirements {
    pub fn new(group: &FlavorGroup) -> Self {
        Self {
            policies: group.match_policy.clone(),
        }
    }

    pub fn policies(&self) -> &[FlavorMatchPolicy] {
        &self.policies
    }

    /// Whether one part's policy is met by the currently trusted set.
    /// `candidates` is the group's flavor pool in creation order.
    pub fn part_satisfied(
        &self,
        policy: &FlavorMatchPolicy,
        candidates: &[SignedFlavor],
        trusted: &HashSet<Uuid>,
    ) -> bool {
        let of_part: Vec<&SignedFlavor> = candidates
            .iter()
            .filter(|f| f.flavor.meta.part == policy.part)
            .collect();
        if of_part.is_empty() {
            return false;
        }
        match policy.policy {
            MatchPolicy::AnyOf => of_part
                .iter()
                .any(|f| trusted.contains(&f.flavor.meta.id)),
            MatchPolicy::AllOf => of_part
                .iter()
                .all(|f| trusted.contains(&f.flavor.meta.id)),
            MatchPolicy::Latest => latest_of(&of_part)
                .map(|f| trusted.contains(&f.flavor.meta.id))
                .unwrap_or(false),
        }
    }

    /// Whether every part named by the match policy is met.
    pub fn is_satisfied(&self, candidates: &[SignedFlavor], trusted: &HashSet<Uuid>) -> bool {
        self.policies
            .iter()
            .all(|policy| self.part_satisfied(policy, candidates, trusted))
    }
}

/// The most recently created flavor among `flavors`.
pub fn latest_of<'a>(flavors: &[&'a SignedFlavor]) -> Option<&'a SignedFlavor> {
    flavors
        .iter()
        .max_by_key(|f| f.flavor.meta.created_at)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use trustd_types::{Flavor, FlavorMeta, FlavorPart};

    fn flavor(part: FlavorPart, age_minutes: i64) -> SignedFlavor {
        SignedFlavor {
            flavor: Flavor {
                meta: FlavorMeta {
                    id: Uuid::new_v4(),
                    part,
                    description: String::new(),
                    created_at: Utc::now() - Duration::minutes(age_minutes),
                },
                rules: Vec::new(),
            },
            signature: String::new(),
        }
    }

    fn group(policies: Vec<FlavorMatchPolicy>) -> FlavorGroup {
        FlavorGroup {
            id: Uuid::new_v4(),
            name: "automatic".to_string(),
            match_policy: policies,
        }
    }

    #[test]
    fn any_of_needs_one_trusted_flavor() {
        let a = flavor(FlavorPart::Platform, 10);
        let b = flavor(FlavorPart::Platform, 5);
        let reqs = GroupTrustRequirements::new(&group(vec![FlavorMatchPolicy {
            part: FlavorPart::Platform,
            policy: MatchPolicy::AnyOf,
        }]));
        let candidates = vec![a.clone(), b.clone()];

        assert!(!reqs.is_satisfied(&candidates, &HashSet::new()));
        let trusted: HashSet<Uuid> = [b.flavor.meta.id].into();
        assert!(reqs.is_satisfied(&candidates, &trusted));
    }

    #[test]
    fn all_of_needs_every_flavor_of_the_part() {
        let a = flavor(FlavorPart::Os, 10);
        let b = flavor(FlavorPart::Os, 5);
        let reqs = GroupTrustRequirements::new(&group(vec![FlavorMatchPolicy {
            part: FlavorPart::Os,
            policy: MatchPolicy::AllOf,
        }]));
        let candidates = vec![a.clone(), b.clone()];

        let partial: HashSet<Uuid> = [a.flavor.meta.id].into();
        assert!(!reqs.is_satisfied(&candidates, &partial));
        let full: HashSet<Uuid> = [a.flavor.meta.id, b.flavor.meta.id].into();
        assert!(reqs.is_satisfied(&candidates, &full));
    }

    #[test]
    fn latest_is_decided_by_creation_time() {
        let older = flavor(FlavorPart::Platform, 60);
        let newer = flavor(FlavorPart::Platform, 1);
        let reqs = GroupTrustRequirements::new(&group(vec![FlavorMatchPolicy {
            part: FlavorPart::Platform,
            policy: MatchPolicy::Latest,
        }]));
        let candidates = vec![older.clone(), newer.clone()];

        // Only the older one trusted: not satisfied.
        let trusted: HashSet<Uuid> = [older.flavor.meta.id].into();
        assert!(!reqs.is_satisfied(&candidates, &trusted));
        let trusted: HashSet<Uuid> = [newer.flavor.meta.id].into();
        assert!(reqs.is_satisfied(&candidates, &trusted));
    }

    #[test]
    fn part_without_candidates_is_never_satisfied() {
        let reqs = GroupTrustRequirements::new(&group(vec![FlavorMatchPolicy {
            part: FlavorPart::AssetTag,
            policy: MatchPolicy::AnyOf,
        }]));
        assert!(!reqs.is_satisfied(&[], &HashSet::new()));
    }

    #[test]
    fn empty_match_policy_is_vacuously_satisfied() {
        let reqs = GroupTrustRequirements::new(&group(Vec::new()));
        assert!(reqs.is_satisfied(&[], &HashSet::new()));
    }
}
