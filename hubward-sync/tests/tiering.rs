//! Ordering properties of the tier stream over a denser dependency graph.

use std::collections::BTreeMap;

use hubward_core::loader::parse_documents;
use hubward_core::{Key, KindRegistry, Object, Origin};
use hubward_sync::Solver;

fn objects_from(yaml: &str) -> BTreeMap<Key, Object> {
    let registry = KindRegistry::core();
    let docs = parse_documents(yaml, &Origin::new("data.yaml", 0)).expect("parse");
    let mut objects = BTreeMap::new();
    for doc in &docs {
        let object = registry.build(doc).expect("build").expect("known kind");
        objects.insert(object.key(), object);
    }
    objects
}

const DENSE: &str = concat!(
    "type: permission\nname: admin\n",
    "---\n",
    "type: external-repo\nname: epel\nurl: https://example.com/epel\n",
    "---\n",
    "type: user\nname: walter\ngroups: [build]\n",
    "---\n",
    "type: group\nname: build\nmembers: [walter]\npermissions: [admin]\n",
    "---\n",
    "type: tag\nname: base\npermission: admin\nexternal-repos: [epel]\n",
    "---\n",
    "type: tag\nname: middle\ninheritance: [base]\n",
    "---\n",
    "type: tag\nname: top\ninheritance: [middle, base]\n",
    "---\n",
    "type: target\nname: top\nbuild-tag: top\ndest-tag: base\n",
    "---\n",
    "type: host\nname: builder01\nchannels: [image]\n",
    "---\n",
    "type: channel\nname: image\nhosts: [builder01]\n",
    "---\n",
    "type: content-generator\nname: osbuild\nusers: [walter]\n",
);

fn solve_tiers(yaml: &str) -> Vec<Vec<Key>> {
    let objects = objects_from(yaml);
    let mut solver = Solver::new(objects);
    let mut tiers = Vec::new();
    while let Some(tier) = solver.next_tier().expect("solvable") {
        tiers.push(tier.keys());
    }
    tiers
}

/// Tier index per key, plus the final per-key objects for edge inspection.
fn tier_index(tiers: &[Vec<Key>]) -> BTreeMap<Key, usize> {
    let mut index = BTreeMap::new();
    for (tier_number, tier) in tiers.iter().enumerate() {
        for key in tier {
            assert!(
                index.insert(key.clone(), tier_number).is_none(),
                "key {key} emitted twice"
            );
        }
    }
    index
}

#[test]
fn every_declared_object_is_emitted_exactly_once() {
    let objects = objects_from(DENSE);
    let declared: Vec<Key> = objects.keys().cloned().collect();
    let tiers = solve_tiers(DENSE);
    let index = tier_index(&tiers);
    for key in declared {
        assert!(index.contains_key(&key), "{key} never emitted");
    }
}

#[test]
fn dependencies_land_in_strictly_earlier_tiers() {
    // re-solve while keeping each emitted object so its (post-split) edges
    // can be checked against tier numbers
    let objects = objects_from(DENSE);
    let mut solver = Solver::new(objects);
    let mut emitted: Vec<(usize, Object)> = Vec::new();
    let mut tier_number = 0;
    while let Some(tier) = solver.next_tier().expect("solvable") {
        for object in tier.into_objects() {
            emitted.push((tier_number, object));
        }
        tier_number += 1;
    }

    let index: BTreeMap<Key, usize> = emitted
        .iter()
        .map(|(tier, object)| (object.key(), *tier))
        .collect();

    for (tier, object) in &emitted {
        for dep in object.dependency_keys() {
            let Some(dep_tier) = index.get(&dep.key) else {
                continue; // phantom or remote-only: no ordering obligation
            };
            assert!(
                dep_tier < tier,
                "edge {} -> {} violates tier order ({dep_tier} vs {tier})",
                object.key(),
                dep.key,
            );
        }
    }
}

#[test]
fn no_tier_contains_an_internal_edge() {
    let objects = objects_from(DENSE);
    let mut solver = Solver::new(objects);
    while let Some(tier) = solver.next_tier().expect("solvable") {
        let members: Vec<Key> = tier.keys();
        for object in tier.objects() {
            for dep in object.dependency_keys() {
                assert!(
                    !members.contains(&dep.key),
                    "intra-tier edge {} -> {}",
                    object.key(),
                    dep.key,
                );
            }
        }
    }
}

#[test]
fn shadows_follow_their_primaries() {
    let tiers = solve_tiers(DENSE);
    let index = tier_index(&tiers);
    for (key, tier) in &index {
        if key.is_deferred() {
            let primary_tier = index
                .get(&key.primary())
                .unwrap_or_else(|| panic!("shadow {key} without a primary"));
            assert!(
                primary_tier < tier,
                "shadow {key} not after its primary ({primary_tier} vs {tier})"
            );
        }
    }
}
