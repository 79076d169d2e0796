//! Tiered dependency solver.
//!
//! Consumes the expanded namespace and emits tiers: ordered groups of
//! objects with no edges between members of the same tier. When no node is
//! free but nodes remain, the remaining subgraph contains a cycle; the
//! solver breaks it by splitting splittable members into a primary (emitted
//! now, deferrable edges dropped) and a deferred-update shadow scheduled for
//! a later tier.

use std::collections::{BTreeMap, BTreeSet};

use hubward_core::{Key, Object};

use crate::error::SyncError;
use crate::resolver::Resolver;

/// One ordered group of objects safe to process together.
#[derive(Debug)]
pub struct Tier {
    objects: Vec<Object>,
}

impl Tier {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn into_objects(self) -> Vec<Object> {
        self.objects
    }

    pub fn keys(&self) -> Vec<Key> {
        self.objects.iter().map(Object::key).collect()
    }
}

/// Emits tiers in topological order, splitting cycles as it goes.
pub struct Solver {
    nodes: BTreeMap<Key, Object>,
    /// Unmet dependency targets per node (only targets still in the graph).
    deps: BTreeMap<Key, BTreeSet<Key>>,
    /// Reverse adjacency: who is waiting on this key.
    dependents: BTreeMap<Key, BTreeSet<Key>>,
    resolver: Resolver,
}

impl Solver {
    /// Build the graph. Unresolvable edges become phantom references on the
    /// resolver and impose no ordering obligation.
    pub fn new(objects: BTreeMap<Key, Object>) -> Self {
        let mut resolver = Resolver::new(objects.keys().cloned());
        let mut deps: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();
        let mut dependents: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();

        for (key, object) in &objects {
            let entry = deps.entry(key.clone()).or_default();
            for dep in object.dependency_keys() {
                if objects.contains_key(&dep.key) {
                    if dep.key != *key {
                        entry.insert(dep.key.clone());
                        dependents
                            .entry(dep.key.clone())
                            .or_default()
                            .insert(key.clone());
                    } else {
                        // a self-edge is a one-node cycle
                        entry.insert(dep.key.clone());
                    }
                } else {
                    resolver.note_reference(dep.key.clone(), object.origin());
                }
            }
        }

        Solver {
            nodes: objects,
            deps,
            dependents,
            resolver,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    pub fn remaining(&self) -> usize {
        self.nodes.len()
    }

    /// Emit the next tier, or `None` when every object has been emitted.
    pub fn next_tier(&mut self) -> Result<Option<Tier>, SyncError> {
        if self.nodes.is_empty() {
            return Ok(None);
        }

        loop {
            let ready: Vec<Key> = self
                .nodes
                .keys()
                .filter(|key| self.deps.get(*key).map(BTreeSet::is_empty).unwrap_or(true))
                .cloned()
                .collect();

            if !ready.is_empty() {
                let mut objects = Vec::with_capacity(ready.len());
                for key in &ready {
                    let object = self.nodes.remove(key).expect("ready key is present");
                    self.deps.remove(key);
                    if let Some(waiters) = self.dependents.remove(key) {
                        for waiter in waiters {
                            if let Some(unmet) = self.deps.get_mut(&waiter) {
                                unmet.remove(key);
                            }
                        }
                    }
                    objects.push(object);
                }
                tracing::debug!("emitting tier of {} object(s)", objects.len());
                return Ok(Some(Tier { objects }));
            }

            // nothing free: the remaining subgraph is cyclic somewhere
            self.split_a_cycle()?;
        }
    }

    /// Find the minimal cyclic strongly connected set and split its
    /// splittable members.
    fn split_a_cycle(&mut self) -> Result<(), SyncError> {
        let mut components = cyclic_components(&self.deps);
        // minimal set first; ties broken by smallest member key
        components.sort_by_key(|component| {
            (component.len(), component.first().cloned())
        });

        for component in &components {
            let splittable: Vec<Key> = component
                .iter()
                .filter(|key| {
                    self.nodes
                        .get(*key)
                        .map(Object::can_split)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if splittable.is_empty() {
                continue;
            }
            for key in splittable {
                self.split_node(&key);
            }
            return Ok(());
        }

        let keys = components.into_iter().next().unwrap_or_default();
        Err(SyncError::DependencyCycle { keys })
    }

    fn split_node(&mut self, key: &Key) {
        let object = self.nodes.get(key).expect("splitting a present node");
        let Some((primary, shadow)) = object.split() else {
            return;
        };
        tracing::debug!("splitting {key} to break a dependency cycle");

        // the primary keeps the key but loses its deferrable edges
        let new_targets: BTreeSet<Key> = primary
            .dependency_keys()
            .into_iter()
            .map(|dep| dep.key)
            .filter(|target| self.nodes.contains_key(target))
            .collect();
        let old_targets = self.deps.insert(key.clone(), new_targets.clone()).unwrap_or_default();
        for dropped in old_targets.difference(&new_targets) {
            if let Some(waiting) = self.dependents.get_mut(dropped) {
                waiting.remove(key);
            }
        }
        self.nodes.insert(key.clone(), primary);

        // the shadow is a new node depending on the primary and the dropped
        // edge targets
        let shadow_key = shadow.key();
        self.resolver.note_pending(shadow_key.clone());
        let shadow_targets: BTreeSet<Key> = shadow
            .dependency_keys()
            .into_iter()
            .map(|dep| dep.key)
            .filter(|target| self.nodes.contains_key(target) || target == key)
            .collect();
        for target in &shadow_targets {
            self.dependents
                .entry(target.clone())
                .or_default()
                .insert(shadow_key.clone());
        }
        self.deps.insert(shadow_key.clone(), shadow_targets);
        self.nodes.insert(shadow_key, shadow);
    }
}

impl Iterator for Solver {
    type Item = Result<Tier, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tier().transpose()
    }
}

/// Strongly connected components that are actually cyclic: size above one,
/// or a single node with a self-edge. Components come back sorted.
fn cyclic_components(deps: &BTreeMap<Key, BTreeSet<Key>>) -> Vec<Vec<Key>> {
    let mut tarjan = TarjanState {
        deps,
        index: 0,
        indices: BTreeMap::new(),
        lowlinks: BTreeMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        components: Vec::new(),
    };
    for key in deps.keys() {
        if !tarjan.indices.contains_key(key) {
            tarjan.visit(key);
        }
    }

    let mut cyclic: Vec<Vec<Key>> = tarjan
        .components
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || deps
                    .get(&component[0])
                    .is_some_and(|targets| targets.contains(&component[0]))
        })
        .map(|mut component| {
            component.sort();
            component
        })
        .collect();
    cyclic.sort();
    cyclic
}

struct TarjanState<'a> {
    deps: &'a BTreeMap<Key, BTreeSet<Key>>,
    index: usize,
    indices: BTreeMap<Key, usize>,
    lowlinks: BTreeMap<Key, usize>,
    on_stack: BTreeSet<Key>,
    stack: Vec<Key>,
    components: Vec<Vec<Key>>,
}

impl TarjanState<'_> {
    fn visit(&mut self, key: &Key) {
        self.indices.insert(key.clone(), self.index);
        self.lowlinks.insert(key.clone(), self.index);
        self.index += 1;
        self.stack.push(key.clone());
        self.on_stack.insert(key.clone());

        if let Some(targets) = self.deps.get(key) {
            for target in targets {
                if !self.deps.contains_key(target) {
                    continue;
                }
                if !self.indices.contains_key(target) {
                    self.visit(target);
                    let target_low = self.lowlinks[target];
                    let low = self.lowlinks.get_mut(key).expect("visited");
                    *low = (*low).min(target_low);
                } else if self.on_stack.contains(target) {
                    let target_index = self.indices[target];
                    let low = self.lowlinks.get_mut(key).expect("visited");
                    *low = (*low).min(target_index);
                }
            }
        }

        if self.lowlinks[key] == self.indices[key] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                let done = member == *key;
                component.push(member);
                if done {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
