//! Read-only fetch: render observed remote state as configuration
//! documents, using the same default-elision rules as compare.

use serde_yaml::Mapping;

use hubward_core::models::{observed_doc, read_calls_for};
use hubward_core::Key;

use crate::batch::{Batch, Promise};
use crate::error::SyncError;
use crate::resolver::Resolver;
use crate::session::Session;

/// Fetch the observed state for `keys` with a single read multicall.
///
/// Unknown kinds yield `None`; so do objects absent from the remote.
pub fn fetch_documents<S: Session>(
    session: &mut S,
    keys: &[Key],
    include_defaults: bool,
    deadline: Option<std::time::Duration>,
) -> Result<Vec<(Key, Option<Mapping>)>, SyncError> {
    let mut batch = Batch::new();
    let mut probes: Vec<(Key, Option<Vec<Promise>>)> = Vec::with_capacity(keys.len());
    for key in keys {
        match read_calls_for(key) {
            Some(calls) => {
                let promises = calls.into_iter().map(|call| batch.submit(call)).collect();
                probes.push((key.clone(), Some(promises)));
            }
            None => probes.push((key.clone(), None)),
        }
    }

    let results = session.execute(&batch, deadline)?;

    let mut documents = Vec::with_capacity(probes.len());
    for (key, promises) in probes {
        let Some(promises) = promises else {
            documents.push((key, None));
            continue;
        };
        let observed = results.settle_all(&promises);
        let doc = observed_doc(&key, &observed, include_defaults)
            .map_err(|failure| SyncError::Session(crate::error::SessionError::Transport(
                format!("read of {key} failed: {}", failure.fault),
            )))?;
        documents.push((key, doc));
    }
    Ok(documents)
}

/// Probe the remote for phantom keys and promote the ones that exist to
/// discovered, clearing their placeholders.
pub fn discover_phantoms<S: Session>(
    resolver: &mut Resolver,
    session: &mut S,
    deadline: Option<std::time::Duration>,
) -> Result<(), SyncError> {
    let keys = resolver.phantom_keys();
    if keys.is_empty() {
        return Ok(());
    }

    let mut batch = Batch::new();
    let mut probes: Vec<(Key, Promise)> = Vec::new();
    for key in keys {
        if let Some(calls) = read_calls_for(&key) {
            if let Some(first) = calls.into_iter().next() {
                let promise = batch.submit(first);
                probes.push((key, promise));
            }
        }
    }

    let results = session.execute(&batch, deadline)?;
    for (key, promise) in probes {
        if let Ok(value) = promise.settle(&results) {
            if !value.is_null() {
                tracing::debug!("phantom {key} exists remotely; marking discovered");
                resolver.mark_discovered(&key);
            }
        }
    }
    Ok(())
}

/// Match `text` against a shell-style pattern supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&pattern[1..], text)
                    || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => matches(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => matches(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pattern, &text)
}

/// Expand dump patterns (`kind:pattern` or a bare pattern applied to the
/// default kinds) against the available keys.
pub fn select_keys(available: &[Key], patterns: &[String], default_kinds: &[&str]) -> Vec<Key> {
    let mut selected: Vec<Key> = Vec::new();
    for pattern in patterns {
        let (kinds, name_pattern): (Vec<&str>, &str) = match pattern.split_once(':') {
            Some((kind, rest)) => (vec![kind], rest),
            None => (default_kinds.to_vec(), pattern.as_str()),
        };
        for key in available {
            if kinds.contains(&key.kind.as_str())
                && glob_match(name_pattern, &key.name)
                && !selected.contains(key)
            {
                selected.push(key.clone());
            }
        }
    }
    selected.sort();
    selected
}

/// Render fetched documents as a YAML stream, skipping absent objects.
pub fn render_documents(documents: &[(Key, Option<Mapping>)]) -> Result<String, SyncError> {
    let mut out = String::new();
    for (key, doc) in documents {
        let Some(doc) = doc else {
            continue;
        };
        if !out.is_empty() {
            out.push_str("---\n");
        }
        let rendered = serde_yaml::to_string(&serde_yaml::Value::Mapping(doc.clone())).map_err(
            |err| SyncError::Snapshot {
                path: "<render>".into(),
                message: format!("could not render {key}: {err}"),
            },
        )?;
        out.push_str(&rendered);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SnapshotHub;

    #[rstest::rstest]
    #[case("f42-*", "f42-build", true)]
    #[case("*", "anything", true)]
    #[case("f4?", "f42", true)]
    #[case("f42-*", "f41-build", false)]
    #[case("exact", "exact", true)]
    #[case("exact", "exactly", false)]
    #[case("*build*", "f42-build-candidate", true)]
    fn glob_cases(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }

    #[test]
    fn select_keys_honours_kind_prefix_and_defaults() {
        let available = vec![
            Key::new("tag", "f42-build"),
            Key::new("tag", "f41-build"),
            Key::new("target", "f42"),
            Key::new("user", "walter"),
        ];
        let selected = select_keys(
            &available,
            &["tag:f42-*".to_owned(), "f42".to_owned()],
            &["tag", "target"],
        );
        assert_eq!(
            selected,
            vec![Key::new("tag", "f42-build"), Key::new("target", "f42")]
        );
    }

    #[test]
    fn fetch_renders_only_existing_objects() {
        let mut hub = SnapshotHub::from_yaml(concat!(
            "tag:\n",
            "  f42-build:\n",
            "    locked: true\n",
            "    arches: [x86_64]\n",
        ))
        .expect("load");
        let keys = vec![Key::new("tag", "f42-build"), Key::new("tag", "ghost")];
        let documents = fetch_documents(&mut hub, &keys, false, None).expect("fetch");
        assert!(documents[0].1.is_some());
        assert!(documents[1].1.is_none());

        let text = render_documents(&documents).expect("render");
        assert!(text.contains("name: f42-build"));
        assert!(text.contains("locked: true"));
        assert!(!text.contains("ghost"));
    }

    #[test]
    fn discovery_promotes_existing_phantoms() {
        let mut hub = SnapshotHub::from_yaml("tag:\n  exists-remotely: {}\n").expect("load");
        let mut resolver = Resolver::new([]);
        let origin = hubward_core::Origin::new("d.yaml", 1);
        resolver.note_reference(Key::new("tag", "exists-remotely"), &origin);
        resolver.note_reference(Key::new("tag", "truly-missing"), &origin);

        discover_phantoms(&mut resolver, &mut hub, None).expect("discover");
        assert_eq!(
            resolver.phantom_keys(),
            vec![Key::new("tag", "truly-missing")]
        );
        assert_eq!(
            resolver.discovered_keys(),
            vec![Key::new("tag", "exists-remotely")]
        );
    }
}
