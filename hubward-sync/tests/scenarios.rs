//! End-to-end reconciliation scenarios against the snapshot hub.

use hubward_core::loader::parse_documents;
use hubward_core::{ChangeOp, ChangeState, Key, Origin};
use hubward_expand::{Namespace, Redefine};
use hubward_sync::{
    load_namespace, pipeline, FailureReason, Mode, PipelineOptions, Processor, ProcessorOptions,
    ReportState, SnapshotHub, Solver, SyncError,
};

fn namespace_from(yaml: &str) -> Namespace {
    let docs = parse_documents(yaml, &Origin::new("data.yaml", 0)).expect("parse");
    let mut ns = Namespace::new(Redefine::Error);
    ns.ingest_all(docs).expect("ingest");
    ns.expand().expect("expand");
    ns
}

fn run_mode(
    hub: &mut SnapshotHub,
    yaml: &str,
    mode: Mode,
    skip_phantoms: bool,
) -> Result<hubward_sync::ProcessorOutcome, SyncError> {
    let options = PipelineOptions {
        skip_phantoms,
        ..PipelineOptions::default()
    };
    pipeline::run(hub, namespace_from(yaml), mode, &options)
}

// -- scenario: simple chain --------------------------------------------------

#[test]
fn simple_chain_creates_parent_then_child() {
    let mut hub = SnapshotHub::empty();
    let outcome = run_mode(
        &mut hub,
        "type: tag\nname: a\n---\ntype: tag\nname: b\ninheritance: [a]\n",
        Mode::Apply,
        false,
    )
    .expect("apply");

    assert!(outcome.is_clean());
    assert_eq!(outcome.summary.total_objects, 2);

    let creates: Vec<&str> = outcome
        .reports
        .iter()
        .flat_map(|r| &r.changes)
        .filter(|c| c.op == ChangeOp::CreateObject)
        .map(|c| c.description.as_str())
        .collect();
    assert_eq!(creates, vec!["Create tag a", "Create tag b"]);

    let inheritance_ops: usize = outcome
        .reports
        .iter()
        .flat_map(|r| &r.changes)
        .filter(|c| c.op == ChangeOp::SetInheritance)
        .count();
    assert_eq!(inheritance_ops, 1);

    // every change landed on the hub
    assert!(hub.contains(&Key::new("tag", "a")));
    assert!(hub.contains(&Key::new("tag", "b")));
    assert!(outcome
        .reports
        .iter()
        .all(|r| r.state == ReportState::Applied));
}

// -- scenario: missing dependency --------------------------------------------

#[test]
fn missing_dependency_blocks_apply_without_writes() {
    let mut hub = SnapshotHub::empty();
    let err = run_mode(
        &mut hub,
        "type: tag\nname: b\ninheritance: [missing]\n",
        Mode::Apply,
        false,
    )
    .unwrap_err();

    assert!(matches!(err, SyncError::Phantoms { .. }));
    assert!(hub.write_log().is_empty(), "no write may be issued");
}

#[test]
fn missing_dependency_still_compares() {
    let mut hub = SnapshotHub::empty();
    let outcome = run_mode(
        &mut hub,
        "type: tag\nname: b\ninheritance: [missing]\n",
        Mode::Compare,
        false,
    )
    .expect("compare");

    assert_eq!(outcome.summary.phantoms, vec![Key::new("tag", "missing")]);
    let report = &outcome.reports[0];
    assert_eq!(report.key, Key::new("tag", "b"));
    assert!(!report.changes.is_empty());
    assert!(report
        .changes
        .iter()
        .all(|c| c.state == ChangeState::WouldApply));
}

#[test]
fn skip_phantoms_drops_tainted_objects() {
    let mut hub = SnapshotHub::empty();
    let outcome = run_mode(
        &mut hub,
        concat!(
            "type: tag\nname: ok\n",
            "---\n",
            "type: tag\nname: b\ninheritance: [missing]\n",
            "---\n",
            "type: target\nname: t\nbuild-tag: b\ndest-tag: b\n",
        ),
        Mode::Apply,
        true,
    )
    .expect("apply with skip-phantoms");

    // tag:b and its dependent target are dropped; tag:ok proceeds
    assert_eq!(
        outcome.summary.dropped_for_phantoms,
        vec![Key::new("tag", "b"), Key::new("target", "t")]
    );
    assert!(hub.contains(&Key::new("tag", "ok")));
    assert!(!hub.contains(&Key::new("tag", "b")));
}

// -- scenario: mutual cycle --------------------------------------------------

#[test]
fn mutual_inheritance_cycle_applies_in_two_tiers() {
    let mut hub = SnapshotHub::empty();
    let outcome = run_mode(
        &mut hub,
        concat!(
            "type: tag\nname: a_1\ninheritance: [a_2]\n",
            "---\n",
            "type: tag\nname: a_2\ninheritance: [a_1]\n",
        ),
        Mode::Apply,
        false,
    )
    .expect("apply");

    assert!(outcome.is_clean());
    let keys: Vec<String> = outcome.reports.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "tag:a_1".to_owned(),
            "tag:a_2".to_owned(),
            "deferred-tag:a_1".to_owned(),
            "deferred-tag:a_2".to_owned(),
        ]
    );

    // the shadows carried the inheritance updates
    for deferred in &outcome.reports[2..] {
        assert_eq!(deferred.changes.len(), 1);
        assert_eq!(deferred.changes[0].op, ChangeOp::SetInheritance);
        assert_eq!(deferred.changes[0].state, ChangeState::Applied);
    }

    // hub state reflects both links
    let text = hub.to_yaml().expect("dump state");
    assert!(text.contains("a_1"));
    assert!(text.contains("inheritance"));
}

// -- scenario: exact members -------------------------------------------------

#[test]
fn exact_members_add_and_remove_against_observed() {
    let mut hub = SnapshotHub::from_yaml(concat!(
        "user:\n",
        "  u1: {enabled: true, permissions: []}\n",
        "  u2: {enabled: true, permissions: []}\n",
        "  u3: {enabled: true, permissions: []}\n",
        "group:\n",
        "  g: {enabled: true, members: [u2, u3], permissions: []}\n",
    ))
    .expect("hub");

    let outcome = run_mode(
        &mut hub,
        concat!(
            "type: user\nname: u1\n",
            "---\n",
            "type: user\nname: u2\n",
            "---\n",
            "type: group\nname: g\nmembers: [u1, u2]\nexact-members: true\n",
        ),
        Mode::Apply,
        false,
    )
    .expect("apply");

    assert!(outcome.is_clean());
    let group_report = outcome
        .reports
        .iter()
        .find(|r| r.key == Key::new("group", "g"))
        .expect("group report");
    let ops: Vec<(ChangeOp, &str)> = group_report
        .changes
        .iter()
        .map(|c| (c.op, c.description.as_str()))
        .collect();
    assert!(ops.contains(&(ChangeOp::AddMember, "Add member u1")));
    assert!(ops.contains(&(ChangeOp::RemoveMember, "Remove member u3")));
    assert_eq!(group_report.changes.len(), 2);
}

#[test]
fn lax_members_leave_observed_extras() {
    let mut hub = SnapshotHub::from_yaml(concat!(
        "user:\n",
        "  u1: {enabled: true, permissions: []}\n",
        "  u2: {enabled: true, permissions: []}\n",
        "group:\n",
        "  g: {enabled: true, members: [u2, u3], permissions: []}\n",
    ))
    .expect("hub");

    let outcome = run_mode(
        &mut hub,
        concat!(
            "type: user\nname: u1\n",
            "---\n",
            "type: user\nname: u2\n",
            "---\n",
            "type: group\nname: g\nmembers: [u1, u2]\n",
        ),
        Mode::Apply,
        false,
    )
    .expect("apply");

    let group_report = outcome
        .reports
        .iter()
        .find(|r| r.key == Key::new("group", "g"))
        .expect("group report");
    assert!(group_report
        .changes
        .iter()
        .all(|c| c.op != ChangeOp::RemoveMember));
}

// -- scenario: content generator creation --------------------------------------

#[test]
fn content_generator_creation_grants_then_revokes() {
    let mut hub = SnapshotHub::empty();
    let yaml = concat!(
        "type: user\nname: svc-osbuild\n",
        "---\n",
        "type: content-generator\nname: osbuild\nusers: [svc-osbuild]\n",
    );
    let outcome = run_mode(&mut hub, yaml, Mode::Apply, false).expect("apply");
    assert!(outcome.is_clean());

    // creation happens as a grant-to-self side effect, then the bootstrap
    // grant is revoked
    let cg_writes: Vec<&str> = hub
        .write_log()
        .iter()
        .map(String::as_str)
        .filter(|m| m.ends_with("CGAccess"))
        .collect();
    assert_eq!(
        cg_writes,
        vec!["grantCGAccess", "revokeCGAccess", "grantCGAccess"]
    );

    // only the declared user holds access; the session account does not
    let state = hub.to_yaml().expect("state");
    assert!(state.contains("svc-osbuild"));
    assert!(hub.contains(&Key::new("content-generator", "osbuild")));
    let bootstrap = format!("- {}", hub.current_user());
    assert!(
        !state.contains(&bootstrap),
        "bootstrap grantee left behind: {state}"
    );

    // a second apply finds nothing to do
    let second = run_mode(&mut hub, yaml, Mode::Apply, false).expect("second apply");
    assert_eq!(second.summary.total_changes, 0);
}

// -- scenario: template expansion through the full pipeline ------------------

#[test]
fn template_call_expands_and_applies() {
    let mut hub = SnapshotHub::empty();
    let outcome = run_mode(
        &mut hub,
        concat!(
            "type: template\n",
            "name: build-tag-template\n",
            "defaults:\n",
            "  arches: [x86_64]\n",
            "template: |\n",
            "  type: tag\n",
            "  name: {{ name }}\n",
            "  arches: {{ arches | json_encode() }}\n",
            "---\n",
            "type: build-tag-template\n",
            "name: f42-build\n",
        ),
        Mode::Apply,
        false,
    )
    .expect("apply");

    assert!(outcome.is_clean());
    assert_eq!(outcome.reports.len(), 1);
    let report = &outcome.reports[0];
    assert_eq!(report.key, Key::new("tag", "f42-build"));
    assert_eq!(report.origin.trace.len(), 1);
    assert!(hub.contains(&Key::new("tag", "f42-build")));
}

// -- scenario: apply failure cascade -----------------------------------------

#[test]
fn remote_failure_cascades_to_dependents() {
    let mut hub = SnapshotHub::empty();
    hub.fail_on("createTag", "b");

    let outcome = run_mode(
        &mut hub,
        concat!(
            "type: tag\nname: a\n",
            "---\n",
            "type: tag\nname: b\n",
            "---\n",
            "type: target\nname: t\nbuild-tag: b\ndest-tag: b\n",
        ),
        Mode::Apply,
        false,
    )
    .expect("run completes despite per-entity failures");

    assert!(!outcome.is_clean());

    let by_key = |key: Key| {
        outcome
            .reports
            .iter()
            .find(|r| r.key == key)
            .unwrap_or_else(|| panic!("no report for {key}"))
    };

    assert_eq!(by_key(Key::new("tag", "a")).state, ReportState::Applied);

    let failed_tag = by_key(Key::new("tag", "b"));
    assert_eq!(failed_tag.state, ReportState::Failed);
    assert!(matches!(
        failed_tag.failure,
        Some(FailureReason::Apply { .. })
    ));

    let target = by_key(Key::new("target", "t"));
    assert_eq!(target.state, ReportState::Failed);
    match &target.failure {
        Some(FailureReason::Upstream { dependency }) => {
            assert_eq!(*dependency, Key::new("tag", "b"));
        }
        other => panic!("expected upstream failure, got {other:?}"),
    }

    // the target contributed no remote calls at all
    assert!(!hub.write_log().iter().any(|m| m == "createBuildTarget"));
}

// -- properties ---------------------------------------------------------------

#[test]
fn second_apply_is_empty_diff_idempotent() {
    let yaml = concat!(
        "type: permission\nname: admin\n",
        "---\n",
        "type: tag\nname: a\npermission: admin\narches: [x86_64]\n",
        "---\n",
        "type: tag\nname: b\ninheritance: [a]\n",
        "---\n",
        "type: target\nname: b\nbuild-tag: a\ndest-tag: b\n",
    );

    let mut hub = SnapshotHub::empty();
    let first = run_mode(&mut hub, yaml, Mode::Apply, false).expect("first apply");
    assert!(first.is_clean());
    assert!(first.summary.applied_changes > 0);

    let second = run_mode(&mut hub, yaml, Mode::Apply, false).expect("second apply");
    assert!(second.is_clean());
    assert_eq!(
        second.summary.total_changes, 0,
        "second run must find nothing to do: {:?}",
        second
            .reports
            .iter()
            .flat_map(|r| &r.changes)
            .map(|c| &c.description)
            .collect::<Vec<_>>()
    );
}

#[test]
fn compare_never_mutates_the_remote() {
    let mut hub = SnapshotHub::from_yaml("tag:\n  existing: {locked: true}\n").expect("hub");
    let before = hub.to_yaml().expect("state");

    let outcome = run_mode(
        &mut hub,
        "type: tag\nname: existing\n---\ntype: tag\nname: brand-new\n",
        Mode::Compare,
        false,
    )
    .expect("compare");

    assert!(outcome.summary.would_apply_changes > 0);
    assert_eq!(hub.to_yaml().expect("state"), before, "remote state changed");
    assert!(hub.write_log().is_empty(), "compare submitted a write");
}

#[test]
fn discovery_lets_remote_only_dependencies_satisfy_apply() {
    // the parent tag exists only on the hub; discovery promotes it from
    // phantom to discovered and apply proceeds
    let mut hub = SnapshotHub::from_yaml("tag:\n  remote-parent: {}\n").expect("hub");
    let outcome = run_mode(
        &mut hub,
        "type: tag\nname: child\ninheritance: [remote-parent]\n",
        Mode::Apply,
        false,
    )
    .expect("apply");

    assert!(outcome.is_clean());
    assert!(hub.contains(&Key::new("tag", "child")));
}

#[test]
fn batch_deadline_fails_every_object_in_the_chunk() {
    let mut hub = SnapshotHub::empty();
    hub.set_latency(std::time::Duration::from_secs(10));

    let options = PipelineOptions {
        deadline: Some(std::time::Duration::from_millis(50)),
        discover: false,
        ..PipelineOptions::default()
    };
    let outcome = pipeline::run(
        &mut hub,
        namespace_from("type: tag\nname: a\n---\ntype: tag\nname: b\n"),
        Mode::Apply,
        &options,
    )
    .expect("run survives the batch failure");

    assert_eq!(outcome.summary.failed, 2);
    assert!(outcome
        .reports
        .iter()
        .all(|r| matches!(r.failure, Some(FailureReason::Batch { .. }))));
}

#[test]
fn cancellation_discards_remaining_tiers() {
    let mut hub = SnapshotHub::empty();
    let namespace = namespace_from("type: tag\nname: a\n---\ntype: tag\nname: b\ninheritance: [a]\n");
    let solver = Solver::new(namespace.into_objects());
    let processor = Processor::new(solver, &mut hub, ProcessorOptions::apply());
    let token = processor.cancel_token();
    token.cancel();

    let outcome = processor.run().expect("run");
    assert!(outcome.summary.cancelled);
    assert!(outcome.reports.is_empty());
    assert!(hub.write_log().is_empty());
}

// -- dump ---------------------------------------------------------------------

#[test]
fn fetched_state_reloads_as_a_clean_namespace() {
    // seed a hub by applying, then dump and re-expand the dumped documents
    let mut hub = SnapshotHub::empty();
    run_mode(
        &mut hub,
        "type: tag\nname: a\narches: [x86_64]\nlocked: true\n",
        Mode::Apply,
        false,
    )
    .expect("seed");

    let documents = hubward_sync::fetch_documents(
        &mut hub,
        &[Key::new("tag", "a")],
        false,
        None,
    )
    .expect("fetch");
    let text = hubward_sync::render_documents(&documents).expect("render");

    // dumped output is itself valid configuration
    let ns = namespace_from(&text);
    assert!(ns.get(&Key::new("tag", "a")).is_some());

    // and comparing it against the same hub is a no-op
    let outcome = run_mode(&mut hub, &text, Mode::Compare, false).expect("compare");
    assert_eq!(outcome.summary.total_changes, 0);
}

#[test]
fn load_namespace_reads_template_and_data_paths() {
    use std::fs;
    let dir = tempfile::TempDir::new().expect("tempdir");
    let templates = dir.path().join("templates");
    let data = dir.path().join("data");
    fs::create_dir_all(&templates).unwrap();
    fs::create_dir_all(&data).unwrap();
    fs::write(
        templates.join("pair.yaml"),
        concat!(
            "type: template\n",
            "name: pair\n",
            "template: |\n",
            "  type: tag\n",
            "  name: {{ name }}-build\n",
            "  ---\n",
            "  type: tag\n",
            "  name: {{ name }}-candidate\n",
        ),
    )
    .unwrap();
    fs::write(data.join("tags.yaml"), "type: pair\nname: f42\n").unwrap();

    let namespace = load_namespace(
        &[data],
        &[templates],
        &PipelineOptions::default(),
    )
    .expect("load");
    assert_eq!(namespace.len(), 2);
    assert!(namespace.get(&Key::new("tag", "f42-build")).is_some());
}
