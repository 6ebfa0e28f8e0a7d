// tests/plan_lifecycle.rs

use std::error::Error;

use workplan::errors::PlanError;
use workplan::plan::{NodeKind, PrecomputedNode, Selection};
use workplan::types::TaskOutcome;
use workplan_test_utils::{ScriptedResolver, init_tracing, plan_with};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn finalize_is_idempotent_and_blocks_further_submissions() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new().dependency("b", "a"));
    plan.submit_entry_tasks(["b"])?;

    let first = plan.finalize_plan()?;
    let second = plan.finalize_plan()?;
    assert_eq!(first.schedule(), second.schedule());
    assert!(plan.is_finalized());
    assert_eq!(plan.resolver().clear_calls(), 1);

    assert!(matches!(
        plan.submit_entry_tasks(["c"]),
        Err(PlanError::AlreadyFinalized)
    ));
    assert!(matches!(plan.retain_first(1), Err(PlanError::AlreadyFinalized)));
    Ok(())
}

#[test]
fn finalize_runs_the_ordering_pass_when_needed() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new().dependency("b", "a"));
    plan.submit_entry_tasks(["b"])?;
    assert!(plan.schedule().is_none());

    let finalized = plan.finalize_plan()?;
    assert_eq!(finalized.schedule().order(), vec!["a", "b"]);
    assert_eq!(finalized.size(), 2);
    Ok(())
}

#[test]
fn close_resets_every_collection() -> TestResult {
    init_tracing();

    let resolver = ScriptedResolver::new()
        .dependency("a", "x")
        .finalized_by("a", "f");
    let mut plan = plan_with(resolver);
    plan.use_filter(|task: &str| task != "x");
    plan.on_complete(|_| {});
    plan.submit_entry_tasks(["a"])?;
    plan.submit_entry_tasks(["b"])?;
    plan.finalize_plan()?;

    plan.close();

    assert!(plan.entry_nodes().is_empty());
    assert!(plan.node_index().is_empty());
    assert!(plan.filtered_nodes().is_empty());
    assert!(plan.finalizer_nodes().is_empty());
    assert!(plan.ordinals().is_empty());
    assert_eq!(plan.completion_handler_count(), 0);
    assert!(!plan.is_finalized());
    assert!(!plan.requires_scheduling());
    assert!(plan.schedule().is_none());

    for id in ["a", "b", "x", "f"].map(NodeKind::local).iter().filter_map(|k| plan.arena().find(k)) {
        let node = plan.arena().node(id);
        assert!(!node.is_required());
        assert!(!node.is_filtered());
        assert!(!node.dependencies_processed());
        assert_eq!(node.group(), None);
    }
    Ok(())
}

#[test]
fn closed_plan_can_be_reused_with_the_same_nodes() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new().dependency("b", "a"));
    plan.submit_entry_tasks(["b"])?;
    let b_before = plan.node("b")?;
    plan.determine_execution_plan()?;
    plan.close();

    plan.submit_entry_tasks(["b"])?;
    assert_eq!(plan.node("b")?, b_before);
    assert_eq!(plan.tasks(), vec!["a", "b"]);
    assert_eq!(plan.resolver().resolve_count("b"), 2);
    assert_eq!(plan.determine_execution_plan()?.order(), vec!["a", "b"]);
    Ok(())
}

#[test]
fn executed_nodes_cannot_run_in_a_later_plan() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new().dependency("b", "a"));
    plan.submit_entry_tasks(["a"])?;
    let finalized = plan.finalize_plan()?;

    let Selection::Ready(a) = finalized.select_next() else {
        panic!("expected a to be ready");
    };
    finalized.finish_node(a.id, TaskOutcome::Success)?;
    assert_eq!(finalized.select_next(), Selection::Finished);
    plan.close();

    let a_node = plan.arena().node(a.id);
    assert!(a_node.cannot_run_in_any_plan());

    plan.submit_entry_tasks(["b"])?;
    assert_eq!(plan.tasks(), vec!["b"]);
    assert_eq!(plan.determine_execution_plan()?.order(), vec!["b"]);
    Ok(())
}

#[test]
fn precomputed_nodes_are_scheduled_without_resolution() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new());
    let ids = plan.set_precomputed_nodes(vec![
        PrecomputedNode::new(NodeKind::local("compile")),
        PrecomputedNode {
            dependencies: vec![0],
            finalizers: vec![2],
            ..PrecomputedNode::new(NodeKind::local("test"))
        },
        PrecomputedNode::new(NodeKind::local("report")),
        PrecomputedNode {
            dependencies: vec![0],
            ..PrecomputedNode::new(NodeKind::local("package"))
        },
    ])?;

    assert_eq!(ids.len(), 4);
    assert!(plan.resolver().resolved().is_empty());
    assert_eq!(plan.tasks(), vec!["compile", "test", "report", "package"]);
    assert_eq!(plan.finalizer_nodes(), &[ids[2]]);

    let order = plan.determine_execution_plan()?.order();
    assert_eq!(order, vec!["compile", "test", "report", "package"]);
    Ok(())
}

#[test]
fn precomputed_nodes_are_rejected_once_anything_is_scheduled() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new());
    plan.set_precomputed_nodes(vec![PrecomputedNode::new(NodeKind::local("a"))])?;
    assert!(matches!(
        plan.set_precomputed_nodes(vec![PrecomputedNode::new(NodeKind::local("b"))]),
        Err(PlanError::AlreadyScheduled)
    ));

    let mut plan = plan_with(ScriptedResolver::new());
    plan.submit_entry_tasks(["a"])?;
    assert!(matches!(
        plan.set_precomputed_nodes(vec![PrecomputedNode::new(NodeKind::local("b"))]),
        Err(PlanError::AlreadyScheduled)
    ));
    Ok(())
}

#[test]
fn precomputed_reference_out_of_range_is_an_error() {
    let mut plan = plan_with(ScriptedResolver::new());
    let err = plan
        .set_precomputed_nodes(vec![PrecomputedNode {
            dependencies: vec![5],
            ..PrecomputedNode::new(NodeKind::local("a"))
        }])
        .unwrap_err();
    assert!(matches!(err, PlanError::ResolutionFailed { ref node, .. } if node == "a"));
}

#[test]
fn retain_first_keeps_the_prefix_and_its_lookups() -> TestResult {
    init_tracing();

    let resolver = ScriptedResolver::new().dependency("b", "a");
    let mut plan = plan_with(resolver);
    plan.submit_entry_tasks(["b", "c", "d"])?;
    assert_eq!(plan.tasks(), vec!["a", "b", "c", "d"]);

    plan.retain_first(2)?;

    assert_eq!(plan.tasks(), vec!["a", "b"]);
    assert!(plan.node("a").is_ok());
    assert!(plan.node("b").is_ok());
    assert!(matches!(plan.node("c"), Err(PlanError::TaskNotFound(_))));
    assert!(matches!(plan.node("d"), Err(PlanError::TaskNotFound(_))));
    assert!(plan.requires_scheduling());

    // Removed nodes may be discovered again.
    plan.submit_entry_tasks(["d"])?;
    assert_eq!(plan.tasks(), vec!["a", "b", "d"]);
    Ok(())
}

#[test]
fn retain_first_beyond_the_size_keeps_everything() -> TestResult {
    let mut plan = plan_with(ScriptedResolver::new());
    plan.submit_entry_tasks(["a", "b"])?;
    plan.retain_first(10)?;
    assert_eq!(plan.tasks(), vec!["a", "b"]);
    Ok(())
}

#[test]
fn node_ids_follow_arena_positions() {
    let mut plan = plan_with(ScriptedResolver::new());
    let arena = plan.arena_mut();
    let ids: Vec<_> = (0..300)
        .map(|i| arena.get_or_create(NodeKind::local(format!("t{i}"))))
        .collect();

    assert_eq!(arena.len(), 300);
    for (position, id) in ids.iter().enumerate() {
        assert_eq!(id.index(), position);
    }
    assert_eq!(ids[299].to_string(), "#299");
    // Asking again hands back the same id.
    assert_eq!(arena.get_or_create(NodeKind::local("t42")), ids[42]);
}
