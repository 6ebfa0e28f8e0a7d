// tests/plan_ordering.rs

use std::error::Error;

use workplan::errors::PlanError;
use workplan::plan::{EdgeKind, NodeKind};
use workplan_test_utils::{ScriptedResolver, init_tracing, plan_with};

type TestResult = Result<(), Box<dyn Error>>;

/// `{a, b}` in the first batch, `a` needs the excluded `x`, `b` is
/// finalized by `y`; `c` (second batch) needs `a`.
fn two_batch_resolver() -> ScriptedResolver {
    ScriptedResolver::new()
        .dependency("a", "x")
        .finalized_by("b", "y")
        .dependency("c", "a")
}

#[test]
fn filtered_dependency_does_not_block_and_finalizer_follows_target() -> TestResult {
    init_tracing();

    let mut plan = plan_with(two_batch_resolver());
    plan.use_filter(|task: &str| task != "x");
    plan.submit_entry_tasks(["a", "b"])?;

    assert_eq!(plan.tasks(), vec!["a", "b", "y"]);
    assert_eq!(plan.filtered_tasks(), vec!["x"]);

    let schedule = plan.determine_execution_plan()?;
    assert_eq!(schedule.order(), vec!["a", "b", "y"]);
    assert_eq!(schedule.filtered(), &[NodeKind::local("x")]);

    // `a` has no scheduled predecessor: the filtered `x` was dropped.
    let a = &schedule.nodes()[0];
    assert!(a.predecessors.is_empty());
    Ok(())
}

#[test]
fn later_batch_runs_after_the_earlier_one() -> TestResult {
    init_tracing();

    let mut plan = plan_with(two_batch_resolver());
    plan.use_filter(|task: &str| task != "x");
    plan.submit_entry_tasks(["a", "b"])?;
    plan.determine_execution_plan()?;
    plan.submit_entry_tasks(["c"])?;

    let schedule = plan.determine_execution_plan()?;
    assert_eq!(schedule.order(), vec!["a", "b", "y", "c"]);

    let position = |name: &str| schedule.position_of(name).unwrap_or(usize::MAX);
    assert!(position("a") < position("c"));
    assert_eq!(position("y"), position("b") + 1);

    // One marker joins the two batches, and it is not public.
    let markers: Vec<_> = schedule.nodes().iter().filter(|n| n.is_marker()).collect();
    assert_eq!(markers.len(), 1);
    assert_eq!(plan.size(), 4);
    Ok(())
}

#[test]
fn marker_waits_for_every_entry_of_the_previous_batch() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new());
    plan.submit_entry_tasks(["clean"])?;
    plan.submit_entry_tasks(["build"])?;

    let schedule = plan.determine_execution_plan()?;
    let nodes = schedule.nodes();
    assert_eq!(nodes.len(), 3);

    let clean = &nodes[0];
    let marker = &nodes[1];
    let build = &nodes[2];
    assert_eq!(clean.kind, NodeKind::local("clean"));
    assert_eq!(marker.kind, NodeKind::OrdinalMarker { ordinal: 1 });
    assert_eq!(marker.predecessors, vec![(clean.id, EdgeKind::Ordinal)]);
    assert_eq!(build.predecessors, vec![(marker.id, EdgeKind::Ordinal)]);
    Ok(())
}

#[test]
fn finalizer_is_placed_directly_after_its_target() -> TestResult {
    init_tracing();

    let resolver = ScriptedResolver::new()
        .finalized_by("a", "stop-server")
        .dependency("stop-server", "logs");
    let mut plan = plan_with(resolver);
    plan.submit_entry_tasks(["a", "b", "c"])?;

    let schedule = plan.determine_execution_plan()?;
    // `logs` was discovered right after `a`, so the finalizer is emitted
    // before the unrelated `b` and `c`.
    assert_eq!(schedule.order(), vec!["a", "logs", "stop-server", "b", "c"]);

    let stop = schedule
        .nodes()
        .iter()
        .find(|n| n.kind == NodeKind::local("stop-server"))
        .ok_or("finalizer missing")?;
    assert!(stop.finalizer_only);
    assert_eq!(stop.finalizes.len(), 1);
    Ok(())
}

#[test]
fn ordering_is_idempotent_without_new_submissions() -> TestResult {
    init_tracing();

    let resolver = ScriptedResolver::new()
        .dependency("app", "lib")
        .finalized_by("lib", "report");
    let mut plan = plan_with(resolver);
    plan.submit_entry_tasks(["app"])?;

    let first = plan.determine_execution_plan()?.clone();
    assert!(!plan.requires_scheduling());
    let second = plan.determine_execution_plan()?.clone();

    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());
    Ok(())
}

#[test]
fn identical_inputs_produce_identical_fingerprints() -> TestResult {
    init_tracing();

    let build = || -> Result<String, PlanError> {
        let resolver = ScriptedResolver::new()
            .dependency("d", "b")
            .dependency("d", "c")
            .dependency("b", "a")
            .dependency("c", "a");
        let mut plan = plan_with(resolver);
        plan.submit_entry_tasks(["d"])?;
        Ok(plan.determine_execution_plan()?.fingerprint().to_string())
    };

    assert_eq!(build()?, build()?);
    assert_eq!(build()?.len(), 64);
    Ok(())
}

#[test]
fn cycle_through_a_finalizer_is_reported_by_the_ordering_pass() -> TestResult {
    init_tracing();

    // `a` needs `f`, but `f` finalizes `a` and so must run after it.
    let resolver = ScriptedResolver::new()
        .dependency("a", "f")
        .finalized_by("a", "f");
    let mut plan = plan_with(resolver);
    plan.submit_entry_tasks(["a"])?;

    let err = plan.determine_execution_plan().unwrap_err();
    match err {
        PlanError::DependencyCycle(message) => {
            assert!(message.contains("f, a"), "message: {message}");
        }
        other => panic!("expected a dependency cycle, got {other:?}"),
    }
    Ok(())
}

#[test]
fn empty_plan_has_an_empty_schedule() -> TestResult {
    let mut plan = plan_with(ScriptedResolver::new());
    let schedule = plan.determine_execution_plan()?;
    assert!(schedule.is_empty());
    assert!(schedule.order().is_empty());
    Ok(())
}

#[test]
fn soft_dependency_claimed_by_a_later_batch_is_not_a_cycle() -> TestResult {
    init_tracing();

    // `fixtures` is a soft dependency of the first batch and a hard one of
    // the second, so it ends up in the second batch's group.
    let resolver = ScriptedResolver::new()
        .soft_dependency("test", "fixtures")
        .dependency("package", "fixtures");
    let mut plan = plan_with(resolver);
    plan.submit_entry_tasks(["test"])?;
    plan.submit_entry_tasks(["package"])?;

    let fixtures = plan.node("fixtures")?;
    assert_eq!(plan.arena().node(fixtures).group(), Some(1));

    let schedule = plan.determine_execution_plan()?;
    assert_eq!(schedule.order(), vec!["fixtures", "test", "package"]);

    // The marker holds back `package` but not `fixtures`.
    let marker = schedule
        .nodes()
        .iter()
        .find(|n| n.is_marker())
        .ok_or("marker missing")?;
    let fixtures_node = schedule
        .nodes()
        .iter()
        .find(|n| n.id == fixtures)
        .ok_or("fixtures missing")?;
    assert!(!fixtures_node.predecessors.contains(&(marker.id, EdgeKind::Ordinal)));
    Ok(())
}

#[test]
fn batches_submitted_out_of_order_share_dependencies() -> TestResult {
    init_tracing();

    let resolver = ScriptedResolver::new()
        .dependency("c", "x")
        .dependency("x", "y")
        .dependency("a", "x");
    let mut plan = plan_with(resolver);
    plan.submit_entry_points(["c"], 1)?;
    plan.submit_entry_points(["a"], 0)?;

    // `x` moves to the earlier batch; `y` was already processed and keeps 1.
    assert_eq!(plan.arena().node(plan.node("x")?).group(), Some(0));
    assert_eq!(plan.arena().node(plan.node("y")?).group(), Some(1));

    let schedule = plan.determine_execution_plan()?;
    assert_eq!(schedule.order(), vec!["y", "x", "a", "c"]);
    Ok(())
}

#[test]
fn node_of_another_build_entered_in_a_later_batch() -> TestResult {
    init_tracing();

    let mut plan = plan_with(ScriptedResolver::new().other_build_dependency("a", "lib", "jar"));
    plan.submit_entry_tasks(["a"])?;
    let jar = plan
        .arena()
        .find(&NodeKind::other_build("lib", "jar"))
        .ok_or("lib:jar missing")?;
    plan.add_entry_nodes(&[jar])?;

    let schedule = plan.determine_execution_plan()?;
    assert_eq!(schedule.order(), vec!["lib:jar", "a"]);
    Ok(())
}
