// tests/property/plan.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use proptest::prelude::*;
use workplan::plan::{ExecutionPlan, NodeKind, Selection};
use workplan::types::TaskOutcome;
use workplan_test_utils::{ScriptedResolver, plan_with};

/// A random acyclic task graph: task N may only depend on tasks 0..N-1.
#[derive(Debug, Clone)]
struct Scenario {
    /// Per task: dependency -> `true` if the dependency is soft.
    dependencies: Vec<BTreeMap<usize, bool>>,
    /// `(task, k)`: task depends on `lib:rK` of another build.
    remote: Vec<(usize, usize)>,
    finalizers: Vec<(usize, usize)>,
    batches: Vec<Vec<usize>>,
    /// Ordinal of each batch when submitted with explicit ordinals.
    ordinals: Vec<u32>,
    explicit_ordinals: bool,
    excluded: BTreeSet<usize>,
}

impl Scenario {
    fn ordinal_of(&self, batch: usize) -> u32 {
        if self.explicit_ordinals {
            self.ordinals[batch]
        } else {
            batch as u32
        }
    }

    /// Nothing waits for `task`: no dependents and no finalizers.
    fn is_leaf(&self, task: usize) -> bool {
        !self.dependencies.iter().any(|deps| deps.contains_key(&task))
            && !self.finalizers.iter().any(|(target, _)| *target == task)
    }
}

fn task(i: usize) -> String {
    format!("task_{i:02}")
}

fn scenario_strategy(max_tasks: usize) -> impl Strategy<Value = Scenario> {
    (2..=max_tasks, 1..4usize).prop_flat_map(|(num_tasks, num_batches)| {
        let deps = proptest::collection::vec(
            proptest::collection::vec((any::<usize>(), any::<bool>()), 0..3),
            num_tasks,
        );
        let remote = proptest::collection::vec((0..num_tasks, 0..2usize), 0..3);
        let finalizers = proptest::collection::vec((0..num_tasks, 0..num_tasks), 0..3);
        let batches = proptest::collection::vec(
            proptest::collection::vec(0..num_tasks, 1..3),
            num_batches,
        );
        let ordinals = Just((0..num_batches as u32).collect::<Vec<_>>()).prop_shuffle();
        let excluded = proptest::collection::btree_set(0..num_tasks, 0..2);

        (deps, remote, finalizers, batches, ordinals, any::<bool>(), excluded).prop_map(
            |(raw, remote, finalizers, batches, ordinals, explicit_ordinals, excluded)| {
                let dependencies = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            BTreeMap::new()
                        } else {
                            picks.into_iter().map(|(p, soft)| (p % i, soft)).collect()
                        }
                    })
                    .collect();
                // A finalizer must come after its target in the numbering so
                // it can never be a dependency of that target.
                let finalizers = finalizers
                    .into_iter()
                    .filter(|(target, finalizer)| finalizer > target)
                    .collect();
                Scenario {
                    dependencies,
                    remote,
                    finalizers,
                    batches,
                    ordinals,
                    explicit_ordinals,
                    excluded,
                }
            },
        )
    })
}

fn resolver_for(scenario: &Scenario) -> ScriptedResolver {
    let mut resolver = ScriptedResolver::new();
    for (i, deps) in scenario.dependencies.iter().enumerate() {
        for (dep, soft) in deps {
            resolver = if *soft {
                resolver.soft_dependency(&task(i), &task(*dep))
            } else {
                resolver.dependency(&task(i), &task(*dep))
            };
        }
    }
    for (i, k) in &scenario.remote {
        resolver = resolver.other_build_dependency(&task(*i), "lib", &format!("r{k}"));
    }
    for (target, finalizer) in &scenario.finalizers {
        resolver = resolver.finalized_by(&task(*target), &task(*finalizer));
    }
    resolver
}

fn submit_batches(
    plan: &mut ExecutionPlan<ScriptedResolver>,
    scenario: &Scenario,
) -> Result<(), TestCaseError> {
    for (b, batch) in scenario.batches.iter().enumerate() {
        let tasks = batch.iter().map(|i| task(*i));
        let submitted = if scenario.explicit_ordinals {
            plan.submit_entry_points(tasks, scenario.ordinal_of(b))
        } else {
            plan.submit_entry_tasks(tasks)
        };
        submitted.map_err(|e| TestCaseError::fail(e.to_string()))?;
    }
    Ok(())
}

struct Ordered {
    order: Vec<String>,
    fingerprint: String,
    groups: BTreeMap<usize, Option<u32>>,
}

fn order_for(scenario: &Scenario) -> Result<Ordered, TestCaseError> {
    let mut plan = plan_with(resolver_for(scenario));
    let excluded: HashSet<String> = scenario.excluded.iter().map(|i| task(*i)).collect();
    plan.use_filter(move |t: &str| !excluded.contains(t));
    submit_batches(&mut plan, scenario)?;

    let groups = (0..scenario.dependencies.len())
        .filter_map(|i| {
            plan.node(&task(i))
                .ok()
                .map(|id| (i, plan.arena().node(id).group()))
        })
        .collect();

    // Every generated graph is acyclic, so scheduling has to succeed.
    let schedule = plan
        .determine_execution_plan()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    Ok(Ordered {
        order: schedule.order(),
        fingerprint: schedule.fingerprint().to_string(),
        groups,
    })
}

proptest! {
    #[test]
    fn ordering_is_deterministic(scenario in scenario_strategy(10)) {
        let first = order_for(&scenario)?;
        let second = order_for(&scenario)?;
        prop_assert_eq!(first.order, second.order);
        prop_assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn dependencies_precede_their_dependents(scenario in scenario_strategy(10)) {
        let ordered = order_for(&scenario)?;
        let order = &ordered.order;
        let position = |name: &str| order.iter().position(|n| n == name);

        for (i, deps) in scenario.dependencies.iter().enumerate() {
            for dep in deps.keys() {
                if let (Some(dependent), Some(dependency)) = (position(&task(i)), position(&task(*dep))) {
                    prop_assert!(
                        dependency < dependent,
                        "{} scheduled before its dependency {}: {:?}",
                        task(i),
                        task(*dep),
                        order
                    );
                }
            }
        }
        for (i, k) in &scenario.remote {
            if let (Some(dependent), Some(dependency)) = (position(&task(*i)), position(&format!("lib:r{k}"))) {
                prop_assert!(dependency < dependent, "{:?}", order);
            }
        }
    }

    #[test]
    fn later_batches_follow_the_entries_of_earlier_ones(scenario in scenario_strategy(10)) {
        let ordered = order_for(&scenario)?;
        let order = &ordered.order;
        let position = |i: usize| order.iter().position(|n| *n == task(i));

        for (b, batch) in scenario.batches.iter().enumerate() {
            let ordinal = scenario.ordinal_of(b);
            for entry in batch {
                // Only entries that stayed in their own batch and that nothing
                // else waits for are bound to come after earlier batches.
                if !scenario.is_leaf(*entry) || ordered.groups.get(entry) != Some(&Some(ordinal)) {
                    continue;
                }
                let Some(entry_position) = position(*entry) else {
                    continue;
                };
                for (earlier_b, earlier) in scenario.batches.iter().enumerate() {
                    if scenario.ordinal_of(earlier_b) >= ordinal {
                        continue;
                    }
                    for other in earlier {
                        if let Some(other_position) = position(*other) {
                            prop_assert!(
                                other_position < entry_position,
                                "{} (batch {}) before {}: {:?}",
                                task(*entry),
                                ordinal,
                                task(*other),
                                order
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn draining_the_plan_always_finishes(scenario in scenario_strategy(10)) {
        let mut plan = plan_with(resolver_for(&scenario));
        submit_batches(&mut plan, &scenario)?;
        let finalized = plan
            .finalize_plan()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut executed = Vec::new();
        let limit = finalized.schedule().len() + 1;
        for _ in 0..limit {
            match finalized.select_next() {
                Selection::Ready(node) => {
                    // Every dependency has already run.
                    for (pred, _) in &node.predecessors {
                        let pred_kind = finalized
                            .schedule()
                            .nodes()
                            .iter()
                            .find(|n| n.id == *pred)
                            .map(|n| n.kind.clone());
                        if let Some(NodeKind::LocalTask { task }) = pred_kind {
                            prop_assert!(executed.contains(&task));
                        }
                    }
                    if let NodeKind::LocalTask { task } = &node.kind {
                        executed.push(task.clone());
                    }
                    finalized
                        .finish_node(node.id, TaskOutcome::Success)
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                }
                Selection::Waiting => prop_assert!(false, "nothing running, yet nothing ready"),
                Selection::Finished => break,
            }
        }

        prop_assert_eq!(finalized.select_next(), Selection::Finished);
        prop_assert!(finalized.summary().all_succeeded());
        prop_assert_eq!(executed.len(), plan.tasks().len());
    }
}
