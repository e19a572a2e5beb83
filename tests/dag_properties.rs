//! Property sweep: random layered DAGs always produce a valid topological
//! order and survive the full build/run round trip regardless of shape.

use edgeflow::{CancellationToken, Dag, EngineConfig, FutureId, Runner, TaskFuture, TaskRegistry};
use proptest::prelude::*;
use std::collections::HashMap;

/// Builds a random layered DAG: `layer_sizes.len()` layers, each node in
/// layer `i > 0` depending on one randomly chosen node from layer `i - 1`.
/// Layering guarantees acyclicity independent of the edge choices, so this
/// generates shape diversity without ever needing to filter out cycles.
fn build_layered_dag(layer_sizes: &[usize], picks: &[usize]) -> (Dag, Vec<FutureId>) {
    let reg = TaskRegistry::new();
    let mut pick_iter = picks.iter().copied();
    let mut layers: Vec<Vec<TaskFuture<i64>>> = Vec::new();
    let mut all_ids = Vec::new();

    for (layer_idx, &size) in layer_sizes.iter().enumerate() {
        let mut layer = Vec::with_capacity(size);
        for node_idx in 0..size {
            let name = format!("n{layer_idx}_{node_idx}");
            let future = if layer_idx == 0 {
                let t = reg.register0(Box::leak(name.into_boxed_str()), || Ok(1i64)).unwrap();
                t.call()
            } else {
                let prev = &layers[layer_idx - 1];
                let pick = pick_iter.next().unwrap_or(0) % prev.len();
                let parent = prev[pick].clone();
                let t = reg.register1(Box::leak(name.into_boxed_str()), |x: i64| Ok(x + 1)).unwrap();
                t.call(parent)
            };
            all_ids.push(future.id());
            layer.push(future);
        }
        layers.push(layer);
    }

    let terminals = layers.into_iter().flatten().map(|f| f.erased()).collect();
    let dag = Dag::from_futures(terminals).unwrap();
    (dag, all_ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn topo_order_respects_every_dependency_edge(
        layer_sizes in prop::collection::vec(1usize..5, 1..6),
        picks in prop::collection::vec(0usize..5, 0..30),
    ) {
        let (dag, _all_ids) = build_layered_dag(&layer_sizes, &picks);

        let position: HashMap<_, _> = dag
            .topo_order()
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect();

        for node in dag.nodes() {
            for dep in &node.dependencies {
                prop_assert!(
                    position[&dep.id] < position[&node.id],
                    "dependency must precede dependent in topological order"
                );
            }
        }
    }

    #[test]
    fn every_node_appears_exactly_once_in_topo_order(
        layer_sizes in prop::collection::vec(1usize..4, 1..5),
        picks in prop::collection::vec(0usize..4, 0..20),
    ) {
        let (dag, all_ids) = build_layered_dag(&layer_sizes, &picks);
        let mut ordered = dag.topo_order().to_vec();
        ordered.sort_by_key(|id| id.0);
        let mut expected = all_ids.clone();
        expected.sort_by_key(|id| id.0);
        expected.dedup();
        prop_assert_eq!(ordered, expected);
    }

    #[test]
    fn any_random_layered_dag_runs_to_completion_without_failures(
        layer_sizes in prop::collection::vec(1usize..4, 1..5),
        picks in prop::collection::vec(0usize..4, 0..20),
    ) {
        let (dag, all_ids) = build_layered_dag(&layer_sizes, &picks);
        let runner = Runner::new(EngineConfig::builder().max_workers(4).build());
        let record = runner.run(&dag, CancellationToken::new()).unwrap();
        prop_assert!(!record.had_failures);
        prop_assert_eq!(record.benchmarks.len(), all_ids.len());
    }
}
