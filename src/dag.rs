//! DAG construction, validation and topological ordering.

use crate::error::{EngineError, EngineResult};
use crate::future::{FutureId, RawFuture};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

/// A validated (or validatable) directed acyclic graph of futures.
///
/// `Dag::new()` is always empty. `Dag::from_futures` is shorthand for
/// `{ let mut d = Dag::new(); d.build(futures)?; d }` — the two
/// constructors the original tooling used inconsistently are unified here.
pub struct Dag {
    nodes: HashMap<FutureId, Arc<RawFuture>>,
    /// Forward adjacency: dependency id -> ids of futures that depend on it.
    edges: HashMap<FutureId, Vec<FutureId>>,
    topo_order: Vec<FutureId>,
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}

impl Dag {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            topo_order: Vec::new(),
        }
    }

    pub fn from_futures(terminals: Vec<Arc<RawFuture>>) -> EngineResult<Self> {
        let mut dag = Self::new();
        dag.build(terminals)?;
        Ok(dag)
    }

    /// Reverse-traverse the given terminal futures' `dependencies`,
    /// registering every reached future as a node, then validate.
    pub fn build(&mut self, terminals: Vec<Arc<RawFuture>>) -> EngineResult<()> {
        let mut stack = terminals;
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if !seen.insert(node.id) {
                continue;
            }
            for dep in &node.dependencies {
                self.edges.entry(dep.id).or_default().push(node.id);
                stack.push(dep.clone());
            }
            self.nodes.insert(node.id, node);
        }
        self.validate()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<RawFuture>> {
        self.nodes.values()
    }

    pub fn node(&self, id: FutureId) -> Option<&Arc<RawFuture>> {
        self.nodes.get(&id)
    }

    pub fn topo_order(&self) -> &[FutureId] {
        &self.topo_order
    }

    /// In-degree (pending dependency count) for a node, used by the runner
    /// to seed its ready queue.
    pub fn in_degree(&self, id: FutureId) -> usize {
        self.nodes
            .get(&id)
            .map(|n| n.dependencies.len())
            .unwrap_or(0)
    }

    /// Successors of a node (futures that depend on it).
    pub fn successors(&self, id: FutureId) -> &[FutureId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kahn's algorithm: checks every edge endpoint is present, detects
    /// cycles, and computes a deterministic topological order breaking
    /// ties by creation sequence.
    pub fn validate(&mut self) -> EngineResult<()> {
        for (&from, tos) in &self.edges {
            if !self.nodes.contains_key(&from) {
                return Err(EngineError::DanglingReference(from));
            }
            for &to in tos {
                if !self.nodes.contains_key(&to) {
                    return Err(EngineError::DanglingReference(to));
                }
            }
        }

        let mut in_degree: HashMap<FutureId, usize> = self
            .nodes
            .keys()
            .map(|&id| (id, self.in_degree(id)))
            .collect();

        let mut ready: Vec<FutureId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        sort_by_seq(&mut ready, &self.nodes);

        let mut ready: VecDeque<FutureId> = ready.into();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            let mut newly_ready = Vec::new();
            for &succ in self.successors(id) {
                let deg = in_degree.get_mut(&succ).expect("successor missing in-degree entry");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(succ);
                }
            }
            sort_by_seq(&mut newly_ready, &self.nodes);
            for id in newly_ready {
                // Keep the queue globally seq-ordered so the tie-break is
                // deterministic across whole runs, not just within a batch.
                let pos = ready
                    .iter()
                    .position(|&r| self.nodes[&r].seq > self.nodes[&id].seq)
                    .unwrap_or(ready.len());
                ready.insert(pos, id);
            }
        }

        if order.len() != self.nodes.len() {
            let path = find_one_cycle(&self.nodes, &self.edges);
            return Err(EngineError::CycleDetected(path));
        }

        self.topo_order = order;
        Ok(())
    }

    /// Render an ASCII outline of the graph: one line per node, in
    /// topological order, listing its task name and dependency ids.
    pub fn draw(&self) -> String {
        let mut out = String::new();
        for &id in &self.topo_order {
            let node = &self.nodes[&id];
            let deps: Vec<String> = node.dependencies.iter().map(|d| d.id.0.to_string()).collect();
            let _ = writeln!(
                out,
                "[{}] {} <- [{}]",
                id.0,
                node.task.name(),
                deps.join(", ")
            );
        }
        out
    }

    pub fn to_json(&self) -> EngineResult<String> {
        let nodes: Vec<JsonNode> = self
            .nodes
            .values()
            .map(|n| JsonNode {
                id: n.id.0,
                task_name: n.task.name().to_string(),
                deps: n.dependencies.iter().map(|d| d.id.0).collect(),
            })
            .collect();
        let edges: Vec<JsonEdge> = self
            .edges
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| JsonEdge { from: from.0, to: to.0 }))
            .collect();
        let doc = JsonDag { nodes, edges };
        serde_json::to_string_pretty(&doc)
            .map_err(|e| EngineError::Unsupported(format!("json export failed: {e}")))
    }

    /// Test-only hook: the normal `build` API can only ever produce
    /// forward-reference edges (a future can only depend on futures that
    /// already exist), so it can't construct a cycle. This lets cycle
    /// detection (§8 scenario 4) be exercised directly on the adjacency
    /// structure instead.
    #[cfg(test)]
    pub fn inject_edge_for_test(&mut self, from: FutureId, to: FutureId) {
        self.edges.entry(from).or_default().push(to);
    }
}

fn sort_by_seq(ids: &mut [FutureId], nodes: &HashMap<FutureId, Arc<RawFuture>>) {
    ids.sort_by_key(|id| nodes[id].seq);
}

fn find_one_cycle(
    nodes: &HashMap<FutureId, Arc<RawFuture>>,
    edges: &HashMap<FutureId, Vec<FutureId>>,
) -> Vec<FutureId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: HashMap<FutureId, Color> = nodes.keys().map(|&id| (id, Color::White)).collect();
    let mut stack: Vec<FutureId> = Vec::new();

    fn visit(
        id: FutureId,
        edges: &HashMap<FutureId, Vec<FutureId>>,
        color: &mut HashMap<FutureId, Color>,
        stack: &mut Vec<FutureId>,
    ) -> Option<Vec<FutureId>> {
        color.insert(id, Color::Gray);
        stack.push(id);
        for &next in edges.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            match color.get(&next).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = visit(next, edges, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<FutureId> = stack[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }
        stack.pop();
        color.insert(id, Color::Black);
        None
    }

    for &id in nodes.keys() {
        if color[&id] == Color::White {
            if let Some(cycle) = visit(id, edges, &mut color, &mut stack) {
                return cycle;
            }
        }
    }
    Vec::new()
}

#[derive(Serialize, Deserialize)]
struct JsonNode {
    id: u64,
    task_name: String,
    deps: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct JsonEdge {
    from: u64,
    to: u64,
}

#[derive(Serialize, Deserialize)]
struct JsonDag {
    nodes: Vec<JsonNode>,
    edges: Vec<JsonEdge>,
}

/// Topological equivalence of an imported JSON DAG: a simple adjacency
/// model with freshly-assigned sequence numbers (import never preserves
/// the original future ids, per §6).
#[derive(Debug)]
pub struct ImportedDag {
    pub order: Vec<String>,
    pub edges: Vec<(usize, usize)>,
}

/// Parse a JSON DAG export and compute a topological order over task
/// names, without reconstructing executable futures (there is nothing to
/// execute — this is purely for round-trip / visualization tooling).
pub fn from_json(src: &str) -> EngineResult<ImportedDag> {
    let doc: JsonDag =
        serde_json::from_str(src).map_err(|e| EngineError::Unsupported(format!("bad DAG json: {e}")))?;
    let id_to_idx: HashMap<u64, usize> = doc.nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
    let mut in_degree = vec![0usize; doc.nodes.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); doc.nodes.len()];
    for node in &doc.nodes {
        let to = id_to_idx[&node.id];
        for &dep in &node.deps {
            let from = id_to_idx[&dep];
            adjacency[from].push(to);
            in_degree[to] += 1;
        }
    }
    let mut queue: VecDeque<usize> = (0..doc.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(doc.nodes.len());
    while let Some(i) = queue.pop_front() {
        order.push(doc.nodes[i].task_name.clone());
        for &succ in &adjacency[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                queue.push_back(succ);
            }
        }
    }
    if order.len() != doc.nodes.len() {
        return Err(EngineError::CycleDetected(Vec::new()));
    }
    let edges = doc.edges.iter().map(|e| (id_to_idx[&e.from], id_to_idx[&e.to])).collect();
    Ok(ImportedDag { order, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRegistry;

    #[test]
    fn linear_chain_topo_order_matches_construction() {
        let reg = TaskRegistry::new();
        let a = reg.register0("a", || Ok(1i64)).unwrap();
        let b = reg.register1("b", |x: i64| Ok(x + 1)).unwrap();
        let c = reg.register1("c", |y: i64| Ok(y * 10)).unwrap();

        let fa = a.call();
        let fb = b.call(fa.clone());
        let fc = c.call(fb.clone());

        let dag = Dag::from_futures(vec![fc.erased()]).unwrap();
        let order: Vec<_> = dag.topo_order().iter().map(|id| dag.node(*id).unwrap().task.name().to_string()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_shares_single_dependency_node() {
        let reg = TaskRegistry::new();
        let r = reg.register0("r", || Ok(2i64)).unwrap();
        let l = reg.register1("l", |x: i64| Ok(x + 1)).unwrap();
        let m = reg.register1("m", |x: i64| Ok(x * 3)).unwrap();
        let j = reg.register2("j", |a: i64, b: i64| Ok(a + b)).unwrap();

        let fr = r.call();
        let fl = l.call(fr.clone());
        let fm = m.call(fr.clone());
        let fj = j.call(fl.clone(), fm.clone());

        let dag = Dag::from_futures(vec![fj.erased()]).unwrap();
        assert_eq!(dag.nodes().count(), 4);
    }

    #[test]
    fn cycle_is_rejected_via_injection_hook() {
        let reg = TaskRegistry::new();
        let x = reg.register0("x", || Ok(1i64)).unwrap();
        let y = reg.register1("y", |v: i64| Ok(v)).unwrap();
        let fx = x.call();
        let fy = y.call(fx.clone());

        let mut dag = Dag::from_futures(vec![fy.erased()]).unwrap();
        dag.inject_edge_for_test(fy.id(), fx.id());
        let err = dag.validate().unwrap_err();
        match err {
            EngineError::CycleDetected(path) => assert!(!path.is_empty()),
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn json_round_trip_preserves_topological_equivalence() {
        let reg = TaskRegistry::new();
        let a = reg.register0("a", || Ok(1i64)).unwrap();
        let b = reg.register1("b", |x: i64| Ok(x + 1)).unwrap();
        let fa = a.call();
        let fb = b.call(fa.clone());
        let dag = Dag::from_futures(vec![fb.erased()]).unwrap();

        let json = dag.to_json().unwrap();
        let imported = from_json(&json).unwrap();
        assert_eq!(imported.order, vec!["a".to_string(), "b".to_string()]);
    }
}
