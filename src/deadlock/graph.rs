use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::{ResourceId, TxnId};
use crate::lock::{LockSnapshot, LockState};

/// `waiting` is blocked on `resource`, which `holding` has locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct WaitForEdge {
    pub waiting: TxnId,
    pub holding: TxnId,
    pub resource: ResourceId,
}

/// Directed wait-for graph, rebuilt from a lock snapshot on every detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WaitForGraph {
    nodes: BTreeSet<TxnId>,
    edges: Vec<WaitForEdge>,
    #[serde(skip)]
    successors: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitForGraph {
    /// One node per live transaction; an edge for every waiting entry towards
    /// each holder of the same resource whose mode it cannot share.
    ///
    /// Waiting entries with no conflicting holder are stale and add nothing.
    pub fn build(snapshot: &LockSnapshot) -> Self {
        let mut graph = Self {
            nodes: snapshot.live.clone(),
            ..Self::default()
        };

        for entry in &snapshot.entries {
            let LockState::Waiting(wanted) = entry.state else {
                continue;
            };
            for (holder, held) in snapshot.holders(entry.resource) {
                if holder == entry.txn || held.compatible_with(wanted) {
                    continue;
                }
                graph.add_edge(WaitForEdge {
                    waiting: entry.txn,
                    holding: holder,
                    resource: entry.resource,
                });
            }
        }
        graph
    }

    fn add_edge(&mut self, edge: WaitForEdge) {
        if self.edges.contains(&edge) {
            return;
        }
        self.nodes.insert(edge.waiting);
        self.nodes.insert(edge.holding);
        self.successors
            .entry(edge.waiting)
            .or_default()
            .insert(edge.holding);
        self.edges.push(edge);
    }

    pub fn nodes(&self) -> &BTreeSet<TxnId> {
        &self.nodes
    }

    pub fn edges(&self) -> &[WaitForEdge] {
        &self.edges
    }

    pub fn successors(&self, txn: TxnId) -> impl Iterator<Item = TxnId> + '_ {
        self.successors
            .get(&txn)
            .into_iter()
            .flat_map(|next| next.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Every elementary cycle of `graph`, each reported once.
///
/// A cycle is listed in wait order starting from its smallest transaction
/// id; cycles are sorted by that id and then lexicographically, so the output
/// is deterministic for a given graph.
pub fn find_cycles(graph: &WaitForGraph) -> Vec<Vec<TxnId>> {
    let mut cycles = Vec::new();
    for &start in graph.nodes() {
        let mut path = vec![start];
        let mut on_path = BTreeSet::from([start]);
        walk(graph, start, start, &mut path, &mut on_path, &mut cycles);
    }
    cycles
}

/// Depth-first search rooted at `start`, only visiting nodes larger than it
/// so that each cycle is found from its minimum node alone.
fn walk(
    graph: &WaitForGraph,
    start: TxnId,
    node: TxnId,
    path: &mut Vec<TxnId>,
    on_path: &mut BTreeSet<TxnId>,
    cycles: &mut Vec<Vec<TxnId>>,
) {
    for next in graph.successors(node) {
        if next == start {
            cycles.push(path.clone());
        } else if next > start && !on_path.contains(&next) {
            path.push(next);
            on_path.insert(next);
            walk(graph, start, next, path, on_path, cycles);
            on_path.remove(&next);
            path.pop();
        }
    }
}

/// The first cycle `find_cycles` would report, without listing the others.
///
/// Densely connected graphs (many readers all upgrading the same resource)
/// hold factorially many cycles, so this walks greedily instead: from the
/// smallest start node, always step to the smallest successor that can still
/// get back to the start without crossing the path. It never backtracks.
pub fn first_cycle(graph: &WaitForGraph) -> Option<Vec<TxnId>> {
    graph
        .nodes()
        .iter()
        .find_map(|&start| first_cycle_from(graph, start))
}

fn first_cycle_from(graph: &WaitForGraph, start: TxnId) -> Option<Vec<TxnId>> {
    let mut path = vec![start];
    let mut on_path = BTreeSet::from([start]);
    let mut node = start;
    loop {
        let mut step = None;
        for next in graph.successors(node) {
            if next == start {
                return Some(path);
            }
            if next > start && !on_path.contains(&next) && returns_to(graph, next, start, &on_path) {
                step = Some(next);
                break;
            }
        }
        node = step?;
        path.push(node);
        on_path.insert(node);
    }
}

/// Whether `start` is reachable from `from` through nodes above `start` that are not on the path.
fn returns_to(graph: &WaitForGraph, from: TxnId, start: TxnId, on_path: &BTreeSet<TxnId>) -> bool {
    let mut seen = BTreeSet::from([from]);
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        for next in graph.successors(node) {
            if next == start {
                return true;
            }
            if next > start && !on_path.contains(&next) && seen.insert(next) {
                stack.push(next);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockEntry, LockMode};

    #[test]
    fn stale_waiting_entries_add_no_edges() {
        let snapshot = LockSnapshot::from_entries(vec![LockEntry::waiting(1, 10)]);
        let graph = WaitForGraph::build(&snapshot);
        assert!(graph.is_empty());
        assert!(graph.nodes().contains(&1));
        assert!(find_cycles(&graph).is_empty());
    }

    #[test]
    fn shared_holders_only_block_exclusive_requests() {
        let snapshot = LockSnapshot::from_entries(vec![
            LockEntry::shared(1, 10),
            LockEntry::waiting_for(2, 10, LockMode::Shared),
            LockEntry::waiting_for(3, 10, LockMode::Exclusive),
        ]);
        let graph = WaitForGraph::build(&snapshot);
        assert_eq!(
            graph.edges(),
            &[WaitForEdge {
                waiting: 3,
                holding: 1,
                resource: 10
            }]
        );
    }

    #[test]
    fn overlapping_cycles_are_all_reported() {
        // 1 -> 2 -> 1 and 1 -> 2 -> 3 -> 1 share the edge 1 -> 2.
        let snapshot = LockSnapshot::from_entries(vec![
            LockEntry::exclusive(1, 10),
            LockEntry::exclusive(2, 20),
            LockEntry::exclusive(3, 30),
            LockEntry::waiting(1, 20),
            LockEntry::waiting(2, 10),
            LockEntry::waiting(2, 30),
            LockEntry::waiting(3, 10),
        ]);
        let graph = WaitForGraph::build(&snapshot);
        let cycles = find_cycles(&graph);
        assert_eq!(cycles, vec![vec![1, 2], vec![1, 2, 3]]);
    }

    #[test]
    fn first_cycle_matches_full_enumeration() {
        let snapshots = [
            LockSnapshot::from_entries(vec![
                LockEntry::exclusive(1, 10),
                LockEntry::exclusive(2, 20),
                LockEntry::exclusive(3, 30),
                LockEntry::waiting(1, 20),
                LockEntry::waiting(2, 10),
                LockEntry::waiting(2, 30),
                LockEntry::waiting(3, 10),
            ]),
            // 1 -> 3 is a dead end for start 1; the cycle is 2 -> 4 -> 2.
            LockSnapshot::from_entries(vec![
                LockEntry::exclusive(2, 20),
                LockEntry::exclusive(3, 30),
                LockEntry::exclusive(4, 40),
                LockEntry::waiting(1, 30),
                LockEntry::waiting(2, 40),
                LockEntry::waiting(4, 20),
            ]),
            LockSnapshot::from_entries(vec![LockEntry::exclusive(1, 10), LockEntry::waiting(2, 10)]),
        ];
        for snapshot in &snapshots {
            let graph = WaitForGraph::build(snapshot);
            assert_eq!(first_cycle(&graph), find_cycles(&graph).into_iter().next());
        }
    }

    #[test]
    fn first_cycle_among_many_upgrading_readers() {
        let readers = 1..=32;
        let mut entries: Vec<LockEntry> = readers.clone().map(|txn| LockEntry::shared(txn, 10)).collect();
        entries.extend(readers.map(|txn| LockEntry::waiting(txn, 10)));
        let graph = WaitForGraph::build(&LockSnapshot::from_entries(entries));
        assert_eq!(graph.edges().len(), 32 * 31);
        assert_eq!(first_cycle(&graph), Some(vec![1, 2]));
    }

    #[test]
    fn upgrade_deadlock_between_readers_is_a_cycle() {
        let snapshot = LockSnapshot::from_entries(vec![
            LockEntry::shared(1, 10),
            LockEntry::shared(2, 10),
            LockEntry::waiting(1, 10),
            LockEntry::waiting(2, 10),
        ]);
        let cycles = find_cycles(&WaitForGraph::build(&snapshot));
        assert_eq!(cycles, vec![vec![1, 2]]);
    }
}
