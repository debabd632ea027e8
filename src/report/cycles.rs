//! Module dependency-cycle detection
//!
//! Depth-first search with an explicit recursion-path stack over the
//! first-party module graph. A back edge to a node on the current path
//! yields one cycle, expressed as the path slice from that node plus the
//! node again, so every reported cycle closes on itself.

use std::collections::{BTreeMap, HashSet};

use crate::bundler::ModuleRecord;

/// First-party module graph: module id → ordered imported ids.
///
/// Vendored modules (ids containing `node_modules`) are excluded entirely;
/// a cycle that only closes through a vendored module is not reported.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from bundler-reported module records
    pub fn from_modules(modules: &[ModuleRecord]) -> Self {
        let mut edges = BTreeMap::new();

        for module in modules {
            if is_vendored(&module.id) {
                continue;
            }

            let imports = module
                .imports
                .iter()
                .filter(|import| !is_vendored(import))
                .cloned()
                .collect();

            edges.insert(module.id.clone(), imports);
        }

        Self { edges }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn imports(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn is_vendored(id: &str) -> bool {
    id.contains("node_modules")
}

/// Signature used for deduplication: node ids joined in path order.
/// Deliberately not rotation-canonical, so the same logical cycle found
/// from two different entry points is reported twice.
pub fn cycle_signature(cycle: &[String]) -> String {
    cycle.join(" -> ")
}

/// Detect cycles among first-party modules.
///
/// Each returned cycle is an ordered module-id sequence whose first and
/// last entries are equal. No two returned cycles share a signature.
pub fn detect_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut seen_signatures: HashSet<String> = HashSet::new();
    let mut cycles: Vec<Vec<String>> = Vec::new();

    for start in graph.edges.keys() {
        if visited.contains(start.as_str()) {
            continue;
        }

        // Explicit DFS stack of (node, next-edge index), mirrored by the
        // ordered recursion path and its membership set.
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        let mut path: Vec<&str> = vec![start.as_str()];
        let mut on_stack: HashSet<&str> = HashSet::new();

        visited.insert(start.as_str());
        on_stack.insert(start.as_str());

        while let Some((node, edge_index)) = stack.last_mut() {
            let imports = graph.imports(*node);

            if *edge_index >= imports.len() {
                on_stack.remove(*node);
                path.pop();
                stack.pop();
                continue;
            }

            let target = imports[*edge_index].as_str();
            *edge_index += 1;

            // Edges leaving the first-party graph are ignored
            if !graph.contains(target) {
                continue;
            }

            if !visited.contains(target) {
                visited.insert(target);
                on_stack.insert(target);
                path.push(target);
                stack.push((target, 0));
            } else if on_stack.contains(target) {
                if let Some(start_index) = path.iter().position(|&id| id == target) {
                    let mut cycle: Vec<String> =
                        path[start_index..].iter().map(|&id| id.to_string()).collect();
                    cycle.push(target.to_string());

                    let signature = cycle_signature(&cycle);
                    if seen_signatures.insert(signature) {
                        cycles.push(cycle);
                    }
                }
            }
        }
    }

    cycles
}
