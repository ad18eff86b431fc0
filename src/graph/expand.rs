use std::collections::HashSet;
use std::sync::Arc;

use super::{CodeGraph, GraphHit};
use crate::store::ChunkIndex;
use crate::store::chunk::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    pub depth: usize,
    pub include_callers: bool,
    pub include_callees: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            include_callers: true,
            include_callees: true,
        }
    }
}

/// Graph nodes defined inside `chunk`.
fn nodes_of_chunk(graph: &CodeGraph, chunk: &Chunk) -> Vec<usize> {
    graph
        .nodes_in_file(&chunk.file_path)
        .iter()
        .copied()
        .filter(|&idx| {
            graph
                .node(idx)
                .is_some_and(|n| chunk.contains_line(n.start_line))
        })
        .collect()
}

/// Breadth-first expansion from every seed at once.
///
/// Seeds are given best first; a chunk reachable from several seeds is
/// attributed to the first seed that reaches it at the smallest depth.
/// Callees are visited before callers, each in node order, so the output is
/// deterministic. Seed chunks never appear in the output, and each chunk
/// appears at most once.
pub fn expand(
    graph: &CodeGraph,
    index: &ChunkIndex,
    seed_chunk_ids: &[String],
    options: ExpandOptions,
) -> Vec<GraphHit> {
    if options.depth == 0 || !(options.include_callers || options.include_callees) {
        return Vec::new();
    }

    let seeds: HashSet<&str> = seed_chunk_ids.iter().map(String::as_str).collect();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut frontier: Vec<(usize, &str)> = Vec::new();
    for seed in seed_chunk_ids {
        let Some(chunk) = index.get(seed) else {
            continue;
        };
        for node in nodes_of_chunk(graph, chunk) {
            if visited.insert(node) {
                frontier.push((node, seed.as_str()));
            }
        }
    }

    let mut emitted: HashSet<String> = HashSet::new();
    let mut hits = Vec::new();
    for depth in 1..=options.depth {
        let mut next = Vec::new();
        for &(node, seed) in &frontier {
            let callees = graph.callees(node).filter(|_| options.include_callees);
            let callers = graph.callers(node).filter(|_| options.include_callers);
            for neighbor in callees.chain(callers) {
                if !visited.insert(neighbor) {
                    continue;
                }
                next.push((neighbor, seed));

                let Some(target) = graph.node(neighbor) else {
                    continue;
                };
                let Some(chunk) = index.chunk_covering(&target.file_path, target.start_line) else {
                    continue;
                };
                if seeds.contains(chunk.chunk_id.as_str()) || !emitted.insert(chunk.chunk_id.clone()) {
                    continue;
                }
                hits.push(GraphHit {
                    chunk: Arc::clone(chunk),
                    graph_depth: depth,
                    seed_chunk_id: seed.to_string(),
                });
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    hits
}
