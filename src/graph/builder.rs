use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use super::{CodeGraph, GraphNode, GraphSummary, symbol_id};
use crate::error::{Error, Result};
use crate::indexer::code_parser::{CodeParser, ParsedFile};
use crate::indexer::languages::detect_language;
use crate::indexer::relations::call_relations;
use crate::indexer::walker::{FileContent, read_source, walk_project};

/// Upper bound on definitions a cross-file call fans out to when several
/// files define the same name.
const MAX_NAME_FANOUT: usize = 8;

/// Parses a project and links call sites to definitions by name.
pub struct GraphBuilder {
    parser: Arc<CodeParser>,
    exclude: Vec<String>,
    max_file_bytes: u64,
}

impl GraphBuilder {
    pub fn new(parser: Arc<CodeParser>, exclude: Vec<String>, max_file_bytes: u64) -> Self {
        Self {
            parser,
            exclude,
            max_file_bytes,
        }
    }

    /// Walk `root` and build a fresh graph. Blocking; parsing runs on the
    /// rayon pool.
    pub fn build(&self, root: &Path) -> Result<(CodeGraph, GraphSummary)> {
        if !root.is_dir() {
            return Err(Error::malformed(format!(
                "project root is not a directory: {}",
                root.display()
            )));
        }
        let entries = walk_project(root, &self.exclude)?;

        let parsed: Vec<Option<(String, ParsedFile)>> = entries
            .par_iter()
            .map(|entry| {
                let language = detect_language(Path::new(&entry.rel_path));
                if !self.parser.supports(language) {
                    return None;
                }
                let content = match read_source(entry, self.max_file_bytes) {
                    Ok(FileContent::Text(text)) => text,
                    Ok(_) => return None,
                    Err(e) => {
                        debug!("Cannot read {}: {e}", entry.rel_path);
                        return None;
                    }
                };
                match self.parser.parse(&content, language) {
                    Ok(Some(file)) => Some((entry.rel_path.clone(), file)),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("Cannot parse {}: {e}", entry.rel_path);
                        None
                    }
                }
            })
            .collect();

        let files: Vec<(String, ParsedFile)> = parsed.into_iter().flatten().collect();
        let graph = link(&files);
        let summary = GraphSummary {
            files_parsed: files.len(),
            files_skipped: entries.len() - files.len(),
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
        };
        info!(
            "Built call graph: {} nodes, {} edges from {} files ({} skipped)",
            summary.node_count, summary.edge_count, summary.files_parsed, summary.files_skipped
        );
        Ok((graph, summary))
    }
}

/// Build the graph from already parsed files.
///
/// A call resolves to the definitions of that name in the caller's own file
/// when there are any, otherwise to every definition of that name elsewhere
/// (at most [`MAX_NAME_FANOUT`], in `symbol_id` order). Calls that resolve to
/// nothing are dropped.
pub fn link(files: &[(String, ParsedFile)]) -> CodeGraph {
    let mut graph = CodeGraph::new();
    let mut local_ids: Vec<Vec<usize>> = Vec::with_capacity(files.len());
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();

    for (path, parsed) in files {
        let mut ids = Vec::with_capacity(parsed.symbols.len());
        for symbol in &parsed.symbols {
            let idx = graph.add_node(GraphNode {
                symbol_id: symbol_id(path, &symbol.name, symbol.start_line),
                name: symbol.name.clone(),
                file_path: path.clone(),
                kind: symbol.kind,
                start_line: symbol.start_line,
                end_line: symbol.end_line,
            });
            by_name.entry(symbol.name.as_str()).or_default().push(idx);
            ids.push(idx);
        }
        local_ids.push(ids);
    }
    for targets in by_name.values_mut() {
        targets.sort_by(|a, b| graph.nodes()[*a].symbol_id.cmp(&graph.nodes()[*b].symbol_id));
        targets.dedup();
    }

    for ((path, parsed), ids) in files.iter().zip(&local_ids) {
        for relation in call_relations(parsed) {
            let caller = ids[relation.caller];
            let Some(targets) = by_name.get(relation.callee.as_str()) else {
                continue;
            };
            let same_file: Vec<usize> = targets
                .iter()
                .copied()
                .filter(|&t| graph.nodes()[t].file_path == *path)
                .collect();
            let resolved: Vec<usize> = if same_file.is_empty() {
                targets.iter().copied().take(MAX_NAME_FANOUT).collect()
            } else {
                same_file
            };
            for callee in resolved {
                graph.add_edge(caller, callee);
            }
        }
    }
    graph
}
