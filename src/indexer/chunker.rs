//! Splits one source file into chunks: one per definition where the grammar
//! found them, overlapping line windows for everything else.
use super::code_parser::{ParsedFile, Symbol, SymbolKind};
use crate::store::chunk::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    pub lines: usize,
    pub overlap: usize,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            lines: 60,
            overlap: 10,
        }
    }
}

/// Chunk `content` of `path`.
///
/// With parsed symbols, every function/method not nested in another one gets
/// its own chunk, and so does every class without methods. Lines no symbol
/// chunk covers (imports, class headers, module-level code) are windowed.
/// Without symbols the whole file is windowed.
pub fn chunk_source(
    path: &str,
    language: &str,
    content: &str,
    parsed: Option<&ParsedFile>,
    window: WindowOptions,
) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let selected = parsed.map(select_symbols).unwrap_or_default();
    if selected.is_empty() {
        return window_chunks(path, language, &lines, 1, lines.len(), window);
    }

    let mut covered = vec![false; lines.len() + 1];
    let mut chunks = Vec::new();
    for symbol in &selected {
        let end = symbol.end_line.min(lines.len());
        if symbol.start_line > end {
            continue;
        }
        for flag in &mut covered[symbol.start_line..=end] {
            *flag = true;
        }
        let text = lines[symbol.start_line - 1..end].join("\n");
        chunks.push(Chunk::new(
            path,
            symbol.start_line,
            end,
            language,
            Some(symbol.name.clone()),
            text,
        ));
    }

    // windows over the uncovered gaps
    let mut line = 1;
    while line <= lines.len() {
        if covered[line] {
            line += 1;
            continue;
        }
        let start = line;
        while line <= lines.len() && !covered[line] {
            line += 1;
        }
        chunks.extend(window_chunks(path, language, &lines, start, line - 1, window));
    }

    chunks.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then_with(|| a.end_line.cmp(&b.end_line))
    });
    chunks.dedup_by(|a, b| a.chunk_id == b.chunk_id);
    chunks
}

fn nested_in(inner: &Symbol, outer: &Symbol) -> bool {
    !std::ptr::eq(inner, outer)
        && outer.start_byte <= inner.start_byte
        && inner.end_byte <= outer.end_byte
}

/// Definitions that become chunks of their own.
fn select_symbols(parsed: &ParsedFile) -> Vec<&Symbol> {
    let callables: Vec<&Symbol> = parsed
        .symbols
        .iter()
        .filter(|s| s.kind != SymbolKind::Class)
        .collect();

    let mut selected: Vec<&Symbol> = Vec::new();
    for &symbol in &callables {
        if !callables.iter().any(|&outer| nested_in(symbol, outer)) {
            selected.push(symbol);
        }
    }
    for symbol in &parsed.symbols {
        if symbol.kind == SymbolKind::Class
            && !callables.iter().any(|&c| nested_in(c, symbol))
            && !selected.iter().any(|&outer| nested_in(symbol, outer))
        {
            selected.push(symbol);
        }
    }
    selected
}

/// Overlapping windows over lines `first..=last` (1-based); windows holding
/// only whitespace are skipped.
pub fn window_chunks(
    path: &str,
    language: &str,
    lines: &[&str],
    first: usize,
    last: usize,
    window: WindowOptions,
) -> Vec<Chunk> {
    let last = last.min(lines.len());
    if first == 0 || first > last {
        return Vec::new();
    }
    let size = window.lines.max(1);
    let step = size.saturating_sub(window.overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = first;
    loop {
        let end = (start + size - 1).min(last);
        let slice = &lines[start - 1..end];
        if slice.iter().any(|l| !l.trim().is_empty()) {
            chunks.push(Chunk::new(path, start, end, language, None, slice.join("\n")));
        }
        if end == last {
            break;
        }
        start += step;
    }
    chunks
}
