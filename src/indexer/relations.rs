use std::collections::HashSet;

use super::code_parser::ParsedFile;

/// One resolved-by-name call: the definition at `caller` (an index into
/// `ParsedFile::symbols`) calls something named `callee`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRelation {
    pub caller: usize,
    pub callee: String,
    pub line: usize,
}

/// Attribute every call site to its innermost enclosing definition.
///
/// Calls outside any definition (module-level code) are dropped, as are
/// repeated `(caller, callee)` pairs; the first occurrence wins.
pub fn call_relations(parsed: &ParsedFile) -> Vec<CallRelation> {
    let mut seen = HashSet::new();
    let mut relations = Vec::new();
    for call in &parsed.calls {
        let Some(caller) = parsed.enclosing_symbol(call.byte) else {
            continue;
        };
        if parsed.symbols[caller].name == call.callee {
            continue;
        }
        if seen.insert((caller, call.callee.as_str())) {
            relations.push(CallRelation {
                caller,
                callee: call.callee.clone(),
                line: call.line,
            });
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::code_parser::CodeParser;

    #[test]
    fn test_call_relations_rust() {
        let parser = CodeParser::new().expect("Failed to initialize CodeParser");
        let source_code = r#"
use std::collections::HashMap;

struct MyStruct;

impl MyStruct {
    fn process(&self) {
        println!("Hello");
        self.helper();
        external_function();
        self.helper();
        self.process();
    }

    fn helper(&self) {}
}

static TABLE: once = init_table();
"#;
        let parsed = parser.parse(source_code, "rust").unwrap().unwrap();
        let relations = call_relations(&parsed);

        let pairs: Vec<(&str, &str)> = relations
            .iter()
            .map(|r| (parsed.symbols[r.caller].name.as_str(), r.callee.as_str()))
            .collect();
        // duplicates, recursion and module-level calls are dropped
        assert_eq!(pairs, vec![("process", "helper"), ("process", "external_function")]);
        assert_eq!(relations[0].line, 9);
    }
}
