use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use super::languages::LanguageConfig;
use crate::error::{Error, Result};

/// Kind of a definition found in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Enclosing class/impl/type name.
    pub parent: Option<String>,
}

impl Symbol {
    pub fn contains_byte(&self, byte: usize) -> bool {
        self.start_byte <= byte && byte < self.end_byte
    }

    fn byte_span(&self) -> usize {
        self.end_byte - self.start_byte
    }
}

/// A call expression naming `callee`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub callee: String,
    pub line: usize,
    pub byte: usize,
}

/// Definitions and call sites of one source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    /// Ordered by start offset, outer definitions before inner ones.
    pub symbols: Vec<Symbol>,
    pub calls: Vec<CallSite>,
}

impl ParsedFile {
    /// Index of the innermost symbol whose byte range contains `byte`.
    pub fn enclosing_symbol(&self, byte: usize) -> Option<usize> {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.contains_byte(byte))
            .min_by_key(|(_, s)| s.byte_span())
            .map(|(i, _)| i)
    }
}

struct Grammar {
    language: Language,
    symbols: Query,
    calls: Query,
}

/// Tree-sitter front end shared by the chunker and the graph builder.
///
/// Queries are compiled once; a fresh `Parser` is created per call so one
/// `CodeParser` can serve a whole worker pool.
pub struct CodeParser {
    grammars: HashMap<&'static str, Grammar>,
}

const BUILTIN_CALLS: &[&str] = &[
    "len", "make", "append", "delete", "print", "println", "panic", "recover", "range", "return",
    "break", "continue", "new", "cap", "copy", "super", "isinstance", "str", "int", "list", "dict",
    "set", "tuple", "format", "require", "Some", "Ok", "Err", "Box", "Vec",
];

impl CodeParser {
    pub fn new() -> Result<Self> {
        let mut grammars = HashMap::new();
        for config in LanguageConfig::get_all() {
            let symbols = Query::new(&config.language, config.symbol_query)
                .map_err(|e| Error::Parse(format!("{} symbol query: {e}", config.name)))?;
            let calls = Query::new(&config.language, config.call_query)
                .map_err(|e| Error::Parse(format!("{} call query: {e}", config.name)))?;
            grammars.insert(
                config.name,
                Grammar {
                    language: config.language,
                    symbols,
                    calls,
                },
            );
        }
        Ok(Self { grammars })
    }

    pub fn supports(&self, language: &str) -> bool {
        self.grammars.contains_key(language)
    }

    /// Parse `source`; `Ok(None)` when no grammar exists for `language`.
    pub fn parse(&self, source: &str, language: &str) -> Result<Option<ParsedFile>> {
        let Some(grammar) = self.grammars.get(language) else {
            return Ok(None);
        };

        let mut parser = Parser::new();
        parser
            .set_language(&grammar.language)
            .map_err(|e| Error::Parse(format!("{language}: {e}")))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| Error::Parse(format!("failed to parse {language} source")))?;

        let root = tree.root_node();
        let bytes = source.as_bytes();
        Ok(Some(ParsedFile {
            symbols: extract_symbols(&grammar.symbols, root, bytes, language),
            calls: extract_calls(&grammar.calls, root, bytes),
        }))
    }
}

fn extract_symbols(query: &Query, root: Node, source: &[u8], lang: &str) -> Vec<Symbol> {
    let mut cursor = QueryCursor::new();
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    let mut matches = cursor.matches(query, root, source);
    while let Some(m) = matches.next() {
        let mut main_node = None;
        let mut kind = SymbolKind::Function;
        let mut name = String::new();

        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => {
                    if let Ok(text) = cap.node.utf8_text(source) {
                        name = text.to_string();
                    }
                }
                "function" => main_node = Some(cap.node),
                "method" => {
                    main_node = Some(cap.node);
                    kind = SymbolKind::Method;
                }
                "class" => {
                    main_node = Some(cap.node);
                    kind = SymbolKind::Class;
                }
                _ => {}
            }
        }

        let Some(node) = main_node else {
            continue;
        };
        if name.is_empty() || !seen.insert((node.start_byte(), node.end_byte())) {
            continue;
        }
        let parent = find_parent_symbol(node, source, lang);
        if kind == SymbolKind::Function && parent.is_some() {
            kind = SymbolKind::Method;
        }
        symbols.push(Symbol {
            name,
            kind,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            parent,
        });
    }

    symbols.sort_by(|a, b| {
        a.start_byte
            .cmp(&b.start_byte)
            .then_with(|| b.end_byte.cmp(&a.end_byte))
    });
    symbols
}

fn extract_calls(query: &Query, root: Node, source: &[u8]) -> Vec<CallSite> {
    let mut cursor = QueryCursor::new();
    let mut calls = Vec::new();

    let mut matches = cursor.matches(query, root, source);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            let Ok(text) = cap.node.utf8_text(source) else {
                continue;
            };
            let callee = text.trim();
            if callee.is_empty() || BUILTIN_CALLS.contains(&callee) {
                continue;
            }
            calls.push(CallSite {
                callee: callee.to_string(),
                line: cap.node.start_position().row + 1,
                byte: cap.node.start_byte(),
            });
        }
    }
    calls.sort_by_key(|c| c.byte);
    calls
}

fn find_parent_symbol(node: Node, source: &[u8], lang: &str) -> Option<String> {
    let mut parent = node.parent();
    while let Some(p) = parent {
        let kind = p.kind();
        let is_class_like = match lang {
            "go" => kind == "type_declaration",
            "python" => kind == "class_definition",
            "typescript" | "javascript" => {
                kind == "class_declaration" || kind == "class" || kind == "interface_declaration"
            }
            "rust" => kind == "impl_item" || kind == "trait_item",
            _ => false,
        };

        if is_class_like {
            let name_node = if lang == "rust" && kind == "impl_item" {
                p.child_by_field_name("type")
            } else {
                p.child_by_field_name("name")
            };
            if let Some(name) = name_node.and_then(|n| n.utf8_text(source).ok()) {
                return Some(name.to_string());
            }
        }
        parent = p.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str, lang: &str) -> ParsedFile {
        let parser = CodeParser::new().expect("Failed to initialize CodeParser");
        parser.parse(source, lang).unwrap().expect("grammar available")
    }

    fn find<'a>(parsed: &'a ParsedFile, name: &str) -> &'a Symbol {
        parsed
            .symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {name} not found"))
    }

    #[test]
    fn test_parse_rust_code() {
        let source_code = r#"
struct MyStruct {
    field: i32,
}

impl MyStruct {
    fn my_method(&self) {
        helper();
    }
}

fn my_function() {}
"#;
        let parsed = parse(source_code, "rust");

        assert_eq!(find(&parsed, "MyStruct").kind, SymbolKind::Class);
        let method = find(&parsed, "my_method");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent.as_deref(), Some("MyStruct"));
        assert_eq!((method.start_line, method.end_line), (7, 9));
        assert_eq!(find(&parsed, "my_function").kind, SymbolKind::Function);

        assert_eq!(parsed.calls.len(), 1);
        let call = &parsed.calls[0];
        assert_eq!(call.callee, "helper");
        let enclosing = parsed.enclosing_symbol(call.byte).unwrap();
        assert_eq!(parsed.symbols[enclosing].name, "my_method");
    }

    #[test]
    fn test_parse_python_code() {
        let source_code = r#"
class MyClass:
    def my_method(self):
        print("Hello")
        self.save()

def my_function():
    return compute(1)
"#;
        let parsed = parse(source_code, "python");

        assert_eq!(find(&parsed, "MyClass").kind, SymbolKind::Class);
        let method = find(&parsed, "my_method");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent.as_deref(), Some("MyClass"));
        assert_eq!(find(&parsed, "my_function").kind, SymbolKind::Function);

        // print is filtered as a builtin
        let callees: Vec<&str> = parsed.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["save", "compute"]);
    }

    #[test]
    fn test_parse_go_code() {
        let source_code = r#"package main

type Server struct{}

func (s *Server) Start() {
	listen()
}

func main() {
	s := &Server{}
	s.Start()
}
"#;
        let parsed = parse(source_code, "go");
        assert_eq!(find(&parsed, "Server").kind, SymbolKind::Class);
        assert_eq!(find(&parsed, "Start").kind, SymbolKind::Method);
        assert_eq!(find(&parsed, "main").kind, SymbolKind::Function);
        let callees: Vec<&str> = parsed.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["listen", "Start"]);
    }

    #[test]
    fn test_unsupported_language() {
        let parser = CodeParser::new().unwrap();
        assert!(!parser.supports("java"));
        assert_eq!(parser.parse("class A {}", "java").unwrap(), None);
    }
}
