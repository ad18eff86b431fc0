//! Static lookup tables for query expansion. Keys are lowercase.

pub(super) type Table = &'static [(&'static str, &'static [&'static str])];

pub(super) const SYNONYMS: Table = &[
    ("function", &["method", "procedure"]),
    ("method", &["function"]),
    ("procedure", &["function"]),
    ("class", &["struct", "type"]),
    ("struct", &["class"]),
    ("error", &["exception", "failure"]),
    ("exception", &["error"]),
    ("login", &["signin", "authenticate"]),
    ("logout", &["signout"]),
    ("delete", &["remove", "destroy"]),
    ("remove", &["delete"]),
    ("create", &["new", "make"]),
    ("fetch", &["get", "retrieve"]),
    ("get", &["fetch"]),
    ("retrieve", &["fetch"]),
    ("parse", &["decode"]),
    ("serialize", &["encode"]),
    ("deserialize", &["decode"]),
    ("settings", &["configuration"]),
    ("password", &["credential"]),
    ("user", &["account"]),
    ("find", &["search", "lookup"]),
    ("search", &["find", "lookup"]),
    ("start", &["begin", "launch"]),
    ("stop", &["halt", "shutdown"]),
    ("callback", &["handler"]),
    ("handler", &["callback"]),
    ("array", &["list"]),
    ("list", &["array"]),
    ("dictionary", &["map"]),
    ("map", &["dictionary"]),
    ("import", &["include"]),
    ("test", &["spec"]),
    ("send", &["emit", "dispatch"]),
    ("validate", &["check", "verify"]),
    ("check", &["validate"]),
    ("cache", &["memoize"]),
    ("hash", &["digest"]),
    ("write", &["save", "persist"]),
    ("read", &["load"]),
    ("load", &["read"]),
];

pub(super) const ACRONYMS: Table = &[
    ("jwt", &["JSON Web Token"]),
    ("api", &["application programming interface"]),
    ("url", &["uniform resource locator"]),
    ("http", &["hypertext transfer protocol"]),
    ("sql", &["structured query language"]),
    ("json", &["JavaScript Object Notation"]),
    ("orm", &["object relational mapping"]),
    ("cli", &["command line interface"]),
    ("ui", &["user interface"]),
    ("io", &["input output"]),
    ("tls", &["transport layer security"]),
    ("dns", &["domain name system"]),
    ("rpc", &["remote procedure call"]),
    ("ast", &["abstract syntax tree"]),
    ("crud", &["create read update delete"]),
    ("oauth", &["open authorization"]),
    ("csrf", &["cross site request forgery"]),
    ("xss", &["cross site scripting"]),
    ("gc", &["garbage collection"]),
    ("tcp", &["transmission control protocol"]),
    ("udp", &["user datagram protocol"]),
    ("ci", &["continuous integration"]),
    ("dto", &["data transfer object"]),
    ("sdk", &["software development kit"]),
    ("ttl", &["time to live"]),
    ("uuid", &["universally unique identifier"]),
    ("lru", &["least recently used"]),
    ("mfa", &["multi factor authentication"]),
    ("sso", &["single sign on"]),
];

pub(super) const ABBREVIATIONS: Table = &[
    ("auth", &["authentication", "authorization"]),
    ("config", &["configuration"]),
    ("cfg", &["configuration"]),
    ("db", &["database"]),
    ("fn", &["function"]),
    ("func", &["function"]),
    ("impl", &["implementation"]),
    ("init", &["initialize"]),
    ("msg", &["message"]),
    ("req", &["request"]),
    ("res", &["response"]),
    ("resp", &["response"]),
    ("err", &["error"]),
    ("ctx", &["context"]),
    ("env", &["environment"]),
    ("repo", &["repository"]),
    ("util", &["utility"]),
    ("utils", &["utilities"]),
    ("dir", &["directory"]),
    ("pwd", &["password"]),
    ("str", &["string"]),
    ("args", &["arguments"]),
    ("param", &["parameter"]),
    ("params", &["parameters"]),
    ("regex", &["regular expression"]),
    ("async", &["asynchronous"]),
    ("tmp", &["temporary"]),
    ("num", &["number"]),
    ("idx", &["index"]),
    ("len", &["length"]),
    ("src", &["source"]),
    ("dst", &["destination"]),
    ("conn", &["connection"]),
    ("mgr", &["manager"]),
    ("svc", &["service"]),
    ("cb", &["callback"]),
    ("lib", &["library"]),
    ("pkg", &["package"]),
    ("doc", &["document"]),
    ("spec", &["specification"]),
];

/// Per-language vocabulary rewrites: `(language, [(term, replacements)])`.
pub(super) const LANGUAGE_REWRITES: &[(&str, Table)] = &[
    (
        "python",
        &[
            ("function", &["def"]),
            ("method", &["def"]),
            ("constructor", &["__init__"]),
            ("null", &["None"]),
            ("interface", &["protocol"]),
            ("array", &["list"]),
            ("exception", &["raise"]),
        ],
    ),
    (
        "rust",
        &[
            ("function", &["fn"]),
            ("method", &["fn"]),
            ("interface", &["trait"]),
            ("class", &["struct"]),
            ("null", &["None"]),
            ("exception", &["panic"]),
            ("import", &["use"]),
        ],
    ),
    (
        "go",
        &[
            ("function", &["func"]),
            ("method", &["func"]),
            ("class", &["struct"]),
            ("exception", &["error"]),
            ("null", &["nil"]),
        ],
    ),
    (
        "javascript",
        &[
            ("import", &["require"]),
            ("null", &["undefined"]),
            ("dictionary", &["object"]),
            ("method", &["function"]),
        ],
    ),
    (
        "typescript",
        &[
            ("import", &["require"]),
            ("null", &["undefined"]),
            ("struct", &["interface"]),
            ("method", &["function"]),
        ],
    ),
];

pub(super) fn lookup(table: Table, word: &str) -> &'static [&'static str] {
    match table.iter().find(|(key, _)| *key == word) {
        Some((_, values)) => *values,
        None => &[],
    }
}

/// Canonical language name for a user-supplied hint.
pub fn canonical_language(hint: &str) -> Option<&'static str> {
    match hint.trim().to_ascii_lowercase().as_str() {
        "python" | "py" => Some("python"),
        "rust" | "rs" => Some("rust"),
        "go" | "golang" => Some("go"),
        "javascript" | "js" | "jsx" => Some("javascript"),
        "typescript" | "ts" | "tsx" => Some("typescript"),
        _ => None,
    }
}

pub(super) fn language_table(hint: &str) -> Option<Table> {
    let language = canonical_language(hint)?;
    LANGUAGE_REWRITES
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, table)| *table)
}
