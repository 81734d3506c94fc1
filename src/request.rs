//! Typed requests and the wire encoder.
//!
//! One [`Request`] variant per IDE-mode command, carrying only the fields
//! that command takes plus its request id. [`Request::serialize`] produces
//! the framed wire string for the negotiated [`Dialect`]: version 1 until
//! the tool announces protocol version 2, after which the three nullary
//! commands are emitted as bare atoms instead of single-element lists.
//!
//! String arguments are embedded in double quotes without further escaping;
//! the tool does not require escaping on the argument side.

use serde::Serialize;

use crate::framing::frame;

/// Wire-format dialect, negotiated per connection.
///
/// The connection starts in [`Dialect::V1`]; a `:protocol-version` info
/// reply carrying `2` switches it to [`Dialect::V2`] for the rest of the
/// connection's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Dialect {
    #[default]
    V1,
    V2,
}

impl Dialect {
    pub fn from_protocol_version(version: u64) -> Self {
        if version >= 2 {
            Dialect::V2
        } else {
            Dialect::V1
        }
    }
}

/// Closed set of command names, used to pick the final-reply decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestType {
    AddClause,
    AddMissing,
    Apropos,
    BrowseNamespace,
    CallsWho,
    CaseSplit,
    DocsFor,
    GenerateDef,
    GenerateDefNext,
    Interpret,
    LoadFile,
    MakeCase,
    MakeLemma,
    MakeWith,
    Metavariables,
    PrintDefinition,
    ProofSearch,
    ProofSearchNext,
    ReplCompletions,
    TypeAt,
    TypeOf,
    Version,
    WhoCalls,
}

impl RequestType {
    /// The keyword the command is spelled with on the wire.
    ///
    /// `:type-at` has no wire spelling of its own: the tool expects it as
    /// `:type-of` with trailing position arguments. A protocol quirk, not
    /// a bug.
    pub fn command_name(self) -> &'static str {
        match self {
            RequestType::AddClause => ":add-clause",
            RequestType::AddMissing => ":add-missing",
            RequestType::Apropos => ":apropos",
            RequestType::BrowseNamespace => ":browse-namespace",
            RequestType::CallsWho => ":calls-who",
            RequestType::CaseSplit => ":case-split",
            RequestType::DocsFor => ":docs-for",
            RequestType::GenerateDef => ":generate-def",
            RequestType::GenerateDefNext => ":generate-def-next",
            RequestType::Interpret => ":interpret",
            RequestType::LoadFile => ":load-file",
            RequestType::MakeCase => ":make-case",
            RequestType::MakeLemma => ":make-lemma",
            RequestType::MakeWith => ":make-with",
            RequestType::Metavariables => ":metavariables",
            RequestType::PrintDefinition => ":print-definition",
            RequestType::ProofSearch => ":proof-search",
            RequestType::ProofSearchNext => ":proof-search-next",
            RequestType::ReplCompletions => ":repl-completions",
            RequestType::TypeAt => ":type-of",
            RequestType::TypeOf => ":type-of",
            RequestType::Version => ":version",
            RequestType::WhoCalls => ":who-calls",
        }
    }

    /// Commands that take no arguments. Under dialect 2 these are framed
    /// as bare atoms rather than single-element lists.
    pub fn is_nullary(self) -> bool {
        matches!(
            self,
            RequestType::GenerateDefNext | RequestType::ProofSearchNext | RequestType::Version
        )
    }
}

/// Documentation detail level for `:docs-for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocMode {
    /// First paragraph only.
    Overview,
    /// Everything.
    Full,
}

impl DocMode {
    pub fn as_symbol(self) -> &'static str {
        match self {
            DocMode::Overview => ":overview",
            DocMode::Full => ":full",
        }
    }
}

/// One IDE-mode command with its arguments and request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AddClause { id: u64, line: u64, name: String },
    AddMissing { id: u64, line: u64, name: String },
    Apropos { id: u64, needle: String },
    BrowseNamespace { id: u64, namespace: String },
    CallsWho { id: u64, name: String },
    CaseSplit { id: u64, line: u64, name: String },
    DocsFor { id: u64, name: String, mode: DocMode },
    GenerateDef { id: u64, line: u64, name: String },
    GenerateDefNext { id: u64 },
    Interpret { id: u64, expression: String },
    LoadFile { id: u64, path: String },
    MakeCase { id: u64, line: u64, name: String },
    MakeLemma { id: u64, line: u64, name: String },
    MakeWith { id: u64, line: u64, name: String },
    Metavariables { id: u64, width: u64 },
    PrintDefinition { id: u64, name: String },
    ProofSearch { id: u64, line: u64, name: String, hints: Vec<String> },
    ProofSearchNext { id: u64 },
    ReplCompletions { id: u64, name: String },
    TypeAt { id: u64, name: String, line: u64, column: u64 },
    TypeOf { id: u64, name: String },
    Version { id: u64 },
    WhoCalls { id: u64, name: String },
}

impl Request {
    pub fn id(&self) -> u64 {
        match *self {
            Request::AddClause { id, .. }
            | Request::AddMissing { id, .. }
            | Request::Apropos { id, .. }
            | Request::BrowseNamespace { id, .. }
            | Request::CallsWho { id, .. }
            | Request::CaseSplit { id, .. }
            | Request::DocsFor { id, .. }
            | Request::GenerateDef { id, .. }
            | Request::GenerateDefNext { id }
            | Request::Interpret { id, .. }
            | Request::LoadFile { id, .. }
            | Request::MakeCase { id, .. }
            | Request::MakeLemma { id, .. }
            | Request::MakeWith { id, .. }
            | Request::Metavariables { id, .. }
            | Request::PrintDefinition { id, .. }
            | Request::ProofSearch { id, .. }
            | Request::ProofSearchNext { id }
            | Request::ReplCompletions { id, .. }
            | Request::TypeAt { id, .. }
            | Request::TypeOf { id, .. }
            | Request::Version { id }
            | Request::WhoCalls { id, .. } => id,
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            Request::AddClause { .. } => RequestType::AddClause,
            Request::AddMissing { .. } => RequestType::AddMissing,
            Request::Apropos { .. } => RequestType::Apropos,
            Request::BrowseNamespace { .. } => RequestType::BrowseNamespace,
            Request::CallsWho { .. } => RequestType::CallsWho,
            Request::CaseSplit { .. } => RequestType::CaseSplit,
            Request::DocsFor { .. } => RequestType::DocsFor,
            Request::GenerateDef { .. } => RequestType::GenerateDef,
            Request::GenerateDefNext { .. } => RequestType::GenerateDefNext,
            Request::Interpret { .. } => RequestType::Interpret,
            Request::LoadFile { .. } => RequestType::LoadFile,
            Request::MakeCase { .. } => RequestType::MakeCase,
            Request::MakeLemma { .. } => RequestType::MakeLemma,
            Request::MakeWith { .. } => RequestType::MakeWith,
            Request::Metavariables { .. } => RequestType::Metavariables,
            Request::PrintDefinition { .. } => RequestType::PrintDefinition,
            Request::ProofSearch { .. } => RequestType::ProofSearch,
            Request::ProofSearchNext { .. } => RequestType::ProofSearchNext,
            Request::ReplCompletions { .. } => RequestType::ReplCompletions,
            Request::TypeAt { .. } => RequestType::TypeAt,
            Request::TypeOf { .. } => RequestType::TypeOf,
            Request::Version { .. } => RequestType::Version,
            Request::WhoCalls { .. } => RequestType::WhoCalls,
        }
    }

    /// The command-and-arguments form, without the id wrapper.
    fn args(&self) -> String {
        let cmd = self.request_type().command_name();
        match self {
            Request::AddClause { line, name, .. }
            | Request::AddMissing { line, name, .. }
            | Request::CaseSplit { line, name, .. }
            | Request::GenerateDef { line, name, .. }
            | Request::MakeCase { line, name, .. }
            | Request::MakeLemma { line, name, .. }
            | Request::MakeWith { line, name, .. } => {
                format!("{cmd} {line} \"{name}\"")
            }
            Request::Apropos { needle, .. } => format!("{cmd} \"{needle}\""),
            Request::BrowseNamespace { namespace, .. } => format!("{cmd} \"{namespace}\""),
            Request::CallsWho { name, .. }
            | Request::PrintDefinition { name, .. }
            | Request::ReplCompletions { name, .. }
            | Request::TypeOf { name, .. }
            | Request::WhoCalls { name, .. } => format!("{cmd} \"{name}\""),
            Request::DocsFor { name, mode, .. } => {
                format!("{cmd} \"{name}\" {}", mode.as_symbol())
            }
            Request::Interpret { expression, .. } => format!("{cmd} \"{expression}\""),
            Request::LoadFile { path, .. } => format!("{cmd} \"{path}\""),
            Request::Metavariables { width, .. } => format!("{cmd} {width}"),
            Request::ProofSearch {
                line, name, hints, ..
            } => {
                // The hints encoding is taken verbatim from the protocol
                // docs ("possibly-empty list of additional things to try");
                // richer semantics are not inferred.
                format!("{cmd} {line} \"{name}\" ({})", hints.join(" "))
            }
            Request::TypeAt {
                name, line, column, ..
            } => format!("{cmd} \"{name}\" {line} {column}"),
            Request::GenerateDefNext { .. }
            | Request::ProofSearchNext { .. }
            | Request::Version { .. } => cmd.to_string(),
        }
    }

    /// The unframed message body, id wrapper and trailing newline included.
    pub fn body(&self, dialect: Dialect) -> String {
        let args = self.args();
        if dialect == Dialect::V2 && self.request_type().is_nullary() {
            format!("({} {})\n", args, self.id())
        } else {
            format!("(({}) {})\n", args, self.id())
        }
    }

    /// The full wire string: hex length header plus body.
    pub fn serialize(&self, dialect: Dialect) -> String {
        frame(&self.body(dialect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positional_commands() {
        let req = Request::AddClause {
            id: 2,
            line: 5,
            name: "f".to_string(),
        };
        assert_eq!(req.body(Dialect::V1), "((:add-clause 5 \"f\") 2)\n");
    }

    #[test]
    fn test_name_only_commands() {
        let req = Request::TypeOf {
            id: 3,
            name: "plusTwo".to_string(),
        };
        assert_eq!(req.body(Dialect::V1), "((:type-of \"plusTwo\") 3)\n");
    }

    #[test]
    fn test_docs_for_modes() {
        let overview = Request::DocsFor {
            id: 4,
            name: "Vect".to_string(),
            mode: DocMode::Overview,
        };
        let full = Request::DocsFor {
            id: 4,
            name: "Vect".to_string(),
            mode: DocMode::Full,
        };
        assert_eq!(overview.body(Dialect::V1), "((:docs-for \"Vect\" :overview) 4)\n");
        assert_eq!(full.body(Dialect::V1), "((:docs-for \"Vect\" :full) 4)\n");
    }

    #[test]
    fn test_proof_search_hints_are_space_joined_atoms() {
        let req = Request::ProofSearch {
            id: 8,
            line: 9,
            name: "n_rhs".to_string(),
            hints: vec!["plus".to_string(), "S".to_string()],
        };
        assert_eq!(
            req.body(Dialect::V1),
            "((:proof-search 9 \"n_rhs\" (plus S)) 8)\n"
        );

        let none = Request::ProofSearch {
            id: 8,
            line: 9,
            name: "n_rhs".to_string(),
            hints: vec![],
        };
        assert_eq!(none.body(Dialect::V1), "((:proof-search 9 \"n_rhs\" ()) 8)\n");
    }

    #[test]
    fn test_metavariables_takes_a_width() {
        let req = Request::Metavariables { id: 1, width: 80 };
        assert_eq!(req.body(Dialect::V1), "((:metavariables 80) 1)\n");
    }

    #[test]
    fn test_type_at_is_spelled_type_of_on_the_wire() {
        let req = Request::TypeAt {
            id: 6,
            name: "xs".to_string(),
            line: 12,
            column: 3,
        };
        assert_eq!(req.body(Dialect::V2), "((:type-of \"xs\" 12 3) 6)\n");
    }

    #[test]
    fn test_nullary_commands_per_dialect() {
        let version = Request::Version { id: 7 };
        assert_eq!(version.body(Dialect::V1), "((:version) 7)\n");
        assert_eq!(version.body(Dialect::V2), "(:version 7)\n");

        let next = Request::ProofSearchNext { id: 9 };
        assert_eq!(next.body(Dialect::V1), "((:proof-search-next) 9)\n");
        assert_eq!(next.body(Dialect::V2), "(:proof-search-next 9)\n");
    }

    #[test]
    fn test_argumented_commands_unchanged_under_v2() {
        let req = Request::LoadFile {
            id: 1,
            path: "Main.idr".to_string(),
        };
        assert_eq!(req.body(Dialect::V1), req.body(Dialect::V2));
    }

    #[test]
    fn test_serialize_prepends_byte_length_header() {
        let req = Request::Interpret {
            id: 1,
            expression: "2 + 2".to_string(),
        };
        let wire = req.serialize(Dialect::V1);
        let body = &wire[6..];
        assert_eq!(&wire[..6], format!("{:06x}", body.len()));
        assert_eq!(body, "((:interpret \"2 + 2\") 1)\n");
    }

    #[test]
    fn test_dialect_from_protocol_version() {
        assert_eq!(Dialect::from_protocol_version(1), Dialect::V1);
        assert_eq!(Dialect::from_protocol_version(2), Dialect::V2);
        assert_eq!(Dialect::from_protocol_version(3), Dialect::V2);
    }
}
