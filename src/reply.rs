//! Typed replies decoded from the wire.
//!
//! Three families, mirroring the protocol's semantics:
//!
//! - info replies (`:set-prompt`, `:protocol-version`, `:warning`,
//!   `:write-string`): unsolicited, zero or more per request;
//! - output replies (`:output`): unsolicited source-highlighting spans;
//! - final replies (`:return`): exactly one per request id, terminal,
//!   shaped by the command that produced it.
//!
//! Every type derives `Serialize` so frontends can forward decoded replies
//! as JSON without re-walking the S-expression tree.

use serde::Serialize;

/// 1-indexed line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

/// Insertion-ordered attribute map decoded from a metadata list.
///
/// Keys are keyword names lower-camel-cased (`:doc-overview` becomes
/// `docOverview`); unknown keys are kept rather than dropped. Values keep
/// their wire spelling, so symbol values retain the leading colon
/// (`":function"`, `":False"`). Inserting an existing key replaces its
/// value in place, preserving first-seen position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn insert(&mut self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Union in another attribute set; its values win on shared keys.
    pub fn merge_from(&mut self, other: Attributes) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }
}

impl FromIterator<(String, String)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut attrs = Attributes::default();
        for (key, value) in iter {
            attrs.insert(key, value);
        }
        attrs
    }
}

/// A highlight span within a reply's message text, by character offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageMetadata {
    pub start: u64,
    pub length: u64,
    pub attributes: Attributes,
}

/// A highlight span within a source file, by line/column range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMetadata {
    pub filename: String,
    pub start: Position,
    pub end: Position,
    pub attributes: Attributes,
}

/// A compiler warning or type error attached to a source range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileWarning {
    pub filename: String,
    pub start: Position,
    pub end: Position,
    pub warning: String,
    pub metadata: Vec<MessageMetadata>,
}

/// A named declaration with highlighting for its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub metadata: Vec<MessageMetadata>,
}

/// A name/type pair with highlighting, as it appears in hole contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub metadata: Vec<MessageMetadata>,
}

/// A metavariable (hole) together with the other variables in its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metavariable {
    pub variable: Variable,
    pub premises: Vec<Variable>,
}

/// Collapse metadata entries that share a `(start, length)` span.
///
/// Attribute maps are unioned with later entries winning per key; the
/// merged entry keeps the list position of its first occurrence. A list
/// with no duplicate spans passes through unchanged.
pub fn merge_message_metadata(entries: Vec<MessageMetadata>) -> Vec<MessageMetadata> {
    let mut merged: Vec<MessageMetadata> = Vec::with_capacity(entries.len());
    for entry in entries {
        match merged
            .iter_mut()
            .find(|m| m.start == entry.start && m.length == entry.length)
        {
            Some(existing) => existing.attributes.merge_from(entry.attributes),
            None => merged.push(entry),
        }
    }
    merged
}

/// The error branch of a final reply: the tool handled the request and
/// reported a domain failure ("not found", "no more results", a type
/// error). Not a protocol error; returned to callers as a value.
///
/// `metadata` is non-empty only for `:interpret`, which returns highlight
/// spans for the part of the input it could parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyError {
    pub message: String,
    pub metadata: Vec<MessageMetadata>,
}

impl ReplyError {
    pub fn new(message: impl Into<String>) -> Self {
        ReplyError {
            message: message.into(),
            metadata: Vec::new(),
        }
    }
}

/// Success-or-domain-error outcome of one command.
pub type CommandResult<T> = Result<T, ReplyError>;

/// Payload of a successful `:add-clause`: an initial pattern-matching
/// clause, empty if no matching function was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddClause {
    pub initial_clause: String,
}

/// Payload of a successful `:add-missing`: any missing pattern-match cases,
/// newline-separated in one string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddMissing {
    pub missing_clauses: String,
}

/// Payload of a successful `:apropos`: newline-separated documentation
/// mentions with highlighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Apropos {
    pub docs: String,
    pub metadata: Vec<MessageMetadata>,
}

/// Payload of a successful `:browse-namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseNamespace {
    pub sub_modules: Vec<String>,
    pub declarations: Vec<Declaration>,
}

/// Payload of `:calls-who`. `caller` is `None` when the name was not
/// found, with `references` empty. Still a success on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallsWho {
    pub caller: Option<Declaration>,
    pub references: Vec<Declaration>,
}

/// Payload of a successful `:case-split`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseSplit {
    pub case_clause: String,
}

/// Payload of a successful `:docs-for`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocsFor {
    pub docs: String,
    pub metadata: Vec<MessageMetadata>,
}

/// Payload of a successful `:generate-def` or `:generate-def-next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateDef {
    pub def: String,
}

/// Payload of a successful `:interpret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interpret {
    pub result: String,
    pub metadata: Vec<MessageMetadata>,
}

/// Payload of a successful `:load-file` (confirmation only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFile {}

/// Payload of a successful `:make-case`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakeCase {
    pub case_clause: String,
}

/// Payload of a successful `:make-lemma`: a new top-level declaration and
/// the metavariable expression that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakeLemma {
    pub declaration: String,
    pub metavariable: String,
}

/// Payload of a successful `:make-with`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakeWith {
    pub with_clause: String,
}

/// Payload of a successful `:metavariables`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metavariables {
    pub metavariables: Vec<Metavariable>,
}

/// Payload of a successful `:print-definition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintDefinition {
    pub definition: String,
    pub metadata: Vec<MessageMetadata>,
}

/// Payload of a successful `:proof-search` or `:proof-search-next`;
/// empty string when no solution was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProofSearch {
    pub solution: String,
}

/// Payload of a successful `:repl-completions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplCompletions {
    pub completions: Vec<String>,
}

/// Payload of a successful `:type-at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeAt {
    pub type_at: String,
}

/// Payload of a successful `:type-of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeOf {
    pub type_of: String,
    pub metadata: Vec<MessageMetadata>,
}

/// Payload of a successful `:version`: the tool's semantic version plus
/// any release tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub tags: Vec<String>,
}

/// Payload of `:who-calls`. As with [`CallsWho`], `callee` is `None` when
/// the name was not found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhoCalls {
    pub callee: Option<Declaration>,
    pub references: Vec<Declaration>,
}

/// The terminal reply to one request, shaped by the originating command.
///
/// `:generate-def-next` and `:proof-search-next` share the wire shape of
/// their base commands and decode into the same variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FinalReply {
    AddClause(CommandResult<AddClause>),
    AddMissing(CommandResult<AddMissing>),
    Apropos(CommandResult<Apropos>),
    BrowseNamespace(CommandResult<BrowseNamespace>),
    CallsWho(CommandResult<CallsWho>),
    CaseSplit(CommandResult<CaseSplit>),
    DocsFor(CommandResult<DocsFor>),
    GenerateDef(CommandResult<GenerateDef>),
    Interpret(CommandResult<Interpret>),
    LoadFile(CommandResult<LoadFile>),
    MakeCase(CommandResult<MakeCase>),
    MakeLemma(CommandResult<MakeLemma>),
    MakeWith(CommandResult<MakeWith>),
    Metavariables(CommandResult<Metavariables>),
    PrintDefinition(CommandResult<PrintDefinition>),
    ProofSearch(CommandResult<ProofSearch>),
    ReplCompletions(CommandResult<ReplCompletions>),
    TypeAt(CommandResult<TypeAt>),
    TypeOf(CommandResult<TypeOf>),
    Version(CommandResult<Version>),
    WhoCalls(CommandResult<WhoCalls>),
}

/// Any decoded message from the tool process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reply {
    /// New REPL prompt path (file currently loaded).
    SetPrompt { path: String, id: u64 },
    /// Protocol version announcement; switches the encoder dialect.
    ProtocolVersion { version: u64, id: u64 },
    /// A warning or error for a source range.
    Warning { warning: FileWarning, id: u64 },
    /// Free-form output from the tool.
    WriteString { message: String, id: u64 },
    /// Source-highlighting spans for previously submitted code.
    Output {
        highlights: Vec<SourceMetadata>,
        id: u64,
    },
    /// The terminal reply for the request with this id.
    Return { reply: FinalReply, id: u64 },
}

impl Reply {
    pub fn id(&self) -> u64 {
        match *self {
            Reply::SetPrompt { id, .. }
            | Reply::ProtocolVersion { id, .. }
            | Reply::Warning { id, .. }
            | Reply::WriteString { id, .. }
            | Reply::Output { id, .. }
            | Reply::Return { id, .. } => id,
        }
    }

    /// Terminal replies resolve and remove the pending request.
    pub fn is_final(&self) -> bool {
        matches!(self, Reply::Return { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn entry(start: u64, length: u64, pairs: &[(&str, &str)]) -> MessageMetadata {
        MessageMetadata {
            start,
            length,
            attributes: attrs(pairs),
        }
    }

    #[test]
    fn test_merge_unions_attributes_for_shared_spans() {
        let merged = merge_message_metadata(vec![
            entry(0, 5, &[("a", "1")]),
            entry(0, 5, &[("b", "2")]),
        ]);
        assert_eq!(merged, vec![entry(0, 5, &[("a", "1"), ("b", "2")])]);
    }

    #[test]
    fn test_merge_later_entries_win_on_conflict() {
        let merged = merge_message_metadata(vec![
            entry(0, 5, &[("decor", ":bound"), ("name", "x")]),
            entry(0, 5, &[("decor", ":function")]),
        ]);
        assert_eq!(
            merged,
            vec![entry(0, 5, &[("decor", ":function"), ("name", "x")])]
        );
    }

    #[test]
    fn test_merge_without_duplicates_is_a_noop() {
        let entries = vec![
            entry(0, 5, &[("a", "1")]),
            entry(5, 3, &[("a", "2")]),
            entry(0, 3, &[("a", "3")]),
        ];
        assert_eq!(merge_message_metadata(entries.clone()), entries);
    }

    #[test]
    fn test_merge_preserves_first_seen_order() {
        let merged = merge_message_metadata(vec![
            entry(10, 2, &[("a", "1")]),
            entry(0, 5, &[("b", "2")]),
            entry(10, 2, &[("c", "3")]),
        ]);
        assert_eq!(
            merged,
            vec![
                entry(10, 2, &[("a", "1"), ("c", "3")]),
                entry(0, 5, &[("b", "2")]),
            ]
        );
    }

    #[test]
    fn test_attributes_replace_in_place() {
        let mut attrs = Attributes::default();
        attrs.insert("decor".to_string(), ":bound".to_string());
        attrs.insert("name".to_string(), "x".to_string());
        attrs.insert("decor".to_string(), ":type".to_string());
        assert_eq!(
            attrs.iter().collect::<Vec<_>>(),
            vec![("decor", ":type"), ("name", "x")]
        );
    }

    #[test]
    fn test_variable_serializes_type_under_its_wire_name() {
        let variable = Variable {
            name: "n".to_string(),
            type_: "Nat".to_string(),
            metadata: vec![],
        };
        let json = serde_json::to_value(&variable).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "name": "n", "type": "Nat", "metadata": [] })
        );
    }

    #[test]
    fn test_reply_id_and_finality() {
        let info = Reply::WriteString {
            message: "hello".to_string(),
            id: 4,
        };
        assert_eq!(info.id(), 4);
        assert!(!info.is_final());

        let done = Reply::Return {
            reply: FinalReply::LoadFile(Ok(LoadFile {})),
            id: 4,
        };
        assert!(done.is_final());
    }
}
