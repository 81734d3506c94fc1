//! Reply decoder: a parsed root expression plus the originating request's
//! type, down to a strongly-typed [`Reply`].
//!
//! Dispatch happens twice: first on the root tag, then (for `:return`)
//! on the request type, into one builder per command. Both enums are
//! closed, so the match is exhaustive and every command is guaranteed a
//! decoder at compile time.
//!
//! Several builders reproduce quirks uncovered by protocol testing rather
//! than "fixing" them; each is commented at the site.

use super::ProtocolError;
use crate::reply::{
    merge_message_metadata, AddClause, AddMissing, Apropos, Attributes, BrowseNamespace,
    CallsWho, CaseSplit, CommandResult, Declaration, DocsFor, FileWarning, FinalReply,
    GenerateDef, Interpret, LoadFile, MakeCase, MakeLemma, MakeWith, MessageMetadata,
    Metavariable, Metavariables, Position, PrintDefinition, ProofSearch, Reply, ReplyError,
    ReplCompletions, SourceMetadata, TypeAt, TypeOf, Variable, Version, WhoCalls,
};
use crate::request::RequestType;
use crate::sexp::{Expr, ReplyTag, RootExpr};

/// Decode one message. `request_type` is the type of the request that
/// carried this message's id and selects the final-reply builder.
pub fn decode(root: RootExpr, request_type: RequestType) -> Result<Reply, ProtocolError> {
    let RootExpr { tag, payload, id } = root;
    match tag {
        ReplyTag::SetPrompt => Ok(Reply::SetPrompt {
            path: expect_string(payload, "set-prompt")?,
            id,
        }),
        ReplyTag::WriteString => Ok(Reply::WriteString {
            message: expect_string(payload, "write-string")?,
            id,
        }),
        ReplyTag::ProtocolVersion => {
            let version = payload
                .as_nat()
                .ok_or_else(|| malformed("protocol-version", &payload))?;
            Ok(Reply::ProtocolVersion { version, id })
        }
        ReplyTag::Warning => Ok(Reply::Warning {
            warning: warning(payload)?,
            id,
        }),
        ReplyTag::Output => Ok(Reply::Output {
            highlights: output(payload)?,
            id,
        }),
        ReplyTag::Return => Ok(Reply::Return {
            reply: final_reply(payload, request_type)?,
            id,
        }),
    }
}

fn final_reply(payload: Expr, request_type: RequestType) -> Result<FinalReply, ProtocolError> {
    Ok(match request_type {
        RequestType::AddClause => FinalReply::AddClause(branch(payload, "add-clause", |rest| {
            Ok(AddClause {
                initial_clause: single_string(rest, "add-clause")?,
            })
        })?),
        RequestType::AddMissing => {
            FinalReply::AddMissing(branch(payload, "add-missing", |rest| {
                Ok(AddMissing {
                    missing_clauses: single_string(rest, "add-missing")?,
                })
            })?)
        }
        RequestType::Apropos => FinalReply::Apropos(branch(payload, "apropos", |rest| {
            let (docs, metadata) = string_with_metadata(rest, "apropos")?;
            Ok(Apropos { docs, metadata })
        })?),
        RequestType::BrowseNamespace => FinalReply::BrowseNamespace(branch(
            payload,
            "browse-namespace",
            browse_namespace,
        )?),
        RequestType::CallsWho => FinalReply::CallsWho(branch(payload, "calls-who", |rest| {
            let (caller, references) = call_graph(rest, "calls-who")?;
            Ok(CallsWho { caller, references })
        })?),
        RequestType::CaseSplit => FinalReply::CaseSplit(branch(payload, "case-split", |rest| {
            Ok(CaseSplit {
                case_clause: single_string(rest, "case-split")?,
            })
        })?),
        RequestType::DocsFor => FinalReply::DocsFor(branch(payload, "docs-for", |rest| {
            let (docs, metadata) = string_with_metadata(rest, "docs-for")?;
            Ok(DocsFor { docs, metadata })
        })?),
        // :generate-def-next continues the same search; same wire shape.
        RequestType::GenerateDef | RequestType::GenerateDefNext => {
            FinalReply::GenerateDef(branch(payload, "generate-def", |rest| {
                Ok(GenerateDef {
                    def: single_string(rest, "generate-def")?,
                })
            })?)
        }
        RequestType::Interpret => FinalReply::Interpret(branch(payload, "interpret", |rest| {
            let (result, metadata) = string_with_metadata(rest, "interpret")?;
            Ok(Interpret { result, metadata })
        })?),
        RequestType::LoadFile => {
            FinalReply::LoadFile(branch(payload, "load-file", |_rest| Ok(LoadFile {}))?)
        }
        RequestType::MakeCase => FinalReply::MakeCase(branch(payload, "make-case", |rest| {
            Ok(MakeCase {
                case_clause: single_string(rest, "make-case")?,
            })
        })?),
        RequestType::MakeLemma => {
            FinalReply::MakeLemma(branch(payload, "make-lemma", make_lemma)?)
        }
        RequestType::MakeWith => FinalReply::MakeWith(branch(payload, "make-with", |rest| {
            Ok(MakeWith {
                with_clause: single_string(rest, "make-with")?,
            })
        })?),
        RequestType::Metavariables => {
            FinalReply::Metavariables(branch(payload, "metavariables", metavariables)?)
        }
        RequestType::PrintDefinition => {
            FinalReply::PrintDefinition(branch(payload, "print-definition", |rest| {
                let (definition, metadata) = string_with_metadata(rest, "print-definition")?;
                Ok(PrintDefinition {
                    definition,
                    metadata,
                })
            })?)
        }
        // :proof-search-next asks for the next solution; same wire shape.
        RequestType::ProofSearch | RequestType::ProofSearchNext => {
            FinalReply::ProofSearch(branch(payload, "proof-search", |rest| {
                Ok(ProofSearch {
                    solution: single_string(rest, "proof-search")?,
                })
            })?)
        }
        RequestType::ReplCompletions => {
            FinalReply::ReplCompletions(branch(payload, "repl-completions", repl_completions)?)
        }
        RequestType::TypeAt => FinalReply::TypeAt(branch(payload, "type-at", |rest| {
            Ok(TypeAt {
                type_at: single_string(rest, "type-at")?,
            })
        })?),
        RequestType::TypeOf => FinalReply::TypeOf(branch(payload, "type-of", |rest| {
            let (type_of, metadata) = string_with_metadata(rest, "type-of")?;
            Ok(TypeOf { type_of, metadata })
        })?),
        RequestType::Version => FinalReply::Version(branch(payload, "version", version)?),
        RequestType::WhoCalls => FinalReply::WhoCalls(branch(payload, "who-calls", |rest| {
            let (callee, references) = call_graph(rest, "who-calls")?;
            Ok(WhoCalls { callee, references })
        })?),
    })
}

/* Payload destructuring */

fn malformed(context: &'static str, expr: &Expr) -> ProtocolError {
    ProtocolError::Malformed {
        context,
        expr: expr.to_string(),
    }
}

/// Split a `(:ok …)` / `(:error …)` payload and route the success branch
/// through `build`. Domain errors become the `Err` side of the command
/// result, never a protocol error.
fn branch<T>(
    payload: Expr,
    context: &'static str,
    build: impl FnOnce(Vec<Expr>) -> Result<T, ProtocolError>,
) -> Result<CommandResult<T>, ProtocolError> {
    let items = match payload {
        Expr::List(items) => items,
        other => return Err(malformed(context, &other)),
    };
    let mut items = items.into_iter();
    match items.next() {
        Some(Expr::Sym(head)) if head == ":ok" => Ok(Ok(build(items.collect())?)),
        Some(Expr::Sym(head)) if head == ":error" => {
            let message = match items.next() {
                Some(Expr::Str(s)) => s,
                Some(other) => return Err(malformed(context, &other)),
                None => String::new(),
            };
            // :interpret attaches metadata for the prefix it could parse;
            // :apropos tacks on an empty list. Both land here.
            let metadata = match items.next() {
                Some(expr) => message_metadata(expr, context)?,
                None => Vec::new(),
            };
            Ok(Err(ReplyError { message, metadata }))
        }
        Some(other) => Err(malformed(context, &other)),
        None => Err(malformed(context, &Expr::List(Vec::new()))),
    }
}

fn expect_string(expr: Expr, context: &'static str) -> Result<String, ProtocolError> {
    match expr {
        Expr::Str(s) => Ok(s),
        other => Err(malformed(context, &other)),
    }
}

/// Fixed-arity list destructuring.
fn take<const N: usize>(expr: Expr, context: &'static str) -> Result<[Expr; N], ProtocolError> {
    match expr {
        Expr::List(items) => <[Expr; N]>::try_from(items)
            .map_err(|items| malformed(context, &Expr::List(items))),
        other => Err(malformed(context, &other)),
    }
}

fn single_string(rest: Vec<Expr>, context: &'static str) -> Result<String, ProtocolError> {
    let mut items = rest.into_iter();
    match items.next() {
        Some(Expr::Str(s)) => Ok(s),
        Some(other) => Err(malformed(context, &other)),
        None => Err(malformed(context, &Expr::List(Vec::new()))),
    }
}

/// A string payload with an optional trailing metadata list. Several
/// dialect-2 replies omit the metadata entirely; default it to empty.
fn string_with_metadata(
    rest: Vec<Expr>,
    context: &'static str,
) -> Result<(String, Vec<MessageMetadata>), ProtocolError> {
    let mut items = rest.into_iter();
    let text = match items.next() {
        Some(Expr::Str(s)) => s,
        Some(other) => return Err(malformed(context, &other)),
        None => return Err(malformed(context, &Expr::List(Vec::new()))),
    };
    let metadata = match items.next() {
        Some(expr) => message_metadata(expr, context)?,
        None => Vec::new(),
    };
    Ok((text, metadata))
}

/* Metadata decoding */

/// `:doc-overview` becomes `docOverview`: drop the colon, join the
/// hyphen-delimited segments in lower camel case.
fn camel_case_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, segment) in key.trim_start_matches(':').split('-').enumerate() {
        if i == 0 {
            out.push_str(segment);
        } else {
            let mut chars = segment.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Attribute values keep their wire spelling; symbols keep the colon.
fn attr_value(expr: Expr) -> String {
    match expr {
        Expr::Str(s) | Expr::Sym(s) => s,
        other => other.to_string(),
    }
}

fn attributes(expr: Expr, context: &'static str) -> Result<Attributes, ProtocolError> {
    let pairs = match expr {
        Expr::List(pairs) => pairs,
        other => return Err(malformed(context, &other)),
    };
    let mut attrs = Attributes::default();
    for pair in pairs {
        let [key, value] = take::<2>(pair, context)?;
        let key = match key {
            Expr::Sym(s) => s,
            other => return Err(malformed(context, &other)),
        };
        attrs.insert(camel_case_key(&key), attr_value(value));
    }
    Ok(attrs)
}

/// Decode and merge a `((start length (attrs…)) …)` metadata list.
fn message_metadata(
    expr: Expr,
    context: &'static str,
) -> Result<Vec<MessageMetadata>, ProtocolError> {
    let entries = match expr {
        Expr::List(entries) => entries,
        other => return Err(malformed(context, &other)),
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let [start, length, attrs] = take::<3>(entry, context)?;
        let start = start.as_nat().ok_or_else(|| malformed(context, &start))?;
        let length = length.as_nat().ok_or_else(|| malformed(context, &length))?;
        out.push(MessageMetadata {
            start,
            length,
            attributes: attributes(attrs, context)?,
        });
    }
    Ok(merge_message_metadata(out))
}

/// Decode a `(((:filename f) (:start l c) (:end l c)) (attrs…))` list.
/// Duplicate spans have not been observed in source highlighting, so no
/// merging is performed here.
fn source_metadata(
    expr: Expr,
    context: &'static str,
) -> Result<Vec<SourceMetadata>, ProtocolError> {
    let entries = match expr {
        Expr::List(entries) => entries,
        other => return Err(malformed(context, &other)),
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let [loc, attrs] = take::<2>(entry, context)?;
        let [file, start, end] = take::<3>(loc, context)?;
        let [_kw, filename] = take::<2>(file, context)?;
        let filename = expect_string(filename, context)?;
        out.push(SourceMetadata {
            filename,
            start: tagged_position(start, context)?,
            end: tagged_position(end, context)?,
            attributes: attributes(attrs, context)?,
        });
    }
    Ok(out)
}

/// `(:start 5 1)` → `Position { line: 5, column: 1 }`.
fn tagged_position(expr: Expr, context: &'static str) -> Result<Position, ProtocolError> {
    let [_kw, line, column] = take::<3>(expr, context)?;
    position_from(line, column, context)
}

/// `(5 1)` → `Position { line: 5, column: 1 }`.
fn bare_position(expr: Expr, context: &'static str) -> Result<Position, ProtocolError> {
    let [line, column] = take::<2>(expr, context)?;
    position_from(line, column, context)
}

fn position_from(
    line: Expr,
    column: Expr,
    context: &'static str,
) -> Result<Position, ProtocolError> {
    let line = line.as_nat().ok_or_else(|| malformed(context, &line))?;
    let column = column.as_nat().ok_or_else(|| malformed(context, &column))?;
    Ok(Position { line, column })
}

/* Info and output payloads */

fn warning(payload: Expr) -> Result<FileWarning, ProtocolError> {
    let [filename, start, end, message, metadata] = take::<5>(payload, "warning")?;
    Ok(FileWarning {
        filename: expect_string(filename, "warning")?,
        start: bare_position(start, "warning")?,
        end: bare_position(end, "warning")?,
        warning: expect_string(message, "warning")?,
        metadata: message_metadata(metadata, "warning")?,
    })
}

fn output(payload: Expr) -> Result<Vec<SourceMetadata>, ProtocolError> {
    let [ok, inner] = take::<2>(payload, "output")?;
    if ok.as_sym() != Some(":ok") {
        return Err(malformed("output", &ok));
    }
    let [kind, entries] = take::<2>(inner, "output")?;
    if kind.as_sym() != Some(":highlight-source") {
        return Err(malformed("output", &kind));
    }
    source_metadata(entries, "output")
}

/* Final-reply builders with non-trivial shapes */

/// `(name ((start length (attrs…)) …))` → [`Declaration`].
fn declaration(expr: Expr, context: &'static str) -> Result<Declaration, ProtocolError> {
    let [name, metadata] = take::<2>(expr, context)?;
    Ok(Declaration {
        name: expect_string(name, context)?,
        metadata: message_metadata(metadata, context)?,
    })
}

/// Shared by `:calls-who` and `:who-calls`: the inner list holds zero or
/// one `(decl (ref…))` pair. An empty list is a success with no subject,
/// not an error.
fn call_graph(
    rest: Vec<Expr>,
    context: &'static str,
) -> Result<(Option<Declaration>, Vec<Declaration>), ProtocolError> {
    let mut items = rest.into_iter();
    let entries = match items.next() {
        Some(Expr::List(entries)) => entries,
        Some(other) => return Err(malformed(context, &other)),
        None => return Err(malformed(context, &Expr::List(Vec::new()))),
    };
    let Some(first) = entries.into_iter().next() else {
        return Ok((None, Vec::new()));
    };
    let [subject, references] = take::<2>(first, context)?;
    let subject = declaration(subject, context)?;
    let references = match references {
        Expr::List(refs) => refs
            .into_iter()
            .map(|r| declaration(r, context))
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(malformed(context, &other)),
    };
    Ok((Some(subject), references))
}

/// Tolerates the degraded shapes of Idris 2 (circa 0.2.1), where the
/// command is unimplemented and returns `(:ok "" ())` or a truncated
/// 1-tuple: missing sub-lists default to empty rather than failing.
fn browse_namespace(rest: Vec<Expr>) -> Result<BrowseNamespace, ProtocolError> {
    let context = "browse-namespace";
    let mut items = rest.into_iter();
    let inner = match items.next() {
        None | Some(Expr::Str(_)) => {
            return Ok(BrowseNamespace {
                sub_modules: Vec::new(),
                declarations: Vec::new(),
            })
        }
        Some(Expr::List(inner)) => inner,
        Some(other) => return Err(malformed(context, &other)),
    };
    let mut inner = inner.into_iter();
    let sub_modules = match inner.next() {
        None => Vec::new(),
        Some(Expr::List(mods)) => mods
            .into_iter()
            .map(|m| expect_string(m, context))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(malformed(context, &other)),
    };
    let declarations = match inner.next() {
        None => Vec::new(),
        Some(Expr::List(decls)) => decls
            .into_iter()
            .map(|d| declaration(d, context))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(malformed(context, &other)),
    };
    Ok(BrowseNamespace {
        sub_modules,
        declarations,
    })
}

/// Dialect 1 returns a tagged two-part form; dialect 2 (unstable upstream)
/// collapses both parts into one newline-joined string, split back apart
/// here.
fn make_lemma(rest: Vec<Expr>) -> Result<MakeLemma, ProtocolError> {
    let context = "make-lemma";
    let mut items = rest.into_iter();
    match items.next() {
        Some(Expr::Str(joined)) => {
            let (declaration, metavariable) = match joined.split_once('\n') {
                Some((d, m)) => (d.to_string(), m.to_string()),
                None => (joined, String::new()),
            };
            Ok(MakeLemma {
                declaration,
                metavariable,
            })
        }
        Some(Expr::List(parts)) => {
            // (:metavariable-lemma (:replace-metavariable mv) (:definition-type decl))
            let [_tag, replace, definition] =
                <[Expr; 3]>::try_from(parts).map_err(|p| malformed(context, &Expr::List(p)))?;
            let [_kw, metavariable] = take::<2>(replace, context)?;
            let [_kw, declaration] = take::<2>(definition, context)?;
            Ok(MakeLemma {
                declaration: expect_string(declaration, context)?,
                metavariable: expect_string(metavariable, context)?,
            })
        }
        Some(other) => Err(malformed(context, &other)),
        None => Err(malformed(context, &Expr::List(Vec::new()))),
    }
}

/// `(name (premise…) (type metadata))` per metavariable, where a premise
/// is `(name type metadata)`.
fn metavariables(rest: Vec<Expr>) -> Result<Metavariables, ProtocolError> {
    let context = "metavariables";
    let mut items = rest.into_iter();
    let entries = match items.next() {
        Some(Expr::List(entries)) => entries,
        Some(other) => return Err(malformed(context, &other)),
        None => return Err(malformed(context, &Expr::List(Vec::new()))),
    };
    let mut metavariables = Vec::with_capacity(entries.len());
    for entry in entries {
        let [name, premises, typed] = take::<3>(entry, context)?;
        let [type_, metadata] = take::<2>(typed, context)?;
        let variable = Variable {
            name: expect_string(name, context)?,
            type_: expect_string(type_, context)?,
            metadata: message_metadata(metadata, context)?,
        };
        let premises = match premises {
            Expr::List(ps) => ps
                .into_iter()
                .map(|p| {
                    let [name, type_, metadata] = take::<3>(p, context)?;
                    Ok(Variable {
                        name: expect_string(name, context)?,
                        type_: expect_string(type_, context)?,
                        metadata: message_metadata(metadata, context)?,
                    })
                })
                .collect::<Result<Vec<_>, ProtocolError>>()?,
            other => return Err(malformed(context, &other)),
        };
        metavariables.push(Metavariable { variable, premises });
    }
    Ok(Metavariables { metavariables })
}

/// The full shape is `((completion…) "")` with a trailing empty string of
/// unknown purpose; Idris 2 (unimplemented) sends a bare `()`. Both decode
/// to the completion list, defaulting to empty.
fn repl_completions(rest: Vec<Expr>) -> Result<ReplCompletions, ProtocolError> {
    let context = "repl-completions";
    let mut items = rest.into_iter();
    let inner = match items.next() {
        None => {
            return Ok(ReplCompletions {
                completions: Vec::new(),
            })
        }
        Some(Expr::List(inner)) => inner,
        Some(other) => return Err(malformed(context, &other)),
    };
    let completions = match inner.into_iter().next() {
        None => Vec::new(),
        Some(Expr::List(comps)) => comps
            .into_iter()
            .map(|c| expect_string(c, context))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(malformed(context, &other)),
    };
    Ok(ReplCompletions { completions })
}

/// `(((major minor patch) (tag…)))`.
fn version(rest: Vec<Expr>) -> Result<Version, ProtocolError> {
    let context = "version";
    let mut items = rest.into_iter();
    let inner = items
        .next()
        .ok_or_else(|| malformed(context, &Expr::List(Vec::new())))?;
    let [numbers, tags] = take::<2>(inner, context)?;
    let [major, minor, patch] = take::<3>(numbers, context)?;
    let tags = match tags {
        Expr::List(tags) => tags
            .into_iter()
            .map(|t| expect_string(t, context))
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(malformed(context, &other)),
    };
    Ok(Version {
        major: major.as_nat().ok_or_else(|| malformed(context, &major))?,
        minor: minor.as_nat().ok_or_else(|| malformed(context, &minor))?,
        patch: patch.as_nat().ok_or_else(|| malformed(context, &patch))?,
        tags,
    })
}
