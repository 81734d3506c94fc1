//! The async client: request correlation, dialect negotiation, and the
//! reader task.
//!
//! [`IdrisClient`] owns the write half of the tool's stdio channel and a
//! spawned reader task that owns the read half. Every command method
//! serializes one request, parks a oneshot in the registry under the
//! request id, and awaits the matching `:return`. The reader task drains
//! frames, decodes replies, routes informational replies to the optional
//! callback, and resolves the waiting oneshot when the final reply lands.
//!
//! Domain failures (`:error` payloads) are ordinary values in the reply
//! types; only transport and protocol breakdowns surface as
//! [`ClientError`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::framing::FrameReader;
use crate::parser::{decode, parse_root, ProtocolError};
use crate::reply::{
    AddClause, AddMissing, Apropos, BrowseNamespace, CallsWho, CaseSplit, CommandResult,
    DocsFor, FinalReply, GenerateDef, Interpret, LoadFile, MakeCase, MakeLemma, MakeWith,
    Metavariables, PrintDefinition, ProofSearch, Reply, ReplCompletions, TypeAt, TypeOf,
    Version, WhoCalls,
};
use crate::request::{Dialect, DocMode, Request, RequestType};
use crate::sexp::ReplyTag;

/// Errors that terminate a command or the whole connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o failure on the tool channel")]
    Io(#[from] std::io::Error),

    /// The byte stream stopped making protocol sense. Recorded by the
    /// reader task and handed to whichever caller was waiting.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection is closed: `close` was called, the tool exited, or
    /// the reader task gave up after a protocol failure.
    #[error("connection to the tool process is closed")]
    ConnectionClosed,

    /// A final reply decoded cleanly but did not match the command that
    /// was sent under its id.
    #[error("unexpected reply for {command}: {reply:?}")]
    UnexpectedReply {
        command: &'static str,
        reply: Box<Reply>,
    },

    /// The child process was spawned without a piped handle.
    #[error("child process has no piped {stream}")]
    MissingStdio { stream: &'static str },
}

/// Observer invoked by the reader task for every decoded reply, final and
/// informational alike. Unmatched final replies are dropped before
/// decoding and never reach it.
pub type ReplyCallback = Arc<dyn Fn(&Reply) + Send + Sync>;

/// Construction options for [`IdrisClient`].
#[derive(Default)]
pub struct ClientOptions {
    /// Log the raw wire text of every request and reply at debug level.
    pub debug: bool,
    pub reply_callback: Option<ReplyCallback>,
}

struct Pending {
    request_type: RequestType,
    tx: oneshot::Sender<Reply>,
}

/// Shared between command methods and the reader task.
struct Inner {
    registry: HashMap<u64, Pending>,
    dialect: Dialect,
    closed: bool,
    /// First fatal protocol error, kept so waiters see the cause instead
    /// of a bare closed-connection error.
    failure: Option<ProtocolError>,
}

/// Early-return a typed command result or report the mismatch.
macro_rules! expect_reply {
    ($reply:expr, $variant:ident, $command:literal) => {
        match $reply {
            Reply::Return {
                reply: FinalReply::$variant(result),
                ..
            } => Ok(result),
            other => Err(ClientError::UnexpectedReply {
                command: $command,
                reply: Box::new(other),
            }),
        }
    };
}

/// Asynchronous driver for one IDE-mode tool connection.
///
/// Commands may be issued concurrently from multiple tasks; replies are
/// correlated by request id, not arrival order. The client is done with
/// the connection after [`close`](IdrisClient::close).
pub struct IdrisClient {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    inner: Arc<Mutex<Inner>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    debug: bool,
}

impl IdrisClient {
    /// Build a client over any byte channel, typically the tool's stdout
    /// and stdin.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_options(reader, writer, ClientOptions::default())
    }

    pub fn with_options<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let inner = Arc::new(Mutex::new(Inner {
            registry: HashMap::new(),
            dialect: Dialect::default(),
            closed: false,
            failure: None,
        }));
        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&inner),
            options.reply_callback,
            options.debug,
        ));
        IdrisClient {
            writer: Mutex::new(Box::new(writer)),
            inner,
            next_id: AtomicU64::new(1),
            reader,
            debug: options.debug,
        }
    }

    /// Attach to an already-spawned tool process, taking its piped stdin
    /// and stdout.
    ///
    /// # Errors
    ///
    /// Fails with [`ClientError::MissingStdio`] if the child was spawned
    /// without `Stdio::piped()` on either handle.
    pub fn from_child(child: &mut tokio::process::Child) -> Result<Self, ClientError> {
        let stdin = child
            .stdin
            .take()
            .ok_or(ClientError::MissingStdio { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ClientError::MissingStdio { stream: "stdout" })?;
        Ok(Self::new(stdout, stdin))
    }

    /// Load and type-check a source file. Must precede the commands that
    /// operate on the loaded module.
    pub async fn load_file(&self, path: &str) -> Result<CommandResult<LoadFile>, ClientError> {
        let reply = self
            .make_request(|id| Request::LoadFile {
                id,
                path: path.to_string(),
            })
            .await?;
        expect_reply!(reply, LoadFile, "load-file")
    }

    /// Evaluate an expression in the context of the loaded file.
    pub async fn interpret(
        &self,
        expression: &str,
    ) -> Result<CommandResult<Interpret>, ClientError> {
        let reply = self
            .make_request(|id| Request::Interpret {
                id,
                expression: expression.to_string(),
            })
            .await?;
        expect_reply!(reply, Interpret, "interpret")
    }

    /// The type of a name in scope.
    pub async fn type_of(&self, name: &str) -> Result<CommandResult<TypeOf>, ClientError> {
        let reply = self
            .make_request(|id| Request::TypeOf {
                id,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, TypeOf, "type-of")
    }

    /// The type of the occurrence at a source position, local bindings
    /// included. Idris 2 only.
    pub async fn type_at(
        &self,
        name: &str,
        line: u64,
        column: u64,
    ) -> Result<CommandResult<TypeAt>, ClientError> {
        let reply = self
            .make_request(|id| Request::TypeAt {
                id,
                name: name.to_string(),
                line,
                column,
            })
            .await?;
        expect_reply!(reply, TypeAt, "type-at")
    }

    /// Split the variable at the given line into one clause per
    /// constructor.
    pub async fn case_split(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<CaseSplit>, ClientError> {
        let reply = self
            .make_request(|id| Request::CaseSplit {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, CaseSplit, "case-split")
    }

    /// An initial pattern clause for the declaration at the given line.
    pub async fn add_clause(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<AddClause>, ClientError> {
        let reply = self
            .make_request(|id| Request::AddClause {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, AddClause, "add-clause")
    }

    /// Clauses for the constructors not yet covered at the given line.
    pub async fn add_missing(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<AddMissing>, ClientError> {
        let reply = self
            .make_request(|id| Request::AddMissing {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, AddMissing, "add-missing")
    }

    /// Documentation for a name, either the overview paragraph or the
    /// full text.
    pub async fn docs_for(
        &self,
        name: &str,
        mode: DocMode,
    ) -> Result<CommandResult<DocsFor>, ClientError> {
        let reply = self
            .make_request(|id| Request::DocsFor {
                id,
                name: name.to_string(),
                mode,
            })
            .await?;
        expect_reply!(reply, DocsFor, "docs-for")
    }

    /// Search documentation for a string.
    pub async fn apropos(&self, needle: &str) -> Result<CommandResult<Apropos>, ClientError> {
        let reply = self
            .make_request(|id| Request::Apropos {
                id,
                needle: needle.to_string(),
            })
            .await?;
        expect_reply!(reply, Apropos, "apropos")
    }

    /// The unsolved holes of the loaded file, with premises and types
    /// rendered at the given column width.
    pub async fn metavariables(
        &self,
        width: u64,
    ) -> Result<CommandResult<Metavariables>, ClientError> {
        let reply = self
            .make_request(|id| Request::Metavariables { id, width })
            .await?;
        expect_reply!(reply, Metavariables, "metavariables")
    }

    /// The callers of a name.
    pub async fn who_calls(&self, name: &str) -> Result<CommandResult<WhoCalls>, ClientError> {
        let reply = self
            .make_request(|id| Request::WhoCalls {
                id,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, WhoCalls, "who-calls")
    }

    /// The names a function calls.
    pub async fn calls_who(&self, name: &str) -> Result<CommandResult<CallsWho>, ClientError> {
        let reply = self
            .make_request(|id| Request::CallsWho {
                id,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, CallsWho, "calls-who")
    }

    /// The sub-modules and declarations of a namespace.
    pub async fn browse_namespace(
        &self,
        namespace: &str,
    ) -> Result<CommandResult<BrowseNamespace>, ClientError> {
        let reply = self
            .make_request(|id| Request::BrowseNamespace {
                id,
                namespace: namespace.to_string(),
            })
            .await?;
        expect_reply!(reply, BrowseNamespace, "browse-namespace")
    }

    /// Rewrite the right-hand side at the given line into a case block.
    pub async fn make_case(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<MakeCase>, ClientError> {
        let reply = self
            .make_request(|id| Request::MakeCase {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, MakeCase, "make-case")
    }

    /// A with-rule template for the clause at the given line.
    pub async fn make_with(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<MakeWith>, ClientError> {
        let reply = self
            .make_request(|id| Request::MakeWith {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, MakeWith, "make-with")
    }

    /// Lift the hole at the given line into a top-level lemma and an
    /// application of it.
    pub async fn make_lemma(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<MakeLemma>, ClientError> {
        let reply = self
            .make_request(|id| Request::MakeLemma {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, MakeLemma, "make-lemma")
    }

    /// The full definition of a name.
    pub async fn print_definition(
        &self,
        name: &str,
    ) -> Result<CommandResult<PrintDefinition>, ClientError> {
        let reply = self
            .make_request(|id| Request::PrintDefinition {
                id,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, PrintDefinition, "print-definition")
    }

    /// Search for an expression filling the hole at the given line,
    /// optionally hinted with extra names to try.
    pub async fn proof_search(
        &self,
        name: &str,
        line: u64,
        hints: Vec<String>,
    ) -> Result<CommandResult<ProofSearch>, ClientError> {
        let reply = self
            .make_request(|id| Request::ProofSearch {
                id,
                line,
                name: name.to_string(),
                hints,
            })
            .await?;
        expect_reply!(reply, ProofSearch, "proof-search")
    }

    /// The next solution of the most recent proof search. Idris 2 only.
    pub async fn proof_search_next(&self) -> Result<CommandResult<ProofSearch>, ClientError> {
        let reply = self
            .make_request(|id| Request::ProofSearchNext { id })
            .await?;
        expect_reply!(reply, ProofSearch, "proof-search-next")
    }

    /// Generate a complete definition for the declaration at the given
    /// line.
    pub async fn generate_def(
        &self,
        name: &str,
        line: u64,
    ) -> Result<CommandResult<GenerateDef>, ClientError> {
        let reply = self
            .make_request(|id| Request::GenerateDef {
                id,
                line,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, GenerateDef, "generate-def")
    }

    /// The next definition of the most recent generate-def. Idris 2 only.
    pub async fn generate_def_next(&self) -> Result<CommandResult<GenerateDef>, ClientError> {
        let reply = self
            .make_request(|id| Request::GenerateDefNext { id })
            .await?;
        expect_reply!(reply, GenerateDef, "generate-def-next")
    }

    /// The tool's version triple and release tags.
    pub async fn version(&self) -> Result<CommandResult<Version>, ClientError> {
        let reply = self.make_request(|id| Request::Version { id }).await?;
        expect_reply!(reply, Version, "version")
    }

    /// REPL completions for a partial name.
    pub async fn repl_completions(
        &self,
        name: &str,
    ) -> Result<CommandResult<ReplCompletions>, ClientError> {
        let reply = self
            .make_request(|id| Request::ReplCompletions {
                id,
                name: name.to_string(),
            })
            .await?;
        expect_reply!(reply, ReplCompletions, "repl-completions")
    }

    /// Close the connection: stop the reader task, fail any in-flight
    /// commands with [`ClientError::ConnectionClosed`], and shut the
    /// write half down so the tool process sees EOF on stdin.
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            // Dropping the senders wakes every waiter.
            inner.registry.clear();
        }
        self.reader.abort();
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    /// Serialize, register, send, and await the final reply for one
    /// request. The registry entry is made before the write so a reply
    /// can never race past its waiter.
    async fn make_request(
        &self,
        build: impl FnOnce(u64) -> Request,
    ) -> Result<Reply, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = build(id);
        let (tx, rx) = oneshot::channel();

        let wire = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(ClientError::ConnectionClosed);
            }
            inner.registry.insert(
                id,
                Pending {
                    request_type: request.request_type(),
                    tx,
                },
            );
            request.serialize(inner.dialect)
        };
        if self.debug {
            debug!(id, wire = %wire.trim_end(), "sending request");
        }

        let write_result = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(wire.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = write_result {
            self.inner.lock().await.registry.remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(reply) => Ok(reply),
            // Sender dropped: the connection died under us. Report the
            // protocol failure that killed it when there is one.
            Err(_) => {
                let inner = self.inner.lock().await;
                match &inner.failure {
                    Some(e) => Err(ClientError::Protocol(e.clone())),
                    None => Err(ClientError::ConnectionClosed),
                }
            }
        }
    }
}

/// The reader task: drain frames, decode, dispatch. Exits on EOF, read
/// error, or the first protocol failure, closing the connection either
/// way.
async fn read_loop<R>(
    mut reader: R,
    inner: Arc<Mutex<Inner>>,
    callback: Option<ReplyCallback>,
    debug: bool,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut frames = FrameReader::new();
    let mut buf = [0u8; 4096];
    'outer: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("tool stream reached EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "read from tool failed");
                break;
            }
        };
        let bodies = match frames.push(&buf[..n]) {
            Ok(bodies) => bodies,
            Err(e) => {
                error!(error = %e, "framing failure, dropping connection");
                inner.lock().await.failure = Some(e);
                break;
            }
        };
        for body in bodies {
            if debug {
                debug!(body = %body, "received reply");
            }
            if let Err(e) = handle_body(&body, &inner, callback.as_deref()).await {
                error!(error = %e, body = %body, "protocol failure, dropping connection");
                inner.lock().await.failure = Some(e);
                break 'outer;
            }
        }
    }
    let mut inner = inner.lock().await;
    inner.closed = true;
    inner.registry.clear();
}

async fn handle_body(
    body: &str,
    inner: &Mutex<Inner>,
    callback: Option<&(dyn Fn(&Reply) + Send + Sync)>,
) -> Result<(), ProtocolError> {
    let root = parse_root(body)?;
    let id = root.id;

    // The id lookup happens before decoding, for every tag: a message
    // under an id nothing is waiting on is dropped whole, so a stray
    // notification can neither reach the observer nor fail the
    // connection. The one exception is :protocol-version, which Idris 2
    // emits before the first request goes out, under an id that is
    // never registered; the dialect switch must still land.
    let registered = inner.lock().await.registry.get(&id).map(|p| p.request_type);
    let request_type = match registered {
        Some(request_type) => request_type,
        // Only :return dispatch reads the request type.
        None if root.tag == ReplyTag::ProtocolVersion => RequestType::LoadFile,
        None => {
            debug!(id, tag = root.tag.as_symbol(), "reply for unknown request id, dropped");
            return Ok(());
        }
    };

    let reply = decode(root, request_type)?;

    // The dialect switches even when the announcing id is unregistered:
    // Idris 2 announces version 2 before the first request goes out. The
    // switch is one-way for the life of the connection.
    if let Reply::ProtocolVersion { version, .. } = &reply {
        if Dialect::from_protocol_version(*version) == Dialect::V2 {
            let mut inner = inner.lock().await;
            if inner.dialect != Dialect::V2 {
                info!(version, "switching to protocol dialect 2");
                inner.dialect = Dialect::V2;
            }
        }
    }

    if let Some(callback) = callback {
        callback(&reply);
    }

    if reply.is_final() {
        let pending = inner.lock().await.registry.remove(&id);
        if let Some(pending) = pending {
            // A dropped receiver just means the caller gave up waiting.
            let _ = pending.tx.send(reply);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::frame;
    use tokio::io::AsyncWriteExt;

    async fn send(server: &mut tokio::io::DuplexStream, body: &str) {
        let framed = frame(&format!("{}\n", body));
        server.write_all(framed.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_resolves_on_matching_final_reply() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let client = IdrisClient::new(read_half, write_half);

        let pending = tokio::spawn(async move {
            client.type_of("plusTwo").await
        });
        // Drain the request before replying.
        let mut buf = [0u8; 256];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..n]).unwrap(),
            frame("((:type-of \"plusTwo\") 1)\n")
        );
        send(&mut server, r#"(:return (:ok "Nat -> Nat" ()) 1)"#).await;

        let result = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(result.type_of, "Nat -> Nat");
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let (client_io, _server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let client = IdrisClient::new(read_half, write_half);

        client.close().await.unwrap();
        let err = client.version().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_ids_are_sequential_from_one() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_io);
        let client = Arc::new(IdrisClient::new(read_half, write_half));

        let c = Arc::clone(&client);
        let first = tokio::spawn(async move { c.version().await });
        let mut buf = [0u8; 256];
        let n = server.read(&mut buf).await.unwrap();
        assert!(std::str::from_utf8(&buf[..n]).unwrap().contains("((:version) 1)"));
        send(&mut server, "(:return (:ok ((1 3 2) ())) 1)").await;
        first.await.unwrap().unwrap().unwrap();

        let c = Arc::clone(&client);
        let second = tokio::spawn(async move { c.version().await });
        let n = server.read(&mut buf).await.unwrap();
        assert!(std::str::from_utf8(&buf[..n]).unwrap().contains("((:version) 2)"));
        send(&mut server, "(:return (:ok ((1 3 2) ())) 2)").await;
        second.await.unwrap().unwrap().unwrap();
    }
}
