//! Client-side engine for the Idris compiler's IDE mode.
//!
//! IDE mode is a line-oriented request/reply protocol over the compiler's
//! stdio: every message is a six-character hexadecimal byte count followed
//! by an S-expression body ending in a newline. Requests carry a client
//! chosen id; the tool answers with any number of informational replies
//! and exactly one final `:return` under the same id.
//!
//! - `framing`: the length-prefix codec and chunk reassembly
//! - `sexp` / `parser`: S-expression data model, lexer, and reply decoder
//! - `request`: typed commands and the dialect-aware wire encoder
//! - `reply`: typed replies, highlight metadata, domain errors
//! - `client`: the async driver tying it all together
//!
//! # Example
//!
//! ```ignore
//! use idris_ide_client::IdrisClient;
//! use tokio::process::Command;
//!
//! let mut child = Command::new("idris2")
//!     .arg("--ide-mode")
//!     .stdin(std::process::Stdio::piped())
//!     .stdout(std::process::Stdio::piped())
//!     .spawn()?;
//! let client = IdrisClient::from_child(&mut child)?;
//!
//! client.load_file("Main.idr").await?;
//! let ty = client.type_of("plusTwo").await??;
//! println!("{}", ty.type_of);
//! client.close().await?;
//! ```

pub mod client;
pub mod framing;
pub mod parser;
pub mod reply;
pub mod request;
pub mod sexp;

pub use client::{ClientError, ClientOptions, IdrisClient, ReplyCallback};
pub use parser::ProtocolError;
pub use reply::{CommandResult, FinalReply, Reply, ReplyError};
pub use request::{Dialect, DocMode, Request, RequestType};
