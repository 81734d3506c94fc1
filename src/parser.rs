//! Parsing pipeline for inbound protocol messages.
//!
//! A framed message body passes through three stages:
//!
//! ```text
//! &str ──lexer──► Vec<Token> ──expr──► RootExpr ──reply──► Reply
//! ```
//!
//! Each stage is fatal for the current message on malformed input, but never
//! touches the frame reader's buffer, so subsequent messages are unaffected.

mod expr;
mod lexer;
mod reply;

pub use expr::{parse, parse_root};
pub use lexer::{lex, Token};
pub use reply::decode;

use thiserror::Error;

/// Errors raised by the framing and parsing pipeline.
///
/// Lex and parse failures are fatal to the message that produced them.
/// `BadHeader` and `Desync` indicate the byte stream and the client have
/// lost protocol agreement, which is unrecoverable for the connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The lexer hit a character outside the token grammar.
    #[error("unhandled character {ch:?} at offset {offset} in {context:?}")]
    UnexpectedChar {
        ch: char,
        offset: usize,
        context: String,
    },

    /// A string literal was still open at the end of the message.
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    /// A digit run did not fit the natural-number range.
    #[error("invalid natural number {text:?} at offset {offset}")]
    InvalidNat { text: String, offset: usize },

    /// A `)` with no matching `(`, or a `(` never closed.
    #[error("unbalanced parenthesis at token {index}")]
    UnbalancedParen { index: usize },

    /// The six-character length header was not lowercase hex.
    #[error("invalid length header {header:?}")]
    BadHeader { header: String },

    /// A frame boundary split a UTF-8 sequence, or a body was not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// The message parsed, but its top level was not `(tag payload id)`
    /// with a known tag.
    #[error("reply not handled: {raw}")]
    ReplyNotHandled { raw: String },

    /// A reply payload did not have the shape its tag and originating
    /// request demand. Indicates tool/client desynchronization.
    #[error("malformed {context} payload: {expr}")]
    Malformed { context: &'static str, expr: String },
}
