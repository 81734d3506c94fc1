//! S-expression data model for the IDE-mode wire format.
//!
//! Every message the tool process emits reduces to a [`RootExpr`]: a
//! three-element form `(tag payload id)`. The payload is a generic [`Expr`]
//! tree that the reply decoder destructures into typed replies.
//!
//! `Expr` values are produced only by the parser; nothing else in the crate
//! constructs them (tests excepted).

use std::fmt;

use serde::Serialize;

/// A parsed S-expression value: an atom or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expr {
    /// Unsigned natural number, e.g. `42`.
    Nat(u64),
    /// Double-quoted string with escapes already decoded.
    Str(String),
    /// Colon-prefixed symbol, stored with the colon, e.g. `":ok"`.
    Sym(String),
    /// Parenthesized list of sub-expressions.
    List(Vec<Expr>),
}

impl Expr {
    pub fn as_nat(&self) -> Option<u64> {
        match self {
            Expr::Nat(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sym(&self) -> Option<&str> {
        match self {
            Expr::Sym(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expr]> {
        match self {
            Expr::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_sym(self) -> Option<String> {
        match self {
            Expr::Sym(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Expr>> {
        match self {
            Expr::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    /// Renders the expression back to wire-format text. Used for error
    /// diagnostics, not for request encoding.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Nat(n) => write!(f, "{}", n),
            Expr::Str(s) => {
                f.write_str("\"")?;
                for ch in s.chars() {
                    if ch == '"' || ch == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", ch)?;
                }
                f.write_str("\"")
            }
            Expr::Sym(s) => f.write_str(s),
            Expr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// The closed set of reply tags the tool process may emit. Any other tag in
/// root position is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplyTag {
    Output,
    ProtocolVersion,
    Return,
    SetPrompt,
    Warning,
    WriteString,
}

impl ReplyTag {
    pub fn from_symbol(sym: &str) -> Option<Self> {
        match sym {
            ":output" => Some(ReplyTag::Output),
            ":protocol-version" => Some(ReplyTag::ProtocolVersion),
            ":return" => Some(ReplyTag::Return),
            ":set-prompt" => Some(ReplyTag::SetPrompt),
            ":warning" => Some(ReplyTag::Warning),
            ":write-string" => Some(ReplyTag::WriteString),
            _ => None,
        }
    }

    pub fn as_symbol(self) -> &'static str {
        match self {
            ReplyTag::Output => ":output",
            ReplyTag::ProtocolVersion => ":protocol-version",
            ReplyTag::Return => ":return",
            ReplyTag::SetPrompt => ":set-prompt",
            ReplyTag::Warning => ":warning",
            ReplyTag::WriteString => ":write-string",
        }
    }
}

/// The unwrapped top-level form of one protocol message: `(tag payload id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootExpr {
    pub tag: ReplyTag,
    pub payload: Expr,
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_round_trips_wire_text() {
        let expr = Expr::List(vec![
            Expr::Sym(":return".to_string()),
            Expr::List(vec![
                Expr::Sym(":ok".to_string()),
                Expr::Str("f cat = ?f_rhs".to_string()),
            ]),
            Expr::Nat(2),
        ]);
        assert_eq!(expr.to_string(), r#"(:return (:ok "f cat = ?f_rhs") 2)"#);
    }

    #[test]
    fn test_display_escapes_quotes_and_backslashes() {
        let expr = Expr::Str(r#"a "quoted" \ thing"#.to_string());
        assert_eq!(expr.to_string(), r#""a \"quoted\" \\ thing""#);
    }

    #[test]
    fn test_reply_tag_symbols() {
        for tag in [
            ReplyTag::Output,
            ReplyTag::ProtocolVersion,
            ReplyTag::Return,
            ReplyTag::SetPrompt,
            ReplyTag::Warning,
            ReplyTag::WriteString,
        ] {
            assert_eq!(ReplyTag::from_symbol(tag.as_symbol()), Some(tag));
        }
        assert_eq!(ReplyTag::from_symbol(":ok"), None);
        assert_eq!(ReplyTag::from_symbol("output"), None);
    }
}
