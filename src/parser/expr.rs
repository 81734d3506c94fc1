//! Token stream to [`Expr`] tree, and the root-form unwrap.
//!
//! The parser is a cursor over the token slice, with no slice copies or
//! per-recursion allocation, just an index that each call advances.

use super::lexer::{lex, Token};
use super::ProtocolError;
use crate::sexp::{Expr, ReplyTag, RootExpr};

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Cursor { tokens, pos: 0 }
    }

    /// Parses the whole token sequence as a flat run of expressions.
    fn parse_all(&mut self) -> Result<Vec<Expr>, ProtocolError> {
        let mut exprs = Vec::new();
        while self.pos < self.tokens.len() {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr, ProtocolError> {
        match &self.tokens[self.pos] {
            Token::Nat(n) => {
                self.pos += 1;
                Ok(Expr::Nat(*n))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Str(s.clone()))
            }
            Token::Sym(s) => {
                self.pos += 1;
                Ok(Expr::Sym(s.clone()))
            }
            Token::LParen => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        // Ran out of tokens with the list still open.
                        None => {
                            return Err(ProtocolError::UnbalancedParen { index: self.pos })
                        }
                        Some(Token::RParen) => {
                            self.pos += 1;
                            return Ok(Expr::List(items));
                        }
                        Some(_) => items.push(self.parse_expr()?),
                    }
                }
            }
            // A `)` in expression position has no matching `(`.
            Token::RParen => Err(ProtocolError::UnbalancedParen { index: self.pos }),
        }
    }
}

/// Parses expressions from raw message text.
pub fn parse(tokens: &[Token]) -> Result<Vec<Expr>, ProtocolError> {
    Cursor::new(tokens).parse_all()
}

/// Lexes and parses one message body down to its `(tag payload id)` root.
///
/// The wire format wraps each message's content in a single outer list, so
/// the top-level parse must yield exactly one expression: a three-element
/// list whose head is a known [`ReplyTag`] and whose tail is the request id.
/// Anything else is a protocol violation, reported with the raw text.
pub fn parse_root(text: &str) -> Result<RootExpr, ProtocolError> {
    let tokens = lex(text)?;
    let mut exprs = parse(&tokens)?;

    let not_handled = || ProtocolError::ReplyNotHandled {
        raw: text.to_string(),
    };

    if exprs.len() != 1 {
        return Err(not_handled());
    }
    let items = exprs.remove(0).into_list().ok_or_else(not_handled)?;
    if items.len() != 3 {
        return Err(not_handled());
    }

    let mut items = items.into_iter();
    let tag = items
        .next()
        .and_then(|e| e.into_sym())
        .and_then(|s| ReplyTag::from_symbol(&s))
        .ok_or_else(not_handled)?;
    let payload = items.next().ok_or_else(not_handled)?;
    let id = items
        .next()
        .and_then(|e| e.as_nat())
        .ok_or_else(not_handled)?;

    Ok(RootExpr { tag, payload, id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sym(s: &str) -> Expr {
        Expr::Sym(s.to_string())
    }

    fn str_(s: &str) -> Expr {
        Expr::Str(s.to_string())
    }

    #[test]
    fn test_parses_atoms_and_nested_lists() {
        let tokens = lex(r#"(:ok ("a" (1 2)) ())"#).unwrap();
        let exprs = parse(&tokens).unwrap();
        assert_eq!(
            exprs,
            vec![Expr::List(vec![
                sym(":ok"),
                Expr::List(vec![
                    str_("a"),
                    Expr::List(vec![Expr::Nat(1), Expr::Nat(2)]),
                ]),
                Expr::List(vec![]),
            ])]
        );
    }

    #[test]
    fn test_empty_form_is_an_empty_list() {
        let tokens = lex("()").unwrap();
        assert_eq!(parse(&tokens).unwrap(), vec![Expr::List(vec![])]);
    }

    #[test]
    fn test_stray_close_paren_is_fatal() {
        let tokens = lex(") :ok").unwrap();
        assert_eq!(
            parse(&tokens).unwrap_err(),
            ProtocolError::UnbalancedParen { index: 0 }
        );
    }

    #[test]
    fn test_unclosed_list_is_fatal() {
        let tokens = lex("(:ok (1").unwrap();
        assert!(matches!(
            parse(&tokens).unwrap_err(),
            ProtocolError::UnbalancedParen { .. }
        ));
    }

    #[test]
    fn test_parse_root_unwraps_the_message_form() {
        let root = parse_root(r#"(:return (:ok "0") 2)"#).unwrap();
        assert_eq!(root.tag, ReplyTag::Return);
        assert_eq!(root.id, 2);
        assert_eq!(root.payload, Expr::List(vec![sym(":ok"), str_("0")]));
    }

    #[test]
    fn test_parse_root_rejects_unknown_tag() {
        let err = parse_root(r#"(:bogus "x" 1)"#).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ReplyNotHandled {
                raw: r#"(:bogus "x" 1)"#.to_string()
            }
        );
    }

    #[test]
    fn test_parse_root_rejects_non_nat_id() {
        assert!(matches!(
            parse_root(r#"(:return (:ok) "2")"#).unwrap_err(),
            ProtocolError::ReplyNotHandled { .. }
        ));
    }

    #[test]
    fn test_parse_root_rejects_wrong_arity() {
        assert!(matches!(
            parse_root(r#"(:return (:ok))"#).unwrap_err(),
            ProtocolError::ReplyNotHandled { .. }
        ));
        assert!(matches!(
            parse_root(r#"(:return (:ok) 1 2)"#).unwrap_err(),
            ProtocolError::ReplyNotHandled { .. }
        ));
    }
}
