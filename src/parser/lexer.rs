//! Tokenizer for message bodies.
//!
//! The token grammar is small: parentheses, naturals, double-quoted strings
//! and colon-prefixed symbols, with insignificant whitespace between tokens.
//! String escapes are minimal: a backslash drops itself and keeps the next
//! character verbatim, with no escape table (`\n` decodes to `n`).

use super::ProtocolError;

/// How much surrounding text to include in lex error diagnostics, in
/// characters on each side of the offending one.
const ERROR_CONTEXT_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Nat(u64),
    Str(String),
    Sym(String),
}

/// Symbols run over ASCII letters and hyphens after the leading colon.
fn is_symbol_char(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '-'
}

fn is_space(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

/// A bounded window of text around `offset` for diagnostics.
fn context_window(text: &str, offset: usize) -> String {
    let start = text[..offset]
        .char_indices()
        .rev()
        .nth(ERROR_CONTEXT_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = text[offset..]
        .char_indices()
        .nth(ERROR_CONTEXT_CHARS)
        .map(|(i, _)| offset + i)
        .unwrap_or(text.len());
    text[start..end].to_string()
}

/// Tokenize the full text of one framed message body.
///
/// Offsets in errors are byte offsets into `text`.
pub fn lex(text: &str) -> Result<Vec<Token>, ProtocolError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let (offset, ch) = chars[pos];
        match ch {
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            ':' => {
                let start = pos;
                pos += 1;
                while pos < chars.len() && is_symbol_char(chars[pos].1) {
                    pos += 1;
                }
                let sym: String = chars[start..pos].iter().map(|&(_, c)| c).collect();
                tokens.push(Token::Sym(sym));
            }
            '"' => {
                pos += 1; // consume the opening quote
                let mut value = String::new();
                loop {
                    match chars.get(pos) {
                        None => return Err(ProtocolError::UnterminatedString { offset }),
                        Some(&(_, '"')) => {
                            pos += 1; // consume the closing quote
                            break;
                        }
                        Some(&(_, '\\')) => {
                            // Drop the backslash, keep the next character.
                            pos += 1;
                            match chars.get(pos) {
                                None => {
                                    return Err(ProtocolError::UnterminatedString { offset })
                                }
                                Some(&(_, escaped)) => {
                                    value.push(escaped);
                                    pos += 1;
                                }
                            }
                        }
                        Some(&(_, c)) => {
                            value.push(c);
                            pos += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && chars[pos].1.is_ascii_digit() {
                    pos += 1;
                }
                let digits: String = chars[start..pos].iter().map(|&(_, c)| c).collect();
                let nat = digits.parse::<u64>().map_err(|_| ProtocolError::InvalidNat {
                    text: digits.clone(),
                    offset,
                })?;
                tokens.push(Token::Nat(nat));
            }
            c if is_space(c) => {
                pos += 1;
            }
            other => {
                return Err(ProtocolError::UnexpectedChar {
                    ch: other,
                    offset,
                    context: context_window(text, offset),
                });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lexes_a_return_reply() {
        let tokens = lex(r#"(:return (:ok "f cat = ?f_rhs") 2)"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::LParen,
                Token::Sym(":return".to_string()),
                Token::LParen,
                Token::Sym(":ok".to_string()),
                Token::Str("f cat = ?f_rhs".to_string()),
                Token::RParen,
                Token::Nat(2),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_whitespace_between_tokens_is_insignificant() {
        let compact = lex("(:ok 1)").unwrap();
        let spread = lex(" (\t:ok\n 1\r ) ").unwrap();
        assert_eq!(compact, spread);
    }

    #[test]
    fn test_escape_drops_backslash_only() {
        let tokens = lex(r#""a \"b\" \\ \n""#).unwrap();
        // No escape table: `\n` is the letter n, not a newline.
        assert_eq!(tokens, vec![Token::Str(r#"a "b" \ n"#.to_string())]);
    }

    #[test]
    fn test_string_keeps_unicode_verbatim() {
        let tokens = lex(r#""Nat → Nat""#).unwrap();
        assert_eq!(tokens, vec![Token::Str("Nat → Nat".to_string())]);
    }

    #[test]
    fn test_maximal_digit_runs() {
        let tokens = lex("12 345").unwrap();
        assert_eq!(tokens, vec![Token::Nat(12), Token::Nat(345)]);
    }

    #[test]
    fn test_symbol_stops_at_non_symbol_char() {
        let tokens = lex(":doc-overview(").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Sym(":doc-overview".to_string()), Token::LParen]
        );
    }

    #[test]
    fn test_unexpected_char_reports_offset_and_context() {
        let err = lex("(:ok #)").unwrap_err();
        match err {
            ProtocolError::UnexpectedChar { ch, offset, context } => {
                assert_eq!(ch, '#');
                assert_eq!(offset, 5);
                assert_eq!(context, "(:ok #)");
            }
            other => panic!("expected UnexpectedChar, got {other:?}"),
        }
    }

    #[test]
    fn test_context_window_is_bounded() {
        let long = format!("{}#{}", "a".repeat(500), "b".repeat(500));
        let err = lex(&long).unwrap_err();
        match err {
            ProtocolError::UnexpectedChar { offset, context, .. } => {
                assert_eq!(offset, 500);
                assert_eq!(context.len(), 200);
            }
            other => panic!("expected UnexpectedChar, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let err = lex(r#"(:ok "never closed"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnterminatedString { offset: 5 });
    }

    #[test]
    fn test_trailing_escape_is_an_error() {
        let err = lex(r#""ends with \"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnterminatedString { offset: 0 });
    }
}
