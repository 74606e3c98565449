//! Tokenizer for the expression language.

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    AndAnd,
    OrOr,
}

/// A token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '0'..='9' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &src[pos..end];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::new(pos, format!("invalid number '{text}'")))?;
                tokens.push(Spanned {
                    token: Token::Number(n),
                    pos,
                });
                continue;
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for (_, d) in chars.by_ref() {
                    if d == c {
                        closed = true;
                        break;
                    }
                    text.push(d);
                }
                if !closed {
                    return Err(ParseError::new(pos, "unterminated string literal"));
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    pos,
                });
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '.' || d == '$' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &src[pos..end];
                if name.ends_with('.') || name.contains("..") {
                    return Err(ParseError::new(pos, format!("malformed identifier '{name}'")));
                }
                tokens.push(Spanned {
                    token: Token::Ident(name.to_string()),
                    pos,
                });
                continue;
            }
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, d)| d);
                let two = |t: Token| (t, true);
                let (token, consumed_second) = match (c, next) {
                    ('=', Some('=')) => two(Token::EqEq),
                    ('!', Some('=')) => two(Token::NotEq),
                    ('>', Some('=')) => two(Token::Ge),
                    ('<', Some('=')) => two(Token::Le),
                    ('&', Some('&')) => two(Token::AndAnd),
                    ('|', Some('|')) => two(Token::OrOr),
                    ('>', _) => (Token::Gt, false),
                    ('<', _) => (Token::Lt, false),
                    ('!', _) => (Token::Bang, false),
                    ('+', _) => (Token::Plus, false),
                    ('-', _) => (Token::Minus, false),
                    ('*', _) => (Token::Star, false),
                    ('/', _) => (Token::Slash, false),
                    ('%', _) => (Token::Percent, false),
                    ('(', _) => (Token::LParen, false),
                    (')', _) => (Token::RParen, false),
                    (',', _) => (Token::Comma, false),
                    _ => return Err(ParseError::new(pos, format!("unexpected character '{c}'"))),
                };
                if consumed_second {
                    chars.next();
                }
                token
            }
        };
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a >= 1 && b != 'x'"),
            vec![
                Token::Ident("a".into()),
                Token::Ge,
                Token::Number(1.0),
                Token::AndAnd,
                Token::Ident("b".into()),
                Token::NotEq,
                Token::Str("x".into()),
            ]
        );
    }

    #[test]
    fn test_dotted_and_unicode_identifiers() {
        assert_eq!(
            kinds("vars.국어평균 * 0.5"),
            vec![
                Token::Ident("vars.국어평균".into()),
                Token::Star,
                Token::Number(0.5),
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert_eq!(err.position, 0);
    }

    #[test]
    fn test_single_ampersand_rejected() {
        assert!(tokenize("a & b").is_err());
    }

    #[test]
    fn test_bad_number() {
        assert!(tokenize("1.2.3").is_err());
    }
}
