//! Tokenizer for formula source.

use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    /// Byte offset of the token start.
    pub offset: usize,
}

/// Longest operators first so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "=>", "?.", "(", ")", "[",
    "]", "{", "}", ",", ".", "?", ":", ";", "+", "-", "*", "/", "%", "!", "<", ">", "=",
];

/// Split `source` into tokens, always ending with [`Token::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, EvalError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let (number, end) = lex_number(source, pos)?;
            tokens.push(Spanned { token: Token::Number(number), offset: start });
            pos = end;
        } else if c == b'"' || c == b'\'' {
            let (text, end) = lex_string(source, pos)?;
            tokens.push(Spanned { token: Token::Str(text), offset: start });
            pos = end;
        } else if is_ident_start(c) {
            pos += 1;
            while pos < bytes.len() && is_ident_continue(bytes[pos]) {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(source[start..pos].to_string()),
                offset: start,
            });
        } else if let Some(punct) = PUNCTUATORS.iter().find(|p| source[pos..].starts_with(**p)) {
            tokens.push(Spanned { token: Token::Punct(*punct), offset: start });
            pos += punct.len();
        } else {
            let ch = source[pos..].chars().next().unwrap_or('?');
            return Err(EvalError::syntax(format!(
                "Invalid or unexpected token '{ch}' at position {pos}"
            )));
        }
    }

    tokens.push(Spanned { token: Token::Eof, offset: source.len() });
    Ok(tokens)
}

const fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

const fn is_ident_continue(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

fn lex_number(source: &str, start: usize) -> Result<(f64, usize), EvalError> {
    let bytes = source.as_bytes();
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    if pos < bytes.len() && is_ident_start(bytes[pos]) {
        return Err(EvalError::syntax(format!(
            "Invalid or unexpected token at position {pos}"
        )));
    }

    let text = &source[start..pos];
    text.parse::<f64>()
        .map(|n| (n, pos))
        .map_err(|_| EvalError::syntax(format!("Invalid number literal '{text}'")))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), EvalError> {
    let mut chars = source[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(EvalError::syntax("Invalid or unexpected token"));
    };

    let mut text = String::new();
    while let Some((offset, ch)) = chars.next() {
        if ch == quote {
            return Ok((text, start + offset + ch.len_utf8()));
        }
        if ch == '\n' {
            break;
        }
        if ch == '\\' {
            let Some((_, escaped)) = chars.next() else {
                break;
            };
            text.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
        } else {
            text.push(ch);
        }
    }

    Err(EvalError::syntax("Invalid or unexpected token: unterminated string literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn tokenizes_call_with_member() {
        assert_eq!(
            kinds(r##"getBots("#name", 'bob').length"##),
            vec![
                Token::Ident("getBots".into()),
                Token::Punct("("),
                Token::Str("#name".into()),
                Token::Punct(","),
                Token::Str("bob".into()),
                Token::Punct(")"),
                Token::Punct("."),
                Token::Ident("length".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("a === b => c"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("==="),
                Token::Ident("b".into()),
                Token::Punct("=>"),
                Token::Ident("c".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1.5")[0], Token::Number(1.5));
        assert_eq!(kinds(".5")[0], Token::Number(0.5));
        assert_eq!(kinds("2e3")[0], Token::Number(2000.0));
        assert!(tokenize("12abc").is_err());
    }

    #[test]
    fn string_escapes() {
        assert_eq!(kinds(r#""a\"b\n""#)[0], Token::Str("a\"b\n".into()));
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("1 @ 2").expect_err("should fail");
        assert!(err.is_syntax());
    }
}
