//! Hand-written tokenizer for the accepted SQL subset.

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i32),
    Real(f64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Eof,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits `src` into tokens. A comma never joins two numeric literals —
/// each number is scanned up to (but not across) the first non-digit,
/// non-decimal-point character, so `12,3` always tokenizes as `Int(12)`,
/// `Comma`, `Int(3)`, never as one combined literal.
pub fn tokenize(src: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0usize;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if is_ident_start(c) {
            let start = i;
            i += 1;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let mut saw_dot = false;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !saw_dot)) {
                if chars[i] == '.' {
                    saw_dot = true;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if saw_dot {
                let v: f64 = text
                    .parse()
                    .map_err(|_| QueryError::Syntax(format!("invalid numeric literal '{text}'")))?;
                tokens.push(Token::Real(v));
            } else {
                let v: i32 = text
                    .parse()
                    .map_err(|_| QueryError::Syntax(format!("invalid numeric literal '{text}'")))?;
                tokens.push(Token::Int(v));
            }
            continue;
        }
        if c == '"' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != '"' {
                i += 1;
            }
            if i >= chars.len() {
                return Err(QueryError::Syntax("unterminated string literal".into()));
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
            continue;
        }

        let two: Option<&str> = if i + 1 < chars.len() {
            match (c, chars[i + 1]) {
                ('!', '=') => Some("!="),
                ('>', '=') => Some(">="),
                ('<', '=') => Some("<="),
                _ => None,
            }
        } else {
            None
        };
        if let Some(op) = two {
            tokens.push(match op {
                "!=" => Token::Neq,
                ">=" => Token::Ge,
                "<=" => Token::Le,
                _ => unreachable!(),
            });
            i += 2;
            continue;
        }

        let single = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '=' => Token::Eq,
            '<' => Token::Lt,
            '>' => Token::Gt,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            other => return Err(QueryError::Syntax(format!("unexpected character '{other}'"))),
        };
        tokens.push(single);
        i += 1;
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_create_table_statement() {
        let tokens = tokenize("CREATE TABLE t (n INT, s TEXT(4));").unwrap();
        assert_eq!(tokens[0], Token::Ident("CREATE".into()));
        assert_eq!(tokens[1], Token::Ident("TABLE".into()));
        assert!(tokens.contains(&Token::LParen));
        assert_eq!(*tokens.last().unwrap(), Token::Eof);
    }

    #[test]
    fn comma_never_joins_two_numbers() {
        let tokens = tokenize("12,3").unwrap();
        assert_eq!(tokens[0], Token::Int(12));
        assert_eq!(tokens[1], Token::Comma);
        assert_eq!(tokens[2], Token::Int(3));
    }

    #[test]
    fn strips_hash_comments() {
        let tokens = tokenize("SELECT * # trailing comment\nFROM t;").unwrap();
        assert!(tokens.iter().any(|t| *t == Token::Ident("FROM".into())));
        assert!(!tokens.iter().any(|t| matches!(t, Token::Ident(s) if s.contains("comment"))));
    }

    #[test]
    fn recognizes_two_character_operators() {
        let tokens = tokenize("a >= 1 AND b != 2").unwrap();
        assert!(tokens.contains(&Token::Ge));
        assert!(tokens.contains(&Token::Neq));
    }
}
