//! Module: parser::lexer
//! Responsibility: the character-level tokenizer behind the recursive-
//! descent parser — identifiers/keywords, integer and float
//! literals, single-quoted strings, and punctuation. Keyword
//! recognition happens in `parser`, not here: the lexer only classifies
//! shape, the same split `catalog::stream`'s whitespace tokenizer uses
//! for its simpler grammar.

use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    IntLit(i32),
    FloatLit(f32),
    StrLit(String),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Star,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Eof,
}

fn lex_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::IoError, ErrorOrigin::Parser, message)
}

/// Tokenize `src` into a token stream terminated by `Token::Eof`.
pub fn tokenize(src: &str) -> Result<Vec<Token>, DbError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'>') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != '\'' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(lex_err("unterminated string literal"));
                }
                tokens.push(Token::StrLit(chars[start..j].iter().collect()));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i;
                let mut is_float = false;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                if chars.get(j) == Some(&'.') && chars.get(j + 1).is_some_and(char::is_ascii_digit) {
                    is_float = true;
                    j += 1;
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
                let text: String = chars[start..j].iter().collect();
                if is_float {
                    let value: f32 = text.parse().map_err(|_| lex_err(format!("invalid float literal {text}")))?;
                    tokens.push(Token::FloatLit(value));
                } else {
                    let value: i32 = text.parse().map_err(|_| lex_err(format!("invalid integer literal {text}")))?;
                    tokens.push(Token::IntLit(value));
                }
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                tokens.push(Token::Ident(chars[start..j].iter().collect()));
                i = j;
            }
            other => return Err(lex_err(format!("unexpected character {other:?}"))),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_select() {
        let tokens = tokenize("SELECT a, b FROM t WHERE a = 1").unwrap();
        assert!(tokens.contains(&Token::Ident("SELECT".to_string())));
        assert!(tokens.contains(&Token::IntLit(1)));
        assert_eq!(*tokens.last().unwrap(), Token::Eof);
    }

    #[test]
    fn recognizes_multichar_comparison_operators() {
        let tokens = tokenize("a <> b AND a <= c AND a >= d").unwrap();
        assert!(tokens.contains(&Token::Ne));
        assert!(tokens.contains(&Token::Le));
        assert!(tokens.contains(&Token::Ge));
    }

    #[test]
    fn string_literal_is_extracted_without_quotes() {
        let tokens = tokenize("'hello world'").unwrap();
        assert_eq!(tokens[0], Token::StrLit("hello world".to_string()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("'oops").is_err());
    }
}
