//! Tokenizer for the query language.
//!
//! Converts a query string into tokens carrying their byte range using nom
//! combinators.

use super::ast::CompareOp;
use super::error::QueryErrorDesc;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, recognize, value},
    sequence::{delimited, pair},
};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Property names, keywords, bare values (`CA`, `C*`, `1:10`, `O5'`).
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    Bang,
    Op(CompareOp),
}

impl TokenKind {
    /// How the token is quoted back in error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Word(w) => format!("'{}'", w),
            TokenKind::Quoted(q) => format!("\"{}\"", q),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Bang => "'!'".to_string(),
            TokenKind::Op(op) => format!("'{}'", op),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

type LexResult<'a, T> = IResult<&'a str, T>;

fn is_word_start(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '*' | '?' | ':' | '-' | '+')
}

fn is_word_char(c: char) -> bool {
    is_word_start(c) || c == '\''
}

fn word(input: &str) -> LexResult<'_, TokenKind> {
    map(
        recognize(pair(take_while1(is_word_start), take_while(is_word_char))),
        |s: &str| TokenKind::Word(s.to_string()),
    )(input)
}

fn quoted(input: &str) -> LexResult<'_, TokenKind> {
    map(
        alt((
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        )),
        |s: &str| TokenKind::Quoted(s.to_string()),
    )(input)
}

fn comparison(input: &str) -> LexResult<'_, TokenKind> {
    map(
        alt((
            value(CompareOp::Ne, tag("!=")),
            value(CompareOp::Le, tag("<=")),
            value(CompareOp::Ge, tag(">=")),
            value(CompareOp::Eq, char('=')),
            value(CompareOp::Lt, char('<')),
            value(CompareOp::Gt, char('>')),
        )),
        TokenKind::Op,
    )(input)
}

fn punctuation(input: &str) -> LexResult<'_, TokenKind> {
    alt((
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::Bang, char('!')),
    ))(input)
}

fn token(input: &str) -> LexResult<'_, TokenKind> {
    alt((comparison, punctuation, quoted, word))(input)
}

/// Splits a query into tokens.
///
/// # Errors
///
/// Returns a description with the byte range of the first character that
/// starts no token, or of an unterminated quoted string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, QueryErrorDesc> {
    let mut tokens = Vec::new();
    let mut remaining = input;
    loop {
        let (rest, _) = multispace0::<&str, nom::error::Error<&str>>(remaining)
            .unwrap_or((remaining, ""));
        remaining = rest;
        if remaining.is_empty() {
            return Ok(tokens);
        }
        let start = input.len() - remaining.len();
        match token(remaining) {
            Ok((rest, kind)) => {
                let end = input.len() - rest.len();
                tokens.push(Token {
                    kind,
                    span: start..end,
                });
                remaining = rest;
            }
            Err(_) => {
                let first = remaining.chars().next().unwrap_or(' ');
                return Err(if first == '"' || first == '\'' {
                    QueryErrorDesc::new("unterminated quoted string", start..input.len())
                } else {
                    QueryErrorDesc::new(
                        format!("unexpected character '{}'", first),
                        start..start + first.len_utf8(),
                    )
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokens_carry_byte_spans() {
        let tokens = tokenize("rname==ALA").unwrap();
        let spans: Vec<_> = tokens.iter().map(|t| t.span.clone()).collect();
        assert_eq!(spans, vec![0..5, 5..6, 6..7, 7..10]);
        assert_eq!(tokens[2].kind, TokenKind::Op(CompareOp::Eq));
    }

    #[test]
    fn words_keep_wildcards_ranges_and_primes() {
        assert_eq!(
            kinds("aname=C*,O5' and rnum=1:10"),
            vec![
                TokenKind::Word("aname".into()),
                TokenKind::Op(CompareOp::Eq),
                TokenKind::Word("C*".into()),
                TokenKind::Comma,
                TokenKind::Word("O5'".into()),
                TokenKind::Word("and".into()),
                TokenKind::Word("rnum".into()),
                TokenKind::Op(CompareOp::Eq),
                TokenKind::Word("1:10".into()),
            ]
        );
    }

    #[test]
    fn operators_and_quotes() {
        assert_eq!(
            kinds("!(x>=1.5) gc:tag!='a b'"),
            vec![
                TokenKind::Bang,
                TokenKind::LParen,
                TokenKind::Word("x".into()),
                TokenKind::Op(CompareOp::Ge),
                TokenKind::Word("1.5".into()),
                TokenKind::RParen,
                TokenKind::Word("gc:tag".into()),
                TokenKind::Op(CompareOp::Ne),
                TokenKind::Quoted("a b".into()),
            ]
        );
    }

    #[test]
    fn lexical_errors_point_at_the_offending_text() {
        let err = tokenize("aname=CA & x<1").unwrap_err();
        assert_eq!(err.range, 9..10);
        let err = tokenize("rname=\"AL").unwrap_err();
        assert_eq!(err.range, 6..9);
        assert!(err.msg.contains("unterminated"));
    }

    #[test]
    fn blank_input_has_no_tokens() {
        assert!(tokenize("   ").unwrap().is_empty());
    }
}
