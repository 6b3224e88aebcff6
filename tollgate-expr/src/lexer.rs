//! Tokenizer for rule source.
//!
//! Tokens are recognized by a `logos` lexer and then given line and column
//! positions for error reporting.

use std::fmt;

use logos::Logos;

use crate::error::{ParseError, ParseResult};

/// Source position. Lines count from 1, columns from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Has,
    Matches,
    True,
    False,
    None,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Not => "Not",
            Keyword::And => "And",
            Keyword::Or => "Or",
            Keyword::Eq => "Eq",
            Keyword::Ne => "Ne",
            Keyword::Lt => "Lt",
            Keyword::Le => "Le",
            Keyword::Gt => "Gt",
            Keyword::Ge => "Ge",
            Keyword::In => "In",
            Keyword::Has => "Has",
            Keyword::Matches => "Matches",
            Keyword::True => "True",
            Keyword::False => "False",
            Keyword::None => "None",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Keyword::And | Keyword::Or)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Keyword::Eq
                | Keyword::Ne
                | Keyword::Lt
                | Keyword::Le
                | Keyword::Gt
                | Keyword::Ge
                | Keyword::In
                | Keyword::Has
                | Keyword::Matches
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Dollar,
    Keyword(Keyword),
    Name(String),
    /// String literal with escapes already decoded.
    Str(String),
    Int(String),
    Float(String),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::LBracket => f.write_str("'['"),
            TokenKind::RBracket => f.write_str("']'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Dot => f.write_str("'.'"),
            TokenKind::Dollar => f.write_str("'$'"),
            TokenKind::Keyword(k) => write!(f, "'{}'", k.as_str()),
            TokenKind::Name(name) => write!(f, "'{name}'"),
            TokenKind::Str(s) => write!(f, "string {s:?}"),
            TokenKind::Int(text) | TokenKind::Float(text) => write!(f, "'{text}'"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Decode the character following a backslash. Unlisted characters stand
/// for themselves.
fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'b' => '\u{8}',
        'f' => '\u{c}',
        other => other,
    }
}

/// Strip the quotes from a string literal and decode its escapes.
fn unquote<'src>(lex: &mut logos::Lexer<'src, RawToken<'src>>) -> String {
    let slice = lex.slice();
    let mut value = String::with_capacity(slice.len());
    let mut chars = slice[1..slice.len() - 1].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.extend(chars.next().map(unescape)),
            c => value.push(c),
        }
    }
    value
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"\s+")]
enum RawToken<'src> {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("$")]
    Dollar,
    /// A sign with no digits after it
    #[token("-")]
    Minus,

    #[token("Not", |_| Keyword::Not)]
    #[token("And", |_| Keyword::And)]
    #[token("Or", |_| Keyword::Or)]
    #[token("Eq", |_| Keyword::Eq)]
    #[token("Ne", |_| Keyword::Ne)]
    #[token("Lt", |_| Keyword::Lt)]
    #[token("Le", |_| Keyword::Le)]
    #[token("Gt", |_| Keyword::Gt)]
    #[token("Ge", |_| Keyword::Ge)]
    #[token("In", |_| Keyword::In)]
    #[token("Has", |_| Keyword::Has)]
    #[token("Matches", |_| Keyword::Matches)]
    #[token("True", |_| Keyword::True)]
    #[token("False", |_| Keyword::False)]
    #[token("None", |_| Keyword::None)]
    Keyword(Keyword),

    #[regex(r"[\p{L}_][\p{L}\p{N}_]*", |lex| lex.slice())]
    Name(&'src str),

    #[regex(r"'([^'\\]|\\.)*'", unquote)]
    #[regex(r#""([^"\\]|\\.)*""#, unquote)]
    Str(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice())]
    Int(&'src str),

    #[regex(r"-?[0-9]*\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice())]
    #[regex(r"-?[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice())]
    Float(&'src str),
}

/// Byte offsets where each line starts, for turning offsets into [`Span`]s.
struct LineIndex<'a> {
    src: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(src: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { src, starts }
    }

    fn span(&self, offset: usize) -> Span {
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line - 1];
        Span {
            line,
            column: self.src[start..offset].chars().count(),
        }
    }
}

/// Split rule source into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(src: &str) -> ParseResult<Vec<Token>> {
    let lines = LineIndex::new(src);
    let mut lexer = RawToken::lexer(src);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let offset = lexer.span().start;
        let span = lines.span(offset);
        let kind = match result {
            Ok(RawToken::LParen) => TokenKind::LParen,
            Ok(RawToken::RParen) => TokenKind::RParen,
            Ok(RawToken::LBracket) => TokenKind::LBracket,
            Ok(RawToken::RBracket) => TokenKind::RBracket,
            Ok(RawToken::Comma) => TokenKind::Comma,
            Ok(RawToken::Dot) => TokenKind::Dot,
            Ok(RawToken::Dollar) => TokenKind::Dollar,
            Ok(RawToken::Keyword(keyword)) => TokenKind::Keyword(keyword),
            Ok(RawToken::Name(name)) => TokenKind::Name(name.to_string()),
            Ok(RawToken::Str(value)) => TokenKind::Str(value),
            Ok(RawToken::Int(text)) => TokenKind::Int(text.to_string()),
            Ok(RawToken::Float(text)) => TokenKind::Float(text.to_string()),
            Ok(RawToken::Minus) => {
                return Err(ParseError::MalformedLiteral {
                    line: span.line,
                    column: span.column,
                    text: lexer.slice().to_string(),
                });
            }
            Err(()) => {
                let found = src[offset..].chars().next().unwrap_or_default();
                return Err(if found == '\'' || found == '"' {
                    ParseError::UnterminatedString {
                        line: span.line,
                        column: span.column,
                    }
                } else {
                    ParseError::UnexpectedChar {
                        line: span.line,
                        column: span.column,
                        found,
                    }
                });
            }
        };
        tokens.push(Token { kind, span });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: lines.span(src.len()),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            kinds("$id Eq 'x'"),
            vec![
                TokenKind::Dollar,
                TokenKind::Name("id".to_string()),
                TokenKind::Keyword(Keyword::Eq),
                TokenKind::Str("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 -100 0.123 -100.001 .5 1e3 2.5E-2"),
            vec![
                TokenKind::Int("1".to_string()),
                TokenKind::Int("-100".to_string()),
                TokenKind::Float("0.123".to_string()),
                TokenKind::Float("-100.001".to_string()),
                TokenKind::Float(".5".to_string()),
                TokenKind::Float("1e3".to_string()),
                TokenKind::Float("2.5E-2".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'say \'hi\'' "tab\there" 'back\\slash' '\q'"#),
            vec![
                TokenKind::Str("say 'hi'".to_string()),
                TokenKind::Str("tab\there".to_string()),
                TokenKind::Str("back\\slash".to_string()),
                TokenKind::Str("q".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_need_whole_words() {
        assert_eq!(
            kinds("Order Or Notable Not größe"),
            vec![
                TokenKind::Name("Order".to_string()),
                TokenKind::Keyword(Keyword::Or),
                TokenKind::Name("Notable".to_string()),
                TokenKind::Keyword(Keyword::Not),
                TokenKind::Name("größe".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans() {
        let tokens = tokenize("1 Eq\n  $x").unwrap();
        assert_eq!(tokens[1].span, Span { line: 1, column: 2 });
        assert_eq!(tokens[2].span, Span { line: 2, column: 2 });
        assert_eq!(tokens[4].span, Span { line: 2, column: 4 });
        assert_eq!(tokens[4].kind, TokenKind::Eof);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            tokenize("1 # 2"),
            Err(ParseError::UnexpectedChar { found: '#', column: 2, .. })
        ));
        assert!(matches!(
            tokenize("'open"),
            Err(ParseError::UnterminatedString { .. })
        ));
        assert!(matches!(
            tokenize("- 1"),
            Err(ParseError::MalformedLiteral { .. })
        ));
    }
}
