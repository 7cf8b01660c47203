//! Tokenizing SQL text. Built the same way the teacher project's own
//! command tokenizer is: a `logos`-derived `TokenKind` enum carrying both
//! punctuation/literal rules and case-insensitive keyword tokens, wrapped
//! in a small iterator that turns `logos`'s raw token stream into
//! `Token{kind, text, span}` values the parser consumes by lookahead.

use logos::{Lexer, Logos};
use strum_macros::EnumIter;

use crate::error::{Error, Result};

#[allow(non_camel_case_types)]
#[derive(Logos, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Error,
    EOI,

    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    Whitespace,
    #[regex(r"--[^\n]*", logos::skip)]
    LineComment,
    #[regex(r"/\*([^*]|\*[^/])*\*/", logos::skip)]
    BlockComment,

    #[regex(r"[_a-zA-Z][_a-zA-Z0-9]*")]
    Ident,
    #[regex(r#"`[^`]*`"#)]
    QuotedIdent,
    #[regex(r#""([^"\\]|\\.)*""#)]
    #[regex(r#"'([^'\\]|\\.|'')*'"#)]
    QuotedString,
    #[regex(r"[0-9]+")]
    Integer,
    #[regex(r"([0-9]+\.[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    Float,
    #[token("?")]
    Placeholder,

    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Lte,
    #[token(">=")]
    Gte,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Period,
    #[token(";")]
    Semicolon,

    #[token("SELECT", ignore(ascii_case))]
    SELECT,
    #[token("FROM", ignore(ascii_case))]
    FROM,
    #[token("WHERE", ignore(ascii_case))]
    WHERE,
    #[token("GROUP", ignore(ascii_case))]
    GROUP,
    #[token("HAVING", ignore(ascii_case))]
    HAVING,
    #[token("ORDER", ignore(ascii_case))]
    ORDER,
    #[token("BY", ignore(ascii_case))]
    BY,
    #[token("LIMIT", ignore(ascii_case))]
    LIMIT,
    #[token("OFFSET", ignore(ascii_case))]
    OFFSET,
    #[token("AS", ignore(ascii_case))]
    AS,
    #[token("AND", ignore(ascii_case))]
    AND,
    #[token("OR", ignore(ascii_case))]
    OR,
    #[token("NOT", ignore(ascii_case))]
    NOT,
    #[token("NULL", ignore(ascii_case))]
    NULL,
    #[token("IS", ignore(ascii_case))]
    IS,
    #[token("IN", ignore(ascii_case))]
    IN,
    #[token("LIKE", ignore(ascii_case))]
    LIKE,
    #[token("BETWEEN", ignore(ascii_case))]
    BETWEEN,
    #[token("JOIN", ignore(ascii_case))]
    JOIN,
    #[token("INNER", ignore(ascii_case))]
    INNER,
    #[token("LEFT", ignore(ascii_case))]
    LEFT,
    #[token("RIGHT", ignore(ascii_case))]
    RIGHT,
    #[token("FULL", ignore(ascii_case))]
    FULL,
    #[token("OUTER", ignore(ascii_case))]
    OUTER,
    #[token("ON", ignore(ascii_case))]
    ON,
    #[token("INSERT", ignore(ascii_case))]
    INSERT,
    #[token("INTO", ignore(ascii_case))]
    INTO,
    #[token("VALUES", ignore(ascii_case))]
    VALUES,
    #[token("UPDATE", ignore(ascii_case))]
    UPDATE,
    #[token("SET", ignore(ascii_case))]
    SET,
    #[token("DELETE", ignore(ascii_case))]
    DELETE,
    #[token("CREATE", ignore(ascii_case))]
    CREATE,
    #[token("DROP", ignore(ascii_case))]
    DROP,
    #[token("DATABASE", ignore(ascii_case))]
    DATABASE,
    #[token("CASCADE", ignore(ascii_case))]
    CASCADE,
    #[token("TABLE", ignore(ascii_case))]
    TABLE,
    #[token("INDEX", ignore(ascii_case))]
    INDEX,
    #[token("PRIMARY", ignore(ascii_case))]
    PRIMARY,
    #[token("KEY", ignore(ascii_case))]
    KEY,
    #[token("UNIQUE", ignore(ascii_case))]
    UNIQUE,
    #[token("DEFAULT", ignore(ascii_case))]
    DEFAULT,
    #[token("BEGIN", ignore(ascii_case))]
    BEGIN,
    #[token("START", ignore(ascii_case))]
    START,
    #[token("TRANSACTION", ignore(ascii_case))]
    TRANSACTION,
    #[token("COMMIT", ignore(ascii_case))]
    COMMIT,
    #[token("ROLLBACK", ignore(ascii_case))]
    ROLLBACK,
    #[token("USE", ignore(ascii_case))]
    USE,
    #[token("SHOW", ignore(ascii_case))]
    SHOW,
    #[token("DATABASES", ignore(ascii_case))]
    DATABASES,
    #[token("TABLES", ignore(ascii_case))]
    TABLES,
    #[token("UNION", ignore(ascii_case))]
    UNION,
    #[token("INTERSECT", ignore(ascii_case))]
    INTERSECT,
    #[token("EXCEPT", ignore(ascii_case))]
    EXCEPT,
    #[token("ALL", ignore(ascii_case))]
    ALL,
    #[token("DISTINCT", ignore(ascii_case))]
    DISTINCT,
    #[token("ASC", ignore(ascii_case))]
    ASC,
    #[token("DESC", ignore(ascii_case))]
    DESC,
    #[token("TRUE", ignore(ascii_case))]
    TRUE,
    #[token("FALSE", ignore(ascii_case))]
    FALSE,

    // Type keywords
    #[token("INT", ignore(ascii_case))]
    #[token("INTEGER", ignore(ascii_case))]
    INT,
    #[token("BIGINT", ignore(ascii_case))]
    BIGINT,
    #[token("SMALLINT", ignore(ascii_case))]
    SMALLINT,
    #[token("TINYINT", ignore(ascii_case))]
    TINYINT,
    #[token("FLOAT", ignore(ascii_case))]
    FLOAT,
    #[token("DOUBLE", ignore(ascii_case))]
    DOUBLE,
    #[token("DECIMAL", ignore(ascii_case))]
    DECIMAL,
    #[token("TEXT", ignore(ascii_case))]
    TEXT,
    #[token("VARCHAR", ignore(ascii_case))]
    VARCHAR,
    #[token("CHAR", ignore(ascii_case))]
    CHAR,
    #[token("BLOB", ignore(ascii_case))]
    BLOB,
    #[token("BOOLEAN", ignore(ascii_case))]
    #[token("BOOL", ignore(ascii_case))]
    BOOLEAN,
    #[token("DATE", ignore(ascii_case))]
    DATE,
    #[token("TIME", ignore(ascii_case))]
    TIME,
    #[token("DATETIME", ignore(ascii_case))]
    DATETIME,
    #[token("TIMESTAMP", ignore(ascii_case))]
    TIMESTAMP,

    // Aggregate function names
    #[token("COUNT", ignore(ascii_case))]
    COUNT,
    #[token("SUM", ignore(ascii_case))]
    SUM,
    #[token("MIN", ignore(ascii_case))]
    MIN,
    #[token("MAX", ignore(ascii_case))]
    MAX,
    #[token("AVG", ignore(ascii_case))]
    AVG,
}

impl TokenKind {
    pub fn is_literal(self) -> bool {
        matches!(self, TokenKind::Integer | TokenKind::Float | TokenKind::QuotedString | TokenKind::TRUE | TokenKind::FALSE | TokenKind::NULL)
    }
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: std::ops::Range<usize>,
}

pub struct Tokenizer<'a> {
    lexer: Lexer<'a, TokenKind>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Tokenizer { lexer: TokenKind::lexer(source) }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        let kind = self.lexer.next()?;
        let span = self.lexer.span();
        let text = self.lexer.slice().to_string();
        match kind {
            Ok(kind) => Some(Ok(Token { kind, text, span })),
            Err(()) => Some(Err(Error::Syntax(format!("unexpected input {:?} at {:?}", text, span)))),
        }
    }
}

/// Tokenizes the full input eagerly, appending a trailing `EOI` sentinel so
/// the parser's lookahead never needs to special-case running off the end.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens: Vec<Token> = Tokenizer::new(source).collect::<Result<_>>()?;
    tokens.push(Token { kind: TokenKind::EOI, text: String::new(), span: source.len()..source.len() });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_select() {
        let tokens = tokenize("SELECT a, b FROM t WHERE a = 1;").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::SELECT,
                TokenKind::Ident,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::FROM,
                TokenKind::Ident,
                TokenKind::WHERE,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::Integer,
                TokenKind::Semicolon,
                TokenKind::EOI,
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = tokenize("select 1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::SELECT);
    }
}
