//! `rustyline` helper: keyword completion and hinting for the REPL, grounded
//! on the reference CLI's own `CliHelper` but fed this crate's SQL keyword
//! list instead of the KV command set.

use std::borrow::Cow;
use std::sync::Arc;

use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Helper, Result};

/// The keyword set offered for completion: the reserved words the lexer
/// recognizes as dedicated tokens (see `sql::lexer::TokenKind`), lowercase
/// lookups against whatever the user has typed so far.
pub const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "HAVING", "ORDER", "LIMIT", "OFFSET", "AS", "AND",
    "OR", "NOT", "NULL", "IS", "IN", "LIKE", "BETWEEN", "JOIN", "INNER", "LEFT", "RIGHT", "FULL",
    "OUTER", "ON", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "CREATE", "DROP",
    "DATABASE", "CASCADE", "TABLE", "INDEX", "PRIMARY", "KEY", "UNIQUE", "DEFAULT", "BEGIN", "START",
    "TRANSACTION", "COMMIT", "ROLLBACK", "USE", "SHOW", "DATABASES", "TABLES", "UNION",
    "INTERSECT", "EXCEPT", "ALL", "DISTINCT", "ASC", "DESC", "TRUE", "FALSE", "INT", "INTEGER",
    "BIGINT", "SMALLINT", "TINYINT", "FLOAT", "DOUBLE", "DECIMAL", "TEXT", "VARCHAR", "CHAR",
    "BLOB", "BOOLEAN", "BOOL", "DATE", "TIME", "DATETIME", "TIMESTAMP", "COUNT", "SUM", "MIN",
    "MAX", "AVG",
];

pub struct CliHelper {
    completer: FilenameCompleter,
    keywords: Arc<Vec<String>>,
}

impl CliHelper {
    pub fn new() -> Self {
        Self::with_keywords(Arc::new(SQL_KEYWORDS.iter().map(|s| s.to_string()).collect()))
    }

    pub fn with_keywords(keywords: Arc<Vec<String>>) -> Self {
        Self { completer: FilenameCompleter::new(), keywords }
    }
}

impl Default for CliHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Borrowed(line)
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(&'s self, prompt: &'p str, _default: bool) -> Cow<'b, str> {
        Cow::Borrowed(prompt)
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[1m{}\x1b[m", hint))
    }

    fn highlight_char(&self, line: &str, _pos: usize) -> bool {
        !line.is_empty()
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<Self::Hint> {
        let last_word = line.split(|c: char| c.is_whitespace() || c == '.').last().unwrap_or(line);
        if last_word.is_empty() {
            return None;
        }
        let (_, candidates) = complete_keywords(line, pos, &self.keywords);
        candidates.first().map(|pair| pair.replacement[last_word.len()..].to_owned())
    }
}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, ctx: &Context<'_>) -> std::result::Result<(usize, Vec<Pair>), ReadlineError> {
        let (start, candidates) = complete_keywords(line, pos, &self.keywords);
        if !candidates.is_empty() {
            return Ok((start, candidates));
        }
        self.completer.complete(line, pos, ctx)
    }
}

impl Validator for CliHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> Result<ValidationResult> {
        if ctx.input().trim_end().ends_with('\\') {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

impl Helper for CliHelper {}

fn complete_keywords(line: &str, pos: usize, keywords: &[String]) -> (usize, Vec<Pair>) {
    let hint = line[..pos].split(|c: char| c.is_whitespace() || c == '.').last().unwrap_or("");
    let results: Vec<Pair> = keywords
        .iter()
        .filter(|kw| kw.to_lowercase().starts_with(&hint.to_lowercase()))
        .map(|kw| Pair { display: kw.clone(), replacement: kw.clone() })
        .collect();
    let start = if pos >= hint.len() { pos - hint.len() } else { 0 };
    (start, results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_a_partial_keyword() {
        let keywords: Vec<String> = SQL_KEYWORDS.iter().map(|s| s.to_string()).collect();
        let (_, candidates) = complete_keywords("sel", 3, &keywords);
        assert!(candidates.iter().any(|c| c.replacement == "SELECT"));
    }
}
