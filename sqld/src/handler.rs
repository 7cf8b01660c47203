//! Classifies an incoming statement before it reaches the query pipeline,
//! and tells the session how to run what's left.
//!
//! `BEGIN`/`COMMIT`/`ROLLBACK`/`USE` are ordinary grammar the parser already
//! turns into dedicated [`sql::PlanNode`] variants, so they need no special
//! casing here — the session matches on the parsed node instead. `KILL` and
//! session-variable `SET` are not part of this crate's SQL grammar, so they
//! are recognized here, ahead of the pipeline, the way the reference
//! session recognizes its own non-SQL `.cmd value` control commands before
//! tokenizing.

use sql::PlanNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillTarget {
    Query,
    Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classified<'a> {
    Kill { target: KillTarget, connection_id: u64 },
    SetSessionVar { name: String, value: String },
    Pipeline(&'a str),
}

const SESSION_VARS: &[&str] = &["autocommit", "transaction_isolation", "character_set_results", "sql_mode"];

pub fn classify(sql: &str) -> Classified<'_> {
    let trimmed = sql.trim().trim_end_matches(';').trim();

    if let Some(rest) = strip_ci_word(trimmed, "kill") {
        let mut words = rest.trim().split_whitespace();
        let first = words.next();
        let (target, id_word) = match first {
            Some(w) if w.eq_ignore_ascii_case("query") => (KillTarget::Query, words.next()),
            Some(w) if w.eq_ignore_ascii_case("connection") => (KillTarget::Connection, words.next()),
            other => (KillTarget::Connection, other),
        };
        if let Some(id) = id_word.and_then(|w| w.parse::<u64>().ok()) {
            return Classified::Kill { target, connection_id: id };
        }
    }

    if let Some(rest) = strip_ci_word(trimmed, "set") {
        let mut rest = rest.trim_start();
        for scope in ["session", "global"] {
            if let Some(stripped) = strip_ci_word(rest, scope) {
                rest = stripped.trim_start();
            }
        }
        if let Some((name, value)) = rest.split_once('=') {
            let name = name.trim().trim_start_matches('@').to_ascii_lowercase();
            if SESSION_VARS.contains(&name.as_str()) {
                let value = value.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
                return Classified::SetSessionVar { name, value };
            }
        }
    }

    Classified::Pipeline(sql)
}

fn strip_ci_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    if s.len() < word.len() || !s[..word.len()].eq_ignore_ascii_case(word) {
        return None;
    }
    match s[word.len()..].chars().next() {
        None => Some(""),
        Some(c) if c.is_whitespace() => Some(&s[word.len()..]),
        _ => None,
    }
}

/// Whether a resolved statement only reads, so the coordinator can open an
/// implicit transaction with `begin_read_only` instead of a read-write one.
pub fn is_read_only(node: &PlanNode) -> bool {
    !matches!(
        node,
        PlanNode::UnresolvedInsert { .. }
            | PlanNode::UnresolvedUpdate { .. }
            | PlanNode::UnresolvedDelete { .. }
            | PlanNode::CreateDatabase { .. }
            | PlanNode::DropDatabase { .. }
            | PlanNode::CreateTable { .. }
            | PlanNode::DropTable { .. }
            | PlanNode::CreateIndex { .. }
            | PlanNode::DropIndex { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_kill_query() {
        assert_eq!(classify("KILL QUERY 7"), Classified::Kill { target: KillTarget::Query, connection_id: 7 });
    }

    #[test]
    fn recognizes_kill_connection_shorthand() {
        assert_eq!(classify("kill 3"), Classified::Kill { target: KillTarget::Connection, connection_id: 3 });
    }

    #[test]
    fn recognizes_set_autocommit() {
        assert_eq!(
            classify("SET autocommit = 0"),
            Classified::SetSessionVar { name: "autocommit".into(), value: "0".into() }
        );
    }

    #[test]
    fn set_on_a_table_column_is_not_a_session_variable() {
        assert!(matches!(classify("UPDATE t SET name = 'a'"), Classified::Pipeline(_)));
    }

    #[test]
    fn other_statements_pass_through_to_the_pipeline() {
        assert_eq!(classify("SELECT 1"), Classified::Pipeline("SELECT 1"));
    }
}
