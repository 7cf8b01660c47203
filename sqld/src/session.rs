//! Per-connection state and the two front ends that drive it: an
//! interactive REPL and a non-interactive batch reader, both grounded on
//! the reference CLI's own `server::session::Session`.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kv::mvcc::{MVCCDef, MVCC};
use kv::storage::engine::Engine;
use kv::storage::log_cask::LogCask;
use log::{debug, info, warn};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config as RustylineConfig, Editor};
use sql::executor::{execute as exec_plan, ExecContext, ExecResult};
use sql::{analyzer::Analyzer, optimizer, parser, PlanNode};
use tokio::time::Instant;

use crate::config::ConfigLoad;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::handler::{self, Classified};
use crate::registry::Registry;
use crate::result::ResultSet;
use crate::rusty::CliHelper;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session<E: Engine> {
    conn_id: u64,
    is_repl: bool,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    registry: Arc<Registry>,
    mvcc: Arc<MVCC<E>>,
    coordinator: Coordinator<E>,
    database: Option<String>,
    autocommit: bool,
    session_vars: HashMap<String, String>,
    warnings: Vec<String>,
    query: String,
    settings: ConfigLoad,
}

impl Session<LogCask> {
    pub async fn try_new(settings: ConfigLoad, is_repl: bool, running: Arc<AtomicBool>) -> Result<Self> {
        if is_repl {
            println!("Welcome to {}.", settings.prompt());
            println!();
        }
        let engine = LogCask::new_compact(settings.get_storage_path(), 0.2).map_err(Error::from)?;
        Ok(Self::with_engine(engine, settings, is_repl, running, Arc::new(Registry::new())))
    }
}

impl<E: Engine> Session<E> {
    pub fn with_engine(
        engine: E,
        settings: ConfigLoad,
        is_repl: bool,
        running: Arc<AtomicBool>,
        registry: Arc<Registry>,
    ) -> Self {
        let mvcc = Arc::new(MVCC::new(engine));
        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        registry.register(conn_id, cancel.clone());
        let autocommit = settings.autocommit_default();
        Session {
            conn_id,
            is_repl,
            running,
            cancel,
            registry,
            coordinator: Coordinator::new(mvcc.clone()),
            mvcc,
            database: None,
            autocommit,
            session_vars: HashMap::new(),
            warnings: Vec::new(),
            query: String::new(),
            settings,
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    fn prompt(&self) -> String {
        if !self.query.trim().is_empty() {
            format!("{} > ", self.settings.prompt())
        } else if let Some(db) = &self.database {
            format!("{}/{} > ", self.settings.prompt(), db)
        } else {
            format!("{} > ", self.settings.prompt())
        }
    }

    /// Runs the interactive REPL until `exit`/`quit`, EOF, or the shared
    /// `running` flag is cleared (by Ctrl-C).
    pub async fn handle_repl(&mut self) {
        let config = RustylineConfig::builder().completion_prompt_limit(5).completion_type(CompletionType::Circular).build();
        let mut rl = Editor::<CliHelper, DefaultHistory>::with_config(config).unwrap();
        rl.set_helper(Some(CliHelper::new()));
        rl.load_history(&history_path()).ok();

        'repl: loop {
            if !self.running.load(Ordering::SeqCst) {
                break 'repl;
            }
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    for query in self.append_query(&line) {
                        let _ = rl.add_history_entry(&query);
                        if query.trim().eq_ignore_ascii_case("exit") || query.trim().eq_ignore_ascii_case("quit") {
                            break 'repl;
                        }
                        let start = Instant::now();
                        let result = self.execute(&query);
                        println!("{}", result.render());
                        if self.settings.is_show_stats() {
                            eprintln!("({:.3} sec)\n", start.elapsed().as_secs_f64());
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    self.query.clear();
                }
                Err(ReadlineError::Eof) => break 'repl,
                Err(e) => {
                    eprintln!("readline error: {}", e);
                    break 'repl;
                }
            }
        }

        println!("Bye~");
        let _ = rl.save_history(&history_path());
        self.registry.remove(self.conn_id);
        self.coordinator.close();
    }

    /// Runs every statement read from `r`, printing one rendered result per
    /// statement. Used for `stdin` piping and `--query`.
    pub fn handle_reader<R: BufRead>(&mut self, r: R) -> Result<()> {
        for line in r.lines() {
            let line = line.map_err(Error::from)?;
            for query in self.append_query(&line) {
                let result = self.execute(&query);
                println!("{}", result.render());
            }
        }
        let remaining = self.query.trim().to_owned();
        if !remaining.is_empty() {
            self.query.clear();
            let result = self.execute(&remaining);
            println!("{}", result.render());
        }
        self.registry.remove(self.conn_id);
        self.coordinator.close();
        Ok(())
    }

    /// Accumulates `line` into the in-progress statement buffer and returns
    /// every statement that became complete (terminated by a `;` not inside
    /// a string or comment) as a result. Adapted from the reference
    /// session's own `append_query`: where it tracked comment/newline state
    /// by hand over a tokenizer that exposes them as tokens, this lexer
    /// already strips comments and whitespace before token boundaries are
    /// visible, so completeness only needs the position of the last
    /// semicolon in the accumulated buffer.
    fn append_query(&mut self, line: &str) -> Vec<String> {
        let line = line.trim_end();
        if line.is_empty() && self.query.is_empty() {
            return Vec::new();
        }
        if !self.query.is_empty() {
            self.query.push('\n');
        }
        self.query.push_str(line);

        let tokens = match sql::lexer::tokenize(&self.query) {
            Ok(tokens) => tokens,
            Err(_) => return Vec::new(),
        };
        let last_semicolon_end = tokens.iter().rev().find(|t| t.kind == sql::lexer::TokenKind::Semicolon).map(|t| t.span.end);

        match last_semicolon_end {
            Some(end) => {
                let finished = self.query[..end].to_string();
                self.query = self.query[end..].trim_start().to_string();
                parser::split_statements(&finished).unwrap_or_default()
            }
            None => Vec::new(),
        }
    }

    /// Classifies and runs one complete statement, returning a rendered
    /// result regardless of outcome — errors are encoded in the result set
    /// rather than propagated, so a REPL or batch loop never has to special
    /// case them.
    pub fn execute(&mut self, sql: &str) -> ResultSet {
        self.warnings.clear();
        match handler::classify(sql) {
            Classified::Kill { connection_id, .. } => {
                if self.registry.kill(connection_id) {
                    ResultSet::ok(0, None, format!("connection {} signaled", connection_id))
                } else {
                    ResultSet::err(&Error::Sql(sql::error::Error::Internal(format!(
                        "no such connection {}",
                        connection_id
                    ))))
                }
            }
            Classified::SetSessionVar { name, value } => {
                self.set_session_var(&name, &value);
                ResultSet::ok(0, None, "")
            }
            Classified::Pipeline(sql) => {
                debug!("executing: {}", sql);
                match self.run_pipeline(sql) {
                    Ok(result) => result,
                    Err(e) => {
                        if matches!(e, Error::Sql(sql::error::Error::TransactionConflict) | Error::Sql(sql::error::Error::Internal(_))) {
                            warn!(target: "server_warnings", "{}", e);
                        }
                        ResultSet::err(&e)
                    }
                }
            }
        }
    }

    fn set_session_var(&mut self, name: &str, value: &str) {
        match name {
            "autocommit" => {
                self.autocommit = !matches!(value, "0" | "off" | "OFF" | "false" | "FALSE");
            }
            "transaction_isolation" => {
                self.coordinator.isolation = match value.to_ascii_uppercase().as_str() {
                    "READ COMMITTED" => crate::coordinator::IsolationLevel::ReadCommitted,
                    _ => crate::coordinator::IsolationLevel::RepeatableRead,
                };
            }
            _ => {}
        }
        self.session_vars.insert(name.to_string(), value.to_string());
    }

    fn run_pipeline(&mut self, sql: &str) -> Result<ResultSet> {
        // A prior KILL QUERY leaves this set; each new statement starts
        // uncanceled, so KILL QUERY doesn't also kill the connection.
        self.cancel.store(false, Ordering::SeqCst);
        let node = parser::parse(sql)?;
        match &node {
            PlanNode::BeginTxn => {
                self.coordinator.begin()?;
                return Ok(ResultSet::ok(0, None, ""));
            }
            PlanNode::Commit => {
                self.coordinator.commit()?;
                return Ok(ResultSet::ok(0, None, ""));
            }
            PlanNode::Rollback => {
                self.coordinator.rollback()?;
                return Ok(ResultSet::ok(0, None, ""));
            }
            _ => {}
        }

        let read_only = handler::is_read_only(&node);
        let database = self.database.clone();
        let cancel = self.cancel.clone();
        let use_db_name = if let PlanNode::Use { name } = &node { Some(name.clone()) } else { None };

        let result = self.coordinator.run_statement(read_only, |txn| {
            let resolved = Analyzer::new(txn, database.as_deref()).analyze(node.clone())?;
            let optimized = optimizer::optimize(resolved, txn)?;
            let ctx = ExecContext { txn, database: database.as_deref(), cancel: &cancel };
            exec_plan(&optimized, &ctx)
        })?;

        if let Some(name) = use_db_name {
            self.database = Some(name);
        }
        Ok(to_result_set(result))
    }
}

fn to_result_set(result: ExecResult) -> ResultSet {
    match result {
        ExecResult::Rows { schema, rows } => {
            let columns = schema.into_iter().map(|c| c.name).collect();
            ResultSet::Rows { columns, rows }
        }
        ExecResult::RowsAffected(n) => ResultSet::ok(n, None, ""),
        ExecResult::Ack => ResultSet::ok(0, None, ""),
    }
}

fn history_path() -> String {
    format!("{}/.sqld_history", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::storage::memory::Memory;

    fn session() -> Session<Memory> {
        let running = Arc::new(AtomicBool::new(true));
        Session::with_engine(Memory::new(), ConfigLoad::default(), false, running, Arc::new(Registry::new()))
    }

    #[test]
    fn runs_the_create_and_select_scenario() {
        let mut s = session();
        assert!(!s.execute("CREATE DATABASE d").is_err());
        assert!(!s.execute("USE d").is_err());
        assert!(!s.execute("CREATE TABLE t (id INT PRIMARY KEY, name TEXT)").is_err());
        assert_eq!(s.execute("INSERT INTO t VALUES (1,'alice'),(2,'bob')").render(), "Query OK, 2 row(s) affected");
        let rows = s.execute("SELECT name FROM t WHERE id = 1");
        assert!(rows.render().contains("alice"));
        let count = s.execute("SELECT COUNT(*) FROM t");
        assert!(count.render().contains("2"));
    }

    #[test]
    fn begin_commit_rollback_round_trip() {
        let mut s = session();
        s.execute("CREATE DATABASE d");
        s.execute("USE d");
        s.execute("CREATE TABLE t (id INT PRIMARY KEY)");
        assert_eq!(s.execute("BEGIN").render(), "Query OK, 0 row(s) affected");
        assert_eq!(s.execute("BEGIN").render(), "ERROR 1105 (HY000): already in a transaction");
        s.execute("INSERT INTO t VALUES (1)");
        assert_eq!(s.execute("ROLLBACK").render(), "Query OK, 0 row(s) affected");
        let count = s.execute("SELECT COUNT(*) FROM t");
        assert!(count.render().contains("0"));
    }

    #[test]
    fn use_on_missing_database_reports_1049() {
        let mut s = session();
        let rs = s.execute("USE nonexistent");
        assert_eq!(rs.render(), "ERROR 1049 (42000): unknown database 'nonexistent'");
    }

    #[test]
    fn multi_line_statement_is_accumulated_until_semicolon() {
        let mut s = session();
        assert_eq!(s.append_query("CREATE DATABASE"), Vec::<String>::new());
        assert_eq!(s.append_query("d;"), vec!["CREATE DATABASE\nd".to_string()]);
    }

    #[test]
    fn kill_of_unknown_connection_is_reported_as_an_error() {
        let mut s = session();
        assert!(s.execute("KILL QUERY 999").is_err());
    }

    #[test]
    fn kill_query_cancels_only_the_in_flight_statement() {
        let mut s = session();
        s.execute("CREATE DATABASE d");
        s.execute("USE d");
        s.execute("CREATE TABLE t (id INT PRIMARY KEY)");
        s.cancel.store(true, Ordering::SeqCst);
        assert!(s.execute("SELECT COUNT(*) FROM t").render().contains("canceled"));
        let rs = s.execute("SELECT COUNT(*) FROM t");
        assert!(!rs.render().contains("canceled"), "cancellation must not outlive the statement it killed");
        assert!(rs.render().contains("0"));
    }
}
