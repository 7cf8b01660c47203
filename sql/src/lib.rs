//! `sql` turns SQL text into rows read from and written to a [`kv`]
//! transaction: lexer and parser build an unresolved plan tree, the
//! analyzer resolves it against the [`catalog`], the optimizer rewrites it,
//! and the executor pulls rows out of it one at a time.

pub mod analyzer;
pub mod ast;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod key;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod plan;
pub mod row;
pub mod types;

pub use ast::PlanNode;
pub use error::{Error, Result};
pub use types::Value;

/// Runs the full pipeline — parse, analyze, optimize — for a single
/// statement, leaving execution to the caller (which owns the transaction
/// and session context the executor needs).
pub fn plan<E: kv::storage::engine::Engine>(
    sql: &str,
    txn: &kv::mvcc::Transaction<E>,
    database: Option<&str>,
) -> Result<ast::PlanNode> {
    let parsed = parser::parse(sql)?;
    let resolved = analyzer::Analyzer::new(txn, database).analyze(parsed)?;
    Ok(optimizer::optimize(resolved, txn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::mvcc::{MVCCDef, MVCC};
    use kv::storage::memory::Memory;

    #[test]
    fn plans_a_simple_select_after_create() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        catalog::Catalog::new(&txn).create_database("d").unwrap();
        let schema = catalog::Schema {
            columns: vec![catalog::Column {
                name: "id".into(),
                datatype: types::DataType::Int,
                nullable: false,
                primary_key: true,
                default: None,
            }],
        };
        catalog::Catalog::new(&txn).create_table("d", "t", schema).unwrap();
        let node = plan("SELECT id FROM t", &txn, Some("d")).unwrap();
        assert!(!node.contains_unresolved());
    }
}
