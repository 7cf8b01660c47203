//! Resolves a parser-built plan tree against the [`catalog`](crate::catalog):
//! tables and columns go from names to concrete references, `SELECT *` is
//! expanded, aggregate sub-expressions in the select list and `HAVING` are
//! rewritten into references to the `Aggregate` node that computes them, and
//! a permission hook is consulted for every table the statement touches.
//!
//! Runs bottom-up, one [`PlanNode`] at a time: each node's children are
//! resolved first, and the node is rebuilt around the resolved children
//! rather than mutated in place, so a partially-analyzed tree is never
//! observable.

use std::sync::Arc;

use kv::mvcc::Transaction;
use kv::storage::engine::Engine;

use crate::ast::{ColumnRef, Expr, OrderKey, PlanNode, SelectItem};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::plan::Schema;
use crate::types::Value;

/// Session-supplied authorization check, consulted once per table the
/// analyzer resolves. The default allows everything, matching a
/// single-tenant deployment with no access control configured.
pub trait PermissionHook {
    fn allows(&self, user: &str, database: &str, table: &str) -> bool;
}

pub struct AllowAll;

impl PermissionHook for AllowAll {
    fn allows(&self, _user: &str, _database: &str, _table: &str) -> bool {
        true
    }
}

/// Carries the raw (still-unresolved) group keys and aggregate expressions
/// of the `Aggregate` node directly below a `Project`/`HAVING` `Filter`, so
/// that node can recognize the same subexpressions in its own, not-yet
/// touched exprs and rewrite them into column references rather than trying
/// (and failing) to resolve them as plain columns.
struct AggContext {
    raw_group_keys: Vec<Expr>,
    raw_aggs: Vec<Expr>,
}

/// The result of resolving one plan node: the rebuilt node, its output
/// schema (so the parent can resolve its own expressions against it without
/// recomputing), and an aggregate context when the node is (or passes
/// through, via `HAVING`) an `Aggregate`.
struct Resolved {
    node: PlanNode,
    schema: Schema,
    agg_ctx: Option<AggContext>,
}

pub struct Analyzer<'a, E: Engine> {
    txn: &'a Transaction<E>,
    database: Option<String>,
    user: String,
    hook: Box<dyn PermissionHook>,
}

impl<'a, E: Engine> Analyzer<'a, E> {
    pub fn new(txn: &'a Transaction<E>, database: Option<&str>) -> Self {
        Analyzer { txn, database: database.map(str::to_string), user: String::new(), hook: Box::new(AllowAll) }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_permission_hook(mut self, hook: Box<dyn PermissionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn analyze(&self, node: PlanNode) -> Result<PlanNode> {
        Ok(self.analyze_node(node, &[])?.node)
    }

    fn catalog(&self) -> Catalog<'a, E> {
        Catalog::new(self.txn)
    }

    fn resolve_database(&self, given: &Option<String>) -> Result<String> {
        given.clone().or_else(|| self.database.clone()).ok_or(Error::NoDatabaseSelected)
    }

    fn check_permission(&self, database: &str, table: &str) -> Result<()> {
        if self.hook.allows(&self.user, database, table) {
            Ok(())
        } else {
            Err(Error::AccessDenied(format!("{}.{}", database, table)))
        }
    }

    fn resolve_table(&self, database: &Option<String>, name: &str) -> Result<Arc<crate::catalog::Table>> {
        let db = self.resolve_database(database)?;
        self.check_permission(&db, name)?;
        let table = self.catalog().must_get_table(&db, name)?;
        Ok(Arc::new(table))
    }

    /// Resolves `node`, whose expressions may reference `outer` scopes
    /// (`outer[0]` is scope 1, `outer[1]` is scope 2, and so on — scope 0 is
    /// always `node`'s own input, established per-variant below).
    fn analyze_node(&self, node: PlanNode, outer: &[Schema]) -> Result<Resolved> {
        match node {
            PlanNode::UnresolvedTable { database, name, alias } => {
                let table = self.resolve_table(&database, &name)?;
                let node = PlanNode::TableScan { table, alias };
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::TableScan { .. } | PlanNode::IndexScan { .. } => {
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::OneRow => Ok(Resolved { node: PlanNode::OneRow, schema: vec![], agg_ctx: None }),

            PlanNode::Subquery { input, alias } => {
                // A plain derived table is its own query block: it cannot see
                // the columns of whatever it's joined against.
                let inner = self.analyze_node(*input, &[])?;
                let node = PlanNode::Subquery { input: Box::new(inner.node), alias };
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::Values { rows, alias, column_names } => {
                let empty = Schema::new();
                let mut resolved_rows = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut resolved_row = Vec::with_capacity(row.len());
                    for e in row {
                        resolved_row.push(self.resolve_expr(e, &empty, outer)?);
                    }
                    resolved_rows.push(resolved_row);
                }
                let node = PlanNode::Values { rows: resolved_rows, alias, column_names };
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::Filter { predicate, input } => {
                let inner = self.analyze_node(*input, outer)?;
                let predicate = match &inner.agg_ctx {
                    Some(ctx) => rewrite_agg_refs(predicate, ctx, &inner.schema),
                    None => predicate,
                };
                let predicate = self.resolve_expr(predicate, &inner.schema, outer)?;
                let node = PlanNode::Filter { predicate, input: Box::new(inner.node) };
                Ok(Resolved { node, schema: inner.schema, agg_ctx: inner.agg_ctx })
            }

            PlanNode::Project { items, input } => {
                let inner = self.analyze_node(*input, outer)?;
                let mut resolved_items = Vec::with_capacity(items.len());
                for item in items {
                    if let Expr::Wildcard(qualifier) = &item.expr {
                        if inner.agg_ctx.is_some() {
                            return Err(Error::TypeMismatch("SELECT * is not allowed with GROUP BY or an aggregate".into()));
                        }
                        let matches = inner.schema.iter().enumerate().filter(|(_, c)| {
                            qualifier.as_ref().map(|q| c.qualifier.as_deref().map(|cq| cq.eq_ignore_ascii_case(q)).unwrap_or(false)).unwrap_or(true)
                        });
                        let mut any = false;
                        for (i, c) in matches {
                            any = true;
                            resolved_items.push(SelectItem {
                                expr: Expr::Column(ColumnRef::Resolved {
                                    scope: 0,
                                    index: i,
                                    name: c.name.clone(),
                                    qualifier: c.qualifier.clone(),
                                    datatype: c.datatype,
                                    nullable: c.nullable,
                                }),
                                alias: None,
                            });
                        }
                        if !any {
                            return Err(Error::UnknownTable(qualifier.clone().unwrap_or_default()));
                        }
                        continue;
                    }
                    let expr = match &inner.agg_ctx {
                        Some(ctx) => rewrite_agg_refs(item.expr, ctx, &inner.schema),
                        None => item.expr,
                    };
                    let expr = self.resolve_expr(expr, &inner.schema, outer)?;
                    resolved_items.push(SelectItem { expr, alias: item.alias });
                }
                let node = PlanNode::Project { items: resolved_items, input: Box::new(inner.node) };
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::Distinct { input } => {
                let inner = self.analyze_node(*input, outer)?;
                let node = PlanNode::Distinct { input: Box::new(inner.node) };
                Ok(Resolved { node, schema: inner.schema, agg_ctx: None })
            }

            PlanNode::Sort { keys, input } => {
                let inner = self.analyze_node(*input, outer)?;
                let mut resolved_keys = Vec::with_capacity(keys.len());
                for key in keys {
                    let expr = match &key.expr {
                        Expr::Literal(Value::Int(n)) if *n >= 1 && (*n as usize) <= inner.schema.len() => {
                            let c = &inner.schema[(*n - 1) as usize];
                            Expr::Column(ColumnRef::Resolved {
                                scope: 0,
                                index: (*n - 1) as usize,
                                name: c.name.clone(),
                                qualifier: c.qualifier.clone(),
                                datatype: c.datatype,
                                nullable: c.nullable,
                            })
                        }
                        _ => self.resolve_expr(key.expr, &inner.schema, outer)?,
                    };
                    resolved_keys.push(OrderKey { expr, desc: key.desc });
                }
                let node = PlanNode::Sort { keys: resolved_keys, input: Box::new(inner.node) };
                Ok(Resolved { node, schema: inner.schema, agg_ctx: None })
            }

            PlanNode::Limit { n, input } => {
                let inner = self.analyze_node(*input, outer)?;
                let node = PlanNode::Limit { n, input: Box::new(inner.node) };
                Ok(Resolved { node, schema: inner.schema, agg_ctx: None })
            }

            PlanNode::Offset { n, input } => {
                let inner = self.analyze_node(*input, outer)?;
                let node = PlanNode::Offset { n, input: Box::new(inner.node) };
                Ok(Resolved { node, schema: inner.schema, agg_ctx: None })
            }

            PlanNode::Join { left, right, kind, predicate } => {
                let l = self.analyze_node(*left, outer)?;
                let r = self.analyze_node(*right, outer)?;
                let node = PlanNode::Join { left: Box::new(l.node), right: Box::new(r.node), kind, predicate: None };
                let schema = node.schema()?;
                let predicate = predicate.map(|p| self.resolve_expr(p, &schema, outer)).transpose()?;
                let node = match node {
                    PlanNode::Join { left, right, kind, .. } => PlanNode::Join { left, right, kind, predicate },
                    _ => unreachable!(),
                };
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::HashJoin { .. } => {
                // Only produced by the optimizer, from an already-resolved
                // `Join`; re-analyzing a resolved tree is a no-op.
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::Aggregate { group_keys, aggs, input } => {
                let inner = self.analyze_node(*input, outer)?;
                let raw_group_keys = group_keys.clone();
                let raw_aggs: Vec<Expr> =
                    aggs.iter().map(|(kind, arg, distinct, _)| Expr::Aggregate { kind: *kind, arg: arg.clone().map(Box::new), distinct: *distinct }).collect();

                let mut resolved_group_keys = Vec::with_capacity(group_keys.len());
                for k in group_keys {
                    resolved_group_keys.push(self.resolve_expr(k, &inner.schema, outer)?);
                }
                let mut resolved_aggs = Vec::with_capacity(aggs.len());
                for (kind, arg, distinct, alias) in aggs {
                    let arg = arg.map(|a| self.resolve_expr(a, &inner.schema, outer)).transpose()?;
                    resolved_aggs.push((kind, arg, distinct, alias));
                }
                let node = PlanNode::Aggregate { group_keys: resolved_group_keys, aggs: resolved_aggs, input: Box::new(inner.node) };
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: Some(AggContext { raw_group_keys, raw_aggs }) })
            }

            PlanNode::Union { inputs, distinct } => {
                let mut resolved = Vec::with_capacity(inputs.len());
                let mut arity = None;
                for input in inputs {
                    let r = self.analyze_node(input, outer)?;
                    match arity {
                        None => arity = Some(r.schema.len()),
                        Some(n) if n != r.schema.len() => {
                            return Err(Error::TypeMismatch("UNION branches must have the same number of columns".into()));
                        }
                        _ => {}
                    }
                    resolved.push(r.node);
                }
                let node = PlanNode::Union { inputs: resolved, distinct };
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }

            PlanNode::Intersect { left, right, distinct } => {
                let l = self.analyze_node(*left, outer)?;
                let r = self.analyze_node(*right, outer)?;
                if l.schema.len() != r.schema.len() {
                    return Err(Error::TypeMismatch("INTERSECT sides must have the same number of columns".into()));
                }
                let node = PlanNode::Intersect { left: Box::new(l.node), right: Box::new(r.node), distinct };
                Ok(Resolved { node, schema: l.schema, agg_ctx: None })
            }

            PlanNode::Except { left, right, distinct } => {
                let l = self.analyze_node(*left, outer)?;
                let r = self.analyze_node(*right, outer)?;
                if l.schema.len() != r.schema.len() {
                    return Err(Error::TypeMismatch("EXCEPT sides must have the same number of columns".into()));
                }
                let node = PlanNode::Except { left: Box::new(l.node), right: Box::new(r.node), distinct };
                Ok(Resolved { node, schema: l.schema, agg_ctx: None })
            }

            PlanNode::UnresolvedInsert { database, name, columns, source } => {
                let table = self.resolve_table(&database, &name)?;
                let has_rowid = table.schema.columns.first().map(|c| c.name == "_rowid").unwrap_or(false);
                let target: Vec<usize> = if columns.is_empty() {
                    let start = if has_rowid { 1 } else { 0 };
                    (start..table.schema.columns.len()).collect()
                } else {
                    let mut idx = Vec::with_capacity(columns.len());
                    for c in &columns {
                        idx.push(table.schema.column_index(c).ok_or_else(|| Error::UnknownColumn(c.clone()))?);
                    }
                    idx
                };
                let source = self.analyze_node(*source, &[])?;
                if source.schema.len() != target.len() {
                    return Err(Error::ColumnCountMismatch(format!(
                        "{} column(s) given, {} value(s) supplied",
                        target.len(),
                        source.schema.len()
                    )));
                }
                let node = PlanNode::Insert { table, columns: target, source: Box::new(source.node) };
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }

            PlanNode::UnresolvedUpdate { database, name, assignments, filter } => {
                let table = self.resolve_table(&database, &name)?;
                let table_schema = PlanNode::TableScan { table: table.clone(), alias: None }.schema()?;
                let mut resolved_assignments = Vec::with_capacity(assignments.len());
                for (col, expr) in assignments {
                    let idx = table.schema.column_index(&col).ok_or_else(|| Error::UnknownColumn(col.clone()))?;
                    let expr = self.resolve_expr(expr, &table_schema, outer)?;
                    resolved_assignments.push((idx, expr));
                }
                let filter = filter.map(|f| self.resolve_expr(f, &table_schema, outer)).transpose()?;
                let node = PlanNode::Update { table, assignments: resolved_assignments, filter };
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }

            PlanNode::UnresolvedDelete { database, name, filter } => {
                let table = self.resolve_table(&database, &name)?;
                let table_schema = PlanNode::TableScan { table: table.clone(), alias: None }.schema()?;
                let filter = filter.map(|f| self.resolve_expr(f, &table_schema, outer)).transpose()?;
                let node = PlanNode::Delete { table, filter };
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }

            // DDL and session control statements carry no expressions to
            // resolve; their targets are validated against the catalog when
            // executed. Still worth a permission check since they name a
            // table (or database) directly.
            PlanNode::CreateTable { ref database, ref name, .. } => {
                let db = self.resolve_database(database)?;
                self.check_permission(&db, name)?;
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }
            PlanNode::DropTable { ref database, ref name } => {
                let db = self.resolve_database(database)?;
                self.check_permission(&db, name)?;
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }
            PlanNode::CreateIndex { ref database, ref table, .. } => {
                let db = self.resolve_database(database)?;
                self.check_permission(&db, table)?;
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }
            PlanNode::DropIndex { ref database, ref table, .. } => {
                let db = self.resolve_database(database)?;
                self.check_permission(&db, table)?;
                Ok(Resolved { node, schema: vec![], agg_ctx: None })
            }
            PlanNode::CreateDatabase { .. } | PlanNode::DropDatabase { .. } | PlanNode::BeginTxn | PlanNode::Commit | PlanNode::Rollback | PlanNode::Use { .. } | PlanNode::ShowDatabases | PlanNode::ShowTables => {
                let schema = node.schema()?;
                Ok(Resolved { node, schema, agg_ctx: None })
            }
        }
    }

    /// Resolves column references and validates aggregate placement within a
    /// single expression. `local` is this node's own scope (scope 0);
    /// `outer` are the enclosing query blocks, outward.
    fn resolve_expr(&self, expr: Expr, local: &Schema, outer: &[Schema]) -> Result<Expr> {
        match expr {
            Expr::Literal(_) => Ok(expr),
            Expr::Column(ColumnRef::Resolved { .. }) => Ok(expr),
            Expr::Column(ColumnRef::Unresolved { qualifier, name }) => self.resolve_column(qualifier.as_deref(), &name, local, outer),
            Expr::Wildcard(_) => Err(Error::Internal("wildcard outside a select list".into())),
            Expr::Unary(op, e) => Ok(Expr::Unary(op, Box::new(self.resolve_expr(*e, local, outer)?))),
            Expr::Binary(op, l, r) => {
                let l = self.resolve_expr(*l, local, outer)?;
                let r = self.resolve_expr(*r, local, outer)?;
                self.check_binary_types(op, &l, &r, local)?;
                Ok(Expr::Binary(op, Box::new(l), Box::new(r)))
            }
            Expr::IsNull { expr, negated } => Ok(Expr::IsNull { expr: Box::new(self.resolve_expr(*expr, local, outer)?), negated }),
            Expr::Between { expr, low, high, negated } => Ok(Expr::Between {
                expr: Box::new(self.resolve_expr(*expr, local, outer)?),
                low: Box::new(self.resolve_expr(*low, local, outer)?),
                high: Box::new(self.resolve_expr(*high, local, outer)?),
                negated,
            }),
            Expr::InList { expr, list, negated } => {
                let expr = Box::new(self.resolve_expr(*expr, local, outer)?);
                let mut resolved_list = Vec::with_capacity(list.len());
                for e in list {
                    resolved_list.push(self.resolve_expr(e, local, outer)?);
                }
                Ok(Expr::InList { expr, list: resolved_list, negated })
            }
            Expr::InSubquery { expr, subquery, negated } => {
                let expr = Box::new(self.resolve_expr(*expr, local, outer)?);
                let subquery = Box::new(self.analyze_correlated(*subquery, local, outer)?);
                Ok(Expr::InSubquery { expr, subquery, negated })
            }
            Expr::Exists { subquery, negated } => {
                let subquery = Box::new(self.analyze_correlated(*subquery, local, outer)?);
                Ok(Expr::Exists { subquery, negated })
            }
            Expr::ScalarSubquery(sub) => Ok(Expr::ScalarSubquery(Box::new(self.analyze_correlated(*sub, local, outer)?))),
            Expr::Like { expr, pattern, negated } => Ok(Expr::Like {
                expr: Box::new(self.resolve_expr(*expr, local, outer)?),
                pattern: Box::new(self.resolve_expr(*pattern, local, outer)?),
                negated,
            }),
            Expr::Aggregate { .. } => Err(Error::Syntax("aggregate functions are only allowed in the select list or HAVING clause".into())),
        }
    }

    fn analyze_correlated(&self, subquery: PlanNode, local: &Schema, outer: &[Schema]) -> Result<PlanNode> {
        let mut new_outer = Vec::with_capacity(outer.len() + 1);
        new_outer.push(local.clone());
        new_outer.extend_from_slice(outer);
        Ok(self.analyze_node(subquery, &new_outer)?.node)
    }

    fn resolve_column(&self, qualifier: Option<&str>, name: &str, local: &Schema, outer: &[Schema]) -> Result<Expr> {
        let scopes = std::iter::once(local).chain(outer.iter());
        for (scope, schema) in scopes.enumerate() {
            let mut matches = schema.iter().enumerate().filter(|(_, c)| {
                c.name.eq_ignore_ascii_case(name)
                    && qualifier.map(|q| c.qualifier.as_deref().map(|cq| cq.eq_ignore_ascii_case(q)).unwrap_or(false)).unwrap_or(true)
            });
            let Some((index, col)) = matches.next() else { continue };
            if matches.next().is_some() {
                return Err(Error::UnknownColumn(format!("column '{}' is ambiguous", name)));
            }
            return Ok(Expr::Column(ColumnRef::Resolved {
                scope,
                index,
                name: col.name.clone(),
                qualifier: col.qualifier.clone(),
                datatype: col.datatype,
                nullable: col.nullable,
            }));
        }
        Err(Error::UnknownColumn(name.to_string()))
    }

    fn check_binary_types(&self, op: crate::ast::BinaryOp, l: &Expr, r: &Expr, local: &Schema) -> Result<()> {
        use crate::ast::BinaryOp::*;
        use crate::types::DataType;
        if !matches!(op, Add | Sub | Mul | Div | Rem) {
            return Ok(());
        }
        let lt = crate::plan::expr_type_in(l, local)?;
        let rt = crate::plan::expr_type_in(r, local)?;
        let numeric_or_text = |t: DataType| t.is_numeric() || t == DataType::Text;
        if !numeric_or_text(lt) || !numeric_or_text(rt) {
            return Err(Error::TypeMismatch(format!("cannot apply {:?} to {} and {}", op, lt, rt)));
        }
        Ok(())
    }
}

/// Replaces occurrences of `ctx`'s raw group keys / aggregate expressions
/// inside `expr` with column references into the already-resolved
/// `Aggregate` node's output schema. Anything left over (a plain column not
/// among the group keys, or an aggregate used somewhere the collector
/// didn't reach) is deliberately left unresolved, so the generic resolver
/// that runs afterwards reports it as an unknown column — which is exactly
/// the "non-aggregated, non-grouped column" rule the GROUP BY clause
/// enforces.
fn rewrite_agg_refs(expr: Expr, ctx: &AggContext, schema: &Schema) -> Expr {
    if let Some(i) = ctx.raw_group_keys.iter().position(|k| *k == expr) {
        let c = &schema[i];
        return Expr::Column(ColumnRef::Resolved { scope: 0, index: i, name: c.name.clone(), qualifier: c.qualifier.clone(), datatype: c.datatype, nullable: c.nullable });
    }
    if matches!(expr, Expr::Aggregate { .. }) {
        if let Some(i) = ctx.raw_aggs.iter().position(|a| *a == expr) {
            let index = ctx.raw_group_keys.len() + i;
            let c = &schema[index];
            return Expr::Column(ColumnRef::Resolved { scope: 0, index, name: c.name.clone(), qualifier: c.qualifier.clone(), datatype: c.datatype, nullable: c.nullable });
        }
        return expr;
    }
    match expr {
        Expr::Unary(op, e) => Expr::Unary(op, Box::new(rewrite_agg_refs(*e, ctx, schema))),
        Expr::Binary(op, l, r) => Expr::Binary(op, Box::new(rewrite_agg_refs(*l, ctx, schema)), Box::new(rewrite_agg_refs(*r, ctx, schema))),
        Expr::IsNull { expr, negated } => Expr::IsNull { expr: Box::new(rewrite_agg_refs(*expr, ctx, schema)), negated },
        Expr::Between { expr, low, high, negated } => Expr::Between {
            expr: Box::new(rewrite_agg_refs(*expr, ctx, schema)),
            low: Box::new(rewrite_agg_refs(*low, ctx, schema)),
            high: Box::new(rewrite_agg_refs(*high, ctx, schema)),
            negated,
        },
        Expr::InList { expr, list, negated } => {
            Expr::InList { expr: Box::new(rewrite_agg_refs(*expr, ctx, schema)), list: list.into_iter().map(|e| rewrite_agg_refs(e, ctx, schema)).collect(), negated }
        }
        Expr::Like { expr, pattern, negated } => {
            Expr::Like { expr: Box::new(rewrite_agg_refs(*expr, ctx, schema)), pattern: Box::new(rewrite_agg_refs(*pattern, ctx, schema)), negated }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::mvcc::{MVCCDef, MVCC};
    use kv::storage::memory::Memory;

    fn setup() -> (MVCC<Memory>, Transaction<Memory>) {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        Catalog::new(&txn).create_database("d").unwrap();
        let schema = crate::catalog::Schema {
            columns: vec![
                crate::catalog::Column { name: "id".into(), datatype: crate::types::DataType::Int, nullable: false, primary_key: true, default: None },
                crate::catalog::Column { name: "name".into(), datatype: crate::types::DataType::Text, nullable: true, primary_key: false, default: None },
            ],
        };
        Catalog::new(&txn).create_table("d", "t", schema).unwrap();
        (mvcc, txn)
    }

    #[test]
    fn resolves_table_and_column() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT name FROM t WHERE id = 1").unwrap();
        let node = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        assert!(!node.contains_unresolved());
    }

    #[test]
    fn expands_wildcard() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT * FROM t").unwrap();
        let node = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        match &node {
            PlanNode::Project { items, .. } => assert_eq!(items.len(), 2),
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn unknown_table_errors() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT * FROM nope").unwrap();
        let err = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap_err();
        assert!(matches!(err, Error::UnknownTable(_)));
    }

    #[test]
    fn no_database_selected_errors() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT * FROM t").unwrap();
        let err = Analyzer::new(&txn, None).analyze(parsed).unwrap_err();
        assert!(matches!(err, Error::NoDatabaseSelected));
    }

    #[test]
    fn rewrites_group_by_aggregate() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT name, COUNT(*) FROM t GROUP BY name HAVING COUNT(*) > 1").unwrap();
        let node = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        assert!(!node.contains_unresolved());
    }

    #[test]
    fn non_grouped_column_errors() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT id, COUNT(*) FROM t GROUP BY name").unwrap();
        let err = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn(_)));
    }

    #[test]
    fn aggregate_in_where_errors() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT name FROM t WHERE COUNT(*) > 1").unwrap();
        let err = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn order_by_ordinal() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT id, name FROM t ORDER BY 2").unwrap();
        let node = Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        match node {
            PlanNode::Sort { keys, .. } => match &keys[0].expr {
                Expr::Column(ColumnRef::Resolved { index, .. }) => assert_eq!(*index, 1),
                other => panic!("expected resolved column, got {:?}", other),
            },
            other => panic!("expected Sort, got {:?}", other),
        }
    }
}
