//! Pulls rows out of a resolved, optimized [`PlanNode`]. Most operators
//! buffer their input eagerly into a `Vec` and hand out an iterator over it;
//! `Filter`/`Project`/`Limit`/`Offset`/`Subquery` stay lazily pull-based over
//! a boxed child so a `LIMIT` on top of a table scan doesn't have to drain
//! the whole table first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use kv::mvcc::Transaction;
use kv::storage::engine::Engine;

use crate::ast::{AggKind, BinaryOp, ColumnDef, ColumnRef, Expr, JoinKind, PlanNode, SelectItem, UnaryOp};
use crate::catalog::{Catalog, Table};
use crate::error::{Error, Result};
use crate::key;
use crate::plan::Schema;
use crate::types::Value;

/// Everything a running statement needs that isn't carried by the plan tree
/// itself: the transaction to read and write through, the session's current
/// database (for unqualified DDL), and the cancellation flag a `KILL` sets.
pub struct ExecContext<'a, E: Engine> {
    pub txn: &'a Transaction<E>,
    pub database: Option<&'a str>,
    pub cancel: &'a AtomicBool,
}

fn check_canceled<E: Engine>(ctx: &ExecContext<E>) -> Result<()> {
    if ctx.cancel.load(Ordering::Relaxed) {
        Err(Error::Canceled)
    } else {
        Ok(())
    }
}

/// A running operator. Variants that only ever replay a precomputed `Vec`
/// share the `rows` arm in [`Executor::next`]; the rest pull from a boxed
/// child on demand.
pub enum Executor {
    TableScan { rows: std::vec::IntoIter<Vec<Value>> },
    IndexScan { rows: std::vec::IntoIter<Vec<Value>> },
    OneRow { emitted: bool },
    Values { rows: std::vec::IntoIter<Vec<Value>> },
    Subquery { input: Box<Executor> },
    Filter { input: Box<Executor>, predicate: Expr, outer: Vec<Vec<Value>> },
    Project { input: Box<Executor>, items: Vec<SelectItem>, outer: Vec<Vec<Value>> },
    Distinct { rows: std::vec::IntoIter<Vec<Value>> },
    Sort { rows: std::vec::IntoIter<Vec<Value>> },
    Limit { input: Box<Executor>, remaining: u64 },
    Offset { input: Box<Executor>, remaining: u64 },
    Join { rows: std::vec::IntoIter<Vec<Value>> },
    HashJoin { rows: std::vec::IntoIter<Vec<Value>> },
    Aggregate { rows: std::vec::IntoIter<Vec<Value>> },
    SetOp { rows: std::vec::IntoIter<Vec<Value>> },
}

impl Executor {
    /// Builds the operator tree for `node`. `outer` is the stack of rows
    /// from enclosing query blocks, for correlated subquery evaluation;
    /// top-level callers pass `&[]`.
    pub fn build<E: Engine>(node: &PlanNode, ctx: &ExecContext<E>, outer: &[Vec<Value>]) -> Result<Executor> {
        check_canceled(ctx)?;
        match node {
            PlanNode::TableScan { table, .. } => {
                let rows: Vec<Vec<Value>> =
                    Catalog::new(ctx.txn).scan_table(table)?.into_iter().map(|(_, row)| row).collect();
                Ok(Executor::TableScan { rows: rows.into_iter() })
            }
            PlanNode::IndexScan { table, index, probe, .. } => {
                let cat = Catalog::new(ctx.txn);
                let mut keys = Vec::with_capacity(probe.len());
                for e in probe {
                    keys.push(eval_expr(e, &[], outer, ctx)?);
                }
                let pks = cat.scan_index(table, index, &keys)?;
                let mut rows = Vec::with_capacity(pks.len());
                for pk in pks {
                    if let Some(row) = cat.get_row(table, &pk)? {
                        rows.push(row);
                    }
                }
                Ok(Executor::IndexScan { rows: rows.into_iter() })
            }
            PlanNode::OneRow => Ok(Executor::OneRow { emitted: false }),
            PlanNode::Subquery { input, .. } => {
                Ok(Executor::Subquery { input: Box::new(Executor::build(input, ctx, &[])?) })
            }
            PlanNode::Values { rows, .. } => {
                let mut out = Vec::with_capacity(rows.len());
                for r in rows {
                    let mut vals = Vec::with_capacity(r.len());
                    for e in r {
                        vals.push(eval_expr(e, &[], outer, ctx)?);
                    }
                    out.push(vals);
                }
                Ok(Executor::Values { rows: out.into_iter() })
            }
            PlanNode::Filter { predicate, input } => Ok(Executor::Filter {
                input: Box::new(Executor::build(input, ctx, outer)?),
                predicate: predicate.clone(),
                outer: outer.to_vec(),
            }),
            PlanNode::Project { items, input } => Ok(Executor::Project {
                input: Box::new(Executor::build(input, ctx, outer)?),
                items: items.clone(),
                outer: outer.to_vec(),
            }),
            PlanNode::Distinct { input } => {
                let rows = drain_node(input, ctx, outer)?;
                Ok(Executor::Distinct { rows: dedupe_rows(rows).into_iter() })
            }
            PlanNode::Sort { keys, input } => {
                let rows = drain_node(input, ctx, outer)?;
                let mut keyed: Vec<(Vec<Value>, Vec<Value>)> = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut k = Vec::with_capacity(keys.len());
                    for ok in keys {
                        k.push(eval_expr(&ok.expr, &row, outer, ctx)?);
                    }
                    keyed.push((k, row));
                }
                keyed.sort_by(|a, b| {
                    for (i, ok) in keys.iter().enumerate() {
                        let ord = a.0[i].cmp_total(&b.0[i]);
                        let ord = if ok.desc { ord.reverse() } else { ord };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                let rows: Vec<Vec<Value>> = keyed.into_iter().map(|(_, r)| r).collect();
                Ok(Executor::Sort { rows: rows.into_iter() })
            }
            PlanNode::Limit { n, input } => {
                Ok(Executor::Limit { input: Box::new(Executor::build(input, ctx, outer)?), remaining: *n })
            }
            PlanNode::Offset { n, input } => {
                Ok(Executor::Offset { input: Box::new(Executor::build(input, ctx, outer)?), remaining: *n })
            }
            PlanNode::Join { left, right, kind, predicate } => {
                let left_rows = drain_node(left, ctx, outer)?;
                let right_rows = drain_node(right, ctx, outer)?;
                let left_width = left.schema()?.len();
                let right_width = right.schema()?.len();
                let rows = combine_join(left_rows, right_rows, left_width, right_width, *kind, |combined| {
                    match predicate {
                        Some(p) => Ok(eval_expr(p, combined, outer, ctx)?.as_bool().unwrap_or(false)),
                        None => Ok(true),
                    }
                })?;
                Ok(Executor::Join { rows: rows.into_iter() })
            }
            PlanNode::HashJoin { left, right, left_keys, right_keys, predicate, kind } => {
                let left_rows = drain_node(left, ctx, outer)?;
                let right_rows = drain_node(right, ctx, outer)?;
                let left_width = left.schema()?.len();
                let right_width = right.schema()?.len();

                let mut buckets: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
                for (i, r) in right_rows.iter().enumerate() {
                    let mut key_vals = Vec::with_capacity(right_keys.len());
                    let mut has_null = false;
                    for e in right_keys {
                        let v = eval_expr(e, r, outer, ctx)?;
                        has_null |= v.is_null();
                        key_vals.push(v);
                    }
                    if !has_null {
                        buckets.entry(key::encode_tuple(&key_vals)).or_default().push(i);
                    }
                }

                let mut matched_right = vec![false; right_rows.len()];
                let mut out = Vec::new();
                for l in &left_rows {
                    let mut key_vals = Vec::with_capacity(left_keys.len());
                    let mut has_null = false;
                    for e in left_keys {
                        let v = eval_expr(e, l, outer, ctx)?;
                        has_null |= v.is_null();
                        key_vals.push(v);
                    }
                    let mut any_match = false;
                    if !has_null {
                        if let Some(idxs) = buckets.get(&key::encode_tuple(&key_vals)) {
                            for &i in idxs {
                                let r = &right_rows[i];
                                let mut combined = l.clone();
                                combined.extend(r.clone());
                                let passes = match predicate {
                                    Some(p) => eval_expr(p, &combined, outer, ctx)?.as_bool().unwrap_or(false),
                                    None => true,
                                };
                                if passes {
                                    any_match = true;
                                    matched_right[i] = true;
                                    out.push(combined);
                                }
                            }
                        }
                    }
                    if !any_match && matches!(kind, JoinKind::Left | JoinKind::Full) {
                        let mut combined = l.clone();
                        combined.extend(std::iter::repeat(Value::Null).take(right_width));
                        out.push(combined);
                    }
                }
                if matches!(kind, JoinKind::Right | JoinKind::Full) {
                    for (i, r) in right_rows.iter().enumerate() {
                        if !matched_right[i] {
                            let mut combined = vec![Value::Null; left_width];
                            combined.extend(r.clone());
                            out.push(combined);
                        }
                    }
                }
                Ok(Executor::HashJoin { rows: out.into_iter() })
            }
            PlanNode::Aggregate { group_keys, aggs, input } => {
                let rows = drain_node(input, ctx, outer)?;
                let result = eval_aggregate(group_keys, aggs, rows, outer, ctx)?;
                Ok(Executor::Aggregate { rows: result.into_iter() })
            }
            PlanNode::Union { inputs, distinct } => {
                let mut all = Vec::new();
                for input in inputs {
                    all.extend(drain_node(input, ctx, outer)?);
                }
                let rows = if *distinct { dedupe_rows(all) } else { all };
                Ok(Executor::SetOp { rows: rows.into_iter() })
            }
            PlanNode::Intersect { left, right, distinct } => {
                let l = drain_node(left, ctx, outer)?;
                let r = drain_node(right, ctx, outer)?;
                Ok(Executor::SetOp { rows: bag_intersect(l, r, *distinct).into_iter() })
            }
            PlanNode::Except { left, right, distinct } => {
                let l = drain_node(left, ctx, outer)?;
                let r = drain_node(right, ctx, outer)?;
                Ok(Executor::SetOp { rows: bag_except(l, r, *distinct).into_iter() })
            }
            other => Err(Error::Internal(format!("{:?} is not a row-producing plan node", other))),
        }
    }

    pub fn next<E: Engine>(&mut self, ctx: &ExecContext<E>) -> Result<Option<Vec<Value>>> {
        check_canceled(ctx)?;
        match self {
            Executor::TableScan { rows }
            | Executor::IndexScan { rows }
            | Executor::Values { rows }
            | Executor::Distinct { rows }
            | Executor::Sort { rows }
            | Executor::Join { rows }
            | Executor::HashJoin { rows }
            | Executor::Aggregate { rows }
            | Executor::SetOp { rows } => Ok(rows.next()),
            Executor::OneRow { emitted } => {
                if *emitted {
                    Ok(None)
                } else {
                    *emitted = true;
                    Ok(Some(Vec::new()))
                }
            }
            Executor::Subquery { input } => input.next(ctx),
            Executor::Filter { input, predicate, outer } => loop {
                match input.next(ctx)? {
                    Some(row) => {
                        let keep = eval_expr(predicate, &row, outer, ctx)?.as_bool().unwrap_or(false);
                        if keep {
                            return Ok(Some(row));
                        }
                    }
                    None => return Ok(None),
                }
            },
            Executor::Project { input, items, outer } => match input.next(ctx)? {
                Some(row) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items.iter() {
                        out.push(eval_expr(&item.expr, &row, outer, ctx)?);
                    }
                    Ok(Some(out))
                }
                None => Ok(None),
            },
            Executor::Limit { input, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                match input.next(ctx)? {
                    Some(row) => {
                        *remaining -= 1;
                        Ok(Some(row))
                    }
                    None => Ok(None),
                }
            }
            Executor::Offset { input, remaining } => {
                while *remaining > 0 {
                    match input.next(ctx)? {
                        Some(_) => *remaining -= 1,
                        None => return Ok(None),
                    }
                }
                input.next(ctx)
            }
        }
    }
}

fn drain_node<E: Engine>(node: &PlanNode, ctx: &ExecContext<E>, outer: &[Vec<Value>]) -> Result<Vec<Vec<Value>>> {
    let mut exec = Executor::build(node, ctx, outer)?;
    let mut rows = Vec::new();
    while let Some(r) = exec.next(ctx)? {
        rows.push(r);
    }
    Ok(rows)
}

/// Nested-loop join shared by `Join`. `matches_pred` sees the candidate
/// combined row (left columns followed by right columns) and decides
/// whether it survives the join predicate.
fn combine_join(
    left_rows: Vec<Vec<Value>>,
    right_rows: Vec<Vec<Value>>,
    left_width: usize,
    right_width: usize,
    kind: JoinKind,
    matches_pred: impl Fn(&[Value]) -> Result<bool>,
) -> Result<Vec<Vec<Value>>> {
    let mut matched_right = vec![false; right_rows.len()];
    let mut out = Vec::new();
    for l in &left_rows {
        let mut any_match = false;
        for (i, r) in right_rows.iter().enumerate() {
            let mut combined = l.clone();
            combined.extend(r.clone());
            if matches_pred(&combined)? {
                any_match = true;
                matched_right[i] = true;
                out.push(combined);
            }
        }
        if !any_match && matches!(kind, JoinKind::Left | JoinKind::Full) {
            let mut combined = l.clone();
            combined.extend(std::iter::repeat(Value::Null).take(right_width));
            out.push(combined);
        }
    }
    if matches!(kind, JoinKind::Right | JoinKind::Full) {
        for (i, r) in right_rows.iter().enumerate() {
            if !matched_right[i] {
                let mut combined = vec![Value::Null; left_width];
                combined.extend(r.clone());
                out.push(combined);
            }
        }
    }
    Ok(out)
}

/// Evaluates a resolved expression against the row currently being produced
/// (`row`) and the stack of enclosing rows (`outer`, scope 1, 2, ...).
fn eval_expr<E: Engine>(expr: &Expr, row: &[Value], outer: &[Vec<Value>], ctx: &ExecContext<E>) -> Result<Value> {
    check_canceled(ctx)?;
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(ColumnRef::Resolved { scope, index, name, .. }) => {
            if *scope == 0 {
                row.get(*index)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("column index {} out of range for row", index)))
            } else {
                outer
                    .get(*scope - 1)
                    .and_then(|r| r.get(*index))
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("outer column '{}' out of range", name)))
            }
        }
        Expr::Column(ColumnRef::Unresolved { name, .. }) => Err(Error::UnknownColumn(name.clone())),
        Expr::Wildcard(_) => Err(Error::Internal("wildcard reached the executor".into())),
        Expr::Unary(op, e) => eval_unary(*op, eval_expr(e, row, outer, ctx)?),
        Expr::Binary(op, l, r) => {
            let lv = eval_expr(l, row, outer, ctx)?;
            let rv = eval_expr(r, row, outer, ctx)?;
            eval_binary(*op, lv, rv)
        }
        Expr::IsNull { expr, negated } => {
            let v = eval_expr(expr, row, outer, ctx)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        Expr::Between { expr, low, high, negated } => {
            let v = eval_expr(expr, row, outer, ctx)?;
            let lo = eval_expr(low, row, outer, ctx)?;
            let hi = eval_expr(high, row, outer, ctx)?;
            let ge = v.compare(&lo).map(|o| o != std::cmp::Ordering::Less);
            let le = v.compare(&hi).map(|o| o != std::cmp::Ordering::Greater);
            let result = eval_and(ge, le);
            let result = if *negated { result.map(|b| !b) } else { result };
            Ok(bool_to_value(result))
        }
        Expr::InList { expr, list, negated } => {
            let v = eval_expr(expr, row, outer, ctx)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let mut found = false;
            let mut unknown = false;
            for item in list {
                let iv = eval_expr(item, row, outer, ctx)?;
                match v.compare(&iv) {
                    Some(std::cmp::Ordering::Equal) => {
                        found = true;
                        break;
                    }
                    Some(_) => {}
                    None => unknown = true,
                }
            }
            let result = if found { Some(true) } else if unknown { None } else { Some(false) };
            let result = if *negated { result.map(|b| !b) } else { result };
            Ok(bool_to_value(result))
        }
        Expr::InSubquery { expr, subquery, negated } => {
            let v = eval_expr(expr, row, outer, ctx)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let sub_rows = run_subquery(subquery, row, outer, ctx)?;
            let mut found = false;
            let mut unknown = false;
            for r in &sub_rows {
                let iv = r.first().cloned().unwrap_or(Value::Null);
                match v.compare(&iv) {
                    Some(std::cmp::Ordering::Equal) => {
                        found = true;
                        break;
                    }
                    Some(_) => {}
                    None => unknown = true,
                }
            }
            let result = if found { Some(true) } else if unknown { None } else { Some(false) };
            let result = if *negated { result.map(|b| !b) } else { result };
            Ok(bool_to_value(result))
        }
        Expr::Exists { subquery, negated } => {
            let sub_rows = run_subquery(subquery, row, outer, ctx)?;
            let exists = !sub_rows.is_empty();
            Ok(Value::Boolean(exists != *negated))
        }
        Expr::ScalarSubquery(sub) => {
            let mut sub_rows = run_subquery(sub, row, outer, ctx)?;
            if sub_rows.len() > 1 {
                return Err(Error::TypeMismatch("subquery returned more than one row".into()));
            }
            Ok(sub_rows.pop().and_then(|r| r.into_iter().next()).unwrap_or(Value::Null))
        }
        Expr::Like { expr, pattern, negated } => {
            let v = eval_expr(expr, row, outer, ctx)?;
            let p = eval_expr(pattern, row, outer, ctx)?;
            if v.is_null() || p.is_null() {
                return Ok(Value::Null);
            }
            let matched = like_match(&v.to_string(), &p.to_string());
            Ok(Value::Boolean(matched != *negated))
        }
        Expr::Aggregate { .. } => {
            Err(Error::Internal("aggregate expression reached the executor outside an Aggregate node".into()))
        }
    }
}

/// Re-executes `node` once per outer row, with `row` pushed as the new
/// innermost scope. Naive, but correct, and consistent with how the
/// analyzer numbers correlated scopes.
fn run_subquery<E: Engine>(
    node: &PlanNode,
    row: &[Value],
    outer: &[Vec<Value>],
    ctx: &ExecContext<E>,
) -> Result<Vec<Vec<Value>>> {
    let mut new_outer = Vec::with_capacity(outer.len() + 1);
    new_outer.push(row.to_vec());
    new_outer.extend_from_slice(outer);
    drain_node(node, ctx, &new_outer)
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value> {
    match op {
        UnaryOp::Neg => match v {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::UInt(u) => Ok(Value::Int(-(u as i64))),
            Value::Float(f) => Ok(Value::Float((-f.into_inner()).into())),
            Value::Decimal(d) => Ok(Value::Decimal(-d)),
            other => Err(Error::TypeMismatch(format!("cannot negate {}", other))),
        },
        UnaryOp::Not => Ok(bool_to_value(v.as_bool().map(|b| !b))),
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(bool_to_value(l.compare(&r).map(|o| o == std::cmp::Ordering::Equal))),
        BinaryOp::NotEq => Ok(bool_to_value(l.compare(&r).map(|o| o != std::cmp::Ordering::Equal))),
        BinaryOp::Lt => Ok(bool_to_value(l.compare(&r).map(|o| o == std::cmp::Ordering::Less))),
        BinaryOp::Lte => Ok(bool_to_value(l.compare(&r).map(|o| o != std::cmp::Ordering::Greater))),
        BinaryOp::Gt => Ok(bool_to_value(l.compare(&r).map(|o| o == std::cmp::Ordering::Greater))),
        BinaryOp::Gte => Ok(bool_to_value(l.compare(&r).map(|o| o != std::cmp::Ordering::Less))),
        BinaryOp::And => Ok(bool_to_value(eval_and(l.as_bool(), r.as_bool()))),
        BinaryOp::Or => Ok(bool_to_value(eval_or(l.as_bool(), r.as_bool()))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            if matches!(l, Value::Decimal(_)) || matches!(r, Value::Decimal(_)) {
                return eval_decimal_binary(op, &l, &r);
            }
            let a = l.as_float()?;
            let b = r.as_float()?;
            let result = match op {
                BinaryOp::Add => Some(a + b),
                BinaryOp::Sub => Some(a - b),
                BinaryOp::Mul => Some(a * b),
                BinaryOp::Div => if b == 0.0 { None } else { Some(a / b) },
                BinaryOp::Rem => if b == 0.0 { None } else { Some(a % b) },
                _ => unreachable!(),
            };
            Ok(result.map(|v| Value::Float(v.into())).unwrap_or(Value::Null))
        }
    }
}

/// `DECIMAL` arithmetic stays fixed-point end to end instead of round-tripping
/// through `f64`: operands convert losslessly via `Value::as_decimal`, and the
/// result rounds half-away-from-zero to the wider of the two operands' scales
/// (the declared column scale isn't threaded through expression evaluation,
/// so the operand scale is the best stand-in available at this layer).
fn eval_decimal_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use rust_decimal::RoundingStrategy;

    let a = l.as_decimal()?;
    let b = r.as_decimal()?;
    let scale = a.scale().max(b.scale());
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b.is_zero() {
                None
            } else {
                a.checked_div(b)
            }
        }
        BinaryOp::Rem => {
            if b.is_zero() {
                None
            } else {
                a.checked_rem(b)
            }
        }
        _ => unreachable!(),
    };
    Ok(result.map(|d| Value::Decimal(d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero))).unwrap_or(Value::Null))
}

/// SQL three-valued AND: `NULL AND FALSE` is `FALSE`, not `NULL`.
fn eval_and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// SQL three-valued OR: `NULL OR TRUE` is `TRUE`, not `NULL`.
fn eval_or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn bool_to_value(b: Option<bool>) -> Value {
    match b {
        Some(b) => Value::Boolean(b),
        None => Value::Null,
    }
}

/// Case-insensitive `%`/`_` pattern match.
fn like_match(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    like_rec(&v, &p)
}

fn like_rec(v: &[char], p: &[char]) -> bool {
    match p.first() {
        None => v.is_empty(),
        Some('%') => like_rec(v, &p[1..]) || (!v.is_empty() && like_rec(&v[1..], p)),
        Some('_') => !v.is_empty() && like_rec(&v[1..], &p[1..]),
        Some(c) => !v.is_empty() && v[0] == *c && like_rec(&v[1..], &p[1..]),
    }
}

struct Group {
    keys: Vec<Value>,
    rows: Vec<Vec<Value>>,
}

/// Groups `rows` by `group_keys` (using set-equality, so NULL keys never
/// merge with each other) and folds `aggs` over each group. With no group
/// keys and no rows, a single group with an empty bucket is still produced,
/// matching `COUNT(*)` over an empty table returning `0` rather than no row.
fn eval_aggregate<E: Engine>(
    group_keys: &[Expr],
    aggs: &[(AggKind, Option<Expr>, bool, String)],
    rows: Vec<Vec<Value>>,
    outer: &[Vec<Value>],
    ctx: &ExecContext<E>,
) -> Result<Vec<Vec<Value>>> {
    let mut groups: Vec<Group> = Vec::new();
    for row in &rows {
        let mut keys = Vec::with_capacity(group_keys.len());
        for k in group_keys {
            keys.push(eval_expr(k, row, outer, ctx)?);
        }
        let existing = groups
            .iter_mut()
            .find(|g| g.keys.len() == keys.len() && g.keys.iter().zip(&keys).all(|(a, b)| a.set_eq(b)));
        match existing {
            Some(g) => g.rows.push(row.clone()),
            None => groups.push(Group { keys, rows: vec![row.clone()] }),
        }
    }
    if groups.is_empty() && group_keys.is_empty() {
        groups.push(Group { keys: vec![], rows: vec![] });
    }

    let mut out = Vec::with_capacity(groups.len());
    for g in &groups {
        let mut out_row = g.keys.clone();
        for (kind, arg, distinct, _alias) in aggs {
            let mut vals = Vec::with_capacity(g.rows.len());
            for r in &g.rows {
                let v = match arg {
                    Some(e) => eval_expr(e, r, outer, ctx)?,
                    None => Value::Null,
                };
                vals.push(v);
            }
            if *distinct {
                let mut deduped: Vec<Value> = Vec::new();
                for v in vals {
                    if !deduped.iter().any(|d: &Value| d.set_eq(&v)) {
                        deduped.push(v);
                    }
                }
                vals = deduped;
            }
            out_row.push(eval_agg(*kind, vals));
        }
        out.push(out_row);
    }
    Ok(out)
}

fn eval_agg(kind: AggKind, values: Vec<Value>) -> Value {
    match kind {
        AggKind::CountStar => Value::Int(values.len() as i64),
        AggKind::Count => Value::Int(values.iter().filter(|v| !v.is_null()).count() as i64),
        AggKind::Sum => {
            let nums: Vec<f64> = values.iter().filter(|v| !v.is_null()).filter_map(|v| v.as_float().ok()).collect();
            if nums.is_empty() { Value::Null } else { Value::Float(nums.into_iter().sum::<f64>().into()) }
        }
        AggKind::Avg => {
            let nums: Vec<f64> = values.iter().filter(|v| !v.is_null()).filter_map(|v| v.as_float().ok()).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float((nums.iter().sum::<f64>() / nums.len() as f64).into())
            }
        }
        AggKind::Min => values
            .into_iter()
            .filter(|v| !v.is_null())
            .min_by(Value::cmp_total)
            .unwrap_or(Value::Null),
        AggKind::Max => values
            .into_iter()
            .filter(|v| !v.is_null())
            .max_by(Value::cmp_total)
            .unwrap_or(Value::Null),
    }
}

/// Whole-row set equality, per-column via [`Value::set_eq`] so a NULL in
/// either row keeps the rows from matching each other under DISTINCT.
fn rows_set_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.set_eq(y))
}

fn dedupe_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut out: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for r in rows {
        if !out.iter().any(|o| rows_set_eq(o, &r)) {
            out.push(r);
        }
    }
    out
}

/// Bag intersection: each left row consumes at most one matching right row,
/// so multiplicities behave like `INTERSECT ALL` before an optional final
/// dedupe for plain `INTERSECT`.
fn bag_intersect(left: Vec<Vec<Value>>, right: Vec<Vec<Value>>, distinct: bool) -> Vec<Vec<Value>> {
    let mut remaining = right;
    let mut out = Vec::new();
    for l in left {
        if let Some(pos) = remaining.iter().position(|r| rows_set_eq(r, &l)) {
            remaining.remove(pos);
            out.push(l);
        }
    }
    if distinct { dedupe_rows(out) } else { out }
}

fn bag_except(left: Vec<Vec<Value>>, right: Vec<Vec<Value>>, distinct: bool) -> Vec<Vec<Value>> {
    let mut remaining = right;
    let mut out = Vec::new();
    for l in left {
        match remaining.iter().position(|r| rows_set_eq(r, &l)) {
            Some(pos) => {
                remaining.remove(pos);
            }
            None => out.push(l),
        }
    }
    if distinct { dedupe_rows(out) } else { out }
}

fn validate_row(schema: &crate::catalog::Schema, row: &[Value]) -> Result<()> {
    for (col, v) in schema.columns.iter().zip(row) {
        if v.is_null() && !col.nullable {
            return Err(Error::ConstraintViolation(format!("column '{}' cannot be null", col.name)));
        }
    }
    Ok(())
}

fn resolve_db<E: Engine>(given: &Option<String>, ctx: &ExecContext<E>) -> Result<String> {
    given.clone().or_else(|| ctx.database.map(str::to_string)).ok_or(Error::NoDatabaseSelected)
}

fn exec_insert<E: Engine>(table: &Table, columns: &[usize], source: &PlanNode, ctx: &ExecContext<E>) -> Result<u64> {
    let cat = Catalog::new(ctx.txn);
    let src_rows = drain_node(source, ctx, &[])?;
    let listed: std::collections::HashSet<usize> = columns.iter().copied().collect();
    let mut count = 0u64;
    for src_row in src_rows {
        let mut row = vec![Value::Null; table.schema.columns.len()];
        for (i, &col_idx) in columns.iter().enumerate() {
            row[col_idx] = src_row.get(i).cloned().unwrap_or(Value::Null);
        }
        for (idx, col) in table.schema.columns.iter().enumerate() {
            if listed.contains(&idx) {
                continue;
            }
            if col.name == "_rowid" && col.primary_key {
                row[idx] = Value::Int(cat.next_row_id(table)?);
            } else if let Some(default) = &col.default {
                row[idx] = default.clone();
            }
        }
        validate_row(&table.schema, &row)?;
        cat.put_row(table, &row)?;
        count += 1;
    }
    Ok(count)
}

fn exec_update<E: Engine>(
    table: &Table,
    assignments: &[(usize, Expr)],
    filter: &Option<Expr>,
    ctx: &ExecContext<E>,
) -> Result<u64> {
    let cat = Catalog::new(ctx.txn);
    let rows = cat.scan_table(table)?;
    let mut count = 0u64;
    for (old_pk, row) in rows {
        let keep = match filter {
            Some(f) => eval_expr(f, &row, &[], ctx)?.as_bool().unwrap_or(false),
            None => true,
        };
        if !keep {
            continue;
        }
        let mut new_row = row.clone();
        for (idx, expr) in assignments {
            new_row[*idx] = eval_expr(expr, &row, &[], ctx)?;
        }
        validate_row(&table.schema, &new_row)?;
        let new_pk = table.schema.primary_key(&new_row);
        if new_pk != old_pk {
            cat.delete_row(table, &old_pk)?;
        }
        cat.put_row(table, &new_row)?;
        count += 1;
    }
    Ok(count)
}

fn exec_delete<E: Engine>(table: &Table, filter: &Option<Expr>, ctx: &ExecContext<E>) -> Result<u64> {
    let cat = Catalog::new(ctx.txn);
    let rows = cat.scan_table(table)?;
    let mut count = 0u64;
    for (pk, row) in rows {
        let keep = match filter {
            Some(f) => eval_expr(f, &row, &[], ctx)?.as_bool().unwrap_or(false),
            None => true,
        };
        if keep {
            cat.delete_row(table, &pk)?;
            count += 1;
        }
    }
    Ok(count)
}

fn exec_create_table<E: Engine>(
    database: &Option<String>,
    name: &str,
    columns: &[ColumnDef],
    ctx: &ExecContext<E>,
) -> Result<()> {
    let db = resolve_db(database, ctx)?;
    let mut cols = Vec::with_capacity(columns.len());
    for c in columns {
        let default = match &c.default {
            Some(expr) => Some(eval_expr(expr, &[], &[], ctx)?),
            None => None,
        };
        cols.push(crate::catalog::Column {
            name: c.name.clone(),
            datatype: c.datatype,
            nullable: c.nullable,
            primary_key: c.primary_key,
            default,
        });
    }
    Catalog::new(ctx.txn).create_table(&db, name, crate::catalog::Schema { columns: cols })?;
    Ok(())
}

/// What a fully executed statement handed back to the caller: a materialized
/// row set for anything that produces one, an affected-row count for DML, or
/// a bare acknowledgement for DDL and session control.
#[derive(Debug)]
pub enum ExecResult {
    Rows { schema: Schema, rows: Vec<Vec<Value>> },
    RowsAffected(u64),
    Ack,
}

/// Executes one resolved, optimized statement to completion.
pub fn execute<E: Engine>(node: &PlanNode, ctx: &ExecContext<E>) -> Result<ExecResult> {
    check_canceled(ctx)?;
    match node {
        PlanNode::Insert { table, columns, source } => {
            Ok(ExecResult::RowsAffected(exec_insert(table, columns, source, ctx)?))
        }
        PlanNode::Update { table, assignments, filter } => {
            Ok(ExecResult::RowsAffected(exec_update(table, assignments, filter, ctx)?))
        }
        PlanNode::Delete { table, filter } => Ok(ExecResult::RowsAffected(exec_delete(table, filter, ctx)?)),
        PlanNode::CreateDatabase { name } => {
            Catalog::new(ctx.txn).create_database(name)?;
            Ok(ExecResult::Ack)
        }
        PlanNode::DropDatabase { name, cascade } => {
            Catalog::new(ctx.txn).drop_database(name, *cascade)?;
            Ok(ExecResult::Ack)
        }
        PlanNode::CreateTable { database, name, columns } => {
            exec_create_table(database, name, columns, ctx)?;
            Ok(ExecResult::Ack)
        }
        PlanNode::DropTable { database, name } => {
            let db = resolve_db(database, ctx)?;
            Catalog::new(ctx.txn).drop_table(&db, name)?;
            Ok(ExecResult::Ack)
        }
        PlanNode::CreateIndex { database, table, name, columns, unique } => {
            let db = resolve_db(database, ctx)?;
            Catalog::new(ctx.txn).create_index(&db, table, name, columns, *unique)?;
            Ok(ExecResult::Ack)
        }
        PlanNode::DropIndex { database, table, name } => {
            let db = resolve_db(database, ctx)?;
            Catalog::new(ctx.txn).drop_index(&db, table, name)?;
            Ok(ExecResult::Ack)
        }
        PlanNode::BeginTxn | PlanNode::Commit | PlanNode::Rollback => Ok(ExecResult::Ack),
        PlanNode::Use { name } => {
            Catalog::new(ctx.txn).must_get_database(name)?;
            Ok(ExecResult::Rows { schema: node.schema()?, rows: vec![vec![Value::Text(name.clone())]] })
        }
        PlanNode::ShowDatabases => {
            let rows = Catalog::new(ctx.txn).list_databases()?.into_iter().map(|d| vec![Value::Text(d.name)]).collect();
            Ok(ExecResult::Rows { schema: node.schema()?, rows })
        }
        PlanNode::ShowTables => {
            let db = resolve_db(&None, ctx)?;
            let rows = Catalog::new(ctx.txn).list_tables(&db)?.into_iter().map(|t| vec![Value::Text(t.name)]).collect();
            Ok(ExecResult::Rows { schema: node.schema()?, rows })
        }
        other => {
            let schema = other.schema()?;
            let rows = drain_node(other, ctx, &[])?;
            Ok(ExecResult::Rows { schema, rows })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::mvcc::{MVCCDef, MVCC};
    use kv::storage::memory::Memory;

    fn run<E: Engine>(sql: &str, txn: &Transaction<E>, db: Option<&str>) -> ExecResult {
        let node = crate::plan(sql, txn, db).unwrap();
        let cancel = AtomicBool::new(false);
        let ctx = ExecContext { txn, database: db, cancel: &cancel };
        execute(&node, &ctx).unwrap()
    }

    fn rows_of(result: ExecResult) -> Vec<Vec<Value>> {
        match result {
            ExecResult::Rows { rows, .. } => rows,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn insert_and_select_roundtrip() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (id INT PRIMARY KEY, name TEXT)", &txn, Some("d"));
        let affected = run("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b')", &txn, Some("d"));
        assert!(matches!(affected, ExecResult::RowsAffected(2)));
        let rows = rows_of(run("SELECT id, name FROM t ORDER BY id", &txn, Some("d")));
        assert_eq!(
            rows,
            vec![vec![Value::Int(1), Value::Text("a".into())], vec![Value::Int(2), Value::Text("b".into())]]
        );
    }

    #[test]
    fn hidden_rowid_auto_increments() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (name TEXT)", &txn, Some("d"));
        run("INSERT INTO t (name) VALUES ('a')", &txn, Some("d"));
        run("INSERT INTO t (name) VALUES ('b')", &txn, Some("d"));
        let rows = rows_of(run("SELECT _rowid, name FROM t ORDER BY _rowid", &txn, Some("d")));
        assert_eq!(
            rows,
            vec![vec![Value::Int(1), Value::Text("a".into())], vec![Value::Int(2), Value::Text("b".into())]]
        );
    }

    #[test]
    fn update_and_delete() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (id INT PRIMARY KEY, name TEXT)", &txn, Some("d"));
        run("INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b')", &txn, Some("d"));
        assert!(matches!(run("UPDATE t SET name = 'z' WHERE id = 1", &txn, Some("d")), ExecResult::RowsAffected(1)));
        assert!(matches!(run("DELETE FROM t WHERE id = 2", &txn, Some("d")), ExecResult::RowsAffected(1)));
        let rows = rows_of(run("SELECT id, name FROM t", &txn, Some("d")));
        assert_eq!(rows, vec![vec![Value::Int(1), Value::Text("z".into())]]);
    }

    #[test]
    fn inner_join_combines_matching_rows() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE a (id INT PRIMARY KEY, val TEXT)", &txn, Some("d"));
        run("CREATE TABLE b (id INT PRIMARY KEY, a_id INT)", &txn, Some("d"));
        run("INSERT INTO a (id, val) VALUES (1, 'x'), (2, 'y')", &txn, Some("d"));
        run("INSERT INTO b (id, a_id) VALUES (10, 1), (11, 3)", &txn, Some("d"));
        let rows = rows_of(run("SELECT a.val, b.id FROM a JOIN b ON a.id = b.a_id", &txn, Some("d")));
        assert_eq!(rows, vec![vec![Value::Text("x".into()), Value::Int(10)]]);
    }

    #[test]
    fn left_join_pads_unmatched_rows_with_null() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE a (id INT PRIMARY KEY)", &txn, Some("d"));
        run("CREATE TABLE b (a_id INT)", &txn, Some("d"));
        run("INSERT INTO a (id) VALUES (1), (2)", &txn, Some("d"));
        run("INSERT INTO b (a_id) VALUES (1)", &txn, Some("d"));
        let rows =
            rows_of(run("SELECT a.id, b.a_id FROM a LEFT JOIN b ON a.id = b.a_id ORDER BY a.id", &txn, Some("d")));
        assert_eq!(rows, vec![vec![Value::Int(1), Value::Int(1)], vec![Value::Int(2), Value::Null]]);
    }

    #[test]
    fn group_by_counts_per_group() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (id INT PRIMARY KEY, category TEXT)", &txn, Some("d"));
        run("INSERT INTO t (id, category) VALUES (1, 'a'), (2, 'a'), (3, 'b')", &txn, Some("d"));
        let rows =
            rows_of(run("SELECT category, COUNT(*) FROM t GROUP BY category ORDER BY category", &txn, Some("d")));
        assert_eq!(
            rows,
            vec![vec![Value::Text("a".into()), Value::Int(2)], vec![Value::Text("b".into()), Value::Int(1)]]
        );
    }

    #[test]
    fn union_distinct_then_union_all_matches_documented_multiset() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let rows = rows_of(run("SELECT 1 UNION SELECT 2 UNION ALL SELECT 1 ORDER BY 1 LIMIT 2", &txn, None));
        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(1)]]);
    }

    #[test]
    fn exists_subquery_is_correlated() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE a (id INT PRIMARY KEY)", &txn, Some("d"));
        run("CREATE TABLE b (a_id INT)", &txn, Some("d"));
        run("INSERT INTO a (id) VALUES (1), (2)", &txn, Some("d"));
        run("INSERT INTO b (a_id) VALUES (1)", &txn, Some("d"));
        let rows = rows_of(run(
            "SELECT id FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b.a_id = a.id) ORDER BY id",
            &txn,
            Some("d"),
        ));
        assert_eq!(rows, vec![vec![Value::Int(1)]]);
    }

    #[test]
    fn cancellation_during_execution_errors() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (id INT PRIMARY KEY)", &txn, Some("d"));
        let node = crate::plan("SELECT id FROM t", &txn, Some("d")).unwrap();
        let cancel = AtomicBool::new(true);
        let ctx = ExecContext { txn: &txn, database: Some("d"), cancel: &cancel };
        assert!(matches!(execute(&node, &ctx), Err(Error::Canceled)));
    }

    #[test]
    fn drop_database_without_cascade_fails_on_a_non_empty_database() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (id INT PRIMARY KEY)", &txn, Some("d"));
        let node = crate::plan("DROP DATABASE d", &txn, None).unwrap();
        let cancel = AtomicBool::new(false);
        let ctx = ExecContext { txn: &txn, database: None, cancel: &cancel };
        assert!(execute(&node, &ctx).is_err());
        assert!(Catalog::new(&txn).get_database("d").unwrap().is_some());
    }

    #[test]
    fn drop_database_cascade_removes_a_non_empty_database() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        run("CREATE DATABASE d", &txn, None);
        run("CREATE TABLE t (id INT PRIMARY KEY)", &txn, Some("d"));
        run("DROP DATABASE d CASCADE", &txn, None);
        assert!(Catalog::new(&txn).get_database("d").unwrap().is_none());
    }

    #[test]
    fn decimal_arithmetic_stays_fixed_point() {
        use rust_decimal::Decimal;
        use std::str::FromStr;

        let a = Value::Decimal(Decimal::from_str("10.10").unwrap());
        let b = Value::Decimal(Decimal::from_str("0.20").unwrap());
        assert_eq!(eval_binary(BinaryOp::Add, a.clone(), b.clone()).unwrap(), Value::Decimal(Decimal::from_str("10.30").unwrap()));

        let x = Value::Decimal(Decimal::from_str("10").unwrap());
        let y = Value::Decimal(Decimal::from_str("3").unwrap());
        assert_eq!(eval_binary(BinaryOp::Div, x, y).unwrap(), Value::Decimal(Decimal::from_str("3").unwrap()));
    }

    #[test]
    fn mixing_decimal_with_an_integer_promotes_to_decimal() {
        use rust_decimal::Decimal;
        use std::str::FromStr;

        let a = Value::Decimal(Decimal::from_str("1.50").unwrap());
        let b = Value::Int(2);
        assert_eq!(eval_binary(BinaryOp::Mul, a, b).unwrap(), Value::Decimal(Decimal::from_str("3.00").unwrap()));
    }
}
