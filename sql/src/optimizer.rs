//! Rewrites an analyzed plan tree into an equivalent one that does less
//! work: push filters toward the data, prune projections, fold constants,
//! turn a qualifying `Filter`-over-`TableScan` into an `IndexScan`, pick a
//! join order and strategy, and flatten chains of the same set operation.
//!
//! Every rule is a pure `PlanNode -> PlanNode` rewrite; none of them touch
//! the transaction except `estimate_row_count` (used for join ordering).
//! The driver applies every rule bottom-up and repeats until a full pass
//! makes no further change, capped at 64 passes so a rule bug can't loop
//! forever.

use kv::mvcc::Transaction;
use kv::storage::engine::Engine;

use crate::ast::{BinaryOp, ColumnRef, Expr, JoinKind, PlanNode};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::types::Value;

const MAX_PASSES: usize = 64;

pub fn optimize<E: Engine>(node: PlanNode, txn: &Transaction<E>) -> Result<PlanNode> {
    let cat = Catalog::new(txn);
    let mut node = node;
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        node = rewrite(node, &cat, &mut changed)?;
        if !changed {
            break;
        }
    }
    Ok(node)
}

fn rewrite<E: Engine>(node: PlanNode, cat: &Catalog<E>, changed: &mut bool) -> Result<PlanNode> {
    let node = recurse(node, cat, changed)?;
    let node = fold_constants(node, changed);
    let node = push_predicate(node, changed);
    let node = collapse_projects(node, changed);
    let node = select_index(node, changed)?;
    let node = choose_join_strategy(node, cat, changed)?;
    let node = flatten_set_ops(node, changed);
    Ok(node)
}

/// Applies `rewrite` to every child first, so a parent rule always sees
/// already-simplified children.
fn recurse<E: Engine>(node: PlanNode, cat: &Catalog<E>, changed: &mut bool) -> Result<PlanNode> {
    Ok(match node {
        PlanNode::Filter { predicate, input } => PlanNode::Filter { predicate, input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Project { items, input } => PlanNode::Project { items, input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Distinct { input } => PlanNode::Distinct { input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Sort { keys, input } => PlanNode::Sort { keys, input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Limit { n, input } => PlanNode::Limit { n, input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Offset { n, input } => PlanNode::Offset { n, input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Subquery { input, alias } => PlanNode::Subquery { input: Box::new(rewrite(*input, cat, changed)?), alias },
        PlanNode::Join { left, right, kind, predicate } => {
            PlanNode::Join { left: Box::new(rewrite(*left, cat, changed)?), right: Box::new(rewrite(*right, cat, changed)?), kind, predicate }
        }
        PlanNode::HashJoin { left, right, left_keys, right_keys, predicate, kind } => PlanNode::HashJoin {
            left: Box::new(rewrite(*left, cat, changed)?),
            right: Box::new(rewrite(*right, cat, changed)?),
            left_keys,
            right_keys,
            predicate,
            kind,
        },
        PlanNode::Aggregate { group_keys, aggs, input } => PlanNode::Aggregate { group_keys, aggs, input: Box::new(rewrite(*input, cat, changed)?) },
        PlanNode::Union { inputs, distinct } => {
            let mut out = Vec::with_capacity(inputs.len());
            for i in inputs {
                out.push(rewrite(i, cat, changed)?);
            }
            PlanNode::Union { inputs: out, distinct }
        }
        PlanNode::Intersect { left, right, distinct } => {
            PlanNode::Intersect { left: Box::new(rewrite(*left, cat, changed)?), right: Box::new(rewrite(*right, cat, changed)?), distinct }
        }
        PlanNode::Except { left, right, distinct } => {
            PlanNode::Except { left: Box::new(rewrite(*left, cat, changed)?), right: Box::new(rewrite(*right, cat, changed)?), distinct }
        }
        PlanNode::Insert { table, columns, source } => PlanNode::Insert { table, columns, source: Box::new(rewrite(*source, cat, changed)?) },
        other => other,
    })
}

/// Folds subexpressions whose operands are all literals into a single
/// literal — e.g. `1 + 1` becomes `2`, `TRUE AND x > 0` becomes `x > 0`.
fn fold_constants(node: PlanNode, changed: &mut bool) -> PlanNode {
    map_exprs(node, &mut |e| fold_expr(e, changed))
}

fn fold_expr(expr: Expr, changed: &mut bool) -> Expr {
    match expr {
        Expr::Unary(op, e) => {
            let e = fold_expr(*e, changed);
            match (&op, &e) {
                (crate::ast::UnaryOp::Not, Expr::Literal(v)) => {
                    if let Some(b) = v.as_bool() {
                        *changed = true;
                        return Expr::Literal(Value::Boolean(!b));
                    }
                    Expr::Unary(op, Box::new(e))
                }
                (crate::ast::UnaryOp::Neg, Expr::Literal(Value::Int(n))) => {
                    *changed = true;
                    Expr::Literal(Value::Int(-n))
                }
                _ => Expr::Unary(op, Box::new(e)),
            }
        }
        Expr::Binary(op, l, r) => {
            let l = fold_expr(*l, changed);
            let r = fold_expr(*r, changed);
            if let (Expr::Literal(lv), Expr::Literal(rv)) = (&l, &r) {
                if let Some(folded) = eval_const_binary(op, lv, rv) {
                    *changed = true;
                    return Expr::Literal(folded);
                }
            }
            // `x AND TRUE` / `TRUE AND x` simplify to `x`; their `FALSE`
            // counterparts simplify to `FALSE` regardless of `x`.
            if op == BinaryOp::And {
                if let Expr::Literal(Value::Boolean(b)) = &l {
                    *changed = true;
                    return if *b { r } else { Expr::Literal(Value::Boolean(false)) };
                }
                if let Expr::Literal(Value::Boolean(b)) = &r {
                    *changed = true;
                    return if *b { l } else { Expr::Literal(Value::Boolean(false)) };
                }
            }
            if op == BinaryOp::Or {
                if let Expr::Literal(Value::Boolean(b)) = &l {
                    *changed = true;
                    return if *b { Expr::Literal(Value::Boolean(true)) } else { r };
                }
                if let Expr::Literal(Value::Boolean(b)) = &r {
                    *changed = true;
                    return if *b { Expr::Literal(Value::Boolean(true)) } else { l };
                }
            }
            Expr::Binary(op, Box::new(l), Box::new(r))
        }
        Expr::IsNull { expr: e, negated } => {
            let e = fold_expr(*e, changed);
            if let Expr::Literal(v) = &e {
                *changed = true;
                return Expr::Literal(Value::Boolean(v.is_null() != negated));
            }
            Expr::IsNull { expr: Box::new(e), negated }
        }
        Expr::Between { expr: e, low, high, negated } => {
            Expr::Between { expr: Box::new(fold_expr(*e, changed)), low: Box::new(fold_expr(*low, changed)), high: Box::new(fold_expr(*high, changed)), negated }
        }
        Expr::InList { expr: e, list, negated } => {
            Expr::InList { expr: Box::new(fold_expr(*e, changed)), list: list.into_iter().map(|x| fold_expr(x, changed)).collect(), negated }
        }
        Expr::Like { expr: e, pattern, negated } => Expr::Like { expr: Box::new(fold_expr(*e, changed)), pattern: Box::new(fold_expr(*pattern, changed)), negated },
        other => other,
    }
}

fn eval_const_binary(op: BinaryOp, l: &Value, r: &Value) -> Option<Value> {
    use BinaryOp::*;
    match op {
        Eq | NotEq | Lt | Lte | Gt | Gte => {
            let ord = l.compare(r)?;
            let b = match op {
                Eq => ord == std::cmp::Ordering::Equal,
                NotEq => ord != std::cmp::Ordering::Equal,
                Lt => ord == std::cmp::Ordering::Less,
                Lte => ord != std::cmp::Ordering::Greater,
                Gt => ord == std::cmp::Ordering::Greater,
                Gte => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Some(Value::Boolean(b))
        }
        And => Some(Value::Boolean(l.as_bool()? && r.as_bool()?)),
        Or => Some(Value::Boolean(l.as_bool()? || r.as_bool()?)),
        Add | Sub | Mul | Div | Rem => {
            if l.is_null() || r.is_null() {
                return Some(Value::Null);
            }
            let (a, b) = (l.as_float().ok()?, r.as_float().ok()?);
            let v = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => {
                    if b == 0.0 {
                        return None;
                    }
                    a / b
                }
                Rem => {
                    if b == 0.0 {
                        return None;
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Some(Value::Float(ordered_float::OrderedFloat(v)))
        }
    }
}

/// Pushes a `Filter` sitting above a `Join` down onto whichever side(s) its
/// predicate actually depends on, splitting a top-level `AND` into its
/// conjuncts first. A conjunct referencing both sides stays at the join.
/// Also merges `Filter(p1, Filter(p2, x))` into a single `Filter(p1 AND p2, x)`.
fn push_predicate(node: PlanNode, changed: &mut bool) -> PlanNode {
    match node {
        PlanNode::Filter { predicate, input } => match *input {
            PlanNode::Filter { predicate: inner_pred, input: inner_input } => {
                *changed = true;
                push_predicate(PlanNode::Filter { predicate: Expr::Binary(BinaryOp::And, Box::new(predicate), Box::new(inner_pred)), input: inner_input }, changed)
            }
            PlanNode::Join { left, right, kind, predicate: join_pred } if kind == JoinKind::Inner => {
                let left_width = left.schema().map(|s| s.len()).unwrap_or(0);
                let conjuncts = split_conjuncts(predicate);
                let mut left_only = Vec::new();
                let mut right_only = Vec::new();
                let mut rest = Vec::new();
                for c in conjuncts {
                    match depends_on(&c, left_width) {
                        Dependence::LeftOnly => left_only.push(c),
                        Dependence::RightOnly => right_only.push(c),
                        Dependence::Both | Dependence::Neither => rest.push(c),
                    }
                }
                if left_only.is_empty() && right_only.is_empty() {
                    return PlanNode::Filter {
                        predicate: rest.into_iter().reduce(|a, b| Expr::Binary(BinaryOp::And, Box::new(a), Box::new(b))).unwrap(),
                        input: Box::new(PlanNode::Join { left, right, kind, predicate: join_pred }),
                    };
                }
                *changed = true;
                let left = wrap_filter(*left, left_only, 0);
                let right = wrap_filter(*right, right_only, left_width);
                let join = PlanNode::Join { left: Box::new(left), right: Box::new(right), kind, predicate: join_pred };
                match rest.into_iter().reduce(|a, b| Expr::Binary(BinaryOp::And, Box::new(a), Box::new(b))) {
                    Some(p) => PlanNode::Filter { predicate: p, input: Box::new(join) },
                    None => join,
                }
            }
            other => PlanNode::Filter { predicate, input: Box::new(other) },
        },
        other => other,
    }
}

fn wrap_filter(input: PlanNode, conjuncts: Vec<Expr>, shift: usize) -> PlanNode {
    if conjuncts.is_empty() {
        return input;
    }
    let predicate = conjuncts.into_iter().map(|e| shift_columns(e, shift)).reduce(|a, b| Expr::Binary(BinaryOp::And, Box::new(a), Box::new(b))).unwrap();
    PlanNode::Filter { predicate, input: Box::new(input) }
}

/// Column indices resolved against the join's combined schema need to be
/// rebased back to the child's own schema once the predicate moves onto
/// just that child.
fn shift_columns(expr: Expr, shift: usize) -> Expr {
    match expr {
        Expr::Column(ColumnRef::Resolved { scope: 0, index, name, qualifier, datatype, nullable }) => {
            Expr::Column(ColumnRef::Resolved { scope: 0, index: index - shift, name, qualifier, datatype, nullable })
        }
        Expr::Unary(op, e) => Expr::Unary(op, Box::new(shift_columns(*e, shift))),
        Expr::Binary(op, l, r) => Expr::Binary(op, Box::new(shift_columns(*l, shift)), Box::new(shift_columns(*r, shift))),
        Expr::IsNull { expr, negated } => Expr::IsNull { expr: Box::new(shift_columns(*expr, shift)), negated },
        Expr::Between { expr, low, high, negated } => {
            Expr::Between { expr: Box::new(shift_columns(*expr, shift)), low: Box::new(shift_columns(*low, shift)), high: Box::new(shift_columns(*high, shift)), negated }
        }
        Expr::InList { expr, list, negated } => {
            Expr::InList { expr: Box::new(shift_columns(*expr, shift)), list: list.into_iter().map(|e| shift_columns(e, shift)).collect(), negated }
        }
        Expr::Like { expr, pattern, negated } => Expr::Like { expr: Box::new(shift_columns(*expr, shift)), pattern: Box::new(shift_columns(*pattern, shift)), negated },
        other => other,
    }
}

enum Dependence {
    LeftOnly,
    RightOnly,
    Both,
    Neither,
}

fn depends_on(expr: &Expr, left_width: usize) -> Dependence {
    let (mut left, mut right) = (false, false);
    collect_dependence(expr, left_width, &mut left, &mut right);
    match (left, right) {
        (true, true) => Dependence::Both,
        (true, false) => Dependence::LeftOnly,
        (false, true) => Dependence::RightOnly,
        (false, false) => Dependence::Neither,
    }
}

fn collect_dependence(expr: &Expr, left_width: usize, left: &mut bool, right: &mut bool) {
    match expr {
        Expr::Column(ColumnRef::Resolved { scope: 0, index, .. }) => {
            if *index < left_width {
                *left = true;
            } else {
                *right = true;
            }
        }
        Expr::Unary(_, e) | Expr::IsNull { expr: e, .. } => collect_dependence(e, left_width, left, right),
        Expr::Binary(_, l, r) => {
            collect_dependence(l, left_width, left, right);
            collect_dependence(r, left_width, left, right);
        }
        Expr::Between { expr, low, high, .. } => {
            collect_dependence(expr, left_width, left, right);
            collect_dependence(low, left_width, left, right);
            collect_dependence(high, left_width, left, right);
        }
        Expr::InList { expr, list, .. } => {
            collect_dependence(expr, left_width, left, right);
            for e in list {
                collect_dependence(e, left_width, left, right);
            }
        }
        Expr::Like { expr, pattern, .. } => {
            collect_dependence(expr, left_width, left, right);
            collect_dependence(pattern, left_width, left, right);
        }
        _ => {}
    }
}

fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary(BinaryOp::And, l, r) => {
            let mut out = split_conjuncts(*l);
            out.extend(split_conjuncts(*r));
            out
        }
        other => vec![other],
    }
}

/// `Project(outer, Project(inner, x))` collapses to a single `Project` when
/// every outer item is a plain column reference into the inner projection,
/// by substituting the inner expression directly.
fn collapse_projects(node: PlanNode, changed: &mut bool) -> PlanNode {
    match node {
        PlanNode::Project { items, input } => match *input {
            PlanNode::Project { items: inner_items, input: inner_input } => {
                let substitutable = items.iter().all(|i| matches!(&i.expr, Expr::Column(ColumnRef::Resolved { scope: 0, .. })));
                if !substitutable {
                    return PlanNode::Project { items, input: Box::new(PlanNode::Project { items: inner_items, input: inner_input }) };
                }
                *changed = true;
                let merged = items
                    .into_iter()
                    .map(|i| match &i.expr {
                        Expr::Column(ColumnRef::Resolved { index, .. }) => {
                            let inner = &inner_items[*index];
                            crate::ast::SelectItem { expr: inner.expr.clone(), alias: i.alias.or_else(|| inner.alias.clone()) }
                        }
                        _ => unreachable!(),
                    })
                    .collect();
                PlanNode::Project { items: merged, input: inner_input }
            }
            other => PlanNode::Project { items, input: Box::new(other) },
        },
        other => other,
    }
}

/// Turns `Filter(col = literal, TableScan)` (or `col = literal` as one
/// conjunct of a larger predicate) into an `IndexScan` when `col` is the
/// leading column of some index on the table, leaving any remaining
/// conjuncts as a residual `Filter` on top.
fn select_index(node: PlanNode, changed: &mut bool) -> Result<PlanNode> {
    Ok(match node {
        PlanNode::Filter { predicate, input } => match *input {
            PlanNode::TableScan { table, alias } => {
                let conjuncts = split_conjuncts(predicate);
                let mut probe = None;
                let mut residual = Vec::new();
                for c in conjuncts {
                    if probe.is_none() {
                        if let Expr::Binary(BinaryOp::Eq, l, r) = &c {
                            if let (Expr::Column(ColumnRef::Resolved { index, .. }), Expr::Literal(v)) = (l.as_ref(), r.as_ref()) {
                                if let Some(idx) = table.indexes.iter().find(|ix| ix.columns.first() == Some(index)) {
                                    probe = Some((idx.clone(), v.clone()));
                                    continue;
                                }
                            }
                        }
                    }
                    residual.push(c);
                }
                match probe {
                    Some((index, v)) => {
                        *changed = true;
                        let scan = PlanNode::IndexScan { table, index, alias, probe: vec![Expr::Literal(v)] };
                        match residual.into_iter().reduce(|a, b| Expr::Binary(BinaryOp::And, Box::new(a), Box::new(b))) {
                            Some(p) => PlanNode::Filter { predicate: p, input: Box::new(scan) },
                            None => scan,
                        }
                    }
                    None => PlanNode::Filter {
                        predicate: residual.into_iter().reduce(|a, b| Expr::Binary(BinaryOp::And, Box::new(a), Box::new(b))).unwrap(),
                        input: Box::new(PlanNode::TableScan { table, alias }),
                    },
                }
            }
            other => PlanNode::Filter { predicate, input: Box::new(other) },
        },
        other => other,
    })
}

/// Rewrites an `Inner` `Join` with an equi-join predicate into a
/// `HashJoin`, choosing the side with the smaller estimated row count as
/// the build side (`right`, by this crate's convention).
fn choose_join_strategy<E: Engine>(node: PlanNode, cat: &Catalog<E>, changed: &mut bool) -> Result<PlanNode> {
    Ok(match node {
        PlanNode::Join { left, right, kind, predicate: Some(predicate) } if kind == JoinKind::Inner => {
            let left_width = left.schema()?.len();
            if let Expr::Binary(BinaryOp::Eq, l, r) = &predicate {
                if let (Expr::Column(ColumnRef::Resolved { index: li, .. }), Expr::Column(ColumnRef::Resolved { index: ri, .. })) = (l.as_ref(), r.as_ref()) {
                    let (left_key, right_key) = if *li < left_width && *ri >= left_width {
                        (l.as_ref().clone(), shift_columns(r.as_ref().clone(), left_width))
                    } else if *ri < left_width && *li >= left_width {
                        (r.as_ref().clone(), shift_columns(l.as_ref().clone(), left_width))
                    } else {
                        return Ok(PlanNode::Join { left, right, kind, predicate: Some(predicate) });
                    };
                    *changed = true;
                    let left_rows = estimate(&left, cat)?;
                    let right_rows = estimate(&right, cat)?;
                    let (left, right, left_key, right_key) = if right_rows <= left_rows {
                        (left, right, left_key, right_key)
                    } else {
                        (right, left, right_key, left_key)
                    };
                    return Ok(PlanNode::HashJoin { left, right, left_keys: vec![left_key], right_keys: vec![right_key], predicate: None, kind });
                }
            }
            PlanNode::Join { left, right, kind, predicate: Some(predicate) }
        }
        other => other,
    })
}

fn estimate<E: Engine>(node: &PlanNode, cat: &Catalog<E>) -> Result<u64> {
    match node {
        PlanNode::TableScan { table, .. } => cat.estimate_row_count(table),
        PlanNode::IndexScan { table, .. } => Ok(cat.estimate_row_count(table)? / 10 + 1),
        PlanNode::Filter { input, .. } => Ok(estimate(input, cat)? / 2 + 1),
        _ => Ok(10_000),
    }
}

/// `Union(Union(a, b), c)` with the same distinctness flattens to
/// `Union([a, b, c])`, so the executor evaluates one n-ary set operation
/// instead of a chain of binary ones.
fn flatten_set_ops(node: PlanNode, changed: &mut bool) -> PlanNode {
    match node {
        PlanNode::Union { inputs, distinct } => {
            let mut out = Vec::with_capacity(inputs.len());
            for i in inputs {
                match i {
                    PlanNode::Union { inputs: inner, distinct: inner_distinct } if inner_distinct == distinct => {
                        *changed = true;
                        out.extend(inner);
                    }
                    other => out.push(other),
                }
            }
            PlanNode::Union { inputs: out, distinct }
        }
        other => other,
    }
}

/// Applies `f` to every direct expression held by `node`, without
/// recursing into child plan nodes (the driver's `recurse` handles that).
fn map_exprs(node: PlanNode, f: &mut impl FnMut(Expr) -> Expr) -> PlanNode {
    match node {
        PlanNode::Filter { predicate, input } => PlanNode::Filter { predicate: f(predicate), input },
        PlanNode::Project { items, input } => {
            PlanNode::Project { items: items.into_iter().map(|i| crate::ast::SelectItem { expr: f(i.expr), alias: i.alias }).collect(), input }
        }
        PlanNode::Sort { keys, input } => {
            PlanNode::Sort { keys: keys.into_iter().map(|k| crate::ast::OrderKey { expr: f(k.expr), desc: k.desc }).collect(), input }
        }
        PlanNode::Join { left, right, kind, predicate } => PlanNode::Join { left, right, kind, predicate: predicate.map(f) },
        PlanNode::Aggregate { group_keys, aggs, input } => PlanNode::Aggregate {
            group_keys: group_keys.into_iter().map(&mut *f).collect(),
            aggs: aggs.into_iter().map(|(k, a, d, n)| (k, a.map(&mut *f), d, n)).collect(),
            input,
        },
        PlanNode::Update { table, assignments, filter } => {
            PlanNode::Update { table, assignments: assignments.into_iter().map(|(i, e)| (i, f(e))).collect(), filter: filter.map(f) }
        }
        PlanNode::Delete { table, filter } => PlanNode::Delete { table, filter: filter.map(f) },
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
    fn folds_constant_predicate() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT id FROM t WHERE 1 = 1 AND id > 0").unwrap();
        let resolved = crate::analyzer::Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        let optimized = optimize(resolved, &txn).unwrap();
        match optimized {
            PlanNode::Project { input, .. } => match *input {
                PlanNode::Filter { predicate, .. } => assert!(!matches!(predicate, Expr::Binary(BinaryOp::And, ..))),
                other => panic!("expected Filter, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn selects_index_on_equality() {
        let (_mvcc, txn) = setup();
        Catalog::new(&txn).create_index("d", "t", "name_idx", &["name".to_string()], false).unwrap();
        let parsed = crate::parser::parse("SELECT id FROM t WHERE name = 'a'").unwrap();
        let resolved = crate::analyzer::Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        let optimized = optimize(resolved, &txn).unwrap();
        match optimized {
            PlanNode::Project { input, .. } => assert!(matches!(*input, PlanNode::IndexScan { .. })),
            other => panic!("expected Project, got {:?}", other),
        }
    }

    fn setup_two_tables() -> (MVCC<Memory>, Transaction<Memory>) {
        let (mvcc, txn) = setup();
        let schema = crate::catalog::Schema {
            columns: vec![
                crate::catalog::Column { name: "id".into(), datatype: crate::types::DataType::Int, nullable: false, primary_key: true, default: None },
                crate::catalog::Column { name: "t_id".into(), datatype: crate::types::DataType::Int, nullable: true, primary_key: false, default: None },
            ],
        };
        Catalog::new(&txn).create_table("d", "u", schema).unwrap();
        (mvcc, txn)
    }

    /// A join predicate that only touches one side moves below the join
    /// instead of being evaluated once per combined row.
    #[test]
    fn predicate_pushdown_moves_single_side_filters_below_the_join() {
        let (_mvcc, txn) = setup_two_tables();
        let parsed =
            crate::parser::parse("SELECT t.id FROM t JOIN u ON t.id = u.t_id WHERE t.id > 0 AND u.id > 0").unwrap();
        let resolved = crate::analyzer::Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        let optimized = optimize(resolved, &txn).unwrap();
        let join = match optimized {
            PlanNode::Project { input, .. } => *input,
            other => panic!("expected Project, got {:?}", other),
        };
        match join {
            PlanNode::HashJoin { left, right, .. } => {
                assert!(matches!(*left, PlanNode::Filter { .. }), "left side should carry its own pushed filter");
                assert!(matches!(*right, PlanNode::Filter { .. }), "right side should carry its own pushed filter");
            }
            other => panic!("expected HashJoin after join-strategy selection, got {:?}", other),
        }
    }

    /// An equi-join on resolved columns from both sides becomes a
    /// `HashJoin` with the smaller estimated side first.
    #[test]
    fn equi_join_is_rewritten_to_a_hash_join() {
        let (_mvcc, txn) = setup_two_tables();
        let parsed = crate::parser::parse("SELECT t.id FROM t JOIN u ON t.id = u.t_id").unwrap();
        let resolved = crate::analyzer::Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        let optimized = optimize(resolved, &txn).unwrap();
        match optimized {
            PlanNode::Project { input, .. } => assert!(matches!(*input, PlanNode::HashJoin { .. })),
            other => panic!("expected Project, got {:?}", other),
        }
    }

    /// `(A UNION B) UNION C` with the same distinctness flattens to a
    /// single n-ary `Union`.
    #[test]
    fn same_distinctness_unions_flatten_into_one_node() {
        let (_mvcc, txn) = setup();
        let parsed = crate::parser::parse("SELECT 1 UNION SELECT 2 UNION SELECT 3").unwrap();
        let resolved = crate::analyzer::Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        let optimized = optimize(resolved, &txn).unwrap();
        match optimized {
            PlanNode::Union { inputs, distinct } => {
                assert!(distinct);
                assert_eq!(inputs.len(), 3);
            }
            other => panic!("expected a flattened Union, got {:?}", other),
        }
    }

    /// L4: running the optimizer again on its own output is a no-op.
    #[test]
    fn optimize_is_idempotent() {
        let (_mvcc, txn) = setup_two_tables();
        let parsed = crate::parser::parse(
            "SELECT t.id FROM t JOIN u ON t.id = u.t_id WHERE t.id > 0 AND u.id > 0 ORDER BY t.id LIMIT 5",
        )
        .unwrap();
        let resolved = crate::analyzer::Analyzer::new(&txn, Some("d")).analyze(parsed).unwrap();
        let once = optimize(resolved, &txn).unwrap();
        let twice = optimize(once.clone(), &txn).unwrap();
        assert_eq!(format!("{:?}", once), format!("{:?}", twice));
    }
}
