//! Schema derivation over a [`PlanNode`]: the "(a) a schema" capability
//! every plan node exposes per the component design. Purely a function of
//! the tree — nothing here mutates or caches, so it stays correct across
//! rewrites without bookkeeping.

use crate::ast::{AggKind, ColumnRef, Expr, PlanNode};
use crate::error::{Error, Result};
use crate::types::DataType;

/// One column of a plan node's output: the shape the analyzer resolves
/// `ColumnRef`s against and the executor's row values line up with
/// positionally.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub qualifier: Option<String>,
    pub datatype: DataType,
    pub nullable: bool,
}

pub type Schema = Vec<OutputColumn>;

impl PlanNode {
    /// Computes this node's output schema. Requires the subtree to already
    /// be resolved (no `Unresolved*` leaves) except for `UnresolvedTable`,
    /// which the analyzer queries schema *for* before it has anything to
    /// replace it with — callers resolving a `FROM` item go through the
    /// catalog directly rather than this method.
    pub fn schema(&self) -> Result<Schema> {
        match self {
            PlanNode::UnresolvedTable { name, .. } => {
                Err(Error::Internal(format!("schema requested on unresolved table '{}'", name)))
            }
            PlanNode::UnresolvedInsert { name, .. } | PlanNode::UnresolvedUpdate { name, .. } | PlanNode::UnresolvedDelete { name, .. } => {
                Err(Error::Internal(format!("schema requested on unresolved statement against '{}'", name)))
            }
            PlanNode::TableScan { table, alias } => {
                let qualifier = Some(alias.clone().unwrap_or_else(|| table.name.clone()));
                Ok(table
                    .schema
                    .columns
                    .iter()
                    .map(|c| OutputColumn { name: c.name.clone(), qualifier: qualifier.clone(), datatype: c.datatype, nullable: c.nullable })
                    .collect())
            }
            PlanNode::IndexScan { table, alias, .. } => {
                let qualifier = Some(alias.clone().unwrap_or_else(|| table.name.clone()));
                Ok(table
                    .schema
                    .columns
                    .iter()
                    .map(|c| OutputColumn { name: c.name.clone(), qualifier: qualifier.clone(), datatype: c.datatype, nullable: c.nullable })
                    .collect())
            }
            PlanNode::OneRow => Ok(vec![]),
            PlanNode::Subquery { input, alias } => {
                let inner = input.schema()?;
                Ok(inner.into_iter().map(|c| OutputColumn { qualifier: Some(alias.clone()), ..c }).collect())
            }
            PlanNode::Values { column_names, rows, .. } => {
                let arity = column_names.len();
                let mut types = vec![None; arity];
                for row in rows {
                    for (i, e) in row.iter().enumerate() {
                        if types[i].is_none() {
                            types[i] = expr_type(e).ok();
                        }
                    }
                }
                Ok((0..arity)
                    .map(|i| OutputColumn {
                        name: column_names[i].clone(),
                        qualifier: None,
                        datatype: types[i].unwrap_or(DataType::Text),
                        nullable: true,
                    })
                    .collect())
            }
            PlanNode::Filter { input, .. } => input.schema(),
            PlanNode::Project { items, input } => {
                let input_schema = input.schema()?;
                items
                    .iter()
                    .map(|item| {
                        let datatype = expr_type_in(&item.expr, &input_schema)?;
                        let nullable = expr_nullable(&item.expr, &input_schema);
                        let name = item.alias.clone().unwrap_or_else(|| expr_default_name(&item.expr));
                        Ok(OutputColumn { name, qualifier: None, datatype, nullable })
                    })
                    .collect()
            }
            PlanNode::Sort { input, .. } | PlanNode::Limit { input, .. } | PlanNode::Offset { input, .. } | PlanNode::Distinct { input } => input.schema(),
            PlanNode::Join { left, right, kind, .. } => {
                let mut l = left.schema()?;
                let mut r = right.schema()?;
                use crate::ast::JoinKind::*;
                if matches!(kind, Right | Full) {
                    for c in l.iter_mut() {
                        c.nullable = true;
                    }
                }
                if matches!(kind, Left | Full) {
                    for c in r.iter_mut() {
                        c.nullable = true;
                    }
                }
                l.append(&mut r);
                Ok(l)
            }
            PlanNode::HashJoin { left, right, kind, .. } => {
                let mut l = left.schema()?;
                let mut r = right.schema()?;
                use crate::ast::JoinKind::*;
                if matches!(kind, Right | Full) {
                    for c in l.iter_mut() {
                        c.nullable = true;
                    }
                }
                if matches!(kind, Left | Full) {
                    for c in r.iter_mut() {
                        c.nullable = true;
                    }
                }
                l.append(&mut r);
                Ok(l)
            }
            PlanNode::Aggregate { group_keys, aggs, input } => {
                let input_schema = input.schema()?;
                let mut out = Vec::new();
                for k in group_keys {
                    out.push(OutputColumn {
                        name: expr_default_name(k),
                        qualifier: None,
                        datatype: expr_type_in(k, &input_schema)?,
                        nullable: expr_nullable(k, &input_schema),
                    });
                }
                for (kind, arg, _, alias) in aggs {
                    let arg_type = match arg {
                        Some(e) => Some(expr_type_in(e, &input_schema)?),
                        None => None,
                    };
                    out.push(OutputColumn { name: alias.clone(), qualifier: None, datatype: kind.result_type(arg_type), nullable: !matches!(kind, AggKind::CountStar | AggKind::Count) });
                }
                Ok(out)
            }
            PlanNode::Union { inputs, .. } => inputs.first().map(PlanNode::schema).transpose()?.ok_or_else(|| Error::Internal("empty UNION".into())),
            PlanNode::Intersect { left, .. } | PlanNode::Except { left, .. } => left.schema(),
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. } => Ok(vec![]),
            PlanNode::CreateDatabase { .. }
            | PlanNode::DropDatabase { .. }
            | PlanNode::CreateTable { .. }
            | PlanNode::DropTable { .. }
            | PlanNode::CreateIndex { .. }
            | PlanNode::DropIndex { .. }
            | PlanNode::BeginTxn
            | PlanNode::Commit
            | PlanNode::Rollback => Ok(vec![]),
            PlanNode::Use { .. } => Ok(vec![OutputColumn { name: "database".into(), qualifier: None, datatype: DataType::Text, nullable: false }]),
            PlanNode::ShowDatabases => Ok(vec![OutputColumn { name: "Database".into(), qualifier: None, datatype: DataType::Text, nullable: false }]),
            PlanNode::ShowTables => Ok(vec![OutputColumn { name: "Table".into(), qualifier: None, datatype: DataType::Text, nullable: false }]),
        }
    }
}

fn expr_default_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(ColumnRef::Resolved { name, .. }) | Expr::Column(ColumnRef::Unresolved { name, .. }) => name.clone(),
        Expr::Literal(v) => v.to_string(),
        Expr::Aggregate { kind, .. } => format!("{:?}", kind).to_lowercase(),
        _ => "expr".to_string(),
    }
}

/// Resolves an expression's type against an already-known input schema —
/// used when deriving a `Project`/`Aggregate` output schema, where column
/// refs must already be `Resolved` (the analyzer runs bottom-up).
pub fn expr_type_in(expr: &Expr, schema: &Schema) -> Result<DataType> {
    match expr {
        Expr::Column(ColumnRef::Resolved { index, scope, datatype, .. }) if *scope == 0 => {
            let _ = schema.get(*index).ok_or_else(|| Error::Internal("column index out of range".into()))?;
            Ok(*datatype)
        }
        Expr::Column(ColumnRef::Resolved { datatype, .. }) => Ok(*datatype),
        _ => expr_type(expr),
    }
}

/// Types an expression that carries enough information on its own
/// (literals, resolved columns, operators over already-typed operands)
/// without needing the enclosing schema.
pub fn expr_type(expr: &Expr) -> Result<DataType> {
    use crate::ast::BinaryOp::*;
    match expr {
        Expr::Literal(v) => Ok(v.datatype().unwrap_or(DataType::Text)),
        Expr::Column(ColumnRef::Resolved { datatype, .. }) => Ok(*datatype),
        Expr::Column(ColumnRef::Unresolved { name, .. }) => Err(Error::UnknownColumn(name.clone())),
        Expr::Wildcard(_) => Err(Error::Internal("wildcard has no scalar type".into())),
        Expr::Unary(_, e) => expr_type(e),
        Expr::Binary(op, l, r) => match op {
            Eq | NotEq | Lt | Lte | Gt | Gte | And | Or => Ok(DataType::Boolean),
            Add | Sub | Mul | Div | Rem => {
                let (lt, rt) = (expr_type(l)?, expr_type(r)?);
                Ok(numeric_promote(lt, rt))
            }
        },
        Expr::IsNull { .. } | Expr::Between { .. } | Expr::InList { .. } | Expr::InSubquery { .. } | Expr::Exists { .. } | Expr::Like { .. } => {
            Ok(DataType::Boolean)
        }
        Expr::ScalarSubquery(p) => {
            let schema = p.schema()?;
            Ok(schema.first().map(|c| c.datatype).unwrap_or(DataType::Text))
        }
        Expr::Aggregate { kind, arg, .. } => {
            let arg_type = arg.as_ref().map(|a| expr_type(a)).transpose()?;
            Ok(kind.result_type(arg_type))
        }
    }
}

pub fn numeric_promote(a: DataType, b: DataType) -> DataType {
    use DataType::*;
    if a == Decimal || b == Decimal {
        return Decimal;
    }
    if a == Double || b == Double || a == Float || b == Float {
        return Double;
    }
    BigInt
}

fn expr_nullable(expr: &Expr, schema: &Schema) -> bool {
    match expr {
        Expr::Column(ColumnRef::Resolved { index, scope, .. }) if *scope == 0 => {
            schema.get(*index).map(|c| c.nullable).unwrap_or(true)
        }
        Expr::Literal(v) => v.is_null(),
        Expr::Unary(_, e) => expr_nullable(e, schema),
        Expr::Binary(_, l, r) => expr_nullable(l, schema) || expr_nullable(r, schema),
        Expr::Aggregate { kind, .. } => !matches!(kind, AggKind::CountStar | AggKind::Count),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use kv::mvcc::{Transaction, MVCCDef, MVCC};
    use kv::storage::memory::Memory;

    fn setup() -> (MVCC<Memory>, Transaction<Memory>) {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        Catalog::new(&txn).create_database("d").unwrap();
        let schema = crate::catalog::Schema {
            columns: vec![
                crate::catalog::Column { name: "id".into(), datatype: DataType::Int, nullable: false, primary_key: true, default: None },
                crate::catalog::Column { name: "name".into(), datatype: DataType::Text, nullable: true, primary_key: false, default: None },
            ],
        };
        Catalog::new(&txn).create_table("d", "t", schema).unwrap();
        (mvcc, txn)
    }

    fn plan(txn: &Transaction<Memory>, sql: &str) -> PlanNode {
        let parsed = crate::parser::parse(sql).unwrap();
        crate::analyzer::Analyzer::new(txn, Some("d")).analyze(parsed).unwrap()
    }

    #[test]
    fn table_scan_schema_is_qualified_by_table_name() {
        let (_mvcc, txn) = setup();
        let node = plan(&txn, "SELECT * FROM t");
        let schema = node.schema().unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0].qualifier.as_deref(), Some("t"));
        assert_eq!(schema[0].name, "id");
        assert!(!schema[0].nullable);
        assert_eq!(schema[1].name, "name");
        assert!(schema[1].nullable);
    }

    #[test]
    fn projected_columns_carry_no_qualifier_and_use_their_alias() {
        let (_mvcc, txn) = setup();
        let node = plan(&txn, "SELECT id AS my_id, name FROM t");
        let schema = node.schema().unwrap();
        assert_eq!(schema[0].name, "my_id");
        assert_eq!(schema[0].qualifier, None);
        assert_eq!(schema[1].name, "name");
    }

    #[test]
    fn left_join_makes_the_right_sides_columns_nullable() {
        let schema = crate::catalog::Schema {
            columns: vec![
                crate::catalog::Column { name: "id".into(), datatype: DataType::Int, nullable: false, primary_key: true, default: None },
                crate::catalog::Column { name: "name".into(), datatype: DataType::Text, nullable: true, primary_key: false, default: None },
            ],
        };
        let (_mvcc, txn) = setup();
        Catalog::new(&txn).create_table("d", "u", schema).unwrap();
        let node = plan(&txn, "SELECT t.id, u.id FROM t LEFT JOIN u ON t.id = u.id");
        let schema = node.schema().unwrap();
        assert!(!schema[0].nullable, "left side keeps its own nullability");
        assert!(schema[1].nullable, "right side becomes nullable under LEFT JOIN");
    }

    #[test]
    fn count_star_is_not_nullable_but_other_aggregates_are() {
        let (_mvcc, txn) = setup();
        let node = plan(&txn, "SELECT COUNT(*), MAX(id) FROM t");
        let schema = node.schema().unwrap();
        assert!(!schema[0].nullable);
        assert!(schema[1].nullable, "MAX over an empty group is NULL");
    }

    #[test]
    fn numeric_promote_widens_to_the_more_general_type() {
        assert_eq!(numeric_promote(DataType::Int, DataType::Int), DataType::BigInt);
        assert_eq!(numeric_promote(DataType::Int, DataType::Double), DataType::Double);
        assert_eq!(numeric_promote(DataType::Decimal, DataType::Int), DataType::Decimal);
    }

    #[test]
    fn union_schema_is_taken_from_its_first_arm() {
        let (_mvcc, txn) = setup();
        let node = plan(&txn, "SELECT id FROM t UNION SELECT id FROM t");
        let schema = node.schema().unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].name, "id");
    }
}
