//! The plan tree: the single representation shared by the parser, analyzer,
//! optimizer and executor. A [`PlanNode`] is unresolved the moment the
//! parser builds it (leaves are `UnresolvedTable`, columns are
//! `ColumnRef::Unresolved`) and becomes resolved in place as the analyzer
//! walks it bottom-up and rebuilds each node with its children replaced.
//! Nodes are plain data, not behavior: schema derivation lives in
//! [`crate::plan`] and row iteration lives in [`crate::executor`].

use std::sync::Arc;

use crate::catalog::{Index, Table};
use crate::types::{DataType, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggKind {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggKind {
    pub fn result_type(self, arg: Option<DataType>) -> DataType {
        match self {
            AggKind::CountStar | AggKind::Count => DataType::BigInt,
            AggKind::Sum | AggKind::Avg => DataType::Double,
            AggKind::Min | AggKind::Max => arg.unwrap_or(DataType::Text),
        }
    }
}

/// A column reference. `scope` counts enclosing query blocks outward from
/// the row currently being evaluated: `0` is the row produced by the
/// immediately enclosing plan node, `1` is the row of the query that
/// contains it (for a correlated subquery), and so on.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnRef {
    Unresolved { qualifier: Option<String>, name: String },
    Resolved { scope: usize, index: usize, name: String, qualifier: Option<String>, datatype: DataType, nullable: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(ColumnRef),
    /// `SELECT *` or `SELECT t.*`; rewritten away during analysis.
    Wildcard(Option<String>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    InSubquery { expr: Box<Expr>, subquery: Box<PlanNode>, negated: bool },
    Exists { subquery: Box<PlanNode>, negated: bool },
    ScalarSubquery(Box<PlanNode>),
    Like { expr: Box<Expr>, pattern: Box<Expr>, negated: bool },
    Aggregate { kind: AggKind, arg: Option<Box<Expr>>, distinct: bool },
}

impl Expr {
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Unary(_, e) => e.is_aggregate(),
            Expr::Binary(_, l, r) => l.is_aggregate() || r.is_aggregate(),
            Expr::IsNull { expr, .. } => expr.is_aggregate(),
            Expr::Between { expr, low, high, .. } => {
                expr.is_aggregate() || low.is_aggregate() || high.is_aggregate()
            }
            Expr::InList { expr, list, .. } => {
                expr.is_aggregate() || list.iter().any(Expr::is_aggregate)
            }
            Expr::Like { expr, pattern, .. } => expr.is_aggregate() || pattern.is_aggregate(),
            _ => false,
        }
    }

    pub fn contains_unresolved(&self) -> bool {
        match self {
            Expr::Column(ColumnRef::Unresolved { .. }) | Expr::Wildcard(_) => true,
            Expr::Literal(_) | Expr::Column(ColumnRef::Resolved { .. }) => false,
            Expr::Unary(_, e) => e.contains_unresolved(),
            Expr::Binary(_, l, r) => l.contains_unresolved() || r.contains_unresolved(),
            Expr::IsNull { expr, .. } => expr.contains_unresolved(),
            Expr::Between { expr, low, high, .. } => {
                expr.contains_unresolved() || low.contains_unresolved() || high.contains_unresolved()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_unresolved() || list.iter().any(Expr::contains_unresolved)
            }
            Expr::InSubquery { expr, subquery, .. } => {
                expr.contains_unresolved() || subquery.contains_unresolved()
            }
            Expr::Exists { subquery, .. } => subquery.contains_unresolved(),
            Expr::ScalarSubquery(p) => p.contains_unresolved(),
            Expr::Like { expr, pattern, .. } => expr.contains_unresolved() || pattern.contains_unresolved(),
            Expr::Aggregate { arg, .. } => arg.as_ref().map(|a| a.contains_unresolved()).unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    pub expr: Expr,
    pub desc: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

/// A node in the plan tree. Parser output has `Unresolved*` leaves and
/// `ColumnRef::Unresolved` throughout; the analyzer consumes one of these
/// and produces a new tree with every such leaf replaced. Optimizer passes
/// likewise consume a tree and return a new, equivalent one — no node is
/// ever mutated in place.
#[derive(Clone, Debug)]
pub enum PlanNode {
    UnresolvedTable { database: Option<String>, name: String, alias: Option<String> },
    TableScan { table: Arc<Table>, alias: Option<String> },
    IndexScan { table: Arc<Table>, index: Index, alias: Option<String>, probe: Vec<Expr> },
    /// The implicit single-row source for a `SELECT` with no `FROM`.
    OneRow,
    /// A derived table: `input` is a fully independent query block, `alias`
    /// names it as a relation in the enclosing `FROM` scope.
    Subquery { input: Box<PlanNode>, alias: String },
    Values { rows: Vec<Vec<Expr>>, alias: Option<String>, column_names: Vec<String> },
    Filter { predicate: Expr, input: Box<PlanNode> },
    Project { items: Vec<SelectItem>, input: Box<PlanNode> },
    /// `SELECT DISTINCT`: deduplicates whole output rows. Kept distinct
    /// from `Aggregate` (which groups by explicit key expressions) since it
    /// always groups by the entire projected row, whatever it ends up being.
    Distinct { input: Box<PlanNode> },
    Sort { keys: Vec<OrderKey>, input: Box<PlanNode> },
    Limit { n: u64, input: Box<PlanNode> },
    Offset { n: u64, input: Box<PlanNode> },
    Join { left: Box<PlanNode>, right: Box<PlanNode>, kind: JoinKind, predicate: Option<Expr> },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        predicate: Option<Expr>,
        kind: JoinKind,
    },
    Aggregate { group_keys: Vec<Expr>, aggs: Vec<(AggKind, Option<Expr>, bool, String)>, input: Box<PlanNode> },
    Union { inputs: Vec<PlanNode>, distinct: bool },
    Intersect { left: Box<PlanNode>, right: Box<PlanNode>, distinct: bool },
    Except { left: Box<PlanNode>, right: Box<PlanNode>, distinct: bool },
    /// Parser output for `INSERT`: `columns` names the target columns in
    /// the order values are given (empty means "all columns, in schema
    /// order"). The analyzer resolves the table and column positions.
    UnresolvedInsert { database: Option<String>, name: String, columns: Vec<String>, source: Box<PlanNode> },
    Insert { table: Arc<Table>, columns: Vec<usize>, source: Box<PlanNode> },
    UnresolvedUpdate { database: Option<String>, name: String, assignments: Vec<(String, Expr)>, filter: Option<Expr> },
    Update { table: Arc<Table>, assignments: Vec<(usize, Expr)>, filter: Option<Expr> },
    UnresolvedDelete { database: Option<String>, name: String, filter: Option<Expr> },
    Delete { table: Arc<Table>, filter: Option<Expr> },
    CreateDatabase { name: String },
    DropDatabase { name: String, cascade: bool },
    CreateTable { database: Option<String>, name: String, columns: Vec<ColumnDef> },
    DropTable { database: Option<String>, name: String },
    CreateIndex { database: Option<String>, table: String, name: String, columns: Vec<String>, unique: bool },
    DropIndex { database: Option<String>, table: String, name: String },
    BeginTxn,
    Commit,
    Rollback,
    Use { name: String },
    ShowDatabases,
    ShowTables,
}

impl PlanNode {
    /// Children, in evaluation order. Used by rewrite passes that need to
    /// recurse generically (the fixed-point optimizer driver) without a
    /// specific rule needing to special-case every variant.
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::Filter { input, .. }
            | PlanNode::Project { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Limit { input, .. }
            | PlanNode::Offset { input, .. }
            | PlanNode::Aggregate { input, .. }
            | PlanNode::Distinct { input }
            | PlanNode::Subquery { input, .. } => vec![input],
            PlanNode::Join { left, right, .. } | PlanNode::Intersect { left, right, .. } | PlanNode::Except { left, right, .. } => {
                vec![left, right]
            }
            PlanNode::HashJoin { left, right, .. } => vec![left, right],
            PlanNode::Union { inputs, .. } => inputs.iter().collect(),
            PlanNode::Insert { source, .. } | PlanNode::UnresolvedInsert { source, .. } => vec![source],
            _ => vec![],
        }
    }

    pub fn contains_unresolved(&self) -> bool {
        match self {
            PlanNode::UnresolvedTable { .. }
            | PlanNode::UnresolvedInsert { .. }
            | PlanNode::UnresolvedUpdate { .. }
            | PlanNode::UnresolvedDelete { .. } => true,
            PlanNode::Filter { predicate, input } => predicate.contains_unresolved() || input.contains_unresolved(),
            PlanNode::Project { items, input } => {
                items.iter().any(|i| i.expr.contains_unresolved()) || input.contains_unresolved()
            }
            PlanNode::Sort { keys, input } => {
                keys.iter().any(|k| k.expr.contains_unresolved()) || input.contains_unresolved()
            }
            PlanNode::Limit { input, .. } | PlanNode::Offset { input, .. } | PlanNode::Subquery { input, .. } | PlanNode::Distinct { input } => {
                input.contains_unresolved()
            }
            PlanNode::Join { left, right, predicate, .. } => {
                left.contains_unresolved()
                    || right.contains_unresolved()
                    || predicate.as_ref().map(|p| p.contains_unresolved()).unwrap_or(false)
            }
            PlanNode::HashJoin { left, right, .. } => left.contains_unresolved() || right.contains_unresolved(),
            PlanNode::Aggregate { group_keys, aggs, input } => {
                group_keys.iter().any(Expr::contains_unresolved)
                    || aggs.iter().any(|(_, a, _, _)| a.as_ref().map(Expr::contains_unresolved).unwrap_or(false))
                    || input.contains_unresolved()
            }
            PlanNode::Union { inputs, .. } => inputs.iter().any(PlanNode::contains_unresolved),
            PlanNode::Intersect { left, right, .. } | PlanNode::Except { left, right, .. } => {
                left.contains_unresolved() || right.contains_unresolved()
            }
            PlanNode::Values { rows, .. } => rows.iter().any(|r| r.iter().any(Expr::contains_unresolved)),
            PlanNode::Insert { source, .. } => source.contains_unresolved(),
            PlanNode::Update { assignments, filter, .. } => {
                assignments.iter().any(|(_, e)| e.contains_unresolved())
                    || filter.as_ref().map(Expr::contains_unresolved).unwrap_or(false)
            }
            PlanNode::Delete { filter, .. } => filter.as_ref().map(Expr::contains_unresolved).unwrap_or(false),
            _ => false,
        }
    }
}
