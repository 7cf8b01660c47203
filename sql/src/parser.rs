//! Recursive-descent parser: turns a token stream from [`crate::lexer`]
//! into an unresolved [`PlanNode`]. Table references are left as
//! `PlanNode::UnresolvedTable` and column references as
//! `ColumnRef::Unresolved`; the analyzer resolves both.

use crate::ast::{BinaryOp, ColumnDef, Expr, JoinKind, OrderKey, PlanNode, SelectItem, UnaryOp};
use crate::error::{Error, Result};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::types::{DataType, Value};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parses a single SQL statement into an unresolved plan tree.
pub fn parse(sql: &str) -> Result<PlanNode> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_statement()?;
    parser.expect(TokenKind::EOI)?;
    Ok(node)
}

/// Splits a batch of `;`-separated statements, skipping semicolons that
/// occur inside string/quoted-identifier literals or comments (which the
/// lexer already strips before token boundaries are visible here).
pub fn split_statements(sql: &str) -> Result<Vec<String>> {
    let tokens = tokenize(sql)?;
    let mut statements = Vec::new();
    let mut start = None;
    let mut last_end = 0;
    for tok in &tokens {
        if tok.kind == TokenKind::EOI {
            break;
        }
        if start.is_none() {
            start = Some(tok.span.start);
        }
        if tok.kind == TokenKind::Semicolon {
            let s = start.unwrap();
            statements.push(sql[s..tok.span.start].trim().to_string());
            start = None;
        }
        last_end = tok.span.end;
    }
    if let Some(s) = start {
        let stmt = sql[s..last_end].trim().to_string();
        if !stmt.is_empty() {
            statements.push(stmt);
        }
    }
    Ok(statements.into_iter().filter(|s| !s.is_empty()).collect())
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{:?}", kind)))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let tok = self.peek();
        Error::Syntax(format!(
            "expected {} but found {:?} ('{}') at position {}",
            expected, tok.kind, tok.text, tok.span.start
        ))
    }

    fn expect_ident(&mut self) -> Result<String> {
        if self.check(TokenKind::Ident) {
            Ok(self.advance().text)
        } else if self.check(TokenKind::QuotedIdent) {
            let t = self.advance().text;
            Ok(t.trim_matches('`').to_string())
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<PlanNode> {
        match self.peek_kind() {
            TokenKind::SELECT => self.parse_select_full(),
            TokenKind::INSERT => self.parse_insert(),
            TokenKind::UPDATE => self.parse_update(),
            TokenKind::DELETE => self.parse_delete(),
            TokenKind::CREATE => self.parse_create(),
            TokenKind::DROP => self.parse_drop(),
            TokenKind::BEGIN | TokenKind::START => self.parse_begin(),
            TokenKind::COMMIT => {
                self.advance();
                Ok(PlanNode::Commit)
            }
            TokenKind::ROLLBACK => {
                self.advance();
                Ok(PlanNode::Rollback)
            }
            TokenKind::USE => self.parse_use(),
            TokenKind::SHOW => self.parse_show(),
            _ => Err(self.unexpected("a SQL statement")),
        }
    }

    fn parse_begin(&mut self) -> Result<PlanNode> {
        self.advance();
        self.matches(TokenKind::TRANSACTION);
        Ok(PlanNode::BeginTxn)
    }

    fn parse_use(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::USE)?;
        let name = self.expect_ident()?;
        Ok(PlanNode::Use { name })
    }

    fn parse_show(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::SHOW)?;
        if self.matches(TokenKind::DATABASES) {
            Ok(PlanNode::ShowDatabases)
        } else if self.matches(TokenKind::TABLES) {
            Ok(PlanNode::ShowTables)
        } else {
            Err(self.unexpected("DATABASES or TABLES"))
        }
    }

    fn parse_create(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::CREATE)?;
        if self.matches(TokenKind::DATABASE) {
            let name = self.expect_ident()?;
            Ok(PlanNode::CreateDatabase { name })
        } else if self.matches(TokenKind::UNIQUE) {
            self.expect(TokenKind::INDEX)?;
            self.parse_create_index(true)
        } else if self.matches(TokenKind::INDEX) {
            self.parse_create_index(false)
        } else if self.matches(TokenKind::TABLE) {
            self.parse_create_table()
        } else {
            Err(self.unexpected("DATABASE, TABLE or INDEX"))
        }
    }

    fn parse_create_index(&mut self, unique: bool) -> Result<PlanNode> {
        let name = self.expect_ident()?;
        self.expect(TokenKind::ON)?;
        let (database, table) = self.parse_qualified_name()?;
        self.expect(TokenKind::LParen)?;
        let mut columns = vec![self.expect_ident()?];
        while self.matches(TokenKind::Comma) {
            columns.push(self.expect_ident()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(PlanNode::CreateIndex { database, table, name, columns, unique })
    }

    fn parse_qualified_name(&mut self) -> Result<(Option<String>, String)> {
        let first = self.expect_ident()?;
        if self.matches(TokenKind::Period) {
            let second = self.expect_ident()?;
            Ok((Some(first), second))
        } else {
            Ok((None, first))
        }
    }

    fn parse_create_table(&mut self) -> Result<PlanNode> {
        let (database, name) = self.parse_qualified_name()?;
        self.expect(TokenKind::LParen)?;
        let mut columns = Vec::new();
        loop {
            if self.matches(TokenKind::PRIMARY) {
                self.expect(TokenKind::KEY)?;
                self.expect(TokenKind::LParen)?;
                let mut pk_cols = vec![self.expect_ident()?];
                while self.matches(TokenKind::Comma) {
                    pk_cols.push(self.expect_ident()?);
                }
                self.expect(TokenKind::RParen)?;
                for col in columns.iter_mut() {
                    let c: &mut ColumnDef = col;
                    if pk_cols.iter().any(|n| n.eq_ignore_ascii_case(&c.name)) {
                        c.primary_key = true;
                        c.nullable = false;
                    }
                }
            } else {
                columns.push(self.parse_column_def()?);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(PlanNode::CreateTable { database, name, columns })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect_ident()?;
        let datatype = self.parse_data_type()?;
        let mut nullable = true;
        let mut primary_key = false;
        let mut default = None;
        loop {
            if self.matches(TokenKind::NOT) {
                self.expect(TokenKind::NULL)?;
                nullable = false;
            } else if self.matches(TokenKind::NULL) {
                nullable = true;
            } else if self.matches(TokenKind::PRIMARY) {
                self.expect(TokenKind::KEY)?;
                primary_key = true;
                nullable = false;
            } else if self.matches(TokenKind::DEFAULT) {
                default = Some(self.parse_primary_expr()?);
            } else if self.matches(TokenKind::UNIQUE) {
                // accepted but not separately tracked from a secondary unique index
            } else {
                break;
            }
        }
        Ok(ColumnDef { name, datatype, nullable, primary_key, default })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let ty = match self.peek_kind() {
            TokenKind::INT => DataType::Int,
            TokenKind::BIGINT => DataType::BigInt,
            TokenKind::SMALLINT => DataType::SmallInt,
            TokenKind::TINYINT => DataType::TinyInt,
            TokenKind::FLOAT => DataType::Float,
            TokenKind::DOUBLE => DataType::Double,
            TokenKind::DECIMAL => DataType::Decimal,
            TokenKind::TEXT | TokenKind::VARCHAR | TokenKind::CHAR => DataType::Text,
            TokenKind::BLOB => DataType::Binary,
            TokenKind::BOOLEAN => DataType::Boolean,
            TokenKind::DATE => DataType::Date,
            TokenKind::TIME => DataType::Time,
            TokenKind::DATETIME | TokenKind::TIMESTAMP => DataType::DateTime,
            _ => return Err(self.unexpected("a column type")),
        };
        self.advance();
        if self.matches(TokenKind::LParen) {
            // length/precision — not modeled, parse and discard.
            self.expect(TokenKind::Integer)?;
            if self.matches(TokenKind::Comma) {
                self.expect(TokenKind::Integer)?;
            }
            self.expect(TokenKind::RParen)?;
        }
        Ok(ty)
    }

    fn parse_drop(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::DROP)?;
        if self.matches(TokenKind::DATABASE) {
            let name = self.expect_ident()?;
            let cascade = self.matches(TokenKind::CASCADE);
            Ok(PlanNode::DropDatabase { name, cascade })
        } else if self.matches(TokenKind::TABLE) {
            let (database, name) = self.parse_qualified_name()?;
            Ok(PlanNode::DropTable { database, name })
        } else if self.matches(TokenKind::INDEX) {
            let name = self.expect_ident()?;
            self.expect(TokenKind::ON)?;
            let (database, table) = self.parse_qualified_name()?;
            Ok(PlanNode::DropIndex { database, table, name })
        } else {
            Err(self.unexpected("DATABASE, TABLE or INDEX"))
        }
    }

    fn parse_insert(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::INSERT)?;
        self.expect(TokenKind::INTO)?;
        let (database, name) = self.parse_qualified_name()?;
        let mut columns = Vec::new();
        if self.matches(TokenKind::LParen) {
            columns.push(self.expect_ident()?);
            while self.matches(TokenKind::Comma) {
                columns.push(self.expect_ident()?);
            }
            self.expect(TokenKind::RParen)?;
        }
        let source = if self.matches(TokenKind::VALUES) {
            let mut rows = Vec::new();
            loop {
                self.expect(TokenKind::LParen)?;
                let mut row = vec![self.parse_expr()?];
                while self.matches(TokenKind::Comma) {
                    row.push(self.parse_expr()?);
                }
                self.expect(TokenKind::RParen)?;
                rows.push(row);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            let column_names = if columns.is_empty() {
                (0..rows[0].len()).map(|i| format!("column{}", i)).collect()
            } else {
                columns.clone()
            };
            PlanNode::Values { rows, alias: None, column_names }
        } else if self.check(TokenKind::SELECT) {
            self.parse_select_full()?
        } else {
            return Err(self.unexpected("VALUES or SELECT"));
        };
        Ok(PlanNode::UnresolvedInsert { database, name, columns, source: Box::new(source) })
    }

    fn parse_update(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::UPDATE)?;
        let (database, name) = self.parse_qualified_name()?;
        self.expect(TokenKind::SET)?;
        let mut assignments = vec![self.parse_assignment()?];
        while self.matches(TokenKind::Comma) {
            assignments.push(self.parse_assignment()?);
        }
        let filter = if self.matches(TokenKind::WHERE) { Some(self.parse_expr()?) } else { None };
        Ok(PlanNode::UnresolvedUpdate { database, name, assignments, filter })
    }

    fn parse_assignment(&mut self) -> Result<(String, Expr)> {
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_expr()?;
        Ok((name, expr))
    }

    fn parse_delete(&mut self) -> Result<PlanNode> {
        self.expect(TokenKind::DELETE)?;
        self.expect(TokenKind::FROM)?;
        let (database, name) = self.parse_qualified_name()?;
        let filter = if self.matches(TokenKind::WHERE) { Some(self.parse_expr()?) } else { None };
        Ok(PlanNode::UnresolvedDelete { database, name, filter })
    }

    // ---- SELECT / set operations ----

    fn parse_select_full(&mut self) -> Result<PlanNode> {
        let mut node = self.parse_set_op()?;
        if self.matches(TokenKind::ORDER) {
            self.expect(TokenKind::BY)?;
            let mut keys = vec![self.parse_order_key()?];
            while self.matches(TokenKind::Comma) {
                keys.push(self.parse_order_key()?);
            }
            node = PlanNode::Sort { keys, input: Box::new(node) };
        }
        if self.matches(TokenKind::LIMIT) {
            let n = self.parse_u64_literal()?;
            node = PlanNode::Limit { n, input: Box::new(node) };
            if self.matches(TokenKind::OFFSET) {
                let off = self.parse_u64_literal()?;
                node = PlanNode::Offset { n: off, input: Box::new(node) };
            }
        } else if self.matches(TokenKind::OFFSET) {
            let off = self.parse_u64_literal()?;
            node = PlanNode::Offset { n: off, input: Box::new(node) };
            if self.matches(TokenKind::LIMIT) {
                let n = self.parse_u64_literal()?;
                node = PlanNode::Limit { n, input: Box::new(node) };
            }
        }
        Ok(node)
    }

    fn parse_u64_literal(&mut self) -> Result<u64> {
        let tok = self.expect(TokenKind::Integer)?;
        tok.text.parse().map_err(|_| Error::Syntax(format!("invalid integer literal '{}'", tok.text)))
    }

    fn parse_order_key(&mut self) -> Result<OrderKey> {
        let expr = self.parse_expr()?;
        let desc = if self.matches(TokenKind::DESC) {
            true
        } else {
            self.matches(TokenKind::ASC);
            false
        };
        Ok(OrderKey { expr, desc })
    }

    fn parse_set_op(&mut self) -> Result<PlanNode> {
        let mut left = self.parse_select_core()?;
        loop {
            let kind = match self.peek_kind() {
                TokenKind::UNION => "union",
                TokenKind::INTERSECT => "intersect",
                TokenKind::EXCEPT => "except",
                _ => break,
            };
            self.advance();
            let distinct = if self.matches(TokenKind::ALL) {
                false
            } else {
                self.matches(TokenKind::DISTINCT);
                true
            };
            let right = self.parse_select_core()?;
            left = match kind {
                "union" => PlanNode::Union { inputs: vec![left, right], distinct },
                "intersect" => PlanNode::Intersect { left: Box::new(left), right: Box::new(right), distinct },
                _ => PlanNode::Except { left: Box::new(left), right: Box::new(right), distinct },
            };
        }
        Ok(left)
    }

    fn parse_select_core(&mut self) -> Result<PlanNode> {
        if self.matches(TokenKind::LParen) {
            let inner = self.parse_select_full()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        self.expect(TokenKind::SELECT)?;
        let distinct = if self.matches(TokenKind::DISTINCT) {
            true
        } else {
            self.matches(TokenKind::ALL);
            false
        };
        let items = self.parse_select_list()?;

        let mut node = if self.matches(TokenKind::FROM) {
            self.parse_from_clause()?
        } else {
            PlanNode::OneRow
        };

        if self.matches(TokenKind::WHERE) {
            let predicate = self.parse_expr()?;
            node = PlanNode::Filter { predicate, input: Box::new(node) };
        }

        let mut group_keys = Vec::new();
        if self.matches(TokenKind::GROUP) {
            self.expect(TokenKind::BY)?;
            group_keys.push(self.parse_expr()?);
            while self.matches(TokenKind::Comma) {
                group_keys.push(self.parse_expr()?);
            }
        }

        let has_aggregates = items.iter().any(|i| i.expr.is_aggregate());
        if !group_keys.is_empty() || has_aggregates {
            let aggs = collect_aggregates(&items);
            node = PlanNode::Aggregate { group_keys, aggs, input: Box::new(node) };
        }

        if self.matches(TokenKind::HAVING) {
            let predicate = self.parse_expr()?;
            node = PlanNode::Filter { predicate, input: Box::new(node) };
        }

        node = PlanNode::Project { items, input: Box::new(node) };
        if distinct {
            node = PlanNode::Distinct { input: Box::new(node) };
        }
        Ok(node)
    }

    fn parse_select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while self.matches(TokenKind::Comma) {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.check(TokenKind::Star) {
            self.advance();
            return Ok(SelectItem { expr: Expr::Wildcard(None), alias: None });
        }
        if self.check(TokenKind::Ident)
            && self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::Period)
            && self.tokens.get(self.pos + 2).map(|t| t.kind) == Some(TokenKind::Star)
        {
            let qualifier = self.advance().text;
            self.advance();
            self.advance();
            return Ok(SelectItem { expr: Expr::Wildcard(Some(qualifier)), alias: None });
        }
        let expr = self.parse_expr()?;
        let alias = if self.matches(TokenKind::AS) {
            Some(self.expect_ident()?)
        } else if self.check(TokenKind::Ident) {
            Some(self.advance().text)
        } else {
            None
        };
        Ok(SelectItem { expr, alias })
    }

    fn parse_from_clause(&mut self) -> Result<PlanNode> {
        let mut node = self.parse_table_ref()?;
        loop {
            let kind = if self.matches(TokenKind::JOIN) {
                JoinKind::Inner
            } else if self.matches(TokenKind::INNER) {
                self.expect(TokenKind::JOIN)?;
                JoinKind::Inner
            } else if self.matches(TokenKind::LEFT) {
                self.matches(TokenKind::OUTER);
                self.expect(TokenKind::JOIN)?;
                JoinKind::Left
            } else if self.matches(TokenKind::RIGHT) {
                self.matches(TokenKind::OUTER);
                self.expect(TokenKind::JOIN)?;
                JoinKind::Right
            } else if self.matches(TokenKind::FULL) {
                self.matches(TokenKind::OUTER);
                self.expect(TokenKind::JOIN)?;
                JoinKind::Full
            } else if self.matches(TokenKind::Comma) {
                JoinKind::Inner
            } else {
                break;
            };
            let right = self.parse_table_ref()?;
            let predicate = if self.matches(TokenKind::ON) { Some(self.parse_expr()?) } else { None };
            node = PlanNode::Join { left: Box::new(node), right: Box::new(right), kind, predicate };
        }
        Ok(node)
    }

    fn parse_table_ref(&mut self) -> Result<PlanNode> {
        if self.matches(TokenKind::LParen) {
            let inner = self.parse_select_full()?;
            self.expect(TokenKind::RParen)?;
            let alias = if self.matches(TokenKind::AS) {
                self.expect_ident()?
            } else if self.check(TokenKind::Ident) {
                self.advance().text
            } else {
                return Err(self.unexpected("a derived table alias"));
            };
            return Ok(PlanNode::Subquery { input: Box::new(inner), alias });
        }
        let (database, name) = self.parse_qualified_name()?;
        let alias = if self.matches(TokenKind::AS) {
            Some(self.expect_ident()?)
        } else if self.check(TokenKind::Ident) {
            Some(self.advance().text)
        } else {
            None
        };
        Ok(PlanNode::UnresolvedTable { database, name, alias })
    }

    // ---- expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.matches(TokenKind::OR) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.matches(TokenKind::AND) {
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.matches(TokenKind::NOT) {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let expr = self.parse_additive()?;
        if self.matches(TokenKind::IS) {
            let negated = self.matches(TokenKind::NOT);
            self.expect(TokenKind::NULL)?;
            return Ok(Expr::IsNull { expr: Box::new(expr), negated });
        }
        let negated = self.matches(TokenKind::NOT);
        if self.matches(TokenKind::BETWEEN) {
            let low = self.parse_additive()?;
            self.expect(TokenKind::AND)?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between { expr: Box::new(expr), low: Box::new(low), high: Box::new(high), negated });
        }
        if self.matches(TokenKind::IN) {
            self.expect(TokenKind::LParen)?;
            if self.check(TokenKind::SELECT) {
                let subquery = self.parse_select_full()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Expr::InSubquery { expr: Box::new(expr), subquery: Box::new(subquery), negated });
            }
            let mut list = vec![self.parse_expr()?];
            while self.matches(TokenKind::Comma) {
                list.push(self.parse_expr()?);
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::InList { expr: Box::new(expr), list, negated });
        }
        if self.matches(TokenKind::LIKE) {
            let pattern = self.parse_additive()?;
            return Ok(Expr::Like { expr: Box::new(expr), pattern: Box::new(pattern), negated });
        }
        if negated {
            // consumed a NOT that wasn't followed by BETWEEN/IN/LIKE
            return Err(self.unexpected("BETWEEN, IN or LIKE after NOT"));
        }
        let op = match self.peek_kind() {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Lte => BinaryOp::Lte,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Gte => BinaryOp::Gte,
            _ => return Ok(expr),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(expr), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.matches(TokenKind::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.matches(TokenKind::Plus);
        self.parse_primary_expr()
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            TokenKind::Integer => {
                let text = self.advance().text;
                text.parse::<i64>().map(|v| Expr::Literal(Value::Int(v))).or_else(|_| {
                    text.parse::<u64>().map(|v| Expr::Literal(Value::UInt(v))).map_err(|_| Error::Syntax(format!("invalid integer '{}'", text)))
                })
            }
            TokenKind::Float => {
                let text = self.advance().text;
                let f: f64 = text.parse().map_err(|_| Error::Syntax(format!("invalid float '{}'", text)))?;
                Ok(Expr::Literal(Value::Float(f.into())))
            }
            TokenKind::QuotedString => {
                let text = self.advance().text;
                Ok(Expr::Literal(Value::Text(unquote(&text))))
            }
            TokenKind::TRUE => {
                self.advance();
                Ok(Expr::Literal(Value::Boolean(true)))
            }
            TokenKind::FALSE => {
                self.advance();
                Ok(Expr::Literal(Value::Boolean(false)))
            }
            TokenKind::NULL => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::LParen => {
                self.advance();
                if self.check(TokenKind::SELECT) {
                    let subquery = self.parse_select_full()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::ScalarSubquery(Box::new(subquery)));
                }
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::COUNT | TokenKind::SUM | TokenKind::MIN | TokenKind::MAX | TokenKind::AVG => self.parse_aggregate(),
            TokenKind::NOT => self.parse_not(),
            TokenKind::Minus | TokenKind::Plus => self.parse_unary(),
            TokenKind::Ident if self.check_exists() => self.parse_exists(),
            TokenKind::Ident | TokenKind::QuotedIdent => self.parse_column_ref(),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `EXISTS` isn't reserved in the lexer (it reads as a plain `Ident`),
    /// so it's recognized here by spelling rather than by token kind.
    fn check_exists(&self) -> bool {
        self.peek().text.eq_ignore_ascii_case("EXISTS")
    }

    fn parse_exists(&mut self) -> Result<Expr> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        let subquery = self.parse_select_full()?;
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Exists { subquery: Box::new(subquery), negated: false })
    }

    fn parse_aggregate(&mut self) -> Result<Expr> {
        use crate::ast::AggKind;
        let kind = match self.advance().kind {
            TokenKind::COUNT => AggKind::Count,
            TokenKind::SUM => AggKind::Sum,
            TokenKind::MIN => AggKind::Min,
            TokenKind::MAX => AggKind::Max,
            TokenKind::AVG => AggKind::Avg,
            _ => unreachable!(),
        };
        self.expect(TokenKind::LParen)?;
        let distinct = self.matches(TokenKind::DISTINCT);
        if kind == AggKind::Count && self.matches(TokenKind::Star) {
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::Aggregate { kind: AggKind::CountStar, arg: None, distinct });
        }
        let arg = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Aggregate { kind, arg: Some(Box::new(arg)), distinct })
    }

    fn parse_column_ref(&mut self) -> Result<Expr> {
        let first = self.expect_ident()?;
        if self.matches(TokenKind::Period) {
            let name = self.expect_ident()?;
            Ok(Expr::Column(crate::ast::ColumnRef::Unresolved { qualifier: Some(first), name }))
        } else {
            Ok(Expr::Column(crate::ast::ColumnRef::Unresolved { qualifier: None, name: first }))
        }
    }
}

fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let quote = text.chars().next().unwrap();
    inner.replace(&format!("{0}{0}", quote), &quote.to_string()).replace("\\'", "'").replace("\\\"", "\"")
}

fn collect_aggregates(items: &[SelectItem]) -> Vec<(crate::ast::AggKind, Option<Expr>, bool, String)> {
    let mut aggs = Vec::new();
    for item in items {
        collect_aggregates_in(&item.expr, &mut aggs);
    }
    aggs
}

fn collect_aggregates_in(expr: &Expr, out: &mut Vec<(crate::ast::AggKind, Option<Expr>, bool, String)>) {
    match expr {
        Expr::Aggregate { kind, arg, distinct } => {
            let name = format!("{:?}", kind).to_lowercase();
            out.push((*kind, arg.as_ref().map(|b| (**b).clone()), *distinct, name));
        }
        Expr::Unary(_, e) => collect_aggregates_in(e, out),
        Expr::Binary(_, l, r) => {
            collect_aggregates_in(l, out);
            collect_aggregates_in(r, out);
        }
        Expr::IsNull { expr, .. } => collect_aggregates_in(expr, out),
        Expr::Between { expr, low, high, .. } => {
            collect_aggregates_in(expr, out);
            collect_aggregates_in(low, out);
            collect_aggregates_in(high, out);
        }
        Expr::InList { expr, list, .. } => {
            collect_aggregates_in(expr, out);
            for e in list {
                collect_aggregates_in(e, out);
            }
        }
        Expr::Like { expr, pattern, .. } => {
            collect_aggregates_in(expr, out);
            collect_aggregates_in(pattern, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ColumnRef, JoinKind};

    #[test]
    fn parses_a_plain_select() {
        let node = parse("SELECT id, name FROM t WHERE id = 1").unwrap();
        match node {
            PlanNode::Project { items, input } => {
                assert_eq!(items.len(), 2);
                match *input {
                    PlanNode::Filter { input, .. } => match *input {
                        PlanNode::UnresolvedTable { name, .. } => assert_eq!(name, "t"),
                        other => panic!("expected UnresolvedTable, got {:?}", other),
                    },
                    other => panic!("expected Filter, got {:?}", other),
                }
            }
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn select_star_stays_unresolved_until_the_analyzer_expands_it() {
        let node = parse("SELECT * FROM t").unwrap();
        match node {
            PlanNode::Project { items, .. } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].expr, Expr::Wildcard(None));
            }
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn qualified_column_reference_keeps_its_qualifier() {
        let node = parse("SELECT t.id FROM t").unwrap();
        match node {
            PlanNode::Project { items, .. } => match &items[0].expr {
                Expr::Column(ColumnRef::Unresolved { qualifier, name }) => {
                    assert_eq!(qualifier.as_deref(), Some("t"));
                    assert_eq!(name, "id");
                }
                other => panic!("expected a column reference, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn parses_insert_values() {
        let node = parse("INSERT INTO t VALUES (1, 'alice'), (2, 'bob')").unwrap();
        match node {
            PlanNode::UnresolvedInsert { name, columns, source, .. } => {
                assert_eq!(name, "t");
                assert!(columns.is_empty());
                match *source {
                    PlanNode::Values { rows, .. } => assert_eq!(rows.len(), 2),
                    other => panic!("expected Values, got {:?}", other),
                }
            }
            other => panic!("expected UnresolvedInsert, got {:?}", other),
        }
    }

    #[test]
    fn parses_insert_select() {
        let node = parse("INSERT INTO t (id, name) SELECT id, name FROM u").unwrap();
        match node {
            PlanNode::UnresolvedInsert { columns, source, .. } => {
                assert_eq!(columns, vec!["id".to_string(), "name".to_string()]);
                assert!(matches!(*source, PlanNode::Project { .. }));
            }
            other => panic!("expected UnresolvedInsert, got {:?}", other),
        }
    }

    #[test]
    fn parses_update_with_multiple_assignments() {
        let node = parse("UPDATE t SET a = 1, b = 'x' WHERE id = 1").unwrap();
        match node {
            PlanNode::UnresolvedUpdate { assignments, filter, .. } => {
                assert_eq!(assignments.len(), 2);
                assert!(filter.is_some());
            }
            other => panic!("expected UnresolvedUpdate, got {:?}", other),
        }
    }

    #[test]
    fn parses_delete_without_where() {
        let node = parse("DELETE FROM t").unwrap();
        match node {
            PlanNode::UnresolvedDelete { filter, .. } => assert!(filter.is_none()),
            other => panic!("expected UnresolvedDelete, got {:?}", other),
        }
    }

    #[test]
    fn parses_create_table_with_explicit_primary_key() {
        let node = parse("CREATE TABLE t (id INT, name TEXT, PRIMARY KEY (id))").unwrap();
        match node {
            PlanNode::CreateTable { name, columns, .. } => {
                assert_eq!(name, "t");
                assert!(columns[0].primary_key);
                assert!(!columns[1].primary_key);
            }
            other => panic!("expected CreateTable, got {:?}", other),
        }
    }

    #[test]
    fn parses_create_and_drop_database() {
        assert!(matches!(parse("CREATE DATABASE d").unwrap(), PlanNode::CreateDatabase { name } if name == "d"));
        assert!(matches!(parse("DROP DATABASE d").unwrap(), PlanNode::DropDatabase { name, cascade } if name == "d" && !cascade));
    }

    #[test]
    fn drop_database_cascade_is_optional() {
        assert!(matches!(parse("DROP DATABASE d CASCADE").unwrap(), PlanNode::DropDatabase { name, cascade } if name == "d" && cascade));
    }

    #[test]
    fn parses_create_unique_index() {
        let node = parse("CREATE UNIQUE INDEX name_idx ON t (name)").unwrap();
        match node {
            PlanNode::CreateIndex { name, table, columns, unique, .. } => {
                assert_eq!(name, "name_idx");
                assert_eq!(table, "t");
                assert_eq!(columns, vec!["name".to_string()]);
                assert!(unique);
            }
            other => panic!("expected CreateIndex, got {:?}", other),
        }
    }

    #[test]
    fn parses_begin_commit_rollback() {
        assert!(matches!(parse("BEGIN").unwrap(), PlanNode::BeginTxn));
        assert!(matches!(parse("START TRANSACTION").unwrap(), PlanNode::BeginTxn));
        assert!(matches!(parse("COMMIT").unwrap(), PlanNode::Commit));
        assert!(matches!(parse("ROLLBACK").unwrap(), PlanNode::Rollback));
    }

    #[test]
    fn parses_use_and_show() {
        assert!(matches!(parse("USE d").unwrap(), PlanNode::Use { name } if name == "d"));
        assert!(matches!(parse("SHOW DATABASES").unwrap(), PlanNode::ShowDatabases));
        assert!(matches!(parse("SHOW TABLES").unwrap(), PlanNode::ShowTables));
    }

    #[test]
    fn parses_inner_and_outer_joins() {
        let node = parse("SELECT a.id FROM a JOIN b ON a.id = b.id").unwrap();
        let from = match node {
            PlanNode::Project { input, .. } => *input,
            other => panic!("expected Project, got {:?}", other),
        };
        match from {
            PlanNode::Join { kind, predicate, .. } => {
                assert_eq!(kind, JoinKind::Inner);
                assert!(predicate.is_some());
            }
            other => panic!("expected Join, got {:?}", other),
        }

        let node = parse("SELECT a.id FROM a LEFT JOIN b ON a.id = b.id").unwrap();
        let from = match node {
            PlanNode::Project { input, .. } => *input,
            other => panic!("expected Project, got {:?}", other),
        };
        assert!(matches!(from, PlanNode::Join { kind: JoinKind::Left, .. }));
    }

    #[test]
    fn parses_a_derived_table_with_alias() {
        let node = parse("SELECT x.id FROM (SELECT id FROM t) AS x").unwrap();
        let from = match node {
            PlanNode::Project { input, .. } => *input,
            other => panic!("expected Project, got {:?}", other),
        };
        match from {
            PlanNode::Subquery { alias, .. } => assert_eq!(alias, "x"),
            other => panic!("expected Subquery, got {:?}", other),
        }
    }

    /// End-to-end scenario 4: a three-way set-op chain with a trailing
    /// `ORDER BY`/`LIMIT` that binds to the whole chain, not just the last
    /// branch.
    #[test]
    fn order_by_and_limit_wrap_the_whole_set_op_chain() {
        let node = parse("SELECT 1 UNION SELECT 2 UNION ALL SELECT 1 ORDER BY 1 LIMIT 2").unwrap();
        match node {
            PlanNode::Limit { n, input } => {
                assert_eq!(n, 2);
                match *input {
                    PlanNode::Sort { input, .. } => match *input {
                        PlanNode::Union { inputs, distinct } => {
                            assert!(!distinct, "the outer UNION ALL makes the top node non-distinct");
                            assert_eq!(inputs.len(), 2);
                        }
                        other => panic!("expected Union, got {:?}", other),
                    },
                    other => panic!("expected Sort, got {:?}", other),
                }
            }
            other => panic!("expected Limit, got {:?}", other),
        }
    }

    #[test]
    fn limit_then_offset_nests_offset_inside_limit() {
        let node = parse("SELECT * FROM t LIMIT 10 OFFSET 5").unwrap();
        match node {
            PlanNode::Limit { n, input } => {
                assert_eq!(n, 10);
                assert!(matches!(*input, PlanNode::Offset { n: 5, .. }));
            }
            other => panic!("expected Limit, got {:?}", other),
        }
    }

    #[test]
    fn group_by_wraps_input_in_aggregate() {
        let node = parse("SELECT a, COUNT(*) FROM t GROUP BY a").unwrap();
        match node {
            PlanNode::Project { input, .. } => match *input {
                PlanNode::Aggregate { group_keys, aggs, .. } => {
                    assert_eq!(group_keys.len(), 1);
                    assert_eq!(aggs.len(), 1);
                }
                other => panic!("expected Aggregate, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn split_statements_separates_a_batch_on_semicolons() {
        let stmts = split_statements("SELECT 1; SELECT 2;").unwrap();
        assert_eq!(stmts, vec!["SELECT 1".to_string(), "SELECT 2".to_string()]);
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = parse("SELECT FROM").unwrap_err();
        match err {
            Error::Syntax(msg) => assert!(msg.contains("position")),
            other => panic!("expected Error::Syntax, got {:?}", other),
        }
    }

    #[test]
    fn trailing_garbage_after_a_statement_is_a_syntax_error() {
        assert!(parse("SELECT 1 SELECT 2").is_err());
    }
}

