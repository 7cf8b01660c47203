//! The boundary this crate implements in place of a real MySQL wire framer:
//! a [`ResultSet`] the handler produces per statement, plus a human-readable
//! table renderer for the CLI front end, analogous to the reference CLI's
//! own `show::Show` (which only ever rendered a rows-affected/elapsed-time
//! line — a full result set needs an actual table).

use std::fmt::Write as _;

use sql::types::Value;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    Rows { columns: Vec<String>, rows: Vec<Vec<Value>> },
    Ok { affected_rows: u64, last_insert_id: Option<i64>, info: String },
    Err { code: u16, sql_state: &'static str, message: String },
}

impl ResultSet {
    pub fn ok(affected_rows: u64, last_insert_id: Option<i64>, info: impl Into<String>) -> Self {
        ResultSet::Ok { affected_rows, last_insert_id, info: info.into() }
    }

    pub fn err(err: &Error) -> Self {
        let mysql_err = err.mysql_error();
        ResultSet::Err { code: mysql_err.code, sql_state: mysql_err.sql_state, message: err.to_string() }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, ResultSet::Err { .. })
    }

    /// Renders the result the way MySQL's own CLI would: a boxed table for
    /// rows, a one-line acknowledgement for OK, an `ERROR nnnn (state): msg`
    /// line for errors.
    pub fn render(&self) -> String {
        match self {
            ResultSet::Rows { columns, rows } => render_table(columns, rows),
            ResultSet::Ok { affected_rows, info, .. } => {
                if info.is_empty() {
                    format!("Query OK, {} row(s) affected", affected_rows)
                } else {
                    format!("Query OK, {} row(s) affected ({})", affected_rows, info)
                }
            }
            ResultSet::Err { code, sql_state, message } => format!("ERROR {} ({}): {}", code, sql_state, message),
        }
    }
}

fn render_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    if columns.is_empty() {
        return "Empty set".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    let cells: Vec<Vec<String>> =
        rows.iter().map(|row| row.iter().map(display_value).collect::<Vec<_>>()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    write_rule(&mut out, &widths);
    write_row(&mut out, columns, &widths);
    write_rule(&mut out, &widths);
    for row in &cells {
        write_row(&mut out, row, &widths);
    }
    write_rule(&mut out, &widths);
    let _ = write!(out, "{} row(s) in set", rows.len());
    out
}

fn display_value(v: &Value) -> String {
    if v.is_null() {
        "NULL".to_string()
    } else {
        v.to_string()
    }
}

fn write_rule(out: &mut String, widths: &[usize]) {
    out.push('+');
    for w in widths {
        out.push_str(&"-".repeat(w + 2));
        out.push('+');
    }
    out.push('\n');
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    out.push('|');
    for (cell, w) in cells.iter().zip(widths) {
        let _ = write!(out, " {:<width$} |", cell, width = w);
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_an_empty_result_as_empty_set() {
        let rs = ResultSet::Rows { columns: vec![], rows: vec![] };
        assert_eq!(rs.render(), "Empty set");
    }

    #[test]
    fn renders_ok_with_affected_rows() {
        let rs = ResultSet::ok(2, None, "");
        assert_eq!(rs.render(), "Query OK, 2 row(s) affected");
    }

    #[test]
    fn table_render_includes_header_and_rows() {
        let rs = ResultSet::Rows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec![Value::Int(1), Value::Text("alice".into())]],
        };
        let rendered = rs.render();
        assert!(rendered.contains("id"));
        assert!(rendered.contains("alice"));
        assert!(rendered.contains("1 row(s) in set"));
    }

    #[test]
    fn error_render_carries_mysql_code_and_state() {
        let err = Error::Sql(sql::error::Error::UnknownDatabase("d".into()));
        let rs = ResultSet::err(&err);
        assert_eq!(rs.render(), "ERROR 1049 (42000): unknown database 'd'");
    }
}
