//! The data source seam.
//!
//! Queries never hand raw SQL to a data source: they build a structured
//! [`SelectStatement`] and the [`Connection`] decides how to execute it.
//! Drivers render it with [`SelectStatement::to_sql`]; in-memory sources
//! evaluate the condition tree directly.

use sqlrecord_core::{Result, Row, Value};

use crate::alias::TableRef;
use crate::clause::OrderBy;
use crate::expr::{Dialect, Expr};
use crate::join::{Join, table_sql};

/// A data source that can answer SELECT statements.
pub trait Connection {
    /// Execute a statement and return its rows.
    fn query(&self, statement: &SelectStatement) -> Result<Vec<Row>>;

    /// Count the rows a statement would return.
    fn count(&self, statement: &SelectStatement) -> Result<u64>;

    /// SQL dialect used to render statements for this source.
    fn dialect(&self) -> Dialect {
        Dialect::default()
    }
}

/// A fully-resolved SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: TableRef,
    /// Selected columns; empty selects `*`
    pub columns: Vec<String>,
    pub condition: Option<Expr>,
    pub joins: Vec<Join>,
    pub order_by: Vec<OrderBy>,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub unions: Vec<SelectStatement>,
}

impl SelectStatement {
    /// A `SELECT *` over one table.
    pub fn new(table: impl Into<TableRef>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            condition: None,
            joins: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            having: None,
            limit: None,
            offset: None,
            unions: Vec::new(),
        }
    }

    /// Render SQL and collect bound parameters.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build(dialect, &mut params);
        (sql, params)
    }

    fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| column_sql(c, dialect))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {}", table_sql(&self.table, dialect));

        for join in &self.joins {
            sql.push_str(&join.build_with_dialect(dialect, params, 0));
        }

        if let Some(condition) = &self.condition {
            let cond_sql = condition.build_with_dialect(dialect, params, 0);
            sql.push_str(&format!(" WHERE {cond_sql}"));
        }

        if !self.group_by.is_empty() {
            let cols: Vec<_> = self
                .group_by
                .iter()
                .map(|c| column_sql(c, dialect))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", cols.join(", ")));
        }

        if let Some(having) = &self.having {
            let having_sql = having.build_with_dialect(dialect, params, 0);
            sql.push_str(&format!(" HAVING {having_sql}"));
        }

        if !self.order_by.is_empty() {
            let terms: Vec<_> = self
                .order_by
                .iter()
                .map(|o| o.build_with_dialect(dialect, params, 0))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        for union in &self.unions {
            let union_sql = union.build(dialect, params);
            sql.push_str(&format!(" UNION ({union_sql})"));
        }

        sql
    }
}

/// Quote a selected column; `t.*` keeps its star bare.
fn column_sql(column: &str, dialect: Dialect) -> String {
    let quote_part = |part: &str| match part {
        "*" => "*".to_string(),
        _ => dialect.quote_identifier(part),
    };
    match column.rsplit_once('.') {
        Some((qualifier, name)) => format!("{}.{}", dialect.quote_identifier(qualifier), quote_part(name)),
        None => quote_part(column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_renders_all_clauses() {
        let mut stmt = SelectStatement::new("order o");
        stmt.condition = Some(Expr::qualified("o", "customer_id").in_list(vec![1_i64, 2]));
        stmt.joins.push(Join::inner(
            "customer",
            Expr::qualified("customer", "id").eq(Expr::qualified("o", "customer_id")),
        ));
        stmt.order_by.push(OrderBy::desc("id"));
        stmt.limit = Some(10);
        stmt.offset = Some(5);

        let (sql, params) = stmt.to_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT * FROM \"order\" \"o\" INNER JOIN \"customer\" ON \"customer\".\"id\" = \"o\".\"customer_id\" \
             WHERE \"o\".\"customer_id\" IN (?1, ?2) ORDER BY \"id\" DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(params, vec![Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn test_select_columns_and_group_by() {
        let mut stmt = SelectStatement::new("item");
        stmt.columns = vec!["category".into()];
        stmt.group_by = vec!["category".into()];
        let (sql, _) = stmt.to_sql(Dialect::Mysql);
        assert_eq!(sql, "SELECT `category` FROM `item` GROUP BY `category`");
    }

    #[test]
    fn test_select_qualified_columns() {
        let mut stmt = SelectStatement::new("order o");
        stmt.columns = vec!["o.*".into(), "o.id".into()];
        let (sql, _) = stmt.to_sql(Dialect::Postgres);
        assert_eq!(sql, "SELECT \"o\".*, \"o\".\"id\" FROM \"order\" \"o\"");
    }
}
