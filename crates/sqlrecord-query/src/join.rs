//! JOIN clause types.

use crate::alias::TableRef;
use crate::expr::{Dialect, Expr};
use serde::Serialize;
use sqlrecord_core::Value;

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: TableRef,
    /// ON condition
    pub on: Option<Expr>,
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

impl Join {
    /// Create a join of the given type.
    pub fn new(join_type: JoinType, table: impl Into<TableRef>, on: Option<Expr>) -> Self {
        Self {
            join_type,
            table: table.into(),
            on,
        }
    }

    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<TableRef>, on: Expr) -> Self {
        Self::new(JoinType::Inner, table, Some(on))
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<TableRef>, on: Expr) -> Self {
        Self::new(JoinType::Left, table, Some(on))
    }

    /// Create a RIGHT JOIN.
    pub fn right(table: impl Into<TableRef>, on: Expr) -> Self {
        Self::new(JoinType::Right, table, Some(on))
    }

    /// Create a CROSS JOIN.
    pub fn cross(table: impl Into<TableRef>) -> Self {
        Self::new(JoinType::Cross, table, None)
    }

    /// Generate SQL for this join, appending bound parameters.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        let mut sql = format!(
            " {} {}",
            self.join_type.as_str(),
            table_sql(&self.table, dialect)
        );
        if let Some(on) = &self.on {
            let on_sql = on.build_with_dialect(dialect, params, offset);
            sql.push_str(&format!(" ON {on_sql}"));
        }
        sql
    }
}

/// Render a table reference for FROM / JOIN.
pub(crate) fn table_sql(table: &TableRef, dialect: Dialect) -> String {
    match table {
        TableRef::Name { name, alias } => {
            let mut sql = dialect.quote_identifier(name);
            if let Some(alias) = alias {
                sql.push(' ');
                sql.push_str(&dialect.quote_identifier(alias));
            }
            sql
        }
        TableRef::Expression { sql, alias } => match alias {
            Some(alias) => format!("({sql}) {}", dialect.quote_identifier(alias)),
            None => format!("({sql})"),
        },
    }
}
