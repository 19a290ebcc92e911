//! ORDER BY clause types.

use crate::expr::{Dialect, Expr};
use serde::Serialize;
use sqlrecord_core::Value;

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Create an ascending order by a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Expr::col(column).asc()
    }

    /// Create a descending order by a column.
    pub fn desc(column: impl Into<String>) -> Self {
        Expr::col(column).desc()
    }

    /// Generate SQL for this ORDER BY term.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        let mut sql = self.expr.build_with_dialect(dialect, params, offset);
        sql.push_str(match self.direction {
            OrderDirection::Asc => " ASC",
            OrderDirection::Desc => " DESC",
        });
        sql
    }
}
