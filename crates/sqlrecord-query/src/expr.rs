//! SQL expressions for query building.
//!
//! Conditions built by relation filtering, ON clauses synthesized for
//! `join_with`, and caller-supplied WHERE fragments are all `Expr` trees.
//! They render to SQL per [`Dialect`] and are evaluated directly by
//! in-memory data sources.

use crate::clause::{OrderBy, OrderDirection};
use serde::Serialize;
use sqlrecord_core::Value;

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are doubled.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }
}

/// A SQL expression that can be used in WHERE, HAVING, ON, etc.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value
    Literal(Value),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// Row-value membership: `(a, b) IN ((1, 2), (3, 4))`
    InTuple {
        columns: Vec<Expr>,
        rows: Vec<Vec<Value>>,
    },

    /// Array column shares at least one element with `values`
    ArrayOverlap { expr: Box<Expr>, values: Vec<Value> },

    /// JSON array column shares at least one element with `values`
    JsonOverlap { expr: Box<Expr>, values: Vec<Value> },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// Raw SQL (escape hatch; not evaluable by in-memory sources)
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// Constant truth value (`1 = 1` / `1 = 0`)
    Constant(bool),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a NULL literal.
    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// A condition no row satisfies.
    pub fn always_false() -> Self {
        Expr::Constant(false)
    }

    /// A condition every row satisfies.
    pub fn always_true() -> Self {
        Expr::Constant(true)
    }

    // ==================== Comparison Operators ====================

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Logical Operators ====================

    /// Logical AND. OR operands are parenthesized to keep precedence.
    pub fn and(self, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self.paren_if_or()),
            op: BinaryOp::And,
            right: Box::new(other.into().paren_if_or()),
        }
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self.paren()))
    }

    /// AND `other` onto an optional existing condition.
    pub fn conjoin(existing: Option<Expr>, other: Expr) -> Expr {
        match existing {
            Some(e) => e.and(other),
            None => other,
        }
    }

    fn paren_if_or(self) -> Self {
        match self {
            Expr::Binary {
                op: BinaryOp::Or, ..
            } => self.paren(),
            other => other,
        }
    }

    // ==================== Null Checks ====================

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    // ==================== Membership ====================

    /// IN list of values. An empty list matches nothing.
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::always_false();
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// NOT IN list of values. An empty list matches everything.
    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::always_true();
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// Composite membership `(c1, c2) IN ((v1, v2), ...)`.
    pub fn tuple_in(columns: Vec<Expr>, rows: Vec<Vec<Value>>) -> Self {
        if rows.is_empty() {
            return Expr::always_false();
        }
        Expr::InTuple { columns, rows }
    }

    /// Array column overlaps the given values.
    pub fn array_overlaps(self, values: Vec<Value>) -> Self {
        Expr::ArrayOverlap {
            expr: Box::new(self),
            values,
        }
    }

    /// JSON array column overlaps the given values.
    pub fn json_overlaps(self, values: Vec<Value>) -> Self {
        Expr::JsonOverlap {
            expr: Box::new(self),
            values,
        }
    }

    // ==================== Ordering ====================

    /// Create an ascending ORDER BY expression.
    pub fn asc(self) -> OrderBy {
        OrderBy {
            expr: self,
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending ORDER BY expression.
    pub fn desc(self) -> OrderBy {
        OrderBy {
            expr: self,
            direction: OrderDirection::Desc,
        }
    }

    // ==================== Utility ====================

    /// Wrap expression in parentheses.
    pub fn paren(self) -> Self {
        match self {
            Expr::Paren(_) => self,
            other => Expr::Paren(Box::new(other)),
        }
    }

    // ==================== SQL Generation ====================

    /// Build SQL string and collect parameters (default PostgreSQL dialect).
    pub fn build(&self, params: &mut Vec<Value>, offset: usize) -> String {
        self.build_with_dialect(Dialect::Postgres, params, offset)
    }

    /// Build SQL string with specific dialect.
    pub fn build_with_dialect(
        &self,
        dialect: Dialect,
        params: &mut Vec<Value>,
        offset: usize,
    ) -> String {
        match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!(
                        "{}.{}",
                        dialect.quote_identifier(t),
                        dialect.quote_identifier(name)
                    )
                } else {
                    dialect.quote_identifier(name)
                }
            }

            Expr::Literal(value) => bind(value.clone(), dialect, params, offset),

            Expr::Binary { left, op, right } => {
                let left_sql = left.build_with_dialect(dialect, params, offset);
                let right_sql = right.build_with_dialect(dialect, params, offset);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Not(expr) => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                format!("NOT {expr_sql}")
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let value_sqls: Vec<_> = values
                    .iter()
                    .map(|v| v.build_with_dialect(dialect, params, offset))
                    .collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::InTuple { columns, rows } => {
                let column_sqls: Vec<_> = columns
                    .iter()
                    .map(|c| c.build_with_dialect(dialect, params, offset))
                    .collect();
                let row_sqls: Vec<_> = rows
                    .iter()
                    .map(|row| {
                        let parts: Vec<_> = row
                            .iter()
                            .map(|v| bind(v.clone(), dialect, params, offset))
                            .collect();
                        format!("({})", parts.join(", "))
                    })
                    .collect();
                format!("({}) IN ({})", column_sqls.join(", "), row_sqls.join(", "))
            }

            Expr::ArrayOverlap { expr, values } => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                match dialect {
                    Dialect::Postgres => {
                        let parts: Vec<_> = values
                            .iter()
                            .map(|v| bind(v.clone(), dialect, params, offset))
                            .collect();
                        format!("{expr_sql} && ARRAY[{}]", parts.join(", "))
                    }
                    // Without native arrays the column is stored as a JSON array.
                    Dialect::Mysql | Dialect::Sqlite => {
                        json_overlap_sql(&expr_sql, values, dialect, params, offset)
                    }
                }
            }

            Expr::JsonOverlap { expr, values } => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                json_overlap_sql(&expr_sql, values, dialect, params, offset)
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => {
                let expr_sql = expr.build_with_dialect(dialect, params, offset);
                format!("({expr_sql})")
            }

            Expr::Constant(true) => "1 = 1".to_string(),
            Expr::Constant(false) => "1 = 0".to_string(),
        }
    }
}

fn bind(value: Value, dialect: Dialect, params: &mut Vec<Value>, offset: usize) -> String {
    params.push(value);
    dialect.placeholder(offset + params.len())
}

fn json_overlap_sql(
    expr_sql: &str,
    values: &[Value],
    dialect: Dialect,
    params: &mut Vec<Value>,
    offset: usize,
) -> String {
    let doc = Value::Json(serde_json::Value::Array(
        values.iter().map(Value::to_json).collect(),
    ));
    match dialect {
        Dialect::Postgres => {
            let p = bind(doc, dialect, params, offset);
            format!("{expr_sql}::jsonb ?| ARRAY(SELECT jsonb_array_elements_text({p}::jsonb))")
        }
        Dialect::Mysql => {
            let p = bind(doc, dialect, params, offset);
            format!("JSON_OVERLAPS({expr_sql}, {p})")
        }
        Dialect::Sqlite => {
            let parts: Vec<_> = values
                .iter()
                .map(|v| bind(v.clone(), dialect, params, offset))
                .collect();
            format!(
                "EXISTS (SELECT 1 FROM json_each({expr_sql}) WHERE json_each.value IN ({}))",
                parts.join(", ")
            )
        }
    }
}

// ==================== From Implementations ====================

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_qualified() {
        let expr = Expr::qualified("users", "name");
        let mut params = Vec::new();
        let sql = expr.build(&mut params, 0);
        assert_eq!(sql, "\"users\".\"name\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_eq_binds_parameter() {
        let expr = Expr::col("age").eq(18);
        let mut params = Vec::new();
        let sql = expr.build(&mut params, 0);
        assert_eq!(sql, "\"age\" = $1");
        assert_eq!(params[0], Value::Int(18));
    }

    #[test]
    fn test_and_parenthesizes_or() {
        let expr = Expr::col("a")
            .eq(1)
            .or(Expr::col("b").eq(2))
            .and(Expr::col("c").eq(3));
        let mut params = Vec::new();
        let sql = expr.build(&mut params, 0);
        assert_eq!(sql, "(\"a\" = $1 OR \"b\" = $2) AND \"c\" = $3");
    }

    #[test]
    fn test_in_list_and_empty_list() {
        let mut params = Vec::new();
        let sql = Expr::col("id")
            .in_list(vec![1_i64, 2, 3])
            .build(&mut params, 0);
        assert_eq!(sql, "\"id\" IN ($1, $2, $3)");
        assert_eq!(params.len(), 3);

        params.clear();
        let empty: Vec<i64> = vec![];
        assert_eq!(Expr::col("id").in_list(empty).build(&mut params, 0), "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_tuple_in() {
        let expr = Expr::tuple_in(
            vec![Expr::col("a"), Expr::col("b")],
            vec![
                vec![Value::Int(1), Value::Int(2)],
                vec![Value::Int(3), Value::Int(4)],
            ],
        );
        let mut params = Vec::new();
        let sql = expr.build_with_dialect(Dialect::Sqlite, &mut params, 0);
        assert_eq!(sql, "(\"a\", \"b\") IN ((?1, ?2), (?3, ?4))");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_array_overlap_per_dialect() {
        let expr = Expr::col("tags").array_overlaps(vec![Value::Int(1), Value::Int(2)]);

        let mut params = Vec::new();
        assert_eq!(
            expr.build_with_dialect(Dialect::Postgres, &mut params, 0),
            "\"tags\" && ARRAY[$1, $2]"
        );

        params.clear();
        assert_eq!(
            expr.build_with_dialect(Dialect::Mysql, &mut params, 0),
            "JSON_OVERLAPS(`tags`, ?)"
        );
        assert_eq!(params, vec![Value::Json(serde_json::json!([1, 2]))]);
    }

    #[test]
    fn test_json_overlap_sqlite() {
        let expr = Expr::col("ids").json_overlaps(vec![Value::BigInt(7)]);
        let mut params = Vec::new();
        assert_eq!(
            expr.build_with_dialect(Dialect::Sqlite, &mut params, 0),
            "EXISTS (SELECT 1 FROM json_each(\"ids\") WHERE json_each.value IN (?1))"
        );
    }

    #[test]
    fn test_placeholder_offset() {
        let mut params = vec![Value::Int(0)];
        let sql = Expr::col("x").eq(5).build(&mut params, 0);
        assert_eq!(sql, "\"x\" = $2");
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(Dialect::Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.quote_identifier("a`b"), "`a``b`");
    }
}
