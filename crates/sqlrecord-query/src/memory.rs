//! An in-memory [`Connection`].
//!
//! Tables are plain lists of rows. Statements are answered by evaluating
//! the condition tree against each row with SQL's three-valued logic, so
//! NULL never matches `=` or `IN`. Every statement served is logged as
//! rendered SQL, which lets tests count round trips.
//!
//! Joins, grouping, unions, derived tables and raw SQL fragments are not
//! evaluated; statements using them fail with
//! [`QueryErrorKind::Unsupported`].

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use sqlrecord_core::{Error, QueryErrorKind, Result, Row, Value};

use crate::alias::TableRef;
use crate::clause::OrderDirection;
use crate::connection::{Connection, SelectStatement};
use crate::expr::{BinaryOp, Dialect, Expr};

#[derive(Debug, Default)]
struct MemoryState {
    tables: IndexMap<String, Vec<Row>>,
    executed: Vec<String>,
}

/// Tables of rows held in memory.
///
/// Clones share the same tables and statement log.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    state: Rc<RefCell<MemoryState>>,
    dialect: Dialect,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table.
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.state.borrow_mut().tables.insert(name.into(), rows);
        self
    }

    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Append a row, creating the table if needed.
    pub fn insert(&self, table: &str, row: Row) {
        self.state
            .borrow_mut()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// SQL of every statement served, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    pub fn query_count(&self) -> usize {
        self.state.borrow().executed.len()
    }

    pub fn reset_log(&self) {
        self.state.borrow_mut().executed.clear();
    }

    fn log(&self, statement: &SelectStatement) {
        let (sql, _) = statement.to_sql(self.dialect);
        tracing::debug!(sql = %sql, "Memory connection serving statement");
        self.state.borrow_mut().executed.push(sql);
    }

    /// Rows of the statement's table that satisfy its condition.
    fn matching_rows(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        check_supported(statement)?;
        let table = match &statement.table {
            TableRef::Name { name, .. } => name,
            TableRef::Expression { .. } => {
                return Err(unsupported("derived tables are not supported in memory"));
            }
        };
        let state = self.state.borrow();
        let rows = state.tables.get(table).ok_or_else(|| {
            Error::query(
                QueryErrorKind::Database,
                format!("no such table: {table}"),
            )
        })?;

        let mut matched = Vec::new();
        for row in rows {
            let keep = match &statement.condition {
                Some(condition) => truth(condition, row)? == Some(true),
                None => true,
            };
            if keep {
                matched.push(row.clone());
            }
        }
        Ok(matched)
    }
}

impl Connection for MemoryConnection {
    fn query(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        self.log(statement);
        let mut rows = self.matching_rows(statement)?;

        if !statement.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let keys = statement
                    .order_by
                    .iter()
                    .map(|order| value_of(&order.expr, &row))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                statement
                    .order_by
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(order, (x, y))| match order.direction {
                        OrderDirection::Asc => x.loose_cmp(y),
                        OrderDirection::Desc => y.loose_cmp(x),
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let offset = usize::try_from(statement.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = statement
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let rows = rows.into_iter().skip(offset).take(limit);

        if statement.columns.is_empty() {
            return Ok(rows.collect());
        }
        rows.map(|row| project(&row, &statement.columns)).collect()
    }

    fn count(&self, statement: &SelectStatement) -> Result<u64> {
        self.log(statement);
        let rows = self.matching_rows(statement)?;
        Ok(rows.len() as u64)
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

fn unsupported(message: &str) -> Error {
    Error::query(QueryErrorKind::Unsupported, message)
}

fn check_supported(statement: &SelectStatement) -> Result<()> {
    if !statement.joins.is_empty() {
        return Err(unsupported("joins are not supported in memory"));
    }
    if !statement.group_by.is_empty() || statement.having.is_some() {
        return Err(unsupported("grouping is not supported in memory"));
    }
    if !statement.unions.is_empty() {
        return Err(unsupported("unions are not supported in memory"));
    }
    Ok(())
}

/// Strip a table qualifier: `o.id` -> `id`.
fn bare_column(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

fn project(row: &Row, columns: &[String]) -> Result<Row> {
    let mut pairs = Vec::with_capacity(columns.len());
    for column in columns {
        let name = bare_column(column);
        if name == "*" {
            pairs.extend(row.iter().map(|(n, v)| (n.to_string(), v.clone())));
            continue;
        }
        let value = row.get_by_name(name).cloned().ok_or_else(|| {
            Error::query(QueryErrorKind::NotFound, format!("no such column: {column}"))
        })?;
        pairs.push((name.to_string(), value));
    }
    Ok(Row::from_pairs(pairs))
}

fn value_of(expr: &Expr, row: &Row) -> Result<Value> {
    match expr {
        Expr::Column { name, .. } => row.get_by_name(name).cloned().ok_or_else(|| {
            Error::query(QueryErrorKind::NotFound, format!("no such column: {name}"))
        }),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Paren(inner) => value_of(inner, row),
        other => Ok(match truth(other, row)? {
            Some(b) => Value::Bool(b),
            None => Value::Null,
        }),
    }
}

/// Evaluate a condition; `None` is SQL's UNKNOWN.
fn truth(expr: &Expr, row: &Row) -> Result<Option<bool>> {
    Ok(match expr {
        Expr::Constant(b) => Some(*b),
        Expr::Paren(inner) => truth(inner, row)?,
        Expr::Not(inner) => truth(inner, row)?.map(|b| !b),
        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => match (truth(left, row)?, truth(right, row)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BinaryOp::Or => match (truth(left, row)?, truth(right, row)?) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            _ => compare(*op, &value_of(left, row)?, &value_of(right, row)?),
        },
        Expr::IsNull { expr, negated } => Some(value_of(expr, row)?.is_null() != *negated),
        Expr::In {
            expr,
            values,
            negated,
        } => {
            let needle = value_of(expr, row)?;
            let candidates = values
                .iter()
                .map(|v| value_of(v, row))
                .collect::<Result<Vec<_>>>()?;
            membership(&needle, &candidates).map(|found| found != *negated)
        }
        Expr::InTuple { columns, rows } => {
            let values = columns
                .iter()
                .map(|c| value_of(c, row))
                .collect::<Result<Vec<_>>>()?;
            if values.iter().any(Value::is_null) {
                None
            } else {
                Some(rows.iter().any(|candidate| {
                    candidate.len() == values.len()
                        && candidate.iter().zip(&values).all(|(a, b)| a.loose_eq(b))
                }))
            }
        }
        Expr::ArrayOverlap { expr, values } | Expr::JsonOverlap { expr, values } => {
            let column = value_of(expr, row)?;
            if column.is_null() {
                None
            } else {
                let elements = array_elements(&column);
                Some(
                    elements
                        .iter()
                        .any(|element| values.iter().any(|v| element.loose_eq(v))),
                )
            }
        }
        Expr::Literal(value) => {
            if value.is_null() {
                None
            } else {
                value.as_bool()
            }
        }
        Expr::Column { .. } => value_of(expr, row)?.as_bool(),
        Expr::Raw(sql) => {
            return Err(unsupported(&format!(
                "raw SQL cannot be evaluated in memory: {sql}"
            )));
        }
    })
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    let ordering = left.loose_cmp(right);
    Some(match op {
        BinaryOp::Eq => left.loose_eq(right),
        BinaryOp::Ne => !left.loose_eq(right),
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        BinaryOp::And | BinaryOp::Or => return None,
    })
}

fn membership(needle: &Value, candidates: &[Value]) -> Option<bool> {
    if needle.is_null() {
        return None;
    }
    if candidates.iter().any(|c| needle.loose_eq(c)) {
        Some(true)
    } else if candidates.iter().any(Value::is_null) {
        None
    } else {
        Some(false)
    }
}

/// Elements of an array or JSON array value; JSON text is parsed.
fn array_elements(value: &Value) -> Vec<Value> {
    if let Some(elements) = value.elements() {
        return elements;
    }
    match value {
        Value::Text(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => Value::from_json(json).elements().unwrap_or_default(),
            Err(_) => Vec::new(),
        },
        _ => Vec::new(),
    }
}
