//! Table references and alias resolution.
//!
//! `join_with` and relation filtering need to know which name a query's
//! rows are visible under in SQL: the bare table name when nothing else is
//! declared, the explicit alias otherwise.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use sqlrecord_core::{ConfigErrorKind, Error, Result};

use crate::query::ActiveQuery;

/// The FROM target of a query or JOIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TableRef {
    /// A named table with an optional alias
    Name { name: String, alias: Option<String> },
    /// A derived table (subquery SQL); only usable with an alias
    Expression { sql: String, alias: Option<String> },
}

/// `"table alias"`, where the alias may be written as `{{alias}}`.
const TABLE_ALIAS_PATTERN: &str = r"^(.*?)\s+(\{\{\w+\}\}|\w+)$";

fn table_alias_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(TABLE_ALIAS_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "invalid table alias pattern, aliases will not be parsed");
                None
            }
        })
        .as_ref()
}

impl TableRef {
    /// Parse a table declaration, splitting off a trailing alias.
    ///
    /// `"order o"` becomes table `order` aliased `o`; `"order"` stays
    /// unaliased.
    pub fn parse(declaration: &str) -> Self {
        let declaration = declaration.trim();
        if let Some(caps) = table_alias_regex().and_then(|re| re.captures(declaration)) {
            let name = caps.get(1).map_or("", |m| m.as_str()).trim();
            let alias = caps.get(2).map_or("", |m| m.as_str());
            if !name.is_empty() {
                return TableRef::Name {
                    name: name.to_string(),
                    alias: Some(strip_braces(alias).to_string()),
                };
            }
        }
        TableRef::Name {
            name: declaration.to_string(),
            alias: None,
        }
    }

    /// A named table with an explicit alias.
    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        TableRef::Name {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// A derived table.
    pub fn expression(sql: impl Into<String>, alias: Option<String>) -> Self {
        TableRef::Expression {
            sql: sql.into(),
            alias,
        }
    }

    /// The declared alias, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            TableRef::Name { alias, .. } | TableRef::Expression { alias, .. } => alias.as_deref(),
        }
    }

    /// The table name, or the SQL of a derived table.
    pub fn target(&self) -> &str {
        match self {
            TableRef::Name { name, .. } => name,
            TableRef::Expression { sql, .. } => sql,
        }
    }

    /// Table name and the alias rows are visible under.
    pub fn name_and_alias(&self) -> Result<(String, String)> {
        match self {
            TableRef::Name { name, alias } => {
                Ok((name.clone(), alias.clone().unwrap_or_else(|| name.clone())))
            }
            TableRef::Expression {
                sql,
                alias: Some(alias),
            } => Ok((sql.clone(), alias.clone())),
            TableRef::Expression { sql, alias: None } => Err(Error::config(
                ConfigErrorKind::UnresolvableAlias,
                format!("table expression `{sql}` must declare an alias"),
            )),
        }
    }
}

impl From<&str> for TableRef {
    fn from(s: &str) -> Self {
        TableRef::parse(s)
    }
}

impl From<String> for TableRef {
    fn from(s: String) -> Self {
        TableRef::parse(&s)
    }
}

fn strip_braces(alias: &str) -> &str {
    alias
        .strip_prefix("{{")
        .and_then(|a| a.strip_suffix("}}"))
        .unwrap_or(alias)
}

/// Resolves the `(table, alias)` pair of a query.
pub struct TableNameAndAliasResolver;

impl TableNameAndAliasResolver {
    /// Resolve the table name and alias for `query`.
    ///
    /// Without an explicit FROM the model's table is used under its own
    /// name. A derived table without an alias is a configuration error.
    pub fn resolve(query: &ActiveQuery) -> Result<(String, String)> {
        match query.get_from() {
            Some(from) => from.name_and_alias(),
            None => {
                let class = query.model_class().ok_or_else(|| {
                    Error::config(
                        ConfigErrorKind::UnresolvableAlias,
                        "query has neither a FROM clause nor a model class",
                    )
                })?;
                let table = class.table().to_string();
                Ok((table.clone(), table))
            }
        }
    }

    /// Just the alias.
    pub fn alias(query: &ActiveQuery) -> Result<String> {
        Self::resolve(query).map(|(_, alias)| alias)
    }
}
