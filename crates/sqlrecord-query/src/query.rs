//! The active query.
//!
//! [`ActiveQuery`] is both a SELECT builder and, when produced by a
//! relation factory, a relation descriptor: it carries the relation's
//! `link`, multiplicity, `via` step, `inverse_of` name and `index_by`
//! next to the ordinary WHERE/ORDER/JOIN state.
//!
//! A relation query bound to a primary model (see
//! [`ActiveQuery::primary_model`]) filters itself by that model when it
//! runs; this is how lazy loading works. Eager loading leaves the primary
//! model unset and lets the [`RelationPopulator`](crate::RelationPopulator)
//! filter by the whole owner set.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use sqlrecord_core::{ConfigErrorKind, Error, ModelKey, Result, Row, Value};

use crate::alias::{TableNameAndAliasResolver, TableRef};
use crate::bucket::index_records;
use crate::clause::OrderBy;
use crate::connection::SelectStatement;
use crate::eager::{self, WithSpec};
use crate::expr::Expr;
use crate::filter::ModelRelationFilter;
use crate::join::{Join, JoinType};
use crate::joins::{JoinWithSpec, JoinsWithBuilder};
use crate::junction::JunctionRowsFinder;
use crate::record::{ArrayRow, Model, Record, Related};
use crate::schema::ModelClass;
use crate::session::Session;

/// A function that customises a relation query.
#[derive(Clone)]
pub struct QueryCallback(Rc<dyn Fn(ActiveQuery) -> ActiveQuery>);

impl QueryCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ActiveQuery) -> ActiveQuery + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn apply(&self, query: ActiveQuery) -> ActiveQuery {
        (self.0)(query)
    }
}

impl fmt::Debug for QueryCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryCallback(..)")
    }
}

/// How related records are keyed in an indexed relation.
#[derive(Clone)]
pub enum IndexBy {
    /// Index by a column value
    Column(String),
    /// Index by a computed value
    Callback(Rc<dyn Fn(&Record) -> Value>),
}

impl IndexBy {
    /// The index key of `record`; NULL indexes under the empty string.
    pub fn key_for(&self, record: &Record) -> String {
        let value = match self {
            IndexBy::Column(column) => record.get(column),
            IndexBy::Callback(f) => f(record),
        };
        value.key_string().unwrap_or_default()
    }
}

impl fmt::Debug for IndexBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBy::Column(column) => f.debug_tuple("Column").field(column).finish(),
            IndexBy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// The indirection step of a relation.
#[derive(Clone, Debug, Default)]
pub enum Via {
    /// Direct link
    #[default]
    None,
    /// Through a junction table
    Junction(Box<ActiveQuery>),
    /// Through another relation of the owner, by name
    Intermediate(String, Box<ActiveQuery>),
}

impl Via {
    /// The via step's query, if any.
    pub fn query(&self) -> Option<&ActiveQuery> {
        match self {
            Via::None => None,
            Via::Junction(query) | Via::Intermediate(_, query) => Some(query),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Via::None)
    }
}

/// A SELECT over a model class, optionally describing a relation.
#[derive(Clone, Debug, Default)]
pub struct ActiveQuery {
    pub(crate) model: Option<Rc<ModelClass>>,
    pub(crate) from: Option<TableRef>,
    pub(crate) select: Vec<String>,
    pub(crate) condition: Option<Expr>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) group_by: Vec<String>,
    pub(crate) having: Option<Expr>,
    pub(crate) unions: Vec<ActiveQuery>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) joins: Vec<Join>,
    pub(crate) join_with: Vec<JoinWithSpec>,
    pub(crate) with: Vec<WithSpec>,
    pub(crate) as_array: bool,
    pub(crate) index_by: Option<IndexBy>,
    pub(crate) emulate_execution: bool,
    // relation state
    pub(crate) primary_model: Option<Record>,
    pub(crate) link: IndexMap<String, String>,
    pub(crate) multiple: bool,
    pub(crate) via: Via,
    pub(crate) inverse_of: Option<String>,
    pub(crate) on: Option<Expr>,
}

impl ActiveQuery {
    /// A query over `class`'s table.
    pub fn new(class: Rc<ModelClass>) -> Self {
        Self {
            model: Some(class),
            ..Self::default()
        }
    }

    /// A query over a bare table; results are plain rows.
    pub fn from_table(table: impl Into<TableRef>) -> Self {
        Self {
            from: Some(table.into()),
            ..Self::default()
        }
    }

    // ==================== Query Builder ====================

    /// Set the FROM clause. `"table alias"` declarations are parsed.
    pub fn from(mut self, table: impl Into<TableRef>) -> Self {
        self.from = Some(table.into());
        self
    }

    /// Alias the query's table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.from = match self.from.take() {
            Some(TableRef::Expression { sql, .. }) => Some(TableRef::Expression {
                sql,
                alias: Some(alias),
            }),
            Some(TableRef::Name { name, .. }) => Some(TableRef::aliased(name, alias)),
            None => self
                .model
                .as_ref()
                .map(|class| TableRef::aliased(class.table(), alias)),
        };
        self
    }

    /// Select specific columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|&c| c.to_string()).collect();
        self
    }

    /// Replace the WHERE condition.
    pub fn where_(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// AND a condition onto WHERE.
    pub fn and_where(mut self, condition: Expr) -> Self {
        self.add_condition(condition);
        self
    }

    /// OR a condition onto WHERE.
    pub fn or_where(mut self, condition: Expr) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.or(condition),
            None => condition,
        });
        self
    }

    pub(crate) fn add_condition(&mut self, condition: Expr) {
        self.condition = Some(Expr::conjoin(self.condition.take(), condition));
    }

    /// Replace ORDER BY.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = vec![order];
        self
    }

    /// Append to ORDER BY.
    pub fn add_order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Add a JOIN clause.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn inner_join(self, table: impl Into<TableRef>, on: Expr) -> Self {
        self.join(Join::inner(table, on))
    }

    pub fn left_join(self, table: impl Into<TableRef>, on: Expr) -> Self {
        self.join(Join::left(table, on))
    }

    /// Add GROUP BY columns.
    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|&c| c.to_string()));
        self
    }

    /// AND a HAVING condition.
    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(Expr::conjoin(self.having.take(), condition));
        self
    }

    pub fn union(mut self, query: ActiveQuery) -> Self {
        self.unions.push(query);
        self
    }

    /// Return plain rows instead of model instances.
    pub fn as_array(mut self) -> Self {
        self.as_array = true;
        self
    }

    /// Key to-many results by a column.
    pub fn index_by(mut self, column: impl Into<String>) -> Self {
        self.index_by = Some(IndexBy::Column(column.into()));
        self
    }

    /// Key to-many results by a computed value.
    pub fn index_by_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> Value + 'static,
    {
        self.index_by = Some(IndexBy::Callback(Rc::new(f)));
        self
    }

    /// Mark the query as known to return nothing.
    pub fn emulate_execution(mut self) -> Self {
        self.emulate_execution = true;
        self
    }

    // ==================== Eager Loading ====================

    /// Eager-load relations; dotted names load nested relations.
    pub fn with<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with.extend(names.into_iter().map(WithSpec::new));
        self
    }

    /// Eager-load a relation, customising its query.
    pub fn with_callback<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(ActiveQuery) -> ActiveQuery + 'static,
    {
        self.with
            .push(WithSpec::with_callback(name, QueryCallback::new(callback)));
        self
    }

    /// Join relations (INNER JOIN) and eager-load them.
    pub fn join_with<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_with_spec(JoinWithSpec::new(names))
    }

    /// Join one relation, customising its query.
    pub fn join_with_callback<F>(self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(ActiveQuery) -> ActiveQuery + 'static,
    {
        self.join_with_spec(JoinWithSpec::with_callback(name, QueryCallback::new(callback)))
    }

    pub fn inner_join_with<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_with_spec(JoinWithSpec::new(names).join_type(JoinType::Inner))
    }

    pub fn left_join_with<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_with_spec(JoinWithSpec::new(names).join_type(JoinType::Left))
    }

    pub fn join_with_spec(mut self, spec: JoinWithSpec) -> Self {
        self.join_with.push(spec);
        self
    }

    // ==================== Relation Descriptor ====================

    /// Set the link: related column -> owner property.
    pub fn link<I, K, V>(mut self, link: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.link = link
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    /// Reach the related records through another relation of the owner.
    pub fn via(mut self, name: impl Into<String>, query: ActiveQuery) -> Self {
        self.via = Via::Intermediate(name.into(), Box::new(query));
        self
    }

    /// Reach the related records through a junction table.
    ///
    /// `link` maps junction columns to owner properties.
    pub fn via_table<I, K, V>(self, table: impl Into<TableRef>, link: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.via_table_with(table, link, |junction| junction)
    }

    /// Like [`via_table`](Self::via_table), customising the junction query.
    pub fn via_table_with<I, K, V, F>(mut self, table: impl Into<TableRef>, link: I, callback: F) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        F: FnOnce(ActiveQuery) -> ActiveQuery,
    {
        let junction = ActiveQuery::from_table(table)
            .link(link)
            .multiple(true)
            .as_array();
        self.via = Via::Junction(Box::new(callback(junction)));
        self
    }

    /// Name of the reciprocal relation on the related class.
    pub fn inverse_of(mut self, name: impl Into<String>) -> Self {
        self.inverse_of = Some(name.into());
        self
    }

    /// Extra ON condition used when the relation is joined.
    pub fn on(mut self, condition: Expr) -> Self {
        self.on = Some(Expr::conjoin(self.on.take(), condition));
        self
    }

    /// Bind the query to the record it is loaded for.
    pub fn primary_model(mut self, record: Record) -> Self {
        self.primary_model = Some(record);
        self
    }

    // ==================== Accessors ====================

    pub fn get_link(&self) -> &IndexMap<String, String> {
        &self.link
    }

    pub fn get_via(&self) -> &Via {
        &self.via
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    pub fn get_index_by(&self) -> Option<&IndexBy> {
        self.index_by.as_ref()
    }

    pub fn get_inverse_of(&self) -> Option<&str> {
        self.inverse_of.as_deref()
    }

    pub fn get_from(&self) -> Option<&TableRef> {
        self.from.as_ref()
    }

    pub fn model_class(&self) -> Option<&Rc<ModelClass>> {
        self.model.as_ref()
    }

    pub fn get_primary_model(&self) -> Option<&Record> {
        self.primary_model.as_ref()
    }

    pub fn get_joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn get_condition(&self) -> Option<&Expr> {
        self.condition.as_ref()
    }

    pub fn get_order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn get_with(&self) -> &[WithSpec] {
        &self.with
    }

    pub fn get_on(&self) -> Option<&Expr> {
        self.on.as_ref()
    }

    pub fn is_as_array(&self) -> bool {
        self.as_array
    }

    pub fn is_emulated(&self) -> bool {
        self.emulate_execution
    }

    // ==================== Execution ====================

    /// Filter this query by `owners` under its link.
    pub fn filter_by_models(&mut self, owners: &[Record]) -> Result<()> {
        ModelRelationFilter::new(self).apply(owners)
    }

    /// Resolve `join_with` and, for a bound relation, the owner filter.
    pub fn prepare(&self, session: &Session) -> Result<ActiveQuery> {
        let mut query = self.clone();
        if !query.join_with.is_empty() {
            JoinsWithBuilder::new(session.schema()).build(&mut query)?;
        }
        if query.select.is_empty() && !query.joins.is_empty() {
            // joined columns must not shadow the primary row's
            let alias = TableNameAndAliasResolver::alias(&query)?;
            query.select = vec![format!("{alias}.*")];
        }
        if let Some(primary) = query.primary_model.clone() {
            query.filter_by_primary_model(session, &primary)?;
        }
        Ok(query)
    }

    fn filter_by_primary_model(&mut self, session: &Session, primary: &Record) -> Result<()> {
        let owners = match self.via.clone() {
            Via::None => vec![primary.clone()],
            Via::Junction(junction) => {
                JunctionRowsFinder::new(session).find(&junction, std::slice::from_ref(primary))?
            }
            Via::Intermediate(name, via) => {
                let related = match primary.relation(&name) {
                    Some(related) => related,
                    None => {
                        let via = (*via).primary_model(primary.clone());
                        let related = via.find_for(session, &name)?;
                        primary.set_relation(&name, related.clone());
                        related
                    }
                };
                related.records()
            }
        };
        self.filter_by_models(&owners)
    }

    /// The statement this query would hand to the data source.
    pub fn statement(&self, session: &Session) -> Result<SelectStatement> {
        self.prepare(session)?.to_statement()
    }

    pub(crate) fn to_statement(&self) -> Result<SelectStatement> {
        let mut statement = SelectStatement::new(self.table_ref()?);
        statement.columns.clone_from(&self.select);
        statement.condition.clone_from(&self.condition);
        statement.joins.clone_from(&self.joins);
        statement.order_by.clone_from(&self.order_by);
        statement.group_by.clone_from(&self.group_by);
        statement.having.clone_from(&self.having);
        statement.limit = self.limit;
        statement.offset = self.offset;
        statement.unions = self
            .unions
            .iter()
            .map(ActiveQuery::to_statement)
            .collect::<Result<_>>()?;
        Ok(statement)
    }

    fn table_ref(&self) -> Result<TableRef> {
        if let Some(from) = &self.from {
            return Ok(from.clone());
        }
        self.model
            .as_ref()
            .map(|class| TableRef::Name {
                name: class.table().to_string(),
                alias: None,
            })
            .ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnresolvableAlias,
                    "query has neither a FROM clause nor a model class",
                )
            })
    }

    fn skips_execution(&self, session: &Session) -> bool {
        self.emulate_execution && session.config().honor_emulation
    }

    /// Execute and return every record.
    #[tracing::instrument(level = "debug", skip(self, session))]
    pub fn all(&self, session: &Session) -> Result<Vec<Record>> {
        let query = self.prepare(session)?;
        if query.skips_execution(session) {
            tracing::trace!("Emulated execution, data source not queried");
            return Ok(Vec::new());
        }
        let rows = session.query(&query.to_statement()?)?;
        query.populate(session, &rows)
    }

    /// Execute and return the first record.
    #[tracing::instrument(level = "debug", skip(self, session))]
    pub fn one(&self, session: &Session) -> Result<Option<Record>> {
        let mut query = self.prepare(session)?;
        if query.skips_execution(session) {
            tracing::trace!("Emulated execution, data source not queried");
            return Ok(None);
        }
        query.limit.get_or_insert(1);
        let rows = session.query(&query.to_statement()?)?;
        let first = rows.into_iter().take(1).collect::<Vec<_>>();
        Ok(query.populate(session, &first)?.into_iter().next())
    }

    /// Count matching rows.
    pub fn count(&self, session: &Session) -> Result<u64> {
        let query = self.prepare(session)?;
        if query.skips_execution(session) {
            return Ok(0);
        }
        session.count(&query.to_statement()?)
    }

    pub fn exists(&self, session: &Session) -> Result<bool> {
        Ok(self.count(session)? > 0)
    }

    /// Run a bound relation query and shape the result by multiplicity.
    pub fn find_for(&self, session: &Session, name: &str) -> Result<Related> {
        tracing::debug!(relation = name, multiple = self.multiple, "Loading relation");
        if !self.multiple {
            return Ok(Related::One(self.one(session)?));
        }
        let records = self.all(session)?;
        Ok(match &self.index_by {
            Some(index_by) => Related::Indexed(index_records(&records, index_by)),
            None => Related::Many(records),
        })
    }

    /// Turn result rows into records, then eager-load and back-link them.
    pub(crate) fn populate(&self, session: &Session, rows: &[Row]) -> Result<Vec<Record>> {
        let mut records = self.create_records(rows);
        if !self.joins.is_empty() && self.index_by.is_none() {
            records = self.remove_duplicates(records);
        }
        if !self.with.is_empty() && !records.is_empty() {
            let class = self.model.as_ref().ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownModel,
                    "eager loading requires a query over a model class",
                )
            })?;
            eager::find_with(session, class, &self.with, &records, self.as_array)?;
        }
        if self.inverse_of.is_some() && self.primary_model.is_some() {
            self.add_inverse_relations(session, &records)?;
        }
        Ok(records)
    }

    fn create_records(&self, rows: &[Row]) -> Vec<Record> {
        match &self.model {
            Some(class) if !self.as_array => rows
                .iter()
                .map(|row| Record::Model(Model::from_row(Rc::clone(class), row)))
                .collect(),
            _ => rows
                .iter()
                .map(|row| Record::Array(ArrayRow::from_row(row)))
                .collect(),
        }
    }

    /// Joined to-many relations repeat the primary row; keep the first.
    fn remove_duplicates(&self, records: Vec<Record>) -> Vec<Record> {
        let Some(class) = &self.model else {
            return records;
        };
        let mut seen: HashSet<ModelKey> = HashSet::new();
        records
            .into_iter()
            .filter(|record| match record.key(class.primary_key()) {
                Some(key) => seen.insert(key),
                None => true,
            })
            .collect()
    }

    /// Point each lazily-loaded record back at the primary model.
    fn add_inverse_relations(&self, session: &Session, records: &[Record]) -> Result<()> {
        let (Some(inverse), Some(primary), Some(class)) =
            (&self.inverse_of, &self.primary_model, &self.model)
        else {
            return Ok(());
        };
        if records.is_empty() {
            return Ok(());
        }
        let inverse_query = class.relation_query(session.schema(), None, inverse)?;
        let value = if inverse_query.is_multiple() {
            Related::Many(vec![primary.clone()])
        } else {
            Related::One(Some(primary.clone()))
        };
        for record in records {
            record.set_relation(inverse, value.clone());
        }
        Ok(())
    }
}
