//! Model classes and the schema registry.
//!
//! A [`ModelClass`] is the runtime description of one model type: its
//! table, primary key, column types and relation factories. Relations are
//! registered as factories rather than values because every access must
//! produce a fresh [`ActiveQuery`] the caller can keep refining.
//!
//! # Example
//!
//! ```ignore
//! let schema = Schema::new()
//!     .register(
//!         ModelClass::new("Customer", "customer")
//!             .column("id", SqlType::BigInt)
//!             .relation("orders", |ctx| {
//!                 Ok(ctx.has_many("Order", [("customer_id", "id")])?.inverse_of("customer"))
//!             }),
//!     );
//! ```

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use sqlrecord_core::{ConfigErrorKind, Error, Result, SqlType};

use crate::query::ActiveQuery;
use crate::record::{Model, Record};

/// Builds the relation query for one relation name.
pub type RelationFactory = Rc<dyn Fn(&RelationContext<'_>) -> Result<ActiveQuery>>;

/// Runtime description of a model type.
pub struct ModelClass {
    name: String,
    table: String,
    primary_key: Vec<String>,
    columns: IndexMap<String, SqlType>,
    relations: IndexMap<String, RelationFactory>,
}

/// Builder for [`ModelClass`].
pub struct ModelClassBuilder {
    class: ModelClass,
}

impl ModelClass {
    /// Start describing a model stored in `table`.
    ///
    /// The primary key defaults to a single `id` column.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> ModelClassBuilder {
        ModelClassBuilder {
            class: ModelClass {
                name: name.into(),
                table: table.into(),
                primary_key: vec!["id".to_string()],
                columns: IndexMap::new(),
                relations: IndexMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Declared column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Declared type of a column.
    pub fn column_type(&self, column: &str) -> Option<&SqlType> {
        self.columns.get(column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Declared relation names in declaration order.
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Build a fresh query for relation `name`.
    ///
    /// When `owner` is given the query is bound to it for lazy loading.
    pub fn relation_query(
        self: &Rc<Self>,
        schema: &Schema,
        owner: Option<&Record>,
        name: &str,
    ) -> Result<ActiveQuery> {
        let factory = self.relations.get(name).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownRelation,
                format!("{} has no relation named '{}'", self.name, name),
            )
        })?;
        let ctx = RelationContext {
            schema,
            owner_class: self,
            owner,
        };
        let query = factory(&ctx)?;
        Ok(match owner {
            Some(owner) => query.primary_model(owner.clone()),
            None => query,
        })
    }

    /// Create a new, unsaved instance of this model.
    pub fn instantiate(self: &Rc<Self>) -> Model {
        Model::new(Rc::clone(self))
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelClassBuilder {
    /// Set the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.class.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Declare a column and its type.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.class.columns.insert(name.into(), sql_type);
        self
    }

    /// Declare a relation.
    #[must_use]
    pub fn relation<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RelationContext<'_>) -> Result<ActiveQuery> + 'static,
    {
        self.class.relations.insert(name.into(), Rc::new(factory));
        self
    }

    /// Finish the class.
    pub fn build(self) -> Rc<ModelClass> {
        Rc::new(self.class)
    }
}

/// What a relation factory can see while building its query.
pub struct RelationContext<'a> {
    schema: &'a Schema,
    owner_class: &'a Rc<ModelClass>,
    owner: Option<&'a Record>,
}

impl<'a> RelationContext<'a> {
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn owner_class(&self) -> &'a Rc<ModelClass> {
        self.owner_class
    }

    /// The record the relation is being resolved for, when lazy loading.
    pub fn owner(&self) -> Option<&'a Record> {
        self.owner
    }

    /// A to-one relation to `class`; `link` maps related columns to owner properties.
    pub fn has_one<I, K, V>(&self, class: &str, link: I) -> Result<ActiveQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Ok(ActiveQuery::new(self.schema.class(class)?)
            .link(link)
            .multiple(false))
    }

    /// A to-many relation to `class`; `link` maps related columns to owner properties.
    pub fn has_many<I, K, V>(&self, class: &str, link: I) -> Result<ActiveQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Ok(ActiveQuery::new(self.schema.class(class)?)
            .link(link)
            .multiple(true))
    }

    /// Another relation of the owner class, for use as a `via` step.
    pub fn relation(&self, name: &str) -> Result<ActiveQuery> {
        self.owner_class
            .relation_query(self.schema, self.owner, name)
    }
}

/// Registry of model classes.
#[derive(Debug, Default)]
pub struct Schema {
    classes: IndexMap<String, Rc<ModelClass>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class (builder or finished).
    #[must_use]
    pub fn register(mut self, class: impl Into<Rc<ModelClass>>) -> Self {
        let class = class.into();
        self.classes.insert(class.name().to_string(), class);
        self
    }

    /// Look up a class by name.
    pub fn class(&self, name: &str) -> Result<Rc<ModelClass>> {
        self.classes.get(name).cloned().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownModel,
                format!("no model class named '{name}' is registered"),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }
}

impl From<ModelClassBuilder> for Rc<ModelClass> {
    fn from(builder: ModelClassBuilder) -> Self {
        builder.build()
    }
}
