//! The execution context every query and relation load runs in.
//!
//! A [`Session`] bundles the data source, the registered model classes and
//! the [`SessionConfig`]. It is passed explicitly to every execution and
//! relation call; nothing is global.

use std::cell::RefCell;
use std::rc::Rc;

use sqlrecord_core::{Result, Row};

use crate::connection::{Connection, SelectStatement};
use crate::expr::Dialect;
use crate::n1_detection::{N1QueryTracker, N1Stats};
use crate::query::ActiveQuery;
use crate::record::Model;
use crate::schema::{ModelClass, Schema};

/// Configuration for a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Dialect used when rendering statements for logs; the connection's
    /// own dialect when unset.
    pub dialect: Option<Dialect>,
    /// Lazy loads of one relation before an N+1 warning; `None` disables
    /// detection.
    pub n1_threshold: Option<usize>,
    /// Skip the data source for queries that can match nothing.
    ///
    /// When false such queries are still sent, guarded by their
    /// always-false condition.
    pub honor_emulation: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dialect: None,
            n1_threshold: Some(3),
            honor_emulation: true,
        }
    }
}

impl SessionConfig {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn n1_threshold(mut self, threshold: Option<usize>) -> Self {
        self.n1_threshold = threshold;
        self
    }

    pub fn honor_emulation(mut self, honor: bool) -> Self {
        self.honor_emulation = honor;
        self
    }
}

/// A data source plus the model classes queried through it.
pub struct Session {
    connection: Box<dyn Connection>,
    schema: Schema,
    config: SessionConfig,
    n1_tracker: Option<RefCell<N1QueryTracker>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(connection: impl Connection + 'static, schema: Schema) -> Self {
        Self::with_config(connection, schema, SessionConfig::default())
    }

    pub fn with_config(
        connection: impl Connection + 'static,
        schema: Schema,
        config: SessionConfig,
    ) -> Self {
        let n1_tracker = config
            .n1_threshold
            .map(|threshold| RefCell::new(N1QueryTracker::new().with_threshold(threshold)));
        Self {
            connection: Box::new(connection),
            schema,
            config,
            n1_tracker,
        }
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config
            .dialect
            .unwrap_or_else(|| self.connection.dialect())
    }

    /// Run a statement against the connection.
    pub fn query(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let (sql, params) = statement.to_sql(self.dialect());
            tracing::trace!(sql = %sql, params = params.len(), "Executing query");
        }
        let rows = self.connection.query(statement)?;
        tracing::trace!(rows = rows.len(), "Query returned");
        Ok(rows)
    }

    pub fn count(&self, statement: &SelectStatement) -> Result<u64> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let (sql, _) = statement.to_sql(self.dialect());
            tracing::trace!(sql = %sql, "Executing count");
        }
        self.connection.count(statement)
    }

    /// A query over the registered class `class_name`.
    pub fn find(&self, class_name: &str) -> Result<ActiveQuery> {
        Ok(ActiveQuery::new(self.schema.class(class_name)?))
    }

    /// A new, unsaved instance of `class_name`.
    pub fn instantiate(&self, class_name: &str) -> Result<Model> {
        let class: Rc<ModelClass> = self.schema.class(class_name)?;
        Ok(class.instantiate())
    }

    /// Lazy-load statistics, when detection is enabled.
    pub fn n1_stats(&self) -> Option<N1Stats> {
        self.n1_tracker
            .as_ref()
            .map(|tracker| tracker.borrow().stats())
    }

    /// Reset N+1 counts, e.g. at the start of a request.
    pub fn reset_n1_tracking(&self) {
        if let Some(tracker) = &self.n1_tracker {
            tracker.borrow_mut().reset();
        }
    }

    /// Record a lazy load for N+1 detection.
    #[track_caller]
    pub fn record_lazy_load(&self, model: &str, relation: &str) {
        if let Some(tracker) = &self.n1_tracker {
            tracker.borrow_mut().record_load(model, relation);
        }
    }
}
