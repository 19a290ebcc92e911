//! Model instances, plain rows and their populated relations.
//!
//! Both model instances and plain rows are shared handles: relation
//! population hands the same record to several owners (many-to-many
//! fan-out) and back-references it from its own related records (inverse
//! relations). Inverse relations therefore form `Rc` cycles between owner
//! and related records; these are expected and live as long as the
//! records do.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use sqlrecord_core::{ConfigErrorKind, Error, FromValue, ModelKey, Result, Row, Value};

use crate::query::{ActiveQuery, Via};
use crate::schema::ModelClass;
use crate::session::Session;

// ============================================================================
// Related
// ============================================================================

/// The populated value of one relation.
#[derive(Clone)]
pub enum Related {
    /// A to-one relation
    One(Option<Record>),
    /// A to-many relation
    Many(Vec<Record>),
    /// A to-many relation keyed by `index_by`
    Indexed(IndexMap<String, Record>),
}

impl Related {
    /// The empty value for a relation of the given multiplicity.
    pub fn empty(multiple: bool) -> Self {
        if multiple {
            Related::Many(Vec::new())
        } else {
            Related::One(None)
        }
    }

    /// The single related record, for to-one relations.
    pub fn one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => record.as_ref(),
            Related::Many(records) => records.first(),
            Related::Indexed(map) => map.values().next(),
        }
    }

    /// All related records in order.
    pub fn records(&self) -> Vec<Record> {
        match self {
            Related::One(record) => record.iter().cloned().collect(),
            Related::Many(records) => records.clone(),
            Related::Indexed(map) => map.values().cloned().collect(),
        }
    }

    /// Index keys, for indexed relations.
    pub fn index_keys(&self) -> Vec<String> {
        match self {
            Related::Indexed(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(record) => usize::from(record.is_some()),
            Related::Many(records) => records.len(),
            Related::Indexed(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_multiple(&self) -> bool {
        !matches!(self, Related::One(_))
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Related::One(record) => f.debug_tuple("One").field(record).finish(),
            Related::Many(records) => f.debug_tuple("Many").field(records).finish(),
            Related::Indexed(map) => f.debug_tuple("Indexed").field(map).finish(),
        }
    }
}

// ============================================================================
// Model
// ============================================================================

struct ModelState {
    class: Rc<ModelClass>,
    values: IndexMap<String, Value>,
    /// `None` for a record that was never persisted.
    old_values: Option<IndexMap<String, Value>>,
    related: IndexMap<String, Related>,
    /// property -> relations to reset when it changes
    dependencies: HashMap<String, IndexSet<String>>,
}

/// A model instance.
///
/// Cloning yields another handle to the same instance.
#[derive(Clone)]
pub struct Model(Rc<RefCell<ModelState>>);

impl Model {
    /// A new, unsaved record with every declared column set to NULL.
    pub fn new(class: Rc<ModelClass>) -> Self {
        let values = class
            .column_names()
            .map(|c| (c.to_string(), Value::Null))
            .collect();
        Self::from_state(class, values, None)
    }

    /// An existing record populated from a result row.
    pub fn from_row(class: Rc<ModelClass>, row: &Row) -> Self {
        let values: IndexMap<String, Value> = row
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        let old = values.clone();
        Self::from_state(class, values, Some(old))
    }

    fn from_state(
        class: Rc<ModelClass>,
        values: IndexMap<String, Value>,
        old_values: Option<IndexMap<String, Value>>,
    ) -> Self {
        Model(Rc::new(RefCell::new(ModelState {
            class,
            values,
            old_values,
            related: IndexMap::new(),
            dependencies: HashMap::new(),
        })))
    }

    pub fn class(&self) -> Rc<ModelClass> {
        Rc::clone(&self.0.borrow().class)
    }

    pub fn class_name(&self) -> String {
        self.0.borrow().class.name().to_string()
    }

    /// Current value of a property; NULL when unset.
    pub fn get(&self, name: &str) -> Value {
        self.0.borrow().values.get(name).cloned().unwrap_or_default()
    }

    /// Typed property access.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(&self.get(name)).map_err(|e| e.with_column(name))
    }

    /// Is `name` a declared column or a loaded property?
    pub fn has_property(&self, name: &str) -> bool {
        let state = self.0.borrow();
        state.values.contains_key(name) || state.class.has_column(name)
    }

    /// Set a property, resetting relations that depend on it.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if !self.has_property(name) {
            return Err(Error::config(
                ConfigErrorKind::UnknownProperty,
                format!("{} has no property '{}'", self.class_name(), name),
            ));
        }
        let value = value.into();
        let mut state = self.0.borrow_mut();
        let changed = value.is_null() || state.values.get(name) != Some(&value);
        if changed {
            if let Some(relations) = state.dependencies.remove(name) {
                for relation in &relations {
                    state.related.shift_remove(relation);
                }
                tracing::trace!(
                    property = name,
                    reset = relations.len(),
                    "reset dependent relations"
                );
            }
        }
        state.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Set a property without touching relations (used when loading rows).
    pub fn populate_property(&self, name: &str, value: impl Into<Value>) {
        self.0
            .borrow_mut()
            .values
            .insert(name.to_string(), value.into());
    }

    /// Primary key values in key order.
    pub fn primary_key_values(&self) -> IndexMap<String, Value> {
        let state = self.0.borrow();
        state
            .class
            .primary_key()
            .iter()
            .map(|k| (k.clone(), state.values.get(k).cloned().unwrap_or_default()))
            .collect()
    }

    pub fn is_new_record(&self) -> bool {
        self.0.borrow().old_values.is_none()
    }

    /// The value a property had when loaded.
    pub fn old_value(&self, name: &str) -> Option<Value> {
        self.0
            .borrow()
            .old_values
            .as_ref()
            .and_then(|old| old.get(name).cloned())
    }

    /// Properties whose value differs from the loaded one.
    pub fn dirty_values(&self) -> IndexMap<String, Value> {
        let state = self.0.borrow();
        state
            .values
            .iter()
            .filter(|(name, value)| {
                state
                    .old_values
                    .as_ref()
                    .is_none_or(|old| old.get(*name) != Some(*value))
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Treat the current values as persisted.
    pub fn mark_as_persisted(&self) {
        let mut state = self.0.borrow_mut();
        state.old_values = Some(state.values.clone());
    }

    // ==================== Relations ====================

    /// A fresh query for relation `name`, bound to this instance.
    pub fn relation_query(&self, session: &Session, name: &str) -> Result<ActiveQuery> {
        self.class()
            .relation_query(session.schema(), Some(&Record::Model(self.clone())), name)
    }

    pub fn is_relation_populated(&self, name: &str) -> bool {
        self.0.borrow().related.contains_key(name)
    }

    /// Store a relation value.
    pub fn populate_relation(&self, name: &str, value: Related) {
        let mut state = self.0.borrow_mut();
        for relations in state.dependencies.values_mut() {
            relations.shift_remove(name);
        }
        state.related.insert(name.to_string(), value);
    }

    /// The cached value of a relation, if populated.
    pub fn related(&self, name: &str) -> Option<Related> {
        self.0.borrow().related.get(name).cloned()
    }

    /// Drop a cached relation value.
    pub fn reset_relation(&self, name: &str) {
        self.0.borrow_mut().related.shift_remove(name);
    }

    /// Load relation `name`, querying only when it is not cached.
    #[track_caller]
    pub fn relation(&self, session: &Session, name: &str) -> Result<Related> {
        if let Some(related) = self.related(name) {
            return Ok(related);
        }
        let query = self.relation_query(session, name)?;
        session.record_lazy_load(&self.class_name(), name);
        let related = query.find_for(session, name)?;
        self.populate_relation(name, related.clone());
        self.set_relation_dependencies(name, &query);
        Ok(related)
    }

    /// Register the owner-side link properties of `query` as dependencies
    /// of relation `name`.
    pub(crate) fn set_relation_dependencies(&self, name: &str, query: &ActiveQuery) {
        self.add_dependencies(name, query, None);
    }

    fn add_dependencies(&self, name: &str, query: &ActiveQuery, via_name: Option<&str>) {
        match query.get_via() {
            Via::None => {
                let mut state = self.0.borrow_mut();
                for property in query.get_link().values() {
                    let entry = state.dependencies.entry(property.clone()).or_default();
                    entry.insert(name.to_string());
                    if let Some(via_name) = via_name {
                        entry.insert(via_name.to_string());
                    }
                }
            }
            Via::Junction(junction) => self.add_dependencies(name, junction, None),
            Via::Intermediate(via_name, via_query) => {
                self.add_dependencies(name, via_query, Some(via_name));
            }
        }
    }

    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.borrow();
        f.debug_struct("Model")
            .field("class", &state.class.name())
            .field("values", &state.values)
            .field("related", &state.related.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// ArrayRow
// ============================================================================

#[derive(Default)]
struct ArrayRowState {
    values: IndexMap<String, Value>,
    related: IndexMap<String, Related>,
}

/// A plain row, as produced by `as_array()` queries and junction lookups.
#[derive(Clone, Default)]
pub struct ArrayRow(Rc<RefCell<ArrayRowState>>);

impl ArrayRow {
    pub fn from_row(row: &Row) -> Self {
        Self::from_pairs(row.iter().map(|(k, v)| (k.to_string(), v.clone())))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        ArrayRow(Rc::new(RefCell::new(ArrayRowState {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            related: IndexMap::new(),
        })))
    }

    pub fn get(&self, name: &str) -> Value {
        self.0.borrow().values.get(name).cloned().unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.borrow().values.contains_key(name)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.0
            .borrow_mut()
            .values
            .insert(name.to_string(), value.into());
    }

    pub fn values(&self) -> IndexMap<String, Value> {
        self.0.borrow().values.clone()
    }

    pub fn set_relation(&self, name: &str, value: Related) {
        self.0.borrow_mut().related.insert(name.to_string(), value);
    }

    pub fn relation(&self, name: &str) -> Option<Related> {
        self.0.borrow().related.get(name).cloned()
    }

    pub fn ptr_eq(&self, other: &ArrayRow) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ArrayRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.borrow();
        f.debug_struct("ArrayRow")
            .field("values", &state.values)
            .field("related", &state.related.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Record
// ============================================================================

/// Either a model instance or a plain row.
#[derive(Clone)]
pub enum Record {
    Model(Model),
    Array(ArrayRow),
}

impl Record {
    pub fn get(&self, name: &str) -> Value {
        match self {
            Record::Model(m) => m.get(name),
            Record::Array(r) => r.get(name),
        }
    }

    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(&self.get(name)).map_err(|e| e.with_column(name))
    }

    pub fn has(&self, name: &str) -> bool {
        match self {
            Record::Model(m) => m.has_property(name),
            Record::Array(r) => r.has(name),
        }
    }

    /// Values under `names`, in order.
    pub fn values_of<S: AsRef<str>>(&self, names: &[S]) -> Vec<Value> {
        names.iter().map(|n| self.get(n.as_ref())).collect()
    }

    /// The single key under `names`.
    pub fn key<S: AsRef<str>>(&self, names: &[S]) -> Option<ModelKey> {
        ModelKey::from_values(&self.values_of(names))
    }

    /// Every key under `names`, fanning out array-valued properties.
    pub fn keys<S: AsRef<str>>(&self, names: &[S]) -> Vec<ModelKey> {
        ModelKey::keys_for(&self.values_of(names))
    }

    pub fn set_relation(&self, name: &str, value: Related) {
        match self {
            Record::Model(m) => m.populate_relation(name, value),
            Record::Array(r) => r.set_relation(name, value),
        }
    }

    pub fn relation(&self, name: &str) -> Option<Related> {
        match self {
            Record::Model(m) => m.related(name),
            Record::Array(r) => r.relation(name),
        }
    }

    pub fn is_relation_populated(&self, name: &str) -> bool {
        self.relation(name).is_some()
    }

    /// Address of the shared state; equal exactly when `same_as` holds.
    pub(crate) fn identity(&self) -> *const () {
        match self {
            Record::Model(m) => Rc::as_ptr(&m.0).cast(),
            Record::Array(r) => Rc::as_ptr(&r.0).cast(),
        }
    }

    /// Do both handles point at the same record?
    pub fn same_as(&self, other: &Record) -> bool {
        match (self, other) {
            (Record::Model(a), Record::Model(b)) => a.ptr_eq(b),
            (Record::Array(a), Record::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Record::Model(m) => Some(m),
            Record::Array(_) => None,
        }
    }

    pub fn as_array_row(&self) -> Option<&ArrayRow> {
        match self {
            Record::Array(r) => Some(r),
            Record::Model(_) => None,
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Model(m) => m.fmt(f),
            Record::Array(r) => r.fmt(f),
        }
    }
}

impl From<Model> for Record {
    fn from(m: Model) -> Self {
        Record::Model(m)
    }
}

impl From<ArrayRow> for Record {
    fn from(r: ArrayRow) -> Self {
        Record::Array(r)
    }
}

/// Records in first-seen order, each handle at most once.
#[derive(Debug, Default)]
pub(crate) struct UniqueRecords {
    records: Vec<Record>,
    seen: HashSet<*const ()>,
}

impl UniqueRecords {
    pub(crate) fn push(&mut self, record: &Record) {
        if self.seen.insert(record.identity()) {
            self.records.push(record.clone());
        }
    }

    pub(crate) fn into_vec(self) -> Vec<Record> {
        self.records
    }
}
