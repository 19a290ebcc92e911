//! JOIN synthesis for `join_with`.
//!
//! Joining a relation turns its link into an ON condition between the
//! parent's alias and the child's table, and folds the child query's
//! WHERE, ORDER BY and joins into the outer query. Dotted names join each
//! level in turn; via relations join through their via step first.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use sqlrecord_core::{ConfigErrorKind, Error, Result};

use crate::alias::{TableNameAndAliasResolver, TableRef};
use crate::eager::WithSpec;
use crate::expr::Expr;
use crate::join::{Join, JoinType};
use crate::query::{ActiveQuery, QueryCallback, Via};
use crate::schema::{ModelClass, Schema};

/// Which joined relations are also eager-loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EagerLoading {
    /// Every joined relation
    #[default]
    All,
    /// None of them
    None,
    /// Only the listed relation names
    Only(Vec<String>),
}

/// Join type for the relations of one `join_with` call.
#[derive(Debug, Clone)]
pub enum JoinTypeSpec {
    /// The same type for every relation
    Fixed(JoinType),
    /// Per relation (full dotted name); unlisted relations use INNER JOIN
    PerRelation(HashMap<String, JoinType>),
}

impl Default for JoinTypeSpec {
    fn default() -> Self {
        JoinTypeSpec::Fixed(JoinType::Inner)
    }
}

impl JoinTypeSpec {
    pub fn for_relation(&self, name: &str) -> JoinType {
        match self {
            JoinTypeSpec::Fixed(join_type) => *join_type,
            JoinTypeSpec::PerRelation(types) => types.get(name).copied().unwrap_or_default(),
        }
    }
}

/// One `join_with` request.
#[derive(Debug, Clone, Default)]
pub struct JoinWithSpec {
    pub relations: Vec<WithSpec>,
    pub eager: EagerLoading,
    pub join_type: JoinTypeSpec,
}

impl JoinWithSpec {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relations: names.into_iter().map(WithSpec::new).collect(),
            ..Self::default()
        }
    }

    pub fn with_callback(name: impl Into<String>, callback: QueryCallback) -> Self {
        Self {
            relations: vec![WithSpec::with_callback(name, callback)],
            ..Self::default()
        }
    }

    /// Add a relation with a callback.
    pub fn relation_with_callback(mut self, name: impl Into<String>, callback: QueryCallback) -> Self {
        self.relations.push(WithSpec::with_callback(name, callback));
        self
    }

    pub fn eager(mut self, eager: EagerLoading) -> Self {
        self.eager = eager;
        self
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = JoinTypeSpec::Fixed(join_type);
        self
    }

    /// Override the join type of one relation.
    pub fn join_type_for(mut self, name: impl Into<String>, join_type: JoinType) -> Self {
        let mut types = match self.join_type {
            JoinTypeSpec::PerRelation(types) => types,
            JoinTypeSpec::Fixed(_) => HashMap::new(),
        };
        types.insert(name.into(), join_type);
        self.join_type = JoinTypeSpec::PerRelation(types);
        self
    }

    fn eager_relations(&self) -> Vec<WithSpec> {
        match &self.eager {
            EagerLoading::All => self.relations.clone(),
            EagerLoading::None => Vec::new(),
            EagerLoading::Only(names) => self
                .relations
                .iter()
                .filter(|r| names.contains(&r.path))
                .cloned()
                .collect(),
        }
    }
}

/// Materialises `join_with` requests into JOIN clauses.
pub struct JoinsWithBuilder<'a> {
    schema: &'a Schema,
}

impl<'a> JoinsWithBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Replace the query's `join_with` requests with joins, and queue the
    /// eager-loaded ones on its `with`.
    ///
    /// Joins already on the query are kept after the synthesised ones.
    pub fn build(&self, query: &mut ActiveQuery) -> Result<()> {
        let existing = std::mem::take(&mut query.joins);
        let specs = std::mem::take(&mut query.join_with);
        let class = query.model_class().cloned().ok_or_else(|| {
            Error::config(
                ConfigErrorKind::UnknownModel,
                "join_with requires a query over a model class",
            )
        })?;

        for spec in &specs {
            self.join_with_relations(query, &class, spec)?;
            query.with.extend(spec.eager_relations());
        }

        let joins = dedupe(std::mem::take(&mut query.joins))?;
        tracing::debug!(
            synthesized = joins.len(),
            existing = existing.len(),
            "Built join_with joins"
        );
        query.joins = joins;
        query.joins.extend(existing);
        Ok(())
    }

    fn join_with_relations(
        &self,
        query: &mut ActiveQuery,
        class: &Rc<ModelClass>,
        spec: &JoinWithSpec,
    ) -> Result<()> {
        let mut relations: HashMap<String, ActiveQuery> = HashMap::new();
        for WithSpec { path, callback } in &spec.relations {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            let Some((leaf, parents)) = segments.split_last() else {
                continue;
            };

            let mut primary_class = Rc::clone(class);
            let mut parent: Option<ActiveQuery> = None;
            let mut prefix = String::new();
            for segment in parents {
                let full_name = join_path(&prefix, segment);
                let relation = match relations.get(&full_name) {
                    Some(relation) => relation.clone(),
                    None => {
                        let relation = primary_class.relation_query(self.schema, None, segment)?;
                        self.join_with_relation(
                            query,
                            parent.as_ref(),
                            &relation,
                            spec.join_type.for_relation(&full_name),
                        )?;
                        relations.insert(full_name.clone(), relation.clone());
                        relation
                    }
                };
                primary_class = related_class(&relation, segment)?;
                parent = Some(relation);
                prefix = full_name;
            }

            let full_name = join_path(&prefix, leaf);
            if relations.contains_key(&full_name) {
                continue;
            }
            let mut relation = primary_class.relation_query(self.schema, None, leaf)?;
            if let Some(callback) = callback {
                relation = callback.apply(relation);
            }
            if !relation.join_with.is_empty() {
                self.build(&mut relation)?;
            }
            self.join_with_relation(
                query,
                parent.as_ref(),
                &relation,
                spec.join_type.for_relation(&full_name),
            )?;
            relations.insert(full_name, relation);
        }
        Ok(())
    }

    /// Join `child` to `parent` (the outer query itself when `None`).
    fn join_with_relation(
        &self,
        query: &mut ActiveQuery,
        parent: Option<&ActiveQuery>,
        child: &ActiveQuery,
        join_type: JoinType,
    ) -> Result<()> {
        if !child.group_by.is_empty() || child.having.is_some() || !child.unions.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::UnjoinableRelation,
                format!(
                    "relation to {} uses GROUP BY, HAVING or UNION and cannot be joined",
                    describe(child)
                ),
            ));
        }

        if let Via::Junction(via) | Via::Intermediate(_, via) = &child.via {
            let via: &ActiveQuery = via;
            let mut direct = child.clone();
            direct.via = Via::None;
            self.join_with_relation(query, parent, via, join_type)?;
            return self.join_with_relation(query, Some(via), &direct, join_type);
        }

        let (_, parent_alias) = match parent {
            Some(parent) => TableNameAndAliasResolver::resolve(parent)?,
            None => TableNameAndAliasResolver::resolve(query)?,
        };
        let (child_table, child_alias) = TableNameAndAliasResolver::resolve(child)?;

        let link_on = child
            .link
            .iter()
            .map(|(child_column, parent_column)| {
                Expr::qualified(&parent_alias, parent_column)
                    .eq(Expr::qualified(&child_alias, child_column))
            })
            .reduce(|a, b| a.and(b));
        let on = match (link_on, child.on.clone()) {
            (Some(link_on), Some(extra)) => Some(link_on.and(extra)),
            (link_on, extra) => link_on.or(extra),
        };

        let table = child.from.clone().unwrap_or(TableRef::Name {
            name: child_table,
            alias: None,
        });
        query.joins.push(Join::new(join_type, table, on));

        if let Some(condition) = &child.condition {
            query.add_condition(condition.clone());
        }
        query.order_by.extend(child.order_by.iter().cloned());
        query.joins.extend(child.joins.iter().cloned());
        Ok(())
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn related_class(relation: &ActiveQuery, name: &str) -> Result<Rc<ModelClass>> {
    relation.model_class().cloned().ok_or_else(|| {
        Error::config(
            ConfigErrorKind::UnknownModel,
            format!("relation '{name}' has no model class to continue the join path from"),
        )
    })
}

fn describe(query: &ActiveQuery) -> String {
    match (query.get_from(), query.model_class()) {
        (Some(from), _) => from.target().to_string(),
        (None, Some(class)) => class.name().to_string(),
        (None, None) => "<unknown>".to_string(),
    }
}

/// Drop structurally identical joins, then every join after the first on
/// a given table.
fn dedupe(joins: Vec<Join>) -> Result<Vec<Join>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(joins.len());
    for join in joins {
        if seen.insert(serialized(&join)?) {
            unique.push(join);
        }
    }

    let mut tables = HashSet::new();
    let mut result = Vec::with_capacity(unique.len());
    for join in unique {
        if tables.insert(serialized(&join.table)?) {
            result.push(join);
        }
    }
    Ok(result)
}

fn serialized<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Custom(format!("failed to serialize join: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrecord_core::SqlType;

    fn schema() -> Schema {
        Schema::new()
            .register(
                ModelClass::new("Customer", "customer")
                    .column("id", SqlType::BigInt)
                    .relation("orders", |ctx| ctx.has_many("Order", [("customer_id", "id")]))
                    .relation("items", |ctx| {
                        Ok(ctx
                            .has_many("Item", [("id", "item_id")])?
                            .via("orderItems", ctx.relation("orderItems")?))
                    })
                    .relation("orderItems", |ctx| {
                        Ok(ctx
                            .has_many("OrderItem", [("order_id", "id")])?
                            .via("orders", ctx.relation("orders")?))
                    })
                    .relation("stats", |ctx| {
                        Ok(ctx.has_many("Order", [("customer_id", "id")])?.group_by(&["status"]))
                    }),
            )
            .register(
                ModelClass::new("Order", "order")
                    .column("id", SqlType::BigInt)
                    .column("customer_id", SqlType::BigInt)
                    .relation("items", |ctx| {
                        Ok(ctx
                            .has_many("Item", [("id", "item_id")])?
                            .via_table("order_item", [("order_id", "id")]))
                    })
                    .relation("paid", |ctx| {
                        Ok(ctx
                            .has_many("Order", [("id", "id")])?
                            .on(Expr::qualified("order", "status").eq("paid")))
                    }),
            )
            .register(ModelClass::new("OrderItem", "order_item"))
            .register(ModelClass::new("Item", "item"))
    }

    fn customer_query(schema: &Schema) -> ActiveQuery {
        ActiveQuery::new(schema.class("Customer").unwrap())
    }

    fn tables(query: &ActiveQuery) -> Vec<String> {
        query
            .get_joins()
            .iter()
            .map(|j| j.table.target().to_string())
            .collect()
    }

    #[test]
    fn test_single_relation_join() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with(["orders"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();

        assert_eq!(query.get_joins().len(), 1);
        let join = &query.get_joins()[0];
        assert_eq!(join.join_type, JoinType::Inner);
        assert_eq!(join.table, TableRef::parse("order"));
        assert_eq!(
            join.on,
            Some(Expr::qualified("customer", "id").eq(Expr::qualified("order", "customer_id")))
        );
        assert_eq!(query.get_with().len(), 1);
        assert_eq!(query.get_with()[0].path, "orders");
    }

    #[test]
    fn test_duplicate_relations_join_once() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with(["orders", "orders"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(tables(&query), vec!["order"]);

        let mut query = customer_query(&schema)
            .join_with(["orders"])
            .left_join_with(["orders"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(tables(&query), vec!["order"]);
        assert_eq!(query.get_joins()[0].join_type, JoinType::Inner);
    }

    #[test]
    fn test_nested_path_and_junction_via() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with(["orders.items"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(tables(&query), vec!["order", "order_item", "item"]);
        assert_eq!(
            query.get_joins()[1].on,
            Some(Expr::qualified("order", "id").eq(Expr::qualified("order_item", "order_id")))
        );
        assert_eq!(
            query.get_joins()[2].on,
            Some(Expr::qualified("order_item", "item_id").eq(Expr::qualified("item", "id")))
        );
    }

    #[test]
    fn test_intermediate_via_chain_dedupes_shared_tables() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with(["orders", "items"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(tables(&query), vec!["order", "order_item", "item"]);
    }

    #[test]
    fn test_existing_joins_are_appended() {
        let schema = schema();
        let mut query = customer_query(&schema)
            .left_join("address", Expr::raw("address.customer_id = customer.id"))
            .join_with(["orders"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(tables(&query), vec!["order", "address"]);
    }

    #[test]
    fn test_on_condition_is_anded() {
        let schema = schema();
        let mut query = ActiveQuery::new(schema.class("Order").unwrap())
            .alias("o")
            .join_with(["paid"]);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(
            query.get_joins()[0].on,
            Some(
                Expr::qualified("o", "id")
                    .eq(Expr::qualified("order", "id"))
                    .and(Expr::qualified("order", "status").eq("paid"))
            )
        );
    }

    #[test]
    fn test_eager_flag_and_join_types() {
        let schema = schema();
        let spec = JoinWithSpec::new(["orders", "orders.items"])
            .eager(EagerLoading::Only(vec!["orders".into()]))
            .join_type_for("orders.items", JoinType::Left);
        let mut query = customer_query(&schema).join_with_spec(spec);
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();

        let with: Vec<_> = query.get_with().iter().map(|w| w.path.clone()).collect();
        assert_eq!(with, vec!["orders"]);
        let types: Vec<_> = query.get_joins().iter().map(|j| j.join_type).collect();
        assert_eq!(types, vec![JoinType::Inner, JoinType::Left, JoinType::Left]);

        let mut query = customer_query(&schema)
            .join_with_spec(JoinWithSpec::new(["orders"]).eager(EagerLoading::None));
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert!(query.get_with().is_empty());
    }

    #[test]
    fn test_callback_conditions_fold_into_outer_query() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with_callback("orders", |q| {
            q.and_where(Expr::col("total").gt(10))
                .add_order_by(crate::clause::OrderBy::desc("total"))
        });
        JoinsWithBuilder::new(&schema).build(&mut query).unwrap();
        assert_eq!(query.get_condition(), Some(&Expr::col("total").gt(10)));
        assert_eq!(query.get_order_by().len(), 1);
    }

    #[test]
    fn test_grouped_relation_cannot_be_joined() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with(["stats"]);
        let err = JoinsWithBuilder::new(&schema).build(&mut query).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnjoinableRelation));
    }

    #[test]
    fn test_unknown_relation_in_path() {
        let schema = schema();
        let mut query = customer_query(&schema).join_with(["orders.nothing"]);
        let err = JoinsWithBuilder::new(&schema).build(&mut query).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownRelation));
    }
}
