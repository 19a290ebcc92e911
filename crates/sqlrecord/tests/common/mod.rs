//! Shared store fixture: customers, orders, items and friends.
//!
//! ```text
//! customer  1 Alice   2 Bob   3 Carol (no orders)
//! order     1 -> c1   2 -> c1   3 -> c2
//! item      7 pen     8 ink     9 pad
//! order_item (1,7) (2,7) (2,8) (3,9)
//! profile   100 -> c2
//! ```
#![allow(dead_code)]

use sqlrecord::prelude::*;
use sqlrecord::IndexBy;

pub fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    Row::from_pairs(pairs)
}

pub fn schema() -> Schema {
    Schema::new()
        .register(
            ModelClass::new("Customer", "customer")
                .column("id", SqlType::BigInt)
                .column("name", SqlType::Text)
                .relation("orders", |ctx| {
                    Ok(ctx
                        .has_many("Order", [("customer_id", "id")])?
                        .inverse_of("customer"))
                })
                .relation("ordersById", |ctx| {
                    Ok(ctx
                        .has_many("Order", [("customer_id", "id")])?
                        .index_by("id"))
                })
                .relation("profile", |ctx| {
                    Ok(ctx
                        .has_one("Profile", [("customer_id", "id")])?
                        .inverse_of("customer"))
                })
                .relation("orderItems", |ctx| {
                    Ok(ctx
                        .has_many("OrderItem", [("order_id", "id")])?
                        .via("orders", ctx.relation("orders")?))
                })
                .relation("items", |ctx| {
                    Ok(ctx
                        .has_many("Item", [("id", "item_id")])?
                        .via("orderItems", ctx.relation("orderItems")?))
                })
                .relation("bigOrders", |ctx| {
                    Ok(ctx
                        .has_many("Order", [("customer_id", "id")])?
                        .and_where(Expr::col("total").ge(20)))
                })
                .relation("stats", |ctx| {
                    Ok(ctx
                        .has_many("Order", [("customer_id", "id")])?
                        .group_by(&["customer_id"]))
                })
                .relation("broken", |ctx| {
                    ctx.has_many("Order", std::iter::empty::<(&str, &str)>())
                }),
        )
        .register(
            ModelClass::new("Order", "order")
                .column("id", SqlType::BigInt)
                .column("customer_id", SqlType::BigInt)
                .column("total", SqlType::BigInt)
                .relation("customer", |ctx| {
                    Ok(ctx
                        .has_one("Customer", [("id", "customer_id")])?
                        .inverse_of("orders"))
                })
                .relation("items", |ctx| {
                    Ok(ctx
                        .has_many("Item", [("id", "item_id")])?
                        .via_table("order_item", [("order_id", "id")]))
                })
                .relation("orderItems", |ctx| {
                    ctx.has_many("OrderItem", [("order_id", "id")])
                }),
        )
        .register(
            ModelClass::new("OrderItem", "order_item")
                .primary_key(&["order_id", "item_id"])
                .column("order_id", SqlType::BigInt)
                .column("item_id", SqlType::BigInt)
                .relation("item", |ctx| ctx.has_one("Item", [("id", "item_id")])),
        )
        .register(
            ModelClass::new("Item", "item")
                .column("id", SqlType::BigInt)
                .column("name", SqlType::Text)
                .relation("orders", |ctx| {
                    Ok(ctx
                        .has_many("Order", [("id", "order_id")])?
                        .via_table("order_item", [("item_id", "id")]))
                }),
        )
        .register(
            ModelClass::new("Profile", "profile")
                .column("id", SqlType::BigInt)
                .column("customer_id", SqlType::BigInt)
                .relation("customer", |ctx| {
                    ctx.has_one("Customer", [("id", "customer_id")])
                }),
        )
        .register(
            ModelClass::new("Post", "post")
                .column("id", SqlType::BigInt)
                .column("tag_ids", SqlType::Array(Box::new(SqlType::BigInt)))
                .relation("tags", |ctx| ctx.has_many("Tag", [("id", "tag_ids")])),
        )
        .register(
            ModelClass::new("Tag", "tag")
                .column("id", SqlType::BigInt)
                .column("name", SqlType::Text)
                .relation("posts", |ctx| ctx.has_many("Post", [("tag_ids", "id")]))
                .relation("docs", |ctx| ctx.has_many("Doc", [("tags", "id")])),
        )
        .register(
            ModelClass::new("Doc", "doc")
                .column("id", SqlType::BigInt)
                .column("tags", SqlType::Json),
        )
        .register(
            ModelClass::new("OrderLine", "order_line")
                .primary_key(&["order_id", "line_no"])
                .column("order_id", SqlType::BigInt)
                .column("line_no", SqlType::BigInt)
                .relation("notes", |ctx| {
                    ctx.has_many(
                        "LineNote",
                        [("order_id", "order_id"), ("line_no", "line_no")],
                    )
                }),
        )
        .register(
            ModelClass::new("LineNote", "line_note")
                .column("order_id", SqlType::BigInt)
                .column("line_no", SqlType::BigInt)
                .column("text", SqlType::Text),
        )
}

pub fn connection() -> MemoryConnection {
    MemoryConnection::new()
        .with_table(
            "customer",
            vec![
                row([("id", Value::Int(1)), ("name", Value::from("Alice"))]),
                row([("id", Value::Int(2)), ("name", Value::from("Bob"))]),
                row([("id", Value::Int(3)), ("name", Value::from("Carol"))]),
            ],
        )
        .with_table(
            "order",
            vec![
                row([("id", Value::Int(1)), ("customer_id", Value::Int(1)), ("total", Value::Int(10))]),
                row([("id", Value::Int(2)), ("customer_id", Value::Int(1)), ("total", Value::Int(20))]),
                row([("id", Value::Int(3)), ("customer_id", Value::Int(2)), ("total", Value::Int(30))]),
            ],
        )
        .with_table(
            "item",
            vec![
                row([("id", Value::Int(7)), ("name", Value::from("pen"))]),
                row([("id", Value::Int(8)), ("name", Value::from("ink"))]),
                row([("id", Value::Int(9)), ("name", Value::from("pad"))]),
            ],
        )
        .with_table(
            "order_item",
            vec![
                row([("order_id", Value::Int(1)), ("item_id", Value::Int(7))]),
                row([("order_id", Value::Int(2)), ("item_id", Value::Int(7))]),
                row([("order_id", Value::Int(2)), ("item_id", Value::Int(8))]),
                row([("order_id", Value::Int(3)), ("item_id", Value::Int(9))]),
            ],
        )
        .with_table(
            "profile",
            vec![row([("id", Value::Int(100)), ("customer_id", Value::Int(2))])],
        )
        .with_table(
            "post",
            vec![
                row([("id", Value::Int(1)), ("tag_ids", Value::from(vec![10_i64, 11]))]),
                row([("id", Value::Int(2)), ("tag_ids", Value::from(vec![11_i64]))]),
                row([("id", Value::Int(3)), ("tag_ids", Value::Array(Vec::new()))]),
            ],
        )
        .with_table(
            "tag",
            vec![
                row([("id", Value::Int(10)), ("name", Value::from("rust"))]),
                row([("id", Value::Int(11)), ("name", Value::from("sql"))]),
                row([("id", Value::Int(12)), ("name", Value::from("unused"))]),
            ],
        )
        .with_table(
            "doc",
            vec![
                row([("id", Value::Int(1)), ("tags", Value::Json(serde_json::json!([10, 12])))]),
                row([("id", Value::Int(2)), ("tags", Value::Json(serde_json::json!([11])))]),
            ],
        )
        .with_table(
            "order_line",
            vec![
                row([("order_id", Value::Int(1)), ("line_no", Value::Int(1))]),
                row([("order_id", Value::Int(1)), ("line_no", Value::Int(2))]),
                row([("order_id", Value::Int(2)), ("line_no", Value::Int(1))]),
            ],
        )
        .with_table(
            "line_note",
            vec![
                row([("order_id", Value::Int(1)), ("line_no", Value::Int(1)), ("text", Value::from("a"))]),
                row([("order_id", Value::Int(1)), ("line_no", Value::Int(1)), ("text", Value::from("b"))]),
                row([("order_id", Value::Int(1)), ("line_no", Value::Int(2)), ("text", Value::from("c"))]),
                row([("order_id", Value::Int(2)), ("line_no", Value::Int(2)), ("text", Value::from("d"))]),
            ],
        )
}

/// A session over the fixture plus a handle on its statement log.
pub fn session() -> (Session, MemoryConnection) {
    session_with(SessionConfig::default())
}

pub fn session_with(config: SessionConfig) -> (Session, MemoryConnection) {
    let conn = connection();
    let session = Session::with_config(conn.clone(), schema(), config);
    (session, conn)
}

pub fn find(session: &Session, class: &str) -> ActiveQuery {
    match session.find(class) {
        Ok(query) => query,
        Err(e) => panic!("unknown class {class}: {e}"),
    }
}

/// Load every record of `class` ordered by `id`.
pub fn all(session: &Session, class: &str) -> Vec<Record> {
    find(session, class)
        .order_by(OrderBy::asc("id"))
        .all(session)
        .unwrap()
}

pub fn ints(records: &[Record], column: &str) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.get(column).as_i64().unwrap_or(-1))
        .collect()
}

pub fn related_ints(record: &Record, relation: &str, column: &str) -> Vec<i64> {
    let related = record
        .relation(relation)
        .unwrap_or_else(|| panic!("relation {relation} not populated"));
    ints(&related.records(), column)
}

pub fn index_by_column(column: &str) -> IndexBy {
    IndexBy::Column(column.to_string())
}
