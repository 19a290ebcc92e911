mod common;

use common::{all, find, ints, related_ints, row, session, session_with};
use sqlrecord::prelude::*;
use sqlrecord::{ArrayRow, ConfigErrorKind, RelationPopulator};

fn array(pairs: [(&str, Value); 1]) -> Record {
    Record::Array(ArrayRow::from_pairs(pairs))
}

#[test]
fn populator_buckets_related_rows_by_owner() {
    let conn = MemoryConnection::new().with_table(
        "thing",
        vec![
            row([("owner_id", Value::Int(1)), ("v", Value::from("x"))]),
            row([("owner_id", Value::Int(1)), ("v", Value::from("y"))]),
            row([("owner_id", Value::Int(2)), ("v", Value::from("z"))]),
        ],
    );
    let session = Session::new(conn.clone(), Schema::new());
    let owners = vec![array([("id", Value::Int(1))]), array([("id", Value::Int(2))])];
    let query = ActiveQuery::from_table("thing")
        .link([("owner_id", "id")])
        .multiple(true);

    let related = RelationPopulator::new(&session)
        .populate(&query, "things", &owners)
        .unwrap();

    assert_eq!(related.len(), 3);
    assert_eq!(conn.query_count(), 1);
    let values = |owner: &Record| -> Vec<Value> {
        owner
            .relation("things")
            .unwrap()
            .records()
            .iter()
            .map(|r| r.get("v"))
            .collect()
    };
    assert_eq!(values(&owners[0]), vec![Value::from("x"), Value::from("y")]);
    assert_eq!(values(&owners[1]), vec![Value::from("z")]);
}

#[test]
fn owner_without_related_rows_gets_empty_list() {
    let conn = MemoryConnection::new().with_table(
        "thing",
        vec![row([("owner_id", Value::Int(1)), ("v", Value::from("x"))])],
    );
    let session = Session::new(conn.clone(), Schema::new());
    let owners = vec![array([("id", Value::Int(3))])];
    let query = ActiveQuery::from_table("thing")
        .link([("owner_id", "id")])
        .multiple(true);

    let related = RelationPopulator::new(&session)
        .populate(&query, "things", &owners)
        .unwrap();

    assert!(related.is_empty());
    assert_eq!(conn.query_count(), 1);
    let value = owners[0].relation("things").unwrap();
    assert!(value.is_multiple());
    assert!(value.is_empty());
}

#[test]
fn keys_match_across_value_representations() {
    let conn = MemoryConnection::new().with_table(
        "thing",
        vec![row([("owner_id", Value::BigInt(1)), ("v", Value::from("x"))])],
    );
    let session = Session::new(conn, Schema::new());
    let owners = vec![array([("id", Value::from("1"))])];
    let query = ActiveQuery::from_table("thing")
        .link([("owner_id", "id")])
        .multiple(true);

    RelationPopulator::new(&session)
        .populate(&query, "things", &owners)
        .unwrap();
    assert_eq!(owners[0].relation("things").unwrap().len(), 1);
}

#[test]
fn decimal_link_values_land_in_integer_owner_bucket() {
    let conn = MemoryConnection::new().with_table(
        "thing",
        vec![
            row([("owner_id", Value::Decimal("1.00".into())), ("v", Value::from("x"))]),
            row([("owner_id", Value::Text("2.0".into())), ("v", Value::from("y"))]),
        ],
    );
    let session = Session::new(conn, Schema::new());
    let owners = vec![array([("id", Value::BigInt(1))]), array([("id", Value::Int(2))])];
    let query = ActiveQuery::from_table("thing")
        .link([("owner_id", "id")])
        .multiple(true);

    let related = RelationPopulator::new(&session)
        .populate(&query, "things", &owners)
        .unwrap();
    assert_eq!(related.len(), 2);
    assert_eq!(owners[0].relation("things").unwrap().len(), 1);
    assert_eq!(owners[1].relation("things").unwrap().len(), 1);
}

#[test]
fn with_loads_relation_in_one_query() {
    let (session, conn) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with(["orders"])
        .all(&session)
        .unwrap();

    assert_eq!(conn.query_count(), 2);
    assert!(conn.executed()[1].contains("IN"));
    assert_eq!(related_ints(&customers[0], "orders", "id"), vec![1, 2]);
    assert_eq!(related_ints(&customers[1], "orders", "id"), vec![3]);
    assert_eq!(related_ints(&customers[2], "orders", "id"), Vec::<i64>::new());
}

#[test]
fn with_on_empty_result_sends_no_relation_query() {
    let (session, conn) = session();
    let customers = find(&session, "Customer")
        .where_(Expr::col("id").eq(99))
        .with(["orders"])
        .all(&session)
        .unwrap();
    assert!(customers.is_empty());
    assert_eq!(conn.query_count(), 1);
}

#[test]
fn sibling_relations_load_sequentially() {
    let (session, conn) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with(["orders", "profile"])
        .all(&session)
        .unwrap();

    assert_eq!(conn.query_count(), 3);
    assert!(conn.executed()[1].contains("\"order\""));
    assert!(conn.executed()[2].contains("\"profile\""));
    assert!(customers[0].relation("profile").unwrap().one().is_none());
    assert_eq!(
        customers[1]
            .relation("profile")
            .unwrap()
            .one()
            .map(|p| p.get("id")),
        Some(Value::Int(100))
    );
}

#[test]
fn single_owner_fast_path_matches_batch_path() {
    let (session, conn) = session();
    let single = find(&session, "Order")
        .where_(Expr::col("id").eq(3))
        .with(["customer"])
        .all(&session)
        .unwrap();
    assert!(conn.executed()[1].contains("LIMIT 1"));

    let batch = all(&session, "Order");
    RelationPopulator::new(&session)
        .populate(
            &session
                .schema()
                .class("Order")
                .unwrap()
                .relation_query(session.schema(), None, "customer")
                .unwrap(),
            "customer",
            &batch,
        )
        .unwrap();

    let via_fast = single[0].relation("customer").unwrap();
    let via_batch = batch[2].relation("customer").unwrap();
    assert!(!via_fast.is_multiple());
    assert_eq!(
        via_fast.one().map(|c| c.get("name")),
        via_batch.one().map(|c| c.get("name"))
    );
    assert_eq!(via_fast.one().map(|c| c.get("name")), Some(Value::from("Bob")));
}

#[test]
fn inverse_relation_points_back_at_owner() {
    let (session, _) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with(["orders"])
        .all(&session)
        .unwrap();

    for customer in &customers {
        for order in customer.relation("orders").unwrap().records() {
            let back = order.relation("customer").unwrap();
            assert!(back.one().unwrap().same_as(customer));
        }
    }
}

#[test]
fn inverse_of_to_one_relation_collects_owners() {
    let (session, _) = session();
    let orders = find(&session, "Order")
        .order_by(OrderBy::asc("id"))
        .with(["customer"])
        .all(&session)
        .unwrap();

    let alice = orders[0].relation("customer").unwrap().one().cloned().unwrap();
    let back = alice.relation("orders").unwrap();
    assert!(back.is_multiple());
    assert_eq!(ints(&back.records(), "id"), vec![1, 2]);
    assert!(back.records()[0].same_as(&orders[0]));
}

#[test]
fn nested_with_loads_each_level_once() {
    let (session, conn) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with(["orders.items"])
        .all(&session)
        .unwrap();

    // customer, order, order_item, item
    assert_eq!(conn.query_count(), 4);
    let alice_orders = customers[0].relation("orders").unwrap().records();
    assert_eq!(related_ints(&alice_orders[0], "items", "id"), vec![7]);
    assert_eq!(related_ints(&alice_orders[1], "items", "id"), vec![7, 8]);

    let pen_in_first = &alice_orders[0].relation("items").unwrap().records()[0];
    let pen_in_second = &alice_orders[1].relation("items").unwrap().records()[0];
    assert!(pen_in_first.same_as(pen_in_second));
}

#[test]
fn callbacks_refine_the_leaf_relation() {
    let (session, _) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with_callback("orders", |q| q.and_where(Expr::col("total").gt(15)))
        .all(&session)
        .unwrap();
    assert_eq!(related_ints(&customers[0], "orders", "id"), vec![2]);
    assert_eq!(related_ints(&customers[1], "orders", "id"), vec![3]);

    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with_callback("orders.items", |q| q.and_where(Expr::col("name").eq("ink")))
        .all(&session)
        .unwrap();
    let alice_orders = customers[0].relation("orders").unwrap().records();
    assert_eq!(alice_orders.len(), 2);
    assert_eq!(related_ints(&alice_orders[0], "items", "id"), Vec::<i64>::new());
    assert_eq!(related_ints(&alice_orders[1], "items", "id"), vec![8]);
}

#[test]
fn relation_conditions_apply_when_eager_loading() {
    let (session, _) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with(["bigOrders"])
        .all(&session)
        .unwrap();
    assert_eq!(related_ints(&customers[0], "bigOrders", "id"), vec![2]);
    assert_eq!(related_ints(&customers[1], "bigOrders", "id"), vec![3]);
}

#[test]
fn as_array_loads_plain_rows() {
    let (session, _) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .as_array()
        .with(["orders"])
        .all(&session)
        .unwrap();

    assert!(customers.iter().all(|c| c.as_array_row().is_some()));
    let orders = customers[0].relation("orders").unwrap().records();
    assert_eq!(ints(&orders, "id"), vec![1, 2]);
    assert!(orders.iter().all(|o| o.as_model().is_none()));
}

#[test]
fn index_by_keys_each_owners_relation() {
    let (session, _) = session();
    let customers = find(&session, "Customer")
        .order_by(OrderBy::asc("id"))
        .with(["ordersById"])
        .all(&session)
        .unwrap();

    let alice = customers[0].relation("ordersById").unwrap();
    assert_eq!(alice.index_keys(), vec!["1".to_string(), "2".to_string()]);
    let carol = customers[2].relation("ordersById").unwrap();
    assert!(matches!(carol, Related::Indexed(ref map) if map.is_empty()));
}

#[test]
fn owners_without_link_values_send_no_query() {
    let (session, conn) = session();
    let order: Record = session.instantiate("Order").unwrap().into();
    let query = session
        .schema()
        .class("Order")
        .unwrap()
        .relation_query(session.schema(), None, "customer")
        .unwrap();

    RelationPopulator::new(&session)
        .populate(&query, "customer", std::slice::from_ref(&order))
        .unwrap();
    assert_eq!(conn.query_count(), 0);
    assert!(order.relation("customer").unwrap().one().is_none());

    let none: Vec<Record> = Vec::new();
    let related = RelationPopulator::new(&session)
        .populate(&query.multiple(true), "customer", &none)
        .unwrap();
    assert!(related.is_empty());
    assert_eq!(conn.query_count(), 0);
}

#[test]
fn emulated_queries_run_when_emulation_is_not_honored() {
    let (session, conn) = session_with(SessionConfig::default().honor_emulation(false));
    let order: Record = session.instantiate("Order").unwrap().into();
    let query = session
        .schema()
        .class("Order")
        .unwrap()
        .relation_query(session.schema(), None, "customer")
        .unwrap();

    RelationPopulator::new(&session)
        .populate(&query, "customer", std::slice::from_ref(&order))
        .unwrap();
    assert_eq!(conn.query_count(), 1);
    assert!(conn.executed()[0].contains("1 = 0"));
    assert!(order.relation("customer").unwrap().one().is_none());
}

#[test]
fn unknown_relation_is_a_config_error() {
    let (session, _) = session();
    let err = find(&session, "Customer")
        .with(["nope"])
        .all(&session)
        .unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownRelation));

    let err = find(&session, "Customer")
        .with(["broken"])
        .all(&session)
        .unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidLink));
}
