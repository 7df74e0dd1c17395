//! End-to-end reads, writes and aggregates through the engine.

mod common;

use common::{text, TestContext};
use relq_core::proto::{
    AggregateArgs, AggregateFunction, AggregateSelection, Condition, CreateManyArgs, Data,
    DeleteArgs, Filter, FindManyArgs, FindUniqueArgs, GroupByArgs, GroupOrderBy, HavingFilter,
    OrderBy, Response, SelectEntry, SelectionSpec, UpsertArgs, Value,
};
use relq_core::ErrorKind;
use serde_json::json;

#[tokio::test]
async fn test_nested_orders_in_creation_order() {
    let ctx = TestContext::new();
    let user = ctx.user("a@x.com", None, &[]).await;
    let id = text(&user, "id");

    ctx.engine
        .model("Order")
        .create_many(CreateManyArgs::new(vec![
            Data::new().set("userId", id.as_str()).set("amount", 10.0),
            Data::new().set("userId", id.as_str()).set("amount", 5.0),
        ]))
        .await
        .unwrap();

    let found = ctx
        .engine
        .model("User")
        .find_unique(
            FindUniqueArgs::new(Filter::eq("id", id.as_str())).with_selection(
                SelectionSpec::include(vec![SelectEntry::relation("orders", FindManyArgs::new())])
                    .unwrap(),
            ),
        )
        .await
        .unwrap()
        .unwrap();
    let orders = found.many("orders").unwrap();
    let amounts: Vec<f64> = orders
        .iter()
        .filter_map(|o| o.get("amount").and_then(Value::as_f64))
        .collect();
    assert_eq!(amounts, vec![10.0, 5.0]);

    let totals = ctx
        .engine
        .model("Order")
        .aggregate(
            AggregateArgs::new(AggregateSelection::new().sum("amount").count_all())
                .with_filter(Filter::eq("userId", id.as_str())),
        )
        .await
        .unwrap();
    assert_eq!(
        totals.get(AggregateFunction::Sum, Some("amount")),
        Some(Value::Float(15.0))
    );
    assert_eq!(totals.get(AggregateFunction::Count, None), Some(Value::Int(2)));
}

#[tokio::test]
async fn test_group_by_with_having() {
    let ctx = TestContext::new();
    let big = text(&ctx.user("a@x.io", None, &[10.0, 5.0]).await, "id");
    ctx.user("b@x.io", None, &[3.0]).await;

    let groups = ctx
        .engine
        .model("Order")
        .group_by(
            GroupByArgs::new(["userId"])
                .with_aggregates(AggregateSelection::new().sum("amount").count_all())
                .with_having(HavingFilter::Aggregate {
                    function: AggregateFunction::Sum,
                    field: Some("amount".into()),
                    conditions: vec![Condition::Gt(Value::Float(10.0))],
                })
                .order_by(GroupOrderBy::Field(OrderBy::asc("userId"))),
        )
        .await
        .unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].key("userId"), Some(&Value::from(big.as_str())));
    assert_eq!(
        groups[0].aggregates.get(AggregateFunction::Sum, Some("amount")),
        Some(Value::Float(15.0))
    );
    assert_eq!(
        groups[0].aggregates.get(AggregateFunction::Count, None),
        Some(Value::Int(2))
    );
}

#[tokio::test]
async fn test_invalid_group_by_is_rejected_before_storage() {
    let (ctx, store) = TestContext::counting();

    let cases = vec![
        GroupByArgs::new(["userId"]).with_having(HavingFilter::Field {
            field: "status".into(),
            conditions: vec![Condition::Equals(Value::from("open"))],
        }),
        GroupByArgs::new(["userId"]).order_by(GroupOrderBy::Field(OrderBy::asc("amount"))),
        GroupByArgs::new(["userId"]).with_aggregates(AggregateSelection::new().sum("status")),
        GroupByArgs::new(Vec::<String>::new()),
    ];
    for args in cases {
        let err = ctx.engine.model("Order").group_by(args).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    let err = ctx
        .engine
        .model("Order")
        .aggregate(AggregateArgs::new(AggregateSelection::new().avg("status")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_upsert_twice_keeps_one_record() {
    let ctx = TestContext::new();
    let args = UpsertArgs::new(
        Filter::eq("email", "a@x.io"),
        Data::new().set("email", "a@x.io").set("name", "Ada"),
        Data::new().set("name", "Ada L."),
    );
    let first = ctx.engine.model("User").upsert(args.clone()).await.unwrap();
    let second = ctx.engine.model("User").upsert(args).await.unwrap();

    assert_eq!(text(&first, "id"), text(&second, "id"));
    assert_eq!(second.get("name"), Some(&Value::from("Ada L.")));
    let all = ctx
        .engine
        .model("User")
        .find_many(FindManyArgs::new())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_error_categories() {
    let ctx = TestContext::new();
    ctx.user("a@x.io", None, &[]).await;

    let err = ctx
        .engine
        .model("User")
        .create(relq_core::proto::CreateArgs::new(
            Data::new().set("email", "a@x.io"),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let err = ctx
        .engine
        .model("User")
        .delete(DeleteArgs::new(Filter::eq("email", "nobody@x.io")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = ctx
        .engine
        .model("Order")
        .create(relq_core::proto::CreateArgs::new(
            Data::new().set("userId", "missing").set("amount", 1.0),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let err = ctx
        .engine
        .model("User")
        .find_many(FindManyArgs::new().with_filter(Filter::eq("nickname", "x")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ctx
        .engine
        .model("Invoice")
        .find_many(FindManyArgs::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_deleting_a_user_cascades_to_orders() {
    let ctx = TestContext::new();
    ctx.user("a@x.io", None, &[1.0, 2.0]).await;
    ctx.user("b@x.io", None, &[3.0]).await;

    let deleted = ctx
        .engine
        .model("User")
        .delete(DeleteArgs::new(Filter::eq("email", "a@x.io")))
        .await
        .unwrap();
    assert_eq!(deleted.get("email"), Some(&Value::from("a@x.io")));

    let orders = ctx
        .engine
        .model("Order")
        .count(relq_core::proto::CountArgs::new())
        .await
        .unwrap();
    assert_eq!(orders, 1);
}

#[tokio::test]
async fn test_json_requests() {
    let ctx = TestContext::new();
    ctx.engine
        .execute_json(
            "User",
            "create",
            json!({"data": {
                "email": "a@x.io",
                "age": 30,
                "orders": {"create": [{"amount": 12.5}, {"amount": 2}]}
            }}),
        )
        .await
        .unwrap();
    ctx.user("b@x.io", Some(20), &[]).await;

    let response = ctx
        .engine
        .execute_json(
            "User",
            "findMany",
            json!({
                "where": {"orders": {"some": {"amount": {"gt": 10}}}},
                "select": {"email": true, "orders": {"orderBy": {"amount": "desc"}, "take": 1}}
            }),
        )
        .await
        .unwrap();
    let Response::Many(users) = response else {
        panic!("expected many records");
    };
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].keys().collect::<Vec<_>>(), vec!["email", "orders"]);
    let orders = users[0].many("orders").unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].get("amount"), Some(&Value::Float(12.5)));

    let response = ctx
        .engine
        .execute_json("User", "count", json!({"where": {"age": {"gte": 25}}}))
        .await
        .unwrap();
    assert_eq!(response, Response::Count(1));

    let err = ctx
        .engine
        .execute_json("User", "findMany", json!({"where": {"age": {"like": 1}}}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ctx
        .engine
        .execute_json("User", "explode", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
