//! The application models through [`relq::open`].

use std::time::Duration;

use relq::proto::{
    CountArgs, CreateArgs, Data, DeleteArgs, Filter, FindManyArgs, FindUniqueArgs, NullKind,
    RelationWrite, SelectEntry, SelectionSpec, TransactionOptions, UpdateArgs, UpsertArgs, Value,
};
use relq::{Config, Engine, ErrorKind};

fn engine() -> Engine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    relq::open(Config::temporary()).unwrap()
}

async fn user(engine: &Engine, email: &str) -> String {
    let record = engine
        .model("User")
        .create(CreateArgs::new(Data::new().set("email", email)))
        .await
        .unwrap();
    record.get("id").and_then(Value::as_str).unwrap().to_string()
}

#[tokio::test]
async fn test_user_defaults() {
    let engine = engine();
    let record = engine
        .model("User")
        .create(CreateArgs::new(Data::new().set("email", "ada@example.com")))
        .await
        .unwrap();
    assert_eq!(record.get("role"), Some(&Value::from("USER")));
    assert_eq!(record.get("isActive"), Some(&Value::Bool(true)));
    assert_eq!(record.get("tags"), Some(&Value::StringList(Vec::new())));
    assert_eq!(record.get("preferences"), Some(&Value::Null));
    assert!(record.get("createdAt").and_then(Value::as_datetime).is_some());
}

#[tokio::test]
async fn test_payments_block_user_deletion() {
    let engine = engine();
    let id = user(&engine, "payer@example.com").await;
    engine
        .model("Payment")
        .create(CreateArgs::new(
            Data::new()
                .set("userId", id.as_str())
                .set("stripePaymentId", "pi_1")
                .set("amount", 9.99)
                .set("status", "succeeded"),
        ))
        .await
        .unwrap();

    let err = engine
        .model("User")
        .delete(DeleteArgs::new(Filter::eq("id", id.as_str())))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    let still_there = engine
        .model("User")
        .find_unique(FindUniqueArgs::new(Filter::eq("id", id.as_str())))
        .await
        .unwrap();
    assert!(still_there.is_some());
}

#[tokio::test]
async fn test_deleting_a_user_orphans_events_and_drops_documents() {
    let engine = engine();
    let id = user(&engine, "writer@example.com").await;
    engine
        .model("User")
        .update(UpdateArgs::new(
            Filter::eq("id", id.as_str()),
            Data::new()
                .relation(
                    "documents",
                    RelationWrite::create(Data::new().set("title", "Draft")),
                )
                .relation(
                    "events",
                    RelationWrite::create(Data::new().set("name", "login")),
                ),
        ))
        .await
        .unwrap();

    engine
        .model("User")
        .delete(DeleteArgs::new(Filter::eq("id", id.as_str())))
        .await
        .unwrap();

    let documents = engine.model("Document").count(CountArgs::new()).await.unwrap();
    assert_eq!(documents, 0);
    let events = engine
        .model("TelemetryEvent")
        .find_many(FindManyArgs::new())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].get("userId"), Some(&Value::Null));
}

#[tokio::test]
async fn test_preferences_keep_null_kinds_apart() {
    let engine = engine();
    user(&engine, "plain@example.com").await;
    engine
        .model("User")
        .create(CreateArgs::new(
            Data::new()
                .set("email", "cleared@example.com")
                .json_null("preferences"),
        ))
        .await
        .unwrap();

    let json_null = engine
        .model("User")
        .find_many(FindManyArgs::new().with_filter(Filter::is_null("preferences", NullKind::Json)))
        .await
        .unwrap();
    assert_eq!(json_null.len(), 1);
    assert_eq!(
        json_null[0].get("email"),
        Some(&Value::from("cleared@example.com"))
    );

    let any_null = engine
        .model("User")
        .count(CountArgs::new().with_filter(Filter::is_null("preferences", NullKind::Any)))
        .await
        .unwrap();
    assert_eq!(any_null, 2);
}

#[tokio::test]
async fn test_subscription_upsert_by_stripe_id() {
    let engine = engine();
    let id = user(&engine, "subscriber@example.com").await;
    let upsert = |status: &str| {
        UpsertArgs::new(
            Filter::eq("stripeSubscriptionId", "sub_1"),
            Data::new()
                .set("userId", id.as_str())
                .set("stripeSubscriptionId", "sub_1")
                .set("status", status),
            Data::new().set("status", status),
        )
    };

    let created = engine.model("Subscription").upsert(upsert("active")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let updated = engine
        .model("Subscription")
        .upsert(upsert("canceled"))
        .await
        .unwrap();

    assert_eq!(created.get("id"), updated.get("id"));
    assert_eq!(updated.get("status"), Some(&Value::from("canceled")));
    assert_eq!(updated.get("cancelAtPeriodEnd"), Some(&Value::Bool(false)));
    let before = created.get("updatedAt").and_then(Value::as_datetime).unwrap();
    let after = updated.get("updatedAt").and_then(Value::as_datetime).unwrap();
    assert!(after > before);

    let count = engine.model("Subscription").count(CountArgs::new()).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_user_with_nested_payments_in_one_transaction() {
    let engine = engine();
    let email = engine
        .transaction(TransactionOptions::new(), |tx| {
            Box::pin(async move {
                let record = tx
                    .model("User")
                    .create(CreateArgs::new(
                        Data::new().set("email", "tx@example.com").relation(
                            "payments",
                            RelationWrite::create(
                                Data::new()
                                    .set("stripePaymentId", "pi_tx")
                                    .set("amount", 5.0)
                                    .set("status", "pending"),
                            ),
                        ),
                    ))
                    .await?;
                Ok(record.get("email").cloned())
            })
        })
        .await
        .unwrap();
    assert_eq!(email, Some(Value::from("tx@example.com")));

    let found = engine
        .model("User")
        .find_unique(
            FindUniqueArgs::new(Filter::eq("email", "tx@example.com")).with_selection(
                SelectionSpec::select(vec![
                    SelectEntry::field("email"),
                    SelectEntry::relation("payments", FindManyArgs::new()),
                ])
                .unwrap(),
            ),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.len(), 2);
    let payments = found.many("payments").unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].get("currency"), Some(&Value::from("gbp")));
}
