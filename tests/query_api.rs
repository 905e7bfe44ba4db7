use std::collections::BTreeMap;
use std::sync::Arc;

use docstore::remote::datastore::InMemoryDatastore;
use docstore::{DatabaseId, Direction, Docstore, DocumentChangeKind, FilterOperator, Value};

fn docstore() -> Docstore {
    Docstore::with_datastore(
        DatabaseId::default_database("project"),
        Arc::new(InMemoryDatastore::new()),
        None,
    )
}

async fn seed_cities(docstore: &Docstore) {
    for (id, population) in [("sf", 870_000), ("la", 3_900_000), ("nyc", 8_800_000)] {
        let mut data = BTreeMap::new();
        data.insert("population".to_string(), Value::from_integer(population));
        docstore
            .doc(&format!("cities/{id}"))
            .unwrap()
            .set(data)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn filters_and_orders_results() {
    let docstore = docstore();
    seed_cities(&docstore).await;

    let snapshot = docstore
        .collection("cities")
        .unwrap()
        .query()
        .where_field(
            "population",
            FilterOperator::GreaterThan,
            Value::from_integer(1_000_000),
        )
        .unwrap()
        .order_by("population", Direction::Descending)
        .unwrap()
        .get()
        .await
        .unwrap();

    let ids: Vec<_> = snapshot.documents().iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["nyc", "la"]);
    assert!(snapshot
        .doc_changes()
        .iter()
        .all(|change| change.kind == DocumentChangeKind::Added));
}

#[tokio::test]
async fn limit_truncates_after_ordering() {
    let docstore = docstore();
    seed_cities(&docstore).await;

    let snapshot = docstore
        .collection("cities")
        .unwrap()
        .query()
        .order_by("population", Direction::Ascending)
        .unwrap()
        .limit(1)
        .get()
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.documents()[0].id(), "sf");
}

#[tokio::test]
async fn default_order_is_document_path() {
    let docstore = docstore();
    seed_cities(&docstore).await;

    let snapshot = docstore
        .collection("cities")
        .unwrap()
        .query()
        .get()
        .await
        .unwrap();
    let ids: Vec<_> = snapshot.documents().iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["la", "nyc", "sf"]);
}
