use std::collections::{BTreeMap, HashSet};

use async_lock::Mutex;
use async_trait::async_trait;

use crate::api::query::QueryDefinition;
use crate::api::snapshot::DocumentSnapshot;
use crate::error::{failed_precondition, not_found, DocstoreError, DocstoreResult};
use crate::model::{DocumentKey, Timestamp};
use crate::value::map_value::{remove_at, set_at};
use crate::value::MapValue;

use super::{Datastore, WriteOperation};

#[derive(Clone, Debug)]
struct StoredDocument {
    data: MapValue,
    create_time: Timestamp,
    update_time: Timestamp,
}

#[derive(Default)]
struct InMemoryState {
    documents: BTreeMap<DocumentKey, StoredDocument>,
    open_transactions: HashSet<Vec<u8>>,
    next_transaction: u64,
    fail_next_commit: Option<DocstoreError>,
}

/// Process-local datastore used by tests and offline tooling. Semantics
/// mirror the backend: batches apply atomically, updates require the
/// document to exist, and commits under an unknown transaction fail.
#[derive(Default)]
pub struct InMemoryDatastore {
    state: Mutex<InMemoryState>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with `error`. Used to exercise
    /// transaction retry behavior.
    pub async fn fail_next_commit(&self, error: DocstoreError) {
        self.state.lock().await.fail_next_commit = Some(error);
    }

    pub async fn document_count(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    fn apply_write(
        state: &mut InMemoryState,
        write: &WriteOperation,
        now: Timestamp,
    ) -> DocstoreResult<()> {
        match write {
            WriteOperation::Set { key, data, mask } => {
                let merged = match (mask, state.documents.get(key)) {
                    (Some(mask), existing) => {
                        let mut fields = existing
                            .map(|stored| stored.data.fields().clone())
                            .unwrap_or_default();
                        for path in mask {
                            match data.field(path) {
                                Some(value) => set_at(&mut fields, path.segments(), value.clone()),
                                None => remove_at(&mut fields, path.segments()),
                            }
                        }
                        MapValue::new(fields)
                    }
                    (None, _) => data.clone(),
                };
                let create_time = state
                    .documents
                    .get(key)
                    .map(|stored| stored.create_time)
                    .unwrap_or(now);
                state.documents.insert(
                    key.clone(),
                    StoredDocument {
                        data: merged,
                        create_time,
                        update_time: now,
                    },
                );
            }
            WriteOperation::Update {
                key,
                data,
                field_paths,
            } => {
                let Some(stored) = state.documents.get(key) else {
                    return Err(not_found(format!(
                        "No document to update: {}",
                        key.path().canonical_string()
                    )));
                };
                let mut fields = stored.data.fields().clone();
                for path in field_paths {
                    match data.field(path) {
                        Some(value) => set_at(&mut fields, path.segments(), value.clone()),
                        None => remove_at(&mut fields, path.segments()),
                    }
                }
                let create_time = stored.create_time;
                state.documents.insert(
                    key.clone(),
                    StoredDocument {
                        data: MapValue::new(fields),
                        create_time,
                        update_time: now,
                    },
                );
            }
            WriteOperation::Delete { key } => {
                state.documents.remove(key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(
        &self,
        key: &DocumentKey,
        _transaction: Option<&[u8]>,
    ) -> DocstoreResult<DocumentSnapshot> {
        let state = self.state.lock().await;
        let read_time = Timestamp::now();
        match state.documents.get(key) {
            Some(stored) => Ok(DocumentSnapshot::new(
                key.clone(),
                Some(stored.data.clone()),
                Some(stored.create_time),
                Some(stored.update_time),
                Some(read_time),
            )),
            None => Ok(DocumentSnapshot::missing(key.clone(), Some(read_time))),
        }
    }

    async fn run_query(&self, query: &QueryDefinition) -> DocstoreResult<Vec<DocumentSnapshot>> {
        let state = self.state.lock().await;
        let read_time = Timestamp::now();
        let mut results = Vec::new();
        for (key, stored) in &state.documents {
            let snapshot = DocumentSnapshot::new(
                key.clone(),
                Some(stored.data.clone()),
                Some(stored.create_time),
                Some(stored.update_time),
                Some(read_time),
            );
            if query.matches(&snapshot) {
                results.push(snapshot);
            }
        }
        Ok(results)
    }

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<Vec<u8>>,
    ) -> DocstoreResult<Timestamp> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.fail_next_commit.take() {
            return Err(error);
        }
        if let Some(transaction) = &transaction {
            if !state.open_transactions.remove(transaction) {
                return Err(failed_precondition("Unknown or already-used transaction"));
            }
        }

        // Stage against a copy so a failing write leaves the store untouched.
        let mut staged = InMemoryState {
            documents: state.documents.clone(),
            ..Default::default()
        };
        let now = Timestamp::now();
        for write in &writes {
            Self::apply_write(&mut staged, write, now)?;
        }
        state.documents = staged.documents;
        Ok(now)
    }

    async fn begin_transaction(&self) -> DocstoreResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        state.next_transaction += 1;
        let id = state.next_transaction.to_be_bytes().to_vec();
        state.open_transactions.insert(id.clone());
        Ok(id)
    }

    async fn rollback(&self, transaction: Vec<u8>) -> DocstoreResult<()> {
        let mut state = self.state.lock().await;
        state.open_transactions.remove(&transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldPath, ResourcePath};
    use crate::value::Value;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn data(entries: Vec<(&str, Value)>) -> MapValue {
        let mut map = BTreeMap::new();
        for (name, value) in entries {
            map.insert(name.to_string(), value);
        }
        MapValue::new(map)
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = InMemoryDatastore::new();
        store
            .commit(
                vec![WriteOperation::Set {
                    key: key("cities/sf"),
                    data: data(vec![("name", Value::from_string("sf"))]),
                    mask: None,
                }],
                None,
            )
            .await
            .unwrap();

        let snapshot = store.get_document(&key("cities/sf"), None).await.unwrap();
        assert!(snapshot.exists());
        assert_eq!(
            snapshot.field(&FieldPath::from_dot_separated("name").unwrap()),
            Some(&Value::from_string("sf"))
        );
    }

    #[tokio::test]
    async fn merge_set_preserves_unmasked_fields() {
        let store = InMemoryDatastore::new();
        store
            .commit(
                vec![WriteOperation::Set {
                    key: key("cities/sf"),
                    data: data(vec![
                        ("name", Value::from_string("sf")),
                        ("population", Value::from_integer(870_000)),
                    ]),
                    mask: None,
                }],
                None,
            )
            .await
            .unwrap();
        store
            .commit(
                vec![WriteOperation::Set {
                    key: key("cities/sf"),
                    data: data(vec![("population", Value::from_integer(900_000))]),
                    mask: Some(vec![FieldPath::from_dot_separated("population").unwrap()]),
                }],
                None,
            )
            .await
            .unwrap();

        let snapshot = store.get_document(&key("cities/sf"), None).await.unwrap();
        assert_eq!(
            snapshot.field(&FieldPath::from_dot_separated("name").unwrap()),
            Some(&Value::from_string("sf"))
        );
        assert_eq!(
            snapshot.field(&FieldPath::from_dot_separated("population").unwrap()),
            Some(&Value::from_integer(900_000))
        );
    }

    #[tokio::test]
    async fn update_of_missing_document_fails_atomically() {
        let store = InMemoryDatastore::new();
        let err = store
            .commit(
                vec![
                    WriteOperation::Set {
                        key: key("cities/sf"),
                        data: data(vec![]),
                        mask: None,
                    },
                    WriteOperation::Update {
                        key: key("cities/ghost"),
                        data: data(vec![("name", Value::from_string("x"))]),
                        field_paths: vec![FieldPath::from_dot_separated("name").unwrap()],
                    },
                ],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "docstore/not-found");
        // The batch failed as a whole.
        assert_eq!(store.document_count().await, 0);
    }

    #[tokio::test]
    async fn query_filters_by_collection() {
        let store = InMemoryDatastore::new();
        store
            .commit(
                vec![
                    WriteOperation::Set {
                        key: key("cities/sf"),
                        data: data(vec![]),
                        mask: None,
                    },
                    WriteOperation::Set {
                        key: key("towns/tiny"),
                        data: data(vec![]),
                        mask: None,
                    },
                ],
                None,
            )
            .await
            .unwrap();

        let definition =
            QueryDefinition::new(ResourcePath::from_string("cities").unwrap()).unwrap();
        let results = store.run_query(&definition).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "sf");
    }

    #[tokio::test]
    async fn transaction_ids_are_single_use() {
        let store = InMemoryDatastore::new();
        let transaction = store.begin_transaction().await.unwrap();
        store
            .commit(Vec::new(), Some(transaction.clone()))
            .await
            .unwrap();
        let err = store.commit(Vec::new(), Some(transaction)).await.unwrap_err();
        assert_eq!(err.code_str(), "docstore/failed-precondition");
    }
}
