use std::collections::BTreeMap;

use rand::Rng;

use crate::api::database::Docstore;
use crate::api::operations::{self, SetOptions};
use crate::api::query::{Query, QueryDefinition};
use crate::api::snapshot::DocumentSnapshot;
use crate::error::{invalid_argument, DocstoreError, DocstoreResult};
use crate::model::{DocumentKey, ResourcePath, Timestamp};
use crate::remote::datastore::WriteOperation;
use crate::value::Value;
use crate::watch::{ListenerRegistration, Watch};

const AUTO_ID_LENGTH: usize = 20;
const AUTO_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn auto_id() -> String {
    let mut rng = rand::thread_rng();
    (0..AUTO_ID_LENGTH)
        .map(|_| AUTO_ID_ALPHABET[rng.gen_range(0..AUTO_ID_ALPHABET.len())] as char)
        .collect()
}

/// A reference to a collection. Collections are implicit; they exist exactly
/// when they contain documents.
#[derive(Clone)]
pub struct CollectionReference {
    docstore: Docstore,
    path: ResourcePath,
}

impl std::fmt::Debug for CollectionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionReference")
            .field("path", &self.path)
            .finish()
    }
}

impl CollectionReference {
    pub(crate) fn new(docstore: Docstore, path: ResourcePath) -> DocstoreResult<Self> {
        if path.is_empty() || path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Collection paths must have an odd number of segments",
            ));
        }
        Ok(Self { docstore, path })
    }

    pub fn id(&self) -> &str {
        self.path
            .last_segment()
            .expect("collection path is never empty")
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn doc(&self, id: &str) -> DocstoreResult<DocumentReference> {
        if id.is_empty() || id.contains('/') {
            return Err(invalid_argument("Document ids cannot be empty or contain '/'"));
        }
        let key = DocumentKey::from_path(self.path.child([id]))?;
        Ok(DocumentReference::new(self.docstore.clone(), key))
    }

    /// Creates a document with a random 20-character id.
    pub async fn add(&self, data: BTreeMap<String, Value>) -> DocstoreResult<DocumentReference> {
        let reference = self.doc(&auto_id())?;
        reference.set(data).await?;
        Ok(reference)
    }

    pub fn query(&self) -> Query {
        Query::from_definition(
            self.docstore.clone(),
            QueryDefinition::for_collection(self.path.clone()),
        )
    }
}

/// A reference to a single document.
#[derive(Clone)]
pub struct DocumentReference {
    docstore: Docstore,
    key: DocumentKey,
}

impl std::fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentReference")
            .field("key", &self.key)
            .finish()
    }
}

impl DocumentReference {
    pub(crate) fn new(docstore: Docstore, key: DocumentKey) -> Self {
        Self { docstore, key }
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub(crate) fn docstore(&self) -> &Docstore {
        &self.docstore
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn parent(&self) -> DocstoreResult<CollectionReference> {
        CollectionReference::new(self.docstore.clone(), self.key.collection_path())
    }

    pub async fn get(&self) -> DocstoreResult<DocumentSnapshot> {
        self.docstore.datastore().get_document(&self.key, None).await
    }

    /// Replaces the document with `data`.
    pub async fn set(&self, data: BTreeMap<String, Value>) -> DocstoreResult<Timestamp> {
        self.set_with_options(data, SetOptions::default()).await
    }

    pub async fn set_with_options(
        &self,
        data: BTreeMap<String, Value>,
        options: SetOptions,
    ) -> DocstoreResult<Timestamp> {
        let encoded = operations::encode_set_data(data, &options)?;
        self.docstore
            .datastore()
            .commit(
                vec![WriteOperation::Set {
                    key: self.key.clone(),
                    data: encoded.map,
                    mask: encoded.mask,
                }],
                None,
            )
            .await
    }

    /// Updates the named fields. Keys may be dot-separated paths. Fails if
    /// the document does not exist.
    pub async fn update(&self, data: BTreeMap<String, Value>) -> DocstoreResult<Timestamp> {
        let encoded = operations::encode_update_data(data)?;
        self.docstore
            .datastore()
            .commit(
                vec![WriteOperation::Update {
                    key: self.key.clone(),
                    data: encoded.map,
                    field_paths: encoded.field_paths,
                }],
                None,
            )
            .await
    }

    /// Deletes the document. Deleting a missing document is not an error.
    pub async fn delete(&self) -> DocstoreResult<Timestamp> {
        self.docstore
            .datastore()
            .commit(
                vec![WriteOperation::Delete {
                    key: self.key.clone(),
                }],
                None,
            )
            .await
    }

    /// Subscribes to this document. The first callback fires once the
    /// backend confirms the initial state, including for documents that do
    /// not exist.
    pub fn on_snapshot<F, E>(&self, on_next: F, on_error: E) -> DocstoreResult<ListenerRegistration>
    where
        F: FnMut(DocumentSnapshot) + Send + 'static,
        E: FnOnce(DocstoreError) + Send + 'static,
    {
        let streaming = self.docstore.streaming_datastore()?;
        let watch = Watch::for_document(
            streaming,
            self.docstore.serializer().clone(),
            self.key.clone(),
        );
        let key = self.key.clone();
        let mut on_next = on_next;
        Ok(watch.subscribe(
            Box::new(move |view| {
                let snapshot = view
                    .documents
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| DocumentSnapshot::missing(key.clone(), Some(view.read_time)));
                on_next(snapshot);
            }),
            Box::new(on_error),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatabaseId;
    use crate::remote::datastore::InMemoryDatastore;
    use std::sync::Arc;

    fn docstore() -> Docstore {
        Docstore::with_datastore(
            DatabaseId::default_database("project"),
            Arc::new(InMemoryDatastore::new()),
            None,
        )
    }

    #[test]
    fn auto_ids_are_well_formed() {
        let id = auto_id();
        assert_eq!(id.len(), AUTO_ID_LENGTH);
        assert!(id.bytes().all(|b| AUTO_ID_ALPHABET.contains(&b)));
        assert_ne!(auto_id(), auto_id());
    }

    #[test]
    fn doc_appends_a_single_path_segment() {
        let collection = docstore().collection("cities").unwrap();
        let reference = collection.doc("sf").unwrap();
        assert_eq!(reference.path().canonical_string(), "cities/sf");
        assert_eq!(reference.id(), "sf");
        assert_eq!(reference.parent().unwrap().id(), "cities");
    }

    #[test]
    fn doc_rejects_bad_ids() {
        let collection = docstore().collection("cities").unwrap();
        assert!(collection.doc("").is_err());
        assert!(collection.doc("a/b").is_err());
    }

    #[tokio::test]
    async fn set_get_update_delete_roundtrip() {
        let docstore = docstore();
        let reference = docstore.doc("cities/sf").unwrap();

        let mut data = BTreeMap::new();
        data.insert("population".to_string(), Value::from_integer(870_000));
        reference.set(data).await.unwrap();

        let mut patch = BTreeMap::new();
        patch.insert("population".to_string(), Value::from_integer(900_000));
        reference.update(patch).await.unwrap();

        let snapshot = reference.get().await.unwrap();
        assert_eq!(
            snapshot
                .field(&crate::model::FieldPath::from_dot_separated("population").unwrap())
                .and_then(Value::as_integer),
            Some(900_000)
        );

        reference.delete().await.unwrap();
        assert!(!reference.get().await.unwrap().exists());
        // Deleting again is still fine.
        reference.delete().await.unwrap();
    }

    #[tokio::test]
    async fn add_generates_distinct_documents() {
        let docstore = docstore();
        let collection = docstore.collection("cities").unwrap();
        let first = collection.add(BTreeMap::new()).await.unwrap();
        let second = collection.add(BTreeMap::new()).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(first.get().await.unwrap().exists());
    }
}
