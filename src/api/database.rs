use std::sync::Arc;

use crate::api::reference::{CollectionReference, DocumentReference};
use crate::api::transaction::{self, Transaction, TransactionFuture};
use crate::api::write_batch::WriteBatch;
use crate::error::{failed_precondition, DocstoreResult};
use crate::model::{DatabaseId, DocumentKey, ResourcePath, DEFAULT_DATABASE};
use crate::remote::channel::StreamingDatastore;
use crate::remote::datastore::http::{HttpDatastore, DEFAULT_HOST};
use crate::remote::datastore::Datastore;
use crate::remote::serializer::ProtoSerializer;

/// Connection settings for [`Docstore::connect`].
#[derive(Clone, Debug)]
pub struct DocstoreSettings {
    pub project_id: String,
    pub database: String,
    pub host: String,
}

impl DocstoreSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_string(),
            host: DEFAULT_HOST.to_string(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

struct DocstoreInner {
    database_id: DatabaseId,
    serializer: ProtoSerializer,
    datastore: Arc<dyn Datastore>,
    streaming: Option<Arc<dyn StreamingDatastore>>,
}

/// Client handle for one database. Cheap to clone; all clones share the
/// underlying transport.
#[derive(Clone)]
pub struct Docstore {
    inner: Arc<DocstoreInner>,
}

impl Docstore {
    /// Connects over REST. Real-time watches need a streaming transport and
    /// are not available on connections built this way.
    pub fn connect(settings: DocstoreSettings) -> DocstoreResult<Self> {
        let database_id = DatabaseId::new(&settings.project_id, &settings.database);
        let serializer = ProtoSerializer::new(database_id.clone());
        let datastore = Arc::new(HttpDatastore::new(serializer.clone(), &settings.host)?);
        Ok(Self::build(database_id, serializer, datastore, None))
    }

    /// Builds a client over an explicit transport pair. This is how tests
    /// wire up [`crate::remote::datastore::InMemoryDatastore`] and
    /// [`crate::remote::channel::InMemoryListenService`].
    pub fn with_datastore(
        database_id: DatabaseId,
        datastore: Arc<dyn Datastore>,
        streaming: Option<Arc<dyn StreamingDatastore>>,
    ) -> Self {
        let serializer = ProtoSerializer::new(database_id.clone());
        Self::build(database_id, serializer, datastore, streaming)
    }

    fn build(
        database_id: DatabaseId,
        serializer: ProtoSerializer,
        datastore: Arc<dyn Datastore>,
        streaming: Option<Arc<dyn StreamingDatastore>>,
    ) -> Self {
        Self {
            inner: Arc::new(DocstoreInner {
                database_id,
                serializer,
                datastore,
                streaming,
            }),
        }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.inner.database_id
    }

    pub fn serializer(&self) -> &ProtoSerializer {
        &self.inner.serializer
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.datastore
    }

    pub(crate) fn streaming_datastore(&self) -> DocstoreResult<Arc<dyn StreamingDatastore>> {
        self.inner
            .streaming
            .clone()
            .ok_or_else(|| failed_precondition("This connection has no streaming transport"))
    }

    /// A reference to the collection at `path` (odd number of segments).
    pub fn collection(&self, path: &str) -> DocstoreResult<CollectionReference> {
        CollectionReference::new(self.clone(), ResourcePath::from_string(path)?)
    }

    /// A reference to the document at `path` (even number of segments).
    pub fn doc(&self, path: &str) -> DocstoreResult<DocumentReference> {
        Ok(DocumentReference::new(
            self.clone(),
            DocumentKey::from_string(path)?,
        ))
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(self.clone())
    }

    /// Runs `update` inside a transaction, retrying on contention. See
    /// [`transaction::run_transaction`].
    pub async fn run_transaction<T, F>(&self, update: F) -> DocstoreResult<T>
    where
        F: for<'a> FnMut(&'a mut Transaction) -> TransactionFuture<'a, T>,
    {
        transaction::run_transaction(self, update).await
    }
}
