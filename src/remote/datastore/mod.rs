use std::sync::Arc;

use async_trait::async_trait;

use crate::api::query::QueryDefinition;
use crate::api::snapshot::DocumentSnapshot;
use crate::error::DocstoreResult;
use crate::model::{DocumentKey, FieldPath, Timestamp};
use crate::value::MapValue;

pub mod http;
pub mod in_memory;

/// One mutation inside a commit. Writes are encoded and applied in order,
/// atomically with the rest of the batch.
#[derive(Clone, Debug)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
    },
    Update {
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

/// Unary access to the backend. The streaming listen channel lives behind
/// [`crate::remote::channel::StreamingDatastore`] instead.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Fetches a single document. Returns a non-existent snapshot rather
    /// than an error when the document is missing. When `transaction` is
    /// given, the read happens under that transaction's consistency.
    async fn get_document(
        &self,
        key: &DocumentKey,
        transaction: Option<&[u8]>,
    ) -> DocstoreResult<DocumentSnapshot>;

    async fn run_query(&self, query: &QueryDefinition) -> DocstoreResult<Vec<DocumentSnapshot>>;

    /// Atomically applies a batch of writes, optionally committing the given
    /// transaction. Returns the commit time.
    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<Vec<u8>>,
    ) -> DocstoreResult<Timestamp>;

    async fn begin_transaction(&self) -> DocstoreResult<Vec<u8>>;

    async fn rollback(&self, transaction: Vec<u8>) -> DocstoreResult<()>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn get_token(&self) -> DocstoreResult<Option<String>>;
    fn invalidate_token(&self);
}

#[derive(Default, Clone)]
pub struct NoopTokenProvider;

#[async_trait]
impl TokenProvider for NoopTokenProvider {
    async fn get_token(&self) -> DocstoreResult<Option<String>> {
        Ok(None)
    }

    fn invalidate_token(&self) {}
}

pub type TokenProviderArc = Arc<dyn TokenProvider>;

pub use http::{HttpDatastore, RetrySettings};
pub use in_memory::InMemoryDatastore;
