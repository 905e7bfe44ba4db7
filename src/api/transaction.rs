use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use log::debug;

use crate::api::database::Docstore;
use crate::api::operations::{self, SetOptions};
use crate::api::reference::DocumentReference;
use crate::api::snapshot::DocumentSnapshot;
use crate::api::write_batch::MAX_BATCH_WRITES;
use crate::error::{
    failed_precondition, resource_exhausted, DocstoreErrorCode, DocstoreResult,
};
use crate::model::Timestamp;
use crate::remote::datastore::WriteOperation;
use crate::util::runtime::sleep;
use crate::value::Value;
use crate::watch::backoff::ExponentialBackoff;

pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

pub type TransactionFuture<'a, T> =
    Pin<Box<dyn Future<Output = DocstoreResult<T>> + Send + 'a>>;

/// A transactional context handed to the update closure of
/// [`run_transaction`]. All reads must happen before the first write.
pub struct Transaction {
    docstore: Docstore,
    id: Vec<u8>,
    writes: Vec<WriteOperation>,
}

impl Transaction {
    fn new(docstore: Docstore, id: Vec<u8>) -> Self {
        Self {
            docstore,
            id,
            writes: Vec::new(),
        }
    }

    /// Reads a document under this transaction's consistency.
    pub async fn get(&mut self, reference: &DocumentReference) -> DocstoreResult<DocumentSnapshot> {
        if !self.writes.is_empty() {
            return Err(failed_precondition(
                "Transactions require all reads to happen before all writes",
            ));
        }
        self.docstore
            .datastore()
            .get_document(reference.key(), Some(&self.id))
            .await
    }

    pub fn set(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<&mut Self> {
        self.set_with_options(reference, data, SetOptions::default())
    }

    pub fn set_with_options(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, Value>,
        options: SetOptions,
    ) -> DocstoreResult<&mut Self> {
        self.ensure_capacity()?;
        let encoded = operations::encode_set_data(data, &options)?;
        self.writes.push(WriteOperation::Set {
            key: reference.key().clone(),
            data: encoded.map,
            mask: encoded.mask,
        });
        Ok(self)
    }

    pub fn update(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<&mut Self> {
        self.ensure_capacity()?;
        let encoded = operations::encode_update_data(data)?;
        self.writes.push(WriteOperation::Update {
            key: reference.key().clone(),
            data: encoded.map,
            field_paths: encoded.field_paths,
        });
        Ok(self)
    }

    pub fn delete(&mut self, reference: &DocumentReference) -> DocstoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.writes.push(WriteOperation::Delete {
            key: reference.key().clone(),
        });
        Ok(self)
    }

    fn ensure_capacity(&self) -> DocstoreResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(resource_exhausted(format!(
                "A transaction cannot contain more than {MAX_BATCH_WRITES} writes"
            )));
        }
        Ok(())
    }
}

/// Runs `update` against a fresh transaction, committing its writes
/// atomically. Commits that lose against concurrent writers fail with
/// `Aborted`; those are retried with backoff, re-running the closure from
/// scratch, up to [`MAX_TRANSACTION_ATTEMPTS`] times. Errors returned by
/// the closure roll the transaction back and are not retried.
pub async fn run_transaction<T, F>(docstore: &Docstore, mut update: F) -> DocstoreResult<T>
where
    F: for<'a> FnMut(&'a mut Transaction) -> TransactionFuture<'a, T>,
{
    let mut backoff = ExponentialBackoff::new();
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let id = docstore.datastore().begin_transaction().await?;
        let mut transaction = Transaction::new(docstore.clone(), id);

        let result = match update(&mut transaction).await {
            Ok(result) => result,
            Err(err) => {
                let _ = docstore
                    .datastore()
                    .rollback(transaction.id.clone())
                    .await;
                return Err(err);
            }
        };

        match commit(docstore, transaction).await {
            Ok(_) => return Ok(result),
            Err(err) if err.code == DocstoreErrorCode::Aborted
                && attempt < MAX_TRANSACTION_ATTEMPTS =>
            {
                let delay = backoff.next_delay();
                debug!("transaction aborted, retrying in {delay:?} (attempt {attempt})");
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn commit(docstore: &Docstore, transaction: Transaction) -> DocstoreResult<Timestamp> {
    docstore
        .datastore()
        .commit(transaction.writes, Some(transaction.id))
        .await
}
