use std::collections::BTreeMap;

use crate::api::database::Docstore;
use crate::api::operations::{self, SetOptions};
use crate::api::reference::DocumentReference;
use crate::error::{invalid_argument, resource_exhausted, DocstoreResult};
use crate::model::Timestamp;
use crate::remote::datastore::WriteOperation;
use crate::value::Value;

pub const MAX_BATCH_WRITES: usize = 500;

/// Aggregates writes and commits them atomically: either every operation is
/// applied or none is.
pub struct WriteBatch {
    docstore: Docstore,
    writes: Vec<WriteOperation>,
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl WriteBatch {
    pub(crate) fn new(docstore: Docstore) -> Self {
        Self {
            docstore,
            writes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
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
        self.ensure_same_docstore(reference)?;
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
        self.ensure_same_docstore(reference)?;
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
        self.ensure_same_docstore(reference)?;
        self.writes.push(WriteOperation::Delete {
            key: reference.key().clone(),
        });
        Ok(self)
    }

    /// Commits the queued writes. An empty batch commits trivially.
    pub async fn commit(self) -> DocstoreResult<Timestamp> {
        if self.writes.is_empty() {
            return Ok(Timestamp::now());
        }
        self.docstore.datastore().commit(self.writes, None).await
    }

    fn ensure_same_docstore(&self, reference: &DocumentReference) -> DocstoreResult<()> {
        if reference.docstore().database_id() != self.docstore.database_id() {
            return Err(invalid_argument(
                "All batch operations must target the same database",
            ));
        }
        Ok(())
    }

    fn ensure_capacity(&self) -> DocstoreResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(resource_exhausted(format!(
                "A write batch cannot contain more than {MAX_BATCH_WRITES} operations"
            )));
        }
        Ok(())
    }
}
