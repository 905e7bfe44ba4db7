use std::collections::BTreeMap;

use crate::model::{DocumentKey, FieldPath, ResourcePath, Timestamp};
use crate::value::{MapValue, Value};

/// An immutable view of a single document at a point in time. Snapshots for
/// documents that do not exist carry no data but still report a read time.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<MapValue>,
    create_time: Option<Timestamp>,
    update_time: Option<Timestamp>,
    read_time: Option<Timestamp>,
}

impl DocumentSnapshot {
    pub fn new(
        key: DocumentKey,
        data: Option<MapValue>,
        create_time: Option<Timestamp>,
        update_time: Option<Timestamp>,
        read_time: Option<Timestamp>,
    ) -> Self {
        Self {
            key,
            data,
            create_time,
            update_time,
            read_time,
        }
    }

    /// Builds a snapshot for a document that does not exist.
    pub fn missing(key: DocumentKey, read_time: Option<Timestamp>) -> Self {
        Self {
            key,
            data: None,
            create_time: None,
            update_time: None,
            read_time,
        }
    }

    /// Whether the document exists on the backend.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// The decoded document fields, if the document exists.
    pub fn data(&self) -> Option<&BTreeMap<String, Value>> {
        self.data.as_ref().map(|map| map.fields())
    }

    pub fn map_value(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    /// Resolves a field path against the document data.
    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        self.data.as_ref().and_then(|map| map.field(path))
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }

    pub fn update_time(&self) -> Option<Timestamp> {
        self.update_time
    }

    pub fn read_time(&self) -> Option<Timestamp> {
        self.read_time
    }

    pub(crate) fn with_read_time(mut self, read_time: Timestamp) -> Self {
        self.read_time = Some(read_time);
        self
    }
}

/// The kind of transition a document underwent between two consecutive
/// query snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a query snapshot's change list. `old_index`/`new_index` are
/// positions in the previous/new ordered result arrays, with `-1` standing
/// for "not present". Applying the change list in order to the previous
/// array reproduces the new one.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    pub kind: DocumentChangeKind,
    pub document: DocumentSnapshot,
    pub old_index: isize,
    pub new_index: isize,
}

/// The result of executing or watching a query: the ordered matching
/// documents, the change list relative to the previous snapshot, and the
/// consistent read time the view corresponds to.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
    documents: Vec<DocumentSnapshot>,
    changes: Vec<DocumentChange>,
    read_time: Timestamp,
}

impl QuerySnapshot {
    pub fn new(
        documents: Vec<DocumentSnapshot>,
        changes: Vec<DocumentChange>,
        read_time: Timestamp,
    ) -> Self {
        Self {
            documents,
            changes,
            read_time,
        }
    }

    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    /// The per-document changes relative to the previous snapshot. For a
    /// one-shot query every document is reported as added.
    pub fn doc_changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    pub fn read_time(&self) -> Timestamp {
        self.read_time
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn into_documents(self) -> Vec<DocumentSnapshot> {
        self.documents
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = DocumentSnapshot;
    type IntoIter = std::vec::IntoIter<DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_existence() {
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let snapshot = DocumentSnapshot::missing(key, Some(Timestamp::new(1, 0)));
        assert!(!snapshot.exists());
        assert_eq!(snapshot.read_time(), Some(Timestamp::new(1, 0)));
        assert_eq!(snapshot.data(), None);
    }

    #[test]
    fn field_lookup_on_existing_document() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from_string("sf"));
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let snapshot = DocumentSnapshot::new(key, Some(MapValue::new(fields)), None, None, None);
        let path = FieldPath::from_dot_separated("name").unwrap();
        assert_eq!(snapshot.field(&path), Some(&Value::from_string("sf")));
        assert_eq!(snapshot.id(), "sf");
    }
}
