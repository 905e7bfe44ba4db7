use std::cmp::Ordering;
use std::sync::Arc;

use crate::api::snapshot::DocumentSnapshot;
use crate::model::DocumentKey;

/// Total order over result documents. Comparators built by
/// [`crate::api::query::QueryDefinition::comparator`] always break ties on
/// the document key, so two distinct documents never compare equal.
pub type DocumentComparator =
    Arc<dyn Fn(&DocumentSnapshot, &DocumentSnapshot) -> Ordering + Send + Sync>;

/// A set of documents kept sorted under a [`DocumentComparator`]. Insertions
/// and removals report the index they happened at, which is what the
/// change-list computation needs.
pub struct DocumentSet {
    comparator: DocumentComparator,
    documents: Vec<DocumentSnapshot>,
}

impl DocumentSet {
    pub fn new(comparator: DocumentComparator) -> Self {
        Self {
            comparator,
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn comparator(&self) -> &DocumentComparator {
        &self.comparator
    }

    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.index_of(key).is_some()
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&DocumentSnapshot> {
        self.index_of(key).map(|index| &self.documents[index])
    }

    fn index_of(&self, key: &DocumentKey) -> Option<usize> {
        self.documents
            .iter()
            .position(|document| document.key() == key)
    }

    /// Inserts `document` at its sorted position and returns that index.
    /// A document with the same key must be removed first.
    pub fn insert(&mut self, document: DocumentSnapshot) -> usize {
        debug_assert!(!self.contains(document.key()));
        let index = self
            .documents
            .binary_search_by(|existing| (self.comparator)(existing, &document))
            .unwrap_or_else(|index| index);
        self.documents.insert(index, document);
        index
    }

    /// Removes the document with `key`, returning its former index.
    pub fn remove(&mut self, key: &DocumentKey) -> Option<(usize, DocumentSnapshot)> {
        let index = self.index_of(key)?;
        let document = self.documents.remove(index);
        Some((index, document))
    }

    pub fn to_vec(&self) -> Vec<DocumentSnapshot> {
        self.documents.clone()
    }
}
