use std::cmp::Ordering;
use std::sync::Arc;

use crate::api::database::Docstore;
use crate::api::snapshot::{DocumentChange, DocumentChangeKind, DocumentSnapshot, QuerySnapshot};
use crate::error::{invalid_argument, DocstoreError, DocstoreResult};
use crate::model::{FieldPath, IntoFieldPath, ResourcePath, Timestamp};
use crate::value::order::{compare_values, same_sort_class};
use crate::value::Value;
use crate::watch::document_set::DocumentComparator;
use crate::watch::{ListenerRegistration, Watch};

/// Relational operators supported by field filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: Value,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn matches(&self, snapshot: &DocumentSnapshot) -> bool {
        let Some(actual) = snapshot.field(&self.field) else {
            return false;
        };
        match self.operator {
            FilterOperator::Equal => compare_values(actual, &self.value) == Ordering::Equal,
            FilterOperator::NotEqual => compare_values(actual, &self.value) != Ordering::Equal,
            FilterOperator::LessThan => {
                same_sort_class(actual, &self.value)
                    && compare_values(actual, &self.value) == Ordering::Less
            }
            FilterOperator::LessThanOrEqual => {
                same_sort_class(actual, &self.value)
                    && compare_values(actual, &self.value) != Ordering::Greater
            }
            FilterOperator::GreaterThan => {
                same_sort_class(actual, &self.value)
                    && compare_values(actual, &self.value) == Ordering::Greater
            }
            FilterOperator::GreaterThanOrEqual => {
                same_sort_class(actual, &self.value)
                    && compare_values(actual, &self.value) != Ordering::Less
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrderBy {
    field: FieldPath,
    direction: Direction,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// The transport-independent description of a query: target collection,
/// filters, explicit ordering, and result limit.
#[derive(Clone, Debug)]
pub struct QueryDefinition {
    pub(crate) collection_path: ResourcePath,
    pub(crate) filters: Vec<FieldFilter>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<u32>,
}

impl QueryDefinition {
    pub(crate) fn new(collection_path: ResourcePath) -> DocstoreResult<Self> {
        if collection_path.is_empty() || collection_path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Queries must reference a collection (odd number of path segments)",
            ));
        }
        Ok(Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        })
    }

    /// Builds a definition for an already-validated collection path.
    pub(crate) fn for_collection(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn parent_path(&self) -> ResourcePath {
        self.collection_path.without_last()
    }

    pub fn collection_id(&self) -> &str {
        self.collection_path
            .last_segment()
            .expect("collection path always ends with an identifier")
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Whether the given document belongs to this query's result set.
    pub fn matches(&self, snapshot: &DocumentSnapshot) -> bool {
        if snapshot.key().collection_path() != self.collection_path {
            return false;
        }
        self.filters.iter().all(|filter| filter.matches(snapshot))
    }

    /// Builds the total order over result documents: the explicit order-by
    /// list first, then the document path as tiebreaker (reversed when the
    /// last explicit ordering is descending).
    pub fn comparator(&self) -> DocumentComparator {
        let order_by = self.order_by.clone();
        let tiebreak_direction = order_by
            .last()
            .map(|order| order.direction)
            .unwrap_or(Direction::Ascending);

        Arc::new(move |left: &DocumentSnapshot, right: &DocumentSnapshot| {
            for order in &order_by {
                let ordering = if order.field.is_document_id() {
                    left.key().cmp(right.key())
                } else {
                    match (left.field(&order.field), right.field(&order.field)) {
                        (Some(l), Some(r)) => compare_values(l, r),
                        (Some(_), None) => Ordering::Greater,
                        (None, Some(_)) => Ordering::Less,
                        (None, None) => Ordering::Equal,
                    }
                };
                let ordering = match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }

            let tie = left.key().cmp(right.key());
            match tiebreak_direction {
                Direction::Ascending => tie,
                Direction::Descending => tie.reverse(),
            }
        })
    }
}

/// A query targeting one collection, optionally narrowed by filters,
/// ordering, and a limit.
#[derive(Clone)]
pub struct Query {
    docstore: Docstore,
    definition: QueryDefinition,
}

impl Query {
    pub(crate) fn new(docstore: Docstore, collection_path: ResourcePath) -> DocstoreResult<Self> {
        Ok(Self {
            docstore,
            definition: QueryDefinition::new(collection_path)?,
        })
    }

    pub(crate) fn from_definition(docstore: Docstore, definition: QueryDefinition) -> Self {
        Self {
            docstore,
            definition,
        }
    }

    pub fn docstore(&self) -> &Docstore {
        &self.docstore
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    /// Adds a field filter. Filters combine conjunctively.
    pub fn where_field(
        mut self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: Value,
    ) -> DocstoreResult<Self> {
        let field = field.into_field_path()?;
        self.definition.filters.push(FieldFilter {
            field,
            operator,
            value,
        });
        Ok(self)
    }

    /// Appends an explicit ordering on `field`.
    pub fn order_by(
        mut self,
        field: impl IntoFieldPath,
        direction: Direction,
    ) -> DocstoreResult<Self> {
        let field = field.into_field_path()?;
        self.definition.order_by.push(OrderBy { field, direction });
        Ok(self)
    }

    /// Caps the number of returned documents.
    pub fn limit(mut self, limit: u32) -> Self {
        self.definition.limit = Some(limit);
        self
    }

    /// Executes the query once against the backend.
    pub async fn get(&self) -> DocstoreResult<QuerySnapshot> {
        let mut documents = self.docstore.datastore().run_query(&self.definition).await?;
        let comparator = self.definition.comparator();
        documents.sort_by(|a, b| comparator(a, b));
        if let Some(limit) = self.definition.limit {
            documents.truncate(limit as usize);
        }

        let read_time = documents
            .iter()
            .filter_map(DocumentSnapshot::read_time)
            .max()
            .unwrap_or_else(Timestamp::now);
        let changes = documents
            .iter()
            .enumerate()
            .map(|(index, document)| DocumentChange {
                kind: DocumentChangeKind::Added,
                document: document.clone(),
                old_index: -1,
                new_index: index as isize,
            })
            .collect();
        Ok(QuerySnapshot::new(documents, changes, read_time))
    }

    /// Subscribes to the query. `on_next` receives a consistent snapshot
    /// every time the result set settles; `on_error` fires at most once when
    /// the subscription terminates.
    pub fn on_snapshot<F, E>(&self, on_next: F, on_error: E) -> DocstoreResult<ListenerRegistration>
    where
        F: FnMut(QuerySnapshot) + Send + 'static,
        E: FnOnce(DocstoreError) + Send + 'static,
    {
        let streaming = self.docstore.streaming_datastore()?;
        let watch = Watch::for_query(
            streaming,
            self.docstore.serializer().clone(),
            self.definition.clone(),
            self.definition.comparator(),
        );
        let mut on_next = on_next;
        Ok(watch.subscribe(
            Box::new(move |view| {
                on_next(QuerySnapshot::new(view.documents, view.changes, view.read_time));
            }),
            Box::new(on_error),
        ))
    }
}
