//! Async client for Firestore-compatible document databases.
//!
//! Documents are maps of typed values stored at slash-separated paths and
//! grouped into implicit collections. The client offers one-shot reads,
//! atomic write batches, optimistic transactions, queries, and real-time
//! watches that stream consistent, ordered snapshots with per-document
//! change lists.
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use docstore::{Docstore, DocstoreSettings, Value};
//!
//! # async fn example() -> docstore::DocstoreResult<()> {
//! let docstore = Docstore::connect(DocstoreSettings::new("my-project"))?;
//! let city = docstore.doc("cities/sf")?;
//!
//! let mut data = BTreeMap::new();
//! data.insert("population".to_string(), Value::from_integer(870_000));
//! city.set(data).await?;
//!
//! let snapshot = city.get().await?;
//! assert!(snapshot.exists());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod error;
pub mod model;
pub mod remote;
pub mod util;
pub mod value;
pub mod watch;

pub use api::{
    CollectionReference, Direction, Docstore, DocstoreSettings, DocumentChange,
    DocumentChangeKind, DocumentReference, DocumentSnapshot, FilterOperator, Query, QuerySnapshot,
    SetOptions, Transaction, WriteBatch,
};
pub use error::{DocstoreError, DocstoreErrorCode, DocstoreResult};
pub use model::{DatabaseId, DocumentKey, FieldPath, ResourcePath, Timestamp};
pub use value::{MapValue, Value};
pub use watch::{ListenerRegistration, ViewSnapshot};
