pub mod database;
pub mod operations;
pub mod query;
pub mod reference;
pub mod snapshot;
pub mod transaction;
pub mod write_batch;

pub use database::{Docstore, DocstoreSettings};
pub use operations::SetOptions;
pub use query::{Direction, FilterOperator, Query};
pub use reference::{CollectionReference, DocumentReference};
pub use snapshot::{DocumentChange, DocumentChangeKind, DocumentSnapshot, QuerySnapshot};
pub use transaction::{run_transaction, Transaction};
pub use write_batch::WriteBatch;
