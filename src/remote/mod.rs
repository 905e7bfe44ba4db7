//! Everything that talks to the backend: the wire codec, the unary
//! datastore, and the streaming listen channel.

pub mod channel;
pub mod datastore;
pub mod listen;
pub mod rpc_error;
pub mod serializer;

pub use channel::{ListenStream, StreamingDatastore};
pub use datastore::{Datastore, InMemoryDatastore, WriteOperation};
pub use serializer::ProtoSerializer;
