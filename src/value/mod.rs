mod array_value;
mod bytes_value;
pub(crate) mod map_value;
pub mod order;
mod value;

pub use array_value::ArrayValue;
pub use bytes_value::BytesValue;
pub use map_value::MapValue;
pub use value::{Value, ValueKind};
