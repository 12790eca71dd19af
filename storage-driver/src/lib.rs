//! The storage driver contract: positional byte access over a hierarchy of
//! virtual paths, implemented by every storage backend.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::ReadStream;
pub use driver::Reader;
pub use error::StorageError;
pub use error::StorageErrorBuilder;
pub use error::StorageErrorKind;
