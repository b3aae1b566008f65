//! Module: dbcore-types
//! Responsibility: the value/record codec, column and index metadata,
//! row identifiers, and the shared error taxonomy used at every component
//! boundary in the engine.
//! Does not own: predicate derivation, locking, logging, or execution —
//! those live in `dbcore` and depend on this crate, not the other way round.

pub mod col;
pub mod error;
pub mod record;
pub mod rid;
pub mod tabcol;
pub mod value;

pub use col::{ColMeta, IndexMeta};
pub use error::{DbError, ErrorKind, ErrorOrigin};
pub use record::Record;
pub use rid::Rid;
pub use tabcol::TabCol;
pub use value::{ColType, Value};
