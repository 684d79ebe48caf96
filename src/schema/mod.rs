//! # Table Schemas
//!
//! A table is described once by an external declarative document; the caller
//! turns it into a [`TableDescription`] and the engine resolves it into a
//! numbered [`TableSchema`].
//!
//! ## Versions
//!
//! ```text
//! SchemaHistory
//! ├── v1: a(1):int32  b(2):p16string      row key: b
//! └── v2: b(2):p16string  c(3):uint32     row key: b
//! ```
//!
//! Column ids are permanent. A row written under v1 is decoded with v1 and
//! re-homed into v2 by column name; `a` is dropped and `c` starts absent.
//!
//! ## Persistence
//!
//! The history is stored as one blob in a chain of SCHM blocks referenced by
//! the table header (see [`persistence`]).

pub mod column;
pub mod history;
pub mod persistence;
pub mod table;
pub mod types;

pub use column::{Column, ColumnDescription, ColumnId};
pub use history::SchemaHistory;
pub use persistence::{decode_history, encode_history};
pub use table::{IndexDescription, SecondaryIndex, TableDescription, TableSchema};
pub use types::{ColumnFlags, ColumnType, Model};
