//! # blockdb - Block-Structured Table Storage
//!
//! blockdb stores each table in one file of fixed-size, typed blocks. Rows
//! are encoded against a versioned schema, so tables can evolve without
//! rewriting the rows already on disk.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blockdb::{ColumnDescription, ColumnType, Model, Table, TableConfig, TableDescription};
//!
//! let description = TableDescription::new("users", Model::Content)
//!     .with_column(ColumnDescription::new("email", ColumnType::P16String).required())
//!     .with_column(ColumnDescription::new("visits", ColumnType::UInt32))
//!     .with_row_key(["email"]);
//!
//! let mut table = Table::open("./data", &description, TableConfig::default())?;
//!
//! let mut row = table.new_row();
//! row.set("email", "ada@example.com")?.set("visits", 1u32)?;
//! let key = table.row_key(&row)?;
//! let reference = table.insert_row(&row)?;
//!
//! let stored = table.read_row(reference)?;
//! table.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │              Table                  │
//! ├──────────────────┬──────────────────┤
//! │  Schema history  │  Row / Cell      │
//! ├──────────────────┴──────────────────┤
//! │  VirtualBuffer   │  FreeSpace       │
//! ├─────────────────────────────────────┤
//! │  Typed blocks    │  FreeList        │
//! ├─────────────────────────────────────┤
//! │  DbFile (per-page mmap, dir lock)   │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! data_dir/
//! ├── global.lock       # held while a table file is created
//! └── users.snapdb      # SDBT header, SCHM chain, DATA/FSPC/FREE blocks
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: page-mapped file, typed blocks, free lists, virtual buffers
//! - [`schema`]: column types, table descriptions, schema history
//! - [`records`]: values, cells, rows, row keys
//! - [`hash`]: rolling 32-bit hash and 128-bit row key hash
//! - [`table`]: the pieces wired into one table file
//! - [`config`], [`error`]: constants, table settings, error kinds

#[macro_use]
mod macros;

pub mod config;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod records;
pub mod schema;
pub mod storage;
pub mod table;

pub use config::{TableConfig, TableConfigBuilder, DEFAULT_KEY_SEED};
pub use error::{error_kind, ErrorKind, StorageError};
pub use hash::{murmur3_x64_128, RollingHash, RowKey};
pub use records::{Cell, Row, Value};
pub use schema::{
    Column, ColumnDescription, ColumnFlags, ColumnId, ColumnType, IndexDescription, Model,
    SchemaHistory, TableDescription, TableSchema,
};
pub use table::Table;
