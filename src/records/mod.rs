//! # Rows and Cells
//!
//! In-memory rows and their binary codec.
//!
//! ## Module Structure
//!
//! - `value`: `Value` enum, checked conversions, per-type encoding
//! - `cell`: `Cell`, one column and its optional value
//! - `row`: `Row`, `to_binary`/`from_binary` with schema version skew
//! - `key`: row-key serialization, 128-bit keys, rolling key hash
//!
//! ```rust,ignore
//! let mut row = Row::new(Arc::clone(table.schemas()));
//! row.set("email", "a@b.c")?.set("visits", 1u32)?;
//! row.validate()?;
//! let blob = row.to_binary()?;
//! let key = row.generate_key(DEFAULT_KEY_SEED, None, None)?;
//! ```

pub mod cell;
pub mod key;
pub mod row;
pub mod value;

pub use cell::Cell;
pub use row::Row;
pub use value::Value;
