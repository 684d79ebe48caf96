//! # Rows
//!
//! A [`Row`] is a sparse set of cells addressed by the column ids of the
//! table's current schema.
//!
//! ## Binary Layout
//!
//! ```text
//! +----------------+-----------+---------+-----------+---------+-----+
//! | schema version | column id | value   | column id | value   | ... |
//! | u32            | u16       | typed   | u16       | typed   |     |
//! +----------------+-----------+---------+-----------+---------+-----+
//! ```
//!
//! Only present cells are written, in column id order. Fixed-size values are
//! little-endian; strings and buffers carry the 1, 2 or 4-byte length prefix
//! of their column type. Column id 0 never names a column: decoding stops at
//! it so blobs may be padded with zeros.
//!
//! ## Version Skew
//!
//! A blob written under an older schema version is decoded with that
//! version's columns, then re-homed into the current version by column name:
//!
//! - a column that still exists is converted to its current type,
//! - a column that was dropped is read (to keep the cursor aligned) and
//!   discarded,
//! - a column added since stays absent.
//!
//! The row is not re-persisted; callers that want the new layout on disk
//! write it back.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use tracing::warn;

use super::cell::Cell;
use super::value::Value;
use crate::config::MAX_BLOB_SIZE;
use crate::encoding::{put_u16, put_u32, Reader};
use crate::error::StorageError;
use crate::schema::{ColumnId, SchemaHistory, TableSchema};

#[derive(Debug, Clone)]
pub struct Row {
    schemas: Arc<SchemaHistory>,
    cells: BTreeMap<ColumnId, Cell>,
}

impl Row {
    pub fn new(schemas: Arc<SchemaHistory>) -> Self {
        Self {
            schemas,
            cells: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        self.schemas.current()
    }

    pub fn schemas(&self) -> &Arc<SchemaHistory> {
        &self.schemas
    }

    /// Returns the cell of column `id`. A missing cell is created when
    /// `create` is set and the column exists.
    pub fn get_cell(&mut self, id: ColumnId, create: bool) -> Result<&mut Cell> {
        if !self.cells.contains_key(&id) {
            let column = self
                .schema()
                .column_by_id(id)
                .ok_or_else(|| StorageError::not_found("column", id))?;
            if !create {
                bail!(StorageError::not_found("cell", column.name()));
            }
            let cell = Cell::new(Arc::clone(column));
            self.cells.insert(id, cell);
        }
        // INVARIANT: inserted above when missing
        Ok(self.cells.get_mut(&id).expect("cell exists"))
    }

    pub fn get_cell_by_name(&mut self, name: &str, create: bool) -> Result<&mut Cell> {
        let id = self
            .schema()
            .column(name)
            .map(|c| c.id())
            .ok_or_else(|| StorageError::not_found("column", name))?;
        self.get_cell(id, create)
    }

    /// Sets the value of the named column.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        self.get_cell_by_name(name, true)?.set(value.into())?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let id = self.schema().column(name)?.id();
        self.cells.get(&id)?.value()
    }

    pub fn get_by_id(&self, id: ColumnId) -> Option<&Value> {
        self.cells.get(&id)?.value()
    }

    /// Present cells in column id order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values().filter(|c| c.is_present())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let id = self.schema().column(name)?.id();
        self.cells.remove(&id)?.take()
    }

    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        put_u32(&mut buf, self.schemas.current_version());

        for cell in self.cells() {
            // INVARIANT: cells() only yields present cells
            let value = cell.value().expect("present cell");
            put_u16(&mut buf, cell.id());
            value
                .encode(cell.column().column_type(), &mut buf)
                .wrap_err_with(|| format!("encoding column '{}'", cell.name()))?;
        }

        if buf.len() as u64 > MAX_BLOB_SIZE {
            bail!(StorageError::Size(format!(
                "row blob of {} bytes exceeds the {} byte limit",
                buf.len(),
                MAX_BLOB_SIZE
            )));
        }
        Ok(buf)
    }

    pub fn from_binary(schemas: Arc<SchemaHistory>, data: &[u8]) -> Result<Row> {
        let mut reader = Reader::new(data);
        let version = reader.u32("row schema version")?;
        let stored = Arc::clone(schemas.version(version)?);
        let current = Arc::clone(schemas.current());
        let skewed = stored.version() != current.version();

        let mut row = Row::new(schemas);
        while !reader.is_empty() {
            let id = reader.u16("column id")?;
            if id == 0 {
                break;
            }
            let column = stored.column_by_id(id).ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "row names column id {} unknown to schema version {}",
                    id, version
                ))
            })?;
            let value = Value::decode(column.column_type(), &mut reader)
                .wrap_err_with(|| format!("decoding column '{}'", column.name()))?;

            if !skewed {
                row.get_cell(id, true)?.set(value)?;
                continue;
            }

            match current.column(column.name()) {
                Some(target) => {
                    let converted = value.convert_to(target.column_type()).wrap_err_with(|| {
                        format!(
                            "converting column '{}' from schema version {} to {}",
                            column.name(),
                            version,
                            current.version()
                        )
                    })?;
                    row.get_cell(target.id(), true)?.set(converted)?;
                }
                None => warn!(
                    table = current.name(),
                    column = column.name(),
                    stored_version = version,
                    current_version = current.version(),
                    "dropping stored column missing from current schema"
                ),
            }
        }
        Ok(row)
    }

    /// Checks every column of the current schema against its constraints.
    pub fn validate(&self) -> Result<()> {
        for column in self.schema().columns() {
            let value = self.get_by_id(column.id());
            column.validate(value)?;
        }
        Ok(())
    }

    /// Fills absent cells of columns that declare a default.
    pub fn apply_defaults(&mut self) -> Result<()> {
        let schema = Arc::clone(self.schema());
        for column in schema.columns() {
            let Some(default) = column.default_value() else {
                continue;
            };
            if self.get_by_id(column.id()).is_none() {
                self.get_cell(column.id(), true)?.set(default.clone())?;
            }
        }
        Ok(())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        let pairs = |row: &Row| -> Vec<(ColumnId, Option<Value>)> {
            row.cells().map(|c| (c.id(), c.value().cloned())).collect()
        };
        self.schema().version() == other.schema().version() && pairs(self) == pairs(other)
    }
}
