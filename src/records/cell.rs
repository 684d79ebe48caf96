//! # Cells
//!
//! A [`Cell`] pairs one column of the current schema with an optional value.
//! An absent value and a missing cell mean the same thing on disk: neither is
//! written to the row blob.

use std::sync::Arc;

use eyre::Result;

use super::value::Value;
use crate::schema::{Column, ColumnId};

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    column: Arc<Column>,
    value: Option<Value>,
}

impl Cell {
    pub fn new(column: Arc<Column>) -> Self {
        Self {
            column,
            value: None,
        }
    }

    pub fn column(&self) -> &Arc<Column> {
        &self.column
    }

    pub fn id(&self) -> ColumnId {
        self.column.id()
    }

    pub fn name(&self) -> &str {
        self.column.name()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Stores `value`, converting it to the column type when needed. A
    /// string or buffer longer than the column's length prefix allows is a
    /// schema mismatch.
    pub fn set(&mut self, value: Value) -> Result<()> {
        self.value = Some(value.convert_to(self.column.column_type())?);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.value = None;
    }

    pub fn take(&mut self) -> Option<Value> {
        self.value.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use crate::schema::{ColumnDescription, ColumnType};

    fn column(ty: ColumnType) -> Arc<Column> {
        Arc::new(Column::new(1, ColumnDescription::new("c", ty)))
    }

    #[test]
    fn set_converts_to_column_type() {
        let mut cell = Cell::new(column(ColumnType::Int64));

        cell.set(Value::Int32(5)).unwrap();

        assert_eq!(cell.value(), Some(&Value::Int64(5)));
    }

    #[test]
    fn set_rejects_impossible_conversion() {
        let mut cell = Cell::new(column(ColumnType::UInt8));

        let err = cell.set(Value::Int32(-1)).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::SchemaMismatch));
        assert!(!cell.is_present());
    }

    #[test]
    fn clear_and_take() {
        let mut cell = Cell::new(column(ColumnType::Boolean));
        cell.set(Value::Boolean(true)).unwrap();

        assert_eq!(cell.take(), Some(Value::Boolean(true)));
        assert!(!cell.is_present());

        cell.set(Value::Boolean(false)).unwrap();
        cell.clear();
        assert_eq!(cell.value(), None);
    }
}
