//! # Column Definitions
//!
//! A [`ColumnDescription`] is what a table description declares: name, type,
//! flags and optional constraints. Once a schema assigns it an id it becomes
//! a [`Column`]. Ids are permanent: a later schema version keeps the id of a
//! column with the same name and type.
//!
//! ```rust,ignore
//! let email = ColumnDescription::new("email", ColumnType::P16String)
//!     .required()
//!     .with_max_length(320);
//!
//! let visits = ColumnDescription::new("visits", ColumnType::UInt32)
//!     .with_default(Value::UInt32(0))
//!     .with_max_value(1_000_000.0);
//! ```
//!
//! ## Constraints
//!
//! | Constraint       | Applies to      | Checked by            |
//! |------------------|-----------------|-----------------------|
//! | REQUIRED         | any             | `Row::validate`       |
//! | min/max value    | numeric columns | `Row::validate`       |
//! | min/max length   | strings/buffers | `Row::validate`       |
//! | default value    | any             | `Row::apply_defaults` |
//!
//! Setting a limit also sets `LIMITED`; setting a default sets
//! `DEFAULT_VALUE`.

use eyre::{bail, Result};

use super::types::{ColumnFlags, ColumnType};
use crate::error::StorageError;
use crate::records::Value;

/// Column identifier. 0 is reserved as the row blob terminator.
pub type ColumnId = u16;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    name: String,
    column_type: ColumnType,
    flags: ColumnFlags,
    default_value: Option<Value>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    min_length: Option<u32>,
    max_length: Option<u32>,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            flags: ColumnFlags::NONE,
            default_value: None,
            min_value: None,
            max_value: None,
            min_length: None,
            max_length: None,
        }
    }

    pub fn with_flags(mut self, flags: ColumnFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn required(self) -> Self {
        self.with_flags(ColumnFlags::REQUIRED)
    }

    pub fn encrypted(self) -> Self {
        self.with_flags(ColumnFlags::ENCRYPT)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self.with_flags(ColumnFlags::DEFAULT_VALUE)
    }

    pub fn with_min_value(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self.with_flags(ColumnFlags::LIMITED)
    }

    pub fn with_max_value(mut self, max: f64) -> Self {
        self.max_value = Some(max);
        self.with_flags(ColumnFlags::LIMITED)
    }

    pub fn with_min_length(mut self, min: u32) -> Self {
        self.min_length = Some(min);
        self.with_flags(ColumnFlags::LIMITED)
    }

    pub fn with_max_length(mut self, max: u32) -> Self {
        self.max_length = Some(max);
        self.with_flags(ColumnFlags::LIMITED)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn min_value(&self) -> Option<f64> {
        self.min_value
    }

    pub fn max_value(&self) -> Option<f64> {
        self.max_value
    }

    pub fn min_length(&self) -> Option<u32> {
        self.min_length
    }

    pub fn max_length(&self) -> Option<u32> {
        self.max_length
    }

    /// Checks the description is internally consistent.
    pub(crate) fn check(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > u16::MAX as usize {
            bail!(StorageError::Config(format!(
                "column name '{}' must be 1 to {} bytes",
                self.name,
                u16::MAX
            )));
        }
        if let Some(default) = &self.default_value {
            if !default.matches(self.column_type) {
                bail!(StorageError::Config(format!(
                    "default {} of column '{}' is not a {}",
                    default, self.name, self.column_type
                )));
            }
        }
        let numeric = self.column_type.is_integer() || self.column_type.is_float();
        if (self.min_value.is_some() || self.max_value.is_some()) && !numeric {
            bail!(StorageError::Config(format!(
                "value limits on non-numeric column '{}'",
                self.name
            )));
        }
        let sized = self.column_type.length_prefix().is_some();
        if (self.min_length.is_some() || self.max_length.is_some()) && !sized {
            bail!(StorageError::Config(format!(
                "length limits on fixed-size column '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    id: ColumnId,
    description: ColumnDescription,
}

impl Column {
    pub(crate) fn new(id: ColumnId, description: ColumnDescription) -> Self {
        assert_ne!(id, 0, "column id 0 is reserved");
        Self { id, description }
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.description.name()
    }

    pub fn column_type(&self) -> ColumnType {
        self.description.column_type()
    }

    pub fn flags(&self) -> ColumnFlags {
        self.description.flags()
    }

    pub fn is_required(&self) -> bool {
        self.flags().contains(ColumnFlags::REQUIRED)
    }

    pub fn description(&self) -> &ColumnDescription {
        &self.description
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.description.default_value()
    }

    /// Checks a cell value against the column's type and constraints.
    /// `None` is an absent cell.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        let Some(value) = value else {
            if self.is_required() {
                bail!(StorageError::Constraint(format!(
                    "column '{}' is required",
                    self.name()
                )));
            }
            return Ok(());
        };

        if !value.matches(self.column_type()) {
            bail!(StorageError::SchemaMismatch(format!(
                "column '{}' is {}, got {}",
                self.name(),
                self.column_type(),
                value
            )));
        }

        let d = &self.description;
        if let Some(v) = value.as_f64() {
            if d.min_value.is_some_and(|min| v < min) || d.max_value.is_some_and(|max| v > max) {
                bail!(StorageError::Constraint(format!(
                    "{} is outside [{}, {}] for column '{}'",
                    value,
                    d.min_value.map_or("-inf".to_string(), |m| m.to_string()),
                    d.max_value.map_or("inf".to_string(), |m| m.to_string()),
                    self.name()
                )));
            }
        }
        if let Some(len) = value.payload_len() {
            let len = len as u64;
            if d.min_length.is_some_and(|min| len < min as u64)
                || d.max_length.is_some_and(|max| len > max as u64)
            {
                bail!(StorageError::Constraint(format!(
                    "length {} is outside the limits of column '{}'",
                    len,
                    self.name()
                )));
            }
        }
        Ok(())
    }

    /// Same name and type: the column keeps its id across versions.
    pub(crate) fn is_same_column(&self, description: &ColumnDescription) -> bool {
        self.name() == description.name() && self.column_type() == description.column_type()
    }
}
