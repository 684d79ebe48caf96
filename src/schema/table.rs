//! # Table Schemas
//!
//! [`TableDescription`] is the declarative input handed to the engine: table
//! name, storage model, columns, row-key column names and secondary indexes.
//! Parsing the declarative document is the caller's business; the engine only
//! sees this already structured form.
//!
//! ```rust,ignore
//! let description = TableDescription::new("users", Model::Content)
//!     .with_column(ColumnDescription::new("email", ColumnType::P16String).required())
//!     .with_column(ColumnDescription::new("name", ColumnType::P16String))
//!     .with_row_key(["email"])
//!     .with_secondary_index(IndexDescription::new("by_name", ["name"]));
//! ```
//!
//! A [`TableSchema`] is one resolved version of a description: every column
//! has its permanent id and every name (row key, index column) has been
//! resolved to a column. Unknown names fail fast with a configuration error.
//!
//! ## Lookups
//!
//! Columns are indexed both by name and by id, so `column()` and
//! `column_by_id()` are O(1).

use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::{HashMap, HashSet};

use super::column::{Column, ColumnDescription, ColumnId};
use super::types::Model;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    name: String,
    columns: Vec<String>,
}

impl IndexDescription {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    name: String,
    model: Model,
    columns: Vec<ColumnDescription>,
    row_key: Vec<String>,
    secondary_indexes: Vec<IndexDescription>,
}

impl TableDescription {
    pub fn new(name: impl Into<String>, model: Model) -> Self {
        Self {
            name: name.into(),
            model,
            columns: Vec::new(),
            row_key: Vec::new(),
            secondary_indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDescription) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_row_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.row_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secondary_index(mut self, index: IndexDescription) -> Self {
        self.secondary_indexes.push(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    pub fn row_key(&self) -> &[String] {
        &self.row_key
    }

    pub fn secondary_indexes(&self) -> &[IndexDescription] {
        &self.secondary_indexes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndex {
    name: String,
    columns: Vec<ColumnId>,
}

impl SecondaryIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnId] {
        &self.columns
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    version: u32,
    name: String,
    model: Model,
    columns: Vec<Arc<Column>>,
    by_name: HashMap<String, Arc<Column>>,
    by_id: HashMap<ColumnId, Arc<Column>>,
    row_key: Vec<ColumnId>,
    secondary_indexes: Vec<SecondaryIndex>,
}

impl TableSchema {
    /// Builds a schema from already numbered columns and resolves the
    /// row key and index column names.
    pub(crate) fn build(
        version: u32,
        name: &str,
        model: Model,
        columns: Vec<Column>,
        row_key: &[String],
        secondary_indexes: &[IndexDescription],
    ) -> Result<Self> {
        if name.is_empty() {
            bail!(StorageError::Config("table name must not be empty".to_string()));
        }

        let columns: Vec<Arc<Column>> = columns.into_iter().map(Arc::new).collect();
        let mut by_name = HashMap::with_capacity(columns.len());
        let mut by_id = HashMap::with_capacity(columns.len());

        for column in &columns {
            column.description().check()?;
            if by_name.insert(column.name().to_string(), Arc::clone(column)).is_some() {
                bail!(StorageError::Config(format!(
                    "table '{}' declares column '{}' twice",
                    name,
                    column.name()
                )));
            }
            if by_id.insert(column.id(), Arc::clone(column)).is_some() {
                bail!(StorageError::Config(format!(
                    "table '{}' reuses column id {}",
                    name,
                    column.id()
                )));
            }
        }

        let resolve = |column: &str, what: &str| -> Result<ColumnId> {
            by_name
                .get(column)
                .map(|c: &Arc<Column>| c.id())
                .ok_or_else(|| {
                    StorageError::Config(format!(
                        "{} of table '{}' names unknown column '{}'",
                        what, name, column
                    ))
                    .into()
                })
        };

        if row_key.is_empty() {
            bail!(StorageError::Config(format!(
                "table '{}' has no row key columns",
                name
            )));
        }
        let mut seen = HashSet::new();
        let mut key_ids = Vec::with_capacity(row_key.len());
        for column in row_key {
            let id = resolve(column, "row key")?;
            if !seen.insert(id) {
                bail!(StorageError::Config(format!(
                    "row key of table '{}' lists '{}' twice",
                    name, column
                )));
            }
            key_ids.push(id);
        }

        let mut indexes = Vec::with_capacity(secondary_indexes.len());
        for index in secondary_indexes {
            let columns = index
                .columns()
                .iter()
                .map(|c| resolve(c, "secondary index"))
                .collect::<Result<Vec<_>>>()?;
            indexes.push(SecondaryIndex {
                name: index.name().to_string(),
                columns,
            });
        }

        Ok(Self {
            version,
            name: name.to_string(),
            model,
            columns,
            by_name,
            by_id,
            row_key: key_ids,
            secondary_indexes: indexes,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Arc<Column>> {
        self.by_name.get(name)
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&Arc<Column>> {
        self.by_id.get(&id)
    }

    pub fn row_key(&self) -> &[ColumnId] {
        &self.row_key
    }

    pub fn row_key_columns(&self) -> impl Iterator<Item = &Arc<Column>> {
        self.row_key.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn secondary_indexes(&self) -> &[SecondaryIndex] {
        &self.secondary_indexes
    }

    pub fn max_column_id(&self) -> ColumnId {
        self.columns.iter().map(|c| c.id()).max().unwrap_or(0)
    }

    /// Same layout as `other`, ignoring the version number.
    pub fn same_layout(&self, other: &TableSchema) -> bool {
        self.name == other.name
            && self.model == other.model
            && self.row_key == other.row_key
            && self.secondary_indexes == other.secondary_indexes
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.as_ref() == b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use crate::schema::types::ColumnType;

    fn numbered(descriptions: &[ColumnDescription]) -> Vec<Column> {
        descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| Column::new(i as ColumnId + 1, d.clone()))
            .collect()
    }

    fn users() -> TableDescription {
        TableDescription::new("users", Model::Content)
            .with_column(ColumnDescription::new("email", ColumnType::P16String).required())
            .with_column(ColumnDescription::new("name", ColumnType::P16String))
            .with_column(ColumnDescription::new("age", ColumnType::UInt8))
            .with_row_key(["email"])
            .with_secondary_index(IndexDescription::new("by_name", ["name", "age"]))
    }

    fn build(d: &TableDescription) -> Result<TableSchema> {
        TableSchema::build(
            1,
            d.name(),
            d.model(),
            numbered(d.columns()),
            d.row_key(),
            d.secondary_indexes(),
        )
    }

    #[test]
    fn lookups_by_name_and_id() {
        let schema = build(&users()).unwrap();

        assert_eq!(schema.column("name").unwrap().id(), 2);
        assert_eq!(schema.column_by_id(3).unwrap().name(), "age");
        assert!(schema.column("missing").is_none());
        assert_eq!(schema.row_key(), &[1]);
        assert_eq!(schema.secondary_indexes()[0].columns(), &[2, 3]);
        assert_eq!(schema.max_column_id(), 3);
    }

    #[test]
    fn unknown_row_key_column_fails_fast() {
        let d = users().with_row_key(["id"]);

        let err = build(&d).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Config));
        assert!(err.to_string().contains("'id'"));
    }

    #[test]
    fn empty_row_key_is_rejected() {
        let d = users().with_row_key(Vec::<String>::new());

        assert_eq!(error_kind(&build(&d).unwrap_err()), Some(ErrorKind::Config));
    }

    #[test]
    fn unknown_index_column_fails() {
        let d = users().with_secondary_index(IndexDescription::new("bad", ["nope"]));

        assert_eq!(error_kind(&build(&d).unwrap_err()), Some(ErrorKind::Config));
    }

    #[test]
    fn duplicate_column_names_fail() {
        let d = users().with_column(ColumnDescription::new("age", ColumnType::UInt16));

        assert_eq!(error_kind(&build(&d).unwrap_err()), Some(ErrorKind::Config));
    }

    #[test]
    fn same_layout_ignores_version() {
        let d = users();
        let a = build(&d).unwrap();
        let b = TableSchema::build(
            7,
            d.name(),
            d.model(),
            numbered(d.columns()),
            d.row_key(),
            d.secondary_indexes(),
        )
        .unwrap();

        assert!(a.same_layout(&b));
        assert_ne!(a.version(), b.version());
    }
}
