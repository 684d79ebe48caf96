//! # Schema History
//!
//! Every schema version a table has ever used stays available: rows are
//! stamped with the version they were written under and decoded against it,
//! then re-homed into the current version.
//!
//! Applying a new [`TableDescription`]:
//!
//! 1. Each declared column reuses the id of the current column with the same
//!    name and type. Anything else (new name, or same name with a new type)
//!    gets a fresh id from a counter that never goes backwards.
//! 2. If the resolved layout equals the current one nothing happens.
//! 3. Otherwise the result becomes version `current + 1`.
//!
//! Column ids are never recycled, so an id always means the same column
//! across all versions.

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{bail, Result};
use tracing::debug;

use super::column::{Column, ColumnId};
use super::table::{TableDescription, TableSchema};
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct SchemaHistory {
    versions: BTreeMap<u32, Arc<TableSchema>>,
    next_column_id: ColumnId,
}

impl SchemaHistory {
    /// Starts a history at version 1 with ids assigned from 1 in
    /// declaration order.
    pub fn new(description: &TableDescription) -> Result<Self> {
        let mut history = Self {
            versions: BTreeMap::new(),
            next_column_id: 1,
        };
        let schema = history.resolve(1, description, None)?;
        history.versions.insert(1, Arc::new(schema));
        Ok(history)
    }

    /// Rebuilds a history from decoded versions.
    pub(crate) fn from_versions(
        versions: Vec<TableSchema>,
        next_column_id: ColumnId,
    ) -> Result<Self> {
        if versions.is_empty() {
            bail!(StorageError::Corrupt("schema history has no versions".to_string()));
        }
        let mut map = BTreeMap::new();
        for schema in versions {
            if schema.max_column_id() >= next_column_id {
                bail!(StorageError::Corrupt(format!(
                    "schema version {} uses column id {} but the next id is {}",
                    schema.version(),
                    schema.max_column_id(),
                    next_column_id
                )));
            }
            let version = schema.version();
            if map.insert(version, Arc::new(schema)).is_some() {
                bail!(StorageError::Corrupt(format!("schema version {} stored twice", version)));
            }
        }
        Ok(Self {
            versions: map,
            next_column_id,
        })
    }

    /// Applies a description. Returns true when a new version was created.
    pub fn apply(&mut self, description: &TableDescription) -> Result<bool> {
        let current = Arc::clone(self.current());
        if description.name() != current.name() {
            bail!(StorageError::Config(format!(
                "table '{}' cannot be renamed to '{}'",
                current.name(),
                description.name()
            )));
        }

        let next_id = self.next_column_id;
        let candidate = match self.resolve(current.version() + 1, description, Some(&current)) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.next_column_id = next_id;
                return Err(e);
            }
        };
        if candidate.same_layout(&current) {
            self.next_column_id = next_id;
            return Ok(false);
        }

        debug!(
            table = candidate.name(),
            from = current.version(),
            to = candidate.version(),
            columns = candidate.columns().len(),
            "schema version changed"
        );
        self.versions
            .insert(candidate.version(), Arc::new(candidate));
        Ok(true)
    }

    fn resolve(
        &mut self,
        version: u32,
        description: &TableDescription,
        current: Option<&TableSchema>,
    ) -> Result<TableSchema> {
        let mut columns = Vec::with_capacity(description.columns().len());
        for declared in description.columns() {
            let reused = current
                .and_then(|schema| schema.column(declared.name()))
                .filter(|column| column.is_same_column(declared))
                .map(|column| column.id());
            let id = match reused {
                Some(id) => id,
                None => self.allocate_column_id(description.name())?,
            };
            columns.push(Column::new(id, declared.clone()));
        }

        TableSchema::build(
            version,
            description.name(),
            description.model(),
            columns,
            description.row_key(),
            description.secondary_indexes(),
        )
    }

    fn allocate_column_id(&mut self, table: &str) -> Result<ColumnId> {
        let id = self.next_column_id;
        self.next_column_id = id.checked_add(1).ok_or_else(|| {
            StorageError::Config(format!("table '{}' ran out of column ids", table))
        })?;
        Ok(id)
    }

    pub fn current(&self) -> &Arc<TableSchema> {
        // INVARIANT: constructors reject an empty history
        self.versions
            .values()
            .next_back()
            .expect("schema history is never empty")
    }

    pub fn current_version(&self) -> u32 {
        self.current().version()
    }

    pub fn version(&self, version: u32) -> Result<&Arc<TableSchema>> {
        self.versions
            .get(&version)
            .ok_or_else(|| StorageError::not_found("schema version", version).into())
    }

    pub fn versions(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.versions.values()
    }

    pub fn next_column_id(&self) -> ColumnId {
        self.next_column_id
    }
}
