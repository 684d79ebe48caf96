//! # Table Configuration
//!
//! `TableConfig` carries the settings a table file is opened with. It is
//! built through `TableConfig::builder()`:
//!
//! ```ignore
//! let config = TableConfig::builder()
//!     .page_size(8192)
//!     .free_block_batch(32)
//!     .key_seed(0x1234_5678)
//!     .build()?;
//! ```
//!
//! | Option           | Default                 | Description                               |
//! |------------------|-------------------------|-------------------------------------------|
//! | page_size        | 16384                   | Block size for newly created files        |
//! | free_block_batch | 16                      | Free blocks appended when the list is dry |
//! | sparse           | false                   | Leave free blocks as holes in the file    |
//! | key_seed         | `DEFAULT_KEY_SEED`      | Seed of the 128-bit row key hash          |
//! | sync_immediate   | true                    | `Table::sync` waits for the flush         |
//!
//! The page size only matters when a file is created. Reopening a file
//! always uses the page size recorded in its header.

use eyre::{bail, Result};

use super::constants::{
    DEFAULT_FREE_BLOCK_BATCH, DEFAULT_KEY_SEED, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE,
};
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    page_size: usize,
    free_block_batch: usize,
    sparse: bool,
    key_seed: u32,
    sync_immediate: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            free_block_batch: DEFAULT_FREE_BLOCK_BATCH,
            sparse: false,
            key_seed: DEFAULT_KEY_SEED,
            sync_immediate: true,
        }
    }
}

impl TableConfig {
    pub fn builder() -> TableConfigBuilder {
        TableConfigBuilder::new()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn free_block_batch(&self) -> usize {
        self.free_block_batch
    }

    pub fn sparse(&self) -> bool {
        self.sparse
    }

    pub fn key_seed(&self) -> u32 {
        self.key_seed
    }

    pub fn sync_immediate(&self) -> bool {
        self.sync_immediate
    }
}

#[derive(Debug, Default)]
pub struct TableConfigBuilder {
    page_size: Option<usize>,
    free_block_batch: Option<usize>,
    sparse: Option<bool>,
    key_seed: Option<u32>,
    sync_immediate: Option<bool>,
}

impl TableConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block size for new files. Rounded up to the OS page size by the file
    /// layer, so 5000 becomes 8192 on a system with 4KB pages.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = Some(bytes);
        self
    }

    pub fn free_block_batch(mut self, count: usize) -> Self {
        self.free_block_batch = Some(count);
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = Some(sparse);
        self
    }

    /// Overrides the row key seed. Production deployments keep the default;
    /// every process reading a table must use the seed it was written with.
    pub fn key_seed(mut self, seed: u32) -> Self {
        self.key_seed = Some(seed);
        self
    }

    pub fn sync_immediate(mut self, immediate: bool) -> Self {
        self.sync_immediate = Some(immediate);
        self
    }

    pub fn build(self) -> Result<TableConfig> {
        let defaults = TableConfig::default();

        let page_size = self.page_size.unwrap_or(defaults.page_size);
        if page_size < MIN_PAGE_SIZE {
            bail!(StorageError::Config(format!(
                "page size {} is smaller than the minimum {}",
                page_size, MIN_PAGE_SIZE
            )));
        }

        let free_block_batch = self.free_block_batch.unwrap_or(defaults.free_block_batch);
        if free_block_batch == 0 {
            bail!(StorageError::Config("free block batch must be at least 1".to_string()));
        }

        Ok(TableConfig {
            page_size,
            free_block_batch,
            sparse: self.sparse.unwrap_or(defaults.sparse),
            key_seed: self.key_seed.unwrap_or(defaults.key_seed),
            sync_immediate: self.sync_immediate.unwrap_or(defaults.sync_immediate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};

    #[test]
    fn builder_defaults_match_constants() {
        let config = TableConfig::builder().build().unwrap();

        assert_eq!(config, TableConfig::default());
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(config.free_block_batch(), DEFAULT_FREE_BLOCK_BATCH);
        assert_eq!(config.key_seed(), DEFAULT_KEY_SEED);
        assert!(!config.sparse());
        assert!(config.sync_immediate());
    }

    #[test]
    fn builder_overrides() {
        let config = TableConfig::builder()
            .page_size(8192)
            .free_block_batch(4)
            .sparse(true)
            .key_seed(7)
            .sync_immediate(false)
            .build()
            .unwrap();

        assert_eq!(config.page_size(), 8192);
        assert_eq!(config.free_block_batch(), 4);
        assert!(config.sparse());
        assert_eq!(config.key_seed(), 7);
        assert!(!config.sync_immediate());
    }

    #[test]
    fn builder_rejects_tiny_pages() {
        let err = TableConfig::builder().page_size(512).build().unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Config));
    }

    #[test]
    fn builder_rejects_empty_batch() {
        let err = TableConfig::builder()
            .free_block_batch(0)
            .build()
            .unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Config));
    }
}
