//! # Tables
//!
//! A [`Table`] is one `<name>.snapdb` file: a table header block at offset 0,
//! the schema history in a chain of SCHM blocks, and rows in DATA blocks.
//!
//! ```rust,ignore
//! let mut table = Table::open(dir, &description, TableConfig::default())?;
//!
//! let mut row = table.new_row();
//! row.set("email", "a@b.c")?;
//! let reference = table.insert_row(&row)?;
//!
//! let row = table.read_row(reference)?;
//! table.close()?;
//! ```
//!
//! ## Row Slots
//!
//! A row is stored in one slot inside a DATA block and is addressed by the
//! file offset of the slot (its reference):
//!
//! ```text
//! +----------------+--------------+---------------------------+
//! | capacity (u32) | length (u32) | row blob (length bytes)   |
//! +----------------+--------------+---------------------------+
//!                                  <------ capacity bytes ---->
//! ```
//!
//! A length of 0 marks an empty slot; a row blob always has at least its
//! 4-byte schema version. Space for a slot comes from, in order:
//!
//! 1. the free space index (slots released by deletes and moves),
//! 2. the current data block,
//! 3. a new data block from the page free list.
//!
//! An update that still fits the slot capacity is written in place. A larger
//! row moves to a new slot, the old slot goes to the free space index with
//! the `MOVED` flag, and the new reference is returned.
//!
//! ## Schema
//!
//! Opening an existing table loads its schema history and applies the given
//! description. If that creates a new version the history is rewritten.
//! Existing rows are not touched; they are converted when read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use tracing::{debug, warn};

use crate::config::{
    TableConfig, DATA_BLOCK_HEADER_SIZE, ROW_SLOT_HEADER_SIZE, TABLE_FILE_EXTENSION,
};
use crate::error::StorageError;
use crate::hash::RowKey;
use crate::records::Row;
use crate::schema::{decode_history, encode_history, SchemaHistory, TableDescription, TableSchema};
use crate::storage::{
    Block, BlockType, DataBlock, DbFile, FreeList, FreeSpace, FreeSpaceEntry, FreeSpaceFlags,
    SchemaBlock, TableHeaderBlock, VirtualBuffer, SCHEMA_BLOCK_HEADER_SIZE,
};

#[derive(Debug)]
pub struct Table {
    file: DbFile,
    header: Option<Block>,
    freelist: FreeList,
    free_space: FreeSpace,
    schemas: Arc<SchemaHistory>,
    config: TableConfig,
}

impl Table {
    /// Opens the table described by `description` in `dir`, creating the
    /// file when it does not exist.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        description: &TableDescription,
        config: TableConfig,
    ) -> Result<Self> {
        let path = Self::file_path(dir.as_ref(), description.name());
        let freelist = FreeList::new(config.free_block_batch());
        let initial = SchemaHistory::new(description)?;

        let (mut file, created) = DbFile::open_or_create(&path, config.page_size(), |file| {
            file.set_sparse(config.sparse());
            initialize(file, freelist, &initial, config.sync_immediate())
        })
        .wrap_err_with(|| format!("opening table '{}'", path.display()))?;
        file.set_sparse(config.sparse());

        let header = Block::load_typed(&mut file, 0, BlockType::TableHeader)?;
        let mut table = Self {
            file,
            header: Some(header),
            freelist,
            free_space: FreeSpace::new(freelist),
            schemas: Arc::new(initial),
            config,
        };

        if !created {
            table.load(description)?;
        }

        debug!(
            path = %path.display(),
            created,
            page_size = table.file.page_size(),
            schema_version = table.schemas.current_version(),
            "opened table"
        );

        Ok(table)
    }

    pub fn file_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{}", name, TABLE_FILE_EXTENSION))
    }

    fn load(&mut self, description: &TableDescription) -> Result<()> {
        let immediate = self.config.sync_immediate();
        let freelist = self.freelist;
        let (file, header) = self.parts();

        TableHeaderBlock::of(header).upgrade();

        let mut history = read_schema(file, header)?;
        if history.apply(description)? {
            write_schema(file, header, freelist, &history, immediate)?;
        }
        self.schemas = Arc::new(history);
        Ok(())
    }

    fn parts(&mut self) -> (&mut DbFile, &Block) {
        match &self.header {
            Some(header) => (&mut self.file, header),
            None => panic!("table '{}' used after close", self.file.path().display()),
        }
    }

    fn header(&self) -> TableHeaderBlock<'_> {
        match &self.header {
            Some(header) => TableHeaderBlock::of(header),
            None => panic!("table '{}' used after close", self.file.path().display()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    pub fn schemas(&self) -> &Arc<SchemaHistory> {
        &self.schemas
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        self.schemas.current()
    }

    /// Empty row of the current schema.
    pub fn new_row(&self) -> Row {
        Row::new(Arc::clone(&self.schemas))
    }

    pub fn deleted_rows(&self) -> u64 {
        self.header().deleted_rows()
    }

    pub fn row_key(&self, row: &Row) -> Result<RowKey> {
        row.generate_key(self.config.key_seed(), None, None)
    }

    /// Stores `row` in a new slot and returns its reference.
    pub fn insert_row(&mut self, row: &Row) -> Result<u64> {
        let blob = self.encode(row)?;
        let reference = self.store(&blob)?;
        debug_assert!(reference != 0);
        tracing::trace!(reference, len = blob.len(), "inserted row");
        Ok(reference)
    }

    pub fn read_row(&mut self, reference: u64) -> Result<Row> {
        let (file, _) = self.parts();
        let block = load_slot_block(file, reference)?;
        let result = read_slot(&block, reference);
        block.release(file)?;
        let blob = result?;

        Row::from_binary(Arc::clone(&self.schemas), &blob)
            .wrap_err_with(|| format!("decoding row at {}", reference))
    }

    /// Replaces the row at `reference`. Returns the reference the row lives
    /// at afterwards, which differs from `reference` when it had to move.
    pub fn update_row(&mut self, reference: u64, row: &Row) -> Result<u64> {
        let blob = self.encode(row)?;
        let capacity = self.slot_capacity(reference)?;

        if blob.len() <= capacity {
            let (file, _) = self.parts();
            let block = load_slot_block(file, reference)?;
            let result = write_slot(&block, reference, capacity, &blob);
            block.release(file)?;
            result?;
            return Ok(reference);
        }

        let moved_to = self.store(&blob)?;
        self.free_slot(reference, capacity, FreeSpaceFlags::MOVED)?;
        tracing::trace!(from = reference, to = moved_to, "moved row");
        Ok(moved_to)
    }

    pub fn delete_row(&mut self, reference: u64) -> Result<()> {
        let capacity = self.slot_capacity(reference)?;
        self.free_slot(reference, capacity, FreeSpaceFlags::DELETED)?;
        let header = self.header();
        header.set_deleted_rows(header.deleted_rows() + 1);
        tracing::trace!(reference, "deleted row");
        Ok(())
    }

    /// Takes a block from the page free list and retypes it. The block must
    /// be handed back through [`Table::release_block`].
    pub fn allocate_block(&mut self, block_type: BlockType) -> Result<Block> {
        let freelist = self.freelist;
        let (file, header) = self.parts();
        freelist.allocate(file, header, block_type)
    }

    /// Returns `block` to the page free list.
    pub fn release_block(&mut self, block: Block) -> Result<()> {
        let freelist = self.freelist;
        let (file, header) = self.parts();
        freelist.release(file, header, block)
    }

    /// Offsets of the free blocks, in allocation order.
    pub fn free_blocks(&mut self) -> Result<Vec<u64>> {
        let freelist = self.freelist;
        let (file, header) = self.parts();
        freelist.offsets(file, header)
    }

    /// Free space entries, in search order.
    pub fn free_space(&mut self) -> Result<Vec<FreeSpaceEntry>> {
        let free_space = self.free_space;
        let (file, header) = self.parts();
        free_space.entries(file, header)
    }

    pub fn sync(&mut self) -> Result<()> {
        let immediate = self.config.sync_immediate();
        let (file, header) = self.parts();
        header.sync(immediate)?;
        if immediate {
            file.sync()?;
        }
        Ok(())
    }

    /// Flushes and closes the table.
    pub fn close(mut self) -> Result<()> {
        self.sync()?;
        if let Some(header) = self.header.take() {
            header.release(&mut self.file)?;
        }
        debug!(path = %self.file.path().display(), "closed table");
        Ok(())
    }

    fn encode(&self, row: &Row) -> Result<Vec<u8>> {
        if row.schema().version() != self.schemas.current_version() {
            bail!(StorageError::SchemaMismatch(format!(
                "row uses schema version {}, table '{}' is at {}",
                row.schema().version(),
                self.schema().name(),
                self.schemas.current_version()
            )));
        }
        row.validate()?;
        let blob = row.to_binary()?;

        let max = self.page_size() - DATA_BLOCK_HEADER_SIZE - ROW_SLOT_HEADER_SIZE;
        ensure!(
            blob.len() <= max,
            StorageError::Size(format!(
                "row of {} bytes does not fit a data block ({} bytes max)",
                blob.len(),
                max
            ))
        );
        Ok(blob)
    }

    /// Reserves a slot for `blob`, writes it and returns the reference.
    fn store(&mut self, blob: &[u8]) -> Result<u64> {
        let (reference, size) = self.reserve(ROW_SLOT_HEADER_SIZE + blob.len())?;
        let capacity = size - ROW_SLOT_HEADER_SIZE;

        let (file, _) = self.parts();
        let block = load_slot_block(file, reference)?;
        let result = write_slot(&block, reference, capacity, blob);
        block.release(file)?;
        result?;
        Ok(reference)
    }

    /// Finds `size` bytes of row space. Returns the reference and the actual
    /// size, which may be larger when a free range is reused whole.
    fn reserve(&mut self, size: usize) -> Result<(u64, usize)> {
        let freelist = self.freelist;
        let free_space = self.free_space;
        let (file, header) = self.parts();

        if let Some(entry) = free_space.get_free_space(file, header, size)? {
            return Ok((entry.reference(), entry.size() as usize));
        }

        let header_view = TableHeaderBlock::of(header);
        let current = header_view.current_data_block();
        if current != 0 {
            let block = Block::load_typed(file, current, BlockType::Data)?;
            let reserved = DataBlock::of(&block).reserve(size);
            block.release(file)?;
            if let Some(reference) = reserved {
                return Ok((reference, size));
            }
        }

        let block = freelist.allocate(file, header, BlockType::Data)?;
        let reserved = DataBlock::of(&block).reserve(size);
        header_view.set_current_data_block(block.offset());
        debug!(offset = block.offset(), "new data block");
        block.release(file)?;

        // INVARIANT: encode() rejects rows larger than an empty data block
        let reference = reserved.expect("row fits an empty data block");
        Ok((reference, size))
    }

    fn slot_capacity(&mut self, reference: u64) -> Result<usize> {
        let (file, _) = self.parts();
        let block = load_slot_block(file, reference)?;
        let result = slot_header(&block, reference);
        block.release(file)?;
        let (capacity, length) = result?;
        if length == 0 {
            bail!(StorageError::not_found("row", reference));
        }
        Ok(capacity)
    }

    fn free_slot(&mut self, reference: u64, capacity: usize, flags: FreeSpaceFlags) -> Result<()> {
        let free_space = self.free_space;
        let (file, header) = self.parts();

        let block = load_slot_block(file, reference)?;
        block.data_mut(reference)[4..8].copy_from_slice(&0u32.to_le_bytes());
        block.release(file)?;

        free_space.release_space(
            file,
            header,
            reference,
            (ROW_SLOT_HEADER_SIZE + capacity) as u32,
            flags,
        )
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Some(header) = self.header.take() {
            if let Err(e) = header.release(&mut self.file) {
                warn!(path = %self.file.path().display(), error = %e, "failed to release table header");
            }
        }
    }
}

/// Writes the header block, the initial free chain and the schema of a new
/// table file.
fn initialize(
    file: &mut DbFile,
    freelist: FreeList,
    schemas: &SchemaHistory,
    immediate: bool,
) -> Result<()> {
    let offset = file.append_free_block(0)?;
    let mut header = Block::load_typed(file, offset, BlockType::Free)?;
    header.set_type(BlockType::TableHeader);

    let result = format_header(file, &header, freelist, schemas, immediate);
    let released = header.release(file);
    result.and(released)
}

fn format_header(
    file: &mut DbFile,
    header: &Block,
    freelist: FreeList,
    schemas: &SchemaHistory,
    immediate: bool,
) -> Result<()> {
    let page_size = file.page_size();
    TableHeaderBlock::of(header).set_page_size(page_size as u32);
    freelist.extend(file, header, freelist.batch())?;
    write_schema(file, header, freelist, schemas, immediate)?;
    header.sync(immediate)
}

/// Block holding the slot at `reference`.
fn load_slot_block(file: &mut DbFile, reference: u64) -> Result<Block> {
    ensure!(
        reference % file.page_size() as u64 != 0,
        StorageError::not_found("row", reference)
    );
    Block::load_typed(file, reference, BlockType::Data)
        .wrap_err_with(|| format!("loading row {}", reference))
}

/// Capacity and length of the slot at `reference`.
fn slot_header(block: &Block, reference: u64) -> Result<(usize, usize)> {
    let within = (reference % block.page_size() as u64) as usize;
    let used = DataBlock::of(block).used() as usize;
    if within < DATA_BLOCK_HEADER_SIZE
        || within + ROW_SLOT_HEADER_SIZE > DATA_BLOCK_HEADER_SIZE + used
    {
        bail!(StorageError::not_found("row", reference));
    }

    let mut raw = [0u8; ROW_SLOT_HEADER_SIZE];
    raw.copy_from_slice(&block.data(reference)[..ROW_SLOT_HEADER_SIZE]);
    let capacity = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let length = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;

    if length > capacity || within + ROW_SLOT_HEADER_SIZE + capacity > block.page_size() {
        bail!(StorageError::Corrupt(format!(
            "row slot at {} claims {} of {} bytes",
            reference, length, capacity
        )));
    }
    Ok((capacity, length))
}

fn read_slot(block: &Block, reference: u64) -> Result<Vec<u8>> {
    let (capacity, length) = slot_header(block, reference)?;
    ensure!(length != 0, StorageError::not_found("row", reference));
    let buffer = VirtualBuffer::with_block(block, reference, ROW_SLOT_HEADER_SIZE + capacity);
    buffer.read_vec(ROW_SLOT_HEADER_SIZE, length)
}

fn write_slot(block: &Block, reference: u64, capacity: usize, blob: &[u8]) -> Result<()> {
    let mut slot = Vec::with_capacity(ROW_SLOT_HEADER_SIZE + blob.len());
    slot.extend_from_slice(&(capacity as u32).to_le_bytes());
    slot.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    slot.extend_from_slice(blob);

    let mut buffer = VirtualBuffer::with_block(block, reference, ROW_SLOT_HEADER_SIZE + capacity);
    buffer.pwrite(&slot, 0, false)?;
    Ok(())
}

/// Releases every block of `blocks`, reporting the first failure.
fn release_all(file: &mut DbFile, blocks: Vec<Block>) -> Result<()> {
    let mut first = Ok(());
    for block in blocks {
        let released = block.release(file);
        if first.is_ok() {
            first = released;
        }
    }
    first
}

/// Returns every block of an old schema chain to the free list. After the
/// first failure the remaining blocks are only unmapped.
fn free_schema_chain(
    file: &mut DbFile,
    header: &Block,
    freelist: FreeList,
    blocks: Vec<Block>,
) -> Result<()> {
    let mut freed = Ok(());
    for block in blocks {
        if freed.is_ok() {
            freed = freelist.release(file, header, block);
            continue;
        }
        let offset = block.offset();
        if let Err(e) = block.release(file) {
            warn!(path = %file.path().display(), offset, error = %e, "failed to release schema block");
        }
    }
    freed
}

/// Loads the SCHM chain starting at the header's table definition.
fn load_schema_chain(file: &mut DbFile, header: &Block) -> Result<Vec<Block>> {
    let limit = file.page_count()?;
    let mut blocks = Vec::new();
    let mut next = TableHeaderBlock::of(header).table_definition();

    while next != 0 {
        if blocks.len() as u64 >= limit {
            release_all(file, blocks)?;
            bail!(StorageError::Corrupt("schema block chain has a cycle".to_string()));
        }
        match Block::load_typed(file, next, BlockType::Schema) {
            Ok(block) => {
                next = SchemaBlock::of(&block).next_schema_block();
                blocks.push(block);
            }
            Err(e) => {
                release_all(file, blocks)?;
                return Err(e);
            }
        }
    }
    Ok(blocks)
}

fn read_schema(file: &mut DbFile, header: &Block) -> Result<SchemaHistory> {
    let blocks = load_schema_chain(file, header)?;
    let oversized = blocks
        .iter()
        .any(|b| SchemaBlock::of(b).size() as usize > SchemaBlock::of(b).payload_capacity());

    let bytes = if blocks.is_empty() || oversized {
        None
    } else {
        let mut buffer = VirtualBuffer::new();
        for block in &blocks {
            let size = SchemaBlock::of(block).size() as usize;
            buffer.add_buffer(block, block.offset() + SCHEMA_BLOCK_HEADER_SIZE as u64, size);
        }
        Some(buffer.read_vec(0, buffer.size()))
    };
    release_all(file, blocks)?;

    match bytes {
        Some(bytes) => decode_history(&bytes?).wrap_err("decoding stored schema"),
        None => Err(StorageError::Corrupt(format!(
            "'{}' has no readable schema",
            file.path().display()
        ))
        .into()),
    }
}

/// Replaces the stored schema with `schemas`.
fn write_schema(
    file: &mut DbFile,
    header: &Block,
    freelist: FreeList,
    schemas: &SchemaHistory,
    immediate: bool,
) -> Result<()> {
    let bytes = encode_history(schemas)?;

    let chain = load_schema_chain(file, header)?;
    free_schema_chain(file, header, freelist, chain)?;
    TableHeaderBlock::of(header).set_table_definition(0);

    let capacity = file.page_size() - SCHEMA_BLOCK_HEADER_SIZE;
    let count = bytes.len().div_ceil(capacity).max(1);
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        match freelist.allocate(file, header, BlockType::Schema) {
            Ok(block) => blocks.push(block),
            Err(e) => {
                release_all(file, blocks)?;
                return Err(e);
            }
        }
    }

    let result = fill_schema_blocks(&blocks, &bytes, immediate);
    if result.is_ok() {
        TableHeaderBlock::of(header).set_table_definition(blocks[0].offset());
    }
    let released = release_all(file, blocks);
    result.and(released)?;

    debug!(
        path = %file.path().display(),
        version = schemas.current_version(),
        bytes = bytes.len(),
        blocks = count,
        "wrote schema"
    );
    Ok(())
}

fn fill_schema_blocks(blocks: &[Block], bytes: &[u8], immediate: bool) -> Result<()> {
    let capacity = SchemaBlock::of(&blocks[0]).payload_capacity();
    let mut buffer = VirtualBuffer::new();

    for (i, block) in blocks.iter().enumerate() {
        let view = SchemaBlock::of(block);
        let start = i * capacity;
        let size = (bytes.len() - start.min(bytes.len())).min(capacity);
        view.set_size(size as u32);
        view.set_next_schema_block(blocks.get(i + 1).map_or(0, |b| b.offset()));
        buffer.add_buffer(block, block.offset() + SCHEMA_BLOCK_HEADER_SIZE as u64, size);
    }

    buffer.pwrite(bytes, 0, false)?;
    buffer.flush(immediate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use crate::records::Value;
    use crate::schema::{ColumnDescription, ColumnType, Model};
    use crate::storage::os_page_size;
    use tempfile::tempdir;

    fn description() -> TableDescription {
        TableDescription::new("notes", Model::Content)
            .with_column(ColumnDescription::new("id", ColumnType::UInt64).required())
            .with_column(ColumnDescription::new("body", ColumnType::P32String))
            .with_row_key(["id"])
    }

    fn config() -> TableConfig {
        TableConfig::builder()
            .page_size(os_page_size())
            .free_block_batch(4)
            .build()
            .unwrap()
    }

    fn note(table: &Table, id: u64, body: &str) -> Row {
        let mut row = table.new_row();
        row.set("id", id).unwrap().set("body", body).unwrap();
        row
    }

    #[test]
    fn create_writes_header_and_schema() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();

        assert_eq!(table.path(), dir.path().join("notes.snapdb"));
        assert_eq!(table.header().page_size() as usize, os_page_size());
        assert_ne!(table.header().table_definition(), 0);
        assert_eq!(table.schema().version(), 1);
        // one of the four batch blocks holds the schema
        assert_eq!(table.free_blocks().unwrap().len(), 3);
        table.close().unwrap();
    }

    #[test]
    fn insert_then_read() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();
        let row = note(&table, 1, "hello");

        let reference = table.insert_row(&row).unwrap();
        let read = table.read_row(reference).unwrap();

        assert_eq!(read, row);
        assert_eq!(reference % os_page_size() as u64, DATA_BLOCK_HEADER_SIZE as u64);
        table.close().unwrap();
    }

    #[test]
    fn update_in_place_and_move() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();
        let reference = table.insert_row(&note(&table, 1, "long enough body")).unwrap();

        let shorter = note(&table, 1, "short");
        assert_eq!(table.update_row(reference, &shorter).unwrap(), reference);
        assert_eq!(table.read_row(reference).unwrap(), shorter);

        let longer = note(&table, 1, &"x".repeat(200));
        let moved = table.update_row(reference, &longer).unwrap();

        assert_ne!(moved, reference);
        assert_eq!(table.read_row(moved).unwrap(), longer);
        assert_eq!(
            error_kind(&table.read_row(reference).unwrap_err()),
            Some(ErrorKind::NotFound)
        );
        let free = table.free_space().unwrap();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].reference(), reference);
        assert!(free[0].flags().contains(FreeSpaceFlags::MOVED));
        table.close().unwrap();
    }

    #[test]
    fn delete_frees_the_slot_for_reuse() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();
        let reference = table.insert_row(&note(&table, 1, "first")).unwrap();

        table.delete_row(reference).unwrap();

        assert_eq!(table.deleted_rows(), 1);
        assert_eq!(
            error_kind(&table.delete_row(reference).unwrap_err()),
            Some(ErrorKind::NotFound)
        );
        let reused = table.insert_row(&note(&table, 2, "again")).unwrap();
        assert_eq!(reused, reference);
        assert!(table.free_space().unwrap().is_empty());
        table.close().unwrap();
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();
        let mut row = table.new_row();
        row.set("body", "no id").unwrap();

        assert_eq!(
            error_kind(&table.insert_row(&row).unwrap_err()),
            Some(ErrorKind::Constraint)
        );

        row.set("id", Value::UInt64(1)).unwrap();
        row.set("body", "x".repeat(os_page_size())).unwrap();
        assert_eq!(
            error_kind(&table.insert_row(&row).unwrap_err()),
            Some(ErrorKind::Size)
        );
        table.close().unwrap();
    }

    #[test]
    fn bogus_references_are_not_found() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();
        let reference = table.insert_row(&note(&table, 1, "a")).unwrap();

        for bogus in [0, reference + 4096 * 1000, reference + 512] {
            assert!(table.read_row(bogus).is_err(), "reference {}", bogus);
        }
        table.close().unwrap();
    }

    #[test]
    fn allocate_and_release_blocks() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &description(), config()).unwrap();
        let before = table.free_blocks().unwrap();

        let block = table.allocate_block(BlockType::BloomFilter).unwrap();
        let offset = block.offset();
        assert_eq!(offset, before[0]);
        table.release_block(block).unwrap();

        assert_eq!(table.free_blocks().unwrap(), before);
        table.close().unwrap();
    }

    fn wide(extra: &str) -> TableDescription {
        let mut description = TableDescription::new("wide", Model::Data);
        for i in 0..400 {
            description = description.with_column(ColumnDescription::new(
                format!("a_rather_long_column_name_number_{:03}", i),
                ColumnType::UInt32,
            ));
        }
        description
            .with_column(ColumnDescription::new(extra, ColumnType::P8String))
            .with_row_key(["a_rather_long_column_name_number_000"])
    }

    fn schema_chain_len(table: &mut Table) -> usize {
        let (file, header) = table.parts();
        let blocks = load_schema_chain(file, header).unwrap();
        let len = blocks.len();
        release_all(file, blocks).unwrap();
        len
    }

    #[test]
    fn rewriting_a_multi_block_schema_frees_the_old_chain() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path(), &wide("first"), config()).unwrap();
        assert!(schema_chain_len(&mut table) > 1);
        table.close().unwrap();

        let mut table = Table::open(dir.path(), &wide("second"), config()).unwrap();

        assert_eq!(table.schemas().versions().count(), 2);
        let chain = schema_chain_len(&mut table);
        let free = table.free_blocks().unwrap().len();
        assert_eq!(table.file.page_count().unwrap(), 1 + chain as u64 + free as u64);
        assert_eq!(table.file.mapped_pages(), 1);
        table.close().unwrap();
    }
}
