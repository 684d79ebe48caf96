//! # Typed Blocks
//!
//! A [`Block`] is one mapped page of a table file viewed through its type
//! tag and structure descriptor.
//!
//! ## Block Header
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ---------------------------------------
//! 0       4     Type tag ("FREE", "SDBT", "DATA", ...)
//! 4       2     Structure version (little-endian)
//! 6       2     Reserved
//! 8       ...   Fields of the block's structure descriptor
//! ```
//!
//! ## Lifecycle
//!
//! A block holds a [`PageHandle`] from the moment it is loaded until it is
//! given back with [`Block::release`]. Dropping a block that still holds its
//! page is a programming error: the page would stay mapped with nothing left
//! to release it, so `Drop` logs and panics. Release takes the block by
//! value, so a released block cannot be used again.
//!
//! ```ignore
//! let block = Block::load(&mut file, offset)?;
//! let next = block.get_field("next_free_block");
//! block.release(&mut file)?;
//! ```
//!
//! ## Interior Mutability
//!
//! Page bytes live behind the page's `RwLock`, so field setters and
//! [`Block::data_mut`] take `&self`. This lets several views (a
//! `VirtualBuffer`, a typed block wrapper) borrow one block at once. Only
//! [`Block::set_type`], which changes the descriptor the block is read
//! through, needs `&mut self`.

use eyre::{bail, Result};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use super::blocks;
use super::dbfile::{DbFile, PageHandle};
use super::structure::{FieldKind, FieldLocation, StructureVersion};
use crate::config::{BLOCK_TAG_SIZE, STRUCTURE_VERSION_OFFSET};
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Free,
    TableHeader,
    Data,
    Schema,
    SecondaryIndex,
    FreeSpace,
    IndirectIndex,
    BloomFilter,
}

impl BlockType {
    pub const ALL: [BlockType; 8] = [
        BlockType::Free,
        BlockType::TableHeader,
        BlockType::Data,
        BlockType::Schema,
        BlockType::SecondaryIndex,
        BlockType::FreeSpace,
        BlockType::IndirectIndex,
        BlockType::BloomFilter,
    ];

    pub const fn tag(self) -> [u8; BLOCK_TAG_SIZE] {
        match self {
            BlockType::Free => *b"FREE",
            BlockType::TableHeader => *b"SDBT",
            BlockType::Data => *b"DATA",
            BlockType::Schema => *b"SCHM",
            BlockType::SecondaryIndex => *b"SIDX",
            BlockType::FreeSpace => *b"FSPC",
            BlockType::IndirectIndex => *b"INDR",
            BlockType::BloomFilter => *b"BLMF",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag()[..] == *tag)
    }

    /// Structure descriptors of this block type, newest first.
    pub fn structure(self) -> &'static [StructureVersion] {
        blocks::structure_of(self)
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = self.tag();
        // tags are ASCII
        write!(f, "{}", String::from_utf8_lossy(&tag))
    }
}

#[derive(Debug)]
pub struct Block {
    offset: u64,
    page_size: usize,
    block_type: BlockType,
    page: Option<PageHandle>,
}

impl Block {
    /// Maps the block at `offset` and checks its tag and structure version.
    pub fn load(file: &mut DbFile, offset: u64) -> Result<Self> {
        let page_size = file.page_size();
        let page = file.map(offset)?;

        let header = {
            let data = page.read();
            let mut header = [0u8; BLOCK_TAG_SIZE + 2];
            header.copy_from_slice(&data[..BLOCK_TAG_SIZE + 2]);
            header
        };

        let block_type = match BlockType::from_tag(&header[..BLOCK_TAG_SIZE]) {
            Some(t) => t,
            None => {
                file.release(page)?;
                bail!(StorageError::Corrupt(format!(
                    "unknown block tag {:?} at offset {} of '{}'",
                    &header[..BLOCK_TAG_SIZE],
                    offset,
                    file.path().display()
                )));
            }
        };

        let version = u16::from_le_bytes([header[BLOCK_TAG_SIZE], header[BLOCK_TAG_SIZE + 1]]);
        if StructureVersion::select(block_type.structure(), version).is_none() {
            file.release(page)?;
            bail!(StorageError::Corrupt(format!(
                "{} block at offset {} has unknown structure version {}",
                block_type, offset, version
            )));
        }

        let start = page.offset();
        Ok(Self {
            offset: start,
            page_size,
            block_type,
            page: Some(page),
        })
    }

    /// Loads the block at `offset` and checks it has type `expected`.
    pub fn load_typed(file: &mut DbFile, offset: u64, expected: BlockType) -> Result<Self> {
        let block = Self::load(file, offset)?;
        if block.block_type() != expected {
            let found = block.block_type();
            block.release(file)?;
            bail!(StorageError::Corrupt(format!(
                "expected a {} block at offset {}, found {}",
                expected, offset, found
            )));
        }
        Ok(block)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Retypes the block: writes the new tag and the newest structure
    /// version of `block_type`, and zeroes everything after the tag.
    pub fn set_type(&mut self, block_type: BlockType) {
        let version = StructureVersion::current(block_type.structure()).version;
        {
            let mut data = self.page().write();
            data[..BLOCK_TAG_SIZE].copy_from_slice(&block_type.tag());
            data[BLOCK_TAG_SIZE..].fill(0);
            data[STRUCTURE_VERSION_OFFSET..STRUCTURE_VERSION_OFFSET + 2]
                .copy_from_slice(&version.to_le_bytes());
        }
        tracing::trace!(offset = self.offset, %block_type, "retyped block");
        self.block_type = block_type;
    }

    pub fn structure_version(&self) -> u16 {
        let data = self.page().read();
        u16::from_le_bytes([data[STRUCTURE_VERSION_OFFSET], data[STRUCTURE_VERSION_OFFSET + 1]])
    }

    /// Writes the structure version. Does not touch the page when the version
    /// is unchanged.
    ///
    /// # Panics
    ///
    /// If `version` is not described for this block type.
    pub fn set_structure_version(&self, version: u16) {
        if self.structure_version() == version {
            return;
        }
        assert!(
            StructureVersion::select(self.block_type.structure(), version).is_some(),
            "{} blocks have no structure version {}",
            self.block_type,
            version
        );
        self.page().write()[STRUCTURE_VERSION_OFFSET..STRUCTURE_VERSION_OFFSET + 2]
            .copy_from_slice(&version.to_le_bytes());
    }

    /// Layout the block is currently stored with.
    pub fn structure(&self) -> &'static StructureVersion {
        let version = self.structure_version();
        // INVARIANT: load() and set_structure_version() only accept described versions
        StructureVersion::select(self.block_type.structure(), version).unwrap()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.structure().locate(name).is_some()
    }

    fn field(&self, name: &str) -> FieldLocation {
        match self.structure().locate(name) {
            Some(location) => location,
            None => panic!(
                "{} block version {} has no field '{}'",
                self.block_type,
                self.structure_version(),
                name
            ),
        }
    }

    /// Reads a numeric field by name.
    ///
    /// # Panics
    ///
    /// If the field is not part of the block's stored layout.
    pub fn get_field(&self, name: &str) -> u64 {
        let FieldLocation { offset, kind } = self.field(name);
        let data = self.page().read();
        let bytes = &data[offset..offset + kind.size()];
        match kind {
            FieldKind::U8 => bytes[0] as u64,
            FieldKind::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
            FieldKind::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
            FieldKind::U64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                u64::from_le_bytes(raw)
            }
            FieldKind::Reserved(_) => unreachable!("reserved fields have no name"),
        }
    }

    /// Writes a numeric field by name.
    ///
    /// # Panics
    ///
    /// If the field is unknown or `value` does not fit its width.
    pub fn set_field(&self, name: &str, value: u64) {
        let FieldLocation { offset, kind } = self.field(name);
        let size = kind.size();
        assert!(
            size == 8 || value >> (size * 8) == 0,
            "value {} does not fit field '{}' of {} bytes",
            value,
            name,
            size
        );
        let mut data = self.page().write();
        data[offset..offset + size].copy_from_slice(&value.to_le_bytes()[..size]);
    }

    /// Bytes of the page starting at `offset % page_size`.
    pub fn data(&self, offset: u64) -> MappedRwLockReadGuard<'_, [u8]> {
        let start = (offset % self.page_size as u64) as usize;
        MappedRwLockReadGuard::map(self.page().read(), |d| &d[start..])
    }

    /// Mutable bytes of the page starting at `offset % page_size`.
    pub fn data_mut(&self, offset: u64) -> MappedRwLockWriteGuard<'_, [u8]> {
        let start = (offset % self.page_size as u64) as usize;
        MappedRwLockWriteGuard::map(self.page().write(), |d| &mut d[start..])
    }

    /// Flushes the page; `immediate` waits for the write to complete.
    pub fn sync(&self, immediate: bool) -> Result<()> {
        self.page()
            .flush(immediate)
            .map_err(|e| StorageError::io("msync", format!("block@{}", self.offset), e))?;
        Ok(())
    }

    /// Gives the page back to `file`.
    pub fn release(mut self, file: &mut DbFile) -> Result<()> {
        // INVARIANT: the page is only taken here, and release consumes self
        let page = self.page.take().unwrap();
        file.release(page)
    }

    fn page(&self) -> &PageHandle {
        match &self.page {
            Some(page) => page,
            None => panic!("block at offset {} used without a mapped page", self.offset),
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if self.page.is_some() && !std::thread::panicking() {
            tracing::error!(
                offset = self.offset,
                block_type = %self.block_type,
                "block dropped without releasing its page"
            );
            panic!(
                "{} block at offset {} dropped without releasing its page",
                self.block_type, self.offset
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::BLOCK_HEADER_SIZE;
    use crate::error::{error_kind, ErrorKind};
    use crate::storage::dbfile::os_page_size;
    use std::path::Path;
    use tempfile::tempdir;

    pub(crate) fn file_with_free_blocks(dir: &Path, count: usize) -> DbFile {
        let mut file = DbFile::create(dir.join("t.snapdb")).unwrap();
        file.set_page_size(os_page_size());
        let mut prev = 0;
        for _ in 0..count {
            prev = file.append_free_block(prev).unwrap();
        }
        file
    }

    #[test]
    fn load_reads_free_block() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 2);
        let ps = file.page_size() as u64;

        let block = Block::load(&mut file, ps).unwrap();

        assert_eq!(block.block_type(), BlockType::Free);
        assert_eq!(block.offset(), ps);
        assert_eq!(block.structure_version(), 1);
        assert_eq!(block.get_field("next_free_block"), 0);
        block.release(&mut file).unwrap();
        assert_eq!(file.mapped_pages(), 0);
    }

    #[test]
    fn set_type_zeroes_the_block() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 2);
        let ps = file.page_size() as u64;

        let mut block = Block::load(&mut file, ps).unwrap();
        block.data_mut(ps + 200)[0] = 0x55;
        block.set_type(BlockType::Data);

        assert_eq!(block.block_type(), BlockType::Data);
        assert_eq!(&block.data(0)[..4], b"DATA");
        assert!(block.data(BLOCK_HEADER_SIZE as u64).iter().all(|&b| b == 0));
        block.release(&mut file).unwrap();

        let reloaded = Block::load(&mut file, ps).unwrap();
        assert_eq!(reloaded.block_type(), BlockType::Data);
        reloaded.release(&mut file).unwrap();
    }

    #[test]
    fn fields_round_trip_through_descriptor() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);

        let mut block = Block::load(&mut file, 0).unwrap();
        block.set_type(BlockType::TableHeader);
        block.set_field("page_size", 8192);
        block.set_field("last_oid", u64::MAX - 1);
        block.set_field("bloom_filter_flags", 3);

        assert_eq!(block.get_field("page_size"), 8192);
        assert_eq!(block.get_field("last_oid"), u64::MAX - 1);
        assert_eq!(block.get_field("bloom_filter_flags"), 3);
        assert_eq!(&block.data(8)[..4], &8192u32.to_le_bytes());
        block.release(&mut file).unwrap();
    }

    #[test]
    fn data_indexes_modulo_page_size() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 3);
        let ps = file.page_size() as u64;

        let block = Block::load(&mut file, 2 * ps).unwrap();
        block.data_mut(2 * ps + 64)[0] = 7;

        assert_eq!(block.data(64)[0], 7);
        assert_eq!(block.data(2 * ps + 64).len(), ps as usize - 64);
        block.release(&mut file).unwrap();
    }

    #[test]
    fn structure_version_write_skips_unchanged_value() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);

        let block = Block::load(&mut file, 0).unwrap();
        block.set_structure_version(1);

        assert_eq!(block.structure_version(), 1);
        block.release(&mut file).unwrap();
    }

    #[test]
    fn unknown_tag_is_corrupt_and_releases_the_page() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        file.write_at(0, b"ZZZZ").unwrap();

        let err = Block::load(&mut file, 0).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Corrupt));
        assert_eq!(file.mapped_pages(), 0);
    }

    #[test]
    fn load_typed_rejects_other_types() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);

        let err = Block::load_typed(&mut file, 0, BlockType::Data).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Corrupt));
        assert_eq!(file.mapped_pages(), 0);
    }

    #[test]
    #[should_panic(expected = "has no field")]
    fn unknown_field_panics() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);
        let block = Block::load(&mut file, 0).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            block.get_field("nope");
        }));
        block.release(&mut file).unwrap();
        std::panic::resume_unwind(result.unwrap_err());
    }

    #[test]
    #[should_panic(expected = "dropped without releasing its page")]
    fn dropping_a_bound_block_panics() {
        let dir = tempdir().unwrap();
        let mut file = file_with_free_blocks(dir.path(), 1);

        let _block = Block::load(&mut file, 0).unwrap();
    }

    #[test]
    fn tags_round_trip() {
        for t in BlockType::ALL {
            assert_eq!(BlockType::from_tag(&t.tag()), Some(t));
        }
        assert_eq!(BlockType::from_tag(b"NOPE"), None);
        assert_eq!(BlockType::TableHeader.to_string(), "SDBT");
    }
}
