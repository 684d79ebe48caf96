//! # Page Free List
//!
//! Unused blocks of a table file form a singly linked list threaded through
//! the blocks themselves. The table header's `first_free_block` field is the
//! head; every FREE block stores the offset of the next one, `0` ends the
//! list (offset 0 is the table header, so it can never be free).
//!
//! ```text
//! header.first_free_block ──> [FREE @5p] ──> [FREE @3p] ──> [FREE @2p] ──> 0
//! ```
//!
//! ## Allocation Strategy
//!
//! The list is a stack. Allocating pops the head; releasing pushes the block
//! back as the new head. The most recently released block is reused first,
//! which keeps the working set of pages small.
//!
//! When the list is empty, `batch` blocks are appended to the file at once.
//! Each appended block links to the previously appended one, so the last
//! appended block becomes the head and blocks are handed out from the end of
//! the file backwards:
//!
//! ```text
//! append 16 blocks: [@1p -> 0] [@2p -> @1p] ... [@16p -> @15p]
//! head = @16p
//! ```
//!
//! ## Thread Safety
//!
//! `FreeList` holds no state besides its batch size. The list itself lives in
//! the file and is updated through the caller's `&mut DbFile` and header
//! block, so callers serialize access the same way they serialize access to
//! the file.

use eyre::Result;

use super::block::{Block, BlockType};
use super::blocks::{FreeBlock, TableHeaderBlock};
use super::dbfile::DbFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    batch: usize,
}

impl FreeList {
    /// # Panics
    ///
    /// If `batch` is zero.
    pub fn new(batch: usize) -> Self {
        assert!(batch > 0, "free block batch must be at least 1");
        Self { batch }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Appends `count` free blocks to the file and pushes them onto the list.
    /// Returns the new head.
    pub fn extend(&self, file: &mut DbFile, header: &Block, count: usize) -> Result<u64> {
        let header = TableHeaderBlock::of(header);

        let mut head = header.first_free_block();
        for _ in 0..count {
            head = file.append_free_block(head)?;
        }
        header.set_first_free_block(head);

        tracing::debug!(path = %file.path().display(), count, head, "extended free list");

        Ok(head)
    }

    /// Pops the head of the list and retypes it as `block_type`. Extends the
    /// file by one batch first if the list is empty.
    pub fn allocate(&self, file: &mut DbFile, header: &Block, block_type: BlockType) -> Result<Block> {
        let header_view = TableHeaderBlock::of(header);

        if header_view.first_free_block() == 0 {
            self.extend(file, header, self.batch)?;
        }

        let offset = header_view.first_free_block();
        let mut block = Block::load_typed(file, offset, BlockType::Free)?;

        let next = FreeBlock::of(&block).next_free_block();
        header_view.set_first_free_block(next);
        block.set_type(block_type);

        tracing::trace!(offset, %block_type, next, "allocated block");

        Ok(block)
    }

    /// Turns `block` into a FREE block, pushes it onto the list and releases
    /// its page.
    ///
    /// # Panics
    ///
    /// If `block` is the table header.
    pub fn release(&self, file: &mut DbFile, header: &Block, mut block: Block) -> Result<()> {
        assert_ne!(block.offset(), header.offset(), "the table header cannot be freed");

        let header = TableHeaderBlock::of(header);

        block.set_type(BlockType::Free);
        FreeBlock::of(&block).set_next_free_block(header.first_free_block());
        header.set_first_free_block(block.offset());

        tracing::trace!(offset = block.offset(), "released block");

        block.release(file)
    }

    /// Walks the list and returns the offsets in allocation order.
    pub fn offsets(&self, file: &mut DbFile, header: &Block) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        let mut next = TableHeaderBlock::of(header).first_free_block();

        while next != 0 {
            offsets.push(next);
            let block = Block::load_typed(file, next, BlockType::Free)?;
            next = FreeBlock::of(&block).next_free_block();
            block.release(file)?;
        }

        Ok(offsets)
    }
}
