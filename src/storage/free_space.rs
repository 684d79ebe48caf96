//! # Free Space Inside Data Blocks
//!
//! The page free list only tracks whole blocks. Space freed inside a DATA
//! block (a deleted row, or the old slot of a row that grew and moved) is
//! tracked here so it can be reused without giving up the block.
//!
//! ## Storage
//!
//! Entries live in FSPC blocks chained from the table header's
//! `free_space_block` field. Each entry is 16 bytes:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -------------------------------------
//! 0       8     reference: file offset of the range
//! 8       4     size: length of the range in bytes
//! 12      4     flags: MOVED | DELETED
//! ```
//!
//! New entries are appended to the head block; a new head is allocated from
//! the page free list when it is full.
//!
//! ## Search Order
//!
//! [`FreeSpace::get_free_space`] scans newest first: head block before older
//! blocks, and the last entry of a block before the first. Recently freed
//! ranges are the most likely to sit in pages that are still cached.
//!
//! A hit larger than requested is split; the remainder goes back into the
//! index when it is at least `MIN_FREE_SPACE_SPLIT` bytes, smaller remainders
//! are handed to the caller as part of the range. FSPC blocks that become
//! empty are unlinked and returned to the page free list.

use std::fmt;
use std::ops::BitOr;

use eyre::Result;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::block::{Block, BlockType};
use super::blocks::{FreeSpaceBlock, TableHeaderBlock};
use super::dbfile::DbFile;
use super::freelist::FreeList;
use crate::config::{FREE_SPACE_ENTRY_SIZE, MIN_FREE_SPACE_SPLIT};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FreeSpaceFlags(u32);

impl FreeSpaceFlags {
    pub const NONE: Self = Self(0);
    /// The row that used this range was moved to a larger slot.
    pub const MOVED: Self = Self(1);
    /// The row that used this range was deleted.
    pub const DELETED: Self = Self(2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FreeSpaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for FreeSpaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::MOVED) {
            names.push("MOVED");
        }
        if self.contains(Self::DELETED) {
            names.push("DELETED");
        }
        write!(f, "FreeSpaceFlags({})", names.join(" | "))
    }
}

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FreeSpaceEntry {
    reference: U64,
    size: U32,
    flags: U32,
}

const _: () = assert!(std::mem::size_of::<FreeSpaceEntry>() == FREE_SPACE_ENTRY_SIZE);

impl FreeSpaceEntry {
    pub fn new(reference: u64, size: u32, flags: FreeSpaceFlags) -> Self {
        Self {
            reference: U64::new(reference),
            size: U32::new(size),
            flags: U32::new(flags.bits()),
        }
    }

    zerocopy_accessors! {
        reference: u64,
        size: u32,
    }

    pub fn flags(&self) -> FreeSpaceFlags {
        FreeSpaceFlags::from_bits(self.flags.get())
    }
}

impl fmt::Debug for FreeSpaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeSpaceEntry")
            .field("reference", &self.reference())
            .field("size", &self.size())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Byte-level free space index of one table file.
#[derive(Debug, Clone, Copy)]
pub struct FreeSpace {
    freelist: FreeList,
}

impl FreeSpace {
    pub fn new(freelist: FreeList) -> Self {
        Self { freelist }
    }

    /// Finds a free range of at least `min_size` bytes and removes it from
    /// the index. Returns `None` when nothing large enough is free.
    pub fn get_free_space(
        &self,
        file: &mut DbFile,
        header: &Block,
        min_size: usize,
    ) -> Result<Option<FreeSpaceEntry>> {
        let mut prev: Option<u64> = None;
        let mut next = TableHeaderBlock::of(header).free_space_block();

        while next != 0 {
            let block = Block::load_typed(file, next, BlockType::FreeSpace)?;
            let view = FreeSpaceBlock::of(&block);

            let hit = (0..view.count() as usize)
                .rev()
                .find(|&i| view.entry(i).size() as usize >= min_size);

            let Some(index) = hit else {
                prev = Some(block.offset());
                next = view.next_free_space_block();
                block.release(file)?;
                continue;
            };

            let entry = view.remove(index);
            let remainder = entry.size() as usize - min_size;

            let taken = if remainder >= MIN_FREE_SPACE_SPLIT {
                view.push(&FreeSpaceEntry::new(
                    entry.reference() + min_size as u64,
                    remainder as u32,
                    entry.flags(),
                ));
                FreeSpaceEntry::new(entry.reference(), min_size as u32, entry.flags())
            } else {
                entry
            };

            tracing::trace!(
                reference = taken.reference(),
                size = taken.size(),
                min_size,
                "reused free space"
            );

            if view.count() == 0 {
                self.unlink(file, header, prev, block)?;
            } else {
                block.release(file)?;
            }

            return Ok(Some(taken));
        }

        Ok(None)
    }

    /// Records `size` bytes at `reference` as reusable.
    pub fn release_space(
        &self,
        file: &mut DbFile,
        header: &Block,
        reference: u64,
        size: u32,
        flags: FreeSpaceFlags,
    ) -> Result<()> {
        assert!(size > 0, "cannot release an empty range at {}", reference);

        let header_view = TableHeaderBlock::of(header);
        let entry = FreeSpaceEntry::new(reference, size, flags);
        let head = header_view.free_space_block();

        if head != 0 {
            let block = Block::load_typed(file, head, BlockType::FreeSpace)?;
            let pushed = FreeSpaceBlock::of(&block).push(&entry);
            block.release(file)?;
            if pushed {
                return Ok(());
            }
        }

        let block = self.freelist.allocate(file, header, BlockType::FreeSpace)?;
        let view = FreeSpaceBlock::of(&block);
        view.set_next_free_space_block(head);
        view.push(&entry);
        header_view.set_free_space_block(block.offset());

        tracing::debug!(offset = block.offset(), "new free space block");

        block.release(file)
    }

    /// Every entry in search order.
    pub fn entries(&self, file: &mut DbFile, header: &Block) -> Result<Vec<FreeSpaceEntry>> {
        let mut entries = Vec::new();
        let mut next = TableHeaderBlock::of(header).free_space_block();

        while next != 0 {
            let block = Block::load_typed(file, next, BlockType::FreeSpace)?;
            let view = FreeSpaceBlock::of(&block);
            entries.extend((0..view.count() as usize).rev().map(|i| view.entry(i)));
            next = view.next_free_space_block();
            block.release(file)?;
        }

        Ok(entries)
    }

    fn unlink(&self, file: &mut DbFile, header: &Block, prev: Option<u64>, block: Block) -> Result<()> {
        let next = FreeSpaceBlock::of(&block).next_free_space_block();

        match prev {
            None => TableHeaderBlock::of(header).set_free_space_block(next),
            Some(offset) => {
                let prev_block = Block::load_typed(file, offset, BlockType::FreeSpace)?;
                FreeSpaceBlock::of(&prev_block).set_next_free_space_block(next);
                prev_block.release(file)?;
            }
        }

        tracing::trace!(offset = block.offset(), "dropped empty free space block");

        self.freelist.release(file, header, block)
    }
}
