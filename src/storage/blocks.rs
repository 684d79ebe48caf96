//! # Block Types
//!
//! Structure descriptors and typed views for every block type of a table
//! file. [`TypedBlock::interpret`] is the single place where a loaded block is
//! matched on its tag; code that knows which type it expects constructs the
//! view directly (`DataBlock::new(&block)?`), which checks the tag.
//!
//! ## Layouts
//!
//! All offsets are from the start of the block, after the common 8-byte
//! header (tag, structure version, reserved).
//!
//! ```text
//! FREE  v1   8  next_free_block u64
//!
//! SDBT  v2   8  page_size u32            64  primary_index u64
//!           12  (reserved)               72  secondary_index u64
//!           16  table_definition u64     80  tree_index u64
//!           24  first_free_block u64     88  expiration_index u64
//!           32  indirect_index u64       96  deleted_rows u64
//!           40  last_oid u64            104  free_space_block u64
//!           48  first_free_oid u64      112  current_data_block u64
//!           56  first_compactable u64   120  bloom_filter_flags u32
//!      v1   same up to deleted_rows, then bloom_filter_flags u32 at 104
//!
//! DATA  v1   8  used u32, 12 reserved, rows from 16
//! FSPC  v1   8  next_free_space_block u64, 16 count u32, 20 reserved,
//!               16-byte entries from 24
//! SCHM  v1   8  next_schema_block u64, 16 size u32, 20 reserved,
//!               payload from 24
//! SIDX/INDR/BLMF v1   8  next_block u64
//! ```

use eyre::{bail, Result};
use zerocopy::{FromBytes, IntoBytes};

use super::block::{Block, BlockType};
use super::free_space::FreeSpaceEntry;
use super::structure::{is_strictly_descending, FieldDescriptor, FieldKind, StructureVersion};
use crate::config::{
    BLOCK_HEADER_SIZE, DATA_BLOCK_HEADER_SIZE, FREE_BLOCK_NEXT_OFFSET,
    FREE_SPACE_BLOCK_HEADER_SIZE, FREE_SPACE_ENTRY_SIZE, TABLE_HEADER_SIZE,
};
use crate::error::StorageError;

pub const FREE_BLOCK_VERSION: u16 = 1;

pub const TABLE_HEADER_VERSION: u16 = 2;

const fn u32_field(name: &'static str) -> FieldDescriptor {
    FieldDescriptor::new(name, FieldKind::U32)
}

const fn u64_field(name: &'static str) -> FieldDescriptor {
    FieldDescriptor::new(name, FieldKind::U64)
}

pub const FREE_BLOCK_STRUCTURE: &[StructureVersion] = &[StructureVersion {
    version: FREE_BLOCK_VERSION,
    fields: &[u64_field("next_free_block")],
}];

pub const TABLE_HEADER_STRUCTURE: &[StructureVersion] = &[
    StructureVersion {
        version: TABLE_HEADER_VERSION,
        fields: &[
            u32_field("page_size"),
            FieldDescriptor::reserved(4),
            u64_field("table_definition"),
            u64_field("first_free_block"),
            u64_field("indirect_index"),
            u64_field("last_oid"),
            u64_field("first_free_oid"),
            u64_field("first_compactable_block"),
            u64_field("primary_index"),
            u64_field("secondary_index"),
            u64_field("tree_index"),
            u64_field("expiration_index"),
            u64_field("deleted_rows"),
            u64_field("free_space_block"),
            u64_field("current_data_block"),
            u32_field("bloom_filter_flags"),
            FieldDescriptor::reserved(4),
        ],
    },
    StructureVersion {
        version: 1,
        fields: &[
            u32_field("page_size"),
            FieldDescriptor::reserved(4),
            u64_field("table_definition"),
            u64_field("first_free_block"),
            u64_field("indirect_index"),
            u64_field("last_oid"),
            u64_field("first_free_oid"),
            u64_field("first_compactable_block"),
            u64_field("primary_index"),
            u64_field("secondary_index"),
            u64_field("tree_index"),
            u64_field("expiration_index"),
            u64_field("deleted_rows"),
            u32_field("bloom_filter_flags"),
            FieldDescriptor::reserved(4),
        ],
    },
];

pub const DATA_BLOCK_STRUCTURE: &[StructureVersion] = &[StructureVersion {
    version: 1,
    fields: &[u32_field("used"), FieldDescriptor::reserved(4)],
}];

pub const FREE_SPACE_BLOCK_STRUCTURE: &[StructureVersion] = &[StructureVersion {
    version: 1,
    fields: &[
        u64_field("next_free_space_block"),
        u32_field("count"),
        FieldDescriptor::reserved(4),
    ],
}];

pub const SCHEMA_BLOCK_STRUCTURE: &[StructureVersion] = &[StructureVersion {
    version: 1,
    fields: &[
        u64_field("next_schema_block"),
        u32_field("size"),
        FieldDescriptor::reserved(4),
    ],
}];

/// Secondary index, indirect index and bloom filter blocks only carry a
/// chain link; their contents are managed by the index layers.
pub const CHAINED_BLOCK_STRUCTURE: &[StructureVersion] = &[StructureVersion {
    version: 1,
    fields: &[u64_field("next_block")],
}];

pub const SCHEMA_BLOCK_HEADER_SIZE: usize = BLOCK_HEADER_SIZE + 16;

const _: () = assert!(is_strictly_descending(FREE_BLOCK_STRUCTURE));
const _: () = assert!(is_strictly_descending(TABLE_HEADER_STRUCTURE));
const _: () = assert!(is_strictly_descending(DATA_BLOCK_STRUCTURE));
const _: () = assert!(is_strictly_descending(FREE_SPACE_BLOCK_STRUCTURE));
const _: () = assert!(is_strictly_descending(SCHEMA_BLOCK_STRUCTURE));
const _: () = assert!(is_strictly_descending(CHAINED_BLOCK_STRUCTURE));
const _: () = assert!(TABLE_HEADER_STRUCTURE[0].size() == TABLE_HEADER_SIZE);
const _: () = assert!(FREE_BLOCK_STRUCTURE[0].size() == FREE_BLOCK_NEXT_OFFSET + 8);
const _: () = assert!(DATA_BLOCK_STRUCTURE[0].size() == DATA_BLOCK_HEADER_SIZE);
const _: () = assert!(FREE_SPACE_BLOCK_STRUCTURE[0].size() == FREE_SPACE_BLOCK_HEADER_SIZE);
const _: () = assert!(SCHEMA_BLOCK_STRUCTURE[0].size() == SCHEMA_BLOCK_HEADER_SIZE);

pub(crate) fn structure_of(block_type: BlockType) -> &'static [StructureVersion] {
    match block_type {
        BlockType::Free => FREE_BLOCK_STRUCTURE,
        BlockType::TableHeader => TABLE_HEADER_STRUCTURE,
        BlockType::Data => DATA_BLOCK_STRUCTURE,
        BlockType::FreeSpace => FREE_SPACE_BLOCK_STRUCTURE,
        BlockType::Schema => SCHEMA_BLOCK_STRUCTURE,
        BlockType::SecondaryIndex | BlockType::IndirectIndex | BlockType::BloomFilter => {
            CHAINED_BLOCK_STRUCTURE
        }
    }
}

macro_rules! typed_view {
    ($name:ident, $block_type:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name<'a> {
            block: &'a Block,
        }

        impl<'a> $name<'a> {
            pub fn new(block: &'a Block) -> Result<Self> {
                if block.block_type() != $block_type {
                    bail!(StorageError::Corrupt(format!(
                        "block at offset {} is {}, expected {}",
                        block.offset(),
                        block.block_type(),
                        $block_type
                    )));
                }
                Ok(Self { block })
            }

            /// View of a block whose type the caller has already checked.
            ///
            /// # Panics
            ///
            /// If `block` has another type.
            pub fn of(block: &'a Block) -> Self {
                assert_eq!(
                    block.block_type(),
                    $block_type,
                    "block at offset {} has the wrong type",
                    block.offset()
                );
                Self { block }
            }

            pub fn block(&self) -> &'a Block {
                self.block
            }
        }
    };
}

typed_view!(FreeBlock, BlockType::Free);
typed_view!(TableHeaderBlock, BlockType::TableHeader);
typed_view!(DataBlock, BlockType::Data);
typed_view!(FreeSpaceBlock, BlockType::FreeSpace);
typed_view!(SchemaBlock, BlockType::Schema);

impl FreeBlock<'_> {
    block_accessors! {
        next_free_block: u64,
    }
}

impl TableHeaderBlock<'_> {
    block_accessors! {
        page_size: u32,
        table_definition: u64,
        first_free_block: u64,
        indirect_index: u64,
        last_oid: u64,
        first_free_oid: u64,
        first_compactable_block: u64,
        primary_index: u64,
        secondary_index: u64,
        tree_index: u64,
        expiration_index: u64,
        deleted_rows: u64,
        free_space_block: u64,
        current_data_block: u64,
        bloom_filter_flags: u32,
    }

    /// Rewrites an older header in the newest layout. Returns `true` when
    /// the header was upgraded.
    pub fn upgrade(&self) -> bool {
        let stored = self.block.structure();
        if stored.version == TABLE_HEADER_VERSION {
            return false;
        }

        let values: Vec<(&'static str, u64)> = stored
            .field_names()
            .map(|name| (name, self.block.get_field(name)))
            .collect();

        self.block.data_mut(BLOCK_HEADER_SIZE as u64)[..TABLE_HEADER_SIZE - BLOCK_HEADER_SIZE]
            .fill(0);
        self.block.set_structure_version(TABLE_HEADER_VERSION);
        for (name, value) in values {
            self.block.set_field(name, value);
        }

        tracing::debug!(
            from = stored.version,
            to = TABLE_HEADER_VERSION,
            "upgraded table header"
        );
        true
    }
}

impl DataBlock<'_> {
    block_accessors! {
        used: u32,
    }

    /// Bytes still available after the used area.
    pub fn available(&self) -> usize {
        self.block.page_size() - DATA_BLOCK_HEADER_SIZE - self.used() as usize
    }

    /// Reserves `size` bytes at the end of the used area and returns their
    /// file reference, or `None` if they do not fit.
    pub fn reserve(&self, size: usize) -> Option<u64> {
        if size > self.available() {
            return None;
        }
        let used = self.used() as usize;
        self.set_used((used + size) as u32);
        Some(self.block.offset() + (DATA_BLOCK_HEADER_SIZE + used) as u64)
    }
}

impl FreeSpaceBlock<'_> {
    block_accessors! {
        next_free_space_block: u64,
        count: u32,
    }

    /// Number of entries one block can hold.
    pub fn capacity(&self) -> usize {
        (self.block.page_size() - FREE_SPACE_BLOCK_HEADER_SIZE) / FREE_SPACE_ENTRY_SIZE
    }

    pub fn is_full(&self) -> bool {
        self.count() as usize >= self.capacity()
    }

    fn entry_offset(index: usize) -> u64 {
        (FREE_SPACE_BLOCK_HEADER_SIZE + index * FREE_SPACE_ENTRY_SIZE) as u64
    }

    /// # Panics
    ///
    /// If `index` is not below `count()`.
    pub fn entry(&self, index: usize) -> FreeSpaceEntry {
        assert!(index < self.count() as usize, "free space entry {} out of range", index);
        let data = self.block.data(Self::entry_offset(index));
        // INVARIANT: the slice is exactly one entry long
        FreeSpaceEntry::read_from_bytes(&data[..FREE_SPACE_ENTRY_SIZE]).unwrap()
    }

    /// # Panics
    ///
    /// If `index` is not below `count()`.
    pub fn set_entry(&self, index: usize, entry: &FreeSpaceEntry) {
        assert!(index < self.count() as usize, "free space entry {} out of range", index);
        self.block.data_mut(Self::entry_offset(index))[..FREE_SPACE_ENTRY_SIZE]
            .copy_from_slice(entry.as_bytes());
    }

    /// Appends an entry. Returns `false` if the block is full.
    pub fn push(&self, entry: &FreeSpaceEntry) -> bool {
        if self.is_full() {
            return false;
        }
        let index = self.count() as usize;
        self.set_count(index as u32 + 1);
        self.set_entry(index, entry);
        true
    }

    /// Removes the entry at `index`, keeping the order of the others.
    pub fn remove(&self, index: usize) -> FreeSpaceEntry {
        let removed = self.entry(index);
        let count = self.count() as usize;
        {
            let start = Self::entry_offset(0) as usize;
            let mut data = self.block.data_mut(0);
            let from = start + (index + 1) * FREE_SPACE_ENTRY_SIZE;
            let to = start + count * FREE_SPACE_ENTRY_SIZE;
            data.copy_within(from..to, from - FREE_SPACE_ENTRY_SIZE);
            data[to - FREE_SPACE_ENTRY_SIZE..to].fill(0);
        }
        self.set_count(count as u32 - 1);
        removed
    }
}

impl SchemaBlock<'_> {
    block_accessors! {
        next_schema_block: u64,
        size: u32,
    }

    pub fn payload_capacity(&self) -> usize {
        self.block.page_size() - SCHEMA_BLOCK_HEADER_SIZE
    }
}

/// A block viewed through the accessors of its type.
#[derive(Debug, Clone, Copy)]
pub enum TypedBlock<'a> {
    Free(FreeBlock<'a>),
    TableHeader(TableHeaderBlock<'a>),
    Data(DataBlock<'a>),
    FreeSpace(FreeSpaceBlock<'a>),
    Schema(SchemaBlock<'a>),
    /// Index and bloom filter blocks; only their chain link is described here.
    Chained(&'a Block),
}

impl<'a> TypedBlock<'a> {
    pub fn interpret(block: &'a Block) -> Self {
        match block.block_type() {
            BlockType::Free => TypedBlock::Free(FreeBlock { block }),
            BlockType::TableHeader => TypedBlock::TableHeader(TableHeaderBlock { block }),
            BlockType::Data => TypedBlock::Data(DataBlock { block }),
            BlockType::FreeSpace => TypedBlock::FreeSpace(FreeSpaceBlock { block }),
            BlockType::Schema => TypedBlock::Schema(SchemaBlock { block }),
            BlockType::SecondaryIndex | BlockType::IndirectIndex | BlockType::BloomFilter => {
                TypedBlock::Chained(block)
            }
        }
    }

    pub fn block(&self) -> &'a Block {
        match self {
            TypedBlock::Free(v) => v.block(),
            TypedBlock::TableHeader(v) => v.block(),
            TypedBlock::Data(v) => v.block(),
            TypedBlock::FreeSpace(v) => v.block(),
            TypedBlock::Schema(v) => v.block(),
            TypedBlock::Chained(block) => block,
        }
    }

    /// Next block of the chain this block is part of, if its type forms
    /// chains. `None` for table headers and data blocks; `Some(0)` ends a
    /// chain.
    pub fn next_in_chain(&self) -> Option<u64> {
        match self {
            TypedBlock::Free(v) => Some(v.next_free_block()),
            TypedBlock::FreeSpace(v) => Some(v.next_free_space_block()),
            TypedBlock::Schema(v) => Some(v.next_schema_block()),
            TypedBlock::Chained(block) => Some(block.get_field("next_block")),
            TypedBlock::TableHeader(_) | TypedBlock::Data(_) => None,
        }
    }
}
