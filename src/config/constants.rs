//! # blockdb Configuration Constants
//!
//! Layout constants are co-located with the values derived from them so that
//! a change to one is visible next to everything it affects.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_HEADER_SIZE (8 bytes: tag + structure version + reserved)
//!       │
//!       ├─> FREE_BLOCK_NEXT_OFFSET (first field after the header)
//!       ├─> DATA_BLOCK_HEADER_SIZE (header + used + reserved)
//!       ├─> FREE_SPACE_BLOCK_HEADER_SIZE (header + next + count + reserved)
//!       └─> PAGE_SIZE_FIELD_OFFSET (table header page size field)
//!
//! TABLE_HEADER_SIZE (128 bytes, block 0 only)
//!       │
//!       └─> must fit in MIN_PAGE_SIZE
//!
//! ROW_SLOT_HEADER_SIZE (capacity + length)
//!       │
//!       └─> MIN_FREE_SPACE_SPLIT (smallest remainder worth tracking)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `TABLE_HEADER_SIZE <= MIN_PAGE_SIZE`
//! 2. `MIN_FREE_SPACE_SPLIT > ROW_SLOT_HEADER_SIZE` (a split remainder can
//!    hold at least one byte of payload)
//! 3. `DEFAULT_PAGE_SIZE` is a multiple of `MIN_PAGE_SIZE`

// ============================================================================
// PAGE SIZES
// ============================================================================

/// Default block size for new table files (16KB). Rounded up to a multiple
/// of the OS page size when applied.
pub const DEFAULT_PAGE_SIZE: usize = 16384;

/// Smallest block size accepted by `TableConfig`.
pub const MIN_PAGE_SIZE: usize = 4096;

const _: () = assert!(
    DEFAULT_PAGE_SIZE % MIN_PAGE_SIZE == 0,
    "DEFAULT_PAGE_SIZE must be a multiple of MIN_PAGE_SIZE"
);

// ============================================================================
// BLOCK LAYOUT
// Every block starts with a 4-byte tag and a 16-bit structure version.
// ============================================================================

pub const BLOCK_TAG_SIZE: usize = 4;

/// Tag + structure version + 2 reserved bytes.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Offset of the structure version inside every block.
pub const STRUCTURE_VERSION_OFFSET: usize = BLOCK_TAG_SIZE;

/// Size of the table header block's structured fields.
pub const TABLE_HEADER_SIZE: usize = 128;

/// The table header stores the page size right after the block header. The
/// file layer reads it back from here when reopening a file.
pub const PAGE_SIZE_FIELD_OFFSET: usize = BLOCK_HEADER_SIZE;

pub const FREE_BLOCK_NEXT_OFFSET: usize = BLOCK_HEADER_SIZE;

pub const DATA_BLOCK_HEADER_SIZE: usize = BLOCK_HEADER_SIZE + 8;

pub const FREE_SPACE_BLOCK_HEADER_SIZE: usize = BLOCK_HEADER_SIZE + 16;

pub const FREE_SPACE_ENTRY_SIZE: usize = 16;

const _: () = assert!(
    TABLE_HEADER_SIZE <= MIN_PAGE_SIZE,
    "the table header must fit in the smallest page"
);

// ============================================================================
// ALLOCATION
// ============================================================================

/// Number of free blocks appended at once when the free list runs dry, and
/// the size of the initial chain written when a file is created.
pub const DEFAULT_FREE_BLOCK_BATCH: usize = 16;

/// `[u32 capacity][u32 length]` in front of every stored row blob.
pub const ROW_SLOT_HEADER_SIZE: usize = 8;

/// Remainders smaller than this are handed out with the allocation instead
/// of being tracked as free space.
pub const MIN_FREE_SPACE_SPLIT: usize = 16;

const _: () = assert!(
    MIN_FREE_SPACE_SPLIT > ROW_SLOT_HEADER_SIZE,
    "a split remainder must be able to hold a slot header and payload"
);

/// Largest blob representable by the 32-bit size fields.
pub const MAX_BLOB_SIZE: u64 = u32::MAX as u64;

// ============================================================================
// HASHING
// ============================================================================

/// Seed used for 128-bit row keys. Changing it invalidates every stored key,
/// so all writers and readers of a cluster must agree on it.
pub const DEFAULT_KEY_SEED: u32 = 0x5eed_c0de;

// ============================================================================
// FILE LAYOUT
// ============================================================================

/// Lock file serializing the first open-or-create of files in a directory.
pub const LOCK_FILE_NAME: &str = "global.lock";

pub const TABLE_FILE_EXTENSION: &str = "snapdb";
