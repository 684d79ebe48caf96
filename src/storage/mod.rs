//! # Storage Module
//!
//! Block-structured file storage. A table lives in one file made of
//! fixed-size blocks; every block starts with a 4-byte type tag and a
//! structure version.
//!
//! ## Layering
//!
//! ```text
//! VirtualBuffer   linear view over block regions + memory
//!      │
//! FreeSpace       free byte ranges inside DATA blocks (FSPC chain)
//! FreeList        free whole blocks (FREE chain)
//!      │
//! TypedBlock      FREE / SDBT / DATA / FSPC / SCHM views
//! Block           tag, structure version, descriptor-based fields
//!      │
//! DbFile          per-page mmap cache, file growth, directory lock
//! ```
//!
//! ## File Layout
//!
//! ```text
//! table_dir/
//! ├── global.lock       # serializes first open/create
//! └── users.snapdb      # block 0 = table header (SDBT), then any mix of
//!                       # FREE, DATA, FSPC, SCHM, ... blocks
//! ```
//!
//! ## Safety Model
//!
//! Pages are mapped one at a time and shared through reference-counted
//! handles, so growing the file never invalidates a live mapping. Each
//! mapping is reachable only through a `PageHandle`, and a `Block` must give
//! its handle back through `Block::release`; dropping a block that still holds
//! one panics.
//!
//! ## Page Size
//!
//! Configurable per file (16KB by default), rounded up to a multiple of the
//! OS page size and recorded in the table header.

pub mod block;
pub mod blocks;
pub mod dbfile;
pub mod free_space;
pub mod freelist;
pub mod lock;
pub mod structure;
pub mod virtual_buffer;

pub use block::{Block, BlockType};
pub use blocks::{
    DataBlock, FreeBlock, FreeSpaceBlock, SchemaBlock, TableHeaderBlock, TypedBlock,
    SCHEMA_BLOCK_HEADER_SIZE,
};
pub use dbfile::{os_page_size, round_to_os_page, DbFile, PageHandle, PageId};
pub use free_space::{FreeSpace, FreeSpaceEntry, FreeSpaceFlags};
pub use freelist::FreeList;
pub use lock::DirLock;
pub use structure::{FieldDescriptor, FieldKind, StructureVersion};
pub use virtual_buffer::VirtualBuffer;
