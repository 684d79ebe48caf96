//! # Encoding Module
//!
//! Byte-level helpers shared by the binary codecs:
//!
//! - **Cursor**: bounds-checked little-endian reads, append-only writes

pub mod cursor;

pub use cursor::{put_f64, put_string16, put_u16, put_u32, put_u64, put_u8, Reader};
