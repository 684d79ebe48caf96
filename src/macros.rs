//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32, U64).
//!
//! ```ignore
//! #[repr(C)]
//! struct FreeSpaceEntry {
//!     reference: U64,
//!     size: U32,
//! }
//!
//! impl FreeSpaceEntry {
//!     zerocopy_accessors! {
//!         reference: u64,
//!         size: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn reference(&self) -> u64 { self.reference.get() }
//! // pub fn set_reference(&mut self, val: u64) { self.reference = U64::new(val); }
//! // ...
//! ```
//!
//! ## block_accessors!
//!
//! Generates typed getters and setters for a block view whose fields are
//! described by a structure descriptor. The view must have a `block: &Block`
//! field; the accessor name is the descriptor field name.
//!
//! ```ignore
//! impl FreeBlock<'_> {
//!     block_accessors! {
//!         next_free_block: u64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn next_free_block(&self) -> u64 { self.block.get_field("next_free_block") as u64 }
//! // pub fn set_next_free_block(&self, val: u64) { self.block.set_field("next_free_block", val as u64) }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::little_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Generates getter and setter methods for descriptor-backed block fields.
#[macro_export]
macro_rules! block_accessors {
    ($($field:ident : $ty:ty),* $(,)?) => {
        ::paste::paste! {
            $(
                #[inline]
                pub fn $field(&self) -> $ty {
                    self.block.get_field(stringify!($field)) as $ty
                }

                #[inline]
                pub fn [<set_ $field>](&self, val: $ty) {
                    self.block.set_field(stringify!($field), val as u64)
                }
            )*
        }
    };
}
