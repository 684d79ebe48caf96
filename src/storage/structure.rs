//! # Block Structure Descriptors
//!
//! Every block type declares its field layout as a list of
//! [`StructureVersion`]s, newest first. A block records the version it was
//! written with in its header, so an older layout stays readable after the
//! type gains fields.
//!
//! ```text
//! TABLE_HEADER_STRUCTURE = [
//!     { version: 2, fields: [page_size: u32, _: 4, table_definition: u64, ...] },
//!     { version: 1, fields: [page_size: u32, _: 4, table_definition: u64, ...] },
//! ]
//! ```
//!
//! Fields are laid out back to back starting right after the common block
//! header (`BLOCK_HEADER_SIZE`). Reserved gaps are fields with an empty name.
//!
//! The list must be strictly decreasing in version. Each block module checks
//! this with a `const` assertion, and [`StructureVersion::select`] asserts it
//! again at runtime.

use crate::config::BLOCK_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    Reserved(usize),
}

impl FieldKind {
    pub const fn size(self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::U32 => 4,
            FieldKind::U64 => 8,
            FieldKind::Reserved(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }

    pub const fn reserved(size: usize) -> Self {
        Self {
            name: "",
            kind: FieldKind::Reserved(size),
        }
    }
}

/// A resolved field: absolute offset inside the block and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocation {
    pub offset: usize,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureVersion {
    pub version: u16,
    pub fields: &'static [FieldDescriptor],
}

impl StructureVersion {
    /// Locates `name` in this layout.
    pub fn locate(&self, name: &str) -> Option<FieldLocation> {
        let mut offset = BLOCK_HEADER_SIZE;
        for field in self.fields {
            if !field.name.is_empty() && field.name == name {
                return Some(FieldLocation {
                    offset,
                    kind: field.kind,
                });
            }
            offset += field.kind.size();
        }
        None
    }

    /// Total size of the header plus every field of this layout.
    pub const fn size(&self) -> usize {
        let mut size = BLOCK_HEADER_SIZE;
        let mut i = 0;
        while i < self.fields.len() {
            size += self.fields[i].kind.size();
            i += 1;
        }
        size
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name).filter(|n| !n.is_empty())
    }

    /// Returns the layout for `version` in `versions`, or `None` if that
    /// version is not described.
    ///
    /// # Panics
    ///
    /// If `versions` is empty or not strictly decreasing.
    pub fn select(
        versions: &'static [StructureVersion],
        version: u16,
    ) -> Option<&'static StructureVersion> {
        assert!(
            is_strictly_descending(versions),
            "structure descriptors must be listed newest first with unique versions"
        );
        versions.iter().find(|s| s.version == version)
    }

    /// Newest layout of `versions`.
    ///
    /// # Panics
    ///
    /// Same conditions as [`StructureVersion::select`].
    pub fn current(versions: &'static [StructureVersion]) -> &'static StructureVersion {
        assert!(
            is_strictly_descending(versions),
            "structure descriptors must be listed newest first with unique versions"
        );
        &versions[0]
    }
}

/// `true` when `versions` is non-empty and each version is smaller than the
/// one before it.
pub const fn is_strictly_descending(versions: &[StructureVersion]) -> bool {
    if versions.is_empty() {
        return false;
    }
    let mut i = 1;
    while i < versions.len() {
        if versions[i].version >= versions[i - 1].version {
            return false;
        }
        i += 1;
    }
    true
}
