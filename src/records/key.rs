//! # Row Keys
//!
//! The row key is the 128-bit hash of the row-key columns. It is the primary
//! lookup and sharding key, so its input bytes are fixed:
//!
//! ```text
//! key column 1 | key column 2 | ... | [branch: u32 LE] | [language: UTF-8, 0]
//! ```
//!
//! Each key column contributes its canonical bytes (no length prefix);
//! strings and buffers are followed by a zero byte so `("ab", "c")` and
//! `("a", "bc")` differ. The bytes are hashed with MurmurHash3 x64/128 under
//! the table's key seed, which must never change once rows exist.
//!
//! The same bytes fed through [`RollingHash`] give the 32-bit hash used as
//! Bloom filter input.

use eyre::Result;

use super::row::Row;
use crate::error::StorageError;
use crate::hash::{murmur3_x64_128, RollingHash, RowKey};

impl Row {
    /// Serialized row-key columns. Every key column must be present.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        let schema = self.schema();
        let mut buf = Vec::with_capacity(32);
        for column in schema.row_key_columns() {
            let value = self.get_by_id(column.id()).ok_or_else(|| {
                StorageError::Constraint(format!(
                    "row key column '{}' of table '{}' has no value",
                    column.name(),
                    schema.name()
                ))
            })?;
            value.encode_key(column.column_type(), &mut buf)?;
        }
        Ok(buf)
    }

    /// 128-bit row key, optionally qualified by a branch version and a
    /// language tag.
    pub fn generate_key(
        &self,
        seed: u32,
        branch: Option<u32>,
        language: Option<&str>,
    ) -> Result<RowKey> {
        let mut buf = self.key_bytes()?;
        if let Some(branch) = branch {
            buf.extend_from_slice(&branch.to_le_bytes());
        }
        if let Some(language) = language {
            buf.extend_from_slice(language.as_bytes());
            buf.push(0);
        }
        Ok(murmur3_x64_128(seed, &buf))
    }

    /// 32-bit rolling hash of the row-key columns.
    pub fn key_hash(&self, seed: u32) -> Result<u32> {
        let mut hash = RollingHash::new(seed);
        hash.add(&self.key_bytes()?);
        Ok(hash.get())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DEFAULT_KEY_SEED;
    use crate::error::{error_kind, ErrorKind};
    use crate::hash::hash32;
    use crate::schema::{ColumnDescription, ColumnType, Model, SchemaHistory, TableDescription};

    fn schemas() -> Arc<SchemaHistory> {
        let d = TableDescription::new("pages", Model::Content)
            .with_column(ColumnDescription::new("site", ColumnType::P8String))
            .with_column(ColumnDescription::new("path", ColumnType::P16String))
            .with_column(ColumnDescription::new("hits", ColumnType::UInt64))
            .with_row_key(["site", "path"]);
        Arc::new(SchemaHistory::new(&d).unwrap())
    }

    fn row(site: &str, path: &str) -> Row {
        let mut row = Row::new(schemas());
        row.set("site", site).unwrap().set("path", path).unwrap();
        row
    }

    #[test]
    fn key_bytes_separate_strings() {
        assert_eq!(row("ab", "c").key_bytes().unwrap(), b"ab\0c\0");
        assert_ne!(
            row("ab", "c").generate_key(DEFAULT_KEY_SEED, None, None).unwrap(),
            row("a", "bc").generate_key(DEFAULT_KEY_SEED, None, None).unwrap()
        );
    }

    #[test]
    fn key_is_deterministic_and_ignores_other_columns() {
        let a = row("x", "/");
        let mut b = row("x", "/");
        b.set("hits", 10u64).unwrap();

        assert_eq!(
            a.generate_key(DEFAULT_KEY_SEED, None, None).unwrap(),
            b.generate_key(DEFAULT_KEY_SEED, None, None).unwrap()
        );
    }

    #[test]
    fn branch_language_and_seed_change_the_key() {
        let r = row("x", "/");
        let plain = r.generate_key(DEFAULT_KEY_SEED, None, None).unwrap();

        assert_ne!(plain, r.generate_key(DEFAULT_KEY_SEED, Some(2), None).unwrap());
        assert_ne!(plain, r.generate_key(DEFAULT_KEY_SEED, None, Some("fr")).unwrap());
        assert_ne!(plain, r.generate_key(1, None, None).unwrap());
    }

    #[test]
    fn missing_key_column_fails() {
        let mut r = Row::new(schemas());
        r.set("site", "x").unwrap();

        let err = r.generate_key(DEFAULT_KEY_SEED, None, None).unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Constraint));
        assert!(r.key_hash(0).is_err());
    }

    #[test]
    fn key_hash_matches_one_shot_hash() {
        let r = row("ab", "c");

        assert_eq!(r.key_hash(7).unwrap(), hash32(7, b"ab\0c\0"));
    }
}
