//! # Schema Persistence
//!
//! Binary form of a [`SchemaHistory`]. The whole history is written as one
//! blob so rows stamped with any past version stay decodable after reopen.
//!
//! ## Format
//!
//! All integers are little-endian; strings are `u16` length + UTF-8.
//!
//! ```text
//! magic: "BSCH" (4 bytes)
//! format: u16 (currently 1)
//! next_column_id: u16
//! version_count: u32
//! For each version:
//!   - version: u32
//!   - table name: string
//!   - model: u8
//!   - column_count: u16
//!   - For each column:
//!       - id: u16
//!       - name: string
//!       - type: u8 (ColumnType code)
//!       - flags: u32
//!       - present: u8 (bit 0 default, 1 min value, 2 max value,
//!                      3 min length, 4 max length)
//!       - default: value encoded for the column type (if bit 0)
//!       - min/max value: f64 each (if bits 1/2)
//!       - min/max length: u32 each (if bits 3/4)
//!   - row_key_count: u16, then column ids (u16 each)
//!   - index_count: u16
//!   - For each index:
//!       - name: string
//!       - column_count: u16, then column ids (u16 each)
//! ```
//!
//! Decoding validates everything it reads (unknown type or model codes,
//! dangling column ids, trailing bytes) and reports `Corrupt`.

use eyre::{bail, Result};

use super::column::{Column, ColumnDescription, ColumnId};
use super::history::SchemaHistory;
use super::table::{IndexDescription, TableSchema};
use super::types::{ColumnFlags, ColumnType, Model};
use crate::encoding::{put_f64, put_string16, put_u16, put_u32, put_u8, Reader};
use crate::error::StorageError;
use crate::records::Value;

const SCHEMA_MAGIC: &[u8; 4] = b"BSCH";
const SCHEMA_FORMAT: u16 = 1;

const HAS_DEFAULT: u8 = 1 << 0;
const HAS_MIN_VALUE: u8 = 1 << 1;
const HAS_MAX_VALUE: u8 = 1 << 2;
const HAS_MIN_LENGTH: u8 = 1 << 3;
const HAS_MAX_LENGTH: u8 = 1 << 4;

pub fn encode_history(history: &SchemaHistory) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(SCHEMA_MAGIC);
    put_u16(&mut buf, SCHEMA_FORMAT);
    put_u16(&mut buf, history.next_column_id());

    let count = history.versions().count();
    put_u32(&mut buf, count as u32);
    for schema in history.versions() {
        encode_schema(schema, &mut buf)?;
    }
    Ok(buf)
}

fn encode_schema(schema: &TableSchema, buf: &mut Vec<u8>) -> Result<()> {
    put_u32(buf, schema.version());
    put_string16(buf, schema.name());
    put_u8(buf, schema.model().code());

    put_u16(buf, schema.columns().len() as u16);
    for column in schema.columns() {
        encode_column(column, buf)?;
    }

    put_u16(buf, schema.row_key().len() as u16);
    for id in schema.row_key() {
        put_u16(buf, *id);
    }

    put_u16(buf, schema.secondary_indexes().len() as u16);
    for index in schema.secondary_indexes() {
        put_string16(buf, index.name());
        put_u16(buf, index.columns().len() as u16);
        for id in index.columns() {
            put_u16(buf, *id);
        }
    }
    Ok(())
}

fn encode_column(column: &Column, buf: &mut Vec<u8>) -> Result<()> {
    let d = column.description();
    put_u16(buf, column.id());
    put_string16(buf, d.name());
    put_u8(buf, d.column_type().code());
    put_u32(buf, d.flags().bits());

    let mut present = 0u8;
    if d.default_value().is_some() {
        present |= HAS_DEFAULT;
    }
    if d.min_value().is_some() {
        present |= HAS_MIN_VALUE;
    }
    if d.max_value().is_some() {
        present |= HAS_MAX_VALUE;
    }
    if d.min_length().is_some() {
        present |= HAS_MIN_LENGTH;
    }
    if d.max_length().is_some() {
        present |= HAS_MAX_LENGTH;
    }
    put_u8(buf, present);

    if let Some(default) = d.default_value() {
        default.encode(d.column_type(), buf)?;
    }
    if let Some(v) = d.min_value() {
        put_f64(buf, v);
    }
    if let Some(v) = d.max_value() {
        put_f64(buf, v);
    }
    if let Some(v) = d.min_length() {
        put_u32(buf, v);
    }
    if let Some(v) = d.max_length() {
        put_u32(buf, v);
    }
    Ok(())
}

pub fn decode_history(data: &[u8]) -> Result<SchemaHistory> {
    let mut reader = Reader::new(data);

    let magic = reader.bytes(SCHEMA_MAGIC.len(), "schema magic")?;
    if magic != SCHEMA_MAGIC {
        bail!(StorageError::Corrupt(format!("bad schema magic {:02x?}", magic)));
    }
    let format = reader.u16("schema format")?;
    if format != SCHEMA_FORMAT {
        bail!(StorageError::Corrupt(format!("unsupported schema format {}", format)));
    }
    let next_column_id = reader.u16("next column id")?;

    let count = reader.u32("schema version count")?;
    let mut versions = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        versions.push(decode_schema(&mut reader)?);
    }

    if !reader.is_empty() {
        bail!(StorageError::Corrupt(format!(
            "{} trailing bytes after schema history",
            reader.remaining()
        )));
    }

    SchemaHistory::from_versions(versions, next_column_id)
}

fn decode_schema(reader: &mut Reader<'_>) -> Result<TableSchema> {
    let version = reader.u32("schema version")?;
    let name = reader.string16("table name")?;
    let model_code = reader.u8("storage model")?;
    let model = Model::from_code(model_code).ok_or_else(|| {
        StorageError::Corrupt(format!("unknown storage model code {}", model_code))
    })?;

    let column_count = reader.u16("column count")?;
    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        columns.push(decode_column(reader)?);
    }

    let name_of = |id: ColumnId| -> Result<String> {
        columns
            .iter()
            .find(|c: &&Column| c.id() == id)
            .map(|c| c.name().to_string())
            .ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "schema version {} references unknown column id {}",
                    version, id
                ))
                .into()
            })
    };

    let key_count = reader.u16("row key count")?;
    let mut row_key = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        row_key.push(name_of(reader.u16("row key column")?)?);
    }

    let index_count = reader.u16("index count")?;
    let mut indexes = Vec::with_capacity(index_count as usize);
    for _ in 0..index_count {
        let index_name = reader.string16("index name")?;
        let n = reader.u16("index column count")?;
        let mut index_columns = Vec::with_capacity(n as usize);
        for _ in 0..n {
            index_columns.push(name_of(reader.u16("index column")?)?);
        }
        indexes.push(IndexDescription::new(index_name, index_columns));
    }

    TableSchema::build(version, &name, model, columns, &row_key, &indexes).map_err(|e| {
        StorageError::Corrupt(format!("stored schema version {} is invalid: {}", version, e))
            .into()
    })
}

fn decode_column(reader: &mut Reader<'_>) -> Result<Column> {
    let id = reader.u16("column id")?;
    if id == 0 {
        bail!(StorageError::Corrupt("stored column uses reserved id 0".to_string()));
    }
    let name = reader.string16("column name")?;
    let code = reader.u8("column type")?;
    let column_type = ColumnType::from_code(code)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown column type code {}", code)))?;
    let flags = ColumnFlags::from_bits(reader.u32("column flags")?);
    let present = reader.u8("column attributes")?;

    let mut description = ColumnDescription::new(name, column_type).with_flags(flags);
    if present & HAS_DEFAULT != 0 {
        description = description.with_default(Value::decode(column_type, reader)?);
    }
    if present & HAS_MIN_VALUE != 0 {
        description = description.with_min_value(reader.f64("min value")?);
    }
    if present & HAS_MAX_VALUE != 0 {
        description = description.with_max_value(reader.f64("max value")?);
    }
    if present & HAS_MIN_LENGTH != 0 {
        description = description.with_min_length(reader.u32("min length")?);
    }
    if present & HAS_MAX_LENGTH != 0 {
        description = description.with_max_length(reader.u32("max length")?);
    }

    Ok(Column::new(id, description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use crate::schema::table::TableDescription;

    fn history() -> SchemaHistory {
        let v1 = TableDescription::new("people", Model::Content)
            .with_column(ColumnDescription::new("a", ColumnType::Int32))
            .with_column(
                ColumnDescription::new("b", ColumnType::P16String)
                    .required()
                    .with_max_length(64),
            )
            .with_row_key(["b"]);
        let v2 = TableDescription::new("people", Model::Content)
            .with_column(
                ColumnDescription::new("b", ColumnType::P16String)
                    .required()
                    .with_max_length(64),
            )
            .with_column(
                ColumnDescription::new("c", ColumnType::UInt32)
                    .with_default(Value::UInt32(7))
                    .with_min_value(1.0),
            )
            .with_row_key(["b"])
            .with_secondary_index(IndexDescription::new("by_c", ["c"]));

        let mut history = SchemaHistory::new(&v1).unwrap();
        history.apply(&v2).unwrap();
        history
    }

    #[test]
    fn history_survives_encode_decode() {
        let original = history();

        let decoded = decode_history(&encode_history(&original).unwrap()).unwrap();

        assert_eq!(decoded.current_version(), 2);
        assert_eq!(decoded.next_column_id(), original.next_column_id());
        for v in [1, 2] {
            assert!(decoded
                .version(v)
                .unwrap()
                .same_layout(original.version(v).unwrap()));
        }
        let c = decoded.current().column("c").unwrap();
        assert_eq!(c.default_value(), Some(&Value::UInt32(7)));
        assert_eq!(c.description().min_value(), Some(1.0));
        assert_eq!(decoded.current().secondary_indexes()[0].name(), "by_c");
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let bytes = encode_history(&history()).unwrap();

        for cut in [0, 3, 10, bytes.len() / 2, bytes.len() - 1] {
            let err = decode_history(&bytes[..cut]).unwrap_err();
            assert_eq!(error_kind(&err), Some(ErrorKind::Corrupt), "cut at {}", cut);
        }
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut bytes = encode_history(&history()).unwrap();
        bytes.push(0);

        assert_eq!(
            error_kind(&decode_history(&bytes).unwrap_err()),
            Some(ErrorKind::Corrupt)
        );
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut bytes = encode_history(&history()).unwrap();
        bytes[0] = b'X';

        assert_eq!(
            error_kind(&decode_history(&bytes).unwrap_err()),
            Some(ErrorKind::Corrupt)
        );
    }
}
