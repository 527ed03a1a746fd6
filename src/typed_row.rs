//! Converts table records between their on-disk serial-type-tagged bytes
//! and a typed, in-memory row (`Vec<SqlValue>`).
//!
//! A row with fewer physical columns than the table currently declares is
//! not an error: trailing columns absent from an older record are NULL,
//! which is how `ALTER TABLE ADD COLUMN` schema evolution is observed on
//! read.

use crate::sql_type::SqlType;
use crate::sql_value::SqlValue;
use crate::table_traits::TableMeta;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub items: Vec<SqlValue>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not cast a stored value to its declared column type: {0}")]
    Casting(#[from] crate::serial_type::Error),
    #[error("row has {got} values but the table declares {expected} columns")]
    ColumnCountMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decodes one table-leaf record into a typed `Row`. Casts each stored
/// value to the table's declared type only when `strict` is set, matching
/// SQLite's STRICT-table semantics (see `TableMeta::strict`).
pub fn from_serialized(column_types: &[SqlType], strict: bool, record_bytes: &[u8]) -> Result<Row> {
    let mut items = Vec::with_capacity(column_types.len());
    let mut values = crate::record::ValueIterator::new(record_bytes);
    for &ct in column_types {
        let v = match values.next() {
            Some((serial_type, bytes)) => crate::serial_type::to_sql_value(&serial_type, bytes)?,
            None => SqlValue::Null(),
        };
        items.push(if strict { crate::serial_type::cast_to_schema_type(v, ct)? } else { v });
    }
    Ok(Row { items })
}

/// Validates that `row` could legally be written to `table`: right arity,
/// and (when the table is STRICT) values castable to their declared types.
pub fn validate_row_for_table(table: &dyn TableMeta, row: &[SqlValue]) -> Result<()> {
    let coltypes = table.column_types();
    if row.len() != coltypes.len() {
        return Err(Error::ColumnCountMismatch { expected: coltypes.len(), got: row.len() });
    }
    if table.strict() {
        for (v, t) in row.iter().zip(coltypes.iter()) {
            crate::serial_type::cast_to_schema_type(v.clone(), *t)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_trailing_columns_decode_as_null() {
        let bytes = crate::record::encode_record(&[SqlValue::Int(7)]);
        let row = from_serialized(&[SqlType::Int, SqlType::Text], false, &bytes).unwrap();
        assert_eq!(row.items, vec![SqlValue::Int(7), SqlValue::Null()]);
    }

    #[test]
    fn strict_table_rejects_type_mismatch() {
        let bytes = crate::record::encode_record(&[SqlValue::Text("x".to_string())]);
        let err = from_serialized(&[SqlType::Int], true, &bytes);
        assert!(err.is_err());
    }
}
