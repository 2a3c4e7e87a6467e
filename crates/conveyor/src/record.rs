//! Records: ordered rows of columns with running size totals.

use crate::column::Column;
use serde::Serialize;
use std::fmt;

/// Estimated fixed footprint of an empty record.
pub const RECORD_HEAD: usize = 32;

/// Estimated per-column overhead on top of the column's byte size.
pub const COLUMN_HEAD: usize = 40;

/// Typical column count; used as the initial slot capacity.
const AVERAGE_COLUMN_COUNT: usize = 16;

/// Errors from record mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("cannot set column at negative index {0}")]
    NegativeIndex(i64),
}

/// One row of data in transit between a reader and a writer.
///
/// `byte_size` and `memory_size` are maintained incrementally: every add or
/// replace subtracts the old slot's contribution and adds the new one.
#[derive(Debug, Clone)]
pub struct Record {
    columns: Vec<Option<Column>>,
    byte_size: usize,
    memory_size: usize,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            columns: Vec::with_capacity(AVERAGE_COLUMN_COUNT),
            byte_size: 0,
            memory_size: RECORD_HEAD,
        }
    }

    /// Append a column at the next free index.
    pub fn add_column(&mut self, column: Column) {
        self.incr(&column);
        self.columns.push(Some(column));
    }

    /// Builder form of [`Record::add_column`].
    pub fn with(mut self, column: impl Into<Column>) -> Self {
        self.add_column(column.into());
        self
    }

    /// Set the column at `index`, growing the record with empty slots if needed.
    ///
    /// Indices are signed because column mappings arrive from job
    /// configuration; a negative index is rejected without touching the record.
    pub fn set_column(&mut self, index: i64, column: Column) -> Result<(), RecordError> {
        if index < 0 {
            return Err(RecordError::NegativeIndex(index));
        }
        let index = index as usize;
        if index >= self.columns.len() {
            self.columns.resize_with(index + 1, || None);
        }

        if let Some(old) = self.columns[index].take() {
            self.decr(&old);
        }
        self.incr(&column);
        self.columns[index] = Some(column);
        Ok(())
    }

    /// Get the column at `index`.
    ///
    /// Returns `None` when the index is out of bounds or the slot was never
    /// set. A column holding a null value is still `Some`.
    pub fn get_column(&self, index: i64) -> Option<&Column> {
        if index < 0 {
            return None;
        }
        self.columns.get(index as usize).and_then(Option::as_ref)
    }

    /// Number of column slots, including empty placeholders.
    pub fn column_number(&self) -> usize {
        self.columns.len()
    }

    /// Sum of the byte sizes of all present columns.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Estimated in-memory footprint, headers included.
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    /// Iterate over all slots in order.
    pub fn columns(&self) -> impl Iterator<Item = Option<&Column>> {
        self.columns.iter().map(Option::as_ref)
    }

    fn incr(&mut self, column: &Column) {
        self.byte_size += column.byte_size();
        self.memory_size += COLUMN_HEAD + column.byte_size();
    }

    fn decr(&mut self, column: &Column) {
        self.byte_size -= column.byte_size();
        self.memory_size -= COLUMN_HEAD + column.byte_size();
    }
}

#[derive(Serialize)]
struct Diagnostic<'a> {
    size: usize,
    data: &'a [Option<Column>],
}

/// Diagnostic JSON form: `{"size": n, "data": [...]}`. Not a wire format.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let diag = Diagnostic {
            size: self.column_number(),
            data: &self.columns,
        };
        let json = serde_json::to_string(&diag).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnType, ColumnValue};

    /// Recompute both totals from scratch.
    fn oracle(record: &Record) -> (usize, usize) {
        record.columns().flatten().fold((0, RECORD_HEAD), |(b, m), c| {
            (b + c.byte_size(), m + COLUMN_HEAD + c.byte_size())
        })
    }

    #[test]
    fn test_empty_record() {
        let record = Record::new();
        assert_eq!(record.column_number(), 0);
        assert_eq!(record.byte_size(), 0);
        assert_eq!(record.memory_size(), RECORD_HEAD);
    }

    #[test]
    fn test_add_column() {
        let record = Record::new().with(1i64).with("abc");

        assert_eq!(record.column_number(), 2);
        assert_eq!(record.byte_size(), 11);
        assert_eq!(record.memory_size(), RECORD_HEAD + 2 * COLUMN_HEAD + 11);
        assert_eq!(record.get_column(1).and_then(Column::as_str), Some("abc"));
    }

    #[test]
    fn test_set_column_grows_with_placeholders() {
        let mut record = Record::new();
        record.set_column(4, Column::long(9)).unwrap();

        assert_eq!(record.column_number(), 5);
        for i in 0..4 {
            assert!(record.get_column(i).is_none());
        }
        assert_eq!(record.get_column(4).and_then(Column::as_i64), Some(9));
        assert_eq!(record.byte_size(), 8);
        assert_eq!(record.memory_size(), RECORD_HEAD + COLUMN_HEAD + 8);
    }

    #[test]
    fn test_set_column_replaces_without_double_counting() {
        let mut record = Record::new().with("abcd").with(1i64);
        record.set_column(0, Column::string("z")).unwrap();

        assert_eq!(record.column_number(), 2);
        assert_eq!(record.byte_size(), 9);
        assert_eq!(record.memory_size(), RECORD_HEAD + 2 * COLUMN_HEAD + 9);
    }

    #[test]
    fn test_negative_index_rejected_without_mutation() {
        let mut record = Record::new().with(1i64);
        let before = (record.column_number(), record.byte_size(), record.memory_size());

        let err = record.set_column(-3, Column::long(2)).unwrap_err();
        assert_eq!(err, RecordError::NegativeIndex(-3));
        assert!(err.to_string().contains("-3"));

        let after = (record.column_number(), record.byte_size(), record.memory_size());
        assert_eq!(before, after);
    }

    #[test]
    fn test_get_column_out_of_bounds() {
        let record = Record::new().with(true);
        assert!(record.get_column(1).is_none());
        assert!(record.get_column(-1).is_none());
    }

    #[test]
    fn test_null_value_is_distinct_from_absent() {
        let mut record = Record::new();
        record.set_column(1, Column::null(ColumnType::Long)).unwrap();

        assert!(record.get_column(0).is_none());
        let col = record.get_column(1).expect("present");
        assert!(col.is_null());
        assert_eq!(record.byte_size(), 0);
        assert_eq!(record.memory_size(), RECORD_HEAD + COLUMN_HEAD);
    }

    #[test]
    fn test_incremental_sizes_match_oracle() {
        // Deterministic pseudo-random mix of adds and sets.
        let mut record = Record::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for step in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            let column = match seed % 4 {
                0 => Column::long(step),
                1 => Column::string("x".repeat((seed % 37) as usize)),
                2 => Column::bytes(vec![0u8; (seed % 11) as usize]),
                _ => Column::new(ColumnValue::Double(None)),
            };
            if seed % 3 == 0 {
                record.add_column(column);
            } else {
                let index = ((seed >> 8) % 64) as i64;
                record.set_column(index, column).unwrap();
            }

            assert_eq!((record.byte_size(), record.memory_size()), oracle(&record));
        }
    }

    #[test]
    fn test_display_includes_size_and_data() {
        let mut record = Record::new().with(5i64);
        record.set_column(2, Column::string("s")).unwrap();

        let json: serde_json::Value = serde_json::from_str(&record.to_string()).unwrap();
        assert_eq!(json["size"], 3);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["value"], 5);
        assert!(data[1].is_null());
        assert_eq!(data[2]["type"], "string");
    }
}
