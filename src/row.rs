//! Typed row convenience layer sitting atop the low-level
//! `set_col_val`/`append_row_with_values` API: a `Row` trait plus the
//! `#[derive(Row)]` macro in `sqlog-macros` that implements it from a
//! struct's field types, turning `&self` into the columns
//! `append_row_with_values` expects.

use crate::writer::TypeTag;

/// One column's value as a `Row` implementation hands it to the writer,
/// already encoded the way `set_col_val` wants it.
#[derive(Debug, Clone, PartialEq)]
pub enum RowColumn {
    Null,
    Int(Vec<u8>),
    Real([u8; 8]),
    Text(String),
    Blob(Vec<u8>),
}

impl RowColumn {
    pub fn from_i8(v: i8) -> Self {
        RowColumn::Int(v.to_be_bytes().to_vec())
    }
    pub fn from_i16(v: i16) -> Self {
        RowColumn::Int(v.to_be_bytes().to_vec())
    }
    pub fn from_i32(v: i32) -> Self {
        RowColumn::Int(v.to_be_bytes().to_vec())
    }
    pub fn from_i64(v: i64) -> Self {
        RowColumn::Int(v.to_be_bytes().to_vec())
    }
    pub fn from_f64(v: f64) -> Self {
        RowColumn::Real(v.to_be_bytes())
    }

    fn as_tag_and_bytes(&self) -> (TypeTag, &[u8]) {
        match self {
            RowColumn::Null => (TypeTag::Null, &[]),
            RowColumn::Int(bytes) => (TypeTag::Int, bytes),
            RowColumn::Real(bytes) => (TypeTag::Real, bytes),
            RowColumn::Text(s) => (TypeTag::Text, s.as_bytes()),
            RowColumn::Blob(bytes) => (TypeTag::Blob, bytes),
        }
    }
}

/// Implemented by `#[derive(Row)]` (from `sqlog-macros`) or by hand: describes
/// how a struct's fields map onto the table's columns, in declaration order.
pub trait Row {
    fn column_values(&self) -> Vec<RowColumn>;
}

/// Converts a `Row`'s columns into the `(TypeTag, &[u8])` pairs
/// `Writer::append_row_with_values` accepts. Kept separate from the `Row`
/// trait itself so the borrowed slices can be built from a temporary,
/// owned `Vec<RowColumn>` without a lifetime fight in the trait signature.
pub fn row_to_values<R: Row>(row: &R) -> (Vec<RowColumn>, usize) {
    let columns = row.column_values();
    let len = columns.len();
    (columns, len)
}

pub fn values_as_refs(columns: &[RowColumn]) -> Vec<(TypeTag, &[u8])> {
    columns.iter().map(RowColumn::as_tag_and_bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Event {
        level: i64,
        message: String,
    }

    impl Row for Event {
        fn column_values(&self) -> Vec<RowColumn> {
            vec![RowColumn::from_i64(self.level), RowColumn::Text(self.message.clone())]
        }
    }

    #[test]
    fn row_to_values_round_trips_shape() {
        let event = Event { level: 2, message: "boot".to_string() };
        let (columns, len) = row_to_values(&event);
        assert_eq!(len, 2);
        let refs = values_as_refs(&columns);
        assert_eq!(refs[0].0, TypeTag::Int);
        assert_eq!(refs[1].0, TypeTag::Text);
        assert_eq!(refs[1].1, b"boot");
    }
}
