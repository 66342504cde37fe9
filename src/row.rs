//! Row serialization and the zero-copy row view.

use std::fmt;
use std::sync::Arc;

use crate::byteio;
use crate::schema::{ColumnType, Schema};
use crate::text::Text;

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Int(i32),
    Real(f64),
    Text(Text<'a>),
}

impl<'a> Value<'a> {
    pub fn materialize(&self) -> Value<'static> {
        match self {
            Value::Int(i) => Value::Int(*i),
            Value::Real(r) => Value::Real(*r),
            Value::Text(t) => Value::Text(t.materialize()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "INT",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
        }
    }
}

impl<'a> fmt::Display for Value<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(t) => write!(f, "{}", t.trimmed_str()),
        }
    }
}

fn write_value(buf: &mut [u8], offset: usize, size: usize, v: &Value) {
    match v {
        Value::Int(i) => {
            let _ = byteio::write_i32(buf, offset, *i);
        }
        Value::Real(r) => {
            let _ = byteio::write_f64(buf, offset, *r);
        }
        Value::Text(t) => {
            let bytes = t.as_bytes();
            let n = bytes.len().min(size);
            let _ = byteio::write_bytes(buf, offset, &bytes[..n]);
        }
    }
}

/// Serializes a single value into exactly `size` bytes, the same per-column
/// encoding [`Row::serialize`] uses — lets the `Update` plan iterator
/// write one field in place without re-serializing the whole row.
pub fn value_bytes(value: &Value, size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; size];
    write_value(&mut buf, 0, size, value);
    buf
}

fn read_value<'a>(bytes: &'a [u8], offset: usize, ty: ColumnType) -> Value<'a> {
    match ty {
        ColumnType::Int => Value::Int(byteio::read_i32(bytes, offset).unwrap_or(0)),
        ColumnType::Real => Value::Real(byteio::read_f64(bytes, offset).unwrap_or(0.0)),
        ColumnType::Text(n) => Value::Text(Text::borrowed(byteio::read_bytes(bytes, offset, n).unwrap_or(&[]))),
    }
}

/// An owned, fully-materialized row — used for values constructed from a
/// `VALUES` clause or returned across a pipeline boundary that can't borrow
/// from a pinned page.
#[derive(Debug, Clone)]
pub struct Row {
    pub schema: Arc<Schema>,
    pub values: Vec<Value<'static>>,
}

impl Row {
    pub fn new(schema: Arc<Schema>, values: Vec<Value<'static>>) -> Self {
        Row { schema, values }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.schema.row_size];
        for (col, value) in self.schema.columns.iter().zip(&self.values) {
            write_value(&mut buf, col.offset, col.size, value);
        }
        buf
    }

    pub fn primary_key_bytes(&self) -> Vec<u8> {
        let col = self.schema.primary();
        let value = &self.values[self.schema.primary_index];
        let mut buf = vec![0u8; col.size];
        write_value(&mut buf, 0, col.size, value);
        buf
    }
}

/// A borrowed view over a row's bytes inside a pinned leaf slot. Reading a
/// field copies nothing beyond what `Text` itself needs to hand back owned
/// data; `materialize` is the only place that allocates a full [`Row`].
pub struct RowView<'a> {
    pub schema: Arc<Schema>,
    bytes: &'a [u8],
}

impl<'a> RowView<'a> {
    pub fn new(schema: Arc<Schema>, bytes: &'a [u8]) -> Self {
        RowView { schema, bytes }
    }

    pub fn field(&self, index: usize) -> Value<'a> {
        let col = &self.schema.columns[index];
        read_value(self.bytes, col.offset, col.ty)
    }

    pub fn field_by_name(&self, name: &str) -> Option<Value<'a>> {
        self.schema.column_index(name).map(|i| self.field(i))
    }

    pub fn primary(&self) -> Value<'a> {
        self.field(self.schema.primary_index)
    }

    pub fn materialize(&self) -> Row {
        let values = (0..self.schema.columns.len())
            .map(|i| self.field(i).materialize())
            .collect();
        Row {
            schema: self.schema.clone(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    #[test]
    fn round_trips_mixed_columns_through_bytes() {
        let schema = Schema::new(
            vec!["id".into(), "name".into(), "score".into()],
            vec![ColumnType::Int, ColumnType::Text(8), ColumnType::Real],
            "id",
        )
        .unwrap();

        let row = Row::new(
            schema.clone(),
            vec![
                Value::Int(7),
                Value::Text(Text::from_str_padded("hi", 8)),
                Value::Real(3.5),
            ],
        );
        let bytes = row.serialize();
        let view = RowView::new(schema.clone(), &bytes);

        assert_eq!(view.field(0), Value::Int(7));
        assert_eq!(view.field(2), Value::Real(3.5));
        match view.field(1) {
            Value::Text(t) => assert_eq!(t.trimmed_str(), "hi"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn primary_key_bytes_matches_materialized_field() {
        let schema = Schema::new(
            vec!["id".into(), "v".into()],
            vec![ColumnType::Int, ColumnType::Int],
            "id",
        )
        .unwrap();
        let row = Row::new(schema, vec![Value::Int(42), Value::Int(1)]);
        assert_eq!(row.primary_key_bytes(), 42i32.to_ne_bytes().to_vec());
    }
}
