//! Column metadata and schema construction/projection.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Real,
    Text(usize),
}

impl ColumnType {
    pub fn size(&self) -> usize {
        match self {
            ColumnType::Int => 4,
            ColumnType::Real => 8,
            ColumnType::Text(n) => *n,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::Real => "REAL",
            ColumnType::Text(_) => "TEXT",
        }
    }
}

/// The primary column's type reduced to what the B+-tree needs: a byte
/// size and a comparison rule. Dispatch is by value (an enum match) rather
/// than generic monomorphization, so a `Catalog` can hold tables whose
/// primary columns differ in type in one map without trait objects over a
/// generically-keyed B+-tree (see DESIGN.md open-question decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    Real,
    Text(usize),
}

impl KeyType {
    pub fn size(&self) -> usize {
        match self {
            KeyType::Int => 4,
            KeyType::Real => 8,
            KeyType::Text(n) => *n,
        }
    }

    pub fn from_column_type(t: ColumnType) -> Self {
        match t {
            ColumnType::Int => KeyType::Int,
            ColumnType::Real => KeyType::Real,
            ColumnType::Text(n) => KeyType::Text(n),
        }
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyType::Int => {
                let ai = i32::from_ne_bytes(a[..4].try_into().unwrap());
                let bi = i32::from_ne_bytes(b[..4].try_into().unwrap());
                ai.cmp(&bi)
            }
            KeyType::Real => {
                let af = f64::from_ne_bytes(a[..8].try_into().unwrap());
                let bf = f64::from_ne_bytes(b[..8].try_into().unwrap());
                af.partial_cmp(&bf).unwrap_or(Ordering::Equal)
            }
            KeyType::Text(_) => a.cmp(b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub offset: usize,
    pub size: usize,
}

/// Ordered column metadata with one column designated primary. The primary
/// column always occupies row offset 0; the remaining columns follow in
/// declared order.
#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<Column>,
    pub primary_index: usize,
    pub row_size: usize,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(
        names: Vec<String>,
        types: Vec<ColumnType>,
        primary_name: &str,
    ) -> Result<Arc<Schema>, QueryError> {
        assert_eq!(names.len(), types.len());
        let primary_pos = names
            .iter()
            .position(|n| n == primary_name)
            .ok_or_else(|| QueryError::UnknownColumn(primary_name.to_string()))?;

        let mut columns = Vec::with_capacity(names.len());
        let mut offset = 0usize;

        columns.push(Column {
            name: names[primary_pos].clone(),
            ty: types[primary_pos],
            offset: 0,
            size: types[primary_pos].size(),
        });
        offset += types[primary_pos].size();

        for i in 0..names.len() {
            if i == primary_pos {
                continue;
            }
            let size = types[i].size();
            columns.push(Column {
                name: names[i].clone(),
                ty: types[i],
                offset,
                size,
            });
            offset += size;
        }

        let mut by_name = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            by_name.insert(c.name.clone(), i);
        }

        Ok(Arc::new(Schema {
            row_size: offset,
            primary_index: 0,
            columns,
            by_name,
        }))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn primary(&self) -> &Column {
        &self.columns[self.primary_index]
    }

    pub fn key_type(&self) -> KeyType {
        KeyType::from_column_type(self.primary().ty)
    }

    /// A schema over a selected subset of columns, offsets recomputed for
    /// result shaping only — it is never used to address storage.
    pub fn project(&self, names: &[String]) -> Result<Arc<Schema>, QueryError> {
        let mut columns = Vec::with_capacity(names.len());
        let mut offset = 0usize;
        for name in names {
            let idx = self
                .column_index(name)
                .ok_or_else(|| QueryError::UnknownColumn(name.clone()))?;
            let src = &self.columns[idx];
            columns.push(Column {
                name: src.name.clone(),
                ty: src.ty,
                offset,
                size: src.size,
            });
            offset += src.size;
        }
        let primary_index = columns
            .iter()
            .position(|c| c.name == self.primary().name)
            .unwrap_or(0);
        let mut by_name = HashMap::new();
        for (i, c) in columns.iter().enumerate() {
            by_name.insert(c.name.clone(), i);
        }
        Ok(Arc::new(Schema {
            row_size: offset,
            primary_index,
            columns,
            by_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_column_lands_at_offset_zero() {
        let schema = Schema::new(
            vec!["n".into(), "id".into(), "s".into()],
            vec![ColumnType::Int, ColumnType::Int, ColumnType::Text(4)],
            "id",
        )
        .unwrap();
        assert_eq!(schema.primary().name, "id");
        assert_eq!(schema.primary().offset, 0);
        assert_eq!(schema.row_size, 4 + 4 + 4);
    }

    #[test]
    fn projection_recomputes_offsets() {
        let schema = Schema::new(
            vec!["id".into(), "v".into(), "w".into()],
            vec![ColumnType::Int, ColumnType::Real, ColumnType::Real],
            "id",
        )
        .unwrap();
        let projected = schema.project(&["v".to_string()]).unwrap();
        assert_eq!(projected.columns.len(), 1);
        assert_eq!(projected.columns[0].offset, 0);
    }
}
