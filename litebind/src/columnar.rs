///
/// Column-major projection of a result set.
///
/// A full scan transposes N rows of M columns into M typed sequences. The
/// element type of each sequence is decided once, on the first row:
/// sequences passed in by the caller keep their type, the others take the
/// caller's preferred class or, failing that, the storage class found in
/// the first row. Every later row is appended through that type.
///

use std::borrow::Cow;

use crate::decode::{FromColumn, Row, StorageClass};
use crate::error::Result;
use crate::statement::Statement;
use crate::value::{TextEncoding, Value};

/// One typed column of a projected result set. `None` marks NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Boolean(Vec<Option<bool>>),
    Long(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Blob(Vec<Option<Vec<u8>>>),
    /// Untyped values, used when the first row holds NULL.
    Values(Vec<Value<'static>>),
}

impl Column {
    pub fn for_class(class: StorageClass) -> Self {
        match class {
            StorageClass::Boolean => Column::Boolean(Vec::new()),
            StorageClass::Integer => Column::Long(Vec::new()),
            StorageClass::Float => Column::Real(Vec::new()),
            StorageClass::Text => Column::Text(Vec::new()),
            StorageClass::Blob => Column::Blob(Vec::new()),
            StorageClass::Null => Column::Values(Vec::new()),
        }
    }

    /// The class elements are read through; `Null` for untyped columns.
    pub fn storage_class(&self) -> StorageClass {
        match self {
            Column::Boolean(_) => StorageClass::Boolean,
            Column::Long(_) => StorageClass::Integer,
            Column::Real(_) => StorageClass::Float,
            Column::Text(_) => StorageClass::Text,
            Column::Blob(_) => StorageClass::Blob,
            Column::Values(_) => StorageClass::Null,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Boolean(v) => v.len(),
            Column::Long(v) => v.len(),
            Column::Real(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Blob(v) => v.len(),
            Column::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every element, keeping the allocation and the type.
    pub fn clear(&mut self) {
        match self {
            Column::Boolean(v) => v.clear(),
            Column::Long(v) => v.clear(),
            Column::Real(v) => v.clear(),
            Column::Text(v) => v.clear(),
            Column::Blob(v) => v.clear(),
            Column::Values(v) => v.clear(),
        }
    }

    /// Element `index` as an owned value.
    pub fn get(&self, index: usize) -> Option<Value<'static>> {
        fn or_null<T>(item: &Option<T>, f: impl FnOnce(&T) -> Value<'static>) -> Value<'static> {
            item.as_ref().map_or(Value::Null, f)
        }
        Some(match self {
            Column::Boolean(v) => or_null(v.get(index)?, |b| Value::Boolean(*b)),
            Column::Long(v) => or_null(v.get(index)?, |l| Value::Long(*l)),
            Column::Real(v) => or_null(v.get(index)?, |r| Value::Real(*r)),
            Column::Text(v) => or_null(v.get(index)?, |s| {
                Value::Text(Cow::Owned(s.clone().into_bytes()), TextEncoding::Utf8)
            }),
            Column::Blob(v) => or_null(v.get(index)?, |b| Value::Blob(Cow::Owned(b.clone()))),
            Column::Values(v) => v.get(index)?.clone(),
        })
    }

    fn push(&mut self, row: &Row<'_>, column: usize) {
        match self {
            Column::Boolean(v) => v.push(row.nullable_bool(column)),
            Column::Long(v) => v.push(row.nullable_long(column)),
            Column::Real(v) => v.push(row.nullable_double(column)),
            Column::Text(v) => v.push(row.as_text(column)),
            Column::Blob(v) => v.push(row.as_blob(column)),
            Column::Values(v) => v.push(row.value(column)),
        }
    }
}

/// Untyped column-major results with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gathered {
    pub names: Vec<String>,
    pub columns: Vec<Vec<Value<'static>>>,
}

impl Gathered {
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn column(&self, name: &str) -> Option<&[Value<'static>]> {
        let index = self.names.iter().position(|n| n == name)?;
        self.columns.get(index).map(Vec::as_slice)
    }
}

impl<'conn> Statement<'conn> {
    /// Step to exhaustion, appending each row into `columns`.
    ///
    /// Without a first row `columns` is left untouched. Otherwise entries
    /// beyond the column count are dropped, entries already present are
    /// cleared and keep their type, and missing entries are created from
    /// `prefer[i]` or the first row's storage class.
    pub fn project_columns(
        &mut self,
        columns: &mut Vec<Column>,
        prefer: &[Option<StorageClass>],
    ) -> Result<()> {
        let Some(first) = self.next_row()? else {
            return Ok(());
        };

        let count = first.column_count();
        columns.truncate(count);
        columns.iter_mut().for_each(Column::clear);
        for index in columns.len()..count {
            let class = prefer
                .get(index)
                .copied()
                .flatten()
                .unwrap_or_else(|| first.storage_class(index));
            columns.push(Column::for_class(class));
        }

        for (index, column) in columns.iter_mut().enumerate() {
            column.push(&first, index);
        }
        while let Some(row) = self.next_row()? {
            for (index, column) in columns.iter_mut().enumerate() {
                column.push(&row, index);
            }
        }
        Ok(())
    }

    /// Step to exhaustion, returning one owned value sequence per column.
    pub fn column_major_results(&mut self) -> Result<Vec<Vec<Value<'static>>>> {
        let mut columns: Vec<Vec<Value<'static>>> = vec![Vec::new(); self.column_count()];
        while let Some(row) = self.next_row()? {
            for (index, column) in columns.iter_mut().enumerate() {
                column.push(row.value(index));
            }
        }
        Ok(columns)
    }

    /// Step to exhaustion, collecting the first column as `T`.
    /// NULL entries read as `T::default()`.
    pub fn collect_column<T: FromColumn + Default>(&mut self) -> Result<Vec<T>> {
        self.map_rows(|row| row.get::<T>(0).unwrap_or_default())
    }
}
