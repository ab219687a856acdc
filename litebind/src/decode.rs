///
/// Typed decoding of the current result row.
///
/// A `Row` is a view over the statement's current row; it borrows the
/// statement, so it cannot outlive the next `step`. Every read goes to the
/// engine, there is no snapshot.
///
/// Scalar accessors (`as_bool`, `as_integer`, `as_long`, `as_double`) are
/// total: when the stored class differs they return the engine's
/// coercion (text parses a numeric prefix or yields zero, NULL yields
/// zero). `as_text` and `as_blob` return `None` exactly when the stored
/// class is NULL; empty text and empty blobs are present values.
///

use std::borrow::Cow;
use std::ffi::{c_int, c_void};

use rusqlite::ffi;
use zerocopy::FromBytes;

use crate::statement::Statement;
use crate::value::{TextEncoding, Value};

/// Runtime storage class of a column value, plus the derived `Boolean`
/// class reported for integer values in columns declared `bool...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Integer,
    Float,
    Text,
    Blob,
    Null,
    Boolean,
}

impl StorageClass {
    fn from_engine(code: c_int) -> Self {
        match code {
            ffi::SQLITE_INTEGER => StorageClass::Integer,
            ffi::SQLITE_FLOAT => StorageClass::Float,
            ffi::SQLITE_TEXT => StorageClass::Text,
            ffi::SQLITE_BLOB => StorageClass::Blob,
            _ => StorageClass::Null,
        }
    }
}

/// True when a declared column type names a boolean (`bool`, `BOOLEAN`...).
pub fn declares_boolean(declared: &str) -> bool {
    declared
        .as_bytes()
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(b"bool"))
}

#[derive(Clone, Copy)]
pub struct Row<'s> {
    stmt: &'s Statement<'s>,
}

impl<'s> Row<'s> {
    pub(crate) fn new(stmt: &'s Statement<'s>) -> Self {
        Self { stmt }
    }

    fn raw(&self) -> *mut ffi::sqlite3_stmt {
        self.stmt.raw
    }

    fn index(column: usize) -> c_int {
        c_int::try_from(column).unwrap_or(c_int::MAX)
    }

    pub fn column_count(&self) -> usize {
        self.stmt.column_count()
    }

    pub fn column_name(&self, column: usize) -> Option<&'s str> {
        self.stmt.column_name(column)
    }

    pub fn column_names(&self) -> &'s [String] {
        self.stmt.column_names()
    }

    pub fn declared_type(&self, column: usize) -> Option<String> {
        self.stmt.declared_type(column)
    }

    /// Storage class of the value in `column`.
    ///
    /// Only meaningful before the value is read through a conversion, since
    /// reading may change how the engine holds it.
    pub fn storage_class(&self, column: usize) -> StorageClass {
        let class = StorageClass::from_engine(unsafe {
            ffi::sqlite3_column_type(self.raw(), Self::index(column))
        });
        if class == StorageClass::Integer
            && self
                .stmt
                .declared_type(column)
                .is_some_and(|declared| declares_boolean(&declared))
        {
            return StorageClass::Boolean;
        }
        class
    }

    pub fn is_null(&self, column: usize) -> bool {
        unsafe { ffi::sqlite3_column_type(self.raw(), Self::index(column)) == ffi::SQLITE_NULL }
    }

    /// Whether the value read last from `column` was NULL.
    pub fn was_null(&self, column: usize) -> bool {
        unsafe { ffi::sqlite3_column_text(self.raw(), Self::index(column)) }.is_null()
    }

    pub fn as_bool(&self, column: usize) -> bool {
        unsafe { ffi::sqlite3_column_int(self.raw(), Self::index(column)) != 0 }
    }

    pub fn as_integer(&self, column: usize) -> isize {
        self.as_long(column) as isize
    }

    pub fn as_long(&self, column: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.raw(), Self::index(column)) }
    }

    pub fn as_double(&self, column: usize) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.raw(), Self::index(column)) }
    }

    pub fn nullable_bool(&self, column: usize) -> Option<bool> {
        (!self.is_null(column)).then(|| self.as_bool(column))
    }

    pub fn nullable_long(&self, column: usize) -> Option<i64> {
        (!self.is_null(column)).then(|| self.as_long(column))
    }

    pub fn nullable_double(&self, column: usize) -> Option<f64> {
        (!self.is_null(column)).then(|| self.as_double(column))
    }

    pub fn as_text(&self, column: usize) -> Option<String> {
        if self.is_null(column) {
            return None;
        }
        let order = Self::index(column);
        let text = unsafe { ffi::sqlite3_column_text(self.raw(), order) };
        let len = unsafe { ffi::sqlite3_column_bytes(self.raw(), order) };
        Some(String::from_utf8_lossy(unsafe { byte_span(text.cast(), len) }).into_owned())
    }

    /// Text read through the engine's UTF-16 conversion.
    pub fn as_text16(&self, column: usize) -> Option<String> {
        if self.is_null(column) {
            return None;
        }
        let order = Self::index(column);
        let text = unsafe { ffi::sqlite3_column_text16(self.raw(), order) };
        let len = unsafe { ffi::sqlite3_column_bytes16(self.raw(), order) };
        let units: Vec<u16> = unsafe { byte_span(text, len) }
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        Some(String::from_utf16_lossy(&units))
    }

    pub fn as_blob(&self, column: usize) -> Option<Vec<u8>> {
        if self.is_null(column) {
            return None;
        }
        let order = Self::index(column);
        let blob = unsafe { ffi::sqlite3_column_blob(self.raw(), order) };
        let len = unsafe { ffi::sqlite3_column_bytes(self.raw(), order) };
        Some(unsafe { byte_span(blob, len) }.to_vec())
    }

    /// Reinterpret a blob column as an array of plain-data elements.
    /// A trailing partial element is ignored.
    pub fn column_array<T: FromBytes>(&self, column: usize) -> Vec<T> {
        let size = std::mem::size_of::<T>();
        let order = Self::index(column);
        let blob = unsafe { ffi::sqlite3_column_blob(self.raw(), order) };
        let len = unsafe { ffi::sqlite3_column_bytes(self.raw(), order) };
        if size == 0 {
            return Vec::new();
        }
        unsafe { byte_span(blob, len) }
            .chunks_exact(size)
            .filter_map(|chunk| T::read_from_bytes(chunk).ok())
            .collect()
    }

    /// Decode `column` into an owned value according to its storage class.
    pub fn value(&self, column: usize) -> Value<'static> {
        match self.storage_class(column) {
            StorageClass::Null => Value::Null,
            StorageClass::Boolean => Value::Boolean(self.as_bool(column)),
            StorageClass::Integer => Value::Long(self.as_long(column)),
            StorageClass::Float => Value::Real(self.as_double(column)),
            StorageClass::Text => Value::Text(
                Cow::Owned(self.as_text(column).unwrap_or_default().into_bytes()),
                TextEncoding::Utf8,
            ),
            StorageClass::Blob => Value::Blob(Cow::Owned(self.as_blob(column).unwrap_or_default())),
        }
    }

    /// Read `column` through the one coercion path `T` names.
    pub fn get<T: FromColumn>(&self, column: usize) -> Option<T> {
        T::from_column(self, column)
    }
}

/// View `len` bytes at `data`; a null pointer or non-positive length is empty.
unsafe fn byte_span<'a>(data: *const c_void, len: c_int) -> &'a [u8] {
    if data.is_null() || len <= 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len as usize) }
    }
}

/// A native shape a column can be read as.
///
/// Each shape has exactly one coercion path:
/// - f64 -> double, i64 -> long, isize -> integer, bool -> boolean
/// - String -> text, Vec<u8> -> blob (absent on NULL)
pub trait FromColumn: Sized {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self>;
}

impl FromColumn for f64 {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self> {
        Some(row.as_double(column))
    }
}

impl FromColumn for i64 {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self> {
        Some(row.as_long(column))
    }
}

impl FromColumn for isize {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self> {
        Some(row.as_integer(column))
    }
}

impl FromColumn for bool {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self> {
        Some(row.as_bool(column))
    }
}

impl FromColumn for String {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self> {
        row.as_text(column)
    }
}

impl FromColumn for Vec<u8> {
    fn from_column(row: &Row<'_>, column: usize) -> Option<Self> {
        row.as_blob(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, params};

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "create table t ( i integer, s text, d real, f boolean, b blob );
             insert into t values ( 7, '12.5abc', 2.5, 1, x'0102' );
             insert into t values ( null, '', 0.0, 0, x'' );",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_declares_boolean() {
        assert!(declares_boolean("boolean"));
        assert!(declares_boolean("BOOL"));
        assert!(declares_boolean("Bool not null"));
        assert!(!declares_boolean("bo"));
        assert!(!declares_boolean("integer"));
    }

    #[test]
    fn test_storage_class_with_boolean_inference() {
        let conn = connection();
        let mut stmt = conn.prepare("select i, s, d, f, b, null from t").unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.storage_class(0), StorageClass::Integer);
        assert_eq!(row.storage_class(1), StorageClass::Text);
        assert_eq!(row.storage_class(2), StorageClass::Float);
        assert_eq!(row.storage_class(3), StorageClass::Boolean);
        assert_eq!(row.storage_class(4), StorageClass::Blob);
        assert_eq!(row.storage_class(5), StorageClass::Null);
        assert_eq!(row.as_long(3), 1);
    }

    #[test]
    fn test_scalar_accessors_are_total() {
        let conn = connection();
        let mut stmt = conn.prepare("select i, s, d, f from t").unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_long(0), 7);
        assert_eq!(row.as_integer(0), 7);
        assert_eq!(row.as_double(1), 12.5);
        assert_eq!(row.as_long(1), 12);
        assert!(row.as_bool(3));

        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_long(0), 0);
        assert_eq!(row.as_double(0), 0.0);
        assert!(!row.as_bool(0));
        assert_eq!(row.nullable_long(0), None);
        assert_eq!(row.nullable_double(2), Some(0.0));
        assert_eq!(row.nullable_bool(3), Some(false));
    }

    #[test]
    fn test_text_and_blob_absent_only_on_null() {
        let conn = connection();
        let mut stmt = conn.prepare("select i, s, b from t").unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_text(1).as_deref(), Some("12.5abc"));
        assert_eq!(row.as_text(0).as_deref(), Some("7"));
        assert_eq!(row.as_blob(2), Some(vec![1, 2]));

        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_text(0), None);
        assert_eq!(row.as_blob(0), None);
        assert_eq!(row.as_text(1).as_deref(), Some(""));
        assert_eq!(row.as_blob(2), Some(Vec::new()));
    }

    #[test]
    fn test_generic_accessor_paths() {
        let conn = connection();
        let mut stmt = conn.prepare("select i, s, d, f, b from t").unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.get::<i64>(0), Some(7));
        assert_eq!(row.get::<isize>(0), Some(7));
        assert_eq!(row.get::<f64>(2), Some(2.5));
        assert_eq!(row.get::<bool>(3), Some(true));
        assert_eq!(row.get::<String>(1).as_deref(), Some("12.5abc"));
        assert_eq!(row.get::<Vec<u8>>(4), Some(vec![1, 2]));

        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.get::<String>(0), None);
        assert_eq!(row.get::<i64>(0), Some(0));
    }

    #[test]
    fn test_owned_value_by_storage_class() {
        let conn = connection();
        let mut stmt = conn.prepare("select i, s, d, f, b, null from t").unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.value(0), Value::Long(7));
        assert_eq!(row.value(1).as_str().unwrap(), "12.5abc");
        assert_eq!(row.value(2), Value::Real(2.5));
        assert_eq!(row.value(3), Value::Boolean(true));
        assert_eq!(row.value(4).as_bytes(), Some(&[1u8, 2][..]));
        assert_eq!(row.value(5), Value::Null);
    }

    #[test]
    fn test_text16_and_column_array() {
        let conn = Connection::open_in_memory().unwrap();
        let values: Vec<u32> = vec![10, 20, 30];
        let mut stmt = conn.prepare("select ?, ?").unwrap();
        stmt.bind(params![values, "wide ✓"], -1).unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.column_array::<u32>(0), vec![10, 20, 30]);
        assert_eq!(row.column_array::<u64>(0).len(), 1);
        assert_eq!(row.as_text16(1).as_deref(), Some("wide ✓"));
    }

    #[test]
    fn test_row_reads_current_data() {
        let conn = connection();
        let mut stmt = conn.prepare("select i from t order by i is null").unwrap();
        assert!(stmt.current_row().is_none());
        stmt.step().unwrap();
        assert_eq!(stmt.current_row().unwrap().as_long(0), 7);
        stmt.step().unwrap();
        assert!(stmt.current_row().unwrap().is_null(0));
        stmt.step().unwrap();
        assert!(stmt.current_row().is_none());
    }
}
