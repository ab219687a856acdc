///
/// # litebind: typed value marshaling and statement execution for SQLite
///
/// A typed layer over the embedded engine: application values bind to
/// statement parameters through one capability (`Bindable`), results decode
/// back into native shapes (`Row`, `FromColumn`) or whole columns
/// (`Column`), and collations named in SQL are created on demand from
/// keywords in their names.
///
/// ## Usage
///
/// ```rust,ignore
/// use litebind::{Connection, params};
///
/// let conn = Connection::open_in_memory()?;
/// conn.execute_batch("create table book ( title text, year integer )")?;
/// conn.insert("insert into book values ( ?, ? )", params!["Dune", 1965])?;
///
/// let titles = conn.select(
///     "select title from book order by title collate 'natural'",
///     params![],
///     |row| row.as_text(0),
/// )?;
/// ```
///
/// ## Modules
///
/// - `value`: the tagged `Value` model and `Bindable`
/// - `binder`: positional and named parameter binding
/// - `statement`: the prepared statement state machine
/// - `decode`: typed reads of the current row
/// - `columnar`: column-major projection of result sets
/// - `collation`: on-demand collations
/// - `connection`, `config`, `schema`: the connection and its helpers
///

pub mod binder;
pub mod collation;
pub mod columnar;
pub mod config;
pub mod connection;
pub mod decode;
pub mod error;
pub mod schema;
pub mod statement;
pub mod value;

pub use binder::{BindPolicy, BindProgress, ParameterSource};
pub use collation::CompareOptions;
pub use columnar::{Column, Gathered};
pub use config::ConnectionConfig;
pub use connection::{Connection, Limit, TransactionKind};
pub use decode::{FromColumn, Row, StorageClass};
pub use error::{Error, Result};
pub use schema::{ColumnDeclaration, Conflict, CreateOptions, TriggerEvent, TriggerPhase};
pub use statement::{State, Statement, Step};
pub use value::{Bindable, Plain, TextEncoding, Utf16Text, Value, ZeroBlob};

pub use rusqlite::ffi;

/// Build a positional parameter list: `params![1, "two", 3.0]`.
#[macro_export]
macro_rules! params {
    () => {
        &[] as &[&dyn $crate::Bindable]
    };
    ($($value:expr),+ $(,)?) => {
        &[$(&$value as &dyn $crate::Bindable),+] as &[&dyn $crate::Bindable]
    };
}
