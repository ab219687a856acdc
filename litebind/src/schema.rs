///
/// Schema statement builders.
///
/// `ColumnDeclaration` renders one column definition for `create table`;
/// the `Connection` helpers below are string templates run through
/// `Connection::execute`. Names are inserted as given, so quote them
/// yourself when they need it. Text defaults go through `escape_literal`.
///

use std::fmt;

use crate::connection::Connection;
use crate::error::Result;

pub const BOOLEAN: &str = "BOOLEAN";
pub const INTEGER: &str = "INTEGER";
pub const REAL: &str = "REAL";
pub const TEXT: &str = "TEXT";
pub const BLOB: &str = "BLOB";

pub const COLLATE_BINARY: &str = "BINARY";
pub const COLLATE_NOCASE: &str = "NOCASE";
pub const COLLATE_RTRIM: &str = "RTRIM";

/// Location for `attach_database` that creates a fresh in-memory database.
pub const LOCATION_MEMORY: &str = "':memory:'";

/// Conflict resolution attached to a column constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conflict {
    #[default]
    Default,
    Rollback,
    Abort,
    Fail,
    Ignore,
    Replace,
}

impl Conflict {
    fn clause(self) -> &'static str {
        match self {
            Conflict::Default => "",
            Conflict::Rollback => " on conflict rollback",
            Conflict::Abort => " on conflict abort",
            Conflict::Fail => " on conflict fail",
            Conflict::Ignore => " on conflict ignore",
            Conflict::Replace => " on conflict replace",
        }
    }
}

/// Quote `text` as an SQL string literal, doubling embedded quotes.
pub fn escape_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDeclaration {
    pub name: String,
    /// Declared type; `None` leaves the column untyped.
    pub declared_type: Option<String>,
    pub primary_key: Option<Conflict>,
    /// `Some(true)` for `desc`, `Some(false)` for `asc`.
    pub primary_descending: Option<bool>,
    pub autoincrement: bool,
    pub not_null: Option<Conflict>,
    pub unique: Option<Conflict>,
    pub check: Option<String>,
    pub default: Option<String>,
    pub collate: Option<String>,
    pub references: Option<String>,
}

impl ColumnDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    /// Make this the primary key. Without an explicit type or default, and
    /// unless descending, the column becomes `INTEGER` so it aliases the
    /// row id.
    pub fn primary_key(mut self, conflict: Conflict, descending: Option<bool>) -> Self {
        self.primary_key = Some(conflict);
        self.primary_descending = descending;
        if self.declared_type.is_none() && self.default.is_none() && descending != Some(true) {
            self.declared_type = Some(INTEGER.to_string());
        }
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn not_null(mut self, conflict: Conflict) -> Self {
        self.not_null = Some(conflict);
        self
    }

    pub fn unique(mut self, conflict: Conflict) -> Self {
        self.unique = Some(conflict);
        self
    }

    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.check = Some(expression.into());
        self
    }

    /// Default value as SQL text; literals must already be escaped.
    pub fn default_sql(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    pub fn collate(mut self, collation: impl Into<String>) -> Self {
        self.collate = Some(collation.into());
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.references = Some(target.into());
        self
    }

    /// `BOOLEAN not null default 0|1`.
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::new(name)
            .with_type(BOOLEAN)
            .default_sql(if default { "1" } else { "0" })
            .not_null(Conflict::Default)
    }

    /// `INTEGER`, not null when it has a default.
    pub fn integer(name: impl Into<String>, default: Option<i64>, unique: bool) -> Self {
        let mut column = Self::new(name).with_type(INTEGER);
        if let Some(value) = default {
            column = column.default_sql(value.to_string()).not_null(Conflict::Default);
        }
        if unique {
            column = column.unique(Conflict::Default);
        }
        column
    }

    /// `REAL`, not null when it has a default.
    pub fn real(name: impl Into<String>, default: Option<f64>, unique: bool) -> Self {
        let mut column = Self::new(name).with_type(REAL);
        if let Some(value) = default {
            column = column.default_sql(format!("{:?}", value)).not_null(Conflict::Default);
        }
        if unique {
            column = column.unique(Conflict::Default);
        }
        column
    }

    /// `TEXT`, not null when it has a default.
    pub fn text(
        name: impl Into<String>,
        default: Option<&str>,
        unique: bool,
        collate: Option<&str>,
    ) -> Self {
        let mut column = Self::new(name).with_type(TEXT);
        if let Some(value) = default {
            column = column.default_sql(escape_literal(value)).not_null(Conflict::Default);
        }
        if unique {
            column = column.unique(Conflict::Default);
        }
        if let Some(collation) = collate {
            column = column.collate(collation);
        }
        column
    }

    pub fn blob(name: impl Into<String>, unique: bool) -> Self {
        let column = Self::new(name).with_type(BLOB);
        if unique { column.unique(Conflict::Default) } else { column }
    }

    /// A not null primary key, `INTEGER` unless another type is given.
    pub fn primary(name: impl Into<String>, declared_type: Option<&str>, descending: Option<bool>) -> Self {
        let mut column = Self::new(name);
        if let Some(declared) = declared_type {
            column = column.with_type(declared);
        }
        column
            .not_null(Conflict::Default)
            .primary_key(Conflict::Default, descending)
    }

    /// An untyped column referencing `target`, e.g. `parent(id)`.
    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>, not_null: bool) -> Self {
        let column = Self::new(name).references(target);
        if not_null { column.not_null(Conflict::Default) } else { column }
    }

    /// The column definition as it appears inside `create table ( ... )`.
    pub fn sql(&self) -> String {
        let mut sql = self.name.clone();
        if let Some(declared) = &self.declared_type {
            sql.push(' ');
            sql.push_str(declared);
        }
        if let Some(conflict) = self.primary_key {
            sql.push_str(" primary key");
            match self.primary_descending {
                Some(true) => sql.push_str(" desc"),
                Some(false) => sql.push_str(" asc"),
                None => {}
            }
            sql.push_str(conflict.clause());
            if self.autoincrement {
                sql.push_str(" autoincrement");
            }
        }
        if let Some(conflict) = self.not_null {
            sql.push_str(" not null");
            sql.push_str(conflict.clause());
        }
        if let Some(conflict) = self.unique {
            sql.push_str(" unique");
            sql.push_str(conflict.clause());
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" check ( {} )", check));
        }
        if let Some(default) = &self.default {
            sql.push_str(" default ");
            sql.push_str(default);
        }
        if let Some(collate) = &self.collate {
            sql.push_str(" collate ");
            sql.push_str(collate);
        }
        if let Some(target) = &self.references {
            sql.push_str(" references ");
            sql.push_str(target);
        }
        sql
    }

    pub fn join(columns: &[ColumnDeclaration]) -> String {
        columns
            .iter()
            .map(ColumnDeclaration::sql)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ColumnDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// Statement kind a trigger fires on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Delete,
    Insert,
    Update,
    /// Update touching any of these comma-separated columns.
    UpdateOf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerPhase {
    #[default]
    Default,
    Before,
    After,
    InsteadOf,
}

/// Optional parts of a `create` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateOptions {
    pub temporary: bool,
    /// Fail when the object exists instead of adding `if not exists`.
    pub strict: bool,
}

impl CreateOptions {
    fn prefix(&self, kind: &str) -> String {
        format!(
            "create{} {}{}",
            if self.temporary { " temporary" } else { "" },
            kind,
            if self.strict { "" } else { " if not exists" },
        )
    }
}

impl Connection {
    pub fn create_table(
        &self,
        name: &str,
        columns: &[ColumnDeclaration],
        options: CreateOptions,
        with_rowid: bool,
    ) -> Result<bool> {
        let sql = format!(
            "{} {} ({}){}",
            options.prefix("table"),
            name,
            ColumnDeclaration::join(columns),
            if with_rowid { "" } else { " without rowid" },
        );
        self.execute(&sql, &[])
    }

    pub fn create_table_as(&self, name: &str, select: &str, options: CreateOptions) -> Result<bool> {
        self.execute(&format!("{} {} as {}", options.prefix("table"), name, select), &[])
    }

    pub fn add_column(&self, table: &str, column: &ColumnDeclaration) -> Result<bool> {
        self.execute(&format!("alter table {} add column {}", table, column.sql()), &[])
    }

    pub fn rename_table(&self, name: &str, new_name: &str) -> Result<bool> {
        self.execute(&format!("alter table {} rename to {}", name, new_name), &[])
    }

    pub fn delete_all(&self, table: &str) -> Result<bool> {
        self.execute(&format!("delete from {}", table), &[])
    }

    pub fn drop_table(&self, name: &str) -> Result<bool> {
        self.execute(&format!("drop table if exists {}", name), &[])
    }

    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: &str,
        unique: bool,
        condition: Option<&str>,
    ) -> Result<bool> {
        let mut sql = format!(
            "create{} index if not exists {} on {} ({})",
            if unique { " unique" } else { "" },
            name,
            table,
            columns
        );
        if let Some(condition) = condition {
            sql.push_str(" where ");
            sql.push_str(condition);
        }
        self.execute(&sql, &[])
    }

    pub fn drop_index(&self, name: &str) -> Result<bool> {
        self.execute(&format!("drop index if exists {}", name), &[])
    }

    pub fn create_view(&self, name: &str, select: &str, options: CreateOptions) -> Result<bool> {
        self.execute(&format!("{} {} as {}", options.prefix("view"), name, select), &[])
    }

    pub fn drop_view(&self, name: &str) -> Result<bool> {
        self.execute(&format!("drop view if exists {}", name), &[])
    }

    /// Create a row trigger running `statement` (without trailing `;`).
    #[allow(clippy::too_many_arguments)]
    pub fn create_trigger(
        &self,
        name: &str,
        table: &str,
        event: &TriggerEvent,
        phase: TriggerPhase,
        statement: &str,
        when: Option<&str>,
        options: CreateOptions,
    ) -> Result<bool> {
        let phase = match phase {
            TriggerPhase::Default => "",
            TriggerPhase::Before => " before",
            TriggerPhase::After => " after",
            TriggerPhase::InsteadOf => " instead of",
        };
        let event = match event {
            TriggerEvent::Delete => " delete".to_string(),
            TriggerEvent::Insert => " insert".to_string(),
            TriggerEvent::Update => " update".to_string(),
            TriggerEvent::UpdateOf(columns) => format!(" update of {}", columns),
        };
        let when = when.map(|w| format!(" when {}", w)).unwrap_or_default();
        let sql = format!(
            "{} {}{}{} on {} for each row{} begin {}; end",
            options.prefix("trigger"),
            name,
            phase,
            event,
            table,
            when,
            statement
        );
        self.execute(&sql, &[])
    }

    pub fn drop_trigger(&self, name: &str) -> Result<bool> {
        self.execute(&format!("drop trigger if exists {}", name), &[])
    }

    /// Attach `location` (an SQL expression, usually a quoted path) as `name`.
    pub fn attach_database(&self, name: &str, location: &str) -> Result<bool> {
        self.execute(&format!("attach database {} as {}", location, name), &[])
    }

    pub fn detach_database(&self, name: &str) -> Result<bool> {
        self.execute(&format!("detach database {}", name), &[])
    }

    pub fn reindex(&self, name: &str) -> Result<bool> {
        self.execute(&format!("reindex {}", name), &[])
    }

    pub fn vacuum(&self) -> Result<bool> {
        self.execute("vacuum", &[])
    }

    pub fn analyze(&self, name: &str) -> Result<bool> {
        self.execute(&format!("analyze {}", name), &[])
    }
}
