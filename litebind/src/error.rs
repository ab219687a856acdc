///
/// Error types for statement preparation, binding, and execution.
///
/// Every failure carries the SQL text (or the supplied parameter context)
/// of the statement it came from, so a failing call can be reproduced from
/// the error alone. Advisory engine statuses (notice, warning) are not
/// errors and never appear here; see `Step`.
///

use std::ffi::c_int;

use rusqlite::ffi;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("misuse: {message}{}", format_detail(sql))]
    Misuse { message: String, sql: String },

    #[error("parameter mismatch ({code}): {message}{}", format_detail(sql))]
    BindMismatch {
        code: c_int,
        message: String,
        sql: String,
    },

    #[error("SQLITE {code} - {message}{}", format_detail(detail))]
    Engine {
        code: c_int,
        message: String,
        detail: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn misuse(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::Misuse {
            message: message.into(),
            sql: sql.into(),
        }
    }

    pub fn bind_mismatch(code: c_int, message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::BindMismatch {
            code,
            message: message.into(),
            sql: sql.into(),
        }
    }

    pub fn engine(code: c_int, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Engine {
            code,
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Engine result code behind this error, when there is one.
    pub fn code(&self) -> Option<c_int> {
        match self {
            Error::Misuse { .. } => Some(ffi::SQLITE_MISUSE),
            Error::BindMismatch { code, .. } | Error::Engine { code, .. } => Some(*code),
            Error::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.extended_code),
            _ => None,
        }
    }

    /// SQL text or parameter context attached to the failure.
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Misuse { sql, .. } | Error::BindMismatch { sql, .. } => Some(sql),
            Error::Engine { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// True for `SQLITE_INTERRUPT`, raised on the step after `abort()`.
    pub fn is_interrupt(&self) -> bool {
        self.code().map(|c| c & 0xff) == Some(ffi::SQLITE_INTERRUPT)
    }
}

/// Advisory result codes complete successfully with a message attached.
pub(crate) fn is_advisory(code: c_int) -> bool {
    matches!(code & 0xff, ffi::SQLITE_NOTICE | ffi::SQLITE_WARNING)
}

pub(crate) fn is_success(code: c_int) -> bool {
    code == ffi::SQLITE_OK || is_advisory(code)
}

fn format_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!("\n\n\"{}\"\n", detail)
    }
}
