///
/// Parameter binding, positional and by name.
///
/// Positional binding fills consecutive slots from a starting ordinal. A
/// negative start selects strict mode: the value count must match the
/// remaining slots exactly, and any slot failure fails the call.
///
/// Named binding walks every declared slot and resolves it against a
/// `ParameterSource`. Each slot's name (or its ordinal, for anonymous
/// slots) is tried in this order:
///
/// 1. the declared name as written (`:Name`)
/// 2. the declared name lower-cased (`:name`)
/// 3. the name without its marker (`Name`)
/// 4. the unmarked name lower-cased (`name`)
/// 5. the unmarked name upper-cased (`NAME`)
///
/// Slots that resolve to nothing are bound to NULL.
///

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CString, c_int};
use std::hash::{BuildHasher, Hash};

use indexmap::IndexMap;
use rusqlite::ffi;
use tracing::trace;

use crate::error::{Error, Result, is_success};
use crate::statement::Statement;
use crate::value::{Bindable, TextEncoding, Value};

/// Outcome of a non-failing positional bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindProgress {
    /// Every slot from the start ordinal onward received a value.
    Complete,
    /// Binding stopped before this 1-based slot (values ran out or the
    /// slot refused its value).
    Partial(usize),
    /// More values were supplied than there are slots; the extra values
    /// were ignored.
    Excess,
}

impl BindProgress {
    /// The next unbound slot: 0 when complete, -1 on excess values.
    pub fn next_slot(&self) -> i64 {
        match self {
            BindProgress::Complete => 0,
            BindProgress::Partial(order) => *order as i64,
            BindProgress::Excess => -1,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, BindProgress::Complete)
    }
}

/// How named binding reports trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindPolicy {
    /// Never fail; engine refusals and unmatched slots are ignored.
    Silent,
    /// Fail on engine refusals; unmatched slots quietly become NULL.
    #[default]
    ReportBindErrors,
    /// Fail on engine refusals and on any slot without a supplied value.
    ReportMissing,
}

/// A name-to-value lookup usable for named binding.
pub trait ParameterSource {
    fn lookup(&self, name: &str) -> Option<&dyn Bindable>;
}

impl<K, V, S> ParameterSource for HashMap<K, V, S>
where
    K: Borrow<str> + Hash + Eq,
    V: Bindable,
    S: BuildHasher,
{
    fn lookup(&self, name: &str) -> Option<&dyn Bindable> {
        self.get(name).map(|value| value as &dyn Bindable)
    }
}

impl<K, V> ParameterSource for BTreeMap<K, V>
where
    K: Borrow<str> + Ord,
    V: Bindable,
{
    fn lookup(&self, name: &str) -> Option<&dyn Bindable> {
        self.get(name).map(|value| value as &dyn Bindable)
    }
}

impl<K, V, S> ParameterSource for IndexMap<K, V, S>
where
    K: Borrow<str> + Hash + Eq,
    V: Bindable,
    S: BuildHasher,
{
    fn lookup(&self, name: &str) -> Option<&dyn Bindable> {
        self.get(name).map(|value| value as &dyn Bindable)
    }
}

impl<K, V> ParameterSource for [(K, V)]
where
    K: AsRef<str>,
    V: Bindable,
{
    fn lookup(&self, name: &str) -> Option<&dyn Bindable> {
        self.iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value as &dyn Bindable)
    }
}

impl<T: ParameterSource + ?Sized> ParameterSource for &T {
    fn lookup(&self, name: &str) -> Option<&dyn Bindable> {
        (**self).lookup(name)
    }
}

/// Candidate keys for a slot name, in lookup order, without repeats.
fn lookup_keys(name: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(5);
    let mut push = |key: String| {
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    };
    push(name.to_string());
    push(name.to_lowercase());
    let stripped: &str = name
        .char_indices()
        .nth(1)
        .map(|(offset, _)| &name[offset..])
        .unwrap_or("");
    push(stripped.to_string());
    push(stripped.to_lowercase());
    push(stripped.to_uppercase());
    keys
}

impl<'conn> Statement<'conn> {
    /// Bind `values` to consecutive slots starting at `|start|` (minimum 1).
    ///
    /// A negative `start` is strict: the call fails with a range mismatch
    /// before binding anything unless exactly enough values are supplied,
    /// and any slot failure fails the call. Otherwise binding stops at the
    /// first refused slot and reports where it stopped.
    pub fn bind(&mut self, values: &[&dyn Bindable], start: i32) -> Result<BindProgress> {
        self.ensure_live()?;
        let strict = start < 0;
        let mut order = start.unsigned_abs().max(1) as usize;
        let limit = self.parameter_count();

        if strict && values.len() + order != limit + 1 {
            let expected = (limit + 1).saturating_sub(order);
            return Err(Error::bind_mismatch(
                ffi::SQLITE_RANGE,
                format!("expecting {} parameters, got {}", expected, values.len()),
                &self.sql,
            ));
        }

        for value in values {
            if order > limit {
                return Ok(BindProgress::Excess);
            }
            let code = self.bind_raw(order, &value.to_value());
            if !is_success(code) {
                let message = self.conn.error_description(code);
                self.message = Some(message.clone());
                if strict {
                    return Err(Error::engine(code, message, &self.sql));
                }
                return Ok(BindProgress::Partial(order));
            }
            order += 1;
        }

        if order > limit {
            Ok(BindProgress::Complete)
        } else {
            Ok(BindProgress::Partial(order))
        }
    }

    /// Strict positional bind of every slot, for chaining.
    pub fn with(&mut self, values: &[&dyn Bindable]) -> Result<&mut Self> {
        self.bind(values, -1)?;
        Ok(self)
    }

    /// Bind every declared slot from `values` by name.
    ///
    /// All slots are processed even after a failure, so every supplied
    /// value that matches a slot is applied. The first failure the policy
    /// reports is returned once all slots are done. On success the number
    /// of slots that found a supplied value is returned.
    pub fn bind_named<P>(&mut self, values: &P, policy: BindPolicy) -> Result<usize>
    where
        P: ParameterSource + ?Sized,
    {
        self.ensure_live()?;
        let mut matched = 0;
        let mut failure: Option<Error> = None;

        for order in 1..=self.parameter_count() {
            let name = self
                .parameter_name(order)
                .unwrap_or_else(|| order.to_string());
            let found = lookup_keys(&name)
                .iter()
                .find_map(|key| values.lookup(key));

            let code = match found {
                Some(value) => {
                    matched += 1;
                    self.bind_raw(order, &value.to_value())
                }
                None => {
                    trace!(parameter = %name, "no value supplied, binding null");
                    if policy == BindPolicy::ReportMissing && failure.is_none() {
                        failure = Some(Error::bind_mismatch(
                            ffi::SQLITE_MISMATCH,
                            format!("missing parameter {}", name),
                            &self.sql,
                        ));
                    }
                    self.bind_raw(order, &Value::Null)
                }
            };

            if !is_success(code) {
                let message = self.conn.error_description(code);
                self.message = Some(message.clone());
                if policy != BindPolicy::Silent && failure.is_none() {
                    failure = Some(Error::engine(
                        code,
                        message,
                        format!("{} ({})", self.sql, name),
                    ));
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(matched),
        }
    }

    /// Named bind that requires a value for every slot, for chaining.
    pub fn with_named<P>(&mut self, values: &P) -> Result<&mut Self>
    where
        P: ParameterSource + ?Sized,
    {
        self.bind_named(values, BindPolicy::ReportMissing)?;
        Ok(self)
    }

    /// Bind one value to the 1-based slot `order`.
    pub fn bind_value<B: Bindable + ?Sized>(&mut self, order: usize, value: &B) -> Result<()> {
        self.ensure_live()?;
        let code = self.bind_raw(order, &value.to_value());
        if !is_success(code) {
            let message = self.conn.error_description(code);
            self.message = Some(message.clone());
            return Err(Error::engine(code, message, &self.sql));
        }
        Ok(())
    }

    /// Bind one value to the slot declared with exactly `name`
    /// (marker included, e.g. `:id`).
    pub fn bind_by_name<B: Bindable + ?Sized>(&mut self, name: &str, value: &B) -> Result<()> {
        self.ensure_live()?;
        let order = CString::new(name)
            .map(|c_name| unsafe { ffi::sqlite3_bind_parameter_index(self.raw, c_name.as_ptr()) })
            .unwrap_or(0);
        if order <= 0 {
            return Err(Error::bind_mismatch(
                ffi::SQLITE_MISMATCH,
                format!("no parameter named {}", name),
                &self.sql,
            ));
        }
        self.bind_value(order as usize, value)
    }

    /// Hand one value to the engine, returning its result code.
    fn bind_raw(&mut self, order: usize, value: &Value<'_>) -> c_int {
        let Ok(order) = c_int::try_from(order) else {
            return ffi::SQLITE_RANGE;
        };
        let raw = self.raw;
        let code = unsafe {
            match value {
                Value::Preserve => ffi::SQLITE_OK,
                Value::Null => ffi::sqlite3_bind_null(raw, order),
                Value::Boolean(b) => ffi::sqlite3_bind_int(raw, order, c_int::from(*b)),
                Value::Integer(i) => ffi::sqlite3_bind_int64(raw, order, *i as i64),
                Value::Long(l) => ffi::sqlite3_bind_int64(raw, order, *l),
                Value::Real(r) => ffi::sqlite3_bind_double(raw, order, *r),
                Value::Text(bytes, encoding) => match c_int::try_from(bytes.len()) {
                    Ok(len) => match encoding {
                        TextEncoding::Utf8 => ffi::sqlite3_bind_text(
                            raw,
                            order,
                            bytes.as_ptr().cast(),
                            len,
                            ffi::SQLITE_TRANSIENT(),
                        ),
                        TextEncoding::Utf16 => ffi::sqlite3_bind_text16(
                            raw,
                            order,
                            bytes.as_ptr().cast(),
                            len,
                            ffi::SQLITE_TRANSIENT(),
                        ),
                    },
                    Err(_) => ffi::SQLITE_TOOBIG,
                },
                Value::Blob(bytes) => match c_int::try_from(bytes.len()) {
                    Ok(len) => ffi::sqlite3_bind_blob(
                        raw,
                        order,
                        bytes.as_ptr().cast(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                    Err(_) => ffi::SQLITE_TOOBIG,
                },
                Value::ZeroFill(len) if *len < 0 => ffi::sqlite3_bind_null(raw, order),
                Value::ZeroFill(len) => match c_int::try_from(*len) {
                    Ok(len) => ffi::sqlite3_bind_zeroblob(raw, order, len),
                    Err(_) => ffi::SQLITE_TOOBIG,
                },
            }
        };
        self.status = code;
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, ZeroBlob, params};

    #[test]
    fn test_lookup_keys_order() {
        assert_eq!(lookup_keys(":Name"), vec![":Name", ":name", "Name", "name", "NAME"]);
        assert_eq!(lookup_keys("?1"), vec!["?1", "1"]);
        assert_eq!(lookup_keys("3"), vec!["3"]);
        assert_eq!(lookup_keys("$é"), vec!["$é", "é", "É"]);
    }

    #[test]
    fn test_positional_bind_progress() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select ?, ?, ?").unwrap();
        assert_eq!(stmt.bind(params![1, 2, 3], 1).unwrap(), BindProgress::Complete);
        stmt.reset();
        assert_eq!(stmt.bind(params![1], 1).unwrap(), BindProgress::Partial(2));
        stmt.reset();
        assert_eq!(stmt.bind(params![1, 2], 2).unwrap(), BindProgress::Complete);
        stmt.reset();
        assert_eq!(stmt.bind(params![1, 2, 3, 4], 1).unwrap(), BindProgress::Excess);
        assert_eq!(BindProgress::Excess.next_slot(), -1);
        assert_eq!(BindProgress::Partial(2).next_slot(), 2);
        assert_eq!(BindProgress::Complete.next_slot(), 0);
    }

    #[test]
    fn test_start_zero_means_first_slot() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select ?").unwrap();
        assert!(stmt.bind(params![9], 0).unwrap().is_complete());
        assert_eq!(stmt.next_row().unwrap().unwrap().as_long(0), 9);
    }

    #[test]
    fn test_strict_bind_checks_count_first() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select ?, ?").unwrap();
        let err = stmt.bind(params![1], -1).unwrap_err();
        match err {
            Error::BindMismatch { code, message, .. } => {
                assert_eq!(code, ffi::SQLITE_RANGE);
                assert!(message.contains("expecting 2"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let row = stmt.next_row().unwrap().unwrap();
        assert!(row.is_null(0));

        stmt.reset();
        assert!(stmt.bind(params![5], -2).unwrap().is_complete());
        let row = stmt.next_row().unwrap().unwrap();
        assert!(row.is_null(0));
        assert_eq!(row.as_long(1), 5);
    }

    #[test]
    fn test_preserve_keeps_previous_value() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select ?, ?").unwrap();
        stmt.bind(params![1, 2], -1).unwrap();
        stmt.rewind();
        stmt.bind(params![Value::Preserve, 20], -1).unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_long(0), 1);
        assert_eq!(row.as_long(1), 20);
    }

    #[test]
    fn test_named_bind_fallbacks() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select ?1, :A, @mixed, $upper").unwrap();
        let values: HashMap<&str, i64> =
            HashMap::from([("A", 1), ("1", 2), ("mixed", 3), ("UPPER", 4)]);
        assert_eq!(stmt.bind_named(&values, BindPolicy::ReportMissing).unwrap(), 4);
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_long(0), 2);
        assert_eq!(row.as_long(1), 1);
        assert_eq!(row.as_long(2), 3);
        assert_eq!(row.as_long(3), 4);
    }

    #[test]
    fn test_named_bind_missing_binds_null_and_continues() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select :a, :b, :c").unwrap();
        stmt.bind(params![7, 7, 7], -1).unwrap();
        stmt.rewind();

        let values = BTreeMap::from([("a", 1), ("c", 3)]);
        let err = stmt.bind_named(&values, BindPolicy::ReportMissing).unwrap_err();
        assert!(matches!(err, Error::BindMismatch { .. }));
        assert!(err.to_string().contains(":b"));

        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_long(0), 1);
        assert!(row.is_null(1));
        assert_eq!(row.as_long(2), 3);
    }

    #[test]
    fn test_named_bind_policies() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select :a, :b").unwrap();
        let values = IndexMap::from([("a".to_string(), "x".to_string())]);
        assert_eq!(stmt.bind_named(&values, BindPolicy::Silent).unwrap(), 1);
        assert_eq!(stmt.bind_named(&values, BindPolicy::ReportBindErrors).unwrap(), 1);
        assert!(stmt.bind_named(&values, BindPolicy::ReportMissing).is_err());
    }

    #[test]
    fn test_named_bind_from_pairs() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select :name").unwrap();
        let pairs = [("name", "quill")];
        stmt.with_named(&pairs[..]).unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_text(0).as_deref(), Some("quill"));
    }

    #[test]
    fn test_bind_by_name_requires_declared_slot() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select :id").unwrap();
        stmt.bind_by_name(":id", &42_i64).unwrap();
        let err = stmt.bind_by_name("id", &1_i64).unwrap_err();
        assert!(matches!(err, Error::BindMismatch { .. }));
        assert_eq!(stmt.next_row().unwrap().unwrap().as_long(0), 42);
    }

    #[test]
    fn test_bind_value_kinds() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare("select typeof(?1), typeof(?2), length(?3), typeof(?4), typeof(?5)")
            .unwrap();
        let empty: Vec<u8> = Vec::new();
        stmt.with(params![true, 2.5, ZeroBlob(16), empty, ZeroBlob(-1)])
            .unwrap();
        let row = stmt.next_row().unwrap().unwrap();
        assert_eq!(row.as_text(0).as_deref(), Some("integer"));
        assert_eq!(row.as_text(1).as_deref(), Some("real"));
        assert_eq!(row.as_long(2), 16);
        assert_eq!(row.as_text(3).as_deref(), Some("null"));
        assert_eq!(row.as_text(4).as_deref(), Some("null"));
    }

    #[test]
    fn test_bind_on_finalized_statement_is_misuse() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select ?").unwrap();
        stmt.finalize();
        assert!(matches!(stmt.bind(params![1], 1).unwrap_err(), Error::Misuse { .. }));
    }
}
