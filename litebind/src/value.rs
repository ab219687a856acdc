///
/// Tagged value model and the binding capability.
///
/// `Value` is the single representation every bound argument passes
/// through on its way to the engine. Application types become bindable
/// by implementing `Bindable`, whose one operation produces a `Value`;
/// nothing else in the crate looks at application types directly.
///
/// Conversions:
/// - bool -> Boolean
/// - i8, u8, i16, u16, i32, u32, isize, usize -> Integer
/// - i64, u64 -> Long
/// - f32, f64 -> Real
/// - str, String -> Text (UTF-8); Utf16Text -> Text (UTF-16)
/// - slices, arrays, vectors of plain data -> Blob (empty -> Null)
/// - Plain(&T) of plain data -> Blob of its bytes
/// - ZeroBlob(n) -> ZeroFill (negative -> Null)
/// - Option<T> -> Null when None
/// - SystemTime -> Real seconds since the Unix epoch
///
/// "Plain data" is the compile-time `zerocopy::IntoBytes + Immutable`
/// capability: types with padding or interior references cannot be
/// viewed as bytes and so do not implement `Bindable` as blobs.
///

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::{Immutable, IntoBytes};

/// Encoding of the bytes carried by `Value::Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// UTF-16 in native byte order.
    Utf16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Boolean(bool),
    Integer(isize),
    Long(i64),
    Real(f64),
    Text(Cow<'a, [u8]>, TextEncoding),
    Blob(Cow<'a, [u8]>),
    ZeroFill(i64),
    /// Leave the slot's previously bound value untouched.
    Preserve,
}

impl<'a> Value<'a> {
    pub fn text(s: &'a str) -> Self {
        Value::Text(Cow::Borrowed(s.as_bytes()), TextEncoding::Utf8)
    }

    pub fn blob(bytes: &'a [u8]) -> Self {
        Value::Blob(Cow::Borrowed(bytes))
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::ZeroFill(len) => *len < 0,
            _ => false,
        }
    }

    /// Text content as UTF-8, decoding UTF-16 text when needed.
    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Text(bytes, TextEncoding::Utf8) => Some(String::from_utf8_lossy(bytes)),
            Value::Text(bytes, TextEncoding::Utf16) => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
                    .collect();
                Some(Cow::Owned(String::from_utf16_lossy(&units)))
            }
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// A borrowed copy of this value.
    pub fn reborrow(&self) -> Value<'_> {
        match self {
            Value::Text(bytes, encoding) => Value::Text(Cow::Borrowed(bytes.as_ref()), *encoding),
            Value::Blob(bytes) => Value::Blob(Cow::Borrowed(bytes.as_ref())),
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Boolean(*b),
            Value::Integer(i) => Value::Integer(*i),
            Value::Long(l) => Value::Long(*l),
            Value::Real(r) => Value::Real(*r),
            Value::ZeroFill(len) => Value::ZeroFill(*len),
            Value::Preserve => Value::Preserve,
        }
    }

    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Text(bytes, encoding) => Value::Text(Cow::Owned(bytes.into_owned()), encoding),
            Value::Blob(bytes) => Value::Blob(Cow::Owned(bytes.into_owned())),
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Boolean(b),
            Value::Integer(i) => Value::Integer(i),
            Value::Long(l) => Value::Long(l),
            Value::Real(r) => Value::Real(r),
            Value::ZeroFill(len) => Value::ZeroFill(len),
            Value::Preserve => Value::Preserve,
        }
    }
}

/// A type that can be bound to a statement parameter.
pub trait Bindable {
    fn to_value(&self) -> Value<'_>;
}

impl Bindable for Value<'_> {
    fn to_value(&self) -> Value<'_> {
        self.reborrow()
    }
}

impl<T: Bindable + ?Sized> Bindable for &T {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl<T: Bindable + ?Sized> Bindable for Box<T> {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl<T: Bindable> Bindable for Option<T> {
    fn to_value(&self) -> Value<'_> {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }
}

impl Bindable for bool {
    fn to_value(&self) -> Value<'_> {
        Value::Boolean(*self)
    }
}

macro_rules! bind_as_integer {
    ($($ty:ty),*) => {
        $(
            impl Bindable for $ty {
                fn to_value(&self) -> Value<'_> {
                    Value::Integer(*self as isize)
                }
            }
        )*
    };
}

bind_as_integer!(i8, u8, i16, u16, i32, u32, isize, usize);

impl Bindable for i64 {
    fn to_value(&self) -> Value<'_> {
        Value::Long(*self)
    }
}

impl Bindable for u64 {
    fn to_value(&self) -> Value<'_> {
        Value::Long(*self as i64)
    }
}

impl Bindable for f64 {
    fn to_value(&self) -> Value<'_> {
        Value::Real(*self)
    }
}

impl Bindable for f32 {
    fn to_value(&self) -> Value<'_> {
        Value::Real(f64::from(*self))
    }
}

impl Bindable for str {
    fn to_value(&self) -> Value<'_> {
        Value::text(self)
    }
}

impl Bindable for String {
    fn to_value(&self) -> Value<'_> {
        Value::text(self)
    }
}

impl Bindable for SystemTime {
    fn to_value(&self) -> Value<'_> {
        let seconds = match self.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs_f64(),
            Err(before) => -before.duration().as_secs_f64(),
        };
        Value::Real(seconds)
    }
}

impl<T: IntoBytes + Immutable> Bindable for [T] {
    fn to_value(&self) -> Value<'_> {
        let bytes = self.as_bytes();
        if bytes.is_empty() {
            Value::Null
        } else {
            Value::Blob(Cow::Borrowed(bytes))
        }
    }
}

impl<T: IntoBytes + Immutable, const N: usize> Bindable for [T; N] {
    fn to_value(&self) -> Value<'_> {
        self.as_slice().to_value()
    }
}

impl<T: IntoBytes + Immutable> Bindable for Vec<T> {
    fn to_value(&self) -> Value<'_> {
        self.as_slice().to_value()
    }
}

/// UTF-16 text in native byte order.
#[derive(Debug, Clone, Copy)]
pub struct Utf16Text<'a>(pub &'a [u16]);

impl Bindable for Utf16Text<'_> {
    fn to_value(&self) -> Value<'_> {
        Value::Text(Cow::Borrowed(self.0.as_bytes()), TextEncoding::Utf16)
    }
}

/// The in-memory bytes of one plain-data value, bound as a blob.
#[derive(Debug, Clone, Copy)]
pub struct Plain<'a, T: ?Sized>(pub &'a T);

impl<T: IntoBytes + Immutable + ?Sized> Bindable for Plain<'_, T> {
    fn to_value(&self) -> Value<'_> {
        let bytes = self.0.as_bytes();
        if bytes.is_empty() {
            Value::Null
        } else {
            Value::Blob(Cow::Borrowed(bytes))
        }
    }
}

/// A blob of `len` zero bytes, allocated by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroBlob(pub i64);

impl Bindable for ZeroBlob {
    fn to_value(&self) -> Value<'_> {
        Value::ZeroFill(self.0)
    }
}
