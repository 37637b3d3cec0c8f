//! Caller-supplied argument values and decoded results.
//!
//! [`Arg`] is what a caller hands to a call: plain scalars, strings, raw
//! addresses, and borrowed out-parameter storage ([`Out`]). The borrow keeps
//! the storage alive and exclusively lent to the callee for the duration of
//! the call. [`Value`] is what comes back.

use crate::core::types::TypeKind;
use std::borrow::Cow;
use std::fmt;

/// A caller-supplied argument value.
#[derive(Debug)]
pub enum Arg<'a> {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Cow<'a, str>),
    /// Raw address, passed through untouched.
    Pointer(usize),
    Null,
    /// Storage the callee may write through.
    Out(Out<'a>),
    /// Caller-owned byte buffer; its first byte's address is passed.
    Bytes(&'a mut [u8]),
    List(Vec<Arg<'a>>),
    /// A value with no encoding rule, described by name.
    Unsupported(&'static str),
}

impl Arg<'_> {
    /// Short name of the value's runtime kind, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Arg::Bool(_) => "bool".into(),
            Arg::Int(_) => "integer".into(),
            Arg::UInt(_) => "unsigned integer".into(),
            Arg::Float(_) => "float".into(),
            Arg::Str(_) => "string".into(),
            Arg::Pointer(_) => "pointer".into(),
            Arg::Null => "null".into(),
            Arg::Out(out) => format!("{} *", out.kind()),
            Arg::Bytes(_) => "byte buffer".into(),
            Arg::List(_) => "list".into(),
            Arg::Unsupported(name) => (*name).into(),
        }
    }
}

/// Borrowed storage for an out-parameter.
#[derive(Debug)]
pub enum Out<'a> {
    Bool(&'a mut bool),
    Int(&'a mut isize),
    Int8(&'a mut i8),
    Int16(&'a mut i16),
    Int32(&'a mut i32),
    Int64(&'a mut i64),
    UInt(&'a mut usize),
    UInt8(&'a mut u8),
    UInt16(&'a mut u16),
    UInt32(&'a mut u32),
    UInt64(&'a mut u64),
    Float32(&'a mut f32),
    Float64(&'a mut f64),
    /// Pointer-sized slot, e.g. a `char *` the callee fills in.
    Pointer(&'a mut usize),
}

impl Out<'_> {
    pub fn kind(&self) -> TypeKind {
        match self {
            Out::Bool(_) => TypeKind::Bool,
            Out::Int(_) => TypeKind::Int,
            Out::Int8(_) => TypeKind::Int8,
            Out::Int16(_) => TypeKind::Int16,
            Out::Int32(_) => TypeKind::Int32,
            Out::Int64(_) => TypeKind::Int64,
            Out::UInt(_) => TypeKind::UInt,
            Out::UInt8(_) => TypeKind::UInt8,
            Out::UInt16(_) => TypeKind::UInt16,
            Out::UInt32(_) => TypeKind::UInt32,
            Out::UInt64(_) => TypeKind::UInt64,
            Out::Float32(_) => TypeKind::Float32,
            Out::Float64(_) => TypeKind::Float64,
            Out::Pointer(_) => TypeKind::Pointer,
        }
    }

    /// Address of the borrowed storage.
    pub fn address(&mut self) -> usize {
        fn addr<T>(slot: &mut T) -> usize {
            slot as *mut T as usize
        }
        match self {
            Out::Bool(v) => addr(&mut **v),
            Out::Int(v) => addr(&mut **v),
            Out::Int8(v) => addr(&mut **v),
            Out::Int16(v) => addr(&mut **v),
            Out::Int32(v) => addr(&mut **v),
            Out::Int64(v) => addr(&mut **v),
            Out::UInt(v) => addr(&mut **v),
            Out::UInt8(v) => addr(&mut **v),
            Out::UInt16(v) => addr(&mut **v),
            Out::UInt32(v) => addr(&mut **v),
            Out::UInt64(v) => addr(&mut **v),
            Out::Float32(v) => addr(&mut **v),
            Out::Float64(v) => addr(&mut **v),
            Out::Pointer(v) => addr(&mut **v),
        }
    }
}

/// A decoded result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(isize),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt(usize),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Pointer(usize),
    /// A null address where a string or indirect value was expected.
    Null,
}

impl Value {
    pub fn kind(&self) -> Option<TypeKind> {
        let kind = match self {
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Int8(_) => TypeKind::Int8,
            Value::Int16(_) => TypeKind::Int16,
            Value::Int32(_) => TypeKind::Int32,
            Value::Int64(_) => TypeKind::Int64,
            Value::UInt(_) => TypeKind::UInt,
            Value::UInt8(_) => TypeKind::UInt8,
            Value::UInt16(_) => TypeKind::UInt16,
            Value::UInt32(_) => TypeKind::UInt32,
            Value::UInt64(_) => TypeKind::UInt64,
            Value::Float32(_) => TypeKind::Float32,
            Value::Float64(_) => TypeKind::Float64,
            Value::String(_) => TypeKind::String,
            Value::Pointer(_) => TypeKind::Pointer,
            Value::Null => return None,
        };
        Some(kind)
    }

    /// Integer view of any integral or boolean value.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Int8(v) => Some(v.into()),
            Value::Int16(v) => Some(v.into()),
            Value::Int32(v) => Some(v.into()),
            Value::Int64(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::UInt8(v) => Some(v.into()),
            Value::UInt16(v) => Some(v.into()),
            Value::UInt32(v) => Some(v.into()),
            Value::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float32(v) => Some(v.into()),
            Value::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Pointer(v) => write!(f, "{v:#x}"),
            Value::Null => f.write_str("null"),
        }
    }
}

macro_rules! arg_from {
    ($variant:ident as $target:ty: $($source:ty),*) => {
        $(
            impl From<$source> for Arg<'_> {
                fn from(value: $source) -> Self {
                    Arg::$variant(value as $target)
                }
            }
        )*
    };
}

arg_from!(Int as i64: i8, i16, i32, i64, isize);
arg_from!(UInt as u64: u8, u16, u32, u64, usize);
arg_from!(Float as f64: f32, f64);

impl From<bool> for Arg<'_> {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Arg::Str(Cow::Borrowed(value))
    }
}

impl From<String> for Arg<'_> {
    fn from(value: String) -> Self {
        Arg::Str(Cow::Owned(value))
    }
}

impl<'a> From<&'a mut [u8]> for Arg<'a> {
    fn from(value: &'a mut [u8]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a> From<Vec<Arg<'a>>> for Arg<'a> {
    fn from(value: Vec<Arg<'a>>) -> Self {
        Arg::List(value)
    }
}

impl<T> From<*const T> for Arg<'_> {
    fn from(value: *const T) -> Self {
        Arg::Pointer(value as usize)
    }
}

impl<T> From<*mut T> for Arg<'_> {
    fn from(value: *mut T) -> Self {
        Arg::Pointer(value as usize)
    }
}

impl<'a> From<Out<'a>> for Arg<'a> {
    fn from(value: Out<'a>) -> Self {
        Arg::Out(value)
    }
}

macro_rules! out_from {
    ($($variant:ident: $source:ty),*) => {
        $(
            impl<'a> From<&'a mut $source> for Out<'a> {
                fn from(value: &'a mut $source) -> Self {
                    Out::$variant(value)
                }
            }

            impl<'a> From<&'a mut $source> for Arg<'a> {
                fn from(value: &'a mut $source) -> Self {
                    Arg::Out(Out::$variant(value))
                }
            }
        )*
    };
}

out_from!(
    Bool: bool,
    Int: isize,
    Int8: i8,
    Int16: i16,
    Int32: i32,
    Int64: i64,
    UInt: usize,
    UInt8: u8,
    UInt16: u16,
    UInt32: u32,
    UInt64: u64,
    Float32: f32,
    Float64: f64
);

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```ignore
/// let mut size = 0i64;
/// lib.call("size", &mut args!["/dev/sda", &mut size])?;
/// ```
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::Arg::from($value)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert!(matches!(Arg::from(-3i8), Arg::Int(-3)));
        assert!(matches!(Arg::from(7u16), Arg::UInt(7)));
        assert!(matches!(Arg::from(1.5f32), Arg::Float(v) if v == 1.5));
        assert!(matches!(Arg::from("abc"), Arg::Str(s) if s == "abc"));
    }

    #[test]
    fn test_out_address_points_at_storage() {
        let mut slot = 0i64;
        let expected = &mut slot as *mut i64 as usize;
        let mut out = Out::from(&mut slot);
        assert_eq!(out.kind(), TypeKind::Int64);
        assert_eq!(out.address(), expected);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::UInt8(200).as_i64(), Some(200));
        assert_eq!(Value::Float32(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::String("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Null.kind(), None);
        assert_eq!(Value::Pointer(0x10).to_string(), "0x10");
    }
}
