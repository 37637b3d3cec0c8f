// This module is the value marshaller that sits between caller-supplied values and the
// classified argument buffers. encode() coerces an Arg to the canonical representation of an
// ArgumentDescriptor (range-checked numeric conversion, string parsing and formatting, pointer
// passthrough, out-parameter addresses) and produces a RawArgument: one machine word plus its
// register class and width. Strings are materialised as null-terminated buffers inside a
// CallScope, a bumpalo arena owned by exactly one call and dropped on every exit path of that
// call. decode() reinterprets a raw result word (or the storage behind a returned address for
// indirect results) as a typed Value; floating-point results are bit casts, never numeric casts.

//! Value marshalling in both directions.

use crate::core::error::{CallError, CallResult};
use crate::core::types::{ArgumentDescriptor, TypeKind, Width};
use crate::core::value::{Arg, Value};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use std::ffi::{c_char, CStr};
use std::ptr;

/// How string arguments and results are laid out in native memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    /// Null-terminated UTF-8 (`char *`).
    #[default]
    Utf8,
    /// Null-terminated UTF-16 (`wchar_t *` on Windows).
    Utf16,
}

impl StringEncoding {
    /// Encoding expected by the platform's native APIs.
    pub fn native() -> Self {
        if cfg!(windows) {
            StringEncoding::Utf16
        } else {
            StringEncoding::Utf8
        }
    }
}

/// One encoded argument word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawArgument {
    pub bits: u64,
    pub is_float: bool,
    pub width: Width,
}

impl RawArgument {
    pub fn integer(bits: u64, width: Width) -> Self {
        Self {
            bits,
            is_float: false,
            width,
        }
    }

    pub fn float(bits: u64, width: Width) -> Self {
        Self {
            bits,
            is_float: true,
            width,
        }
    }

    pub fn pointer(address: usize) -> Self {
        Self::integer(address as u64, Width::Pointer)
    }
}

/// Arena owning every temporary buffer created while encoding one call.
///
/// Dropping the scope releases all of them at once, whether the call
/// returned, failed during encoding, or failed in the invocation layer.
pub struct CallScope {
    arena: Bump,
}

impl CallScope {
    pub fn new() -> Self {
        Self { arena: Bump::new() }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &Bump {
        &self.arena
    }

    /// Bytes currently held by the scope.
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    /// Copy `text` into the arena as a null-terminated string and return its address.
    pub fn alloc_string(&self, text: &str, encoding: StringEncoding) -> Result<usize, String> {
        if text.contains('\0') {
            return Err("string contains an interior NUL byte".into());
        }
        let address = match encoding {
            StringEncoding::Utf8 => {
                let buf = self.arena.alloc_slice_fill_copy(text.len() + 1, 0u8);
                buf[..text.len()].copy_from_slice(text.as_bytes());
                buf.as_ptr() as usize
            }
            StringEncoding::Utf16 => {
                let mut units = BumpVec::with_capacity_in(text.len() + 1, &self.arena);
                units.extend(text.encode_utf16());
                units.push(0u16);
                units.into_bump_slice().as_ptr() as usize
            }
        };
        Ok(address)
    }
}

impl Default for CallScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Intermediate numeric form used during coercion.
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
}

fn integer_range(kind: TypeKind) -> (i128, i128) {
    match kind {
        TypeKind::Int => (isize::MIN as i128, isize::MAX as i128),
        TypeKind::Int8 => (i8::MIN.into(), i8::MAX.into()),
        TypeKind::Int16 => (i16::MIN.into(), i16::MAX.into()),
        TypeKind::Int32 => (i32::MIN.into(), i32::MAX.into()),
        TypeKind::Int64 => (i64::MIN.into(), i64::MAX.into()),
        TypeKind::UInt => (0, usize::MAX as i128),
        TypeKind::UInt8 => (0, u8::MAX.into()),
        TypeKind::UInt16 => (0, u16::MAX.into()),
        TypeKind::UInt32 => (0, u32::MAX.into()),
        TypeKind::UInt64 => (0, u64::MAX.into()),
        _ => (0, 0),
    }
}

fn parse_number(text: &str) -> Result<Number, String> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i128>() {
        return Ok(Number::Int(value));
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if let Ok(value) = i128::from_str_radix(hex, 16) {
            return Ok(Number::Int(value));
        }
    }
    if let Ok(value) = text.parse::<f64>() {
        return Ok(Number::Float(value));
    }
    match text.parse::<bool>() {
        Ok(value) => Ok(Number::Int(value as i128)),
        Err(_) => Err(format!("{text:?} is not a number")),
    }
}

fn number_of(arg: &Arg<'_>) -> Result<Number, String> {
    match arg {
        Arg::Bool(v) => Ok(Number::Int(*v as i128)),
        Arg::Int(v) => Ok(Number::Int((*v).into())),
        Arg::UInt(v) => Ok(Number::Int((*v).into())),
        Arg::Float(v) => Ok(Number::Float(*v)),
        Arg::Str(s) => parse_number(s),
        Arg::Pointer(address) => Ok(Number::Int(*address as i128)),
        Arg::List(_) => Err("aggregate value where a scalar is expected".into()),
        _ => Err("no numeric conversion".into()),
    }
}

fn integer_bits(kind: TypeKind, number: Number) -> Result<u64, String> {
    let value = match number {
        Number::Int(v) => v,
        Number::Float(f) => {
            if !f.is_finite() || f.fract() != 0.0 {
                return Err(format!("{f} is not integral"));
            }
            f as i128
        }
    };
    let (min, max) = integer_range(kind);
    if value < min || value > max {
        return Err(format!("{value} out of range for {kind}"));
    }
    // Signed kinds are sign-extended to the full word, unsigned ones zero-extended.
    Ok(if kind.is_signed() {
        value as i64 as u64
    } else {
        value as u64
    })
}

fn float_bits(kind: TypeKind, number: Number) -> u64 {
    let value = match number {
        Number::Int(v) => v as f64,
        Number::Float(f) => f,
    };
    match kind {
        TypeKind::Float32 => (value as f32).to_bits() as u64,
        _ => value.to_bits(),
    }
}

fn text_of(arg: &Arg<'_>) -> Option<String> {
    match arg {
        Arg::Bool(v) => Some(v.to_string()),
        Arg::Int(v) => Some(v.to_string()),
        Arg::UInt(v) => Some(v.to_string()),
        Arg::Float(v) => Some(v.to_string()),
        _ => None,
    }
}

fn bytes_address(bytes: &mut [u8]) -> usize {
    if bytes.is_empty() {
        0
    } else {
        bytes.as_mut_ptr() as usize
    }
}

/// Whether out-parameter storage of kind `storage` may back an indirect `kind`.
fn out_matches(kind: TypeKind, storage: TypeKind) -> bool {
    storage == kind
        || kind == TypeKind::Void
        || (storage == TypeKind::Pointer && kind == TypeKind::String)
}

/// Encode one caller value for the parameter described by `descriptor`.
///
/// `index` is the argument position, reported in errors.
pub fn encode(
    scope: &CallScope,
    descriptor: &ArgumentDescriptor,
    index: usize,
    arg: &mut Arg<'_>,
    encoding: StringEncoding,
) -> CallResult<RawArgument> {
    let conversion = |arg: &Arg<'_>, reason: String| CallError::ConversionError {
        routine: None,
        index,
        expected: descriptor.to_string(),
        actual: arg.describe(),
        reason,
    };

    if let Arg::Unsupported(kind) = arg {
        return Err(CallError::UnsupportedValueKind {
            routine: None,
            index,
            kind: (*kind).to_string(),
        });
    }

    if descriptor.indirect {
        let kind = descriptor.kind;
        let address = match arg {
            Arg::Out(out) if out_matches(kind, out.kind()) => out.address(),
            Arg::Bytes(bytes)
                if matches!(
                    kind,
                    TypeKind::String
                        | TypeKind::UInt8
                        | TypeKind::Int8
                        | TypeKind::Pointer
                        | TypeKind::Void
                ) =>
            {
                bytes_address(bytes)
            }
            Arg::Pointer(address) => *address,
            Arg::Null => 0,
            other => {
                let reason = match other {
                    Arg::Out(out) => format!("storage holds {}, not {}", out.kind(), kind),
                    _ => "indirect parameters need caller-owned storage".into(),
                };
                return Err(conversion(other, reason));
            }
        };
        return Ok(RawArgument::pointer(address));
    }

    let width = descriptor.width();
    match descriptor.kind {
        TypeKind::Void => Err(CallError::UnsupportedKind {
            kind: descriptor.kind.to_string(),
        }),
        TypeKind::Bool => {
            let number = number_of(arg).map_err(|reason| conversion(arg, reason))?;
            let truth = match number {
                Number::Int(v) => v != 0,
                Number::Float(f) => f != 0.0,
            };
            Ok(RawArgument::integer(truth as u64, width))
        }
        kind if kind.is_integer() => {
            let bits = number_of(arg)
                .and_then(|number| integer_bits(kind, number))
                .map_err(|reason| conversion(arg, reason))?;
            Ok(RawArgument::integer(bits, width))
        }
        kind if kind.is_float() => {
            let number = number_of(arg).map_err(|reason| conversion(arg, reason))?;
            Ok(RawArgument::float(float_bits(kind, number), width))
        }
        TypeKind::String => {
            let address = match arg {
                Arg::Str(text) => scope
                    .alloc_string(text, encoding)
                    .map_err(|reason| conversion(arg, reason))?,
                Arg::Pointer(address) => *address,
                Arg::Null => 0,
                Arg::Bytes(bytes) => bytes_address(bytes),
                other => match text_of(other) {
                    Some(text) => scope
                        .alloc_string(&text, encoding)
                        .map_err(|reason| conversion(other, reason))?,
                    None => {
                        let reason = match other {
                            Arg::List(_) => "aggregate value where a scalar is expected",
                            _ => "no string conversion",
                        };
                        return Err(conversion(other, reason.into()));
                    }
                },
            };
            Ok(RawArgument::pointer(address))
        }
        TypeKind::Pointer => {
            let address = match arg {
                Arg::Pointer(address) => *address,
                Arg::Null => 0,
                Arg::Bytes(bytes) => bytes_address(bytes),
                Arg::Out(out) => out.address(),
                other => {
                    return Err(conversion(other, "expected an address".into()));
                }
            };
            Ok(RawArgument::pointer(address))
        }
        // Every kind is covered above; integer and float kinds use guards.
        kind => Err(CallError::UnsupportedKind {
            kind: kind.to_string(),
        }),
    }
}

/// Read a null-terminated string starting at `address`.
///
/// # Safety
///
/// `address` must point to a readable, null-terminated string in `encoding`.
unsafe fn read_string(address: usize, encoding: StringEncoding) -> String {
    match encoding {
        StringEncoding::Utf8 => CStr::from_ptr(address as *const c_char)
            .to_string_lossy()
            .into_owned(),
        StringEncoding::Utf16 => {
            let start = address as *const u16;
            let mut len = 0;
            while *start.add(len) != 0 {
                len += 1;
            }
            String::from_utf16_lossy(std::slice::from_raw_parts(start, len))
        }
    }
}

/// Read a value of `kind` stored at `address`.
///
/// For `String` the storage holds a string pointer; a null pointer reads as
/// [`Value::Null`].
///
/// # Safety
///
/// `address` must be non-null and valid for reads of `kind.byte_width()` bytes.
pub unsafe fn read_value(kind: TypeKind, address: usize, encoding: StringEncoding) -> Value {
    let ptr = address as *const u8;
    match kind {
        TypeKind::Bool => Value::Bool(ptr::read_unaligned(ptr) != 0),
        TypeKind::Int => Value::Int(ptr::read_unaligned(ptr as *const isize)),
        TypeKind::Int8 => Value::Int8(ptr::read_unaligned(ptr as *const i8)),
        TypeKind::Int16 => Value::Int16(ptr::read_unaligned(ptr as *const i16)),
        TypeKind::Int32 => Value::Int32(ptr::read_unaligned(ptr as *const i32)),
        TypeKind::Int64 => Value::Int64(ptr::read_unaligned(ptr as *const i64)),
        TypeKind::UInt => Value::UInt(ptr::read_unaligned(ptr as *const usize)),
        TypeKind::UInt8 => Value::UInt8(ptr::read_unaligned(ptr)),
        TypeKind::UInt16 => Value::UInt16(ptr::read_unaligned(ptr as *const u16)),
        TypeKind::UInt32 => Value::UInt32(ptr::read_unaligned(ptr as *const u32)),
        TypeKind::UInt64 => Value::UInt64(ptr::read_unaligned(ptr as *const u64)),
        TypeKind::Float32 => Value::Float32(ptr::read_unaligned(ptr as *const f32)),
        TypeKind::Float64 => Value::Float64(ptr::read_unaligned(ptr as *const f64)),
        TypeKind::String => {
            let target = ptr::read_unaligned(ptr as *const usize);
            if target == 0 {
                Value::Null
            } else {
                Value::String(read_string(target, encoding))
            }
        }
        TypeKind::Pointer => Value::Pointer(ptr::read_unaligned(ptr as *const usize)),
        TypeKind::Void => Value::Pointer(address),
    }
}

/// Reinterpret a raw result word as the type named by `descriptor`.
///
/// `None` or a direct `Void` descriptor yields no value. An indirect result
/// reads the pointee at `word`, except `string *`, which is the string itself.
///
/// # Safety
///
/// For `String` results and indirect descriptors, a non-zero `word` must be
/// a valid address of the described data.
pub unsafe fn decode(
    descriptor: Option<&ArgumentDescriptor>,
    word: u64,
    encoding: StringEncoding,
) -> CallResult<Option<Value>> {
    let descriptor = match descriptor {
        Some(d) if d.indirect || d.kind != TypeKind::Void => d,
        _ => return Ok(None),
    };

    if descriptor.indirect {
        let address = word as usize;
        let value = match descriptor.kind {
            TypeKind::Void => Value::Pointer(address),
            _ if address == 0 => Value::Null,
            TypeKind::String => Value::String(read_string(address, encoding)),
            kind => read_value(kind, address, encoding),
        };
        return Ok(Some(value));
    }

    let value = match descriptor.kind {
        TypeKind::Bool => Value::Bool(word as u8 != 0),
        TypeKind::Int => Value::Int(word as isize),
        TypeKind::Int8 => Value::Int8(word as i8),
        TypeKind::Int16 => Value::Int16(word as i16),
        TypeKind::Int32 => Value::Int32(word as i32),
        TypeKind::Int64 => Value::Int64(word as i64),
        TypeKind::UInt => Value::UInt(word as usize),
        TypeKind::UInt8 => Value::UInt8(word as u8),
        TypeKind::UInt16 => Value::UInt16(word as u16),
        TypeKind::UInt32 => Value::UInt32(word as u32),
        TypeKind::UInt64 => Value::UInt64(word),
        TypeKind::Float32 => Value::Float32(f32::from_bits(word as u32)),
        TypeKind::Float64 => Value::Float64(f64::from_bits(word)),
        TypeKind::String if word == 0 => Value::Null,
        TypeKind::String => Value::String(read_string(word as usize, encoding)),
        TypeKind::Pointer => Value::Pointer(word as usize),
        TypeKind::Void => {
            return Err(CallError::UnsupportedKind {
                kind: descriptor.kind.to_string(),
            })
        }
    };
    Ok(Some(value))
}
