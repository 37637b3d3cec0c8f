//! Closed set of scalar kinds and argument descriptors.

use crate::core::error::{CallError, CallResult};
use std::fmt;
use std::mem::size_of;

/// Supported scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Bool,
    /// Signed integer of native word width.
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    /// Unsigned integer of native word width.
    UInt,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Null-terminated string.
    String,
    /// Opaque address.
    Pointer,
    Void,
}

impl TypeKind {
    /// Every kind, in declaration order.
    pub const ALL: [TypeKind; 16] = [
        TypeKind::Bool,
        TypeKind::Int,
        TypeKind::Int8,
        TypeKind::Int16,
        TypeKind::Int32,
        TypeKind::Int64,
        TypeKind::UInt,
        TypeKind::UInt8,
        TypeKind::UInt16,
        TypeKind::UInt32,
        TypeKind::UInt64,
        TypeKind::Float32,
        TypeKind::Float64,
        TypeKind::String,
        TypeKind::Pointer,
        TypeKind::Void,
    ];

    /// Look up a kind by the name used in signatures.
    pub fn from_name(name: &str) -> CallResult<Self> {
        let kind = match name {
            "bool" => TypeKind::Bool,
            "int" => TypeKind::Int,
            "int8" => TypeKind::Int8,
            "int16" => TypeKind::Int16,
            "int32" => TypeKind::Int32,
            "int64" => TypeKind::Int64,
            "uint" => TypeKind::UInt,
            "uint8" => TypeKind::UInt8,
            "uint16" => TypeKind::UInt16,
            "uint32" => TypeKind::UInt32,
            "uint64" => TypeKind::UInt64,
            "float32" => TypeKind::Float32,
            "float64" => TypeKind::Float64,
            "string" => TypeKind::String,
            "pointer" => TypeKind::Pointer,
            "void" => TypeKind::Void,
            _ => {
                return Err(CallError::UnknownType {
                    name: name.to_string(),
                })
            }
        };
        Ok(kind)
    }

    /// Signature name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Int8 => "int8",
            TypeKind::Int16 => "int16",
            TypeKind::Int32 => "int32",
            TypeKind::Int64 => "int64",
            TypeKind::UInt => "uint",
            TypeKind::UInt8 => "uint8",
            TypeKind::UInt16 => "uint16",
            TypeKind::UInt32 => "uint32",
            TypeKind::UInt64 => "uint64",
            TypeKind::Float32 => "float32",
            TypeKind::Float64 => "float64",
            TypeKind::String => "string",
            TypeKind::Pointer => "pointer",
            TypeKind::Void => "void",
        }
    }

    /// Size of a value of this kind in bytes. `Void` has no storage.
    pub fn byte_width(self) -> usize {
        match self {
            TypeKind::Bool | TypeKind::Int8 | TypeKind::UInt8 => 1,
            TypeKind::Int16 | TypeKind::UInt16 => 2,
            TypeKind::Int32 | TypeKind::UInt32 | TypeKind::Float32 => 4,
            TypeKind::Int64 | TypeKind::UInt64 | TypeKind::Float64 => 8,
            TypeKind::Int | TypeKind::UInt | TypeKind::String | TypeKind::Pointer => {
                size_of::<usize>()
            }
            TypeKind::Void => 0,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float32 | TypeKind::Float64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            TypeKind::Int | TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed()
            || matches!(
                self,
                TypeKind::UInt
                    | TypeKind::UInt8
                    | TypeKind::UInt16
                    | TypeKind::UInt32
                    | TypeKind::UInt64
            )
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Width of a raw argument word as seen by the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
    Pointer,
}

impl Width {
    pub fn of(kind: TypeKind, indirect: bool) -> Self {
        if indirect {
            return Width::Pointer;
        }
        match kind {
            TypeKind::Int | TypeKind::UInt | TypeKind::String | TypeKind::Pointer => {
                Width::Pointer
            }
            _ => match kind.byte_width() {
                1 => Width::W8,
                2 => Width::W16,
                4 => Width::W32,
                _ => Width::W64,
            },
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
            Width::Pointer => size_of::<usize>(),
        }
    }
}

/// Describes one formal parameter or a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgumentDescriptor {
    pub kind: TypeKind,
    /// Pass the address of a value of `kind` (out-parameters).
    pub indirect: bool,
}

impl ArgumentDescriptor {
    pub const fn new(kind: TypeKind, indirect: bool) -> Self {
        Self { kind, indirect }
    }

    pub const fn direct(kind: TypeKind) -> Self {
        Self::new(kind, false)
    }

    pub const fn indirect(kind: TypeKind) -> Self {
        Self::new(kind, true)
    }

    /// Whether the value travels in a floating-point register class.
    pub fn is_float(&self) -> bool {
        !self.indirect && self.kind.is_float()
    }

    pub fn width(&self) -> Width {
        Width::of(self.kind, self.indirect)
    }
}

impl fmt::Display for ArgumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indirect {
            write!(f, "{} *", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}
