//! Routine descriptors and resolved routines.

use crate::core::types::{ArgumentDescriptor, TypeKind};
use std::fmt;

/// Typed description of a native routine, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineDescriptor {
    pub name: String,
    /// `None` for routines returning nothing.
    pub result: Option<ArgumentDescriptor>,
    pub args: Vec<ArgumentDescriptor>,
}

impl RoutineDescriptor {
    /// A direct `void` result is normalised to `None`.
    pub fn new(
        name: impl Into<String>,
        result: Option<ArgumentDescriptor>,
        args: Vec<ArgumentDescriptor>,
    ) -> Self {
        let result = result.filter(|r| r.indirect || r.kind != TypeKind::Void);
        Self {
            name: name.into(),
            result,
            args,
        }
    }

    /// Whether the result comes back in a floating-point register.
    pub fn float_result(&self) -> bool {
        self.result.is_some_and(|r| r.is_float())
    }
}

impl fmt::Display for RoutineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Some(result) => write!(f, "{result} {}(", self.name)?,
            None => write!(f, "void {}(", self.name)?,
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A routine resolved against an open library.
///
/// `address` is only meaningful while the owning library stays loaded; the
/// library hands routines out behind handles that check this on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub descriptor: RoutineDescriptor,
    pub address: usize,
}

impl Routine {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn result(&self) -> Option<&ArgumentDescriptor> {
        self.descriptor.result.as_ref()
    }

    pub fn args(&self) -> &[ArgumentDescriptor] {
        &self.descriptor.args
    }
}
