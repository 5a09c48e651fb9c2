//! IR type system.
//!
//! Pointers keep their pointee so the trace injector can tell a byte
//! pointer (C string) from any other pointer.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Integer of the given bit width (`i1` is a boolean).
    Int(u32),
    Float(FloatKind),
    Ptr(Box<Type>),
    Array(u64, Box<Type>),
    /// Named aggregate (structs, tuples, fat pointers).
    Aggregate(String),
    /// Type the front end could not lower (implicit declarations).
    Opaque,
}

impl Type {
    pub fn i8() -> Type {
        Type::Int(8)
    }

    pub fn i32() -> Type {
        Type::Int(32)
    }

    pub fn i64() -> Type {
        Type::Int(64)
    }

    pub fn f64() -> Type {
        Type::Float(FloatKind::F64)
    }

    /// `i8*`, the type of C strings and of the libc `FILE*` handles we use.
    pub fn byte_ptr() -> Type {
        Type::Ptr(Box::new(Type::i8()))
    }

    pub fn ptr_to(pointee: Type) -> Type {
        Type::Ptr(Box::new(pointee))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float(FloatKind::F32) => write!(f, "float"),
            Type::Float(FloatKind::F64) => write!(f, "double"),
            Type::Ptr(inner) => write!(f, "{}*", inner),
            Type::Array(len, elem) => write!(f, "[{} x {}]", len, elem),
            Type::Aggregate(name) => write!(f, "%\"{}\"", name),
            Type::Opaque => write!(f, "opaque"),
        }
    }
}

/// Signature of an IR function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub ret: Type,
    pub params: Vec<Type>,
    pub variadic: bool,
}

impl FunctionType {
    pub fn new(ret: Type, params: Vec<Type>) -> Self {
        Self { ret, params, variadic: false }
    }

    pub fn variadic(ret: Type, params: Vec<Type>) -> Self {
        Self { ret, params, variadic: true }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        if self.variadic {
            params.push("...".to_string());
        }
        write!(f, "{} ({})", self.ret, params.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::byte_ptr().to_string(), "i8*");
        assert_eq!(Type::Array(512, Box::new(Type::i8())).to_string(), "[512 x i8]");
        let fty = FunctionType::variadic(Type::i32(), vec![Type::byte_ptr(), Type::byte_ptr()]);
        assert_eq!(fty.to_string(), "i32 (i8*, i8*, ...)");
    }

    #[test]
    fn test_pointee() {
        assert_eq!(Type::byte_ptr().pointee(), Some(&Type::Int(8)));
        assert_eq!(Type::i32().pointee(), None);
    }
}
