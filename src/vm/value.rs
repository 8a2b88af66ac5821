use std::fmt;
use std::rc::Rc;

use super::channel::ChanId;
use super::error::Fault;
use super::memory::{Pointer, Slice};
use super::wide::WideInt;
use crate::ssa::{FuncId, TypeId};

/// A runtime value held in a frame register.
///
/// Integers of every width are carried normalized to their width inside
/// `Int`; 64-bit integers become `Wide` when the target lacks native 64-bit
/// arithmetic. Struct and array values are `Tuple`s. Strings are byte
/// sequences and need not be valid UTF-8.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Wide(WideInt),
    Float(f64),
    Str(Rc<[u8]>),
    Ptr(Pointer),
    Slice(Slice),
    Chan(ChanId),
    Func(Rc<Closure>),
    Iface(Rc<Interface>),
    Tuple(Rc<[Value]>),
}

/// A function value with its captured variables.
#[derive(Debug)]
pub struct Closure {
    pub func: FuncId,
    pub env: Vec<Value>,
}

/// An interface value. The nil interface has type id 0.
#[derive(Debug)]
pub struct Interface {
    pub ty: TypeId,
    pub payload: Value,
}

impl Value {
    pub fn nil_interface() -> Self {
        Value::Iface(Rc::new(Interface {
            ty: TypeId::NIL,
            payload: Value::Nil,
        }))
    }

    pub fn interface(ty: TypeId, payload: Value) -> Self {
        Value::Iface(Rc::new(Interface { ty, payload }))
    }

    pub fn func(func: FuncId) -> Self {
        Value::Func(Rc::new(Closure {
            func,
            env: Vec::new(),
        }))
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(values))
    }

    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s.as_bytes()))
    }

    pub fn bytes(b: &[u8]) -> Self {
        Value::Str(Rc::from(b))
    }

    pub fn is_nil(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Iface(i) => i.ty == TypeId::NIL,
            Value::Slice(s) => s.base.is_none(),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Result<bool, Fault> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Fault::mismatch("bool", other)),
        }
    }

    /// Integer view of `Int` and `Wide` values.
    pub fn as_int(&self) -> Result<i64, Fault> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Wide(w) => Ok(w.to_i64()),
            other => Err(Fault::mismatch("integer", other)),
        }
    }

    pub fn as_wide(&self) -> Result<WideInt, Fault> {
        match self {
            Value::Wide(w) => Ok(*w),
            Value::Int(n) => Ok(WideInt::from_i64(*n)),
            other => Err(Fault::mismatch("wide integer", other)),
        }
    }

    pub fn as_float(&self) -> Result<f64, Fault> {
        match self {
            Value::Float(f) => Ok(*f),
            other => Err(Fault::mismatch("float", other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], Fault> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Fault::mismatch("string", other)),
        }
    }

    /// Pointer view; a nil pointer is a fault.
    pub fn as_ptr(&self) -> Result<Pointer, Fault> {
        match self {
            Value::Ptr(p) => Ok(*p),
            Value::Nil => Err(Fault::NilDereference),
            other => Err(Fault::mismatch("pointer", other)),
        }
    }

    pub fn as_slice(&self) -> Result<Slice, Fault> {
        match self {
            Value::Slice(s) => Ok(*s),
            Value::Nil => Ok(Slice::nil(0)),
            other => Err(Fault::mismatch("slice", other)),
        }
    }

    /// Channel view; `None` for the nil channel.
    pub fn as_chan(&self) -> Result<Option<ChanId>, Fault> {
        match self {
            Value::Chan(c) => Ok(Some(*c)),
            Value::Nil => Ok(None),
            other => Err(Fault::mismatch("channel", other)),
        }
    }

    pub fn as_closure(&self) -> Result<&Rc<Closure>, Fault> {
        match self {
            Value::Func(c) => Ok(c),
            Value::Nil => Err(Fault::NilDereference),
            other => Err(Fault::mismatch("function", other)),
        }
    }

    pub fn as_interface(&self) -> Result<&Interface, Fault> {
        match self {
            Value::Iface(i) => Ok(i),
            other => Err(Fault::mismatch("interface", other)),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value], Fault> {
        match self {
            Value::Tuple(t) => Ok(t),
            other => Err(Fault::mismatch("tuple", other)),
        }
    }

    /// Language-level `==`.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Wide(a), Value::Wide(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a == b,
            (Value::Chan(a), Value::Chan(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => a.base.is_none() && b.base.is_none(),
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            (Value::Iface(a), Value::Iface(b)) => a.ty == b.ty && a.payload.equals(&b.payload),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            // Nil compared against a nil-able reference.
            (Value::Nil, v) | (v, Value::Nil) => v.is_nil(),
            _ => false,
        }
    }

    /// Rendering used by `panic` reports.
    pub fn panic_text(&self) -> String {
        match self {
            Value::Iface(i) if i.ty == TypeId::NIL => "nil".to_string(),
            Value::Iface(i) => i.payload.panic_text(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Wide(w) => write!(f, "{:?}", w),
            Value::Float(n) => write!(f, "Float({})", n),
            Value::Str(s) => write!(f, "Str({:?})", String::from_utf8_lossy(s)),
            Value::Ptr(p) => write!(f, "Ptr({}+{})", p.obj.0, p.offset),
            Value::Slice(s) => write!(f, "Slice(len={}, cap={})", s.len(), s.capacity()),
            Value::Chan(c) => write!(f, "Chan({})", c.0),
            Value::Func(c) => write!(f, "Func({})", c.func),
            Value::Iface(i) => write!(f, "Iface({}, {:?})", i.ty, i.payload),
            Value::Tuple(t) => f.debug_list().entries(t.iter()).finish(),
        }
    }
}

/// `print`/`println` formatting.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Wide(w) => write!(f, "{}", w.to_string_signed()),
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            Value::Ptr(p) => write!(f, "0x{:x}", p.address()),
            Value::Slice(s) => write!(
                f,
                "[{}/{}]0x{:x}",
                s.len(),
                s.capacity(),
                s.base.map(|p| p.address()).unwrap_or(0)
            ),
            Value::Chan(c) => write!(f, "chan#{}", c.0),
            Value::Func(c) => write!(f, "func#{}", c.func.0),
            Value::Iface(i) if i.ty == TypeId::NIL => write!(f, "nil"),
            Value::Iface(i) => write!(f, "{}", i.payload),
            Value::Tuple(t) => {
                write!(f, "{{")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_interface_is_nil() {
        assert!(Value::nil_interface().is_nil());
        assert!(!Value::interface(TypeId(3), Value::Int(1)).is_nil());
    }

    #[test]
    fn test_interface_equality_includes_type() {
        let a = Value::interface(TypeId(3), Value::Int(1));
        let b = Value::interface(TypeId(3), Value::Int(1));
        let c = Value::interface(TypeId(4), Value::Int(1));
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_nil_compares_against_nil_slice() {
        assert!(Value::Nil.equals(&Value::Slice(Slice::nil(8))));
        assert!(Value::Nil.equals(&Value::nil_interface()));
        assert!(!Value::Nil.equals(&Value::Int(0)));
    }

    #[test]
    fn test_tuple_display() {
        let v = Value::tuple(vec![Value::Int(1), Value::str("a"), Value::Bool(true)]);
        assert_eq!(v.to_string(), "{1 a true}");
    }

    #[test]
    fn test_strings_compare_by_bytes() {
        assert!(Value::bytes(&[0xff, 0x00]).equals(&Value::bytes(&[0xff, 0x00])));
        assert!(!Value::bytes(&[0xff]).equals(&Value::bytes(&[0xfe])));
        assert_eq!(Value::str("hé").as_bytes().unwrap(), "hé".as_bytes());
    }

    #[test]
    fn test_nil_pointer_faults() {
        assert!(matches!(Value::Nil.as_ptr(), Err(Fault::NilDereference)));
    }
}
