//! Dynamic type system: type descriptors, interface satisfaction, type
//! assertions, zero values and method dispatch.

use std::cmp::Ordering;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::error::Fault;
use super::memory::Access;
use super::value::Value;
use crate::ssa::{FuncId, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    Float,
    String,
    Pointer,
    Slice,
    Array,
    Struct,
    Chan,
    Interface,
    Func,
    Tuple,
}

#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
}

/// A concrete method, keyed by name and canonical signature.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: Rc<str>,
    pub signature: String,
    pub func: FuncId,
}

/// Everything the runtime knows about one type id.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: Kind,
    pub size: u32,
    pub align: u32,
    /// Integer/float width
    pub bits: u8,
    pub signed: bool,
    pub elem: Option<TypeId>,
    /// Map key type; always `None` as maps are not lowered
    pub key: Option<TypeId>,
    pub fields: Vec<FieldLayout>,
    /// Array length
    pub len: u64,
    /// Concrete method table sorted by `(name, signature)`
    pub methods: Vec<MethodEntry>,
    /// Interface requirements sorted by `(name, signature)`
    pub interface_methods: Vec<(String, String)>,
    /// Canonical signature text (function types only)
    pub signature: String,
    pub access: Access,
    pub zero: Value,
}

impl TypeDescriptor {
    pub fn is_interface(&self) -> bool {
        self.kind == Kind::Interface
    }
}

/// All type descriptors of a compiled program, indexed by [`TypeId`].
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<TypeDescriptor>,
    /// Dynamic type given to runtime errors handed to `recover`
    pub runtime_error_ty: TypeId,
}

impl TypeTable {
    pub fn new(types: Vec<TypeDescriptor>, runtime_error_ty: TypeId) -> Self {
        Self {
            types,
            runtime_error_ty,
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeDescriptor)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(i as u32), t))
    }

    pub fn name(&self, id: TypeId) -> &str {
        self.get(id).map(|t| t.name.as_str()).unwrap_or("<invalid type>")
    }

    pub fn zero_value(&self, id: TypeId) -> Value {
        self.get(id).map(|t| t.zero.clone()).unwrap_or(Value::Nil)
    }

    /// Uncached satisfaction check by sorted merge of method tables.
    pub fn implements(&self, ty: TypeId, iface: TypeId) -> bool {
        self.missing_method(ty, iface).is_none()
    }

    /// First interface method `ty` lacks, if any.
    pub fn missing_method(&self, ty: TypeId, iface: TypeId) -> Option<String> {
        let Some(required) = self.get(iface).map(|t| &t.interface_methods) else {
            return Some("<invalid interface>".to_string());
        };
        let have: &[MethodEntry] = self.get(ty).map(|t| t.methods.as_slice()).unwrap_or(&[]);
        let mut i = 0;
        for (name, sig) in required {
            loop {
                let Some(m) = have.get(i) else {
                    return Some(name.clone());
                };
                match (m.name.as_ref(), m.signature.as_str()).cmp(&(name.as_str(), sig.as_str())) {
                    Ordering::Less => i += 1,
                    Ordering::Equal => break,
                    Ordering::Greater => return Some(name.clone()),
                }
            }
        }
        None
    }

    /// Binary search of the method table by name.
    pub fn lookup_method(&self, ty: TypeId, name: &str) -> Option<FuncId> {
        let methods = &self.get(ty)?.methods;
        let idx = methods.partition_point(|m| m.name.as_ref() < name);
        methods
            .get(idx)
            .filter(|m| m.name.as_ref() == name)
            .map(|m| m.func)
    }
}

/// Per-runtime memo tables for satisfaction and dispatch.
#[derive(Debug, Default)]
pub struct TypeCache {
    implements: FxHashMap<(TypeId, TypeId), bool>,
    dispatch: FxHashMap<(TypeId, Rc<str>), Option<FuncId>>,
    enabled: bool,
    pub hits: u64,
    pub misses: u64,
}

impl TypeCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn implements(&mut self, table: &TypeTable, ty: TypeId, iface: TypeId) -> bool {
        if !self.enabled {
            return table.implements(ty, iface);
        }
        if let Some(&hit) = self.implements.get(&(ty, iface)) {
            self.hits += 1;
            return hit;
        }
        self.misses += 1;
        let result = table.implements(ty, iface);
        self.implements.insert((ty, iface), result);
        result
    }

    pub fn dispatch(&mut self, table: &TypeTable, ty: TypeId, method: &Rc<str>) -> Option<FuncId> {
        if !self.enabled {
            return table.lookup_method(ty, method);
        }
        if let Some(&hit) = self.dispatch.get(&(ty, method.clone())) {
            self.hits += 1;
            return hit;
        }
        self.misses += 1;
        let result = table.lookup_method(ty, method);
        self.dispatch.insert((ty, method.clone()), result);
        result
    }

    /// `x.(T)`: the payload for a concrete target, the interface itself for
    /// an interface target.
    pub fn assert(&mut self, table: &TypeTable, x: &Value, target: TypeId) -> Result<Value, Fault> {
        let iface = x.as_interface()?;
        let target_desc = table.get(target);
        let to_interface = target_desc.is_some_and(TypeDescriptor::is_interface);
        if iface.ty == TypeId::NIL {
            return Err(Fault::TypeAssertion(format!(
                "interface is nil, not {}",
                table.name(target)
            )));
        }
        if to_interface {
            if self.implements(table, iface.ty, target) {
                return Ok(x.clone());
            }
            let missing = table.missing_method(iface.ty, target).unwrap_or_default();
            return Err(Fault::TypeAssertion(format!(
                "{} is not {}: missing method {}",
                table.name(iface.ty),
                table.name(target),
                missing
            )));
        }
        if iface.ty == target {
            return Ok(iface.payload.clone());
        }
        Err(Fault::TypeAssertion(format!(
            "interface is {}, not {}",
            table.name(iface.ty),
            table.name(target)
        )))
    }

    /// `x.(T)` in comma-ok form: `(value, ok)`, never faults on mismatch.
    pub fn assert_ok(&mut self, table: &TypeTable, x: &Value, target: TypeId) -> Result<Value, Fault> {
        // Only a non-interface operand is a genuine error here.
        x.as_interface()?;
        Ok(match self.assert(table, x, target) {
            Ok(v) => Value::tuple(vec![v, Value::Bool(true)]),
            Err(_) => Value::tuple(vec![table.zero_value(target), Value::Bool(false)]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, kind: Kind) -> TypeDescriptor {
        TypeDescriptor {
            name: name.to_string(),
            kind,
            size: 8,
            align: 8,
            bits: 0,
            signed: false,
            elem: None,
            key: None,
            fields: Vec::new(),
            len: 0,
            methods: Vec::new(),
            interface_methods: Vec::new(),
            signature: String::new(),
            access: Access::Boxed(Value::Nil),
            zero: Value::Nil,
        }
    }

    fn method(name: &str, func: u32) -> MethodEntry {
        MethodEntry {
            name: Rc::from(name),
            signature: "func() ()".to_string(),
            func: FuncId(func),
        }
    }

    /// 0 nil, 1 Dog{Name, Speak}, 2 Rock{}, 3 Speaker{Speak}, 4 Named{Name}
    fn table() -> TypeTable {
        let mut dog = descriptor("Dog", Kind::Struct);
        dog.methods = vec![method("Name", 1), method("Speak", 2)];
        let rock = descriptor("Rock", Kind::Struct);
        let mut speaker = descriptor("Speaker", Kind::Interface);
        speaker.interface_methods = vec![("Speak".to_string(), "func() ()".to_string())];
        speaker.zero = Value::nil_interface();
        let mut named = descriptor("Named", Kind::Interface);
        named.interface_methods = vec![("Name".to_string(), "func() ()".to_string())];
        TypeTable::new(
            vec![descriptor("nil", Kind::Nil), dog, rock, speaker, named],
            TypeId::NIL,
        )
    }

    #[test]
    fn test_implements() {
        let t = table();
        assert!(t.implements(TypeId(1), TypeId(3)));
        assert!(t.implements(TypeId(1), TypeId(4)));
        assert!(!t.implements(TypeId(2), TypeId(3)));
        assert_eq!(t.missing_method(TypeId(2), TypeId(3)).as_deref(), Some("Speak"));
    }

    #[test]
    fn test_signature_mismatch_does_not_satisfy() {
        let mut t = table();
        t.types[1].methods[1].signature = "func(int) ()".to_string();
        assert!(!t.implements(TypeId(1), TypeId(3)));
    }

    #[test]
    fn test_dispatch_is_memoized() {
        let t = table();
        let mut cache = TypeCache::new(true);
        let speak: Rc<str> = Rc::from("Speak");
        assert_eq!(cache.dispatch(&t, TypeId(1), &speak), Some(FuncId(2)));
        assert_eq!(cache.dispatch(&t, TypeId(1), &speak), Some(FuncId(2)));
        assert_eq!(cache.dispatch(&t, TypeId(2), &speak), None);
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.misses, 2);
    }

    #[test]
    fn test_assertion_soundness() {
        let t = table();
        let mut cache = TypeCache::new(true);
        let dog = Value::interface(TypeId(1), Value::Int(7));

        assert_eq!(cache.assert(&t, &dog, TypeId(1)).unwrap(), Value::Int(7));
        assert_eq!(cache.assert(&t, &dog, TypeId(3)).unwrap(), dog);
        assert!(cache.assert(&t, &dog, TypeId(2)).is_err());

        let rock = Value::interface(TypeId(2), Value::Nil);
        let err = cache.assert(&t, &rock, TypeId(3)).unwrap_err();
        assert!(err.to_string().contains("missing method Speak"));

        let nil = Value::nil_interface();
        assert!(cache.assert(&t, &nil, TypeId(3)).is_err());
    }

    #[test]
    fn test_assert_ok_yields_zero_on_failure() {
        let t = table();
        let mut cache = TypeCache::new(false);
        let rock = Value::interface(TypeId(2), Value::Nil);
        let result = cache.assert_ok(&t, &rock, TypeId(3)).unwrap();
        assert_eq!(
            result,
            Value::tuple(vec![Value::nil_interface(), Value::Bool(false)])
        );
    }
}
