//! Builds the runtime [`TypeTable`] from the front end's type declarations.
//!
//! Layout follows natural alignment: scalars are aligned to their size, and
//! every reference-like value (strings, slices, pointers, channels,
//! functions, interfaces) takes one 8-byte reference slot.

use std::rc::Rc;

use super::error::CompileError;
use crate::config::TargetConfig;
use crate::ssa::{TypeDecl, TypeId, TypeKind};
use crate::vm::types::{FieldLayout, Kind, MethodEntry, TypeDescriptor, TypeTable};
use crate::vm::{Access, FieldAccess, Scalar, Slice, Value, WideInt};

/// Name of the dynamic type given to runtime errors handed to `recover`.
pub const RUNTIME_ERROR: &str = "runtime.Error";

const REF_SIZE: u32 = 8;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Pending,
    InProgress,
    Done,
}

struct TableBuilder<'a> {
    decls: &'a [TypeDecl],
    target: &'a TargetConfig,
    out: Vec<Option<TypeDescriptor>>,
    marks: Vec<Mark>,
    /// Slice types whose element was still being laid out: `(slice, elem)`.
    unsized_slices: Vec<(TypeId, TypeId)>,
}

/// Round `n` up to a multiple of `align`.
pub fn align_to(n: u32, align: u32) -> u32 {
    let align = align.max(1);
    n.div_ceil(align) * align
}

/// Distance between consecutive elements of type `d`.
pub fn stride(d: &TypeDescriptor) -> u32 {
    align_to(d.size, d.align)
}

fn blank(decl: &TypeDecl, kind: Kind) -> TypeDescriptor {
    TypeDescriptor {
        name: decl.name.clone(),
        kind,
        size: REF_SIZE,
        align: REF_SIZE,
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

fn int_scalar(bits: u8, signed: bool, native_i64: bool) -> Option<Scalar> {
    Some(match (bits, signed) {
        (8, true) => Scalar::I8,
        (8, false) => Scalar::U8,
        (16, true) => Scalar::I16,
        (16, false) => Scalar::U16,
        (32, true) => Scalar::I32,
        (32, false) => Scalar::U32,
        (64, _) if !native_i64 => Scalar::Wide,
        (64, true) => Scalar::I64,
        (64, false) => Scalar::U64,
        _ => return None,
    })
}

impl<'a> TableBuilder<'a> {
    fn decl(&self, id: TypeId) -> Result<&'a TypeDecl, CompileError> {
        self.decls.get(id.index()).ok_or(CompileError::UnknownType {
            func: "<types>".to_string(),
            id,
        })
    }

    fn get(&mut self, id: TypeId) -> Result<&TypeDescriptor, CompileError> {
        self.build(id)?;
        self.out[id.index()]
            .as_ref()
            .ok_or_else(|| CompileError::UnknownType {
                func: "<types>".to_string(),
                id,
            })
    }

    fn build(&mut self, id: TypeId) -> Result<(), CompileError> {
        let decl = self.decl(id)?;
        match self.marks[id.index()] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(CompileError::Unassignable {
                    ty: decl.name.clone(),
                    detail: "type contains itself by value".to_string(),
                })
            }
            Mark::Pending => {}
        }
        // A slice is one reference slot whatever its element, so it may be
        // re-entered while that element is laid out.
        if !matches!(decl.ty, TypeKind::Slice { .. }) {
            self.marks[id.index()] = Mark::InProgress;
        }
        let desc = self.describe(id, decl)?;
        self.out[id.index()] = Some(desc);
        self.marks[id.index()] = Mark::Done;
        Ok(())
    }

    fn describe(&mut self, id: TypeId, decl: &'a TypeDecl) -> Result<TypeDescriptor, CompileError> {
        let mut d = match &decl.ty {
            TypeKind::Nil => blank(decl, Kind::Nil),
            TypeKind::Bool => TypeDescriptor {
                size: 1,
                align: 1,
                access: Access::Scalar(Scalar::Bool),
                zero: Value::Bool(false),
                ..blank(decl, Kind::Bool)
            },
            TypeKind::Int { bits, signed } => {
                let scalar = int_scalar(*bits, *signed, self.target.native_i64).ok_or_else(|| {
                    CompileError::Unassignable {
                        ty: decl.name.clone(),
                        detail: format!("unsupported integer width {}", bits),
                    }
                })?;
                let zero = if scalar == Scalar::Wide {
                    Value::Wide(WideInt::ZERO)
                } else {
                    Value::Int(0)
                };
                TypeDescriptor {
                    size: scalar.size(),
                    align: scalar.size(),
                    bits: *bits,
                    signed: *signed,
                    access: Access::Scalar(scalar),
                    zero,
                    ..blank(decl, Kind::Int)
                }
            }
            TypeKind::Float { bits } => {
                let scalar = if *bits == 32 { Scalar::F32 } else { Scalar::F64 };
                TypeDescriptor {
                    size: scalar.size(),
                    align: scalar.size(),
                    bits: *bits,
                    signed: true,
                    access: Access::Scalar(scalar),
                    zero: Value::Float(0.0),
                    ..blank(decl, Kind::Float)
                }
            }
            TypeKind::String => {
                let zero = Value::str("");
                TypeDescriptor {
                    access: Access::Boxed(zero.clone()),
                    zero,
                    ..blank(decl, Kind::String)
                }
            }
            TypeKind::Pointer { elem } => {
                // Element layout is resolved lazily; pointers may be recursive.
                self.decl(*elem)?;
                TypeDescriptor {
                    elem: Some(*elem),
                    ..blank(decl, Kind::Pointer)
                }
            }
            TypeKind::Slice { elem } => {
                self.decl(*elem)?;
                let elem_size = if self.marks[elem.index()] == Mark::InProgress {
                    self.unsized_slices.push((id, *elem));
                    0
                } else {
                    stride(self.get(*elem)?)
                };
                let zero = Value::Slice(Slice::nil(elem_size));
                TypeDescriptor {
                    elem: Some(*elem),
                    access: Access::Boxed(zero.clone()),
                    zero,
                    ..blank(decl, Kind::Slice)
                }
            }
            TypeKind::Chan { elem } => {
                self.decl(*elem)?;
                TypeDescriptor {
                    elem: Some(*elem),
                    ..blank(decl, Kind::Chan)
                }
            }
            TypeKind::Func { params, results } => TypeDescriptor {
                signature: self.signature(params, results)?,
                ..blank(decl, Kind::Func)
            },
            TypeKind::Interface { methods } => {
                let mut required = methods
                    .iter()
                    .map(|m| Ok((m.name.clone(), self.method_signature(m.sig)?)))
                    .collect::<Result<Vec<_>, CompileError>>()?;
                required.sort();
                let zero = Value::nil_interface();
                TypeDescriptor {
                    interface_methods: required,
                    access: Access::Boxed(zero.clone()),
                    zero,
                    ..blank(decl, Kind::Interface)
                }
            }
            TypeKind::Array { elem, len } => {
                let e = self.get(*elem)?;
                let (step, align) = (stride(e), e.align);
                let (access, zero) = (e.access.clone(), e.zero.clone());
                let count = u32::try_from(*len)
                    .ok()
                    .filter(|n| n.checked_mul(step).is_some())
                    .ok_or_else(|| CompileError::Unassignable {
                        ty: decl.name.clone(),
                        detail: format!("array length {} is too large", len),
                    })?;
                let parts: Vec<FieldAccess> = (0..count)
                    .map(|i| FieldAccess {
                        offset: i * step,
                        access: access.clone(),
                    })
                    .collect();
                TypeDescriptor {
                    size: count * step,
                    align,
                    elem: Some(*elem),
                    len: *len,
                    access: Access::Aggregate(Rc::from(parts)),
                    zero: Value::tuple(vec![zero; count as usize]),
                    ..blank(decl, Kind::Array)
                }
            }
            TypeKind::Struct { fields } => {
                let members: Vec<(String, TypeId)> =
                    fields.iter().map(|f| (f.name.clone(), f.ty)).collect();
                self.aggregate(decl, Kind::Struct, &members)?
            }
            TypeKind::Tuple { elems } => {
                let members: Vec<(String, TypeId)> = elems
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (i.to_string(), *t))
                    .collect();
                self.aggregate(decl, Kind::Tuple, &members)?
            }
        };
        d.methods = self.method_table(decl)?;
        Ok(d)
    }

    fn aggregate(
        &mut self,
        decl: &TypeDecl,
        kind: Kind,
        members: &[(String, TypeId)],
    ) -> Result<TypeDescriptor, CompileError> {
        let mut offset = 0;
        let mut align = 1;
        let mut layout = Vec::with_capacity(members.len());
        let mut parts = Vec::with_capacity(members.len());
        let mut zeros = Vec::with_capacity(members.len());
        for (name, ty) in members {
            let f = self.get(*ty)?;
            offset = align_to(offset, f.align);
            align = align.max(f.align);
            layout.push(FieldLayout {
                name: name.clone(),
                ty: *ty,
                offset,
            });
            parts.push(FieldAccess {
                offset,
                access: f.access.clone(),
            });
            zeros.push(f.zero.clone());
            offset += f.size;
        }
        Ok(TypeDescriptor {
            size: align_to(offset, align),
            align,
            fields: layout,
            access: Access::Aggregate(Rc::from(parts)),
            zero: Value::tuple(zeros),
            ..blank(decl, kind)
        })
    }

    /// Canonical text of a function type: `func(p1,p2)(r1)`.
    fn signature(&self, params: &[TypeId], results: &[TypeId]) -> Result<String, CompileError> {
        let names = |ids: &[TypeId]| -> Result<String, CompileError> {
            Ok(ids
                .iter()
                .map(|t| self.decl(*t).map(|d| d.name.as_str()))
                .collect::<Result<Vec<_>, _>>()?
                .join(","))
        };
        Ok(format!("func({})({})", names(params)?, names(results)?))
    }

    fn method_signature(&self, sig: TypeId) -> Result<String, CompileError> {
        match &self.decl(sig)?.ty {
            TypeKind::Func { params, results } => self.signature(params, results),
            _ => Err(CompileError::Unassignable {
                ty: self.decl(sig)?.name.clone(),
                detail: "method signature is not a function type".to_string(),
            }),
        }
    }

    fn method_table(&self, decl: &TypeDecl) -> Result<Vec<MethodEntry>, CompileError> {
        let mut methods = decl
            .methods
            .iter()
            .map(|m| {
                Ok(MethodEntry {
                    name: Rc::from(m.name.as_str()),
                    signature: self.method_signature(m.sig)?,
                    func: m.func,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        methods.sort_by(|a, b| (&a.name, &a.signature).cmp(&(&b.name, &b.signature)));
        Ok(methods)
    }
}

/// Lay out every declared type and append the runtime error type if the
/// front end did not declare one.
pub fn build_type_table(decls: &[TypeDecl], target: &TargetConfig) -> Result<TypeTable, CompileError> {
    let mut builder = TableBuilder {
        decls,
        target,
        out: vec![None; decls.len()],
        marks: vec![Mark::Pending; decls.len()],
        unsized_slices: Vec::new(),
    };
    for i in 0..decls.len() {
        builder.build(TypeId(i as u32))?;
    }
    // Copies of these zeros inside enclosing aggregates keep a zero stride;
    // `append` takes the stride from its other operand in that case.
    for (slice, elem) in std::mem::take(&mut builder.unsized_slices) {
        let elem_size = stride(builder.get(elem)?);
        if let Some(d) = builder.out[slice.index()].as_mut() {
            let zero = Value::Slice(Slice::nil(elem_size));
            d.access = Access::Boxed(zero.clone());
            d.zero = zero;
        }
    }
    let mut types: Vec<TypeDescriptor> = builder.out.into_iter().flatten().collect();
    let runtime_error_ty = match types.iter().position(|t| t.name == RUNTIME_ERROR) {
        Some(i) => TypeId(i as u32),
        None => {
            let decl = TypeDecl {
                name: RUNTIME_ERROR.to_string(),
                ty: TypeKind::String,
                methods: Vec::new(),
            };
            let zero = Value::str("");
            types.push(TypeDescriptor {
                access: Access::Boxed(zero.clone()),
                zero,
                ..blank(&decl, Kind::String)
            });
            TypeId((types.len() - 1) as u32)
        }
    };
    Ok(TypeTable::new(types, runtime_error_ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssa::ProgramBuilder;

    fn table(b: ProgramBuilder, native_i64: bool) -> TypeTable {
        let program = b.finish();
        let target = TargetConfig {
            native_i64,
            ..TargetConfig::default()
        };
        build_type_table(&program.types, &target).unwrap()
    }

    #[test]
    fn test_struct_layout_aligns_fields() {
        let mut b = ProgramBuilder::new();
        let byte = b.int_of(8, false);
        let int = b.int_type();
        let s = b.string_type();
        let point = b.structure("T", &[("a", byte), ("b", int), ("c", s)]);
        let t = table(b, true);
        let d = t.get(point).unwrap();
        let offsets: Vec<u32> = d.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(d.size, 24);
        assert_eq!(d.zero, Value::tuple(vec![Value::Int(0), Value::Int(0), Value::str("")]));
    }

    #[test]
    fn test_array_stride_and_zero() {
        let mut b = ProgramBuilder::new();
        let i32t = b.int_of(32, true);
        let arr = b.array(i32t, 3);
        let t = table(b, true);
        let d = t.get(arr).unwrap();
        assert_eq!(d.size, 12);
        assert_eq!(d.len, 3);
        assert!(matches!(&d.access, Access::Aggregate(parts) if parts[2].offset == 8));
    }

    #[test]
    fn test_wide_ints_when_not_native() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let t = table(b, false);
        let d = t.get(int).unwrap();
        assert!(matches!(d.access, Access::Scalar(Scalar::Wide)));
        assert!(matches!(d.zero, Value::Wide(_)));
    }

    #[test]
    fn test_methods_sorted_and_runtime_error_appended() {
        let mut b = ProgramBuilder::new();
        let s = b.string_type();
        let sig = b.func_type(&[], &[s]);
        let f = b.declare("T.String", &[], &[s]);
        let g = b.declare("T.Name", &[], &[s]);
        let ty = b.structure("T", &[]);
        b.add_method(ty, "String", sig, f);
        b.add_method(ty, "Name", sig, g);
        let stringer = b.interface("Stringer", &[("String", sig)]);
        let t = table(b, true);
        let names: Vec<&str> = t.get(ty).unwrap().methods.iter().map(|m| m.name.as_ref()).collect();
        assert_eq!(names, vec!["Name", "String"]);
        assert!(t.implements(ty, stringer));
        assert_eq!(t.name(t.runtime_error_ty), RUNTIME_ERROR);
    }

    #[test]
    fn test_recursive_value_type_is_rejected() {
        let mut b = ProgramBuilder::new();
        let node = b.named("Node", TypeKind::Struct { fields: Vec::new() });
        let mut program = b.finish();
        program.types[node.index()].ty = TypeKind::Struct {
            fields: vec![crate::ssa::FieldDecl {
                name: "next".to_string(),
                ty: node,
            }],
        };
        let err = build_type_table(&program.types, &TargetConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::Unassignable { .. }));
    }

    #[test]
    fn test_pointer_may_refer_to_itself() {
        let mut b = ProgramBuilder::new();
        let node = b.named("Node", TypeKind::Struct { fields: Vec::new() });
        let ptr = b.pointer(node);
        let mut program = b.finish();
        program.types[node.index()].ty = TypeKind::Struct {
            fields: vec![crate::ssa::FieldDecl {
                name: "next".to_string(),
                ty: ptr,
            }],
        };
        let t = build_type_table(&program.types, &TargetConfig::default()).unwrap();
        assert_eq!(t.get(node).unwrap().size, 8);
    }

    #[test]
    fn test_struct_may_hold_a_slice_of_itself() {
        let mut b = ProgramBuilder::new();
        let int = b.int_type();
        let node = b.named("Node", TypeKind::Struct { fields: Vec::new() });
        let children = b.slice(node);
        let mut program = b.finish();
        program.types[node.index()].ty = TypeKind::Struct {
            fields: vec![
                crate::ssa::FieldDecl {
                    name: "value".to_string(),
                    ty: int,
                },
                crate::ssa::FieldDecl {
                    name: "children".to_string(),
                    ty: children,
                },
            ],
        };
        let t = build_type_table(&program.types, &TargetConfig::default()).unwrap();
        let d = t.get(node).unwrap();
        assert_eq!(d.size, 16);
        assert_eq!(d.fields[1].offset, 8);
        assert_eq!(t.get(children).unwrap().zero, Value::Slice(Slice::nil(16)));
    }

    #[test]
    fn test_slice_declared_before_its_recursive_element() {
        let mut b = ProgramBuilder::new();
        let placeholder = b.int_type();
        let children = b.named("[]Node", TypeKind::Slice { elem: placeholder });
        let node = b.named("Node", TypeKind::Struct { fields: Vec::new() });
        let mut program = b.finish();
        program.types[children.index()].ty = TypeKind::Slice { elem: node };
        program.types[node.index()].ty = TypeKind::Struct {
            fields: vec![crate::ssa::FieldDecl {
                name: "children".to_string(),
                ty: children,
            }],
        };
        let t = build_type_table(&program.types, &TargetConfig::default()).unwrap();
        assert_eq!(t.get(node).unwrap().size, 8);
        assert_eq!(t.get(children).unwrap().zero, Value::Slice(Slice::nil(8)));
    }
}
