//! Byte-addressable memory.
//!
//! Every allocation is an [`Object`] in an arena: a zeroed byte buffer plus a
//! side table of reference slots. Scalars live in the bytes (little-endian);
//! values the byte buffer cannot hold (strings, slices, pointers, channels,
//! closures, interfaces) occupy an 8-byte slot whose content lives in the
//! side table. An absent slot reads as the type's zero value.
//!
//! Objects are never freed while the runtime lives.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::error::Fault;
use super::value::Value;
use super::wide::WideInt;

/// Index of an object in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

/// An address: object plus byte offset. Equality is `(object, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub obj: ObjectId,
    pub offset: u32,
}

impl Pointer {
    /// Derive an address inside the same object. Never allocates.
    pub fn addr(self, offset: u32) -> Pointer {
        Pointer {
            obj: self.obj,
            offset: self.offset + offset,
        }
    }

    /// Synthetic numeric address for printing.
    pub fn address(self) -> u64 {
        (((self.obj.0 as u64) + 1) << 20) + self.offset as u64
    }
}

/// A window `[start, end)` over a backing array with room up to `cap`.
///
/// `start`, `end` and `cap` count elements from `base`;
/// `0 <= start <= end <= cap` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub base: Option<Pointer>,
    pub start: u32,
    pub end: u32,
    pub cap: u32,
    pub elem_size: u32,
}

impl Slice {
    pub fn nil(elem_size: u32) -> Self {
        Self {
            base: None,
            start: 0,
            end: 0,
            cap: 0,
            elem_size,
        }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn capacity(&self) -> u32 {
        self.cap - self.start
    }

    /// `s[lo:hi:max]` with bounds relative to this slice.
    pub fn sub_slice(&self, lo: i64, hi: i64, max: Option<i64>) -> Result<Slice, Fault> {
        let cap = self.capacity() as i64;
        let max = max.unwrap_or(cap);
        if lo < 0 || hi < lo || max < hi || max > cap {
            return Err(Fault::SliceBounds {
                low: lo,
                high: hi,
                cap,
            });
        }
        Ok(Slice {
            base: self.base,
            start: self.start + lo as u32,
            end: self.start + hi as u32,
            cap: self.start + max as u32,
            elem_size: self.elem_size,
        })
    }

    /// Address of element `index`, range-checked against the length.
    pub fn element(&self, index: i64) -> Result<Pointer, Fault> {
        let len = self.len() as i64;
        if index < 0 || index >= len {
            return Err(Fault::IndexOutOfRange { index, len });
        }
        let base = self.base.ok_or(Fault::NilDereference)?;
        Ok(base.addr((self.start + index as u32) * self.elem_size))
    }

    /// Address of the first element of the window, if any storage exists.
    pub fn data(&self) -> Option<Pointer> {
        self.base.map(|b| b.addr(self.start * self.elem_size))
    }
}

/// Machine representation of a scalar stored in object bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// 64-bit integer as two 32-bit words, low word first
    Wide,
}

impl Scalar {
    pub fn size(self) -> u32 {
        match self {
            Scalar::Bool | Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 | Scalar::Wide => 8,
        }
    }
}

/// How a value of some type is read from and written to memory.
#[derive(Debug, Clone)]
pub enum Access {
    Scalar(Scalar),
    /// Reference slot; the payload is the zero value read from an empty slot
    Boxed(Value),
    /// Struct or array: each component at its byte offset
    Aggregate(Rc<[FieldAccess]>),
}

#[derive(Debug, Clone)]
pub struct FieldAccess {
    pub offset: u32,
    pub access: Access,
}

/// A single allocation.
#[derive(Debug, Default)]
pub struct Object {
    bytes: Vec<u8>,
    refs: BTreeMap<u32, Value>,
}

impl Object {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// The object arena.
#[derive(Debug, Default)]
pub struct Memory {
    objects: Vec<Object>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed object and return a pointer to its start.
    pub fn alloc(&mut self, size: u32) -> Pointer {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(Object {
            bytes: vec![0; size as usize],
            refs: BTreeMap::new(),
        });
        Pointer { obj: id, offset: 0 }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.objects.iter().map(Object::size).sum()
    }

    fn object(&self, ptr: Pointer) -> Result<&Object, Fault> {
        self.objects
            .get(ptr.obj.0 as usize)
            .ok_or(Fault::NilDereference)
    }

    fn object_mut(&mut self, ptr: Pointer) -> Result<&mut Object, Fault> {
        self.objects
            .get_mut(ptr.obj.0 as usize)
            .ok_or(Fault::NilDereference)
    }

    fn range(&self, ptr: Pointer, size: u32) -> Result<std::ops::Range<usize>, Fault> {
        let obj = self.object(ptr)?;
        let start = ptr.offset as usize;
        let end = start + size as usize;
        if end > obj.size() {
            return Err(Fault::BadAddress {
                offset: ptr.offset,
                size: obj.size(),
            });
        }
        Ok(start..end)
    }

    fn read<const N: usize>(&self, ptr: Pointer) -> Result<[u8; N], Fault> {
        let range = self.range(ptr, N as u32)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.object(ptr)?.bytes[range]);
        Ok(out)
    }

    fn write(&mut self, ptr: Pointer, data: &[u8]) -> Result<(), Fault> {
        let range = self.range(ptr, data.len() as u32)?;
        self.object_mut(ptr)?.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn get_bool(&self, ptr: Pointer) -> Result<bool, Fault> {
        Ok(self.read::<1>(ptr)?[0] != 0)
    }

    pub fn set_bool(&mut self, ptr: Pointer, v: bool) -> Result<(), Fault> {
        self.write(ptr, &[v as u8])
    }

    pub fn get_i8(&self, ptr: Pointer) -> Result<i8, Fault> {
        Ok(i8::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_u8(&self, ptr: Pointer) -> Result<u8, Fault> {
        Ok(self.read::<1>(ptr)?[0])
    }

    pub fn get_i16(&self, ptr: Pointer) -> Result<i16, Fault> {
        Ok(i16::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_u16(&self, ptr: Pointer) -> Result<u16, Fault> {
        Ok(u16::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_i32(&self, ptr: Pointer) -> Result<i32, Fault> {
        Ok(i32::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_u32(&self, ptr: Pointer) -> Result<u32, Fault> {
        Ok(u32::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_i64(&self, ptr: Pointer) -> Result<i64, Fault> {
        Ok(i64::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_f32(&self, ptr: Pointer) -> Result<f32, Fault> {
        Ok(f32::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_f64(&self, ptr: Pointer) -> Result<f64, Fault> {
        Ok(f64::from_le_bytes(self.read(ptr)?))
    }

    pub fn get_wide(&self, ptr: Pointer) -> Result<WideInt, Fault> {
        let lo = self.get_i32(ptr)?;
        let hi = self.get_i32(ptr.addr(4))?;
        Ok(WideInt::new(hi, lo))
    }

    pub fn set_i8(&mut self, ptr: Pointer, v: i8) -> Result<(), Fault> {
        self.write(ptr, &v.to_le_bytes())
    }

    pub fn set_i16(&mut self, ptr: Pointer, v: i16) -> Result<(), Fault> {
        self.write(ptr, &v.to_le_bytes())
    }

    pub fn set_i32(&mut self, ptr: Pointer, v: i32) -> Result<(), Fault> {
        self.write(ptr, &v.to_le_bytes())
    }

    pub fn set_i64(&mut self, ptr: Pointer, v: i64) -> Result<(), Fault> {
        self.write(ptr, &v.to_le_bytes())
    }

    pub fn set_f32(&mut self, ptr: Pointer, v: f32) -> Result<(), Fault> {
        self.write(ptr, &v.to_le_bytes())
    }

    pub fn set_f64(&mut self, ptr: Pointer, v: f64) -> Result<(), Fault> {
        self.write(ptr, &v.to_le_bytes())
    }

    pub fn set_wide(&mut self, ptr: Pointer, v: WideInt) -> Result<(), Fault> {
        self.set_i32(ptr, v.lo)?;
        self.set_i32(ptr.addr(4), v.hi)
    }

    /// Read a reference slot, falling back to `zero` when it was never set.
    pub fn get_ref(&self, ptr: Pointer, zero: &Value) -> Result<Value, Fault> {
        self.range(ptr, 8)?;
        Ok(self
            .object(ptr)?
            .refs
            .get(&ptr.offset)
            .cloned()
            .unwrap_or_else(|| zero.clone()))
    }

    pub fn set_ref(&mut self, ptr: Pointer, v: Value) -> Result<(), Fault> {
        self.range(ptr, 8)?;
        self.object_mut(ptr)?.refs.insert(ptr.offset, v);
        Ok(())
    }

    pub fn load_scalar(&self, ptr: Pointer, scalar: Scalar) -> Result<Value, Fault> {
        Ok(match scalar {
            Scalar::Bool => Value::Bool(self.get_bool(ptr)?),
            Scalar::I8 => Value::Int(self.get_i8(ptr)? as i64),
            Scalar::I16 => Value::Int(self.get_i16(ptr)? as i64),
            Scalar::I32 => Value::Int(self.get_i32(ptr)? as i64),
            Scalar::I64 | Scalar::U64 => Value::Int(self.get_i64(ptr)?),
            Scalar::U8 => Value::Int(self.get_u8(ptr)? as i64),
            Scalar::U16 => Value::Int(self.get_u16(ptr)? as i64),
            Scalar::U32 => Value::Int(self.get_u32(ptr)? as i64),
            Scalar::F32 => Value::Float(self.get_f32(ptr)? as f64),
            Scalar::F64 => Value::Float(self.get_f64(ptr)?),
            Scalar::Wide => Value::Wide(self.get_wide(ptr)?),
        })
    }

    pub fn store_scalar(&mut self, ptr: Pointer, scalar: Scalar, v: &Value) -> Result<(), Fault> {
        match scalar {
            Scalar::Bool => self.set_bool(ptr, v.as_bool()?),
            Scalar::I8 | Scalar::U8 => self.set_i8(ptr, v.as_int()? as i8),
            Scalar::I16 | Scalar::U16 => self.set_i16(ptr, v.as_int()? as i16),
            Scalar::I32 | Scalar::U32 => self.set_i32(ptr, v.as_int()? as i32),
            Scalar::I64 | Scalar::U64 => self.set_i64(ptr, v.as_int()?),
            Scalar::F32 => self.set_f32(ptr, v.as_float()? as f32),
            Scalar::F64 => self.set_f64(ptr, v.as_float()?),
            Scalar::Wide => self.set_wide(ptr, v.as_wide()?),
        }
    }

    /// Typed load following a precomputed access plan.
    pub fn load(&self, ptr: Pointer, access: &Access) -> Result<Value, Fault> {
        match access {
            Access::Scalar(s) => self.load_scalar(ptr, *s),
            Access::Boxed(zero) => self.get_ref(ptr, zero),
            Access::Aggregate(fields) => {
                let values = fields
                    .iter()
                    .map(|f| self.load(ptr.addr(f.offset), &f.access))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::tuple(values))
            }
        }
    }

    /// Typed store following a precomputed access plan.
    pub fn store(&mut self, ptr: Pointer, access: &Access, v: &Value) -> Result<(), Fault> {
        match access {
            Access::Scalar(s) => self.store_scalar(ptr, *s, v),
            Access::Boxed(_) => self.set_ref(ptr, v.clone()),
            Access::Aggregate(fields) => {
                let parts = v.as_tuple()?;
                if parts.len() != fields.len() {
                    return Err(Fault::mismatch("aggregate of matching arity", v));
                }
                for (field, part) in fields.iter().zip(parts.iter()) {
                    self.store(ptr.addr(field.offset), &field.access, part)?;
                }
                Ok(())
            }
        }
    }

    /// Copy `len` bytes and the reference slots within them. Ranges may overlap.
    pub fn copy(&mut self, dst: Pointer, src: Pointer, len: u32) -> Result<(), Fault> {
        if len == 0 {
            return Ok(());
        }
        let src_range = self.range(src, len)?;
        let dst_range = self.range(dst, len)?;
        let bytes = self.object(src)?.bytes[src_range].to_vec();
        let moved: Vec<(u32, Value)> = self
            .object(src)?
            .refs
            .range(src.offset..src.offset + len)
            .map(|(off, v)| (off - src.offset, v.clone()))
            .collect();
        let target = self.object_mut(dst)?;
        target.bytes[dst_range].copy_from_slice(&bytes);
        let stale: Vec<u32> = target
            .refs
            .range(dst.offset..dst.offset + len)
            .map(|(off, _)| *off)
            .collect();
        for off in stale {
            target.refs.remove(&off);
        }
        for (rel, v) in moved {
            target.refs.insert(dst.offset + rel, v);
        }
        Ok(())
    }

    pub fn read_bytes(&self, ptr: Pointer, len: u32) -> Result<Vec<u8>, Fault> {
        let range = self.range(ptr, len)?;
        Ok(self.object(ptr)?.bytes[range].to_vec())
    }

    pub fn write_bytes(&mut self, ptr: Pointer, data: &[u8]) -> Result<(), Fault> {
        self.write(ptr, data)
    }
}
