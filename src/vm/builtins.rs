//! Synchronous builtins and memory-backed conversions.
//!
//! Builtins never create a frame and never suspend.

use std::io::Write;

use super::error::Fault;
use super::memory::{Pointer, Slice};
use super::ops::{BuiltinOp, Conversion, Indexed};
use super::scheduler::Runtime;
use super::value::Value;
use super::arith;

impl Runtime {
    pub(super) fn builtin(&mut self, op: BuiltinOp, args: &[Value]) -> Result<Value, Fault> {
        match op {
            BuiltinOp::Len => self.len_of(arg(args, 0)?),
            BuiltinOp::Cap => self.cap_of(arg(args, 0)?),
            BuiltinOp::Append => self.append(arg(args, 0)?, arg(args, 1)?),
            BuiltinOp::Copy => self.copy_slice(arg(args, 0)?, arg(args, 1)?),
            BuiltinOp::Close => {
                self.close_channel(arg(args, 0)?)?;
                Ok(Value::Nil)
            }
            BuiltinOp::Print => {
                let mut text = Vec::new();
                for v in args {
                    push_printed(&mut text, v);
                }
                self.output.write_all(&text)?;
                Ok(Value::Nil)
            }
            BuiltinOp::Println => {
                let mut text = Vec::new();
                for (i, v) in args.iter().enumerate() {
                    if i > 0 {
                        text.push(b' ');
                    }
                    push_printed(&mut text, v);
                }
                text.push(b'\n');
                self.output.write_all(&text)?;
                Ok(Value::Nil)
            }
        }
    }

    fn len_of(&self, v: &Value) -> Result<Value, Fault> {
        let n = match v {
            Value::Str(s) => s.len() as i64,
            Value::Slice(s) => s.len() as i64,
            Value::Tuple(t) => t.len() as i64,
            Value::Chan(c) => self.channels[c.0 as usize].len() as i64,
            Value::Nil => 0,
            other => return Err(Fault::mismatch("value with a length", other)),
        };
        Ok(Value::Int(n))
    }

    fn cap_of(&self, v: &Value) -> Result<Value, Fault> {
        let n = match v {
            Value::Slice(s) => s.capacity() as i64,
            Value::Tuple(t) => t.len() as i64,
            Value::Chan(c) => self.channels[c.0 as usize].capacity() as i64,
            Value::Nil => 0,
            other => return Err(Fault::mismatch("value with a capacity", other)),
        };
        Ok(Value::Int(n))
    }

    pub(super) fn close_channel(&mut self, v: &Value) -> Result<(), Fault> {
        let id = v.as_chan()?.ok_or(Fault::CloseOfNil)?;
        self.channels[id.0 as usize].close()?;
        self.note_activity();
        Ok(())
    }

    /// Copy `n` elements from a slice or the bytes of a string to `dst`.
    fn copy_elements(&mut self, dst: Pointer, src: &Value, n: u32, elem_size: u32) -> Result<(), Fault> {
        match src {
            Value::Str(s) => self.memory.write_bytes(dst, &s[..n as usize]),
            other => {
                let src = other.as_slice()?;
                match src.data() {
                    Some(from) => self.memory.copy(dst, from, n * elem_size),
                    None => Ok(()),
                }
            }
        }
    }

    /// `append(s, t...)` where `t` is a slice or, for byte slices, a string.
    fn append(&mut self, s: &Value, t: &Value) -> Result<Value, Fault> {
        let s = s.as_slice()?;
        let (n, t_elem) = match t {
            Value::Str(st) => (st.len() as u32, 1),
            other => {
                let ts = other.as_slice()?;
                (ts.len(), ts.elem_size)
            }
        };
        if n == 0 {
            return Ok(Value::Slice(s));
        }
        let elem_size = if s.elem_size == 0 { t_elem } else { s.elem_size };
        let len = s.len();
        let new_len = len + n;
        if new_len <= s.capacity() {
            let grown = Slice {
                end: s.end + n,
                elem_size,
                ..s
            };
            let dst = grown.element(len as i64)?;
            self.copy_elements(dst, t, n, elem_size)?;
            return Ok(Value::Slice(grown));
        }
        let new_cap = new_len.max(s.capacity() * 2).max(4);
        let base = self.memory.alloc(new_cap * elem_size);
        if let Some(old) = s.data() {
            self.memory.copy(base, old, len * elem_size)?;
        }
        self.copy_elements(base.addr(len * elem_size), t, n, elem_size)?;
        Ok(Value::Slice(Slice {
            base: Some(base),
            start: 0,
            end: new_len,
            cap: new_cap,
            elem_size,
        }))
    }

    /// `copy(dst, src)`: returns the number of elements copied.
    fn copy_slice(&mut self, dst: &Value, src: &Value) -> Result<Value, Fault> {
        let dst = dst.as_slice()?;
        let src_len = match src {
            Value::Str(s) => s.len() as u32,
            other => other.as_slice()?.len(),
        };
        let n = dst.len().min(src_len);
        if n > 0 {
            if let Some(to) = dst.data() {
                self.copy_elements(to, src, n, dst.elem_size)?;
            }
        }
        Ok(Value::Int(n as i64))
    }

    /// Conversions that need memory; numeric ones go to [`arith`].
    pub(super) fn convert(&mut self, conv: Conversion, x: &Value) -> Result<Value, Fault> {
        match conv {
            Conversion::Identity => Ok(x.clone()),
            Conversion::Numeric { from, to } => arith::convert_numeric(from, to, x),
            Conversion::RuneToString { from } => arith::rune_to_string(from, x),
            Conversion::StringToBytes => {
                let bytes = x.as_bytes()?.to_vec();
                Ok(Value::Slice(self.slice_from(&bytes, 1)?))
            }
            Conversion::BytesToString => {
                let s = x.as_slice()?;
                let bytes = match s.data() {
                    Some(p) => self.memory.read_bytes(p, s.len())?,
                    None => Vec::new(),
                };
                Ok(Value::bytes(&bytes))
            }
            Conversion::StringToRunes => {
                // Invalid sequences decode as U+FFFD.
                let bytes: Vec<u8> = String::from_utf8_lossy(x.as_bytes()?)
                    .chars()
                    .flat_map(|c| (c as i32).to_le_bytes())
                    .collect();
                Ok(Value::Slice(self.slice_from(&bytes, 4)?))
            }
            Conversion::UnsignedText => Ok(Value::str(&match x {
                Value::Wide(w) => w.to_string_unsigned(),
                other => (other.as_int()? as u64).to_string(),
            })),
            Conversion::RunesToString => {
                let s = x.as_slice()?;
                let mut out = String::new();
                for i in 0..s.len() {
                    let r = self.memory.get_i32(s.element(i as i64)?)?;
                    out.push(
                        u32::try_from(r)
                            .ok()
                            .and_then(char::from_u32)
                            .unwrap_or('\u{FFFD}'),
                    );
                }
                Ok(Value::str(&out))
            }
        }
    }

    fn slice_from(&mut self, bytes: &[u8], elem_size: u32) -> Result<Slice, Fault> {
        let len = bytes.len() as u32 / elem_size;
        if len == 0 {
            return Ok(Slice::nil(elem_size));
        }
        let base = self.memory.alloc(bytes.len() as u32);
        self.memory.write_bytes(base, bytes)?;
        Ok(Slice {
            base: Some(base),
            start: 0,
            end: len,
            cap: len,
            elem_size,
        })
    }

    /// `make([]T, len, cap)`.
    pub(super) fn make_slice(&mut self, elem_size: u32, len: i64, cap: i64) -> Result<Value, Fault> {
        if len < 0 || cap < len || cap > u32::MAX as i64 / elem_size.max(1) as i64 {
            return Err(Fault::MakeSliceLen);
        }
        let base = self.memory.alloc(cap as u32 * elem_size);
        Ok(Value::Slice(Slice {
            base: Some(base),
            start: 0,
            end: len as u32,
            cap: cap as u32,
            elem_size,
        }))
    }

    /// `x[lo:hi:max]` over a slice, a pointer to an array, or a string.
    pub(super) fn slice_of(
        &mut self,
        x: &Value,
        of: Indexed,
        low: Option<i64>,
        high: Option<i64>,
        max: Option<i64>,
    ) -> Result<Value, Fault> {
        let lo = low.unwrap_or(0);
        match of {
            Indexed::String => {
                let s = x.as_bytes()?;
                let len = s.len() as i64;
                let hi = high.unwrap_or(len);
                if lo < 0 || hi < lo || hi > len {
                    return Err(Fault::SliceBounds {
                        low: lo,
                        high: hi,
                        cap: len,
                    });
                }
                Ok(Value::bytes(&s[lo as usize..hi as usize]))
            }
            Indexed::Slice => {
                let s = x.as_slice()?;
                let hi = high.unwrap_or(s.len() as i64);
                Ok(Value::Slice(s.sub_slice(lo, hi, max)?))
            }
            Indexed::Array { len, elem_size } => {
                let base = x.as_ptr()?;
                let whole = Slice {
                    base: Some(base),
                    start: 0,
                    end: len as u32,
                    cap: len as u32,
                    elem_size,
                };
                let hi = high.unwrap_or(len as i64);
                Ok(Value::Slice(whole.sub_slice(lo, hi, max)?))
            }
        }
    }
}

/// Strings print their bytes unchanged.
fn push_printed(out: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Str(s) => out.extend_from_slice(s),
        other => out.extend_from_slice(other.to_string().as_bytes()),
    }
}

fn arg(args: &[Value], i: usize) -> Result<&Value, Fault> {
    args.get(i).ok_or(Fault::TypeMismatch {
        expected: "builtin argument",
        found: format!("{} arguments", args.len()),
    })
}
