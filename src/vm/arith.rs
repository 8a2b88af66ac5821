//! Arithmetic, comparison and numeric conversion on register values.

use std::cmp::Ordering;

use super::error::Fault;
use super::ops::{ArithKind, NumKind, NumRepr};
use super::value::Value;
use super::wide::WideInt;
use crate::ssa::{BinOp, UnOp};

/// Wrap `v` to the width of `kind`, sign- or zero-extending into an `i64`.
pub fn normalize(v: i64, kind: NumKind) -> i64 {
    if kind.bits >= 64 {
        return v;
    }
    let shift = 64 - kind.bits as u32;
    if kind.signed {
        (v << shift) >> shift
    } else {
        ((v as u64) << shift >> shift) as i64
    }
}

fn round_float(v: f64, bits: u8) -> f64 {
    if bits == 32 { v as f32 as f64 } else { v }
}

/// A negative count of a signed type is a fault; an unsigned count with
/// the top bit set is just a count of at least 64.
fn shift_count(v: &Value, signed: bool) -> Result<u64, Fault> {
    match v {
        Value::Int(n) if signed && *n < 0 => Err(Fault::NegativeShift),
        Value::Int(n) => Ok(*n as u64),
        Value::Wide(w) if signed && w.is_negative() => Err(Fault::NegativeShift),
        Value::Wide(w) => Ok(w.to_u64()),
        other => Err(Fault::mismatch("shift count", other)),
    }
}

/// `x << y` or `x >> y`; counts of 64 or more shift every bit out.
pub fn shift(op: BinOp, kind: ArithKind, x: &Value, y: &Value, count_signed: bool) -> Result<Value, Fault> {
    let n = shift_count(y, count_signed)?;
    match kind {
        ArithKind::Int(k) => {
            let a = x.as_int()?;
            let v = match op {
                BinOp::Shl if n >= 64 => 0,
                BinOp::Shl => a << n,
                _ if k.signed => a >> n.min(63),
                _ if n >= 64 => 0,
                _ => ((a as u64) >> n) as i64,
            };
            Ok(Value::Int(normalize(v, k)))
        }
        ArithKind::Wide { signed } => {
            let a = x.as_wide()?;
            Ok(Value::Wide(match op {
                BinOp::Shl => a.shl(n),
                _ if signed => a.shr_signed(n),
                _ => a.shr_unsigned(n),
            }))
        }
        _ => Err(Fault::mismatch("integer operand", x)),
    }
}

fn compare(op: BinOp, ord: Ordering) -> bool {
    match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Le => ord != Ordering::Greater,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Ge => ord != Ordering::Less,
        _ => false,
    }
}

/// Binary operator on two operands of `kind`. Shift counts given here are
/// treated as signed.
pub fn binary(op: BinOp, kind: ArithKind, x: &Value, y: &Value) -> Result<Value, Fault> {
    if matches!(op, BinOp::Shl | BinOp::Shr) {
        return shift(op, kind, x, y, true);
    }
    match kind {
        ArithKind::Int(k) => int_binary(op, k, x.as_int()?, y),
        ArithKind::Wide { signed } => wide_binary(op, signed, x.as_wide()?, y),
        ArithKind::Float { bits } => float_binary(op, bits, x.as_float()?, y.as_float()?),
        ArithKind::Str => str_binary(op, x.as_bytes()?, y.as_bytes()?),
        ArithKind::Bool | ArithKind::Any => match op {
            BinOp::Eq => Ok(Value::Bool(x.equals(y))),
            BinOp::Ne => Ok(Value::Bool(!x.equals(y))),
            _ => Err(Fault::mismatch("comparable operands", x)),
        },
    }
}

fn int_binary(op: BinOp, k: NumKind, a: i64, y: &Value) -> Result<Value, Fault> {
    let b = y.as_int()?;
    if op.is_comparison() {
        let ord = if k.signed {
            a.cmp(&b)
        } else {
            (a as u64).cmp(&(b as u64))
        };
        return Ok(Value::Bool(compare(op, ord)));
    }
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(Fault::DivideByZero),
        BinOp::Div if k.signed => a.wrapping_div(b),
        BinOp::Div => ((a as u64) / (b as u64)) as i64,
        BinOp::Rem if k.signed => a.wrapping_rem(b),
        BinOp::Rem => ((a as u64) % (b as u64)) as i64,
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::AndNot => a & !b,
        _ => return Err(Fault::mismatch("integer operator", y)),
    };
    Ok(Value::Int(normalize(v, k)))
}

fn wide_binary(op: BinOp, signed: bool, a: WideInt, y: &Value) -> Result<Value, Fault> {
    let b = y.as_wide()?;
    if op.is_comparison() {
        let ord = if signed {
            a.cmp_signed(b)
        } else {
            a.cmp_unsigned(b)
        };
        return Ok(Value::Bool(compare(op, ord)));
    }
    let v = match op {
        BinOp::Add => a.add(b),
        BinOp::Sub => a.sub(b),
        BinOp::Mul => a.mul(b),
        BinOp::Div if signed => a.div_signed(b)?,
        BinOp::Div => a.div_unsigned(b)?,
        BinOp::Rem if signed => a.rem_signed(b)?,
        BinOp::Rem => a.rem_unsigned(b)?,
        BinOp::And => a.and(b),
        BinOp::Or => a.or(b),
        BinOp::Xor => a.xor(b),
        BinOp::AndNot => a.and_not(b),
        _ => return Err(Fault::mismatch("integer operator", y)),
    };
    Ok(Value::Wide(v))
}

fn float_binary(op: BinOp, bits: u8, a: f64, b: f64) -> Result<Value, Fault> {
    if op.is_comparison() {
        // NaN compares false except for `!=`.
        let result = match a.partial_cmp(&b) {
            Some(ord) => compare(op, ord),
            None => op == BinOp::Ne,
        };
        return Ok(Value::Bool(result));
    }
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        _ => return Err(Fault::mismatch("float operator", &Value::Float(b))),
    };
    Ok(Value::Float(round_float(v, bits)))
}

fn str_binary(op: BinOp, a: &[u8], b: &[u8]) -> Result<Value, Fault> {
    if op == BinOp::Add {
        return Ok(Value::bytes(&[a, b].concat()));
    }
    if op.is_comparison() {
        return Ok(Value::Bool(compare(op, a.cmp(b))));
    }
    Err(Fault::mismatch("string operator", &Value::bytes(b)))
}

pub fn unary(op: UnOp, kind: ArithKind, x: &Value) -> Result<Value, Fault> {
    match (op, kind) {
        (UnOp::Not, _) => Ok(Value::Bool(!x.as_bool()?)),
        (UnOp::Neg, ArithKind::Int(k)) => Ok(Value::Int(normalize(x.as_int()?.wrapping_neg(), k))),
        (UnOp::Neg, ArithKind::Wide { .. }) => Ok(Value::Wide(x.as_wide()?.neg())),
        (UnOp::Neg, ArithKind::Float { .. }) => Ok(Value::Float(-x.as_float()?)),
        (UnOp::Complement, ArithKind::Int(k)) => Ok(Value::Int(normalize(!x.as_int()?, k))),
        (UnOp::Complement, ArithKind::Wide { .. }) => Ok(Value::Wide(x.as_wide()?.not())),
        _ => Err(Fault::mismatch("numeric operand", x)),
    }
}

/// Numeric conversion between integer, wide and float representations.
pub fn convert_numeric(from: NumRepr, to: NumRepr, x: &Value) -> Result<Value, Fault> {
    Ok(match (from, to) {
        (NumRepr::Int(_), NumRepr::Int(k)) => Value::Int(normalize(x.as_int()?, k)),
        (NumRepr::Int(_), NumRepr::Wide { .. }) => Value::Wide(WideInt::from_i64(x.as_int()?)),
        (NumRepr::Wide { .. }, NumRepr::Int(k)) => {
            Value::Int(normalize(x.as_wide()?.to_i64(), k))
        }
        (NumRepr::Wide { .. }, NumRepr::Wide { .. }) => Value::Wide(x.as_wide()?),
        (NumRepr::Int(k), NumRepr::Float { bits }) => {
            let n = x.as_int()?;
            let f = if k.signed { n as f64 } else { n as u64 as f64 };
            Value::Float(round_float(f, bits))
        }
        (NumRepr::Wide { signed }, NumRepr::Float { bits }) => {
            Value::Float(round_float(x.as_wide()?.to_f64(signed), bits))
        }
        (NumRepr::Float { .. }, NumRepr::Int(k)) => {
            let f = x.as_float()?;
            let n = if k.signed { f as i64 } else { f as u64 as i64 };
            Value::Int(normalize(n, k))
        }
        (NumRepr::Float { .. }, NumRepr::Wide { signed }) => {
            Value::Wide(WideInt::from_f64(x.as_float()?, signed))
        }
        (NumRepr::Float { .. }, NumRepr::Float { bits }) => {
            Value::Float(round_float(x.as_float()?, bits))
        }
    })
}

/// `string(r)` for an integer rune; invalid code points become U+FFFD.
pub fn rune_to_string(from: NumRepr, x: &Value) -> Result<Value, Fault> {
    let n = match from {
        NumRepr::Wide { .. } => x.as_wide()?.to_i64(),
        _ => x.as_int()?,
    };
    let c = u32::try_from(n)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or('\u{FFFD}');
    Ok(Value::str(c.encode_utf8(&mut [0; 4])))
}
