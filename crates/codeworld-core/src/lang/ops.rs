//! Operator semantics: arithmetic, membership, subscripts and slices.
//!
//! Integer arithmetic is 64-bit and checked; results that do not fit raise
//! `OverflowError` instead of wrapping.

use super::ast::{BinOp, UnaryOp};
use super::builtins::{collect_items, iterate};
use super::error::{ExcKind, RuntimeError, RuntimeResult};
use super::heap;
use super::value::{check_len, range_len, span_len, values_equal, OrderedMap, Value};

fn unsupported(op: BinOp, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Ints and bools participate in integer arithmetic; floats do not.
fn int_operand(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> RuntimeResult<Value> {
    if let (Some(x), Some(y)) = (int_operand(a), int_operand(b)) {
        if let (Value::Bool(p), Value::Bool(q)) = (a, b) {
            match op {
                BinOp::BitAnd => return Ok(Value::Bool(*p & *q)),
                BinOp::BitOr => return Ok(Value::Bool(*p | *q)),
                BinOp::BitXor => return Ok(Value::Bool(*p ^ *q)),
                _ => {}
            }
        }
        return int_op(op, x, y);
    }
    if a.is_number() && b.is_number() {
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Err(unsupported(op, a, b));
        };
        return float_op(op, x, y).map_err(|e| {
            if e.kind == ExcKind::TypeError {
                unsupported(op, a, b)
            } else {
                e
            }
        });
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_len(x.len() + y.len())?;
            heap::reserve((x.len() + y.len()).saturating_mul(2))?;
            let mut out = String::with_capacity(x.len() + y.len());
            out.push_str(x);
            out.push_str(y);
            Ok(Value::str(&out))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            check_len(x.len() + y.len())?;
            heap::reserve_items(x.len() + y.len())?;
            let mut out = Vec::with_capacity(x.len() + y.len());
            out.extend(x.iter().cloned());
            out.extend(y.iter().cloned());
            Ok(Value::list(out))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            check_len(x.len() + y.len())?;
            heap::reserve_items(x.len() + y.len())?;
            let mut out = x.as_ref().clone();
            out.extend(y.iter().cloned());
            Ok(Value::tuple(out))
        }
        (BinOp::Mult, seq, n) | (BinOp::Mult, n, seq)
            if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_))
                && int_operand(n).is_some() =>
        {
            repeat(seq, int_operand(n).unwrap_or(0))
        }
        (BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            let mut out = OrderedMap::new();
            match op {
                BinOp::Sub => {
                    for (k, _) in x.items() {
                        if !y.contains(k)? {
                            out.insert(k.clone(), Value::None)?;
                        }
                    }
                }
                BinOp::BitAnd => {
                    for (k, _) in x.items() {
                        if y.contains(k)? {
                            out.insert(k.clone(), Value::None)?;
                        }
                    }
                }
                BinOp::BitOr => {
                    for (k, _) in x.items().chain(y.items()) {
                        out.insert(k.clone(), Value::None)?;
                    }
                }
                _ => {
                    for (k, _) in x.items() {
                        if !y.contains(k)? {
                            out.insert(k.clone(), Value::None)?;
                        }
                    }
                    for (k, _) in y.items() {
                        if !x.contains(k)? {
                            out.insert(k.clone(), Value::None)?;
                        }
                    }
                }
            }
            Ok(Value::set(out))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut out = x.borrow().clone();
            let pairs: Vec<(Value, Value)> = y
                .borrow()
                .items()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (k, v) in pairs {
                out.insert(k, v)?;
            }
            Ok(Value::dict(out))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

fn repeat(seq: &Value, n: i64) -> RuntimeResult<Value> {
    let n = usize::try_from(n).unwrap_or(0);
    match seq {
        Value::Str(s) => {
            check_len(s.len().saturating_mul(n))?;
            heap::reserve(s.len().saturating_mul(n).saturating_mul(2))?;
            Ok(Value::str(&s.repeat(n)))
        }
        Value::List(items) => {
            let items = items.borrow();
            check_len(items.len().saturating_mul(n))?;
            heap::reserve_items(items.len().saturating_mul(n))?;
            Ok(Value::list(repeat_items(&items, n)))
        }
        Value::Tuple(items) => {
            check_len(items.len().saturating_mul(n))?;
            heap::reserve_items(items.len().saturating_mul(n))?;
            Ok(Value::tuple(repeat_items(items, n)))
        }
        other => Err(RuntimeError::type_error(format!(
            "can't multiply sequence of type '{}'",
            other.type_name()
        ))),
    }
}

fn repeat_items(items: &[Value], n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    out
}

fn int_op(op: BinOp, x: i64, y: i64) -> RuntimeResult<Value> {
    let overflow = RuntimeError::overflow;
    let int_zero = || RuntimeError::zero_division("integer division or modulo by zero");
    Ok(Value::Int(match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mult => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return Err(RuntimeError::zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(int_zero());
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(int_zero());
            }
            let r = x.wrapping_rem(y);
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(RuntimeError::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            match (x, u32::try_from(y)) {
                (0 | 1, _) if y > 0 => x,
                (_, _) if y == 0 => 1,
                (-1, _) => {
                    if y % 2 == 0 {
                        1
                    } else {
                        -1
                    }
                }
                (_, Ok(e)) => x.checked_pow(e).ok_or_else(overflow)?,
                (_, Err(_)) => return Err(overflow()),
            }
        }
        BinOp::LShift => {
            if y < 0 {
                return Err(RuntimeError::value_error("negative shift count"));
            }
            if x == 0 {
                0
            } else if y >= 64 {
                return Err(overflow());
            } else {
                let r = x << y;
                if r >> y != x {
                    return Err(overflow());
                }
                r
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(RuntimeError::value_error("negative shift count"));
            }
            if y >= 64 {
                if x < 0 {
                    -1
                } else {
                    0
                }
            } else {
                x >> y
            }
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
    }))
}

/// Floor division and modulo with the sign of the divisor.
fn float_divmod(x: f64, y: f64) -> (f64, f64) {
    let mut m = x % y;
    let mut div = (x - m) / y;
    if m != 0.0 {
        if (y < 0.0) != (m < 0.0) {
            m += y;
            div -= 1.0;
        }
    } else {
        m = 0.0f64.copysign(y);
    }
    let floordiv = if div != 0.0 {
        let f = div.floor();
        if div - f > 0.5 {
            f + 1.0
        } else {
            f
        }
    } else {
        0.0f64.copysign(x / y)
    };
    (floordiv, m)
}

fn float_op(op: BinOp, x: f64, y: f64) -> RuntimeResult<Value> {
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mult => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(RuntimeError::zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(RuntimeError::zero_division("float floor division by zero"));
            }
            float_divmod(x, y).0
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(RuntimeError::zero_division("float modulo"));
            }
            float_divmod(x, y).1
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(RuntimeError::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.is_finite() && y.fract() != 0.0 {
                return Err(RuntimeError::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(RuntimeError::new(
                    ExcKind::OverflowError,
                    "numerical result out of range",
                ));
            }
            r
        }
        _ => return Err(RuntimeError::type_error("unsupported operand")),
    }))
}

pub fn unary_op(op: UnaryOp, v: &Value) -> RuntimeResult<Value> {
    let bad = |sym: &str| {
        RuntimeError::type_error(format!(
            "bad operand type for unary {sym}: '{}'",
            v.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
        UnaryOp::Neg => match v {
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => match int_operand(v) {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(RuntimeError::overflow),
                None => Err(bad("-")),
            },
        },
        UnaryOp::Pos => match v {
            Value::Float(f) => Ok(Value::Float(*f)),
            _ => int_operand(v).map(Value::Int).ok_or_else(|| bad("+")),
        },
        UnaryOp::Invert => int_operand(v).map(|i| Value::Int(!i)).ok_or_else(|| bad("~")),
    }
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> RuntimeResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            other => Err(RuntimeError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(map) | Value::Set(map) => map.borrow().contains(item),
        Value::Range { start, stop, step } => {
            let n = match item {
                Value::Float(f) if f.fract() == 0.0 && f.is_finite() => *f as i64,
                other => match int_operand(other) {
                    Some(n) => n,
                    None => return Ok(false),
                },
            };
            let len = range_len(*start, *stop, *step);
            let offset = n as i128 - *start as i128;
            Ok(len > 0
                && offset % *step as i128 == 0
                && (0..len as i128).contains(&(offset / *step as i128)))
        }
        Value::Iterator(_) => {
            for v in iterate(container)? {
                if values_equal(&v, item) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(RuntimeError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Map a possibly negative index onto `0..len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let (index, len) = (index as i128, len as i128);
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

/// Evaluated bounds of a `[lower:upper:step]` subscript.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceSpec {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Resolve against a sequence length, clamping like CPython.
    pub fn indices(&self, len: usize) -> RuntimeResult<(i128, i128, i128)> {
        let step = self.step.unwrap_or(1) as i128;
        if step == 0 {
            return Err(RuntimeError::value_error("slice step cannot be zero"));
        }
        let len = len as i128;
        let adjust = |bound: Option<i64>, default: i128| match bound {
            None => default,
            Some(i) => {
                let mut i = i as i128;
                if i < 0 {
                    i += len;
                    if i < 0 {
                        i = if step < 0 { -1 } else { 0 };
                    }
                } else if i >= len {
                    i = if step < 0 { len - 1 } else { len };
                }
                i
            }
        };
        let (start, stop) = if step > 0 {
            (adjust(self.lower, 0), adjust(self.upper, len))
        } else {
            (adjust(self.lower, len - 1), adjust(self.upper, -1))
        };
        Ok((start, stop, step))
    }

    pub fn positions(&self, len: usize) -> RuntimeResult<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut out = Vec::with_capacity(span_len(start, stop, step));
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        Ok(out)
    }
}

fn index_of(container: &Value, index: &Value) -> RuntimeResult<i64> {
    int_operand(index).ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container.type_name(),
            index.type_name()
        ))
    })
}

fn chars_of(s: &str) -> Vec<char> {
    s.chars().collect()
}

pub fn get_item(container: &Value, index: &Value) -> RuntimeResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = index_of(container, index)?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| RuntimeError::index_error("list index out of range"))
        }
        Value::Tuple(items) => {
            let i = index_of(container, index)?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| RuntimeError::index_error("tuple index out of range"))
        }
        Value::Str(s) => {
            let i = index_of(container, index)?;
            let oob = || RuntimeError::index_error("string index out of range");
            if s.is_ascii() {
                let i = normalize_index(i, s.len()).ok_or_else(oob)?;
                return Ok(Value::str(&s[i..i + 1]));
            }
            let chars = chars_of(s);
            let i = normalize_index(i, chars.len()).ok_or_else(oob)?;
            Ok(Value::str(chars[i].encode_utf8(&mut [0; 4])))
        }
        Value::Dict(map) => map
            .borrow()
            .get(index)?
            .ok_or_else(|| RuntimeError::new(ExcKind::KeyError, index.repr())),
        Value::Range { start, stop, step } => {
            let i = index_of(container, index)?;
            let len = range_len(*start, *stop, *step);
            let i = normalize_index(i, len)
                .ok_or_else(|| RuntimeError::index_error("range object index out of range"))?;
            let v = *start as i128 + *step as i128 * i as i128;
            i64::try_from(v)
                .map(Value::Int)
                .map_err(|_| RuntimeError::overflow())
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn get_slice(container: &Value, spec: SliceSpec) -> RuntimeResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let pos = spec.positions(items.len())?;
            Ok(Value::list(pos.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let pos = spec.positions(items.len())?;
            Ok(Value::tuple(pos.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars = chars_of(s);
            let pos = spec.positions(chars.len())?;
            Ok(Value::str(&pos.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::Range { start, stop, step } => {
            let len = range_len(*start, *stop, *step);
            let (i, j, k) = spec.indices(len)?;
            let at = |n: i128| -> RuntimeResult<i64> {
                let v = *start as i128 + n * *step as i128;
                i64::try_from(v).map_err(|_| RuntimeError::overflow())
            };
            Ok(Value::Range {
                start: at(i)?,
                stop: at(j)?,
                step: i64::try_from(k * *step as i128)
                    .map_err(|_| RuntimeError::overflow())?,
            })
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, index: &Value, value: Value) -> RuntimeResult<()> {
    match container {
        Value::List(items) => {
            let i = index_of(container, index)?;
            let mut items = items.borrow_mut();
            let i = normalize_index(i, items.len())
                .ok_or_else(|| RuntimeError::index_error("list assignment index out of range"))?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(map) => map.borrow_mut().insert(index.clone(), value),
        other => Err(RuntimeError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn set_slice(container: &Value, spec: SliceSpec, value: &Value) -> RuntimeResult<()> {
    let Value::List(items) = container else {
        return Err(RuntimeError::type_error(format!(
            "'{}' object does not support slice assignment",
            container.type_name()
        )));
    };
    let replacement = collect_items(value)?;
    let mut items = items.borrow_mut();
    let (start, stop, step) = spec.indices(items.len())?;
    if step == 1 {
        let stop = stop.max(start) as usize;
        let start = start as usize;
        check_len(items.len() - (stop - start) + replacement.len())?;
        heap::reserve_items(replacement.len())?;
        items.splice(start..stop, replacement);
        return Ok(());
    }
    let pos = spec.positions(items.len())?;
    if pos.len() != replacement.len() {
        return Err(RuntimeError::value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            pos.len()
        )));
    }
    for (i, v) in pos.into_iter().zip(replacement) {
        items[i] = v;
    }
    Ok(())
}

pub fn del_item(container: &Value, index: &Value) -> RuntimeResult<()> {
    match container {
        Value::List(items) => {
            let i = index_of(container, index)?;
            let mut items = items.borrow_mut();
            let i = normalize_index(i, items.len())
                .ok_or_else(|| RuntimeError::index_error("list assignment index out of range"))?;
            items.remove(i);
            Ok(())
        }
        Value::Dict(map) => match map.borrow_mut().remove(index)? {
            Some(_) => Ok(()),
            None => Err(RuntimeError::new(ExcKind::KeyError, index.repr())),
        },
        other => Err(RuntimeError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

pub fn del_slice(container: &Value, spec: SliceSpec) -> RuntimeResult<()> {
    let Value::List(items) = container else {
        return Err(RuntimeError::type_error(format!(
            "'{}' object doesn't support item deletion",
            container.type_name()
        )));
    };
    let mut items = items.borrow_mut();
    let mut pos = spec.positions(items.len())?;
    pos.sort_unstable_by(|a, b| b.cmp(a));
    for i in pos {
        items.remove(i);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_follow_divisor_sign() {
        let cases = [(7, 2, 3, 1), (-7, 2, -4, 1), (7, -2, -4, -1), (-7, -2, 3, -1)];
        for (a, b, q, r) in cases {
            assert!(matches!(binary_op(BinOp::FloorDiv, &int(a), &int(b)).unwrap(), Value::Int(x) if x == q));
            assert!(matches!(binary_op(BinOp::Mod, &int(a), &int(b)).unwrap(), Value::Int(x) if x == r));
        }
        let Value::Float(m) = binary_op(BinOp::Mod, &Value::Float(-1.0), &int(3)).unwrap() else {
            panic!("expected float");
        };
        assert_eq!(m, 2.0);
    }

    #[test]
    fn test_true_division_always_yields_float() {
        assert!(matches!(binary_op(BinOp::Div, &int(6), &int(3)).unwrap(), Value::Float(f) if f == 2.0));
        let err = binary_op(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.kind, ExcKind::ZeroDivisionError);
    }

    #[test]
    fn test_integer_overflow_raises() {
        let err = binary_op(BinOp::Mult, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
        let err = binary_op(BinOp::Pow, &int(10), &int(30)).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
        assert!(matches!(binary_op(BinOp::Pow, &int(2), &int(10)).unwrap(), Value::Int(1024)));
        assert!(matches!(binary_op(BinOp::Pow, &int(2), &int(-1)).unwrap(), Value::Float(f) if f == 0.5));
    }

    #[test]
    fn test_sequence_operators() {
        let joined = binary_op(BinOp::Add, &Value::str("ab"), &Value::str("cd")).unwrap();
        assert_eq!(joined.to_display(), "abcd");
        let rep = binary_op(BinOp::Mult, &int(2), &Value::list(vec![int(1)])).unwrap();
        assert_eq!(rep.repr(), "[1, 1]");
        let err = binary_op(BinOp::Add, &int(1), &Value::str("a")).unwrap_err();
        assert!(err.message.contains("unsupported operand type(s) for +"));
    }

    #[test]
    fn test_huge_repeat_hits_memory_cap() {
        let err = binary_op(BinOp::Mult, &Value::list(vec![int(0)]), &int(10_000_000)).unwrap_err();
        assert_eq!(err.kind, ExcKind::MemoryError);
    }

    #[test]
    fn test_bool_bitwise_stays_bool() {
        assert!(matches!(
            binary_op(BinOp::BitAnd, &Value::Bool(true), &Value::Bool(false)).unwrap(),
            Value::Bool(false)
        ));
        assert!(matches!(binary_op(BinOp::Add, &Value::Bool(true), &Value::Bool(true)).unwrap(), Value::Int(2)));
    }

    #[test]
    fn test_slices_match_python_clamping() {
        let xs = Value::list((0..10).map(int).collect());
        let s = |lower, upper, step| SliceSpec { lower, upper, step };
        assert_eq!(get_slice(&xs, s(Some(2), Some(5), None)).unwrap().repr(), "[2, 3, 4]");
        assert_eq!(get_slice(&xs, s(None, None, Some(-3))).unwrap().repr(), "[9, 6, 3, 0]");
        assert_eq!(get_slice(&xs, s(Some(-2), Some(100), None)).unwrap().repr(), "[8, 9]");
        assert_eq!(get_slice(&Value::str("hello"), s(None, None, Some(-1))).unwrap().to_display(), "olleh");
        assert!(get_slice(&xs, s(None, None, Some(0))).is_err());
    }

    #[test]
    fn test_slice_assignment_and_deletion() {
        let xs = Value::list((0..5).map(int).collect());
        set_slice(&xs, SliceSpec { lower: Some(1), upper: Some(3), step: None }, &Value::list(vec![int(9)])).unwrap();
        assert_eq!(xs.repr(), "[0, 9, 3, 4]");
        del_slice(&xs, SliceSpec { lower: None, upper: None, step: Some(2) }).unwrap();
        assert_eq!(xs.repr(), "[9, 4]");
    }

    #[test]
    fn test_membership() {
        let r = Value::Range { start: 0, stop: 10, step: 3 };
        assert!(contains(&r, &int(9)).unwrap());
        assert!(!contains(&r, &int(4)).unwrap());
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::str("a"), &int(1)).is_err());
    }

    #[test]
    fn test_index_errors() {
        let xs = Value::list(vec![int(1)]);
        assert_eq!(get_item(&xs, &int(1)).unwrap_err().kind, ExcKind::IndexError);
        assert!(matches!(get_item(&xs, &int(-1)).unwrap(), Value::Int(1)));
        let d = Value::dict(OrderedMap::new());
        let err = get_item(&d, &Value::str("k")).unwrap_err();
        assert_eq!(err.kind, ExcKind::KeyError);
        assert_eq!(err.message, "'k'");
    }
}
