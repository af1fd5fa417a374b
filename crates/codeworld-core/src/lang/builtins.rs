//! Builtin functions, the `math` module, and methods on the core container
//! types.

use std::rc::Rc;

use super::ast::BinOp;
use super::error::{ExcKind, RuntimeError, RuntimeResult};
use super::heap;
use super::interpreter::Interpreter;
use super::ops::{binary_op, normalize_index};
use super::value::{
    check_len, less_than, range_len, values_equal, BoundMethod, Builtin, MathFn,
    NativeModule, OrderedMap, Value, MAX_SEQUENCE_LEN,
};

pub type Kwargs = Vec<(String, Value)>;

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

/// Iterator over any iterable value. Ranges are produced lazily; other
/// containers are snapshotted when iteration starts.
pub enum ValueIter {
    Range { next: i64, remaining: usize, step: i64 },
    Items(std::vec::IntoIter<Value>),
    Shared(Rc<std::cell::RefCell<std::collections::VecDeque<Value>>>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let current = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Some(Value::Int(current))
            }
            ValueIter::Items(items) => items.next(),
            ValueIter::Shared(queue) => queue.borrow_mut().pop_front(),
        }
    }
}

pub fn iterate(value: &Value) -> RuntimeResult<ValueIter> {
    Ok(match value {
        Value::Range { start, stop, step } => ValueIter::Range {
            next: *start,
            remaining: range_len(*start, *stop, *step),
            step: *step,
        },
        Value::List(items) => {
            let items = items.borrow();
            heap::reserve_items(items.len())?;
            ValueIter::Items(items.clone().into_iter())
        }
        Value::Tuple(items) => {
            heap::reserve_items(items.len())?;
            ValueIter::Items(items.as_ref().clone().into_iter())
        }
        Value::Str(s) => ValueIter::Items(
            s.chars()
                .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Dict(map) | Value::Set(map) => ValueIter::Items(map.borrow().keys().into_iter()),
        Value::Iterator(queue) => ValueIter::Shared(queue.clone()),
        other => {
            return Err(RuntimeError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    })
}

/// Materialize an iterable, enforcing the sequence cap.
pub fn collect_items(value: &Value) -> RuntimeResult<Vec<Value>> {
    let mut out = Vec::new();
    if let Value::Range { start, stop, step } = value {
        let len = range_len(*start, *stop, *step);
        check_len(len)?;
        heap::reserve_items(len)?;
        out.reserve_exact(len);
    }
    for item in iterate(value)? {
        if out.len() >= MAX_SEQUENCE_LEN {
            check_len(out.len() + 1)?;
        }
        heap::reserve_growth::<Value>(out.len(), out.capacity())?;
        out.push(item);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RuntimeResult<()> {
    if args.len() < min || args.len() > max {
        let (qualifier, count) = if min == max {
            ("exactly", min)
        } else if args.len() < min {
            ("at least", min)
        } else {
            ("at most", max)
        };
        let noun = if count == 1 { "argument" } else { "arguments" };
        return Err(RuntimeError::type_error(format!(
            "{name}() takes {qualifier} {count} {noun} ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn take_kw(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let pos = kwargs.iter().position(|(k, _)| k == name)?;
    Some(kwargs.remove(pos).1)
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> RuntimeResult<()> {
    match kwargs.first() {
        Some((k, _)) => Err(RuntimeError::type_error(format!(
            "{name}() got an unexpected keyword argument '{k}'"
        ))),
        None => Ok(()),
    }
}

fn int_arg(name: &str, v: &Value) -> RuntimeResult<i64> {
    v.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{name}(): '{}' object cannot be interpreted as an integer",
            v.type_name()
        ))
    })
}

fn float_arg(name: &str, v: &Value) -> RuntimeResult<f64> {
    v.as_f64().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{name}(): must be real number, not {}",
            v.type_name()
        ))
    })
}

fn str_arg<'a>(name: &str, v: &'a Value) -> RuntimeResult<&'a str> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(RuntimeError::type_error(format!(
            "{name}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn domain_error() -> RuntimeError {
    RuntimeError::value_error("math domain error")
}

fn float_to_int(f: f64) -> RuntimeResult<i64> {
    if f.is_nan() {
        return Err(RuntimeError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(RuntimeError::new(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    if f < -9.223_372_036_854_776e18 || f >= 9.223_372_036_854_776e18 {
        return Err(RuntimeError::overflow());
    }
    Ok(f as i64)
}

// ---------------------------------------------------------------------------
// Builtin dispatch
// ---------------------------------------------------------------------------

pub fn call_builtin(
    interp: &mut Interpreter,
    builtin: Builtin,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> RuntimeResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Abs => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => match v.as_int() {
                    Some(i) => i.checked_abs().map(Value::Int).ok_or_else(RuntimeError::overflow),
                    None => Err(RuntimeError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        v.type_name()
                    ))),
                },
            }
        }
        Builtin::Min | Builtin::Max => {
            let key = take_kw(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
            let default = take_kw(&mut kwargs, "default");
            no_kwargs(name, &kwargs)?;
            if args.is_empty() {
                return Err(RuntimeError::type_error(format!(
                    "{name} expected at least 1 argument, got 0"
                )));
            }
            let items = if args.len() == 1 {
                collect_items(&args[0])?
            } else {
                if default.is_some() {
                    return Err(RuntimeError::type_error(format!(
                        "Cannot specify a default for {name}() with multiple positional arguments"
                    )));
                }
                args
            };
            extreme(interp, name, items, key, default, builtin == Builtin::Max)
        }
        Builtin::Sum => {
            let start = take_kw(&mut kwargs, "start");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 2)?;
            let mut total = match (args.get(1).cloned(), start) {
                (Some(v), None) | (None, Some(v)) => v,
                (None, None) => Value::Int(0),
                (Some(_), Some(_)) => {
                    return Err(RuntimeError::type_error(
                        "sum() got multiple values for argument 'start'",
                    ))
                }
            };
            if matches!(total, Value::Str(_)) {
                return Err(RuntimeError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            for item in iterate(&args[0])? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Len => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(l) => l.borrow().len(),
                Value::Tuple(t) => t.len(),
                Value::Dict(m) | Value::Set(m) => m.borrow().len(),
                Value::Range { start, stop, step } => range_len(*start, *stop, *step),
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            i64::try_from(len).map(Value::Int).map_err(|_| {
                RuntimeError::new(
                    ExcKind::OverflowError,
                    "length does not fit in a 64-bit integer",
                )
            })
        }
        Builtin::Float => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
                    RuntimeError::type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Int => {
            let base = take_kw(&mut kwargs, "base");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 2)?;
            let base = match (args.get(1).cloned(), base) {
                (Some(b), None) | (None, Some(b)) => Some(int_arg(name, &b)?),
                (None, None) => None,
                (Some(_), Some(_)) => {
                    return Err(RuntimeError::type_error(
                        "int() got multiple values for argument 'base'",
                    ))
                }
            };
            match (args.first(), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => parse_int(s, base.unwrap_or(10)).map(Value::Int),
                (Some(_), Some(_)) => Err(RuntimeError::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Some(Value::Float(f)), None) => float_to_int(f.trunc()).map(Value::Int),
                (Some(v), None) => v.as_int().map(Value::Int).ok_or_else(|| {
                    RuntimeError::type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Bool => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        Builtin::Round => {
            let nd_kw = take_kw(&mut kwargs, "ndigits");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 2)?;
            let ndigits = match args.get(1).cloned().or(nd_kw) {
                None | Some(Value::None) => None,
                Some(v) => Some(int_arg(name, &v)?),
            };
            round(&args[0], ndigits)
        }
        Builtin::Range => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 3)?;
            let ints = args
                .iter()
                .map(|a| {
                    a.as_int().ok_or_else(|| {
                        RuntimeError::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            a.type_name()
                        ))
                    })
                })
                .collect::<RuntimeResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(RuntimeError::type_error("range expected at most 3 arguments")),
            };
            if step == 0 {
                return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::Enumerate => {
            let start_kw = take_kw(&mut kwargs, "start");
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or(start_kw.as_ref()) {
                Some(v) => int_arg(name, v)?,
                None => 0,
            };
            let mut out = Vec::new();
            for (i, item) in iterate(&args[0])?.enumerate() {
                check_len(i + 1)?;
                heap::reserve_growth::<Value>(out.len(), out.capacity())?;
                let idx = start.checked_add(i as i64).ok_or_else(RuntimeError::overflow)?;
                out.push(Value::tuple(vec![Value::Int(idx), item]));
            }
            Ok(Value::iterator(out))
        }
        Builtin::Zip => {
            no_kwargs(name, &kwargs)?;
            let mut iters = args.iter().map(iterate).collect::<RuntimeResult<Vec<_>>>()?;
            let mut out = Vec::new();
            if iters.is_empty() {
                return Ok(Value::iterator(out));
            }
            'rows: loop {
                let mut row = Vec::with_capacity(iters.len());
                for it in iters.iter_mut() {
                    match it.next() {
                        Some(v) => row.push(v),
                        None => break 'rows,
                    }
                }
                check_len(out.len() + 1)?;
                heap::reserve_growth::<Value>(out.len(), out.capacity())?;
                out.push(Value::tuple(row));
            }
            Ok(Value::iterator(out))
        }
        Builtin::Map => {
            no_kwargs(name, &kwargs)?;
            if args.len() < 2 {
                return Err(RuntimeError::type_error("map() must have at least two arguments."));
            }
            let func = args[0].clone();
            let mut iters = args[1..]
                .iter()
                .map(iterate)
                .collect::<RuntimeResult<Vec<_>>>()?;
            let mut out = Vec::new();
            'rows: loop {
                let mut row = Vec::with_capacity(iters.len());
                for it in iters.iter_mut() {
                    match it.next() {
                        Some(v) => row.push(v),
                        None => break 'rows,
                    }
                }
                check_len(out.len() + 1)?;
                heap::reserve_growth::<Value>(out.len(), out.capacity())?;
                out.push(interp.call_value(&func, row, Vec::new())?);
            }
            Ok(Value::iterator(out))
        }
        Builtin::Filter => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 2, 2)?;
            let mut out = Vec::new();
            for item in iterate(&args[1])? {
                let keep = match &args[0] {
                    Value::None => item.truthy(),
                    f => interp.call_value(f, vec![item.clone()], Vec::new())?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::iterator(out))
        }
        Builtin::Math(f) => call_math(f, args, kwargs),
    }
}

fn extreme(
    interp: &mut Interpreter,
    name: &str,
    items: Vec<Value>,
    key: Option<Value>,
    default: Option<Value>,
    is_max: bool,
) -> RuntimeResult<Value> {
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call_value(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) if is_max => less_than(best_key, &k)?,
            Some((best_key, _)) => less_than(&k, best_key)?,
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(RuntimeError::value_error(format!(
            "{name}() arg is an empty sequence"
        ))),
    }
}

fn round(value: &Value, ndigits: Option<i64>) -> RuntimeResult<Value> {
    match (value, ndigits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Value::Float(f), Some(nd)) => {
            if !f.is_finite() || nd > 300 {
                return Ok(Value::Float(*f));
            }
            if nd >= 0 {
                let text = format!("{:.*}", nd as usize, f);
                Ok(Value::Float(text.parse().unwrap_or(*f)))
            } else {
                let scale = 10f64.powi((-nd).min(308) as i32);
                Ok(Value::Float((f / scale).round_ties_even() * scale))
            }
        }
        (v, nd) => {
            let Some(i) = v.as_int() else {
                return Err(RuntimeError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    v.type_name()
                )));
            };
            match nd {
                Some(nd) if nd < 0 => {
                    if nd < -18 {
                        return Ok(Value::Int(0));
                    }
                    let scale = 10i64.pow((-nd) as u32);
                    let q = i.div_euclid(scale);
                    let r = i.rem_euclid(scale);
                    let q = match (2 * (r as i128)).cmp(&(scale as i128)) {
                        std::cmp::Ordering::Greater => q + 1,
                        std::cmp::Ordering::Equal if q % 2 != 0 => q + 1,
                        _ => q,
                    };
                    q.checked_mul(scale).map(Value::Int).ok_or_else(RuntimeError::overflow)
                }
                _ => Ok(Value::Int(i)),
            }
        }
    }
}

pub fn parse_int(text: &str, base: i64) -> RuntimeResult<i64> {
    let invalid = || {
        RuntimeError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    if !(base == 0 || (2..=36).contains(&base)) {
        return Err(RuntimeError::value_error(
            "int() base must be >= 2 and <= 36, or 0",
        ));
    }
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits, prefixed) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &body[2..], true),
        (0 | 8, Some("0o")) => (8, &body[2..], true),
        (0 | 2, Some("0b")) => (2, &body[2..], true),
        (0, _) => (10, body, false),
        (b, _) => (b as u32, body, false),
    };
    let digits = if prefixed {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let clean: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = u64::from_str_radix(&clean, radix).map_err(|_| invalid())?;
    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            return Err(RuntimeError::overflow());
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        i64::try_from(magnitude).map_err(|_| RuntimeError::overflow())
    }
}

pub fn parse_float(text: &str) -> RuntimeResult<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.strip_prefix(['+', '-']).unwrap_or(&lower);
    let special = matches!(unsigned, "inf" | "infinity" | "nan");
    let valid_underscores = !trimmed.starts_with('_')
        && !trimmed.ends_with('_')
        && !trimmed.contains("__");
    let clean: String = trimmed.chars().filter(|c| *c != '_').collect();
    let parsed = if special {
        Some(match unsigned {
            "nan" => f64::NAN,
            _ if lower.starts_with('-') => f64::NEG_INFINITY,
            _ => f64::INFINITY,
        })
    } else if valid_underscores && clean.chars().any(|c| c.is_ascii_digit()) {
        clean.parse::<f64>().ok()
    } else {
        None
    };
    parsed.ok_or_else(|| {
        RuntimeError::value_error(format!(
            "could not convert string to float: {}",
            Value::str(text).repr()
        ))
    })
}

// ---------------------------------------------------------------------------
// math
// ---------------------------------------------------------------------------

/// Attribute lookup on a native module.
pub fn module_attr(module: NativeModule, attr: &str) -> Option<Value> {
    match module {
        NativeModule::Math => match attr {
            "pi" => Some(Value::Float(std::f64::consts::PI)),
            "e" => Some(Value::Float(std::f64::consts::E)),
            "tau" => Some(Value::Float(std::f64::consts::TAU)),
            "inf" => Some(Value::Float(f64::INFINITY)),
            "nan" => Some(Value::Float(f64::NAN)),
            _ => MathFn::ALL
                .iter()
                .find(|f| f.name() == attr)
                .map(|f| Value::Builtin(Builtin::Math(*f))),
        },
    }
}

fn checked_float(f: f64) -> RuntimeResult<Value> {
    if f.is_infinite() {
        return Err(RuntimeError::new(ExcKind::OverflowError, "math range error"));
    }
    Ok(Value::Float(f))
}

fn unary_math(name: &str, args: &[Value], f: impl Fn(f64) -> Option<f64>) -> RuntimeResult<Value> {
    arity(name, args, 1, 1)?;
    let x = float_arg(name, &args[0])?;
    match f(x) {
        Some(y) if y.is_nan() && !x.is_nan() => Err(domain_error()),
        Some(y) if y.is_infinite() && x.is_finite() => checked_float(y),
        Some(y) => Ok(Value::Float(y)),
        None => Err(domain_error()),
    }
}

fn call_math(
    f: MathFn,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> RuntimeResult<Value> {
    let name = f.name();
    if f != MathFn::Isclose && f != MathFn::Prod {
        no_kwargs(name, &kwargs)?;
    }
    match f {
        MathFn::Sqrt => unary_math(name, &args, |x| (x >= 0.0 || x.is_nan()).then(|| x.sqrt())),
        MathFn::Exp => unary_math(name, &args, |x| Some(x.exp())),
        MathFn::Log2 => unary_math(name, &args, |x| (x > 0.0).then(|| x.log2())),
        MathFn::Log10 => unary_math(name, &args, |x| (x > 0.0).then(|| x.log10())),
        MathFn::Fabs => unary_math(name, &args, |x| Some(x.abs())),
        MathFn::Sin => unary_math(name, &args, |x| x.is_finite().then(|| x.sin())),
        MathFn::Cos => unary_math(name, &args, |x| x.is_finite().then(|| x.cos())),
        MathFn::Tan => unary_math(name, &args, |x| x.is_finite().then(|| x.tan())),
        MathFn::Asin => unary_math(name, &args, |x| (-1.0..=1.0).contains(&x).then(|| x.asin())),
        MathFn::Acos => unary_math(name, &args, |x| (-1.0..=1.0).contains(&x).then(|| x.acos())),
        MathFn::Atan => unary_math(name, &args, |x| Some(x.atan())),
        MathFn::Floor | MathFn::Ceil | MathFn::Trunc => {
            arity(name, &args, 1, 1)?;
            if let Some(i) = args[0].as_int() {
                return Ok(Value::Int(i));
            }
            let x = float_arg(name, &args[0])?;
            let y = match f {
                MathFn::Floor => x.floor(),
                MathFn::Ceil => x.ceil(),
                _ => x.trunc(),
            };
            float_to_int(y).map(Value::Int)
        }
        MathFn::Log => {
            arity(name, &args, 1, 2)?;
            let x = float_arg(name, &args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(b) => {
                    let b = float_arg(name, b)?;
                    if b <= 0.0 {
                        return Err(domain_error());
                    }
                    if b == 1.0 {
                        return Err(RuntimeError::zero_division("float division by zero"));
                    }
                    Ok(Value::Float(x.ln() / b.ln()))
                }
            }
        }
        MathFn::Pow => {
            arity(name, &args, 2, 2)?;
            let (x, y) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
            if x == 0.0 && y < 0.0 || x < 0.0 && y.is_finite() && y.fract() != 0.0 {
                return Err(domain_error());
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return checked_float(r);
            }
            Ok(Value::Float(r))
        }
        MathFn::Atan2 | MathFn::Hypot | MathFn::Copysign => {
            arity(name, &args, 2, 2)?;
            let (x, y) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
            Ok(Value::Float(match f {
                MathFn::Atan2 => x.atan2(y),
                MathFn::Hypot => x.hypot(y),
                _ => x.copysign(y),
            }))
        }
        MathFn::Gcd => {
            let mut acc: i64 = 0;
            for a in &args {
                let mut b = int_arg(name, a)?.checked_abs().ok_or_else(RuntimeError::overflow)?;
                let mut a = acc;
                while b != 0 {
                    let t = a % b;
                    a = b;
                    b = t;
                }
                acc = a;
            }
            Ok(Value::Int(acc))
        }
        MathFn::Isqrt => {
            arity(name, &args, 1, 1)?;
            let n = int_arg(name, &args[0])?;
            if n < 0 {
                return Err(RuntimeError::value_error(
                    "isqrt() argument must be nonnegative",
                ));
            }
            let mut r = (n as f64).sqrt() as i64;
            while r.checked_mul(r).map_or(true, |sq| sq > n) {
                r -= 1;
            }
            while (r + 1).checked_mul(r + 1).is_some_and(|sq| sq <= n) {
                r += 1;
            }
            Ok(Value::Int(r))
        }
        MathFn::Factorial => {
            arity(name, &args, 1, 1)?;
            let n = int_arg(name, &args[0])?;
            if n < 0 {
                return Err(RuntimeError::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            (1..=n)
                .try_fold(1i64, |acc, k| acc.checked_mul(k))
                .map(Value::Int)
                .ok_or_else(RuntimeError::overflow)
        }
        MathFn::Comb => {
            arity(name, &args, 2, 2)?;
            let (n, k) = (int_arg(name, &args[0])?, int_arg(name, &args[1])?);
            if n < 0 || k < 0 {
                return Err(RuntimeError::value_error("n must be a non-negative integer"));
            }
            if k > n {
                return Ok(Value::Int(0));
            }
            let k = k.min(n - k);
            let mut acc: i128 = 1;
            for i in 0..k {
                acc = acc * (n - i) as i128 / (i + 1) as i128;
                if acc > i64::MAX as i128 {
                    return Err(RuntimeError::overflow());
                }
            }
            Ok(Value::Int(acc as i64))
        }
        MathFn::Isclose => {
            let rel_tol = match take_kw(&mut kwargs, "rel_tol") {
                Some(v) => float_arg(name, &v)?,
                None => 1e-9,
            };
            let abs_tol = match take_kw(&mut kwargs, "abs_tol") {
                Some(v) => float_arg(name, &v)?,
                None => 0.0,
            };
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 2, 2)?;
            let (a, b) = (float_arg(name, &args[0])?, float_arg(name, &args[1])?);
            if rel_tol < 0.0 || abs_tol < 0.0 {
                return Err(RuntimeError::value_error("tolerances must be non-negative"));
            }
            if a == b {
                return Ok(Value::Bool(true));
            }
            if a.is_infinite() || b.is_infinite() {
                return Ok(Value::Bool(false));
            }
            let diff = (a - b).abs();
            Ok(Value::Bool(
                diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()).max(abs_tol),
            ))
        }
        MathFn::Isfinite | MathFn::Isinf | MathFn::Isnan => {
            arity(name, &args, 1, 1)?;
            let x = float_arg(name, &args[0])?;
            Ok(Value::Bool(match f {
                MathFn::Isfinite => x.is_finite(),
                MathFn::Isinf => x.is_infinite(),
                _ => x.is_nan(),
            }))
        }
        MathFn::Fsum => {
            arity(name, &args, 1, 1)?;
            // Neumaier compensated summation.
            let (mut sum, mut comp) = (0.0f64, 0.0f64);
            for item in iterate(&args[0])? {
                let x = float_arg(name, &item)?;
                let t = sum + x;
                if sum.abs() >= x.abs() {
                    comp += (sum - t) + x;
                } else {
                    comp += (x - t) + sum;
                }
                sum = t;
            }
            Ok(Value::Float(sum + comp))
        }
        MathFn::Prod => {
            let start = take_kw(&mut kwargs, "start").unwrap_or(Value::Int(1));
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            let mut acc = start;
            for item in iterate(&args[0])? {
                acc = binary_op(BinOp::Mult, &acc, &item)?;
            }
            Ok(acc)
        }
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

const STR_METHODS: &[&str] = &[
    "split", "strip", "lstrip", "rstrip", "lower", "upper", "join", "startswith", "endswith",
    "replace", "find", "count", "index", "isdigit", "isalpha",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "reverse", "sort", "copy",
    "clear",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "copy", "clear",
];
const SET_METHODS: &[&str] = &["add", "discard", "remove", "copy", "clear"];
const TUPLE_METHODS: &[&str] = &["index", "count"];

/// Resolve `value.attr` for the builtin types.
pub fn get_attribute(value: &Value, attr: &str) -> RuntimeResult<Value> {
    if let Value::Module(m) = value {
        return module_attr(*m, attr).ok_or_else(|| {
            RuntimeError::new(
                ExcKind::AttributeError,
                format!("module 'math' has no attribute '{attr}'"),
            )
        });
    }
    let methods: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => &[],
    };
    if methods.contains(&attr) {
        return Ok(Value::Method(Rc::new(BoundMethod {
            receiver: value.clone(),
            name: attr.to_string(),
        })));
    }
    Err(RuntimeError::new(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{attr}'", value.type_name()),
    ))
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    method: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> RuntimeResult<Value> {
    match receiver {
        Value::Str(s) => {
            no_kwargs(method, &kwargs)?;
            str_method(s, method, args)
        }
        Value::List(list) => {
            if method == "sort" {
                let key = take_kw(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
                let reverse = take_kw(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
                no_kwargs(method, &kwargs)?;
                arity(method, &args, 0, 0)?;
                let items = list.borrow().clone();
                let sorted = sort_values(interp, items, key.as_ref(), reverse)?;
                *list.borrow_mut() = sorted;
                return Ok(Value::None);
            }
            no_kwargs(method, &kwargs)?;
            list_method(list, method, args)
        }
        Value::Dict(map) => {
            if method == "update" {
                arity(method, &args, 0, 1)?;
                let mut pairs = match args.first() {
                    Some(other) => update_pairs(other)?,
                    None => Vec::new(),
                };
                pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(&k), v)));
                let mut target = map.borrow_mut();
                for (k, v) in pairs {
                    target.insert(k, v)?;
                }
                return Ok(Value::None);
            }
            no_kwargs(method, &kwargs)?;
            dict_method(map, method, args)
        }
        Value::Set(map) => {
            no_kwargs(method, &kwargs)?;
            set_method(map, method, args)
        }
        Value::Tuple(items) => {
            no_kwargs(method, &kwargs)?;
            seq_search(items, method, args, "tuple")
        }
        other => Err(RuntimeError::new(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{method}'", other.type_name()),
        )),
    }
}

/// Stable sort by `key`, raising on unorderable pairs.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> RuntimeResult<Vec<Value>> {
    let keys = match key {
        Some(f) => items
            .iter()
            .map(|item| interp.call_value(f, vec![item.clone()], Vec::new()))
            .collect::<RuntimeResult<Vec<_>>>()?,
        None => items.clone(),
    };
    let order = stable_sort_indices(&keys, reverse)?;
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

/// Bottom-up merge sort over indices; comparisons may fail.
fn stable_sort_indices(keys: &[Value], reverse: bool) -> RuntimeResult<Vec<usize>> {
    let n = keys.len();
    let mut idx: Vec<usize> = (0..n).collect();
    let mut tmp = vec![0usize; n];
    let mut width = 1;
    while width < n {
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                let (a, b) = (&keys[idx[i]], &keys[idx[j]]);
                let take_right = if reverse {
                    less_than(a, b)?
                } else {
                    less_than(b, a)?
                };
                if take_right {
                    tmp[k] = idx[j];
                    j += 1;
                } else {
                    tmp[k] = idx[i];
                    i += 1;
                }
                k += 1;
            }
            tmp[k..k + (mid - i)].copy_from_slice(&idx[i..mid]);
            k += mid - i;
            tmp[k..k + (end - j)].copy_from_slice(&idx[j..end]);
            start = end;
        }
        std::mem::swap(&mut idx, &mut tmp);
        width *= 2;
    }
    Ok(idx)
}

fn str_method(s: &Rc<str>, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
    match method {
        "lower" | "upper" | "isdigit" | "isalpha" => {
            arity(method, &args, 0, 0)?;
            Ok(match method {
                "lower" => Value::str(&s.to_lowercase()),
                "upper" => Value::str(&s.to_uppercase()),
                "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
                _ => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(method, &args, 0, 1)?;
            let chars: Option<Vec<char>> = match args.first() {
                None | Some(Value::None) => None,
                Some(v) => Some(str_arg(method, v)?.chars().collect()),
            };
            let pred = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Ok(Value::str(match method {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            }))
        }
        "split" => {
            arity(method, &args, 0, 2)?;
            let maxsplit = match args.get(1) {
                Some(v) => int_arg(method, v)?,
                None => -1,
            };
            let limit = usize::try_from(maxsplit).ok();
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => split_whitespace(s, limit),
                Some(sep) => {
                    let sep = str_arg(method, sep)?;
                    if sep.is_empty() {
                        return Err(RuntimeError::value_error("empty separator"));
                    }
                    match limit {
                        Some(n) => s.splitn(n + 1, sep).map(Value::str).collect(),
                        None => s.split(sep).map(Value::str).collect(),
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(method, &args, 1, 1)?;
            let mut out = String::new();
            for (i, item) in iterate(&args[0])?.enumerate() {
                let Value::Str(part) = &item else {
                    return Err(RuntimeError::type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        item.type_name()
                    )));
                };
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(part);
                check_len(out.len())?;
                heap::check()?;
            }
            Ok(Value::str(&out))
        }
        "startswith" | "endswith" => {
            arity(method, &args, 1, 1)?;
            let candidates: Vec<Value> = match &args[0] {
                Value::Tuple(items) => items.as_ref().clone(),
                v => vec![v.clone()],
            };
            for c in &candidates {
                let c = str_arg(method, c)?;
                let hit = if method == "startswith" {
                    s.starts_with(c)
                } else {
                    s.ends_with(c)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "replace" => {
            arity(method, &args, 2, 3)?;
            let (old, new) = (str_arg(method, &args[0])?, str_arg(method, &args[1])?);
            let count = match args.get(2) {
                Some(v) => int_arg(method, v)?,
                None => -1,
            };
            let out = match usize::try_from(count) {
                Ok(n) => s.replacen(old, new, n),
                Err(_) => s.replace(old, new),
            };
            check_len(out.len())?;
            Ok(Value::str(&out))
        }
        "find" | "index" => {
            arity(method, &args, 1, 1)?;
            let sub = str_arg(method, &args[0])?;
            match s.find(sub) {
                Some(byte_pos) => Ok(Value::Int(s[..byte_pos].chars().count() as i64)),
                None if method == "find" => Ok(Value::Int(-1)),
                None => Err(RuntimeError::value_error("substring not found")),
            }
        }
        "count" => {
            arity(method, &args, 1, 1)?;
            let sub = str_arg(method, &args[0])?;
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub).count()
            };
            Ok(Value::Int(n as i64))
        }
        _ => Err(RuntimeError::new(
            ExcKind::AttributeError,
            format!("'str' object has no attribute '{method}'"),
        )),
    }
}

fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| parts.len() == n) {
            parts.push(Value::str(rest.trim_end()));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn seq_search(items: &[Value], method: &str, args: Vec<Value>, type_name: &str) -> RuntimeResult<Value> {
    arity(method, &args, 1, 1)?;
    match method {
        "index" => items
            .iter()
            .position(|v| values_equal(v, &args[0]))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| RuntimeError::value_error(format!("{type_name}.index(x): x not in {type_name}"))),
        "count" => Ok(Value::Int(
            items.iter().filter(|v| values_equal(v, &args[0])).count() as i64,
        )),
        _ => Err(RuntimeError::new(
            ExcKind::AttributeError,
            format!("'{type_name}' object has no attribute '{method}'"),
        )),
    }
}

fn list_method(
    list: &Rc<std::cell::RefCell<Vec<Value>>>,
    method: &str,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    match method {
        "append" => {
            arity(method, &args, 1, 1)?;
            let mut items = list.borrow_mut();
            check_len(items.len() + 1)?;
            heap::reserve_growth::<Value>(items.len(), items.capacity())?;
            items.extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(method, &args, 1, 1)?;
            let extra = collect_items(&args[0])?;
            let mut items = list.borrow_mut();
            check_len(items.len() + extra.len())?;
            heap::reserve_items(extra.len())?;
            items.extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            arity(method, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(RuntimeError::index_error("pop from empty list"));
            }
            let idx = match args.first() {
                Some(v) => normalize_index(int_arg(method, v)?, items.len())
                    .ok_or_else(|| RuntimeError::index_error("pop index out of range"))?,
                None => items.len() - 1,
            };
            Ok(items.remove(idx))
        }
        "insert" => {
            arity(method, &args, 2, 2)?;
            let mut items = list.borrow_mut();
            check_len(items.len() + 1)?;
            heap::reserve_growth::<Value>(items.len(), items.capacity())?;
            let len = items.len() as i64;
            let mut idx = int_arg(method, &args[0])?;
            if idx < 0 {
                idx = (idx + len).max(0);
            }
            items.insert(idx.min(len) as usize, args[1].clone());
            Ok(Value::None)
        }
        "remove" => {
            arity(method, &args, 1, 1)?;
            let mut items = list.borrow_mut();
            let pos = items
                .iter()
                .position(|v| values_equal(v, &args[0]))
                .ok_or_else(|| RuntimeError::value_error("list.remove(x): x not in list"))?;
            items.remove(pos);
            Ok(Value::None)
        }
        "index" | "count" => {
            let items = list.borrow().clone();
            seq_search(&items, method, args, "list")
        }
        "reverse" => {
            arity(method, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            arity(method, &args, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            arity(method, &args, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(RuntimeError::new(
            ExcKind::AttributeError,
            format!("'list' object has no attribute '{method}'"),
        )),
    }
}

fn key_error(key: &Value) -> RuntimeError {
    RuntimeError::new(ExcKind::KeyError, key.repr())
}

/// Key/value pairs accepted by `dict.update`: another dict or an iterable
/// of two-element sequences.
fn update_pairs(other: &Value) -> RuntimeResult<Vec<(Value, Value)>> {
    if let Value::Dict(src) = other {
        return Ok(src
            .borrow()
            .items()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect());
    }
    let mut pairs = Vec::new();
    for (i, pair) in iterate(other)?.enumerate() {
        let items = collect_items(&pair)?;
        let [k, v] = <[Value; 2]>::try_from(items).map_err(|items| {
            RuntimeError::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        pairs.push((k, v));
    }
    Ok(pairs)
}

fn dict_method(
    map: &Rc<std::cell::RefCell<OrderedMap>>,
    method: &str,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    match method {
        "get" => {
            arity(method, &args, 1, 2)?;
            let found = map.borrow().get(&args[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            arity(method, &args, 0, 0)?;
            Ok(Value::list(map.borrow().keys()))
        }
        "values" => {
            arity(method, &args, 0, 0)?;
            Ok(Value::list(map.borrow().values()))
        }
        "items" => {
            arity(method, &args, 0, 0)?;
            Ok(Value::list(
                map.borrow()
                    .items()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            arity(method, &args, 1, 2)?;
            let removed = map.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(d)) => Ok(d.clone()),
                (None, None) => Err(key_error(&args[0])),
            }
        }
        "setdefault" => {
            arity(method, &args, 1, 2)?;
            let existing = map.borrow().get(&args[0])?;
            match existing {
                Some(v) => Ok(v),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    map.borrow_mut().insert(args[0].clone(), default.clone())?;
                    Ok(default)
                }
            }
        }
        "copy" => {
            arity(method, &args, 0, 0)?;
            Ok(Value::dict(map.borrow().clone()))
        }
        "clear" => {
            arity(method, &args, 0, 0)?;
            map.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(RuntimeError::new(
            ExcKind::AttributeError,
            format!("'dict' object has no attribute '{method}'"),
        )),
    }
}

fn set_method(
    map: &Rc<std::cell::RefCell<OrderedMap>>,
    method: &str,
    args: Vec<Value>,
) -> RuntimeResult<Value> {
    match method {
        "add" => {
            arity(method, &args, 1, 1)?;
            map.borrow_mut().insert(args[0].clone(), Value::None)?;
            Ok(Value::None)
        }
        "discard" => {
            arity(method, &args, 1, 1)?;
            map.borrow_mut().remove(&args[0])?;
            Ok(Value::None)
        }
        "remove" => {
            arity(method, &args, 1, 1)?;
            match map.borrow_mut().remove(&args[0])? {
                Some(_) => Ok(Value::None),
                None => Err(key_error(&args[0])),
            }
        }
        "copy" => {
            arity(method, &args, 0, 0)?;
            Ok(Value::set(map.borrow().clone()))
        }
        "clear" => {
            arity(method, &args, 0, 0)?;
            map.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(RuntimeError::new(
            ExcKind::AttributeError,
            format!("'set' object has no attribute '{method}'"),
        )),
    }
}
