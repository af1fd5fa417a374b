//! Runtime values of the candidate dialect.
//!
//! Containers are reference-counted with interior mutability so that
//! aliasing behaves the way contestants expect (`b = a; b.append(1)` is
//! visible through `a`). Reference cycles are allowed to leak: a runner
//! process interprets one program and exits.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use super::ast::{Expr, FunctionDef, Param, Stmt};
use super::error::{ExcKind, RuntimeError, RuntimeResult};
use super::heap;

/// Upper bound on the length of any list, tuple, string or materialized range.
pub const MAX_SEQUENCE_LEN: usize = 4_000_000;

pub fn check_len(len: usize) -> RuntimeResult<()> {
    if len > MAX_SEQUENCE_LEN {
        return Err(RuntimeError::new(
            ExcKind::MemoryError,
            format!("sequence of {len} elements exceeds the {MAX_SEQUENCE_LEN} element cap"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scopes and functions
// ---------------------------------------------------------------------------

/// A variable scope. The module scope has no parent; every call gets a fresh
/// scope whose parent is the scope the function was defined in.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({} names)", self.vars.borrow().len())
    }
}

pub enum FunctionBody {
    Block(Rc<Vec<Stmt>>),
    Expr(Rc<Expr>),
}

/// A user-defined function (or lambda) closed over its defining scope.
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// Default values for the trailing parameters, evaluated at definition.
    pub defaults: Vec<Value>,
    pub body: FunctionBody,
    pub scope: Rc<Scope>,
}

impl Function {
    pub fn from_def(def: &FunctionDef, defaults: Vec<Value>, scope: Rc<Scope>) -> Self {
        Self {
            name: def.name.clone(),
            params: param_names(&def.params),
            defaults,
            body: FunctionBody::Block(Rc::new(def.body.clone())),
            scope,
        }
    }
}

pub fn param_names(params: &[Param]) -> Vec<String> {
    params.iter().map(|p| p.name.clone()).collect()
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Built-in callables exposed by the restricted namespace and the `math`
/// module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Abs,
    Min,
    Max,
    Sum,
    Len,
    Float,
    Int,
    Bool,
    Round,
    Range,
    Enumerate,
    Zip,
    Map,
    Filter,
    Math(MathFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathFn {
    Sqrt,
    Floor,
    Ceil,
    Trunc,
    Exp,
    Log,
    Log2,
    Log10,
    Pow,
    Fabs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Hypot,
    Gcd,
    Isqrt,
    Factorial,
    Comb,
    Isclose,
    Isfinite,
    Isinf,
    Isnan,
    Copysign,
    Fsum,
    Prod,
}

impl MathFn {
    pub const ALL: &'static [MathFn] = &[
        MathFn::Sqrt,
        MathFn::Floor,
        MathFn::Ceil,
        MathFn::Trunc,
        MathFn::Exp,
        MathFn::Log,
        MathFn::Log2,
        MathFn::Log10,
        MathFn::Pow,
        MathFn::Fabs,
        MathFn::Sin,
        MathFn::Cos,
        MathFn::Tan,
        MathFn::Asin,
        MathFn::Acos,
        MathFn::Atan,
        MathFn::Atan2,
        MathFn::Hypot,
        MathFn::Gcd,
        MathFn::Isqrt,
        MathFn::Factorial,
        MathFn::Comb,
        MathFn::Isclose,
        MathFn::Isfinite,
        MathFn::Isinf,
        MathFn::Isnan,
        MathFn::Copysign,
        MathFn::Fsum,
        MathFn::Prod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MathFn::Sqrt => "sqrt",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Trunc => "trunc",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Log2 => "log2",
            MathFn::Log10 => "log10",
            MathFn::Pow => "pow",
            MathFn::Fabs => "fabs",
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Asin => "asin",
            MathFn::Acos => "acos",
            MathFn::Atan => "atan",
            MathFn::Atan2 => "atan2",
            MathFn::Hypot => "hypot",
            MathFn::Gcd => "gcd",
            MathFn::Isqrt => "isqrt",
            MathFn::Factorial => "factorial",
            MathFn::Comb => "comb",
            MathFn::Isclose => "isclose",
            MathFn::Isfinite => "isfinite",
            MathFn::Isinf => "isinf",
            MathFn::Isnan => "isnan",
            MathFn::Copysign => "copysign",
            MathFn::Fsum => "fsum",
            MathFn::Prod => "prod",
        }
    }
}

impl Builtin {
    /// The fixed whitelist of global builtins, in namespace order.
    pub const GLOBALS: &'static [Builtin] = &[
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::Sum,
        Builtin::Len,
        Builtin::Float,
        Builtin::Int,
        Builtin::Bool,
        Builtin::Round,
        Builtin::Range,
        Builtin::Enumerate,
        Builtin::Zip,
        Builtin::Map,
        Builtin::Filter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Len => "len",
            Builtin::Float => "float",
            Builtin::Int => "int",
            Builtin::Bool => "bool",
            Builtin::Round => "round",
            Builtin::Range => "range",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Map => "map",
            Builtin::Filter => "filter",
            Builtin::Math(m) => m.name(),
        }
    }
}

/// Native modules reachable from candidate code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeModule {
    Math,
}

/// A method looked up on a value but not yet called (`xs.append`).
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Hashing and the ordered map
// ---------------------------------------------------------------------------

/// Hash identity of a value. Numerically equal keys (`1`, `1.0`, `True`)
/// share an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Builtin(Builtin),
    Ptr(usize),
}

/// Insertion-ordered hash map backing `dict` and `set`.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap {
    entries: Vec<(HashKey, Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> RuntimeResult<Option<Value>> {
        let hk = key.hash_key()?;
        Ok(self.index.get(&hk).map(|&i| self.entries[i].2.clone()))
    }

    pub fn contains(&self, key: &Value) -> RuntimeResult<bool> {
        Ok(self.index.contains_key(&key.hash_key()?))
    }

    /// Insert or overwrite. An existing entry keeps its original key object.
    pub fn insert(&mut self, key: Value, value: Value) -> RuntimeResult<()> {
        let hk = key.hash_key()?;
        match self.index.get(&hk) {
            Some(&i) => self.entries[i].2 = value,
            None => {
                check_len(self.entries.len() + 1)?;
                heap::reserve_growth::<(HashKey, Value, Value)>(
                    self.entries.len(),
                    self.entries.capacity(),
                )?;
                self.index.insert(hk.clone(), self.entries.len());
                self.entries.push((hk, key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> RuntimeResult<Option<Value>> {
        let hk = key.hash_key()?;
        let Some(pos) = self.index.remove(&hk) else {
            return Ok(None);
        };
        let (_, _, value) = self.entries.remove(pos);
        for (i, (k, _, _)) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(k.clone(), i);
        }
        Ok(Some(value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, _, v)| v.clone()).collect()
    }

    pub fn items(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(_, k, v)| (k, v))
    }

    pub fn first(&self) -> Option<(Value, Value)> {
        self.entries.first().map(|(_, k, v)| (k.clone(), v.clone()))
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<OrderedMap>>),
    /// Sets reuse the ordered map with `None` values.
    Set(Rc<RefCell<OrderedMap>>),
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    /// Single-pass iterator produced by `map`, `filter`, `zip`, `enumerate`
    /// and generator expressions.
    Iterator(Rc<RefCell<VecDeque<Value>>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Module(NativeModule),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(map: OrderedMap) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn set(map: OrderedMap) -> Self {
        Value::Set(Rc::new(RefCell::new(map)))
    }

    pub fn iterator(items: Vec<Value>) -> Self {
        Value::Iterator(Rc::new(RefCell::new(items.into())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range { .. } => "range",
            Value::Iterator(_) => "iterator",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Numeric view: bools and ints as `i64`, floats separately.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    pub fn hash_key(&self) -> RuntimeResult<HashKey> {
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<RuntimeResult<_>>()?,
            ),
            Value::Builtin(b) => HashKey::Builtin(*b),
            Value::Function(f) => HashKey::Ptr(Rc::as_ptr(f) as *const () as usize),
            other => {
                return Err(RuntimeError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    /// Python-style `repr`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// Python-style `str`: strings render without quotes.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    fn write_repr(&self, out: &mut String, seen: &mut Vec<usize>) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const () as usize;
                if seen.contains(&ptr) {
                    out.push_str("[...]");
                    return;
                }
                seen.push(ptr);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, seen);
                }
                out.push(']');
                seen.pop();
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, seen);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(map) => {
                let ptr = Rc::as_ptr(map) as *const () as usize;
                if seen.contains(&ptr) {
                    out.push_str("{...}");
                    return;
                }
                seen.push(ptr);
                out.push('{');
                for (i, (k, v)) in map.borrow().items().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, seen);
                    out.push_str(": ");
                    v.write_repr(out, seen);
                }
                out.push('}');
                seen.pop();
            }
            Value::Set(map) => {
                let map = map.borrow();
                if map.is_empty() {
                    out.push_str("set()");
                    return;
                }
                out.push('{');
                for (i, (k, _)) in map.items().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, seen);
                }
                out.push('}');
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    out.push_str(&format!("range({start}, {stop})"));
                } else {
                    out.push_str(&format!("range({start}, {stop}, {step})"));
                }
            }
            Value::Iterator(_) => out.push_str("<iterator>"),
            Value::Function(f) => out.push_str(&format!("<function {}>", f.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
            Value::Method(m) => out.push_str(&format!(
                "<method {}.{}>",
                m.receiver.type_name(),
                m.name
            )),
            Value::Module(NativeModule::Math) => out.push_str("<module 'math'>"),
        }
    }
}

pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Shortest round-trip float formatting with Python's `repr` layout.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.into();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.into();
    }
    let sci = format!("{f:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let whole = exp as usize + 1;
            if digits.len() > whole {
                out.push_str(&digits[..whole]);
                out.push('.');
                out.push_str(&digits[whole..]);
            } else {
                out.push_str(&digits);
                out.extend(std::iter::repeat('0').take(whole - digits.len()));
                out.push_str(".0");
            }
        } else {
            out.push_str("0.");
            out.extend(std::iter::repeat('0').take((-exp - 1) as usize));
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&format!("{:02}", exp.abs()));
    }
    out
}

pub fn range_len(start: i64, stop: i64, step: i64) -> usize {
    span_len(start as i128, stop as i128, step as i128)
}

/// Element count of a stepped span, computed wide so 64-bit endpoints
/// cannot overflow.
pub fn span_len(start: i128, stop: i128, step: i128) -> usize {
    let n = if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / (-step)
    } else {
        0
    };
    n.clamp(0, usize::MAX as i128) as usize
}

// ---------------------------------------------------------------------------
// Equality and ordering
// ---------------------------------------------------------------------------

/// Value equality (`==`). Numbers compare across int, float and bool.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Float(x), y) | (y, Value::Float(x)) if y.is_number() => {
            y.as_f64().is_some_and(|y| *x == y)
        }
        (x, y) if x.is_number() && y.is_number() => x.as_int() == y.as_int(),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_equal(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_equal(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.items().all(|(k, v)| {
                    matches!(y.get(k), Ok(Some(other)) if values_equal(v, &other))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.items().all(|(k, _)| y.contains(k).unwrap_or(false))
        }
        (
            Value::Range {
                start: a0,
                stop: a1,
                step: a2,
            },
            Value::Range {
                start: b0,
                stop: b1,
                step: b2,
            },
        ) => {
            let (la, lb) = (range_len(*a0, *a1, *a2), range_len(*b0, *b1, *b2));
            la == lb && (la == 0 || (a0 == b0 && (la == 1 || a2 == b2)))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Iterator(x), Value::Iterator(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn seq_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Identity (`is`). Immutable scalars compare by value.
pub fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) | (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Iterator(x), Value::Iterator(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => x == y,
        _ => false,
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`, `min`, `max` and `sort`.
///
/// Returns `None` when the values are unordered (NaN involved); mixed types
/// that have no ordering at all raise `TypeError`.
pub fn compare_values(a: &Value, b: &Value) -> RuntimeResult<Option<Ordering>> {
    match (a, b) {
        (x, y) if x.is_number() && y.is_number() => Ok(match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => {
                let (Some(f), Some(g)) = (x.as_f64(), y.as_f64()) else {
                    return Ok(None);
                };
                f.partial_cmp(&g)
            }
        }),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => compare_seq(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => compare_seq(x, y),
        _ => Err(RuntimeError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> RuntimeResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !values_equal(x, y) {
            return compare_values(x, y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// `a < b`, with unordered pairs comparing false.
pub fn less_than(a: &Value, b: &Value) -> RuntimeResult<bool> {
    Ok(compare_values(a, b)? == Some(Ordering::Less))
}

// ---------------------------------------------------------------------------
// JSON bridge
// ---------------------------------------------------------------------------

/// Convert a decoded JSON document into a runtime value.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            let mut out = OrderedMap::new();
            for (k, v) in map {
                // String keys always hash.
                let _ = out.insert(Value::str(k), from_json(v));
            }
            Value::dict(out)
        }
    }
}

/// Why a value could not be written as JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EncodeError(pub String);

/// Convert a runtime value to JSON. Dict keys follow the usual JSON
/// conventions: `int`, `float`, `bool` and `None` keys become strings.
pub fn to_json(value: &Value) -> Result<serde_json::Value, EncodeError> {
    encode(value, &mut Vec::new())
}

fn encode(value: &Value, ancestors: &mut Vec<usize>) -> Result<serde_json::Value, EncodeError> {
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            None => {
                return Err(EncodeError(format!(
                    "out of range float value is not JSON compliant: {}",
                    format_float(*f)
                )))
            }
        },
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) => {
            let ptr = Rc::as_ptr(items) as *const () as usize;
            enter(ancestors, ptr)?;
            let out = items
                .borrow()
                .iter()
                .map(|v| encode(v, ancestors))
                .collect::<Result<Vec<_>, _>>()?;
            ancestors.pop();
            serde_json::Value::Array(out)
        }
        Value::Tuple(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| encode(v, ancestors))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Dict(map) => {
            let ptr = Rc::as_ptr(map) as *const () as usize;
            enter(ancestors, ptr)?;
            let mut out = serde_json::Map::new();
            for (k, v) in map.borrow().items() {
                out.insert(json_key(k)?, encode(v, ancestors)?);
            }
            ancestors.pop();
            serde_json::Value::Object(out)
        }
        other => {
            return Err(EncodeError(format!(
                "object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    })
}

fn enter(ancestors: &mut Vec<usize>, ptr: usize) -> Result<(), EncodeError> {
    if ancestors.contains(&ptr) {
        return Err(EncodeError("circular reference detected".into()));
    }
    ancestors.push(ptr);
    Ok(())
}

fn json_key(key: &Value) -> Result<String, EncodeError> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::None => Ok("null".into()),
        Value::Float(f) if f.is_finite() => Ok(format_float(*f)),
        Value::Float(f) => Err(EncodeError(format!(
            "out of range float key is not JSON compliant: {}",
            format_float(*f)
        ))),
        other => Err(EncodeError(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

/// Equality of two JSON documents with numeric awareness (`10 == 10.0`).
pub fn json_values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value as J;
    match (a, b) {
        (J::Number(x), J::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (J::Array(x), J::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| json_values_equal(p, q))
        }
        (J::Object(x), J::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| json_values_equal(v, w)))
        }
        _ => a == b,
    }
}
