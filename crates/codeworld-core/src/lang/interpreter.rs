//! Tree-walking interpreter.
//!
//! One module scope holds every top-level binding; each call gets a fresh
//! scope chained to the scope its function was defined in. Name lookup walks
//! that chain and falls back to the builtin namespace.

use std::collections::HashMap;
use std::rc::Rc;

use super::ast::{
    BinOp, BoolOp, CmpOp, Comprehension, Constant, Expr, ExprKind, Module, Stmt, StmtKind,
};
use super::builtins::{self, call_builtin, call_method, collect_items, iterate};
use super::error::{ExcKind, RuntimeError, RuntimeResult};
use super::heap;
use super::ops::{self, SliceSpec};
use super::value::{
    check_len, compare_values, param_names, values_equal, values_identical, Function,
    FunctionBody, OrderedMap, Scope, Value, MAX_SEQUENCE_LEN,
};

/// Maximum depth of nested calls before `RecursionError`.
pub const MAX_CALL_DEPTH: usize = 1000;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter {
    builtins: HashMap<String, Value>,
    globals: Rc<Scope>,
    depth: usize,
}

fn unsupported_node(name: &str) -> RuntimeError {
    RuntimeError::new(ExcKind::SyntaxError, format!("'{name}' is not supported"))
}

impl Interpreter {
    pub fn new(builtins: HashMap<String, Value>) -> Self {
        Self {
            builtins,
            globals: Scope::new(None),
            depth: 0,
        }
    }

    /// Execute a module body once, binding its top-level names.
    pub fn exec_module(&mut self, module: &Module) -> RuntimeResult<()> {
        let globals = self.globals.clone();
        match self.exec_block(&module.body, &globals)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(RuntimeError::new(
                ExcKind::SyntaxError,
                "'return' outside function",
            )),
            Flow::Break | Flow::Continue => Err(RuntimeError::new(
                ExcKind::SyntaxError,
                "'break' or 'continue' outside loop",
            )),
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get_local(name)
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RuntimeResult<Value> {
        match callee {
            Value::Function(f) => self.call_function(f, args, kwargs),
            Value::Builtin(b) => call_builtin(self, *b, args, kwargs),
            Value::Method(m) => call_method(self, &m.receiver, &m.name, args, kwargs),
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        f: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RuntimeResult<Value> {
        let scope = Scope::new(Some(f.scope.clone()));
        self.bind_arguments(f, &scope, args, kwargs)?;

        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        self.depth += 1;
        let result = match &f.body {
            FunctionBody::Block(body) => match self.exec_block(body, &scope) {
                Ok(Flow::Return(v)) => Ok(v),
                Ok(_) => Ok(Value::None),
                Err(e) => Err(e),
            },
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
        };
        self.depth -= 1;
        result
    }

    fn bind_arguments(
        &self,
        f: &Function,
        scope: &Rc<Scope>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RuntimeResult<()> {
        let n = f.params.len();
        if args.len() > n {
            return Err(RuntimeError::type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                f.name,
                n,
                if n == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            )));
        }
        let mut bound: Vec<Option<Value>> = vec![None; n];
        for (slot, v) in bound.iter_mut().zip(args) {
            *slot = Some(v);
        }
        for (name, v) in kwargs {
            let Some(i) = f.params.iter().position(|p| *p == name) else {
                return Err(RuntimeError::type_error(format!(
                    "{}() got an unexpected keyword argument '{name}'",
                    f.name
                )));
            };
            if bound[i].is_some() {
                return Err(RuntimeError::type_error(format!(
                    "{}() got multiple values for argument '{name}'",
                    f.name
                )));
            }
            bound[i] = Some(v);
        }
        let first_default = n - f.defaults.len();
        let mut missing = Vec::new();
        for (i, slot) in bound.into_iter().enumerate() {
            let value = match slot {
                Some(v) => v,
                None if i >= first_default => f.defaults[i - first_default].clone(),
                None => {
                    missing.push(format!("'{}'", f.params[i]));
                    continue;
                }
            };
            scope.set(&f.params[i], value);
        }
        if !missing.is_empty() {
            return Err(RuntimeError::type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                f.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(" and ")
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> RuntimeResult<Flow> {
        for stmt in body {
            let flow = self
                .exec_stmt(stmt, scope)
                .map_err(|e| e.at_line(stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> RuntimeResult<Flow> {
        heap::check()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let v = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, v.clone(), scope)?;
                }
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let v = self.eval(value, scope)?;
                    self.assign(target, v, scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(target, *op, value, scope)?;
            }
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::new();
                for p in &def.params {
                    if let Some(d) = &p.default {
                        defaults.push(self.eval(d, scope)?);
                    }
                }
                let f = Function::from_def(def, defaults, scope.clone());
                scope.set(&def.name, Value::Function(Rc::new(f)));
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, scope)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, scope);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                for item in iterate(&iterable)? {
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, scope)?.truthy() {
                    let message = match msg {
                        Some(m) => self.eval(m, scope)?.to_display(),
                        None => String::new(),
                    };
                    return Err(RuntimeError::new(ExcKind::AssertionError, message));
                }
            }
            other => return Err(unsupported_node(other.node_name())),
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                scope.set(name, value);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = collect_items(&value)?;
                if items.len() != targets.len() {
                    return Err(RuntimeError::value_error(if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    }));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v, scope)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value: obj, index } => {
                let container = self.eval(obj, scope)?;
                if let ExprKind::Slice { .. } = index.kind {
                    let spec = self.eval_slice(index, scope)?;
                    return ops::set_slice(&container, spec, &value);
                }
                let key = self.eval(index, scope)?;
                ops::set_item(&container, &key, value)
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, scope)?;
                Err(RuntimeError::new(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object attribute '{attr}' is read-only",
                        obj.type_name()
                    ),
                ))
            }
            other => Err(RuntimeError::new(
                ExcKind::SyntaxError,
                format!("cannot assign to {}", other.node_name()),
            )),
        }
    }

    fn aug_assign(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.lookup(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace(op, &current, &rhs)?;
                scope.set(name, updated);
                Ok(())
            }
            ExprKind::Subscript { value: obj, index } => {
                let container = self.eval(obj, scope)?;
                if let ExprKind::Slice { .. } = index.kind {
                    let spec = self.eval_slice(index, scope)?;
                    let current = ops::get_slice(&container, spec)?;
                    let rhs = self.eval(value, scope)?;
                    let updated = self.inplace(op, &current, &rhs)?;
                    return ops::set_slice(&container, spec, &updated);
                }
                let key = self.eval(index, scope)?;
                let current = ops::get_item(&container, &key)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace(op, &current, &rhs)?;
                ops::set_item(&container, &key, updated)
            }
            _ => {
                let current = self.eval(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.inplace(op, &current, &rhs)?;
                self.assign(target, updated, scope)
            }
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn inplace(
        &mut self,
        op: BinOp,
        current: &Value,
        rhs: &Value,
    ) -> RuntimeResult<Value> {
        if let (BinOp::Add, Value::List(items)) = (op, current) {
            let extra = collect_items(rhs)?;
            let mut items_mut = items.borrow_mut();
            check_len(items_mut.len() + extra.len())?;
            heap::reserve_items(items_mut.len() + extra.len())?;
            items_mut.extend(extra);
            return Ok(current.clone());
        }
        ops::binary_op(op, current, rhs)
    }

    fn delete(&mut self, target: &Expr, scope: &Rc<Scope>) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => match scope.remove(name) {
                Some(_) => Ok(()),
                None => Err(RuntimeError::new(
                    ExcKind::NameError,
                    format!("name '{name}' is not defined"),
                )),
            },
            ExprKind::Subscript { value: obj, index } => {
                let container = self.eval(obj, scope)?;
                if let ExprKind::Slice { .. } = index.kind {
                    let spec = self.eval_slice(index, scope)?;
                    return ops::del_slice(&container, spec);
                }
                let key = self.eval(index, scope)?;
                ops::del_item(&container, &key)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete(item, scope)?;
                }
                Ok(())
            }
            other => Err(RuntimeError::new(
                ExcKind::SyntaxError,
                format!("cannot delete {}", other.node_name()),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> RuntimeResult<Value> {
        scope
            .lookup(name)
            .or_else(|| self.builtins.get(name).cloned())
            .ok_or_else(|| {
                RuntimeError::new(ExcKind::NameError, format!("name '{name}' is not defined"))
            })
    }

    fn eval_slice(&mut self, expr: &Expr, scope: &Rc<Scope>) -> RuntimeResult<SliceSpec> {
        let ExprKind::Slice { lower, upper, step } = &expr.kind else {
            return Err(RuntimeError::type_error("expected a slice"));
        };
        let mut bound = |e: &Option<Box<Expr>>| -> RuntimeResult<Option<i64>> {
            let Some(e) = e else {
                return Ok(None);
            };
            match self.eval(e, scope)? {
                Value::None => Ok(None),
                v => v.as_int().map(Some).ok_or_else(|| {
                    RuntimeError::type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        Ok(SliceSpec {
            lower: bound(lower)?,
            upper: bound(upper)?,
            step: bound(step)?,
        })
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> RuntimeResult<Value> {
        match &expr.kind {
            ExprKind::Constant(c) => Ok(match c {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::str(s),
            }),
            ExprKind::Name(name) => self.lookup(name, scope),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items, scope)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items, scope)?)),
            ExprKind::Set(items) => {
                let mut map = OrderedMap::new();
                for v in self.eval_all(items, scope)? {
                    map.insert(v, Value::None)?;
                }
                Ok(Value::set(map))
            }
            ExprKind::Dict(pairs) => {
                let mut map = OrderedMap::new();
                for (k, v) in pairs {
                    let k = self.eval(k, scope)?;
                    let v = self.eval(v, scope)?;
                    map.insert(k, v)?;
                }
                Ok(Value::dict(map))
            }
            ExprKind::BinOp { left, op, right } => {
                let a = self.eval(left, scope)?;
                let b = self.eval(right, scope)?;
                ops::binary_op(*op, &a, &b)
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(operand, scope)?;
                ops::unary_op(*op, &v)
            }
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for e in values {
                    last = self.eval(e, scope)?;
                    let truthy = last.truthy();
                    match op {
                        BoolOp::And if !truthy => return Ok(last),
                        BoolOp::Or if truthy => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            ExprKind::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut lhs = self.eval(left, scope)?;
                for (op, e) in cmp_ops.iter().zip(comparators) {
                    let rhs = self.eval(e, scope)?;
                    if !compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let callee = self.eval(func, scope)?;
                let args = self.eval_all(args, scope)?;
                let mut kwargs = Vec::with_capacity(keywords.len());
                for kw in keywords {
                    kwargs.push((kw.name.clone(), self.eval(&kw.value, scope)?));
                }
                self.call_value(&callee, args, kwargs)
            }
            ExprKind::Attribute { value, attr } => {
                if attr.starts_with("__") {
                    return Err(RuntimeError::new(
                        ExcKind::AttributeError,
                        format!("access to '{attr}' is not allowed"),
                    ));
                }
                let obj = self.eval(value, scope)?;
                builtins::get_attribute(&obj, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value, scope)?;
                if let ExprKind::Slice { .. } = index.kind {
                    let spec = self.eval_slice(index, scope)?;
                    return ops::get_slice(&container, spec);
                }
                let key = self.eval(index, scope)?;
                ops::get_item(&container, &key)
            }
            ExprKind::Slice { .. } => Err(RuntimeError::type_error(
                "slice is only valid inside a subscript",
            )),
            ExprKind::ListComp { elt, generators } => {
                let mut out = Vec::new();
                let inner = Scope::new(Some(scope.clone()));
                self.comprehension(generators, &inner, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    push_capped(&mut out, interp.eval(elt, s)?)
                })?;
                Ok(Value::list(out))
            }
            ExprKind::GeneratorExp { elt, generators } => {
                let mut out = Vec::new();
                let inner = Scope::new(Some(scope.clone()));
                self.comprehension(generators, &inner, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    push_capped(&mut out, interp.eval(elt, s)?)
                })?;
                Ok(Value::iterator(out))
            }
            ExprKind::SetComp { elt, generators } => {
                let mut out = OrderedMap::new();
                let inner = Scope::new(Some(scope.clone()));
                self.comprehension(generators, &inner, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    out.insert(interp.eval(elt, s)?, Value::None)
                })?;
                Ok(Value::set(out))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let mut out = OrderedMap::new();
                let inner = Scope::new(Some(scope.clone()));
                self.comprehension(generators, &inner, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    let k = interp.eval(key, s)?;
                    let v = interp.eval(value, s)?;
                    out.insert(k, v)
                })?;
                Ok(Value::dict(out))
            }
            ExprKind::Lambda { params, body } => {
                let mut defaults = Vec::new();
                for p in params {
                    if let Some(d) = &p.default {
                        defaults.push(self.eval(d, scope)?);
                    }
                }
                Ok(Value::Function(Rc::new(Function {
                    name: "<lambda>".to_string(),
                    params: param_names(params),
                    defaults,
                    body: FunctionBody::Expr(Rc::new((**body).clone())),
                    scope: scope.clone(),
                })))
            }
            other => Err(unsupported_node(other.node_name())),
        }
    }

    fn eval_all(&mut self, items: &[Expr], scope: &Rc<Scope>) -> RuntimeResult<Vec<Value>> {
        check_len(items.len())?;
        items.iter().map(|e| self.eval(e, scope)).collect()
    }

    /// Drive the nested `for`/`if` clauses of a comprehension, calling `emit`
    /// for every surviving binding.
    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        emit: &mut dyn FnMut(&mut Self, &Rc<Scope>) -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, scope);
        };
        let iterable = self.eval(&first.iter, scope)?;
        'items: for item in iterate(&iterable)? {
            self.assign(&first.target, item, scope)?;
            for cond in &first.ifs {
                if !self.eval(cond, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(rest, scope, emit)?;
        }
        Ok(())
    }
}

fn push_capped(out: &mut Vec<Value>, v: Value) -> RuntimeResult<()> {
    if out.len() >= MAX_SEQUENCE_LEN {
        check_len(out.len() + 1)?;
    }
    heap::reserve_growth::<Value>(out.len(), out.capacity())?;
    out.push(v);
    Ok(())
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> RuntimeResult<bool> {
    use std::cmp::Ordering::*;
    let ordered = |accept: &[std::cmp::Ordering]| -> RuntimeResult<bool> {
        let ord = compare_values(a, b).map_err(|_| {
            RuntimeError::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                cmp_symbol(op),
                a.type_name(),
                b.type_name()
            ))
        })?;
        Ok(ord.is_some_and(|o| accept.contains(&o)))
    };
    match op {
        CmpOp::Eq => Ok(values_equal(a, b)),
        CmpOp::NotEq => Ok(!values_equal(a, b)),
        CmpOp::Lt => ordered(&[Less]),
        CmpOp::LtE => ordered(&[Less, Equal]),
        CmpOp::Gt => ordered(&[Greater]),
        CmpOp::GtE => ordered(&[Greater, Equal]),
        CmpOp::In => ops::contains(b, a),
        CmpOp::NotIn => ops::contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(values_identical(a, b)),
        CmpOp::IsNot => Ok(!values_identical(a, b)),
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_module;
    use crate::sandbox::namespace::build_namespace;

    fn run(src: &str, call: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let module = parse_module(src).unwrap_or_else(|e| panic!("parse failed: {e}"));
        let mut interp = Interpreter::new(build_namespace());
        interp.exec_module(&module)?;
        let f = interp
            .global(call)
            .unwrap_or_else(|| panic!("{call} not defined"));
        interp.call_value(&f, args, Vec::new())
    }

    fn run0(src: &str) -> Value {
        run(src, "solve", Vec::new()).unwrap_or_else(|e| panic!("run failed: {e}"))
    }

    #[test]
    fn test_recursive_function() {
        let v = run0("def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\n\ndef solve():\n    return fib(15)\n");
        assert!(matches!(v, Value::Int(610)));
    }

    #[test]
    fn test_module_constants_visible_in_functions() {
        let v = run0("K = 3\n\ndef helper(x):\n    return x * K\n\ndef solve():\n    return helper(4)\n");
        assert!(matches!(v, Value::Int(12)));
    }

    #[test]
    fn test_loops_with_break_continue_and_else() {
        let src = "def solve():\n    total = 0\n    for i in range(10):\n        if i == 7:\n            break\n        if i % 2:\n            continue\n        total += i\n    else:\n        total = -1\n    n = 0\n    while n < 3:\n        n += 1\n    else:\n        total += 100\n    return total\n";
        assert!(matches!(run0(src), Value::Int(112)));
    }

    #[test]
    fn test_comprehensions_and_builtins() {
        let src = "def solve():\n    xs = [x * x for x in range(6) if x % 2 == 0]\n    d = {k: v for k, v in zip('abc', xs)}\n    return [sum(xs), max(xs), len(d), sorted_pairs(d)]\n\ndef sorted_pairs(d):\n    items = d.items()\n    items.sort(key=lambda kv: -kv[1])\n    return [k for k, v in items]\n";
        assert_eq!(run0(src).repr(), "[20, 16, 3, ['c', 'b', 'a']]");
    }

    #[test]
    fn test_list_aliasing_and_augmented_extend() {
        let src = "def solve():\n    a = [1]\n    b = a\n    b += [2]\n    b.append(3)\n    return a\n";
        assert_eq!(run0(src).repr(), "[1, 2, 3]");
    }

    #[test]
    fn test_tuple_unpacking_and_slicing() {
        let src = "def solve():\n    a, (b, c) = 1, [2, 3]\n    xs = list_of(10)\n    xs[2:5] = [0]\n    del xs[0]\n    return (a + b + c, xs[::-2], xs[-1])\n\ndef list_of(n):\n    return [i for i in range(n)]\n";
        assert_eq!(run0(src).repr(), "(6, [9, 7, 5, 1], 9)");
    }

    #[test]
    fn test_closures_read_enclosing_scope() {
        let src = "def solve():\n    base = 10\n    def add(x):\n        return x + base\n    return list(map(add, [1, 2]))\n";
        // `list` is not a builtin; the call must fail with NameError.
        let err = run(src, "solve", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExcKind::NameError);
        assert_eq!(err.line, Some(5));

        let src = "def solve():\n    base = 10\n    def add(x):\n        return x + base\n    return [v for v in map(add, [1, 2])]\n";
        assert_eq!(run0(src).repr(), "[11, 12]");
    }

    #[test]
    fn test_keyword_and_default_arguments() {
        let src = "def f(a, b=2, c=3):\n    return a * 100 + b * 10 + c\n\ndef solve():\n    return f(1, c=9)\n";
        assert!(matches!(run0(src), Value::Int(129)));
        let err = run(src, "f", vec![]).unwrap_err();
        assert!(err.message.contains("missing 1 required positional argument: 'a'"));
        let err = run(src, "f", vec![Value::Int(1); 4]).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_runaway_recursion_is_recursion_error() {
        // Deep dialect recursion needs the runner's worker stack, not the
        // default test thread stack.
        let kind = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let src = "def f(n):\n    return f(n + 1)\n";
                run(src, "f", vec![Value::Int(0)]).unwrap_err().kind
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(kind, ExcKind::RecursionError);
    }

    #[test]
    fn test_runtime_errors_carry_kind_and_line() {
        let src = "def solve():\n    x = 1\n    return x / 0\n";
        let err = run(src, "solve", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExcKind::ZeroDivisionError);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_full_width_range() {
        let src = "R = range(-9223372036854775807 - 1, 9223372036854775807)\n\ndef solve():\n    return [R[5], R[-1], R[2:][0], len(range(0, 9223372036854775807)), 7 in R]\n";
        assert_eq!(
            run0(src).repr(),
            "[-9223372036854775803, 9223372036854775806, -9223372036854775806, 9223372036854775807, True]"
        );

        let src = "def solve():\n    return len(range(-9223372036854775807 - 1, 9223372036854775807))\n";
        let err = run(src, "solve", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_chained_comparison_and_short_circuit() {
        let src = "def solve():\n    x = 5\n    return [0 < x < 10, 1 < x > 7, None or 'd', 0 and 1 / 0, x if x > 3 else -x]\n";
        assert_eq!(run0(src).repr(), "[True, False, 'd', 0, 5]");
    }

    #[test]
    fn test_math_module_available() {
        let src = "def solve():\n    return [math.sqrt(16), math.floor(2.7), round(math.pi, 2), math.gcd(12, 18)]\n";
        assert_eq!(run0(src).repr(), "[4.0, 2, 3.14, 6]");
    }

    #[test]
    fn test_dunder_attribute_blocked_at_runtime() {
        let src = "def solve():\n    return (1).__class__\n";
        let err = run(src, "solve", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExcKind::AttributeError);
    }

    #[test]
    fn test_assert_failure() {
        let src = "def solve():\n    assert 1 > 2, 'nope'\n";
        let err = run(src, "solve", Vec::new()).unwrap_err();
        assert_eq!(err.kind, ExcKind::AssertionError);
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn test_top_level_if_binds_conditionally() {
        let src = "FAST = True\nif FAST:\n    def solve():\n        return 1\nelse:\n    def solve():\n        return 2\n";
        assert!(matches!(run0(src), Value::Int(1)));
    }
}
