//! Static vetting of candidate source before anything executes.
//!
//! The walk is breadth-first in source order and stops at the first
//! violation, so the reported reason is deterministic for a given program.
//! Top-level statement kinds are checked only after the whole tree passed.

use std::collections::VecDeque;

use tracing::debug;

use super::error::{SandboxError, SandboxResult};
use crate::lang::ast::{Comprehension, Expr, ExprKind, FunctionDef, Module, Param, Stmt, StmtKind};
use crate::lang::parse_module;

/// Callee names rejected when called by bare name.
pub const FORBIDDEN_CALLS: &[&str] = &[
    "__import__",
    "eval",
    "exec",
    "open",
    "compile",
    "breakpoint",
    "input",
    "globals",
    "locals",
    "vars",
];

/// Node kinds rejected anywhere in the tree.
pub const FORBIDDEN_NODES: &[&str] = &[
    "Import",
    "ImportFrom",
    "With",
    "AsyncWith",
    "Try",
    "Raise",
    "ClassDef",
    "Lambda",
    "Global",
    "Nonlocal",
    "Await",
    "Yield",
    "YieldFrom",
    "AsyncFunctionDef",
    "AsyncFor",
];

/// Statement kinds allowed at module level.
pub const ALLOWED_TOPLEVEL: &[&str] = &["FunctionDef", "Assign", "AnnAssign", "Expr", "If"];

#[derive(Clone, Copy)]
enum Node<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

/// Parse and vet `source`. On success the parsed module is returned so the
/// caller does not parse twice.
pub fn validate(source: &str) -> SandboxResult<Module> {
    let module = parse_module(source)
        .map_err(|e| SandboxError::ValidationRejected(format!("syntax_error: {e}")))?;
    check_module(&module).map_err(SandboxError::ValidationRejected)?;
    debug!(statements = module.body.len(), "source validated");
    Ok(module)
}

/// Vet an already parsed module, returning the rejection reason.
pub fn check_module(module: &Module) -> Result<(), String> {
    let mut queue: VecDeque<Node<'_>> = module.body.iter().map(Node::Stmt).collect();
    while let Some(node) = queue.pop_front() {
        match node {
            Node::Stmt(stmt) => {
                check_name(stmt.kind.node_name())?;
                stmt_children(stmt, &mut queue);
            }
            Node::Expr(expr) => {
                check_name(expr.kind.node_name())?;
                check_expr(expr)?;
                expr_children(expr, &mut queue);
            }
        }
    }

    for stmt in &module.body {
        let name = stmt.kind.node_name();
        if !ALLOWED_TOPLEVEL.contains(&name) {
            return Err(format!("toplevel_forbidden:{name}"));
        }
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), String> {
    if FORBIDDEN_NODES.contains(&name) {
        return Err(format!("node_forbidden:{name}"));
    }
    Ok(())
}

fn check_expr(expr: &Expr) -> Result<(), String> {
    match &expr.kind {
        ExprKind::Call { func, .. } => {
            if let ExprKind::Name(name) = &func.kind {
                if FORBIDDEN_CALLS.contains(&name.as_str()) {
                    return Err(format!("call_forbidden:{name}"));
                }
            }
        }
        ExprKind::Attribute { attr, .. } if attr.starts_with("__") => {
            return Err("dunder_attribute_forbidden".into());
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Children in source order
// ---------------------------------------------------------------------------

fn push_block<'a>(body: &'a [Stmt], queue: &mut VecDeque<Node<'a>>) {
    queue.extend(body.iter().map(Node::Stmt));
}

fn push_params<'a>(params: &'a [Param], queue: &mut VecDeque<Node<'a>>) {
    for param in params {
        if let Some(annotation) = &param.annotation {
            queue.push_back(Node::Expr(annotation));
        }
    }
    for param in params {
        if let Some(default) = &param.default {
            queue.push_back(Node::Expr(default));
        }
    }
}

fn push_function<'a>(def: &'a FunctionDef, queue: &mut VecDeque<Node<'a>>) {
    push_params(&def.params, queue);
    push_block(&def.body, queue);
    if let Some(returns) = &def.returns {
        queue.push_back(Node::Expr(returns));
    }
}

fn push_generators<'a>(generators: &'a [Comprehension], queue: &mut VecDeque<Node<'a>>) {
    for g in generators {
        queue.push_back(Node::Expr(&g.target));
        queue.push_back(Node::Expr(&g.iter));
        queue.extend(g.ifs.iter().map(Node::Expr));
    }
}

fn stmt_children<'a>(stmt: &'a Stmt, queue: &mut VecDeque<Node<'a>>) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) | StmtKind::AsyncFunctionDef(def) => push_function(def, queue),
        StmtKind::ClassDef { bases, body, .. } => {
            queue.extend(bases.iter().map(Node::Expr));
            push_block(body, queue);
        }
        StmtKind::Return(value) => {
            if let Some(v) = value {
                queue.push_back(Node::Expr(v));
            }
        }
        StmtKind::Delete(targets) => queue.extend(targets.iter().map(Node::Expr)),
        StmtKind::Assign { targets, value } => {
            queue.extend(targets.iter().map(Node::Expr));
            queue.push_back(Node::Expr(value));
        }
        StmtKind::AugAssign { target, value, .. } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(value));
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(annotation));
            if let Some(v) = value {
                queue.push_back(Node::Expr(v));
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        }
        | StmtKind::AsyncFor {
            target,
            iter,
            body,
            orelse,
        } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(iter));
            push_block(body, queue);
            push_block(orelse, queue);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            queue.push_back(Node::Expr(test));
            push_block(body, queue);
            push_block(orelse, queue);
        }
        StmtKind::With { items, body } | StmtKind::AsyncWith { items, body } => {
            for item in items {
                queue.push_back(Node::Expr(&item.context));
                if let Some(t) = &item.target {
                    queue.push_back(Node::Expr(t));
                }
            }
            push_block(body, queue);
        }
        StmtKind::Raise { exc, cause } => {
            queue.extend(exc.iter().map(Node::Expr));
            queue.extend(cause.iter().map(Node::Expr));
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            push_block(body, queue);
            for handler in handlers {
                queue.extend(handler.exc_type.iter().map(Node::Expr));
                push_block(&handler.body, queue);
            }
            push_block(orelse, queue);
            push_block(finalbody, queue);
        }
        StmtKind::Assert { test, msg } => {
            queue.push_back(Node::Expr(test));
            queue.extend(msg.iter().map(Node::Expr));
        }
        StmtKind::Expr(e) => queue.push_back(Node::Expr(e)),
        StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

fn expr_children<'a>(expr: &'a Expr, queue: &mut VecDeque<Node<'a>>) {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
            queue.extend(items.iter().map(Node::Expr))
        }
        ExprKind::Dict(pairs) => {
            queue.extend(pairs.iter().map(|(k, _)| Node::Expr(k)));
            queue.extend(pairs.iter().map(|(_, v)| Node::Expr(v)));
        }
        ExprKind::BinOp { left, right, .. } => {
            queue.push_back(Node::Expr(left));
            queue.push_back(Node::Expr(right));
        }
        ExprKind::UnaryOp { operand, .. } => queue.push_back(Node::Expr(operand)),
        ExprKind::BoolOp { values, .. } => queue.extend(values.iter().map(Node::Expr)),
        ExprKind::Compare {
            left, comparators, ..
        } => {
            queue.push_back(Node::Expr(left));
            queue.extend(comparators.iter().map(Node::Expr));
        }
        ExprKind::IfExp { test, body, orelse } => {
            queue.push_back(Node::Expr(test));
            queue.push_back(Node::Expr(body));
            queue.push_back(Node::Expr(orelse));
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            queue.push_back(Node::Expr(func));
            queue.extend(args.iter().map(Node::Expr));
            queue.extend(keywords.iter().map(|k| Node::Expr(&k.value)));
        }
        ExprKind::Attribute { value, .. } => queue.push_back(Node::Expr(value)),
        ExprKind::Subscript { value, index } => {
            queue.push_back(Node::Expr(value));
            queue.push_back(Node::Expr(index));
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                queue.push_back(Node::Expr(part));
            }
        }
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            queue.push_back(Node::Expr(elt));
            push_generators(generators, queue);
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            queue.push_back(Node::Expr(key));
            queue.push_back(Node::Expr(value));
            push_generators(generators, queue);
        }
        ExprKind::Lambda { params, body } => {
            push_params(params, queue);
            queue.push_back(Node::Expr(body));
        }
        ExprKind::Await(inner) | ExprKind::YieldFrom(inner) => {
            queue.push_back(Node::Expr(inner))
        }
        ExprKind::Yield(inner) => queue.extend(inner.iter().map(|e| Node::Expr(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject(src: &str) -> String {
        match validate(src) {
            Err(SandboxError::ValidationRejected(reason)) => reason,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected rejection for {src:?}"),
        }
    }

    #[test]
    fn test_accepts_plain_strategy() {
        let src = "LIMIT: int = 10\n\ndef solve(xs):\n    return sorted_sum(xs)\n\ndef sorted_sum(xs):\n    return sum(x for x in xs if x < LIMIT)\n\nif LIMIT > 5:\n    BIG = True\n";
        let module = validate(src).expect("valid program rejected");
        assert_eq!(module.body.len(), 4);
    }

    #[test]
    fn test_import_forbidden() {
        assert_eq!(reject("import os\n"), "node_forbidden:Import");
        assert_eq!(reject("from os import path\n"), "node_forbidden:ImportFrom");
    }

    #[test]
    fn test_nested_forbidden_nodes() {
        assert_eq!(
            reject("def solve(x):\n    try:\n        return 1\n    except ValueError:\n        return 0\n"),
            "node_forbidden:Try"
        );
        assert_eq!(
            reject("def solve(x):\n    f = lambda y: y\n    return f(x)\n"),
            "node_forbidden:Lambda"
        );
        assert_eq!(
            reject("def solve(x):\n    global y\n    return x\n"),
            "node_forbidden:Global"
        );
        assert_eq!(
            reject("def gen():\n    yield 1\n"),
            "node_forbidden:Yield"
        );
        assert_eq!(reject("class A:\n    pass\n"), "node_forbidden:ClassDef");
        assert_eq!(
            reject("async def solve():\n    return 1\n"),
            "node_forbidden:AsyncFunctionDef"
        );
    }

    #[test]
    fn test_forbidden_calls() {
        assert_eq!(
            reject("def solve(x):\n    return eval('1')\n"),
            "call_forbidden:eval"
        );
        assert_eq!(reject("X = open('f')\n"), "call_forbidden:open");
        assert_eq!(
            reject("def solve(x):\n    return __import__('os')\n"),
            "call_forbidden:__import__"
        );
    }

    #[test]
    fn test_attribute_call_of_forbidden_name_is_allowed() {
        // Only bare-name callees are matched.
        assert!(validate("def solve(x):\n    return x.eval()\n").is_ok());
    }

    #[test]
    fn test_dunder_attribute() {
        assert_eq!(
            reject("def solve(x):\n    return x.__class__\n"),
            "dunder_attribute_forbidden"
        );
        assert!(validate("def solve(x):\n    return x._private\n").is_ok());
    }

    #[test]
    fn test_toplevel_forbidden() {
        assert_eq!(
            reject("for i in range(3):\n    pass\n"),
            "toplevel_forbidden:For"
        );
        assert_eq!(reject("x = 1\nx += 1\n"), "toplevel_forbidden:AugAssign");
        assert_eq!(reject("return 5\n"), "toplevel_forbidden:Return");
    }

    #[test]
    fn test_walk_is_breadth_first() {
        // The nested import is deeper than the top-level call, so the call
        // is found first even though it appears later in the source.
        let src = "def solve(x):\n    if x:\n        import os\n    return x\n\nY = eval('2')\n";
        assert_eq!(reject(src), "call_forbidden:eval");
    }

    #[test]
    fn test_node_violation_beats_toplevel_check() {
        assert_eq!(
            reject("while True:\n    import os\n"),
            "node_forbidden:Import"
        );
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let reason = reject("def solve(x):\n    return (x\n\n");
        assert!(reason.starts_with("syntax_error: line "), "{reason}");
    }

    #[test]
    fn test_deeply_nested_expression_is_syntax_error() {
        let src = format!("def solve(x):\n    return {}x\n", "-".repeat(100_000));
        let reason = reject(&src);
        assert_eq!(reason, "syntax_error: line 2: too many nested expressions");
    }

    #[test]
    fn test_validation_is_deterministic() {
        let src = "import os\nimport sys\n";
        assert_eq!(reject(src), reject(src));
    }
}
