//! Recursive-descent parser for the candidate dialect.
//!
//! Grammar follows the familiar Python statement/expression layout. Variadic
//! parameters, decorators, f-strings, star-arguments and assignment
//! expressions are syntax errors; forbidden-but-parseable constructs are
//! left for the validator.

use super::ast::*;
use super::error::{ParseError, ParseResult};
use super::lexer::{tokenize, Tok, Token};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Cap on recursive expression nesting (unary chains, `**` towers,
/// conditional expressions, parenthesized groups).
const MAX_EXPR_DEPTH: usize = 200;

/// Parse a whole program.
pub fn parse_module(source: &str) -> ParseResult<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    loop {
        match parser.peek() {
            Tok::Eof => break,
            Tok::Newline => {
                parser.advance();
            }
            Tok::Indent => return Err(parser.err("unexpected indent")),
            _ => body.extend(parser.statement()?),
        }
    }
    Ok(Module { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

impl Parser {
    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Tok {
        self.peek_n(0)
    }

    fn peek_n(&self, n: usize) -> &Tok {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn line(&self) -> usize {
        let idx = self.pos.min(self.tokens.len() - 1);
        self.tokens[idx].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line(), message)
    }

    /// Run one level of recursive descent, failing once nesting passes
    /// `MAX_EXPR_DEPTH`.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(self.err("too many nested expressions"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> ParseResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{op}', found {}", describe(self.peek()))))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> ParseResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{kw}', found {}", describe(self.peek()))))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            Tok::Name(n) if !is_keyword(&n) => {
                self.advance();
                Ok(n)
            }
            other => Err(self.err(format!("expected identifier, found {}", describe(&other)))),
        }
    }

    fn expect_newline(&mut self) -> ParseResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            other => Err(self.err(format!("invalid syntax near {}", describe(other)))),
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn statement(&mut self) -> ParseResult<Vec<Stmt>> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Name(n) => match n.as_str() {
                "def" => Some(StmtKind::FunctionDef(self.function_def()?)),
                "if" => Some(self.if_stmt()?),
                "while" => Some(self.while_stmt()?),
                "for" => Some(self.for_stmt(false)?),
                "class" => Some(self.class_def()?),
                "with" => Some(self.with_stmt(false)?),
                "try" => Some(self.try_stmt()?),
                "async" => Some(self.async_stmt()?),
                _ => None,
            },
            Tok::Op("@") => return Err(self.err("decorators are not supported")),
            Tok::Indent => return Err(self.err("unexpected indent")),
            _ => None,
        };
        match kind {
            Some(kind) => Ok(vec![Stmt { kind, line }]),
            None => self.simple_statements(),
        }
    }

    fn simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut out = vec![self.small_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            out.push(self.small_statement()?);
        }
        self.expect_newline()?;
        Ok(out)
    }

    fn small_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Name(n) => match n.as_str() {
                "pass" => {
                    self.advance();
                    StmtKind::Pass
                }
                "break" => {
                    self.advance();
                    StmtKind::Break
                }
                "continue" => {
                    self.advance();
                    StmtKind::Continue
                }
                "return" => {
                    self.advance();
                    if self.at_simple_end() {
                        StmtKind::Return(None)
                    } else {
                        StmtKind::Return(Some(self.testlist()?))
                    }
                }
                "raise" => {
                    self.advance();
                    let exc = if self.at_simple_end() {
                        None
                    } else {
                        Some(self.test()?)
                    };
                    let cause = if exc.is_some() && self.eat_kw("from") {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise { exc, cause }
                }
                "global" | "nonlocal" => {
                    self.advance();
                    let mut names = vec![self.expect_name()?];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?);
                    }
                    if n == "global" {
                        StmtKind::Global(names)
                    } else {
                        StmtKind::Nonlocal(names)
                    }
                }
                "import" => {
                    self.advance();
                    let mut names = vec![self.import_alias(true)?];
                    while self.eat_op(",") {
                        names.push(self.import_alias(true)?);
                    }
                    StmtKind::Import(names)
                }
                "from" => self.import_from()?,
                "del" => {
                    self.advance();
                    let targets = self.target_list()?;
                    let targets = match targets.kind {
                        ExprKind::Tuple(items) => items,
                        _ => vec![targets],
                    };
                    for t in &targets {
                        check_target(t, "delete")?;
                    }
                    StmtKind::Delete(targets)
                }
                "assert" => {
                    self.advance();
                    let test = self.test()?;
                    let msg = if self.eat_op(",") {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    StmtKind::Assert { test, msg }
                }
                _ => self.expression_statement()?,
            },
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn at_simple_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) || self.at_op(";")
    }

    fn expression_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.testlist_or_yield()?;

        if self.at_op(":") {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(self.err("illegal target for annotation"));
            }
            let annotation = self.test()?;
            let value = if self.eat_op("=") {
                Some(self.testlist_or_yield()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        if let Tok::Op(op) = self.peek().clone() {
            if let Some(bin) = augmented_op(op) {
                self.advance();
                if !matches!(
                    first.kind,
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(self.err("illegal expression for augmented assignment"));
                }
                let value = self.testlist_or_yield()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: bin,
                    value,
                });
            }
        }

        if self.at_op(":=") {
            return Err(self.err("assignment expressions are not supported"));
        }

        if self.at_op("=") {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = self.testlist_or_yield()?;
                if self.at_op("=") {
                    targets.push(value);
                } else {
                    break;
                }
            }
            for t in &targets {
                check_target(t, "assign to")?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn import_alias(&mut self, dotted: bool) -> ParseResult<Alias> {
        let mut name = self.expect_name()?;
        if dotted {
            while self.eat_op(".") {
                name.push('.');
                name.push_str(&self.expect_name()?);
            }
        }
        let asname = if self.eat_kw("as") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn import_from(&mut self) -> ParseResult<StmtKind> {
        self.expect_kw("from")?;
        let mut level = 0;
        while self.at_op(".") {
            self.advance();
            level += 1;
        }
        let module = if self.at_kw("import") {
            None
        } else {
            let mut name = self.expect_name()?;
            while self.eat_op(".") {
                name.push('.');
                name.push_str(&self.expect_name()?);
            }
            Some(name)
        };
        self.expect_kw("import")?;
        let mut names = Vec::new();
        if self.eat_op("*") {
            names.push(Alias {
                name: "*".into(),
                asname: None,
            });
        } else {
            let paren = self.eat_op("(");
            names.push(self.import_alias(false)?);
            while self.eat_op(",") {
                if paren && self.at_op(")") {
                    break;
                }
                names.push(self.import_alias(false)?);
            }
            if paren {
                self.expect_op(")")?;
            }
        }
        Ok(StmtKind::ImportFrom {
            module,
            names,
            level,
        })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_statements();
        }
        self.advance();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.err("expected an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.advance();
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn function_def(&mut self) -> ParseResult<FunctionDef> {
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") || self.at_op("/") {
                return Err(self.err("variadic and positional-only parameters are not supported"));
            }
            let pname = self.expect_name()?;
            let annotation = if self.eat_op(":") {
                Some(self.test()?)
            } else {
                None
            };
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) {
                return Err(self.err("non-default argument follows default argument"));
            }
            if params.iter().any(|p: &Param| p.name == pname) {
                return Err(self.err(format!("duplicate argument '{pname}' in function definition")));
            }
            params.push(Param {
                name: pname,
                annotation,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        let returns = if self.eat_op("->") {
            Some(self.test()?)
        } else {
            None
        };
        let body = self.block()?;
        Ok(FunctionDef {
            name,
            params,
            returns,
            body,
        })
    }

    fn async_stmt(&mut self) -> ParseResult<StmtKind> {
        self.expect_kw("async")?;
        match self.peek() {
            Tok::Name(n) if n == "def" => Ok(StmtKind::AsyncFunctionDef(self.function_def()?)),
            Tok::Name(n) if n == "for" => self.for_stmt(true),
            Tok::Name(n) if n == "with" => self.with_stmt(true),
            other => Err(self.err(format!("invalid syntax after 'async': {}", describe(other)))),
        }
    }

    fn if_stmt(&mut self) -> ParseResult<StmtKind> {
        // Called on `if` or `elif`.
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.at_kw("elif") {
            let line = self.line();
            vec![Stmt {
                kind: self.if_stmt()?,
                line,
            }]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_stmt(&mut self) -> ParseResult<StmtKind> {
        self.expect_kw("while")?;
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn for_stmt(&mut self, is_async: bool) -> ParseResult<StmtKind> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        check_target(&target, "assign to")?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(if is_async {
            StmtKind::AsyncFor {
                target,
                iter,
                body,
                orelse,
            }
        } else {
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            }
        })
    }

    fn class_def(&mut self) -> ParseResult<StmtKind> {
        self.expect_kw("class")?;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat_op("(") {
            while !self.at_op(")") {
                bases.push(self.test()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        let body = self.block()?;
        Ok(StmtKind::ClassDef { name, bases, body })
    }

    fn with_stmt(&mut self, is_async: bool) -> ParseResult<StmtKind> {
        self.expect_kw("with")?;
        let mut items = Vec::new();
        loop {
            let context = self.test()?;
            let target = if self.eat_kw("as") {
                let t = self.bitor()?;
                check_target(&t, "assign to")?;
                Some(t)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.eat_op(",") {
                break;
            }
        }
        let body = self.block()?;
        Ok(if is_async {
            StmtKind::AsyncWith { items, body }
        } else {
            StmtKind::With { items, body }
        })
    }

    fn try_stmt(&mut self) -> ParseResult<StmtKind> {
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.at_kw("except") {
            let line = self.line();
            self.advance();
            let (exc_type, name) = if self.at_op(":") {
                (None, None)
            } else {
                let t = self.test()?;
                let n = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(t), n)
            };
            let hbody = self.block()?;
            handlers.push(ExceptHandler {
                exc_type,
                name,
                body: hbody,
                line,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.err("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// `a, b` style list of bitwise-level expressions used for loop targets.
    fn target_list(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let first = self.bitor()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_kw("in") || self.at_op("=") || matches!(self.peek(), Tok::Newline) {
                break;
            }
            items.push(self.bitor()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn testlist_or_yield(&mut self) -> ParseResult<Expr> {
        if self.at_kw("yield") {
            self.yield_expr()
        } else {
            self.testlist()
        }
    }

    fn yield_expr(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        self.expect_kw("yield")?;
        if self.eat_kw("from") {
            let value = self.test()?;
            return Ok(Expr::new(ExprKind::YieldFrom(Box::new(value)), line));
        }
        if self.at_simple_end() || self.at_op(")") || self.at_op("=") {
            return Ok(Expr::new(ExprKind::Yield(None), line));
        }
        let value = self.testlist()?;
        Ok(Expr::new(ExprKind::Yield(Some(Box::new(value))), line))
    }

    /// Comma-separated tests; a bare comma makes a tuple.
    fn testlist(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_testlist_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn at_testlist_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent)
            || ["=", ")", "]", "}", ":", ";"]
                .iter()
                .any(|op| self.at_op(op))
            || matches!(self.peek(), Tok::Op(o) if augmented_op(o).is_some())
    }

    fn test(&mut self) -> ParseResult<Expr> {
        self.nested(Self::test_inner)
    }

    fn test_inner(&mut self) -> ParseResult<Expr> {
        if self.at_kw("lambda") {
            return self.lambda();
        }
        let line = self.line();
        let body = self.or_test()?;
        if self.at_kw("if") {
            self.advance();
            let test = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            ));
        }
        Ok(body)
    }

    fn lambda(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let mut params = Vec::new();
        while !self.at_op(":") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.err("variadic parameters are not supported"));
            }
            let name = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            params.push(Param {
                name,
                annotation: None,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            line,
        ))
    }

    fn or_test(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let first = self.and_test()?;
        if !self.at_kw("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("or") {
            values.push(self.and_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
            line,
        ))
    }

    fn and_test(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let first = self.not_test()?;
        if !self.at_kw("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("and") {
            values.push(self.not_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
            line,
        ))
    }

    fn not_test(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        if self.eat_kw("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let left = self.bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek().clone() {
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_n(1), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Name(n) if n == "not" && matches!(self.peek_n(1), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            line,
        ))
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (sym, op) in ops {
                if self.at_op(sym) {
                    let line = self.line();
                    self.advance();
                    let right = next(self)?;
                    left = Expr::new(
                        ExprKind::BinOp {
                            left: Box::new(left),
                            op: *op,
                            right: Box::new(right),
                        },
                        line,
                    );
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::arith,
        )
    }

    fn arith(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        if self.at_op("@") {
            return Err(self.err("matrix multiplication is not supported"));
        }
        self.binary_level(
            &[
                ("*", BinOp::Mult),
                ("//", BinOp::FloorDiv),
                ("/", BinOp::Div),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            Tok::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.nested(Self::factor)?;
            // Negative literals fold into constants.
            if op == UnaryOp::Neg {
                match &operand.kind {
                    ExprKind::Constant(Constant::Int(v)) => {
                        if let Some(n) = v.checked_neg() {
                            return Ok(Expr::new(ExprKind::Constant(Constant::Int(n)), line));
                        }
                    }
                    ExprKind::Constant(Constant::Float(v)) => {
                        return Ok(Expr::new(ExprKind::Constant(Constant::Float(-v)), line));
                    }
                    _ => {}
                }
            }
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.power()
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let base = if self.at_kw("await") {
            self.advance();
            let value = self.primary()?;
            Expr::new(ExprKind::Await(Box::new(value)), line)
        } else {
            self.primary()?
        };
        if self.eat_op("**") {
            let exponent = self.nested(Self::factor)?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: BinOp::Pow,
                    right: Box::new(exponent),
                },
                line,
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            if self.eat_op("(") {
                let (args, keywords) = self.call_arguments()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    line,
                );
            } else if self.eat_op("[") {
                let index = self.subscript_list()?;
                self.expect_op("]")?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.eat_op(".") {
                let attr = match self.advance() {
                    Tok::Name(n) => n,
                    other => {
                        return Err(self.err(format!(
                            "expected attribute name, found {}",
                            describe(&other)
                        )))
                    }
                };
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    line,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> ParseResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.err("star-arguments are not supported"));
            }
            let is_keyword = matches!(self.peek(), Tok::Name(n) if !is_keyword(n))
                && matches!(self.peek_n(1), Tok::Op("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                let value = self.test()?;
                if keywords.iter().any(|k| k.name == name) {
                    return Err(self.err(format!("keyword argument repeated: {name}")));
                }
                keywords.push(Keyword { name, value });
            } else {
                if !keywords.is_empty() {
                    return Err(self.err("positional argument follows keyword argument"));
                }
                let line = self.line();
                let value = self.test()?;
                if self.at_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(value),
                            generators,
                        },
                        line,
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, keywords))
    }

    fn subscript_list(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let first = self.subscript()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.subscript()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn subscript(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let lower = if self.at_op(":") {
            None
        } else {
            let e = self.test()?;
            if !self.at_op(":") {
                return Ok(e);
            }
            Some(Box::new(e))
        };
        self.expect_op(":")?;
        let upper = if self.at_op(":") || self.at_op("]") || self.at_op(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") {
            if self.at_op("]") || self.at_op(",") {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line))
    }

    fn comprehension_clauses(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.at_kw("for") || self.at_kw("async") {
            if self.at_kw("async") {
                return Err(self.err("asynchronous comprehensions are not supported"));
            }
            self.advance();
            let target = self.target_list()?;
            check_target(&target, "assign to")?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let tok = self.peek().clone();
        match tok {
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Int(v)), line))
            }
            Tok::Float(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Constant(Constant::Float(v)), line))
            }
            Tok::Str(s) => {
                self.advance();
                let mut value = s;
                while let Tok::Str(more) = self.peek().clone() {
                    self.advance();
                    value.push_str(&more);
                }
                Ok(Expr::new(ExprKind::Constant(Constant::Str(value)), line))
            }
            Tok::Name(n) => match n.as_str() {
                "None" => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Constant(Constant::None), line))
                }
                "True" => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Constant(Constant::Bool(true)), line))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Constant(Constant::Bool(false)), line))
                }
                _ if is_keyword(&n) => Err(self.err(format!("invalid syntax near '{n}'"))),
                _ => {
                    self.advance();
                    Ok(Expr::new(ExprKind::Name(n), line))
                }
            },
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line));
                }
                if self.at_kw("yield") {
                    let y = self.yield_expr()?;
                    self.expect_op(")")?;
                    return Ok(y);
                }
                let first = self.test()?;
                if self.at_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op(")")?;
                    return Ok(Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(first),
                            generators,
                        },
                        line,
                    ));
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op(")")?;
                Ok(Expr::new(ExprKind::Tuple(items), line))
            }
            Tok::Op("[") => {
                self.advance();
                if self.eat_op("]") {
                    return Ok(Expr::new(ExprKind::List(Vec::new()), line));
                }
                let first = self.test()?;
                if self.at_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    self.expect_op("]")?;
                    return Ok(Expr::new(
                        ExprKind::ListComp {
                            elt: Box::new(first),
                            generators,
                        },
                        line,
                    ));
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op("]")?;
                Ok(Expr::new(ExprKind::List(items), line))
            }
            Tok::Op("{") => {
                self.advance();
                self.brace_display(line)
            }
            Tok::Op(":=") => Err(self.err("assignment expressions are not supported")),
            other => Err(self.err(format!("invalid syntax near {}", describe(&other)))),
        }
    }

    fn brace_display(&mut self, line: usize) -> ParseResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), line));
        }
        if self.at_op("**") {
            return Err(self.err("dict unpacking is not supported"));
        }
        let first = self.test()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.at_kw("for") {
                let generators = self.comprehension_clauses()?;
                self.expect_op("}")?;
                return Ok(Expr::new(
                    ExprKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    },
                    line,
                ));
            }
            let mut pairs = vec![(first, value)];
            while self.eat_op(",") {
                if self.at_op("}") {
                    break;
                }
                let k = self.test()?;
                self.expect_op(":")?;
                let v = self.test()?;
                pairs.push((k, v));
            }
            self.expect_op("}")?;
            return Ok(Expr::new(ExprKind::Dict(pairs), line));
        }
        if self.at_kw("for") {
            let generators = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::new(
                ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                },
                line,
            ));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op("}")?;
        Ok(Expr::new(ExprKind::Set(items), line))
    }
}

fn augmented_op(op: &str) -> Option<BinOp> {
    Some(match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mult,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        _ => return None,
    })
}

fn check_target(expr: &Expr, verb: &str) -> ParseResult<()> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            items.iter().try_for_each(|item| check_target(item, verb))
        }
        other => Err(ParseError::new(
            expr.line,
            format!("cannot {verb} {}", other.node_name()),
        )),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{n}'"),
        Tok::Int(v) => format!("'{v}'"),
        Tok::Float(v) => format!("'{v}'"),
        Tok::Str(_) => "string literal".to_string(),
        Tok::Op(o) => format!("'{o}'"),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Module {
        parse_module(src).unwrap_or_else(|e| panic!("parse failed: {e}"))
    }

    #[test]
    fn test_function_with_defaults_and_annotations() {
        let m = parse("def solve(xs: list, k=2) -> int:\n    return sum(xs) * k\n");
        match &m.body[0].kind {
            StmtKind::FunctionDef(f) => {
                assert_eq!(f.name, "solve");
                assert_eq!(f.params.len(), 2);
                assert!(f.params[1].default.is_some());
                assert!(f.returns.is_some());
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence_power_binds_tighter_than_unary_minus() {
        let m = parse("x = -2 ** 2\n");
        let StmtKind::Assign { value, .. } = &m.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::UnaryOp {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_elif_chain_nests_in_orelse() {
        let m = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &m.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_forbidden_constructs_still_parse() {
        let m = parse(
            "import os\nfrom math import sqrt\nclass A:\n    pass\ntry:\n    x = 1\nexcept ValueError as e:\n    raise\nfinally:\n    pass\nwith a as b:\n    pass\nf = lambda x: x\n",
        );
        let names: Vec<_> = m.body.iter().map(|s| s.kind.node_name()).collect();
        assert_eq!(
            names,
            vec!["Import", "ImportFrom", "ClassDef", "Try", "With", "Assign"]
        );
    }

    #[test]
    fn test_comprehensions_and_generator_argument() {
        parse("a = [x * x for x in range(10) if x % 2]\nb = {k: v for k, v in d.items()}\nc = sum(x for x in a)\nd = {1, 2}\n");
    }

    #[test]
    fn test_slices_and_chained_compare() {
        let m = parse("y = xs[1:-1:2]\nz = 0 <= y < 10\n");
        let StmtKind::Assign { value, .. } = &m.body[1].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Compare { ops, .. } = &value.kind else {
            panic!("expected compare");
        };
        assert_eq!(ops, &vec![CmpOp::LtE, CmpOp::Lt]);
    }

    #[test]
    fn test_tuple_unpacking_and_chained_assignment() {
        let m = parse("a, b = b, a\nx = y = 0\n");
        let StmtKind::Assign { targets, .. } = &m.body[1].kind else {
            panic!("expected assignment");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_decorators_rejected() {
        let err = parse_module("@cache\ndef f():\n    pass\n").unwrap_err();
        assert!(err.message.contains("decorators"));
    }

    #[test]
    fn test_star_args_rejected() {
        assert!(parse_module("def f(*args):\n    pass\n").is_err());
        assert!(parse_module("f(*xs)\n").is_err());
    }

    #[test]
    fn test_assignment_to_literal_rejected() {
        let err = parse_module("1 = x\n").unwrap_err();
        assert!(err.message.contains("cannot assign"));
    }

    #[test]
    fn test_keyword_as_identifier_rejected() {
        assert!(parse_module("class = 3\n").is_err());
    }

    #[test]
    fn test_yield_and_await_parse_inside_functions() {
        let m = parse("def g():\n    yield 1\n    x = yield\n    yield from h()\n    await z\n");
        let StmtKind::FunctionDef(f) = &m.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(f.body.len(), 4);
    }

    #[test]
    fn test_inline_block_and_semicolons() {
        let m = parse("def f(): return 1\nx = 1; y = 2\n");
        assert_eq!(m.body.len(), 3);
    }

    #[test]
    fn test_deep_unary_chains_rejected() {
        for src in [
            format!("x = {}1\n", "-".repeat(100_000)),
            format!("x = {}y\n", "not ".repeat(100_000)),
            format!("x = 2{}\n", "**2".repeat(100_000)),
            format!("x = {}1\n", "1 if c else ".repeat(100_000)),
        ] {
            let err = parse_module(&src).unwrap_err();
            assert!(
                err.message.contains("too many nested expressions"),
                "{}",
                err.message
            );
            assert_eq!(err.line, 1);
        }
    }

    #[test]
    fn test_moderate_nesting_parses() {
        parse(&format!("x = {}y\n", "-".repeat(150)));
        parse(&format!("x = 2{}\n", "**2".repeat(150)));
        parse(&format!("x = {}1{}\n", "(".repeat(100), ")".repeat(100)));
    }

    #[test]
    fn test_depth_resets_between_expressions() {
        let line = format!("x = {}y\n", "-".repeat(150));
        parse(&line.repeat(10));
    }
}
