//! Indentation-aware tokenizer for the candidate dialect.

use super::error::{ParseError, ParseResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier or keyword; the parser decides which.
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "->", "+=", "-=", "*=",
    "/=", "%=", "&=", "|=", "^=", "<<", ">>", ":=", "+", "-", "*", "/", "%", "<", ">", "=",
    "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@", "~", "&", "|", "^",
];

const TAB_WIDTH: usize = 8;
const MAX_BRACKET_DEPTH: usize = 200;
const MAX_INDENT_DEPTH: usize = 100;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

/// Split `source` into tokens, synthesising `Newline`, `Indent` and `Dedent`.
pub fn tokenize(source: &str) -> ParseResult<Vec<Token>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    fn run(&mut self) -> ParseResult<()> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }
            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' | '\r' => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                '\\' => {
                    let next = self.peek_at(1);
                    let next = if next == Some('\r') { self.peek_at(2) } else { next };
                    if next != Some('\n') {
                        return Err(self.err("unexpected character after line continuation"));
                    }
                    while self.peek() != Some('\n') {
                        self.pos += 1;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                '"' | '\'' => {
                    let value = self.lex_string(false)?;
                    self.push(Tok::Str(value));
                }
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number()?,
                c if c == '_' || c.is_alphabetic() => self.lex_name()?,
                _ => self.lex_operator()?,
            }
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    fn push_newline(&mut self) {
        match self.tokens.last() {
            None => {}
            Some(t) if matches!(t.tok, Tok::Newline | Tok::Indent | Tok::Dedent) => {}
            Some(_) => self.push(Tok::Newline),
        }
    }

    /// Measure the indentation of the line starting at `pos`. Returns `true`
    /// when the line is blank or comment-only and was skipped entirely.
    fn handle_indentation(&mut self) -> ParseResult<bool> {
        let mut width = 0;
        let mut cursor = self.pos;
        while let Some(c) = self.chars.get(cursor) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' => width = 0,
                _ => break,
            }
            cursor += 1;
        }
        match self.chars.get(cursor) {
            None => {
                self.pos = cursor;
                return Ok(true);
            }
            Some('\n') => {
                self.pos = cursor + 1;
                self.line += 1;
                return Ok(true);
            }
            Some('\r') if self.chars.get(cursor + 1) == Some(&'\n') => {
                self.pos = cursor + 2;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                while let Some(c) = self.chars.get(cursor) {
                    if *c == '\n' {
                        break;
                    }
                    cursor += 1;
                }
                self.pos = (cursor + 1).min(self.chars.len());
                self.line += 1;
                return Ok(true);
            }
            _ => {}
        }
        self.pos = cursor;

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            if self.indents.len() > MAX_INDENT_DEPTH {
                return Err(self.err("too many levels of indentation"));
            }
            self.indents.push(width);
            self.push(Tok::Indent);
        } else if width < current {
            while *self.indents.last().unwrap_or(&0) > width {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if *self.indents.last().unwrap_or(&0) != width {
                return Err(self.err("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn lex_name(&mut self) -> ParseResult<()> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = word.to_ascii_lowercase();
            match lower.as_str() {
                "r" => {
                    let value = self.lex_string(true)?;
                    self.push(Tok::Str(value));
                    return Ok(());
                }
                "u" => {
                    let value = self.lex_string(false)?;
                    self.push(Tok::Str(value));
                    return Ok(());
                }
                p if p.chars().all(|c| matches!(c, 'r' | 'f' | 'b')) && p.len() <= 2 => {
                    return Err(self.err(format!(
                        "string prefix '{word}' is not supported (only plain and raw strings)"
                    )));
                }
                _ => {}
            }
        }
        self.push(Tok::Name(word));
        Ok(())
    }

    fn lex_number(&mut self) -> ParseResult<()> {
        let start = self.pos;
        if self.peek() == Some('0')
            && matches!(
                self.peek_at(1),
                Some('x') | Some('X') | Some('o') | Some('O') | Some('b') | Some('B')
            )
        {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => 16,
                Some('o') | Some('O') => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while let Some(c) = self.peek() {
                if c == '_' || c.is_digit(radix) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.err("invalid or too large integer literal"))?;
            self.push(Tok::Int(value));
            return self.reject_trailing_ident();
        }

        let mut is_float = false;
        self.eat_digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                self.eat_digits();
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid float literal '{text}'")))?;
            self.push(Tok::Float(value));
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(self.err("leading zeros in decimal integer literals are not permitted"));
            }
            let value: i64 = text
                .parse()
                .map_err(|_| self.err(format!("integer literal '{text}' is too large")))?;
            self.push(Tok::Int(value));
        }
        self.reject_trailing_ident()
    }

    fn eat_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn reject_trailing_ident(&self) -> ParseResult<()> {
        match self.peek() {
            Some('j') | Some('J') => Err(self.err("complex literals are not supported")),
            Some(c) if c == '_' || c.is_alphabetic() => Err(self.err("invalid numeric literal")),
            _ => Ok(()),
        }
    }

    fn lex_string(&mut self, raw: bool) -> ParseResult<String> {
        let quote = self.peek().ok_or_else(|| self.err("unterminated string"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let start_line = self.line;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::new(start_line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\n' {
                if !triple {
                    return Err(ParseError::new(start_line, "unterminated string literal"));
                }
                self.line += 1;
                out.push(c);
                self.pos += 1;
                continue;
            }
            if c == '\\' {
                let Some(next) = self.peek_at(1) else {
                    return Err(ParseError::new(start_line, "unterminated string literal"));
                };
                if next == '\n' {
                    self.line += 1;
                    self.pos += 2;
                    if raw {
                        out.push('\\');
                        out.push('\n');
                    }
                    continue;
                }
                if raw {
                    out.push('\\');
                    out.push(next);
                    self.pos += 2;
                    continue;
                }
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'a' => out.push('\x07'),
                    'b' => out.push('\x08'),
                    'f' => out.push('\x0c'),
                    'v' => out.push('\x0b'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'x' => out.push(self.lex_hex_escape(2)?),
                    'u' => out.push(self.lex_hex_escape(4)?),
                    'U' => out.push(self.lex_hex_escape(8)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn lex_hex_escape(&mut self, len: usize) -> ParseResult<char> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(self.err("truncated escape sequence"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        let code =
            u32::from_str_radix(&digits, 16).map_err(|_| self.err("invalid escape sequence"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.err("escape sequence is not a valid character"))
    }

    fn lex_operator(&mut self) -> ParseResult<()> {
        for op in OPERATORS {
            let len = op.len();
            if self.pos + len > self.chars.len() {
                continue;
            }
            if op.chars().zip(&self.chars[self.pos..]).all(|(a, b)| a == *b) {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => {
                        self.depth += 1;
                        if self.depth > MAX_BRACKET_DEPTH {
                            return Err(self.err("too many nested parentheses"));
                        }
                    }
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or('?');
        Err(self.err(format!("invalid character '{c}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indent_and_dedent_are_synthesised() {
        let toks = kinds("def f():\n    return 1\nx = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_number_forms() {
        assert_eq!(
            kinds("0x1f 1_000 2.5 .5 1e3")[..5],
            [
                Tok::Int(31),
                Tok::Int(1000),
                Tok::Float(2.5),
                Tok::Float(0.5),
                Tok::Float(1000.0)
            ]
        );
    }

    #[test]
    fn test_string_escapes_and_raw() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("'''x\ny'''")[0], Tok::Str("x\ny".into()));
    }

    #[test]
    fn test_fstring_rejected() {
        let err = tokenize("x = f'{y}'\n").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_bad_dedent_rejected() {
        let err = tokenize("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert!(err.to_string().contains("unindent"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_comment_only_lines_do_not_indent() {
        let toks = kinds("x = 1\n        # note\ny = 2\n");
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_nesting_limits() {
        let deep = format!("x = {}1{}\n", "(".repeat(300), ")".repeat(300));
        let err = tokenize(&deep).unwrap_err();
        assert!(err.message.contains("nested parentheses"));
    }

    #[test]
    fn test_integer_literal_overflow_is_error() {
        assert!(tokenize("x = 99999999999999999999\n").is_err());
    }
}
