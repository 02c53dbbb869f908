//! Kernel source front end for the host device
//!
//! Accepts the OpenCL C subset the pipeline's kernels are written in:
//! comments, object-like `#define`, `#ifdef`/`#ifndef`/`#else`/`#endif`,
//! `#error`, and `__kernel void` entry points with scalar and pointer
//! parameters. Bodies are checked for balanced delimiters, declared
//! identifiers and known builtins; they are not code-generated, the executor
//! runs a native implementation keyed by entry point name.
//!
//! Diagnostics are rendered the way an OpenCL compiler prints them, one
//! `<kernel>:LINE:COL: error: ...` line each.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// One compiler error with its source position (1-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<kernel>:{}:{}: error: {}", self.line, self.column, self.message)
    }
}

/// Render diagnostics as a build log
pub(crate) fn render_log(diagnostics: &[Diagnostic]) -> String {
    let mut log = String::new();
    for diagnostic in diagnostics {
        log.push_str(&diagnostic.to_string());
        log.push('\n');
    }
    let count = diagnostics.len();
    log.push_str(&format!("{count} error{} generated.\n", if count == 1 { "" } else { "s" }));
    log
}

/// How a kernel parameter is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Scalar,
    /// `__global const T *`
    ReadOnlyBuffer,
    /// `__global T *`
    Buffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Param {
    pub name: String,
    /// Element type for buffers, value type for scalars
    pub ty: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryPoint {
    pub name: String,
    pub params: Vec<Param>,
    /// Body tokens with parameters renamed `$0, $1, ...` and locals `%0, %1, ...`
    pub shape: Vec<String>,
    line: usize,
    column: usize,
}

/// A successfully compiled source
#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledSource {
    pub entry_points: Vec<EntryPoint>,
    pub defines: HashMap<String, String>,
}

impl CompiledSource {
    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|entry| entry.name == name)
    }

    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CompileError {
    /// The option string itself is malformed
    InvalidOptions(String),
    /// The source has errors
    Source(Vec<Diagnostic>),
}

/// Parse a build option string into the macros it defines.
///
/// Accepts `-D NAME`, `-D NAME=VALUE`, `-DNAME[=VALUE]`, `-cl-*`, `-w` and
/// `-W*`.
pub(crate) fn parse_options(options: &str) -> Result<HashMap<String, String>, String> {
    let mut defines = HashMap::new();
    let mut words = options.split_whitespace();

    while let Some(word) = words.next() {
        let definition = if word == "-D" {
            words
                .next()
                .ok_or_else(|| "argument to '-D' is missing (expected 1 value)".to_string())?
        } else if let Some(rest) = word.strip_prefix("-D") {
            rest
        } else if word.starts_with("-cl-") || word == "-w" || word.starts_with("-W") {
            continue;
        } else {
            return Err(format!("unknown argument: '{word}'"));
        };

        let (name, value) = definition.split_once('=').unwrap_or((definition, "1"));
        if !is_identifier(name) {
            return Err(format!("macro name must be an identifier: '{name}'"));
        }
        defines.insert(name.to_string(), value.to_string());
    }

    Ok(defines)
}

/// Compile `source` with `options`
pub(crate) fn compile(source: &str, options: &str) -> Result<CompiledSource, CompileError> {
    let defines = parse_options(options).map_err(CompileError::InvalidOptions)?;

    let stripped = strip_comments(source).map_err(|diagnostic| CompileError::Source(vec![diagnostic]))?;

    let mut diagnostics = Vec::new();
    let (lines, defines) = preprocess(&stripped, defines, &mut diagnostics);
    let tokens = tokenize(&lines, &mut diagnostics);

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        defines: &defines,
        functions: HashSet::new(),
        diagnostics: &mut diagnostics,
        end: (lines.len().max(1), lines.last().map_or(1, |line| line.len() + 1)),
    };
    let entry_points = parser.unit();

    let mut seen = HashSet::new();
    for entry in &entry_points {
        if !seen.insert(entry.name.as_str()) {
            diagnostics.push(Diagnostic::new(
                entry.line,
                entry.column,
                format!("redefinition of '{}'", entry.name),
            ));
        }
    }

    if diagnostics.is_empty() {
        Ok(CompiledSource { entry_points, defines })
    } else {
        diagnostics.sort_by_key(|d| (d.line, d.column));
        Err(CompileError::Source(diagnostics))
    }
}

/// Evaluate a macro value made of integer factors (`1024 * 1024 * 64`)
pub(crate) fn eval_integer(value: &str) -> Option<usize> {
    value
        .split('*')
        .map(|factor| {
            let factor = factor.trim().trim_start_matches('(').trim_end_matches(')').trim();
            let digits = factor.trim_end_matches(['u', 'U', 'l', 'L']);
            digits.parse::<usize>().ok()
        })
        .try_fold(1usize, |acc, factor| acc.checked_mul(factor?))
}

// ================================================================================================
// Comments and preprocessing
// ================================================================================================

fn strip_comments(source: &str) -> Result<String, Diagnostic> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let (mut line, mut column) = (1, 1);

    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('/', Some('/')) => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                let (start_line, start_column) = (line, column);
                chars.next();
                out.push_str("  ");
                column += 2;

                let mut closed = false;
                while let Some(n) = chars.next() {
                    if n == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("  ");
                        column += 2;
                        closed = true;
                        break;
                    }
                    if n == '\n' {
                        out.push('\n');
                        line += 1;
                        column = 1;
                    } else {
                        out.push(' ');
                        column += 1;
                    }
                }
                if !closed {
                    return Err(Diagnostic::new(start_line, start_column, "unterminated /* comment"));
                }
            }
            _ => {
                out.push(c);
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
        }
    }

    Ok(out)
}

struct Conditional {
    active: bool,
    else_seen: bool,
    line: usize,
    column: usize,
}

/// Resolve directives. Returns one entry per source line, with directive and
/// excluded lines blanked so positions stay stable.
fn preprocess(
    text: &str,
    mut defines: HashMap<String, String>,
    diagnostics: &mut Vec<Diagnostic>,
) -> (Vec<String>, HashMap<String, String>) {
    let mut lines = Vec::new();
    let mut stack: Vec<Conditional> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let active = stack.iter().all(|c| c.active);
        let trimmed = raw.trim_start();

        let Some(directive) = trimmed.strip_prefix('#') else {
            lines.push(if active { raw.to_string() } else { String::new() });
            continue;
        };
        lines.push(String::new());

        let column = raw.len() - trimmed.len() + 1;
        let directive = directive.trim_start();
        let (keyword, rest) = directive
            .split_once(char::is_whitespace)
            .map_or((directive, ""), |(k, r)| (k, r.trim()));

        match keyword {
            "ifdef" | "ifndef" => {
                let defined = defines.contains_key(rest);
                stack.push(Conditional {
                    active: if keyword == "ifdef" { defined } else { !defined },
                    else_seen: false,
                    line,
                    column,
                });
            }
            "else" => match stack.last_mut() {
                Some(top) if !top.else_seen => {
                    top.active = !top.active;
                    top.else_seen = true;
                }
                Some(_) => diagnostics.push(Diagnostic::new(line, column, "#else after #else")),
                None => diagnostics.push(Diagnostic::new(line, column, "#else without #if")),
            },
            "endif" => {
                if stack.pop().is_none() {
                    diagnostics.push(Diagnostic::new(line, column, "#endif without #if"));
                }
            }
            _ if !active => {}
            "define" => {
                let (name, value) = rest
                    .split_once(char::is_whitespace)
                    .map_or((rest, ""), |(n, v)| (n, v.trim()));
                if name.contains('(') {
                    diagnostics.push(Diagnostic::new(line, column, "function-like macros are not supported"));
                } else if !is_identifier(name) {
                    diagnostics.push(Diagnostic::new(line, column, "macro name must be an identifier"));
                } else {
                    defines.insert(name.to_string(), value.to_string());
                }
            }
            "undef" => {
                defines.remove(rest);
            }
            "error" => diagnostics.push(Diagnostic::new(line, column, rest.to_string())),
            "pragma" => {}
            "" => {}
            other => diagnostics.push(Diagnostic::new(
                line,
                column,
                format!("invalid preprocessing directive '#{other}'"),
            )),
        }
    }

    for open in stack {
        diagnostics.push(Diagnostic::new(open.line, open.column, "unterminated conditional directive"));
    }

    (lines, defines)
}

// ================================================================================================
// Tokens
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: usize,
    column: usize,
}

impl Token {
    fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

const TWO_CHAR_PUNCT: [&str; 15] = [
    "+=", "-=", "*=", "/=", "<=", ">=", "==", "!=", "++", "--", "&&", "||", "<<", ">>", "->",
];
const ONE_CHAR_PUNCT: &str = "(){}[];,=+-*/<>!&|^%?:.~";

fn tokenize(lines: &[String], diagnostics: &mut Vec<Diagnostic>) -> Vec<Token> {
    let mut tokens = Vec::new();

    for (index, text) in lines.iter().enumerate() {
        let line = index + 1;
        let bytes = text.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            let c = bytes[i] as char;
            let start = i;

            let kind = if c.is_whitespace() {
                i += 1;
                continue;
            } else if c.is_ascii_alphabetic() || c == '_' {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                TokenKind::Ident
            } else if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                TokenKind::Number
            } else if c == '"' {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += 1;
                }
                if i == bytes.len() {
                    diagnostics.push(Diagnostic::new(line, start + 1, "missing terminating '\"' character"));
                    break;
                }
                i += 1;
                TokenKind::Str
            } else if text.get(i..i + 2).is_some_and(|pair| TWO_CHAR_PUNCT.contains(&pair)) {
                i += 2;
                TokenKind::Punct
            } else if ONE_CHAR_PUNCT.contains(c) {
                i += 1;
                TokenKind::Punct
            } else {
                let shown = text[start..].chars().next().unwrap_or(c);
                diagnostics.push(Diagnostic::new(line, start + 1, format!("unexpected character '{shown}'")));
                i += shown.len_utf8();
                continue;
            };

            tokens.push(Token {
                kind,
                text: text[start..i].to_string(),
                line,
                column: start + 1,
            });
        }
    }

    tokens
}

// ================================================================================================
// Parser
// ================================================================================================

const SCALAR_TYPES: [&str; 16] = [
    "float", "double", "half", "int", "uint", "long", "ulong", "short", "ushort", "char", "uchar", "bool",
    "size_t", "ptrdiff_t", "unsigned", "void",
];

const QUALIFIERS: [&str; 14] = [
    "const",
    "__global",
    "global",
    "__constant",
    "constant",
    "__local",
    "local",
    "__private",
    "private",
    "restrict",
    "__restrict",
    "volatile",
    "__read_only",
    "__write_only",
];

const ADDRESS_SPACES: [&str; 6] = ["__global", "global", "__constant", "constant", "__local", "local"];

const KEYWORDS: [&str; 12] = [
    "for", "if", "else", "while", "do", "return", "break", "continue", "sizeof", "switch", "case", "default",
];

const BUILTINS: [&str; 24] = [
    "get_global_id",
    "get_global_size",
    "get_global_offset",
    "get_local_id",
    "get_local_size",
    "get_group_id",
    "get_num_groups",
    "get_work_dim",
    "barrier",
    "mem_fence",
    "mad",
    "fma",
    "min",
    "max",
    "clamp",
    "sqrt",
    "exp",
    "log",
    "fabs",
    "floor",
    "ceil",
    "printf",
    "CLK_LOCAL_MEM_FENCE",
    "CLK_GLOBAL_MEM_FENCE",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_type(name: &str) -> bool {
    SCALAR_TYPES.contains(&name)
}

fn is_reserved(name: &str) -> bool {
    is_type(name) || QUALIFIERS.contains(&name) || KEYWORDS.contains(&name) || BUILTINS.contains(&name)
}

/// Marker for a structural error after which parsing stops
struct Abort;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    defines: &'a HashMap<String, String>,
    functions: HashSet<String>,
    diagnostics: &'a mut Vec<Diagnostic>,
    end: (usize, usize),
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error_here(&mut self, message: impl Into<String>) -> Abort {
        let (line, column) = self.peek().map_or(self.end, |t| (t.line, t.column));
        self.diagnostics.push(Diagnostic::new(line, column, message));
        Abort
    }

    fn expect(&mut self, text: &str) -> Result<Token, Abort> {
        match self.peek() {
            Some(token) if token.is(text) => Ok(self.bump().ok_or(Abort)?),
            _ => Err(self.error_here(format!("expected '{text}'"))),
        }
    }

    fn unit(&mut self) -> Vec<EntryPoint> {
        let mut entries = Vec::new();

        while let Some(token) = self.peek() {
            let result = if token.is("__kernel") || token.is("kernel") {
                self.kernel().map(|entry| entries.push(entry))
            } else {
                self.skip_item()
            };
            if result.is_err() {
                break;
            }
        }

        entries
    }

    /// Skip a top-level declaration or helper function, remembering its name
    fn skip_item(&mut self) -> Result<(), Abort> {
        let mut last_ident: Option<String> = None;
        let mut named = false;

        while let Some(token) = self.bump() {
            match token.text.as_str() {
                ";" => return Ok(()),
                "(" if !named => {
                    if let Some(name) = last_ident.take() {
                        self.functions.insert(name);
                    }
                    named = true;
                    self.balanced("(", ")")?;
                }
                "(" => self.balanced("(", ")")?,
                "{" => {
                    self.balanced("{", "}")?;
                    return Ok(());
                }
                _ if token.kind == TokenKind::Ident => last_ident = Some(token.text),
                _ => {}
            }
        }

        Err(self.error_here("expected ';' after top level declarator"))
    }

    /// Consume up to and including the closer matching an already consumed opener
    fn balanced(&mut self, open: &str, close: &str) -> Result<(), Abort> {
        let mut depth = 1usize;
        while let Some(token) = self.bump() {
            if token.is(open) {
                depth += 1;
            } else if token.is(close) {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(self.error_here(format!("expected '{close}'")))
    }

    fn kernel(&mut self) -> Result<EntryPoint, Abort> {
        self.bump();

        match self.peek() {
            Some(token) if token.is("void") => {
                self.bump();
            }
            Some(_) => return Err(self.error_here("kernel must have void return type")),
            None => return Err(self.error_here("expected function declarator")),
        }

        let name = match self.bump() {
            Some(token) if token.kind == TokenKind::Ident && !is_reserved(&token.text) => token,
            _ => {
                self.pos -= 1;
                return Err(self.error_here("expected identifier"));
            }
        };

        self.expect("(")?;
        let params = self.params()?;
        self.expect("{")?;
        let start = self.pos;
        self.body(&params);
        let end = self.pos.saturating_sub(1).clamp(start, self.tokens.len());
        let shape = body_shape(&self.tokens[start..end], &params);

        Ok(EntryPoint {
            name: name.text,
            params,
            shape,
            line: name.line,
            column: name.column,
        })
    }

    fn params(&mut self) -> Result<Vec<Param>, Abort> {
        let mut params = Vec::new();

        if self.peek().is_some_and(|t| t.is(")")) {
            self.bump();
            return Ok(params);
        }
        if self.peek().is_some_and(|t| t.is("void")) && self.tokens.get(self.pos + 1).is_some_and(|t| t.is(")")) {
            self.pos += 2;
            return Ok(params);
        }

        loop {
            let mut declarator = Vec::new();
            loop {
                match self.bump() {
                    Some(token) if token.is(",") || token.is(")") => {
                        let done = token.is(")");
                        params.push(self.param(&declarator, &token)?);
                        if done {
                            return Ok(params);
                        }
                        break;
                    }
                    Some(token) if token.is("{") || token.is(";") => {
                        self.pos -= 1;
                        return Err(self.error_here("expected ')'"));
                    }
                    Some(token) => declarator.push(token),
                    None => return Err(self.error_here("expected ')'")),
                }
            }
        }
    }

    fn param(&mut self, declarator: &[Token], terminator: &Token) -> Result<Param, Abort> {
        let Some(name) = declarator.last() else {
            self.diagnostics.push(Diagnostic::new(
                terminator.line,
                terminator.column,
                "expected parameter declarator",
            ));
            return Err(Abort);
        };
        if name.kind != TokenKind::Ident || is_reserved(&name.text) {
            self.diagnostics
                .push(Diagnostic::new(name.line, name.column, "expected parameter name"));
            return Err(Abort);
        }

        let specifiers = &declarator[..declarator.len() - 1];
        let pointer = specifiers.iter().any(|t| t.is("*"));
        let is_const = specifiers.iter().any(|t| t.is("const"));
        let address_space = specifiers.iter().any(|t| ADDRESS_SPACES.contains(&t.text.as_str()));

        let mut ty = None;
        for token in specifiers {
            if token.is("*") || QUALIFIERS.contains(&token.text.as_str()) {
                continue;
            }
            if !is_type(&token.text) {
                self.diagnostics.push(Diagnostic::new(
                    token.line,
                    token.column,
                    format!("unknown type name '{}'", token.text),
                ));
                return Err(Abort);
            }
            ty = Some(token.text.clone());
        }

        let Some(ty) = ty else {
            self.diagnostics.push(Diagnostic::new(
                name.line,
                name.column,
                "type specifier missing, defaults to 'int'",
            ));
            return Err(Abort);
        };

        if pointer && !address_space {
            self.diagnostics.push(Diagnostic::new(
                name.line,
                name.column,
                "pointer arguments to kernel functions must reside in '__global', '__constant' or '__local' address space",
            ));
            return Err(Abort);
        }

        let kind = match (pointer, is_const) {
            (false, _) => ParamKind::Scalar,
            (true, true) => ParamKind::ReadOnlyBuffer,
            (true, false) => ParamKind::Buffer,
        };

        Ok(Param {
            name: name.text.clone(),
            ty,
            kind,
        })
    }

    /// Check a kernel body. Undeclared names are reported and checking
    /// continues; a delimiter mismatch ends the body.
    fn body(&mut self, params: &[Param]) {
        let mut declared: HashSet<String> = params.iter().map(|p| p.name.clone()).collect();
        let mut closers: Vec<&'static str> = Vec::new();

        while let Some(token) = self.bump() {
            match token.text.as_str() {
                "{" => closers.push("}"),
                "(" => closers.push(")"),
                "[" => closers.push("]"),
                "}" | ")" | "]" => match closers.pop() {
                    Some(expected) if token.is(expected) => {}
                    None if token.is("}") => return,
                    Some(expected) => {
                        self.diagnostics.push(Diagnostic::new(
                            token.line,
                            token.column,
                            format!("expected '{expected}'"),
                        ));
                        return;
                    }
                    None => {
                        self.diagnostics.push(Diagnostic::new(
                            token.line,
                            token.column,
                            format!("extraneous '{}'", token.text),
                        ));
                        return;
                    }
                },
                _ if token.kind == TokenKind::Ident => self.identifier(self.pos - 1, &mut declared),
                _ => {}
            }
        }

        let expected = closers.pop().unwrap_or("}");
        let (line, column) = self.end;
        self.diagnostics
            .push(Diagnostic::new(line, column, format!("expected '{expected}'")));
    }

    fn identifier(&mut self, index: usize, declared: &mut HashSet<String>) {
        let token = &self.tokens[index];
        let name = token.text.as_str();
        let previous = index.checked_sub(1).map(|i| &self.tokens[i]);

        if previous.is_some_and(|p| p.is(".") || p.is("->")) || is_reserved(name) {
            return;
        }

        // `T name` or `T *name` declares a local
        let mut back = index;
        while back > 0 && self.tokens[back - 1].is("*") {
            back -= 1;
        }
        if back > 0 && is_type(&self.tokens[back - 1].text) {
            declared.insert(name.to_string());
            return;
        }

        if declared.contains(name) || self.defines.contains_key(name) || self.functions.contains(name) {
            return;
        }

        let message = if self.tokens.get(index + 1).is_some_and(|t| t.is("(")) {
            format!("implicit declaration of function '{name}' is invalid in OpenCL")
        } else {
            format!("use of undeclared identifier '{name}'")
        };
        self.diagnostics.push(Diagnostic::new(token.line, token.column, message));
    }
}

/// Spell a kernel body independently of the names it chose for its
/// parameters and locals, so two bodies compare equal when they compute the
/// same thing.
fn body_shape<'t>(tokens: &'t [Token], params: &'t [Param]) -> Vec<String> {
    let mut names: HashMap<&'t str, String> = params
        .iter()
        .enumerate()
        .map(|(index, param)| (param.name.as_str(), format!("${index}")))
        .collect();
    let mut locals = 0usize;

    tokens
        .iter()
        .enumerate()
        .map(|(index, token)| {
            if token.kind != TokenKind::Ident || is_reserved(&token.text) {
                return token.text.clone();
            }

            let mut back = index;
            while back > 0 && tokens[back - 1].is("*") {
                back -= 1;
            }
            if back > 0 && is_type(&tokens[back - 1].text) {
                names.insert(token.text.as_str(), format!("%{locals}"));
                locals += 1;
            }

            names.get(token.text.as_str()).cloned().unwrap_or_else(|| token.text.clone())
        })
        .collect()
}
