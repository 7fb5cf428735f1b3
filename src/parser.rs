//! Lexer and parser driver for the supported C99 subset
//!
//! `grammar.rs` carries the generic, rule-table-driven Earley engine
//! required when a host supplies its own grammar (§6 "Grammar rule table").
//! For the default, compiled-in grammar this module instead drives a
//! hand-written recursive-descent/Pratt parser directly over a token
//! stream, the same way the teacher's own `parser.rs` is a hand-rolled
//! driver with a `pos` cursor rather than a generic engine - tokens are
//! known statically here, so a table-driven chart buys nothing but
//! overhead. The two share one contract: both produce a concrete parse
//! tree (`Cst` here) keyed by source span, ready for `lower.rs`.

use crate::error::{CompileError, ErrorKind, Span};

/// A lexical token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Ident(String),
    IntLit { text: String },
    FloatLit { text: String },
    CharLit(i64),
    Punct(&'static str),
    Keyword(&'static str),
    Eof,
}

const KEYWORDS: &[&str] = &[
    "int", "char", "short", "long", "unsigned", "signed", "float", "double", "void", "_Bool",
    "struct", "if", "else", "while", "do", "for", "break", "continue", "return",
];

/// Strip `//` and `/* */` comments and join `\` line continuations, per the
/// external-interfaces contract: these transforms happen before
/// tokenization, not during it.
pub fn preprocess(source: &str) -> String {
    let joined = source.replace("\\\n", "");
    let mut out = String::with_capacity(joined.len());
    let bytes = joined.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                out.push(' ');
                i += 1;
            }
            i += 2;
            out.push(' ');
        } else {
            let ch = joined[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let mut is_float = c == '.';
            let mut j = i + 1;
            if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                j += 1;
                while j < chars.len() && chars[j].is_ascii_hexdigit() {
                    j += 1;
                }
                if matches!(chars.get(j), Some('p') | Some('P')) {
                    is_float = true;
                    j += 1;
                    if matches!(chars.get(j), Some('+') | Some('-')) {
                        j += 1;
                    }
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
            } else {
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                if chars.get(j) == Some(&'.') {
                    is_float = true;
                    j += 1;
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
                if matches!(chars.get(j), Some('e') | Some('E')) {
                    is_float = true;
                    j += 1;
                    if matches!(chars.get(j), Some('+') | Some('-')) {
                        j += 1;
                    }
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
            }
            while j < chars.len() && matches!(chars[j], 'u' | 'U' | 'l' | 'L' | 'f' | 'F') {
                j += 1;
            }
            let text: String = chars[i..j].iter().collect();
            let span = Span::new(byte_of(source, start), byte_of(source, j));
            tokens.push(Token {
                kind: if is_float {
                    TokKind::FloatLit { text }
                } else {
                    TokKind::IntLit { text }
                },
                span,
            });
            i = j;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let text: String = chars[i..j].iter().collect();
            let span = Span::new(byte_of(source, start), byte_of(source, j));
            let kind = if let Some(kw) = KEYWORDS.iter().find(|&&k| k == text) {
                TokKind::Keyword(kw)
            } else {
                TokKind::Ident(text)
            };
            tokens.push(Token { kind, span });
            i = j;
            continue;
        }
        if c == '\'' {
            let mut j = i + 1;
            let value: i64;
            if chars.get(j) == Some(&'\\') {
                let esc = chars.get(j + 1).copied().ok_or_else(|| {
                    CompileError::new(
                        ErrorKind::LexError,
                        Span::new(start, start + 1),
                        "unterminated character constant",
                    )
                })?;
                value = match esc {
                    'n' => 10,
                    't' => 9,
                    '0' => 0,
                    '\\' => 92,
                    '\'' => 39,
                    other => other as i64,
                };
                j += 2;
            } else {
                let ch = chars.get(j).copied().ok_or_else(|| {
                    CompileError::new(
                        ErrorKind::LexError,
                        Span::new(start, start + 1),
                        "unterminated character constant",
                    )
                })?;
                value = ch as i64;
                j += 1;
            }
            if chars.get(j) != Some(&'\'') {
                return Err(CompileError::new(
                    ErrorKind::LexError,
                    Span::new(start, byte_of(source, j)),
                    "unterminated character constant",
                ));
            }
            j += 1;
            tokens.push(Token {
                kind: TokKind::CharLit(value),
                span: Span::new(byte_of(source, start), byte_of(source, j)),
            });
            i = j;
            continue;
        }
        // Punctuation, longest-match first.
        const PUNCTS: &[&str] = &[
            "<<=", ">>=", "...", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=",
            "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "->", "(", ")", "{", "}", "[", "]",
            ";", ",", "=", "+", "-", "*", "/", "%", "&", "|", "^", "~", "!", "<", ">", "?", ":",
            ".",
        ];
        let rest: String = chars[i..].iter().collect();
        if let Some(p) = PUNCTS.iter().find(|p| rest.starts_with(*p)) {
            let j = i + p.chars().count();
            tokens.push(Token {
                kind: TokKind::Punct(p),
                span: Span::new(byte_of(source, start), byte_of(source, j)),
            });
            i = j;
            continue;
        }
        return Err(CompileError::new(
            ErrorKind::LexError,
            Span::new(start, start + 1),
            format!("unexpected character '{c}'"),
        ));
    }
    let end = byte_of(source, chars.len());
    tokens.push(Token {
        kind: TokKind::Eof,
        span: Span::new(end, end),
    });
    Ok(tokens)
}

fn byte_of(source: &str, char_index: usize) -> usize {
    source.chars().take(char_index).map(|c| c.len_utf8()).sum()
}

/// A concrete syntax tree node, produced by the parser driver and consumed
/// by `lower.rs`. Untyped: no scope resolution or C-type analysis has
/// happened yet.
#[derive(Debug, Clone)]
pub enum Cst {
    IntLit { text: String, span: Span },
    FloatLit { text: String, span: Span },
    CharLit { value: i64, span: Span },
    Ident { name: String, span: Span },
    Index { array: Box<Cst>, index: Box<Cst>, span: Span },
    Member { base: Box<Cst>, field: String, arrow: bool, span: Span },
    IncDec { op: &'static str, operand: Box<Cst>, prefix: bool, span: Span },
    Unary { op: &'static str, operand: Box<Cst>, span: Span },
    Binary { op: &'static str, lhs: Box<Cst>, rhs: Box<Cst>, span: Span },
    Assign { op: &'static str, lhs: Box<Cst>, rhs: Box<Cst>, span: Span },
    Cast { type_name: TypeName, operand: Box<Cst>, span: Span },
    Conditional { cond: Box<Cst>, then_expr: Box<Cst>, else_expr: Box<Cst>, span: Span },
    Comma { lhs: Box<Cst>, rhs: Box<Cst>, span: Span },
    Call { callee: String, args: Vec<Cst>, span: Span },
    /// `(T){ initializers... }` - a temporary object, initialized like an
    /// aggregate local declaration at the point of use.
    CompoundLiteral { type_name: TypeName, initializers: Vec<Cst>, span: Span },

    ExprStmt(Box<Cst>),
    Decl {
        type_name: TypeName,
        name: String,
        array_dims: Vec<Option<Box<Cst>>>,
        init: Option<Box<Cst>>,
        span: Span,
    },
    /// Several comma-separated declarators sharing one base type
    /// (`int i = 0, j[3];`), flattened by `lower.rs` into sibling
    /// declarations in the enclosing compound statement.
    DeclList(Vec<Cst>, Span),
    Compound { items: Vec<Cst>, span: Span },
    If { cond: Box<Cst>, then_branch: Box<Cst>, else_branch: Option<Box<Cst>>, span: Span },
    While { cond: Box<Cst>, body: Box<Cst>, span: Span },
    DoWhile { body: Box<Cst>, cond: Box<Cst>, span: Span },
    For {
        init: Option<Box<Cst>>,
        cond: Option<Box<Cst>>,
        step: Option<Box<Cst>>,
        body: Box<Cst>,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Return { value: Option<Box<Cst>>, span: Span },
    Empty(Span),

    FunctionDef {
        ret: TypeName,
        name: String,
        params: Vec<(TypeName, String)>,
        body: Box<Cst>,
        span: Span,
    },
    FunctionDecl {
        ret: TypeName,
        name: String,
        params: Vec<TypeName>,
        variadic: bool,
        span: Span,
    },
    TranslationUnit(Vec<Cst>),
}

/// A parsed type specifier, before `lower.rs` resolves it against the
/// scope's tag namespace into a `CType`.
#[derive(Debug, Clone)]
pub enum TypeName {
    Void,
    Bool,
    Char { unsigned: bool },
    Short { unsigned: bool },
    Int { unsigned: bool },
    Long { unsigned: bool },
    LongLong { unsigned: bool },
    Float,
    Double,
    LongDouble,
    /// `struct Name { field decls }`, inline at the point of use - this
    /// subset has no separate struct-declaration statement.
    Struct { name: Option<String>, fields: Option<Vec<FieldDecl>> },
}

/// One field declarator inside a struct body. `array_dims` mirrors
/// `Cst::Decl`'s `array_dims`: each entry is a constant-or-runtime extent
/// expression, or `None` for `T f[]` (only legal as the last field of a
/// flexible-array-member-free subset, rejected by `lower.rs` like any other
/// incomplete array outside a parameter).
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub ty: TypeName,
    pub name: String,
    pub array_dims: Vec<Option<Box<Cst>>>,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Parser, CompileError> {
        let preprocessed = preprocess(source);
        let tokens = lex(&preprocessed)?;
        Ok(Parser { tokens, pos: 0 })
    }

    /// Parse a whole translation unit: a sequence of function definitions
    /// and prototypes.
    pub fn parse_translation_unit(&mut self) -> Result<Cst, CompileError> {
        let mut items = Vec::new();
        while !self.at_eof() {
            items.push(self.parse_external_decl()?);
        }
        Ok(Cst::TranslationUnit(items))
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokKind::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_punct(&self, p: &str) -> bool {
        matches!(&self.peek().kind, TokKind::Punct(q) if *q == p)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokKind::Keyword(k) if *k == kw)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_punct(&mut self, p: &str) -> Result<Span, CompileError> {
        if self.peek_punct(p) {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(&format!("'{p}'")))
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        CompileError::new(
            ErrorKind::SyntaxError,
            self.peek().span,
            format!("expected {expected}, found {:?}", self.peek().kind),
        )
    }

    fn expect_ident(&mut self) -> Result<(String, Span), CompileError> {
        match self.peek().kind.clone() {
            TokKind::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn looks_like_type(&self) -> bool {
        matches!(
            self.peek().kind,
            TokKind::Keyword(
                "int" | "char" | "short" | "long" | "unsigned" | "signed" | "float" | "double"
                    | "void" | "_Bool" | "struct"
            )
        )
    }

    fn parse_type_name(&mut self) -> Result<TypeName, CompileError> {
        let mut unsigned = false;
        let mut longs = 0u32;
        let mut base: Option<TypeName> = None;
        loop {
            match self.peek().kind.clone() {
                TokKind::Keyword("unsigned") => {
                    unsigned = true;
                    self.advance();
                }
                TokKind::Keyword("signed") => {
                    self.advance();
                }
                TokKind::Keyword("long") => {
                    longs += 1;
                    self.advance();
                }
                TokKind::Keyword("int") if base.is_none() || matches!(base, Some(TypeName::Int { .. } | TypeName::Long { .. })) => {
                    self.advance();
                    base = Some(TypeName::Int { unsigned: false });
                }
                TokKind::Keyword("char") if base.is_none() => {
                    self.advance();
                    base = Some(TypeName::Char { unsigned: false });
                }
                TokKind::Keyword("short") if base.is_none() => {
                    self.advance();
                    base = Some(TypeName::Short { unsigned: false });
                }
                TokKind::Keyword("float") if base.is_none() => {
                    self.advance();
                    base = Some(TypeName::Float);
                }
                TokKind::Keyword("double") if base.is_none() => {
                    self.advance();
                    base = Some(TypeName::Double);
                }
                TokKind::Keyword("void") if base.is_none() => {
                    self.advance();
                    base = Some(TypeName::Void);
                }
                TokKind::Keyword("_Bool") if base.is_none() => {
                    self.advance();
                    base = Some(TypeName::Bool);
                }
                TokKind::Keyword("struct") if base.is_none() => {
                    self.advance();
                    let name = match self.peek().kind.clone() {
                        TokKind::Ident(n) => {
                            self.advance();
                            Some(n)
                        }
                        _ => None,
                    };
                    let fields = if self.peek_punct("{") {
                        Some(self.parse_struct_fields()?)
                    } else {
                        None
                    };
                    base = Some(TypeName::Struct { name, fields });
                }
                _ => break,
            }
        }
        let base = base.unwrap_or(TypeName::Int { unsigned: false });
        let resolved = match (base, longs) {
            (TypeName::Int { .. }, 0) => TypeName::Int { unsigned },
            (TypeName::Int { .. }, 1) => TypeName::Long { unsigned },
            (TypeName::Int { .. }, _) => TypeName::LongLong { unsigned },
            (TypeName::Double, n) if n > 0 => TypeName::LongDouble,
            (TypeName::Char { .. }, _) => TypeName::Char { unsigned },
            (TypeName::Short { .. }, _) => TypeName::Short { unsigned },
            (other, _) => other,
        };
        Ok(resolved)
    }

    /// One struct-body line can declare several comma-separated fields
    /// sharing a base type (`int i1, i2;`), each with its own array dims,
    /// the same grammar as an ordinary declaration statement.
    fn parse_struct_fields(&mut self) -> Result<Vec<FieldDecl>, CompileError> {
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        while !self.peek_punct("}") {
            let base_ty = self.parse_type_name()?;
            loop {
                let (name, _) = self.expect_ident()?;
                let mut dims = Vec::new();
                while self.peek_punct("[") {
                    self.advance();
                    let dim = if self.peek_punct("]") {
                        None
                    } else {
                        Some(Box::new(self.parse_expression()?))
                    };
                    self.expect_punct("]")?;
                    dims.push(dim);
                }
                fields.push(FieldDecl { ty: base_ty.clone(), name, array_dims: dims });
                if self.peek_punct(",") {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect_punct(";")?;
        }
        self.expect_punct("}")?;
        Ok(fields)
    }

    fn parse_external_decl(&mut self) -> Result<Cst, CompileError> {
        let start = self.peek().span;
        let ret = self.parse_type_name()?;
        let (name, _) = self.expect_ident()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        let mut variadic = false;
        if !self.peek_punct(")") {
            loop {
                if self.peek_punct("...") {
                    self.advance();
                    variadic = true;
                    break;
                }
                let pty = self.parse_type_name()?;
                if let TokKind::Ident(pname) = self.peek().kind.clone() {
                    self.advance();
                    params.push((pty, pname));
                } else {
                    params.push((pty, String::new()));
                }
                if self.peek_punct(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let end = self.expect_punct(")")?;
        if self.peek_punct(";") {
            self.advance();
            return Ok(Cst::FunctionDecl {
                ret,
                name,
                params: params.into_iter().map(|(t, _)| t).collect(),
                variadic,
                span: Span::new(start.start, end.end),
            });
        }
        let body = self.parse_compound_statement()?;
        let body_span = cst_span(&body);
        Ok(Cst::FunctionDef {
            ret,
            name,
            params,
            body: Box::new(body),
            span: Span::new(start.start, body_span.end),
        })
    }

    fn parse_compound_statement(&mut self) -> Result<Cst, CompileError> {
        let start = self.expect_punct("{")?;
        let mut items = Vec::new();
        while !self.peek_punct("}") {
            items.push(self.parse_statement()?);
        }
        let end = self.expect_punct("}")?;
        Ok(Cst::Compound { items, span: Span::new(start.start, end.end) })
    }

    fn parse_statement(&mut self) -> Result<Cst, CompileError> {
        if self.peek_punct("{") {
            return self.parse_compound_statement();
        }
        if self.peek_punct(";") {
            let span = self.advance().span;
            return Ok(Cst::Empty(span));
        }
        if self.peek_keyword("if") {
            let start = self.advance().span;
            self.expect_punct("(")?;
            let cond = self.parse_expression()?;
            self.expect_punct(")")?;
            let then_branch = self.parse_statement()?;
            let (else_branch, end) = if self.peek_keyword("else") {
                self.advance();
                let e = self.parse_statement()?;
                let sp = cst_span(&e);
                (Some(Box::new(e)), sp)
            } else {
                let sp = cst_span(&then_branch);
                (None, sp)
            };
            return Ok(Cst::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch,
                span: Span::new(start.start, end.end),
            });
        }
        if self.peek_keyword("while") {
            let start = self.advance().span;
            self.expect_punct("(")?;
            let cond = self.parse_expression()?;
            self.expect_punct(")")?;
            let body = self.parse_statement()?;
            let end = cst_span(&body);
            return Ok(Cst::While {
                cond: Box::new(cond),
                body: Box::new(body),
                span: Span::new(start.start, end.end),
            });
        }
        if self.peek_keyword("do") {
            let start = self.advance().span;
            let body = self.parse_statement()?;
            if !self.peek_keyword("while") {
                return Err(self.unexpected("'while'"));
            }
            self.advance();
            self.expect_punct("(")?;
            let cond = self.parse_expression()?;
            self.expect_punct(")")?;
            let end = self.expect_punct(";")?;
            return Ok(Cst::DoWhile {
                body: Box::new(body),
                cond: Box::new(cond),
                span: Span::new(start.start, end.end),
            });
        }
        if self.peek_keyword("for") {
            let start = self.advance().span;
            self.expect_punct("(")?;
            let init = if self.peek_punct(";") {
                self.advance();
                None
            } else {
                Some(Box::new(self.parse_for_init()?))
            };
            let cond = if self.peek_punct(";") {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.expect_punct(";")?;
            let step = if self.peek_punct(")") {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.expect_punct(")")?;
            let body = self.parse_statement()?;
            let end = cst_span(&body);
            return Ok(Cst::For {
                init,
                cond,
                step,
                body: Box::new(body),
                span: Span::new(start.start, end.end),
            });
        }
        if self.peek_keyword("break") {
            let start = self.advance().span;
            let end = self.expect_punct(";")?;
            return Ok(Cst::Break(Span::new(start.start, end.end)));
        }
        if self.peek_keyword("continue") {
            let start = self.advance().span;
            let end = self.expect_punct(";")?;
            return Ok(Cst::Continue(Span::new(start.start, end.end)));
        }
        if self.peek_keyword("return") {
            let start = self.advance().span;
            let value = if self.peek_punct(";") {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let end = self.expect_punct(";")?;
            return Ok(Cst::Return { value, span: Span::new(start.start, end.end) });
        }
        if self.looks_like_type() {
            return self.parse_declaration_statement();
        }
        let expr = self.parse_expression()?;
        self.expect_punct(";")?;
        Ok(Cst::ExprStmt(Box::new(expr)))
    }

    fn parse_for_init(&mut self) -> Result<Cst, CompileError> {
        if self.looks_like_type() {
            self.parse_declaration_statement()
        } else {
            let expr = self.parse_expression()?;
            self.expect_punct(";")?;
            Ok(Cst::ExprStmt(Box::new(expr)))
        }
    }

    fn parse_declaration_statement(&mut self) -> Result<Cst, CompileError> {
        let start = self.peek().span;
        let ty = self.parse_type_name()?;
        let mut decls = Vec::new();
        loop {
            let (name, name_span) = self.expect_ident()?;
            let mut dims = Vec::new();
            while self.peek_punct("[") {
                self.advance();
                let dim = if self.peek_punct("]") {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };
                self.expect_punct("]")?;
                dims.push(dim);
            }
            let (init, decl_end) = if self.peek_punct("=") {
                self.advance();
                let init_expr = self.parse_assignment_expr()?;
                let end = cst_span(&init_expr);
                (Some(Box::new(init_expr)), end)
            } else {
                (None, name_span)
            };
            decls.push(Cst::Decl {
                type_name: ty.clone(),
                name,
                array_dims: dims,
                init,
                span: Span::new(start.start, decl_end.end),
            });
            if self.peek_punct(",") {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.expect_punct(";")?;
        if decls.len() == 1 {
            Ok(decls.into_iter().next().unwrap())
        } else {
            Ok(Cst::DeclList(decls, Span::new(start.start, end.end)))
        }
    }

    // --- Expressions, precedence climbing (Pratt) -----------------

    pub fn parse_expression(&mut self) -> Result<Cst, CompileError> {
        let lhs = self.parse_assignment_expr()?;
        if self.peek_punct(",") {
            self.advance();
            let rhs = self.parse_expression()?;
            let span = Span::new(cst_span(&lhs).start, cst_span(&rhs).end);
            return Ok(Cst::Comma { lhs: Box::new(lhs), rhs: Box::new(rhs), span });
        }
        Ok(lhs)
    }

    fn parse_assignment_expr(&mut self) -> Result<Cst, CompileError> {
        let lhs = self.parse_conditional_expr()?;
        const ASSIGN_OPS: &[&str] =
            &["=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>="];
        if let TokKind::Punct(p) = self.peek().kind {
            if ASSIGN_OPS.contains(&p) {
                self.advance();
                let rhs = self.parse_assignment_expr()?;
                let span = Span::new(cst_span(&lhs).start, cst_span(&rhs).end);
                return Ok(Cst::Assign { op: p, lhs: Box::new(lhs), rhs: Box::new(rhs), span });
            }
        }
        Ok(lhs)
    }

    fn parse_conditional_expr(&mut self) -> Result<Cst, CompileError> {
        let cond = self.parse_binary_expr(0)?;
        if self.peek_punct("?") {
            self.advance();
            let then_expr = self.parse_expression()?;
            self.expect_punct(":")?;
            let else_expr = self.parse_assignment_expr()?;
            let span = Span::new(cst_span(&cond).start, cst_span(&else_expr).end);
            return Ok(Cst::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            });
        }
        Ok(cond)
    }

    fn binop_precedence(p: &str) -> Option<u8> {
        Some(match p {
            "||" => 1,
            "&&" => 2,
            "|" => 3,
            "^" => 4,
            "&" => 5,
            "==" | "!=" => 6,
            "<" | ">" | "<=" | ">=" => 7,
            "<<" | ">>" => 8,
            "+" | "-" => 9,
            "*" | "/" | "%" => 10,
            _ => return None,
        })
    }

    fn parse_binary_expr(&mut self, min_prec: u8) -> Result<Cst, CompileError> {
        let mut lhs = self.parse_cast_expr()?;
        loop {
            let (op, prec) = match self.peek().kind {
                TokKind::Punct(p) => match Self::binop_precedence(p) {
                    Some(prec) if prec >= min_prec => (p, prec),
                    _ => break,
                },
                _ => break,
            };
            self.advance();
            let rhs = self.parse_binary_expr(prec + 1)?;
            let span = Span::new(cst_span(&lhs).start, cst_span(&rhs).end);
            lhs = Cst::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_cast_expr(&mut self) -> Result<Cst, CompileError> {
        if self.peek_punct("(") && self.next_looks_like_type() {
            let start = self.advance().span;
            let ty = self.parse_type_name()?;
            self.expect_punct(")")?;
            if self.peek_punct("{") {
                self.advance();
                let mut initializers = Vec::new();
                while !self.peek_punct("}") {
                    initializers.push(self.parse_assignment_expr()?);
                    if self.peek_punct(",") {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let end = self.expect_punct("}")?;
                return Ok(Cst::CompoundLiteral {
                    type_name: ty,
                    initializers,
                    span: Span::new(start.start, end.end),
                });
            }
            let operand = self.parse_cast_expr()?;
            let end = cst_span(&operand);
            return Ok(Cst::Cast {
                type_name: ty,
                operand: Box::new(operand),
                span: Span::new(start.start, end.end),
            });
        }
        self.parse_unary_expr()
    }

    fn next_looks_like_type(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(TokKind::Keyword(
                "int" | "char" | "short" | "long" | "unsigned" | "signed" | "float" | "double"
                    | "void" | "_Bool" | "struct"
            ))
        )
    }

    fn parse_unary_expr(&mut self) -> Result<Cst, CompileError> {
        if let TokKind::Punct(p @ ("+" | "-" | "~" | "!")) = self.peek().kind {
            let start = self.advance().span;
            let operand = self.parse_cast_expr()?;
            let end = cst_span(&operand);
            return Ok(Cst::Unary {
                op: p,
                operand: Box::new(operand),
                span: Span::new(start.start, end.end),
            });
        }
        if let TokKind::Punct(p @ ("++" | "--")) = self.peek().kind {
            let start = self.advance().span;
            let operand = self.parse_unary_expr()?;
            let end = cst_span(&operand);
            return Ok(Cst::IncDec {
                op: p,
                operand: Box::new(operand),
                prefix: true,
                span: Span::new(start.start, end.end),
            });
        }
        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Result<Cst, CompileError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            if self.peek_punct("[") {
                self.advance();
                let index = self.parse_expression()?;
                let end = self.expect_punct("]")?;
                let start = cst_span(&expr).start;
                expr = Cst::Index {
                    array: Box::new(expr),
                    index: Box::new(index),
                    span: Span::new(start, end.end),
                };
            } else if self.peek_punct(".") {
                self.advance();
                let (field, field_span) = self.expect_ident()?;
                let start = cst_span(&expr).start;
                expr = Cst::Member {
                    base: Box::new(expr),
                    field,
                    arrow: false,
                    span: Span::new(start, field_span.end),
                };
            } else if self.peek_punct("->") {
                self.advance();
                let (field, field_span) = self.expect_ident()?;
                let start = cst_span(&expr).start;
                expr = Cst::Member {
                    base: Box::new(expr),
                    field,
                    arrow: true,
                    span: Span::new(start, field_span.end),
                };
            } else if let TokKind::Punct(p @ ("++" | "--")) = self.peek().kind {
                let tok_span = self.advance().span;
                let start = cst_span(&expr).start;
                expr = Cst::IncDec {
                    op: p,
                    operand: Box::new(expr),
                    prefix: false,
                    span: Span::new(start, tok_span.end),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary_expr(&mut self) -> Result<Cst, CompileError> {
        match self.peek().kind.clone() {
            TokKind::IntLit { text } => {
                let span = self.advance().span;
                Ok(Cst::IntLit { text, span })
            }
            TokKind::FloatLit { text } => {
                let span = self.advance().span;
                Ok(Cst::FloatLit { text, span })
            }
            TokKind::CharLit(value) => {
                let span = self.advance().span;
                Ok(Cst::CharLit { value, span })
            }
            TokKind::Ident(name) => {
                let span = self.advance().span;
                if self.peek_punct("(") {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.peek_punct(")") {
                        loop {
                            args.push(self.parse_assignment_expr()?);
                            if self.peek_punct(",") {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    let end = self.expect_punct(")")?;
                    return Ok(Cst::Call { callee: name, args, span: Span::new(span.start, end.end) });
                }
                Ok(Cst::Ident { name, span })
            }
            TokKind::Punct("(") => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn cst_span(cst: &Cst) -> Span {
    match cst {
        Cst::IntLit { span, .. }
        | Cst::FloatLit { span, .. }
        | Cst::CharLit { span, .. }
        | Cst::Ident { span, .. }
        | Cst::Index { span, .. }
        | Cst::Member { span, .. }
        | Cst::IncDec { span, .. }
        | Cst::Unary { span, .. }
        | Cst::Binary { span, .. }
        | Cst::Assign { span, .. }
        | Cst::Cast { span, .. }
        | Cst::Conditional { span, .. }
        | Cst::Comma { span, .. }
        | Cst::Call { span, .. }
        | Cst::CompoundLiteral { span, .. }
        | Cst::Decl { span, .. }
        | Cst::Compound { span, .. }
        | Cst::If { span, .. }
        | Cst::While { span, .. }
        | Cst::DoWhile { span, .. }
        | Cst::For { span, .. }
        | Cst::Break(span)
        | Cst::Continue(span)
        | Cst::Return { span, .. }
        | Cst::Empty(span)
        | Cst::FunctionDef { span, .. }
        | Cst::FunctionDecl { span, .. } => *span,
        Cst::DeclList(_, span) => *span,
        Cst::ExprStmt(inner) => cst_span(inner),
        Cst::TranslationUnit(items) => {
            let start = items.first().map(|i| cst_span(i).start).unwrap_or(0);
            let end = items.last().map(|i| cst_span(i).end).unwrap_or(0);
            Span::new(start, end)
        }
    }
}

pub(crate) use cst_span as span_of;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let src = "int x; // comment\n/* block */ int y;";
        let out = preprocess(src);
        assert!(!out.contains("comment"));
        assert!(out.contains("int x;"));
        assert!(out.contains("int y;"));
    }

    #[test]
    fn joins_line_continuations() {
        let src = "int x = 1 +\\\n2;";
        let out = preprocess(src);
        assert_eq!(out, "int x = 1 +2;");
    }

    #[test]
    fn parses_simple_function_definition() {
        let mut parser = Parser::new("int add(int a, int b) { return a + b; }").unwrap();
        let unit = parser.parse_translation_unit().unwrap();
        match unit {
            Cst::TranslationUnit(items) => {
                assert_eq!(items.len(), 1);
                assert!(matches!(items[0], Cst::FunctionDef { .. }));
            }
            _ => panic!("expected translation unit"),
        }
    }

    #[test]
    fn parses_if_else_chain_with_dangling_else() {
        let mut parser = Parser::new(
            "int f(int a,int b){if(a==1)return 0; else if(b==2)return 5; else return 6;}",
        )
        .unwrap();
        let unit = parser.parse_translation_unit().unwrap();
        assert!(matches!(unit, Cst::TranslationUnit(_)));
    }

    #[test]
    fn parses_for_loop_with_declaration_init() {
        let mut parser =
            Parser::new("int f(int a,int b){int s=0;for(int i=0;i<a;i+=1){s+=b;} return s;}")
                .unwrap();
        assert!(parser.parse_translation_unit().is_ok());
    }

    #[test]
    fn rejects_unterminated_character_constant() {
        let err = Parser::new("int x = 'a;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LexError);
    }
}
