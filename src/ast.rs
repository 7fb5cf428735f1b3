//! The typed AST
//!
//! Produced by `lower.rs` from the parse tree. Every expression node is
//! annotated with its resolved `CType` and its value category
//! (lvalue/rvalue) per §3 of the design; every statement and declaration
//! form from the supported C99 subset gets its own variant, matched
//! exhaustively by the IR emitter.

use crate::error::Span;
use crate::types::CType;

/// Whether an expression denotes an object location (`lvalue`) or a
/// standalone value (`rvalue`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCategory {
    LValue,
    RValue,
}

/// A binary operator, already disambiguated from its syntax (`+` is always
/// `Add`, never `UnaryPlus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    LogAnd,
    LogOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Neg,
    BitNot,
    LogNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

/// A resolved reference to a declaration: which storage does this
/// identifier refer to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A function or local parameter/variable, identified by its slot id
    /// (see `codegen::state::SlotId`).
    Slot(usize),
    /// A function, identified by name (functions aren't given slots - calls
    /// address them directly by their IR symbol).
    Function(String),
}

/// A typed expression node: kind, span, resolved type, value category, and
/// children. Every operator node's `ty` is already the result of applying
/// promotion/usual-arithmetic-conversion; assignment nodes' `ty` equals the
/// lhs type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: CType,
    pub category: ValueCategory,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(i64),
    FloatLiteral(f64),
    CharLiteral(i64),
    BoolLiteral(bool),

    /// A resolved identifier reference.
    Ident { name: String, binding: Binding },

    /// `a[i]`.
    Index { array: Box<Expr>, index: Box<Expr> },
    /// `s.field`.
    Member { base: Box<Expr>, field: String },
    /// `p->field`, lowered the same as `(*p).field` would be, but since this
    /// subset has no pointer dereference operator it only ever arises from
    /// struct-by-reference parameters treated as the struct's address.
    MemberArrow { base: Box<Expr>, field: String },

    IncDec { op: IncDecOp, operand: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    /// Binary arithmetic/relational/bitwise op. `lhs_conv`/`rhs_conv` are the
    /// operand types *after* the usual arithmetic conversions - the operand
    /// subexpressions keep their own original `ty`; the emitter inserts the
    /// `cnv__` snippet calls that bridge the two.
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        operand_ty: CType,
    },
    /// `a && b` / `a || b`, kept distinct from `Binary` because they lower
    /// to short-circuit control flow rather than a snippet call.
    Logical { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },

    Assign { lhs: Box<Expr>, rhs: Box<Expr> },
    /// `x OP= e`, still carrying the arithmetic op it desugars to.
    CompoundAssign { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },

    /// `(T)e`; `from` is `e`'s type, kept for snippet lookup.
    Cast { from: CType, operand: Box<Expr> },

    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },

    Comma { lhs: Box<Expr>, rhs: Box<Expr> },

    Call {
        callee: String,
        args: Vec<Expr>,
    },

    /// `(T){ ... }`: a temporary object with its own slot, initialized like
    /// a local declaration.
    CompoundLiteral {
        ty: CType,
        initializers: Vec<Expr>,
    },

    /// Array-to-pointer decay inserted by `lower.rs` wherever an array
    /// lvalue is used as a value rather than subscripted directly - the
    /// inner expression keeps its array type, the outer node's `ty` is the
    /// decayed pointer type.
    Decay(Box<Expr>),
}

/// A declared parameter or local.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub ty: CType,
    pub initializer: Option<Expr>,
    pub slot: usize,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Expr(Expr),
    Declaration(Declaration),
    Compound { scope: usize, items: Vec<Statement> },
    If {
        cond: Expr,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While { cond: Expr, body: Box<Statement> },
    DoWhile { body: Box<Statement>, cond: Expr },
    For {
        scope: usize,
        init: Option<Box<Statement>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Statement>,
    },
    Break { span: Span },
    Continue { span: Span },
    Return { value: Option<Expr>, span: Span },
    Labeled { label: String, stmt: Box<Statement> },
    /// A no-op statement (`;`), or the result of stripping an unsupported
    /// construct that lowering decided to recover from for single-pass
    /// diagnostics - never produced on a successful compile.
    Empty,
}

/// A function parameter, prior to array decay (decay is applied when the
/// parameter's slot is created, not here).
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: CType,
    pub slot: usize,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub ret: CType,
    pub params: Vec<Param>,
    pub body: Statement,
    pub span: Span,
}

/// A function declared but not defined in this translation unit (forward
/// declaration / prototype).
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: CType,
    pub params: Vec<CType>,
    pub variadic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
    pub prototypes: Vec<FunctionDecl>,
}

impl Program {
    pub fn find_function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}
