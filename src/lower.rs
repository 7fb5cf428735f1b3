//! AST lowering: parse tree (`Cst`) -> typed AST (`ast::{Program, FunctionDef, ...}`)
//!
//! Walks the concrete syntax tree produced by `parser.rs`, resolving every
//! identifier through `scope.rs` and annotating every expression with its
//! `CType` and value category per §4.4. Declarations allocate slot ids
//! (function-local, restarting at 0 per function); non-goal constructs that
//! did parse (e.g. a call to an undeclared function) are rejected here with
//! `UnsupportedConstruct`/`UndeclaredIdentifier` rather than in the parser.
//!
//! Grounded on the teacher's `typechecker.rs`: one big pass that both
//! checks and annotates, threading a scope/symbol table through a
//! recursive walk of the tree.

use crate::ast::{
    BinOp, Binding, Declaration, Expr, ExprKind, FunctionDecl, FunctionDef, IncDecOp, Param,
    Program, Statement, UnOp, ValueCategory,
};
use crate::error::{CompileError, ErrorKind, Span};
use crate::parser::{Cst, TypeName};
use crate::scope::{self, ScopeStack};
use crate::types::{self, ArrayExtent, CType, FloatWidth, IntWidth, Signedness};

/// Per-function lowering context: scope stack plus the slot allocator,
/// which restarts at zero for every function (slot identity is scoped to
/// one function's worth of IR, per §3's `StackSlot` invariant).
struct Lowerer {
    scopes: ScopeStack,
    next_slot: usize,
    anon_struct_counter: usize,
    /// Loop-nesting depth, to validate `break`/`continue` placement.
    loop_depth: usize,
}

impl Lowerer {
    fn new() -> Lowerer {
        Lowerer {
            scopes: ScopeStack::new(),
            next_slot: 0,
            anon_struct_counter: 0,
            loop_depth: 0,
        }
    }

    fn fresh_slot(&mut self) -> usize {
        let id = self.next_slot;
        self.next_slot += 1;
        id
    }
}

pub fn lower_translation_unit(cst: &Cst) -> Result<Program, Vec<CompileError>> {
    let items = match cst {
        Cst::TranslationUnit(items) => items,
        _ => unreachable!("parser always produces a TranslationUnit at the top level"),
    };

    let mut lowerer = Lowerer::new();
    let mut program = Program::default();
    let mut errors = Vec::new();

    for item in items {
        match item {
            Cst::FunctionDecl { ret, name, params, variadic, span } => {
                match lower_prototype(&mut lowerer, ret, name, params, *variadic, *span) {
                    Ok(decl) => program.prototypes.push(decl),
                    Err(e) => errors.push(e),
                }
            }
            Cst::FunctionDef { ret, name, params, body, span } => {
                lowerer.next_slot = 0;
                match lower_function_def(&mut lowerer, ret, name, params, body, *span) {
                    Ok(def) => program.functions.push(def),
                    Err(e) => errors.push(e),
                }
            }
            other => errors.push(CompileError::new(
                ErrorKind::UnsupportedConstruct,
                crate::parser::span_of(other),
                "expected a function definition or prototype at translation-unit scope",
            )),
        }
    }

    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors)
    }
}

fn declare_error_to_compile_error(e: scope::DeclareError, span: Span, what: &str) -> CompileError {
    match e {
        scope::DeclareError::Redeclared => {
            CompileError::new(ErrorKind::Redeclaration, span, format!("redeclaration of {what}"))
        }
    }
}

fn lower_prototype(
    lowerer: &mut Lowerer,
    ret: &TypeName,
    name: &str,
    params: &[TypeName],
    variadic: bool,
    span: Span,
) -> Result<FunctionDecl, CompileError> {
    if variadic {
        return Err(CompileError::new(
            ErrorKind::UnsupportedConstruct,
            span,
            "variadic functions are not supported",
        ));
    }
    let ret_ty = lower_type_name(lowerer, ret, span)?;
    let mut param_tys = Vec::with_capacity(params.len());
    for p in params {
        param_tys.push(types::array_to_pointer(&lower_type_name(lowerer, p, span)?));
    }
    let fn_ty = CType::Function {
        ret: Box::new(ret_ty.clone()),
        params: param_tys.clone(),
        variadic: false,
    };
    lowerer
        .scopes
        .declare(name, scope::Binding::Func { ty: fn_ty })
        .map_err(|e| declare_error_to_compile_error(e, span, &format!("function `{name}`")))?;
    Ok(FunctionDecl { name: name.to_string(), ret: ret_ty, params: param_tys, variadic: false })
}

fn lower_function_def(
    lowerer: &mut Lowerer,
    ret: &TypeName,
    name: &str,
    params: &[(TypeName, String)],
    body: &Cst,
    span: Span,
) -> Result<FunctionDef, CompileError> {
    let ret_ty = lower_type_name(lowerer, ret, span)?;

    let mut lowered_params = Vec::with_capacity(params.len());
    let mut param_tys = Vec::with_capacity(params.len());
    for (pty, pname) in params {
        let declared = lower_type_name(lowerer, pty, span)?;
        let decayed = types::array_to_pointer(&declared);
        param_tys.push(decayed.clone());
        lowered_params.push((pname.clone(), declared, decayed));
    }

    let fn_ty = CType::Function {
        ret: Box::new(ret_ty.clone()),
        params: param_tys.clone(),
        variadic: false,
    };
    lowerer
        .scopes
        .declare(name, scope::Binding::Func { ty: fn_ty })
        .map_err(|e| declare_error_to_compile_error(e, span, &format!("function `{name}`")))?;

    lowerer.scopes.push_scope();
    let mut params_ast = Vec::with_capacity(lowered_params.len());
    for (pname, declared_ty, decayed_ty) in lowered_params {
        let slot = lowerer.fresh_slot();
        if !pname.is_empty() {
            lowerer
                .scopes
                .declare(&pname, scope::Binding::Var { ty: decayed_ty.clone(), slot })
                .map_err(|e| {
                    lowerer.scopes.pop_scope();
                    declare_error_to_compile_error(e, span, &format!("parameter `{pname}`"))
                })?;
        }
        params_ast.push(Param { name: pname, ty: declared_ty, slot });
    }

    let result = lower_function_body(lowerer, body, &ret_ty);
    lowerer.scopes.pop_scope();
    let body_stmt = result?;

    Ok(FunctionDef { name: name.to_string(), ret: ret_ty, params: params_ast, body: body_stmt, span })
}

/// Lowers the outer `{ ... }` of a function definition without pushing an
/// extra scope (the function's own scope, holding its parameters, is the
/// compound statement's scope).
fn lower_function_body(
    lowerer: &mut Lowerer,
    body: &Cst,
    ret_ty: &CType,
) -> Result<Statement, CompileError> {
    let items = match body {
        Cst::Compound { items, .. } => items,
        _ => unreachable!("function body is always a compound statement"),
    };
    let scope_id = lowerer.fresh_slot();
    let mut lowered_items = Vec::new();
    for item in items {
        lower_block_item(lowerer, item, ret_ty, &mut lowered_items)?;
    }
    Ok(Statement::Compound { scope: scope_id, items: lowered_items })
}

/// Lowers one parse-tree statement, pushing zero or more AST statements
/// into `out` - most constructs push exactly one, but `Cst::DeclList`
/// flattens into one `Statement::Declaration` per declarator (plus the
/// hidden extent declarations a VLA needs), per the "instruction does not
/// dominate all uses" rationale the spec calls out for the entry-block
/// allocation invariant.
fn lower_block_item(
    lowerer: &mut Lowerer,
    cst: &Cst,
    ret_ty: &CType,
    out: &mut Vec<Statement>,
) -> Result<(), CompileError> {
    match cst {
        Cst::DeclList(decls, _) => {
            for d in decls {
                lower_block_item(lowerer, d, ret_ty, out)?;
            }
            Ok(())
        }
        Cst::Decl { .. } => {
            lower_declaration(lowerer, cst, out)?;
            Ok(())
        }
        other => {
            out.push(lower_statement(lowerer, other, ret_ty)?);
            Ok(())
        }
    }
}

fn lower_statement(
    lowerer: &mut Lowerer,
    cst: &Cst,
    ret_ty: &CType,
) -> Result<Statement, CompileError> {
    match cst {
        Cst::Empty(_) => Ok(Statement::Empty),
        Cst::ExprStmt(inner) => Ok(Statement::Expr(lower_expr_as_rvalue(lowerer, inner)?)),
        Cst::Decl { .. } | Cst::DeclList(..) => {
            // A bare declaration used as a whole statement body (`if (c) int x
            // = 1;`) - not valid C without braces, but our grammar doesn't
            // forbid it, so it gets its own scope like a one-item compound
            // would.
            lowerer.scopes.push_scope();
            let scope_id = lowerer.fresh_slot();
            let mut items = Vec::new();
            let result = lower_block_item(lowerer, cst, ret_ty, &mut items);
            lowerer.scopes.pop_scope();
            result?;
            Ok(Statement::Compound { scope: scope_id, items })
        }
        Cst::Compound { items, .. } => {
            lowerer.scopes.push_scope();
            let scope_id = lowerer.fresh_slot();
            let mut lowered = Vec::new();
            let result = (|| {
                for item in items {
                    lower_block_item(lowerer, item, ret_ty, &mut lowered)?;
                }
                Ok(())
            })();
            lowerer.scopes.pop_scope();
            result?;
            Ok(Statement::Compound { scope: scope_id, items: lowered })
        }
        Cst::If { cond, then_branch, else_branch, .. } => {
            let cond = lower_expr_as_rvalue(lowerer, cond)?;
            let then_branch = Box::new(lower_statement(lowerer, then_branch, ret_ty)?);
            let else_branch = else_branch
                .as_ref()
                .map(|e| lower_statement(lowerer, e, ret_ty))
                .transpose()?
                .map(Box::new);
            Ok(Statement::If { cond, then_branch, else_branch })
        }
        Cst::While { cond, body, .. } => {
            let cond = lower_expr_as_rvalue(lowerer, cond)?;
            lowerer.loop_depth += 1;
            let body = lower_statement(lowerer, body, ret_ty);
            lowerer.loop_depth -= 1;
            Ok(Statement::While { cond, body: Box::new(body?) })
        }
        Cst::DoWhile { body, cond, .. } => {
            lowerer.loop_depth += 1;
            let body = lower_statement(lowerer, body, ret_ty);
            lowerer.loop_depth -= 1;
            let body = body?;
            let cond = lower_expr_as_rvalue(lowerer, cond)?;
            Ok(Statement::DoWhile { body: Box::new(body), cond })
        }
        Cst::For { init, cond, step, body, .. } => {
            lowerer.scopes.push_scope();
            let scope_id = lowerer.fresh_slot();
            let result = (|| {
                let init = init
                    .as_ref()
                    .map(|i| -> Result<Box<Statement>, CompileError> {
                        let mut items = Vec::new();
                        lower_block_item(lowerer, i, ret_ty, &mut items)?;
                        Ok(Box::new(if items.len() == 1 {
                            items.into_iter().next().unwrap()
                        } else {
                            Statement::Compound { scope: lowerer.fresh_slot(), items }
                        }))
                    })
                    .transpose()?;
                let cond = cond.as_ref().map(|c| lower_expr_as_rvalue(lowerer, c)).transpose()?;
                let step = step.as_ref().map(|s| lower_expr_as_rvalue(lowerer, s)).transpose()?;
                lowerer.loop_depth += 1;
                let body = lower_statement(lowerer, body, ret_ty);
                lowerer.loop_depth -= 1;
                Ok(Statement::For { scope: scope_id, init, cond, step, body: Box::new(body?) })
            })();
            lowerer.scopes.pop_scope();
            result
        }
        Cst::Break(span) => {
            if lowerer.loop_depth == 0 {
                return Err(CompileError::new(ErrorKind::BreakOutsideLoop, *span, "`break` outside a loop"));
            }
            Ok(Statement::Break { span: *span })
        }
        Cst::Continue(span) => {
            if lowerer.loop_depth == 0 {
                return Err(CompileError::new(
                    ErrorKind::ContinueOutsideLoop,
                    *span,
                    "`continue` outside a loop",
                ));
            }
            Ok(Statement::Continue { span: *span })
        }
        Cst::Return { value, span } => {
            let value = value.as_ref().map(|v| lower_expr_as_rvalue(lowerer, v)).transpose()?;
            match (&value, ret_ty) {
                (None, CType::Void) => Ok(Statement::Return { value: None, span: *span }),
                (None, _) => Err(CompileError::new(
                    ErrorKind::ReturnTypeMismatch,
                    *span,
                    "non-void function must return a value",
                )),
                (Some(_), CType::Void) => Err(CompileError::new(
                    ErrorKind::ReturnTypeMismatch,
                    *span,
                    "void function cannot return a value",
                )),
                (Some(v), ret_ty) => {
                    if !ret_ty.accepts_assignment_from(&v.ty) {
                        return Err(CompileError::new(
                            ErrorKind::ReturnTypeMismatch,
                            *span,
                            format!("cannot return `{}` from a function returning `{}`", v.ty, ret_ty),
                        ));
                    }
                    let converted = convert_to(v.clone(), ret_ty);
                    Ok(Statement::Return { value: Some(converted), span: *span })
                }
            }
        }
        other => Err(CompileError::new(
            ErrorKind::UnsupportedConstruct,
            crate::parser::span_of(other),
            "unsupported statement form",
        )),
    }
}

/// Lowers one `Cst::Decl` (array dims already parsed) into `out`. Ordinary
/// fixed-size locals push exactly one `Statement::Declaration`. A runtime
/// (VLA) extent additionally pushes a hidden `long` declaration holding the
/// evaluated extent just before the array's own declaration, so the
/// emitter can recompute index arithmetic and size the dynamic `alloca`
/// from it (§4.7).
fn lower_declaration(lowerer: &mut Lowerer, cst: &Cst, out: &mut Vec<Statement>) -> Result<(), CompileError> {
    let (type_name, name, array_dims, init, span) = match cst {
        Cst::Decl { type_name, name, array_dims, init, span } => (type_name, name, array_dims, init, *span),
        _ => unreachable!(),
    };

    let base_ty = lower_type_name(lowerer, type_name, span)?;
    let ty = apply_array_dims(lowerer, base_ty, array_dims, span, out)?;

    let initializer = init
        .as_ref()
        .map(|i| -> Result<Expr, CompileError> {
            let lowered = lower_expr_as_rvalue(lowerer, i)?;
            if !ty.accepts_assignment_from(&lowered.ty) {
                return Err(CompileError::new(
                    ErrorKind::TypeMismatch,
                    span,
                    format!("cannot initialize `{ty}` from `{}`", lowered.ty),
                ));
            }
            Ok(convert_to(lowered, &ty))
        })
        .transpose()?;

    let slot = lowerer.fresh_slot();
    lowerer
        .scopes
        .declare(name, scope::Binding::Var { ty: ty.clone(), slot })
        .map_err(|e| declare_error_to_compile_error(e, span, &format!("`{name}`")))?;

    out.push(Statement::Declaration(Declaration {
        name: name.clone(),
        ty,
        initializer,
        slot,
        span,
    }));
    Ok(())
}

/// Wraps `base_ty` in zero or more `CType::Array` layers from outermost to
/// innermost dim, evaluating each dim as a compile-time constant when
/// possible and falling back to a hidden runtime-extent slot (a VLA)
/// otherwise.
fn apply_array_dims(
    lowerer: &mut Lowerer,
    base_ty: CType,
    dims: &[Option<Box<Cst>>],
    span: Span,
    out: &mut Vec<Statement>,
) -> Result<CType, CompileError> {
    if dims.is_empty() {
        return Ok(base_ty);
    }
    // Build array type from the innermost dimension outward.
    let mut ty = base_ty;
    for dim in dims.iter().rev() {
        let extent = match dim {
            None => ArrayExtent::Incomplete,
            Some(expr) => {
                let lowered = lower_expr_as_rvalue(lowerer, expr)?;
                match const_eval_u64(&lowered) {
                    Some(n) => ArrayExtent::Fixed(n),
                    None => {
                        let slot = lowerer.fresh_slot();
                        let long_ty = CType::long();
                        let converted = convert_to(lowered, &long_ty);
                        out.push(Statement::Declaration(Declaration {
                            name: format!("<vla_extent.{slot}>"),
                            ty: long_ty,
                            initializer: Some(converted),
                            slot,
                            span,
                        }));
                        ArrayExtent::Variable(slot)
                    }
                }
            }
        };
        ty = CType::Array { element: Box::new(ty), extent };
    }
    Ok(ty)
}

/// A tiny constant-expression evaluator: literal integers and the usual
/// arithmetic on them. Good enough for struct-field array dims and for
/// telling a fixed-size local apart from a VLA; anything else (an
/// identifier, a function call, ...) is treated as a runtime extent.
fn const_eval_u64(e: &Expr) -> Option<u64> {
    match &e.kind {
        ExprKind::IntLiteral(n) if *n >= 0 => Some(*n as u64),
        ExprKind::CharLiteral(n) if *n >= 0 => Some(*n as u64),
        ExprKind::Unary { op: UnOp::Plus, operand } => const_eval_u64(operand),
        ExprKind::Binary { op, lhs, rhs, .. } => {
            let a = const_eval_u64(lhs)?;
            let b = const_eval_u64(rhs)?;
            match op {
                BinOp::Add => Some(a + b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => Some(a * b),
                BinOp::Div if b != 0 => Some(a / b),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Resolves a parsed `TypeName` into a `CType`, defining a new struct tag
/// when the declaration carries a field list and resolving a bare `struct
/// X` against the tag namespace otherwise.
fn lower_type_name(lowerer: &mut Lowerer, tn: &TypeName, span: Span) -> Result<CType, CompileError> {
    Ok(match tn {
        TypeName::Void => CType::Void,
        TypeName::Bool => CType::Bool,
        TypeName::Char { unsigned } => CType::Int {
            signedness: if *unsigned { Signedness::Unsigned } else { Signedness::Signed },
            width: IntWidth::Char,
        },
        TypeName::Short { unsigned } => CType::Int {
            signedness: if *unsigned { Signedness::Unsigned } else { Signedness::Signed },
            width: IntWidth::Short,
        },
        TypeName::Int { unsigned } => CType::Int {
            signedness: if *unsigned { Signedness::Unsigned } else { Signedness::Signed },
            width: IntWidth::Int,
        },
        TypeName::Long { unsigned } => CType::Int {
            signedness: if *unsigned { Signedness::Unsigned } else { Signedness::Signed },
            width: IntWidth::Long,
        },
        TypeName::LongLong { unsigned } => CType::Int {
            signedness: if *unsigned { Signedness::Unsigned } else { Signedness::Signed },
            width: IntWidth::LongLong,
        },
        TypeName::Float => CType::Float(FloatWidth::Float),
        TypeName::Double => CType::Float(FloatWidth::Double),
        TypeName::LongDouble => CType::Float(FloatWidth::LongDouble),
        TypeName::Struct { name, fields: None } => {
            let name = name.as_ref().ok_or_else(|| {
                CompileError::new(ErrorKind::SyntaxError, span, "anonymous struct with no field list")
            })?;
            lowerer
                .scopes
                .resolve_tag(name)
                .cloned()
                .ok_or_else(|| {
                    CompileError::new(
                        ErrorKind::UndeclaredIdentifier,
                        span,
                        format!("undeclared struct tag `{name}`"),
                    )
                })?
        }
        TypeName::Struct { name, fields: Some(fields) } => {
            let mut field_tys = Vec::with_capacity(fields.len());
            // Array dims inside a struct body must be compile-time
            // constants - a VLA member has no sensible layout.
            let mut scratch = Vec::new();
            for f in fields {
                let base = lower_type_name(lowerer, &f.ty, span)?;
                let ty = apply_array_dims(lowerer, base, &f.array_dims, span, &mut scratch)?;
                if matches!(ty, CType::Array { extent: ArrayExtent::Variable(_), .. }) {
                    return Err(CompileError::new(
                        ErrorKind::UnsupportedConstruct,
                        span,
                        "struct fields may not be variable-length arrays",
                    ));
                }
                field_tys.push((f.name.clone(), ty));
            }
            let (laid_out, size, align) = types::layout_struct(&field_tys);
            let struct_name = name.clone().unwrap_or_else(|| {
                lowerer.anon_struct_counter += 1;
                format!("anon.{}", lowerer.anon_struct_counter)
            });
            let struct_ty = CType::Struct {
                name: Some(struct_name.clone()),
                fields: laid_out,
                size,
                align,
            };
            lowerer
                .scopes
                .declare_tag(&struct_name, struct_ty.clone())
                .map_err(|e| declare_error_to_compile_error(e, span, &format!("struct `{struct_name}`")))?;
            struct_ty
        }
    })
}

// --- Expressions ------------------------------------------------------

/// Lowers `cst` and, if the result is an lvalue, inserts the implicit
/// read that consuming it as a value requires. Array and function types
/// never get a load (they decay / are referenced directly); everything
/// else does. This is the one place outside `codegen` that "implicit
/// load" is decided, because the *type* of the resulting node changes
/// (array decay) even though codegen is what emits the actual `load`.
fn lower_expr_as_rvalue(lowerer: &mut Lowerer, cst: &Cst) -> Result<Expr, CompileError> {
    let e = lower_expr(lowerer, cst)?;
    Ok(decay_if_needed(e))
}

fn decay_if_needed(e: Expr) -> Expr {
    if e.category == ValueCategory::LValue && e.ty.is_array() {
        let span = e.span;
        let decayed_ty = types::array_to_pointer(&e.ty);
        return Expr {
            kind: ExprKind::Decay(Box::new(e)),
            span,
            ty: decayed_ty,
            category: ValueCategory::RValue,
        };
    }
    e
}

fn convert_to(e: Expr, target: &CType) -> Expr {
    if &e.ty == target {
        return e;
    }
    let span = e.span;
    Expr {
        kind: ExprKind::Cast { from: e.ty.clone(), operand: Box::new(e) },
        span,
        ty: target.clone(),
        category: ValueCategory::RValue,
    }
}

fn lower_expr(lowerer: &mut Lowerer, cst: &Cst) -> Result<Expr, CompileError> {
    let span = crate::parser::span_of(cst);
    match cst {
        Cst::IntLit { text, .. } => {
            let (value, ty) = parse_int_literal(text);
            Ok(Expr { kind: ExprKind::IntLiteral(value), span, ty, category: ValueCategory::RValue })
        }
        Cst::FloatLit { text, .. } => {
            let (value, ty) = parse_float_literal(text);
            Ok(Expr { kind: ExprKind::FloatLiteral(value), span, ty, category: ValueCategory::RValue })
        }
        Cst::CharLit { value, .. } => Ok(Expr {
            kind: ExprKind::CharLiteral(*value),
            span,
            ty: CType::int(),
            category: ValueCategory::RValue,
        }),
        Cst::Ident { name, .. } => {
            let binding = lowerer.scopes.resolve(name).cloned().ok_or_else(|| {
                CompileError::new(ErrorKind::UndeclaredIdentifier, span, format!("undeclared identifier `{name}`"))
            })?;
            match binding {
                scope::Binding::Var { ty, slot } => Ok(Expr {
                    kind: ExprKind::Ident { name: name.clone(), binding: Binding::Slot(slot) },
                    span,
                    ty,
                    category: ValueCategory::LValue,
                }),
                scope::Binding::Func { ty } => Ok(Expr {
                    kind: ExprKind::Ident { name: name.clone(), binding: Binding::Function(name.clone()) },
                    span,
                    ty,
                    category: ValueCategory::RValue,
                }),
            }
        }
        Cst::Index { array, index, .. } => {
            let array_e = lower_expr(lowerer, array)?;
            let index_e = lower_expr_as_rvalue(lowerer, index)?;
            if !index_e.ty.is_integer() {
                return Err(CompileError::new(ErrorKind::TypeMismatch, span, "array subscript must be an integer"));
            }
            let elem_ty = match &array_e.ty {
                CType::Array { element, .. } => (**element).clone(),
                CType::Pointer(element) => (**element).clone(),
                other => {
                    return Err(CompileError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!("cannot subscript a value of type `{other}`"),
                    ))
                }
            };
            Ok(Expr {
                kind: ExprKind::Index { array: Box::new(array_e), index: Box::new(index_e) },
                span,
                ty: elem_ty,
                category: ValueCategory::LValue,
            })
        }
        Cst::Member { base, field, arrow, .. } => {
            let base_e = if *arrow { lower_expr_as_rvalue(lowerer, base)? } else { lower_expr(lowerer, base)? };
            let struct_ty = if *arrow {
                match &base_e.ty {
                    CType::Pointer(inner) => (**inner).clone(),
                    other => {
                        return Err(CompileError::new(
                            ErrorKind::TypeMismatch,
                            span,
                            format!("`->` requires a pointer operand, found `{other}`"),
                        ))
                    }
                }
            } else {
                base_e.ty.clone()
            };
            let field_ty = match &struct_ty {
                CType::Struct { fields, .. } => fields
                    .iter()
                    .find(|f| &f.name == field)
                    .map(|f| f.ty.clone())
                    .ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::UndeclaredIdentifier,
                            span,
                            format!("no member named `{field}`"),
                        )
                    })?,
                other => {
                    return Err(CompileError::new(
                        ErrorKind::TypeMismatch,
                        span,
                        format!("`.`/`->` requires a struct operand, found `{other}`"),
                    ))
                }
            };
            let kind = if *arrow {
                ExprKind::MemberArrow { base: Box::new(base_e), field: field.clone() }
            } else {
                ExprKind::Member { base: Box::new(base_e), field: field.clone() }
            };
            Ok(Expr { kind, span, ty: field_ty, category: ValueCategory::LValue })
        }
        Cst::IncDec { op, operand, prefix, .. } => {
            let operand_e = lower_expr(lowerer, operand)?;
            if operand_e.category != ValueCategory::LValue {
                return Err(CompileError::new(ErrorKind::NotAnLvalue, span, "increment/decrement requires an lvalue"));
            }
            if !operand_e.ty.is_arithmetic() {
                return Err(CompileError::new(
                    ErrorKind::TypeMismatch,
                    span,
                    "increment/decrement requires an arithmetic operand",
                ));
            }
            let ty = operand_e.ty.clone();
            let op = match (*op, *prefix) {
                ("++", true) => IncDecOp::PreInc,
                ("--", true) => IncDecOp::PreDec,
                ("++", false) => IncDecOp::PostInc,
                ("--", false) => IncDecOp::PostDec,
                _ => unreachable!(),
            };
            Ok(Expr {
                kind: ExprKind::IncDec { op, operand: Box::new(operand_e) },
                span,
                ty,
                category: ValueCategory::RValue,
            })
        }
        Cst::Unary { op, operand, .. } => {
            let operand_e = lower_expr_as_rvalue(lowerer, operand)?;
            if !operand_e.ty.is_scalar() {
                return Err(CompileError::new(ErrorKind::TypeMismatch, span, "unary operator requires a scalar operand"));
            }
            let (uop, ty) = match *op {
                "+" => (UnOp::Plus, types::promote_integer(&operand_e.ty)),
                "-" => (UnOp::Neg, types::promote_integer(&operand_e.ty)),
                "~" => {
                    if !operand_e.ty.is_integer() {
                        return Err(CompileError::new(ErrorKind::TypeMismatch, span, "`~` requires an integer operand"));
                    }
                    (UnOp::BitNot, types::promote_integer(&operand_e.ty))
                }
                "!" => (UnOp::LogNot, CType::int()),
                _ => unreachable!(),
            };
            let operand_e = if matches!(uop, UnOp::Plus | UnOp::Neg | UnOp::BitNot) {
                convert_to(operand_e, &ty)
            } else {
                operand_e
            };
            Ok(Expr { kind: ExprKind::Unary { op: uop, operand: Box::new(operand_e) }, span, ty, category: ValueCategory::RValue })
        }
        Cst::Binary { op, lhs, rhs, .. } => lower_binary(lowerer, op, lhs, rhs, span),
        Cst::Assign { op, lhs, rhs, .. } => lower_assign(lowerer, op, lhs, rhs, span),
        Cst::Cast { type_name, operand, .. } => {
            let target = lower_type_name(lowerer, type_name, span)?;
            let operand_e = lower_expr_as_rvalue(lowerer, operand)?;
            if !operand_e.ty.is_scalar() && operand_e.ty != target {
                return Err(CompileError::new(ErrorKind::TypeMismatch, span, "cast requires a scalar operand"));
            }
            let from = operand_e.ty.clone();
            if from == target {
                return Ok(operand_e);
            }
            Ok(Expr { kind: ExprKind::Cast { from, operand: Box::new(operand_e) }, span, ty: target, category: ValueCategory::RValue })
        }
        Cst::Conditional { cond, then_expr, else_expr, .. } => {
            let cond_e = lower_expr_as_rvalue(lowerer, cond)?;
            let then_e = lower_expr_as_rvalue(lowerer, then_expr)?;
            let else_e = lower_expr_as_rvalue(lowerer, else_expr)?;
            let ty = if then_e.ty.is_arithmetic() && else_e.ty.is_arithmetic() {
                types::usual_arithmetic(&then_e.ty, &else_e.ty)
            } else if then_e.ty == else_e.ty {
                then_e.ty.clone()
            } else {
                return Err(CompileError::new(
                    ErrorKind::TypeMismatch,
                    span,
                    "`?:` branches have incompatible types",
                ));
            };
            let then_e = convert_to(then_e, &ty);
            let else_e = convert_to(else_e, &ty);
            Ok(Expr {
                kind: ExprKind::Conditional { cond: Box::new(cond_e), then_expr: Box::new(then_e), else_expr: Box::new(else_e) },
                span,
                ty,
                category: ValueCategory::RValue,
            })
        }
        Cst::Comma { lhs, rhs, .. } => {
            let lhs_e = lower_expr_as_rvalue(lowerer, lhs)?;
            let rhs_e = lower_expr_as_rvalue(lowerer, rhs)?;
            let ty = rhs_e.ty.clone();
            Ok(Expr { kind: ExprKind::Comma { lhs: Box::new(lhs_e), rhs: Box::new(rhs_e) }, span, ty, category: ValueCategory::RValue })
        }
        Cst::Call { callee, args, .. } => lower_call(lowerer, callee, args, span),
        Cst::CompoundLiteral { type_name, initializers, .. } => {
            let ty = lower_type_name(lowerer, type_name, span)?;
            let inits = initializers
                .iter()
                .map(|i| lower_expr_as_rvalue(lowerer, i))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr {
                kind: ExprKind::CompoundLiteral { ty: ty.clone(), initializers: inits },
                span,
                ty,
                category: ValueCategory::LValue,
            })
        }
        other => Err(CompileError::new(ErrorKind::UnsupportedConstruct, crate::parser::span_of(other), "unsupported expression form")),
    }
}

fn binop_from_punct(p: &str) -> BinOp {
    match p {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "&" => BinOp::BitAnd,
        "|" => BinOp::BitOr,
        "^" => BinOp::BitXor,
        "<<" => BinOp::Shl,
        ">>" => BinOp::Shr,
        "<" => BinOp::Lt,
        ">" => BinOp::Gt,
        "<=" => BinOp::Le,
        ">=" => BinOp::Ge,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "&&" => BinOp::LogAnd,
        "||" => BinOp::LogOr,
        _ => unreachable!("unknown binary punctuator `{p}`"),
    }
}

fn lower_binary(lowerer: &mut Lowerer, op: &str, lhs: &Cst, rhs: &Cst, span: Span) -> Result<Expr, CompileError> {
    let lhs_e = lower_expr_as_rvalue(lowerer, lhs)?;
    let rhs_e = lower_expr_as_rvalue(lowerer, rhs)?;
    let bin_op = binop_from_punct(op);

    if matches!(bin_op, BinOp::LogAnd | BinOp::LogOr) {
        if !lhs_e.ty.is_scalar() || !rhs_e.ty.is_scalar() {
            return Err(CompileError::new(ErrorKind::TypeMismatch, span, "`&&`/`||` require scalar operands"));
        }
        return Ok(Expr {
            kind: ExprKind::Logical { op: bin_op, lhs: Box::new(lhs_e), rhs: Box::new(rhs_e) },
            span,
            ty: CType::int(),
            category: ValueCategory::RValue,
        });
    }

    if !lhs_e.ty.is_arithmetic() || !rhs_e.ty.is_arithmetic() {
        return Err(CompileError::new(
            ErrorKind::TypeMismatch,
            span,
            format!("operator requires arithmetic operands, found `{}` and `{}`", lhs_e.ty, rhs_e.ty),
        ));
    }

    let is_relational = matches!(
        bin_op,
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
    );
    let is_shift = matches!(bin_op, BinOp::Shl | BinOp::Shr);
    let is_bitwise = matches!(bin_op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor);

    if (is_bitwise || is_shift) && (!lhs_e.ty.is_integer() || !rhs_e.ty.is_integer()) {
        return Err(CompileError::new(ErrorKind::TypeMismatch, span, "bitwise/shift operators require integer operands"));
    }

    if matches!(bin_op, BinOp::Mod) && (!lhs_e.ty.is_integer() || !rhs_e.ty.is_integer()) {
        return Err(CompileError::new(ErrorKind::TypeMismatch, span, "`%` requires integer operands"));
    }

    if is_shift {
        // C99 6.5.7: each operand undergoes integer promotion separately;
        // there is no usual-arithmetic-conversion between them. The
        // result type is the promoted left operand's type.
        let lhs_promoted_ty = types::promote_integer(&lhs_e.ty);
        let rhs_promoted_ty = types::promote_integer(&rhs_e.ty);
        let lhs_c = convert_to(lhs_e, &lhs_promoted_ty);
        let rhs_c = convert_to(rhs_e, &rhs_promoted_ty);
        return Ok(Expr {
            kind: ExprKind::Binary {
                op: bin_op,
                lhs: Box::new(lhs_c),
                rhs: Box::new(rhs_c),
                operand_ty: lhs_promoted_ty.clone(),
            },
            span,
            ty: lhs_promoted_ty,
            category: ValueCategory::RValue,
        });
    }

    let operand_ty = types::usual_arithmetic(&lhs_e.ty, &rhs_e.ty);
    let lhs_c = convert_to(lhs_e, &operand_ty);
    let rhs_c = convert_to(rhs_e, &operand_ty);
    let result_ty = if is_relational { CType::int() } else { operand_ty.clone() };
    Ok(Expr {
        kind: ExprKind::Binary { op: bin_op, lhs: Box::new(lhs_c), rhs: Box::new(rhs_c), operand_ty },
        span,
        ty: result_ty,
        category: ValueCategory::RValue,
    })
}

fn lower_assign(lowerer: &mut Lowerer, op: &str, lhs: &Cst, rhs: &Cst, span: Span) -> Result<Expr, CompileError> {
    let lhs_e = lower_expr(lowerer, lhs)?;
    if lhs_e.category != ValueCategory::LValue {
        return Err(CompileError::new(ErrorKind::NotAnLvalue, span, "left-hand side of assignment must be an lvalue"));
    }
    let rhs_e = lower_expr_as_rvalue(lowerer, rhs)?;
    let dst_ty = lhs_e.ty.clone();

    if op == "=" {
        if !dst_ty.accepts_assignment_from(&rhs_e.ty) {
            return Err(CompileError::new(
                ErrorKind::TypeMismatch,
                span,
                format!("cannot assign `{}` to `{}`", rhs_e.ty, dst_ty),
            ));
        }
        let rhs_c = convert_to(rhs_e, &dst_ty);
        return Ok(Expr {
            kind: ExprKind::Assign { lhs: Box::new(lhs_e), rhs: Box::new(rhs_c) },
            span,
            ty: dst_ty,
            category: ValueCategory::RValue,
        });
    }

    let bin_op = binop_from_punct(&op[..op.len() - 1]);
    if !dst_ty.is_arithmetic() || !rhs_e.ty.is_arithmetic() {
        return Err(CompileError::new(ErrorKind::TypeMismatch, span, "compound assignment requires arithmetic operands"));
    }
    let needs_integer = matches!(
        bin_op,
        BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
    );
    if needs_integer && (!dst_ty.is_integer() || !rhs_e.ty.is_integer()) {
        return Err(CompileError::new(ErrorKind::TypeMismatch, span, "this compound assignment requires integer operands"));
    }
    Ok(Expr {
        kind: ExprKind::CompoundAssign { op: bin_op, lhs: Box::new(lhs_e), rhs: Box::new(rhs_e) },
        span,
        ty: dst_ty,
        category: ValueCategory::RValue,
    })
}

fn lower_call(lowerer: &mut Lowerer, callee: &str, args: &[Cst], span: Span) -> Result<Expr, CompileError> {
    let binding = lowerer.scopes.resolve(callee).cloned().ok_or_else(|| {
        CompileError::new(ErrorKind::UndeclaredIdentifier, span, format!("call to undeclared function `{callee}`"))
    })?;
    let (ret_ty, param_tys) = match binding {
        scope::Binding::Func { ty: CType::Function { ret, params, .. } } => (*ret, params),
        _ => {
            return Err(CompileError::new(
                ErrorKind::TypeMismatch,
                span,
                format!("`{callee}` is not a function"),
            ))
        }
    };
    if args.len() != param_tys.len() {
        return Err(CompileError::new(
            ErrorKind::TypeMismatch,
            span,
            format!("`{callee}` expects {} argument(s), found {}", param_tys.len(), args.len()),
        ));
    }
    let mut lowered_args = Vec::with_capacity(args.len());
    for (arg, param_ty) in args.iter().zip(&param_tys) {
        let lowered = lower_expr_as_rvalue(lowerer, arg)?;
        if !param_ty.accepts_assignment_from(&lowered.ty) {
            return Err(CompileError::new(
                ErrorKind::TypeMismatch,
                span,
                format!("argument of type `{}` does not match parameter type `{param_ty}`", lowered.ty),
            ));
        }
        lowered_args.push(convert_to(lowered, param_ty));
    }
    Ok(Expr {
        kind: ExprKind::Call { callee: callee.to_string(), args: lowered_args },
        span,
        ty: ret_ty,
        category: ValueCategory::RValue,
    })
}

// --- Literal parsing (C99 6.4.4.1 / 6.4.4.2) ---------------------------

/// Parses an integer constant's text (digits + suffix) into its value and
/// the smallest type from its suffix's candidate list that represents it.
fn parse_int_literal(text: &str) -> (i64, CType) {
    let (digits, unsigned_suffix, long_count) = split_int_suffix(text);
    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits.as_str())
    };
    let value = u64::from_str_radix(digits, radix).unwrap_or(0);

    let candidates: &[CType] = match (radix == 10, unsigned_suffix, long_count) {
        (true, false, 0) => &[CType::int(), long_ty(), long_long_ty()],
        (true, false, 1) => &[long_ty(), long_long_ty()],
        (true, false, _) => &[long_long_ty()],
        (true, true, 0) => &[uint_ty(), ulong_ty(), ulong_long_ty()],
        (true, true, 1) => &[ulong_ty(), ulong_long_ty()],
        (true, true, _) => &[ulong_long_ty()],
        (false, false, 0) => &[CType::int(), uint_ty(), long_ty(), ulong_ty(), long_long_ty(), ulong_long_ty()],
        (false, false, 1) => &[long_ty(), ulong_ty(), long_long_ty(), ulong_long_ty()],
        (false, false, _) => &[long_long_ty(), ulong_long_ty()],
        (false, true, 0) => &[uint_ty(), ulong_ty(), ulong_long_ty()],
        (false, true, 1) => &[ulong_ty(), ulong_long_ty()],
        (false, true, _) => &[ulong_long_ty()],
    };

    for ty in candidates {
        if fits(value, ty) {
            return (value as i64, ty.clone());
        }
    }
    (value as i64, candidates.last().cloned().unwrap_or_else(ulong_long_ty))
}

fn long_ty() -> CType {
    CType::Int { signedness: Signedness::Signed, width: IntWidth::Long }
}
fn long_long_ty() -> CType {
    CType::Int { signedness: Signedness::Signed, width: IntWidth::LongLong }
}
fn uint_ty() -> CType {
    CType::uint()
}
fn ulong_ty() -> CType {
    CType::Int { signedness: Signedness::Unsigned, width: IntWidth::Long }
}
fn ulong_long_ty() -> CType {
    CType::Int { signedness: Signedness::Unsigned, width: IntWidth::LongLong }
}

fn fits(value: u64, ty: &CType) -> bool {
    let (size, _) = types::layout(ty);
    let bits = size * 8;
    match ty {
        CType::Int { signedness: Signedness::Unsigned, .. } => bits >= 64 || value < (1u64 << bits),
        CType::Int { signedness: Signedness::Signed, .. } => {
            bits >= 64 || value < (1u64 << (bits - 1))
        }
        _ => false,
    }
}

fn split_int_suffix(text: &str) -> (String, bool, u32) {
    let mut unsigned = false;
    let mut longs = 0u32;
    let mut end = text.len();
    let bytes = text.as_bytes();
    while end > 0 {
        match bytes[end - 1] {
            b'u' | b'U' => {
                unsigned = true;
                end -= 1;
            }
            b'l' | b'L' => {
                longs += 1;
                end -= 1;
            }
            _ => break,
        }
    }
    (text[..end].to_string(), unsigned, longs.min(2))
}

/// Parses a floating constant's text into its value and type, including
/// C99 hexadecimal floating constants (`0x1.8p3`).
fn parse_float_literal(text: &str) -> (f64, CType) {
    let (suffix, body) = match text.chars().last() {
        Some(c @ ('f' | 'F')) => (Some(c), &text[..text.len() - 1]),
        Some(c @ ('l' | 'L')) => (Some(c), &text[..text.len() - 1]),
        _ => (None, text),
    };
    let ty = match suffix {
        Some('f') | Some('F') => CType::Float(FloatWidth::Float),
        Some('l') | Some('L') => CType::Float(FloatWidth::LongDouble),
        _ => CType::Float(FloatWidth::Double),
    };
    let value = if body.starts_with("0x") || body.starts_with("0X") {
        parse_hex_float(body).unwrap_or(0.0)
    } else {
        body.parse::<f64>().unwrap_or(0.0)
    };
    (value, ty)
}

/// `0x` hex-digits [`.` hex-digits] (`p`|`P`) [+-] decimal-digits
fn parse_hex_float(body: &str) -> Option<f64> {
    let rest = &body[2..];
    let p_pos = rest.find(['p', 'P'])?;
    let mantissa_part = &rest[..p_pos];
    let exp_part = &rest[p_pos + 1..];
    let exponent: i32 = exp_part.parse().ok()?;

    let (int_part, frac_part) = match mantissa_part.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa_part, ""),
    };

    let mut mantissa = 0f64;
    for c in int_part.chars() {
        mantissa = mantissa * 16.0 + c.to_digit(16)? as f64;
    }
    let mut frac_scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        mantissa += c.to_digit(16)? as f64 * frac_scale;
        frac_scale /= 16.0;
    }
    Some(mantissa * 2f64.powi(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn lower_source(src: &str) -> Result<Program, Vec<CompileError>> {
        let mut parser = Parser::new(src).unwrap();
        let cst = parser.parse_translation_unit().unwrap();
        lower_translation_unit(&cst)
    }

    #[test]
    fn lowers_simple_addition_function() {
        let program = lower_source("int add(int a, int b) { return a + b; }").unwrap();
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].ret, CType::int());
    }

    #[test]
    fn usual_arithmetic_promotes_binary_operand_type() {
        let program = lower_source("float f(int a) { return 2.0f * (a * a); }").unwrap();
        let body = &program.functions[0].body;
        if let Statement::Compound { items, .. } = body {
            if let Statement::Return { value: Some(v), .. } = &items[0] {
                assert_eq!(v.ty, CType::Float(FloatWidth::Float));
            } else {
                panic!("expected return statement");
            }
        }
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let err = lower_source("int f(void) { return x; }").unwrap_err();
        assert_eq!(err[0].kind, ErrorKind::UndeclaredIdentifier);
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = lower_source("int f(void) { break; return 0; }").unwrap_err();
        assert_eq!(err[0].kind, ErrorKind::BreakOutsideLoop);
    }

    #[test]
    fn allows_compatible_forward_declaration() {
        let program = lower_source(
            "int helper(int a); int f(int a) { return helper(a); } int helper(int a) { return a; }",
        )
        .unwrap();
        assert_eq!(program.functions.len(), 2);
        assert_eq!(program.prototypes.len(), 1);
    }

    #[test]
    fn resolves_recursive_self_call() {
        let program =
            lower_source("int ffact(int a){if(a==0)return 1; return a*ffact(a-1);}").unwrap();
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn struct_with_comma_separated_fields_lays_out_correctly() {
        let program = lower_source(
            "int f(int a,int b){struct{float f;int i1,i2;int arr[10];}s; s.arr[1]=1; return s.arr[1];}",
        )
        .unwrap();
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn int_literal_picks_smallest_fitting_type() {
        let (_, ty) = parse_int_literal("2147483648");
        assert_eq!(ty, long_ty());
        let (_, ty) = parse_int_literal("42");
        assert_eq!(ty, CType::int());
        let (_, ty) = parse_int_literal("42U");
        assert_eq!(ty, CType::uint());
    }

    #[test]
    fn hex_float_literal_parses() {
        let (value, ty) = parse_float_literal("0x1.8p3");
        assert_eq!(value, 12.0);
        assert_eq!(ty, CType::Float(FloatWidth::Double));
    }
}
