//! Expression lowering (§4.4)
//!
//! Every `codegen_*` function here takes the already-typed `Expr` the lower
//! pass produced and returns the SSA value (or, for array-typed results, the
//! address) that represents it - no further type-checking happens at this
//! layer, only the conversions `ast.rs` documents as the emitter's job:
//! `Binary`'s operands are cast to its `operand_ty` here, not in `lower.rs`.
//!
//! Literals need no instruction at all - an `IntLiteral`/`CharLiteral` is
//! just its own immediate operand text; only `long double` literals cost an
//! `fpext`, since LLVM has no `x86_fp80` constant syntax to hex-encode into.

use crate::ast::{BinOp, Expr, ExprKind, IncDecOp, UnOp};
use crate::codegen::snippets;
use crate::codegen::state::{CodeGen, FunctionBuilder};
use crate::codegen::storage;
use crate::error::{CompileError, ErrorKind};
use crate::types::{self, CType, FloatWidth};

/// Lowers `expr` and returns the SSA name (or, for an array result, the
/// address) of its value.
pub(super) fn codegen_expr(cg: &mut CodeGen, fb: &mut FunctionBuilder, expr: &Expr) -> Result<String, CompileError> {
    match &expr.kind {
        ExprKind::IntLiteral(n) => Ok(n.to_string()),
        ExprKind::CharLiteral(n) => Ok(n.to_string()),
        ExprKind::BoolLiteral(b) => Ok(if *b { "true".to_string() } else { "false".to_string() }),
        ExprKind::FloatLiteral(v) => Ok(float_literal_operand(*v, &expr.ty, fb)),

        ExprKind::Ident { .. } | ExprKind::Index { .. } | ExprKind::Member { .. } | ExprKind::MemberArrow { .. } | ExprKind::CompoundLiteral { .. } => {
            let (addr, ty) = codegen_lvalue_address(cg, fb, expr)?;
            if ty.is_array() {
                Ok(addr)
            } else {
                let t = fb.fresh_temp();
                fb.emit(format!("{t} = load {}, ptr {addr}", ty.llvm_type()));
                Ok(t)
            }
        }

        ExprKind::Decay(inner) => {
            let (addr, _) = codegen_lvalue_address(cg, fb, inner)?;
            Ok(addr)
        }

        ExprKind::IncDec { op, operand } => codegen_incdec(cg, fb, *op, operand),
        ExprKind::Unary { op, operand } => codegen_unary(cg, fb, *op, operand, &expr.ty),
        ExprKind::Binary { op, lhs, rhs, operand_ty } => codegen_binary(cg, fb, *op, lhs, rhs, operand_ty),
        ExprKind::Logical { op, lhs, rhs } => codegen_logical(cg, fb, *op, lhs, rhs),
        ExprKind::Assign { lhs, rhs } => codegen_assign(cg, fb, lhs, rhs, &expr.ty),
        ExprKind::CompoundAssign { op, lhs, rhs } => codegen_compound_assign(cg, fb, *op, lhs, rhs, &expr.ty),

        ExprKind::Cast { from, operand } => {
            let v = codegen_expr(cg, fb, operand)?;
            Ok(codegen_cast_value(cg, fb, v, from, &expr.ty))
        }

        ExprKind::Conditional { cond, then_expr, else_expr } => codegen_conditional(cg, fb, cond, then_expr, else_expr, &expr.ty),

        ExprKind::Comma { lhs, rhs } => {
            codegen_expr(cg, fb, lhs)?;
            codegen_expr(cg, fb, rhs)
        }

        ExprKind::Call { callee, args } => codegen_call(cg, fb, callee, args, &expr.ty),
    }
}

/// Resolves `expr` to the address of the storage it names, plus that
/// storage's type. Every node reachable here was checked by `lower.rs` to be
/// an lvalue; the final arm is unreachable on a successful lowering.
pub(super) fn codegen_lvalue_address(cg: &mut CodeGen, fb: &mut FunctionBuilder, expr: &Expr) -> Result<(String, CType), CompileError> {
    match &expr.kind {
        ExprKind::Ident { name, binding } => match binding {
            crate::ast::Binding::Slot(slot) => {
                let info = fb.slot(*slot).clone();
                Ok((info.ptr, info.ty))
            }
            crate::ast::Binding::Function(_) => Err(CompileError::new(
                ErrorKind::NotAnLvalue,
                expr.span,
                format!("`{name}` names a function, not a storage location"),
            )),
        },

        ExprKind::Index { array, index } => {
            let base = codegen_array_base(cg, fb, array)?;
            let idx_val = codegen_expr(cg, fb, index)?;
            let idx64 = codegen_cast_value(cg, fb, idx_val, &index.ty, &CType::long());
            let (elem_size, _) = types::layout(&expr.ty);
            let off = fb.fresh_temp();
            fb.emit(format!("{off} = mul i64 {idx64}, {elem_size}"));
            let addr = fb.fresh_temp();
            fb.emit(format!("{addr} = getelementptr inbounds i8, ptr {base}, i64 {off}"));
            Ok((addr, expr.ty.clone()))
        }

        ExprKind::Member { base, field } => {
            let (base_addr, struct_ty) = codegen_lvalue_address(cg, fb, base)?;
            let (idx, fty) = struct_field_index(&struct_ty, field, expr.span)?;
            let struct_llvm = struct_ty.llvm_type();
            let addr = fb.fresh_temp();
            fb.emit(format!("{addr} = getelementptr inbounds {struct_llvm}, ptr {base_addr}, i32 0, i32 {idx}"));
            Ok((addr, fty))
        }

        ExprKind::MemberArrow { base, field } => {
            let ptr_val = codegen_expr(cg, fb, base)?;
            let struct_ty = match &base.ty {
                CType::Pointer(inner) => (**inner).clone(),
                other => {
                    return Err(CompileError::new(
                        ErrorKind::TypeMismatch,
                        expr.span,
                        format!("`->` applied to non-pointer type `{other}`"),
                    ));
                }
            };
            let (idx, fty) = struct_field_index(&struct_ty, field, expr.span)?;
            let struct_llvm = struct_ty.llvm_type();
            let addr = fb.fresh_temp();
            fb.emit(format!("{addr} = getelementptr inbounds {struct_llvm}, ptr {ptr_val}, i32 0, i32 {idx}"));
            Ok((addr, fty))
        }

        ExprKind::CompoundLiteral { ty, initializers } => {
            let ptr = storage::alloc_anonymous(cg, fb, ty);
            codegen_initialize_compound(cg, fb, &ptr, ty, initializers)?;
            Ok((ptr, ty.clone()))
        }

        _ => Err(CompileError::new(ErrorKind::NotAnLvalue, expr.span, "expression does not denote a storage location")),
    }
}

fn struct_field_index(ty: &CType, field: &str, span: crate::error::Span) -> Result<(usize, CType), CompileError> {
    match ty {
        CType::Struct { fields, .. } => fields
            .iter()
            .position(|f| f.name == field)
            .map(|i| (i, fields[i].ty.clone()))
            .ok_or_else(|| CompileError::new(ErrorKind::UndeclaredIdentifier, span, format!("no member named `{field}`"))),
        other => Err(CompileError::new(ErrorKind::TypeMismatch, span, format!("`.`/`->` applied to non-struct type `{other}`"))),
    }
}

/// The base pointer an `Index` subscripts into: an array operand's own
/// address, or a pointer operand's value directly (array decay already
/// turned the latter into a plain `ptr`-typed rvalue).
fn codegen_array_base(cg: &mut CodeGen, fb: &mut FunctionBuilder, array: &Expr) -> Result<String, CompileError> {
    match &array.ty {
        CType::Array { .. } => {
            let (addr, _) = codegen_lvalue_address(cg, fb, array)?;
            Ok(addr)
        }
        CType::Pointer(_) => codegen_expr(cg, fb, array),
        other => Err(CompileError::new(ErrorKind::TypeMismatch, array.span, format!("cannot subscript a value of type `{other}`"))),
    }
}

fn codegen_initialize_compound(cg: &mut CodeGen, fb: &mut FunctionBuilder, ptr: &str, ty: &CType, initializers: &[Expr]) -> Result<(), CompileError> {
    match ty {
        CType::Struct { fields, .. } => {
            let struct_llvm = ty.llvm_type();
            for (i, init) in initializers.iter().enumerate() {
                let Some(field) = fields.get(i) else { break };
                let v = codegen_expr(cg, fb, init)?;
                let v = if field.ty.is_arithmetic() && init.ty.is_arithmetic() {
                    codegen_cast_value(cg, fb, v, &init.ty, &field.ty)
                } else {
                    v
                };
                let addr = fb.fresh_temp();
                fb.emit(format!("{addr} = getelementptr inbounds {struct_llvm}, ptr {ptr}, i32 0, i32 {i}"));
                fb.emit(format!("store {} {v}, ptr {addr}", field.ty.llvm_type()));
            }
        }
        CType::Array { element, .. } => {
            let (elem_size, _) = types::layout(element);
            for (i, init) in initializers.iter().enumerate() {
                let v = codegen_expr(cg, fb, init)?;
                let v = if element.is_arithmetic() && init.ty.is_arithmetic() {
                    codegen_cast_value(cg, fb, v, &init.ty, element)
                } else {
                    v
                };
                let off = i as u64 * elem_size;
                let addr = fb.fresh_temp();
                fb.emit(format!("{addr} = getelementptr inbounds i8, ptr {ptr}, i64 {off}"));
                fb.emit(format!("store {} {v}, ptr {addr}", element.llvm_type()));
            }
        }
        scalar => {
            if let Some(init) = initializers.first() {
                let v = codegen_expr(cg, fb, init)?;
                let v = if scalar.is_arithmetic() && init.ty.is_arithmetic() {
                    codegen_cast_value(cg, fb, v, &init.ty, scalar)
                } else {
                    v
                };
                fb.emit(format!("store {} {v}, ptr {ptr}", scalar.llvm_type()));
            }
        }
    }
    Ok(())
}

/// Calls the `cnv__<to>__<from>` snippet, unless `from == to` (identity
/// casts should already be elided by `lower.rs`, but a no-op here costs
/// nothing and keeps this function total).
pub(super) fn codegen_cast_value(cg: &mut CodeGen, fb: &mut FunctionBuilder, value: String, from: &CType, to: &CType) -> String {
    if from == to {
        return value;
    }
    let snippet = snippets::cast(from, to);
    cg.use_snippet(snippet);
    let t = fb.fresh_temp();
    fb.emit(format!("{t} = call {} @{}({} {value})", to.llvm_type(), snippet.symbol, from.llvm_type()));
    t
}

/// Evaluates `expr` and reduces it to an `i1` truth value, via the `_Bool`
/// cast snippet unless it's already `_Bool`-typed.
pub(super) fn codegen_truth_test(cg: &mut CodeGen, fb: &mut FunctionBuilder, expr: &Expr) -> Result<String, CompileError> {
    let v = codegen_expr(cg, fb, expr)?;
    if expr.ty == CType::Bool {
        Ok(v)
    } else {
        Ok(codegen_cast_value(cg, fb, v, &expr.ty, &CType::Bool))
    }
}

/// A `1` of `ty`'s type, suitable as the second `add`/`sub` operand for
/// `++`/`--`.
fn one_literal(ty: &CType, fb: &mut FunctionBuilder) -> String {
    if ty.is_floating() {
        float_literal_operand(1.0, ty, fb)
    } else {
        "1".to_string()
    }
}

fn float_literal_operand(v: f64, ty: &CType, fb: &mut FunctionBuilder) -> String {
    let bits = format!("0x{:016X}", v.to_bits());
    match ty {
        CType::Float(FloatWidth::LongDouble) => {
            let t = fb.fresh_temp();
            fb.emit(format!("{t} = fpext double {bits} to x86_fp80"));
            t
        }
        _ => bits,
    }
}

fn codegen_incdec(cg: &mut CodeGen, fb: &mut FunctionBuilder, op: IncDecOp, operand: &Expr) -> Result<String, CompileError> {
    let (addr, ty) = codegen_lvalue_address(cg, fb, operand)?;
    let cur = fb.fresh_temp();
    fb.emit(format!("{cur} = load {}, ptr {addr}", ty.llvm_type()));
    let one = one_literal(&ty, fb);
    let name = match op {
        IncDecOp::PreInc | IncDecOp::PostInc => "add",
        IncDecOp::PreDec | IncDecOp::PostDec => "sub",
    };
    let snippet = snippets::arithmetic(name, &ty);
    cg.use_snippet(snippet);
    let updated = fb.fresh_temp();
    fb.emit(format!("{updated} = call {} @{}({} {cur}, {} {one})", ty.llvm_type(), snippet.symbol, ty.llvm_type(), ty.llvm_type()));
    fb.emit(format!("store {} {updated}, ptr {addr}", ty.llvm_type()));
    match op {
        IncDecOp::PreInc | IncDecOp::PreDec => Ok(updated),
        IncDecOp::PostInc | IncDecOp::PostDec => Ok(cur),
    }
}

fn codegen_unary(cg: &mut CodeGen, fb: &mut FunctionBuilder, op: UnOp, operand: &Expr, result_ty: &CType) -> Result<String, CompileError> {
    match op {
        UnOp::Plus => codegen_expr(cg, fb, operand),
        UnOp::Neg => {
            let v = codegen_expr(cg, fb, operand)?;
            let snippet = snippets::neg(result_ty);
            cg.use_snippet(snippet);
            let t = fb.fresh_temp();
            fb.emit(format!("{t} = call {} @{}({} {v})", result_ty.llvm_type(), snippet.symbol, result_ty.llvm_type()));
            Ok(t)
        }
        UnOp::BitNot => {
            let v = codegen_expr(cg, fb, operand)?;
            let snippet = snippets::bitnot(result_ty);
            cg.use_snippet(snippet);
            let t = fb.fresh_temp();
            fb.emit(format!("{t} = call {} @{}({} {v})", result_ty.llvm_type(), snippet.symbol, result_ty.llvm_type()));
            Ok(t)
        }
        UnOp::LogNot => {
            let v = codegen_expr(cg, fb, operand)?;
            let snippet = snippets::lognot(&operand.ty);
            cg.use_snippet(snippet);
            let t = fb.fresh_temp();
            fb.emit(format!("{t} = call i32 @{}({} {v})", snippet.symbol, operand.ty.llvm_type()));
            Ok(t)
        }
    }
}

fn binop_snippet_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "div",
        BinOp::Mod => "mod",
        BinOp::BitAnd => "and",
        BinOp::BitOr => "or",
        BinOp::BitXor => "xor",
        BinOp::Shl => "shl",
        BinOp::Shr => "shr",
        BinOp::Lt => "lt",
        BinOp::Gt => "gt",
        BinOp::Le => "le",
        BinOp::Ge => "ge",
        BinOp::Eq => "eq",
        BinOp::Ne => "ne",
        BinOp::LogAnd | BinOp::LogOr => unreachable!("logical operators lower to ExprKind::Logical, never Binary"),
    }
}

/// `Binary`'s operand subexpressions keep their own type; this is where the
/// `cnv__` bridge to `operand_ty` actually happens, on both sides, before the
/// arithmetic/relational snippet call.
fn codegen_binary(cg: &mut CodeGen, fb: &mut FunctionBuilder, op: BinOp, lhs: &Expr, rhs: &Expr, operand_ty: &CType) -> Result<String, CompileError> {
    let lv = codegen_expr(cg, fb, lhs)?;
    let lv = codegen_cast_value(cg, fb, lv, &lhs.ty, operand_ty);
    let rv = codegen_expr(cg, fb, rhs)?;
    let rv = codegen_cast_value(cg, fb, rv, &rhs.ty, operand_ty);

    let name = binop_snippet_name(op);
    let is_relational = matches!(op, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne);
    let t = fb.fresh_temp();
    if is_relational {
        let snippet = snippets::relational(name, operand_ty);
        cg.use_snippet(snippet);
        fb.emit(format!("{t} = call i32 @{}({} {lv}, {} {rv})", snippet.symbol, operand_ty.llvm_type(), operand_ty.llvm_type()));
    } else {
        let snippet = snippets::arithmetic(name, operand_ty);
        cg.use_snippet(snippet);
        fb.emit(format!(
            "{t} = call {} @{}({} {lv}, {} {rv})",
            operand_ty.llvm_type(),
            snippet.symbol,
            operand_ty.llvm_type(),
            operand_ty.llvm_type()
        ));
    }
    Ok(t)
}

/// `&&`/`||`: short-circuit control flow writing into a fresh `int` slot,
/// rather than a snippet call (§4.4).
fn codegen_logical(cg: &mut CodeGen, fb: &mut FunctionBuilder, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<String, CompileError> {
    let result_ptr = storage::alloc_anonymous(cg, fb, &CType::int());
    let lhs_truth = codegen_truth_test(cg, fb, lhs)?;

    let (rhs_hint, short_hint, merge_hint) = match op {
        BinOp::LogAnd => ("land_rhs", "land_false", "land_end"),
        BinOp::LogOr => ("lor_rhs", "lor_true", "lor_end"),
        _ => unreachable!("codegen_logical only handles LogAnd/LogOr"),
    };
    let rhs_block = fb.fresh_block(rhs_hint);
    let short_block = fb.fresh_block(short_hint);
    let merge_block = fb.fresh_block(merge_hint);

    match op {
        BinOp::LogAnd => fb.terminate(format!("br i1 {lhs_truth}, label %{rhs_block}, label %{short_block}")),
        BinOp::LogOr => fb.terminate(format!("br i1 {lhs_truth}, label %{short_block}, label %{rhs_block}")),
        _ => unreachable!(),
    }

    fb.start_block(&rhs_block);
    let rhs_truth = codegen_truth_test(cg, fb, rhs)?;
    let rhs_int = fb.fresh_temp();
    fb.emit(format!("{rhs_int} = zext i1 {rhs_truth} to i32"));
    fb.emit(format!("store i32 {rhs_int}, ptr {result_ptr}"));
    fb.terminate(format!("br label %{merge_block}"));

    fb.start_block(&short_block);
    let short_value = match op {
        BinOp::LogAnd => "0",
        BinOp::LogOr => "1",
        _ => unreachable!(),
    };
    fb.emit(format!("store i32 {short_value}, ptr {result_ptr}"));
    fb.terminate(format!("br label %{merge_block}"));

    fb.start_block(&merge_block);
    let t = fb.fresh_temp();
    fb.emit(format!("{t} = load i32, ptr {result_ptr}"));
    Ok(t)
}

fn codegen_assign(cg: &mut CodeGen, fb: &mut FunctionBuilder, lhs: &Expr, rhs: &Expr, ty: &CType) -> Result<String, CompileError> {
    let (addr, _) = codegen_lvalue_address(cg, fb, lhs)?;
    let rv = codegen_expr(cg, fb, rhs)?;
    let rv = codegen_cast_value(cg, fb, rv, &rhs.ty, ty);
    fb.emit(format!("store {} {rv}, ptr {addr}", ty.llvm_type()));
    Ok(rv)
}

/// `x OP= e` desugars to `x = (typeof x)(x OP e)` - codegen's job, since
/// `lhs`/`rhs` haven't been pre-converted the way a plain `Binary`'s operands
/// are. The lvalue address is only ever computed once.
fn codegen_compound_assign(cg: &mut CodeGen, fb: &mut FunctionBuilder, op: BinOp, lhs: &Expr, rhs: &Expr, dst_ty: &CType) -> Result<String, CompileError> {
    let (addr, _) = codegen_lvalue_address(cg, fb, lhs)?;
    let cur = fb.fresh_temp();
    fb.emit(format!("{cur} = load {}, ptr {addr}", dst_ty.llvm_type()));
    let rv = codegen_expr(cg, fb, rhs)?;

    let is_shift = matches!(op, BinOp::Shl | BinOp::Shr);
    // C99 6.5.7: a shift's operand type is the promoted left operand alone,
    // with no usual-arithmetic blend against the (independently promoted)
    // right operand.
    let operand_ty = if is_shift { types::promote_integer(dst_ty) } else { types::usual_arithmetic(dst_ty, &rhs.ty) };

    let cur_c = codegen_cast_value(cg, fb, cur, dst_ty, &operand_ty);
    let rv_c = codegen_cast_value(cg, fb, rv, &rhs.ty, &operand_ty);

    let name = binop_snippet_name(op);
    let snippet = snippets::arithmetic(name, &operand_ty);
    cg.use_snippet(snippet);
    let t = fb.fresh_temp();
    fb.emit(format!(
        "{t} = call {} @{}({} {cur_c}, {} {rv_c})",
        operand_ty.llvm_type(),
        snippet.symbol,
        operand_ty.llvm_type(),
        operand_ty.llvm_type()
    ));

    let result = codegen_cast_value(cg, fb, t, &operand_ty, dst_ty);
    fb.emit(format!("store {} {result}, ptr {addr}", dst_ty.llvm_type()));
    Ok(result)
}

/// `?:` - both branches are already converted to the common result type by
/// `lower.rs`, so this just needs the if/else-to-a-fresh-slot shape with no
/// further conversion.
fn codegen_conditional(cg: &mut CodeGen, fb: &mut FunctionBuilder, cond: &Expr, then_expr: &Expr, else_expr: &Expr, ty: &CType) -> Result<String, CompileError> {
    let result_ptr = storage::alloc_anonymous(cg, fb, ty);
    let truth = codegen_truth_test(cg, fb, cond)?;

    let then_block = fb.fresh_block("cond_then");
    let else_block = fb.fresh_block("cond_else");
    let merge_block = fb.fresh_block("cond_end");
    fb.terminate(format!("br i1 {truth}, label %{then_block}, label %{else_block}"));

    fb.start_block(&then_block);
    let then_val = codegen_expr(cg, fb, then_expr)?;
    fb.emit(format!("store {} {then_val}, ptr {result_ptr}", ty.llvm_type()));
    fb.terminate(format!("br label %{merge_block}"));

    fb.start_block(&else_block);
    let else_val = codegen_expr(cg, fb, else_expr)?;
    fb.emit(format!("store {} {else_val}, ptr {result_ptr}", ty.llvm_type()));
    fb.terminate(format!("br label %{merge_block}"));

    fb.start_block(&merge_block);
    let t = fb.fresh_temp();
    fb.emit(format!("{t} = load {}, ptr {result_ptr}", ty.llvm_type()));
    Ok(t)
}

fn codegen_call(cg: &mut CodeGen, fb: &mut FunctionBuilder, callee: &str, args: &[Expr], ret_ty: &CType) -> Result<String, CompileError> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let v = codegen_expr(cg, fb, arg)?;
        parts.push(format!("{} {v}", arg.ty.llvm_type()));
    }
    let arglist = parts.join(", ");
    if matches!(ret_ty, CType::Void) {
        fb.emit(format!("call void @{callee}({arglist})"));
        Ok(String::new())
    } else {
        let t = fb.fresh_temp();
        fb.emit(format!("{t} = call {} @{callee}({arglist})", ret_ty.llvm_type()));
        Ok(t)
    }
}
