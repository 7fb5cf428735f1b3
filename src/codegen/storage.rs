//! Slot allocation and VLA storage (§4.7)
//!
//! Fixed-size locals and parameters get one `alloca` apiece, spliced into
//! the entry block regardless of which nested block declares them - the
//! same "entry-block alloca, point-of-use initializer" split the teacher's
//! `state.rs`/`words.rs` use for the tagged stack's own bookkeeping allocas.
//! Arrays are allocated as raw byte buffers (`[N x i8]`) rather than typed
//! LLVM array types, since `CType::Array::llvm_type()` is deliberately
//! opaque (`ptr`) - `expr.rs` addresses into them with manual
//! pointer-and-multiply arithmetic instead of typed `getelementptr`
//! indexing, so the allocation just needs to be big enough and byte
//! addressable.
//!
//! Variable-length arrays replace the static `alloca` with a dynamic one
//! sized from a runtime byte count, paired with `llvm.stacksave`/
//! `llvm.stackrestore`. Restoring an outer save also undoes every nested
//! one made after it, so `break`/`continue`/`return` only ever need to
//! restore the earliest save at or past the depth they're unwinding to.

use crate::ast::Statement;
use crate::codegen::state::{CodeGen, FunctionBuilder};
use crate::types::{self, ArrayExtent, CType};

/// True if `ty` is, or contains, an array dimension whose extent is a
/// runtime expression - i.e. whether declaring it needs a VLA-style dynamic
/// `alloca` instead of a plain entry-block one.
pub(super) fn contains_variable_extent(ty: &CType) -> bool {
    match ty {
        CType::Array { element, extent: ArrayExtent::Variable(_) } => {
            let _ = element;
            true
        }
        CType::Array { element, .. } => contains_variable_extent(element),
        _ => false,
    }
}

/// Whether any of `items`' direct declarations is a VLA - decides if this
/// compound statement needs its own stacksave/stackrestore pair.
pub(super) fn declares_vla(items: &[Statement]) -> bool {
    items
        .iter()
        .any(|s| matches!(s, Statement::Declaration(d) if contains_variable_extent(&d.ty)))
}

pub(super) fn open_vla_scope(fb: &mut FunctionBuilder) {
    let save = fb.fresh_temp();
    fb.emit(format!("{save} = call ptr @llvm.stacksave.p0()"));
    fb.push_vla_save(save);
}

/// Closes the VLA scope opened by `open_vla_scope`, restoring the saved
/// stack pointer unless this code path is already unreachable (a `return`/
/// `break`/`continue` inside the scope already did its own unwind).
pub(super) fn close_vla_scope(fb: &mut FunctionBuilder) {
    if let Some(save) = fb.pop_vla_save() {
        if !fb.is_terminated() {
            fb.emit(format!("call void @llvm.stackrestore.p0(ptr {save})"));
        }
    }
}

/// Emits the single restore needed to unwind every VLA scope opened at or
/// after `depth`, ahead of a `break`/`continue`/`return`.
pub(super) fn restore_vlas_from(fb: &mut FunctionBuilder, depth: usize) {
    if fb.vla_depth() > depth {
        if let Some(save) = fb.vla_save_at(depth).cloned() {
            fb.emit(format!("call void @llvm.stackrestore.p0(ptr {save})"));
        }
    }
}

/// The total byte size of `ty`, as an operand usable directly in IR text:
/// a decimal immediate for a fully fixed-size type, or an SSA name if any
/// dimension has to be read from its hidden extent slot at runtime.
fn total_size_operand(fb: &mut FunctionBuilder, ty: &CType) -> String {
    match ty {
        CType::Array { element, extent } => {
            let elem_size = total_size_operand(fb, element);
            let n = match extent {
                ArrayExtent::Fixed(n) => n.to_string(),
                ArrayExtent::Incomplete => "0".to_string(),
                ArrayExtent::Variable(slot) => {
                    let info = fb.slot(*slot).clone();
                    let t = fb.fresh_temp();
                    fb.emit(format!("{t} = load {}, ptr {}", info.ty.llvm_type(), info.ptr));
                    t
                }
            };
            let t = fb.fresh_temp();
            fb.emit(format!("{t} = mul i64 {elem_size}, {n}"));
            t
        }
        other => {
            let (size, _align) = types::layout(other);
            size.to_string()
        }
    }
}

/// Allocates storage for a declared local/param of type `ty` and returns
/// the SSA name of the pointer to it. Registers the struct type first so a
/// struct-typed slot's `alloca` can name a type that's actually declared in
/// the module.
pub(super) fn alloc_slot(cg: &mut CodeGen, fb: &mut FunctionBuilder, ty: &CType) -> String {
    cg.record_struct(ty);
    let ptr = fb.fresh_temp();
    if contains_variable_extent(ty) {
        let size = total_size_operand(fb, ty);
        fb.emit(format!("{ptr} = alloca i8, i64 {size}"));
    } else if let CType::Array { .. } = ty {
        let (size, align) = types::layout(ty);
        fb.emit_entry_alloca(format!("{ptr} = alloca [{size} x i8], align {align}"));
    } else {
        fb.emit_entry_alloca(format!("{ptr} = alloca {}", ty.llvm_type()));
    }
    ptr
}

/// Allocates an anonymous temporary (a compound literal's backing object),
/// always in the entry block since its lifetime is the enclosing function
/// the same as any other fixed-size local.
pub(super) fn alloc_anonymous(cg: &mut CodeGen, fb: &mut FunctionBuilder, ty: &CType) -> String {
    cg.record_struct(ty);
    let ptr = fb.fresh_temp();
    match ty {
        CType::Array { .. } => {
            let (size, align) = types::layout(ty);
            fb.emit_entry_alloca(format!("{ptr} = alloca [{size} x i8], align {align}"));
        }
        _ => fb.emit_entry_alloca(format!("{ptr} = alloca {}", ty.llvm_type())),
    }
    ptr
}
