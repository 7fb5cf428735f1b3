//! Statement lowering (§4.5/§4.6)
//!
//! One function per `Statement` variant, dispatched from a single exhaustive
//! match so adding a new statement form is a compile error here until it's
//! handled. Control-flow constructs delegate to `control_flow.rs`; this
//! module owns the "flat" forms - expression statements, declarations,
//! compound blocks, `break`/`continue`/`return` - and the block-termination
//! policy of §4.6: once a block is terminated, later statements in the same
//! sequence are never reached, so the walk stops emitting into it rather
//! than appending instructions after a terminator.

use crate::ast::Statement;
use crate::codegen::control_flow;
use crate::codegen::expr::{codegen_cast_value, codegen_expr};
use crate::codegen::state::{CodeGen, FunctionBuilder};
use crate::codegen::storage;
use crate::error::CompileError;

pub(super) fn codegen_statement(cg: &mut CodeGen, fb: &mut FunctionBuilder, stmt: &Statement) -> Result<(), CompileError> {
    match stmt {
        Statement::Expr(e) => {
            codegen_expr(cg, fb, e)?;
            Ok(())
        }

        Statement::Declaration(decl) => {
            let ptr = storage::alloc_slot(cg, fb, &decl.ty);
            fb.declare_slot(decl.slot, ptr.clone(), decl.ty.clone());
            if let Some(init) = &decl.initializer {
                let v = codegen_expr(cg, fb, init)?;
                let v = codegen_cast_value(cg, fb, v, &init.ty, &decl.ty);
                fb.emit(format!("store {} {v}, ptr {ptr}", decl.ty.llvm_type()));
            }
            Ok(())
        }

        Statement::Compound { items, .. } => {
            let needs_vla_scope = storage::declares_vla(items);
            if needs_vla_scope {
                storage::open_vla_scope(fb);
            }
            for item in items {
                if fb.is_terminated() {
                    break;
                }
                codegen_statement(cg, fb, item)?;
            }
            if needs_vla_scope {
                storage::close_vla_scope(fb);
            }
            Ok(())
        }

        Statement::If { cond, then_branch, else_branch } => {
            control_flow::codegen_if_statement(cg, fb, cond, then_branch, else_branch.as_deref())
        }

        Statement::While { cond, body } => control_flow::codegen_while(cg, fb, cond, body),

        Statement::DoWhile { body, cond } => control_flow::codegen_do_while(cg, fb, body, cond),

        Statement::For { init, cond, step, body, .. } => {
            control_flow::codegen_for(cg, fb, init.as_deref(), cond.as_ref(), step.as_ref(), body)
        }

        Statement::Break { .. } => {
            let targets = fb.current_loop().clone();
            storage::restore_vlas_from(fb, targets.vla_depth);
            fb.terminate(format!("br label %{}", targets.break_label));
            Ok(())
        }

        Statement::Continue { .. } => {
            let targets = fb.current_loop().clone();
            storage::restore_vlas_from(fb, targets.vla_depth);
            fb.terminate(format!("br label %{}", targets.continue_label));
            Ok(())
        }

        Statement::Return { value, .. } => {
            // Every VLA scope still open at a `return` has to be unwound,
            // not just the ones entered since the innermost loop - depth 0
            // is the function's own entry.
            storage::restore_vlas_from(fb, 0);
            match value {
                Some(e) => {
                    let v = codegen_expr(cg, fb, e)?;
                    fb.terminate(format!("ret {} {v}", e.ty.llvm_type()));
                }
                None => fb.terminate("ret void"),
            }
            Ok(())
        }

        // Plain labels have no operational effect without `goto`, which this
        // subset does not support; the labeled statement still runs in
        // sequence.
        Statement::Labeled { stmt, .. } => codegen_statement(cg, fb, stmt),

        Statement::Empty => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_translation_unit;
    use crate::parser::Parser;

    fn codegen_body(src: &str) -> String {
        let mut parser = Parser::new(src).unwrap();
        let cst = parser.parse_translation_unit().unwrap();
        let program = lower_translation_unit(&cst).unwrap();
        let func = &program.functions[0];
        let mut cg = CodeGen::new();
        let mut fb = FunctionBuilder::new(&func.name);
        for p in &func.params {
            let ptr = storage::alloc_slot(&mut cg, &mut fb, &p.ty);
            fb.declare_slot(p.slot, ptr, p.ty.clone());
        }
        codegen_statement(&mut cg, &mut fb, &func.body).unwrap();
        fb.output
    }

    #[test]
    fn return_terminates_block_and_later_statements_are_dropped() {
        let ir = codegen_body("int f(void) { return 1; return 2; }");
        assert_eq!(ir.matches("ret i32").count(), 1);
    }

    #[test]
    fn break_in_loop_restores_nothing_without_a_vla() {
        let ir = codegen_body("int f(void) { while (1) { break; } return 0; }");
        assert!(ir.contains("br label %whileend"));
        assert!(!ir.contains("stackrestore"));
    }

    #[test]
    fn declaration_with_initializer_stores_converted_value() {
        let ir = codegen_body("int f(void) { double d = 1; return 0; }");
        assert!(ir.contains("store double"));
    }
}
