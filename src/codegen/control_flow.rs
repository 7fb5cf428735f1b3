//! `if`/`while`/`do`-`while`/`for` lowering (§4.5)
//!
//! Each construct is a fixed block shape: a condition test that branches to
//! a body block and an exit block, wired up with `FunctionBuilder::fresh_block`
//! labels and `push_loop`/`pop_loop` for `break`/`continue` targets. The
//! shared `if_end` block is only started when at least one arm can still
//! reach it - if both branches already terminated (every path returns, say),
//! emitting an unreachable merge block would just leave a label with no
//! predecessor.

use crate::ast::{Expr, Statement};
use crate::codegen::expr::{codegen_expr, codegen_truth_test};
use crate::codegen::state::{CodeGen, FunctionBuilder};
use crate::codegen::stmt::codegen_statement;
use crate::error::CompileError;

pub(super) fn codegen_if_statement(
    cg: &mut CodeGen,
    fb: &mut FunctionBuilder,
    cond: &Expr,
    then_branch: &Statement,
    else_branch: Option<&Statement>,
) -> Result<(), CompileError> {
    let truth = codegen_truth_test(cg, fb, cond)?;
    let then_block = fb.fresh_block("if_then");
    let endif_block = fb.fresh_block("if_end");

    match else_branch {
        Some(else_stmt) => {
            let else_block = fb.fresh_block("if_else");
            fb.terminate(format!("br i1 {truth}, label %{then_block}, label %{else_block}"));

            fb.start_block(&then_block);
            codegen_statement(cg, fb, then_branch)?;
            let then_falls_through = !fb.is_terminated();
            if then_falls_through {
                fb.terminate(format!("br label %{endif_block}"));
            }

            fb.start_block(&else_block);
            codegen_statement(cg, fb, else_stmt)?;
            let else_falls_through = !fb.is_terminated();
            if else_falls_through {
                fb.terminate(format!("br label %{endif_block}"));
            }

            if then_falls_through || else_falls_through {
                fb.start_block(&endif_block);
            }
        }
        None => {
            fb.terminate(format!("br i1 {truth}, label %{then_block}, label %{endif_block}"));

            fb.start_block(&then_block);
            codegen_statement(cg, fb, then_branch)?;
            if !fb.is_terminated() {
                fb.terminate(format!("br label %{endif_block}"));
            }

            // The false path always reaches `endif_block` directly, so it's
            // reachable regardless of whether the `then` arm falls through.
            fb.start_block(&endif_block);
        }
    }
    Ok(())
}

pub(super) fn codegen_while(cg: &mut CodeGen, fb: &mut FunctionBuilder, cond: &Expr, body: &Statement) -> Result<(), CompileError> {
    let cond_block = fb.fresh_block("whilecond");
    let body_block = fb.fresh_block("whilebody");
    let end_block = fb.fresh_block("whileend");

    fb.terminate(format!("br label %{cond_block}"));
    fb.start_block(&cond_block);
    let truth = codegen_truth_test(cg, fb, cond)?;
    fb.terminate(format!("br i1 {truth}, label %{body_block}, label %{end_block}"));

    fb.start_block(&body_block);
    fb.push_loop(end_block.clone(), cond_block.clone());
    codegen_statement(cg, fb, body)?;
    fb.pop_loop();
    if !fb.is_terminated() {
        fb.terminate(format!("br label %{cond_block}"));
    }

    fb.start_block(&end_block);
    Ok(())
}

pub(super) fn codegen_do_while(cg: &mut CodeGen, fb: &mut FunctionBuilder, body: &Statement, cond: &Expr) -> Result<(), CompileError> {
    let body_block = fb.fresh_block("dobody");
    let cond_block = fb.fresh_block("docond");
    let end_block = fb.fresh_block("doend");

    fb.terminate(format!("br label %{body_block}"));
    fb.start_block(&body_block);
    fb.push_loop(end_block.clone(), cond_block.clone());
    codegen_statement(cg, fb, body)?;
    fb.pop_loop();
    if !fb.is_terminated() {
        fb.terminate(format!("br label %{cond_block}"));
    }

    fb.start_block(&cond_block);
    let truth = codegen_truth_test(cg, fb, cond)?;
    fb.terminate(format!("br i1 {truth}, label %{body_block}, label %{end_block}"));

    fb.start_block(&end_block);
    Ok(())
}

pub(super) fn codegen_for(
    cg: &mut CodeGen,
    fb: &mut FunctionBuilder,
    init: Option<&Statement>,
    cond: Option<&Expr>,
    step: Option<&Expr>,
    body: &Statement,
) -> Result<(), CompileError> {
    if let Some(init_stmt) = init {
        codegen_statement(cg, fb, init_stmt)?;
    }

    let cond_block = fb.fresh_block("forcond");
    let body_block = fb.fresh_block("forbody");
    let step_block = fb.fresh_block("forstep");
    let end_block = fb.fresh_block("forend");

    fb.terminate(format!("br label %{cond_block}"));
    fb.start_block(&cond_block);
    match cond {
        Some(c) => {
            let truth = codegen_truth_test(cg, fb, c)?;
            fb.terminate(format!("br i1 {truth}, label %{body_block}, label %{end_block}"));
        }
        None => fb.terminate(format!("br label %{body_block}")),
    }

    fb.start_block(&body_block);
    // `continue` branches to the step, not the condition (§4.5).
    fb.push_loop(end_block.clone(), step_block.clone());
    codegen_statement(cg, fb, body)?;
    fb.pop_loop();
    if !fb.is_terminated() {
        fb.terminate(format!("br label %{step_block}"));
    }

    fb.start_block(&step_block);
    if let Some(s) = step {
        codegen_expr(cg, fb, s)?;
    }
    if !fb.is_terminated() {
        fb.terminate(format!("br label %{cond_block}"));
    }

    fb.start_block(&end_block);
    Ok(())
}
