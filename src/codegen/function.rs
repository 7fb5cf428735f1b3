//! Per-function assembly: signature, parameter prologue, body, and the
//! "falls off the end" fallback a non-void function still needs a
//! terminator for (§4.5/§4.6).
//!
//! Every user function is externally visible (§6) - only snippets are
//! `dso_local`, since a function the host is going to look up by name and
//! JIT-call has to keep its symbol.

use crate::ast::FunctionDef;
use crate::codegen::state::{CodeGen, FunctionBuilder};
use crate::codegen::storage;
use crate::codegen::stmt::codegen_statement;
use crate::error::CompileError;
use crate::types::{self, CType};

pub(super) fn codegen_function(cg: &mut CodeGen, func: &FunctionDef) -> Result<String, CompileError> {
    cg.record_struct(&func.ret);
    let mut fb = FunctionBuilder::new(&func.name);

    let mut param_sig = Vec::with_capacity(func.params.len());
    for p in &func.params {
        let decayed = types::array_to_pointer(&p.ty);
        let ptr = storage::alloc_slot(cg, &mut fb, &decayed);
        fb.declare_slot(p.slot, ptr.clone(), decayed.clone());
        fb.emit(format!("store {} %arg.{}, ptr {ptr}", decayed.llvm_type(), p.slot));
        param_sig.push(format!("{} %arg.{}", decayed.llvm_type(), p.slot));
    }

    codegen_statement(cg, &mut fb, &func.body)?;

    if !fb.is_terminated() {
        match &func.ret {
            CType::Void => fb.terminate("ret void"),
            ret_ty => {
                let zero = zero_value(ret_ty);
                fb.terminate(format!("ret {} {zero}", ret_ty.llvm_type()));
            }
        }
    }

    let ret_llvm = func.ret.llvm_type();
    let params = param_sig.join(", ");
    Ok(format!(
        "define {ret_llvm} @{}({params}) {{\nentry:\n{}{}}}\n",
        func.name, fb.entry_allocas, fb.output
    ))
}

/// Falling off the end of a non-void function is undefined behavior in C;
/// the emitter still owes the block a well-formed terminator, so it returns
/// a zero of the declared type rather than leaving the module unverifiable.
fn zero_value(ty: &CType) -> &'static str {
    if ty.is_floating() {
        "0.0"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_translation_unit;
    use crate::parser::Parser;

    fn codegen_fn(src: &str) -> String {
        let mut parser = Parser::new(src).unwrap();
        let cst = parser.parse_translation_unit().unwrap();
        let program = lower_translation_unit(&cst).unwrap();
        let mut cg = CodeGen::new();
        codegen_function(&mut cg, &program.functions[0]).unwrap()
    }

    #[test]
    fn stores_incoming_parameters_before_the_body() {
        let ir = codegen_fn("int add(int a, int b) { return a + b; }");
        assert!(ir.starts_with("define i32 @add(i32 %arg.0, i32 %arg.1) {"));
        assert!(ir.contains("store i32 %arg.0"));
        assert!(ir.contains("store i32 %arg.1"));
    }

    #[test]
    fn missing_trailing_return_gets_a_zero_fallback() {
        let ir = codegen_fn("int f(int a) { if (a) return 1; }");
        assert!(ir.contains("ret i32 0"));
    }

    #[test]
    fn void_function_falls_off_the_end_into_ret_void() {
        let ir = codegen_fn("void f(int a) { int x = a; }");
        assert!(ir.trim_end().ends_with("ret void\n}") || ir.contains("ret void"));
    }
}
