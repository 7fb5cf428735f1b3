//! Whole-module assembly (§6 "Output IR module")
//!
//! Emits the module header (`target triple`/`target datalayout`), then each
//! function in turn, then the struct type declarations and snippet
//! definitions those functions ended up referencing - snippets are only
//! linked in if used, so a translation unit that never does floating-point
//! division never pays for a `div__double__double__double` it doesn't call.

use crate::ast::Program;
use crate::codegen::function::codegen_function;
use crate::codegen::platform;
use crate::codegen::snippets;
use crate::codegen::state::CodeGen;
use crate::config::CompilerConfig;
use crate::error::CompileError;

/// Assembles `program` into one LLVM IR module's text.
pub(super) fn assemble(program: &Program, config: &CompilerConfig) -> Result<String, CompileError> {
    let mut cg = CodeGen::new();
    let mut function_decls = Vec::with_capacity(program.functions.len());
    for func in &program.functions {
        function_decls.push(codegen_function(&mut cg, func)?);
    }

    let mut out = String::new();
    out.push_str(&format!("target datalayout = \"{}\"\n", platform::DATA_LAYOUT));
    out.push_str(&format!("target triple = \"{}\"\n\n", platform::get_target_triple()));

    for decl in &cg.struct_decls {
        out.push_str(decl);
        out.push('\n');
    }
    if !cg.struct_decls.is_empty() {
        out.push('\n');
    }

    for text in &function_decls {
        out.push_str(text);
        out.push('\n');
    }

    // VLAs (§4.7) lower to `alloca`s saved/restored via these intrinsics;
    // declared unconditionally since `storage.rs` refers to them by name
    // whenever a function actually opens a VLA scope, and an unused
    // `declare` costs nothing in the assembled module.
    out.push_str("declare ptr @llvm.stacksave.p0()\n");
    out.push_str("declare void @llvm.stackrestore.p0(ptr)\n\n");

    let mut symbols: Vec<&String> = cg.used_snippets.iter().collect();
    symbols.sort();
    for symbol in symbols {
        if let Some(external) = config.external_snippets.iter().find(|s| &s.symbol == symbol) {
            out.push_str(&external.ir_text);
        } else {
            out.push_str(&snippets::by_symbol(symbol).ir_text);
        }
        out.push('\n');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_translation_unit;
    use crate::parser::Parser;

    fn assemble_src(src: &str) -> String {
        let mut parser = Parser::new(src).unwrap();
        let cst = parser.parse_translation_unit().unwrap();
        let program = lower_translation_unit(&cst).unwrap();
        assemble(&program, &CompilerConfig::new()).unwrap()
    }

    #[test]
    fn module_header_has_datalayout_and_triple() {
        let ir = assemble_src("int f(void) { return 0; }");
        assert!(ir.contains("target datalayout = \"e-m:e-i64:64-f80:128-n8:16:32:64-S128\""));
        assert!(ir.contains("target triple"));
    }

    #[test]
    fn referenced_snippet_is_linked_exactly_once() {
        let ir = assemble_src("int f(int a, int b) { return a + b + a + b; }");
        assert_eq!(ir.matches("define i32 @add__int__int__int").count(), 1);
    }

    #[test]
    fn unreferenced_snippet_is_not_linked() {
        let ir = assemble_src("int f(int a, int b) { return a + b; }");
        assert!(!ir.contains("@div__int__int__int"));
    }

    #[test]
    fn multiple_functions_are_each_emitted() {
        let ir = assemble_src("int a(void) { return 1; } int b(void) { return 2; }");
        assert!(ir.contains("define i32 @a("));
        assert!(ir.contains("define i32 @b("));
    }

    #[test]
    fn external_snippet_overrides_built_in() {
        let mut parser = Parser::new("int f(int a, int b) { return a + b; }").unwrap();
        let cst = parser.parse_translation_unit().unwrap();
        let program = lower_translation_unit(&cst).unwrap();
        let config = CompilerConfig::new().with_snippet(crate::config::ExternalSnippet::new(
            "add__int__int__int",
            "define i32 @add__int__int__int(i32 %a, i32 %b) { ret i32 42 }",
        ));
        let ir = assemble(&program, &config).unwrap();
        assert!(ir.contains("ret i32 42"));
    }
}
