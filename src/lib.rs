//! A JIT compiler for a fragment of C99.
//!
//! Parses a C99 subset into a typed AST (`parser`/`lower`/`ast`/`types`/
//! `scope`), emits LLVM IR as text (`codegen`), and hands that text to an
//! in-process JIT (`jit`), returning a [`jit::Library`] of dynamically typed,
//! host-callable C functions.
//!
//! ```rust,ignore
//! use cjit::{compile, CompilerConfig, DynValue};
//!
//! let library = compile("int add(int a, int b) { return a + b; }", &CompilerConfig::new())
//!     .expect("compilation failed");
//! let add = library.get("add").unwrap();
//! assert_eq!(add.call(&[DynValue::Int(2), DynValue::Int(3)]).unwrap(), DynValue::Int(5));
//! ```
//!
//! # Extending the compiler
//!
//! A host can register additional snippets for operator/type combinations
//! the built-in catalogue doesn't cover, and point at extra grammar rule
//! table search paths, via [`CompilerConfig`]:
//!
//! ```rust,ignore
//! use cjit::{CompilerConfig, ExternalSnippet};
//!
//! let config = CompilerConfig::new()
//!     .with_snippet(ExternalSnippet::new("my_symbol", "define ..."));
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod grammar;
pub mod jit;
pub mod lower;
pub mod parser;
pub mod scope;
pub mod types;

pub use config::{CompilerConfig, ExternalSnippet, OptimizationLevel};
pub use error::{CompileError, ErrorKind, Span};
pub use jit::{Callable, DynValue, Library};

/// Compiles a C99 translation unit into a JIT-backed [`Library`].
///
/// Runs the whole pipeline: lex/parse to a concrete syntax tree, lower to a
/// typed AST (name resolution, type checking, integer promotion), emit
/// LLVM IR text, then verify and JIT that text. Parser and lowering errors
/// are collected and returned together rather than stopping at the first
/// one, so a host can report every problem in a source file at once;
/// codegen and JIT failures stop the pipeline immediately since they
/// indicate a bug in this compiler rather than in the input.
pub fn compile(source: &str, config: &CompilerConfig) -> Result<Library, Vec<CompileError>> {
    let mut parser = parser::Parser::new(source).map_err(|e| vec![e])?;
    let cst = parser.parse_translation_unit().map_err(|e| vec![e])?;
    let program = lower::lower_translation_unit(&cst)?;
    let ir_text = codegen::codegen_program(&program, config).map_err(|e| vec![e])?;
    jit::jit_compile(&ir_text, &program, config).map_err(|e| vec![e])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_runs_a_simple_function() {
        let library = compile("int add(int a, int b) { return a + b; }", &CompilerConfig::new()).unwrap();
        let add = library.get("add").unwrap();
        assert_eq!(add.call(&[DynValue::Int(2), DynValue::Int(3)]).unwrap(), DynValue::Int(5));
    }

    #[test]
    fn syntax_errors_are_reported_rather_than_panicking() {
        let errs = compile("int f(int a { return a; }", &CompilerConfig::new()).unwrap_err();
        assert!(!errs.is_empty());
    }

    #[test]
    fn undeclared_identifier_is_reported() {
        let errs = compile("int f(void) { return x; }", &CompilerConfig::new()).unwrap_err();
        assert!(errs.iter().any(|e| e.kind == ErrorKind::UndeclaredIdentifier));
    }

    #[test]
    fn end_to_end_table_fib() {
        let src = "int ffib(int a){ if (a < 2) return a; return ffib(a-1) + ffib(a-2); }";
        let library = compile(src, &CompilerConfig::new()).unwrap();
        let ffib = library.get("ffib").unwrap();
        assert_eq!(ffib.call(&[DynValue::Int(10)]).unwrap(), DynValue::Int(55));
    }

    #[test]
    fn end_to_end_table_struct_of_array() {
        let src = "
            struct pair { int a; int b; };
            int fstruct_of_array(int n) {
                int xs[4];
                xs[0] = 1; xs[1] = 2; xs[2] = 3; xs[3] = 4;
                int total = 0;
                for (int i = 0; i < n; i = i + 1) {
                    total = total + xs[i];
                }
                return total;
            }
        ";
        let library = compile(src, &CompilerConfig::new()).unwrap();
        let f = library.get("fstruct_of_array").unwrap();
        assert_eq!(f.call(&[DynValue::Int(4)]).unwrap(), DynValue::Int(10));
    }
}
