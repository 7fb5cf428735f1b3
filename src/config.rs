//! Compiler configuration for extensibility
//!
//! Lets a host embedding this compiler register additional snippets (for
//! operator/type combinations the built-in catalogue doesn't cover) and
//! pick a JIT optimization level, without forking the emitter.
//!
//! Grounded on the teacher's `config.rs` (`CompilerConfig`/`ExternalBuiltin`):
//! same builder shape, same eager validation of anything that will end up
//! verbatim in generated IR text.

use std::path::PathBuf;

/// LLVM optimization level, forwarded opaquely to the JIT back-end. The
/// front end never interprets this value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    O0,
    #[default]
    O1,
    O2,
    O3,
}

/// An additional snippet supplied by the host, for an (operator, operand
/// types) combination the built-in catalogue doesn't special-case.
///
/// # Type Safety
///
/// `ir_text` is spliced verbatim into the assembled module, so its `symbol`
/// is validated the same way the teacher validates external-builtin
/// symbols: only alphanumerics, underscores, and periods, to keep a
/// misconfigured host from injecting arbitrary LLVM IR directives.
#[derive(Debug, Clone)]
pub struct ExternalSnippet {
    /// The symbol this snippet defines (e.g. `mul__longlong__longlong__double`).
    pub symbol: String,
    /// The snippet's LLVM IR text, including its `define` line.
    pub ir_text: String,
}

impl ExternalSnippet {
    fn validate_symbol(symbol: &str) -> Result<(), String> {
        if symbol.is_empty() {
            return Err("Symbol name cannot be empty".to_string());
        }
        for c in symbol.chars() {
            if !c.is_alphanumeric() && c != '_' && c != '.' {
                return Err(format!(
                    "Invalid character '{c}' in symbol '{symbol}'. \
                     Symbols may only contain alphanumeric characters, underscores, and periods."
                ));
            }
        }
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `symbol` contains invalid characters for LLVM IR.
    pub fn new(symbol: impl Into<String>, ir_text: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self::validate_symbol(&symbol).expect("Invalid symbol name");
        ExternalSnippet {
            symbol,
            ir_text: ir_text.into(),
        }
    }
}

/// Configuration for a compile call.
///
/// Allows a host to extend the snippet catalogue, pick the JIT's
/// optimization level, and point at additional grammar-rule-table search
/// paths when it ships a modified C grammar.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Additional snippets to make available to the emitter, beyond the
    /// built-in catalogue.
    pub external_snippets: Vec<ExternalSnippet>,
    /// Optimization level forwarded to the JIT back-end.
    pub optimization_level: OptimizationLevel,
    /// Extra paths to search for a grammar rule table, before falling back
    /// to the compiled-in default.
    pub grammar_search_paths: Vec<PathBuf>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_snippet(mut self, snippet: ExternalSnippet) -> Self {
        self.external_snippets.push(snippet);
        self
    }

    pub fn with_snippets(mut self, snippets: impl IntoIterator<Item = ExternalSnippet>) -> Self {
        self.external_snippets.extend(snippets);
        self
    }

    pub fn with_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_grammar_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.grammar_search_paths.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_snippet_new_accepts_valid_symbol() {
        let s = ExternalSnippet::new("mul__longlong__longlong__double", "define ...");
        assert_eq!(s.symbol, "mul__longlong__longlong__double");
    }

    #[test]
    #[should_panic(expected = "Invalid symbol name")]
    fn external_snippet_rejects_hyphen() {
        let _ = ExternalSnippet::new("invalid-symbol", "define ...");
    }

    #[test]
    #[should_panic(expected = "Invalid symbol name")]
    fn external_snippet_rejects_at_sign() {
        let _ = ExternalSnippet::new("@malicious", "define ...");
    }

    #[test]
    #[should_panic(expected = "Invalid symbol name")]
    fn external_snippet_rejects_empty() {
        let _ = ExternalSnippet::new("", "define ...");
    }

    #[test]
    fn config_builder_accumulates_snippets_and_settings() {
        let config = CompilerConfig::new()
            .with_snippet(ExternalSnippet::new("a", "define a"))
            .with_snippet(ExternalSnippet::new("b", "define b"))
            .with_optimization_level(OptimizationLevel::O2);

        assert_eq!(config.external_snippets.len(), 2);
        assert_eq!(config.optimization_level, OptimizationLevel::O2);
    }
}
