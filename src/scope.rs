//! Symbol/scope manager
//!
//! A stack of scopes mapping identifiers to declarations. Two independent
//! namespaces are tracked per scope: the ordinary namespace (variables and
//! functions) and the tag namespace (`struct X`), matching C99 6.2.3.
//!
//! Grounded on the teacher's `resolver.rs`: a manager object that owns
//! nested maps and resolves a name by walking its active chain, repurposed
//! here from include-resolution to lexical block scoping (the teacher's
//! Seq has no block scopes - `resolver.rs` instead resolves file includes).

use crate::types::CType;
use std::collections::HashMap;

/// What an ordinary-namespace identifier is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A parameter or local variable, with its declared type and the slot
    /// id the emitter allocated for it.
    Var { ty: CType, slot: usize },
    /// A function, by its full signature.
    Func { ty: CType },
}

#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Binding>,
    tags: HashMap<String, CType>,
}

/// Why a `declare` call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclareError {
    /// A different kind of binding, or an incompatible function signature,
    /// already occupies this name in the same scope.
    Redeclared,
}

/// A stack of lexical scopes. `push_scope`/`pop_scope` must be paired by
/// the caller on every exit path (including error returns) - this mirrors
/// the teacher's `Resolver` invariant that every resolved include is
/// tracked until the whole resolve call completes.
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> ScopeStack {
        ScopeStack {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "popped the translation-unit scope");
        self.scopes.pop();
    }

    /// Declare `name` in the innermost scope. Shadowing an outer
    /// declaration is always allowed; redeclaring the *same* name in the
    /// *same* scope is only allowed for functions with a compatible
    /// signature (forward declarations).
    pub fn declare(&mut self, name: &str, binding: Binding) -> Result<(), DeclareError> {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if let Some(existing) = scope.vars.get(name) {
            match (existing, &binding) {
                (Binding::Func { ty: a }, Binding::Func { ty: b }) if a == b => {
                    return Ok(());
                }
                _ => return Err(DeclareError::Redeclared),
            }
        }
        scope.vars.insert(name.to_string(), binding);
        Ok(())
    }

    /// Resolve `name` against the innermost declaration visible from the
    /// current scope outward (shadowing).
    pub fn resolve(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.vars.get(name))
    }

    /// Declare a struct tag (`struct X`) in the innermost scope. The tag
    /// namespace is independent of the ordinary namespace, so `struct X`
    /// and a variable or function named `X` never collide.
    pub fn declare_tag(&mut self, name: &str, ty: CType) -> Result<(), DeclareError> {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if scope.tags.contains_key(name) {
            return Err(DeclareError::Redeclared);
        }
        scope.tags.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn resolve_tag(&self, name: &str) -> Option<&CType> {
        self.scopes.iter().rev().find_map(|s| s.tags.get(name))
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CType;

    #[test]
    fn resolves_innermost_shadowing_declaration() {
        let mut scopes = ScopeStack::new();
        scopes
            .declare("x", Binding::Var { ty: CType::int(), slot: 0 })
            .unwrap();
        scopes.push_scope();
        scopes
            .declare("x", Binding::Var { ty: CType::double(), slot: 1 })
            .unwrap();

        assert_eq!(scopes.resolve("x"), Some(&Binding::Var { ty: CType::double(), slot: 1 }));
        scopes.pop_scope();
        assert_eq!(scopes.resolve("x"), Some(&Binding::Var { ty: CType::int(), slot: 0 }));
    }

    #[test]
    fn redeclaring_a_variable_in_the_same_scope_is_an_error() {
        let mut scopes = ScopeStack::new();
        scopes
            .declare("x", Binding::Var { ty: CType::int(), slot: 0 })
            .unwrap();
        let err = scopes.declare("x", Binding::Var { ty: CType::int(), slot: 1 });
        assert_eq!(err, Err(DeclareError::Redeclared));
    }

    #[test]
    fn compatible_function_redeclaration_is_allowed() {
        let mut scopes = ScopeStack::new();
        let ty = CType::Function {
            ret: Box::new(CType::int()),
            params: vec![CType::int()],
            variadic: false,
        };
        scopes.declare("f", Binding::Func { ty: ty.clone() }).unwrap();
        assert!(scopes.declare("f", Binding::Func { ty }).is_ok());
    }

    #[test]
    fn tag_namespace_is_independent_of_ordinary_namespace() {
        let mut scopes = ScopeStack::new();
        scopes
            .declare("Point", Binding::Var { ty: CType::int(), slot: 0 })
            .unwrap();
        let struct_ty = CType::Struct {
            name: Some("Point".to_string()),
            fields: vec![],
            size: 0,
            align: 1,
        };
        assert!(scopes.declare_tag("Point", struct_ty).is_ok());
    }

    #[test]
    fn unresolved_identifier_returns_none() {
        let scopes = ScopeStack::new();
        assert!(scopes.resolve("nope").is_none());
    }
}
