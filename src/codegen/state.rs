//! Per-function builder state and the module-wide bookkeeping codegen
//! threads through every call (§4, §6).
//!
//! Mirrors the teacher's "explicit builder, no hidden globals" discipline:
//! every emission function takes `&mut FunctionBuilder` (plus `&mut CodeGen`
//! when it needs to record a snippet or struct type), the same way the
//! teacher's `CodeGen` is threaded through every `gen_*` call rather than
//! living behind a thread-local.

use crate::codegen::snippets::Snippet;
use crate::types::CType;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Module-wide state shared across every function in a translation unit:
/// which snippets got referenced (linked into the module exactly once) and
/// which struct types have already had their `%struct.Name = type {...}`
/// declaration emitted.
pub struct CodeGen {
    pub(super) used_snippets: HashSet<String>,
    seen_structs: HashSet<String>,
    pub(super) struct_decls: Vec<String>,
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            used_snippets: HashSet::new(),
            seen_structs: HashSet::new(),
            struct_decls: Vec::new(),
        }
    }

    /// Marks a pre-generated snippet as referenced; `program.rs` links each
    /// used snippet's `ir_text` into the module exactly once.
    pub fn use_snippet(&mut self, snippet: &Snippet) -> &str {
        self.used_snippets.insert(snippet.symbol.clone());
        &snippet.symbol
    }

    /// Registers a struct type's layout as a named LLVM struct type,
    /// recursing into field types so a struct-of-structs only emits each
    /// nested type once. No-op for anything that isn't (or doesn't contain)
    /// a struct.
    pub fn record_struct(&mut self, ty: &CType) {
        match ty {
            CType::Struct { name, fields, .. } => {
                let struct_name = name.as_deref().unwrap_or("anon").to_string();
                if self.seen_structs.insert(struct_name.clone()) {
                    let member_tys: Vec<String> = fields.iter().map(|f| f.ty.llvm_type()).collect();
                    self.struct_decls
                        .push(format!("%struct.{struct_name} = type {{ {} }}", member_tys.join(", ")));
                }
                for field in fields {
                    self.record_struct(&field.ty);
                }
            }
            CType::Array { element, .. } | CType::Pointer(element) => self.record_struct(element),
            _ => {}
        }
    }
}

/// A loop's break/continue targets, pushed when entering `while`/`do-while`/
/// `for` and popped on exit. `vla_depth` is the VLA-stacksave stack depth at
/// the point the loop was entered, so `break`/`continue` know how far to
/// unwind (restoring the earliest save at or past that depth undoes every
/// nested VLA scope opened since, per `llvm.stackrestore`'s LIFO semantics).
#[derive(Clone)]
pub struct LoopTargets {
    pub break_label: String,
    pub continue_label: String,
    pub vla_depth: usize,
}

/// Where a declared slot lives: the `alloca`'d pointer's SSA name and the
/// slot's C type (used to pick load/store widths and, for arrays, to skip
/// the load that a scalar variable reference would otherwise need).
#[derive(Clone)]
pub struct SlotInfo {
    pub ptr: String,
    pub ty: CType,
}

/// Per-function emission state: the body text built up so far, fresh-name
/// counters, the live slot table, and the loop-target / VLA-stacksave
/// stacks needed for `break`/`continue` and for unwinding `alloca`s created
/// by variable-length arrays on every exit path (§4.7).
pub struct FunctionBuilder {
    pub(super) name: String,
    pub(super) output: String,
    /// `alloca`s for every fixed-size local and parameter, keyed by nothing
    /// but emission order - spliced right after the `entry:` label, ahead of
    /// `output`, so a slot declared deep inside a nested block still obeys
    /// the "alloca lives in the entry block" invariant (§4.5) regardless of
    /// where its initializer runs.
    pub(super) entry_allocas: String,
    temp_counter: usize,
    block_counter: usize,
    pub(super) slots: HashMap<usize, SlotInfo>,
    pub(super) loop_stack: Vec<LoopTargets>,
    /// SSA names of `llvm.stacksave` results, one per currently-open scope
    /// that contains at least one VLA; restored on every path out of that
    /// scope (§4.7).
    pub(super) vla_stacksave_stack: Vec<String>,
    /// Set once a block has been terminated (`br`/`ret`/`unreachable`); a
    /// second terminator in the same block is a bug in the emitter, not in
    /// user code, so callers check this before emitting one.
    pub(super) block_terminated: bool,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        FunctionBuilder {
            name: name.to_string(),
            output: String::new(),
            entry_allocas: String::new(),
            temp_counter: 0,
            block_counter: 0,
            slots: HashMap::new(),
            loop_stack: Vec::new(),
            vla_stacksave_stack: Vec::new(),
            block_terminated: false,
        }
    }

    /// Appends one `alloca` line to the entry block's prologue, ahead of any
    /// instruction emitted at the current position (§4.5/§4.7).
    pub fn emit_entry_alloca(&mut self, line: impl AsRef<str>) {
        self.entry_allocas.push_str("  ");
        self.entry_allocas.push_str(line.as_ref());
        self.entry_allocas.push('\n');
    }

    /// A fresh SSA temporary name, `%.0`, `%.1`, ... - the `%.<n>` prefix
    /// §6 mandates for SSA temporaries and stack slots alike (slot pointers
    /// are just temps returned from here and stashed in the slot table).
    pub fn fresh_temp(&mut self) -> String {
        let t = format!("%.{}", self.temp_counter);
        self.temp_counter += 1;
        t
    }

    /// A fresh block label built from a human-readable hint, e.g.
    /// `fresh_block("forcond")` -> `forcond.3`.
    pub fn fresh_block(&mut self, hint: &str) -> String {
        let label = format!("{hint}.{}", self.block_counter);
        self.block_counter += 1;
        label
    }

    /// Appends one instruction line to the current block.
    pub fn emit(&mut self, line: impl AsRef<str>) {
        self.output.push_str("  ");
        self.output.push_str(line.as_ref());
        self.output.push('\n');
    }

    pub fn emit_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        self.output.push_str("  ");
        let _ = self.output.write_fmt(args);
        self.output.push('\n');
    }

    /// Starts a new block: emits the label and clears the terminated flag.
    /// Per §4.6, a block reached only by falling off the end of a
    /// terminated predecessor is simply never branched to - dead blocks are
    /// dropped by the JIT's optimizer, not specially handled here.
    pub fn start_block(&mut self, label: &str) {
        let _ = writeln!(self.output, "{label}:");
        self.block_terminated = false;
    }

    pub fn terminate(&mut self, instr: impl AsRef<str>) {
        self.emit(instr);
        self.block_terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.block_terminated
    }

    pub fn push_loop(&mut self, break_label: String, continue_label: String) {
        let vla_depth = self.vla_depth();
        self.loop_stack.push(LoopTargets { break_label, continue_label, vla_depth });
    }

    pub fn pop_loop(&mut self) {
        self.loop_stack.pop();
    }

    pub fn current_loop(&self) -> &LoopTargets {
        self.loop_stack.last().expect("break/continue outside a loop should have been rejected by lower.rs")
    }

    pub fn declare_slot(&mut self, slot: usize, ptr: String, ty: CType) {
        self.slots.insert(slot, SlotInfo { ptr, ty });
    }

    pub fn slot(&self, slot: usize) -> &SlotInfo {
        self.slots.get(&slot).expect("every referenced slot was declared during lowering")
    }

    pub fn push_vla_save(&mut self, save: String) {
        self.vla_stacksave_stack.push(save);
    }

    pub fn pop_vla_save(&mut self) -> Option<String> {
        self.vla_stacksave_stack.pop()
    }

    pub fn vla_depth(&self) -> usize {
        self.vla_stacksave_stack.len()
    }

    pub fn vla_save_at(&self, depth: usize) -> Option<&String> {
        self.vla_stacksave_stack.get(depth)
    }
}
