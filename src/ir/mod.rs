//! Tile IR — the substrate every analysis and transform pass reads and
//! rewrites.
//!
//! Values and basic blocks live in arenas owned by their `Function` and are
//! addressed everywhere else by `ValueId`/`BlockId` handles, so the cyclic
//! relations (blocks referencing blocks, values referencing their users)
//! never turn into ownership cycles. Use-lists are index sets maintained
//! incrementally by the mutation helpers on `Function`; a pass that adds or
//! removes a use goes through those helpers and never edits the lists
//! directly.
//!
//! Instructions are one closed sum type (`Op`). Passes match exhaustively,
//! so adding an operation kind is a compile-time visible event.

pub mod builder;
pub mod display;
pub mod types;

pub use builder::FunctionBuilder;
pub use types::Ty;

use std::fmt;

// ─── Handles ──────────────────────────────────────────────────────

/// Stable identity of a value within its owning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Stable identity of a basic block within its owning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// ─── Operations ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    CmpEq,
    CmpLt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Min,
    Max,
}

/// The closed set of instruction kinds.
///
/// Memory operations carry a `vector_width` (elements moved per lane per
/// transaction); it starts at 1 and is widened by the coalescing pass once
/// alignment analysis has proven contiguity. `CopyToShared` and `Barrier`
/// never come from the front end; they are introduced by the staging and
/// barrier-insertion passes.
#[derive(Debug, Clone)]
pub enum Op {
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Pointer arithmetic: `ptr` advanced by `offset` elements.
    PtrAdd {
        ptr: ValueId,
        offset: ValueId,
    },
    Load {
        ptr: ValueId,
        mask: Option<ValueId>,
        vector_width: u32,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
        vector_width: u32,
    },
    AtomicAdd {
        ptr: ValueId,
        value: ValueId,
        mask: Option<ValueId>,
    },
    AtomicCas {
        ptr: ValueId,
        cmp: ValueId,
        value: ValueId,
    },
    AtomicXchg {
        ptr: ValueId,
        value: ValueId,
    },
    /// Matrix-multiply-accumulate: `a @ b + acc`.
    Dot {
        a: ValueId,
        b: ValueId,
        acc: ValueId,
    },
    Reduce {
        src: ValueId,
        dim: usize,
        op: ReduceOp,
    },
    Select {
        cond: ValueId,
        then_val: ValueId,
        else_val: ValueId,
    },
    /// Scalar replicated into a tile.
    Splat {
        src: ValueId,
    },
    /// Tile expanded along size-1 dimensions; the result type fixes the shape.
    Broadcast {
        src: ValueId,
    },
    /// The 1-D index tile `[start, end)`.
    Range {
        start: u64,
        end: u64,
    },
    GetProgramId {
        dim: usize,
    },
    GetNumPrograms {
        dim: usize,
    },
    Cast {
        src: ValueId,
    },
    /// Explicit staging of an operand through fast on-chip memory.
    CopyToShared {
        src: ValueId,
        is_async: bool,
    },
    /// Execution-group synchronization barrier.
    Barrier,
    Phi {
        incoming: Vec<(BlockId, ValueId)>,
    },
    Branch {
        cond: Option<ValueId>,
        then_dest: BlockId,
        else_dest: Option<BlockId>,
    },
    Return {
        value: Option<ValueId>,
    },
}

impl Op {
    /// Value operands in a fixed order.
    pub fn operands(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        self.visit_operands(|v| out.push(v));
        out
    }

    fn visit_operands(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Op::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Op::PtrAdd { ptr, offset } => {
                f(*ptr);
                f(*offset);
            }
            Op::Load { ptr, mask, .. } => {
                f(*ptr);
                if let Some(m) = mask {
                    f(*m);
                }
            }
            Op::Store {
                ptr, value, mask, ..
            } => {
                f(*ptr);
                f(*value);
                if let Some(m) = mask {
                    f(*m);
                }
            }
            Op::AtomicAdd { ptr, value, mask } => {
                f(*ptr);
                f(*value);
                if let Some(m) = mask {
                    f(*m);
                }
            }
            Op::AtomicCas { ptr, cmp, value } => {
                f(*ptr);
                f(*cmp);
                f(*value);
            }
            Op::AtomicXchg { ptr, value } => {
                f(*ptr);
                f(*value);
            }
            Op::Dot { a, b, acc } => {
                f(*a);
                f(*b);
                f(*acc);
            }
            Op::Reduce { src, .. }
            | Op::Splat { src }
            | Op::Broadcast { src }
            | Op::Cast { src }
            | Op::CopyToShared { src, .. } => f(*src),
            Op::Select {
                cond,
                then_val,
                else_val,
            } => {
                f(*cond);
                f(*then_val);
                f(*else_val);
            }
            Op::Range { .. }
            | Op::GetProgramId { .. }
            | Op::GetNumPrograms { .. }
            | Op::Barrier => {}
            Op::Phi { incoming } => {
                for (_, v) in incoming {
                    f(*v);
                }
            }
            Op::Branch { cond, .. } => {
                if let Some(c) = cond {
                    f(*c);
                }
            }
            Op::Return { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
        }
    }

    /// Rewrite every operand equal to `old` into `new`. Returns how many
    /// occurrences were rewritten.
    pub fn replace_operand(&mut self, old: ValueId, new: ValueId) -> usize {
        let mut n = 0;
        self.visit_operands_mut(|v| {
            if *v == old {
                *v = new;
                n += 1;
            }
        });
        n
    }

    fn visit_operands_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Op::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Op::PtrAdd { ptr, offset } => {
                f(ptr);
                f(offset);
            }
            Op::Load { ptr, mask, .. } => {
                f(ptr);
                if let Some(m) = mask {
                    f(m);
                }
            }
            Op::Store {
                ptr, value, mask, ..
            } => {
                f(ptr);
                f(value);
                if let Some(m) = mask {
                    f(m);
                }
            }
            Op::AtomicAdd { ptr, value, mask } => {
                f(ptr);
                f(value);
                if let Some(m) = mask {
                    f(m);
                }
            }
            Op::AtomicCas { ptr, cmp, value } => {
                f(ptr);
                f(cmp);
                f(value);
            }
            Op::AtomicXchg { ptr, value } => {
                f(ptr);
                f(value);
            }
            Op::Dot { a, b, acc } => {
                f(a);
                f(b);
                f(acc);
            }
            Op::Reduce { src, .. }
            | Op::Splat { src }
            | Op::Broadcast { src }
            | Op::Cast { src }
            | Op::CopyToShared { src, .. } => f(src),
            Op::Select {
                cond,
                then_val,
                else_val,
            } => {
                f(cond);
                f(then_val);
                f(else_val);
            }
            Op::Range { .. }
            | Op::GetProgramId { .. }
            | Op::GetNumPrograms { .. }
            | Op::Barrier => {}
            Op::Phi { incoming } => {
                for (_, v) in incoming {
                    f(v);
                }
            }
            Op::Branch { cond, .. } => {
                if let Some(c) = cond {
                    f(c);
                }
            }
            Op::Return { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
        }
    }

    /// Whether the instruction has an effect observable outside the IR
    /// graph. These are the roots dead-code elimination keeps.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            Op::Store { .. }
                | Op::AtomicAdd { .. }
                | Op::AtomicCas { .. }
                | Op::AtomicXchg { .. }
                | Op::Barrier
                | Op::Branch { .. }
                | Op::Return { .. }
        )
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Branch { .. } | Op::Return { .. })
    }
}

// ─── Values ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ValueKind {
    Argument { index: usize },
    ConstInt { value: i64 },
    ConstFloat { value: f64 },
    Inst { op: Op, block: BlockId },
}

/// One IR value. `uses` lists the instruction values consuming this one,
/// with one entry per operand occurrence; it is a relation, never
/// ownership — deleting a value requires its uses to be retargeted or
/// removed first.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: Ty,
    pub kind: ValueKind,
    pub uses: Vec<ValueId>,
}

impl Value {
    pub fn op(&self) -> Option<&Op> {
        match &self.kind {
            ValueKind::Inst { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match &self.kind {
            ValueKind::ConstInt { value } => Some(*value),
            _ => None,
        }
    }
}

// ─── Parameter attributes ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamAttr {
    Readonly,
    Writeonly,
    Noalias,
    Aligned(u64),
    MultipleOf(u64),
    /// The runtime value of this parameter participates in the
    /// autotuning invocation key.
    Retune,
}

// ─── Blocks ───────────────────────────────────────────────────────

/// A basic block: an ordered run of instructions plus its CFG relations.
/// Predecessors and successors reference blocks by identity; back edges
/// are expected for loops.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

// ─── Function ─────────────────────────────────────────────────────

/// An IR function: value and block arenas plus the parameter list.
/// Created once by the front end, mutated in place by every pass,
/// discarded after code generation.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    values: Vec<Value>,
    blocks: Vec<Block>,
    /// Blocks in program order; the first is the entry.
    pub block_order: Vec<BlockId>,
    pub params: Vec<ValueId>,
    pub param_attrs: Vec<Vec<ParamAttr>>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            blocks: Vec::new(),
            block_order: Vec::new(),
            params: Vec::new(),
            param_attrs: Vec::new(),
        }
    }

    // ── Accessors ──

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn ty(&self, id: ValueId) -> &Ty {
        &self.value(id).ty
    }

    /// Instruction values of every block, in program order.
    pub fn linear_insts(&self) -> Vec<ValueId> {
        self.block_order
            .iter()
            .flat_map(|b| self.block(*b).insts.iter().copied())
            .collect()
    }

    pub fn param_has_attr(&self, index: usize, attr: ParamAttr) -> bool {
        self.param_attrs
            .get(index)
            .is_some_and(|attrs| attrs.contains(&attr))
    }

    // ── Construction ──

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.into(),
            insts: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        });
        self.block_order.push(id);
        id
    }

    pub fn add_param(&mut self, ty: Ty, attrs: Vec<ParamAttr>) -> ValueId {
        let index = self.params.len();
        let id = self.new_value(ty, ValueKind::Argument { index });
        self.params.push(id);
        self.param_attrs.push(attrs);
        id
    }

    pub fn const_int(&mut self, ty: Ty, value: i64) -> ValueId {
        self.new_value(ty, ValueKind::ConstInt { value })
    }

    pub fn const_float(&mut self, ty: Ty, value: f64) -> ValueId {
        self.new_value(ty, ValueKind::ConstFloat { value })
    }

    /// Append an instruction at the end of `block` (before its terminator
    /// if one is already present) and register its operand uses.
    pub fn append(&mut self, block: BlockId, op: Op, ty: Ty) -> ValueId {
        let at = self
            .block(block)
            .insts
            .iter()
            .position(|&v| self.value(v).op().is_some_and(Op::is_terminator))
            .unwrap_or(self.block(block).insts.len());
        self.insert_at(block, at, op, ty)
    }

    /// Insert an instruction immediately before `before` in `block`.
    pub fn insert_before(&mut self, block: BlockId, before: ValueId, op: Op, ty: Ty) -> ValueId {
        let at = self
            .block(block)
            .insts
            .iter()
            .position(|&v| v == before)
            .expect("insertion point not in block");
        self.insert_at(block, at, op, ty)
    }

    fn insert_at(&mut self, block: BlockId, at: usize, op: Op, ty: Ty) -> ValueId {
        if let Op::Branch {
            then_dest,
            else_dest,
            ..
        } = &op
        {
            let dests: Vec<BlockId> = Some(*then_dest).into_iter().chain(*else_dest).collect();
            for dest in dests {
                if !self.block(block).succs.contains(&dest) {
                    self.block_mut(block).succs.push(dest);
                }
                if !self.block(dest).preds.contains(&block) {
                    self.block_mut(dest).preds.push(block);
                }
            }
        }
        let operands = op.operands();
        let id = self.new_value(ty, ValueKind::Inst { op, block });
        for operand in operands {
            self.value_mut(operand).uses.push(id);
        }
        self.block_mut(block).insts.insert(at, id);
        id
    }

    fn new_value(&mut self, ty: Ty, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            ty,
            kind,
            uses: Vec::new(),
        });
        id
    }

    // ── Mutation ──

    /// Retarget every use of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        let users = std::mem::take(&mut self.value_mut(old).uses);
        for user in users {
            let n = match &mut self.value_mut(user).kind {
                ValueKind::Inst { op, .. } => op.replace_operand(old, new),
                _ => 0,
            };
            for _ in 0..n {
                self.value_mut(new).uses.push(user);
            }
        }
    }

    /// Retarget the occurrences of `old` inside one user only.
    pub fn replace_operand_in(&mut self, user: ValueId, old: ValueId, new: ValueId) {
        let n = match &mut self.value_mut(user).kind {
            ValueKind::Inst { op, .. } => op.replace_operand(old, new),
            _ => 0,
        };
        for _ in 0..n {
            let uses = &mut self.value_mut(old).uses;
            if let Some(pos) = uses.iter().position(|&u| u == user) {
                uses.remove(pos);
            }
            self.value_mut(new).uses.push(user);
        }
    }

    /// Unlink an instruction with no remaining uses from its block and
    /// from the use-lists of its operands.
    pub fn remove(&mut self, id: ValueId) {
        debug_assert!(self.value(id).uses.is_empty(), "removing a value in use");
        let (op, block) = match &self.value(id).kind {
            ValueKind::Inst { op, block } => (op.clone(), *block),
            _ => return,
        };
        for operand in op.operands() {
            let uses = &mut self.value_mut(operand).uses;
            if let Some(pos) = uses.iter().position(|&u| u == id) {
                uses.remove(pos);
            }
        }
        self.block_mut(block).insts.retain(|&v| v != id);
    }
}

// ─── Module ───────────────────────────────────────────────────────

/// The unit of compilation: an ordered set of functions. The first
/// function is the kernel entry point.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// The kernel to compile, by frontend contract the first function.
    pub fn entry(&self) -> &Function {
        &self.functions[0]
    }

    pub fn entry_mut(&mut self) -> &mut Function {
        &mut self.functions[0]
    }
}
