//! Typed construction API over the IR arenas.
//!
//! Front ends lower their AST through this builder; tests use it to stage
//! kernels directly. The builder infers result types from operand types
//! and keeps the CFG relations and use-lists consistent via the `Function`
//! mutation helpers.

use super::{BinOp, BlockId, Function, Op, ParamAttr, ReduceOp, Ty, ValueId};

pub struct FunctionBuilder {
    func: Function,
    cur: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            func: Function::new(name),
            cur: None,
        }
    }

    pub fn param(&mut self, ty: Ty, attrs: &[ParamAttr]) -> ValueId {
        self.func.add_param(ty, attrs.to_vec())
    }

    pub fn block(&mut self, name: impl Into<String>) -> BlockId {
        let b = self.func.add_block(name);
        if self.cur.is_none() {
            self.cur = Some(b);
        }
        b
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.cur = Some(block);
    }

    pub fn finish(self) -> Function {
        self.func
    }

    pub fn func(&self) -> &Function {
        &self.func
    }

    fn emit(&mut self, op: Op, ty: Ty) -> ValueId {
        let block = self.cur.expect("no current block");
        self.func.append(block, op, ty)
    }

    // ── Constants ──

    pub fn const_i32(&mut self, v: i64) -> ValueId {
        self.func.const_int(Ty::I32, v)
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.func.const_int(Ty::Bool, v as i64)
    }

    // ── Arithmetic ──

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = match op {
            BinOp::CmpEq | BinOp::CmpLt => match self.func.ty(lhs) {
                Ty::Tile(_, shape) => Ty::tile(Ty::Bool, &shape.clone()),
                _ => Ty::Bool,
            },
            _ => self.func.ty(lhs).clone(),
        };
        self.emit(Op::Binary { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn cmp_lt(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::CmpLt, lhs, rhs)
    }

    // ── Tiles ──

    pub fn range(&mut self, start: u64, end: u64) -> ValueId {
        let ty = Ty::tile(Ty::I32, &[end - start]);
        self.emit(Op::Range { start, end }, ty)
    }

    pub fn splat(&mut self, src: ValueId, shape: &[u64]) -> ValueId {
        let elem = self.func.ty(src).clone();
        self.emit(Op::Splat { src }, Ty::tile(elem, shape))
    }

    pub fn broadcast(&mut self, src: ValueId, shape: &[u64]) -> ValueId {
        let elem = self.func.ty(src).elem().clone();
        self.emit(Op::Broadcast { src }, Ty::tile(elem, shape))
    }

    pub fn reduce(&mut self, src: ValueId, dim: usize, op: ReduceOp) -> ValueId {
        let src_ty = self.func.ty(src).clone();
        let mut shape = src_ty.shape().to_vec();
        shape.remove(dim);
        let ty = if shape.is_empty() {
            src_ty.elem().clone()
        } else {
            Ty::tile(src_ty.elem().clone(), &shape)
        };
        self.emit(Op::Reduce { src, dim, op }, ty)
    }

    pub fn cast(&mut self, src: ValueId, ty: Ty) -> ValueId {
        self.emit(Op::Cast { src }, ty)
    }

    pub fn select(&mut self, cond: ValueId, then_val: ValueId, else_val: ValueId) -> ValueId {
        let ty = self.func.ty(then_val).clone();
        self.emit(
            Op::Select {
                cond,
                then_val,
                else_val,
            },
            ty,
        )
    }

    // ── Memory ──

    /// Pointer arithmetic. A scalar pointer advanced by a tile offset
    /// yields a tile of pointers.
    pub fn ptr_add(&mut self, ptr: ValueId, offset: ValueId) -> ValueId {
        let ptr_ty = self.func.ty(ptr).clone();
        let off_ty = self.func.ty(offset).clone();
        let ty = if !ptr_ty.is_tile() && off_ty.is_tile() {
            Ty::tile(ptr_ty, off_ty.shape())
        } else {
            ptr_ty
        };
        self.emit(Op::PtrAdd { ptr, offset }, ty)
    }

    pub fn load(&mut self, ptr: ValueId, mask: Option<ValueId>) -> ValueId {
        let ptr_ty = self.func.ty(ptr).clone();
        let pointee = match ptr_ty.elem() {
            Ty::Ptr(elem) => (**elem).clone(),
            other => other.clone(),
        };
        let ty = if ptr_ty.is_tile() {
            Ty::tile(pointee, ptr_ty.shape())
        } else {
            pointee
        };
        self.emit(
            Op::Load {
                ptr,
                mask,
                vector_width: 1,
            },
            ty,
        )
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId, mask: Option<ValueId>) -> ValueId {
        self.emit(
            Op::Store {
                ptr,
                value,
                mask,
                vector_width: 1,
            },
            Ty::Void,
        )
    }

    pub fn atomic_add(&mut self, ptr: ValueId, value: ValueId, mask: Option<ValueId>) -> ValueId {
        let ty = self.func.ty(value).clone();
        self.emit(Op::AtomicAdd { ptr, value, mask }, ty)
    }

    pub fn dot(&mut self, a: ValueId, b: ValueId, acc: ValueId) -> ValueId {
        let ty = self.func.ty(acc).clone();
        self.emit(Op::Dot { a, b, acc }, ty)
    }

    // ── Indexing intrinsics ──

    pub fn program_id(&mut self, dim: usize) -> ValueId {
        self.emit(Op::GetProgramId { dim }, Ty::I32)
    }

    pub fn num_programs(&mut self, dim: usize) -> ValueId {
        self.emit(Op::GetNumPrograms { dim }, Ty::I32)
    }

    // ── Control flow ──

    pub fn phi(&mut self, ty: Ty, incoming: Vec<(BlockId, ValueId)>) -> ValueId {
        self.emit(Op::Phi { incoming }, ty)
    }

    pub fn br(&mut self, dest: BlockId) {
        self.emit(
            Op::Branch {
                cond: None,
                then_dest: dest,
                else_dest: None,
            },
            Ty::Void,
        );
    }

    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) {
        self.emit(
            Op::Branch {
                cond: Some(cond),
                then_dest,
                else_dest: Some(else_dest),
            },
            Ty::Void,
        );
    }

    pub fn ret(&mut self) {
        self.emit(Op::Return { value: None }, Ty::Void);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_load_types() {
        let mut b = FunctionBuilder::new("vecadd");
        let ptr = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Aligned(16)]);
        let n = b.param(Ty::I32, &[ParamAttr::Retune]);
        b.block("entry");
        let idx = b.range(0, 128);
        let ptrs = b.ptr_add(ptr, idx);
        assert_eq!(b.func().ty(ptrs), &Ty::tile(Ty::ptr(Ty::F32), &[128]));
        let bound = b.splat(n, &[128]);
        let mask = b.cmp_lt(idx, bound);
        assert_eq!(b.func().ty(mask), &Ty::tile(Ty::Bool, &[128]));
        let x = b.load(ptrs, Some(mask));
        assert_eq!(b.func().ty(x), &Ty::tile(Ty::F32, &[128]));
    }

    #[test]
    fn test_reduce_drops_dim() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let idx = b.range(0, 64);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        let s = b.reduce(x, 0, ReduceOp::Add);
        assert_eq!(b.func().ty(s), &Ty::F32);
    }
}
