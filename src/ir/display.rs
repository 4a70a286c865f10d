//! Human-readable IR listings.
//!
//! The printed form is stable enough to diff: the DCE idempotence test and
//! the snapshot tests compare listings textually.

use std::fmt;

use super::{Function, Module, Op, ValueKind};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, &p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p, self.ty(p))?;
        }
        writeln!(f, ") {{")?;
        for &b in &self.block_order {
            let block = self.block(b);
            writeln!(f, "{}:", block.name)?;
            for &v in &block.insts {
                let val = self.value(v);
                let op = val.op().expect("block lists hold instructions only");
                if val.ty == super::Ty::Void {
                    writeln!(f, "  {}", self.fmt_op(op))?;
                } else {
                    writeln!(f, "  {}: {} = {}", v, val.ty, self.fmt_op(op))?;
                }
            }
        }
        writeln!(f, "}}")
    }
}

impl Function {
    fn fmt_op(&self, op: &Op) -> String {
        let operand = |v: super::ValueId| match &self.value(v).kind {
            ValueKind::ConstInt { value } => format!("{}", value),
            ValueKind::ConstFloat { value } => format!("{}", value),
            _ => format!("{}", v),
        };
        match op {
            Op::Binary { op, lhs, rhs } => {
                let name = match op {
                    super::BinOp::Add => "add",
                    super::BinOp::Sub => "sub",
                    super::BinOp::Mul => "mul",
                    super::BinOp::Div => "div",
                    super::BinOp::Rem => "rem",
                    super::BinOp::And => "and",
                    super::BinOp::Or => "or",
                    super::BinOp::Xor => "xor",
                    super::BinOp::Shl => "shl",
                    super::BinOp::Shr => "shr",
                    super::BinOp::CmpEq => "cmp_eq",
                    super::BinOp::CmpLt => "cmp_lt",
                };
                format!("{} {}, {}", name, operand(*lhs), operand(*rhs))
            }
            Op::PtrAdd { ptr, offset } => {
                format!("ptr_add {}, {}", operand(*ptr), operand(*offset))
            }
            Op::Load {
                ptr,
                mask,
                vector_width,
            } => {
                let mut s = format!("load {}", operand(*ptr));
                if let Some(m) = mask {
                    s.push_str(&format!(", mask={}", operand(*m)));
                }
                if *vector_width > 1 {
                    s.push_str(&format!(", vec={}", vector_width));
                }
                s
            }
            Op::Store {
                ptr,
                value,
                mask,
                vector_width,
            } => {
                let mut s = format!("store {}, {}", operand(*ptr), operand(*value));
                if let Some(m) = mask {
                    s.push_str(&format!(", mask={}", operand(*m)));
                }
                if *vector_width > 1 {
                    s.push_str(&format!(", vec={}", vector_width));
                }
                s
            }
            Op::AtomicAdd { ptr, value, mask } => {
                let mut s = format!("atomic_add {}, {}", operand(*ptr), operand(*value));
                if let Some(m) = mask {
                    s.push_str(&format!(", mask={}", operand(*m)));
                }
                s
            }
            Op::AtomicCas { ptr, cmp, value } => format!(
                "atomic_cas {}, {}, {}",
                operand(*ptr),
                operand(*cmp),
                operand(*value)
            ),
            Op::AtomicXchg { ptr, value } => {
                format!("atomic_xchg {}, {}", operand(*ptr), operand(*value))
            }
            Op::Dot { a, b, acc } => {
                format!("dot {}, {}, {}", operand(*a), operand(*b), operand(*acc))
            }
            Op::Reduce { src, dim, op } => {
                let name = match op {
                    super::ReduceOp::Add => "add",
                    super::ReduceOp::Min => "min",
                    super::ReduceOp::Max => "max",
                };
                format!("reduce_{} {}, dim={}", name, operand(*src), dim)
            }
            Op::Select {
                cond,
                then_val,
                else_val,
            } => format!(
                "select {}, {}, {}",
                operand(*cond),
                operand(*then_val),
                operand(*else_val)
            ),
            Op::Splat { src } => format!("splat {}", operand(*src)),
            Op::Broadcast { src } => format!("broadcast {}", operand(*src)),
            Op::Range { start, end } => format!("range {}, {}", start, end),
            Op::GetProgramId { dim } => format!("get_program_id {}", dim),
            Op::GetNumPrograms { dim } => format!("get_num_programs {}", dim),
            Op::Cast { src } => format!("cast {}", operand(*src)),
            Op::CopyToShared { src, is_async } => {
                if *is_async {
                    format!("copy_to_shared.async {}", operand(*src))
                } else {
                    format!("copy_to_shared {}", operand(*src))
                }
            }
            Op::Barrier => "barrier".to_string(),
            Op::Phi { incoming } => {
                let parts: Vec<String> = incoming
                    .iter()
                    .map(|(b, v)| format!("[{}, {}]", self.block(*b).name, operand(*v)))
                    .collect();
                format!("phi {}", parts.join(", "))
            }
            Op::Branch {
                cond,
                then_dest,
                else_dest,
            } => match (cond, else_dest) {
                (Some(c), Some(e)) => format!(
                    "br {}, {}, {}",
                    operand(*c),
                    self.block(*then_dest).name,
                    self.block(*e).name
                ),
                _ => format!("br {}", self.block(*then_dest).name),
            },
            Op::Return { value } => match value {
                Some(v) => format!("ret {}", operand(*v)),
                None => "ret".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{FunctionBuilder, ParamAttr, Ty};

    #[test]
    fn test_listing_snapshot() {
        let mut b = FunctionBuilder::new("vecadd");
        let x = b.param(Ty::ptr(Ty::F32), &[ParamAttr::Readonly]);
        let y = b.param(Ty::ptr(Ty::F32), &[]);
        let n = b.param(Ty::I32, &[ParamAttr::Retune]);
        b.block("entry");
        let idx = b.range(0, 4);
        let bound = b.splat(n, &[4]);
        let mask = b.cmp_lt(idx, bound);
        let xp = b.ptr_add(x, idx);
        let v = b.load(xp, Some(mask));
        let yp = b.ptr_add(y, idx);
        b.store(yp, v, Some(mask));
        b.ret();
        let func = b.finish();

        insta::assert_snapshot!(func.to_string(), @r###"
        fn vecadd(%0: *f32, %1: *f32, %2: i32) {
        entry:
          %3: i32[4] = range 0, 4
          %4: i32[4] = splat %2
          %5: bool[4] = cmp_lt %3, %4
          %6: *f32[4] = ptr_add %0, %3
          %7: f32[4] = load %6, mask=%5
          %8: *f32[4] = ptr_add %1, %3
          store %8, %7, mask=%5
          ret
        }
        "###);
    }
}
