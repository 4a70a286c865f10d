//! Alignment analysis.
//!
//! Computes two numeric facts per value, propagated forward in program
//! order:
//!
//! - `divisibility` — the largest known power-of-two divisor of the
//!   value's first element (for pointers, of the starting byte address).
//!   Combined with contiguity this bounds the alignment of each run, which
//!   is exactly what a wide transaction needs.
//! - `contiguity` — the longest run of elements along the fastest-varying
//!   dimension proven to sit at unit stride.
//!
//! Seeds come from constants and from the `__aligned`/`__multipleof`
//! parameter attributes. The facts are what coalescing and staging use to
//! justify wider memory transactions, so this pass must be rerun after any
//! transform that restructures address arithmetic.

use std::collections::HashMap;

use crate::ir::{BinOp, Function, Op, ParamAttr, Ty, ValueId, ValueKind};

const MAX_DIVISIBILITY: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
pub struct AlignFact {
    pub divisibility: u64,
    pub contiguity: u64,
}

impl Default for AlignFact {
    fn default() -> Self {
        Self {
            divisibility: 1,
            contiguity: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct Alignment {
    facts: HashMap<ValueId, AlignFact>,
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Largest power of two dividing `v` (capped; `v == 0` gets the cap).
fn pow2_divisor(v: i64) -> u64 {
    if v == 0 {
        MAX_DIVISIBILITY
    } else {
        let tz = v.unsigned_abs().trailing_zeros().min(20);
        1u64 << tz
    }
}

impl Alignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn divisibility(&self, v: ValueId) -> u64 {
        self.facts.get(&v).map_or(1, |f| f.divisibility)
    }

    pub fn contiguity(&self, v: ValueId) -> u64 {
        self.facts.get(&v).map_or(1, |f| f.contiguity)
    }

    pub fn run(&mut self, func: &Function) {
        self.facts.clear();
        for (i, &p) in func.params.iter().enumerate() {
            self.facts.insert(p, self.param_fact(func, i));
        }
        // Operands dominate their users, so one forward sweep reaches a
        // fixed point everywhere except phi back edges, which fall back to
        // the conservative default.
        for v in func.linear_insts() {
            let fact = self.inst_fact(func, v);
            self.facts.insert(v, fact);
        }
    }

    fn param_fact(&self, func: &Function, index: usize) -> AlignFact {
        let mut divisibility = 1;
        for attr in &func.param_attrs[index] {
            match attr {
                ParamAttr::Aligned(n) | ParamAttr::MultipleOf(n) => {
                    divisibility = divisibility.max(*n);
                }
                _ => {}
            }
        }
        AlignFact {
            divisibility,
            contiguity: 1,
        }
    }

    fn fact_of(&self, func: &Function, v: ValueId) -> AlignFact {
        if let Some(f) = self.facts.get(&v) {
            return *f;
        }
        match &func.value(v).kind {
            ValueKind::ConstInt { value } => AlignFact {
                divisibility: pow2_divisor(*value),
                contiguity: 1,
            },
            _ => AlignFact::default(),
        }
    }

    /// Whether every element of `v` holds the same value (scalars, splats
    /// of scalars, broadcasts of uniforms, constants).
    fn is_uniform(&self, func: &Function, v: ValueId) -> bool {
        let val = func.value(v);
        if !val.ty.is_tile() {
            return true;
        }
        match val.op() {
            Some(Op::Splat { .. }) => true,
            Some(Op::Broadcast { src }) => self.is_uniform(func, *src),
            _ => false,
        }
    }

    fn inst_fact(&self, func: &Function, v: ValueId) -> AlignFact {
        let op = match func.value(v).op() {
            Some(op) => op,
            None => return AlignFact::default(),
        };
        match op {
            Op::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } => {
                let l = self.fact_of(func, *lhs);
                let r = self.fact_of(func, *rhs);
                let contiguity = if self.is_uniform(func, *rhs) {
                    l.contiguity
                } else if self.is_uniform(func, *lhs) {
                    r.contiguity
                } else {
                    1
                };
                AlignFact {
                    divisibility: gcd(l.divisibility, r.divisibility),
                    contiguity,
                }
            }
            Op::Binary {
                op: BinOp::Mul,
                lhs,
                rhs,
            } => {
                let l = self.fact_of(func, *lhs);
                let r = self.fact_of(func, *rhs);
                AlignFact {
                    divisibility: (l.divisibility * r.divisibility).min(MAX_DIVISIBILITY),
                    contiguity: 1,
                }
            }
            Op::Binary { .. } => AlignFact::default(),
            Op::Range { start, end } => AlignFact {
                divisibility: pow2_divisor(*start as i64),
                contiguity: end - start,
            },
            Op::Splat { src } => AlignFact {
                divisibility: self.fact_of(func, *src).divisibility,
                contiguity: 1,
            },
            Op::Broadcast { src } | Op::Cast { src } | Op::CopyToShared { src, .. } => {
                self.fact_of(func, *src)
            }
            Op::PtrAdd { ptr, offset } => {
                let elem = match func.ty(v).elem() {
                    Ty::Ptr(pointee) => pointee.elem_bytes(),
                    _ => 1,
                };
                let p = self.fact_of(func, *ptr);
                let o = self.fact_of(func, *offset);
                let contiguity = if self.is_uniform(func, *ptr) || !func.ty(*ptr).is_tile() {
                    o.contiguity
                } else {
                    p.contiguity.min(o.contiguity)
                };
                AlignFact {
                    divisibility: gcd(p.divisibility, (o.divisibility * elem).min(MAX_DIVISIBILITY)),
                    contiguity,
                }
            }
            Op::Select {
                then_val, else_val, ..
            } => {
                let t = self.fact_of(func, *then_val);
                let e = self.fact_of(func, *else_val);
                AlignFact {
                    divisibility: gcd(t.divisibility, e.divisibility),
                    contiguity: t.contiguity.min(e.contiguity),
                }
            }
            Op::Phi { incoming } => {
                let mut fact: Option<AlignFact> = None;
                for (_, inc) in incoming {
                    // Back-edge operands may not be computed yet; they
                    // contribute the conservative default.
                    let f = self.fact_of(func, *inc);
                    fact = Some(match fact {
                        None => f,
                        Some(acc) => AlignFact {
                            divisibility: gcd(acc.divisibility, f.divisibility),
                            contiguity: acc.contiguity.min(f.contiguity),
                        },
                    });
                }
                fact.unwrap_or_default()
            }
            _ => AlignFact::default(),
        }
    }
}
