//! Liveness intervals for shared-memory values.
//!
//! Instructions are linearized in program order (blocks in function order,
//! instructions in block order); each shared-layout value gets the
//! `[first-def, last-use]` interval over that order. A value that crosses
//! a loop back edge is widened to the whole loop, whether it was staged
//! before the loop or defined inside it and consumed through a head phi:
//! its slot in on-chip memory must survive every iteration, not just the
//! textual span between def and use.
//!
//! Loops are discovered on the block graph with a petgraph DFS; the body
//! of a back edge `tail -> head` is the intersection of blocks reachable
//! from `head` with blocks that reach `tail`.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent, Reversed};

use crate::ir::{BlockId, Function, ValueId};

use super::Layouts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Default)]
pub struct Liveness {
    position: HashMap<ValueId, u32>,
    intervals: HashMap<ValueId, Interval>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval(&self, v: ValueId) -> Option<Interval> {
        self.intervals.get(&v).copied()
    }

    pub fn position(&self, v: ValueId) -> Option<u32> {
        self.position.get(&v).copied()
    }

    pub fn run(&mut self, func: &Function, layouts: &Layouts) {
        self.position.clear();
        self.intervals.clear();

        let order = func.linear_insts();
        for (i, &v) in order.iter().enumerate() {
            self.position.insert(v, i as u32);
        }

        let loops = loop_spans(func, &self.position);

        for &v in &order {
            if !layouts.is_shared(v) {
                continue;
            }
            let def = self.position[&v];
            let mut end = def;
            // A use positioned before the def reaches it through a back
            // edge; the value is loop-carried.
            let mut carried = false;
            for &user in &func.value(v).uses {
                if let Some(&p) = self.position.get(&user) {
                    end = end.max(p);
                    carried |= p < def;
                }
            }
            let mut interval = Interval { start: def, end };
            // Widen across any loop the value is live into but not
            // fully contained in.
            for span in &loops {
                let defined_before = interval.start < span.start;
                let used_inside = interval.end >= span.start && interval.start <= span.end;
                if defined_before && used_inside {
                    interval.end = interval.end.max(span.end);
                }
                let defined_inside = interval.start >= span.start && interval.start <= span.end;
                if carried && defined_inside {
                    interval.start = span.start;
                    interval.end = interval.end.max(span.end);
                }
            }
            self.intervals.insert(v, interval);
        }
    }
}

/// Linearized `[first, last]` instruction span of every natural loop.
fn loop_spans(func: &Function, position: &HashMap<ValueId, u32>) -> Vec<Interval> {
    let mut graph: DiGraph<BlockId, ()> = DiGraph::new();
    let mut nodes: HashMap<BlockId, NodeIndex> = HashMap::new();
    for &b in &func.block_order {
        nodes.insert(b, graph.add_node(b));
    }
    for &b in &func.block_order {
        for &succ in &func.block(b).succs {
            graph.add_edge(nodes[&b], nodes[&succ], ());
        }
    }

    let entry = match func.block_order.first() {
        Some(&b) => nodes[&b],
        None => return Vec::new(),
    };
    let mut back_edges: Vec<(NodeIndex, NodeIndex)> = Vec::new();
    depth_first_search(&graph, Some(entry), |event| {
        if let DfsEvent::BackEdge(u, v) = event {
            back_edges.push((u, v));
        }
        Control::<()>::Continue
    });

    let mut spans = Vec::new();
    for (tail, head) in back_edges {
        let from_head = reachable_forward(&graph, head);
        let to_tail = reachable_backward(&graph, tail);
        let body: HashSet<NodeIndex> = from_head.intersection(&to_tail).copied().collect();
        let mut lo = u32::MAX;
        let mut hi = 0u32;
        for n in body {
            for &v in &func.block(graph[n]).insts {
                if let Some(&p) = position.get(&v) {
                    lo = lo.min(p);
                    hi = hi.max(p);
                }
            }
        }
        if lo <= hi {
            spans.push(Interval { start: lo, end: hi });
        }
    }
    spans
}

fn reachable_forward(graph: &DiGraph<BlockId, ()>, from: NodeIndex) -> HashSet<NodeIndex> {
    let mut dfs = petgraph::visit::Dfs::new(graph, from);
    let mut out = HashSet::new();
    while let Some(n) = dfs.next(graph) {
        out.insert(n);
    }
    out
}

fn reachable_backward(graph: &DiGraph<BlockId, ()>, from: NodeIndex) -> HashSet<NodeIndex> {
    let rev = Reversed(graph);
    let mut dfs = petgraph::visit::Dfs::new(rev, from);
    let mut out = HashSet::new();
    while let Some(n) = dfs.next(rev) {
        out.insert(n);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::analysis::{Alignment, Axes, Layouts};
    use crate::driver::DeviceCaps;
    use crate::ir::{FunctionBuilder, Op, Ty, ValueKind};

    fn caps() -> DeviceCaps {
        DeviceCaps {
            parallel: true,
            shared_memory: 48 * 1024,
            generation: 80,
            shared_banks: 32,
        }
    }

    fn analyses(func: &Function) -> Layouts {
        let mut align = Alignment::new();
        align.run(func);
        let mut axes = Axes::new();
        axes.run(func);
        let mut layouts = Layouts::new(2);
        layouts.run(func, &axes, &align, &caps());
        layouts
    }

    #[test]
    fn test_straightline_interval() {
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        b.block("entry");
        let idx = b.range(0, 32);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        let mut f = b.finish();
        let entry = f.block_order[0];
        let staged = f.append(
            entry,
            Op::CopyToShared {
                src: x,
                is_async: false,
            },
            Ty::tile(Ty::F32, &[32]),
        );
        let zero = f.const_int(Ty::F32, 0);
        let acc = f.append(entry, Op::Splat { src: zero }, Ty::tile(Ty::F32, &[32]));
        let sum = f.append(
            entry,
            Op::Binary {
                op: crate::ir::BinOp::Add,
                lhs: staged,
                rhs: acc,
            },
            Ty::tile(Ty::F32, &[32]),
        );

        let layouts = analyses(&f);
        let mut live = Liveness::new();
        live.run(&f, &layouts);

        let iv = live.interval(staged).unwrap();
        assert_eq!(iv.start, live.position(staged).unwrap());
        assert_eq!(iv.end, live.position(sum).unwrap());
        assert!(live.interval(x).is_none(), "distributed values get no interval");
    }

    #[test]
    fn test_loop_widens_interval() {
        // entry: stage a tile, jump into a loop that reads it each
        // iteration; the interval must span the whole loop body.
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        let entry = b.block("entry");
        let body = b.block("body");
        let exit = b.block("exit");

        b.switch_to(entry);
        let idx = b.range(0, 32);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        b.br(body);

        let mut f = b.finish();
        let staged = f.append(
            entry,
            Op::CopyToShared {
                src: x,
                is_async: false,
            },
            Ty::tile(Ty::F32, &[32]),
        );
        let use_in_loop = f.append(
            body,
            Op::Binary {
                op: crate::ir::BinOp::Add,
                lhs: staged,
                rhs: staged,
            },
            Ty::tile(Ty::F32, &[32]),
        );
        let cond = f.const_int(Ty::Bool, 1);
        let back = f.append(
            body,
            Op::Branch {
                cond: Some(cond),
                then_dest: body,
                else_dest: Some(exit),
            },
            Ty::Void,
        );
        f.append(exit, Op::Return { value: None }, Ty::Void);

        let layouts = analyses(&f);
        let mut live = Liveness::new();
        live.run(&f, &layouts);

        let iv = live.interval(staged).unwrap();
        assert!(iv.end >= live.position(back).unwrap());
        assert!(iv.end > live.position(use_in_loop).unwrap());
    }

    #[test]
    fn test_loop_carried_def_widens_to_loop_head() {
        // The staging copy lives inside the loop and feeds the head phi
        // across the back edge; its slot must cover the whole body.
        let mut b = FunctionBuilder::new("t");
        let p = b.param(Ty::ptr(Ty::F32), &[]);
        let entry = b.block("entry");
        let body = b.block("body");
        let exit = b.block("exit");

        b.switch_to(entry);
        let idx = b.range(0, 32);
        let ptrs = b.ptr_add(p, idx);
        let x = b.load(ptrs, None);
        b.br(body);

        let mut f = b.finish();
        let tile = Ty::tile(Ty::F32, &[32]);
        let phi = f.append(
            body,
            Op::Phi {
                incoming: vec![(entry, x)],
            },
            tile.clone(),
        );
        let staged = f.append(
            body,
            Op::CopyToShared {
                src: x,
                is_async: false,
            },
            tile,
        );
        if let ValueKind::Inst {
            op: Op::Phi { incoming },
            ..
        } = &mut f.value_mut(phi).kind
        {
            incoming.push((body, staged));
        }
        f.value_mut(staged).uses.push(phi);
        let cond = f.const_int(Ty::Bool, 1);
        let back = f.append(
            body,
            Op::Branch {
                cond: Some(cond),
                then_dest: body,
                else_dest: Some(exit),
            },
            Ty::Void,
        );
        f.append(exit, Op::Return { value: None }, Ty::Void);

        let layouts = analyses(&f);
        let mut live = Liveness::new();
        live.run(&f, &layouts);

        let iv = live.interval(staged).unwrap();
        assert_eq!(iv.start, live.position(phi).unwrap());
        assert!(iv.end >= live.position(back).unwrap());
    }
}
