//! Dataflow liveness analysis and live interval construction.

use crate::asm::interval::LiveInterval;
use crate::ir::Function;
use rustc_hash::{FxHashMap, FxHashSet};

/// Classic backward liveness: per-block use/def sets, then an iterative
/// solve of `liveOut = ∪ liveIn(succ)` / `liveIn = use ∪ (liveOut \ def)`
/// until a fixed point.
pub struct LivenessAnalysis;

impl LivenessAnalysis {
    pub fn run(func: &mut Function) {
        func.build_cfg();
        Self::compute_use_def_sets(func);
        func.rpo_order = Self::build_rpo(func);
        Self::solve_iteratively(func);
    }

    /// Upward-exposed uses: a vreg read before any local write belongs to
    /// the block's use set.
    fn compute_use_def_sets(func: &mut Function) {
        for block in &mut func.blocks {
            block.use_set.clear();
            block.def_set.clear();
            block.live_in.clear();
            block.live_out.clear();

            let mut local_def = FxHashSet::default();
            for inst in &block.insts {
                for u in inst.use_regs() {
                    if !local_def.contains(&u) {
                        block.use_set.insert(u);
                    }
                }
                if let Some(d) = inst.def_reg() {
                    block.def_set.insert(d);
                    local_def.insert(d);
                }
            }
        }
    }

    /// Reverse post-order from the entry block, with an explicit stack so
    /// deep CFGs cannot overflow the call stack. Successors are pushed in
    /// reverse to preserve left-to-right traversal.
    pub fn build_rpo(func: &Function) -> Vec<usize> {
        let mut order = Vec::new();
        if func.blocks.is_empty() {
            return order;
        }
        let mut visited = vec![false; func.blocks.len()];
        let mut stack = vec![(0usize, false)];
        while let Some((b, processed)) = stack.pop() {
            if processed {
                order.push(b);
                continue;
            }
            if visited[b] {
                continue;
            }
            visited[b] = true;
            stack.push((b, true));
            for &succ in func.blocks[b].succs.iter().rev() {
                if !visited[succ] {
                    stack.push((succ, false));
                }
            }
        }
        order.reverse();
        order
    }

    fn solve_iteratively(func: &mut Function) {
        let mut changed = true;
        while changed {
            changed = false;
            for i in (0..func.rpo_order.len()).rev() {
                let b = func.rpo_order[i];

                let mut new_out = FxHashSet::default();
                for &succ in &func.blocks[b].succs {
                    new_out.extend(func.blocks[succ].live_in.iter().copied());
                }

                let block = &func.blocks[b];
                let mut new_in: FxHashSet<u32> = block.use_set.clone();
                new_in.extend(
                    new_out
                        .iter()
                        .copied()
                        .filter(|v| !block.def_set.contains(v)),
                );

                if new_in != block.live_in || new_out != block.live_out {
                    let block = &mut func.blocks[b];
                    block.live_in = new_in;
                    block.live_out = new_out;
                    changed = true;
                }
            }
        }
    }
}

/// Builds a `LiveInterval` per virtual register from the liveness sets.
///
/// The precise mode derives block-local ranges from liveIn/liveOut and the
/// def/use positions; the simplified mode just drops a point range at every
/// def and use and lets `add_range` coalesce. They only differ once interval
/// splitting exists, which it does not.
pub struct LiveIntervalBuilder<'a> {
    func: &'a Function,
    simplified: bool,
}

impl<'a> LiveIntervalBuilder<'a> {
    pub fn new(func: &'a Function) -> Self {
        Self {
            func,
            simplified: false,
        }
    }

    pub fn with_simplified(func: &'a Function) -> Self {
        Self {
            func,
            simplified: true,
        }
    }

    pub fn build(&self) -> FxHashMap<u32, LiveInterval> {
        let mut intervals = FxHashMap::default();
        let Some(max_vreg) = self.func.max_vreg_id else {
            return intervals;
        };
        for vreg in 0..=max_vreg {
            let mut interval = LiveInterval::new(vreg);
            if self.simplified {
                self.build_simplified(vreg, &mut interval);
            } else {
                self.build_precise(vreg, &mut interval);
            }
            if !interval.is_empty() {
                intervals.insert(vreg, interval);
            }
        }
        intervals
    }

    fn build_precise(&self, vreg: u32, interval: &mut LiveInterval) {
        for &bi in &self.func.rpo_order {
            let block = &self.func.blocks[bi];
            let live_at_start = block.live_in.contains(&vreg);
            let live_at_end = block.live_out.contains(&vreg);

            if !live_at_start && !live_at_end {
                let referenced = block.insts.iter().any(|inst| {
                    inst.def_reg() == Some(vreg) || inst.use_regs().contains(&vreg)
                });
                if !referenced {
                    continue;
                }
            }

            let block_start = block.first_pos();
            let block_end = block.last_pos();
            if block_start == -1 || block_end == -1 {
                continue;
            }

            let mut range_start = if live_at_start { block_start } else { -1 };
            let mut range_end = if live_at_end { block_end } else { -1 };

            for inst in &block.insts {
                if inst.def_reg() == Some(vreg) {
                    if range_start == -1 {
                        range_start = inst.pos_def();
                    }
                    range_end = if live_at_end { block_end } else { inst.pos_def() };
                }
                if inst.use_regs().contains(&vreg) {
                    if range_start == -1 {
                        range_start = if live_at_start {
                            block_start
                        } else {
                            inst.pos_use()
                        };
                    }
                    range_end = range_end.max(inst.pos_use());
                }
            }

            if range_start != -1 && range_end != -1 {
                interval.add_range(range_start, range_end);
            }
        }
    }

    fn build_simplified(&self, vreg: u32, interval: &mut LiveInterval) {
        for &bi in &self.func.rpo_order {
            for inst in &self.func.blocks[bi].insts {
                if inst.def_reg() == Some(vreg) {
                    interval.add_range(inst.pos_def(), inst.pos_def());
                }
                if inst.use_regs().contains(&vreg) {
                    interval.add_range(inst.pos_use(), inst.pos_use());
                }
            }
        }
    }
}
