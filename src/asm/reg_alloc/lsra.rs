//! Linear scan register allocation over live intervals.

use super::{AllocationResult, LiveIntervalBuilder, LivenessAnalysis};
use crate::asm::interval::{LiveInterval, Location};
use crate::asm::riscv::RegInfo;
use crate::ir::Function;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// Number every instruction densely in reverse post-order and stamp its
/// owning block id. Positions derived from these indices are the time axis
/// of liveness and allocation.
pub fn assign_instr_positions(func: &mut Function) {
    let mut pos = 0;
    let order = func.rpo_order.clone();
    for bi in order {
        for inst in &mut func.blocks[bi].insts {
            inst.index = pos;
            inst.block_id = bi as i32;
            pos += 1;
        }
    }
}

/// Linear scan over intervals sorted by start position.
///
/// Parameters are pre-bound to a0-a7 (or caller stack slots from the ninth
/// on) before the scan. When the free pool runs dry the active interval with
/// the latest end is spilled if it outlives the current one, otherwise the
/// current interval goes to the stack itself.
pub struct LinearScanAllocator {
    reg_info: RegInfo,
    /// Free pool keyed by (priority, id) so the cheapest register pops first.
    free_phys_regs: BTreeSet<(u32, u32)>,
    /// "Ever occupied" marks; never cleared when a register is freed.
    is_phys_reg_used: [bool; 32],
    allocated_vregs: FxHashSet<u32>,
    /// Indices into the interval vector, kept sorted by interval end.
    active: Vec<usize>,
    next_spill_slot: i32,
    spill_temp_toggle: bool,
    result: AllocationResult,
}

impl Default for LinearScanAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearScanAllocator {
    /// t0 and t1 never enter the allocatable pool; they materialize spilled
    /// values within a single instruction's lowering.
    pub const SPILL_TEMP_1: u32 = 5;
    pub const SPILL_TEMP_2: u32 = 6;

    pub fn new() -> Self {
        let mut alloc = Self {
            reg_info: RegInfo::new(),
            free_phys_regs: BTreeSet::new(),
            is_phys_reg_used: [false; 32],
            allocated_vregs: FxHashSet::default(),
            active: Vec::new(),
            next_spill_slot: 0,
            spill_temp_toggle: false,
            result: AllocationResult::default(),
        };
        alloc.initialize_free_regs();
        alloc
    }

    pub fn reg_info(&self) -> &RegInfo {
        &self.reg_info
    }

    pub fn allocation_result(&self) -> &AllocationResult {
        &self.result
    }

    pub fn allocate(&mut self, func: &mut Function) -> AllocationResult {
        self.result = AllocationResult::default();
        self.active.clear();
        self.next_spill_slot = 0;
        self.allocated_vregs.clear();
        self.initialize_free_regs();

        let param_vregs = func.param_vregs.clone();
        self.process_parameters(&param_vregs);

        LivenessAnalysis::run(func);
        assign_instr_positions(func);

        let mut intervals: Vec<LiveInterval> =
            LiveIntervalBuilder::new(func).build().into_values().collect();
        intervals.sort_by_key(|iv| (iv.start(), iv.vreg));

        self.run_linear_scan(&mut intervals);

        self.result.used_phys_regs = self.used_phys_regs();
        self.result.callee_saved_regs = self.callee_saved_regs();
        self.result.clone()
    }

    fn process_parameters(&mut self, param_vregs: &[u32]) {
        for (i, &vreg) in param_vregs.iter().enumerate() {
            if i < 8 {
                let arg_reg = 10 + i as u32; // a0 = x10
                self.result.vreg_to_phys.insert(vreg, arg_reg);
                self.result
                    .param_vreg_to_location
                    .insert(vreg, Location::Reg(arg_reg));
                self.is_phys_reg_used[arg_reg as usize] = true;
                self.free_phys_regs
                    .remove(&(self.reg_info.priority(arg_reg), arg_reg));
            } else {
                let stack_offset = (i as i32 - 8 + 1) * 4;
                self.result.vreg_to_stack.insert(vreg, stack_offset);
                self.result
                    .param_vreg_to_location
                    .insert(vreg, Location::Stack(stack_offset));
            }
            self.allocated_vregs.insert(vreg);
        }
    }

    fn run_linear_scan(&mut self, intervals: &mut [LiveInterval]) {
        for idx in 0..intervals.len() {
            self.expire_old_intervals(intervals[idx].start(), intervals);

            let vreg = intervals[idx].vreg;
            if self.allocated_vregs.contains(&vreg) {
                // Pre-bound parameter; record its register on the interval
                // so expiry and spilling treat it like any other.
                if let Some(&phys) = self.result.vreg_to_phys.get(&vreg) {
                    intervals[idx].phys_reg = Some(phys);
                    self.insert_active(idx, intervals);
                }
                continue;
            }

            if self.free_phys_regs.is_empty() {
                self.spill_at_interval(idx, intervals);
            } else {
                self.allocate_physical_reg(idx, intervals);
                self.allocated_vregs.insert(vreg);
            }
        }
    }

    fn expire_old_intervals(&mut self, cur_start: i32, intervals: &[LiveInterval]) {
        while let Some(&first) = self.active.first() {
            if intervals[first].end() >= cur_start {
                // Active is sorted by end; nothing further can be expired.
                break;
            }
            if let Some(phys) = intervals[first].phys_reg {
                self.free_phys_reg(phys);
            }
            self.active.remove(0);
        }
    }

    fn allocate_physical_reg(&mut self, idx: usize, intervals: &mut [LiveInterval]) {
        let phys = self
            .alloc_phys_reg()
            .expect("free pool checked non-empty before allocation");
        intervals[idx].phys_reg = Some(phys);
        self.result.vreg_to_phys.insert(intervals[idx].vreg, phys);
        self.insert_active(idx, intervals);
    }

    /// Spill the active interval with the latest end if it outlives the
    /// current one (stealing its register), otherwise spill the current
    /// interval itself.
    fn spill_at_interval(&mut self, idx: usize, intervals: &mut [LiveInterval]) {
        let candidate = self
            .active
            .iter()
            .enumerate()
            .max_by_key(|&(_, &a)| intervals[a].end())
            .map(|(pos, &a)| (pos, a));

        if let Some((active_pos, spill_idx)) = candidate {
            if intervals[spill_idx].end() > intervals[idx].end() {
                if let Some(phys) = intervals[spill_idx].phys_reg.take() {
                    let slot = self.allocate_spill_slot();
                    intervals[spill_idx].spill_slot = Some(slot);
                    let spill_vreg = intervals[spill_idx].vreg;
                    self.result.vreg_to_phys.remove(&spill_vreg);
                    self.result.vreg_to_stack.insert(spill_vreg, slot);
                    self.active.remove(active_pos);

                    intervals[idx].phys_reg = Some(phys);
                    self.result.vreg_to_phys.insert(intervals[idx].vreg, phys);
                    self.insert_active(idx, intervals);
                    return;
                }
            }
        }

        let slot = self.allocate_spill_slot();
        intervals[idx].spill_slot = Some(slot);
        self.result.vreg_to_stack.insert(intervals[idx].vreg, slot);
    }

    /// Fresh 4-byte slot at the next negative offset.
    fn allocate_spill_slot(&mut self) -> i32 {
        self.next_spill_slot += 1;
        -self.next_spill_slot * 4
    }

    fn initialize_free_regs(&mut self) {
        self.free_phys_regs.clear();
        self.is_phys_reg_used = [false; 32];
        for &id in self.reg_info.allocatable() {
            self.free_phys_regs.insert((self.reg_info.priority(id), id));
        }
    }

    fn alloc_phys_reg(&mut self) -> Option<u32> {
        let &(priority, id) = self.free_phys_regs.iter().next()?;
        self.free_phys_regs.remove(&(priority, id));
        self.is_phys_reg_used[id as usize] = true;
        Some(id)
    }

    fn free_phys_reg(&mut self, id: u32) {
        if !self.reg_info.is_reserved(id) {
            self.free_phys_regs.insert((self.reg_info.priority(id), id));
        }
    }

    /// Keep `active` sorted by interval end.
    fn insert_active(&mut self, idx: usize, intervals: &[LiveInterval]) {
        let end = intervals[idx].end();
        let pos = self.active.partition_point(|&a| intervals[a].end() < end);
        self.active.insert(pos, idx);
    }

    /// Alternate between t0 and t1 so the two operands of one instruction
    /// never land in the same temporary.
    pub fn allocate_spill_temp_reg(&mut self) -> u32 {
        self.spill_temp_toggle = !self.spill_temp_toggle;
        if self.spill_temp_toggle {
            Self::SPILL_TEMP_1
        } else {
            Self::SPILL_TEMP_2
        }
    }

    pub fn is_spill_temp_reg(&self, id: u32) -> bool {
        id == Self::SPILL_TEMP_1 || id == Self::SPILL_TEMP_2
    }

    fn used_phys_regs(&self) -> BTreeSet<u32> {
        (0..32)
            .filter(|&i| self.is_phys_reg_used[i as usize])
            .collect()
    }

    fn callee_saved_regs(&self) -> BTreeSet<u32> {
        (0..32)
            .filter(|&i| self.is_phys_reg_used[i as usize] && self.reg_info.is_callee_saved(i))
            .collect()
    }
}
