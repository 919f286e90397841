//! Register allocation: liveness analysis, live interval construction and
//! the linear scan allocator.

pub mod liveness;
pub mod lsra;

use crate::asm::interval::Location;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

pub use liveness::{LiveIntervalBuilder, LivenessAnalysis};
pub use lsra::{assign_instr_positions, LinearScanAllocator};

/// Final output of register allocation for one function.
#[derive(Debug, Default, Clone)]
pub struct AllocationResult {
    /// VRegs that live in a physical register.
    pub vreg_to_phys: FxHashMap<u32, u32>,
    /// VRegs that live on the stack: negative offsets are spill slots,
    /// positive offsets are caller-provided stack parameters.
    pub vreg_to_stack: FxHashMap<u32, i32>,
    /// Where each parameter arrives per the calling convention.
    pub param_vreg_to_location: FxHashMap<u32, Location>,
    pub used_phys_regs: BTreeSet<u32>,
    /// Callee-saved registers the function occupies; the prologue and
    /// epilogue must preserve exactly these.
    pub callee_saved_regs: BTreeSet<u32>,
}
