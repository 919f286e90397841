//! RV32I physical register descriptions.

/// Static description of one physical register.
#[derive(Debug, Clone, Copy)]
pub struct PhysReg {
    pub id: u32,
    pub name: &'static str,
    pub caller_saved: bool,
    pub callee_saved: bool,
    /// Reserved registers never enter the allocatable pool.
    pub reserved: bool,
    /// Lower value means preferred; ties break on id.
    pub priority: u32,
}

const fn reg(
    id: u32,
    name: &'static str,
    caller_saved: bool,
    callee_saved: bool,
    reserved: bool,
    priority: u32,
) -> PhysReg {
    PhysReg {
        id,
        name,
        caller_saved,
        callee_saved,
        reserved,
        priority,
    }
}

/// The 32 RV32I integer registers.
///
/// zero/ra/sp/gp/tp and s0 (the frame pointer) are permanently reserved;
/// t0 and t1 are reserved as spill temporaries. Priorities put the argument
/// registers first and the callee-saved registers last.
const PHYS_REGS: [PhysReg; 32] = [
    reg(0, "zero", false, false, true, 999),
    reg(1, "ra", false, false, true, 999),
    reg(2, "sp", false, false, true, 999),
    reg(3, "gp", false, false, true, 999),
    reg(4, "tp", false, false, true, 999),
    reg(5, "t0", true, false, true, 999),
    reg(6, "t1", true, false, true, 999),
    reg(7, "t2", true, false, false, 20),
    reg(8, "s0", false, false, true, 999),
    reg(9, "s1", false, true, false, 50),
    reg(10, "a0", true, false, false, 0),
    reg(11, "a1", true, false, false, 1),
    reg(12, "a2", true, false, false, 2),
    reg(13, "a3", true, false, false, 3),
    reg(14, "a4", true, false, false, 4),
    reg(15, "a5", true, false, false, 5),
    reg(16, "a6", true, false, false, 6),
    reg(17, "a7", true, false, false, 7),
    reg(18, "s2", false, true, false, 40),
    reg(19, "s3", false, true, false, 41),
    reg(20, "s4", false, true, false, 42),
    reg(21, "s5", false, true, false, 43),
    reg(22, "s6", false, true, false, 44),
    reg(23, "s7", false, true, false, 45),
    reg(24, "s8", false, true, false, 46),
    reg(25, "s9", false, true, false, 47),
    reg(26, "s10", false, true, false, 48),
    reg(27, "s11", false, true, false, 49),
    reg(28, "t3", true, false, false, 21),
    reg(29, "t4", true, false, false, 22),
    reg(30, "t5", true, false, false, 23),
    reg(31, "t6", true, false, false, 24),
];

/// Register file of the target, plus the priority-ordered allocatable set.
#[derive(Debug)]
pub struct RegInfo {
    allocatable: Vec<u32>,
}

impl Default for RegInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl RegInfo {
    pub fn new() -> Self {
        let mut allocatable: Vec<u32> = PHYS_REGS
            .iter()
            .filter(|r| !r.reserved)
            .map(|r| r.id)
            .collect();
        allocatable.sort_by_key(|&id| (PHYS_REGS[id as usize].priority, id));
        Self { allocatable }
    }

    pub fn name(&self, id: u32) -> &'static str {
        PHYS_REGS[id as usize].name
    }

    pub fn is_reserved(&self, id: u32) -> bool {
        PHYS_REGS[id as usize].reserved
    }

    pub fn is_caller_saved(&self, id: u32) -> bool {
        PHYS_REGS[id as usize].caller_saved
    }

    pub fn is_callee_saved(&self, id: u32) -> bool {
        PHYS_REGS[id as usize].callee_saved
    }

    pub fn priority(&self, id: u32) -> u32 {
        PHYS_REGS[id as usize].priority
    }

    /// Allocatable registers, most preferred first.
    pub fn allocatable(&self) -> &[u32] {
        &self.allocatable
    }
}
