//! RISC-V code generation.
//!
//! One `AsmGen` per function lowers IR instructions under the allocator's
//! decisions. The prologue and epilogue depend on the final frame size,
//! which is only known after the body is emitted, so both are written as
//! placeholder lines and substituted at the end of the function.

use super::reg_alloc::{AllocationResult, LinearScanAllocator};
use crate::ir::{CmpPred, Function, Instruction, Opcode, Operand};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Last compare feeding a vreg, kept for branch fusion.
#[derive(Clone)]
struct CmpInfo {
    pred: CmpPred,
    lhs_reg: String,
    rhs_reg: String,
}

fn in_addi_range(v: i32) -> bool {
    (-2048..=2047).contains(&v)
}

pub struct AsmGen<'a> {
    func: &'a Function,
    allocator: LinearScanAllocator,
    alloc: AllocationResult,
    output: String,
    /// Alloca result vreg -> positive offset in the local-variable area.
    alloca_offsets: FxHashMap<u32, i32>,
    cmp_map: FxHashMap<u32, CmpInfo>,
    stack_offset: i32,
    total_stack_size: i32,
    frame_overhead: i32,
    call_save_size: i32,
    call_arg_area_size: i32,
}

impl<'a> AsmGen<'a> {
    pub fn new(
        func: &'a Function,
        allocator: LinearScanAllocator,
        alloc: AllocationResult,
    ) -> Self {
        Self {
            func,
            allocator,
            alloc,
            output: String::new(),
            alloca_offsets: FxHashMap::default(),
            cmp_map: FxHashMap::default(),
            stack_offset: 0,
            total_stack_size: 0,
            frame_overhead: 0,
            call_save_size: 0,
            call_arg_area_size: 0,
        }
    }

    fn emit(&mut self, line: &str) {
        self.output.push_str("    ");
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn reg_name(&self, id: u32) -> &'static str {
        self.allocator.reg_info().name(id)
    }

    pub fn generate(&mut self) -> String {
        let func = self.func;
        let name = func.name.clone();

        // ra + s0 plus one word per occupied callee-saved register sit at
        // the top of the frame; alloca offsets are addressed past them.
        let callee_saved_count = self.alloc.callee_saved_regs.len() as i32;
        self.frame_overhead = 8 + callee_saved_count * 4;

        // Worst-case caller-saved save area around calls.
        let mut cs_regs: BTreeSet<u32> = BTreeSet::new();
        for &phys in self.alloc.vreg_to_phys.values() {
            if self.allocator.reg_info().is_caller_saved(phys)
                && !self.allocator.is_spill_temp_reg(phys)
            {
                cs_regs.insert(phys);
            }
        }
        self.call_save_size = cs_regs.len() as i32 * 4;

        // Worst-case outgoing stack-argument area.
        let mut max_stack_args = 0;
        for block in &func.blocks {
            for inst in &block.insts {
                if inst.opcode == Opcode::Call {
                    max_stack_args = max_stack_args.max(inst.ops.len() as i32 - 8);
                }
            }
        }
        self.call_arg_area_size = max_stack_args.max(0) * 4;

        self.output.push_str(&format!("    .globl {}\n", name));
        self.output.push_str(&format!("{}:\n", name));
        self.output
            .push_str(&format!("__PROLOGUE_PLACEHOLDER_{}__\n", name));

        for (bi, block) in func.blocks.iter().enumerate() {
            if bi > 0 {
                self.output.push_str(&format!(".{}_{}:\n", name, block.name));
            }
            for inst in &block.insts {
                self.generate_inst(inst);
            }
        }

        self.calculate_stack_frame();
        self.update_stack_frame_placeholders();

        self.output
            .push_str(&format!("    .size {}, .-{}\n\n", name, name));
        std::mem::take(&mut self.output)
    }

    fn generate_inst(&mut self, inst: &Instruction) {
        match inst.opcode {
            Opcode::Alloca => self.gen_alloca(inst),
            Opcode::Store => self.gen_store(inst),
            Opcode::Load => self.gen_load(inst),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::SDiv | Opcode::SRem => {
                self.gen_bin_op(inst)
            }
            Opcode::ICmp => self.gen_icmp(inst),
            Opcode::CondBr => self.gen_cond_br(inst),
            Opcode::Br => self.gen_br(inst),
            Opcode::Ret | Opcode::RetVoid => self.gen_ret(inst),
            Opcode::Call => self.gen_call(inst),
        }
    }

    /// Allocas emit nothing; they only reserve space in the local area.
    fn gen_alloca(&mut self, inst: &Instruction) {
        let Some(vreg) = inst.def_reg() else {
            return;
        };
        let size = if inst.ty == "i1" { 1 } else { 4 };
        self.stack_offset += size;
        if self.stack_offset % 4 != 0 {
            self.stack_offset += 4 - self.stack_offset % 4;
        }
        self.alloca_offsets.insert(vreg, self.stack_offset);
    }

    fn gen_store(&mut self, inst: &Instruction) {
        let val_reg = self.resolve_use(&inst.ops[0]);
        let offset = inst.ops[1].vreg().map_or(0, |v| self.alloca_offset(v));
        let op = if inst.ty == "i1" { "sb" } else { "sw" };
        self.emit(&format!("{} {}, -{}(s0)", op, val_reg, offset));
    }

    fn gen_load(&mut self, inst: &Instruction) {
        let def_reg = self.resolve_def(&inst.def);
        let offset = inst.ops[0].vreg().map_or(0, |v| self.alloca_offset(v));
        let op = if inst.ty == "i1" { "lb" } else { "lw" };
        self.emit(&format!("{} {}, -{}(s0)", op, def_reg, offset));
        self.spill_def_if_needed(inst, &def_reg);
    }

    fn gen_bin_op(&mut self, inst: &Instruction) {
        let def_reg = self.resolve_def(&inst.def);

        // addi folding for add/sub with a 12-bit immediate.
        if inst.opcode == Opcode::Add {
            if let Some(v) = inst.ops[1].imm() {
                if in_addi_range(v) {
                    let lhs_reg = self.resolve_use(&inst.ops[0]);
                    self.emit(&format!("addi {}, {}, {}", def_reg, lhs_reg, v));
                    self.spill_def_if_needed(inst, &def_reg);
                    return;
                }
            }
            if let Some(v) = inst.ops[0].imm() {
                if in_addi_range(v) {
                    let rhs_reg = self.resolve_use(&inst.ops[1]);
                    self.emit(&format!("addi {}, {}, {}", def_reg, rhs_reg, v));
                    self.spill_def_if_needed(inst, &def_reg);
                    return;
                }
            }
        }
        if inst.opcode == Opcode::Sub {
            if let Some(v) = inst.ops[1].imm() {
                if in_addi_range(v.wrapping_neg()) {
                    let lhs_reg = self.resolve_use(&inst.ops[0]);
                    self.emit(&format!("addi {}, {}, {}", def_reg, lhs_reg, -v));
                    self.spill_def_if_needed(inst, &def_reg);
                    return;
                }
            }
        }

        let lhs_reg = self.resolve_use(&inst.ops[0]);
        let rhs_reg = self.resolve_use(&inst.ops[1]);
        let op = match inst.opcode {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::SDiv => "div",
            Opcode::SRem => "rem",
            _ => return,
        };
        self.emit(&format!("{} {}, {}, {}", op, def_reg, lhs_reg, rhs_reg));
        self.spill_def_if_needed(inst, &def_reg);
    }

    /// Synthesize the comparison as a value and remember the operands so a
    /// following conditional branch can fuse into a direct `beq`-family
    /// instruction.
    fn gen_icmp(&mut self, inst: &Instruction) {
        let lhs_reg = self.resolve_use(&inst.ops[0]);
        let rhs_reg = self.resolve_use(&inst.ops[1]);
        let def_reg = self.resolve_def(&inst.def);

        if let Some(d) = inst.def_reg() {
            self.cmp_map.insert(
                d,
                CmpInfo {
                    pred: inst.cmp_pred,
                    lhs_reg: lhs_reg.clone(),
                    rhs_reg: rhs_reg.clone(),
                },
            );
        }

        match inst.cmp_pred {
            CmpPred::Eq => {
                self.emit(&format!("sub {}, {}, {}", def_reg, lhs_reg, rhs_reg));
                self.emit(&format!("seqz {}, {}", def_reg, def_reg));
            }
            CmpPred::Ne => {
                self.emit(&format!("sub {}, {}, {}", def_reg, lhs_reg, rhs_reg));
                self.emit(&format!("snez {}, {}", def_reg, def_reg));
            }
            CmpPred::Slt => {
                self.emit(&format!("slt {}, {}, {}", def_reg, lhs_reg, rhs_reg));
            }
            CmpPred::Sgt => {
                self.emit(&format!("slt {}, {}, {}", def_reg, rhs_reg, lhs_reg));
            }
            CmpPred::Sle => {
                self.emit(&format!("slt {}, {}, {}", def_reg, rhs_reg, lhs_reg));
                self.emit(&format!("xori {}, {}, 1", def_reg, def_reg));
            }
            CmpPred::Sge => {
                self.emit(&format!("slt {}, {}, {}", def_reg, lhs_reg, rhs_reg));
                self.emit(&format!("xori {}, {}, 1", def_reg, def_reg));
            }
        }
        self.spill_def_if_needed(inst, &def_reg);
    }

    fn block_label(&self, label: &str) -> String {
        format!(".{}_{}", self.func.name, label)
    }

    fn gen_cond_br(&mut self, inst: &Instruction) {
        let true_label = self.block_label(inst.ops[1].label().unwrap_or(""));
        let false_label = self.block_label(inst.ops[2].label().unwrap_or(""));

        let fused = inst
            .ops[0]
            .vreg()
            .and_then(|cond| self.cmp_map.remove(&cond));
        match fused {
            Some(cmp) => {
                let br_op = match cmp.pred {
                    CmpPred::Eq => "beq",
                    CmpPred::Ne => "bne",
                    CmpPred::Slt => "blt",
                    CmpPred::Sgt => "bgt",
                    CmpPred::Sle => "ble",
                    CmpPred::Sge => "bge",
                };
                self.emit(&format!(
                    "{} {}, {}, {}",
                    br_op, cmp.lhs_reg, cmp.rhs_reg, true_label
                ));
                self.emit(&format!("j {}", false_label));
            }
            None => {
                let cond_reg = self.resolve_use(&inst.ops[0]);
                self.emit(&format!("bnez {}, {}", cond_reg, true_label));
                self.emit(&format!("j {}", false_label));
            }
        }
    }

    fn gen_br(&mut self, inst: &Instruction) {
        let target = self.block_label(inst.ops[0].label().unwrap_or(""));
        self.emit(&format!("j {}", target));
    }

    fn gen_ret(&mut self, inst: &Instruction) {
        if inst.opcode == Opcode::Ret && !inst.ops.is_empty() {
            let val_reg = self.resolve_use(&inst.ops[0]);
            if val_reg != "a0" {
                self.emit(&format!("mv a0, {}", val_reg));
            }
        }
        self.output
            .push_str(&format!("__EPILOGUE_PLACEHOLDER_{}__\n", self.func.name));
        self.emit("ret");
    }

    fn gen_call(&mut self, inst: &Instruction) {
        // The register holding the call result is excluded from save/restore;
        // it is about to be overwritten anyway.
        let def_phys = inst
            .def
            .vreg()
            .and_then(|v| self.alloc.vreg_to_phys.get(&v).copied());

        // Conservatively save every occupied caller-saved register.
        let mut saved_regs: Vec<u32> = Vec::new();
        for &phys in self.alloc.vreg_to_phys.values() {
            if self.allocator.reg_info().is_caller_saved(phys)
                && !self.allocator.is_spill_temp_reg(phys)
                && Some(phys) != def_phys
                && !saved_regs.contains(&phys)
            {
                saved_regs.push(phys);
            }
        }
        saved_regs.sort_unstable();

        // Save area sits directly above the outgoing-argument area.
        let mut reg_to_save_offset: FxHashMap<u32, i32> = FxHashMap::default();
        let mut save_offset = self.call_arg_area_size;
        for &reg in &saved_regs {
            let reg_name = self.reg_name(reg);
            self.emit(&format!("sw {}, {}(sp)", reg_name, save_offset));
            reg_to_save_offset.insert(reg, save_offset);
            save_offset += 4;
        }

        // Arguments past the eighth go to sp+0, sp+4, ...
        for (i, op) in inst.ops.iter().enumerate().skip(8) {
            let arg_offset = (i as i32 - 8) * 4;
            match op {
                Operand::Imm(v) => {
                    let tmp = self.temp_reg();
                    self.emit(&format!("li {}, {}", tmp, v));
                    self.emit(&format!("sw {}, {}(sp)", tmp, arg_offset));
                }
                Operand::VReg(vreg) => {
                    if let Some(&phys) = self.alloc.vreg_to_phys.get(vreg) {
                        if let Some(&off) = reg_to_save_offset.get(&phys) {
                            // The source register was saved above; its
                            // current content may already be stale.
                            let tmp = self.temp_reg();
                            self.emit(&format!("lw {}, {}(sp)", tmp, off));
                            self.emit(&format!("sw {}, {}(sp)", tmp, arg_offset));
                        } else {
                            let src_reg = self.reg_name(phys);
                            self.emit(&format!("sw {}, {}(sp)", src_reg, arg_offset));
                        }
                    } else if let Some(&slot) = self.alloc.vreg_to_stack.get(vreg) {
                        let tmp = self.temp_reg();
                        if slot > 0 {
                            self.emit(&format!("lw {}, {}(s0)", tmp, slot - 4));
                        } else {
                            let sp_offset = self.spill_slot_to_sp_offset(slot);
                            self.emit(&format!("lw {}, {}(sp)", tmp, sp_offset));
                        }
                        self.emit(&format!("sw {}, {}(sp)", tmp, arg_offset));
                    }
                }
                _ => {}
            }
        }

        // First eight arguments go to a0-a7. Sources that were saved above
        // are reloaded from their save slots, which sidesteps the parallel
        // move problem entirely.
        for (i, op) in inst.ops.iter().take(8).enumerate() {
            let target = format!("a{}", i);
            match op {
                Operand::Imm(v) => self.emit(&format!("li {}, {}", target, v)),
                Operand::BoolLit(b) => {
                    self.emit(&format!("li {}, {}", target, if *b { 1 } else { 0 }))
                }
                Operand::VReg(vreg) => {
                    if let Some(&phys) = self.alloc.vreg_to_phys.get(vreg) {
                        if let Some(&off) = reg_to_save_offset.get(&phys) {
                            self.emit(&format!("lw {}, {}(sp)", target, off));
                        } else {
                            let src_reg = self.reg_name(phys);
                            if src_reg != target {
                                self.emit(&format!("mv {}, {}", target, src_reg));
                            }
                        }
                    } else if let Some(&slot) = self.alloc.vreg_to_stack.get(vreg) {
                        if slot > 0 {
                            self.emit(&format!("lw {}, {}(s0)", target, slot - 4));
                        } else {
                            let sp_offset = self.spill_slot_to_sp_offset(slot);
                            self.emit(&format!("lw {}, {}(sp)", target, sp_offset));
                        }
                    }
                }
                _ => {}
            }
        }

        self.emit(&format!("call {}", inst.callee));

        // Move the result out of a0 before caller-saved restores can
        // clobber it.
        let def_reg = self.resolve_def(&inst.def);
        if def_reg != "a0" {
            self.emit(&format!("mv {}, a0", def_reg));
        }

        let mut save_offset = self.call_arg_area_size;
        for &reg in &saved_regs {
            let reg_name = self.reg_name(reg);
            self.emit(&format!("lw {}, {}(sp)", reg_name, save_offset));
            save_offset += 4;
        }

        self.spill_def_if_needed(inst, &def_reg);
    }

    // -------- operand resolution --------

    fn temp_reg(&mut self) -> &'static str {
        let id = self.allocator.allocate_spill_temp_reg();
        self.allocator.reg_info().name(id)
    }

    /// Resolve a use operand to a physical register name, materializing
    /// immediates and reloading spilled values into a spill temporary.
    fn resolve_use(&mut self, op: &Operand) -> String {
        match op {
            Operand::Imm(v) => {
                let tmp = self.temp_reg();
                self.emit(&format!("li {}, {}", tmp, v));
                tmp.to_string()
            }
            Operand::BoolLit(b) => {
                let tmp = self.temp_reg();
                self.emit(&format!("li {}, {}", tmp, if *b { 1 } else { 0 }));
                tmp.to_string()
            }
            Operand::VReg(vreg) => {
                if let Some(&phys) = self.alloc.vreg_to_phys.get(vreg) {
                    return self.reg_name(phys).to_string();
                }
                if let Some(&slot) = self.alloc.vreg_to_stack.get(vreg) {
                    let tmp = self.temp_reg();
                    if slot > 0 {
                        // Caller-provided stack parameter, just above the
                        // frame pointer.
                        self.emit(&format!("lw {}, {}(s0)", tmp, slot - 4));
                    } else {
                        let sp_offset = self.spill_slot_to_sp_offset(slot);
                        self.emit(&format!("lw {}, {}(sp)", tmp, sp_offset));
                    }
                    return tmp.to_string();
                }
                "a0".to_string()
            }
            _ => "zero".to_string(),
        }
    }

    /// Resolve the def operand to its target register; a spilled def gets a
    /// spill temporary and `spill_def_if_needed` writes it back afterwards.
    fn resolve_def(&mut self, op: &Operand) -> String {
        let Some(vreg) = op.vreg() else {
            return "a0".to_string();
        };
        if let Some(&phys) = self.alloc.vreg_to_phys.get(&vreg) {
            return self.reg_name(phys).to_string();
        }
        self.temp_reg().to_string()
    }

    fn spill_def_if_needed(&mut self, inst: &Instruction, def_reg_name: &str) {
        let Some(vreg) = inst.def_reg() else {
            return;
        };
        if self.alloca_offsets.contains_key(&vreg) {
            return;
        }
        if let Some(&slot) = self.alloc.vreg_to_stack.get(&vreg) {
            if slot < 0 {
                let sp_offset = self.spill_slot_to_sp_offset(slot);
                self.emit(&format!("sw {}, {}(sp)", def_reg_name, sp_offset));
            }
        }
    }

    /// Locals are frame-pointer relative, past ra/s0 and the callee-saved
    /// area.
    fn alloca_offset(&self, vreg: u32) -> i32 {
        self.alloca_offsets
            .get(&vreg)
            .map_or(0, |off| off + self.frame_overhead)
    }

    /// Frame layout from sp upward: outgoing stack arguments, caller-saved
    /// save area, then the spill slots. An allocator slot -4k maps into the
    /// spill region.
    fn spill_slot_to_sp_offset(&self, slot: i32) -> i32 {
        self.call_arg_area_size + self.call_save_size + (-slot) - 4
    }

    // -------- stack frame --------

    fn calculate_stack_frame(&mut self) {
        let alloca_size = self.stack_offset;
        let callee_saved_count = self.alloc.callee_saved_regs.len() as i32;
        let mut spill_size = 0;
        for &slot in self.alloc.vreg_to_stack.values() {
            if slot < 0 {
                spill_size = spill_size.max(-slot);
            }
        }

        let frame_overhead = 8 + callee_saved_count * 4;
        let total = alloca_size
            + frame_overhead
            + spill_size
            + self.call_save_size
            + self.call_arg_area_size;
        self.total_stack_size = (total + 15) & !15;
    }

    fn update_stack_frame_placeholders(&mut self) {
        let name = &self.func.name;
        let frame = self.total_stack_size;

        let mut prologue = String::new();
        prologue.push_str(&format!("    addi sp, sp, -{}\n", frame));
        prologue.push_str(&format!("    sw ra, {}(sp)\n", frame - 4));
        prologue.push_str(&format!("    sw s0, {}(sp)\n", frame - 8));
        prologue.push_str(&format!("    addi s0, sp, {}\n", frame));
        let mut offset = frame - 12;
        for &reg in &self.alloc.callee_saved_regs {
            prologue.push_str(&format!(
                "    sw {}, {}(sp)\n",
                self.allocator.reg_info().name(reg),
                offset
            ));
            offset -= 4;
        }

        let mut epilogue = String::new();
        let mut offset = frame - 12;
        for &reg in &self.alloc.callee_saved_regs {
            epilogue.push_str(&format!(
                "    lw {}, {}(sp)\n",
                self.allocator.reg_info().name(reg),
                offset
            ));
            offset -= 4;
        }
        epilogue.push_str(&format!("    lw ra, {}(sp)\n", frame - 4));
        epilogue.push_str(&format!("    lw s0, {}(sp)\n", frame - 8));
        epilogue.push_str(&format!("    addi sp, sp, {}\n", frame));

        let prologue_ph = format!("__PROLOGUE_PLACEHOLDER_{}__\n", name);
        let epilogue_ph = format!("__EPILOGUE_PLACEHOLDER_{}__\n", name);
        self.output = self
            .output
            .replace(&prologue_ph, &prologue)
            .replace(&epilogue_ph, &epilogue);
    }
}
