//! RISC-V assembly backend: register allocation and code generation.

pub mod asm_gen;
pub mod interval;
pub mod reg_alloc;
pub mod riscv;

use self::asm_gen::AsmGen;
use self::reg_alloc::LinearScanAllocator;
use crate::ir::Module;

/// Generate RV32I assembly for a whole module, one function at a time.
pub fn generate_asm(module: &mut Module) -> String {
    let mut output = String::from("    .text\n");
    for func in &mut module.functions {
        let mut allocator = LinearScanAllocator::new();
        let alloc = allocator.allocate(func);
        let mut gen = AsmGen::new(func, allocator, alloc);
        output.push_str(&gen.generate());
    }
    output
}
