//! Linear scan allocation properties.

use toyc::asm::interval::Location;
use toyc::asm::reg_alloc::{LinearScanAllocator, LiveIntervalBuilder};
use toyc::ir::Module;
use toyc::{compile_to_ir, parse};

fn build(src: &str) -> Module {
    compile_to_ir(&parse(src).expect("source should parse"))
}

/// A program whose 26 call results are all live at the final call, well
/// past the 24 allocatable registers.
fn pressure_source() -> String {
    let params: Vec<String> = (0..26).map(|i| format!("int p{}", i)).collect();
    let args: Vec<String> = (1..=26).map(|i| format!("g({})", i)).collect();
    format!(
        "int g(int x) {{ return x; }}
        int h({}) {{ return p25; }}
        int main() {{ return h({}); }}",
        params.join(", "),
        args.join(", ")
    )
}

const FIB_SRC: &str = "int fib(int n) {
    if (n <= 1) return n;
    return fib(n - 1) + fib(n - 2);
}";

/// Overlapping intervals never share a physical register.
#[test]
fn allocation_is_exclusive() {
    for src in [FIB_SRC.to_string(), pressure_source()] {
        let mut module = build(&src);
        for func in &mut module.functions {
            let mut allocator = LinearScanAllocator::new();
            let result = allocator.allocate(func);

            // Positions are already assigned; rebuilding intervals is
            // deterministic.
            let intervals = LiveIntervalBuilder::new(func).build();
            let vregs: Vec<u32> = intervals.keys().copied().collect();
            for (i, &a) in vregs.iter().enumerate() {
                for &b in &vregs[i + 1..] {
                    let (Some(pa), Some(pb)) =
                        (result.vreg_to_phys.get(&a), result.vreg_to_phys.get(&b))
                    else {
                        continue;
                    };
                    if pa == pb {
                        assert!(
                            !intervals[&a].intersects(&intervals[&b]),
                            "{}: %{} and %{} overlap in {}",
                            func.name,
                            a,
                            b,
                            allocator.reg_info().name(*pa)
                        );
                    }
                }
            }
        }
    }
}

/// t0 and t1 are reserved as spill temporaries and never allocated.
#[test]
fn spill_temps_are_never_assigned() {
    let src = pressure_source();
    let mut module = build(&src);
    for func in &mut module.functions {
        let mut allocator = LinearScanAllocator::new();
        let result = allocator.allocate(func);
        for &phys in result.vreg_to_phys.values() {
            assert!(
                !allocator.is_spill_temp_reg(phys),
                "{}: vreg assigned to spill temporary {}",
                func.name,
                allocator.reg_info().name(phys)
            );
        }
    }
}

#[test]
fn high_pressure_spills_to_fresh_slots() {
    let src = pressure_source();
    let mut module = build(&src);
    let main = module
        .functions
        .iter_mut()
        .find(|f| f.name == "main")
        .unwrap();
    let mut allocator = LinearScanAllocator::new();
    let result = allocator.allocate(main);

    let mut slots: Vec<i32> = result
        .vreg_to_stack
        .values()
        .copied()
        .filter(|&s| s < 0)
        .collect();
    assert!(slots.len() >= 2, "expected spills, got {:?}", slots);

    // Fresh, 4-byte, non-overlapping, negative offsets.
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(
        slots.len(),
        result
            .vreg_to_stack
            .values()
            .filter(|&&s| s < 0)
            .count()
    );
    for s in slots {
        assert!(s < 0 && s % 4 == 0);
    }
}

#[test]
fn parameters_bind_to_abi_locations() {
    let src = pressure_source();
    let mut module = build(&src);
    let h = module
        .functions
        .iter_mut()
        .find(|f| f.name == "h")
        .unwrap();
    let mut allocator = LinearScanAllocator::new();
    let result = allocator.allocate(h);

    // First eight parameters arrive in a0-a7.
    for i in 0..8u32 {
        assert_eq!(result.param_vreg_to_location[&i], Location::Reg(10 + i));
    }
    // The rest sit at positive caller-frame offsets, 4 bytes apart.
    for i in 8..26u32 {
        assert_eq!(
            result.param_vreg_to_location[&i],
            Location::Stack(((i - 8 + 1) * 4) as i32)
        );
    }
}

#[test]
fn callee_saved_usage_is_tracked() {
    let src = pressure_source();
    let mut module = build(&src);
    let main = module
        .functions
        .iter_mut()
        .find(|f| f.name == "main")
        .unwrap();
    let mut allocator = LinearScanAllocator::new();
    let result = allocator.allocate(main);

    // 26 simultaneously live values exhaust the caller-saved pool, so some
    // callee-saved registers must be in use and recorded for the prologue.
    assert!(!result.callee_saved_regs.is_empty());
    for &reg in &result.callee_saved_regs {
        assert!(allocator.reg_info().is_callee_saved(reg));
        assert!(result.used_phys_regs.contains(&reg));
    }
}

#[test]
fn every_live_vreg_gets_exactly_one_home() {
    let src = pressure_source();
    let mut module = build(&src);
    for func in &mut module.functions {
        let mut allocator = LinearScanAllocator::new();
        let result = allocator.allocate(func);
        let intervals = LiveIntervalBuilder::new(func).build();
        for &vreg in intervals.keys() {
            let in_reg = result.vreg_to_phys.contains_key(&vreg);
            let on_stack = result.vreg_to_stack.contains_key(&vreg);
            assert!(
                in_reg ^ on_stack,
                "{}: %{} in_reg={} on_stack={}",
                func.name,
                vreg,
                in_reg,
                on_stack
            );
        }
    }
}
