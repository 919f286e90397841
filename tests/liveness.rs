//! CFG and liveness properties on builder-produced IR.

use toyc::asm::interval::LiveInterval;
use toyc::asm::reg_alloc::{assign_instr_positions, LiveIntervalBuilder, LivenessAnalysis};
use toyc::ir::Module;
use toyc::{compile_to_ir, parse};

fn build(src: &str) -> Module {
    compile_to_ir(&parse(src).expect("source should parse"))
}

const LOOP_SRC: &str = "int main() {
    int i = 0;
    int s = 0;
    while (i < 10) {
        if (i == 5) { i = i + 1; continue; }
        s = s + i;
        i = i + 1;
    }
    return s;
}";

const FIB_SRC: &str = "int fib(int n) {
    if (n <= 1) return n;
    return fib(n - 1) + fib(n - 2);
}";

#[test]
fn cfg_edges_are_symmetric() {
    for src in [LOOP_SRC, FIB_SRC] {
        let mut module = build(src);
        for func in &mut module.functions {
            LivenessAnalysis::run(func);
            for block in &func.blocks {
                for &succ in &block.succs {
                    assert!(
                        func.blocks[succ].preds.contains(&block.id),
                        "{}: {} -> {} edge has no back-reference",
                        func.name,
                        block.name,
                        func.blocks[succ].name
                    );
                }
                for &pred in &block.preds {
                    assert!(func.blocks[pred].succs.contains(&block.id));
                }
            }
        }
    }
}

#[test]
fn branch_targets_resolve() {
    let mut module = build(LOOP_SRC);
    for func in &mut module.functions {
        LivenessAnalysis::run(func);
        for block in &func.blocks {
            for inst in &block.insts {
                for target in inst.branch_targets() {
                    assert!(
                        func.block_map.contains_key(target),
                        "label {} does not resolve",
                        target
                    );
                }
            }
        }
    }
}

#[test]
fn rpo_starts_at_entry() {
    let mut module = build(FIB_SRC);
    for func in &mut module.functions {
        LivenessAnalysis::run(func);
        assert_eq!(func.rpo_order.first(), Some(&0));
    }
}

#[test]
fn loop_carried_values_are_live_into_cond_block() {
    let mut module = build(LOOP_SRC);
    let func = &mut module.functions[0];
    LivenessAnalysis::run(func);
    let cond = func.block_map["while_cond_0"];
    let cond_block = &func.blocks[cond];
    // The slot of `i` is read in the condition, so it must be upward
    // exposed and live into the block.
    assert!(!cond_block.use_set.is_empty());
    for u in &cond_block.use_set {
        assert!(cond_block.live_in.contains(u));
    }
    // The loop header is reached from entry, from the continue and from
    // the normal end of the body.
    assert_eq!(cond_block.preds.len(), 3);
}

/// Every use is either live into its block or preceded by a local def.
#[test]
fn uses_are_live_or_locally_defined() {
    for src in [LOOP_SRC, FIB_SRC] {
        let mut module = build(src);
        for func in &mut module.functions {
            LivenessAnalysis::run(func);
            for block in &func.blocks {
                let mut defined = Vec::new();
                for inst in &block.insts {
                    for u in inst.use_regs() {
                        assert!(
                            block.live_in.contains(&u) || defined.contains(&u),
                            "{}: use of %{} in {} is neither live-in nor locally defined",
                            func.name,
                            u,
                            block.name
                        );
                    }
                    if let Some(d) = inst.def_reg() {
                        defined.push(d);
                    }
                }
            }
        }
    }
}

/// Interval coverage: the interval of a vreg contains the def position of
/// its definition and the use position of every use.
#[test]
fn intervals_cover_defs_and_uses() {
    for src in [LOOP_SRC, FIB_SRC] {
        let mut module = build(src);
        for func in &mut module.functions {
            LivenessAnalysis::run(func);
            assign_instr_positions(func);
            let intervals = LiveIntervalBuilder::new(func).build();
            for block in &func.blocks {
                for inst in &block.insts {
                    if inst.index < 0 {
                        continue;
                    }
                    if let Some(d) = inst.def_reg() {
                        assert!(
                            intervals[&d].contains(inst.pos_def()),
                            "%{} interval misses its def at {}",
                            d,
                            inst.pos_def()
                        );
                    }
                    for u in inst.use_regs() {
                        assert!(
                            intervals[&u].contains(inst.pos_use()),
                            "%{} interval misses a use at {}",
                            u,
                            inst.pos_use()
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn simplified_intervals_also_cover_defs_and_uses() {
    let mut module = build(FIB_SRC);
    let func = &mut module.functions[0];
    LivenessAnalysis::run(func);
    assign_instr_positions(func);
    let intervals = LiveIntervalBuilder::with_simplified(func).build();
    for block in &func.blocks {
        for inst in &block.insts {
            if inst.index < 0 {
                continue;
            }
            if let Some(d) = inst.def_reg() {
                assert!(intervals[&d].contains(inst.pos_def()));
            }
            for u in inst.use_regs() {
                assert!(intervals[&u].contains(inst.pos_use()));
            }
        }
    }
}

#[test]
fn add_range_merges_overlapping_and_adjacent() {
    let mut interval = LiveInterval::new(0);
    interval.add_range(0, 3);
    interval.add_range(10, 12);
    assert_eq!(interval.ranges.len(), 2);

    // Bridges the gap and touches both neighbours.
    interval.add_range(4, 9);
    assert_eq!(interval.ranges.len(), 1);
    assert_eq!(interval.start(), 0);
    assert_eq!(interval.end(), 12);
    assert!(interval.contains(7));
}

#[test]
fn add_range_keeps_disjoint_ranges_sorted() {
    let mut interval = LiveInterval::new(1);
    interval.add_range(20, 25);
    interval.add_range(0, 3);
    interval.add_range(8, 9);
    assert_eq!(interval.ranges.len(), 3);
    assert_eq!(interval.start(), 0);
    assert_eq!(interval.end(), 25);
    assert!(interval.contains(2));
    assert!(!interval.contains(5));
    assert!(!interval.contains(15));

    let mut other = LiveInterval::new(2);
    other.add_range(4, 7);
    assert!(!interval.intersects(&other));
    other.add_range(9, 9);
    assert!(interval.intersects(&other));
}
