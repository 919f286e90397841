//! End-to-end assembly properties.

use toyc::compile;

fn asm(src: &str) -> String {
    compile(src).expect("program should compile")
}

/// Per function: sp adjustments found in its text, negatives from the
/// prologue and positives from the epilogues.
fn sp_adjustments(assembly: &str) -> Vec<(String, Vec<i32>, Vec<i32>)> {
    let mut funcs = Vec::new();
    let mut current: Option<(String, Vec<i32>, Vec<i32>)> = None;
    for line in assembly.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix(".globl ") {
            if let Some(f) = current.take() {
                funcs.push(f);
            }
            current = Some((name.to_string(), Vec::new(), Vec::new()));
        }
        if let Some(rest) = line.strip_prefix("addi sp, sp, ") {
            if let (Some(f), Ok(v)) = (current.as_mut(), rest.parse::<i32>()) {
                if v < 0 {
                    f.1.push(v);
                } else {
                    f.2.push(v);
                }
            }
        }
    }
    if let Some(f) = current.take() {
        funcs.push(f);
    }
    funcs
}

#[test]
fn trivial_main() {
    let out = asm("int main() { return 0; }");
    assert!(out.contains("    .text\n"));
    assert!(out.contains(".globl main"));
    assert!(out.contains("main:\n"));
    // 16-byte frame: return slot + saved ra/s0, rounded up.
    assert!(out.contains("addi sp, sp, -16"));
    assert!(out.contains("sw ra, 12(sp)"));
    assert!(out.contains("sw s0, 8(sp)"));
    assert!(out.contains("addi s0, sp, 16"));
    // Result materialized into a0 before returning.
    assert!(out.contains("mv a0, "));
    assert!(out.contains("\n    ret\n"));
    assert!(out.contains(".size main, .-main"));
}

#[test]
fn frames_balance_and_align() {
    let srcs = [
        "int main() { return 0; }",
        "int fib(int n) { if (n <= 1) return n; return fib(n - 1) + fib(n - 2); }",
        "int main() {
            int i = 0;
            int s = 0;
            while (i < 10) {
                if (i == 5) { i = i + 1; continue; }
                s = s + i;
                i = i + 1;
            }
            return s;
        }",
    ];
    for src in srcs {
        let out = asm(src);
        for (name, decs, incs) in sp_adjustments(&out) {
            assert_eq!(decs.len(), 1, "{}: exactly one prologue", name);
            let frame = -decs[0];
            assert!(frame > 0 && frame % 16 == 0, "{}: frame {}", name, frame);
            assert!(!incs.is_empty(), "{}: missing epilogue", name);
            for inc in incs {
                assert_eq!(inc, frame, "{}: unbalanced epilogue", name);
            }
        }
    }
}

#[test]
fn two_arg_call_uses_argument_registers() {
    let out = asm(
        "int add(int a, int b) { return a + b; }
        int main() { return add(3, 4); }",
    );
    // Parameters arrive in a0/a1 and are parked in stack slots.
    assert!(out.contains("sw a0, "));
    assert!(out.contains("sw a1, "));
    // The caller sets up a0/a1 and keeps the result in a0.
    assert!(out.contains("li a0, 3"));
    assert!(out.contains("li a1, 4"));
    assert!(out.contains("call add"));
    assert!(out.contains("add a0, "));
}

#[test]
fn fib_fuses_branch_and_saves_ra() {
    let out = asm("int fib(int n) { if (n <= 1) return n; return fib(n - 1) + fib(n - 2); }");
    assert!(out.contains("sw ra, "));
    assert!(out.contains("lw ra, "));
    // n <= 1 fuses into a direct ble against the materialized constant.
    assert!(out.contains("ble "));
    assert_eq!(out.matches("call fib").count(), 2);
    // Values live across the recursive calls are saved around them.
    assert!(out.contains("sw a0, 0(sp)"));
    assert!(out.contains("lw a0, 0(sp)"));
    assert!(out.contains(".fib_then_0:"));
    assert!(out.contains(".fib_endif_0:"));
}

#[test]
fn loop_with_continue() {
    let out = asm(
        "int main() {
            int i = 0;
            int s = 0;
            while (i < 10) {
                if (i == 5) { i = i + 1; continue; }
                s = s + i;
                i = i + 1;
            }
            return s;
        }",
    );
    assert!(out.contains(".main_while_cond_0:"));
    assert!(out.contains(".main_while_body_0:"));
    assert!(out.contains(".main_while_end_0:"));
    // continue and the body end both jump back to the condition block.
    assert!(out.matches("j .main_while_cond_0").count() >= 2);
    // i < 10 and i == 5 fuse into direct branches.
    assert!(out.contains("blt "));
    assert!(out.contains("beq "));
    // i = i + 1 folds into addi.
    assert!(out.contains(", 1\n"));
    assert!(out.contains("addi "));
}

#[test]
fn short_circuit_and_skips_rhs() {
    let out = asm("int f(int a, int b) { if (a > 0 && b > 0) return 1; return 0; }");
    // a > 0 branches directly; the rhs block is only reached when true.
    assert!(out.contains("bgt "));
    assert!(out.contains(".f_land_rhs_0:"));
    assert!(out.contains(".f_land_false_0:"));
    assert!(out.contains(".f_land_end_0:"));
    // The i1 result lives in a byte slot.
    assert!(out.contains("sb "));
    assert!(out.contains("lb "));
    // The merged value branches through bnez.
    assert!(out.contains("bnez "));
}

#[test]
fn stack_arguments_go_below_sp() {
    let out = asm(
        "int h(int a, int b, int c, int d, int e, int f, int g, int h, int i, int j) {
            return i + j;
        }
        int main() { return h(1, 2, 3, 4, 5, 6, 7, 8, 9, 10); }",
    );
    // Ninth and tenth arguments at sp+0 and sp+4, in index order, staged
    // through alternating spill temporaries.
    assert!(out.contains(", 9\n"));
    assert!(out.contains("sw t1, 0(sp)"));
    assert!(out.contains(", 10\n"));
    assert!(out.contains("sw t0, 4(sp)"));
    // Register arguments fill a0..a7.
    assert!(out.contains("li a0, 1"));
    assert!(out.contains("li a7, 8"));
    assert!(out.contains("call h"));
    // The callee reads its stack parameters from above the frame pointer.
    assert!(out.contains("lw t0, 0(s0)"));
    assert!(out.contains("lw t1, 4(s0)"));
}

#[test]
fn register_pressure_forces_spills() {
    let params: Vec<String> = (0..26).map(|i| format!("int p{}", i)).collect();
    let args: Vec<String> = (1..=26).map(|i| format!("g({})", i)).collect();
    let src = format!(
        "int g(int x) {{ return x; }}
        int h({}) {{ return p25; }}
        int main() {{ return h({}); }}",
        params.join(", "),
        args.join(", ")
    );
    let out = asm(&src);
    // Callee-saved registers enter the rotation and get preserved.
    assert!(out.contains("sw s1, "));
    assert!(out.contains("lw s1, "));
    assert!(out.contains("sw s11, "));
    // Spilled call results are written back through the spill temporaries.
    assert!(out.contains("mv t"));
    assert_eq!(out.matches("call g").count(), 26);
    assert!(out.contains("call h"));
}

#[test]
fn variable_read_after_dead_loop_is_reloaded() {
    // The only load of `a` before the exit block sits in the loop body,
    // which never runs; the return must not reuse that cached value.
    let src = "int main() { int a = 42; while (0) { int b = a; } return a; }";
    let ir = toyc::compile_to_ir(&toyc::parse(src).unwrap()).to_string();
    assert!(ir.contains("while_end_0:"));
    assert!(ir.contains("%2 = load i32, ptr %1, align 4"));
    assert!(ir.contains("%4 = load i32, ptr %1, align 4"));
    assert!(ir.contains("ret i32 %4"));
    assert!(!ir.contains("ret i32 %2"));

    let out = asm(src);
    assert!(out.contains(".main_while_end_0:"));
}

#[test]
fn variable_read_after_short_circuit_and_is_reloaded() {
    // `b` is loaded inside the rhs arm of the `&&`; the statement after the
    // expression runs whether or not that arm was taken, so it must load
    // `b` again.
    let src = "int f(int a, int b) { int c = a > 0 && b > 0; return b; }";
    let ir = toyc::compile_to_ir(&toyc::parse(src).unwrap()).to_string();
    assert!(ir.contains("land_end_0:"));
    assert!(ir.contains("%7 = load i32, ptr %3, align 4"));
    assert!(ir.contains("%11 = load i32, ptr %3, align 4"));
    assert!(ir.contains("ret i32 %11"));
    assert!(!ir.contains("ret i32 %7"));
}

#[test]
fn variable_read_after_short_circuit_or_is_reloaded() {
    let src = "int g(int a, int b) { int c = a > 0 || b > 0; return b; }";
    let ir = toyc::compile_to_ir(&toyc::parse(src).unwrap()).to_string();
    assert!(ir.contains("lor_end_0:"));
    assert!(ir.contains("%11 = load i32, ptr %3, align 4"));
    assert!(ir.contains("ret i32 %11"));
    assert!(!ir.contains("ret i32 %7"));
}

#[test]
fn ll_input_produces_the_same_assembly() {
    let src = "int add(int a, int b) { return a + b; }
        int main() { return add(3, 4); }";
    let direct = compile(src).expect("compile from source");
    let ir = toyc::compile_to_ir(&toyc::parse(src).unwrap()).to_string();
    let via_ir = toyc::compile_ir_text(&ir).expect("compile from IR text");
    assert_eq!(direct, via_ir);
}

#[test]
fn void_function_returns_without_value() {
    let out = asm(
        "void noop(int x) { x = x + 1; }
        int main() { noop(3); return 0; }",
    );
    assert!(out.contains(".globl noop"));
    assert!(out.contains("call noop"));
    // noop still gets a balanced frame and a plain ret.
    let frames = sp_adjustments(&out);
    let noop = frames.iter().find(|f| f.0 == "noop").unwrap();
    assert_eq!(-noop.1[0], noop.2[0]);
}
