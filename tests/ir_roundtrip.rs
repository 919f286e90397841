//! Serialization round-trip: parsing the printed IR and printing it again
//! must reproduce the text exactly.

use toyc::error::CompileError;
use toyc::ir::parser::IrParser;
use toyc::{compile_to_ir, parse};

fn build_ir(src: &str) -> String {
    let unit = parse(src).expect("source should parse");
    compile_to_ir(&unit).to_string()
}

fn roundtrip(src: &str) {
    let first = build_ir(src);
    let module = IrParser::new()
        .parse_module(&first)
        .expect("printed IR should reparse");
    let second = module.to_string();
    assert_eq!(first, second);
}

#[test]
fn roundtrip_minimal_main() {
    roundtrip("int main() { return 0; }");
}

#[test]
fn roundtrip_arithmetic_and_locals() {
    roundtrip(
        "int main() {
            int a = 3;
            int b = -4;
            int c = a * b + a / b - a % 2;
            return c;
        }",
    );
}

#[test]
fn roundtrip_fib() {
    roundtrip(
        "int fib(int n) {
            if (n <= 1) return n;
            return fib(n - 1) + fib(n - 2);
        }
        int main() { return fib(10); }",
    );
}

#[test]
fn roundtrip_short_circuit() {
    roundtrip(
        "int f(int a, int b) {
            if (a > 0 && b > 0) return 1;
            if (a < 0 || b < 0) return 2;
            return 0;
        }",
    );
}

#[test]
fn roundtrip_loop_with_break_continue() {
    roundtrip(
        "int main() {
            int i = 0;
            int s = 0;
            while (i < 100) {
                if (i == 5) { i = i + 1; continue; }
                if (i > 20) break;
                s = s + i;
                i = i + 1;
            }
            return s;
        }",
    );
}

#[test]
fn roundtrip_many_arguments() {
    roundtrip(
        "int h(int a, int b, int c, int d, int e, int f, int g, int h, int i, int j) {
            return a + j;
        }
        int main() { return h(1, 2, 3, 4, 5, 6, 7, 8, 9, 10); }",
    );
}

#[test]
fn module_header_is_stable() {
    let ir = build_ir("int main() { return 0; }");
    assert!(ir.starts_with("; ModuleID = 'toyc'\n"));
    assert!(ir.contains("source_filename = \"toyc\""));
    assert!(ir.contains("target triple = \"riscv32-unknown-elf\""));
    assert!(ir.contains("define dso_local i32 @main() #0 {"));
}

#[test]
fn main_gets_return_slot_and_default_return() {
    let ir = build_ir("int main() { int x = 1; x = x + 1; }");
    // The return slot is allocated and zeroed up front.
    assert!(ir.contains("%0 = alloca i32, align 4"));
    assert!(ir.contains("store i32 0, ptr %0, align 4"));
    // A function without an explicit return still ends in a terminator.
    assert!(ir.contains("ret i32 0"));
}

#[test]
fn parameters_are_stored_into_slots() {
    let ir = build_ir("int add(int a, int b) { return a + b; }");
    assert!(ir.contains("define dso_local i32 @add(i32 noundef %0, i32 noundef %1) #0 {"));
    assert!(ir.contains("store i32 %0, ptr %2, align 4"));
    assert!(ir.contains("store i32 %1, ptr %3, align 4"));
    assert!(ir.contains("%6 = add nsw i32 %4, %5"));
}

#[test]
fn short_circuit_uses_i1_slot() {
    let ir = build_ir("int f(int a, int b) { if (a > 0 && b > 0) return 1; return 0; }");
    assert!(ir.contains("alloca i1, align 1"));
    assert!(ir.contains("store i1 false, ptr"));
    assert!(ir.contains("load i1, ptr"));
    assert!(ir.contains("land_rhs_0:"));
    assert!(ir.contains("land_false_0:"));
    assert!(ir.contains("land_end_0:"));
}

#[test]
fn undefined_identifier_substitutes_zero() {
    // Best-effort lowering: the bad name becomes constant zero.
    let ir = build_ir("int f() { return nope; }");
    assert!(ir.contains("ret i32 0"));
}

#[test]
fn unparseable_instruction_is_malformed_ir() {
    let text = "define dso_local i32 @f() #0 {\n  frobnicate %1\n}\n";
    let err = IrParser::new().parse_module(text).unwrap_err();
    assert!(matches!(err, CompileError::MalformedIr { .. }));
}

#[test]
fn dangling_branch_target_is_malformed_ir() {
    let text = "define dso_local i32 @f() #0 {\n  br label %nowhere\n}\n";
    let err = IrParser::new().parse_module(text).unwrap_err();
    assert!(matches!(err, CompileError::MalformedIr { .. }));
}

#[test]
fn syntax_error_reports_line() {
    let err = parse("int main() {\n  return 0\n}").unwrap_err();
    match err {
        CompileError::Syntax { line, .. } => assert_eq!(line, 3),
        other => panic!("expected syntax error, got {:?}", other),
    }
}
