use clap::{Arg, ArgAction, Command};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::process::exit;

use toyc::asm::generate_asm;
use toyc::error::CompileError;
use toyc::ir::parser::IrParser;
use toyc::{compile_to_ir, parse};

fn cli() -> Command {
    Command::new("toyc")
        .about("ToyC to RISC-V 32 compiler")
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Input file: .c/.tc ToyC source or .ll IR; stdin when omitted"),
        )
        .arg(
            Arg::new("ast")
                .long("ast")
                .action(ArgAction::SetTrue)
                .help("Print the abstract syntax tree"),
        )
        .arg(
            Arg::new("ir")
                .long("ir")
                .action(ArgAction::SetTrue)
                .help("Print the IR"),
        )
        .arg(
            Arg::new("asm")
                .long("asm")
                .action(ArgAction::SetTrue)
                .help("Print RISC-V assembly (default)"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Print AST, IR and assembly"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write output to a file instead of stdout"),
        )
}

fn main() {
    let matches = cli().get_matches();

    let input = matches.get_one::<String>("input").cloned();
    let all = matches.get_flag("all");
    let want_ast = matches.get_flag("ast") || all;
    let want_ir = matches.get_flag("ir") || all;
    let explicit_asm = matches.get_flag("asm") || all;
    // Assembly is the default when no stage is selected.
    let want_asm = explicit_asm || (!want_ast && !want_ir);
    let output = matches.get_one::<String>("output").cloned();

    if let Err(e) = run(input, want_ast, want_ir, want_asm, output) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(
    input: Option<String>,
    want_ast: bool,
    want_ir: bool,
    want_asm: bool,
    output: Option<String>,
) -> Result<(), CompileError> {
    let (source, is_ir_input) = match &input {
        Some(path) => (fs::read_to_string(path)?, path.ends_with(".ll")),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            (buf, false)
        }
    };

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    };

    if is_ir_input {
        let mut module = IrParser::new().parse_module(&source)?;
        if want_ast {
            writeln!(out, "AST not available for IR input")?;
            writeln!(out)?;
        }
        if want_ir {
            write!(out, "{}", module)?;
        }
        if want_asm {
            write!(out, "{}", generate_asm(&mut module))?;
        }
    } else {
        let unit = parse(&source)?;
        let mut module = compile_to_ir(&unit);
        if want_ast {
            writeln!(out, "=== Abstract Syntax Tree ===")?;
            writeln!(out, "{:#?}", unit)?;
            writeln!(out)?;
        }
        if want_ir {
            write!(out, "{}", module)?;
        }
        if want_asm {
            write!(out, "{}", generate_asm(&mut module))?;
        }
    }

    Ok(())
}
