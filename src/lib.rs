pub mod asm;
pub mod ast;
pub mod error;
pub mod ir;

use lalrpop_util::{lalrpop_mod, ParseError};

lalrpop_mod!(pub toyc);

use error::CompileError;

/// Parse ToyC source text into an AST.
pub fn parse(source: &str) -> Result<ast::CompUnit, CompileError> {
    toyc::CompUnitParser::new()
        .parse(source)
        .map_err(|e| match e {
            ParseError::InvalidToken { location } => CompileError::Lexical {
                line: line_of(source, location),
                lexeme: source[location..].chars().take(1).collect(),
            },
            ParseError::UnrecognizedEof { location, .. } => CompileError::Syntax {
                line: line_of(source, location),
                lexeme: "<eof>".to_string(),
            },
            ParseError::UnrecognizedToken {
                token: (start, tok, _),
                ..
            } => CompileError::Syntax {
                line: line_of(source, start),
                lexeme: tok.to_string(),
            },
            ParseError::ExtraToken {
                token: (start, tok, _),
            } => CompileError::Syntax {
                line: line_of(source, start),
                lexeme: tok.to_string(),
            },
            ParseError::User { error } => CompileError::Syntax {
                line: 0,
                lexeme: error.to_string(),
            },
        })
}

/// Lower a parsed compilation unit into an IR module.
pub fn compile_to_ir(unit: &ast::CompUnit) -> ir::Module {
    ir::builder::IrBuilder::new().build_module(unit)
}

/// Compile ToyC source all the way to RV32I assembly text.
pub fn compile(source: &str) -> Result<String, CompileError> {
    let unit = parse(source)?;
    let mut module = compile_to_ir(&unit);
    Ok(asm::generate_asm(&mut module))
}

/// Compile LLVM-style IR text (a `.ll` input) to RV32I assembly text.
pub fn compile_ir_text(ir_text: &str) -> Result<String, CompileError> {
    let mut module = ir::parser::IrParser::new().parse_module(ir_text)?;
    Ok(asm::generate_asm(&mut module))
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}
