use thiserror::Error;

/// Errors that abort a compilation.
///
/// Undefined identifiers never become an error value: the IR builder
/// reports them on stderr, substitutes a zero constant and keeps going.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("lexical error at line {line}: unrecognized token near '{lexeme}'")]
    Lexical { line: usize, lexeme: String },

    #[error("syntax error at line {line}: unexpected '{lexeme}'")]
    Syntax { line: usize, lexeme: String },

    #[error("malformed IR at line {line}: {message}")]
    MalformedIr { line: usize, message: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
