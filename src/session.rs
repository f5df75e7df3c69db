use crate::config::RuntimeConfig;
use crate::interpreter::{Interpreter, RuntimeError};
use crate::parser::ast::Stmt;
use crate::parser::{parse, ParseError};
use crate::scanner::{scan, LexError};
use std::io::Write;
use thiserror::Error;

/// Why a piece of source did not run to completion.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{}", render_all(.0))]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn render_all(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl RunError {
    /// Conventional exit status: 65 for bad input, 70 for a failed run.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Lex(_) | RunError::Parse(_) => 65,
            RunError::Runtime(_) => 70,
        }
    }
}

/// Scan and parse `source`. Any lexical error aborts immediately; parse
/// errors are collected across the whole source.
pub fn compile(source: &str) -> Result<Vec<Stmt>, RunError> {
    let tokens = scan(source)?;
    let (statements, errors) = parse(tokens);
    if errors.is_empty() {
        Ok(statements)
    } else {
        Err(RunError::Parse(errors))
    }
}

/// The full pipeline, run against one interpreter whose global environment
/// survives from one `run` to the next (the interactive prompt relies on
/// this).
pub struct Session<W: Write> {
    interpreter: Interpreter<W>,
}

impl<W: Write> Session<W> {
    pub fn new(out: W, runtime_config: RuntimeConfig) -> Self {
        Self {
            interpreter: Interpreter::new(out, runtime_config),
        }
    }

    pub fn run(&mut self, source: &str) -> Result<(), RunError> {
        let statements = compile(source)?;
        self.interpreter.interpret(&statements)?;
        Ok(())
    }

    pub fn interpreter(&self) -> &Interpreter<W> {
        &self.interpreter
    }

    pub fn into_output(self) -> W {
        self.interpreter.into_output()
    }
}
