//! Shared error type for the compilation pipeline.
//!
//! Every stage fails fast with a single `CompileError`. Lexer and parser
//! errors carry the 1-based line/column of the offending token so the
//! driver can point at it with a caret.

use snafu::Snafu;

use crate::ty::ScalarType;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum CompileError {
  #[snafu(display("{line}:{column}: {message}"))]
  Lex {
    line: u32,
    column: u32,
    message: String,
  },

  #[snafu(display("{line}:{column}: {message}"))]
  Parse {
    line: u32,
    column: u32,
    message: String,
  },

  #[snafu(display("undefined identifier `{name}`{}", in_function(function)))]
  UndefinedIdentifier {
    name: String,
    function: Option<String>,
  },

  #[snafu(display("cannot assign to const parameter `{name}` in function `{function}`"))]
  ConstAssignment { name: String, function: String },

  #[snafu(display("symbol `{name}` is defined more than once"))]
  DuplicateSymbol { name: String },

  #[snafu(display("parameter `{name}` appears more than once in function `{function}`"))]
  DuplicateParameter { name: String, function: String },

  #[snafu(display("global `{name}` declared as both `{first}` and `{second}`"))]
  ConflictingDeclaration {
    name: String,
    first: ScalarType,
    second: ScalarType,
  },

  /// A node in a position the parser never produces, e.g. a declaration
  /// nested inside an expression of a hand-built tree.
  #[snafu(display("internal error: {message}"))]
  Internal { message: String },
}

fn in_function(function: &Option<String>) -> String {
  match function {
    Some(name) => format!(" in function `{name}`"),
    None => String::new(),
  }
}

impl CompileError {
  pub fn lex(line: u32, column: u32, message: impl Into<String>) -> Self {
    Self::Lex {
      line,
      column,
      message: message.into(),
    }
  }

  pub fn parse(line: u32, column: u32, message: impl Into<String>) -> Self {
    Self::Parse {
      line,
      column,
      message: message.into(),
    }
  }

  /// Line and column of the failure, for front-end errors.
  pub fn location(&self) -> Option<(u32, u32)> {
    match self {
      Self::Lex { line, column, .. } | Self::Parse { line, column, .. } => Some((*line, *column)),
      _ => None,
    }
  }

  /// Render the error with the offending source line and a caret under the
  /// reported column. Errors without a location render as their message.
  pub fn render(&self, source: &str) -> String {
    let Some((line, column)) = self.location() else {
      return self.to_string();
    };
    let Some(text) = source.lines().nth(line.saturating_sub(1) as usize) else {
      return self.to_string();
    };
    let marker = format!("{}^", " ".repeat(column.saturating_sub(1) as usize));
    format!("{self}\n{text}\n{marker}")
  }
}
