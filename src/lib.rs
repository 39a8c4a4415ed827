//! `mincc` turns a source string into a NASM listing in three passes.
//!
//! - `tokenizer` splits the source into positioned tokens.
//! - `parser` owns all syntactic knowledge and returns the top-level items.
//! - `ast` and `ty` define the tree and the scalar types it carries.
//! - `codegen` lowers the items into x86-64 NASM assembly.
//! - `error` holds the single error type shared by every stage.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod parser;
pub mod tokenizer;
pub mod ty;

use tracing::instrument;

pub use error::{CompileError, CompileResult};

/// Knobs for code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
  /// Guard every division with a zero check that exits with
  /// [`codegen::DIV_BY_ZERO_EXIT_STATUS`] instead of faulting.
  pub check_division: bool,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self {
      check_division: true,
    }
  }
}

/// Compile a source string into assembly. Nothing is returned unless every
/// stage succeeds.
#[instrument(skip_all, fields(len = source.len()))]
pub fn compile(source: &str, options: &CompileOptions) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source);
  let program = parser::parse(tokens)?;
  codegen::generate(&program, options)
}

/// Compile with default options.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  compile(source, &CompileOptions::default())
}
