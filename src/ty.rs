//! Scalar type keywords and the storage widths they select.

use std::fmt;

use crate::tokenizer::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
  U8,
  U16,
  U32,
  U64,
  Int,
  Float,
}

impl ScalarType {
  /// Map a keyword token onto its type, if it is one.
  pub fn from_token(kind: TokenKind) -> Option<Self> {
    match kind {
      TokenKind::U8 => Some(Self::U8),
      TokenKind::U16 => Some(Self::U16),
      TokenKind::U32 => Some(Self::U32),
      TokenKind::U64 => Some(Self::U64),
      TokenKind::Int => Some(Self::Int),
      TokenKind::Float => Some(Self::Float),
      _ => None,
    }
  }

  /// Largest value an unsigned type can hold.
  pub fn unsigned_max(self) -> Option<u64> {
    match self {
      Self::U8 => Some(u8::MAX as u64),
      Self::U16 => Some(u16::MAX as u64),
      Self::U32 => Some(u32::MAX as u64),
      Self::U64 => Some(u64::MAX),
      Self::Int | Self::Float => None,
    }
  }

  pub fn width(self) -> Width {
    match self {
      Self::U8 => Width::Byte,
      Self::U16 => Width::Word,
      Self::U32 => Width::Dword,
      Self::U64 | Self::Int | Self::Float => Width::Qword,
    }
  }
}

impl fmt::Display for ScalarType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::U8 => "u8",
      Self::U16 => "u16",
      Self::U32 => "u32",
      Self::U64 => "u64",
      Self::Int => "int",
      Self::Float => "float",
    };
    f.write_str(name)
  }
}

/// Storage width of a slot; untyped storage is a full machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
  Byte,
  Word,
  Dword,
  Qword,
}

impl Width {
  pub fn of(ty: Option<ScalarType>) -> Self {
    ty.map_or(Self::Qword, ScalarType::width)
  }

  /// NASM data directive reserving one zeroed item of this width.
  pub fn data_directive(self) -> &'static str {
    match self {
      Self::Byte => "db",
      Self::Word => "dw",
      Self::Dword => "dd",
      Self::Qword => "dq",
    }
  }

  /// Size specifier used in memory operands.
  pub fn ptr(self) -> &'static str {
    match self {
      Self::Byte => "byte",
      Self::Word => "word",
      Self::Dword => "dword",
      Self::Qword => "qword",
    }
  }

  /// The slice of the accumulator that holds a value of this width.
  pub fn accumulator(self) -> &'static str {
    match self {
      Self::Byte => "al",
      Self::Word => "ax",
      Self::Dword => "eax",
      Self::Qword => "rax",
    }
  }

  /// Instruction that loads `operand` into `rax`, zero-extending narrow values.
  pub fn load(self, operand: &str) -> String {
    match self {
      Self::Byte | Self::Word => format!("movzx rax, {} [{operand}]", self.ptr()),
      // writing eax clears the upper half of rax
      Self::Dword => format!("mov eax, dword [{operand}]"),
      Self::Qword => format!("mov rax, qword [{operand}]"),
    }
  }

  /// Instruction that stores the low bits of `rax` into `operand`.
  pub fn store(self, operand: &str) -> String {
    format!("mov {} [{operand}], {}", self.ptr(), self.accumulator())
  }
}
