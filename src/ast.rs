//! Syntax tree produced by the parser and consumed by code generation.
//!
//! The tree is strictly owned: every child sits in a `Box` or `Vec` of its
//! single parent, so dropping the program list releases everything.

use crate::ty::ScalarType;

/// `+ - * / ^`, in the order the lexer names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
  /// Bare numeric literal, e.g. `3` or `3.14`.
  Number { text: String, value: f64 },
  /// `u8`, `u16`, `u32` or `u64` tagged literal.
  Unsigned { ty: ScalarType, value: u64 },
  /// `int` tagged literal.
  Signed { value: i64 },
  /// `float` tagged literal.
  Float { value: f64 },
}

/// Digits before the decimal point of a plain number, `"0"` when there are
/// none. This is the value a plain number evaluates to.
pub fn integer_part(text: &str) -> &str {
  match text.split_once('.') {
    Some(("", _)) => "0",
    Some((whole, _)) => whole,
    None => text,
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
  pub name: String,
  pub ty: Option<ScalarType>,
  pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
  pub name: String,
  pub params: Vec<Param>,
  pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
  Literal(Literal),
  Identifier(String),
  BinaryOp {
    op: BinaryOp,
    left: Box<Node>,
    right: Box<Node>,
  },
  Assignment {
    identifier: String,
    value: Box<Node>,
  },
  VarDecl {
    ty: ScalarType,
    identifier: String,
    initializer: Option<Box<Node>>,
  },
  Function(Function),
}

impl Node {
  pub fn number(text: impl Into<String>, value: f64) -> Self {
    Self::Literal(Literal::Number {
      text: text.into(),
      value,
    })
  }

  pub fn ident(name: impl Into<String>) -> Self {
    Self::Identifier(name.into())
  }

  pub fn binary(op: BinaryOp, left: Node, right: Node) -> Self {
    Self::BinaryOp {
      op,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn assign(identifier: impl Into<String>, value: Node) -> Self {
    Self::Assignment {
      identifier: identifier.into(),
      value: Box::new(value),
    }
  }

  pub fn var_decl(ty: ScalarType, identifier: impl Into<String>, initializer: Option<Node>) -> Self {
    Self::VarDecl {
      ty,
      identifier: identifier.into(),
      initializer: initializer.map(Box::new),
    }
  }

  pub fn is_assignment(&self) -> bool {
    matches!(self, Self::Assignment { .. })
  }

  pub fn as_function(&self) -> Option<&Function> {
    match self {
      Self::Function(func) => Some(func),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn integer_part_drops_the_fraction() {
    assert_eq!(integer_part("42"), "42");
    assert_eq!(integer_part("3.99"), "3");
    assert_eq!(integer_part("7."), "7");
    assert_eq!(integer_part(".5"), "0");
  }

  #[test]
  fn constructors_box_children() {
    assert_eq!(
      Node::assign("x", Node::number("1", 1.0)),
      Node::Assignment {
        identifier: "x".into(),
        value: Box::new(Node::Literal(Literal::Number {
          text: "1".into(),
          value: 1.0
        })),
      }
    );
    assert!(Node::assign("x", Node::ident("y")).is_assignment());
    assert!(Node::var_decl(ScalarType::U8, "x", None).as_function().is_none());
  }
}
