//! Recursive-descent parser producing the top-level item list.
//!
//! One helper per precedence tier, lowest binding first: `expr` handles
//! `+`/`-`, `term` handles `*`/`/`, `power` chains `^` left to right, and
//! `factor` covers literals, identifiers and parenthesised groups. Parsing
//! stops at the first error; there is no recovery.

use tracing::{debug, instrument, trace};

use crate::ast::{BinaryOp, Function, Literal, Node, Param, integer_part};
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind, describe_token};
use crate::ty::ScalarType;

/// Parse a token sequence (as produced by `tokenize`) into program items.
#[instrument(skip_all)]
pub fn parse(tokens: Vec<Token>) -> CompileResult<Vec<Node>> {
  if let Some(bad) = tokens.iter().find(|token| token.is(TokenKind::Error)) {
    return Err(CompileError::lex(bad.line, bad.column, bad.text.clone()));
  }

  let mut stream = TokenStream::new(tokens);
  if stream.is_eof() {
    return Err(stream.error_here("empty program"));
  }

  let mut program = Vec::new();
  while !stream.is_eof() {
    program.push(parse_item(&mut stream)?);
  }
  debug!(items = program.len(), "parsed program");
  Ok(program)
}

#[instrument(skip_all)]
fn parse_item(stream: &mut TokenStream) -> CompileResult<Node> {
  if stream.peek().is(TokenKind::Fn) {
    return parse_function(stream).map(Node::Function);
  }
  if starts_var_decl(stream) {
    return parse_var_decl(stream);
  }
  parse_statement(stream)
}

/// A type keyword followed by an identifier declares a variable; followed by
/// a number it is a typed literal.
fn starts_var_decl(stream: &TokenStream) -> bool {
  ScalarType::from_token(stream.peek().kind).is_some()
    && stream.peek_nth(1).is(TokenKind::Identifier)
}

fn parse_var_decl(stream: &mut TokenStream) -> CompileResult<Node> {
  let type_token = stream.advance();
  let ty = ScalarType::from_token(type_token.kind)
    .ok_or_else(|| error_at(&type_token, "expected a type keyword"))?;
  let identifier = stream.expect_ident("a variable name")?;

  let initializer = if stream.equal(TokenKind::Equal) {
    Some(parse_expr(stream)?)
  } else {
    None
  };
  trace!(%ty, %identifier, "variable declaration");
  Ok(Node::var_decl(ty, identifier, initializer))
}

#[instrument(skip_all)]
fn parse_function(stream: &mut TokenStream) -> CompileResult<Function> {
  stream.skip(TokenKind::Fn, "'fn'")?;
  let name = stream.expect_ident("a function name")?;
  stream.skip(TokenKind::LPar, "'(' after function name")?;

  let mut params = Vec::new();
  if !stream.equal(TokenKind::RPar) {
    loop {
      params.push(parse_param(stream)?);
      if stream.equal(TokenKind::Comma) {
        continue;
      }
      stream.skip(TokenKind::RPar, "',' or ')' in parameter list")?;
      break;
    }
  }

  stream.skip(TokenKind::LBrace, "'{' to open function body")?;
  let mut body = Vec::new();
  loop {
    if stream.equal(TokenKind::RBrace) {
      break;
    }
    if stream.is_eof() {
      return Err(stream.error_here(format!(
        "expected '}}' to close body of function `{name}`, but got end of input"
      )));
    }
    if starts_var_decl(stream) {
      return Err(stream.error_here("variable declarations are only allowed at top level"));
    }
    body.push(parse_statement(stream)?);
  }

  debug!(%name, params = params.len(), statements = body.len(), "parsed function");
  Ok(Function { name, params, body })
}

fn parse_param(stream: &mut TokenStream) -> CompileResult<Param> {
  let is_const = stream.equal(TokenKind::Const);
  let ty = ScalarType::from_token(stream.peek().kind);
  if ty.is_some() {
    stream.advance();
  }
  let name = stream.expect_ident("a parameter name")?;
  Ok(Param { name, ty, is_const })
}

#[instrument(skip_all)]
fn parse_statement(stream: &mut TokenStream) -> CompileResult<Node> {
  // Look past the identifier before committing to an assignment.
  if stream.peek().is(TokenKind::Identifier) && stream.peek_nth(1).is(TokenKind::Equal) {
    let identifier = stream.advance().text;
    stream.advance();
    let value = parse_expr(stream)?;
    return Ok(Node::assign(identifier, value));
  }
  parse_expr(stream)
}

fn parse_expr(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_term(stream)?;

  loop {
    let op = match stream.peek().kind {
      TokenKind::Plus => BinaryOp::Add,
      TokenKind::Minus => BinaryOp::Sub,
      _ => break,
    };
    stream.advance();
    let rhs = parse_term(stream)?;
    node = Node::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_term(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_power(stream)?;

  loop {
    let op = match stream.peek().kind {
      TokenKind::Mul => BinaryOp::Mul,
      TokenKind::Div => BinaryOp::Div,
      _ => break,
    };
    stream.advance();
    let rhs = parse_power(stream)?;
    node = Node::binary(op, node, rhs);
  }

  Ok(node)
}

/// `^` binds tighter than `*` and chains left to right: `2^3^2` is `(2^3)^2`.
fn parse_power(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_factor(stream)?;

  while stream.equal(TokenKind::Exp) {
    let rhs = parse_factor(stream)?;
    node = Node::binary(BinaryOp::Pow, node, rhs);
  }

  Ok(node)
}

fn parse_factor(stream: &mut TokenStream) -> CompileResult<Node> {
  let token = stream.peek().clone();

  if let Some(ty) = ScalarType::from_token(token.kind) {
    stream.advance();
    return parse_typed_literal(stream, ty).map(Node::Literal);
  }

  match token.kind {
    TokenKind::Num => {
      stream.advance();
      let value = token
        .text
        .parse::<f64>()
        .map_err(|err| error_at(&token, format!("invalid number {}: {err}", token.text)))?;
      if integer_part(&token.text).parse::<i64>().is_err() {
        return Err(error_at(
          &token,
          format!("{} does not fit in a 64-bit signed integer", token.text),
        ));
      }
      Ok(Node::number(token.text, value))
    }
    TokenKind::Identifier => {
      stream.advance();
      Ok(Node::ident(token.text))
    }
    TokenKind::LPar => {
      stream.advance();
      let node = parse_expr(stream)?;
      stream.skip(TokenKind::RPar, "')' to close '('")?;
      Ok(node)
    }
    _ => Err(error_at(
      &token,
      format!("expected an expression, but got {}", describe_token(&token)),
    )),
  }
}

/// The literal after a type keyword, checked against the keyword's range.
fn parse_typed_literal(stream: &mut TokenStream, ty: ScalarType) -> CompileResult<Literal> {
  let negative = stream.equal(TokenKind::Minus);
  let token = stream.peek().clone();
  if !token.is(TokenKind::Num) {
    return Err(error_at(
      &token,
      format!("expected a number after '{ty}', but got {}", describe_token(&token)),
    ));
  }
  stream.advance();

  let text = if negative {
    format!("-{}", token.text)
  } else {
    token.text.clone()
  };

  match ty {
    ScalarType::Float => {
      let value = text
        .parse::<f64>()
        .map_err(|err| error_at(&token, format!("invalid float literal {text}: {err}")))?;
      Ok(Literal::Float { value })
    }
    ScalarType::Int => {
      let value = text
        .parse::<i64>()
        .map_err(|_| error_at(&token, format!("{text} is not a valid 'int' literal")))?;
      Ok(Literal::Signed { value })
    }
    ScalarType::U8 | ScalarType::U16 | ScalarType::U32 | ScalarType::U64 => {
      if negative {
        return Err(error_at(&token, format!("'{ty}' literal cannot be negative")));
      }
      let max = ty.unsigned_max().unwrap_or(u64::MAX);
      match text.parse::<u64>() {
        Ok(value) if value <= max => Ok(Literal::Unsigned { ty, value }),
        _ => Err(error_at(
          &token,
          format!("{text} is not a valid '{ty}' literal (expected an integer in 0..={max})"),
        )),
      }
    }
  }
}

fn error_at(token: &Token, message: impl Into<String>) -> CompileError {
  CompileError::parse(token.line, token.column, message)
}

/// Cursor over the token vector. The last token is always `Eof`, and the
/// cursor never moves past it.
struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  fn new(mut tokens: Vec<Token>) -> Self {
    if !tokens.last().is_some_and(|token| token.is(TokenKind::Eof)) {
      let (line, column) = tokens
        .last()
        .map_or((1, 1), |token| (token.line, token.column + token.text.chars().count() as u32));
      tokens.push(Token::new(TokenKind::Eof, "", line, column));
    }
    Self { tokens, pos: 0 }
  }

  fn peek(&self) -> &Token {
    self.peek_nth(0)
  }

  fn peek_nth(&self, n: usize) -> &Token {
    let last = self.tokens.len() - 1;
    &self.tokens[(self.pos + n).min(last)]
  }

  fn advance(&mut self) -> Token {
    let token = self.peek().clone();
    if !token.is(TokenKind::Eof) {
      self.pos += 1;
    }
    token
  }

  /// Consume the current token if it has the given kind.
  fn equal(&mut self, kind: TokenKind) -> bool {
    if self.peek().is(kind) {
      self.advance();
      return true;
    }
    false
  }

  fn skip(&mut self, kind: TokenKind, expected: &str) -> CompileResult<Token> {
    if self.peek().is(kind) {
      Ok(self.advance())
    } else {
      Err(self.error_here(format!(
        "expected {expected}, but got {}",
        describe_token(self.peek())
      )))
    }
  }

  fn expect_ident(&mut self, what: &str) -> CompileResult<String> {
    Ok(self.skip(TokenKind::Identifier, what)?.text)
  }

  fn is_eof(&self) -> bool {
    self.peek().is(TokenKind::Eof)
  }

  fn error_here(&self, message: impl Into<String>) -> CompileError {
    error_at(self.peek(), message)
  }
}
