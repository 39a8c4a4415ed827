//! Lexer for mincc source: characters in, positioned tokens out.
//!
//! The lexer never fails outright. Malformed input becomes an `Error` token
//! carrying the diagnostic, and tokenization stops right after it so the
//! parser can report the problem at the right position.

use std::fmt;

use tracing::{instrument, trace};

/// Operators, punctuation, keywords and the two sentinels (`Eof`, `Error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
  Plus,
  Minus,
  Mul,
  Div,
  Exp,
  LPar,
  RPar,
  LBrace,
  RBrace,
  Comma,
  Equal,
  Num,
  Identifier,
  Fn,
  Const,
  U8,
  U16,
  U32,
  U64,
  Int,
  Float,
  Eof,
  Error,
}

impl TokenKind {
  fn keyword(ident: &str) -> Option<Self> {
    let kind = match ident {
      "fn" => Self::Fn,
      "const" => Self::Const,
      "u8" => Self::U8,
      "u16" => Self::U16,
      "u32" => Self::U32,
      "u64" => Self::U64,
      "int" => Self::Int,
      "float" => Self::Float,
      _ => return None,
    };
    Some(kind)
  }

  fn punctuator(c: char) -> Option<Self> {
    let kind = match c {
      '+' => Self::Plus,
      '-' => Self::Minus,
      '*' => Self::Mul,
      '/' => Self::Div,
      '^' => Self::Exp,
      '(' => Self::LPar,
      ')' => Self::RPar,
      '{' => Self::LBrace,
      '}' => Self::RBrace,
      ',' => Self::Comma,
      '=' => Self::Equal,
      _ => return None,
    };
    Some(kind)
  }
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Plus => "'+'",
      Self::Minus => "'-'",
      Self::Mul => "'*'",
      Self::Div => "'/'",
      Self::Exp => "'^'",
      Self::LPar => "'('",
      Self::RPar => "')'",
      Self::LBrace => "'{'",
      Self::RBrace => "'}'",
      Self::Comma => "','",
      Self::Equal => "'='",
      Self::Num => "number",
      Self::Identifier => "identifier",
      Self::Fn => "'fn'",
      Self::Const => "'const'",
      Self::U8 => "'u8'",
      Self::U16 => "'u16'",
      Self::U32 => "'u32'",
      Self::U64 => "'u64'",
      Self::Int => "'int'",
      Self::Float => "'float'",
      Self::Eof => "end of input",
      Self::Error => "invalid token",
    };
    f.write_str(name)
  }
}

/// A classified lexeme with the 1-based position of its first character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub line: u32,
  pub column: u32,
}

impl Token {
  pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
    Self {
      kind,
      text: text.into(),
      line,
      column,
    }
  }

  pub fn is(&self, kind: TokenKind) -> bool {
    self.kind == kind
  }
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: &Token) -> String {
  match token.kind {
    TokenKind::Eof => "end of input".to_string(),
    TokenKind::Num | TokenKind::Identifier => format!("{} \"{}\"", token.kind, token.text),
    _ => format!("\"{}\"", token.text),
  }
}

#[derive(Debug)]
pub struct Lexer<'a> {
  input: &'a str,
  pos: usize,
  line: u32,
  column: u32,
}

impl<'a> Lexer<'a> {
  pub fn new(input: &'a str) -> Self {
    Self {
      input,
      pos: 0,
      line: 1,
      column: 1,
    }
  }

  /// Lex the whole input into a vector terminated by an `Eof` marker. An
  /// `Error` token ends the scan; only the `Eof` sentinel follows it.
  #[instrument(skip_all)]
  pub fn tokenize(mut self) -> Vec<Token> {
    let mut tokens = Vec::new();
    loop {
      let token = self.next_token();
      match token.kind {
        TokenKind::Eof => break,
        TokenKind::Error => {
          trace!(line = token.line, column = token.column, "stopping at error token");
          let (line, column) = (self.line, self.column);
          tokens.push(token);
          tokens.push(Token::new(TokenKind::Eof, "", line, column));
          return tokens;
        }
        _ => tokens.push(token),
      }
    }
    tokens.push(Token::new(TokenKind::Eof, "", self.line, self.column));
    tokens
  }

  /// Produce the next token, or `Eof` once the input is exhausted.
  pub fn next_token(&mut self) -> Token {
    self.skip_trivia();

    let (line, column) = (self.line, self.column);
    let Some(c) = self.peek() else {
      return Token::new(TokenKind::Eof, "", line, column);
    };

    let token = if c.is_ascii_digit() || c == '.' {
      self.number()
    } else if c.is_ascii_alphabetic() || c == '_' {
      self.identifier()
    } else if let Some(kind) = TokenKind::punctuator(c) {
      self.bump();
      Token::new(kind, c.to_string(), line, column)
    } else {
      self.bump();
      Token::new(TokenKind::Error, c.to_string(), line, column)
    };
    trace!(kind = ?token.kind, text = %token.text, line, column, "token");
    token
  }

  fn skip_trivia(&mut self) {
    loop {
      match self.peek() {
        Some(c) if c.is_whitespace() => {
          self.bump();
        }
        Some('/') if self.input[self.pos..].starts_with("//") => {
          while let Some(c) = self.bump() {
            if c == '\n' {
              break;
            }
          }
        }
        _ => return,
      }
    }
  }

  fn number(&mut self) -> Token {
    let (line, column) = (self.line, self.column);
    let start = self.pos;
    let mut seen_dot = false;

    while let Some(c) = self.peek() {
      if c == '.' {
        if seen_dot {
          return Token::new(TokenKind::Error, "multiple decimal points", line, column);
        }
        seen_dot = true;
      } else if !c.is_ascii_digit() {
        break;
      }
      self.bump();
    }

    let text = &self.input[start..self.pos];
    match text.parse::<f64>() {
      Ok(_) => Token::new(TokenKind::Num, text, line, column),
      Err(_) => Token::new(
        TokenKind::Error,
        format!("invalid number format: {text}"),
        line,
        column,
      ),
    }
  }

  fn identifier(&mut self) -> Token {
    let (line, column) = (self.line, self.column);
    let start = self.pos;
    while self
      .peek()
      .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    {
      self.bump();
    }
    let text = &self.input[start..self.pos];
    let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Identifier);
    Token::new(kind, text, line, column)
  }

  fn peek(&self) -> Option<char> {
    self.input[self.pos..].chars().next()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += c.len_utf8();
    if c == '\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(c)
  }
}

/// Lex `input` into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> Vec<Token> {
  Lexer::new(input).tokenize()
}
