//! Code generation: lower the parsed program into x86-64 NASM assembly.
//!
//! Expressions use a simple stack machine around the accumulator: every
//! expression leaves its value in `rax`, and binary operators park the left
//! operand on the stack while the right one is evaluated. Globals live in
//! `.data`, sized by their declared type. Function parameters are spilled
//! from the System V argument registers (or the caller's frame) into slots
//! addressed relative to `rbp`.
//!
//! User names always go out through `symbol`, so a global called `rcx` or a
//! function called `add` can never be read as a register or a mnemonic.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, trace};

use crate::CompileOptions;
use crate::ast::{BinaryOp, Function, Literal, Node, integer_part};
use crate::error::{CompileError, CompileResult};
use crate::ty::{ScalarType, Width};

/// Integer argument registers in calling-convention order.
const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

const ENTRY_SYMBOL: &str = "_start";
const DIV_TRAP_SYMBOL: &str = "__mincc_div_by_zero";

/// Process exit status of a program that divides by zero with the check on.
pub const DIV_BY_ZERO_EXIT_STATUS: i32 = 136;

const SYS_EXIT: i32 = 60;

/// Top-level variables, keyed by name so output order is stable. `None`
/// marks a global only ever assigned, which gets a full machine word.
type Globals = BTreeMap<String, Option<ScalarType>>;

/// Emit the assembly for a whole program.
#[instrument(skip_all)]
pub fn generate(program: &[Node], options: &CompileOptions) -> CompileResult<String> {
  let functions: Vec<&Function> = program.iter().filter_map(Node::as_function).collect();
  let globals = collect_globals(program)?;
  check_symbols(&functions, &globals)?;
  debug!(globals = globals.len(), functions = functions.len(), "generating");

  let mut emitter = Emitter::new(&globals, options);
  emitter.data_section();

  emitter.raw("section .text\n");
  emitter.raw(&format!("global {ENTRY_SYMBOL}\n"));
  emitter.label(ENTRY_SYMBOL);
  if functions.iter().any(|func| func.name == "main") {
    emitter.ins(format!("call {}", symbol("main")));
  } else {
    for node in program {
      if node.as_function().is_none() {
        emitter.statement(node, Scope::Entry)?;
      }
    }
  }
  emitter.exit(0);

  for func in functions {
    emitter.raw("\n");
    emitter.function(func)?;
  }

  if emitter.uses_div_trap {
    emitter.raw("\n");
    emitter.label(DIV_TRAP_SYMBOL);
    emitter.exit(DIV_BY_ZERO_EXIT_STATUS);
  }

  Ok(emitter.asm)
}

/// Gather top-level declarations and assignment targets. Bodies of
/// functions never introduce globals.
fn collect_globals(program: &[Node]) -> CompileResult<Globals> {
  let mut globals = Globals::new();
  for node in program {
    match node {
      Node::VarDecl { ty, identifier, .. } => match globals.entry(identifier.clone()) {
        Entry::Vacant(entry) => {
          entry.insert(Some(*ty));
        }
        Entry::Occupied(mut entry) => {
          let existing = *entry.get();
          match existing {
            None => {
              entry.insert(Some(*ty));
            }
            Some(first) if first != *ty => {
              return Err(CompileError::ConflictingDeclaration {
                name: identifier.clone(),
                first,
                second: *ty,
              });
            }
            Some(_) => {}
          }
        }
      },
      Node::Assignment { identifier, .. } => {
        globals.entry(identifier.clone()).or_insert(None);
      }
      Node::Literal(_) | Node::Identifier(_) | Node::BinaryOp { .. } | Node::Function(_) => {}
    }
  }
  Ok(globals)
}

/// Every label in the output must be unique.
fn check_symbols(functions: &[&Function], globals: &Globals) -> CompileResult<()> {
  let reserved = [ENTRY_SYMBOL, DIV_TRAP_SYMBOL];
  if let Some(name) = globals.keys().find(|name| reserved.contains(&name.as_str())) {
    return Err(CompileError::DuplicateSymbol { name: name.clone() });
  }

  let mut seen = BTreeSet::new();
  for func in functions {
    let name = func.name.as_str();
    if !seen.insert(name) || globals.contains_key(name) || reserved.contains(&name) {
      return Err(CompileError::DuplicateSymbol {
        name: func.name.clone(),
      });
    }

    let mut params = BTreeSet::new();
    for param in &func.params {
      if !params.insert(param.name.as_str()) {
        return Err(CompileError::DuplicateParameter {
          name: param.name.clone(),
          function: func.name.clone(),
        });
      }
    }
  }
  Ok(())
}

/// Storage bound to one function parameter.
#[derive(Debug)]
struct Binding<'a> {
  name: &'a str,
  operand: String,
  width: Width,
  is_const: bool,
}

/// Generation context for a function body: the function and where each of
/// its parameters lives.
#[derive(Debug)]
struct Frame<'a> {
  func: &'a Function,
  bindings: Vec<Binding<'a>>,
}

impl<'a> Frame<'a> {
  fn new(func: &'a Function) -> Self {
    let bindings = func
      .params
      .iter()
      .enumerate()
      .map(|(index, param)| Binding {
        name: &param.name,
        operand: format!("rbp - {}", 8 * (index + 1)),
        width: Width::of(param.ty),
        is_const: param.is_const,
      })
      .collect();
    Self { func, bindings }
  }

  /// Bytes reserved for parameter slots, keeping `rsp` 16-byte aligned.
  fn stack_size(&self) -> usize {
    (8 * self.bindings.len()).div_ceil(16) * 16
  }
}

/// Where code is being generated.
#[derive(Debug, Clone, Copy)]
enum Scope<'a> {
  Entry,
  Function(&'a Frame<'a>),
}

impl<'a> Scope<'a> {
  fn binding(self, name: &str) -> Option<&'a Binding<'a>> {
    match self {
      Scope::Entry => None,
      Scope::Function(frame) => frame.bindings.iter().find(|binding| binding.name == name),
    }
  }

  fn function_name(self) -> Option<String> {
    match self {
      Scope::Entry => None,
      Scope::Function(frame) => Some(frame.func.name.clone()),
    }
  }
}

struct Emitter<'a> {
  asm: String,
  globals: &'a Globals,
  options: &'a CompileOptions,
  next_label: usize,
  uses_div_trap: bool,
}

impl<'a> Emitter<'a> {
  fn new(globals: &'a Globals, options: &'a CompileOptions) -> Self {
    Self {
      asm: String::new(),
      globals,
      options,
      next_label: 0,
      uses_div_trap: false,
    }
  }

  fn raw(&mut self, text: &str) {
    self.asm.push_str(text);
  }

  fn label(&mut self, name: &str) {
    self.asm.push_str(&format!("{name}:\n"));
  }

  fn ins(&mut self, instruction: impl AsRef<str>) {
    self.asm.push_str("    ");
    self.asm.push_str(instruction.as_ref());
    self.asm.push('\n');
  }

  fn fresh_label(&mut self) -> usize {
    let label = self.next_label;
    self.next_label += 1;
    label
  }

  fn exit(&mut self, status: i32) {
    self.ins(format!("mov rax, {SYS_EXIT}"));
    if status == 0 {
      self.ins("xor rdi, rdi");
    } else {
      self.ins(format!("mov rdi, {status}"));
    }
    self.ins("syscall");
  }

  fn data_section(&mut self) {
    self.raw("section .data\n");
    let globals = self.globals;
    for (name, ty) in globals {
      let directive = Width::of(*ty).data_directive();
      self.raw(&format!("{}: {directive} 0\n", symbol(name)));
    }
    self.raw("\n");
  }

  #[instrument(skip_all, fields(name = %func.name))]
  fn function(&mut self, func: &Function) -> CompileResult<()> {
    let frame = Frame::new(func);
    self.label(&symbol(&func.name));
    self.ins("push rbp");
    self.ins("mov rbp, rsp");
    if frame.stack_size() > 0 {
      self.ins(format!("sub rsp, {}", frame.stack_size()));
    }

    for (index, binding) in frame.bindings.iter().enumerate() {
      trace!(param = binding.name, slot = %binding.operand, "binding parameter");
      match ARG_REGS.get(index) {
        Some(reg) => self.ins(format!("mov qword [{}], {reg}", binding.operand)),
        None => {
          let offset = 16 + 8 * (index - ARG_REGS.len());
          self.ins(format!("mov rax, qword [rbp + {offset}]"));
          self.ins(format!("mov qword [{}], rax", binding.operand));
        }
      }
    }

    for stmt in &func.body {
      self.statement(stmt, Scope::Function(&frame))?;
    }

    // An assignment leaves nothing meaningful in rax.
    if func.body.last().is_none_or(Node::is_assignment) {
      self.ins("xor eax, eax");
    }

    self.ins("mov rsp, rbp");
    self.ins("pop rbp");
    self.ins("ret");
    Ok(())
  }

  fn statement(&mut self, node: &Node, scope: Scope<'_>) -> CompileResult<()> {
    match node {
      Node::Assignment { identifier, value } => self.assign(identifier, value, scope),
      Node::VarDecl {
        ty,
        identifier,
        initializer,
      } => {
        if let Scope::Function(frame) = scope {
          return Err(CompileError::Internal {
            message: format!(
              "declaration of `{identifier}` inside function `{}`",
              frame.func.name
            ),
          });
        }
        if let Some(init) = initializer {
          self.expr(init, scope)?;
          self.ins(ty.width().store(&symbol(identifier)));
        }
        Ok(())
      }
      Node::Function(func) => Err(CompileError::Internal {
        message: format!("function `{}` nested inside another item", func.name),
      }),
      Node::Literal(_) | Node::Identifier(_) | Node::BinaryOp { .. } => self.expr(node, scope),
    }
  }

  fn assign(&mut self, identifier: &str, value: &Node, scope: Scope<'_>) -> CompileResult<()> {
    if let Some(binding) = scope.binding(identifier) {
      if binding.is_const {
        return Err(CompileError::ConstAssignment {
          name: identifier.to_string(),
          function: scope.function_name().unwrap_or_default(),
        });
      }
      self.expr(value, scope)?;
      self.ins(binding.width.store(&binding.operand));
      return Ok(());
    }

    let Some(ty) = self.globals.get(identifier).copied() else {
      return Err(CompileError::UndefinedIdentifier {
        name: identifier.to_string(),
        function: scope.function_name(),
      });
    };
    self.expr(value, scope)?;
    self.ins(Width::of(ty).store(&symbol(identifier)));
    Ok(())
  }

  /// Evaluate an expression into `rax`.
  fn expr(&mut self, node: &Node, scope: Scope<'_>) -> CompileResult<()> {
    match node {
      Node::Literal(literal) => {
        self.ins(format!("mov rax, {}", immediate(literal)));
        Ok(())
      }
      Node::Identifier(name) => self.load(name, scope),
      Node::BinaryOp { op, left, right } => {
        self.expr(left, scope)?;
        self.ins("push rax");
        self.expr(right, scope)?;
        self.ins("mov rcx, rax");
        self.ins("pop rax");
        self.binary(*op);
        Ok(())
      }
      Node::Assignment { identifier, .. } | Node::VarDecl { identifier, .. } => {
        Err(CompileError::Internal {
          message: format!("statement targeting `{identifier}` used as an expression"),
        })
      }
      Node::Function(func) => Err(CompileError::Internal {
        message: format!("function `{}` used as an expression", func.name),
      }),
    }
  }

  fn load(&mut self, name: &str, scope: Scope<'_>) -> CompileResult<()> {
    if let Some(binding) = scope.binding(name) {
      self.ins(binding.width.load(&binding.operand));
      return Ok(());
    }
    match self.globals.get(name).copied() {
      Some(ty) => {
        self.ins(Width::of(ty).load(&symbol(name)));
        Ok(())
      }
      None => Err(CompileError::UndefinedIdentifier {
        name: name.to_string(),
        function: scope.function_name(),
      }),
    }
  }

  /// Combine `rax` (left) with `rcx` (right), leaving the result in `rax`.
  fn binary(&mut self, op: BinaryOp) {
    match op {
      BinaryOp::Add => self.ins("add rax, rcx"),
      BinaryOp::Sub => self.ins("sub rax, rcx"),
      BinaryOp::Mul => self.ins("imul rax, rcx"),
      BinaryOp::Div => {
        if self.options.check_division {
          self.uses_div_trap = true;
          self.ins("test rcx, rcx");
          self.ins(format!("jz {DIV_TRAP_SYMBOL}"));
        }
        self.ins("cqo");
        self.ins("idiv rcx");
      }
      BinaryOp::Pow => {
        // Repeated multiplication; a non-positive exponent yields 1.
        let id = self.fresh_label();
        self.ins("mov rdx, rax");
        self.ins("mov eax, 1");
        self.raw(&format!(".pow_loop_{id}:\n"));
        self.ins("test rcx, rcx");
        self.ins(format!("jle .pow_done_{id}"));
        self.ins("imul rax, rdx");
        self.ins("dec rcx");
        self.ins(format!("jmp .pow_loop_{id}"));
        self.raw(&format!(".pow_done_{id}:\n"));
      }
    }
  }
}

/// A user-defined name as NASM must see it. The `$` prefix marks the word as
/// an identifier even when it spells a register, mnemonic or size keyword.
fn symbol(name: &str) -> String {
  format!("${name}")
}

/// Immediate operand for a literal. Plain numbers truncate toward zero since
/// arithmetic is integer-only; `float` literals load their IEEE-754 bits.
fn immediate(literal: &Literal) -> String {
  match literal {
    Literal::Number { text, .. } => integer_part(text).to_string(),
    Literal::Unsigned { value, .. } => value.to_string(),
    Literal::Signed { value } => value.to_string(),
    Literal::Float { value } => format!("0x{:016x}", value.to_bits()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::Param;
  use crate::{parser::parse, tokenizer::tokenize};
  use pretty_assertions::assert_eq;

  fn compile(input: &str) -> CompileResult<String> {
    generate(&parse(tokenize(input))?, &CompileOptions::default())
  }

  fn asm(input: &str) -> String {
    compile(input).unwrap_or_else(|err| panic!("{input:?} failed: {err}"))
  }

  #[test]
  fn function_binds_registers_and_returns_sum() {
    assert_eq!(
      asm("fn add(int a, int b) { a+b }"),
      "\
section .data

section .text
global _start
_start:
    mov rax, 60
    xor rdi, rdi
    syscall

$add:
    push rbp
    mov rbp, rsp
    sub rsp, 16
    mov qword [rbp - 8], rdi
    mov qword [rbp - 16], rsi
    mov rax, qword [rbp - 8]
    push rax
    mov rax, qword [rbp - 16]
    mov rcx, rax
    pop rax
    add rax, rcx
    mov rsp, rbp
    pop rbp
    ret
"
    );
  }

  #[test]
  fn typed_global_is_truncated_on_store() {
    assert_eq!(
      asm("u8 x = 5"),
      "\
section .data
$x: db 0

section .text
global _start
_start:
    mov rax, 5
    mov byte [$x], al
    mov rax, 60
    xor rdi, rdi
    syscall
"
    );
  }

  #[test]
  fn data_section_is_sorted_and_sized() {
    let out = asm("u64 d = 1\nu8 b\nfloat f\nu16 c\nu32 e\nint g\na = 2");
    let data: Vec<&str> = out.lines().skip(1).take_while(|line| !line.is_empty()).collect();
    assert_eq!(
      data,
      vec![
        "$a: dq 0", "$b: db 0", "$c: dw 0", "$d: dq 0", "$e: dd 0", "$f: dq 0", "$g: dq 0",
      ]
    );
  }

  #[test]
  fn globals_load_with_declared_width() {
    let out = asm("u8 a = 1\nu16 b = 2\nu32 c = 3\nint d = 4\na + b + c + d");
    assert!(out.contains("movzx rax, byte [$a]\n"));
    assert!(out.contains("movzx rax, word [$b]\n"));
    assert!(out.contains("mov eax, dword [$c]\n"));
    assert!(out.contains("mov rax, qword [$d]\n"));
  }

  #[test]
  fn main_takes_over_the_entry_point() {
    let out = asm("x = 1\nfn main() { x = 7 }\nx + 1");
    let entry: Vec<&str> = out
      .lines()
      .skip_while(|line| *line != "_start:")
      .skip(1)
      .take_while(|line| !line.is_empty())
      .collect();
    assert_eq!(
      entry,
      vec!["    call $main", "    mov rax, 60", "    xor rdi, rdi", "    syscall"]
    );
    // the trailing assignment clears the result
    assert!(out.contains("    mov qword [$x], rax\n    xor eax, eax\n    mov rsp, rbp\n"));
  }

  #[test]
  fn top_level_code_runs_in_source_order() {
    let out = asm("x = 2\ny = x * 3\ny");
    assert!(out.contains(
      "\
_start:
    mov rax, 2
    mov qword [$x], rax
    mov rax, qword [$x]
    push rax
    mov rax, 3
    mov rcx, rax
    pop rax
    imul rax, rcx
    mov qword [$y], rax
    mov rax, qword [$y]
    mov rax, 60
"
    ));
  }

  #[test]
  fn parameters_past_six_come_from_the_caller_frame() {
    let out = asm("fn f(a, b, c, d, e, g, h, i) { i }");
    for (slot, reg) in ARG_REGS.iter().enumerate() {
      assert!(out.contains(&format!("    mov qword [rbp - {}], {reg}\n", 8 * (slot + 1))));
    }
    assert!(out.contains("    sub rsp, 64\n"));
    assert!(out.contains("    mov rax, qword [rbp + 16]\n    mov qword [rbp - 56], rax\n"));
    assert!(out.contains("    mov rax, qword [rbp + 24]\n    mov qword [rbp - 64], rax\n"));
    assert!(out.contains("    mov rax, qword [rbp - 64]\n    mov rsp, rbp\n"));
  }

  #[test]
  fn odd_parameter_count_keeps_alignment() {
    assert!(asm("fn f(a) { a }").contains("    sub rsp, 16\n"));
    assert!(asm("fn f(a, b, c) { a }").contains("    sub rsp, 32\n"));
    assert!(!asm("fn f() { 1 }").contains("sub rsp"));
  }

  #[test]
  fn typed_parameters_use_their_width() {
    let out = asm("fn f(u8 a, const u32 b) { a = b a }");
    assert!(out.contains("    mov eax, dword [rbp - 16]\n    mov byte [rbp - 8], al\n"));
    assert!(out.contains("    movzx rax, byte [rbp - 8]\n    mov rsp, rbp\n"));
  }

  #[test]
  fn empty_body_returns_zero() {
    assert!(asm("fn f() { }").contains("$f:\n    push rbp\n    mov rbp, rsp\n    xor eax, eax\n"));
  }

  #[test]
  fn functions_can_read_and_write_globals() {
    let out = asm("u16 g = 1\nfn bump(n) { g = g + n g }");
    assert!(out.contains("    movzx rax, word [$g]\n    push rax\n    mov rax, qword [rbp - 8]\n"));
    assert!(out.contains("    mov word [$g], ax\n"));
  }

  #[test]
  fn literal_immediates() {
    let out = asm("3.99\n.5\n9223372036854775807.9\nint -3\nfloat 2.0\nu64 18446744073709551615");
    assert!(out.contains("    mov rax, 3\n"));
    assert!(out.contains("    mov rax, 0\n"));
    assert!(out.contains("    mov rax, 9223372036854775807\n"));
    assert!(out.contains("    mov rax, -3\n"));
    assert!(out.contains("    mov rax, 0x4000000000000000\n"));
    assert!(out.contains("    mov rax, 18446744073709551615\n"));
  }

  #[test]
  fn division_checks_divisor_by_default() {
    let out = asm("10 / 2");
    assert!(out.contains(
      "    test rcx, rcx\n    jz __mincc_div_by_zero\n    cqo\n    idiv rcx\n"
    ));
    assert!(out.ends_with("\n__mincc_div_by_zero:\n    mov rax, 60\n    mov rdi, 136\n    syscall\n"));
  }

  #[test]
  fn division_check_can_be_disabled() {
    let program = parse(tokenize("10 / 2")).unwrap();
    let options = CompileOptions {
      check_division: false,
    };
    let out = generate(&program, &options).unwrap();
    assert!(out.contains("    pop rax\n    cqo\n    idiv rcx\n"));
    assert!(!out.contains(DIV_TRAP_SYMBOL));
  }

  #[test]
  fn no_trap_without_division() {
    assert!(!asm("1 + 2").contains(DIV_TRAP_SYMBOL));
  }

  #[test]
  fn power_uses_distinct_labels() {
    let out = asm("2 ^ 3 ^ 2");
    assert!(out.contains(".pow_loop_0:\n"));
    assert!(out.contains(".pow_done_0:\n"));
    assert!(out.contains(".pow_loop_1:\n"));
    assert!(out.contains("    jle .pow_done_1\n"));
  }

  #[test]
  fn undefined_identifier_is_an_error() {
    assert_eq!(
      compile("x + 1"),
      Err(CompileError::UndefinedIdentifier {
        name: "x".into(),
        function: None
      })
    );
    assert_eq!(
      compile("fn f(a) { b = a }"),
      Err(CompileError::UndefinedIdentifier {
        name: "b".into(),
        function: Some("f".into())
      })
    );
  }

  #[test]
  fn globals_come_only_from_the_top_level() {
    // `y` is assigned inside `f` but never declared at the top level
    assert!(matches!(
      compile("fn f() { y = 1 }\ny"),
      Err(CompileError::UndefinedIdentifier { name, .. }) if name == "y"
    ));
  }

  #[test]
  fn const_parameters_are_read_only() {
    assert_eq!(
      compile("fn f(const a) { a = 1 }"),
      Err(CompileError::ConstAssignment {
        name: "a".into(),
        function: "f".into()
      })
    );
  }

  #[test]
  fn symbol_clashes() {
    assert_eq!(
      compile("fn f() { 1 }\nfn f() { 2 }"),
      Err(CompileError::DuplicateSymbol { name: "f".into() })
    );
    assert_eq!(
      compile("f = 1\nfn f() { 2 }"),
      Err(CompileError::DuplicateSymbol { name: "f".into() })
    );
    assert_eq!(
      compile("_start = 1"),
      Err(CompileError::DuplicateSymbol {
        name: "_start".into()
      })
    );
    assert_eq!(
      compile("fn f(a, a) { a }"),
      Err(CompileError::DuplicateParameter {
        name: "a".into(),
        function: "f".into()
      })
    );
  }

  #[test]
  fn conflicting_declarations() {
    assert_eq!(
      compile("u8 x\nu16 x"),
      Err(CompileError::ConflictingDeclaration {
        name: "x".into(),
        first: ScalarType::U8,
        second: ScalarType::U16
      })
    );
    // an assignment first, then a declaration, settles on the declared type
    assert!(asm("x = 1\nu32 x = 2\nu32 x").contains("$x: dd 0\n"));
  }

  #[test]
  fn misplaced_nodes_are_internal_errors() {
    let nested = Node::binary(
      BinaryOp::Add,
      Node::number("1", 1.0),
      Node::assign("x", Node::number("2", 2.0)),
    );
    let program = vec![Node::assign("x", Node::number("0", 0.0)), nested];
    assert!(matches!(
      generate(&program, &CompileOptions::default()),
      Err(CompileError::Internal { .. })
    ));

    let func = Function {
      name: "f".into(),
      params: vec![Param {
        name: "a".into(),
        ty: None,
        is_const: false,
      }],
      body: vec![Node::var_decl(ScalarType::U8, "z", None)],
    };
    assert!(matches!(
      generate(&[Node::Function(func)], &CompileOptions::default()),
      Err(CompileError::Internal { .. })
    ));
  }

  #[test]
  fn names_that_spell_registers_or_mnemonics_are_escaped() {
    let out = asm("rcx = 1\nbyte = rcx + 2\nfn add(int a, int b) { a + b }");
    assert!(out.contains("$byte: dq 0\n$rcx: dq 0\n"));
    assert!(out.contains("    mov qword [$rcx], rax\n"));
    assert!(out.contains("    mov rax, qword [$rcx]\n"));
    assert!(out.contains("    mov qword [$byte], rax\n"));
    assert!(out.contains("\n$add:\n"));
    assert!(!out.contains("[rcx]"));
    assert!(!out.lines().any(|line| line == "add:"));
  }

  #[test]
  fn output_is_deterministic() {
    let input = "u8 b = 1\na = 2\nu32 c\nfn f(x, y) { x / y ^ 2 }\nfn g() { c = a + b }";
    assert_eq!(asm(input), asm(input));
  }
}
