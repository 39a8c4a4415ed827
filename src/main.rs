use std::env;
use std::fs;
use std::process;

use mincc::{CompileOptions, compile};
use tracing::debug;
use tracing_subscriber::EnvFilter;

struct Args {
  input: String,
  output: Option<String>,
  options: CompileOptions,
}

fn parse_args(args: &[String]) -> Option<Args> {
  let mut input = None;
  let mut output = None;
  let mut options = CompileOptions::default();

  let mut iter = args.iter().skip(1);
  while let Some(arg) = iter.next() {
    match arg.as_str() {
      "-o" => output = Some(iter.next()?.clone()),
      "--no-div-check" => options.check_division = false,
      _ if arg.starts_with('-') => return None,
      _ if input.is_none() => input = Some(arg.clone()),
      _ => return None,
    }
  }

  Some(Args {
    input: input?,
    output,
    options,
  })
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args: Vec<String> = env::args().collect();
  let Some(args) = parse_args(&args) else {
    let program = args.first().map(String::as_str).unwrap_or("mincc");
    eprintln!("usage: {program} <source-file> [-o <output>] [--no-div-check]");
    process::exit(1);
  };

  let source = match fs::read_to_string(&args.input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("error: could not read '{}': {err}", args.input);
      process::exit(1);
    }
  };

  let asm = match compile(&source, &args.options) {
    Ok(asm) => asm,
    Err(err) => {
      eprintln!("{}: {}", args.input, err.render(&source));
      process::exit(1);
    }
  };

  match args.output {
    Some(path) => {
      if let Err(err) = fs::write(&path, asm) {
        eprintln!("error: could not write '{path}': {err}");
        process::exit(1);
      }
      debug!(%path, "wrote assembly");
    }
    None => print!("{asm}"),
  }
}
