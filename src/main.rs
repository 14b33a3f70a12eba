use clap::Parser;
use env_logger::Env;
use log::info;
use snafu::{ResultExt, Snafu};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use lolcc::{CompileOptions, HookError, JsonSource, ParseSource, SourceError, generate_assembly};

#[derive(Debug, Snafu)]
enum CliError {
  #[snafu(display("{source}"))]
  Load { source: SourceError },

  #[snafu(display("Error in compiling: {source}\nCall stack:\n{}", source.backtrace()))]
  Generate { source: HookError },

  #[snafu(display("could not write {}: {source}", path.display()))]
  Write { path: PathBuf, source: io::Error },
}

impl CliError {
  fn exit_code(&self) -> ExitCode {
    match self {
      CliError::Load { .. } => ExitCode::from(1),
      CliError::Generate { .. } => ExitCode::from(2),
      CliError::Write { .. } => ExitCode::from(3),
    }
  }
}

/// Compile a LOLCODE syntax tree into x86-64 assembly.
#[derive(Debug, Parser)]
#[command(name = "lolcc", version, about)]
struct Cli {
  /// AST document (JSON) to compile
  input: PathBuf,

  /// Report progress
  #[arg(short, long)]
  verbose: bool,

  /// Only load and validate the tree
  #[arg(short = 'C', long)]
  check: bool,

  /// Generate assembly (the default)
  #[arg(short = 'c', long, conflicts_with = "check")]
  compile: bool,

  /// Print the tree before compiling
  #[arg(short, long)]
  print_ast: bool,

  /// Where to write the assembly
  #[arg(short, long, default_value = "out.s")]
  output: PathBuf,

  /// Tag every emitted line with the source line it came from
  #[arg(long)]
  annotate: bool,

  /// Column the --annotate comments start at
  #[arg(long, default_value_t = 40)]
  comment_column: usize,
}

fn run(cli: &Cli) -> Result<(), CliError> {
  let mut program = JsonSource::from_path(&cli.input)
    .and_then(JsonSource::parse)
    .context(LoadSnafu)?;
  info!("valid A.S.T. generated ({} nodes)", program.ast.len());

  if cli.print_ast {
    print!("{}", program.ast.dump(program.root, &program.rules));
  }
  if cli.check && !cli.compile {
    return Ok(());
  }

  let options = CompileOptions {
    source_name: cli.annotate.then(|| cli.input.display().to_string()),
    comment_column: cli.comment_column,
  };
  let asm = generate_assembly(&mut program, &options).context(GenerateSnafu)?;
  fs::write(&cli.output, asm).context(WriteSnafu { path: &cli.output })?;
  info!("assembly written to {}", cli.output.display());
  Ok(())
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  let level = if cli.verbose || cli.check { "info" } else { "warn" };
  env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

  match run(&cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("{err}");
      err.exit_code()
    }
  }
}
