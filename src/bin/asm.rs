/*!
  Assembler CLI: reads textual assembly, writes bytecode. Symbolic flag names
  in CATCH/CROAK/SETF/RESETF resolve through an optional CSV flag spec of
  `name,index[,description]` lines.
*/

use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;

use dialvm::bytecode::{assemble, disassemble, FlagSpec};

#[derive(Debug, Parser)]
#[command(name = "dialvm-asm", about = "Assemble dialog node bytecode")]
struct Args {
  /// Assembly source file.
  input: String,

  /// Flag spec CSV for symbolic flag names.
  #[arg(short = 'f', long)]
  flags: Option<String>,

  /// Write bytecode here instead of stdout.
  #[arg(short = 'o', long)]
  output: Option<String>,

  /// Disassemble a bytecode file back to assembly text.
  #[arg(short = 'd', long)]
  disassemble: bool,
}

fn run(args: &Args) -> Result<(), String> {
  if args.disassemble {
    let code = fs::read(&args.input).map_err(|e| format!("read error: {}", e))?;
    let text = disassemble(&code).map_err(|e| format!("disassemble error: {}", e))?;
    print!("{}", text);
    return Ok(());
  }

  let source = fs::read_to_string(&args.input).map_err(|e| format!("read error: {}", e))?;
  let spec = match &args.flags {
    Some(path) => {
      let csv = fs::read_to_string(path).map_err(|e| format!("flag spec read error: {}", e))?;
      let mut spec = FlagSpec::new();
      spec
        .load_csv(&csv)
        .map_err(|e| format!("flag spec error: {}", e))?;
      Some(spec)
    }
    None => None,
  };

  let code = assemble(&source, spec.as_ref()).map_err(|e| format!("parse error: {}", e))?;
  match &args.output {
    Some(path) => fs::write(path, &code).map_err(|e| format!("write error: {}", e))?,
    None => {
      io::stdout()
        .write_all(&code)
        .map_err(|e| format!("write error: {}", e))?;
    }
  }
  Ok(())
}

fn main() -> ExitCode {
  let args = Args::parse();
  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(message) => {
      eprintln!("{}", message);
      ExitCode::FAILURE
    }
  }
}
