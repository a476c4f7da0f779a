/*!
  Interactive driver: runs a dialog authored as a directory of node files
  (`sym` template, `sym.bin` bytecode, `sym.menu` menu strings) over stdin
  and stdout, one line per turn.
*/

use std::io::{self, BufReader};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dialvm::engine::{run_loop, Config, Engine};
use dialvm::resource::DbResource;
use dialvm::storage::{Db, FsDb};
use dialvm::Context;

#[derive(Debug, Parser)]
#[command(name = "dialvm", about = "Run a menu dialog from a script directory")]
struct Args {
  /// Directory holding node templates and bytecode.
  data_dir: String,

  /// Entry point symbol.
  #[arg(long, default_value = "root")]
  root: String,

  /// Session id.
  #[arg(long, default_value = "default")]
  session_id: String,

  /// Max size of output frames. 0 is unbounded.
  #[arg(short = 's', long, default_value_t = 0)]
  output_size: u32,

  /// Number of user flags.
  #[arg(long, default_value_t = 0)]
  flags: u32,

  /// Default language for the session.
  #[arg(long)]
  language: Option<String>,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let args = Args::parse();
  let ctx = Context::background().with_session(&args.session_id);

  let mut store = FsDb::new();
  if let Err(e) = store.connect(&ctx, &args.data_dir) {
    eprintln!("store connect error: {}", e);
    return ExitCode::FAILURE;
  }
  let resource = DbResource::new(store);

  let config = Config {
    root: args.root,
    session_id: args.session_id,
    output_size: args.output_size,
    flag_count: args.flags,
    language: args.language,
    ..Config::default()
  };
  let mut engine = Engine::new(config, resource);

  let mut reader = BufReader::new(io::stdin());
  let mut writer = io::stdout();
  match run_loop(&ctx, &mut engine, &mut reader, &mut writer) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("loop exited with error: {}", e);
      ExitCode::FAILURE
    }
  }
}
