/*!
  The dialog virtual machine: executes the current node's bytecode against the
  session state and cache, drives navigation, and renders one output frame per
  turn.

  One `exec` + `flush` pair is a turn. The engine owns the state, cache and
  render scratch for its session and borrows nothing back from them; the
  resource provider and any storage backend are injected. A session is
  single-worker: `exec` takes `&mut self`, so concurrent turns on one session
  do not compile.
*/

use std::io::{BufRead, Write};

use tracing::{debug, trace, warn};

use crate::bytecode::{decode_instruction, CodeError, Instruction};
use crate::context::{Canceled, Context};
use crate::flags::{
  Flag, FlagError, FLAG_INMATCH, FLAG_LOADFAIL, FLAG_READIN, FLAG_TERMINATE, RESERVED_FLAGS,
};
use crate::memory::{Cache, CacheError};
use crate::persist::{PersistError, Persister};
use crate::render::{Page, RenderError, Sizer};
use crate::resource::{EntryResult, Resource, ResourceError};
use crate::state::{State, StateError};
use crate::storage::Db;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Code(#[from] CodeError),
  #[error(transparent)]
  State(#[from] StateError),
  #[error(transparent)]
  Memory(#[from] CacheError),
  #[error(transparent)]
  Render(#[from] RenderError),
  #[error(transparent)]
  Resource(#[from] ResourceError),
  #[error(transparent)]
  Persist(#[from] PersistError),
  #[error(transparent)]
  Flag(#[from] FlagError),
  #[error(transparent)]
  Canceled(#[from] Canceled),
  #[error("flag {0} is reserved and cannot be set from bytecode")]
  ReservedFlag(Flag),
  #[error("node {0} ran out of code")]
  NoCode(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Engine configuration for one session.
#[derive(Debug, Clone)]
pub struct Config {
  /// Entry node symbol.
  pub root           : String,
  pub session_id     : String,
  /// Output byte budget per frame. 0 leaves sizing to MSIZE or unbounded.
  pub output_size    : u32,
  /// Number of user flags on top of the reserved eight.
  pub flag_count     : u32,
  /// Cumulative cache budget. 0 is unbounded.
  pub cache_size     : u32,
  pub menu_separator : Option<String>,
  /// Default language applied to fresh sessions.
  pub language       : Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      root: "root".to_string(),
      session_id: "default".to_string(),
      output_size: 0,
      flag_count: 0,
      cache_size: 0,
      menu_separator: None,
      language: None,
    }
  }
}

// What a single opcode tells the interpreter loop to do next.
enum Flow {
  Continue,
  Halt,
  Terminate,
}

pub struct Engine<R: Resource> {
  config   : Config,
  resource : R,
  state    : State,
  memory   : Cache,
  render   : Page,
}

impl<R: Resource> Engine<R> {
  pub fn new(config: Config, resource: R) -> Self {
    let state = State::new(config.flag_count);
    let memory = Cache::new().with_cache_size(config.cache_size);
    let mut render = Page::new();
    if let Some(separator) = &config.menu_separator {
      render.menu_mut().set_separator(separator);
    }
    Engine { config, resource, state, memory, render }
  }

  /// Replaces the session state, e.g. with one loaded by a persister.
  pub fn with_state(mut self, state: State) -> Self {
    self.state = state;
    self
  }

  /// Replaces the session cache, e.g. with one loaded by a persister.
  pub fn with_memory(mut self, memory: Cache) -> Self {
    self.memory = memory;
    self
  }

  pub fn state(&self) -> &State {
    &self.state
  }

  pub fn memory(&self) -> &Cache {
    &self.memory
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Surrenders the session content, e.g. for persisting.
  pub fn into_parts(self) -> (State, Cache) {
    (self.state, self.memory)
  }

  // region Turn execution

  /**
    Runs one turn against `input`. Returns `true` when the session expects
    further turns and `false` when it has terminated.

    A turn executes the remaining bytecode of the current node (entering the
    root first on a fresh session) until a HALT suspends it for input, a
    terminating condition ends it, or the code runs out. Exhausted code with a
    non-empty path re-enters the current node once, which is what re-renders a
    menu after unmatched input.
  */
  pub fn exec(&mut self, ctx: &Context, input: &[u8]) -> Result<bool, EngineError> {
    ctx.check()?;
    if self.state.get_flag(FLAG_TERMINATE) {
      return Ok(false);
    }

    self.render.reset();
    if self.config.output_size > 0 {
      self.render.set_sizer(Some(Sizer::new(self.config.output_size)));
    }

    self.state.set_input(input)?;
    self.state.reset_flag(FLAG_INMATCH)?;
    self.state.reset_flag(FLAG_LOADFAIL)?;
    self.state.reset_flag(FLAG_READIN)?;

    if self.state.depth() == 0 {
      if let Some(language) = self.config.language.clone() {
        self.state.set_language(&language)?;
      }
      let root = self.config.root.clone();
      debug!(node = %root, session = %self.config.session_id, "session start");
      self.descend(ctx, &root)?;
    }

    let mut reentered = false;
    loop {
      ctx.check()?;
      let code = self.state.get_code().to_vec();
      if code.is_empty() {
        if self.state.get_flag(FLAG_TERMINATE) || self.state.depth() == 0 {
          return Ok(false);
        }
        let symbol = match self.state.top() {
          Some(symbol) => symbol.to_string(),
          None => return Ok(false),
        };
        if reentered {
          return Err(EngineError::NoCode(symbol));
        }
        reentered = true;
        debug!(node = %symbol, "code exhausted, re-entering");
        self.reenter(ctx)?;
        continue;
      }

      let (instruction, rest) = decode_instruction(&code)?;
      self.state.set_code(rest.to_vec());
      trace!(%instruction, "step");
      match self.step(ctx, &instruction)? {
        Flow::Continue => {}
        Flow::Halt => {
          self.state.set_flag(FLAG_READIN)?;
          return Ok(true);
        }
        Flow::Terminate => {
          self.state.set_flag(FLAG_TERMINATE)?;
          self.state.set_code(Vec::new());
          return Ok(false);
        }
      }
    }
  }

  fn step(&mut self, ctx: &Context, instruction: &Instruction) -> Result<Flow, EngineError> {
    match instruction {
      Instruction::Catch { target, flag, invert } => {
        if self.state.match_flag(*flag, !invert) {
          debug!(node = %target, flag, "catch");
          self.jump(ctx, target)?;
        }
        Ok(Flow::Continue)
      }

      Instruction::Croak { flag, invert } => match self.state.match_flag(*flag, !invert) {
        true => Ok(Flow::Terminate),
        false => Ok(Flow::Continue),
      },

      Instruction::Load { symbol, reserve } => {
        // re-execution of a node must not re-invoke completed loads
        if !self.memory.contains(symbol) {
          self.load(ctx, symbol, *reserve as u16)?;
        }
        Ok(Flow::Continue)
      }

      Instruction::Reload { symbol } => {
        self.reload(ctx, symbol)?;
        Ok(Flow::Continue)
      }

      Instruction::Map { symbol } => {
        self.render.map(&self.memory, symbol)?;
        Ok(Flow::Continue)
      }

      Instruction::Move { target } => self.apply_target(ctx, target),

      Instruction::Back => {
        self.ascend(ctx)?;
        Ok(Flow::Continue)
      }

      Instruction::InCmp { selector, target } => {
        // at most one match per turn; first match wins
        if self.state.get_flag(FLAG_INMATCH) {
          return Ok(Flow::Continue);
        }
        if selector != "*" && selector.as_bytes() != self.state.input() {
          return Ok(Flow::Continue);
        }
        self.state.set_flag(FLAG_INMATCH)?;
        debug!(selector = %selector, target = %target, "input match");
        self.apply_target(ctx, target)
      }

      Instruction::Halt => Ok(Flow::Halt),

      Instruction::MSize { min, max } => {
        if self.config.output_size == 0 {
          self.render.set_sizer(Some(Sizer::new(*max).with_min_size(*min)));
        }
        Ok(Flow::Continue)
      }

      Instruction::MOut { choice, title } => {
        let title = self.resource.get_menu(&self.call_ctx(ctx), title)?;
        self.render.menu_mut().put(choice, &title);
        Ok(Flow::Continue)
      }

      Instruction::MNext { choice, title } => {
        let title = self.resource.get_menu(&self.call_ctx(ctx), title)?;
        self.render.menu_mut().set_browse_next(choice, &title);
        Ok(Flow::Continue)
      }

      Instruction::MPrev { choice, title } => {
        let title = self.resource.get_menu(&self.call_ctx(ctx), title)?;
        self.render.menu_mut().set_browse_previous(choice, &title);
        Ok(Flow::Continue)
      }

      Instruction::SetF { flag } => {
        if *flag < RESERVED_FLAGS {
          return Err(EngineError::ReservedFlag(*flag));
        }
        self.state.set_flag(*flag)?;
        Ok(Flow::Continue)
      }

      Instruction::ResetF { flag } => {
        if *flag < RESERVED_FLAGS {
          return Err(EngineError::ReservedFlag(*flag));
        }
        self.state.reset_flag(*flag)?;
        Ok(Flow::Continue)
      }

      Instruction::Lang { tag } => {
        self.state.set_language(tag)?;
        Ok(Flow::Continue)
      }
    }
  }

  // Shared by MOVE, INCMP and the browse selectors.
  fn apply_target(&mut self, ctx: &Context, target: &str) -> Result<Flow, EngineError> {
    match target {
      "_" => {
        self.ascend(ctx)?;
        Ok(Flow::Continue)
      }
      "^" => Ok(Flow::Terminate),
      ">" => {
        self.state.next_page();
        self.reenter(ctx)?;
        Ok(Flow::Continue)
      }
      "<" => {
        self.state.previous_page();
        self.reenter(ctx)?;
        Ok(Flow::Continue)
      }
      "." => {
        self.reenter(ctx)?;
        Ok(Flow::Continue)
      }
      symbol => {
        self.descend(ctx, symbol)?;
        Ok(Flow::Continue)
      }
    }
  }

  fn descend(&mut self, ctx: &Context, symbol: &str) -> Result<(), EngineError> {
    let code = self.resource.get_code(&self.call_ctx(ctx), symbol)?;
    self.state.down(symbol)?;
    self.memory.push();
    self.state.set_code(code);
    Ok(())
  }

  // Ascends one level and re-enters the parent so its frame renders afresh.
  // The parent's stored remainder is already exhausted by the time a child
  // navigates back, so fresh node code replaces it.
  fn ascend(&mut self, ctx: &Context) -> Result<(), EngineError> {
    self.state.up()?;
    self.memory.pop()?;
    self.reenter(ctx)?;
    Ok(())
  }

  // Catch branch: replace the current node without growing the path, and
  // recycle its cache frame.
  fn jump(&mut self, ctx: &Context, symbol: &str) -> Result<(), EngineError> {
    let code = self.resource.get_code(&self.call_ctx(ctx), symbol)?;
    self.state.jump(symbol)?;
    self.memory.pop()?;
    self.memory.push();
    self.state.set_code(code);
    Ok(())
  }

  // Refills the current node's code slot from the resource.
  fn reenter(&mut self, ctx: &Context) -> Result<(), EngineError> {
    let symbol = match self.state.top() {
      Some(symbol) => symbol.to_string(),
      None => return Ok(()),
    };
    let code = self.resource.get_code(&self.call_ctx(ctx), &symbol)?;
    self.state.set_code(code);
    Ok(())
  }

  fn load(&mut self, ctx: &Context, symbol: &str, reserve: u16) -> Result<(), EngineError> {
    let input = self.state.input().to_vec();
    match self.resource.entry(&self.call_ctx(ctx), symbol, &input) {
      Ok(result) => {
        self.memory.add(symbol, &result.content, reserve)?;
        self.apply_result_flags(&result)?;
      }
      Err(ResourceError::Canceled(c)) => return Err(c.into()),
      Err(e) => {
        warn!(symbol, error = %e, "load failed");
        self.state.set_flag(FLAG_LOADFAIL)?;
      }
    }
    Ok(())
  }

  fn reload(&mut self, ctx: &Context, symbol: &str) -> Result<(), EngineError> {
    let input = self.state.input().to_vec();
    match self.resource.entry(&self.call_ctx(ctx), symbol, &input) {
      Ok(result) => {
        self.memory.update(symbol, &result.content)?;
        self.apply_result_flags(&result)?;
      }
      Err(ResourceError::Canceled(c)) => return Err(c.into()),
      Err(e) => {
        warn!(symbol, error = %e, "reload failed");
        self.state.set_flag(FLAG_LOADFAIL)?;
      }
    }
    Ok(())
  }

  // Entry functions may toggle user flags; reserved indices are refused.
  fn apply_result_flags(&mut self, result: &EntryResult) -> Result<(), EngineError> {
    for &flag in &result.flag_set {
      match flag < RESERVED_FLAGS {
        true => warn!(flag, "entry result tried to set reserved flag"),
        false => {
          self.state.set_flag(flag)?;
        }
      }
    }
    for &flag in &result.flag_reset {
      match flag < RESERVED_FLAGS {
        true => warn!(flag, "entry result tried to reset reserved flag"),
        false => {
          self.state.reset_flag(flag)?;
        }
      }
    }
    Ok(())
  }

  // Attaches session id and language to the context handed to collaborators.
  fn call_ctx(&self, ctx: &Context) -> Context {
    let mut call = ctx.clone();
    if call.session_id().is_none() {
      call = call.with_session(&self.config.session_id);
    }
    if call.language().is_none() {
      if let Some(language) = self.state.language() {
        call = call.with_language(language);
      }
    }
    call
  }

  // endregion

  /**
    Renders the current frame to `writer` and returns the byte count written.
    A node without a template renders as menu (and sink) only.
  */
  pub fn flush<W: Write>(&mut self, ctx: &Context, writer: &mut W) -> Result<usize, EngineError> {
    ctx.check()?;
    let symbol = match self.state.top() {
      Some(symbol) => symbol.to_string(),
      None => return Ok(0),
    };
    let template = match self.resource.get_template(&self.call_ctx(ctx), &symbol) {
      Ok(template) => template,
      Err(e) if e.is_not_found() => String::new(),
      Err(e) => return Err(e.into()),
    };
    let frame = self.render.render(&self.memory, &template, self.state.page())?;
    writer.write_all(frame.as_bytes())?;
    Ok(frame.len())
  }
}

/**
  Line-based interactive driver: renders the first frame, then feeds one line
  of input per turn until the engine reports no continuation or the reader
  runs dry.
*/
pub fn run_loop<R: Resource, I: BufRead, W: Write>(
  ctx: &Context,
  engine: &mut Engine<R>,
  reader: &mut I,
  writer: &mut W,
) -> Result<(), EngineError> {
  let mut running = engine.exec(ctx, b"")?;
  engine.flush(ctx, writer)?;
  writer.write_all(b"\n")?;
  writer.flush()?;
  while running {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
      break;
    }
    let input = line.trim_end_matches(['\n', '\r']);
    running = engine.exec(ctx, input.as_bytes())?;
    engine.flush(ctx, writer)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
  }
  Ok(())
}

/**
  Runs one persisted turn: loads {state, cache} for the configured session
  (a missing key starts a fresh session), executes the input, renders to
  `writer`, and saves. This is the entry point for hosts that hop processes
  between turns.
*/
pub fn run_persisted<R: Resource, D: Db, W: Write>(
  ctx: &Context,
  config: Config,
  resource: R,
  persister: &mut Persister<D>,
  input: &[u8],
  writer: &mut W,
) -> Result<bool, EngineError> {
  let session_id = config.session_id.clone();
  let (state, memory) = match persister.load(ctx, &session_id) {
    Ok(parts) => parts,
    Err(PersistError::NotFound(_)) => (
      State::new(config.flag_count),
      Cache::new().with_cache_size(config.cache_size),
    ),
    Err(e) => return Err(e.into()),
  };
  let mut engine = Engine::new(config, resource)
    .with_state(state)
    .with_memory(memory);
  let running = engine.exec(ctx, input)?;
  engine.flush(ctx, writer)?;
  let (mut state, mut memory) = engine.into_parts();
  if !running {
    // a terminated session resumes from the top on its next turn
    state = state.clone_empty();
    memory.reset();
    let _ = memory.pop();
  }
  persister.save(ctx, &session_id, &mut state, &mut memory)?;
  Ok(running)
}
