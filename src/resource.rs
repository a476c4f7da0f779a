/*!
  Lookup of everything a node needs by symbol: its template, its bytecode, the
  display strings for menu entries, and the external entry functions LOAD and
  RELOAD invoke.

  Lookups are language-aware: with a language on the context, `sym_<lang>` is
  tried before the bare symbol, so translated templates and menu strings live
  next to the defaults.
*/

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::context::{Canceled, Context};
use crate::flags::Flag;
use crate::storage::{Db, DbError, PREFIX_BIN, PREFIX_MENU, PREFIX_TEMPLATE};

/// What an entry function hands back to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryResult {
  pub content    : String,
  pub flag_set   : Vec<Flag>,
  pub flag_reset : Vec<Flag>,
}

impl EntryResult {
  pub fn content(content: &str) -> Self {
    EntryResult { content: content.to_string(), ..EntryResult::default() }
  }
}

pub type EntryFn =
  Box<dyn Fn(&Context, &str, &[u8]) -> Result<EntryResult, ResourceError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
  #[error("no resource for symbol {0}")]
  NotFound(String),
  #[error("no entry function for symbol {0}")]
  UnknownFunction(String),
  #[error("entry function {symbol} failed: {message}")]
  Entry { symbol: String, message: String },
  #[error("value for {0} is not valid utf-8")]
  BadValue(String),
  #[error(transparent)]
  Db(#[from] DbError),
  #[error(transparent)]
  Canceled(#[from] Canceled),
}

impl ResourceError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, ResourceError::NotFound(_)) || matches!(self, ResourceError::Db(e) if e.is_not_found())
  }
}

pub trait Resource {
  fn get_template(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError>;
  fn get_code(&self, ctx: &Context, symbol: &str) -> Result<Vec<u8>, ResourceError>;

  /// Display string for a menu title symbol. The symbol itself is the
  /// fallback, so untranslated menus work with no menu store at all.
  fn get_menu(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    let _ = ctx;
    Ok(symbol.to_string())
  }

  /// Invokes the entry function registered under `symbol`.
  fn entry(&self, ctx: &Context, symbol: &str, input: &[u8]) -> Result<EntryResult, ResourceError>;
}

impl<T: Resource + ?Sized> Resource for &T {
  fn get_template(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    (**self).get_template(ctx, symbol)
  }

  fn get_code(&self, ctx: &Context, symbol: &str) -> Result<Vec<u8>, ResourceError> {
    (**self).get_code(ctx, symbol)
  }

  fn get_menu(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    (**self).get_menu(ctx, symbol)
  }

  fn entry(&self, ctx: &Context, symbol: &str, input: &[u8]) -> Result<EntryResult, ResourceError> {
    (**self).entry(ctx, symbol, input)
  }
}

// Symbol variants in lookup order for the context language.
fn lang_keys(ctx: &Context, symbol: &str) -> Vec<String> {
  match ctx.language() {
    Some(lang) => vec![format!("{}_{}", symbol, lang), symbol.to_string()],
    None => vec![symbol.to_string()],
  }
}

/**
  Resource provider over in-process tables. Used by tests and by hosts that
  assemble their dialog programmatically.
*/
#[derive(Default)]
pub struct MemResource {
  templates : HashMap<String, String>,
  code      : HashMap<String, Vec<u8>>,
  menus     : HashMap<String, String>,
  funcs     : HashMap<String, EntryFn>,
}

impl MemResource {
  pub fn new() -> Self {
    MemResource::default()
  }

  pub fn add_template(&mut self, symbol: &str, template: &str) {
    self.templates.insert(symbol.to_string(), template.to_string());
  }

  pub fn add_code(&mut self, symbol: &str, code: Vec<u8>) {
    self.code.insert(symbol.to_string(), code);
  }

  pub fn add_menu(&mut self, symbol: &str, title: &str) {
    self.menus.insert(symbol.to_string(), title.to_string());
  }

  pub fn add_local_func<F>(&mut self, symbol: &str, func: F)
  where
    F: Fn(&Context, &str, &[u8]) -> Result<EntryResult, ResourceError> + Send + Sync + 'static,
  {
    self.funcs.insert(symbol.to_string(), Box::new(func));
  }
}

impl Resource for MemResource {
  fn get_template(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    ctx.check()?;
    for key in lang_keys(ctx, symbol) {
      if let Some(template) = self.templates.get(&key) {
        return Ok(template.clone());
      }
    }
    Err(ResourceError::NotFound(symbol.to_string()))
  }

  fn get_code(&self, ctx: &Context, symbol: &str) -> Result<Vec<u8>, ResourceError> {
    ctx.check()?;
    self
      .code
      .get(symbol)
      .cloned()
      .ok_or_else(|| ResourceError::NotFound(symbol.to_string()))
  }

  fn get_menu(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    ctx.check()?;
    for key in lang_keys(ctx, symbol) {
      if let Some(title) = self.menus.get(&key) {
        return Ok(title.clone());
      }
    }
    Ok(symbol.to_string())
  }

  fn entry(&self, ctx: &Context, symbol: &str, input: &[u8]) -> Result<EntryResult, ResourceError> {
    ctx.check()?;
    let func = self
      .funcs
      .get(symbol)
      .ok_or_else(|| ResourceError::UnknownFunction(symbol.to_string()))?;
    func(ctx, symbol, input)
  }
}

/**
  Resource provider over a storage backend: templates under the TEMPLATE
  prefix, bytecode under BIN, menu strings under MENU. Entry functions remain
  in-process. The backend sits behind a mutex because the storage trait
  composes keys through `set_prefix` while resource lookups take `&self` and
  may be shared across sessions.
*/
pub struct DbResource<D: Db> {
  db    : Mutex<D>,
  funcs : HashMap<String, EntryFn>,
}

impl<D: Db> DbResource<D> {
  pub fn new(db: D) -> Self {
    DbResource { db: Mutex::new(db), funcs: HashMap::new() }
  }

  pub fn add_local_func<F>(&mut self, symbol: &str, func: F)
  where
    F: Fn(&Context, &str, &[u8]) -> Result<EntryResult, ResourceError> + Send + Sync + 'static,
  {
    self.funcs.insert(symbol.to_string(), Box::new(func));
  }

  fn fetch(&self, ctx: &Context, prefix: u8, key: &str) -> Result<Vec<u8>, ResourceError> {
    ctx.check()?;
    let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
    db.set_prefix(prefix);
    Ok(db.get(ctx, key.as_bytes())?)
  }

  fn fetch_string(&self, ctx: &Context, prefix: u8, symbol: &str) -> Result<String, ResourceError> {
    for key in lang_keys(ctx, symbol) {
      match self.fetch(ctx, prefix, &key) {
        Ok(value) => {
          return String::from_utf8(value).map_err(|_| ResourceError::BadValue(key));
        }
        Err(e) if e.is_not_found() => continue,
        Err(e) => return Err(e),
      }
    }
    Err(ResourceError::NotFound(symbol.to_string()))
  }
}

impl<D: Db> Resource for DbResource<D> {
  fn get_template(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    self.fetch_string(ctx, PREFIX_TEMPLATE, symbol)
  }

  fn get_code(&self, ctx: &Context, symbol: &str) -> Result<Vec<u8>, ResourceError> {
    self.fetch(ctx, PREFIX_BIN, symbol)
  }

  fn get_menu(&self, ctx: &Context, symbol: &str) -> Result<String, ResourceError> {
    match self.fetch_string(ctx, PREFIX_MENU, symbol) {
      Ok(title) => Ok(title),
      Err(e) if e.is_not_found() => Ok(symbol.to_string()),
      Err(e) => Err(e),
    }
  }

  fn entry(&self, ctx: &Context, symbol: &str, input: &[u8]) -> Result<EntryResult, ResourceError> {
    ctx.check()?;
    let func = self
      .funcs
      .get(symbol)
      .ok_or_else(|| ResourceError::UnknownFunction(symbol.to_string()))?;
    func(ctx, symbol, input)
  }
}
