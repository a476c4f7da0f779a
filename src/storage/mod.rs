/*!

  Key/value storage consumed by the runtime. Keys are typed: the first byte is
  a prefix naming what the value is (bytecode, template, menu, persisted
  state, application data), and session-scoped types splice the session id in
  front of the raw key. Prefix values are bit positions so they compose into
  the lock mask that guards the code-like types against accidental writes.

*/

mod fs;
mod mem;

pub use fs::FsDb;
pub use mem::MemDb;

use thiserror::Error;

use crate::context::{Canceled, Context};

pub type Prefix = u8;

pub const PREFIX_UNKNOWN: Prefix = 0x00;
pub const PREFIX_BIN: Prefix = 0x01;
pub const PREFIX_TEMPLATE: Prefix = 0x02;
pub const PREFIX_MENU: Prefix = 0x04;
pub const PREFIX_STATICLOAD: Prefix = 0x08;
pub const PREFIX_STATE: Prefix = 0x10;
pub const PREFIX_USERDATA: Prefix = 0x20;

/// Code-like types refuse writes unless explicitly unlocked.
pub const LOCKED_BY_DEFAULT: u8 =
  PREFIX_BIN | PREFIX_TEMPLATE | PREFIX_MENU | PREFIX_STATICLOAD;

/// Session-scoped types carry `session || '.'` between prefix and raw key.
pub fn is_session_scoped(prefix: Prefix) -> bool {
  prefix == PREFIX_STATE || prefix == PREFIX_USERDATA
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
  #[error("key not found: {}", String::from_utf8_lossy(.0))]
  NotFound(Vec<u8>),
  #[error("store type 0x{0:02x} is locked for writing")]
  UnsafePut(Prefix),
  #[error("not connected")]
  NoConnection,
  #[error("backend error: {0}")]
  Backend(String),
  #[error(transparent)]
  Canceled(#[from] Canceled),
}

impl DbError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, DbError::NotFound(_))
  }
}

/**
  Storage contract. `set_prefix` and `set_session` select how subsequent keys
  are composed; `set_lock` guards whole types against writes. All blocking
  operations take the context token.
*/
pub trait Db {
  fn connect(&mut self, ctx: &Context, connection: &str) -> Result<(), DbError>;
  fn set_prefix(&mut self, prefix: Prefix);
  fn set_session(&mut self, session_id: &str);
  fn set_lock(&mut self, mask: u8, locked: bool);
  fn put(&mut self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<(), DbError>;
  fn get(&self, ctx: &Context, key: &[u8]) -> Result<Vec<u8>, DbError>;
  fn close(&mut self, ctx: &Context) -> Result<(), DbError>;
  fn dump(&self, ctx: &Context, key_prefix: &[u8]) -> Result<Dumper, DbError>;
}

/// Snapshot iterator over matching entries, ordered by typed key.
#[derive(Debug, Default)]
pub struct Dumper {
  entries: std::collections::VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl Dumper {
  pub fn new(mut entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
    entries.sort();
    Dumper { entries: entries.into() }
  }

  pub fn next_entry(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
    self.entries.pop_front()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl Iterator for Dumper {
  type Item = (Vec<u8>, Vec<u8>);

  fn next(&mut self) -> Option<Self::Item> {
    self.next_entry()
  }
}

/// Shared prefix/session/lock bookkeeping embedded by every backend.
#[derive(Debug, Clone)]
pub struct DbMeta {
  prefix    : Prefix,
  session   : String,
  locks     : u8,
  connected : bool,
}

impl Default for DbMeta {
  fn default() -> Self {
    DbMeta {
      prefix: PREFIX_UNKNOWN,
      session: String::new(),
      locks: LOCKED_BY_DEFAULT,
      connected: false,
    }
  }
}

impl DbMeta {
  pub fn new() -> Self {
    DbMeta::default()
  }

  pub fn set_prefix(&mut self, prefix: Prefix) {
    self.prefix = prefix;
  }

  pub fn prefix(&self) -> Prefix {
    self.prefix
  }

  pub fn set_session(&mut self, session_id: &str) {
    self.session = session_id.to_string();
  }

  pub fn session(&self) -> &str {
    &self.session
  }

  pub fn set_lock(&mut self, mask: u8, locked: bool) {
    match locked {
      true => self.locks |= mask,
      false => self.locks &= !mask,
    }
  }

  pub fn set_connected(&mut self, connected: bool) {
    self.connected = connected;
  }

  pub fn check_connected(&self) -> Result<(), DbError> {
    match self.connected {
      true => Ok(()),
      false => Err(DbError::NoConnection),
    }
  }

  pub fn check_put(&self) -> Result<(), DbError> {
    self.check_connected()?;
    if self.locks & self.prefix != 0 {
      return Err(DbError::UnsafePut(self.prefix));
    }
    Ok(())
  }

  /// Composes the typed key for the current prefix and session.
  pub fn to_key(&self, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + self.session.len() + 2);
    out.push(self.prefix);
    if is_session_scoped(self.prefix) {
      out.extend_from_slice(self.session.as_bytes());
      out.push(b'.');
    }
    out.extend_from_slice(key);
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn typed_key_composition() {
    let mut meta = DbMeta::new();
    meta.set_prefix(PREFIX_TEMPLATE);
    meta.set_session("ses");
    assert_eq!(meta.to_key(b"root"), b"\x02root".to_vec());

    meta.set_prefix(PREFIX_USERDATA);
    assert_eq!(meta.to_key(b"foo"), b"\x20ses.foo".to_vec());

    meta.set_prefix(PREFIX_STATE);
    assert_eq!(meta.to_key(b"ses"), b"\x10ses.ses".to_vec());
  }

  #[test]
  fn locks_guard_code_types() {
    let mut meta = DbMeta::new();
    meta.set_connected(true);
    meta.set_prefix(PREFIX_BIN);
    assert_eq!(meta.check_put(), Err(DbError::UnsafePut(PREFIX_BIN)));
    meta.set_lock(PREFIX_BIN, false);
    assert!(meta.check_put().is_ok());
    meta.set_lock(PREFIX_BIN, true);
    assert!(meta.check_put().is_err());
  }

  #[test]
  fn user_types_writable_by_default() {
    let mut meta = DbMeta::new();
    meta.set_connected(true);
    for prefix in [PREFIX_STATE, PREFIX_USERDATA, PREFIX_UNKNOWN] {
      meta.set_prefix(prefix);
      assert!(meta.check_put().is_ok(), "prefix 0x{:02x}", prefix);
    }
  }

  #[test]
  fn not_connected() {
    let meta = DbMeta::new();
    assert_eq!(meta.check_connected(), Err(DbError::NoConnection));
  }

  #[test]
  fn dumper_orders_entries() {
    let mut dump = Dumper::new(vec![
      (b"b".to_vec(), b"2".to_vec()),
      (b"a".to_vec(), b"1".to_vec()),
    ]);
    assert_eq!(dump.len(), 2);
    assert_eq!(dump.next_entry(), Some((b"a".to_vec(), b"1".to_vec())));
    assert_eq!(dump.next_entry(), Some((b"b".to_vec(), b"2".to_vec())));
    assert_eq!(dump.next_entry(), None);
  }
}
