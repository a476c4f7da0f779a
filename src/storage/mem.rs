/*!
  In-memory backend. The canonical semantics reference for the storage
  contract and the backend used by tests and single-process hosts.
*/

use std::collections::HashMap;

use tracing::trace;

use crate::context::Context;

use super::{Db, DbError, DbMeta, Dumper, Prefix};

#[derive(Debug, Default)]
pub struct MemDb {
  meta  : DbMeta,
  store : HashMap<Vec<u8>, Vec<u8>>,
}

impl MemDb {
  pub fn new() -> Self {
    MemDb::default()
  }
}

impl Db for MemDb {
  fn connect(&mut self, ctx: &Context, _connection: &str) -> Result<(), DbError> {
    ctx.check()?;
    self.meta.set_connected(true);
    Ok(())
  }

  fn set_prefix(&mut self, prefix: Prefix) {
    self.meta.set_prefix(prefix);
  }

  fn set_session(&mut self, session_id: &str) {
    self.meta.set_session(session_id);
  }

  fn set_lock(&mut self, mask: u8, locked: bool) {
    self.meta.set_lock(mask, locked);
  }

  fn put(&mut self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<(), DbError> {
    ctx.check()?;
    self.meta.check_put()?;
    let typed = self.meta.to_key(key);
    trace!(key = %String::from_utf8_lossy(&typed), size = value.len(), "memdb put");
    self.store.insert(typed, value.to_vec());
    Ok(())
  }

  fn get(&self, ctx: &Context, key: &[u8]) -> Result<Vec<u8>, DbError> {
    ctx.check()?;
    self.meta.check_connected()?;
    let typed = self.meta.to_key(key);
    match self.store.get(&typed) {
      Some(value) => Ok(value.clone()),
      None => Err(DbError::NotFound(typed)),
    }
  }

  fn close(&mut self, ctx: &Context) -> Result<(), DbError> {
    ctx.check()?;
    self.meta.set_connected(false);
    Ok(())
  }

  fn dump(&self, ctx: &Context, key_prefix: &[u8]) -> Result<Dumper, DbError> {
    ctx.check()?;
    self.meta.check_connected()?;
    let entries = self
      .store
      .iter()
      .filter(|(key, _)| key.starts_with(key_prefix))
      .map(|(key, value)| (key.clone(), value.clone()))
      .collect();
    Ok(Dumper::new(entries))
  }
}
