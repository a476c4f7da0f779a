/*!
  Serialization of a session's {state, cache} pair as one CBOR blob, stored
  under the STATE-prefixed session key. The blob carries an explicit version
  tag so future shapes can branch on decode.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::{Canceled, Context};
use crate::flags::FLAG_DIRTY;
use crate::memory::Cache;
use crate::state::State;
use crate::storage::{Db, DbError, PREFIX_STATE};

const PERSIST_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
  #[error("no persisted session under key {0}")]
  NotFound(String),
  #[error("persisted blob for {key} is corrupt: {reason}")]
  Corrupt { key: String, reason: String },
  #[error("encode failed: {0}")]
  Encode(String),
  #[error(transparent)]
  Db(DbError),
  #[error(transparent)]
  Canceled(#[from] Canceled),
}

impl From<DbError> for PersistError {
  fn from(e: DbError) -> Self {
    match e {
      DbError::Canceled(c) => PersistError::Canceled(c),
      other => PersistError::Db(other),
    }
  }
}

#[derive(Serialize)]
struct FreezeV1<'a> {
  version : u16,
  state   : &'a State,
  memory  : &'a Cache,
}

#[derive(Deserialize)]
struct ThawV1 {
  version : u16,
  state   : State,
  memory  : Cache,
}

/// Stores and retrieves session state through a storage backend.
pub struct Persister<D: Db> {
  db    : D,
  flush : bool,
}

impl<D: Db> Persister<D> {
  pub fn new(db: D) -> Self {
    Persister { db, flush: false }
  }

  /// After a successful save, leave the caller's state and memory empty.
  pub fn with_flush(mut self) -> Self {
    self.flush = true;
    self
  }

  pub fn db_mut(&mut self) -> &mut D {
    &mut self.db
  }

  pub fn into_db(self) -> D {
    self.db
  }

  pub fn serialize(state: &State, memory: &Cache) -> Result<Vec<u8>, PersistError> {
    let mut blob = Vec::new();
    ciborium::into_writer(&FreezeV1 { version: PERSIST_VERSION, state, memory }, &mut blob)
      .map_err(|e| PersistError::Encode(e.to_string()))?;
    Ok(blob)
  }

  pub fn deserialize(key: &str, blob: &[u8]) -> Result<(State, Cache), PersistError> {
    let thawed: ThawV1 = ciborium::from_reader(blob).map_err(|e| PersistError::Corrupt {
      key: key.to_string(),
      reason: e.to_string(),
    })?;
    if thawed.version != PERSIST_VERSION {
      return Err(PersistError::Corrupt {
        key: key.to_string(),
        reason: format!("unknown version {}", thawed.version),
      });
    }
    Ok((thawed.state, thawed.memory))
  }

  /**
    Persists state and cache under the session key.

    Panics if either has been invalidated: an invalidated session reaching
    the save path is a caller bug, not a recoverable condition. Clears DIRTY
    on success; with `with_flush()` configured the state and memory are left
    empty afterwards.
  */
  pub fn save(
    &mut self,
    ctx: &Context,
    key: &str,
    state: &mut State,
    memory: &mut Cache,
  ) -> Result<(), PersistError> {
    if state.invalid() || memory.invalid() {
      panic!("persister has been invalidated");
    }
    ctx.check()?;
    let blob = Self::serialize(state, memory)?;
    self.db.set_session(key);
    self.db.set_prefix(PREFIX_STATE);
    info!(key, size = blob.len(), moves = state.moves(), "saving state and cache");
    self.db.put(ctx, key.as_bytes(), &blob)?;
    let _ = state.reset_flag(FLAG_DIRTY);
    if self.flush {
      debug!(key, "state and cache flushed from persister");
      memory.reset();
      let _ = memory.pop();
      *state = state.clone_empty();
    }
    Ok(())
  }

  /// Retrieves the state and cache stored under the session key.
  pub fn load(&mut self, ctx: &Context, key: &str) -> Result<(State, Cache), PersistError> {
    ctx.check()?;
    self.db.set_session(key);
    self.db.set_prefix(PREFIX_STATE);
    let blob = match self.db.get(ctx, key.as_bytes()) {
      Ok(blob) => blob,
      Err(e) if e.is_not_found() => return Err(PersistError::NotFound(key.to_string())),
      Err(e) => return Err(e.into()),
    };
    let (state, memory) = Self::deserialize(key, &blob)?;
    info!(key, moves = state.moves(), "loaded state and cache");
    Ok((state, memory))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemDb;

  fn connected_db() -> MemDb {
    let ctx = Context::background();
    let mut db = MemDb::new();
    db.connect(&ctx, "").unwrap();
    db
  }

  fn populated() -> (State, Cache) {
    let mut st = State::new(2);
    st.down("root").unwrap();
    st.set_code(vec![0x09, 0x07]);
    st.down("sub").unwrap();
    st.set_code(vec![0x09]);
    st.set_flag(9).unwrap();
    st.set_language("nor").unwrap();
    let mut ca = Cache::new().with_cache_size(64);
    ca.add("who", "world", 8).unwrap();
    ca.push();
    ca.add("inner", "value", 0).unwrap();
    (st, ca)
  }

  #[test]
  fn serialize_round_trip_is_identity() {
    let (st, ca) = populated();
    let blob = Persister::<MemDb>::serialize(&st, &ca).unwrap();
    let (st2, ca2) = Persister::<MemDb>::deserialize("k", &blob).unwrap();
    assert_eq!(st2, st);
    assert_eq!(ca2.levels(), ca.levels());
    assert_eq!(ca2.use_size(), ca.use_size());
    assert_eq!(ca2.get("who"), Ok("world"));
    assert_eq!(ca2.get("inner"), Ok("value"));
    assert_eq!(ca2.reserved_size("who"), Ok(8));
    assert_eq!(ca2.capacity(), 64);
  }

  #[test]
  fn save_load_through_backend() {
    let ctx = Context::background();
    let mut pe = Persister::new(connected_db());
    let (mut st, mut ca) = populated();
    pe.save(&ctx, "ses1", &mut st, &mut ca).unwrap();
    // save leaves content in place without flush
    assert_eq!(st.top(), Some("sub"));
    assert!(!st.get_flag(FLAG_DIRTY));

    let (st2, ca2) = pe.load(&ctx, "ses1").unwrap();
    assert_eq!(st2.path(), st.path());
    assert_eq!(ca2.get("inner"), Ok("value"));
  }

  #[test]
  fn load_missing_session() {
    let ctx = Context::background();
    let mut pe = Persister::new(connected_db());
    assert_eq!(
      pe.load(&ctx, "ghost").unwrap_err(),
      PersistError::NotFound("ghost".into())
    );
  }

  #[test]
  fn load_corrupt_blob() {
    let ctx = Context::background();
    let mut db = connected_db();
    db.set_session("ses1");
    db.set_prefix(PREFIX_STATE);
    db.put(&ctx, b"ses1", b"not cbor at all").unwrap();
    let mut pe = Persister::new(db);
    assert!(matches!(
      pe.load(&ctx, "ses1").unwrap_err(),
      PersistError::Corrupt { .. }
    ));
  }

  #[test]
  fn unknown_version_is_corrupt() {
    let (st, ca) = populated();
    let mut blob = Vec::new();
    ciborium::into_writer(&FreezeV1 { version: 9, state: &st, memory: &ca }, &mut blob).unwrap();
    assert!(matches!(
      Persister::<MemDb>::deserialize("k", &blob).unwrap_err(),
      PersistError::Corrupt { .. }
    ));
  }

  #[test]
  fn flush_empties_content() {
    let ctx = Context::background();
    let mut pe = Persister::new(connected_db()).with_flush();
    let (mut st, mut ca) = populated();
    pe.save(&ctx, "ses1", &mut st, &mut ca).unwrap();
    assert_eq!(st.top(), None);
    assert_eq!(st.user_flags(), 2);
    assert_eq!(ca.levels(), 1);
    assert_eq!(ca.use_size(), 0);
    // the stored copy is the pre-flush content
    let (st2, _) = pe.load(&ctx, "ses1").unwrap();
    assert_eq!(st2.top(), Some("sub"));
  }

  #[test]
  #[should_panic(expected = "invalidated")]
  fn save_invalidated_panics() {
    let ctx = Context::background();
    let mut pe = Persister::new(connected_db());
    let (mut st, mut ca) = populated();
    st.invalidate();
    let _ = pe.save(&ctx, "ses1", &mut st, &mut ca);
  }
}
