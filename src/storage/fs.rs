/*!
  Filesystem backend over a script directory. Global types map to the
  conventional node-file layout — `sym` for templates, `sym.bin` for
  bytecode, `sym.menu` for menu strings, `sym.txt` for static data — so a
  dialog authored as a directory of files is consumed directly.
  Session-scoped entries get an encoded filename with a `.db` suffix.
*/

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::trace;

use crate::context::Context;

use super::{
  is_session_scoped, Db, DbError, DbMeta, Dumper, Prefix, PREFIX_BIN, PREFIX_MENU,
  PREFIX_STATICLOAD, PREFIX_TEMPLATE,
};

const ENCODED_SUFFIX: &str = ".db";

#[derive(Debug, Default)]
pub struct FsDb {
  meta : DbMeta,
  dir  : PathBuf,
}

impl FsDb {
  pub fn new() -> Self {
    FsDb::default()
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn file_name(&self, key: &[u8]) -> String {
    let name = std::str::from_utf8(key).ok().filter(|name| path_safe(name));
    match (self.meta.prefix(), name) {
      (prefix, Some(name)) if !is_session_scoped(prefix) => match prefix {
        PREFIX_TEMPLATE => name.to_string(),
        PREFIX_BIN => format!("{}.bin", name),
        PREFIX_MENU => format!("{}.menu", name),
        PREFIX_STATICLOAD => format!("{}.txt", name),
        _ => encoded_name(&self.meta.to_key(key)),
      },
      _ => encoded_name(&self.meta.to_key(key)),
    }
  }

  fn path_for(&self, key: &[u8]) -> PathBuf {
    self.dir.join(self.file_name(key))
  }
}

fn path_safe(name: &str) -> bool {
  !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

fn encoded_name(typed_key: &[u8]) -> String {
  format!("{}{}", URL_SAFE_NO_PAD.encode(typed_key), ENCODED_SUFFIX)
}

// Maps a directory entry back to its typed key, if it is one of ours.
fn typed_key_of(file_name: &str) -> Option<Vec<u8>> {
  if let Some(stem) = file_name.strip_suffix(ENCODED_SUFFIX) {
    return URL_SAFE_NO_PAD.decode(stem).ok();
  }
  let (prefix, stem) = match file_name.rsplit_once('.') {
    Some((stem, "bin")) => (PREFIX_BIN, stem),
    Some((stem, "menu")) => (PREFIX_MENU, stem),
    Some((stem, "txt")) => (PREFIX_STATICLOAD, stem),
    Some(_) => return None,
    None => (PREFIX_TEMPLATE, file_name),
  };
  if !path_safe(stem) {
    return None;
  }
  let mut key = vec![prefix];
  key.extend_from_slice(stem.as_bytes());
  Some(key)
}

impl Db for FsDb {
  fn connect(&mut self, ctx: &Context, connection: &str) -> Result<(), DbError> {
    ctx.check()?;
    fs::create_dir_all(connection).map_err(|e| DbError::Backend(e.to_string()))?;
    self.dir = PathBuf::from(connection);
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
    let path = self.path_for(key);
    trace!(path = %path.display(), size = value.len(), "fsdb put");
    fs::write(&path, value).map_err(|e| DbError::Backend(e.to_string()))
  }

  fn get(&self, ctx: &Context, key: &[u8]) -> Result<Vec<u8>, DbError> {
    ctx.check()?;
    self.meta.check_connected()?;
    let path = self.path_for(key);
    match fs::read(&path) {
      Ok(value) => Ok(value),
      Err(e) if e.kind() == ErrorKind::NotFound => Err(DbError::NotFound(self.meta.to_key(key))),
      Err(e) => Err(DbError::Backend(e.to_string())),
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
    let mut entries = Vec::new();
    let dir = fs::read_dir(&self.dir).map_err(|e| DbError::Backend(e.to_string()))?;
    for entry in dir {
      let entry = entry.map_err(|e| DbError::Backend(e.to_string()))?;
      let file_name = entry.file_name();
      let Some(name) = file_name.to_str() else { continue };
      let Some(typed) = typed_key_of(name) else { continue };
      if !typed.starts_with(key_prefix) {
        continue;
      }
      let value = fs::read(entry.path()).map_err(|e| DbError::Backend(e.to_string()))?;
      entries.push((typed, value));
    }
    Ok(Dumper::new(entries))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{PREFIX_STATE, PREFIX_USERDATA};

  fn scratch_dir(tag: &str) -> String {
    let dir = std::env::temp_dir().join(format!("dialvm-fsdb-{}-{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir.to_string_lossy().into_owned()
  }

  #[test]
  fn template_and_code_layout() {
    let ctx = Context::background();
    let dir = scratch_dir("layout");
    let mut store = FsDb::new();
    store.connect(&ctx, &dir).unwrap();
    store.set_lock(PREFIX_BIN | PREFIX_TEMPLATE, false);

    store.set_prefix(PREFIX_TEMPLATE);
    store.put(&ctx, b"root", b"hello {{.who}}").unwrap();
    assert!(Path::new(&dir).join("root").exists());

    store.set_prefix(PREFIX_BIN);
    store.put(&ctx, b"root", b"\x09").unwrap();
    assert!(Path::new(&dir).join("root.bin").exists());

    assert_eq!(store.get(&ctx, b"root").unwrap(), b"\x09");
    store.set_prefix(PREFIX_TEMPLATE);
    assert_eq!(store.get(&ctx, b"root").unwrap(), b"hello {{.who}}");
  }

  #[test]
  fn missing_key_is_not_found() {
    let ctx = Context::background();
    let dir = scratch_dir("missing");
    let mut store = FsDb::new();
    store.connect(&ctx, &dir).unwrap();
    store.set_prefix(PREFIX_TEMPLATE);
    assert!(store.get(&ctx, b"ghost").unwrap_err().is_not_found());
  }

  #[test]
  fn session_entries_round_trip() {
    let ctx = Context::background();
    let dir = scratch_dir("session");
    let mut store = FsDb::new();
    store.connect(&ctx, &dir).unwrap();
    store.set_prefix(PREFIX_STATE);
    store.set_session("ses1");
    store.put(&ctx, b"ses1", b"blob").unwrap();
    assert_eq!(store.get(&ctx, b"ses1").unwrap(), b"blob");

    store.set_session("ses2");
    assert!(store.get(&ctx, b"ses1").unwrap_err().is_not_found());
  }

  #[test]
  fn dump_reconstructs_typed_keys() {
    let ctx = Context::background();
    let dir = scratch_dir("dump");
    let mut store = FsDb::new();
    store.connect(&ctx, &dir).unwrap();
    store.set_lock(PREFIX_TEMPLATE, false);
    store.set_prefix(PREFIX_TEMPLATE);
    store.put(&ctx, b"root", b"t").unwrap();
    store.set_prefix(PREFIX_USERDATA);
    store.set_session("ses");
    store.put(&ctx, b"k", b"v").unwrap();

    let entries: Vec<(Vec<u8>, Vec<u8>)> = store.dump(&ctx, b"").unwrap().collect();
    assert_eq!(entries.len(), 2);
    assert!(entries.contains(&(b"\x02root".to_vec(), b"t".to_vec())));
    assert!(entries.contains(&(b"\x20ses.k".to_vec(), b"v".to_vec())));
  }
}
