/*!
  Scoped key/value cache for loaded content.

  Values live in a stack of frames whose lifecycle follows navigation: a frame
  is pushed when the session descends to a node and popped when it ascends.
  A symbol is defined in at most one frame; the definition closest to the root
  wins and attempts to re-define from an inner frame are refused. Every value
  carries a per-symbol reservation (0 = unbounded for that symbol) and counts
  against a cumulative byte budget.
*/

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  #[error("key {0} already defined in current frame")]
  Dup(String),
  #[error("key {key} already defined in frame {frame}, this is frame {current}")]
  Shadow { key: String, frame: usize, current: usize },
  #[error("value length {len} exceeds value size limit {limit}")]
  Oversize { len: usize, limit: u16 },
  #[error("cache capacity exceeded {would_use} of {capacity}")]
  Capacity { would_use: u32, capacity: u32 },
  #[error("key '{0}' not found in any frame")]
  NotFound(String),
  #[error("already at top level")]
  NoStack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
  /// Total allowed cumulative size of values in the cache. 0 is unbounded.
  cache_size: u32,
  /// Currently used bytes across all frames.
  use_size: u32,
  frames: Vec<IndexMap<String, String>>,
  /// Reservations for all loaded symbols.
  sizes: IndexMap<String, u16>,
  /// Last inserted value regardless of scope. Consumed on read.
  last_value: String,
  #[serde(skip)]
  invalid: bool,
}

impl Default for Cache {
  fn default() -> Self {
    Self::new()
  }
}

impl Cache {
  pub fn new() -> Self {
    Cache {
      cache_size: 0,
      use_size: 0,
      frames: vec![IndexMap::new()],
      sizes: IndexMap::new(),
      last_value: String::new(),
      invalid: false,
    }
  }

  /// Applies a cumulative size limit for all cached values.
  pub fn with_cache_size(mut self, cache_size: u32) -> Self {
    self.cache_size = cache_size;
    self
  }

  pub fn capacity(&self) -> u32 {
    self.cache_size
  }

  pub fn use_size(&self) -> u32 {
    self.use_size
  }

  /// Marks the cache as unusable for persistence. Sticky.
  pub fn invalidate(&mut self) {
    self.invalid = true;
  }

  pub fn invalid(&self) -> bool {
    self.invalid
  }

  /**
    Defines `key` in the current frame.

    Fails with `Dup` if the key is already defined in the current frame and
    `Shadow` if defined in an outer one. A reservation of 0 leaves the symbol
    unbounded; any other reservation caps this value and all later updates.
  */
  pub fn add(&mut self, key: &str, value: &str, reserve: u16) -> Result<(), CacheError> {
    if reserve > 0 && value.len() > reserve as usize {
      return Err(CacheError::Oversize { len: value.len(), limit: reserve });
    }
    let current = self.frames.len() - 1;
    if let Some(frame) = self.frame_of(key) {
      if frame == current {
        return Err(CacheError::Dup(key.to_string()));
      }
      return Err(CacheError::Shadow { key: key.to_string(), frame, current });
    }
    let size = self.charge(value)?;
    debug!(key, size, limit = reserve, "cache add");
    trace!(key, value, "cache add data");
    self.frames[current].insert(key.to_string(), value.to_string());
    self.use_size += size;
    self.sizes.insert(key.to_string(), reserve);
    self.last_value = value.to_string();
    Ok(())
  }

  /**
    Replaces the value of an already-defined symbol in place, wherever it is
    defined. The new value is checked against the recorded reservation and the
    cumulative budget; on failure nothing changes.
  */
  pub fn update(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
    let frame = self
      .frame_of(key)
      .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
    let limit = self.sizes.get(key).copied().unwrap_or(0);
    if limit > 0 && value.len() > limit as usize {
      return Err(CacheError::Oversize { len: value.len(), limit });
    }
    let old_len = self.frames[frame][key].len() as u32;
    let would_use = self.use_size - old_len + value.len() as u32;
    if self.cache_size > 0 && would_use > self.cache_size {
      return Err(CacheError::Capacity { would_use, capacity: self.cache_size });
    }
    self.frames[frame].insert(key.to_string(), value.to_string());
    self.use_size = would_use;
    self.last_value = value.to_string();
    Ok(())
  }

  /// Returns the value from the frame where `key` is defined.
  pub fn get(&self, key: &str) -> Result<&str, CacheError> {
    let frame = self
      .frame_of(key)
      .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
    Ok(self.frames[frame][key].as_str())
  }

  /// The reservation recorded when the symbol was added.
  pub fn reserved_size(&self, key: &str) -> Result<u16, CacheError> {
    self
      .sizes
      .get(key)
      .copied()
      .ok_or_else(|| CacheError::NotFound(key.to_string()))
  }

  /// True when `key` is defined in some frame.
  pub fn contains(&self, key: &str) -> bool {
    self.frame_of(key).is_some()
  }

  pub fn push(&mut self) {
    self.frames.push(IndexMap::new());
  }

  /**
    Drops the top frame, freeing its bytes and reservations. Popping the last
    frame leaves a fresh empty root frame, so a well-formed cache always has
    at least one frame.
  */
  pub fn pop(&mut self) -> Result<(), CacheError> {
    let frame = match self.frames.pop() {
      Some(frame) => frame,
      None => return Err(CacheError::NoStack),
    };
    let level = self.frames.len();
    for (key, value) in &frame {
      let size = value.len();
      self.use_size -= size as u32;
      self.sizes.shift_remove(key);
      debug!(frame = level, key = %key, size, "cache free");
    }
    if self.frames.is_empty() {
      self.frames.push(IndexMap::new());
    }
    Ok(())
  }

  /// Retains only the root frame and recomputes usage from it.
  pub fn reset(&mut self) {
    self.frames.truncate(1);
    let root = &self.frames[0];
    self.sizes.retain(|key, _| root.contains_key(key));
    self.use_size = root.values().map(|v| v.len() as u32).sum();
  }

  /// Returns the most recently inserted value and clears it. Read-once.
  pub fn last(&mut self) -> String {
    std::mem::take(&mut self.last_value)
  }

  pub fn levels(&self) -> usize {
    self.frames.len()
  }

  /// Symbols defined at the given frame level, in insertion order.
  pub fn keys(&self, level: usize) -> Vec<String> {
    match self.frames.get(level) {
      Some(frame) => frame.keys().cloned().collect(),
      None => Vec::new(),
    }
  }

  // 0-indexed frame number where key is defined.
  fn frame_of(&self, key: &str) -> Option<usize> {
    self.frames.iter().position(|frame| frame.contains_key(key))
  }

  // Bytes the value would add; errors if the budget would be exceeded.
  fn charge(&self, value: &str) -> Result<u32, CacheError> {
    let size = value.len() as u32;
    if self.cache_size > 0 && self.use_size + size > self.cache_size {
      return Err(CacheError::Capacity {
        would_use: self.use_size + size,
        capacity: self.cache_size,
      });
    }
    Ok(size)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn used(ca: &Cache) -> u32 {
    ca.frames
      .iter()
      .flat_map(|f| f.values())
      .map(|v| v.len() as u32)
      .sum()
  }

  #[test]
  fn add_get() {
    let mut ca = Cache::new();
    ca.add("who", "world", 8).unwrap();
    assert_eq!(ca.get("who"), Ok("world"));
    assert_eq!(ca.reserved_size("who"), Ok(8));
    assert_eq!(ca.use_size(), 5);
    assert_eq!(used(&ca), ca.use_size());
  }

  #[test]
  fn add_oversize() {
    let mut ca = Cache::new();
    let err = ca.add("who", "overflowing", 8).unwrap_err();
    assert_eq!(err, CacheError::Oversize { len: 11, limit: 8 });
    assert_eq!(ca.use_size(), 0);
  }

  #[test]
  fn add_dup_in_current_frame() {
    let mut ca = Cache::new();
    ca.add("x", "v", 0).unwrap();
    assert_eq!(ca.add("x", "w", 0).unwrap_err(), CacheError::Dup("x".into()));
  }

  #[test]
  fn add_shadowed_from_outer_frame() {
    let mut ca = Cache::new();
    ca.add("x", "v", 0).unwrap();
    ca.push();
    assert_eq!(
      ca.add("x", "w", 0).unwrap_err(),
      CacheError::Shadow { key: "x".into(), frame: 0, current: 1 }
    );
  }

  #[test]
  fn capacity_exact_boundary() {
    let mut ca = Cache::new().with_cache_size(10);
    ca.add("a", "12345", 0).unwrap();
    // exactly at the limit
    ca.add("b", "67890", 0).unwrap();
    assert_eq!(ca.use_size(), 10);
    // one byte over
    let err = ca.add("c", "x", 0).unwrap_err();
    assert_eq!(err, CacheError::Capacity { would_use: 11, capacity: 10 });
    assert_eq!(ca.use_size(), 10);
  }

  #[test]
  fn capacity_refuse_keeps_use_size() {
    let mut ca = Cache::new().with_cache_size(10);
    ca.add("a", "12345", 0).unwrap();
    assert!(ca.add("b", "678901", 0).is_err());
    assert_eq!(ca.use_size(), 5);
    assert!(!ca.contains("b"));
  }

  #[test]
  fn update_respects_reservation() {
    let mut ca = Cache::new();
    ca.add("who", "world", 8).unwrap();
    ca.update("who", "universe").unwrap();
    assert_eq!(ca.get("who"), Ok("universe"));
    let err = ca.update("who", "multiverse").unwrap_err();
    assert_eq!(err, CacheError::Oversize { len: 10, limit: 8 });
    assert_eq!(ca.get("who"), Ok("universe"));
  }

  #[test]
  fn update_capacity_rollback() {
    let mut ca = Cache::new().with_cache_size(8);
    ca.add("a", "1234", 0).unwrap();
    ca.add("b", "123", 0).unwrap();
    let err = ca.update("b", "123456").unwrap_err();
    assert_eq!(err, CacheError::Capacity { would_use: 10, capacity: 8 });
    assert_eq!(ca.get("b"), Ok("123"));
    assert_eq!(ca.use_size(), 7);
    assert_eq!(used(&ca), ca.use_size());
  }

  #[test]
  fn update_updates_outer_frame_in_place() {
    let mut ca = Cache::new();
    ca.add("x", "one", 0).unwrap();
    ca.push();
    ca.update("x", "two").unwrap();
    assert_eq!(ca.get("x"), Ok("two"));
    ca.pop().unwrap();
    assert_eq!(ca.get("x"), Ok("two"));
  }

  #[test]
  fn update_missing() {
    let mut ca = Cache::new();
    assert_eq!(ca.update("nope", "v").unwrap_err(), CacheError::NotFound("nope".into()));
  }

  #[test]
  fn pop_frees_bytes_and_sizes() {
    let mut ca = Cache::new();
    ca.add("a", "aa", 0).unwrap();
    ca.push();
    ca.add("b", "bbb", 4).unwrap();
    assert_eq!(ca.use_size(), 5);
    ca.pop().unwrap();
    assert_eq!(ca.use_size(), 2);
    assert!(ca.reserved_size("b").is_err());
    assert!(ca.contains("a"));
  }

  #[test]
  fn pop_last_frame_recreates_root() {
    let mut ca = Cache::new();
    ca.add("a", "aa", 0).unwrap();
    ca.pop().unwrap();
    assert_eq!(ca.levels(), 1);
    assert_eq!(ca.use_size(), 0);
    assert!(!ca.contains("a"));
    // idempotent reset: popping again still leaves one empty frame
    ca.pop().unwrap();
    assert_eq!(ca.levels(), 1);
  }

  #[test]
  fn reset_retains_root() {
    let mut ca = Cache::new();
    ca.add("a", "aa", 0).unwrap();
    ca.push();
    ca.add("b", "bbb", 0).unwrap();
    ca.push();
    ca.add("c", "c", 0).unwrap();
    ca.reset();
    assert_eq!(ca.levels(), 1);
    assert_eq!(ca.use_size(), 2);
    assert!(ca.contains("a"));
    assert!(!ca.contains("b"));
    assert_eq!(ca.reserved_size("b").unwrap_err(), CacheError::NotFound("b".into()));
  }

  #[test]
  fn last_is_read_once() {
    let mut ca = Cache::new();
    ca.add("a", "aa", 0).unwrap();
    assert_eq!(ca.last(), "aa");
    assert_eq!(ca.last(), "");
  }

  #[test]
  fn keys_and_levels() {
    let mut ca = Cache::new();
    ca.add("a", "1", 0).unwrap();
    ca.add("b", "2", 0).unwrap();
    ca.push();
    ca.add("c", "3", 0).unwrap();
    assert_eq!(ca.levels(), 2);
    assert_eq!(ca.keys(0), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(ca.keys(1), vec!["c".to_string()]);
    assert!(ca.keys(9).is_empty());
  }

  #[test]
  fn invalidate_is_sticky() {
    let mut ca = Cache::new();
    assert!(!ca.invalid());
    ca.invalidate();
    assert!(ca.invalid());
    ca.reset();
    assert!(ca.invalid());
  }
}
