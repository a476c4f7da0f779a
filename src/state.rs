/*!
  Per-session execution state: the node path, the bytecode stack that shadows
  it, engine and user flags, the last submitted input, and the browse page
  position.

  `exec_path` and `code_stack` move in lockstep. `down` appends a node and an
  empty code slot (the engine fills it with the node's bytecode), `up` removes
  one level. The top code slot always holds the *remaining* code for the
  current node, so a halted turn resumes exactly where it stopped.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flags::{
  self, Flag, FlagError, FlagRegistry, FLAG_DIRTY, FLAG_INMATCH, FLAG_LANG, FLAG_TERMINATE,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
  #[error("state is terminated")]
  Terminated,
  #[error("already at root")]
  AtRoot,
  #[error(transparent)]
  Flag(#[from] FlagError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
  flags      : Vec<u8>,
  exec_path  : Vec<String>,
  code_stack : Vec<Vec<u8>>,
  input      : Vec<u8>,
  moves      : u32,
  page       : u16,
  language   : Option<String>,
  user_flags : u32,
  #[serde(skip)]
  invalid    : bool,
}

impl State {
  /// A fresh state with room for `user_flags` user-defined flags on top of
  /// the reserved eight.
  pub fn new(user_flags: u32) -> Self {
    State {
      flags: vec![0; flags::bytes_for(user_flags)],
      exec_path: Vec::new(),
      code_stack: Vec::new(),
      input: Vec::new(),
      moves: 0,
      page: 0,
      language: None,
      user_flags,
      invalid: false,
    }
  }

  /// A fresh state preserving configuration only.
  pub fn clone_empty(&self) -> Self {
    State::new(self.user_flags)
  }

  pub fn user_flags(&self) -> u32 {
    self.user_flags
  }

  // region Flags

  pub fn set_flag(&mut self, flag: Flag) -> Result<bool, StateError> {
    let changed = flags::set_flag(flag, &mut self.flags)?;
    if changed && flag != FLAG_DIRTY {
      let _ = flags::set_flag(FLAG_DIRTY, &mut self.flags)?;
    }
    Ok(changed)
  }

  pub fn reset_flag(&mut self, flag: Flag) -> Result<bool, StateError> {
    let changed = flags::reset_flag(flag, &mut self.flags)?;
    if changed && flag != FLAG_DIRTY {
      let _ = flags::set_flag(FLAG_DIRTY, &mut self.flags)?;
    }
    Ok(changed)
  }

  pub fn get_flag(&self, flag: Flag) -> bool {
    flags::get_flag(flag, &self.flags)
  }

  /// True when the flag's value equals `when_set`.
  pub fn match_flag(&self, flag: Flag, when_set: bool) -> bool {
    flags::get_flag(flag, &self.flags) == when_set
  }

  pub fn flag_bytes(&self) -> &[u8] {
    &self.flags
  }

  // endregion

  // region Navigation

  /**
    Descends to `symbol`: appends it to the path and pushes an empty code slot
    for it. Clears INMATCH so the new node's input comparisons start fresh.
  */
  pub fn down(&mut self, symbol: &str) -> Result<(), StateError> {
    if self.get_flag(FLAG_TERMINATE) {
      return Err(StateError::Terminated);
    }
    self.exec_path.push(symbol.to_string());
    self.code_stack.push(Vec::new());
    self.moves += 1;
    self.page = 0;
    self.reset_flag(FLAG_INMATCH)?;
    let _ = self.set_flag(FLAG_DIRTY)?;
    Ok(())
  }

  /// Ascends one level. The code slot that re-surfaces is the parent's
  /// remainder from when it descended.
  pub fn up(&mut self) -> Result<(), StateError> {
    if self.exec_path.len() <= 1 {
      return Err(StateError::AtRoot);
    }
    self.exec_path.pop();
    self.code_stack.pop();
    self.moves += 1;
    self.page = 0;
    let _ = self.set_flag(FLAG_DIRTY)?;
    Ok(())
  }

  /// Replaces the top path entry without changing depth. Used for catch
  /// branches.
  pub fn jump(&mut self, symbol: &str) -> Result<(), StateError> {
    if self.get_flag(FLAG_TERMINATE) {
      return Err(StateError::Terminated);
    }
    match self.exec_path.last_mut() {
      Some(top) => *top = symbol.to_string(),
      None => self.exec_path.push(symbol.to_string()),
    }
    if self.code_stack.is_empty() {
      self.code_stack.push(Vec::new());
    }
    self.moves += 1;
    self.page = 0;
    let _ = self.set_flag(FLAG_DIRTY)?;
    Ok(())
  }

  /// The current node symbol, or `None` before the session has been entered.
  pub fn top(&self) -> Option<&str> {
    self.exec_path.last().map(String::as_str)
  }

  pub fn path(&self) -> &[String] {
    &self.exec_path
  }

  pub fn depth(&self) -> usize {
    self.exec_path.len()
  }

  pub fn moves(&self) -> u32 {
    self.moves
  }

  // endregion

  // region Code

  /// Replaces the remaining code for the current node.
  pub fn set_code(&mut self, code: Vec<u8>) {
    match self.code_stack.last_mut() {
      Some(top) => *top = code,
      None => self.code_stack.push(code),
    }
  }

  pub fn append_code(&mut self, code: &[u8]) {
    match self.code_stack.last_mut() {
      Some(top) => top.extend_from_slice(code),
      None => self.code_stack.push(code.to_vec()),
    }
  }

  pub fn get_code(&self) -> &[u8] {
    match self.code_stack.last() {
      Some(top) => top,
      None => &[],
    }
  }

  pub fn code_depth(&self) -> usize {
    self.code_stack.len()
  }

  // endregion

  // region Input, paging, language

  pub fn set_input(&mut self, input: &[u8]) -> Result<(), StateError> {
    self.input = input.to_vec();
    let _ = self.set_flag(FLAG_DIRTY)?;
    Ok(())
  }

  pub fn input(&self) -> &[u8] {
    &self.input
  }

  pub fn page(&self) -> u16 {
    self.page
  }

  pub fn next_page(&mut self) {
    self.page += 1;
  }

  pub fn previous_page(&mut self) {
    self.page = self.page.saturating_sub(1);
  }

  pub fn reset_page(&mut self) {
    self.page = 0;
  }

  /// Sets the session language and the LANG flag.
  pub fn set_language(&mut self, tag: &str) -> Result<(), StateError> {
    self.language = Some(tag.to_string());
    let _ = self.set_flag(FLAG_LANG)?;
    Ok(())
  }

  pub fn language(&self) -> Option<&str> {
    self.language.as_deref()
  }

  // endregion

  pub fn invalidate(&mut self) {
    self.invalid = true;
  }

  pub fn invalid(&self) -> bool {
    self.invalid
  }

  /// Diagnostic one-liner in the flag registry's vocabulary.
  pub fn describe(&self, registry: &FlagRegistry) -> String {
    format!(
      "moves: {} flags: {} path: {} lang: {}",
      self.moves,
      registry.as_string(&self.flags, self.user_flags),
      self.exec_path.join("/"),
      self.language.as_deref().unwrap_or("(default)"),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flags::{FLAG_READIN, RESERVED_FLAGS};

  #[test]
  fn down_up_round_trip() {
    let mut st = State::new(0);
    st.down("root").unwrap();
    let before = st.clone();
    st.down("x").unwrap();
    st.up().unwrap();
    assert_eq!(st.path(), before.path());
    assert_eq!(st.code_depth(), before.code_depth());
    assert_eq!(st.moves(), before.moves() + 2);
  }

  #[test]
  fn path_and_code_in_lockstep() {
    let mut st = State::new(0);
    assert_eq!(st.top(), None);
    st.down("root").unwrap();
    st.set_code(vec![1, 2, 3]);
    st.down("sub").unwrap();
    st.set_code(vec![9]);
    assert_eq!(st.depth(), st.code_depth());
    assert_eq!(st.get_code(), &[9]);
    st.up().unwrap();
    assert_eq!(st.get_code(), &[1, 2, 3]);
    assert_eq!(st.top(), Some("root"));
  }

  #[test]
  fn up_at_root_fails() {
    let mut st = State::new(0);
    st.down("root").unwrap();
    assert_eq!(st.up().unwrap_err(), StateError::AtRoot);
  }

  #[test]
  fn down_after_terminate_fails() {
    let mut st = State::new(0);
    st.down("root").unwrap();
    st.set_flag(FLAG_TERMINATE).unwrap();
    assert_eq!(st.down("x").unwrap_err(), StateError::Terminated);
  }

  #[test]
  fn jump_keeps_depth() {
    let mut st = State::new(0);
    st.down("root").unwrap();
    st.down("sub").unwrap();
    st.jump("fail").unwrap();
    assert_eq!(st.path(), &["root".to_string(), "fail".to_string()]);
    assert_eq!(st.depth(), st.code_depth());
  }

  #[test]
  fn mutators_set_dirty() {
    let mut st = State::new(1);
    assert!(!st.get_flag(FLAG_DIRTY));
    st.set_flag(RESERVED_FLAGS).unwrap();
    assert!(st.get_flag(FLAG_DIRTY));

    let mut st = State::new(0);
    st.set_input(b"1").unwrap();
    assert!(st.get_flag(FLAG_DIRTY));
  }

  #[test]
  fn match_flag_polarity() {
    let mut st = State::new(0);
    st.set_flag(FLAG_READIN).unwrap();
    assert!(st.match_flag(FLAG_READIN, true));
    assert!(!st.match_flag(FLAG_READIN, false));
    assert!(st.match_flag(FLAG_TERMINATE, false));
  }

  #[test]
  fn paging() {
    let mut st = State::new(0);
    st.down("root").unwrap();
    st.next_page();
    st.next_page();
    assert_eq!(st.page(), 2);
    st.previous_page();
    assert_eq!(st.page(), 1);
    st.down("sub").unwrap();
    assert_eq!(st.page(), 0);
    st.previous_page();
    assert_eq!(st.page(), 0);
  }

  #[test]
  fn language_sets_flag() {
    let mut st = State::new(0);
    assert!(!st.get_flag(FLAG_LANG));
    st.set_language("nor").unwrap();
    assert_eq!(st.language(), Some("nor"));
    assert!(st.get_flag(FLAG_LANG));
  }

  #[test]
  fn clone_empty_preserves_width() {
    let mut st = State::new(3);
    st.down("root").unwrap();
    st.set_flag(9).unwrap();
    let fresh = st.clone_empty();
    assert_eq!(fresh.user_flags(), 3);
    assert_eq!(fresh.top(), None);
    assert!(!fresh.get_flag(9));
    assert_eq!(fresh.moves(), 0);
  }

  #[test]
  fn describe_format() {
    let mut registry = FlagRegistry::new();
    registry.register(8, "FOO").unwrap();
    let mut st = State::new(1);
    st.down("root").unwrap();
    st.set_flag(8).unwrap();
    let r = st.describe(&registry);
    assert!(r.starts_with("moves: 1 flags: "));
    assert!(r.contains("FOO(8)"));
    assert!(r.contains("INTERNAL_DIRTY(4)"));
    assert!(r.contains("path: root"));
    assert!(r.ends_with("lang: (default)"));
  }
}
