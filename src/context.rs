/*!
  A cancellation and deadline token threaded through every call that may block:
  storage, resource lookups, and entry functions. The token also carries the
  session values those collaborators need (session id, language), so a host can
  hand one context to the whole turn.

  Timeouts are the caller's responsibility; the engine only *checks* the token
  and surfaces `Canceled` without corrupting state.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use thiserror::Error;

/// Error raised when a context token has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation canceled")]
pub struct Canceled;

#[derive(Debug, Clone, Default)]
pub struct Context {
  session_id : Option<String>,
  language   : Option<String>,
  cancelled  : Option<Arc<AtomicBool>>,
  deadline   : Option<Instant>,
}

/// Handle for firing a `Context` from another worker.
#[derive(Debug, Clone)]
pub struct CancelHandle {
  flag: Arc<AtomicBool>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }
}

impl Context {
  /// A context that never fires and carries no session values.
  pub fn background() -> Self {
    Context::default()
  }

  pub fn with_session(mut self, session_id: &str) -> Self {
    self.session_id = Some(session_id.to_string());
    self
  }

  pub fn with_language(mut self, language: &str) -> Self {
    self.language = Some(language.to_string());
    self
  }

  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  /// Makes the context cancellable, returning the handle that fires it.
  pub fn with_cancel(mut self) -> (Self, CancelHandle) {
    let flag = Arc::new(AtomicBool::new(false));
    self.cancelled = Some(flag.clone());
    (self, CancelHandle { flag })
  }

  pub fn session_id(&self) -> Option<&str> {
    self.session_id.as_deref()
  }

  pub fn language(&self) -> Option<&str> {
    self.language.as_deref()
  }

  pub fn done(&self) -> bool {
    if let Some(flag) = &self.cancelled {
      if flag.load(Ordering::SeqCst) {
        return true;
      }
    }
    match self.deadline {
      Some(deadline) => Instant::now() >= deadline,
      None => false,
    }
  }

  /// Checkpoint used on every blocking path.
  pub fn check(&self) -> Result<(), Canceled> {
    match self.done() {
      true => Err(Canceled),
      false => Ok(()),
    }
  }
}
