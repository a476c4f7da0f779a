/*!

  A bytecode virtual machine for text-driven menu dialogs: USSD and IVR style
  request/response sessions, chat flows, and other constrained-bandwidth
  front-ends.

  A session advances one *turn* at a time: the host submits the user's input
  bytes, the engine runs the current node's bytecode — loading content through
  entry functions, capturing input, navigating, toggling flags — and renders a
  single output frame bounded by a byte budget. Between turns the whole
  session ({state, cache}) serializes to one CBOR blob in a key/value store,
  so any turn can resume on a different process instance.

  The pieces compose through plain injection: the [`engine::Engine`] owns its
  session's [`state::State`], [`memory::Cache`] and render scratch, and
  borrows a [`resource::Resource`] for templates, bytecode and entry
  functions. Storage backends implement [`storage::Db`] and sit behind the
  [`persist::Persister`] and [`resource::DbResource`].

*/

pub mod bytecode;
pub mod context;
pub mod engine;
pub mod flags;
pub mod memory;
pub mod persist;
pub mod render;
pub mod resource;
pub mod state;
pub mod storage;

pub use context::{CancelHandle, Canceled, Context};
pub use engine::{run_loop, run_persisted, Config, Engine, EngineError};
pub use memory::Cache;
pub use persist::Persister;
pub use resource::{DbResource, EntryResult, MemResource, Resource};
pub use state::State;
