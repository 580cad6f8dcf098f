//! Datastream Core - capability contract and change-detection engine.
//!
//! Backends answer "what changed since I last looked?" with very different
//! primitives (commit hashes, entity tags, row timestamps). This crate holds
//! what they share: the [`Store`] contract, the [`Record`] data model, the
//! [`Poller`] loop driver and the [`Subscription`] stream it feeds.

pub mod error;
pub mod poller;
pub mod settings;
pub mod sink;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use poller::{spawn_poller, Poller, Subscription};
pub use settings::{PollSettings, DEFAULT_SYNC_INTERVAL};
pub use sink::{error_conduit, ErrorConduit, ErrorReceiver, UpdateSink};
pub use store::{ensure_keys, SharedStore, Store};
pub use types::{Capability, Record};
