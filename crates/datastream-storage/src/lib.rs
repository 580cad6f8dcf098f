//! Datastream Storage - concrete backends for the datastream contract.
//!
//! Each backend detects change with the primitive its storage offers:
//!
//! - [`git`]: HEAD commit id, then per-file blob hashes
//! - [`object`]: per-object entity tags from metadata-only requests
//! - [`relational`]: a single `updated_at` watermark per subscription
//!
//! [`Backend`] wraps them in one closed enum for callers that pick a
//! backend at runtime.

pub mod backend;
pub mod git;
pub mod object;
pub mod relational;

pub use backend::Backend;
pub use git::{GitConfig, GitStore};
pub use object::{BucketStore, ObjectStoreConfig};
#[cfg(feature = "postgres")]
pub use relational::PostgresTable;
pub use relational::{RelationalConfig, RelationalStore, SqliteTable, TableDriver};
