//! Generic persistent state management with SQLite+JSONL integration.
//!
//! A `Store<R>` persists any type implementing [`Record`] in a single SQLite
//! table (one row per record, JSON-encoded) mirrored by an append-only JSONL
//! change log under the same base directory. The JSONL log exists purely for
//! crash recovery and offline inspection; SQLite is the source of truth for
//! reads.

mod error;
mod id;
mod record;
mod store;

pub use error::StoreError;
pub use id::now_ms;
pub use record::{Filter, FilterOp, IndexValue, Record};
pub use store::Store;
