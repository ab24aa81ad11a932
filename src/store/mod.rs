//! Key-value store layer.
//!
//! All persisted state lives in a shared store offering hash, set, list and
//! scalar primitives:
//! - `MemoryStore` - in-process, per-key atomic, batches applied op by op
//! - `FjallStore` - local LSM-tree storage, batches committed atomically

mod backend;
mod error;
mod fjall;
pub mod keys;
mod memory;
mod value;

pub use backend::KvStore;
pub use error::{Result, StoreError};
pub use fjall::FjallStore;
pub use memory::MemoryStore;
pub use value::{KvOp, ScanCursor, ScanPage, Value};
