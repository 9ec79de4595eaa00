//! Bundled [`DocumentStore`](niveria_core::DocumentStore) implementations.
//!
//! | Store | Backing | Feature |
//! |-------|---------|---------|
//! | [`MemoryStore`] | process memory, reachability toggle | always |
//! | [`FileStore`] | one JSON file per record | `file-store` (default) |

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "file-store")]
mod file;
#[cfg(feature = "file-store")]
pub use file::FileStore;
