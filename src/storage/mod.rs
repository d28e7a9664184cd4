//! Storage Module
//!
//! On-disk key→value containers and the bounded pool of open handles.
//!
//! ## Responsibilities
//! - One container file per indexed attribute and per structural index
//! - Bound the number of containers open at once
//! - Block openers when every slot is referenced; evict the least recently
//!   referenced idle handle otherwise
//! - Write back only containers that changed (dirty tracking)
//!
//! ## Layout
//! ```text
//!   {data_dir}/id2entry.ldbm
//!   {data_dir}/dn2id.ldbm
//!   {data_dir}/nextid.ldbm
//!   {data_dir}/{attr}.ldbm
//! ```

mod dbfile;
mod pool;
mod syncer;

pub use dbfile::DbFile;
pub use pool::{DbHandle, DbPool, PoolStats};
pub use syncer::Syncer;

/// File extension for container files
pub const CONTAINER_EXT: &str = "ldbm";

/// How a container is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; a missing file reads as empty
    Reader,
    /// Read-write; a missing file is created
    Writer,
}

impl OpenMode {
    /// Can a handle opened as `self` serve a request for `wanted`?
    pub fn satisfies(self, wanted: OpenMode) -> bool {
        self == OpenMode::Writer || wanted == OpenMode::Reader
    }
}
