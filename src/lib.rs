//! # ldbm
//!
//! The indexed storage engine of a directory-server backend:
//! - Block-split sorted ID lists with an ALLIDS sentinel
//! - Per-attribute presence/equality/approximate/substring indexes
//! - A DN index answering base/one-level/subtree scopes
//! - A bounded, reference-counted entry cache with an explicit lifecycle
//! - A bounded pool of open containers with blocking admission
//! - A filter compiler producing candidate ID lists from the indexes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Backend                             │
//! │        (giant RwLock: shared reads, exclusive writes)       │
//! └──────┬───────────────────┬────────────────────┬─────────────┘
//!        │                   │                    │
//!        ▼                   ▼                    ▼
//! ┌─────────────┐    ┌──────────────┐     ┌──────────────┐
//! │   Filter    │    │  Entry Cache │     │   id2entry   │
//! │  compiler   │    │ (LRU, states)│     │   records    │
//! └──────┬──────┘    └──────────────┘     └──────┬───────┘
//!        │                                       │
//!        ▼                                       │
//! ┌─────────────┐    ┌──────────────┐            │
//! │  Attribute  │    │   DN index   │            │
//! │   indexes   │    │ (scope keys) │            │
//! └──────┬──────┘    └──────┬───────┘            │
//!        │    IDL store     │                    │
//!        └────────┬─────────┘                    │
//!                 ▼                              ▼
//!        ┌──────────────────────────────────────────┐
//!        │   Handle pool → containers on disk       │
//!        │   (background syncer writes back dirty)  │
//!        └──────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod entry;
pub mod schema;
pub mod dn;
pub mod idl;
pub mod storage;
pub mod index;
pub mod cache;
pub mod filter;
pub mod backend;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LdbmError, Result};
pub use config::{Config, SyncStrategy};
pub use entry::Entry;
pub use dn::Scope;
pub use filter::Filter;
pub use backend::{Backend, Modification, SearchOptions, SearchResult};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ldbm
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
