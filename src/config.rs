//! Configuration for ldbm
//!
//! Centralized backend configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LdbmError, Result};
use crate::index::IndexType;

/// Main configuration for a backend instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all container files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── id2entry.ldbm    (id → encoded entry)
    ///     ├── dn2id.ldbm       (DN scope families)
    ///     ├── nextid.ldbm      (persisted id counter)
    ///     └── {attr}.ldbm      (one per indexed attribute)
    pub data_dir: PathBuf,

    /// Naming-context root, in normalized form
    pub suffix: String,

    /// Sync strategy: when dirty containers are written back
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Handle Pool Configuration
    // -------------------------------------------------------------------------
    /// Max containers open at once
    pub max_open_handles: usize,

    // -------------------------------------------------------------------------
    // Entry Cache Configuration
    // -------------------------------------------------------------------------
    /// Max entries resident in the entry cache
    pub cache_max_entries: usize,

    /// How many LRU-tail entries one eviction pass may inspect
    pub cache_evict_scan: usize,

    // -------------------------------------------------------------------------
    // ID List Configuration
    // -------------------------------------------------------------------------
    /// Block split threshold
    pub max_ids_per_block: usize,

    /// Continuation blocks allowed per key before it collapses to ALLIDS
    pub max_indirect: usize,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Index directives, one per attribute (or `default`)
    pub indexes: Vec<IndexDirective>,

    /// Attribute subtype → supertype pairs
    pub supertypes: Vec<(String, String)>,
}

/// Sync strategy for dirty containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// write every mutated container back at the end of each write operation
    EveryWrite,

    /// a background thread writes back dirty containers every `interval_ms`
    Periodic { interval_ms: u64 },
}

/// Which index types to maintain for an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDirective {
    /// Attribute name, or `default` for attributes without their own directive
    pub attr: String,
    pub types: Vec<IndexType>,
}

impl IndexDirective {
    pub fn new(attr: impl Into<String>, types: &[IndexType]) -> Self {
        Self {
            attr: attr.into().to_ascii_lowercase(),
            types: types.to_vec(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ldbm_data"),
            suffix: String::new(),
            sync_strategy: SyncStrategy::Periodic { interval_ms: 5000 },
            max_open_handles: 128,
            cache_max_entries: 1000,
            cache_evict_scan: 10,
            max_ids_per_block: 8188,
            max_indirect: 255,
            indexes: Vec::new(),
            supertypes: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject bounds the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        // Operations hold one handle at a time, but each write cycles through
        // id2entry, dn2id and nextid; fewer slots evict them on every write
        if self.max_open_handles < 3 {
            return Err(LdbmError::Config(format!(
                "max_open_handles must be at least 3, got {}",
                self.max_open_handles
            )));
        }
        if self.cache_max_entries == 0 {
            return Err(LdbmError::Config("cache_max_entries must be > 0".into()));
        }
        if self.cache_evict_scan == 0 {
            return Err(LdbmError::Config("cache_evict_scan must be > 0".into()));
        }
        if self.max_ids_per_block < 2 {
            return Err(LdbmError::Config(format!(
                "max_ids_per_block must be at least 2, got {}",
                self.max_ids_per_block
            )));
        }
        if let SyncStrategy::Periodic { interval_ms: 0 } = self.sync_strategy {
            return Err(LdbmError::Config("sync interval must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all containers)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the naming-context suffix
    pub fn suffix(mut self, suffix: impl AsRef<str>) -> Self {
        self.config.suffix = crate::dn::normalize(suffix.as_ref());
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the maximum number of open containers
    pub fn max_open_handles(mut self, count: usize) -> Self {
        self.config.max_open_handles = count;
        self
    }

    /// Set the entry cache capacity
    pub fn cache_max_entries(mut self, count: usize) -> Self {
        self.config.cache_max_entries = count;
        self
    }

    /// Set the bounded LRU-tail scan length
    pub fn cache_evict_scan(mut self, count: usize) -> Self {
        self.config.cache_evict_scan = count;
        self
    }

    /// Set the ID block split threshold
    pub fn max_ids_per_block(mut self, count: usize) -> Self {
        self.config.max_ids_per_block = count;
        self
    }

    /// Set the continuation block limit
    pub fn max_indirect(mut self, count: usize) -> Self {
        self.config.max_indirect = count;
        self
    }

    /// Add an index directive
    pub fn index(mut self, attr: impl Into<String>, types: &[IndexType]) -> Self {
        self.config.indexes.push(IndexDirective::new(attr, types));
        self
    }

    /// Register `sub` as a subtype of `sup`
    pub fn supertype(mut self, sub: impl Into<String>, sup: impl Into<String>) -> Self {
        self.config.supertypes.push((
            sub.into().to_ascii_lowercase(),
            sup.into().to_ascii_lowercase(),
        ));
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
