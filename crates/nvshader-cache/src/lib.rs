//! # nvshader-cache
//!
//! Shader cache scanning and lifecycle management.
//!
//! This crate owns the middle of the pipeline: it walks the cache roots
//! discovered by `nvshader-core`, parses typed artifacts, and applies
//! retention, validation and association policies to the resulting entry
//! set. It also drives ahead-of-time pipeline replay through the external
//! `fossilize_replay` tool and watches cache directories for live
//! compilation activity.
//!
//! ## Modules
//!
//! - [`dxvk`]: DXVK / vkd3d-proton state-cache codec
//! - [`manager`]: scan, statistics, retention, validation, association
//! - [`replay`]: `fossilize_replay` orchestration with progress reporting
//! - [`watcher`]: kernel-notifier based cache directory watching

pub mod dxvk;
pub mod manager;
pub mod replay;
pub mod watcher;

mod scanner;

pub use dxvk::{StateCacheFile, StateCacheHeader};
pub use manager::{CacheManager, ValidationReport};
pub use replay::{
    is_available, locate_replay_binary, ReplayConfig, ReplayOutcome, ReplayProgress, ReplayStatus,
    Replayer,
};
pub use watcher::{CacheEvent, CacheEventKind, CacheWatcher, WatchHandle, WatchStats};
