//! Storage Engine Module
//!
//! This module provides the storage core of PrefixKV: the engine, the
//! ordered prefix index it dispatches traversals through, the item pool,
//! and the background cron.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │                                                             │
//! │  ┌───────────────┐ key -> handle  ┌─────────────────────┐   │
//! │  │  PrefixIndex  │───────────────>│      ItemPool       │   │
//! │  │  (ordered)    │                │  (slab of Items)    │   │
//! │  └───────────────┘                └─────────────────────┘   │
//! │                                                             │
//! │  Limits · Stats · compression policy · validity checks      │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ tick / sweep
//!              ┌─────────────┴─────────────┐
//!              │           Cron            │
//!              │   (Background Tokio Task) │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Prefix Traversal**: multi-key operations run off one ordered-index
//!   snapshot per request
//! - **Lazy Expiry**: expired items are destroyed by whichever access
//!   observes them; the cron sweeps the stragglers
//! - **Transparent Compression**: large values are LZF-compressed on
//!   write when it pays for itself
//! - **Advisory Locks**: mutating operations honor per-item locks
//!
//! ## Example
//!
//! ```
//! use prefixkv::storage::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//!
//! engine.set(-1, b"user:1", b"alice").unwrap();
//! engine.set(-1, b"user:2", b"bob").unwrap();
//!
//! // One traversal, two keys
//! assert_eq!(engine.count(b"user:"), 2);
//! ```

pub mod engine;
pub mod expiry;
pub mod index;
pub mod item;
pub mod pool;

// Re-export commonly used types
pub use engine::{Engine, EngineConfig, Limits, OpError, Stats};
pub use expiry::{Cron, CronConfig};
pub use index::PrefixIndex;
pub use item::{Encoding, Item, ItemData, ItemView, MetaField};
pub use pool::{ItemHandle, ItemPool};
