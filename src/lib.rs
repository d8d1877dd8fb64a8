//! # PrefixKV - A Prefix-Indexed In-Memory Key-Value Store
//!
//! PrefixKV is an in-memory key/value store with one distinguishing feature:
//! every operation accepts either a literal key or a *prefix expression*
//! that addresses many keys at once. Multi-key operations are applied
//! atomically through a single traversal of an ordered prefix index.
//!
//! ## Features
//!
//! - **Prefix Expressions**: `MGET user:` touches every key starting with
//!   `user:` in one request
//! - **Transparent Compression**: values above a configurable threshold are
//!   LZF-compressed on write
//! - **TTL Support**: per-item expiry, evaluated lazily on access plus a
//!   background sweep
//! - **Advisory Locks**: items can be locked against mutation for a number
//!   of seconds (or permanently)
//! - **Async I/O**: built on Tokio; the engine itself runs requests one at
//!   a time, so every handler sees a consistent store
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                             PrefixKV                               │
//! │                                                                    │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐             │
//! │  │ TCP Server  │───>│ Connection  │───>│   Query     │             │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │             │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘             │
//! │                                               │                    │
//! │                                               ▼                    │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────┐   │
//! │  │   Frame /   │    │                Engine                    │   │
//! │  │   Payload   │    │  ┌─────────────┐   ┌──────────────────┐  │   │
//! │  │   Parsers   │    │  │ PrefixIndex │──>│     ItemPool     │  │   │
//! │  └─────────────┘    │  │ (ordered)   │   │ (slab of items)  │  │   │
//! │                     │  └─────────────┘   └──────────────────┘  │   │
//! │                     └──────────────────────────────────────────┘   │
//! │                                               ▲                    │
//! │                                               │                    │
//! │                     ┌─────────────────────────┴──────────────────┐ │
//! │                     │                   Cron                     │ │
//! │                     │  (clock refresh + expired-item sweep)      │ │
//! │                     └────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Requests and replies are length-prefixed binary frames. A request
//! payload starts with a 16-bit little-endian opcode followed by a
//! space-separated body, e.g. `SET` is opcode 2 with body
//! `<ttl> <key> <value>`. See [`protocol`] for the full wire format.
//!
//! ## Supported Operations
//!
//! ### Single-key
//! - `SET ttl key value` / `GET key` / `DEL key`
//! - `TTL key seconds` - (re)arm expiry
//! - `INC key` / `DEC key` - numeric fast path, seeds absent keys
//! - `LOCK key seconds` / `UNLOCK key` - advisory locks
//! - `META key field` - item metadata (`size`, `encoding`, `access`,
//!   `created`, `ttl`, `left`, `lock`)
//!
//! ### Multi-key (prefix expression forms)
//! - `MSET expr value`, `MTTL expr seconds`, `MDEL expr`
//! - `MINC expr` / `MDEC expr`, `MLOCK expr seconds`, `MUNLOCK expr`
//! - `MGET expr [limit]`, `KEYS expr`, `COUNT expr`
//!
//! ### Server
//! - `STATS` - counter snapshot as a key/value set
//! - `PING` - liveness check
//! - `END` - close the connection after the reply is flushed
//!
//! ## Module Overview
//!
//! - [`protocol`]: opcodes, payload tokenizers, reply encoding
//! - [`storage`]: the engine, prefix index, item pool, and cron
//! - [`commands`]: the dispatcher and per-opcode handlers
//! - [`connection`]: framed client connections
//!
//! ## Design Highlights
//!
//! ### Single-Writer Engine
//!
//! The engine runs inside a mutex and each request executes to completion
//! under one lock acquisition. Handlers never observe interleaved
//! mutations; concurrency between clients comes from interleaving whole
//! requests, not from preemption.
//!
//! ### Lazy + Background Expiry
//!
//! Expiry is evaluated whenever an item is touched: any operation that
//! observes an expired item destroys it and detaches it from the index.
//! A background cron additionally sweeps the whole index so items that
//! are never touched again still get reclaimed.
//!
//! ### Coarse Clock
//!
//! Handlers never call the OS clock. The cron refreshes a second-granular
//! engine clock and handlers read that one value for their entire
//! invocation, so TTL and lock decisions are consistent within a request.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::QueryHandler;
pub use connection::handle_connection;
pub use protocol::{Opcode, Reply, ReplyCode};
pub use storage::{Cron, CronConfig, Engine, EngineConfig, Limits};

/// The default port PrefixKV listens on
pub const DEFAULT_PORT: u16 = 10128;

/// The default host PrefixKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of PrefixKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
