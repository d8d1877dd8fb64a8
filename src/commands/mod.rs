//! Command Dispatch Module
//!
//! This module implements the request processing layer of PrefixKV.
//! It receives raw request buffers, reads the opcode prefix, and routes
//! each request to exactly one handler, which executes against the
//! storage engine and produces exactly one reply.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Frame Reader   │  (connection module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  QueryHandler   │  (this module)
//! │                 │
//! │  - Opcode       │
//! │  - Dispatch     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Engine      │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Operations
//!
//! ### Single-key
//! - `SET`, `GET`, `DEL`, `TTL`
//! - `INC`, `DEC`, `LOCK`, `UNLOCK`, `META`
//!
//! ### Multi-key
//! - `MSET`, `MGET`, `MDEL`, `MTTL`
//! - `MINC`, `MDEC`, `MLOCK`, `MUNLOCK`
//! - `KEYS`, `COUNT`
//!
//! ### Server
//! - `STATS`, `PING`, `END`

pub mod handler;

// Re-export the main query handler
pub use handler::{QueryError, QueryHandler, Response};
