//! Connection Handler Module
//!
//! This module manages individual client connections. Each accepted
//! connection is handled by its own async task, so one slow client never
//! stalls the others; what *is* serialized is request execution, which
//! runs whole requests against the shared engine one at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                       (main.rs)                             │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read frames │───>│ Execute     │───>│ Write reply │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Tokio non-blocking reads and buffered writes
//! - **Length-Prefixed Framing**: requests and replies are binary frames
//! - **Pipelining**: multiple frames in one read execute in order
//! - **Close-After-Flush**: the `END` opcode closes the socket once its
//!   reply is on the wire

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
