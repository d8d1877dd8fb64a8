//! Query Handler Module
//!
//! This module implements the request side of every opcode. It reads the
//! opcode prefix off a client's request buffer, routes to exactly one
//! handler, and hands back exactly one reply; the connection layer owns
//! serialization and flushing.
//!
//! ## Supported Operations
//!
//! ### Single-key
//! - `SET ttl key value` - store a value, optionally armed with a TTL
//! - `GET key` / `DEL key`
//! - `TTL key seconds` - re-arm expiry
//! - `INC key` / `DEC key` - numeric fast path
//! - `LOCK key seconds` / `UNLOCK key` - advisory locks
//! - `META key field` - item metadata as an integer
//!
//! ### Multi-key (prefix expression forms)
//! - `MSET expr value`, `MTTL expr seconds`, `MDEL expr`
//! - `MINC expr` / `MDEC expr`, `MLOCK expr seconds`, `MUNLOCK expr`
//! - `MGET expr [limit]`, `KEYS expr`, `COUNT expr`
//!
//! ### Server
//! - `STATS`, `PING`, `END`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QueryHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   opcode    │───>│  dispatch   │───>│  handler    │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                            Engine           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A whole request executes under one engine lock acquisition, so every
//! handler runs to completion against a consistent store.
//!
//! ## Error Discipline
//!
//! Handlers never propagate errors upward: every control path maps onto
//! one of the reply codes. The single exception is the dispatcher itself,
//! which treats an unknown opcode or a truncated buffer as a protocol
//! violation - no reply is produced and the connection layer drops the
//! client.

use crate::protocol::parser;
use crate::protocol::types::{Opcode, Reply, ReplyCode};
use crate::storage::{Engine, ItemView, OpError};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Protocol violations the dispatcher refuses to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The request buffer is too short to carry an opcode.
    #[error("request truncated")]
    Truncated,

    /// The opcode is outside the closed set.
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),
}

/// One executed request: the reply to enqueue, plus whether the host
/// should close the socket once the reply is flushed (only `END` asks
/// for that).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub reply: Reply,
    pub close_after_flush: bool,
}

/// Routes requests to handlers and runs them against the shared engine.
#[derive(Clone)]
pub struct QueryHandler {
    /// The storage engine, shared with the cron and all connections
    engine: Arc<Mutex<Engine>>,
}

impl QueryHandler {
    /// Creates a new query handler over the given engine.
    pub fn new(engine: Arc<Mutex<Engine>>) -> Self {
        Self { engine }
    }

    /// The shared engine (the connection layer uses this for client
    /// accounting).
    pub fn engine(&self) -> &Arc<Mutex<Engine>> {
        &self.engine
    }

    /// Executes one request buffer: a 16-bit little-endian opcode
    /// followed by the handler's body.
    ///
    /// Returns the reply to enqueue, or a [`QueryError`] when the buffer
    /// violates the protocol; in that case nothing is replied and the
    /// caller is expected to drop the connection.
    pub fn execute(&self, request: &[u8]) -> Result<Response, QueryError> {
        if request.len() < 2 {
            return Err(QueryError::Truncated);
        }
        let raw_op = u16::from_le_bytes([request[0], request[1]]);
        let body = &request[2..];

        let mut engine = self.engine.lock().unwrap();
        engine.note_request();

        let op = Opcode::from_u16(raw_op).ok_or(QueryError::UnknownOpcode(raw_op))?;
        let reply = dispatch(&mut engine, op, body);

        Ok(Response {
            reply,
            close_after_flush: op == Opcode::End,
        })
    }
}

/// Routes one opcode to its handler.
fn dispatch(engine: &mut Engine, op: Opcode, body: &[u8]) -> Reply {
    match op {
        Opcode::Get => get(engine, body),
        Opcode::Set => set(engine, body),
        Opcode::Del => del(engine, body),
        Opcode::Ttl => ttl(engine, body),
        Opcode::Inc => incr(engine, body, 1),
        Opcode::Dec => incr(engine, body, -1),
        Opcode::Lock => lock(engine, body),
        Opcode::Unlock => unlock(engine, body),
        Opcode::MGet => mget(engine, body),
        Opcode::MSet => mset(engine, body),
        Opcode::MDel => mdel(engine, body),
        Opcode::MTtl => mttl(engine, body),
        Opcode::MInc => mincr(engine, body, 1),
        Opcode::MDec => mincr(engine, body, -1),
        Opcode::MLock => mlock(engine, body),
        Opcode::MUnlock => munlock(engine, body),
        Opcode::Count => count(engine, body),
        Opcode::Stats => stats(engine),
        Opcode::Meta => meta(engine, body),
        Opcode::Keys => keys(engine, body),
        Opcode::Ping | Opcode::End => Reply::ok(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Maps a storage error onto its reply code.
fn error_reply(err: OpError) -> Reply {
    Reply::code(match err {
        OpError::NotFound => ReplyCode::ErrNotFound,
        OpError::Locked => ReplyCode::ErrLocked,
        OpError::NotANumber => ReplyCode::ErrNan,
        OpError::Invalid => ReplyCode::Err,
    })
}

/// The common multi-key reply: the mutated-entry count as a number, or
/// not-found when nothing was touched.
fn count_reply(count: u64) -> Reply {
    if count > 0 {
        Reply::number(count as i64)
    } else {
        Reply::code(ReplyCode::ErrNotFound)
    }
}

fn parse_error() -> Reply {
    Reply::code(ReplyCode::Err)
}

fn key_bounds(engine: &Engine) -> (usize, usize) {
    let limits = engine.limits();
    (limits.max_key_size, limits.max_value_size)
}

// ============================================================================
// Single-key handlers
// ============================================================================

/// SET `<ttl> <key> <value>`
fn set(engine: &mut Engine, body: &[u8]) -> Reply {
    if engine.memory_exceeded() {
        return Reply::code(ReplyCode::ErrMem);
    }

    let (max_key, max_value) = key_bounds(engine);
    let Some((raw_ttl, key, value)) = parser::split_ttl_key_value(body, max_key, max_value) else {
        return parse_error();
    };
    let Some(ttl) = parser::parse_long(raw_ttl) else {
        return Reply::code(ReplyCode::ErrNan);
    };

    match engine.set(ttl, key, value) {
        Ok(view) => Reply::Value(view),
        Err(err) => error_reply(err),
    }
}

/// GET `<key>`
fn get(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(key) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    match engine.get(key) {
        Ok(view) => Reply::Value(view),
        Err(err) => error_reply(err),
    }
}

/// DEL `<key>`
fn del(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(key) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    match engine.del(key) {
        Ok(()) => Reply::ok(),
        Err(err) => error_reply(err),
    }
}

/// TTL `<key> <seconds>`
fn ttl(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, max_value) = key_bounds(engine);
    let Some((key, raw_ttl)) = parser::split_key_value(body, max_key, max_value) else {
        return parse_error();
    };

    match engine.set_ttl(key, raw_ttl) {
        Ok(()) => Reply::ok(),
        Err(err) => error_reply(err),
    }
}

/// INC/DEC `<key>`
fn incr(engine: &mut Engine, body: &[u8], delta: i64) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(key) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    match engine.incr(key, delta) {
        Ok(view) => Reply::Value(view),
        Err(err) => error_reply(err),
    }
}

/// LOCK `<key> <seconds>`
fn lock(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, max_value) = key_bounds(engine);
    let Some((key, raw_secs)) = parser::split_key_value(body, max_key, max_value) else {
        return parse_error();
    };

    match engine.lock(key, raw_secs) {
        Ok(()) => Reply::ok(),
        Err(err) => error_reply(err),
    }
}

/// UNLOCK `<key>`
fn unlock(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(key) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    match engine.unlock(key) {
        Ok(()) => Reply::ok(),
        Err(err) => error_reply(err),
    }
}

/// META `<key> <field>`
fn meta(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, max_value) = key_bounds(engine);
    let Some((key, field)) = parser::split_key_value(body, max_key, max_value) else {
        return parse_error();
    };

    match engine.meta(key, field) {
        Ok(value) => Reply::number(value),
        Err(err) => error_reply(err),
    }
}

// ============================================================================
// Multi-key handlers
// ============================================================================

/// MGET `<expr> [limit]`
fn mget(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, max_value) = key_bounds(engine);
    let Some((expr, raw_limit)) = parser::split_key_optional_value(body, max_key, max_value) else {
        return parse_error();
    };

    let limit = match raw_limit {
        Some(raw) => match parser::parse_long(raw) {
            Some(limit) => limit,
            None => return Reply::code(ReplyCode::ErrNan),
        },
        None => -1,
    };

    let pairs = engine.mget(expr, limit);
    if pairs.is_empty() {
        return Reply::code(ReplyCode::ErrNotFound);
    }

    Reply::KvSet(
        pairs
            .into_iter()
            .map(|(key, view)| (Bytes::from(key), view))
            .collect(),
    )
}

/// MSET `<expr> <value>`
fn mset(engine: &mut Engine, body: &[u8]) -> Reply {
    if engine.memory_exceeded() {
        return Reply::code(ReplyCode::ErrMem);
    }

    let (max_key, max_value) = key_bounds(engine);
    let Some((expr, value)) = parser::split_key_value(body, max_key, max_value) else {
        return parse_error();
    };

    count_reply(engine.mset(expr, value))
}

/// MDEL `<expr>`
fn mdel(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(expr) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    count_reply(engine.mdel(expr))
}

/// MTTL `<expr> <seconds>`
fn mttl(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, max_value) = key_bounds(engine);
    let Some((expr, raw_ttl)) = parser::split_key_value(body, max_key, max_value) else {
        return parse_error();
    };
    let Some(ttl) = parser::parse_long(raw_ttl) else {
        return Reply::code(ReplyCode::ErrNan);
    };

    count_reply(engine.mttl(expr, ttl))
}

/// MINC/MDEC `<expr>`
fn mincr(engine: &mut Engine, body: &[u8], delta: i64) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(expr) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    count_reply(engine.mincr(expr, delta))
}

/// MLOCK `<expr> <seconds>`
fn mlock(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, max_value) = key_bounds(engine);
    let Some((expr, raw_secs)) = parser::split_key_value(body, max_key, max_value) else {
        return parse_error();
    };
    let Some(secs) = parser::parse_long(raw_secs) else {
        return Reply::code(ReplyCode::ErrNan);
    };

    count_reply(engine.mlock(expr, secs))
}

/// MUNLOCK `<expr>`
fn munlock(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(expr) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    count_reply(engine.munlock(expr))
}

/// COUNT `<expr>`
///
/// Unlike the mutating multi-key forms, a zero tally is still a value
/// reply.
fn count(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(expr) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    Reply::number(engine.count(expr) as i64)
}

/// KEYS `<expr>`
///
/// Matched keys come back as a key/value set indexed by position: the
/// pair keys are decimal positions and the values are the matched keys.
fn keys(engine: &mut Engine, body: &[u8]) -> Reply {
    let (max_key, _) = key_bounds(engine);
    let Some(expr) = parser::split_key(body, max_key) else {
        return parse_error();
    };

    let matched = engine.keys(expr);
    if matched.is_empty() {
        return Reply::code(ReplyCode::ErrNotFound);
    }

    Reply::KvSet(
        matched
            .into_iter()
            .enumerate()
            .map(|(position, key)| {
                (
                    Bytes::from(position.to_string()),
                    ItemView::plain(Bytes::from(key)),
                )
            })
            .collect(),
    )
}

// ============================================================================
// Stats emitter
// ============================================================================

/// STATS
///
/// Materializes the engine's counter snapshot as a key/value set. The row
/// labels are static strings; the values are built fresh for this one
/// reply. Never fails.
fn stats(engine: &mut Engine) -> Reply {
    Reply::KvSet(
        engine
            .stats_rows()
            .into_iter()
            .map(|(label, view)| (Bytes::from_static(label.as_bytes()), view))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Encoding, EngineConfig, Limits};

    fn handler_with_limits(limits: Limits) -> QueryHandler {
        let engine = Arc::new(Mutex::new(Engine::new(EngineConfig { limits })));
        engine.lock().unwrap().tick(100);
        QueryHandler::new(engine)
    }

    fn handler() -> QueryHandler {
        handler_with_limits(Limits {
            max_key_size: 64,
            max_value_size: 256,
            max_item_ttl: 10_000,
            max_memory: 1024 * 1024,
            compression: 64,
        })
    }

    fn request(op: Opcode, body: &[u8]) -> Vec<u8> {
        let mut buf = op.as_u16().to_le_bytes().to_vec();
        buf.extend_from_slice(body);
        buf
    }

    fn exec(handler: &QueryHandler, op: Opcode, body: &[u8]) -> Reply {
        handler.execute(&request(op, body)).unwrap().reply
    }

    fn tick(handler: &QueryHandler, now: u64) {
        handler.engine().lock().unwrap().tick(now);
    }

    #[test]
    fn test_ping() {
        let handler = handler();
        let response = handler.execute(&request(Opcode::Ping, b"")).unwrap();
        assert_eq!(response.reply, Reply::ok());
        assert!(!response.close_after_flush);
    }

    #[test]
    fn test_end_requests_close_after_flush() {
        let handler = handler();
        let response = handler.execute(&request(Opcode::End, b"")).unwrap();
        assert_eq!(response.reply, Reply::ok());
        assert!(response.close_after_flush);
    }

    #[test]
    fn test_set_get_del_round_trip() {
        let handler = handler();

        let stored = exec(&handler, Opcode::Set, b"-1 hello world");
        match &stored {
            Reply::Value(view) => {
                assert_eq!(view.encoding, Encoding::Plain);
                assert_eq!(view.data.as_ref(), b"world");
            }
            other => panic!("expected a value reply, got {other:?}"),
        }

        assert_eq!(exec(&handler, Opcode::Get, b"hello"), stored);
        assert_eq!(exec(&handler, Opcode::Del, b"hello"), Reply::ok());
        assert_eq!(
            exec(&handler, Opcode::Get, b"hello"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_set_parse_failures() {
        let handler = handler();

        // Missing value
        assert_eq!(
            exec(&handler, Opcode::Set, b"-1 key"),
            Reply::code(ReplyCode::Err)
        );
        // Empty body
        assert_eq!(exec(&handler, Opcode::Set, b""), Reply::code(ReplyCode::Err));
        // Malformed TTL parses as not-a-number
        assert_eq!(
            exec(&handler, Opcode::Set, b"soon key value"),
            Reply::code(ReplyCode::ErrNan)
        );
    }

    #[test]
    fn test_set_memory_gate() {
        let handler = handler_with_limits(Limits {
            max_memory: 70,
            ..Limits::default()
        });

        // First write lands and pushes usage over the limit
        let first = exec(&handler, Opcode::Set, b"-1 k 0123456789");
        assert!(matches!(first, Reply::Value(_)));

        assert_eq!(
            exec(&handler, Opcode::Set, b"-1 j x"),
            Reply::code(ReplyCode::ErrMem)
        );
        assert_eq!(
            exec(&handler, Opcode::MSet, b"k x"),
            Reply::code(ReplyCode::ErrMem)
        );

        // Reads and deletes are never gated
        assert!(matches!(exec(&handler, Opcode::Get, b"k"), Reply::Value(_)));
        assert_eq!(exec(&handler, Opcode::Del, b"k"), Reply::ok());
    }

    #[test]
    fn test_inc_dec() {
        let handler = handler();

        let reply = exec(&handler, Opcode::Inc, b"counter");
        match reply {
            Reply::Value(view) => assert_eq!(view.as_number(), Some(1)),
            other => panic!("expected a value reply, got {other:?}"),
        }

        match exec(&handler, Opcode::Inc, b"counter") {
            Reply::Value(view) => assert_eq!(view.as_number(), Some(2)),
            other => panic!("expected a value reply, got {other:?}"),
        }
        match exec(&handler, Opcode::Dec, b"counter") {
            Reply::Value(view) => assert_eq!(view.as_number(), Some(1)),
            other => panic!("expected a value reply, got {other:?}"),
        }

        exec(&handler, Opcode::Set, b"-1 text abc");
        assert_eq!(
            exec(&handler, Opcode::Inc, b"text"),
            Reply::code(ReplyCode::ErrNan)
        );
    }

    #[test]
    fn test_ttl_handler() {
        let handler = handler();

        assert_eq!(
            exec(&handler, Opcode::Ttl, b"missing 10"),
            Reply::code(ReplyCode::ErrNotFound)
        );

        exec(&handler, Opcode::Set, b"-1 k v");
        assert_eq!(exec(&handler, Opcode::Ttl, b"k 5"), Reply::ok());
        assert_eq!(
            exec(&handler, Opcode::Ttl, b"k x5"),
            Reply::code(ReplyCode::ErrNan)
        );

        tick(&handler, 105);
        assert_eq!(
            exec(&handler, Opcode::Get, b"k"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_lock_unlock_handlers() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 k v");
        assert_eq!(exec(&handler, Opcode::Lock, b"k 60"), Reply::ok());
        assert_eq!(
            exec(&handler, Opcode::Set, b"-1 k x"),
            Reply::code(ReplyCode::ErrLocked)
        );
        assert_eq!(
            exec(&handler, Opcode::Lock, b"k 5"),
            Reply::code(ReplyCode::ErrLocked)
        );

        // UNLOCK ignores the lock itself
        assert_eq!(exec(&handler, Opcode::Unlock, b"k"), Reply::ok());
        assert!(matches!(
            exec(&handler, Opcode::Set, b"-1 k x"),
            Reply::Value(_)
        ));
    }

    #[test]
    fn test_meta_handler() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 k value");
        assert_eq!(exec(&handler, Opcode::Meta, b"k size"), Reply::number(5));
        assert_eq!(exec(&handler, Opcode::Meta, b"k encoding"), Reply::number(0));
        assert_eq!(
            exec(&handler, Opcode::Meta, b"k nonsense"),
            Reply::code(ReplyCode::Err)
        );
        assert_eq!(
            exec(&handler, Opcode::Meta, b"missing size"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_mget_handler() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 user:1 alice");
        exec(&handler, Opcode::Set, b"-1 user:2 bob");
        exec(&handler, Opcode::Set, b"-1 other x");

        match exec(&handler, Opcode::MGet, b"user:") {
            Reply::KvSet(pairs) => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].0.as_ref(), b"user:1");
                assert_eq!(pairs[0].1.data.as_ref(), b"alice");
            }
            other => panic!("expected a kv set reply, got {other:?}"),
        }

        // Optional limit
        match exec(&handler, Opcode::MGet, b"user: 1") {
            Reply::KvSet(pairs) => assert_eq!(pairs.len(), 1),
            other => panic!("expected a kv set reply, got {other:?}"),
        }
        assert_eq!(
            exec(&handler, Opcode::MGet, b"user: soon"),
            Reply::code(ReplyCode::ErrNan)
        );

        assert_eq!(
            exec(&handler, Opcode::MGet, b"nothing:"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_mset_handler() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 user:1 a");
        exec(&handler, Opcode::Set, b"-1 user:2 b");
        exec(&handler, Opcode::Set, b"-1 other c");

        assert_eq!(exec(&handler, Opcode::MSet, b"user: Z"), Reply::number(2));
        match exec(&handler, Opcode::Get, b"user:1") {
            Reply::Value(view) => assert_eq!(view.data.as_ref(), b"Z"),
            other => panic!("expected a value reply, got {other:?}"),
        }
        match exec(&handler, Opcode::Get, b"other") {
            Reply::Value(view) => assert_eq!(view.data.as_ref(), b"c"),
            other => panic!("expected a value reply, got {other:?}"),
        }

        assert_eq!(
            exec(&handler, Opcode::MSet, b"nothing: Z"),
            Reply::code(ReplyCode::ErrNotFound)
        );
        // The multi-key form requires its value
        assert_eq!(
            exec(&handler, Opcode::MSet, b"user:"),
            Reply::code(ReplyCode::Err)
        );
    }

    #[test]
    fn test_multi_lock_del_unlock_scenario() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 tmp:1 a");
        exec(&handler, Opcode::Set, b"-1 tmp:2 b");
        exec(&handler, Opcode::Set, b"-1 tmp:3 c");

        assert_eq!(exec(&handler, Opcode::MLock, b"tmp: 60"), Reply::number(3));
        assert_eq!(
            exec(&handler, Opcode::MDel, b"tmp:"),
            Reply::code(ReplyCode::ErrNotFound)
        );
        assert_eq!(exec(&handler, Opcode::MUnlock, b"tmp:"), Reply::number(3));
        assert_eq!(exec(&handler, Opcode::MDel, b"tmp:"), Reply::number(3));
    }

    #[test]
    fn test_minc_mdec_handlers() {
        let handler = handler();

        exec(&handler, Opcode::Inc, b"c:1");
        exec(&handler, Opcode::Inc, b"c:2");

        assert_eq!(exec(&handler, Opcode::MInc, b"c:"), Reply::number(2));
        assert_eq!(exec(&handler, Opcode::MDec, b"c:"), Reply::number(2));
        match exec(&handler, Opcode::Get, b"c:1") {
            Reply::Value(view) => assert_eq!(view.as_number(), Some(1)),
            other => panic!("expected a value reply, got {other:?}"),
        }

        assert_eq!(
            exec(&handler, Opcode::MInc, b"none:"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_mttl_handler() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 s:1 a");
        exec(&handler, Opcode::Set, b"-1 s:2 b");

        assert_eq!(exec(&handler, Opcode::MTtl, b"s: 3"), Reply::number(2));
        assert_eq!(
            exec(&handler, Opcode::MTtl, b"s: soon"),
            Reply::code(ReplyCode::ErrNan)
        );

        tick(&handler, 103);
        assert_eq!(
            exec(&handler, Opcode::Get, b"s:1"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_count_zero_is_still_a_value() {
        let handler = handler();

        assert_eq!(exec(&handler, Opcode::Count, b"none:"), Reply::number(0));

        exec(&handler, Opcode::Set, b"-1 n:1 a");
        exec(&handler, Opcode::Set, b"-1 n:2 b");
        assert_eq!(exec(&handler, Opcode::Count, b"n:"), Reply::number(2));
    }

    #[test]
    fn test_keys_handler_enumerates_matches() {
        let handler = handler();

        exec(&handler, Opcode::Set, b"-1 k:b 1");
        exec(&handler, Opcode::Set, b"-1 k:a 2");

        match exec(&handler, Opcode::Keys, b"k:") {
            Reply::KvSet(pairs) => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].0.as_ref(), b"0");
                assert_eq!(pairs[0].1.data.as_ref(), b"k:a");
                assert_eq!(pairs[1].0.as_ref(), b"1");
                assert_eq!(pairs[1].1.data.as_ref(), b"k:b");
            }
            other => panic!("expected a kv set reply, got {other:?}"),
        }

        assert_eq!(
            exec(&handler, Opcode::Keys, b"none:"),
            Reply::code(ReplyCode::ErrNotFound)
        );
    }

    #[test]
    fn test_stats_handler_shape() {
        let handler = handler();

        match exec(&handler, Opcode::Stats, b"") {
            Reply::KvSet(pairs) => {
                assert_eq!(pairs.len(), 27);
                assert_eq!(pairs[0].0.as_ref(), b"server_version");
                assert_eq!(pairs[26].0.as_ref(), b"reqs_per_client_avg");
            }
            other => panic!("expected a kv set reply, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_opcode_produces_no_reply() {
        let handler = handler();

        let mut buf = 0x7777u16.to_le_bytes().to_vec();
        buf.extend_from_slice(b"whatever");
        assert_eq!(
            handler.execute(&buf),
            Err(QueryError::UnknownOpcode(0x7777))
        );

        assert_eq!(handler.execute(&[]), Err(QueryError::Truncated));
        assert_eq!(handler.execute(&[1]), Err(QueryError::Truncated));
    }

    #[test]
    fn test_requests_are_counted_before_routing() {
        let handler = handler();

        let _ = handler.execute(&request(Opcode::Ping, b""));
        let _ = handler.execute(&request(Opcode::Get, b"missing"));
        let _ = handler.execute(&0x7777u16.to_le_bytes().to_vec());

        // Even the unknown opcode counted as a request
        assert_eq!(handler.engine().lock().unwrap().stats().requests, 3);
    }

    #[test]
    fn test_every_opcode_yields_exactly_one_reply() {
        let handler = handler();

        // An empty body is a parse failure for most handlers, but every
        // known opcode must still come back with exactly one reply
        for raw_op in 1..=22u16 {
            let op = Opcode::from_u16(raw_op).unwrap();
            let response = handler.execute(&request(op, b"")).unwrap();
            match op {
                Opcode::Stats | Opcode::Ping | Opcode::End => {
                    assert!(!response.reply.is_error())
                }
                Opcode::Count => assert_eq!(response.reply, Reply::code(ReplyCode::Err)),
                _ => assert!(response.reply.is_error(), "opcode {op:?}"),
            }
        }
    }
}
