//! Protocol Data Types
//!
//! This module defines the request opcodes, the reply codes, and the
//! reply payload encoding.
//!
//! ## Wire Format
//!
//! Both directions are length-prefixed frames: a 32-bit little-endian
//! payload length followed by the payload.
//!
//! A request payload is a 16-bit little-endian opcode followed by the
//! opaque body handed to the handler:
//!
//! ```text
//! [u32 len][u16 opcode][body...]
//! ```
//!
//! A reply payload is one of:
//!
//! ```text
//! code reply:       [u16 code]
//! value reply:      [u16 VAL][u8 encoding][u32 len][len bytes]
//! key/value set:    [u16 KVVAL][u32 count]
//!                   then per pair: [u32 klen][key][u8 enc][u32 vlen][value]
//! ```
//!
//! `NUMBER`-encoded payloads carry an `i64` as 8 little-endian bytes.

use crate::storage::item::ItemView;
use bytes::Bytes;

/// Request opcodes. This is a closed set; anything else is a protocol
/// violation and drops the connection without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Get = 1,
    Set = 2,
    Del = 3,
    Ttl = 4,
    Inc = 5,
    Dec = 6,
    Lock = 7,
    Unlock = 8,
    MGet = 9,
    MSet = 10,
    MDel = 11,
    MTtl = 12,
    MInc = 13,
    MDec = 14,
    MLock = 15,
    MUnlock = 16,
    Count = 17,
    Stats = 18,
    Ping = 19,
    Meta = 20,
    Keys = 21,
    End = 22,
}

impl Opcode {
    /// Decodes a wire opcode, or `None` for anything outside the set.
    pub fn from_u16(op: u16) -> Option<Self> {
        Some(match op {
            1 => Opcode::Get,
            2 => Opcode::Set,
            3 => Opcode::Del,
            4 => Opcode::Ttl,
            5 => Opcode::Inc,
            6 => Opcode::Dec,
            7 => Opcode::Lock,
            8 => Opcode::Unlock,
            9 => Opcode::MGet,
            10 => Opcode::MSet,
            11 => Opcode::MDel,
            12 => Opcode::MTtl,
            13 => Opcode::MInc,
            14 => Opcode::MDec,
            15 => Opcode::MLock,
            16 => Opcode::MUnlock,
            17 => Opcode::Count,
            18 => Opcode::Stats,
            19 => Opcode::Ping,
            20 => Opcode::Meta,
            21 => Opcode::Keys,
            22 => Opcode::End,
            _ => return None,
        })
    }

    /// The wire value.
    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Reply status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReplyCode {
    /// Parse failure, unknown META field, or malformed request
    Err = 0,
    /// Key absent, or present but expired
    ErrNotFound = 1,
    /// A field that should be a signed integer did not parse
    ErrNan = 2,
    /// A write was attempted over the memory limit
    ErrMem = 3,
    /// A mutating operation hit a locked item
    ErrLocked = 4,
    /// Success, no payload
    Ok = 5,
    /// Success with a single value payload
    Val = 6,
    /// Success with a key/value set payload
    KvVal = 7,
}

impl ReplyCode {
    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// A logical reply, built by a handler and serialized by the connection
/// layer. Every handler invocation produces exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A one-shot status: `OK` or one of the error codes.
    Code(ReplyCode),
    /// `VAL` with a single payload and its encoding.
    Value(ItemView),
    /// `VAL` with `N` key/value pairs.
    KvSet(Vec<(Bytes, ItemView)>),
}

impl Reply {
    /// Shorthand for a status reply.
    pub fn code(code: ReplyCode) -> Self {
        Reply::Code(code)
    }

    /// The `OK` reply.
    pub fn ok() -> Self {
        Reply::Code(ReplyCode::Ok)
    }

    /// `VAL` carrying a `NUMBER`-encoded count or result.
    pub fn number(n: i64) -> Self {
        Reply::Value(ItemView::number(n))
    }

    /// The status code this reply carries on the wire.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            Reply::Code(code) => *code,
            Reply::Value(_) => ReplyCode::Val,
            Reply::KvSet(_) => ReplyCode::KvVal,
        }
    }

    /// True for the error codes, false for `OK`/`VAL`/`KVVAL`.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reply::Code(
                ReplyCode::Err
                    | ReplyCode::ErrNotFound
                    | ReplyCode::ErrNan
                    | ReplyCode::ErrMem
                    | ReplyCode::ErrLocked
            )
        )
    }

    /// Serializes the reply payload (everything after the frame length).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Serializes the reply payload into an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.reply_code().as_u16().to_le_bytes());

        match self {
            Reply::Code(_) => {}
            Reply::Value(view) => encode_view(view, buf),
            Reply::KvSet(pairs) => {
                buf.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
                for (key, view) in pairs {
                    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    buf.extend_from_slice(key);
                    encode_view(view, buf);
                }
            }
        }
    }
}

fn encode_view(view: &ItemView, buf: &mut Vec<u8>) {
    buf.push(view.encoding.as_u8());
    buf.extend_from_slice(&(view.data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&view.data);
}
