//! Stored Items
//!
//! An [`Item`] is one stored value plus the metadata the engine needs to
//! apply TTLs and advisory locks lazily: the wall-clock second the item's
//! countdowns are anchored to, the last access time, and the signed
//! TTL/lock durations.
//!
//! The payload is a tagged variant, [`ItemData`]: either an owned byte
//! buffer (plain or LZF-compressed) or an inline machine integer. The
//! integer variant never owns a heap allocation, which is what makes the
//! INC/DEC fast path cheap.

use bytes::Bytes;

/// Fixed per-item bookkeeping overhead used for memory accounting,
/// on top of the payload's heap bytes.
pub const ITEM_OVERHEAD: usize = 64;

/// How an item's payload is encoded, both in storage and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Raw bytes, exactly as written.
    Plain = 0,
    /// LZF-compressed bytes; the reader decodes based on this tag.
    Lzf = 1,
    /// An inline `i64`, serialized as 8 little-endian bytes.
    Number = 2,
}

impl Encoding {
    /// The wire tag for this encoding.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// An item's payload: an owned buffer or an inline integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemData {
    Plain(Vec<u8>),
    Lzf(Vec<u8>),
    Number(i64),
}

/// A stored item.
///
/// Timestamps are wall-clock seconds read from the engine clock; the
/// engine never lets an item's anchor `time` run ahead of that clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The payload.
    pub data: ItemData,
    /// Second at which the TTL and lock countdowns are anchored.
    pub time: u64,
    /// Second of the last successful read or write touching this item.
    pub last_access_time: u64,
    /// Expiry in seconds; `-1` (or any value `<= 0`) disables expiry.
    pub ttl: i64,
    /// Lock in seconds; `-1` locks permanently, `0` means unlocked.
    pub lock: i64,
}

impl Item {
    /// Creates an item anchored at `now` with the given TTL and no lock.
    pub fn new(data: ItemData, ttl: i64, now: u64) -> Self {
        Self {
            data,
            time: now,
            last_access_time: now,
            ttl,
            lock: 0,
        }
    }

    /// The item's encoding tag.
    #[inline]
    pub fn encoding(&self) -> Encoding {
        match self.data {
            ItemData::Plain(_) => Encoding::Plain,
            ItemData::Lzf(_) => Encoding::Lzf,
            ItemData::Number(_) => Encoding::Number,
        }
    }

    /// Logical payload size in bytes. For the integer encoding this is the
    /// native word width, not a buffer length.
    #[inline]
    pub fn size(&self) -> usize {
        match &self.data {
            ItemData::Plain(b) | ItemData::Lzf(b) => b.len(),
            ItemData::Number(_) => std::mem::size_of::<i64>(),
        }
    }

    /// Heap bytes owned by the payload (zero for the integer encoding).
    #[inline]
    pub fn heap_bytes(&self) -> usize {
        match &self.data {
            ItemData::Plain(b) | ItemData::Lzf(b) => b.len(),
            ItemData::Number(_) => 0,
        }
    }

    /// Bytes this item accounts for against the memory budget.
    #[inline]
    pub fn footprint(&self) -> usize {
        self.heap_bytes() + ITEM_OVERHEAD
    }

    /// Seconds elapsed since the item's anchor time.
    #[inline]
    pub fn eta(&self, now: u64) -> i64 {
        now.saturating_sub(self.time) as i64
    }

    /// Whether the TTL has run out as of `now`.
    ///
    /// A TTL `<= 0` never expires.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl > 0 && self.eta(now) >= self.ttl
    }

    /// Whether the advisory lock is held as of `now`.
    ///
    /// `lock == -1` is a permanent lock; otherwise the item is locked
    /// while fewer than `lock` seconds have elapsed since `time`.
    #[inline]
    pub fn is_locked(&self, now: u64) -> bool {
        self.lock == -1 || self.eta(now) < self.lock
    }
}

/// A read-only view of an item's payload, suitable for a reply.
///
/// The engine hands these to the command layer instead of exposing items
/// (or index nodes) directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub encoding: Encoding,
    pub data: Bytes,
}

impl ItemView {
    /// A number-encoded view carrying `n` as 8 little-endian bytes.
    pub fn number(n: i64) -> Self {
        Self {
            encoding: Encoding::Number,
            data: Bytes::copy_from_slice(&n.to_le_bytes()),
        }
    }

    /// A plain-encoded view over already-owned bytes.
    pub fn plain(data: Bytes) -> Self {
        Self {
            encoding: Encoding::Plain,
            data,
        }
    }

    /// Snapshot an item's payload.
    pub fn of(item: &Item) -> Self {
        match &item.data {
            ItemData::Plain(b) => Self {
                encoding: Encoding::Plain,
                data: Bytes::copy_from_slice(b),
            },
            ItemData::Lzf(b) => Self {
                encoding: Encoding::Lzf,
                data: Bytes::copy_from_slice(b),
            },
            ItemData::Number(n) => Self::number(*n),
        }
    }

    /// Decode a number-encoded view back into an `i64`.
    ///
    /// Returns `None` for any other encoding.
    pub fn as_number(&self) -> Option<i64> {
        if self.encoding != Encoding::Number {
            return None;
        }
        let bytes: [u8; 8] = self.data.as_ref().try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }
}

/// The metadata fields `META` can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Size,
    Encoding,
    Access,
    Created,
    Ttl,
    Left,
    Lock,
}

impl MetaField {
    /// Parses a field name, matched by prefix length: the request token
    /// and the candidate name are compared over the shorter of the two,
    /// so `s` selects `size` and `encod` selects `encoding`. Candidates
    /// are tried in a fixed order and the first match wins.
    pub fn parse(name: &[u8]) -> Option<Self> {
        const FIELDS: [(&[u8], MetaField); 7] = [
            (b"size", MetaField::Size),
            (b"encoding", MetaField::Encoding),
            (b"access", MetaField::Access),
            (b"created", MetaField::Created),
            (b"ttl", MetaField::Ttl),
            (b"left", MetaField::Left),
            (b"lock", MetaField::Lock),
        ];

        if name.is_empty() {
            return None;
        }

        for (candidate, field) in FIELDS {
            let n = name.len().min(candidate.len());
            if name[..n] == candidate[..n] {
                return Some(field);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_tags() {
        assert_eq!(Encoding::Plain.as_u8(), 0);
        assert_eq!(Encoding::Lzf.as_u8(), 1);
        assert_eq!(Encoding::Number.as_u8(), 2);
    }

    #[test]
    fn test_item_size_and_footprint() {
        let plain = Item::new(ItemData::Plain(b"hello".to_vec()), -1, 100);
        assert_eq!(plain.size(), 5);
        assert_eq!(plain.heap_bytes(), 5);
        assert_eq!(plain.footprint(), 5 + ITEM_OVERHEAD);

        let number = Item::new(ItemData::Number(42), -1, 100);
        assert_eq!(number.size(), 8);
        assert_eq!(number.heap_bytes(), 0);
        assert_eq!(number.footprint(), ITEM_OVERHEAD);
    }

    #[test]
    fn test_expiry_predicate() {
        let mut item = Item::new(ItemData::Plain(b"v".to_vec()), 2, 100);
        assert!(!item.is_expired(100));
        assert!(!item.is_expired(101));
        assert!(item.is_expired(102));
        assert!(item.is_expired(500));

        // TTL <= 0 never expires
        item.ttl = -1;
        assert!(!item.is_expired(u64::MAX));
        item.ttl = 0;
        assert!(!item.is_expired(u64::MAX));
    }

    #[test]
    fn test_lock_predicate() {
        let mut item = Item::new(ItemData::Plain(b"v".to_vec()), -1, 100);

        // Unlocked by default
        assert!(!item.is_locked(100));

        // Timed lock: held while fewer than `lock` seconds elapsed
        item.lock = 5;
        assert!(item.is_locked(100));
        assert!(item.is_locked(104));
        assert!(!item.is_locked(105));

        // Permanent lock never releases
        item.lock = -1;
        assert!(item.is_locked(u64::MAX));
    }

    #[test]
    fn test_item_view_number_round_trip() {
        let view = ItemView::number(-12345);
        assert_eq!(view.encoding, Encoding::Number);
        assert_eq!(view.as_number(), Some(-12345));

        let plain = ItemView::plain(Bytes::from_static(b"abc"));
        assert_eq!(plain.as_number(), None);
    }

    #[test]
    fn test_meta_field_prefix_match() {
        assert_eq!(MetaField::parse(b"size"), Some(MetaField::Size));
        assert_eq!(MetaField::parse(b"s"), Some(MetaField::Size));
        assert_eq!(MetaField::parse(b"encoding"), Some(MetaField::Encoding));
        assert_eq!(MetaField::parse(b"e"), Some(MetaField::Encoding));
        assert_eq!(MetaField::parse(b"access"), Some(MetaField::Access));
        assert_eq!(MetaField::parse(b"created"), Some(MetaField::Created));
        assert_eq!(MetaField::parse(b"ttl"), Some(MetaField::Ttl));
        assert_eq!(MetaField::parse(b"left"), Some(MetaField::Left));
        assert_eq!(MetaField::parse(b"lock"), Some(MetaField::Lock));
        // "lo" matches "lock" before "left" is never reached ("left" comes
        // first but "lo" does not prefix-match it)
        assert_eq!(MetaField::parse(b"lo"), Some(MetaField::Lock));
        assert_eq!(MetaField::parse(b"bogus"), None);
        assert_eq!(MetaField::parse(b""), None);
    }
}
