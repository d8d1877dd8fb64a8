//! The Query Execution Engine
//!
//! This module is the heart of PrefixKV: it owns the ordered prefix index,
//! the item pool, the configured limits, and the server-wide counters, and
//! implements the storage side of every operation the dispatcher can
//! route.
//!
//! ## Design Decisions
//!
//! 1. **Single Writer**: the engine has no interior locking. It is driven
//!    behind one mutex and every request runs to completion against it, so
//!    no operation ever observes another operation's partial effects.
//! 2. **Lazy Expiry**: TTLs are evaluated at the moment an item is
//!    touched. Any operation that observes an expired item destroys it and
//!    detaches it from the index before answering, so an expired item can
//!    never be returned twice.
//! 3. **Snapshot Traversal**: multi-key operations collect the matching
//!    `(key, handle)` pairs first and then apply their mutation, so a
//!    traversal never revisits keys its own mutation inserted.
//! 4. **Transparent Compression**: values above the configured threshold
//!    are LZF-compressed on write when that saves at least a few bytes;
//!    otherwise they are stored plain. Replies carry the encoding and the
//!    reader decodes.
//! 5. **Coarse Clock**: the engine never calls the OS clock while serving.
//!    `stats.time` is refreshed by the cron task and read consistently for
//!    a whole operation.
//!
//! ## Memory Accounting
//!
//! `memused` is tracked logically: every item accounts for its payload's
//! heap bytes plus a fixed overhead. Writes are gated on
//! `memused > max_memory`; reads and deletes never are. When the gate
//! fires, writes fail with the memory error code and nothing is evicted.

use crate::protocol::parser;
use crate::storage::item::{Encoding, Item, ItemData, ItemView, MetaField};
use crate::storage::pool::{ItemHandle, ItemPool};
use crate::storage::PrefixIndex;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Configured limits for keys, values, TTLs and memory.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Longest key accepted; longer keys are truncated at parse time.
    pub max_key_size: usize,
    /// Longest value accepted; longer values are truncated at parse time.
    pub max_value_size: usize,
    /// Ceiling applied to every TTL a client asks for, in seconds.
    pub max_item_ttl: i64,
    /// Write gate: SET/MSET fail once `memused` exceeds this many bytes.
    pub max_memory: u64,
    /// Values longer than this many bytes are candidates for compression.
    pub compression: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_key_size: 1024,
            max_value_size: 1024 * 1024,
            max_item_ttl: 30 * 24 * 3600,
            max_memory: 128 * 1024 * 1024,
            compression: 1024,
        }
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub limits: Limits,
}

/// The user-visible ways a storage operation can fail. Handlers map these
/// onto reply codes one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OpError {
    /// Key absent, or present but expired.
    #[error("key not found")]
    NotFound,
    /// A mutating operation hit a locked item.
    #[error("item is locked")]
    Locked,
    /// A span that should be a signed integer did not parse.
    #[error("not a number")]
    NotANumber,
    /// Unknown META field.
    #[error("invalid request")]
    Invalid,
}

/// Server-wide counters, exposed verbatim by `STATS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    /// Second the engine was created.
    pub started: u64,
    /// Current engine clock, refreshed by the cron.
    pub time: u64,
    /// Second the first item was ever created (0 until then).
    pub firstin: u64,
    /// Second the most recent item was created.
    pub lastin: u64,
    /// Items currently indexed.
    pub nitems: u64,
    /// Items currently stored LZF-compressed.
    pub ncompressed: u64,
    /// Clients currently connected.
    pub nclients: u64,
    /// Connections accepted over the server's lifetime.
    pub connections: u64,
    /// Requests dispatched over the server's lifetime.
    pub requests: u64,
    /// Cron ticks completed.
    pub crondone: u64,
    /// Logical bytes accounted to live items.
    pub memused: u64,
    /// High-water mark of `memused`.
    pub mempeak: u64,
    /// Memory the server considers available to it.
    pub memavail: u64,
    /// `memused / nitems`, recomputed on every create/destroy.
    pub sizeavg: u64,
    /// Running pairwise average of achieved compression rates (percent).
    pub compravg: f64,
}

/// The storage engine. See the module docs for the big picture.
#[derive(Debug)]
pub struct Engine {
    limits: Limits,
    index: PrefixIndex,
    pool: ItemPool,
    stats: Stats,
}

impl Engine {
    /// Creates an empty engine. The clock starts at the current wall-clock
    /// second and is advanced by [`tick`](Self::tick) from then on.
    pub fn new(config: EngineConfig) -> Self {
        let now = unix_now();
        let stats = Stats {
            started: now,
            time: now,
            memavail: config.limits.max_memory,
            ..Stats::default()
        };

        Self {
            limits: config.limits,
            index: PrefixIndex::new(),
            pool: ItemPool::new(),
            stats,
        }
    }

    /// The configured limits.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The current counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Number of keys currently indexed.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Refreshes the engine clock. Called by the cron, never by handlers.
    pub fn tick(&mut self, now: u64) {
        self.stats.time = now;
        self.stats.crondone += 1;
    }

    /// Records an accepted connection.
    pub fn client_connected(&mut self) {
        self.stats.nclients += 1;
        self.stats.connections += 1;
    }

    /// Records a closed connection.
    pub fn client_disconnected(&mut self) {
        self.stats.nclients = self.stats.nclients.saturating_sub(1);
    }

    /// Bumps the request counter; the dispatcher calls this once per
    /// request before routing.
    pub fn note_request(&mut self) {
        self.stats.requests += 1;
    }

    /// Whether writes are currently gated by the memory limit.
    pub fn memory_exceeded(&self) -> bool {
        self.stats.memused > self.limits.max_memory
    }

    // ========================================================================
    // Single-key operations
    // ========================================================================

    /// `SET`: stores a full replacement value under `key`.
    ///
    /// A parsed `ttl > 0` arms expiry (clamped to the configured maximum)
    /// and re-anchors the item's clock; any other TTL leaves the item
    /// persistent. Fails only when the key currently maps to a locked
    /// item. The returned view is the stored form, compressed bytes
    /// included.
    pub fn set(&mut self, ttl: i64, key: &[u8], value: &[u8]) -> Result<ItemView, OpError> {
        if let Some(handle) = self.index.find(key) {
            if self.pool[handle].is_locked(self.stats.time) {
                return Err(OpError::Locked);
            }
        }

        let handle = self.store_value(key, value);
        if ttl > 0 {
            let now = self.stats.time;
            let max_ttl = self.limits.max_item_ttl;
            let item = &mut self.pool[handle];
            item.time = now;
            item.ttl = ttl.min(max_ttl);
        }

        Ok(self.view(handle))
    }

    /// `GET`: reads a key, touching its access time.
    pub fn get(&mut self, key: &[u8]) -> Result<ItemView, OpError> {
        let handle = self.find_live(key).ok_or(OpError::NotFound)?;
        self.touch(handle);
        Ok(self.view(handle))
    }

    /// `DEL`: removes a key. Locked items refuse; expired items count as
    /// missing (and are reaped on the way).
    pub fn del(&mut self, key: &[u8]) -> Result<(), OpError> {
        let handle = self.index.find(key).ok_or(OpError::NotFound)?;
        if self.pool[handle].is_locked(self.stats.time) {
            return Err(OpError::Locked);
        }
        if !self.reap_if_expired(key, handle) {
            return Err(OpError::NotFound);
        }

        self.index.remove(key);
        self.destroy(handle);
        Ok(())
    }

    /// `TTL`: re-arms expiry on an existing item from a raw integer span.
    ///
    /// The span is parsed only after the key is known to exist, so a miss
    /// answers not-found even when the TTL is malformed.
    pub fn set_ttl(&mut self, key: &[u8], raw_ttl: &[u8]) -> Result<(), OpError> {
        let handle = self.find_live(key).ok_or(OpError::NotFound)?;
        let ttl = parser::parse_long(raw_ttl).ok_or(OpError::NotANumber)?;

        let now = self.stats.time;
        let max_ttl = self.limits.max_item_ttl;
        let item = &mut self.pool[handle];
        item.last_access_time = now;
        item.time = now;
        item.ttl = ttl.min(max_ttl);
        Ok(())
    }

    /// `INC`/`DEC`: adds `delta` to a numeric item.
    ///
    /// A missing key is seeded with the integer 1 (for both directions).
    /// A plain payload that parses as a signed integer is converted to the
    /// inline number encoding, freeing its buffer; the conversion
    /// re-anchors the item's clock. Anything else is not a number.
    pub fn incr(&mut self, key: &[u8], delta: i64) -> Result<ItemView, OpError> {
        let Some(handle) = self.index.find(key) else {
            let handle = self.create(ItemData::Number(1), -1);
            self.index.insert(key, handle);
            return Ok(self.view(handle));
        };

        if !self.reap_if_expired(key, handle) {
            return Err(OpError::NotFound);
        }
        if self.pool[handle].is_locked(self.stats.time) {
            return Err(OpError::Locked);
        }

        self.touch(handle);
        self.apply_delta(handle, delta)?;
        Ok(self.view(handle))
    }

    /// `LOCK`: arms the advisory lock for `raw_secs` seconds (`-1` locks
    /// permanently). Refuses if the item is already locked.
    pub fn lock(&mut self, key: &[u8], raw_secs: &[u8]) -> Result<(), OpError> {
        let handle = self.find_live(key).ok_or(OpError::NotFound)?;
        let secs = parser::parse_long(raw_secs).ok_or(OpError::NotANumber)?;

        let now = self.stats.time;
        let item = &mut self.pool[handle];
        item.last_access_time = now;
        if item.is_locked(now) {
            return Err(OpError::Locked);
        }
        item.time = now;
        item.lock = secs;
        Ok(())
    }

    /// `UNLOCK`: force-clears the lock. Succeeds on any live item,
    /// whatever its current lock state.
    pub fn unlock(&mut self, key: &[u8]) -> Result<(), OpError> {
        let handle = self.find_live(key).ok_or(OpError::NotFound)?;

        let now = self.stats.time;
        let item = &mut self.pool[handle];
        item.lock = 0;
        item.last_access_time = now;
        Ok(())
    }

    /// `META`: reads one metadata field of a live item as an integer.
    pub fn meta(&mut self, key: &[u8], field: &[u8]) -> Result<i64, OpError> {
        let handle = self.find_live(key).ok_or(OpError::NotFound)?;
        let field = MetaField::parse(field);

        let now = self.stats.time;
        let item = &mut self.pool[handle];
        let value = field.map(|field| match field {
            MetaField::Size => item.size() as i64,
            MetaField::Encoding => i64::from(item.encoding().as_u8()),
            MetaField::Access => item.last_access_time as i64,
            MetaField::Created => item.time as i64,
            MetaField::Ttl => item.ttl,
            MetaField::Left => {
                if item.ttl <= 0 {
                    -1
                } else {
                    item.ttl - item.eta(now)
                }
            }
            MetaField::Lock => item.lock,
        });
        item.last_access_time = now;

        value.ok_or(OpError::Invalid)
    }

    // ========================================================================
    // Multi-key operations
    // ========================================================================

    /// `KEYS`: every indexed key matching the expression, in key order.
    /// Purely a key listing; entries are not validity-checked or touched.
    pub fn keys(&mut self, expr: &[u8]) -> Vec<Vec<u8>> {
        self.index.search_keys(expr, -1, self.limits.max_key_size)
    }

    /// `COUNT`: tallies the live entries matching the expression, touching
    /// each and reaping the expired ones.
    pub fn count(&mut self, expr: &[u8]) -> u64 {
        let matches = self.matches(expr, -1);
        let mut tally = 0;
        for (key, handle) in matches {
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            self.touch(handle);
            tally += 1;
        }
        tally
    }

    /// `MGET`: collects up to `limit` live matches (`-1` = unbounded) as
    /// key/value pairs, touching each.
    pub fn mget(&mut self, expr: &[u8], limit: i64) -> Vec<(Vec<u8>, ItemView)> {
        let matches = self.matches(expr, limit);
        let mut out = Vec::with_capacity(matches.len());
        for (key, handle) in matches {
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            self.touch(handle);
            let view = self.view(handle);
            out.push((key, view));
        }
        out
    }

    /// `MSET`: stores a fresh copy of `value` under every matched key,
    /// with the same compress-or-copy policy as `SET`. Locked entries are
    /// skipped; expired entries are reaped and skipped. Returns the number
    /// of keys written.
    pub fn mset(&mut self, expr: &[u8], value: &[u8]) -> u64 {
        let matches = self.matches(expr, -1);
        let mut written = 0;
        for (key, handle) in matches {
            if self.pool[handle].is_locked(self.stats.time) {
                continue;
            }
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            self.store_value(&key, value);
            written += 1;
        }
        written
    }

    /// `MTTL`: re-arms expiry on every live, unlocked match.
    pub fn mttl(&mut self, expr: &[u8], ttl: i64) -> u64 {
        let matches = self.matches(expr, -1);
        let now = self.stats.time;
        let max_ttl = self.limits.max_item_ttl;
        let mut armed = 0;
        for (key, handle) in matches {
            if self.pool[handle].is_locked(now) {
                continue;
            }
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            let item = &mut self.pool[handle];
            item.last_access_time = now;
            item.time = now;
            item.ttl = ttl.min(max_ttl);
            armed += 1;
        }
        armed
    }

    /// `MDEL`: destroys every live, unlocked match.
    pub fn mdel(&mut self, expr: &[u8]) -> u64 {
        let matches = self.matches(expr, -1);
        let mut removed = 0;
        for (key, handle) in matches {
            if self.pool[handle].is_locked(self.stats.time) {
                continue;
            }
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            self.index.remove(&key);
            self.destroy(handle);
            removed += 1;
        }
        removed
    }

    /// `MINC`/`MDEC`: adds `delta` to every live, unlocked match whose
    /// payload is (or parses as) a number. Entries that cannot become a
    /// number are skipped, not failed.
    pub fn mincr(&mut self, expr: &[u8], delta: i64) -> u64 {
        let matches = self.matches(expr, -1);
        let mut bumped = 0;
        for (key, handle) in matches {
            if self.pool[handle].is_locked(self.stats.time) {
                continue;
            }
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            self.touch(handle);
            if self.apply_delta(handle, delta).is_ok() {
                bumped += 1;
            }
        }
        bumped
    }

    /// `MLOCK`: arms the lock on every live match that is not already
    /// locked.
    pub fn mlock(&mut self, expr: &[u8], secs: i64) -> u64 {
        let matches = self.matches(expr, -1);
        let now = self.stats.time;
        let mut locked = 0;
        for (key, handle) in matches {
            if self.pool[handle].is_locked(now) {
                continue;
            }
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            let item = &mut self.pool[handle];
            item.last_access_time = now;
            item.time = now;
            item.lock = secs;
            locked += 1;
        }
        locked
    }

    /// `MUNLOCK`: force-clears the lock on every live match. The only
    /// multi-key mutator that ignores lock state.
    pub fn munlock(&mut self, expr: &[u8]) -> u64 {
        let matches = self.matches(expr, -1);
        let now = self.stats.time;
        let mut unlocked = 0;
        for (key, handle) in matches {
            if !self.reap_if_expired(&key, handle) {
                continue;
            }
            let item = &mut self.pool[handle];
            item.lock = 0;
            item.last_access_time = now;
            unlocked += 1;
        }
        unlocked
    }

    /// Destroys every expired item in the store. Driven by the cron so
    /// that items nobody touches again still get reclaimed; returns the
    /// number swept.
    pub fn sweep_expired(&mut self) -> u64 {
        let matches = self.matches(b"", -1);
        let mut swept = 0;
        for (key, handle) in matches {
            if !self.reap_if_expired(&key, handle) {
                swept += 1;
            }
        }
        swept
    }

    // ========================================================================
    // Stats snapshot
    // ========================================================================

    /// Materializes the `STATS` reply rows: a fixed list of labeled
    /// counters, in a fixed order. Never fails.
    pub fn stats_rows(&self) -> Vec<(&'static str, ItemView)> {
        fn num(n: u64) -> ItemView {
            ItemView::number(n as i64)
        }
        fn text(s: &str) -> ItemView {
            ItemView::plain(Bytes::copy_from_slice(s.as_bytes()))
        }
        fn float(v: f64) -> ItemView {
            ItemView::plain(Bytes::from(format!("{v:.6}")))
        }

        let s = &self.stats;
        let reqs_per_client = if s.connections == 0 {
            0.0
        } else {
            s.requests as f64 / s.connections as f64
        };

        vec![
            ("server_version", text(crate::VERSION)),
            (
                "server_build_datetime",
                text(env!("PREFIXKV_BUILD_TIMESTAMP")),
            ),
            ("server_allocator", text("system")),
            (
                "server_arch",
                text(if cfg!(target_pointer_width = "64") {
                    "64"
                } else {
                    "32"
                }),
            ),
            ("server_started", num(s.started)),
            ("server_time", num(s.time)),
            ("first_item_seen", num(s.firstin)),
            ("last_item_seen", num(s.lastin)),
            ("total_items", num(s.nitems)),
            ("total_compressed_items", num(s.ncompressed)),
            ("total_clients", num(s.nclients)),
            ("total_cron_done", num(s.crondone)),
            ("total_connections", num(s.connections)),
            ("total_requests", num(s.requests)),
            ("item_pool_current_used", num(self.pool.used() as u64)),
            ("item_pool_current_capacity", num(self.pool.capacity() as u64)),
            (
                "item_pool_total_capacity",
                num(self.pool.total_capacity() as u64),
            ),
            ("item_pool_object_size", num(self.pool.object_size() as u64)),
            (
                "item_pool_max_block_size",
                num(self.pool.max_block_size() as u64),
            ),
            ("memory_available", num(s.memavail)),
            ("memory_usable", num(self.limits.max_memory)),
            ("memory_used", num(s.memused)),
            ("memory_peak", num(s.mempeak)),
            ("memory_fragmentation", float(self.fragmentation_ratio())),
            ("item_size_avg", num(s.sizeavg)),
            ("compr_rate_avg", num(s.compravg as u64)),
            ("reqs_per_client_avg", float(reqs_per_client)),
        ]
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Snapshot of the matches for a prefix expression.
    fn matches(&self, expr: &[u8], limit: i64) -> Vec<(Vec<u8>, ItemHandle)> {
        self.index.search(expr, limit, self.limits.max_key_size)
    }

    /// Point lookup that reaps an expired entry on the way.
    fn find_live(&mut self, key: &[u8]) -> Option<ItemHandle> {
        let handle = self.index.find(key)?;
        self.reap_if_expired(key, handle).then_some(handle)
    }

    /// The expiry check: destroys and detaches the item if its TTL ran
    /// out. Returns whether the item is still live.
    fn reap_if_expired(&mut self, key: &[u8], handle: ItemHandle) -> bool {
        if self.pool[handle].is_expired(self.stats.time) {
            debug!(
                key = %String::from_utf8_lossy(key),
                "ttl expired, destroying item on access"
            );
            self.index.remove(key);
            self.destroy(handle);
            return false;
        }
        true
    }

    fn touch(&mut self, handle: ItemHandle) {
        let now = self.stats.time;
        self.pool[handle].last_access_time = now;
    }

    fn view(&self, handle: ItemHandle) -> ItemView {
        ItemView::of(&self.pool[handle])
    }

    /// Allocates an item and rolls the creation counters forward.
    fn create(&mut self, data: ItemData, ttl: i64) -> ItemHandle {
        let now = self.stats.time;
        let item = Item::new(data, ttl, now);

        if item.encoding() == Encoding::Lzf {
            self.stats.ncompressed += 1;
        }
        if self.stats.firstin == 0 {
            self.stats.firstin = now;
        }
        self.stats.lastin = now;
        self.stats.memused += item.footprint() as u64;
        self.stats.nitems += 1;
        self.stats.sizeavg = self.stats.memused / self.stats.nitems;
        if self.stats.memused > self.stats.mempeak {
            self.stats.mempeak = self.stats.memused;
        }

        self.pool.alloc(item)
    }

    /// Frees an item and rolls the counters back symmetrically.
    fn destroy(&mut self, handle: ItemHandle) {
        let item = self.pool.free(handle);

        if item.encoding() == Encoding::Lzf {
            self.stats.ncompressed -= 1;
        }
        self.stats.memused = self.stats.memused.saturating_sub(item.footprint() as u64);
        self.stats.nitems -= 1;
        self.stats.sizeavg = if self.stats.nitems == 0 {
            0
        } else {
            self.stats.memused / self.stats.nitems
        };
    }

    /// Stores one value under one key with the compress-or-copy policy,
    /// destroying whatever the key previously held.
    fn store_value(&mut self, key: &[u8], value: &[u8]) -> ItemHandle {
        let data = if value.len() > self.limits.compression {
            match lzf::compress(value) {
                Ok(compressed) => {
                    let rate = 100.0 - (compressed.len() as f64 * 100.0) / value.len() as f64;
                    self.stats.compravg = if self.stats.compravg == 0.0 {
                        rate
                    } else {
                        (self.stats.compravg + rate) / 2.0
                    };
                    ItemData::Lzf(compressed)
                }
                // Not enough compression to be worth keeping
                Err(_) => ItemData::Plain(value.to_vec()),
            }
        } else {
            ItemData::Plain(value.to_vec())
        };

        let handle = self.create(data, -1);
        if let Some(old) = self.index.insert(key, handle) {
            self.destroy(old);
        }
        handle
    }

    /// Adds `delta` to an item's numeric payload, converting a plain
    /// decimal payload to the inline encoding in place.
    fn apply_delta(&mut self, handle: ItemHandle, delta: i64) -> Result<(), OpError> {
        let now = self.stats.time;
        let freed: u64;
        {
            let item = &mut self.pool[handle];
            match &item.data {
                ItemData::Number(n) => {
                    let bumped = n.wrapping_add(delta);
                    item.data = ItemData::Number(bumped);
                    return Ok(());
                }
                ItemData::Plain(buf) => {
                    let n = parser::parse_long(buf).ok_or(OpError::NotANumber)?;
                    freed = buf.len() as u64;
                    item.data = ItemData::Number(n.wrapping_add(delta));
                    // The encoding flip re-anchors the countdowns
                    item.time = now;
                }
                ItemData::Lzf(_) => return Err(OpError::NotANumber),
            }
        }

        self.stats.memused = self.stats.memused.saturating_sub(freed);
        self.stats.sizeavg = if self.stats.nitems == 0 {
            0
        } else {
            self.stats.memused / self.stats.nitems
        };
        Ok(())
    }

    /// Allocated bytes over occupied bytes, pool slack included.
    fn fragmentation_ratio(&self) -> f64 {
        let occupied = self.stats.memused + (self.pool.used() * self.pool.object_size()) as u64;
        if occupied == 0 {
            return 1.0;
        }
        let allocated = self.stats.memused + self.pool.max_block_size() as u64;
        allocated as f64 / occupied as f64
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
