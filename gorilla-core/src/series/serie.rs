//! Series controller: hot bucket, block ring and persistence fallback

use super::{Block, Bucket, BucketError, SerieConfig, SlotResult};
use crate::clock::Clock;
use crate::compression::{decode_points, encode_points, is_empty_payload, GorillaDecoder};
use crate::persistence::Persistence;
use crate::{block_id, checked_window, slot_index, BlockId, GorillaError, Point, Result, SeriesKey, TimeRange, Timestamp};
use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Mutable state, only touched under the series lock
struct SerieState {
    bucket: Bucket,
    blocks: Vec<Block>,
}

#[derive(Default)]
struct Counters {
    points_added: AtomicU64,
    repairs: AtomicU64,
    rotations: AtomicU64,
    reads: AtomicU64,
    read_through_blocks: AtomicU64,
}

struct SerieInner {
    key: SeriesKey,
    config: SerieConfig,
    state: RwLock<SerieState>,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    ready: AtomicBool,
    counters: Counters,
}

/// Per-series cache handle, cheap to clone
#[derive(Clone)]
pub struct Serie {
    inner: Arc<SerieInner>,
}

/// Point-in-time statistics of a series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerieStats {
    pub key: SeriesKey,
    pub ready: bool,
    pub hot_points: usize,
    pub resident_blocks: usize,
    pub points_added: u64,
    pub repairs: u64,
    pub rotations: u64,
    pub reads: u64,
    pub read_through_blocks: u64,
}

impl Serie {
    /// Create a series and start warming it from persistence
    ///
    /// Returns immediately; the hot bucket accepts writes before warm-up
    /// finishes.
    pub fn new(
        key: SeriesKey,
        config: SerieConfig,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let now = clock.now();
        let state = SerieState {
            bucket: Bucket::new(block_id(now, config.bucket_width), config.bucket_width),
            blocks: vec![Block::empty(); config.max_blocks],
        };

        let inner = Arc::new(SerieInner {
            key,
            config,
            state: RwLock::new(state),
            persistence,
            clock,
            ready: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("gorilla-init".into())
            .spawn(move || warm_up(weak))?;

        Ok(Self { inner })
    }

    /// Series identity
    pub fn key(&self) -> &SeriesKey {
        &self.inner.key
    }

    /// Configuration the series was built with
    pub fn config(&self) -> &SerieConfig {
        &self.inner.config
    }

    /// Check whether warm-up finished
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Block until warm-up finished or `timeout` elapsed
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Add a point
    ///
    /// Points in the hot window are buffered. A point past the window, or
    /// an older point once the window aged past the retention timeout,
    /// rotates the hot bucket into the ring. Other older points repair
    /// their block in place.
    pub fn add_point(&self, timestamp: Timestamp, value: f32) -> Result<()> {
        let inner = &self.inner;
        let width = inner.config.bucket_width;
        let retention = inner.config.retention_timeout;
        let now = inner.clock.now();

        if checked_window(timestamp, width).is_none() {
            return Err(GorillaError::InvalidFormat(format!(
                "timestamp {} outside the supported range",
                timestamp
            )));
        }

        let mut state = inner.state.write();
        match state.bucket.add(timestamp, value, now, retention) {
            Ok(()) => {}
            Err(BucketError::Overflow { age }) => {
                let anchor = if timestamp > state.bucket.end() {
                    block_id(timestamp, width)
                } else {
                    block_id(now, width)
                };
                debug!(
                    keyspace = %inner.key.keyspace,
                    series = %inner.key.series,
                    age,
                    from = state.bucket.created(),
                    to = anchor,
                    "Rotating bucket"
                );

                let old = std::mem::replace(&mut state.bucket, Bucket::new(anchor, width));
                self.rotate(&mut state, old);

                if state.bucket.add(timestamp, value, now, retention).is_err() {
                    return self.update(&mut state, timestamp, value);
                }
            }
            Err(BucketError::OutOfOrder { .. }) => {
                return self.update(&mut state, timestamp, value);
            }
        }

        inner.counters.points_added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read all points in `[start, end]`, ascending
    ///
    /// Holds the shared lock for the whole read, including the per-slot
    /// fan-out and any read-through to persistence.
    pub fn read(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Point>> {
        let inner = &self.inner;
        inner.counters.reads.fetch_add(1, Ordering::Relaxed);

        let range = TimeRange::new(start, end);
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let width = inner.config.bucket_width;
        let max_blocks = inner.config.max_blocks;

        let state = inner.state.read();
        let hot_id = state.bucket.created();
        let oldest_live = hot_id - inner.config.ring_span();

        let (tx, rx) = crossbeam_channel::bounded::<SlotResult>(max_blocks);
        for (slot, block) in state.blocks.iter().enumerate() {
            let live = block.id() >= oldest_live && block.id() < hot_id;
            if live && block.overlaps(range) {
                let block = block.clone();
                let tx = tx.clone();
                thread::Builder::new()
                    .name("gorilla-read".into())
                    .spawn(move || block.range_points(slot, range, &tx))?;
            } else {
                // bounded to max_blocks, never blocks
                let _ = tx.send(SlotResult {
                    slot,
                    points: Vec::new(),
                });
            }
        }
        drop(tx);

        let hot = state.bucket.range_points(range);

        let deadline = Instant::now() + inner.config.read_timeout;
        let mut results: Vec<Vec<Point>> = vec![Vec::new(); max_blocks];
        for _ in 0..max_blocks {
            match rx.recv_deadline(deadline) {
                Ok(result) => results[result.slot] = result.points,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        keyspace = %inner.key.keyspace,
                        series = %inner.key.series,
                        start,
                        end,
                        "Read timed out waiting for ring slots"
                    );
                    return Err(GorillaError::ReadTimeout {
                        keyspace: inner.key.keyspace.clone(),
                        series: inner.key.series.clone(),
                        waited: inner.config.read_timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GorillaError::Internal(
                        "block reader exited without reporting".into(),
                    ));
                }
            }
        }

        // Walk the ring from the oldest live slot forward
        let first_slot = slot_index(oldest_live, width, max_blocks);
        let total = results.iter().map(Vec::len).sum::<usize>() + hot.len();
        let mut points = Vec::with_capacity(total);
        for i in 0..max_blocks {
            points.append(&mut results[(first_slot + i) % max_blocks]);
        }
        points.extend(hot);

        let memory_count = points.len();
        let mut persistence_count = 0;
        if start < oldest_live {
            let older = self.read_persistence_locked(&state, start, end.min(oldest_live - 1))?;
            persistence_count = older.len();
            if !older.is_empty() {
                let mut merged = older;
                merged.append(&mut points);
                points = merged;
            }
        }

        debug!(
            keyspace = %inner.key.keyspace,
            series = %inner.key.series,
            start,
            end,
            oldest = oldest_live,
            oldest_slot = first_slot,
            memory_count,
            persistence_count,
            "Read series"
        );

        Ok(points)
    }

    /// Read `[start, end]` straight from persistence, one block at a time
    ///
    /// Any persistence error aborts the whole read.
    pub fn read_persistence(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Point>> {
        let state = self.inner.state.read();
        self.read_persistence_locked(&state, start, end)
    }

    /// Persist the hot bucket under its own block id without rotating it
    pub fn flush(&self) -> Result<()> {
        let inner = &self.inner;
        let (id, payload) = {
            let state = inner.state.read();
            let bucket = &state.bucket;
            if bucket.is_empty() {
                return Ok(());
            }
            let payload = encode_points(bucket.start(), bucket.dump_points())
                .map_err(|e| self.codec_error(bucket.created(), e))?;
            (bucket.created(), payload)
        };

        inner
            .persistence
            .write(&inner.key.keyspace, &inner.key.series, id, &payload)?;
        debug!(
            keyspace = %inner.key.keyspace,
            series = %inner.key.series,
            block_id = id,
            "Flushed hot bucket"
        );
        Ok(())
    }

    /// Snapshot of the ring slot holding `block_id`, if resident
    pub fn resident_block(&self, block_id: BlockId) -> Option<Block> {
        let config = &self.inner.config;
        let slot = slot_index(block_id, config.bucket_width, config.max_blocks);
        let state = self.inner.state.read();
        let block = &state.blocks[slot];
        (block.id() == block_id).then(|| block.clone())
    }

    /// Current statistics
    pub fn stats(&self) -> SerieStats {
        let inner = &self.inner;
        let (hot_points, resident_blocks) = {
            let state = inner.state.read();
            let resident = state.blocks.iter().filter(|b| !b.is_empty()).count();
            (state.bucket.len(), resident)
        };
        let counters = &inner.counters;
        SerieStats {
            key: inner.key.clone(),
            ready: self.is_ready(),
            hot_points,
            resident_blocks,
            points_added: counters.points_added.load(Ordering::Relaxed),
            repairs: counters.repairs.load(Ordering::Relaxed),
            rotations: counters.rotations.load(Ordering::Relaxed),
            reads: counters.reads.load(Ordering::Relaxed),
            read_through_blocks: counters.read_through_blocks.load(Ordering::Relaxed),
        }
    }

    /// Compress `old` into its ring slot and write it through in the background
    fn rotate(&self, state: &mut SerieState, old: Bucket) {
        let inner = &self.inner;
        let id = old.created();

        let payload = match encode_points(old.start(), old.dump_points()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    keyspace = %inner.key.keyspace,
                    series = %inner.key.series,
                    block_id = id,
                    error = %e,
                    "Failed to encode rotated bucket"
                );
                return;
            }
        };

        let slot = slot_index(id, inner.config.bucket_width, inner.config.max_blocks);
        let evicted = state.blocks[slot].id();
        state.blocks[slot] = Block::new(id, old.start(), old.end(), old.len(), payload.clone());
        inner.counters.rotations.fetch_add(1, Ordering::Relaxed);

        debug!(
            keyspace = %inner.key.keyspace,
            series = %inner.key.series,
            block_id = id,
            slot,
            evicted,
            count = old.len(),
            "Stored bucket in ring"
        );

        // Empty windows are never persisted
        if is_empty_payload(&payload) {
            return;
        }

        let persistence = Arc::clone(&inner.persistence);
        let key = inner.key.clone();
        let spawned = thread::Builder::new()
            .name("gorilla-store".into())
            .spawn(move || store(persistence.as_ref(), &key, id, &payload));
        if let Err(e) = spawned {
            error!(
                keyspace = %inner.key.keyspace,
                series = %inner.key.series,
                block_id = id,
                error = %e,
                "Failed to spawn block writer"
            );
        }
    }

    /// Merge an older point into its block, in the ring or in persistence
    fn update(&self, state: &mut SerieState, timestamp: Timestamp, value: f32) -> Result<()> {
        let inner = &self.inner;
        let width = inner.config.bucket_width;
        let target = block_id(timestamp, width);
        let slot = slot_index(target, width, inner.config.max_blocks);
        let point = Point::new(timestamp, value);

        inner.counters.repairs.fetch_add(1, Ordering::Relaxed);

        if state.blocks[slot].id() == target {
            let dense = self.merge(target, state.blocks[slot].payload(), point)?;
            let payload = self.encode_dense(target, &dense)?;

            // The ring only takes the patch once it is durable
            if !is_empty_payload(&payload) {
                inner
                    .persistence
                    .write(&inner.key.keyspace, &inner.key.series, target, &payload)?;
            }
            state.blocks[slot] = Block::new(target, dense.start(), dense.end(), dense.len(), payload);

            debug!(
                keyspace = %inner.key.keyspace,
                series = %inner.key.series,
                block_id = target,
                slot,
                "Patched resident block"
            );

            inner.counters.points_added.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let existing = inner
            .persistence
            .read(&inner.key.keyspace, &inner.key.series, target)?;
        let dense = match existing {
            Some(payload) if !is_empty_payload(&payload) => self.merge(target, &payload, point)?,
            _ => {
                let mut dense = Bucket::new(target, width);
                dense
                    .put(timestamp, value)
                    .map_err(|delta| self.delta_error(target, delta))?;
                dense
            }
        };

        let payload = self.encode_dense(target, &dense)?;
        if is_empty_payload(&payload) {
            return Ok(());
        }
        inner
            .persistence
            .write(&inner.key.keyspace, &inner.key.series, target, &payload)?;

        // Keep blocks inside the live ring window resident
        let oldest_live = state.bucket.created() - inner.config.ring_span();
        let resident = state.blocks[slot].id();
        let installed = target >= oldest_live && resident < target;
        if installed {
            state.blocks[slot] = Block::new(target, dense.start(), dense.end(), dense.len(), payload);
        }

        debug!(
            keyspace = %inner.key.keyspace,
            series = %inner.key.series,
            block_id = target,
            slot,
            installed,
            "Repaired persisted block"
        );

        inner.counters.points_added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Decode `payload` into a dense window and merge `point` into it
    ///
    /// Fails without side effects when a stored point lies outside the block.
    fn merge(&self, target: BlockId, payload: &[u8], point: Point) -> Result<Bucket> {
        let mut dense = Bucket::new(target, self.inner.config.bucket_width);
        let mut decoder = GorillaDecoder::new(payload);

        while let Some(p) = decoder
            .decode_next()
            .map_err(|e| self.codec_error(target, e))?
        {
            dense
                .put(p.timestamp, p.value)
                .map_err(|delta| self.delta_error(target, delta))?;
        }

        dense
            .put(point.timestamp, point.value)
            .map_err(|delta| self.delta_error(target, delta))?;
        Ok(dense)
    }

    /// Re-encode a dense window starting at its first occupied second
    fn encode_dense(&self, target: BlockId, dense: &Bucket) -> Result<Bytes> {
        let t0 = dense.first_timestamp().unwrap_or(target);
        encode_points(t0, dense.dump_points()).map_err(|e| self.codec_error(target, e))
    }

    /// Fetch blocks older than the live ring
    ///
    /// A block still held by its ring slot is served from memory, its
    /// write-through may not have landed yet.
    fn read_persistence_locked(
        &self,
        state: &SerieState,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Point>> {
        let inner = &self.inner;
        let width = inner.config.bucket_width;
        let max_blocks = inner.config.max_blocks;
        let range = TimeRange::new(start, end);

        let mut points = Vec::new();
        if range.is_empty() {
            return Ok(points);
        }

        // Below the first representable window, start at the next one
        let offset = start.rem_euclid(width);
        let mut id = match start.checked_sub(offset) {
            Some(id) => id,
            None => start + (width - offset),
        };
        while id <= end {
            let resident = &state.blocks[slot_index(id, width, max_blocks)];
            let payload = if resident.id() == id {
                Some(resident.payload().clone())
            } else {
                inner.counters.read_through_blocks.fetch_add(1, Ordering::Relaxed);
                inner
                    .persistence
                    .read(&inner.key.keyspace, &inner.key.series, id)?
            };
            if let Some(payload) = payload.filter(|p| !is_empty_payload(p)) {
                let decoded = decode_points(&payload).map_err(|e| self.codec_error(id, e))?;
                points.extend(decoded.into_iter().filter(|p| range.contains(p.timestamp)));
            }

            id = match id.checked_add(width) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(points)
    }

    fn codec_error(&self, block_id: BlockId, err: GorillaError) -> GorillaError {
        GorillaError::codec(&self.inner.key.keyspace, &self.inner.key.series, block_id, err)
    }

    fn delta_error(&self, block_id: BlockId, delta: i64) -> GorillaError {
        GorillaError::DeltaOutOfRange {
            keyspace: self.inner.key.keyspace.clone(),
            series: self.inner.key.series.clone(),
            block_id,
            delta,
        }
    }
}

/// Write a rotated block through; failures are logged, never retried
fn store(persistence: &dyn Persistence, key: &SeriesKey, block_id: BlockId, payload: &[u8]) {
    if let Err(e) = persistence.write(&key.keyspace, &key.series, block_id, payload) {
        error!(
            keyspace = %key.keyspace,
            series = %key.series,
            block_id,
            error = %e,
            "Failed to persist rotated block"
        );
    }
}

/// Warm the hot bucket and the ring from persistence
///
/// The hot bucket read is retried until it succeeds or the series is
/// dropped. Ring slots are best effort.
fn warm_up(weak: Weak<SerieInner>) {
    let Some(mut inner) = weak.upgrade() else {
        return;
    };

    info!(
        keyspace = %inner.key.keyspace,
        series = %inner.key.series,
        "Initializing serie"
    );

    let width = inner.config.bucket_width;
    let max_blocks = inner.config.max_blocks;
    let delay = inner.config.init_retry_delay;
    let now = inner.clock.now();
    let hot_id = block_id(now, width);

    let hot_payload = loop {
        match inner.persistence.read(&inner.key.keyspace, &inner.key.series, hot_id) {
            Ok(payload) => break payload,
            Err(e) if e.is_retryable() => warn!(
                keyspace = %inner.key.keyspace,
                series = %inner.key.series,
                block_id = hot_id,
                error = %e,
                "Retrying hot bucket read"
            ),
            Err(e) => {
                error!(
                    keyspace = %inner.key.keyspace,
                    series = %inner.key.series,
                    block_id = hot_id,
                    error = %e,
                    "Giving up on hot bucket restore"
                );
                break None;
            }
        }

        drop(inner);
        thread::sleep(delay);
        inner = match weak.upgrade() {
            Some(inner) => inner,
            None => return,
        };
    };

    if let Some(payload) = hot_payload.filter(|p| !is_empty_payload(p)) {
        let mut decoder = GorillaDecoder::new(&payload);
        let mut state = inner.state.write();
        let mut restored = 0usize;
        loop {
            match decoder.decode_next() {
                Ok(Some(p)) => {
                    // points written since construction win over the persisted copy
                    if !state.bucket.contains(p.timestamp) && state.bucket.put(p.timestamp, p.value).is_ok() {
                        restored += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(
                        keyspace = %inner.key.keyspace,
                        series = %inner.key.series,
                        block_id = hot_id,
                        error = %e,
                        "Failed to decode hot bucket"
                    );
                    break;
                }
            }
        }
        debug!(
            keyspace = %inner.key.keyspace,
            series = %inner.key.series,
            block_id = hot_id,
            restored,
            "Restored hot bucket"
        );
    }

    for x in 1..=max_blocks as i64 {
        let id = hot_id - x * width;

        let payload = match inner.persistence.read(&inner.key.keyspace, &inner.key.series, id) {
            Ok(Some(payload)) if !is_empty_payload(&payload) => payload,
            Ok(_) => continue,
            Err(e) => {
                error!(
                    keyspace = %inner.key.keyspace,
                    series = %inner.key.series,
                    block_id = id,
                    error = %e,
                    "Failed to read block during warm-up"
                );
                continue;
            }
        };

        let count = match decode_points(&payload) {
            Ok(points) => points.len(),
            Err(e) => {
                error!(
                    keyspace = %inner.key.keyspace,
                    series = %inner.key.series,
                    block_id = id,
                    error = %e,
                    "Skipping undecodable block during warm-up"
                );
                continue;
            }
        };

        let slot = slot_index(id, width, max_blocks);
        let mut state = inner.state.write();
        // never clobber a block rotated or repaired since construction
        if state.blocks[slot].id() < id && id < state.bucket.created() {
            debug!(
                keyspace = %inner.key.keyspace,
                series = %inner.key.series,
                block_id = id,
                slot,
                size = payload.len(),
                "Warmed ring slot"
            );
            state.blocks[slot] = Block::new(id, id, id + width - 1, count, payload);
        }
    }

    inner.ready.store(true, Ordering::Release);
    info!(
        keyspace = %inner.key.keyspace,
        series = %inner.key.series,
        "Serie initialized"
    );
}
