//! Bounded multi-reader log ring buffer
//!
//! Fixed number of line slots plus a monotonically increasing count of lines
//! ever written. A line's absolute position `p` lives in slot `p % capacity`;
//! readers keep absolute positions, so lag is a subtraction against the
//! total-written counter.
//!
//! ```text
//! total_written = 7, capacity = 4
//!
//! slot:      0    1    2    3
//! holds:    p4   p5   p6   p3     oldest retained = 7 - 4 = p3
//! ```
//!
//! A reader that falls more than `capacity` lines behind is fast-forwarded to
//! the oldest retained line; it loses history but never sees a torn line.

use crate::event_log::truncate_str;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of buffered lines
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Default maximum line length in bytes
pub const DEFAULT_LINE_MAX: usize = 255;

/// Default number of concurrent readers
pub const DEFAULT_MAX_READERS: usize = 4;

/// Writers never wait longer than this; the line is dropped instead
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

const READ_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

const ADMIN_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

const DUMP_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Handle for an allocated reader slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(pub usize);

#[derive(Debug, Clone, Copy, Default)]
struct ReaderSlot {
    active: bool,
    /// Absolute position of the next line to read
    position: u64,
}

struct Ring {
    lines: Vec<String>,
    total_written: u64,
    readers: Vec<ReaderSlot>,
}

impl Ring {
    fn retained(&self, capacity: usize) -> usize {
        self.total_written.min(capacity as u64) as usize
    }

    fn oldest_position(&self, capacity: usize) -> u64 {
        self.total_written - self.retained(capacity) as u64
    }
}

/// Rolling buffer of diagnostic lines with independent reader cursors
pub struct LogRingBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
    line_max: usize,
    dropped_writes: AtomicU64,
}

impl LogRingBuffer {
    pub fn new(capacity: usize, line_max: usize, max_readers: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                lines: vec![String::new(); capacity],
                total_written: 0,
                readers: vec![ReaderSlot::default(); max_readers],
            }),
            capacity,
            line_max,
            dropped_writes: AtomicU64::new(0),
        }
    }

    /// Append a line, overwriting the oldest once full
    ///
    /// Returns `false` if the line was dropped because the lock was busy.
    pub fn write(&self, line: &str) -> bool {
        let line = truncate_str(line, self.line_max);

        let Some(mut ring) = self.ring.try_lock_for(WRITE_LOCK_TIMEOUT) else {
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let slot = (ring.total_written % self.capacity as u64) as usize;
        let entry = &mut ring.lines[slot];
        entry.clear();
        entry.push_str(line);
        ring.total_written += 1;
        true
    }

    /// Claim a free reader slot
    ///
    /// New readers start at the current write position and do not replay
    /// history.
    pub fn allocate_reader(&self) -> Option<ReaderId> {
        let mut ring = self.ring.try_lock_for(ADMIN_LOCK_TIMEOUT)?;
        let start = ring.total_written;
        let (id, slot) = ring
            .readers
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.active)?;
        slot.active = true;
        slot.position = start;
        Some(ReaderId(id))
    }

    /// Release a reader slot
    pub fn free_reader(&self, id: ReaderId) {
        if let Some(mut ring) = self.ring.try_lock_for(ADMIN_LOCK_TIMEOUT) {
            if let Some(slot) = ring.readers.get_mut(id.0) {
                slot.active = false;
            }
        }
    }

    /// Next unread line for `id`, advancing its cursor
    pub fn read(&self, id: ReaderId) -> Option<String> {
        let mut ring = self.ring.try_lock_for(READ_LOCK_TIMEOUT)?;
        let total = ring.total_written;
        let oldest = ring.oldest_position(self.capacity);

        let slot = ring.readers.get_mut(id.0)?;
        if !slot.active || slot.position >= total {
            return None;
        }
        if slot.position < oldest {
            slot.position = oldest;
        }
        let position = slot.position;
        slot.position += 1;

        let index = (position % self.capacity as u64) as usize;
        Some(ring.lines[index].clone())
    }

    /// Whether `id` has unread lines
    pub fn has_data(&self, id: ReaderId) -> bool {
        self.ring
            .try_lock_for(READ_LOCK_TIMEOUT)
            .and_then(|ring| {
                ring.readers
                    .get(id.0)
                    .map(|slot| slot.active && slot.position < ring.total_written)
            })
            .unwrap_or(false)
    }

    /// Every retained line, oldest first
    pub fn dump_all(&self) -> Vec<String> {
        let Some(ring) = self.ring.try_lock_for(DUMP_LOCK_TIMEOUT) else {
            return Vec::new();
        };
        let oldest = ring.oldest_position(self.capacity);
        (oldest..ring.total_written)
            .map(|p| ring.lines[(p % self.capacity as u64) as usize].clone())
            .collect()
    }

    /// Number of retained lines
    pub fn len(&self) -> usize {
        self.ring
            .try_lock_for(ADMIN_LOCK_TIMEOUT)
            .map(|ring| ring.retained(self.capacity))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines ever written
    pub fn total_written(&self) -> u64 {
        self.ring
            .try_lock_for(ADMIN_LOCK_TIMEOUT)
            .map(|ring| ring.total_written)
            .unwrap_or(0)
    }

    /// Lines dropped because the lock could not be taken in time
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    pub fn active_readers(&self) -> usize {
        self.ring
            .try_lock_for(ADMIN_LOCK_TIMEOUT)
            .map(|ring| ring.readers.iter().filter(|s| s.active).count())
            .unwrap_or(0)
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY, DEFAULT_LINE_MAX, DEFAULT_MAX_READERS)
    }
}

/// Reader slot that is released when dropped
pub struct ReaderGuard<'a> {
    ring: &'a LogRingBuffer,
    id: ReaderId,
}

impl<'a> ReaderGuard<'a> {
    pub fn allocate(ring: &'a LogRingBuffer) -> Option<Self> {
        ring.allocate_reader().map(|id| Self { ring, id })
    }

    pub fn id(&self) -> ReaderId {
        self.id
    }

    pub fn read(&self) -> Option<String> {
        self.ring.read(self.id)
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.ring.free_reader(self.id);
    }
}
