//! Bounded record transport between a task's reader half and writer half.
//!
//! A [`Channel`] is single-producer/single-consumer and bounded twice: by
//! queued record count and by the summed `memory_size` of queued records.
//! Producers block while either bound would be exceeded; consumers block
//! while the queue is empty and the channel is still open. Both wait on
//! condition variables that are signalled exactly when capacity, availability
//! or the open/aborted state changes.

use crate::cancel::CancellationToken;
use crate::record::Record;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Channel and exchanger settings for one task group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum number of queued records.
    pub capacity: usize,
    /// Maximum summed `memory_size` of queued records.
    pub byte_capacity: usize,
    /// Records buffered by the sender before a batch push.
    pub buffer_size: usize,
    /// Optional records-per-second limit applied by the sender.
    pub record_speed: Option<u64>,
    /// Optional bytes-per-second limit applied by the sender.
    pub byte_speed: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            byte_capacity: 8 * 1024 * 1024,
            buffer_size: 32,
            record_speed: None,
            byte_speed: None,
        }
    }
}

impl ChannelConfig {
    pub fn with_capacity(mut self, records: usize) -> Self {
        self.capacity = records;
        self
    }

    pub fn with_byte_capacity(mut self, bytes: usize) -> Self {
        self.byte_capacity = bytes;
        self
    }

    pub fn with_buffer_size(mut self, records: usize) -> Self {
        self.buffer_size = records;
        self
    }
}

/// Errors from channel operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error("channel was aborted")]
    Aborted,

    #[error("record of {size} bytes exceeds channel byte capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },
}

/// Snapshot of a channel's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub records_pushed: u64,
    pub bytes_pushed: u64,
    pub records_pulled: u64,
    pub bytes_pulled: u64,
    /// Time the producer spent blocked on a full channel.
    pub push_wait: Duration,
    /// Time the consumer spent blocked on an empty channel.
    pub pull_wait: Duration,
}

#[derive(Default)]
struct Counters {
    records_pushed: AtomicU64,
    bytes_pushed: AtomicU64,
    records_pulled: AtomicU64,
    bytes_pulled: AtomicU64,
    push_wait_nanos: AtomicU64,
    pull_wait_nanos: AtomicU64,
}

struct State {
    queue: VecDeque<Record>,
    bytes: usize,
    closed: bool,
    aborted: bool,
}

struct Shared {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    byte_capacity: usize,
    counters: Counters,
}

impl Shared {
    fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

/// A bounded FIFO of records. Clones share the same queue.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .field("byte_capacity", &self.shared.byte_capacity)
            .field("len", &state.queue.len())
            .field("bytes", &state.bytes)
            .field("closed", &state.closed)
            .field("aborted", &state.aborted)
            .finish()
    }
}

impl Channel {
    /// Create a channel that aborts when `token` is cancelled.
    pub fn new(config: &ChannelConfig, token: &CancellationToken) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(config.capacity.min(4096)),
                bytes: 0,
                closed: false,
                aborted: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity: config.capacity.max(1),
            byte_capacity: config.byte_capacity.max(1),
            counters: Counters::default(),
        });

        token.on_cancel_weak(&shared, Shared::abort);

        Self { shared }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn byte_capacity(&self) -> usize {
        self.shared.byte_capacity
    }

    /// Push one record, blocking while the channel is full.
    pub fn push(&self, record: Record) -> Result<(), ChannelError> {
        self.push_all(vec![record])
    }

    /// Push a batch, blocking until the whole batch fits.
    ///
    /// A batch larger than either capacity is pushed record by record.
    pub fn push_all(&self, records: Vec<Record>) -> Result<(), ChannelError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(r) = records
            .iter()
            .find(|r| r.memory_size() > self.shared.byte_capacity)
        {
            return Err(ChannelError::RecordTooLarge {
                size: r.memory_size(),
                capacity: self.shared.byte_capacity,
            });
        }

        let batch_bytes: usize = records.iter().map(Record::memory_size).sum();
        if records.len() > self.shared.capacity || batch_bytes > self.shared.byte_capacity {
            for record in records {
                self.push_all(vec![record])?;
            }
            return Ok(());
        }

        let mut state = self.shared.state.lock();
        let mut wait_start = None;
        loop {
            if state.aborted {
                return Err(ChannelError::Aborted);
            }
            if state.closed {
                return Err(ChannelError::Closed);
            }
            if state.queue.len() + records.len() <= self.shared.capacity
                && state.bytes + batch_bytes <= self.shared.byte_capacity
            {
                break;
            }
            wait_start.get_or_insert_with(Instant::now);
            self.shared.not_full.wait(&mut state);
        }
        if let Some(start) = wait_start {
            add_nanos(&self.shared.counters.push_wait_nanos, start.elapsed());
        }

        let count = records.len() as u64;
        let byte_size: usize = records.iter().map(Record::byte_size).sum();
        state.bytes += batch_bytes;
        state.queue.extend(records);
        drop(state);
        self.shared.not_empty.notify_one();

        let counters = &self.shared.counters;
        counters.records_pushed.fetch_add(count, Ordering::Relaxed);
        counters
            .bytes_pushed
            .fetch_add(byte_size as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Pull one record.
    ///
    /// Returns `Ok(None)` once the channel is closed and drained.
    pub fn pull(&self) -> Result<Option<Record>, ChannelError> {
        Ok(self.pull_all(1)?.pop())
    }

    /// Pull up to `max` records, blocking while the channel is empty and open.
    ///
    /// An empty vector means end of stream.
    pub fn pull_all(&self, max: usize) -> Result<Vec<Record>, ChannelError> {
        let max = max.max(1);
        let mut state = self.shared.state.lock();
        let mut wait_start = None;
        loop {
            if state.aborted {
                return Err(ChannelError::Aborted);
            }
            if !state.queue.is_empty() {
                break;
            }
            if state.closed {
                return Ok(Vec::new());
            }
            wait_start.get_or_insert_with(Instant::now);
            self.shared.not_empty.wait(&mut state);
        }
        if let Some(start) = wait_start {
            add_nanos(&self.shared.counters.pull_wait_nanos, start.elapsed());
        }

        let n = max.min(state.queue.len());
        let records: Vec<Record> = state.queue.drain(..n).collect();
        let freed: usize = records.iter().map(Record::memory_size).sum();
        state.bytes -= freed;
        drop(state);
        self.shared.not_full.notify_one();

        let byte_size: usize = records.iter().map(Record::byte_size).sum();
        let counters = &self.shared.counters;
        counters
            .records_pulled
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        counters
            .bytes_pulled
            .fetch_add(byte_size as u64, Ordering::Relaxed);
        Ok(records)
    }

    /// Close the channel. Queued records remain available to the consumer.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    /// Abort the channel, failing every pending and future operation.
    pub fn abort(&self) {
        self.shared.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.state.lock().aborted
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed `memory_size` of queued records.
    pub fn queued_bytes(&self) -> usize {
        self.shared.state.lock().bytes
    }

    pub fn stats(&self) -> ChannelStats {
        let c = &self.shared.counters;
        ChannelStats {
            records_pushed: c.records_pushed.load(Ordering::Relaxed),
            bytes_pushed: c.bytes_pushed.load(Ordering::Relaxed),
            records_pulled: c.records_pulled.load(Ordering::Relaxed),
            bytes_pulled: c.bytes_pulled.load(Ordering::Relaxed),
            push_wait: Duration::from_nanos(c.push_wait_nanos.load(Ordering::Relaxed)),
            pull_wait: Duration::from_nanos(c.pull_wait_nanos.load(Ordering::Relaxed)),
        }
    }
}

fn add_nanos(counter: &AtomicU64, elapsed: Duration) {
    let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
    counter.fetch_add(nanos, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::record::{COLUMN_HEAD, RECORD_HEAD};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn record(n: i64) -> Record {
        Record::new().with(n)
    }

    fn config(capacity: usize) -> ChannelConfig {
        ChannelConfig::default().with_capacity(capacity)
    }

    #[test]
    fn test_push_pull_fifo() {
        let token = CancellationToken::new();
        let channel = Channel::new(&config(8), &token);
        for i in 0..5 {
            channel.push(record(i)).unwrap();
        }
        channel.close();

        let mut seen = Vec::new();
        while let Some(r) = channel.pull().unwrap() {
            seen.push(r.get_column(0).and_then(Column::as_i64).unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(channel.queued_bytes(), 0);
    }

    #[test]
    fn test_closed_rejects_push_but_drains() {
        let token = CancellationToken::new();
        let channel = Channel::new(&config(4), &token);
        channel.push(record(1)).unwrap();
        channel.close();

        assert_eq!(channel.push(record(2)), Err(ChannelError::Closed));
        assert!(channel.pull().unwrap().is_some());
        assert!(channel.pull().unwrap().is_none());
    }

    #[test]
    fn test_record_too_large() {
        let token = CancellationToken::new();
        let cfg = config(4).with_byte_capacity(RECORD_HEAD + COLUMN_HEAD + 4);
        let channel = Channel::new(&cfg, &token);

        let err = channel.push(record(1)).unwrap_err();
        assert!(matches!(err, ChannelError::RecordTooLarge { .. }));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_push_blocks_when_full() {
        let token = CancellationToken::new();
        let channel = Channel::new(&config(2), &token);
        channel.push(record(1)).unwrap();
        channel.push(record(2)).unwrap();

        let producer = channel.clone();
        let handle = thread::spawn(move || producer.push(record(3)));

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert_eq!(channel.len(), 2);

        channel.pull().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(channel.len(), 2);
        assert!(channel.stats().push_wait > Duration::ZERO);
    }

    #[test]
    fn test_byte_capacity_blocks() {
        let token = CancellationToken::new();
        let per_record = record(0).memory_size();
        let cfg = config(100).with_byte_capacity(per_record * 2);
        let channel = Channel::new(&cfg, &token);
        channel.push(record(1)).unwrap();
        channel.push(record(2)).unwrap();

        let producer = channel.clone();
        let handle = thread::spawn(move || producer.push(record(3)));
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        channel.pull().unwrap();
        handle.join().unwrap().unwrap();
        assert!(channel.queued_bytes() <= per_record * 2);
    }

    #[test]
    fn test_cancel_unblocks_both_sides() {
        let token = CancellationToken::new();
        let full = Channel::new(&config(1), &token);
        let empty = Channel::new(&config(1), &token);
        full.push(record(1)).unwrap();

        let f = full.clone();
        let producer = thread::spawn(move || f.push(record(2)));
        let e = empty.clone();
        let consumer = thread::spawn(move || e.pull());

        thread::sleep(Duration::from_millis(30));
        token.cancel();

        assert_eq!(producer.join().unwrap(), Err(ChannelError::Aborted));
        assert_eq!(consumer.join().unwrap().unwrap_err(), ChannelError::Aborted);
    }

    #[test]
    fn test_abort_discards_queued_records() {
        let token = CancellationToken::new();
        let channel = Channel::new(&config(4), &token);
        channel.push(record(1)).unwrap();
        channel.abort();
        assert_eq!(channel.pull().unwrap_err(), ChannelError::Aborted);
    }

    #[test]
    fn test_oversized_batch_is_split() {
        let token = CancellationToken::new();
        let channel = Channel::new(&config(3), &token);
        let consumer = channel.clone();
        let handle = thread::spawn(move || {
            let mut n = 0;
            loop {
                let batch = consumer.pull_all(2).unwrap();
                if batch.is_empty() {
                    return n;
                }
                n += batch.len();
            }
        });

        channel.push_all((0..10).map(record).collect()).unwrap();
        channel.close();
        assert_eq!(handle.join().unwrap(), 10);
    }

    #[test]
    fn test_capacity_never_exceeded_under_stress() {
        let token = CancellationToken::new();
        let per_record = record(0).memory_size();
        let cfg = config(7).with_byte_capacity(per_record * 5);
        let channel = Channel::new(&cfg, &token);
        let done = Arc::new(AtomicBool::new(false));

        let observer = {
            let channel = channel.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    assert!(channel.len() <= 7);
                    assert!(channel.queued_bytes() <= per_record * 5);
                    thread::yield_now();
                }
            })
        };

        let producer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for chunk in (0..5000i64).collect::<Vec<_>>().chunks(3) {
                    channel
                        .push_all(chunk.iter().copied().map(record).collect())
                        .unwrap();
                }
                channel.close();
            })
        };

        let mut expected = 0i64;
        loop {
            let batch = channel.pull_all(4).unwrap();
            if batch.is_empty() {
                break;
            }
            for r in batch {
                assert_eq!(r.get_column(0).and_then(Column::as_i64), Some(expected));
                expected += 1;
            }
        }
        producer.join().unwrap();
        done.store(true, Ordering::Release);
        observer.join().unwrap();

        assert_eq!(expected, 5000);
        let stats = channel.stats();
        assert_eq!(stats.records_pushed, 5000);
        assert_eq!(stats.records_pulled, 5000);
        assert_eq!(stats.bytes_pulled, 5000 * 8);
    }
}
