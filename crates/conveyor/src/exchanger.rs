//! Plugin-facing ends of a channel.
//!
//! Readers hand records to a [`RecordSender`], which buffers them and pushes
//! batches into the channel. Writers take records from a [`RecordReceiver`],
//! which pulls batches and hands them out one at a time.

use crate::cancel::CancellationToken;
use crate::channel::{Channel, ChannelConfig, ChannelError};
use crate::record::Record;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rate limit applied at flush time.
#[derive(Debug)]
struct Throttle {
    record_speed: Option<u64>,
    byte_speed: Option<u64>,
    started: Instant,
    records: u64,
    bytes: u64,
}

impl Throttle {
    fn from_config(config: &ChannelConfig) -> Option<Self> {
        if config.record_speed.is_none() && config.byte_speed.is_none() {
            return None;
        }
        Some(Self {
            record_speed: config.record_speed.filter(|s| *s > 0),
            byte_speed: config.byte_speed.filter(|s| *s > 0),
            started: Instant::now(),
            records: 0,
            bytes: 0,
        })
    }

    /// How long to pause so that the running average stays under both limits.
    fn delay(&mut self, records: u64, bytes: u64) -> Option<Duration> {
        self.records += records;
        self.bytes += bytes;

        let by_records = self
            .record_speed
            .map(|s| Duration::from_secs_f64(self.records as f64 / s as f64));
        let by_bytes = self
            .byte_speed
            .map(|s| Duration::from_secs_f64(self.bytes as f64 / s as f64));
        let target = by_records.into_iter().chain(by_bytes).max()?;

        target.checked_sub(self.started.elapsed())
    }
}

/// Reader-side handle: buffers records and pushes them to the channel.
#[derive(Debug)]
pub struct RecordSender {
    channel: Channel,
    token: CancellationToken,
    buffer: Vec<Record>,
    buffer_bytes: usize,
    batch_size: usize,
    throttle: Option<Throttle>,
}

impl RecordSender {
    pub fn new(channel: Channel, config: &ChannelConfig, token: CancellationToken) -> Self {
        let batch_size = config.buffer_size.clamp(1, channel.capacity());
        Self {
            channel,
            token,
            buffer: Vec::with_capacity(batch_size),
            buffer_bytes: 0,
            batch_size,
            throttle: Throttle::from_config(config),
        }
    }

    /// A fresh record for the reader to populate.
    pub fn create_record(&self) -> Record {
        Record::new()
    }

    /// Queue a record for the writer, flushing the buffer when it is full.
    pub fn send_to_writer(&mut self, record: Record) -> Result<(), ChannelError> {
        let capacity = self.channel.byte_capacity();
        if record.memory_size() > capacity {
            return Err(ChannelError::RecordTooLarge {
                size: record.memory_size(),
                capacity,
            });
        }

        if self.buffer.len() >= self.batch_size
            || self.buffer_bytes + record.memory_size() > capacity
        {
            self.flush()?;
        }
        self.buffer_bytes += record.memory_size();
        self.buffer.push(record);
        Ok(())
    }

    /// Push everything buffered so far.
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        self.buffer_bytes = 0;

        let records = batch.len() as u64;
        let bytes: u64 = batch.iter().map(|r| r.byte_size() as u64).sum();
        self.channel.push_all(batch)?;

        if let Some(delay) = self.throttle.as_mut().and_then(|t| t.delay(records, bytes)) {
            if self.token.wait_timeout(delay) {
                return Err(ChannelError::Aborted);
            }
        }
        Ok(())
    }

    /// Flush and close the channel: the writer sees end of stream after the
    /// remaining records.
    pub fn terminate(&mut self) -> Result<(), ChannelError> {
        self.flush()?;
        self.channel.close();
        Ok(())
    }
}

/// Writer-side handle: yields records in the order they were sent.
#[derive(Debug)]
pub struct RecordReceiver {
    channel: Channel,
    buffer: VecDeque<Record>,
    batch_size: usize,
}

impl RecordReceiver {
    pub fn new(channel: Channel, config: &ChannelConfig) -> Self {
        let batch_size = config.buffer_size.clamp(1, channel.capacity());
        Self {
            channel,
            buffer: VecDeque::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Next record, or `Ok(None)` at end of stream.
    pub fn get_from_reader(&mut self) -> Result<Option<Record>, ChannelError> {
        if self.buffer.is_empty() {
            self.buffer.extend(self.channel.pull_all(self.batch_size)?);
        }
        Ok(self.buffer.pop_front())
    }

    /// True once every record sent has been handed out and the stream ended.
    pub fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.channel.is_closed() && self.channel.is_empty()
    }
}
