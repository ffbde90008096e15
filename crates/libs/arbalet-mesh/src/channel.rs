//! Bounded byte channel carrying whole frame records.
//!
//! A fixed-capacity ring of bytes. Writers wait until the record fits, then
//! reserve, copy and publish it in one step under the ring lock, so a reader
//! never observes a reserved but uncopied record. Writers are serialized so
//! a large record waiting for space is not starved by smaller ones.
//!
//! The ring keeps each record's length as written. A COLOR record admitted
//! before the route table grows still comes out whole, at the size it was
//! validated against.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::ChannelError;

struct Ring {
    buf: Box<[u8]>,
    /// Next byte to read.
    head: usize,
    /// Next byte to write.
    tail: usize,
    used: usize,
    /// Lengths of the buffered records, oldest first.
    records: VecDeque<usize>,
}

impl Ring {
    fn free(&self) -> usize {
        self.buf.len() - self.used
    }

    fn push(&mut self, record: &[u8]) {
        let capacity = self.buf.len();
        let first = record.len().min(capacity - self.tail);
        self.buf[self.tail..self.tail + first].copy_from_slice(&record[..first]);
        self.buf[..record.len() - first].copy_from_slice(&record[first..]);
        self.tail = (self.tail + record.len()) % capacity;
        self.used += record.len();
        self.records.push_back(record.len());
    }

    fn pop(&mut self, len: usize) -> Vec<u8> {
        let capacity = self.buf.len();
        let first = len.min(capacity - self.head);
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.buf[self.head..self.head + first]);
        out.extend_from_slice(&self.buf[..len - first]);
        self.head = (self.head + len) % capacity;
        self.used -= len;
        out
    }
}

pub struct ByteChannel {
    name: &'static str,
    capacity: usize,
    ring: Mutex<Ring>,
    writers: tokio::sync::Mutex<()>,
    space: Notify,
}

impl ByteChannel {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            ring: Mutex::new(Ring {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                used: 0,
                records: VecDeque::new(),
            }),
            writers: tokio::sync::Mutex::new(()),
            space: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.lock().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        self.lock().free()
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record, waiting for free space.
    pub async fn write(&self, record: &[u8]) -> Result<(), ChannelError> {
        if record.is_empty() {
            return Err(ChannelError::EmptyRecord);
        }
        if record.len() > self.capacity {
            return Err(ChannelError::RecordTooLarge { len: record.len(), capacity: self.capacity });
        }

        let _turn = self.writers.lock().await;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut ring = self.lock();
                if ring.free() >= record.len() {
                    ring.push(record);
                    log::trace!(
                        "channel: {} << {} bytes, {} free",
                        self.name,
                        record.len(),
                        ring.free()
                    );
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Records currently buffered.
    pub fn records(&self) -> usize {
        self.lock().records.len()
    }

    /// Take the oldest record, or `None` when nothing is pending.
    pub fn try_read(&self) -> Option<Vec<u8>> {
        let record = {
            let mut ring = self.lock();
            let len = ring.records.pop_front()?;
            ring.pop(len)
        };
        self.space.notify_one();
        Some(record)
    }
}

impl std::fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.lock();
        f.debug_struct("ByteChannel")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("used", &ring.used)
            .field("records", &ring.records.len())
            .finish()
    }
}
