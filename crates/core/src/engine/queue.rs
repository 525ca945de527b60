use std::collections::VecDeque;

use crate::{media::DecodedFrame, SegmentId};

#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub segment: SegmentId,
    pub frame: DecodedFrame,
}

impl QueuedFrame {
    pub fn timestamp_us(&self) -> i64 {
        self.frame.timestamp_us
    }
}

/// Bounded buffer between a decoder and the presenter.
///
/// A dequeued frame is owned by the caller and released when dropped. The
/// last presented frame is retained for repaints until it is replaced.
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    pending: VecDeque<QueuedFrame>,
    last: Option<QueuedFrame>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pending: VecDeque::with_capacity(capacity),
            last: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Hands the frame back when the queue is full.
    pub fn push(&mut self, frame: QueuedFrame) -> Result<(), QueuedFrame> {
        if self.is_full() {
            return Err(frame);
        }
        self.pending.push_back(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.pending.pop_front()
    }

    pub fn retain_last(&mut self, frame: QueuedFrame) {
        self.last = Some(frame);
    }

    pub fn last(&self) -> Option<&QueuedFrame> {
        self.last.as_ref()
    }

    /// Last presented timestamp of `segment`, if the retained frame belongs
    /// to it.
    pub fn last_timestamp_for(&self, segment: SegmentId) -> Option<i64> {
        self.last
            .as_ref()
            .filter(|frame| frame.segment == segment)
            .map(QueuedFrame::timestamp_us)
    }

    /// Releases pending frames and the retained one.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.last = None;
    }
}
