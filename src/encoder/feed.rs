//! Bounded feed queue between a capture source and its encoder
//!
//! The producer side blocks briefly under backpressure; once the queue is
//! full past the grace period, the oldest unconsumed raw sample is dropped
//! and counted. Encoded output is never dropped here, only raw input.

use crate::error::{PipelineError, PipelineResult};
use crate::sample::{RawSample, TrackKind};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Maximum raw samples buffered per track
pub(crate) const FEED_QUEUE_DEPTH: usize = 64;

/// How long `push` blocks waiting for space before dropping the oldest sample
const FEED_BLOCK: Duration = Duration::from_millis(50);

pub(crate) enum FeedItem {
    Sample(RawSample),
    EndOfStream,
}

struct FeedInner {
    items: VecDeque<FeedItem>,
    eos_sent: bool,
}

/// Shared between the producing source (via `SampleSink`) and the drain
/// thread that owns the encoder.
pub(crate) struct FeedQueue {
    kind: TrackKind,
    inner: Mutex<FeedInner>,
    space: Condvar,
    ready: Condvar,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl FeedQueue {
    pub(crate) fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(FeedInner {
                items: VecDeque::with_capacity(FEED_QUEUE_DEPTH),
                eos_sent: false,
            }),
            space: Condvar::new(),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Queue a raw sample, blocking up to the grace period under backpressure.
    ///
    /// Fails with `EncoderClosed` once the encoder has been stopped or fed
    /// its end-of-stream marker.
    pub(crate) fn push(&self, sample: RawSample) -> PipelineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::EncoderClosed);
        }

        let mut inner = self.inner.lock();
        if inner.eos_sent {
            return Err(PipelineError::EncoderClosed);
        }

        if inner.items.len() >= FEED_QUEUE_DEPTH {
            self.space.wait_for(&mut inner, FEED_BLOCK);
            // End-of-stream may have been queued while we waited
            if inner.eos_sent {
                return Err(PipelineError::EncoderClosed);
            }
        }

        if inner.items.len() >= FEED_QUEUE_DEPTH {
            // Still full after the grace period: drop the oldest sample so
            // the track keeps moving. A glitch is acceptable, a stall is not.
            if let Some(pos) = inner
                .items
                .iter()
                .position(|item| matches!(item, FeedItem::Sample(_)))
            {
                inner.items.remove(pos);
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(track = %self.kind, total, "dropped oldest raw sample under backpressure");
            }
        }

        inner.items.push_back(FeedItem::Sample(sample));
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Queue the end-of-stream marker. Idempotent.
    pub(crate) fn finish(&self) {
        let mut inner = self.inner.lock();
        if inner.eos_sent {
            return;
        }
        inner.eos_sent = true;
        inner.items.push_back(FeedItem::EndOfStream);
        drop(inner);
        self.ready.notify_one();
    }

    /// Take the next item, waiting up to `timeout`. `None` means the wait
    /// timed out and the caller should re-poll.
    pub(crate) fn pop(&self, timeout: Duration) -> Option<FeedItem> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            self.ready.wait_for(&mut inner, timeout);
        }
        let item = inner.items.pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    /// Reject all future pushes
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Instant;

    fn sample() -> RawSample {
        RawSample::new(Bytes::from_static(b"pcm"), Instant::now())
    }

    #[test]
    fn test_push_pop_order() {
        let queue = FeedQueue::new(TrackKind::Audio);
        queue.push(sample()).unwrap();
        queue.push(sample()).unwrap();

        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Some(FeedItem::Sample(_))
        ));
        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Some(FeedItem::Sample(_))
        ));
        assert!(queue.pop(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let queue = FeedQueue::new(TrackKind::Video);
        for _ in 0..FEED_QUEUE_DEPTH {
            queue.push(sample()).unwrap();
        }
        assert_eq!(queue.dropped(), 0);

        // Queue is full and nobody is draining: these must not block forever
        // and must each displace the oldest sample.
        queue.push(sample()).unwrap();
        queue.push(sample()).unwrap();
        assert_eq!(queue.dropped(), 2);

        let mut remaining = 0;
        while queue.pop(Duration::from_millis(1)).is_some() {
            remaining += 1;
        }
        assert_eq!(remaining, FEED_QUEUE_DEPTH);
    }

    #[test]
    fn test_finish_is_idempotent_and_terminal() {
        let queue = FeedQueue::new(TrackKind::Audio);
        queue.push(sample()).unwrap();
        queue.finish();
        queue.finish();

        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Some(FeedItem::Sample(_))
        ));
        assert!(matches!(
            queue.pop(Duration::from_millis(10)),
            Some(FeedItem::EndOfStream)
        ));
        assert!(queue.pop(Duration::from_millis(1)).is_none());

        assert!(matches!(
            queue.push(sample()),
            Err(PipelineError::EncoderClosed)
        ));
    }

    #[test]
    fn test_push_after_close_fails() {
        let queue = FeedQueue::new(TrackKind::Video);
        queue.close();
        assert!(matches!(
            queue.push(sample()),
            Err(PipelineError::EncoderClosed)
        ));
    }
}
