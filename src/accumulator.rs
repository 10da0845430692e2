//! Demand-driven buffer between the RX notification task and the caller
//! awaiting a chunked response.
//!
//! The notification task is the only producer and the requesting caller the
//! only consumer. Arrival and consumption are decoupled by a FIFO bounded by
//! the armed count, so the producer never blocks and never waits on the
//! consumer.
//!
//! ```
//! # use frame_rs::accumulator::ResponseAccumulator;
//! let acc = ResponseAccumulator::new();
//! acc.arm(2);
//! acc.push(b"a".to_vec());
//! acc.push(b"b".to_vec());
//! acc.push(b"c".to_vec()); // over budget, dropped
//! assert_eq!(acc.take(), Some(b"a".to_vec()));
//! assert_eq!(acc.take(), Some(b"b".to_vec()));
//! assert_eq!(acc.take(), None);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use futures::stream::{self, Stream};
use log::{debug, trace, warn};
use tokio::sync::Notify;

/// The one pending expectation a session may have at a time.
#[derive(Debug, Default)]
struct Pending {
    /// Chunks still to be accepted. `0` means nothing is armed.
    remaining: usize,
    /// Accepted but not yet taken, in arrival order.
    chunks: VecDeque<Vec<u8>>,
}

/// Converts the push-based RX notification stream into a pull sequence of at
/// most `expected` chunks.
///
/// All state lives behind [`arm`](Self::arm), [`push`](Self::push) and
/// [`take`](Self::take); the lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    pending: Mutex<Pending>,
    ready: Notify,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // Pending is plain data; a panic elsewhere cannot leave it torn.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new expectation of `expected` chunks.
    ///
    /// Always discards whatever the previous expectation left behind. Doing
    /// so while that expectation is still live is a caller bug and is logged
    /// as a protocol violation.
    pub fn arm(&self, expected: usize) {
        let mut pending = self.lock();
        if pending.remaining > 0 || !pending.chunks.is_empty() {
            warn!(
                "protocol violation: re-armed with {} chunk(s) outstanding and {} unread; discarding",
                pending.remaining,
                pending.chunks.len()
            );
        }
        pending.chunks.clear();
        pending.remaining = expected;
        debug!("accumulator armed for {expected} chunk(s)");
    }

    /// [`arm`](Self::arm) for the lifetime of the returned guard; dropping it
    /// disarms, so an abandoned or timed-out request cannot leak chunks into
    /// the next one.
    pub fn expect(&self, expected: usize) -> Expectation<'_> {
        self.arm(expected);
        Expectation { accumulator: self }
    }

    /// Drop the current expectation and anything buffered for it. A consumer
    /// parked in [`next_chunk`](Self::next_chunk) wakes up with `None`.
    pub fn disarm(&self) {
        {
            let mut pending = self.lock();
            pending.remaining = 0;
            pending.chunks.clear();
        }
        self.ready.notify_one();
    }

    /// Stop accepting chunks but keep what is buffered. A parked
    /// [`next_chunk`](Self::next_chunk) drains the buffer, then sees `None`.
    pub fn close(&self) {
        {
            let mut pending = self.lock();
            if pending.remaining > 0 {
                debug!(
                    "accumulator closed with {} chunk(s) outstanding, {} unread",
                    pending.remaining,
                    pending.chunks.len()
                );
            }
            pending.remaining = 0;
        }
        self.ready.notify_one();
    }

    /// Offer one RX chunk. Returns `false` when nothing is armed (or the
    /// armed budget is spent) and the chunk was dropped.
    pub fn push(&self, chunk: Vec<u8>) -> bool {
        {
            let mut pending = self.lock();
            if pending.remaining == 0 {
                trace!("dropping unsolicited chunk ({} bytes)", chunk.len());
                return false;
            }
            pending.remaining -= 1;
            pending.chunks.push_back(chunk);
        }
        self.ready.notify_one();
        true
    }

    /// `true` when a chunk is buffered and [`take`](Self::take) will return it.
    pub fn next_ready(&self) -> bool {
        !self.lock().chunks.is_empty()
    }

    /// Pop the oldest buffered chunk, if any. Never waits.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.lock().chunks.pop_front()
    }

    /// Chunks the current expectation will still accept.
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    /// Wait for the next chunk of the current expectation.
    ///
    /// Resolves to `None` immediately once nothing more is expected and the
    /// buffer is empty, so "nothing was ever expected" never looks like
    /// "still waiting".
    pub async fn next_chunk(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut pending = self.lock();
                if let Some(chunk) = pending.chunks.pop_front() {
                    return Some(chunk);
                }
                if pending.remaining == 0 {
                    return None;
                }
            }
            // notify_one stores a permit, so a push landing between the
            // check above and this await is not lost.
            self.ready.notified().await;
        }
    }

    /// The current expectation as a one-shot, forward-only stream.
    pub fn chunks(&self) -> impl Stream<Item = Vec<u8>> + '_ {
        stream::unfold(self, |acc| async move {
            acc.next_chunk().await.map(|chunk| (chunk, acc))
        })
    }
}

/// A live expectation on a [`ResponseAccumulator`]. Disarms on drop.
#[must_use = "the expectation is disarmed as soon as the guard is dropped"]
pub struct Expectation<'a> {
    accumulator: &'a ResponseAccumulator,
}

impl Drop for Expectation<'_> {
    fn drop(&mut self) {
        self.accumulator.disarm();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    fn text(chunks: Vec<Vec<u8>>) -> Vec<String> {
        chunks
            .into_iter()
            .map(|c| String::from_utf8(c).unwrap())
            .collect()
    }

    #[test]
    fn yields_exactly_the_armed_chunks_in_order() {
        let acc = ResponseAccumulator::new();
        acc.arm(3);
        for c in ["a", "b", "c"] {
            assert!(acc.push(c.as_bytes().to_vec()));
        }
        let mut out = Vec::new();
        while acc.next_ready() {
            out.push(acc.take().unwrap());
        }
        assert_eq!(text(out), ["a", "b", "c"]);
        assert_eq!(acc.take(), None);
        assert_eq!(acc.remaining(), 0);
    }

    #[test]
    fn push_without_expectation_is_a_no_op() {
        let acc = ResponseAccumulator::new();
        assert!(!acc.push(b"stray".to_vec()));
        assert!(!acc.next_ready());

        acc.arm(1);
        acc.push(b"wanted".to_vec());
        assert_eq!(acc.take(), Some(b"wanted".to_vec()));
        assert_eq!(acc.take(), None);
    }

    #[test]
    fn pushes_beyond_the_budget_are_dropped() {
        let acc = ResponseAccumulator::new();
        acc.arm(1);
        assert!(acc.push(b"one".to_vec()));
        assert!(!acc.push(b"two".to_vec()));
        assert_eq!(acc.remaining(), 0);
        assert_eq!(acc.take(), Some(b"one".to_vec()));
        assert_eq!(acc.take(), None);
    }

    #[test]
    fn arm_discards_unconsumed_state() {
        let acc = ResponseAccumulator::new();
        acc.arm(4);
        acc.push(b"old".to_vec());
        acc.arm(1);
        assert!(!acc.next_ready());
        assert_eq!(acc.remaining(), 1);
        acc.push(b"new".to_vec());
        assert_eq!(acc.take(), Some(b"new".to_vec()));
    }

    #[test]
    fn disarm_clears_everything() {
        let acc = ResponseAccumulator::new();
        acc.arm(2);
        acc.push(b"x".to_vec());
        acc.disarm();
        assert_eq!(acc.remaining(), 0);
        assert!(!acc.next_ready());
        assert!(!acc.push(b"late".to_vec()));
    }

    #[tokio::test]
    async fn close_keeps_buffered_chunks_for_the_consumer() {
        let acc = ResponseAccumulator::new();
        acc.arm(3);
        acc.push(b"a".to_vec());
        acc.push(b"b".to_vec());
        acc.close();

        assert!(!acc.push(b"late".to_vec()));
        let got: Vec<Vec<u8>> = acc.chunks().collect().await;
        assert_eq!(text(got), ["a", "b"]);
    }

    #[test]
    fn expectation_guard_disarms_on_drop() {
        let acc = ResponseAccumulator::new();
        {
            let _expectation = acc.expect(3);
            acc.push(b"a".to_vec());
            assert_eq!(acc.remaining(), 2);
        }
        assert_eq!(acc.remaining(), 0);
        assert!(!acc.next_ready());
    }

    #[tokio::test]
    async fn reading_with_nothing_armed_returns_at_once() {
        let acc = ResponseAccumulator::new();
        assert_eq!(acc.next_chunk().await, None);
        acc.arm(0);
        assert_eq!(acc.next_chunk().await, None);
    }

    #[tokio::test]
    async fn consumer_wakes_on_push_from_another_task() {
        let acc = Arc::new(ResponseAccumulator::new());
        acc.arm(2);

        let producer = Arc::clone(&acc);
        tokio::spawn(async move {
            for c in ["first", "second"] {
                tokio::time::sleep(Duration::from_millis(5)).await;
                producer.push(c.as_bytes().to_vec());
            }
        });

        let got: Vec<Vec<u8>> = acc.chunks().collect().await;
        assert_eq!(text(got), ["first", "second"]);
        assert_eq!(acc.next_chunk().await, None);
    }
}
