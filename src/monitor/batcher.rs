//! Coalescing buffer for notification mode

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::feed::Feed;
use crate::types::{ChangeBatch, Entry};

/// Collects entries produced by the set-event listener and emits them as a
/// single update-only batch once per flush period.
///
/// Repeated sets of the same key within one period collapse into one entry
/// carrying the latest value, at the position of the first occurrence.
pub struct CoalescingBuffer<J> {
    /// Pending entries in arrival order
    buffer: Vec<Entry>,

    /// Position of each pending key in `buffer`
    index: HashMap<String, usize>,

    /// Flush period
    flush_interval: Duration,

    /// Where flushed batches go
    tx: mpsc::Sender<Feed<J>>,
}

impl<J> CoalescingBuffer<J> {
    /// Create a new buffer flushing every `flush_interval`
    pub fn new(flush_interval: Duration, tx: mpsc::Sender<Feed<J>>) -> Self {
        Self {
            buffer: Vec::new(),
            index: HashMap::new(),
            flush_interval,
            tx,
        }
    }

    /// Push an entry to the buffer
    pub fn push(&mut self, entry: Entry) {
        match self.index.get(&entry.key) {
            Some(&pos) => self.buffer[pos].value = entry.value,
            None => {
                self.index.insert(entry.key.clone(), self.buffer.len());
                self.buffer.push(entry);
            }
        }
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Emit everything pending as one batch.
    ///
    /// Returns false once the batch receiver is gone.
    pub async fn flush(&mut self) -> bool {
        if self.buffer.is_empty() {
            return !self.tx.is_closed();
        }

        self.index.clear();
        let batch = ChangeBatch::updates_only(std::mem::take(&mut self.buffer));
        debug!(updates = batch.updates.len(), "flushing coalesced set events");
        self.tx.send(Feed::Batch(batch)).await.is_ok()
    }

    /// Run the buffer as an async task
    ///
    /// Receives entries from the listener and flushes on every timer tick.
    /// When the listener closes its side, whatever is pending is flushed
    /// one last time.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Entry>) {
        let mut timer = interval(self.flush_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if !self.flush().await {
                        break;
                    }
                }

                entry = rx.recv() => {
                    match entry {
                        Some(e) => self.push(e),
                        None => {
                            self.flush().await;
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    async fn next_batch(rx: &mut mpsc::Receiver<Feed<()>>) -> ChangeBatch {
        match rx.recv().await {
            Some(Feed::Batch(batch)) => batch,
            other => panic!("expected a batch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flush_emits_one_batch() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = CoalescingBuffer::new(Duration::from_millis(10), tx);

        buffer.push(Entry::text("p", "1"));
        buffer.push(Entry::text("q", "2"));
        assert!(buffer.flush().await);

        let batch = next_batch(&mut rx).await;
        assert_eq!(batch.updates, vec![Entry::text("p", "1"), Entry::text("q", "2")]);
        assert!(batch.deletes.is_empty());
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_empty_flush_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = CoalescingBuffer::<()>::new(Duration::from_millis(10), tx);

        assert!(buffer.flush().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeated_key_keeps_latest_value() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = CoalescingBuffer::new(Duration::from_millis(10), tx);

        buffer.push(Entry::text("p", "1"));
        buffer.push(Entry::text("q", "2"));
        buffer.push(Entry::new("p", Value::Binary(vec![0])));
        assert_eq!(buffer.len(), 2);
        buffer.flush().await;

        let batch = next_batch(&mut rx).await;
        assert_eq!(batch.updates[0], Entry::new("p", Value::Binary(vec![0])));
        assert_eq!(batch.updates[1], Entry::text("q", "2"));
    }

    #[tokio::test]
    async fn test_run_coalesces_events_within_one_period() {
        let (batch_tx, mut batch_rx) = mpsc::channel(8);
        let (entry_tx, entry_rx) = mpsc::channel(8);

        // Both events are queued before the first period elapses
        entry_tx.send(Entry::text("p", "1")).await.unwrap();
        entry_tx.send(Entry::text("q", "2")).await.unwrap();

        let buffer = CoalescingBuffer::new(Duration::from_millis(100), batch_tx);
        let task = tokio::spawn(buffer.run(entry_rx));

        let batch = tokio::time::timeout(Duration::from_secs(2), next_batch(&mut batch_rx))
            .await
            .unwrap();
        assert_eq!(batch.updates.len(), 2);
        assert!(batch.deletes.is_empty());

        drop(entry_tx);
        task.await.unwrap();
        assert!(batch_rx.recv().await.is_none());
    }
}
