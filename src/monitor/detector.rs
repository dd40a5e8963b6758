//! Change detection engine

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::batcher::CoalescingBuffer;
use super::feed::Feed;
use super::notify::enable_set_events;
use super::snapshot::read_snapshot;
use crate::config::{KeyFilter, Mode};
use crate::error::{MonitorResult, StoreError, StoreResult};
use crate::shutdown::ShutdownSignal;
use crate::store::{KeyValueStore, EVENT_CHANNEL_CAPACITY};
use crate::types::{ChangeBatch, Entry, Value};

/// Discovers what changed in the store since the last cycle.
///
/// Owns the baseline (last transmitted raw value per key) and the key set of
/// the previous scan. Nothing else reads or writes either of them.
pub struct ChangeDetector {
    store: Arc<dyn KeyValueStore>,
    filter: KeyFilter,
    baseline: HashMap<String, Vec<u8>>,
    previous_keys: HashSet<String>,
}

impl ChangeDetector {
    /// Create a detector with an empty baseline
    pub fn new(store: Arc<dyn KeyValueStore>, filter: KeyFilter) -> Self {
        Self {
            store,
            filter,
            baseline: HashMap::new(),
            previous_keys: HashSet::new(),
        }
    }

    /// Last transmitted raw value per key
    pub fn baseline(&self) -> &HashMap<String, Vec<u8>> {
        &self.baseline
    }

    /// Keys observed by the last scan
    pub fn known_keys(&self) -> &HashSet<String> {
        &self.previous_keys
    }

    /// Run one polling cycle.
    ///
    /// Returns `None` when nothing changed.
    pub async fn poll_once(&mut self) -> StoreResult<Option<ChangeBatch>> {
        let mut updates = Vec::new();
        let mut current = HashSet::new();

        for key in self.store.scan_keys().await? {
            if !self.filter.matches(&key) || !self.store.is_scalar(&key).await? {
                continue;
            }
            // Gone between scan and read: treat as absent from this cycle
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            if !current.insert(key.clone()) {
                continue;
            }
            if let Some(entry) = self.record(key, raw) {
                updates.push(entry);
            }
        }

        let mut deletes: Vec<String> = self.previous_keys.difference(&current).cloned().collect();
        deletes.sort_unstable();
        for key in &deletes {
            self.baseline.remove(key);
        }
        self.previous_keys = current;

        let batch = ChangeBatch::new(updates, deletes);
        Ok((!batch.is_empty()).then_some(batch))
    }

    /// Re-read a key named by a set event.
    ///
    /// Applies the same filter and skip-unchanged rules as polling.
    pub async fn read_change(&mut self, key: &str) -> StoreResult<Option<Entry>> {
        if !self.filter.matches(key) {
            return Ok(None);
        }
        Ok(match self.store.get(key).await? {
            Some(raw) => self.record(key.to_string(), raw),
            None => None,
        })
    }

    /// Compare against the baseline; on change, update it and tag the value.
    fn record(&mut self, key: String, raw: Vec<u8>) -> Option<Entry> {
        if self.baseline.get(&key) == Some(&raw) {
            return None;
        }
        let value = Value::from_raw(raw.clone());
        self.baseline.insert(key.clone(), raw);
        Some(Entry::new(key, value))
    }

    /// Read a full snapshot for a joining client.
    ///
    /// Keys whose current value differs from the baseline are dropped from
    /// it, and keys no longer present are forgotten, so the next cycle
    /// resends them to everyone. A value that changed and changed back
    /// before that cycle therefore still reaches the new client.
    pub async fn snapshot(&mut self) -> StoreResult<ChangeBatch> {
        let batch = read_snapshot(self.store.as_ref(), &self.filter).await?;

        {
            let mut present = HashSet::with_capacity(batch.updates.len());
            for entry in &batch.updates {
                present.insert(entry.key.as_str());
                let sent = self.baseline.get(&entry.key).map(Vec::as_slice);
                if sent != Some(entry.value.as_bytes()) {
                    self.baseline.remove(&entry.key);
                    // Report a delete if it disappears before the next scan
                    self.previous_keys.insert(entry.key.clone());
                }
            }
            self.baseline.retain(|key, _| present.contains(key.as_str()));
        }

        Ok(batch)
    }

    /// Run the detection loop for `mode` until shutdown or a store failure.
    ///
    /// Each value received on `joins` is answered with a
    /// [`Feed::Snapshot`] placed in order among the batches.
    pub async fn run<J>(
        self,
        mode: Mode,
        period: Duration,
        joins: mpsc::Receiver<J>,
        feed: mpsc::Sender<Feed<J>>,
        shutdown: ShutdownSignal,
    ) -> MonitorResult<()>
    where
        J: Send + 'static,
    {
        match mode {
            Mode::Polling => Ok(self.run_polling(period, joins, feed, shutdown).await?),
            Mode::Notification => self.run_notification(period, joins, feed, shutdown).await,
        }
    }

    /// Scan and diff every `period`.
    pub async fn run_polling<J>(
        mut self,
        period: Duration,
        mut joins: mpsc::Receiver<J>,
        feed: mpsc::Sender<Feed<J>>,
        mut shutdown: ShutdownSignal,
    ) -> StoreResult<()> {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "polling store for changes");

        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                Some(join) = joins.recv() => {
                    let batch = self.snapshot().await?;
                    if feed.send(Feed::Snapshot { batch, join }).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Some(batch) = self.poll_once().await? {
                debug!(
                    updates = batch.updates.len(),
                    deletes = batch.deletes.len(),
                    "detected changes"
                );
                if feed.send(Feed::Batch(batch)).await.is_err() {
                    // Fan-out is gone, the server is stopping
                    return Ok(());
                }
            }
        }
    }

    /// Listen for set events and flush them coalesced every `period`.
    ///
    /// Deletions are not reported in this mode.
    pub async fn run_notification<J>(
        mut self,
        period: Duration,
        mut joins: mpsc::Receiver<J>,
        feed: mpsc::Sender<Feed<J>>,
        mut shutdown: ShutdownSignal,
    ) -> MonitorResult<()>
    where
        J: Send + 'static,
    {
        enable_set_events(self.store.as_ref()).await?;
        let mut events = self.store.subscribe_set_events().await?;
        info!(period_ms = period.as_millis() as u64, "listening for set events");

        let (entry_tx, entry_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let flusher = tokio::spawn(CoalescingBuffer::new(period, feed.clone()).run(entry_rx));

        let result: MonitorResult<()> = loop {
            let key = tokio::select! {
                _ = shutdown.wait() => break Ok(()),
                Some(join) = joins.recv() => {
                    match self.snapshot().await {
                        Ok(batch) => {
                            if feed.send(Feed::Snapshot { batch, join }).await.is_err() {
                                break Ok(());
                            }
                            continue;
                        }
                        Err(err) => break Err(err.into()),
                    }
                }
                event = events.recv() => match event {
                    Some(key) => key,
                    None => {
                        break Err(StoreError::Disconnected("set-event subscription closed".into()).into())
                    }
                },
            };

            match self.read_change(&key).await {
                Ok(Some(entry)) => {
                    if entry_tx.send(entry).await.is_err() {
                        break Ok(());
                    }
                }
                Ok(None) => {}
                Err(err) => break Err(err.into()),
            }
        };

        drop(entry_tx);
        drop(feed);
        flusher.await?;
        result
    }
}
