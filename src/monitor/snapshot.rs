//! Full snapshot reads for newly admitted clients

use crate::config::KeyFilter;
use crate::error::StoreResult;
use crate::store::KeyValueStore;
use crate::types::{ChangeBatch, Entry, Value};

/// Read every monitored scalar key, sorted by name, as one update-only batch.
///
/// Stateless; [`ChangeDetector::snapshot`](super::ChangeDetector::snapshot)
/// wraps it and reconciles the baseline with what was read.
pub async fn read_snapshot(store: &dyn KeyValueStore, filter: &KeyFilter) -> StoreResult<ChangeBatch> {
    let mut keys = store.scan_keys().await?;
    keys.sort_unstable();
    keys.dedup();

    let mut updates = Vec::with_capacity(keys.len());
    for key in keys {
        if !filter.matches(&key) || !store.is_scalar(&key).await? {
            continue;
        }
        if let Some(raw) = store.get(&key).await? {
            updates.push(Entry::new(key, Value::from_raw(raw)));
        }
    }

    Ok(ChangeBatch::updates_only(updates))
}
