//! Keyspace-notification configuration

use tracing::{debug, info};

use crate::error::{ConfigError, MonitorResult, StoreError};
use crate::store::{publishes_set_events, KeyValueStore};

/// Add the flags needed for set events without removing any.
///
/// Returns `None` when `current` already has them.
pub fn merge_notification_flags(current: &str) -> Option<String> {
    let mut flags = current.to_string();
    if !flags.contains('$') && !flags.contains('A') {
        flags.push('$');
    }
    if !flags.contains('E') {
        flags.push('E');
    }
    (flags != current).then_some(flags)
}

/// Idempotently enable set-event notifications on the store.
pub async fn enable_set_events(store: &dyn KeyValueStore) -> MonitorResult<()> {
    let current = store.notification_flags().await?;
    let Some(merged) = merge_notification_flags(&current) else {
        debug!(flags = %current, "set-event notifications already enabled");
        return Ok(());
    };

    match store.set_notification_flags(&merged).await {
        Ok(()) => {}
        Err(err @ StoreError::Disconnected(_)) => return Err(err.into()),
        Err(err) => return Err(ConfigError::NotificationFlags(err.to_string()).into()),
    }

    let applied = store.notification_flags().await?;
    if !publishes_set_events(&applied) {
        return Err(ConfigError::NotificationFlags(format!(
            "store reports {:?} after setting {:?}",
            applied, merged
        ))
        .into());
    }

    info!(from = %current, to = %applied, "enabled set-event notifications");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::store::MemoryStore;

    #[test]
    fn test_merge_from_empty() {
        assert_eq!(merge_notification_flags(""), Some("$E".to_string()));
    }

    #[test]
    fn test_merge_keeps_existing_flags() {
        assert_eq!(merge_notification_flags("Kx"), Some("Kx$E".to_string()));
        assert_eq!(merge_notification_flags("Kg$"), Some("Kg$E".to_string()));
    }

    #[test]
    fn test_merge_is_idempotent() {
        assert_eq!(merge_notification_flags("$E"), None);
        assert_eq!(merge_notification_flags("AKE"), None);

        let once = merge_notification_flags("lK").unwrap();
        assert_eq!(merge_notification_flags(&once), None);
    }

    #[test]
    fn test_publishes_set_events() {
        assert!(publishes_set_events("E$"));
        assert!(publishes_set_events("KEA"));
        assert!(!publishes_set_events("K$"));
        assert!(!publishes_set_events("E"));
    }

    #[tokio::test]
    async fn test_enable_on_store() {
        let store = MemoryStore::new().with_flags("Kx");
        enable_set_events(&store).await.unwrap();
        assert_eq!(store.flags(), "Kx$E");

        // Second call leaves the flags alone
        enable_set_events(&store).await.unwrap();
        assert_eq!(store.flags(), "Kx$E");
    }

    #[tokio::test]
    async fn test_enable_fails_when_disconnected() {
        let store = MemoryStore::new();
        store.disconnect();
        let err = enable_set_events(&store).await.unwrap_err();
        assert!(matches!(err, MonitorError::Store(StoreError::Disconnected(_))));
    }
}
