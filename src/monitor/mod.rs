//! Change detection
//!
//! Two strategies produce [`ChangeBatch`](crate::types::ChangeBatch)es:
//!
//! - **Polling**: every period, scan all keys, diff raw values against the
//!   baseline and compute deletions from the previous key set.
//! - **Notification**: subscribe to set events, re-read each named key and
//!   coalesce the results into one batch per period. No deletions.
//!
//! Snapshots for joining clients are read by the detector itself, between
//! cycles, and go out on the same ordered [`Feed`] as the batches.

mod batcher;
mod detector;
mod feed;
mod notify;
mod snapshot;

pub use batcher::CoalescingBuffer;
pub use detector::ChangeDetector;
pub use feed::Feed;
pub use notify::{enable_set_events, merge_notification_flags};
pub use snapshot::read_snapshot;
pub use crate::store::publishes_set_events;
