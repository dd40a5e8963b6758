//! Ordered detector output

use crate::types::ChangeBatch;

/// One item handed from the detector to the delivery side.
///
/// Items are delivered in the order the detector produced them, so a
/// snapshot always sits between the batches read before it and the batches
/// read after it. `J` identifies the client a snapshot is for.
#[derive(Debug)]
pub enum Feed<J> {
    /// Changes for every registered client.
    Batch(ChangeBatch),
    /// Full state for one joining client.
    Snapshot { batch: ChangeBatch, join: J },
}

impl<J> Feed<J> {
    /// The batch carried by either variant
    pub fn batch(&self) -> &ChangeBatch {
        match self {
            Feed::Batch(batch) | Feed::Snapshot { batch, .. } => batch,
        }
    }
}
