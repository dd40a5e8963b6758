//! Data types for the monitor
//!
//! This module contains the values, entries and batches that flow from the
//! store through the change detector to every connected client.

mod batch;
mod value;

pub use batch::{ChangeBatch, Entry};
pub use value::Value;
