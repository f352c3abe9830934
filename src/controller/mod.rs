//! Reconciliation engine
//!
//! Drives every discovered SealedSecret through read, recover, reseal and
//! apply, recording exactly one outcome per item.

mod reencrypt;
mod summary;

pub use reencrypt::{plan_items, PlannedItem, Reconciler};
pub use summary::SummaryRecorder;
