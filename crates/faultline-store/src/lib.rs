//! Faultline Store - Durable on-disk record queue
//!
//! One file per record, partitioned by kind (`crashes/`, `errors/`).
//! Records are written atomically (temp file + rename) so a concurrent
//! enumeration never observes a half-written file, and they are only ever
//! removed by the delivery worker after a terminal collector outcome or by
//! an explicit history wipe.

pub mod queue;

pub use queue::{DurableQueue, PendingFile};
