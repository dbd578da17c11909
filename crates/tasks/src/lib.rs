//! Concurrency primitives shared across the node.
//!
//! - [`ExecutionQueue`]: a serialising async task runner with per-key
//!   deduplication and error accumulation. Used to drive registry event
//!   handlers and per-validator setup without concurrent execution.
//! - [`Subject`]: a named-subscriber pub-sub fan-out used for contract
//!   events and outbound streams. Slow consumers never block producers.

mod queue;
mod subject;

pub use queue::{ExecutionQueue, TaskError};
pub use subject::{Subject, SubjectError};
