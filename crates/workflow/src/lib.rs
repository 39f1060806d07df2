//! Background tasks — the failed-request drainer and periodic maintenance.
//!
//! Both run as independent tokio tasks on fixed intervals, separate from
//! foreground traffic, and stop when the shutdown signal flips to `true`.

pub mod drainer;
pub mod maintenance;
#[cfg(test)]
mod test_support;

pub use drainer::{DrainReport, Drainer, EntryResult};
pub use maintenance::{Maintenance, MaintenanceReport};
