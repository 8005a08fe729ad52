//! Background scheduling of discovery and order-sync cycles.

pub mod directory;
pub mod lease;
pub mod scheduler;

pub use directory::{AdapterFactory, UserAdapters, UserDirectory};
pub use lease::{CycleKind, LeaseGuard, LeaseRegistry};
pub use scheduler::{
    CycleOutcome, CycleReport, RejectReason, Scheduler, SkipReason, TriggerResult,
};
