//! Low-level building blocks shared by operations and executers.

/// Stream adapters and synchronization used to share rows between stages.
pub mod concurrency;
