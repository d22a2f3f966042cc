//! Synchronization primitives.

mod spin;

pub use spin::{SpinGuard, SpinLock};
