//! Process-level building blocks the broker controller is assembled from.

pub mod output;
pub mod process;
pub mod readiness;
