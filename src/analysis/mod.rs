//! Analysis modules.
//!
//! This module turns per-host outcomes into the deduplicated run batch.

pub mod aggregator;

pub use aggregator::*;
