//! Session enumeration and parsing.

pub mod collector;
pub mod parser;

pub use collector::{
    CommandSessionBackend, SessionCollector, SessionEnumerationBackend, SessionListing,
    SessionMode,
};
