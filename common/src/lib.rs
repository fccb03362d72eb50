//! Shared infrastructure for the TimeSeriesDB workspace.

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
