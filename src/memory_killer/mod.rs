//! Memory guard for the worker process.
//!
//! - [`MemoryKiller`]: samples RSS and restarts the worker in stages
//! - [`Phase`]: the state machine, reported as a gauge
//! - [`GrowthTable`]: memory growth each worker class is allowed while it runs

pub mod growth;
pub mod killer;
pub mod phase;

pub use growth::{expected_growth_kb, GrowthTable, MemoryGrowth};
pub use killer::{KillerState, MemoryKiller};
pub use phase::Phase;
