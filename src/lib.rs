pub mod config;
pub mod daemon;
pub mod error;
pub mod memory_killer;
pub mod monitor;
pub mod process;
pub mod rss;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod worker;
