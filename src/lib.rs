pub mod aggregate;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod coords;
pub mod crop;
pub mod error;
pub mod markers;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod util;
