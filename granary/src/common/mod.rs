//! Common utilities shared by the accumulators, the resize coordinator and the spill
//! manager

pub mod config;
pub mod profiler;
pub mod types;
pub mod utils;
pub mod uuid;
