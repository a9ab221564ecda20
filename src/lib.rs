pub mod client;
pub mod collections;
pub mod collector;
pub mod config;
pub mod connection_pool;
pub mod context;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod percentiles;
pub mod report;
pub mod utils;
pub mod worker;
