pub mod config;
pub mod memory;
pub mod redis;
pub mod review;
pub mod store;
pub mod types;
