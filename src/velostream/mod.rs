pub mod config;
pub mod kafka;
pub mod serialization;
pub mod test_harness;
