// Integration Tests - Full broker lifecycles
// The Docker tests only build with the `kafka` feature


// Re-export common test utilities
pub use crate::unit::common::*;
