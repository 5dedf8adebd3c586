//! Embedded broker test harness
//!
//! Runs code against a throwaway coordination service and broker:
//!
//! ```text
//! with_zookeeper ──► temp dataDir, clientPort=0 ──► zookeeper_connect scoped
//!   └─ with_broker ──► temp log.dir, port=0     ──► bootstrap servers + client scoped
//!        └─ body: KafkaConsumer / KafkaProducer see the scoped settings
//! ```
//!
//! [`with_test_broker`] nests both scopes over the in-process
//! [`MemoryBackend`]. With the `kafka` feature, `ContainerBackend` runs the
//! same scopes against Zookeeper and Kafka containers. Other backends plug
//! in through [`EmbeddedBackend`].

#[cfg(feature = "kafka")]
pub mod container;
pub mod error;
pub mod infra;
pub mod memory;

// Re-export main types for convenience
pub use error::{TestHarnessError, TestHarnessResult};
pub use infra::{
    EmbeddedBackend, EmbeddedService, ServiceGuard, with_broker, with_test_broker,
    with_zookeeper,
};
pub use memory::{MemoryBackend, MemoryBroker, MemoryClient, MemoryCoordinator};
#[cfg(feature = "kafka")]
pub use container::{ContainerBackend, ContainerService, with_container_broker};
