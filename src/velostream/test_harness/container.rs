//! Docker-backed coordination service and broker
//!
//! [`ContainerBackend`] starts Zookeeper and Kafka through testcontainers,
//! so the harness scopes run against a real broker reached by
//! [`RdKafkaClient`]. Ports are always OS-assigned host mappings and are
//! read back from the running container.
//!
//! The Kafka image bundles its own coordination service. The broker scope
//! still refuses to start unless the scoped `zookeeper.connect` answers, so
//! the two-level lifecycle behaves the same as with the in-process backend.
//!
//! Broker properties other than the harness's own (`log.dir`, `log.dirs`,
//! `port`, `zookeeper.connect`) are passed to the image as `KAFKA_*`
//! environment variables, e.g. `num.partitions` becomes
//! `KAFKA_NUM_PARTITIONS`. Log directories live inside the container.

use super::error::{TestHarnessError, TestHarnessResult};
use super::infra::{
    CLIENT_PORT, EmbeddedBackend, EmbeddedService, LOG_DIR, LOG_DIRS, PORT, ZOOKEEPER_CONNECT,
    with_broker, with_zookeeper,
};
use crate::velostream::kafka::client::{BrokerClient, Properties};
use crate::velostream::kafka::rdkafka_client::RdKafkaClient;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::ContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ContainerRequest, Image, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use testcontainers_modules::zookeeper::Zookeeper;
use tokio::runtime::Runtime;

const ZOOKEEPER_PORT: ContainerPort = ContainerPort::Tcp(2181);
const REACHABLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds containerized services and the librdkafka client that reaches them
pub struct ContainerBackend {
    runtime: Arc<Runtime>,
}

impl ContainerBackend {
    pub fn new() -> TestHarnessResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| TestHarnessError::InfraError {
                message: "Failed to start container runtime".to_string(),
                source: Some(e.to_string()),
            })?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl EmbeddedBackend for ContainerBackend {
    fn coordination_service(
        &self,
        properties: &Properties,
    ) -> TestHarnessResult<Box<dyn EmbeddedService>> {
        require_ephemeral_port(properties, CLIENT_PORT)?;
        Ok(Box::new(ContainerService::new(
            "zookeeper",
            Arc::clone(&self.runtime),
            Zookeeper::default().into(),
            ZOOKEEPER_PORT,
        )))
    }

    fn broker(&self, properties: &Properties) -> TestHarnessResult<Box<dyn EmbeddedService>> {
        require_ephemeral_port(properties, PORT)?;
        let coordinator = properties
            .get(ZOOKEEPER_CONNECT)
            .cloned()
            .ok_or_else(|| TestHarnessError::ConfigError {
                message: format!("broker needs {}", ZOOKEEPER_CONNECT),
            })?;

        let mut request = ContainerRequest::from(Kafka::default());
        for (key, value) in properties {
            if [LOG_DIR, LOG_DIRS, PORT, ZOOKEEPER_CONNECT].contains(&key.as_str()) {
                continue;
            }
            request = request.with_env_var(kafka_env_name(key), value.clone());
        }

        let mut service =
            ContainerService::new("kafka", Arc::clone(&self.runtime), request, KAFKA_PORT);
        service.requires = Some(coordinator);
        Ok(Box::new(service))
    }

    fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::new(RdKafkaClient::new())
    }
}

/// Run `body` against a Zookeeper and a Kafka container
pub fn with_container_broker<T, E, F>(body: F) -> Result<T, E>
where
    E: From<TestHarnessError>,
    F: FnOnce() -> Result<T, E>,
{
    let backend = ContainerBackend::new()?;
    with_zookeeper(&backend, || with_broker(&backend, &Properties::new(), body))
}

/// `num.partitions` -> `KAFKA_NUM_PARTITIONS`
fn kafka_env_name(property: &str) -> String {
    format!("KAFKA_{}", property.replace(['.', '-'], "_").to_uppercase())
}

fn require_ephemeral_port(properties: &Properties, key: &str) -> TestHarnessResult<()> {
    match properties.get(key).map(|p| p.trim()) {
        None | Some("0") => Ok(()),
        Some(port) => Err(TestHarnessError::ConfigError {
            message: format!(
                "{}={} not supported: containers publish on an OS-assigned host port",
                key, port
            ),
        }),
    }
}

fn check_reachable(address: &str) -> TestHarnessResult<()> {
    let unreachable = || TestHarnessError::Connection {
        address: address.to_string(),
    };
    let addrs = address.to_socket_addrs().map_err(|_| unreachable())?;
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, REACHABLE_TIMEOUT).is_ok() {
            return Ok(());
        }
    }
    Err(unreachable())
}

/// One container, started on demand and removed on shutdown
pub struct ContainerService<I: Image> {
    name: &'static str,
    runtime: Arc<Runtime>,
    request: Option<ContainerRequest<I>>,
    exposed_port: ContainerPort,
    /// Address that must answer before the container is started
    requires: Option<String>,
    container: Option<ContainerAsync<I>>,
    port: Option<u16>,
}

impl<I: Image> ContainerService<I> {
    fn new(
        name: &'static str,
        runtime: Arc<Runtime>,
        request: ContainerRequest<I>,
        exposed_port: impl Into<ContainerPort>,
    ) -> Self {
        Self {
            name,
            runtime,
            request: Some(request),
            exposed_port: exposed_port.into(),
            requires: None,
            container: None,
            port: None,
        }
    }
}

impl<I: Image + 'static> EmbeddedService for ContainerService<I> {
    fn start(&mut self) -> TestHarnessResult<()> {
        if let Some(address) = &self.requires {
            check_reachable(address)?;
        }
        let request = self.request.take().ok_or_else(|| {
            TestHarnessError::infra(format!("{} container already started", self.name))
        })?;

        log::info!("Starting {} container via testcontainers...", self.name);
        let container = self
            .runtime
            .block_on(request.start())
            .map_err(|e| TestHarnessError::InfraError {
                message: format!("Failed to start {} container", self.name),
                source: Some(e.to_string()),
            })?;
        // Stored first so a failed port lookup still removes the container
        let container = self.container.insert(container);

        let port = self
            .runtime
            .block_on(container.get_host_port_ipv4(self.exposed_port))
            .map_err(|e| TestHarnessError::InfraError {
                message: format!("Failed to get {} port", self.name),
                source: Some(e.to_string()),
            })?;
        log::info!("{} container mapped to host port {}", self.name, port);
        self.port = Some(port);
        Ok(())
    }

    fn bound_port(&self) -> Option<u16> {
        self.port
    }

    fn shutdown(&mut self) -> TestHarnessResult<()> {
        self.port = None;
        if let Some(container) = self.container.take() {
            self.runtime
                .block_on(container.rm())
                .map_err(|e| TestHarnessError::Shutdown {
                    message: format!("Failed to remove {} container: {}", self.name, e),
                })?;
            log::debug!("{} container removed", self.name);
        }
        Ok(())
    }

    fn await_shutdown(&mut self) -> TestHarnessResult<()> {
        if self.container.is_some() {
            return Err(TestHarnessError::Shutdown {
                message: format!("{} container still running", self.name),
            });
        }
        Ok(())
    }
}
