//! Process-wide client settings
//!
//! Consumers and producers read their bootstrap servers, property overlays,
//! codecs and broker client from the *active* [`ClientSettings`]:
//!
//! 1. the innermost scoped override on the current thread, if any
//! 2. otherwise the global settings
//!
//! Scoped overrides ([`with_settings`], [`scoped`]) live on a thread-local
//! stack and are popped by a guard when the body returns or unwinds, so a
//! rebinding on one thread is never visible on another. [`update_global`]
//! changes the settings for every thread that has no override in effect and
//! should be done at startup.

use crate::velostream::kafka::client::{BrokerClient, Properties};
use crate::velostream::serialization::{BincodeCodec, Deserializer, Serializer};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// Environment variable consulted for the default bootstrap servers
pub const BOOTSTRAP_SERVERS_ENV: &str = "VELOSTREAM_BOOTSTRAP_SERVERS";

/// Bootstrap servers used when the environment does not name any
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Connection and codec defaults shared by every consumer and producer
#[derive(Clone)]
pub struct ClientSettings {
    /// `host:port`, comma-joined for several brokers
    pub bootstrap_servers: String,
    /// Properties layered over the consumer defaults
    pub consumer_config: Properties,
    /// Properties layered over the producer defaults
    pub producer_config: Properties,
    pub serializer: Arc<dyn Serializer>,
    pub deserializer: Arc<dyn Deserializer>,
    /// Broker client used to open sessions
    pub client: Arc<dyn BrokerClient>,
    /// Coordination service address, only set inside a harness scope
    pub zookeeper_connect: Option<String>,
}

impl ClientSettings {
    /// Library defaults, reading the bootstrap servers from the environment
    pub fn from_env() -> Self {
        let bootstrap_servers = std::env::var(BOOTSTRAP_SERVERS_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BOOTSTRAP_SERVERS.to_string());
        Self {
            bootstrap_servers,
            ..Self::default()
        }
    }

    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = servers.into();
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn deserializer(mut self, deserializer: Arc<dyn Deserializer>) -> Self {
        self.deserializer = deserializer;
        self
    }

    pub fn client(mut self, client: Arc<dyn BrokerClient>) -> Self {
        self.client = client;
        self
    }

    pub fn consumer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.consumer_config.insert(key.into(), value.into());
        self
    }

    pub fn producer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.producer_config.insert(key.into(), value.into());
        self
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            consumer_config: Properties::new(),
            producer_config: Properties::new(),
            serializer: Arc::new(BincodeCodec),
            deserializer: Arc::new(BincodeCodec),
            client: default_client(),
            zookeeper_connect: None,
        }
    }
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("consumer_config", &self.consumer_config)
            .field("producer_config", &self.producer_config)
            .field("client", &self.client.name())
            .field("zookeeper_connect", &self.zookeeper_connect)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "kafka")]
fn default_client() -> Arc<dyn BrokerClient> {
    Arc::new(crate::velostream::kafka::rdkafka_client::RdKafkaClient::new())
}

#[cfg(not(feature = "kafka"))]
fn default_client() -> Arc<dyn BrokerClient> {
    Arc::new(crate::velostream::test_harness::memory::MemoryClient::new())
}

static GLOBAL: LazyLock<RwLock<ClientSettings>> =
    LazyLock::new(|| RwLock::new(ClientSettings::from_env()));

thread_local! {
    static SCOPED: RefCell<Vec<ClientSettings>> = const { RefCell::new(Vec::new()) };
}

/// Snapshot of the settings active on this thread
pub fn current() -> ClientSettings {
    SCOPED
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(global)
}

/// Snapshot of the global settings, ignoring scoped overrides
pub fn global() -> ClientSettings {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Modify the global settings in place; visible to every thread
pub fn update_global(update: impl FnOnce(&mut ClientSettings)) {
    let mut settings = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    update(&mut settings);
    log::debug!("Global client settings updated: {:?}", *settings);
}

/// Make `settings` active on this thread until the guard is dropped
///
/// Guards must be dropped in reverse order of creation; they are not `Send`.
pub fn enter(settings: ClientSettings) -> SettingsGuard {
    SCOPED.with(|stack| stack.borrow_mut().push(settings));
    SettingsGuard {
        _not_send: PhantomData,
    }
}

/// Run `body` with `settings` active on this thread
pub fn with_settings<R>(settings: ClientSettings, body: impl FnOnce() -> R) -> R {
    let _guard = enter(settings);
    body()
}

/// Run `body` with a modified copy of the active settings
pub fn scoped<R>(update: impl FnOnce(&mut ClientSettings), body: impl FnOnce() -> R) -> R {
    let mut settings = current();
    update(&mut settings);
    with_settings(settings, body)
}

/// Pops a scoped override on drop
pub struct SettingsGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for SettingsGuard {
    fn drop(&mut self) {
        SCOPED.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
