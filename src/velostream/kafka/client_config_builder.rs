use super::client::Properties;

/// Layered property builder shared by consumers and producers
///
/// Later layers win: apply library defaults first, then the process-wide
/// overlay, then whatever the call site passed.
///
/// ```rust
/// # use velostream_kafka::velostream::kafka::client_config_builder::ClientConfigBuilder;
/// # use velostream_kafka::Properties;
/// let defaults = Properties::from([("acks".to_string(), "1".to_string())]);
/// let call_site = Properties::from([("acks".to_string(), "all".to_string())]);
/// let config = ClientConfigBuilder::new()
///     .properties(&defaults)
///     .properties(&call_site)
///     .build();
/// assert_eq!(config["acks"], "all");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: Properties,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer a whole property map over what is already set
    pub fn properties(mut self, layer: &Properties) -> Self {
        for (key, value) in layer {
            self.config.insert(key.clone(), value.clone());
        }
        self
    }

    /// Build the final property map
    pub fn build(self) -> Properties {
        self.config
    }
}
