#[cfg(feature = "kafka")]
use rdkafka::config::RDKafkaLogLevel;

#[cfg(feature = "kafka")]
pub fn convert_kafka_log_level(kafka_level: RDKafkaLogLevel) -> log::Level {
    match kafka_level {
        RDKafkaLogLevel::Emerg | RDKafkaLogLevel::Alert | RDKafkaLogLevel::Critical => {
            log::Level::Error
        }
        RDKafkaLogLevel::Error => log::Level::Error,
        RDKafkaLogLevel::Warning => log::Level::Warn,
        RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => log::Level::Info,
        RDKafkaLogLevel::Debug => log::Level::Debug,
    }
}

/// Current wall clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// CRC32 over the key bytes followed by the value bytes
///
/// librdkafka does not expose the per-record CRC, so both client
/// implementations compute the checksum the same way from what they hold.
pub fn record_checksum(key: Option<&[u8]>, value: Option<&[u8]>) -> i64 {
    let mut hasher = crc32fast::Hasher::new();
    if let Some(key) = key {
        hasher.update(key);
    }
    if let Some(value) = value {
        hasher.update(value);
    }
    hasher.finalize() as i64
}

/// Split a `bootstrap.servers` string into individual addresses
pub fn split_brokers(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
