//! Error types for the test harness

use crate::velostream::kafka::KafkaClientError;
use std::fmt;
use std::io;

/// Main error type for test harness operations
#[derive(Debug, Clone)]
pub enum TestHarnessError {
    /// Service construction or startup failure
    InfraError {
        message: String,
        source: Option<String>,
    },

    /// IO error (directories, files)
    IoError { message: String, path: String },

    /// No coordination service or broker answers at `address`
    Connection { address: String },

    /// A service did not shut down cleanly
    Shutdown { message: String },

    /// Invalid service properties
    ConfigError { message: String },

    /// Error raised by a consumer or producer inside a scope
    Client(KafkaClientError),
}

impl TestHarnessError {
    pub fn infra(message: impl Into<String>) -> Self {
        TestHarnessError::InfraError {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for TestHarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestHarnessError::InfraError { message, source } => {
                if let Some(s) = source {
                    write!(f, "Infrastructure error: {} ({})", message, s)
                } else {
                    write!(f, "Infrastructure error: {}", message)
                }
            }
            TestHarnessError::IoError { message, path } => {
                write!(f, "IO error for '{}': {}", path, message)
            }
            TestHarnessError::Connection { address } => {
                write!(f, "No service reachable at '{}'", address)
            }
            TestHarnessError::Shutdown { message } => {
                write!(f, "Shutdown error: {}", message)
            }
            TestHarnessError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            TestHarnessError::Client(e) => write!(f, "Client error: {}", e),
        }
    }
}

impl std::error::Error for TestHarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TestHarnessError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TestHarnessError {
    fn from(err: io::Error) -> Self {
        TestHarnessError::IoError {
            message: err.to_string(),
            path: String::new(),
        }
    }
}

impl From<KafkaClientError> for TestHarnessError {
    fn from(err: KafkaClientError) -> Self {
        TestHarnessError::Client(err)
    }
}

/// Result type alias for test harness operations
pub type TestHarnessResult<T> = Result<T, TestHarnessError>;
