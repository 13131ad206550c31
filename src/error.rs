//! Error types for the Nebula operator

use std::time::Duration;

use thiserror::Error;

/// Main error type for Nebula operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The desired spec violates an invariant
    #[error("validation error: {0}")]
    Validation(String),

    /// Live workload state could not be read
    #[error("observation error [{component}]: {message}")]
    Observation {
        /// Component whose workload was being observed
        component: String,
        /// Description of what failed
        message: String,
    },

    /// A desired-state change could not be written to the platform
    #[error("apply error [{component}]: {message}")]
    Apply {
        /// Component whose resources were being applied
        component: String,
        /// Description of what failed
        message: String,
    },

    /// An apply was planned for a component whose upstream is not available
    #[error("ordering violation: {0}")]
    OrderingViolation(String),

    /// Optimistic concurrency check failed on a status write
    #[error("conflict: {0}")]
    Conflict(String),

    /// A platform call exceeded its time bound
    #[error("operation '{operation}' timed out after {after:?}")]
    Timeout {
        /// Name of the bounded operation
        operation: String,
        /// The bound that was exceeded
        after: Duration,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an observation error for a component
    pub fn observation(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Observation {
            component: component.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error for a component
    pub fn apply(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Apply {
            component: component.into(),
            message: msg.into(),
        }
    }

    /// Create an ordering violation error
    pub fn ordering(msg: impl Into<String>) -> Self {
        Self::OrderingViolation(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether retrying the pass later may succeed without a spec change
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::Serialization(_))
    }

    /// Whether this is a Kubernetes "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}
