//! Error types for the karpenter-scaleway operator

use thiserror::Error;

use crate::scaleway::ProviderError;

/// Main error type for controller operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for claim specs or controller configuration values
    #[error("validation error: {0}")]
    Validation(String),

    /// Instance provisioning error from the Scaleway gateway
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Startup configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// How the error policy should treat a failed reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Retrying the same input cannot succeed; wait for the claim to change
    AwaitChange,
    /// The failure may be transient; retry with exponential backoff
    Backoff,
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Categorize this error for the controller error policy
    ///
    /// Deterministic failures (a claim naming an instance type we cannot
    /// translate) recur on every timed retry, so the policy waits for the
    /// claim to change instead. Everything else might recover on its own.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::Validation(_) => RetryClass::AwaitChange,
            Error::Serialization(_) => RetryClass::AwaitChange,
            Error::Kube(_) => RetryClass::Backoff,
            Error::Provider(_) => RetryClass::Backoff,
            Error::Config(_) => RetryClass::Backoff,
        }
    }
}
