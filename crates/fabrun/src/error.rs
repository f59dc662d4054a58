//! Crate-level error type.
//!
//! Resolution failures are cached inside lazy cells and handed to every
//! caller, so `Error` is `Clone` and carries rendered messages rather than
//! boxed sources.

use crate::config;
use crate::registry;
use crate::transport;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] registry::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] transport::Error),
    /// The host rejected the registration against the live topology.
    #[error("Component {component} failed validation: {reason}")]
    Validation { component: String, reason: String },
    /// The factory, or a capability it requested, failed.
    #[error("Component {component} failed to initialize: {reason}")]
    Init { component: String, reason: String },
    #[error("Component {component} references {reference} without declaring it")]
    UndeclaredRef { component: String, reference: String },
    #[error("Component {0} is not hosted in this process")]
    NotLocal(String),
    #[error("No reachable replica for {component}")]
    NoReplica { component: String },
    #[error("Component {component} has no method {method}")]
    UnknownMethod { component: String, method: String },
    #[error("Listener {name}: {reason}")]
    Listener { name: String, reason: String },
    #[error("Type mismatch for {component}: expected {expected}")]
    TypeMismatch { component: String, expected: &'static str },
    #[error("Runtime has shut down")]
    RuntimeGone,
    #[error("Codec error: {0}")]
    Codec(String),
    /// The remote replica reported a failure (including application errors).
    #[error("Remote failure: {0}")]
    Remote(String),
    /// An error returned by a component implementation.
    #[error("{0}")]
    Application(String),
}

impl Error {
    /// Builds an application-level error, the kind a component method returns.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    pub(crate) fn codec(e: impl std::fmt::Display) -> Self {
        Self::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
