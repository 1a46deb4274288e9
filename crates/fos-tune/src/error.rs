//! Engine error types.

use fos_page::{Capability, DomError, InterceptError, SelectorError};
use thiserror::Error;

/// Errors raised while installing or running a component.
///
/// None of these are fatal to the page: the engine logs them, records the
/// component as degraded and carries on with the rest.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Host does not provide {0}")]
    CapabilityUnavailable(Capability),

    #[error("Invalid selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("DOM operation failed: {0}")]
    Dom(#[from] DomError),

    #[error("Cannot intercept event registration: {0}")]
    Intercept(#[from] InterceptError),

    #[error("Failed to build request matcher: {0}")]
    Matcher(String),

    #[error("Engine already installed on this document")]
    AlreadyInstalled,
}

/// Shorthand for requiring a host capability.
pub(crate) fn require<T>(value: Option<T>, capability: Capability) -> Result<T, EngineError> {
    value.ok_or(EngineError::CapabilityUnavailable(capability))
}
