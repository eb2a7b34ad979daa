//! Error types for address parsing and network definitions.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building addresses, subnets and networks.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid address range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("invalid subnet {range}: {reason}")]
    InvalidSubnet { range: String, reason: String },

    #[error("network '{network}' has no subnets")]
    EmptyNetwork { network: String },
}
