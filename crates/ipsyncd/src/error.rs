//! Error types for ipsyncd

use crate::netlink::attr::DecodeError;
use ipstack_hw::HwError;
use thiserror::Error;

/// Errors that can occur in ipsyncd
#[derive(Debug, Error)]
pub enum IpsyncError {
    /// Netlink socket error (create, bind, send, receive)
    #[error("Netlink error: {0}")]
    Netlink(String),

    /// The kernel answered a request with a negative NLMSG_ERROR
    #[error("Kernel rejected request: {0}")]
    Kernel(#[from] nix::errno::Errno),

    /// A message could not be parsed at all
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Hardware call failed
    #[error("Hardware error: {0}")]
    Hardware(#[from] HwError),

    /// Interface handle unknown to the link table
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Request arguments rejected before reaching the kernel
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ipsyncd operations
pub type Result<T> = std::result::Result<T, IpsyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let err = IpsyncError::Netlink("bind failed".to_string());
        assert_eq!(err.to_string(), "Netlink error: bind failed");

        let err = IpsyncError::from(nix::errno::Errno::EEXIST);
        assert!(err.to_string().starts_with("Kernel rejected request"));

        let err = IpsyncError::from(HwError::table_full("route"));
        assert_eq!(err.to_string(), "Hardware error: Table full: route");
    }
}
