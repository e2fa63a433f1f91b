//! PXE server errors

use metal_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PxeError {
    #[error("DHCP error: {0}")]
    Dhcp(String),

    #[error("TFTP error: {0}")]
    Tftp(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("iPXE patch error: {0}")]
    Patch(#[from] crate::ipxe::PatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<dhcproto::error::DecodeError> for PxeError {
    fn from(e: dhcproto::error::DecodeError) -> Self {
        Self::Dhcp(format!("decode: {e}"))
    }
}

impl From<dhcproto::error::EncodeError> for PxeError {
    fn from(e: dhcproto::error::EncodeError) -> Self {
        Self::Dhcp(format!("encode: {e}"))
    }
}
