//! PowerClient trait
//!
//! Uniform interface over the management transports. The server controller
//! opens one client per reconcile, uses it and closes it; nothing is pooled.

use crate::error::PowerError;
use crds::PxeMode;

/// Out-of-band power control of a single server.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait PowerClient: Send + Sync {
    async fn power_on(&self) -> Result<(), PowerError>;
    async fn power_off(&self) -> Result<(), PowerError>;
    async fn power_cycle(&self) -> Result<(), PowerError>;
    async fn is_powered_on(&self) -> Result<bool, PowerError>;

    /// Requests a one-time network boot on the next power on.
    async fn set_pxe(&self, mode: PxeMode) -> Result<(), PowerError>;

    /// True when no real management transport is configured. Power state
    /// reported by such a client is not meaningful.
    fn is_fake(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), PowerError> {
        Ok(())
    }
}
