//! No-op power client used while a server has no usable management target.

use crate::error::PowerError;
use crate::power_trait::PowerClient;
use crds::PxeMode;

/// Always succeeds and always reports the server as powered on.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeClient;

#[async_trait::async_trait]
impl PowerClient for FakeClient {
    async fn power_on(&self) -> Result<(), PowerError> {
        Ok(())
    }

    async fn power_off(&self) -> Result<(), PowerError> {
        Ok(())
    }

    async fn power_cycle(&self) -> Result<(), PowerError> {
        Ok(())
    }

    async fn is_powered_on(&self) -> Result<bool, PowerError> {
        Ok(true)
    }

    async fn set_pxe(&self, _mode: PxeMode) -> Result<(), PowerError> {
        Ok(())
    }

    fn is_fake(&self) -> bool {
        true
    }
}
