//! Power Management Clients
//!
//! Out-of-band power control for bare-metal servers behind a single
//! [`PowerClient`] trait:
//!
//! - **IPMI**: chassis control, one-time PXE boot, LAN configuration and
//!   BMC user management over `ipmitool raw`
//! - **Management API**: a small HTTP API used by virtualised test fleets,
//!   with optional failure injection through [`FailureDice`]
//! - **Fake**: used when a server has no usable management target
//!
//! # Example
//!
//! ```no_run
//! use power_client::{ManagementApiClient, FailureDice, PowerClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ManagementApiClient::new("10.5.0.2:8080", Arc::new(FailureDice::disabled()))?;
//! if !client.is_powered_on().await? {
//!     client.power_on().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod dice;
pub mod error;
pub mod factory;
pub mod fake;
pub mod ipmi;
#[cfg(feature = "test-util")]
pub mod mock;
#[path = "trait.rs"]
pub mod power_trait;

pub use api::ManagementApiClient;
pub use dice::{FailureDice, FailureOutcome};
pub use error::PowerError;
pub use factory::{
    ClientKind, CredentialResolver, Credentials, DefaultPowerClientFactory, ManagementClient, PowerClientFactory,
    resolve_credentials, select_client,
};
pub use fake::FakeClient;
pub use ipmi::{IpmiClient, IpmiRequest, IpmiTool, IpmiTransport, UserSummary};
#[cfg(feature = "test-util")]
pub use mock::{MockIpmiTransport, MockPowerClient, MockPowerClientFactory, PowerAction};
pub use power_trait::PowerClient;
