//! Network Boot Server
//!
//! Everything a bare-metal machine talks to before its agent or OS is up,
//! built on `dhcproto`, `async-tftp` and `axum`:
//!
//! - ProxyDHCP answering PXE discovers with a boot file
//! - iPXE binaries patched with a script chaining back to this server
//! - `/ipxe` boot resolution against Server, ServerBinding and Environment records
//! - TFTP and HTTP delivery of iPXE binaries and environment assets

pub mod boot;
pub mod dhcp;
pub mod error;
pub mod http;
pub mod ipxe;
pub mod server;
pub mod tftp;

pub use boot::{BootAction, BootConfig, BootError, BootLabels, BootResolver, KernelArgs};
pub use error::PxeError;
pub use ipxe::PatchError;
pub use server::{PxeConfig, PxeServer};
