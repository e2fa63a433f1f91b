//! IPMI request transport.
//!
//! Raw IPMI requests (network function, command, payload) are carried by
//! `ipmitool raw`, which owns session setup for the `lan`/`lanplus`
//! interfaces and talks to the local BMC for the `open` interface.

use crate::error::PowerError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A raw IPMI request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiRequest {
    pub netfn: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl IpmiRequest {
    #[must_use]
    pub fn new(netfn: u8, cmd: u8, data: Vec<u8>) -> Self {
        Self { netfn, cmd, data }
    }
}

/// Sends raw IPMI requests and returns the response payload without the
/// completion code. A non-zero completion code is an error.
#[async_trait::async_trait]
pub trait IpmiTransport: Send + Sync {
    async fn send(&self, request: &IpmiRequest) -> Result<Vec<u8>, PowerError>;
}

/// `ipmitool` backed transport.
#[derive(Debug, Clone)]
pub struct IpmiTool {
    binary: PathBuf,
    interface: String,
    host: Option<String>,
    port: u16,
    user: String,
    pass: String,
}

impl IpmiTool {
    /// Transport to a remote BMC.
    pub fn remote(
        interface: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            binary: PathBuf::from("ipmitool"),
            interface: interface.into(),
            host: Some(host.into()),
            port,
            user: user.into(),
            pass: pass.into(),
        }
    }

    /// Transport to the BMC of the machine we are running on.
    #[must_use]
    pub fn local() -> Self {
        Self {
            binary: PathBuf::from("ipmitool"),
            interface: "open".to_string(),
            host: None,
            port: 0,
            user: String::new(),
            pass: String::new(),
        }
    }

    /// Override the `ipmitool` binary location.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Command line arguments for a request. The password travels through
    /// the environment (`-E`), never through argv.
    #[must_use]
    pub fn args(&self, request: &IpmiRequest) -> Vec<String> {
        let mut args = vec!["-I".to_string(), self.interface.clone()];

        if let Some(host) = &self.host {
            args.extend([
                "-H".to_string(),
                host.clone(),
                "-p".to_string(),
                self.port.to_string(),
                "-U".to_string(),
                self.user.clone(),
                "-E".to_string(),
            ]);
        }

        args.push("raw".to_string());
        args.push(format!("{:#04x}", request.netfn));
        args.push(format!("{:#04x}", request.cmd));
        args.extend(request.data.iter().map(|b| format!("{b:#04x}")));
        args
    }
}

/// Parses the whitespace separated hex bytes printed by `ipmitool raw`.
pub fn parse_raw_output(output: &str) -> Result<Vec<u8>, PowerError> {
    output
        .split_whitespace()
        .map(|tok| {
            u8::from_str_radix(tok.trim_start_matches("0x"), 16)
                .map_err(|e| PowerError::Ipmi(format!("unexpected response byte {tok:?}: {e}")))
        })
        .collect()
}

#[async_trait::async_trait]
impl IpmiTransport for IpmiTool {
    async fn send(&self, request: &IpmiRequest) -> Result<Vec<u8>, PowerError> {
        debug!(netfn = request.netfn, cmd = request.cmd, "sending IPMI request");

        let mut command = Command::new(&self.binary);
        command.args(self.args(request)).kill_on_drop(true);
        if self.host.is_some() {
            command.env("IPMI_PASSWORD", &self.pass);
        }

        let output = tokio::time::timeout(COMMAND_TIMEOUT, command.output())
            .await
            .map_err(|_| PowerError::Ipmi(format!("request {:#04x}/{:#04x} timed out", request.netfn, request.cmd)))??;

        if !output.status.success() {
            return Err(PowerError::Ipmi(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        parse_raw_output(&String::from_utf8_lossy(&output.stdout))
    }
}
