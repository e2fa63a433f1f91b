//! Command line and environment configuration.

use crate::error::ControllerError;
use crds::{BootFromDiskMethod, PxeMode};
use clap::Parser;
use pxe_server::{PxeConfig, server::DEFAULT_DATA_DIR};
use std::path::PathBuf;
use std::time::Duration;

/// Metal controller manager settings. Every flag can also be set through
/// the environment variable shown in `--help`.
#[derive(Debug, Clone, Parser)]
#[command(name = "metal-controller", version, about)]
pub struct Config {
    /// Hostname or IP address servers reach the controller at
    #[arg(long, env = "API_ENDPOINT", default_value = "")]
    pub api_endpoint: String,

    /// TCP port servers reach the controller at
    #[arg(long, env = "API_PORT", default_value_t = 8081)]
    pub api_port: u16,

    /// TCP port the HTTP server listens on
    #[arg(long, env = "HTTP_PORT", default_value_t = 8081)]
    pub http_port: u16,

    /// Kernel arguments added to the agent environment, e.g. `console=ttyS1`
    #[arg(long, env = "EXTRA_AGENT_KERNEL_ARGS", default_value = "")]
    pub extra_agent_kernel_args: String,

    /// How servers leave iPXE once installed: ipxe-exit, http-404 or ipxe-sanboot
    #[arg(long, env = "BOOT_FROM_DISK_METHOD", default_value = "ipxe-exit")]
    pub boot_from_disk_method: BootFromDiskMethod,

    /// Mark servers accepted when they register
    #[arg(long, env = "AUTO_ACCEPT_SERVERS", default_value_t = false, action = clap::ArgAction::Set)]
    pub auto_accept_servers: bool,

    /// Wipe the head and tail of disks only instead of every byte
    #[arg(long, env = "INSECURE_WIPE", default_value_t = true, action = clap::ArgAction::Set)]
    pub insecure_wipe: bool,

    /// Ask agents to provision a BMC user when none is configured
    #[arg(long, env = "AUTO_BMC_SETUP", default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_bmc_setup: bool,

    /// Seconds to wait for a power cycled server to start wiping
    #[arg(long, env = "SERVER_REBOOT_TIMEOUT", default_value_t = 1200)]
    pub server_reboot_timeout: u64,

    /// Boot device flavour requested over IPMI: uefi or bios
    #[arg(long, env = "IPMI_PXE_METHOD", default_value = "uefi")]
    pub ipmi_pxe_method: PxeMode,

    #[arg(long, env = "DISABLE_DHCP_PROXY", default_value_t = false, action = clap::ArgAction::Set)]
    pub disable_dhcp_proxy: bool,

    /// Seconds between power state checks of provisioning servers
    #[arg(long, env = "POWER_CHECK_PERIOD", default_value_t = 300)]
    pub power_check_period: u64,

    #[arg(long, env = "ENV_ROOT", default_value_os_t = PathBuf::from(DEFAULT_DATA_DIR).join("env"))]
    pub env_root: PathBuf,

    #[arg(long, env = "IPXE_ROOT", default_value_os_t = PathBuf::from(DEFAULT_DATA_DIR).join("ipxe"))]
    pub ipxe_root: PathBuf,

    #[arg(long, env = "TFTP_ROOT", default_value_os_t = PathBuf::from(DEFAULT_DATA_DIR).join("tftp"))]
    pub tftp_root: PathBuf,

    /// Test only: probability of a management API call failing loudly
    #[arg(long, env = "TEST_POWER_SIMULATED_EXPLICIT_FAILURE_PROB", default_value_t = 0.0)]
    pub test_power_simulated_explicit_failure_prob: f64,

    /// Test only: probability of a management API call failing silently
    #[arg(long, env = "TEST_POWER_SIMULATED_SILENT_FAILURE_PROB", default_value_t = 0.0)]
    pub test_power_simulated_silent_failure_prob: f64,

    /// Test only: seed of the failure dice
    #[arg(long, env = "TEST_POWER_SEED", default_value_t = 0)]
    pub test_power_seed: u64,

    /// Namespace BMC credential secrets are written to
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    pub watch_namespace: String,
}

impl Config {
    /// Normalises placeholder values and checks what clap cannot.
    ///
    /// A single `-` stands for an empty value, for deployment tools that
    /// cannot pass empty strings.
    pub fn validate(mut self) -> Result<Self, ControllerError> {
        if self.api_endpoint == "-" {
            self.api_endpoint.clear();
        }
        if self.extra_agent_kernel_args == "-" {
            self.extra_agent_kernel_args.clear();
        }

        if self.api_endpoint.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "no API endpoint: set --api-endpoint or API_ENDPOINT".to_string(),
            ));
        }

        for (name, p) in [
            ("explicit", self.test_power_simulated_explicit_failure_prob),
            ("silent", self.test_power_simulated_silent_failure_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ControllerError::InvalidConfig(format!(
                    "{name} failure probability {p} is outside [0, 1]"
                )));
            }
        }

        if self.server_reboot_timeout == 0 {
            return Err(ControllerError::InvalidConfig(
                "server reboot timeout must be positive".to_string(),
            ));
        }

        Ok(self)
    }

    #[must_use]
    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.server_reboot_timeout)
    }

    #[must_use]
    pub fn power_check_period(&self) -> Duration {
        Duration::from_secs(self.power_check_period)
    }

    /// Boot server settings derived from these flags.
    #[must_use]
    pub fn pxe_config(&self) -> PxeConfig {
        PxeConfig {
            api_endpoint: self.api_endpoint.clone(),
            api_port: self.api_port,
            http_port: self.http_port,
            extra_agent_kernel_args: self.extra_agent_kernel_args.clone(),
            boot_from_disk_method: self.boot_from_disk_method,
            disable_dhcp_proxy: self.disable_dhcp_proxy,
            env_root: self.env_root.clone(),
            ipxe_root: self.ipxe_root.clone(),
            tftp_root: self.tftp_root.clone(),
            ..PxeConfig::default()
        }
    }
}
