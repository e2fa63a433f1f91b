//! Kernel command line contract.

use crate::error::AgentError;

pub const ENDPOINT_ARG: &str = "sidero.endpoint";
pub const MAC_ARG: &str = "sidero.mac";

/// Where the agent reports to and which interface it booted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentArgs {
    /// `host:port` of the controller's HTTP endpoint
    pub endpoint: String,
    /// Boot interface MAC, lower case
    pub mac: String,
}

fn first_value<'a>(cmdline: &'a str, key: &str) -> Option<&'a str> {
    cmdline
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Both arguments are required.
pub fn parse(cmdline: &str) -> Result<AgentArgs, AgentError> {
    let endpoint = first_value(cmdline, ENDPOINT_ARG)
        .filter(|v| !v.is_empty())
        .ok_or(AgentError::MissingArgument(ENDPOINT_ARG))?;
    let mac = first_value(cmdline, MAC_ARG)
        .filter(|v| !v.is_empty())
        .ok_or(AgentError::MissingArgument(MAC_ARG))?;

    let mac = mac.replace('-', ":").to_ascii_lowercase();
    if mac.split(':').count() != 6 || !mac.split(':').all(|b| b.len() == 2 && b.chars().all(|c| c.is_ascii_hexdigit())) {
        return Err(AgentError::InvalidArgument {
            arg: MAC_ARG,
            value: mac,
        });
    }

    Ok(AgentArgs {
        endpoint: endpoint.to_string(),
        mac,
    })
}

pub async fn from_proc() -> Result<AgentArgs, AgentError> {
    parse(&tokio::fs::read_to_string("/proc/cmdline").await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let args = parse("console=tty0 sidero.endpoint=10.5.0.1:8081 ip=dhcp sidero.mac=52:54:00:AB:CD:EF\n").unwrap();
        assert_eq!(args.endpoint, "10.5.0.1:8081");
        assert_eq!(args.mac, "52:54:00:ab:cd:ef");
    }

    #[test]
    fn test_missing_arguments_are_fatal() {
        assert!(matches!(
            parse("sidero.mac=52:54:00:ab:cd:ef"),
            Err(AgentError::MissingArgument(ENDPOINT_ARG))
        ));
        assert!(matches!(
            parse("sidero.endpoint=10.5.0.1:8081"),
            Err(AgentError::MissingArgument(MAC_ARG))
        ));
        assert!(matches!(
            parse("sidero.endpoint= sidero.mac=52:54:00:ab:cd:ef"),
            Err(AgentError::MissingArgument(ENDPOINT_ARG))
        ));
    }

    #[test]
    fn test_bad_mac() {
        assert!(matches!(
            parse("sidero.endpoint=ctl:8081 sidero.mac=nonsense"),
            Err(AgentError::InvalidArgument { .. })
        ));
    }
}
