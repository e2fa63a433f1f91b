//! ProxyDHCP server.
//!
//! Answers PXE `DHCPDISCOVER`s alongside the site's real DHCP server: no
//! address is leased, the offer only tells the firmware where to fetch its
//! boot file. Every packet is handled on its own; nothing is remembered
//! between packets.

use crate::error::PxeError;
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Decoder, Encodable};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// IANA processor architecture types (RFC 4578, option 93).
pub mod arch {
    pub const INTEL_X86PC: u16 = 0;
    pub const EFI_IA32: u16 = 6;
    pub const EFI_BC: u16 = 7;
    pub const EFI_X86_64: u16 = 9;
    pub const EFI_ARM64: u16 = 11;
    pub const EFI_X86_HTTP: u16 = 15;
    pub const EFI_X86_64_HTTP: u16 = 16;
    pub const EFI_ARM64_HTTP: u16 = 19;
}

/// Boot firmware of a client, used to pick the boot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    /// Classic x86 BIOS with PXE/UNDI
    X86Pc,
    /// Classic x86 BIOS running iPXE natively (no UNDI)
    X86Ipxe,
    X86Efi,
    ArmEfi,
    X86Http,
    ArmHttp,
}

impl Firmware {
    fn from_arch(code: u16) -> Option<Self> {
        match code {
            arch::INTEL_X86PC => Some(Self::X86Pc),
            arch::EFI_IA32 | arch::EFI_BC | arch::EFI_X86_64 => Some(Self::X86Efi),
            arch::EFI_ARM64 => Some(Self::ArmEfi),
            arch::EFI_X86_HTTP | arch::EFI_X86_64_HTTP => Some(Self::X86Http),
            arch::EFI_ARM64_HTTP => Some(Self::ArmHttp),
            _ => None,
        }
    }
}

/// Why a packet gets no answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not a PXE discover, silently ignored
    NotBootRequest(String),
    /// PXE discover that cannot be served
    Invalid(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotBootRequest(r) | Self::Invalid(r) => f.write_str(r),
        }
    }
}

/// Accepts only `DHCPDISCOVER` carrying option 93.
pub fn check_boot_request(msg: &Message) -> Result<(), Rejection> {
    match msg.opts().msg_type() {
        Some(MessageType::Discover) => {}
        other => {
            return Err(Rejection::NotBootRequest(format!(
                "packet is {other:?}, not Discover"
            )));
        }
    }

    if msg.opts().get(OptionCode::ClientSystemArchitecture).is_none() {
        return Err(Rejection::NotBootRequest(
            "not a PXE boot request (missing option 93)".to_string(),
        ));
    }

    Ok(())
}

/// Offset of the options field: fixed BOOTP header plus the magic cookie.
const OPTIONS_OFFSET: usize = 240;

/// Every architecture listed in option 93, in the client's order.
///
/// The decoded message only keeps the first entry, so the raw packet is
/// walked as well. Repeated option 93 instances are concatenated.
pub fn client_arches(buf: &[u8], msg: &Message) -> Vec<u16> {
    let mut raw = Vec::new();
    let mut pos = OPTIONS_OFFSET;
    while let Some(&code) = buf.get(pos) {
        match code {
            0 => pos += 1,
            255 => break,
            _ => {
                let Some(&len) = buf.get(pos + 1) else { break };
                let start = pos + 2;
                let Some(data) = buf.get(start..start + usize::from(len)) else { break };
                if code == u8::from(OptionCode::ClientSystemArchitecture) {
                    raw.extend_from_slice(data);
                }
                pos = start + usize::from(len);
            }
        }
    }

    let arches: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if !arches.is_empty() {
        return arches;
    }

    match msg.opts().get(OptionCode::ClientSystemArchitecture) {
        Some(DhcpOption::ClientSystemArchitecture(a)) => vec![u16::from(a.clone())],
        _ => Vec::new(),
    }
}

/// First user class of option 77. iPXE sends the bare string `iPXE`;
/// RFC 3004 clients send length-prefixed entries.
fn first_user_class(msg: &Message) -> Option<Vec<u8>> {
    let Some(DhcpOption::UserClass(raw)) = msg.opts().get(OptionCode::UserClass) else {
        return None;
    };

    if raw.as_slice() == b"iPXE" {
        return Some(raw.clone());
    }
    let len = usize::from(*raw.first()?);
    raw.get(1..=len).map(<[u8]>::to_vec)
}

/// Classifies the client firmware and validates option 97.
///
/// `arches` is the option 93 list; the first supported entry wins.
pub fn classify(msg: &Message, arches: &[u16]) -> Result<Firmware, Rejection> {
    if arches.is_empty() {
        return Err(Rejection::Invalid("missing client arch".to_string()));
    }
    let mut firmware = arches
        .iter()
        .find_map(|&code| Firmware::from_arch(code))
        .ok_or_else(|| Rejection::Invalid(format!("unsupported client arch: {arches:?}")))?;

    if firmware == Firmware::X86Pc && first_user_class(msg).as_deref() == Some(b"iPXE".as_slice()) {
        firmware = Firmware::X86Ipxe;
    }

    // A missing GUID violates the PXE spec but plenty of ROMs omit it.
    if let Some(DhcpOption::ClientMachineIdentifier(guid)) = msg.opts().get(OptionCode::ClientMachineIdentifier) {
        match guid.len() {
            0 => {}
            17 if guid[0] == 0 => {}
            17 => {
                return Err(Rejection::Invalid(
                    "malformed client GUID (option 97), leading byte must be zero".to_string(),
                ));
            }
            _ => {
                return Err(Rejection::Invalid(
                    "malformed client GUID (option 97), wrong size".to_string(),
                ));
            }
        }
    }

    Ok(firmware)
}

/// Boot source offered to a firmware class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootTarget {
    /// TFTP server name (`sname`, option 66), absent for URL boot files
    pub tftp_server: Option<String>,
    pub boot_file: String,
}

#[must_use]
pub fn boot_target(firmware: Firmware, server_ip: Ipv4Addr, http_port: u16) -> BootTarget {
    let tftp = |file: &str| BootTarget {
        tftp_server: Some(server_ip.to_string()),
        boot_file: file.to_string(),
    };
    let url = |file: String| BootTarget {
        tftp_server: None,
        boot_file: file,
    };

    match firmware {
        Firmware::X86Pc => tftp("undionly.kpxe"),
        Firmware::X86Ipxe => url(format!("tftp://{server_ip}/undionly.kpxe")),
        Firmware::X86Efi => tftp("snp.efi"),
        Firmware::ArmEfi => tftp("snp-arm64.efi"),
        Firmware::X86Http => url(format!("http://{server_ip}:{http_port}/tftp/snp.efi")),
        Firmware::ArmHttp => url(format!("http://{server_ip}:{http_port}/tftp/snp-arm64.efi")),
    }
}

/// Builds the ProxyDHCP offer for `req`.
pub fn build_offer(req: &Message, firmware: Firmware, server_ip: Ipv4Addr, http_port: u16) -> Message {
    let target = boot_target(firmware, server_ip, http_port);

    let mut resp = Message::new_with_id(
        req.xid(),
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        server_ip,
        req.giaddr(),
        req.chaddr(),
    );
    resp.set_opcode(Opcode::BootReply);
    resp.set_flags(req.flags());

    if let Some(name) = &target.tftp_server {
        resp.set_sname_str(name);
    }
    resp.set_fname_str(&target.boot_file);

    let opts = resp.opts_mut();
    opts.insert(DhcpOption::MessageType(MessageType::Offer));
    opts.insert(DhcpOption::ServerIdentifier(server_ip));
    if let Some(name) = target.tftp_server {
        opts.insert(DhcpOption::TFTPServerName(name.into_bytes()));
    }
    opts.insert(DhcpOption::BootfileName(target.boot_file.into_bytes()));

    if let Some(guid @ DhcpOption::ClientMachineIdentifier(_)) = req.opts().get(OptionCode::ClientMachineIdentifier) {
        opts.insert(guid.clone());
    }

    match req.opts().get(OptionCode::ClassIdentifier) {
        Some(class @ DhcpOption::ClassIdentifier(_)) => opts.insert(class.clone()),
        _ => opts.insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec())),
    };

    resp
}

/// Decodes, classifies and answers one packet. `None` means no reply.
pub fn handle_packet(buf: &[u8], server_ip: Ipv4Addr, http_port: u16) -> Result<Option<Vec<u8>>, PxeError> {
    let msg = Message::decode(&mut Decoder::new(buf))?;
    let mac = format_mac(msg.chaddr());

    if let Err(reason) = check_boot_request(&msg) {
        debug!(source = %mac, %reason, "ignoring packet");
        return Ok(None);
    }

    let firmware = match classify(&msg, &client_arches(buf, &msg)) {
        Ok(fw) => fw,
        Err(reason) => {
            info!(source = %mac, %reason, "invalid packet");
            return Ok(None);
        }
    };

    let resp = build_offer(&msg, firmware, server_ip, http_port);
    let target = boot_target(firmware, server_ip, http_port);
    info!(
        source = %mac,
        ?firmware,
        server = target.tftp_server.as_deref().unwrap_or(""),
        boot_filename = %target.boot_file,
        "offering boot response"
    );

    Ok(Some(resp.to_vec()?))
}

fn format_mac(chaddr: &[u8]) -> String {
    chaddr
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// First IPv4 address of `endpoint`.
pub async fn resolve_ipv4(endpoint: &str) -> Result<Ipv4Addr, PxeError> {
    if let Ok(ip) = endpoint.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((endpoint, 0))
        .await?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| PxeError::Dhcp(format!("no IPv4 address found for {endpoint}")))
}

/// UDP listener running the proxy.
#[derive(Debug, Clone)]
pub struct DhcpServer {
    bind: SocketAddr,
    endpoint: String,
    http_port: u16,
}

impl DhcpServer {
    /// `endpoint` is the address advertised to clients, resolved per packet.
    pub fn new(bind: SocketAddr, endpoint: impl Into<String>, http_port: u16) -> Self {
        Self {
            bind,
            endpoint: endpoint.into(),
            http_port,
        }
    }

    /// Serves until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PxeError> {
        let socket = UdpSocket::bind(self.bind).await?;
        socket.set_broadcast(true)?;
        info!(bind = %self.bind, "DHCP proxy listening");

        let mut buf = vec![0u8; 1500];
        loop {
            let (len, peer) = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                r = socket.recv_from(&mut buf) => r?,
            };

            let server_ip = match resolve_ipv4(&self.endpoint).await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!(error = %e, "failed to construct ProxyDHCP offer");
                    continue;
                }
            };

            let reply = match handle_packet(&buf[..len], server_ip, self.http_port) {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(e) => {
                    debug!(%peer, error = %e, "dropping malformed packet");
                    continue;
                }
            };

            if let Err(e) = socket.send_to(&reply, reply_address(peer)).await {
                warn!(%peer, error = %e, "failure sending response");
            }
        }
    }
}

/// Clients without an address yet are answered by broadcast.
fn reply_address(peer: SocketAddr) -> SocketAddr {
    if peer.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), peer.port())
    } else {
        peer
    }
}
