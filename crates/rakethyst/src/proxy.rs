use crate::error::ProxyProtocolError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

type Result<T> = std::result::Result<T, ProxyProtocolError>;

/// PROXY protocol version the header was written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyVersion {
    V1,
    V2,
}

/// Whether this is a real proxied connection or a load-balancer health
/// check that should be treated as "ignore addresses, not an error".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyCommand {
    Proxy,
    Local,
}

/// Address family crossed with transport, matching the v2 wire byte.
/// `Unspec` is the legitimate "no address family asserted" case (v2 family
/// nibble `0x0`, or v1's `UNKNOWN` keyword maps to it as well since both
/// mean the same thing: a placeholder with no addresses). `Unknown` is
/// reserved for the v2 `LOCAL` command placeholder specifically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxiedProtocol {
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
    UnixStream,
    UnixDgram,
    Unknown,
    Unspec,
}

/// One decoded endpoint. IPv4/IPv6 carry a real `IpAddr`; `Unix` carries the
/// raw (already NUL-trimmed, UTF-8 validated) socket path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyAddress {
    Ip(IpAddr),
    Unix(String),
}

/// Decoded result of a PROXY header. See the invariants in the module docs
/// of the handshake crate: `Unknown`/`Unspec` protocols always carry
/// `None`/`0` addresses and ports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HAProxyMessage {
    pub version: ProxyVersion,
    pub command: ProxyCommand,
    pub proxied_protocol: ProxiedProtocol,
    pub source_address: Option<ProxyAddress>,
    pub destination_address: Option<ProxyAddress>,
    pub source_port: u16,
    pub destination_port: u16,
}

impl HAProxyMessage {
    fn placeholder(version: ProxyVersion, command: ProxyCommand, proto: ProxiedProtocol) -> Self {
        Self {
            version,
            command,
            proxied_protocol: proto,
            source_address: None,
            destination_address: None,
            source_port: 0,
            destination_port: 0,
        }
    }
}

const V2_MIN_HEADER_LEN: usize = 16;
const UNIX_PATH_LEN: usize = 108;

/// The 12-byte sequence every real v2 header starts with. `decode_v2` does
/// not require it (per spec), but callers that must tell v1 and v2 apart
/// before picking a decoder can check for it with [`starts_with_v2_signature`].
pub const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

pub fn starts_with_v2_signature(data: &[u8]) -> bool {
    data.len() >= V2_SIGNATURE.len() && data[..V2_SIGNATURE.len()] == V2_SIGNATURE
}

/// Decodes a PROXY protocol v2 binary header from the front of `data`.
/// Returns the decoded message together with the number of leading bytes
/// the header consumed (16 + `address_info_len`), so the caller can slice
/// off the RakNet payload that follows it. Does not verify the 12-byte
/// signature prefix — the wire format this is grounded on doesn't require
/// it either, and this spec explicitly makes that optional.
pub fn decode_v2(data: &[u8]) -> Result<(HAProxyMessage, usize)> {
    if data.len() < V2_MIN_HEADER_LEN {
        return Err(ProxyProtocolError::IncompleteHeader {
            needed: V2_MIN_HEADER_LEN,
            available: data.len(),
        });
    }

    let ver_cmd = data[12];
    let version = ver_cmd >> 4;
    if version != 2 {
        return Err(ProxyProtocolError::UnsupportedVersion(version));
    }
    let command = match ver_cmd & 0x0F {
        0x0 => ProxyCommand::Local,
        0x1 => ProxyCommand::Proxy,
        _ => return Err(ProxyProtocolError::InvalidCommand(ver_cmd)),
    };

    if command == ProxyCommand::Local {
        // The address_info_len field is still meaningful for LOCAL: it
        // bounds whatever (ignored) bytes follow the 16-byte fixed header.
        let address_info_len = u16::from_be_bytes([data[14], data[15]]) as usize;
        let total = V2_MIN_HEADER_LEN + address_info_len;
        if data.len() < total {
            return Err(ProxyProtocolError::IncompleteHeader {
                needed: total,
                available: data.len(),
            });
        }
        return Ok((
            HAProxyMessage::placeholder(ProxyVersion::V2, command, ProxiedProtocol::Unknown),
            total,
        ));
    }

    let fam_transport = data[13];
    let family = fam_transport >> 4;
    let transport = fam_transport & 0x0F;

    let proto = match (family, transport) {
        (0x0, _) => ProxiedProtocol::Unspec,
        (0x1, 0x1) => ProxiedProtocol::Tcp4,
        (0x1, 0x2) => ProxiedProtocol::Udp4,
        (0x2, 0x1) => ProxiedProtocol::Tcp6,
        (0x2, 0x2) => ProxiedProtocol::Udp6,
        (0x3, 0x1) => ProxiedProtocol::UnixStream,
        (0x3, 0x2) => ProxiedProtocol::UnixDgram,
        _ => return Err(ProxyProtocolError::InvalidFamily(fam_transport)),
    };

    let address_info_len = u16::from_be_bytes([data[14], data[15]]) as usize;
    let cursor = &data[V2_MIN_HEADER_LEN..];
    if cursor.len() < address_info_len {
        return Err(ProxyProtocolError::IncompleteHeader {
            needed: address_info_len,
            available: cursor.len(),
        });
    }

    let (message, consumed) = match proto {
        ProxiedProtocol::Unspec => (
            HAProxyMessage::placeholder(ProxyVersion::V2, command, proto),
            0,
        ),
        ProxiedProtocol::Tcp4 | ProxiedProtocol::Udp4 => {
            if cursor.len() < 12 {
                return Err(ProxyProtocolError::IncompleteHeader {
                    needed: 12,
                    available: cursor.len(),
                });
            }
            let src = Ipv4Addr::new(cursor[0], cursor[1], cursor[2], cursor[3]);
            let dst = Ipv4Addr::new(cursor[4], cursor[5], cursor[6], cursor[7]);
            let src_port = u16::from_be_bytes([cursor[8], cursor[9]]);
            let dst_port = u16::from_be_bytes([cursor[10], cursor[11]]);
            (
                HAProxyMessage {
                    version: ProxyVersion::V2,
                    command,
                    proxied_protocol: proto,
                    source_address: Some(ProxyAddress::Ip(IpAddr::V4(src))),
                    destination_address: Some(ProxyAddress::Ip(IpAddr::V4(dst))),
                    source_port: src_port,
                    destination_port: dst_port,
                },
                12,
            )
        }
        ProxiedProtocol::Tcp6 | ProxiedProtocol::Udp6 => {
            if cursor.len() < 36 {
                return Err(ProxyProtocolError::IncompleteHeader {
                    needed: 36,
                    available: cursor.len(),
                });
            }
            let mut src_octets = [0u8; 16];
            let mut dst_octets = [0u8; 16];
            src_octets.copy_from_slice(&cursor[0..16]);
            dst_octets.copy_from_slice(&cursor[16..32]);
            let src_port = u16::from_be_bytes([cursor[32], cursor[33]]);
            let dst_port = u16::from_be_bytes([cursor[34], cursor[35]]);
            (
                HAProxyMessage {
                    version: ProxyVersion::V2,
                    command,
                    proxied_protocol: proto,
                    source_address: Some(ProxyAddress::Ip(IpAddr::V6(Ipv6Addr::from(src_octets)))),
                    destination_address: Some(ProxyAddress::Ip(IpAddr::V6(Ipv6Addr::from(
                        dst_octets,
                    )))),
                    source_port: src_port,
                    destination_port: dst_port,
                },
                36,
            )
        }
        ProxiedProtocol::UnixStream | ProxiedProtocol::UnixDgram => {
            if address_info_len < 2 * UNIX_PATH_LEN {
                return Err(ProxyProtocolError::IncompleteHeader {
                    needed: 2 * UNIX_PATH_LEN,
                    available: address_info_len,
                });
            }
            let src_path = decode_unix_path(&cursor[0..UNIX_PATH_LEN])?;
            let dst_path = decode_unix_path(&cursor[UNIX_PATH_LEN..2 * UNIX_PATH_LEN])?;
            (
                HAProxyMessage {
                    version: ProxyVersion::V2,
                    command,
                    proxied_protocol: proto,
                    source_address: Some(ProxyAddress::Unix(src_path)),
                    destination_address: Some(ProxyAddress::Unix(dst_path)),
                    source_port: 0,
                    destination_port: 0,
                },
                2 * UNIX_PATH_LEN,
            )
        }
        ProxiedProtocol::Unknown => unreachable!("LOCAL already returned above"),
    };

    // address_info_len bounds the address block AND the TLV trailer
    // together; honor it instead of assuming the fixed per-family size is
    // the whole story, and skip only the region it declares.
    let region = &cursor[..address_info_len];
    let tlv_region = &region[consumed.min(region.len())..];
    skip_tlvs(tlv_region);

    Ok((message, V2_MIN_HEADER_LEN + address_info_len))
}

fn decode_unix_path(field: &[u8]) -> Result<String> {
    let nul_at = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..nul_at])
        .map(str::to_owned)
        .map_err(|e| ProxyProtocolError::InvalidAddress(format!("non-utf8 unix path: {e}")))
}

/// Skips trailing TLVs without interpreting them: type byte, u16 length,
/// then that many bytes, until fewer than 4 bytes remain.
fn skip_tlvs(mut data: &[u8]) {
    while data.len() >= 4 {
        let len = u16::from_be_bytes([data[1], data[2]]) as usize;
        let skip = 3 + len;
        if skip > data.len() {
            break;
        }
        data = &data[skip..];
    }
}

/// Decodes a PROXY protocol v1 text header. `line` must already have its
/// trailing `\r\n` stripped by the caller.
pub fn decode_v1(line: &str) -> Result<HAProxyMessage> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() < 2 || parts[0] != "PROXY" {
        return Err(ProxyProtocolError::MalformedV1(format!(
            "expected \"PROXY ...\", got {line:?}"
        )));
    }

    let proto = match parts[1] {
        "TCP4" => ProxiedProtocol::Tcp4,
        "TCP6" => ProxiedProtocol::Tcp6,
        "UNKNOWN" => ProxiedProtocol::Unspec,
        other => {
            return Err(ProxyProtocolError::MalformedV1(format!(
                "unsupported v1 protocol keyword {other:?}"
            )))
        }
    };

    if proto == ProxiedProtocol::Unspec {
        // Trailing garbage after UNKNOWN is accepted silently, matching
        // PROXY v1 semantics.
        return Ok(HAProxyMessage::placeholder(
            ProxyVersion::V1,
            ProxyCommand::Proxy,
            proto,
        ));
    }

    if parts.len() != 6 {
        return Err(ProxyProtocolError::MalformedV1(format!(
            "expected 6 space-separated fields, got {}",
            parts.len()
        )));
    }

    let src_ip = parts[2];
    let dst_ip = parts[3];
    let src_port = parse_v1_port(parts[4])?;
    let dst_port = parse_v1_port(parts[5])?;

    let (source_address, destination_address) = match proto {
        ProxiedProtocol::Tcp4 => (
            ProxyAddress::Ip(IpAddr::V4(
                src_ip
                    .parse::<Ipv4Addr>()
                    .map_err(|e| ProxyProtocolError::InvalidAddress(format!("{src_ip}: {e}")))?,
            )),
            ProxyAddress::Ip(IpAddr::V4(
                dst_ip
                    .parse::<Ipv4Addr>()
                    .map_err(|e| ProxyProtocolError::InvalidAddress(format!("{dst_ip}: {e}")))?,
            )),
        ),
        ProxiedProtocol::Tcp6 => (
            ProxyAddress::Ip(IpAddr::V6(
                src_ip
                    .parse::<Ipv6Addr>()
                    .map_err(|e| ProxyProtocolError::InvalidAddress(format!("{src_ip}: {e}")))?,
            )),
            ProxyAddress::Ip(IpAddr::V6(
                dst_ip
                    .parse::<Ipv6Addr>()
                    .map_err(|e| ProxyProtocolError::InvalidAddress(format!("{dst_ip}: {e}")))?,
            )),
        ),
        _ => unreachable!("UNKNOWN already returned above"),
    };

    Ok(HAProxyMessage {
        version: ProxyVersion::V1,
        command: ProxyCommand::Proxy,
        proxied_protocol: proto,
        source_address: Some(source_address),
        destination_address: Some(destination_address),
        source_port: src_port,
        destination_port: dst_port,
    })
}

/// Maximum length of a v1 text header per the original PROXY protocol spec:
/// 107 bytes of content plus the trailing CRLF, naturally bounding how far
/// `decode_v1_datagram` searches before giving up.
const V1_MAX_HEADER_LEN: usize = 107 + 2;

/// Decodes a PROXY v1 header sitting at the front of a raw datagram buffer,
/// locating its own terminating CRLF rather than requiring the caller to
/// have already framed the line (UDP has no stream to frame from — this is
/// the datagram-buffer analogue of [`decode_v1`]).
pub fn decode_v1_datagram(data: &[u8]) -> Result<(HAProxyMessage, usize)> {
    let search_len = data.len().min(V1_MAX_HEADER_LEN);
    let crlf_at = data[..search_len]
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(|| ProxyProtocolError::MalformedV1("missing terminating CRLF".into()))?;

    let line = std::str::from_utf8(&data[..crlf_at])
        .map_err(|e| ProxyProtocolError::MalformedV1(format!("non-utf8 v1 header: {e}")))?;
    let message = decode_v1(line)?;
    Ok((message, crlf_at + 2))
}

/// Auto-detects and decodes whichever PROXY protocol version prefixes
/// `data`: the v2 binary signature if present, otherwise a v1 text header.
/// Returns the message and the number of leading bytes the header consumed,
/// so the caller can slice off the RakNet payload that follows it.
pub fn decode(data: &[u8]) -> Result<(HAProxyMessage, usize)> {
    if starts_with_v2_signature(data) {
        decode_v2(data)
    } else {
        decode_v1_datagram(data)
    }
}

fn parse_v1_port(field: &str) -> Result<u16> {
    let port: u16 = field
        .parse()
        .map_err(|_| ProxyProtocolError::InvalidPort(field.to_string()))?;
    if port == 0 {
        return Err(ProxyProtocolError::InvalidPort(field.to_string()));
    }
    Ok(port)
}
