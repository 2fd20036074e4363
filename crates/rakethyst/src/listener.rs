use crate::config::{HandshakeConfig, ProxyProtocolConfig};
use crate::handshake::{HandshakeEngine, HandshakeEvent};
use crate::proxy::{self, HAProxyMessage, ProxiedProtocol, ProxyAddress, ProxyCommand};
use crate::session::ChildSessionFactory;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Datagrams above this size are not valid RakNet offline traffic (the
/// largest OCR1 a client would ever pad to is well under common path MTUs);
/// generous enough that legitimate MTU probes never get truncated.
const RECV_BUFFER_LEN: usize = 2048;

/// How often the pending-connection table is swept for TTL-expired entries.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Binds a UDP socket and drives [`HandshakeEngine`] over every datagram it
/// receives, optionally unwrapping a PROXY protocol header first. One
/// listener owns one socket; spawn more for additional bind addresses.
pub struct RakNetListener<F: ChildSessionFactory> {
    socket: Arc<UdpSocket>,
    engine: Arc<HandshakeEngine<F>>,
    proxy_protocol: ProxyProtocolConfig,
}

impl<F: ChildSessionFactory + 'static> RakNetListener<F> {
    pub async fn bind(
        addr: SocketAddr,
        config: HandshakeConfig,
        proxy_protocol: ProxyProtocolConfig,
        factory: F,
    ) -> std::io::Result<Self> {
        config
            .validate()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

        let socket = UdpSocket::bind(addr).await?;
        info!("rakethyst listener bound to {addr}");

        let engine = Arc::new(HandshakeEngine::new(config, factory));
        engine.pending_table().spawn_expiry_task(EXPIRY_SWEEP_INTERVAL);

        Ok(Self {
            socket: Arc::new(socket),
            engine,
            proxy_protocol,
        })
    }

    /// Runs the receive loop until the socket errors. Each datagram is
    /// handled on its own spawned task so a slow reply write never delays
    /// the next `recv_from`.
    pub async fn run(&self) -> std::io::Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            let (len, wire_sender) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }

            let datagram = Bytes::copy_from_slice(&buf[..len]);
            let engine = Arc::clone(&self.engine);
            let socket = Arc::clone(&self.socket);
            let proxy_protocol = self.proxy_protocol;

            tokio::spawn(async move {
                handle_datagram(&engine, &socket, proxy_protocol, datagram, wire_sender).await;
            });
        }
    }
}

async fn handle_datagram<F: ChildSessionFactory>(
    engine: &HandshakeEngine<F>,
    socket: &UdpSocket,
    proxy_protocol: ProxyProtocolConfig,
    datagram: Bytes,
    wire_sender: SocketAddr,
) {
    let Some((payload, logical_sender)) = resolve_sender(proxy_protocol, &datagram, wire_sender)
    else {
        return;
    };

    // Replies always go back out over the physical socket path the
    // datagram arrived on, even when PROXY protocol reports a different
    // logical client address — that's the return path a LB relay expects.
    match engine.process_datagram(payload, logical_sender) {
        Some(HandshakeEvent::Reply(bytes)) => {
            if let Err(e) = socket.send_to(&bytes, wire_sender).await {
                warn!("failed to send handshake reply to {wire_sender}: {e}");
            }
        }
        Some(HandshakeEvent::PingForwarded { time, sender }) => {
            trace!("unconnected ping forwarded from {sender} (ping_time={time})");
        }
        None => {}
    }
}

/// Determines the payload to classify and the address to key the handshake
/// state machine on. With PROXY protocol disabled, that's simply the raw
/// datagram and the UDP-observed sender. Enabled, the header is decoded and
/// stripped off the front of the buffer, and the logical client address
/// comes from the header rather than the (possibly relayed) wire address.
fn resolve_sender(
    proxy_protocol: ProxyProtocolConfig,
    datagram: &Bytes,
    wire_sender: SocketAddr,
) -> Option<(Bytes, SocketAddr)> {
    if !proxy_protocol.enabled {
        return Some((datagram.clone(), wire_sender));
    }

    match proxy::decode(datagram) {
        Ok((message, consumed)) => {
            let logical_sender = client_address_from(&message).unwrap_or(wire_sender);
            Some((datagram.slice(consumed..), logical_sender))
        }
        Err(e) => {
            if proxy_protocol.reject_on_decode_error {
                debug!("dropping datagram from {wire_sender}: PROXY header decode failed: {e}");
                None
            } else {
                warn!(
                    "PROXY header decode failed for {wire_sender}, using wire address instead: {e}"
                );
                Some((datagram.clone(), wire_sender))
            }
        }
    }
}

/// Extracts the proxied client `(ip, port)` from a decoded PROXY message, if
/// it carries one. `LOCAL` (health check) and `UNKNOWN`/`UNSPEC` families
/// never have addresses by construction (see [`HAProxyMessage`]'s invariants).
fn client_address_from(message: &HAProxyMessage) -> Option<SocketAddr> {
    if message.command == ProxyCommand::Local {
        return None;
    }
    match message.proxied_protocol {
        ProxiedProtocol::Tcp4 | ProxiedProtocol::Tcp6 | ProxiedProtocol::Udp4 | ProxiedProtocol::Udp6 => {
            match &message.source_address {
                Some(ProxyAddress::Ip(ip)) => Some(SocketAddr::new(*ip, message.source_port)),
                _ => None,
            }
        }
        ProxiedProtocol::UnixStream | ProxiedProtocol::UnixDgram | ProxiedProtocol::Unknown | ProxiedProtocol::Unspec => {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyVersion;
    use std::net::{IpAddr, Ipv4Addr};

    fn cfg(enabled: bool) -> ProxyProtocolConfig {
        ProxyProtocolConfig {
            enabled,
            reject_on_decode_error: true,
        }
    }

    #[test]
    fn disabled_passes_datagram_through_unchanged() {
        let datagram = Bytes::from_static(b"\x05payload");
        let wire = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234);
        let (payload, addr) = resolve_sender(cfg(false), &datagram, wire).unwrap();
        assert_eq!(payload, datagram);
        assert_eq!(addr, wire);
    }

    #[test]
    fn v1_header_is_stripped_and_source_used_as_logical_sender() {
        let mut data = b"PROXY TCP4 203.0.113.9 198.51.100.1 55000 19132\r\n".to_vec();
        data.extend_from_slice(b"\x05rest-of-raknet-datagram");
        let datagram = Bytes::from(data);
        let wire = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234);

        let (payload, addr) = resolve_sender(cfg(true), &datagram, wire).unwrap();
        assert_eq!(payload.as_ref(), b"\x05rest-of-raknet-datagram");
        assert_eq!(
            addr,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 55000)
        );
    }

    #[test]
    fn decode_failure_drops_when_configured_to_reject() {
        let datagram = Bytes::from_static(b"not a proxy header at all, no crlf here");
        let wire = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234);
        assert!(resolve_sender(cfg(true), &datagram, wire).is_none());
    }

    #[test]
    fn decode_failure_falls_back_to_wire_address_when_configured() {
        let mut lenient = cfg(true);
        lenient.reject_on_decode_error = false;
        let datagram = Bytes::from_static(b"not a proxy header at all, no crlf here");
        let wire = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234);
        let (payload, addr) = resolve_sender(lenient, &datagram, wire).unwrap();
        assert_eq!(payload, datagram);
        assert_eq!(addr, wire);
    }

    #[test]
    fn local_command_falls_back_to_wire_address() {
        let mut header = proxy::V2_SIGNATURE.to_vec();
        header.push(0x20); // version 2, command LOCAL
        header.push(0x00);
        header.extend_from_slice(&0u16.to_be_bytes());
        header.extend_from_slice(b"\x05trailing");
        let datagram = Bytes::from(header);
        let wire = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234);

        let (message, consumed) = proxy::decode(&datagram).unwrap();
        assert_eq!(message.version, ProxyVersion::V2);
        let (payload, addr) = resolve_sender(cfg(true), &datagram, wire).unwrap();
        assert_eq!(addr, wire);
        assert_eq!(payload.as_ref(), &datagram[consumed..]);
    }
}
