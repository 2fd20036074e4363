use crate::error::HandshakeError;
use crate::wire::DEFAULT_MAGIC;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Optional sink for handshake-level events, mirroring the shape of an
/// observability hook an embedder might wire into metrics. Both methods
/// have no-op defaults so a caller only needs to implement the one it cares
/// about.
pub trait HandshakeMetrics: Send + Sync {
    fn unconnected_ping(&self, _addr: SocketAddr) {}
    fn connection_init(&self, _addr: SocketAddr, _opcode: u8) {}
}

/// Immutable server identity and negotiation bounds for the offline
/// handshake. Read-only after construction; shareable across handler tasks
/// without locking.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub guid: u64,
    pub magic: [u8; 16],
    pub advertisement: Option<Bytes>,
    pub supported_protocols: Option<BTreeSet<u8>>,
    pub min_mtu: u16,
    pub max_mtu: u16,
    pub send_cookie: bool,
    pub handle_ping_externally: bool,
    pub pending_ttl: Duration,
    pub metrics: Option<Arc<dyn HandshakeMetrics>>,
}

impl std::fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("guid", &self.guid)
            .field("magic", &self.magic)
            .field("advertisement", &self.advertisement)
            .field("supported_protocols", &self.supported_protocols)
            .field("min_mtu", &self.min_mtu)
            .field("max_mtu", &self.max_mtu)
            .field("send_cookie", &self.send_cookie)
            .field("handle_ping_externally", &self.handle_ping_externally)
            .field("pending_ttl", &self.pending_ttl)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            guid: 0,
            magic: DEFAULT_MAGIC,
            advertisement: None,
            supported_protocols: None,
            min_mtu: 400,
            max_mtu: 1400,
            send_cookie: false,
            handle_ping_externally: false,
            pending_ttl: Duration::from_secs(10),
            metrics: None,
        }
    }
}

impl HandshakeConfig {
    /// Validates the configuration, matching `amethyst`'s own
    /// `Config::validate()` pattern: errors surface once at startup rather
    /// than on the datagram path.
    pub fn validate(&self) -> Result<(), HandshakeError> {
        if self.magic == [0u8; 16] {
            return Err(HandshakeError::InvalidConfig(
                "unconnected magic must not be all-zero".into(),
            ));
        }
        if self.min_mtu == 0 {
            return Err(HandshakeError::InvalidConfig(
                "min_mtu must be greater than zero".into(),
            ));
        }
        if self.min_mtu > self.max_mtu {
            return Err(HandshakeError::InvalidConfig(format!(
                "min_mtu ({}) must not exceed max_mtu ({})",
                self.min_mtu, self.max_mtu
            )));
        }
        if let Some(protocols) = &self.supported_protocols {
            if protocols.is_empty() {
                return Err(HandshakeError::InvalidConfig(
                    "supported_protocols, if set, must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Highest protocol version this server will accept, used when replying
    /// `INCOMPATIBLE_PROTOCOL_VERSION`. Falls back to 11 (the common
    /// Bedrock baseline) when no explicit set is configured.
    pub fn highest_supported_protocol(&self) -> u8 {
        self.supported_protocols
            .as_ref()
            .and_then(|set| set.iter().next_back().copied())
            .unwrap_or(11)
    }

    pub fn accepts_protocol(&self, version: u8) -> bool {
        match &self.supported_protocols {
            Some(set) => set.contains(&version),
            None => true,
        }
    }
}

/// Whether the listener expects a PROXY protocol header ahead of every
/// RakNet datagram, and how to react when decoding it fails.
#[derive(Clone, Copy, Debug)]
pub struct ProxyProtocolConfig {
    pub enabled: bool,
    /// When true, a malformed/absent header causes the datagram to be
    /// dropped. When false, the UDP-observed source address is used as a
    /// fallback instead.
    pub reject_on_decode_error: bool,
}

impl Default for ProxyProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reject_on_decode_error: true,
        }
    }
}
