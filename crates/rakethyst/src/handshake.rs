use crate::classifier::{self, OfflineOpcode};
use crate::config::HandshakeConfig;
use crate::pending::{PendingConnection, PendingTable};
use crate::session::ChildSessionFactory;
use crate::wire;
use amethyst_binary::io::BinaryReader;
use bytes::Bytes;
use log::{debug, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;

/// What the state machine wants the caller to do after processing one
/// datagram. `None` from [`HandshakeEngine::process_datagram`] means
/// "nothing to do" — either the datagram wasn't offline RakNet traffic at
/// all, or it was and the correct response is a silent drop.
pub enum HandshakeEvent {
    /// Send these bytes back to the sender.
    Reply(Bytes),
    /// `handle_ping_externally` is set: the ping was not answered here: the
    /// caller should treat `(time, sender)` as an application-level event.
    PingForwarded { time: u64, sender: SocketAddr },
}

/// Compares two cookies without a data-dependent branch, so equality
/// doesn't leak through timing (spec's "security-sensitive timing" note —
/// the attack surface on a 4-byte value is small, but this costs nothing).
fn cookies_equal(a: u32, b: u32) -> bool {
    let a = a.to_be_bytes();
    let b = b.to_be_bytes();
    let mut diff = 0u8;
    for i in 0..4 {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

/// Draws a fresh cookie from a non-blocking cryptographically secure
/// source. `rand::random` pulls from the thread-local CSPRNG, which never
/// suspends the caller, satisfying the "no suspension points in the state
/// machine" requirement — the same call `amethyst`'s own `main.rs` uses for
/// the server GUID.
fn generate_cookie() -> u32 {
    rand::random::<u32>()
}

/// Owns the pending-connection table and drives the offline handshake for
/// one listening channel. Cheap to clone-share via `Arc` across handler
/// tasks; `config` and `pending` are themselves already `Send + Sync`.
pub struct HandshakeEngine<F: ChildSessionFactory> {
    config: HandshakeConfig,
    pending: Arc<PendingTable>,
    factory: F,
}

impl<F: ChildSessionFactory> HandshakeEngine<F> {
    pub fn new(config: HandshakeConfig, factory: F) -> Self {
        let pending = PendingTable::new(config.pending_ttl);
        Self {
            config,
            pending,
            factory,
        }
    }

    pub fn pending_table(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Classifies and, if it's offline RakNet traffic, processes `data`.
    /// Returns `None` both for non-offline datagrams (the caller should
    /// route those to the established-session layer) and for datagrams
    /// this layer silently drops.
    pub fn process_datagram(&self, data: Bytes, sender: SocketAddr) -> Option<HandshakeEvent> {
        let opcode = classifier::classify(&data, &self.config.magic)?;

        let mut reader = BinaryReader::new(data);
        // Classification already validated the opcode byte; consume it.
        reader.read_u8().ok()?;

        match opcode {
            OfflineOpcode::UnconnectedPing => self.handle_unconnected_ping(&mut reader, sender),
            OfflineOpcode::OpenConnectionRequest1 => {
                self.handle_open_connection_request_1(&mut reader, sender)
            }
            OfflineOpcode::OpenConnectionRequest2 => {
                self.handle_open_connection_request_2(&mut reader, sender)
            }
        }
    }

    fn handle_unconnected_ping(
        &self,
        reader: &mut BinaryReader,
        sender: SocketAddr,
    ) -> Option<HandshakeEvent> {
        let (ping_time, _client_guid) = wire::decode_unconnected_ping(reader, &self.config.magic)
            .map_err(|e| warn!("malformed UNCONNECTED_PING from {sender}: {e}"))
            .ok()?;

        if let Some(metrics) = &self.config.metrics {
            metrics.unconnected_ping(sender);
        }

        if self.config.handle_ping_externally {
            return Some(HandshakeEvent::PingForwarded {
                time: ping_time,
                sender,
            });
        }

        let reply = wire::encode_unconnected_pong(
            ping_time,
            self.config.guid,
            &self.config.magic,
            self.config.advertisement.as_deref(),
        )
        .map_err(|e| warn!("failed to encode UNCONNECTED_PONG for {sender}: {e}"))
        .ok()?;

        Some(HandshakeEvent::Reply(reply))
    }

    fn handle_open_connection_request_1(
        &self,
        reader: &mut BinaryReader,
        sender: SocketAddr,
    ) -> Option<HandshakeEvent> {
        let protocol_version = wire::decode_open_connection_request_1(reader, &self.config.magic)
            .map_err(|e| warn!("malformed OPEN_CONNECTION_REQUEST_1 from {sender}: {e}"))
            .ok()?;

        if !self.config.accepts_protocol(protocol_version) {
            debug!(
                "rejecting OCR1 from {sender}: protocol {protocol_version} unsupported"
            );
            let reply = wire::encode_incompatible_protocol_version(
                self.config.highest_supported_protocol(),
                self.config.guid,
                &self.config.magic,
            )
            .ok()?;
            return Some(HandshakeEvent::Reply(reply));
        }

        // Everything left in the body is padding the client added to probe
        // its path MTU; the server never interprets it, only measures it.
        let padding_len = reader.remaining();
        let ip_header_len = if sender.ip().is_ipv4() { 20 } else { 40 };
        let mtu_candidate = padding_len + 1 + self.config.magic.len() + 1 + ip_header_len + 8;
        let mtu = mtu_candidate.clamp(self.config.min_mtu as usize, self.config.max_mtu as usize) as u16;

        let cookie = self.config.send_cookie.then(generate_cookie);

        self.pending.insert(
            sender,
            PendingConnection::new(protocol_version, cookie.unwrap_or(0)),
        );

        if let Some(metrics) = &self.config.metrics {
            metrics.connection_init(sender, wire::OPEN_CONNECTION_REQUEST_1);
        }

        let reply =
            wire::encode_open_connection_reply_1(self.config.guid, &self.config.magic, cookie, mtu)
                .map_err(|e| warn!("failed to encode OPEN_CONNECTION_REPLY_1 for {sender}: {e}"))
                .ok()?;

        Some(HandshakeEvent::Reply(reply))
    }

    fn handle_open_connection_request_2(
        &self,
        reader: &mut BinaryReader,
        sender: SocketAddr,
    ) -> Option<HandshakeEvent> {
        // An OCR2 with no matching OCR1 visible in the pending table is
        // exactly the missing-precondition case: a silent drop, regardless
        // of what the rest of the body contains.
        let pending = self.pending.remove(&sender)?;

        let request =
            wire::decode_open_connection_request_2(reader, &self.config.magic, self.config.send_cookie)
                .map_err(|e| warn!("malformed OPEN_CONNECTION_REQUEST_2 from {sender}: {e}"))
                .ok()?;

        if self.config.send_cookie {
            let got = request.cookie.unwrap_or(0);
            if !cookies_equal(got, pending.cookie) {
                trace!("cookie mismatch on OCR2 from {sender}; treating as spoofed");
                return None;
            }
        }

        if request.mtu < self.config.min_mtu || request.mtu > self.config.max_mtu {
            debug!(
                "OCR2 from {sender} claims mtu {} outside [{}, {}]",
                request.mtu, self.config.min_mtu, self.config.max_mtu
            );
            let reply = wire::encode_already_connected(self.config.guid, &self.config.magic).ok()?;
            return Some(HandshakeEvent::Reply(reply));
        }

        let handed_off = self.factory.create_child_session(
            sender,
            request.client_guid,
            pending.protocol_version,
            request.mtu,
        );

        if handed_off.is_none() {
            debug!("rejecting OCR2 from {sender}: session already exists");
            let reply = wire::encode_already_connected(self.config.guid, &self.config.magic).ok()?;
            return Some(HandshakeEvent::Reply(reply));
        }

        if let Some(metrics) = &self.config.metrics {
            metrics.connection_init(sender, wire::OPEN_CONNECTION_REQUEST_2);
        }

        let reply = wire::encode_open_connection_reply_2(
            self.config.guid,
            &self.config.magic,
            sender,
            request.mtu,
        )
        .map_err(|e| warn!("failed to encode OPEN_CONNECTION_REPLY_2 for {sender}: {e}"))
        .ok()?;

        Some(HandshakeEvent::Reply(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amethyst_binary::io::BinaryWriter;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MAGIC: [u8; 16] = wire::DEFAULT_MAGIC;

    struct CountingFactory {
        allow: bool,
        calls: AtomicUsize,
    }

    impl ChildSessionFactory for CountingFactory {
        type Session = ();

        fn create_child_session(
            &self,
            _client_addr: SocketAddr,
            _client_guid: u64,
            _protocol_version: u8,
            _negotiated_mtu: u16,
        ) -> Option<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.allow.then_some(())
        }
    }

    fn config() -> HandshakeConfig {
        HandshakeConfig {
            guid: 0x0102030405060708,
            magic: MAGIC,
            min_mtu: 400,
            max_mtu: 1400,
            ..Default::default()
        }
    }

    fn client_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)), 55000)
    }

    fn encode_ocr1(protocol_version: u8, padding_len: usize) -> Bytes {
        let mut writer = BinaryWriter::new();
        writer.write_u8(wire::OPEN_CONNECTION_REQUEST_1).unwrap();
        writer.write_magic(&MAGIC).unwrap();
        writer.write_u8(protocol_version).unwrap();
        writer.write_padding(padding_len).unwrap();
        writer.freeze()
    }

    fn encode_ocr2(mtu: u16, client_guid: u64, cookie: Option<u32>) -> Bytes {
        let mut writer = BinaryWriter::new();
        writer.write_u8(wire::OPEN_CONNECTION_REQUEST_2).unwrap();
        writer.write_magic(&MAGIC).unwrap();
        if let Some(cookie) = cookie {
            writer.write_u32(cookie).unwrap();
            writer.write_bool(false).unwrap();
        }
        writer.write_padding_address().unwrap();
        writer.write_u16(mtu).unwrap();
        writer.write_u64(client_guid).unwrap();
        writer.freeze()
    }

    #[test]
    fn happy_path_without_cookie() {
        let engine = HandshakeEngine::new(
            config(),
            CountingFactory {
                allow: true,
                calls: AtomicUsize::new(0),
            },
        );
        let addr = client_addr();

        let ocr1 = encode_ocr1(11, 1200);
        let reply1 = match engine.process_datagram(ocr1, addr) {
            Some(HandshakeEvent::Reply(bytes)) => bytes,
            _ => panic!("expected a reply"),
        };
        assert_eq!(reply1[0], wire::OPEN_CONNECTION_REPLY_1);
        let mtu = u16::from_be_bytes([reply1[reply1.len() - 2], reply1[reply1.len() - 1]]);
        assert_eq!(mtu, 1246);
        assert!(engine.pending_table().contains(&addr));

        let ocr2 = encode_ocr2(mtu, 0xAABBCCDDEEFF0011, None);
        let reply2 = match engine.process_datagram(ocr2, addr) {
            Some(HandshakeEvent::Reply(bytes)) => bytes,
            _ => panic!("expected a reply"),
        };
        assert_eq!(reply2[0], wire::OPEN_CONNECTION_REPLY_2);
        assert!(!engine.pending_table().contains(&addr));
        assert_eq!(engine.factory.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cookie_mismatch_drops_silently() {
        let mut cfg = config();
        cfg.send_cookie = true;
        let engine = HandshakeEngine::new(
            cfg,
            CountingFactory {
                allow: true,
                calls: AtomicUsize::new(0),
            },
        );
        let addr = client_addr();

        let ocr1 = encode_ocr1(11, 100);
        let reply1 = match engine.process_datagram(ocr1, addr) {
            Some(HandshakeEvent::Reply(bytes)) => bytes,
            _ => panic!("expected a reply"),
        };
        let cookie = u32::from_be_bytes([
            reply1[reply1.len() - 6],
            reply1[reply1.len() - 5],
            reply1[reply1.len() - 4],
            reply1[reply1.len() - 3],
        ]);

        let ocr2 = encode_ocr2(1200, 42, Some(cookie ^ 1));
        assert!(engine.process_datagram(ocr2, addr).is_none());
        assert_eq!(engine.factory.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ocr2_without_ocr1_is_silently_dropped() {
        let engine = HandshakeEngine::new(
            config(),
            CountingFactory {
                allow: true,
                calls: AtomicUsize::new(0),
            },
        );
        let ocr2 = encode_ocr2(1200, 42, None);
        assert!(engine.process_datagram(ocr2, client_addr()).is_none());
    }

    #[test]
    fn incompatible_protocol_version_carries_highest_supported() {
        let mut cfg = config();
        cfg.supported_protocols = Some([9u8, 10, 11].into_iter().collect());
        let engine = HandshakeEngine::new(
            cfg,
            CountingFactory {
                allow: true,
                calls: AtomicUsize::new(0),
            },
        );

        let ocr1 = encode_ocr1(7, 50);
        let reply = match engine.process_datagram(ocr1, client_addr()) {
            Some(HandshakeEvent::Reply(bytes)) => bytes,
            _ => panic!("expected a reply"),
        };
        assert_eq!(reply[0], wire::INCOMPATIBLE_PROTOCOL_VERSION);
        assert_eq!(reply[1], 11);
        assert!(!engine.pending_table().contains(&client_addr()));
    }

    #[test]
    fn duplicate_session_replies_already_connected() {
        let engine = HandshakeEngine::new(
            config(),
            CountingFactory {
                allow: false,
                calls: AtomicUsize::new(0),
            },
        );
        let addr = client_addr();

        engine.process_datagram(encode_ocr1(11, 50), addr);
        let reply = match engine.process_datagram(encode_ocr2(1200, 1, None), addr) {
            Some(HandshakeEvent::Reply(bytes)) => bytes,
            _ => panic!("expected a reply"),
        };
        assert_eq!(reply[0], wire::ALREADY_CONNECTED);
    }
}
