use amethyst_log::AmethystLogger;
use log::{error, info, logger, Level, SetLoggerError};
use rakethyst::{ChildSessionFactory, HandshakeConfig, HandshakeMetrics, ProxyProtocolConfig, RakNetListener};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

pub mod config;

/// Logs every handshake-level event at the level `amethyst` logs other
/// lifecycle milestones at; no metrics backend is wired up yet.
struct LoggingMetrics;

impl HandshakeMetrics for LoggingMetrics {
    fn unconnected_ping(&self, addr: SocketAddr) {
        log::trace!("unconnected ping from {addr}");
    }

    fn connection_init(&self, addr: SocketAddr, opcode: u8) {
        log::debug!("connection init from {addr} (opcode {opcode:#04x})");
    }
}

/// Placeholder handoff target: the reliable/ordered session layer this
/// handshake core feeds is out of scope for this crate (spec.md §1). This
/// factory accepts every handshake and only counts them, standing in for
/// whatever session registry a full server would plug in here.
struct LoggingSessionFactory {
    accepted: AtomicU64,
}

impl ChildSessionFactory for LoggingSessionFactory {
    type Session = ();

    fn create_child_session(
        &self,
        client_addr: SocketAddr,
        client_guid: u64,
        protocol_version: u8,
        negotiated_mtu: u16,
    ) -> Option<()> {
        let count = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "handshake complete: {client_addr} guid={client_guid:#018x} protocol={protocol_version} mtu={negotiated_mtu} (total {count})"
        );
        Some(())
    }
}

fn build_handshake_config(raknet: &config::RakNetConfig, server_guid: u64) -> HandshakeConfig {
    HandshakeConfig {
        guid: server_guid,
        advertisement: raknet
            .advertisement
            .as_ref()
            .map(|s| bytes::Bytes::from(s.clone().into_bytes())),
        supported_protocols: raknet
            .supported_protocols
            .as_ref()
            .map(|protocols| protocols.iter().copied().collect::<BTreeSet<u8>>()),
        min_mtu: raknet.min_mtu,
        max_mtu: raknet.max_mtu,
        send_cookie: raknet.send_cookie,
        handle_ping_externally: raknet.handle_ping_externally,
        pending_ttl: std::time::Duration::from_secs(raknet.pending_ttl_secs),
        metrics: Some(std::sync::Arc::new(LoggingMetrics)),
        ..HandshakeConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), SetLoggerError> {
    AmethystLogger::init(Level::Info, 1024).unwrap();

    let start_time = Instant::now();

    let config = match config::handle() {
        Ok(config) => config,
        Err(_e) => {
            error!("Failed to load configuration.");
            std::process::exit(1);
        }
    };

    let bind_addr = match SocketAddr::from_str(&config.network.address) {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid network.address in configuration: {e}");
            std::process::exit(1);
        }
    };

    let server_guid = rand::random::<u64>();
    let handshake_config = build_handshake_config(&config.raknet, server_guid);
    let proxy_protocol = ProxyProtocolConfig {
        enabled: config.raknet.proxy_protocol_enabled,
        reject_on_decode_error: config.raknet.proxy_protocol_reject_on_decode_error,
    };
    let factory = LoggingSessionFactory {
        accepted: AtomicU64::new(0),
    };

    let listener = match RakNetListener::bind(bind_addr, handshake_config, proxy_protocol, factory)
        .await
    {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind RakNet listener on {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    let server_name = &config.server.name;
    let elapsed_duration = start_time.elapsed();
    info!(
        "{server_name} (guid {server_guid:#018x}) load done in {:.2}s, listening on {bind_addr}",
        elapsed_duration.as_secs_f64()
    );
    logger().flush();

    if let Err(e) = listener.run().await {
        error!("RakNet listener stopped: {e}");
    }

    Ok(())
}
