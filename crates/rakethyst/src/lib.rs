//! The connection-establishment core of a RakNet server: the offline
//! handshake (ping/pong, `OPEN_CONNECTION_REQUEST_{1,2}`) and the HAProxy
//! PROXY protocol decoder a front-tier load balancer prepends to the first
//! datagram of a session.
//!
//! This crate does not open a socket itself — [`listener`] wires the state
//! machine to a `tokio::net::UdpSocket`, but embedders are free to drive
//! [`handshake::HandshakeEngine`] from their own I/O loop instead.

pub mod classifier;
pub mod config;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod pending;
pub mod proxy;
pub mod session;
pub mod wire;

pub use config::{HandshakeConfig, HandshakeMetrics, ProxyProtocolConfig};
pub use error::{HandshakeError, ProxyProtocolError};
pub use handshake::{HandshakeEngine, HandshakeEvent};
pub use listener::RakNetListener;
pub use pending::{PendingConnection, PendingTable};
pub use proxy::{HAProxyMessage, ProxiedProtocol, ProxyAddress, ProxyCommand, ProxyVersion};
pub use session::{ChildSessionFactory, Priority, RakMessage, Reliability};
