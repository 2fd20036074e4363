use amethyst_binary::error::BinaryError;
use thiserror::Error;

/// Errors from the offline handshake path.
///
/// Per the error taxonomy, most adversarial input is a silent drop rather
/// than an error return; this enum only covers decode failures on data that
/// has already passed the classifier's magic check, which are logged and
/// dropped rather than propagated to the peer.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("malformed handshake payload: {0}")]
    Malformed(#[from] BinaryError),

    #[error("invalid handshake configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

/// Errors from decoding a PROXY protocol v1/v2 header.
#[derive(Error, Debug)]
pub enum ProxyProtocolError {
    #[error("incomplete PROXY header: needed {needed} bytes, had {available}")]
    IncompleteHeader { needed: usize, available: usize },

    #[error("unsupported PROXY protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid PROXY command byte: {0:#04x}")]
    InvalidCommand(u8),

    #[error("invalid PROXY family/transport byte: {0:#04x}")]
    InvalidFamily(u8),

    #[error("invalid address in PROXY header: {0}")]
    InvalidAddress(String),

    #[error("invalid port in PROXY header: {0}")]
    InvalidPort(String),

    #[error("malformed PROXY v1 header: {0}")]
    MalformedV1(String),
}

pub type ProxyResult<T> = std::result::Result<T, ProxyProtocolError>;
