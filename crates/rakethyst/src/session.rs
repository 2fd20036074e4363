use bytes::Bytes;
use std::net::SocketAddr;

/// RakNet's canonical reliability levels. Their semantics belong to the
/// reliable/ordered datagram layer, which this crate does not implement;
/// they exist here only so [`RakMessage`] can be named across the handoff
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reliability {
    Unreliable,
    UnreliableSequenced,
    Reliable,
    ReliableOrdered,
    ReliableSequenced,
}

/// Outbound scheduling priority for a [`RakMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Immediate,
    High,
    Medium,
    Low,
}

/// A user payload crossing the boundary into the (out-of-scope) reliable
/// layer. Structural equality over all four fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RakMessage {
    pub payload: Bytes,
    pub reliability: Reliability,
    pub priority: Priority,
    pub channel: u8,
}

/// The single upward-facing interface the handshake state machine calls on
/// a successful OCR2. `Session` is intentionally opaque to this crate: the
/// embedder decides what a session is and owns its lifecycle entirely.
///
/// Returning `None` signals "a session already exists for this address";
/// the state machine translates that into an `ALREADY_CONNECTED` reply.
pub trait ChildSessionFactory: Send + Sync {
    type Session;

    fn create_child_session(
        &self,
        client_addr: SocketAddr,
        client_guid: u64,
        protocol_version: u8,
        negotiated_mtu: u16,
    ) -> Option<Self::Session>;
}
