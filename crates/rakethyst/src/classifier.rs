use crate::wire;
use amethyst_binary::io::BinaryReader;
use bytes::Bytes;

/// The three offline opcodes the handshake core accepts. Anything else
/// belongs to an established session or is noise, and is left untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfflineOpcode {
    UnconnectedPing,
    OpenConnectionRequest1,
    OpenConnectionRequest2,
}

/// Classifies a datagram without mutating it. Accepts iff the opcode is one
/// of the three offline opcodes and the bytes following it — after skipping
/// an 8-byte ping timestamp for `UNCONNECTED_PING` — equal the configured
/// magic. `data` is never consumed: classification works against a cheap
/// refcounted clone of the buffer, so a reject leaves the caller's own
/// cursor (if any) exactly where it was.
pub fn classify(data: &Bytes, magic: &[u8; 16]) -> Option<OfflineOpcode> {
    if data.is_empty() {
        return None;
    }

    let opcode = match data[0] {
        wire::UNCONNECTED_PING => OfflineOpcode::UnconnectedPing,
        wire::OPEN_CONNECTION_REQUEST_1 => OfflineOpcode::OpenConnectionRequest1,
        wire::OPEN_CONNECTION_REQUEST_2 => OfflineOpcode::OpenConnectionRequest2,
        _ => return None,
    };

    let mut reader = BinaryReader::new(data.clone());
    if reader.read_u8().is_err() {
        return None;
    }
    if opcode == OfflineOpcode::UnconnectedPing && reader.advance(8).is_err() {
        return None;
    }
    if reader.read_magic(magic).is_err() {
        return None;
    }

    Some(opcode)
}
