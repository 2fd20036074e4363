use amethyst_binary::error::BinaryError;
use amethyst_binary::io::{BinaryReader, BinaryWriter};
use bytes::Bytes;
use std::net::SocketAddr;

type Result<T> = std::result::Result<T, BinaryError>;

/// The standard RakNet offline-message discriminator. Servers may configure
/// a different value, but this is the one every public RakNet client ships.
pub const DEFAULT_MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

pub const CONNECTED_PING: u8 = 0x00;
pub const UNCONNECTED_PING: u8 = 0x01;
pub const CONNECTED_PONG: u8 = 0x03;
pub const OPEN_CONNECTION_REQUEST_1: u8 = 0x05;
pub const OPEN_CONNECTION_REPLY_1: u8 = 0x06;
pub const OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
pub const OPEN_CONNECTION_REPLY_2: u8 = 0x08;
pub const ALREADY_CONNECTED: u8 = 0x12;
pub const INCOMPATIBLE_PROTOCOL_VERSION: u8 = 0x19;
pub const UNCONNECTED_PONG: u8 = 0x1c;

/// Reads the 8-byte ping timestamp and client GUID out of an
/// `UNCONNECTED_PING` body (opcode byte already consumed by the caller).
/// `client_guid` is returned for completeness but is not required by any
/// reply the handshake core produces.
pub fn decode_unconnected_ping(reader: &mut BinaryReader, magic: &[u8; 16]) -> Result<(u64, u64)> {
    let time = reader.read_u64()?;
    reader.read_magic(magic)?;
    let client_guid = reader.read_u64()?;
    Ok((time, client_guid))
}

/// `UNCONNECTED_PONG = [opcode(1), ping_time(8), guid(8), magic(16), adv_len(2) || adv_bytes]`.
/// The advertisement length prefix and body are omitted entirely when no
/// advertisement is configured.
pub fn encode_unconnected_pong(
    ping_time: u64,
    guid: u64,
    magic: &[u8; 16],
    advertisement: Option<&[u8]>,
) -> Result<Bytes> {
    let mut writer = BinaryWriter::with_capacity(33 + advertisement.map_or(0, |a| 2 + a.len()));
    writer.write_u8(UNCONNECTED_PONG)?;
    writer.write_u64(ping_time)?;
    writer.write_u64(guid)?;
    writer.write_magic(magic)?;
    if let Some(advertisement) = advertisement {
        writer.write_length_prefixed_bytes(advertisement)?;
    }
    Ok(writer.freeze())
}

/// Reads the `protocol_version` byte out of an `OPEN_CONNECTION_REQUEST_1`
/// body. The cursor is left positioned at the start of the MTU padding so
/// the caller can measure it before discarding it.
pub fn decode_open_connection_request_1(
    reader: &mut BinaryReader,
    magic: &[u8; 16],
) -> Result<u8> {
    reader.read_magic(magic)?;
    reader.read_u8()
}

/// `OPEN_CONNECTION_REPLY_1 = [opcode, magic, guid(8), security(1), cookie(4, iff security), mtu(2)]`.
pub fn encode_open_connection_reply_1(
    guid: u64,
    magic: &[u8; 16],
    cookie: Option<u32>,
    mtu: u16,
) -> Result<Bytes> {
    let mut writer = BinaryWriter::with_capacity(28 + cookie.map_or(0, |_| 4));
    writer.write_u8(OPEN_CONNECTION_REPLY_1)?;
    writer.write_magic(magic)?;
    writer.write_u64(guid)?;
    writer.write_bool(cookie.is_some())?;
    if let Some(cookie) = cookie {
        writer.write_u32(cookie)?;
    }
    writer.write_u16(mtu)?;
    Ok(writer.freeze())
}

/// The parsed body of an `OPEN_CONNECTION_REQUEST_2` datagram. The
/// client-claimed server address is read (to advance the cursor correctly)
/// but discarded: the reply always echoes the UDP-observed sender address,
/// never the one the client asserts here.
pub struct OpenConnectionRequest2 {
    pub cookie: Option<u32>,
    pub mtu: u16,
    pub client_guid: u64,
}

pub fn decode_open_connection_request_2(
    reader: &mut BinaryReader,
    magic: &[u8; 16],
    expect_cookie: bool,
) -> Result<OpenConnectionRequest2> {
    reader.read_magic(magic)?;
    let cookie = if expect_cookie {
        let cookie = reader.read_u32()?;
        let _challenge = reader.read_bool()?;
        Some(cookie)
    } else {
        None
    };
    let _server_address_claimed = reader.read_socket_addr()?;
    let mtu = reader.read_u16()?;
    let client_guid = reader.read_u64()?;
    Ok(OpenConnectionRequest2 {
        cookie,
        mtu,
        client_guid,
    })
}

/// `OPEN_CONNECTION_REPLY_2 = [opcode, magic, guid(8), client_addr, mtu(2), security(1=false)]`.
pub fn encode_open_connection_reply_2(
    guid: u64,
    magic: &[u8; 16],
    client_addr: SocketAddr,
    mtu: u16,
) -> Result<Bytes> {
    let mut writer = BinaryWriter::with_capacity(40);
    writer.write_u8(OPEN_CONNECTION_REPLY_2)?;
    writer.write_magic(magic)?;
    writer.write_u64(guid)?;
    writer.write_socket_addr(&client_addr)?;
    writer.write_u16(mtu)?;
    writer.write_bool(false)?;
    Ok(writer.freeze())
}

/// `INCOMPATIBLE_PROTOCOL_VERSION = [opcode, protocol(1), magic, guid(8)]` — 26 bytes.
pub fn encode_incompatible_protocol_version(protocol: u8, guid: u64, magic: &[u8; 16]) -> Result<Bytes> {
    let mut writer = BinaryWriter::with_capacity(26);
    writer.write_u8(INCOMPATIBLE_PROTOCOL_VERSION)?;
    writer.write_u8(protocol)?;
    writer.write_magic(magic)?;
    writer.write_u64(guid)?;
    Ok(writer.freeze())
}

/// `ALREADY_CONNECTED = [opcode, magic, guid(8)]` — 25 bytes.
pub fn encode_already_connected(guid: u64, magic: &[u8; 16]) -> Result<Bytes> {
    let mut writer = BinaryWriter::with_capacity(25);
    writer.write_u8(ALREADY_CONNECTED)?;
    writer.write_magic(magic)?;
    writer.write_u64(guid)?;
    Ok(writer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const MAGIC: [u8; 16] = DEFAULT_MAGIC;

    #[test]
    fn pong_with_advertisement_matches_s4_layout() {
        let advertisement = vec![b'x'; 50];
        let reply =
            encode_unconnected_pong(0xDEADBEEF, 0x0102030405060708, &MAGIC, Some(&advertisement))
                .unwrap();

        assert_eq!(reply.len(), 35 + 50);
        assert_eq!(reply[0], UNCONNECTED_PONG);
        assert_eq!(
            u64::from_be_bytes(reply[1..9].try_into().unwrap()),
            0xDEADBEEF
        );
        assert_eq!(
            u64::from_be_bytes(reply[9..17].try_into().unwrap()),
            0x0102030405060708
        );
        assert_eq!(&reply[17..33], &MAGIC);
        assert_eq!(u16::from_be_bytes([reply[33], reply[34]]), 50);
        assert_eq!(&reply[35..], advertisement.as_slice());
    }

    #[test]
    fn pong_without_advertisement_omits_length_prefix() {
        let reply = encode_unconnected_pong(1, 2, &MAGIC, None).unwrap();
        assert_eq!(reply.len(), 33);
    }

    #[test]
    fn reply_1_omits_cookie_when_not_sending_one() {
        let reply = encode_open_connection_reply_1(42, &MAGIC, None, 1200).unwrap();
        // opcode(1) + magic(16) + guid(8) + security(1) + mtu(2)
        assert_eq!(reply.len(), 28);
        assert_eq!(reply[0], OPEN_CONNECTION_REPLY_1);
        assert_eq!(reply[25], 0); // security = false
        assert_eq!(u16::from_be_bytes([reply[26], reply[27]]), 1200);
    }

    #[test]
    fn reply_1_carries_cookie_when_sending_one() {
        let reply = encode_open_connection_reply_1(42, &MAGIC, Some(0xCAFEBABE), 1200).unwrap();
        assert_eq!(reply.len(), 32);
        assert_eq!(reply[25], 1); // security = true
        assert_eq!(
            u32::from_be_bytes(reply[26..30].try_into().unwrap()),
            0xCAFEBABE
        );
        assert_eq!(u16::from_be_bytes([reply[30], reply[31]]), 1200);
    }

    #[test]
    fn reply_2_echoes_client_address_and_mtu() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 19132);
        let reply = encode_open_connection_reply_2(1, &MAGIC, addr, 1400).unwrap();
        assert_eq!(reply[0], OPEN_CONNECTION_REPLY_2);
        assert_eq!(*reply.last().unwrap(), 0); // security = false

        let mut reader = BinaryReader::new(reply);
        reader.read_u8().unwrap();
        reader.read_magic(&MAGIC).unwrap();
        assert_eq!(reader.read_u64().unwrap(), 1);
        assert_eq!(reader.read_socket_addr().unwrap(), addr);
        assert_eq!(reader.read_u16().unwrap(), 1400);
        assert!(!reader.read_bool().unwrap());
    }

    #[test]
    fn incompatible_protocol_version_is_26_bytes() {
        let reply = encode_incompatible_protocol_version(11, 0xAA, &MAGIC).unwrap();
        assert_eq!(reply.len(), 26);
        assert_eq!(reply[0], INCOMPATIBLE_PROTOCOL_VERSION);
        assert_eq!(reply[1], 11);
    }

    #[test]
    fn already_connected_is_25_bytes() {
        let reply = encode_already_connected(0xAA, &MAGIC).unwrap();
        assert_eq!(reply.len(), 25);
        assert_eq!(reply[0], ALREADY_CONNECTED);
    }

    #[test]
    fn open_connection_request_2_reads_cookie_only_when_expected() {
        let mut writer = BinaryWriter::new();
        writer.write_magic(&MAGIC).unwrap();
        writer.write_u32(0x11223344).unwrap();
        writer.write_bool(false).unwrap();
        writer.write_padding_address().unwrap();
        writer.write_u16(1200).unwrap();
        writer.write_u64(99).unwrap();

        let mut reader = BinaryReader::new(writer.freeze());
        let parsed = decode_open_connection_request_2(&mut reader, &MAGIC, true).unwrap();
        assert_eq!(parsed.cookie, Some(0x11223344));
        assert_eq!(parsed.mtu, 1200);
        assert_eq!(parsed.client_guid, 99);
    }
}
