use crate::error::BinaryError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

type Result<T> = std::result::Result<T, BinaryError>;

macro_rules! check_remaining {
    ($remaining:expr, $needed:expr) => {
        if $remaining < $needed {
            return Err(BinaryError::UnexpectedEof {
                needed: $needed,
                remaining: $remaining,
            });
        }
    };
}

/// A cursor over an immutable byte buffer. All integers are big-endian,
/// matching RakNet's wire format.
#[derive(Debug, Clone)]
pub struct BinaryReader {
    buffer: Bytes,
}

impl BinaryReader {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.buffer.has_remaining()
    }

    /// Snapshots the current cursor position. `Bytes` clones are refcounted,
    /// so this is cheap and safe to take on every classifier attempt.
    #[inline]
    pub fn mark(&self) -> Bytes {
        self.buffer.clone()
    }

    /// Restores the cursor to a previously taken `mark()`.
    #[inline]
    pub fn reset_to(&mut self, mark: Bytes) {
        self.buffer = mark;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self.buffer.remaining(), 1);
        Ok(self.buffer.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        check_remaining!(self.buffer.remaining(), 1);
        Ok(self.buffer.get_i8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        check_remaining!(self.buffer.remaining(), 2);
        Ok(self.buffer.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        check_remaining!(self.buffer.remaining(), 2);
        Ok(self.buffer.get_i16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        check_remaining!(self.buffer.remaining(), 4);
        Ok(self.buffer.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        check_remaining!(self.buffer.remaining(), 4);
        Ok(self.buffer.get_i32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        check_remaining!(self.buffer.remaining(), 8);
        Ok(self.buffer.get_u64())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        check_remaining!(self.buffer.remaining(), 8);
        Ok(self.buffer.get_i64())
    }

    pub fn read_u128(&mut self) -> Result<u128> {
        check_remaining!(self.buffer.remaining(), 16);
        Ok(self.buffer.get_u128())
    }

    pub fn read_i128(&mut self) -> Result<i128> {
        check_remaining!(self.buffer.remaining(), 16);
        Ok(self.buffer.get_i128())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        check_remaining!(self.buffer.remaining(), 4);
        Ok(self.buffer.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        check_remaining!(self.buffer.remaining(), 8);
        Ok(self.buffer.get_f64())
    }

    /// Reads `len` raw bytes without interpreting them.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        check_remaining!(self.buffer.remaining(), len);
        Ok(self.buffer.copy_to_bytes(len))
    }

    /// Consumes and returns every remaining byte.
    pub fn read_remaining(&mut self) -> Bytes {
        let len = self.buffer.remaining();
        self.buffer.copy_to_bytes(len)
    }

    /// Advances the cursor by `len` bytes without returning them, used to
    /// discard MTU padding in OCR1.
    pub fn advance(&mut self, len: usize) -> Result<()> {
        check_remaining!(self.buffer.remaining(), len);
        self.buffer.advance(len);
        Ok(())
    }

    /// Reads a `u16`-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BinaryError::InvalidData(format!("invalid utf-8 string: {e}")))
    }

    /// Reads a `u16`-length-prefixed raw byte string (e.g. PONG advertisement).
    pub fn read_length_prefixed_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    /// Validates that the next 16 bytes equal `expected`, consuming them.
    pub fn read_magic(&mut self, expected: &[u8; 16]) -> Result<()> {
        let got = self.read_bytes(16)?;
        if got.as_ref() != expected.as_slice() {
            return Err(BinaryError::InvalidData("magic mismatch".into()));
        }
        Ok(())
    }

    /// Reads a RakNet-encoded `SocketAddr`.
    ///
    /// IPv4: family byte `4`, four bitwise-complemented octets, BE u16 port.
    /// IPv6: family byte `6`, LE u16 family marker (always `23` on the
    /// wire, discarded here), BE u16 port, BE u32 flowinfo, 16 raw
    /// address bytes, BE u32 scope id.
    pub fn read_socket_addr(&mut self) -> Result<SocketAddr> {
        let family = self.read_u8()?;
        match family {
            4 => {
                check_remaining!(self.buffer.remaining(), 6);
                let mut octets = [0u8; 4];
                for octet in &mut octets {
                    *octet = !self.buffer.get_u8();
                }
                let port = self.buffer.get_u16();
                Ok(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(octets),
                    port,
                )))
            }
            6 => {
                check_remaining!(self.buffer.remaining(), 2 + 2 + 4 + 16 + 4);
                let _family_marker = self.buffer.get_u16_le();
                let port = self.buffer.get_u16();
                let flowinfo = self.buffer.get_u32();
                let mut ip_bytes = [0u8; 16];
                self.buffer.copy_to_slice(&mut ip_bytes);
                let scope_id = self.buffer.get_u32();
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(ip_bytes),
                    port,
                    flowinfo,
                    scope_id,
                )))
            }
            other => Err(BinaryError::InvalidData(format!(
                "unknown address family byte: {other}"
            ))),
        }
    }
}

/// A growable byte buffer builder. All integers are big-endian, matching
/// RakNet's wire format.
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    buffer: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the writer, returning the accumulated bytes.
    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buffer.put_u8(value);
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.buffer.put_i8(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(if value { 1 } else { 0 })
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.buffer.put_u16(value);
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.buffer.put_i16(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buffer.put_u32(value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.buffer.put_i32(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.buffer.put_u64(value);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.buffer.put_i64(value);
        Ok(())
    }

    pub fn write_u128(&mut self, value: u128) -> Result<()> {
        self.buffer.put_u128(value);
        Ok(())
    }

    pub fn write_i128(&mut self, value: i128) -> Result<()> {
        self.buffer.put_i128(value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.buffer.put_f32(value);
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.buffer.put_f64(value);
        Ok(())
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.put_slice(data);
        Ok(())
    }

    /// Writes `count` zero bytes, used to pad OCR1 out to the probed MTU.
    pub fn write_padding(&mut self, count: usize) -> Result<()> {
        self.buffer.put_bytes(0, count);
        Ok(())
    }

    /// Writes a `u16`-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(BinaryError::InvalidData(
                "string too long for u16 length prefix".into(),
            ));
        }
        self.write_u16(value.len() as u16)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes a `u16`-length-prefixed raw byte string (e.g. PONG advertisement).
    pub fn write_length_prefixed_bytes(&mut self, value: &[u8]) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(BinaryError::InvalidData(
                "byte string too long for u16 length prefix".into(),
            ));
        }
        self.write_u16(value.len() as u16)?;
        self.write_bytes(value)
    }

    /// Writes the 16-byte RakNet magic verbatim.
    pub fn write_magic(&mut self, magic: &[u8; 16]) -> Result<()> {
        self.write_bytes(magic)
    }

    /// Writes a RakNet-encoded `SocketAddr`. See [`BinaryReader::read_socket_addr`]
    /// for the exact layout.
    pub fn write_socket_addr(&mut self, addr: &SocketAddr) -> Result<()> {
        match addr {
            SocketAddr::V4(v4) => {
                self.write_u8(4)?;
                for octet in v4.ip().octets() {
                    self.buffer.put_u8(!octet);
                }
                self.buffer.put_u16(v4.port());
                Ok(())
            }
            SocketAddr::V6(v6) => {
                self.write_u8(6)?;
                self.buffer.put_u16_le(23);
                self.buffer.put_u16(v6.port());
                self.buffer.put_u32(v6.flowinfo());
                self.buffer.put_slice(&v6.ip().octets());
                self.buffer.put_u32(v6.scope_id());
                Ok(())
            }
        }
    }

    /// Address placeholder matching RakNet's `PADDING_ADDRESS` convention:
    /// an IPv4 `0.0.0.0:0` entry.
    pub fn write_padding_address(&mut self) -> Result<()> {
        self.write_socket_addr(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip_big_endian() {
        let mut writer = BinaryWriter::new();
        writer.write_u8(0xAB).unwrap();
        writer.write_u16(0xBEEF).unwrap();
        writer.write_u32(0xDEADBEEF).unwrap();
        writer.write_u64(0x0102030405060708).unwrap();
        writer.write_bool(true).unwrap();

        let mut reader = BinaryReader::new(writer.freeze());
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u16().unwrap(), 0xBEEF);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
        assert!(reader.read_bool().unwrap());
    }

    #[test]
    fn read_past_end_is_unexpected_eof() {
        let mut reader = BinaryReader::from_slice(&[0x01]);
        assert!(matches!(
            reader.read_u32(),
            Err(BinaryError::UnexpectedEof {
                needed: 4,
                remaining: 1
            })
        ));
    }

    #[test]
    fn ipv4_address_round_trips_with_complemented_octets() {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 19132));
        let mut writer = BinaryWriter::new();
        writer.write_socket_addr(&addr).unwrap();
        let encoded = writer.freeze();

        // family byte, then each octet bitwise-complemented on the wire.
        assert_eq!(encoded[0], 4);
        assert_eq!(encoded[1], !192u8);
        assert_eq!(encoded[2], !168u8);
        assert_eq!(encoded[3], !0u8);
        assert_eq!(encoded[4], !1u8);

        let mut reader = BinaryReader::new(encoded);
        assert_eq!(reader.read_socket_addr().unwrap(), addr);
    }

    #[test]
    fn ipv6_address_round_trips() {
        let addr = SocketAddr::V6(SocketAddrV6::new(
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1),
            19133,
            0,
            0,
        ));
        let mut writer = BinaryWriter::new();
        writer.write_socket_addr(&addr).unwrap();
        let mut reader = BinaryReader::new(writer.freeze());
        assert_eq!(reader.read_socket_addr().unwrap(), addr);
    }

    #[test]
    fn magic_mismatch_is_rejected() {
        let magic = [0x11u8; 16];
        let mut writer = BinaryWriter::new();
        writer.write_magic(&[0x22u8; 16]).unwrap();
        let mut reader = BinaryReader::new(writer.freeze());
        assert!(reader.read_magic(&magic).is_err());
    }

    #[test]
    fn mark_and_reset_restores_cursor_position() {
        let mut reader = BinaryReader::from_slice(&[0x01, 0x02, 0x03, 0x04]);
        let mark = reader.mark();
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        reader.reset_to(mark);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn length_prefixed_bytes_round_trip() {
        let mut writer = BinaryWriter::new();
        writer.write_length_prefixed_bytes(b"MCPE;hello").unwrap();
        let mut reader = BinaryReader::new(writer.freeze());
        assert_eq!(reader.read_length_prefixed_bytes().unwrap().as_ref(), b"MCPE;hello");
    }
}
