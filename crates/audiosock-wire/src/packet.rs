//! AudioSocket frame encoding and decoding

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::{Result, WireError};

/// Payload size of one 20 ms audio frame toward the PBX. Audio sent to the
/// PBX must be exactly this many bytes per frame or playback distorts.
pub const AUDIO_CHUNK_BYTES: usize = 320;

/// Sample rate fixed by the PBX end of the connection.
pub const PBX_SAMPLE_RATE: u32 = 8000;

/// Channel count fixed by the PBX end of the connection.
pub const PBX_CHANNELS: u16 = 1;

/// Cadence at which the PBX produces audio frames.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Size of the type tag plus the 16-bit length field.
pub const HEADER_BYTES: usize = 3;

/// Frame type tags defined by the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Terminate the call. The tag is conventionally written three times in
    /// immediate succession when hanging up.
    Hangup = 0x00,
    /// Payload is the 16-byte binary UUID identifying the logical stream.
    Uuid = 0x01,
    /// Payload is silence; rarely observed in practice.
    Silence = 0x02,
    /// Payload is a single ASCII DTMF digit.
    Dtmf = 0x03,
    /// Payload is 8 kHz/16-bit/mono little-endian PCM.
    Audio = 0x10,
    /// Payload is a one-byte PBX error code.
    Error = 0xFF,
}

impl PacketType {
    /// Map a wire tag to a frame type. Returns `None` for tags outside the
    /// fixed vocabulary.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(PacketType::Hangup),
            0x01 => Some(PacketType::Uuid),
            0x02 => Some(PacketType::Silence),
            0x03 => Some(PacketType::Dtmf),
            0x10 => Some(PacketType::Audio),
            0xFF => Some(PacketType::Error),
            _ => None,
        }
    }
}

/// One type+length+payload unit on the AudioSocket wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }

    /// An AUDIO frame carrying the given PCM payload.
    pub fn audio(payload: impl Into<Bytes>) -> Self {
        Self::new(PacketType::Audio, payload)
    }

    /// An AUDIO frame carrying one chunk of all-zero PCM, used both as the
    /// keep-alive reply when there is nothing to transmit and as the
    /// substitute for malformed inbound data.
    pub fn silence() -> Self {
        Self::audio(Bytes::from_static(&[0u8; AUDIO_CHUNK_BYTES]))
    }

    /// A zero-length HANGUP frame.
    pub fn hangup() -> Self {
        Self::new(PacketType::Hangup, Bytes::new())
    }

    /// Serialize the frame: tag, big-endian length, payload.
    ///
    /// Type-specific payload constraints (such as the 320-byte audio chunk
    /// size) are not enforced here; the session layer owns that policy.
    pub fn encode(&self) -> Result<Bytes> {
        let len = self.payload.len();
        let len16 =
            u16::try_from(len).map_err(|_| WireError::PayloadTooLarge { len })?;
        let mut buf = BytesMut::with_capacity(HEADER_BYTES + len);
        buf.put_u8(self.packet_type as u8);
        buf.put_u16(len16);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a frame from a buffer that is expected to hold one whole frame,
    /// as produced by datagram-style socket reads.
    ///
    /// A buffer shorter than the 3-byte header is substituted with an AUDIO
    /// frame of silence. That is a defensive default, not a protocol-correct
    /// recovery, and it is logged as such. The same substitution applies to
    /// unrecognized type tags. The declared length is not checked against the
    /// bytes actually present; whatever follows the header is the payload.
    pub fn from_datagram(data: &[u8]) -> Self {
        if data.len() < HEADER_BYTES {
            warn!(
                len = data.len(),
                "received less than the 3-byte minimum frame, substituting silence"
            );
            return Self::silence();
        }
        let Some(packet_type) = PacketType::from_u8(data[0]) else {
            warn!(tag = data[0], "unknown frame type tag, substituting silence");
            return Self::silence();
        };
        let declared = u16::from_be_bytes([data[1], data[2]]) as usize;
        let payload = &data[HEADER_BYTES..];
        if declared != payload.len() {
            warn!(
                declared,
                actual = payload.len(),
                "frame length field disagrees with payload size"
            );
        }
        Self::new(packet_type, Bytes::copy_from_slice(payload))
    }
}

/// Read the next frame from a byte stream.
///
/// Reads exactly `3 + length` bytes. Returns `Ok(None)` when the peer closed
/// the connection, whether at a frame boundary or mid-frame; a truncated
/// trailing frame signals end-of-stream, not an error. Frames with an
/// unrecognized type tag are consumed, logged, and skipped.
pub async fn read_packet<R>(reader: &mut R) -> std::io::Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut header = [0u8; HEADER_BYTES];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let length = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; length];
        if length > 0 {
            match reader.read_exact(&mut payload).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        match PacketType::from_u8(header[0]) {
            Some(packet_type) => {
                return Ok(Some(Packet::new(packet_type, payload)));
            }
            None => {
                warn!(tag = header[0], length, "skipping frame with unknown type tag");
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let packet = Packet::new(PacketType::Dtmf, vec![b'5']);
        let encoded = packet.encode().unwrap();
        assert_eq!(&encoded[..], &[0x03, 0x00, 0x01, b'5']);
    }

    #[test]
    fn test_encode_audio_chunk() {
        let packet = Packet::audio(vec![0xAB; AUDIO_CHUNK_BYTES]);
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], 0x10);
        assert_eq!(u16::from_be_bytes([encoded[1], encoded[2]]), 320);
        assert_eq!(encoded.len(), HEADER_BYTES + AUDIO_CHUNK_BYTES);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let packet = Packet::audio(vec![0u8; u16::MAX as usize + 1]);
        assert!(matches!(
            packet.encode(),
            Err(WireError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_from_datagram_short_buffer_yields_silence() {
        let packet = Packet::from_datagram(&[0x10, 0x01]);
        assert_eq!(packet.packet_type, PacketType::Audio);
        assert_eq!(packet.payload.len(), AUDIO_CHUNK_BYTES);
        assert!(packet.payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_datagram_parses_whole_frame() {
        let mut data = vec![0x01, 0x00, 0x10];
        data.extend_from_slice(&[7u8; 16]);
        let packet = Packet::from_datagram(&data);
        assert_eq!(packet.packet_type, PacketType::Uuid);
        assert_eq!(&packet.payload[..], &[7u8; 16]);
    }

    #[test]
    fn test_from_datagram_unknown_tag_yields_silence() {
        let packet = Packet::from_datagram(&[0x42, 0x00, 0x01, 0xFF]);
        assert_eq!(packet.packet_type, PacketType::Audio);
        assert!(packet.payload.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_read_packet_roundtrip() {
        let frames = vec![
            Packet::new(PacketType::Uuid, vec![1u8; 16]),
            Packet::audio(vec![2u8; AUDIO_CHUNK_BYTES]),
            Packet::new(PacketType::Dtmf, vec![b'#']),
            Packet::hangup(),
        ];
        let mut stream = Vec::new();
        for frame in &frames {
            stream.extend_from_slice(&frame.encode().unwrap());
        }

        let mut reader = std::io::Cursor::new(stream);
        for expected in &frames {
            let got = read_packet(&mut reader).await.unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_packet_eof_mid_frame_is_end_of_stream() {
        // Header declares 320 bytes but only 10 are present.
        let mut stream = vec![0x10, 0x01, 0x40];
        stream.extend_from_slice(&[0u8; 10]);
        let mut reader = std::io::Cursor::new(stream);
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_packet_skips_unknown_tags() {
        let mut stream = vec![0x7E, 0x00, 0x02, 0xAA, 0xBB];
        stream.extend_from_slice(&Packet::new(PacketType::Dtmf, vec![b'1']).encode().unwrap());
        let mut reader = std::io::Cursor::new(stream);
        let got = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(got.packet_type, PacketType::Dtmf);
        assert_eq!(&got.payload[..], b"1");
    }
}
