//! AudioSocket wire protocol support
//!
//! This crate implements the framing layer of the AudioSocket protocol: the
//! fixed binary format a PBX uses to exchange raw PCM audio and call signaling
//! with an application over a plain TCP connection.
//!
//! # Wire Format
//!
//! Every frame is a 1-byte type tag, a 2-byte big-endian payload length, and
//! exactly that many payload bytes. There is no envelope, no negotiation, and
//! no versioning; the format is fixed by the PBX.
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────────────────┐
//! │ type: u8 │ length: u16 (BE) │ payload: length bytes│
//! └──────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! | Tag    | Frame   | Payload                                   |
//! |--------|---------|-------------------------------------------|
//! | `0x00` | HANGUP  | empty; tag conventionally repeated 3×     |
//! | `0x01` | UUID    | 16 raw bytes identifying the stream       |
//! | `0x02` | SILENCE | rarely observed in practice               |
//! | `0x03` | DTMF    | 1 ASCII digit byte                        |
//! | `0x10` | AUDIO   | 320 bytes = 20 ms of 8 kHz/16-bit/mono PCM|
//! | `0xFF` | ERROR   | 1 byte PBX error code                     |
//!
//! # Examples
//!
//! ```rust
//! use audiosock_wire::{Packet, PacketType, AUDIO_CHUNK_BYTES};
//!
//! let packet = Packet::audio(vec![0u8; AUDIO_CHUNK_BYTES]);
//! let encoded = packet.encode().unwrap();
//! assert_eq!(encoded[0], PacketType::Audio as u8);
//! assert_eq!(encoded.len(), 3 + AUDIO_CHUNK_BYTES);
//! ```

mod codes;
mod error;
mod packet;

pub use codes::PbxErrorCode;
pub use error::{Result, WireError};
pub use packet::{
    read_packet, Packet, PacketType, AUDIO_CHUNK_BYTES, FRAME_DURATION, HEADER_BYTES,
    PBX_CHANNELS, PBX_SAMPLE_RATE,
};
