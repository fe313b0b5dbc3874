//! PBX-reported error codes
//!
//! The ERROR frame carries a single byte from a small fixed vocabulary. The
//! codes are informational; the transport keeps running unless the PBX also
//! hangs up or drops the connection.

use std::fmt;

/// Error code carried in the payload of an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PbxErrorCode {
    /// `0x00` - the PBX signaled an error without a code.
    None,
    /// `0x01` - the called party hung up.
    RemoteHangup,
    /// `0x02` - the PBX failed to forward an audio frame.
    FrameForward,
    /// `0x04` - the PBX hit a memory allocation failure.
    Memory,
    /// Any code outside the documented vocabulary.
    Unknown(u8),
}

impl PbxErrorCode {
    /// Decode the first byte of an ERROR frame payload. An empty payload is
    /// treated the same as the explicit no-code byte.
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload.first().copied() {
            None | Some(0x00) => PbxErrorCode::None,
            Some(0x01) => PbxErrorCode::RemoteHangup,
            Some(0x02) => PbxErrorCode::FrameForward,
            Some(0x04) => PbxErrorCode::Memory,
            Some(other) => PbxErrorCode::Unknown(other),
        }
    }

    /// Human-readable description used for logging.
    pub fn describe(&self) -> &'static str {
        match self {
            PbxErrorCode::None => "no error code present",
            PbxErrorCode::RemoteHangup => "the called party hung up",
            PbxErrorCode::FrameForward => "failed to forward frame",
            PbxErrorCode::Memory => "memory allocation error",
            PbxErrorCode::Unknown(_) => "unrecognized error code",
        }
    }
}

impl fmt::Display for PbxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PbxErrorCode::Unknown(code) => write!(f, "unrecognized error code 0x{code:02x}"),
            other => f.write_str(other.describe()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_codes() {
        assert_eq!(PbxErrorCode::from_payload(&[0x00]), PbxErrorCode::None);
        assert_eq!(
            PbxErrorCode::from_payload(&[0x01]),
            PbxErrorCode::RemoteHangup
        );
        assert_eq!(
            PbxErrorCode::from_payload(&[0x02]),
            PbxErrorCode::FrameForward
        );
        assert_eq!(PbxErrorCode::from_payload(&[0x04]), PbxErrorCode::Memory);
    }

    #[test]
    fn test_decode_empty_and_unknown() {
        assert_eq!(PbxErrorCode::from_payload(&[]), PbxErrorCode::None);
        assert_eq!(
            PbxErrorCode::from_payload(&[0x7f]),
            PbxErrorCode::Unknown(0x7f)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            PbxErrorCode::RemoteHangup.to_string(),
            "the called party hung up"
        );
        assert_eq!(
            PbxErrorCode::Unknown(0x09).to_string(),
            "unrecognized error code 0x09"
        );
    }
}
