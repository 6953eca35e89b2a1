//! Encoding and decoding of protocol frames.
//!
//! Every frame is a single JSON object carried in one WebSocket text
//! message. Decoding checks the size limit first, then the protocol
//! version, then the payload shape, so a peer speaking an unknown major
//! version is told so even if its message types are unfamiliar.

use crate::message::{ClientMessage, RelayMessage};
use crate::version::{ProtocolVersion, VersionError};
use serde::Serialize;
use thiserror::Error;

/// Maximum accepted frame size in bytes (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing protocol_version field")]
    MissingVersion,

    #[error(transparent)]
    InvalidVersion(#[from] VersionError),

    #[error("Unsupported protocol version {got} (relay speaks {expected})")]
    IncompatibleVersion {
        got: ProtocolVersion,
        expected: ProtocolVersion,
    },
}

impl ProtocolError {
    /// Stable short code carried in `ERROR` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::Malformed(_) => "malformed",
            Self::MissingVersion | Self::InvalidVersion(_) => "bad_version",
            Self::IncompatibleVersion { .. } => "incompatible_version",
        }
    }
}

/// Serializes a message into the text of one frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a frame sent by a participant.
pub fn decode_client_frame(text: &str) -> Result<ClientMessage, ProtocolError> {
    check_size(text)?;

    let value: serde_json::Value = serde_json::from_str(text)?;
    let version = value
        .get("protocol_version")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingVersion)?;
    let version = ProtocolVersion::parse(version)?;

    if !version.is_compatible_with(&ProtocolVersion::CURRENT) {
        return Err(ProtocolError::IncompatibleVersion {
            got: version,
            expected: ProtocolVersion::CURRENT,
        });
    }

    Ok(serde_json::from_value(value)?)
}

/// Decodes a frame sent by the relay.
pub fn decode_relay_frame(text: &str) -> Result<RelayMessage, ProtocolError> {
    check_size(text)?;
    Ok(serde_json::from_str(text)?)
}

fn check_size(text: &str) -> Result<(), ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}
