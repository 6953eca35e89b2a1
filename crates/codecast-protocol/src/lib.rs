//! Codecast Protocol - Wire protocol for relay communication
//!
//! This crate provides the message types exchanged between participants
//! and the relay (one JSON object per WebSocket text frame), the frame
//! codec, and the request/response shapes of the external compile service.

pub mod codec;
pub mod compile;
pub mod message;
pub mod version;

pub use codec::{decode_client_frame, decode_relay_frame, encode_frame, ProtocolError, MAX_FRAME_SIZE};
pub use compile::{CompileRequest, CompileResponse, CompileServiceError};
pub use message::{ClientEvent, ClientMessage, RelayMessage};
pub use version::{ProtocolVersion, VersionError};
