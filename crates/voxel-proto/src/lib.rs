#![deny(clippy::all)]

//! # Voxel MCU Protocol
//!
//! An implementation of the Klipper MCU binary protocol as spoken by the
//! voxel emulator. This crate provides the byte-level codec used to talk to
//! an unmodified host print controller.
//!
//! ## Key Components
//!
//! - **[`framing`]**: Block layout, the streaming `check_packet` scanner,
//!   and frame construction.
//! - **[`message`]**: Format-string schemas, positional parameter
//!   encoding/decoding, and the per-session `MessageRegistry`.
//! - **[`identity`]**: The compressed self-describing dictionary served to
//!   the host at connection time.
//! - **[`crc`]**: The CRC16-CCITT variant used for message integrity.
//! - **[`vlq`]**: Variable-length integer encoding shared by tags and
//!   parameters.
//!
//! ## Design
//!
//! The parser is streaming and resynchronizing: `check_packet` reports how
//! many bytes to keep, discard, or wait for, so a session can slide it
//! across a raw serial buffer without framing assumptions. All encoders
//! validate parameter ranges before touching the output buffer.

pub mod crc;
pub mod framing;
pub mod identity;
pub mod message;
pub mod vlq;

use thiserror::Error as ThisError;

/// Common error type for the protocol crate.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A block or parameter was truncated.
    #[error("incomplete frame")]
    IncompleteFrame,
    /// The frame sync byte was expected but not found.
    #[error("invalid frame sync")]
    InvalidSync,
    /// The CRC-16 checksum of a received block was invalid.
    #[error("invalid frame crc")]
    InvalidCrc,
    /// The payload could not be decoded against its schema.
    #[error("invalid message payload")]
    InvalidPayload,
    /// A message name is not present in the dictionary.
    #[error("unknown message '{0}'")]
    UnknownMessage(String),
    /// A message tag is not present in the dictionary.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),
    /// A required parameter was not supplied to the encoder.
    #[error("missing parameter '{0}'")]
    MissingParam(String),
    /// A parameter value does not match its schema type.
    #[error("parameter '{0}' has the wrong type")]
    ParamType(String),
    /// A parameter value does not fit its wire encoding.
    #[error("value {0} out of range for parameter '{1}'")]
    OutOfRange(u64, String),
    /// A message format string could not be parsed.
    #[error("invalid message format '{0}'")]
    InvalidFormat(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
