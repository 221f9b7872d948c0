//! Wire format for ipcemit.
//!
//! Two layers live here:
//! - [`wire`]: the SYN/ACK frames exchanged between endpoints. These are
//!   plain JSON objects so any peer that speaks JSON can take part.
//! - [`codec`]: length-prefixed framing used when the frames travel over a
//!   byte stream (Unix domain sockets). Every frame carries:
//!   - A 2-byte magic number ("IE") for stream synchronization
//!   - A 4-byte little-endian payload length
//!   - A UTF-8 JSON payload

pub mod codec;
pub mod error;
pub mod wire;

pub use codec::{decode_frame, encode_frame, JsonCodec, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use error::{FrameError, Result};
pub use wire::{
    AckFrame, CorrelationId, ErrorEnvelope, SynFrame, WireFrame, ACK_MARKER, DEFAULT_EVENT,
    MAX_CORRELATION_ID, SYN_MARKER,
};
