//! # tds-protocol
//!
//! Wire-level definitions of the Tabular Data Stream protocol spoken by
//! Sybase and Microsoft SQL Server.
//!
//! This crate is IO-agnostic. It knows how the bytes of a packet header or a
//! MARS session envelope are laid out, which server data types exist and how
//! wide their fixed forms are, and which protocol versions support which
//! features. Buffering, framing and session management live in `tds-codec`
//! and `tds-core`.
//!
//! ## Example
//!
//! ```rust
//! use tds_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
//! assert_eq!(header.payload_length(), 92);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod packet;
pub mod smp;
pub mod types;
pub mod version;

pub use error::ProtocolError;
pub use packet::{
    ADDITIONAL_SPACE, DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_BLOCK_SIZE, PACKET_HEADER_SIZE,
    PacketHeader, PacketStatus, PacketType,
};
pub use smp::{SMP_HEADER_SIZE, SMP_ID, SmpFlags, SmpHeader};
pub use types::TypeId;
pub use version::TdsVersion;
