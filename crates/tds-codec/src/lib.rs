//! # tds-codec
//!
//! Packet buffers and framing for TDS sessions.
//!
//! This crate owns the in-memory packet layout shared by the encoders and
//! decoders above it: a capacity-bounded buffer, its used length, a session
//! id tag for multiplexed transports and a link to the next packet.
//!
//! ```text
//! transport bytes → TdsCodec (frames, SMP envelopes) → Packet → MessageAssembler
//! ```
//!
//! ## Modules
//!
//! - [`packet`]: [`Packet`] allocation and growth, [`PacketChain`] queues
//! - [`cache`]: bounded [`PacketCache`] for packet reuse
//! - [`packet_codec`]: tokio-util [`TdsCodec`] for plain and MARS framing
//! - [`message`]: [`MessageAssembler`] joining packets into messages

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod error;
pub mod message;
pub mod packet;
pub mod packet_codec;

pub use cache::PacketCache;
pub use error::CodecError;
pub use message::{Message, MessageAssembler};
pub use packet::{Packet, PacketChain, free_chain};
pub use packet_codec::TdsCodec;
