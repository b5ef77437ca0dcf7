//! foldersync - Transport Layer
//!
//! This module implements the wire format and the framed channel that carries
//! it. It provides:
//!
//! - **Frame encoding/decoding**: [`Frame`], [`Header`], and [`parse_header`]
//! - **Framed channel**: [`FrameReader`] / [`FrameWriter`] with exact-length
//!   payload reads, and [`FramedChannel`] over TCP
//! - **Error taxonomy**: [`TransportError`] distinguishing clean closes,
//!   decode faults, and connection faults
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Peer session / Relay server         │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   JSON header line + raw payload        │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The transport never interprets payload bytes. A relay only needs the
//! header to know where one message ends and the next begins.

mod channel;
mod error;
mod frame;

pub use channel::*;
pub use error::*;
pub use frame::*;
