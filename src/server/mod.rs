//! foldersync - Relay side.
//!
//! The relay never looks at file contents. It reads just enough of each
//! header to find where a message ends, then queues the exact bytes for every
//! other connected peer.
//!
//! ```text
//!  peer A ──► handler A ──┐                 ┌──► writer B ──► peer B
//!                         ├──► Registry ────┤
//!  peer B ──► handler B ──┘      ▲          └──► writer A ──► peer A
//!                                │
//!                          status loop
//! ```

mod server;
mod session;

pub use server::*;
pub use session::*;
