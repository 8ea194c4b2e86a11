//! # Termhub Protocol Library
//!
//! This crate defines the message contract between the termhub daemon and
//! its viewers.
//!
//! ## Overview
//!
//! Viewers talk to the hub over a persistent, message-oriented channel. Each
//! message is plain text tagged by a literal prefix:
//!
//! - **Inbound commands**: `terminal:write:<bytes>` injects input into the shell
//! - **Outbound frames**: raw shell output, `file:refresh:<path>` and
//!   `session:ended:<reason>`
//!
//! The crate performs no I/O; transports convert their own message types to
//! [`InboundFrame`] and from [`OutboundFrame`].
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use protocol::{InboundCommand, OutboundFrame};
//!
//! let raw = Bytes::from_static(b"terminal:write:ls\n");
//! assert_eq!(
//!     InboundCommand::parse(&raw),
//!     InboundCommand::WriteToShell(Bytes::from_static(b"ls\n")),
//! );
//!
//! let frame = OutboundFrame::FileRefresh("notes.txt".to_string());
//! assert_eq!(&frame.encode()[..], b"file:refresh:notes.txt");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Inbound commands and outbound frames
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    FrameKind, InboundCommand, InboundFrame, OutboundFrame, FILE_REFRESH_PREFIX,
    SESSION_ENDED_PREFIX, TERMINAL_WRITE_PREFIX,
};
