//! Viewer message definitions.
//!
//! Viewers and the hub exchange plain text messages distinguished by a
//! literal prefix:
//!
//! | Direction      | Prefix             | Payload                       |
//! |----------------|--------------------|-------------------------------|
//! | viewer -> hub  | `terminal:write:`  | raw bytes for the shell input |
//! | hub -> viewer  | *(none)*           | raw shell output              |
//! | hub -> viewer  | `file:refresh:`    | path of a changed file        |
//! | hub -> viewer  | `session:ended:`   | reason the shell went away    |
//!
//! Payloads are never re-encoded. Shell output that is not valid UTF-8 is
//! carried in a binary message instead of a text message.

use bytes::{BufMut, Bytes, BytesMut};

/// Prefix of a viewer message that injects bytes into the shell.
pub const TERMINAL_WRITE_PREFIX: &str = "terminal:write:";

/// Prefix of a hub message announcing a changed file.
pub const FILE_REFRESH_PREFIX: &str = "file:refresh:";

/// Prefix of a hub message announcing the end of the shell session.
pub const SESSION_ENDED_PREFIX: &str = "session:ended:";

/// A command decoded from a raw viewer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// Bytes to inject into the shell, prefix already stripped.
    WriteToShell(Bytes),
    /// Anything else. Dropped by the hub.
    Unrecognized,
}

impl InboundCommand {
    /// Parses a raw viewer message.
    ///
    /// Matching is byte-wise and case-sensitive. The remainder after the
    /// prefix is forwarded verbatim, so `terminal:write:` on its own yields
    /// an empty write rather than being dropped.
    pub fn parse(raw: &Bytes) -> Self {
        let prefix = TERMINAL_WRITE_PREFIX.as_bytes();
        if raw.starts_with(prefix) {
            InboundCommand::WriteToShell(raw.slice(prefix.len()..))
        } else {
            InboundCommand::Unrecognized
        }
    }
}

/// One message received from a viewer, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text or binary message.
    Data(Bytes),
    /// Transport keep-alive traffic.
    Control,
    /// The viewer closed its side of the channel.
    Close,
}

/// How an encoded frame must be carried on a message-oriented transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The payload is valid UTF-8.
    Text,
    /// The payload contains bytes that are not valid UTF-8.
    Binary,
}

/// A message sent from the hub to every viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A chunk of shell output, passed through untouched.
    Output(Bytes),
    /// A file under the watched root changed.
    FileRefresh(String),
    /// The shell session is over; no further output will follow.
    SessionEnded(String),
}

impl OutboundFrame {
    /// Returns the wire form of the frame.
    pub fn encode(&self) -> Bytes {
        match self {
            OutboundFrame::Output(data) => data.clone(),
            OutboundFrame::FileRefresh(path) => prefixed(FILE_REFRESH_PREFIX, path),
            OutboundFrame::SessionEnded(reason) => prefixed(SESSION_ENDED_PREFIX, reason),
        }
    }

    /// Returns the transport message kind for an already encoded payload.
    pub fn kind_of(encoded: &[u8]) -> FrameKind {
        if std::str::from_utf8(encoded).is_ok() {
            FrameKind::Text
        } else {
            FrameKind::Binary
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            OutboundFrame::Output(_) => "output",
            OutboundFrame::FileRefresh(_) => "file_refresh",
            OutboundFrame::SessionEnded(_) => "session_ended",
        }
    }
}

fn prefixed(prefix: &str, payload: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(prefix.len() + payload.len());
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(payload.as_bytes());
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terminal_write() {
        let raw = Bytes::from_static(b"terminal:write:echo hi\n");
        assert_eq!(
            InboundCommand::parse(&raw),
            InboundCommand::WriteToShell(Bytes::from_static(b"echo hi\n"))
        );
    }

    #[test]
    fn test_parse_empty_remainder_is_a_write() {
        let raw = Bytes::from_static(b"terminal:write:");
        assert_eq!(
            InboundCommand::parse(&raw),
            InboundCommand::WriteToShell(Bytes::new())
        );
    }

    #[test]
    fn test_parse_keeps_payload_bytes_verbatim() {
        // Control characters and a nested prefix must survive untouched.
        let raw = Bytes::from_static(b"terminal:write:\x03\x1b[A terminal:write:x");
        match InboundCommand::parse(&raw) {
            InboundCommand::WriteToShell(data) => {
                assert_eq!(&data[..], b"\x03\x1b[A terminal:write:x");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_non_utf8_payload() {
        let raw = Bytes::from_static(b"terminal:write:\xff\xfe");
        assert_eq!(
            InboundCommand::parse(&raw),
            InboundCommand::WriteToShell(Bytes::from_static(b"\xff\xfe"))
        );
    }

    #[test]
    fn test_parse_unrecognized() {
        for raw in [
            &b""[..],
            &b"terminal:write"[..],
            &b"Terminal:write:ls"[..],
            &b" terminal:write:ls"[..],
            &b"file:refresh:notes.txt"[..],
            &b"hello"[..],
        ] {
            assert_eq!(
                InboundCommand::parse(&Bytes::copy_from_slice(raw)),
                InboundCommand::Unrecognized,
                "input {:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_encode_output_is_passthrough() {
        let frame = OutboundFrame::Output(Bytes::from_static(b"\x1b[32mhi\x1b[0m\r\n"));
        assert_eq!(&frame.encode()[..], b"\x1b[32mhi\x1b[0m\r\n");
    }

    #[test]
    fn test_encode_file_refresh() {
        let frame = OutboundFrame::FileRefresh("sub/notes.txt".to_string());
        assert_eq!(&frame.encode()[..], b"file:refresh:sub/notes.txt");
    }

    #[test]
    fn test_encode_session_ended() {
        let frame = OutboundFrame::SessionEnded("shell exited".to_string());
        assert_eq!(&frame.encode()[..], b"session:ended:shell exited");
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(OutboundFrame::kind_of(b"plain"), FrameKind::Text);
        assert_eq!(OutboundFrame::kind_of("héllo".as_bytes()), FrameKind::Text);
        // A multi-byte character split across two reads.
        assert_eq!(OutboundFrame::kind_of(&[0x68, 0xc3]), FrameKind::Binary);
    }

    #[test]
    fn test_labels() {
        assert_eq!(OutboundFrame::Output(Bytes::new()).label(), "output");
        assert_eq!(
            OutboundFrame::FileRefresh(String::new()).label(),
            "file_refresh"
        );
        assert_eq!(
            OutboundFrame::SessionEnded(String::new()).label(),
            "session_ended"
        );
    }
}
