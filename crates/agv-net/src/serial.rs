//! Wired serial link: byte source/sink and newline framing.

use std::sync::mpsc;

use tracing::warn;

/// Longest accepted serial command in bytes, excluding the terminator.
pub const MAX_LINE_BYTES: usize = 63;

/// Non-blocking byte-oriented link to a host.
pub trait WiredLink: Send {
    /// Append every byte that is available right now to `buf`.  Must not
    /// block.
    fn read_available(&mut self, buf: &mut Vec<u8>);

    /// Write one line; the implementation adds the terminator.
    fn write_line(&mut self, line: &str);
}

/// What feeding one byte into a [`LineBuffer`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// The line grew past [`MAX_LINE_BYTES`] and is being discarded.
    Overflow,
}

/// Accumulates bytes until `\n` or `\r`.
///
/// An overlong line is thrown away whole: after [`LineEvent::Overflow`] the
/// rest of it is skipped up to the next terminator, so a truncated tail is
/// never handed out as a command.  Empty lines produce nothing.
#[derive(Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        if byte == b'\n' || byte == b'\r' {
            let was_discarding = std::mem::take(&mut self.discarding);
            if was_discarding || self.bytes.is_empty() {
                self.bytes.clear();
                return None;
            }
            let line = String::from_utf8_lossy(&self.bytes).into_owned();
            self.bytes.clear();
            return Some(LineEvent::Line(line));
        }

        if self.discarding {
            return None;
        }
        if self.bytes.len() >= MAX_LINE_BYTES {
            self.bytes.clear();
            self.discarding = true;
            return Some(LineEvent::Overflow);
        }
        self.bytes.push(byte);
        None
    }

    /// Feed a slice, collecting complete lines.  Overflows are logged.
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match self.push(b) {
                Some(LineEvent::Line(line)) => lines.push(line),
                Some(LineEvent::Overflow) => {
                    warn!(max = MAX_LINE_BYTES, "serial line too long, discarded");
                }
                None => {}
            }
        }
        lines
    }
}

/// [`WiredLink`] backed by in-process channels.
///
/// The `agvlink` binary feeds it from stdin; tests feed it directly.
pub struct ChannelLink {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<String>,
}

impl ChannelLink {
    /// Returns the link plus the host-side ends: a sender for bytes towards
    /// the controller and a receiver for lines written back.
    pub fn new() -> (Self, mpsc::Sender<Vec<u8>>, mpsc::Receiver<String>) {
        let (in_tx, in_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
            },
            in_tx,
            out_rx,
        )
    }
}

impl WiredLink for ChannelLink {
    fn read_available(&mut self, buf: &mut Vec<u8>) {
        while let Ok(chunk) = self.inbound.try_recv() {
            buf.extend_from_slice(&chunk);
        }
    }

    fn write_line(&mut self, line: &str) {
        let _ = self.outbound.send(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_and_carriage_return_both_terminate() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.extend(b"forward\nleft\rright\r\n"), vec!["forward", "left", "right"]);
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut buf = LineBuffer::new();
        assert!(buf.extend(b"forw").is_empty());
        assert_eq!(buf.extend(b"ard\n"), vec!["forward"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut buf = LineBuffer::new();
        assert!(buf.extend(b"\n\r\n\n").is_empty());
    }

    #[test]
    fn max_length_line_is_accepted() {
        let mut buf = LineBuffer::new();
        let mut input = vec![b'a'; MAX_LINE_BYTES];
        input.push(b'\n');
        let lines = buf.extend(&input);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
    }

    #[test]
    fn overlong_line_is_dropped_entirely() {
        let mut buf = LineBuffer::new();
        let mut saw_overflow = false;
        for &b in [b'a'; MAX_LINE_BYTES].iter().chain(b"TAIL\nnext\n".iter()) {
            match buf.push(b) {
                Some(LineEvent::Overflow) => saw_overflow = true,
                Some(LineEvent::Line(line)) => assert_eq!(line, "next"),
                None => {}
            }
        }
        assert!(saw_overflow);
    }

    #[test]
    fn channel_link_moves_bytes_and_lines() {
        let (mut link, to_controller, from_controller) = ChannelLink::new();
        to_controller.send(b"STOP\n".to_vec()).unwrap();
        to_controller.send(b"go".to_vec()).unwrap();

        let mut bytes = Vec::new();
        link.read_available(&mut bytes);
        assert_eq!(bytes, b"STOP\ngo");

        link.write_line("ACK: STOP");
        assert_eq!(from_controller.recv().unwrap(), "ACK: STOP");
    }
}
