//! Incremental `data: ...\n` frame scanner.
//!
//! The scanner walks the receive buffer one byte at a time and remembers where
//! it stopped, so it can be called again whenever more bytes have arrived
//! without ever looking at a consumed byte twice. Frames are reported as byte
//! ranges into the buffer; nothing is copied.

use std::ops::Range;

/// Prefix that opens a frame.
pub const FRAME_MARKER: &[u8] = b"data:";
/// Byte that closes a frame.
pub const FRAME_TERMINATOR: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScannerState {
    /// Looking for [`FRAME_MARKER`]; `matched` marker bytes are already seen.
    AwaitingMarker { matched: usize },
    /// Inside a frame whose payload begins at `frame_start`.
    AwaitingTerminator { frame_start: usize },
}

/// A complete frame payload `[start, end)`, excluding marker and terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub start: usize,
    pub end: usize,
}

impl Frame {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Scan progress through one response stream.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    position: usize,
    state: ScannerState,
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self {
            position: 0,
            state: ScannerState::AwaitingMarker { matched: 0 },
        }
    }
}

impl ScanCursor {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn frame_start(&self) -> Option<usize> {
        match self.state {
            ScannerState::AwaitingTerminator { frame_start } => Some(frame_start),
            ScannerState::AwaitingMarker { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameScanner {
    cursor: ScanCursor,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> &ScanCursor {
        &self.cursor
    }

    /// Continue scanning `buf` from where the previous call stopped and return
    /// the next complete frame, if one is closed within the bytes available.
    ///
    /// `buf` must be the same growing buffer on every call. Calling again with
    /// no new bytes returns `None` and leaves the cursor untouched.
    pub fn next_frame(&mut self, buf: &[u8]) -> Option<Frame> {
        debug_assert!(self.cursor.position <= buf.len());

        while self.cursor.position < buf.len() {
            let byte = buf[self.cursor.position];
            self.cursor.position += 1;

            match self.cursor.state {
                ScannerState::AwaitingMarker { matched } => {
                    let matched = advance_marker(matched, byte);
                    self.cursor.state = if matched == FRAME_MARKER.len() {
                        ScannerState::AwaitingTerminator {
                            frame_start: self.cursor.position,
                        }
                    } else {
                        ScannerState::AwaitingMarker { matched }
                    };
                }
                ScannerState::AwaitingTerminator { frame_start } => {
                    if byte == FRAME_TERMINATOR {
                        self.cursor.state = ScannerState::AwaitingMarker { matched: 0 };
                        return Some(Frame {
                            start: frame_start,
                            end: self.cursor.position - 1,
                        });
                    }
                }
            }
        }
        None
    }

    /// Close a frame still open when the stream ended.
    ///
    /// Returns the trailing payload (up to the end of `buf`) if the last frame
    /// never received its terminator.
    pub fn finish(&mut self, buf: &[u8]) -> Option<Frame> {
        // callers drain next_frame before finishing
        debug_assert!(self.cursor.position == buf.len());
        let start = self.cursor.frame_start().filter(|&start| start < buf.len())?;
        self.cursor.state = ScannerState::AwaitingMarker { matched: 0 };
        Some(Frame { start, end: buf.len() })
    }
}

/// Feed one byte into the marker matcher, falling back to the longest marker
/// prefix that is still a suffix of the bytes seen.
fn advance_marker(mut matched: usize, byte: u8) -> usize {
    loop {
        if FRAME_MARKER[matched] == byte {
            return matched + 1;
        }
        if matched == 0 {
            return 0;
        }
        matched = longest_border(matched);
    }
}

/// Length of the longest proper prefix of `FRAME_MARKER[..len]` that is also
/// its suffix.
fn longest_border(len: usize) -> usize {
    (1..len)
        .rev()
        .find(|&k| FRAME_MARKER[..k] == FRAME_MARKER[len - k..len])
        .unwrap_or(0)
}
