//! Terminal control-sequence stripping for the persisted stream.
//!
//! The consoles receive the raw byte stream; the logfile gets a readable
//! rendition with carriage returns and escape sequences removed and every
//! line prefixed with a timestamp. The filter is a per-byte state machine so
//! a sequence split across read chunks is still parsed correctly.

use std::io::{self, Write};

use chrono::Local;

/// Position inside an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqState {
    Normal,
    /// An ESC byte was consumed; the next byte decides the sequence form.
    SawEscape,
    /// Inside a CSI (`ESC [`) sequence, dropping until the final byte.
    InSequence,
}

pub struct EscapeFilter {
    state: SeqState,
    /// True before the first byte ever processed, and after every raw `\n`.
    /// Tracked on the unfiltered stream: an escape sequence at the start of a
    /// line still gets the line stamped.
    at_line_start: bool,
}

impl EscapeFilter {
    pub fn new() -> Self {
        Self {
            state: SeqState::Normal,
            at_line_start: true,
        }
    }

    /// Filter `input` into `out`, stamping line starts with `now()` followed
    /// by `": "`. Returns whether any timestamp was written, in which case
    /// the caller owes the sink a flush.
    ///
    /// Deterministic for a given byte sequence regardless of how it is
    /// chunked across calls.
    pub fn feed<W: Write>(
        &mut self,
        input: &[u8],
        out: &mut W,
        mut now: impl FnMut() -> String,
    ) -> io::Result<bool> {
        let mut stamped = false;
        for &byte in input {
            if self.at_line_start {
                write!(out, "{}: ", now())?;
                stamped = true;
            }
            self.at_line_start = byte == b'\n';

            if self.accept(byte) {
                out.write_all(&[byte])?;
            }
        }
        Ok(stamped)
    }

    /// Decide emit-or-drop for one byte and advance the sequence state.
    fn accept(&mut self, byte: u8) -> bool {
        match self.state {
            SeqState::Normal => match byte {
                b'\r' => false,
                0x1b => {
                    self.state = SeqState::SawEscape;
                    false
                }
                _ => true,
            },
            SeqState::SawEscape => {
                if byte == b'[' {
                    self.state = SeqState::InSequence;
                    false
                } else {
                    // Single-character sequences (final byte 64..=95) are
                    // dropped; anything else is passed through so a malformed
                    // sequence does not eat unrelated output.
                    self.state = SeqState::Normal;
                    !(64..=95).contains(&byte)
                }
            }
            SeqState::InSequence => match byte {
                b'0'..=b'9' | b';' | 32..=47 => false,
                64..=126 => {
                    self.state = SeqState::Normal;
                    false
                }
                // Malformed parameter byte: pass through, stay in-sequence.
                _ => true,
            },
        }
    }
}

impl Default for EscapeFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Current local time in the fixed-width 24-character `ctime(3)` shape,
/// e.g. `Thu Aug  6 09:15:02 2026`.
pub fn ctime_now() -> String {
    Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}
