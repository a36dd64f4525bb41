// src/supervise/framing.rs

//! Explicit line-framing state machine over byte buffers.
//!
//! Incoming chunks are appended to a carry buffer; every complete
//! `\n`-delimited line is flushed immediately (empty lines included), and a
//! trailing partial line is flushed exactly once when the stream ends. This
//! gives at-most-one emission per logical line regardless of how the OS
//! splits the chunks.

/// Per-stream framer. One instance per stdout/stderr pipe.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
    finished: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completes, in order.
    /// A trailing `\r` (CRLF input) is stripped from each line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        debug_assert!(!self.finished, "push after finish");
        let mut lines = Vec::new();
        let mut start = 0;

        for (i, byte) in chunk.iter().enumerate() {
            if *byte == b'\n' {
                self.carry.extend_from_slice(&chunk[start..i]);
                lines.push(take_line(&mut self.carry));
                start = i + 1;
            }
        }
        self.carry.extend_from_slice(&chunk[start..]);
        lines
    }

    /// End of stream: flush the trailing partial line, if any. Idempotent.
    pub fn finish(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        self.finished = true;
        if self.carry.is_empty() {
            None
        } else {
            Some(take_line(&mut self.carry))
        }
    }
}

fn take_line(carry: &mut Vec<u8>) -> String {
    if carry.last() == Some(&b'\r') {
        carry.pop();
    }
    let line = String::from_utf8_lossy(carry).into_owned();
    carry.clear();
    line
}
