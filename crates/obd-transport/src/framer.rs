//! Response Framer
//!
//! BLE adapters push their output in MTU-sized notification chunks with no
//! regard for line boundaries. The framer accumulates bytes until the
//! adapter's `>` input prompt arrives, then splits the finished response
//! into logical lines. A single prompt-terminated response may carry several
//! lines, e.g. `SEARCHING...\rSTOPPED\r\r>`.

use tracing::{trace, warn};

/// Adapter input prompt, terminates every response
pub const PROMPT: u8 = b'>';

/// Upper bound on bytes buffered while waiting for a prompt
pub const MAX_BUFFERED: usize = 4096;

/// Reassembles fragmented adapter output into logical lines
#[derive(Debug, Default)]
pub struct ResponseFramer {
    buffer: Vec<u8>,
}

impl ResponseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification chunk, returning every line it completes, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == PROMPT {
                let response = String::from_utf8_lossy(&self.buffer);
                trace!("framed response {:?}", response);
                lines.extend(split_lines(&response));
                self.buffer.clear();
            } else {
                self.buffer.push(byte);
            }
        }

        if self.buffer.len() > MAX_BUFFERED {
            warn!(
                "Discarding {} buffered bytes with no prompt in sight",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        lines
    }

    /// Bytes waiting for a prompt
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial response
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Split adapter text into trimmed, non-empty lines
///
/// Carriage returns and line feeds both separate lines; stray prompt
/// characters are removed.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split(['\r', '\n'])
        .map(|line| line.trim().trim_matches(PROMPT as char).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_response() {
        let mut framer = ResponseFramer::new();
        assert_eq!(framer.push(b"41 0C 1A F8\r\r>"), vec!["41 0C 1A F8"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_fragmented_response() {
        let mut framer = ResponseFramer::new();
        assert!(framer.push(b"41 0C").is_empty());
        assert!(framer.push(b" 1A F").is_empty());
        assert_eq!(framer.push(b"8\r\r>"), vec!["41 0C 1A F8"]);
    }

    #[test]
    fn test_multiline_response() {
        let mut framer = ResponseFramer::new();
        let lines = framer.push(b"SEARCHING...\rSTOPPED\r\r>");
        assert_eq!(lines, vec!["SEARCHING...", "STOPPED"]);
    }

    #[test]
    fn test_two_responses_in_one_chunk() {
        let mut framer = ResponseFramer::new();
        let lines = framer.push(b"OK\r\r>410D28\r>41");
        assert_eq!(lines, vec!["OK", "410D28"]);
        assert_eq!(framer.pending(), 2);
    }

    #[test]
    fn test_empty_response_yields_nothing() {
        let mut framer = ResponseFramer::new();
        assert!(framer.push(b"\r\r>").is_empty());
        assert!(framer.push(b">").is_empty());
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut framer = ResponseFramer::new();
        let junk = vec![b'A'; MAX_BUFFERED + 1];
        assert!(framer.push(&junk).is_empty());
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.push(b"OK>"), vec!["OK"]);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("410C1AF8\r\r>"), vec!["410C1AF8"]);
        assert_eq!(split_lines("\r\n  \r"), Vec::<String>::new());
        assert_eq!(split_lines("ELM327 v1.5\n\nOK"), vec!["ELM327 v1.5", "OK"]);
    }
}
