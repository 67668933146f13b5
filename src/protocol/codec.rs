use serde_json::Value;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024;

/// One decoded unit from a single direction of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete line that parsed as a JSON object or value.
    Message(Value),
    /// Bytes to forward exactly as-is. Produced for lines that fail to
    /// parse (terminator included) and for over-long partial lines.
    Raw(Vec<u8>),
}

/// Incremental newline-delimited decoder for one direction of one session.
///
/// Transport read boundaries do not align with message boundaries: a single
/// delivery may carry zero, one, or several frames, and a frame may be split
/// across deliveries. The trailing partial line is retained and prepended to
/// the next delivery, so a `mining.submit` whose JSON body straddles two TCP
/// segments still decodes as one message.
#[derive(Debug)]
pub struct LineDecoder {
    tail: Vec<u8>,
    max_line_length: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineDecoder {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            tail: Vec::new(),
            max_line_length,
        }
    }

    /// Append a delivery and drain every complete line from the buffer.
    ///
    /// Output order is exactly input order; nothing is reordered or
    /// coalesced. Blank lines are dropped. A line that is not valid JSON
    /// becomes `Frame::Raw` (with its terminator) instead of an error: the
    /// relay never terminates a connection over a malformed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.tail.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(pos) = find_newline(&self.tail[start..]) {
            let end = start + pos;
            if let Some(frame) = decode_line(&self.tail[start..=end]) {
                frames.push(frame);
            }
            start = end + 1;
        }

        self.tail.drain(..start);

        // An over-long partial line cannot be a frame we will ever complete
        // within the limit; flush it verbatim instead of buffering forever.
        if self.tail.len() > self.max_line_length {
            frames.push(Frame::Raw(std::mem::take(&mut self.tail)));
        }

        frames
    }

    /// Bytes of the retained partial line, if any.
    pub fn pending(&self) -> usize {
        self.tail.len()
    }
}

fn find_newline(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b'\n')
}

fn decode_line(line_with_terminator: &[u8]) -> Option<Frame> {
    let line = &line_with_terminator[..line_with_terminator.len() - 1];
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Some(Frame::Message(value)),
        Err(_) => Some(Frame::Raw(line_with_terminator.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(frame: &Frame) -> &Value {
        match frame {
            Frame::Message(v) => v,
            Frame::Raw(raw) => panic!("expected message, got raw {:?}", raw),
        }
    }

    #[test]
    fn single_complete_line() {
        let mut decoder = LineDecoder::default();
        let frames = decoder.push(b"{\"id\":1,\"method\":\"mining.subscribe\"}\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(message(&frames[0])["method"], "mining.subscribe");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn multiple_frames_in_one_delivery() {
        let mut decoder = LineDecoder::default();
        let frames = decoder.push(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");

        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(message(frame)["id"], json!(i as u64 + 1));
        }
    }

    #[test]
    fn frame_split_across_deliveries() {
        let mut decoder = LineDecoder::default();

        // Split point inside the JSON body.
        let frames = decoder.push(b"{\"id\":7,\"method\":\"mining.sub");
        assert!(frames.is_empty());
        assert!(decoder.pending() > 0);

        let frames = decoder.push(b"mit\",\"params\":[\"w\",\"j\"]}\n");
        assert_eq!(frames.len(), 1);
        let msg = message(&frames[0]);
        assert_eq!(msg["method"], "mining.submit");
        assert_eq!(msg["id"], 7);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn merged_tail_and_fresh_frame() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"{\"id\":1");
        let frames = decoder.push(b"}\n{\"id\":2}\n{\"id\":3");

        assert_eq!(frames.len(), 2);
        assert_eq!(message(&frames[0])["id"], 1);
        assert_eq!(message(&frames[1])["id"], 2);
        assert!(decoder.pending() > 0);
    }

    #[test]
    fn malformed_line_passes_through_raw() {
        let mut decoder = LineDecoder::default();
        let frames = decoder.push(b"this is not json\n{\"id\":1}\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Raw(b"this is not json\n".to_vec()));
        assert_eq!(message(&frames[1])["id"], 1);
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut decoder = LineDecoder::default();
        let frames = decoder.push(b"\n\n{\"id\":1}\n  \n");

        assert_eq!(frames.len(), 1);
        assert_eq!(message(&frames[0])["id"], 1);
    }

    #[test]
    fn oversized_partial_is_flushed_raw() {
        let mut decoder = LineDecoder::new(16);
        let frames = decoder.push(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");

        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Raw(raw) if raw.len() == 32));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn order_is_preserved() {
        let mut decoder = LineDecoder::default();
        let frames = decoder.push(b"{\"id\":1}\ngarbage\n{\"id\":2}\n");

        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Frame::Message(_)));
        assert!(matches!(frames[1], Frame::Raw(_)));
        assert!(matches!(frames[2], Frame::Message(_)));
    }
}
