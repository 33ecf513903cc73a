//! Splits a TCP byte stream into delimited frames.
//!
//! Start and end delimiters are the same byte, so the parser only tracks
//! whether it is inside a frame. Bytes before the first delimiter are
//! discarded, and an empty frame (`0x7e 0x7e`) is read as an end immediately
//! followed by a start. A frame growing past the size limit is dropped up to
//! its closing delimiter and reported once as [`ParsedFrame::Oversized`].

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use tracklink_core::constants::{FLAG_BYTE, MAX_ESCAPED_FRAME_LENGTH};

const INITIAL_FRAME_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Looking for an opening delimiter.
    WaitingStart,
    /// Between delimiters.
    ReadingFrame,
    /// Skipping the rest of an oversized frame.
    Discarding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFrame {
    /// Raw frame including both delimiters, still escaped.
    Complete(Bytes),
    /// A frame exceeded the limit; carries the size seen when it was dropped.
    Oversized(usize),
}

#[derive(Debug)]
pub struct StreamParser {
    state: ParserState,
    payload: BytesMut,
    frames: VecDeque<ParsedFrame>,
    max_frame_size: usize,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_ESCAPED_FRAME_LENGTH)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: ParserState::WaitingStart,
            payload: BytesMut::with_capacity(256),
            frames: VecDeque::with_capacity(INITIAL_FRAME_QUEUE_CAPACITY),
            max_frame_size,
        }
    }

    /// Consume bytes from the stream; complete frames become available
    /// through [`StreamParser::next_frame`].
    pub fn feed(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let flag = bytes.iter().position(|&b| b == FLAG_BYTE);
            match self.state {
                ParserState::WaitingStart => match flag {
                    Some(pos) => {
                        bytes = &bytes[pos + 1..];
                        self.payload.clear();
                        self.state = ParserState::ReadingFrame;
                    }
                    None => return,
                },
                ParserState::ReadingFrame => match flag {
                    Some(0) if self.payload.is_empty() => {
                        // Back-to-back delimiters: treat the second as the start.
                        bytes = &bytes[1..];
                    }
                    Some(pos) => {
                        let size = self.payload.len() + pos + 2;
                        if size > self.max_frame_size {
                            self.frames.push_back(ParsedFrame::Oversized(size));
                        } else {
                            self.payload.extend_from_slice(&bytes[..pos]);
                            self.emit_frame();
                        }
                        self.payload.clear();
                        bytes = &bytes[pos + 1..];
                        self.state = ParserState::WaitingStart;
                    }
                    None => {
                        let size = self.payload.len() + bytes.len() + 1;
                        if size > self.max_frame_size {
                            self.frames.push_back(ParsedFrame::Oversized(size));
                            self.payload.clear();
                            self.state = ParserState::Discarding;
                        } else {
                            self.payload.extend_from_slice(bytes);
                        }
                        return;
                    }
                },
                ParserState::Discarding => match flag {
                    Some(pos) => {
                        bytes = &bytes[pos + 1..];
                        self.state = ParserState::WaitingStart;
                    }
                    None => return,
                },
            }
        }
    }

    fn emit_frame(&mut self) {
        let mut frame = BytesMut::with_capacity(self.payload.len() + 2);
        frame.put_u8(FLAG_BYTE);
        frame.put_slice(&self.payload);
        frame.put_u8(FLAG_BYTE);
        self.frames.push_back(ParsedFrame::Complete(frame.freeze()));
    }

    pub fn next_frame(&mut self) -> Option<ParsedFrame> {
        self.frames.pop_front()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Drop buffered bytes and queued frames.
    pub fn clear(&mut self) {
        self.payload.clear();
        self.frames.clear();
        self.state = ParserState::WaitingStart;
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEARTBEAT: &[u8] = &[
        0x7e, 0x00, 0x02, 0x00, 0x00, 0x99, 0x99, 0x99, 0x99, 0x91, 0x18, 0x00, 0x0c, 0x87, 0x7e,
    ];

    fn complete(parser: &mut StreamParser) -> Vec<u8> {
        match parser.next_frame() {
            Some(ParsedFrame::Complete(frame)) => frame.to_vec(),
            other => panic!("expected a complete frame, got {other:?}"),
        }
    }

    #[test]
    fn test_single_frame() {
        let mut parser = StreamParser::new();
        parser.feed(HEARTBEAT);
        assert_eq!(complete(&mut parser), HEARTBEAT);
        assert_eq!(parser.state(), ParserState::WaitingStart);
    }

    #[test]
    fn test_byte_by_byte() {
        let mut parser = StreamParser::new();
        for &b in HEARTBEAT {
            parser.feed(&[b]);
        }
        assert_eq!(parser.frames_available(), 1);
        assert_eq!(complete(&mut parser), HEARTBEAT);
    }

    #[test]
    fn test_garbage_before_start_is_discarded() {
        let mut parser = StreamParser::new();
        parser.feed(&[0x01, 0x02, 0x03]);
        parser.feed(HEARTBEAT);
        assert_eq!(parser.frames_available(), 1);
        assert_eq!(complete(&mut parser), HEARTBEAT);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut parser = StreamParser::new();
        let mut stream = HEARTBEAT.to_vec();
        stream.extend_from_slice(HEARTBEAT);
        parser.feed(&stream);
        assert_eq!(parser.frames_available(), 2);
        assert_eq!(complete(&mut parser), HEARTBEAT);
        assert_eq!(complete(&mut parser), HEARTBEAT);
    }

    #[test]
    fn test_shared_delimiter_run() {
        // 0x7e 0x7e 0x7e... before a frame collapses into one start.
        let mut parser = StreamParser::new();
        parser.feed(&[0x7e, 0x7e]);
        parser.feed(HEARTBEAT);
        assert_eq!(parser.frames_available(), 1);
        assert_eq!(complete(&mut parser), HEARTBEAT);
    }

    #[test]
    fn test_oversized_frame_is_reported_and_skipped() {
        let mut parser = StreamParser::with_max_frame_size(16);
        let mut stream = vec![0x7e];
        stream.extend_from_slice(&[0x11; 40]);
        stream.push(0x7e);
        stream.extend_from_slice(HEARTBEAT);
        parser.feed(&stream[..20]);
        parser.feed(&stream[20..]);

        assert!(matches!(parser.next_frame(), Some(ParsedFrame::Oversized(_))));
        assert_eq!(complete(&mut parser), HEARTBEAT);
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_clear_resets() {
        let mut parser = StreamParser::new();
        parser.feed(&HEARTBEAT[..5]);
        assert_eq!(parser.state(), ParserState::ReadingFrame);
        parser.clear();
        assert_eq!(parser.state(), ParserState::WaitingStart);
        assert_eq!(parser.frames_available(), 0);
    }
}
