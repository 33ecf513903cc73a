//! Tokio codec for JT/T808 frames.
//!
//! [`Jt808Codec`] wraps [`StreamParser`] so connections can use
//! `tokio_util::codec::Framed`. A frame that fails to decode is yielded as an
//! `Err` *item* rather than a stream error, so one corrupt frame does not end
//! the connection; only I/O failures do.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use tracklink_protocol::Jt808Codec;
//!
//! # async fn example() -> tracklink_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:8808").await?;
//! let mut framed = Framed::new(stream, Jt808Codec::new());
//! while let Some(item) = framed.next().await {
//!     match item? {
//!         Ok(msg) => println!("{msg}"),
//!         Err(e) => eprintln!("dropped frame: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::{
    frame,
    message::Message,
    stream_parser::{ParsedFrame, StreamParser},
};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;
use tracklink_core::{Error, Result, constants::MAX_ESCAPED_FRAME_LENGTH};

/// Largest escaped frame accepted by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = MAX_ESCAPED_FRAME_LENGTH;

/// Outcome of decoding one frame.
pub type Decoded = Result<Message>;

#[derive(Debug)]
pub struct Jt808Codec {
    parser: StreamParser,
    max_frame_size: usize,
}

impl Jt808Codec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            parser: StreamParser::with_max_frame_size(max_frame_size),
            max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for Jt808Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Jt808Codec {
    type Item = Decoded;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        if !src.is_empty() {
            self.parser.feed(src);
            src.clear();
        }

        Ok(self.parser.next_frame().map(|parsed| match parsed {
            ParsedFrame::Complete(raw) => {
                trace!(frame = %frame::to_hex(&raw), "rx");
                frame::decode(&raw)
            }
            ParsedFrame::Oversized(size) => Err(Error::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            }),
        }))
    }
}

impl Encoder<Message> for Jt808Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        frame::encode_into(&item, dst)?;

        let size = dst.len() - start;
        if size > self.max_frame_size {
            dst.truncate(start);
            return Err(Error::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }
        trace!(frame = %frame::to_hex(&dst[start..]), "tx");
        Ok(())
    }
}
