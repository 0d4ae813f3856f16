// src/core/compression.rs

//! The stateful streaming decompression context for one connection.
//!
//! The gateway compresses its traffic as a single continuous stream chunked
//! into frames, so every frame must be fed to the same decompressor in
//! arrival order. A frame that fails to decompress is handled with a
//! three-tier fallback instead of tearing down the session: retry on a
//! fresh streaming decompressor, then attempt a one-shot decompression of
//! just that frame, then drop the frame.

use bytes::Bytes;
use std::io::Write;
use tracing::{debug, warn};
use zstd::stream::write::Decoder;

/// Owns exactly one streaming decompressor for the lifetime of a connection.
pub struct DecompressionContext {
    decoder: Decoder<'static, Vec<u8>>,
}

impl DecompressionContext {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            decoder: Decoder::new(Vec::new())?,
        })
    }

    /// Feeds one compressed frame into the streaming context.
    ///
    /// Returns `Some` with the decompressed bytes, or `None` when the frame
    /// produced no output: either a continuation frame with no flush
    /// boundary (normal, skip it) or a frame dropped after the full
    /// recovery chain failed. A dropped frame never terminates the session;
    /// the context stays usable for the next frame.
    pub fn consume(&mut self, frame: &[u8]) -> Option<Bytes> {
        match feed(&mut self.decoder, frame) {
            Ok(output) if output.is_empty() => {
                debug!("Continuation frame with no flush boundary ({} bytes in)", frame.len());
                None
            }
            Ok(output) => Some(Bytes::from(output)),
            Err(e) => {
                warn!("Streaming decompression error: {e}");
                self.recover(frame)
            }
        }
    }

    /// The recovery chain: discard the poisoned streaming state and retry,
    /// then fall back to one-shot decompression of the offending frame.
    fn recover(&mut self, frame: &[u8]) -> Option<Bytes> {
        match Decoder::new(Vec::new()) {
            Ok(fresh) => {
                // The fresh decompressor becomes the streaming context for
                // all subsequent frames, whether or not this retry succeeds.
                // Output after a reset is best-effort until the server
                // resynchronizes the stream.
                self.decoder = fresh;
                match feed(&mut self.decoder, frame) {
                    Ok(output) if output.is_empty() => None,
                    Ok(output) => Some(Bytes::from(output)),
                    Err(e) => {
                        warn!("Reset failed ({e}), trying one-shot decompression");
                        self.one_shot(frame)
                    }
                }
            }
            Err(e) => {
                warn!("Could not construct a fresh decompressor: {e}");
                self.one_shot(frame)
            }
        }
    }

    fn one_shot(&self, frame: &[u8]) -> Option<Bytes> {
        match zstd::stream::decode_all(frame) {
            Ok(output) => Some(Bytes::from(output)),
            Err(e) => {
                warn!("One-shot decompression failed, dropping frame: {e}");
                None
            }
        }
    }
}

/// Pushes a frame through a streaming decoder and drains the decoded output.
fn feed(decoder: &mut Decoder<'static, Vec<u8>>, frame: &[u8]) -> std::io::Result<Vec<u8>> {
    decoder.write_all(frame)?;
    decoder.flush()?;
    Ok(std::mem::take(decoder.get_mut()))
}
