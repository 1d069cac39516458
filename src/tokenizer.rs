//! Buffers arbitrary byte chunks and yields delimiter-terminated lines
//! (§4.3).
//!
//! No module in the retrieved pack does residue-splitting on an
//! arbitrary (not just `b'\n'`-sized) delimiter — `lib/codec` is
//! Cargo.toml-only in this pack — so this is built from scratch in the
//! spirit of `tokio_util::codec::LinesCodec`'s residue-buffer approach,
//! using `bytes::BytesMut` the way the teacher's own `line_agg.rs` does
//! for its merged buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Splits a byte stream into complete, delimiter-stripped lines,
/// retaining any incomplete tail as residue.
#[derive(Debug, Default)]
pub struct Tokenizer {
    residue: BytesMut,
    delimiter: Bytes,
}

impl Tokenizer {
    pub fn new(delimiter: impl Into<Bytes>) -> Self {
        Self {
            residue: BytesMut::new(),
            delimiter: delimiter.into(),
        }
    }

    /// Append `chunk` to the residue, split on the delimiter, and return
    /// all complete lines. The (possibly empty) tail becomes the new
    /// residue.
    pub fn extract(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.residue.put_slice(chunk);

        let mut lines = Vec::new();
        if self.delimiter.is_empty() {
            return lines;
        }

        loop {
            match find_subslice(&self.residue, &self.delimiter) {
                Some(pos) => {
                    let line = self.residue.split_to(pos).freeze();
                    self.residue.advance(self.delimiter.len());
                    lines.push(line);
                }
                None => break,
            }
        }

        lines
    }

    /// Return the residue and clear it (terminal flush, §4.3).
    pub fn flush(&mut self) -> Bytes {
        self.residue.split().freeze()
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
