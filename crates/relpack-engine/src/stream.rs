//! Chunked token segmentation
//!
//! [`SegmentStream`] reads its input in fixed-size chunks and splits it into
//! plain text and complete tokens. Only the bytes that could still begin a
//! token are held between reads, so memory stays bounded by the chunk size
//! plus [`MAX_TOKEN_LEN`](crate::token::MAX_TOKEN_LEN), and the segments
//! are identical whatever the chunk size.

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::token::TokenScanner;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A piece of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bytes to copy through unchanged
    Text(Vec<u8>),
    /// A complete token, markers included in `raw`
    Token { raw: Vec<u8>, key: Vec<u8> },
}

impl Segment {
    /// The input bytes this segment covers
    pub fn raw(&self) -> &[u8] {
        match self {
            Segment::Text(bytes) => bytes,
            Segment::Token { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Reading,
    Drained,
}

/// Iterator over the segments of a reader
pub struct SegmentStream<R> {
    reader: R,
    scanner: TokenScanner,
    chunk_size: usize,
    /// Carried bytes followed by the latest chunk
    buffer: Vec<u8>,
    /// Prefix of `buffer` already emitted
    flushed: usize,
    pending: VecDeque<Segment>,
    state: StreamState,
}

impl<R: Read> SegmentStream<R> {
    pub fn new(reader: R, scanner: TokenScanner, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            reader,
            scanner,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            flushed: 0,
            pending: VecDeque::new(),
            state: StreamState::Reading,
        }
    }

    fn read_chunk(&mut self) -> io::Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.chunk_size, 0);
        let read = loop {
            match self.reader.read(&mut self.buffer[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e);
                }
            }
        };
        self.buffer.truncate(start + read);
        Ok(read)
    }

    /// Read one chunk and queue every segment it settles
    fn advance(&mut self) -> io::Result<()> {
        self.buffer.drain(..self.flushed);
        self.flushed = 0;

        let at_eof = self.read_chunk()? == 0;

        let mut cursor = 0;
        for token in self.scanner.find_all(&self.buffer) {
            if token.start > cursor {
                self.pending
                    .push_back(Segment::Text(self.buffer[cursor..token.start].to_vec()));
            }
            self.pending.push_back(Segment::Token {
                raw: self.buffer[token.start..token.end].to_vec(),
                key: self.buffer[token.key_start..token.key_end].to_vec(),
            });
            cursor = token.end;
        }

        let settled = if at_eof {
            self.state = StreamState::Drained;
            self.buffer.len()
        } else {
            cursor + self.scanner.carry_start(&self.buffer[cursor..])
        };
        if settled > cursor {
            self.pending
                .push_back(Segment::Text(self.buffer[cursor..settled].to_vec()));
        }
        self.flushed = settled;
        Ok(())
    }
}

impl<R: Read> Iterator for SegmentStream<R> {
    type Item = io::Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(segment) = self.pending.pop_front() {
                return Some(Ok(segment));
            }
            if self.state == StreamState::Drained {
                return None;
            }
            if let Err(e) = self.advance() {
                self.state = StreamState::Drained;
                return Some(Err(e));
            }
        }
    }
}
