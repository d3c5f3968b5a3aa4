//! Parsing from an incrementally arriving byte stream
//!
//! A [`StreamReader`] accumulates chunks as they arrive and resolves range
//! requests against them. Requests are answered strictly in order of their
//! start offset, and only once the whole range is present, so the parser can
//! ask for every segment up front while the bytes still arrive front to back.
//!
//! A source that ends before a pending range arrives fails that request with
//! [`BytecodeError::StreamEnded`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use crate::error::{BytecodeError, Result};
use crate::header::Header;
use crate::layout::{HASH_SIZE, HEADER_SIZE, Segment, SegmentTable};
use crate::module::Module;
use crate::parser::{ParseOptions, Region, decode_tables};
use crate::writer::check_hash;

/// Read size used by [`StreamReader::pump`]
const CHUNK_SIZE: usize = 64 * 1024;

/// A forward-only byte source that answers range requests as data arrives
#[derive(Debug, Clone, Default)]
pub struct StreamReader {
    shared: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    data: BytesMut,
    ended: bool,
    pending: BinaryHeap<Pending>,
    next_seq: u64,
}

#[derive(Debug)]
struct Pending {
    offset: usize,
    len: usize,
    seq: u64,
    reply: oneshot::Sender<Result<Bytes>>,
}

impl Pending {
    fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }
}

// BinaryHeap is a max-heap; invert so the earliest start (then earliest issue) is on top.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other.offset.cmp(&self.offset).then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl State {
    fn ended_error(&self, offset: usize, len: usize) -> BytecodeError {
        BytecodeError::StreamEnded {
            offset,
            len,
            received: self.data.len(),
        }
    }

    fn enqueue(&mut self, offset: usize, len: usize, reply: oneshot::Sender<Result<Bytes>>) {
        if self.ended && offset.saturating_add(len) > self.data.len() {
            let _ = reply.send(Err(self.ended_error(offset, len)));
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending {
            offset,
            len,
            seq,
            reply,
        });
        self.dispatch();
    }

    /// Answer requests from the front of the queue while their ranges are complete
    fn dispatch(&mut self) {
        while let Some(head) = self.pending.peek() {
            if head.end() > self.data.len() {
                break;
            }
            let Some(request) = self.pending.pop() else { break };
            let bytes = Bytes::copy_from_slice(&self.data[request.offset..request.end()]);
            // The caller may have stopped waiting.
            let _ = request.reply.send(Ok(bytes));
        }
    }
}

impl StreamReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `len` bytes at `offset`.
    ///
    /// The returned future resolves once every byte of the range has arrived
    /// and every request starting earlier has been answered.
    pub fn read(&self, offset: usize, len: usize) -> impl Future<Output = Result<Bytes>> + Send + 'static {
        let (reply, response) = oneshot::channel();
        self.shared.lock().enqueue(offset, len, reply);
        async move {
            response.await.unwrap_or(Err(BytecodeError::StreamEnded {
                offset,
                len,
                received: 0,
            }))
        }
    }

    /// Append the next chunk of the stream
    pub fn feed(&self, chunk: &[u8]) {
        let mut state = self.shared.lock();
        if state.ended {
            tracing::warn!(len = chunk.len(), "chunk fed after end of stream, ignored");
            return;
        }
        state.data.extend_from_slice(chunk);
        state.dispatch();
    }

    /// Mark the end of the stream. Requests that can no longer be satisfied fail.
    pub fn finish(&self) {
        let mut state = self.shared.lock();
        state.ended = true;
        state.dispatch();
        let pending = std::mem::take(&mut state.pending);
        if !pending.is_empty() {
            tracing::debug!(
                pending = pending.len(),
                received = state.data.len(),
                "stream ended with unanswered requests"
            );
        }
        for request in pending {
            let error = state.ended_error(request.offset, request.len);
            let _ = request.reply.send(Err(error));
        }
    }

    /// Bytes received so far
    pub fn received(&self) -> usize {
        self.shared.lock().data.len()
    }

    /// Feed everything from `source` and finish. Returns the number of bytes read.
    pub async fn pump<R: AsyncRead + Unpin>(&self, mut source: R) -> Result<usize> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0;
        loop {
            let n = match source.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.finish();
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }
            total += n;
            self.feed(&buf[..n]);
        }
        self.finish();
        Ok(total)
    }
}

/// Parse a module from a reader that is being fed concurrently
pub async fn parse_streamed(reader: &StreamReader, options: &ParseOptions) -> Result<Module> {
    let head = reader.read(0, HEADER_SIZE).await?;
    let header = Header::parse_expecting(&head, options.expected_version)?;
    let file_length = header.file_length as usize;
    if file_length < HEADER_SIZE + HASH_SIZE {
        return Err(BytecodeError::layout(format!("file length {file_length} is too small")));
    }

    let table = SegmentTable::from_header(&header)?;
    let segments =
        try_join_all(Segment::ALL.iter().map(|&s| reader.read(table.offset(s), table.len(s)))).await?;
    let tables = decode_tables(header, table, segments)?;

    let (start, end) = tables.body_range();
    let body = reader.read(start, end - start).await?;
    if options.verify_hash {
        check_hash(&reader.read(0, file_length).await?)?;
    }
    tracing::debug!(received = reader.received(), "streamed module complete");

    tables.finish(&Region::new(start, body))
}

/// Parse a module while reading it from `source`
pub async fn parse_async<R: AsyncRead + Unpin>(source: R, options: &ParseOptions) -> Result<Module> {
    let reader = StreamReader::new();
    let (_, module) = tokio::try_join!(reader.pump(source), parse_streamed(&reader, options))?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    const SAMPLE: &[u8] = include_bytes!("../tests/fixtures/sample.hbc");

    #[tokio::test]
    async fn test_requests_answered_in_offset_order() {
        let reader = StreamReader::new();
        let mut late = Box::pin(reader.read(100, 10));
        let mut early = Box::pin(reader.read(0, 10));

        reader.feed(&[1u8; 20]);
        assert_eq!(early.as_mut().now_or_never().unwrap().unwrap().len(), 10);
        assert!(late.as_mut().now_or_never().is_none());

        reader.feed(&[2u8; 100]);
        let bytes = late.await.unwrap();
        assert_eq!(&bytes[..], &[2u8; 10]);
    }

    #[tokio::test]
    async fn test_head_of_line_blocks_later_ranges() {
        let reader = StreamReader::new();
        let mut wide = Box::pin(reader.read(0, 30));
        let mut inner = Box::pin(reader.read(5, 5));

        reader.feed(&[0u8; 20]);
        assert!(inner.as_mut().now_or_never().is_none());
        assert!(wide.as_mut().now_or_never().is_none());

        reader.feed(&[0u8; 10]);
        assert!(wide.await.is_ok());
        assert!(inner.await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_end_fails_pending() {
        let reader = StreamReader::new();
        let pending = reader.read(10, 10);
        reader.feed(&[0u8; 15]);
        reader.finish();
        assert!(matches!(
            pending.await,
            Err(BytecodeError::StreamEnded {
                offset: 10,
                len: 10,
                received: 15
            })
        ));
        assert!(matches!(reader.read(0, 16).await, Err(BytecodeError::StreamEnded { .. })));
        assert!(reader.read(0, 15).await.is_ok());
    }

    #[tokio::test]
    async fn test_parse_async_matches_parse() {
        let streamed = parse_async(SAMPLE, &ParseOptions::default()).await.unwrap();
        let direct = Module::parse(SAMPLE).unwrap();
        assert_eq!(streamed.functions, direct.functions);
        assert_eq!(streamed.bytecode, direct.bytecode);
        assert_eq!(streamed.debug_info, direct.debug_info);
        assert_eq!(crate::writer::write_module(&streamed).unwrap(), SAMPLE);
    }

    #[tokio::test]
    async fn test_parse_streamed_small_chunks() {
        let reader = StreamReader::new();
        let parser = {
            let reader = reader.clone();
            tokio::spawn(async move {
                let options = ParseOptions {
                    verify_hash: true,
                    ..ParseOptions::default()
                };
                parse_streamed(&reader, &options).await
            })
        };
        for chunk in SAMPLE.chunks(7) {
            reader.feed(chunk);
            tokio::task::yield_now().await;
        }
        reader.finish();

        let module = parser.await.unwrap().unwrap();
        assert_eq!(module.function_name(0), Some("global"));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let result = parse_async(&SAMPLE[..200], &ParseOptions::default()).await;
        assert!(matches!(result, Err(BytecodeError::StreamEnded { .. })));
    }
}
