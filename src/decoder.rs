use std::collections::VecDeque;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{DecodeError, TransportError};
use crate::fragment::{fragments_from_record, Fragment};
use crate::transport::ByteStream;

/// Incremental parser for newline-delimited JSON response bodies.
///
/// Bytes are buffered until a `\n` completes a record, so chunk boundaries
/// may fall anywhere, including inside a multi-byte UTF-8 sequence.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    dropped: usize,
}

impl NdjsonDecoder {
    /// Feed arbitrary bytes into the decoder and drain complete records.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Fragment> {
        self.buffer.extend_from_slice(bytes);
        let mut fragments = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=split).collect::<Vec<_>>();
            self.decode_line(&line[..split], &mut fragments);
        }

        fragments
    }

    /// Flush a trailing record that was never newline-terminated.
    ///
    /// A partial record that does not parse is discarded.
    pub fn finish(&mut self) -> Vec<Fragment> {
        let line = std::mem::take(&mut self.buffer);
        let mut fragments = Vec::new();
        self.decode_line(&line, &mut fragments);
        fragments
    }

    /// Decode a complete body in one shot.
    pub fn parse_records(input: &str) -> Vec<Fragment> {
        let mut decoder = Self::default();
        let mut fragments = decoder.feed(input.as_bytes());
        fragments.extend(decoder.finish());
        fragments
    }

    /// Number of records dropped as malformed so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Fragment>) {
        let Ok(record) = std::str::from_utf8(line) else {
            self.dropped += 1;
            tracing::warn!(bytes = line.len(), "dropping record with invalid UTF-8");
            return;
        };
        let record = record.trim();
        if record.is_empty() || record == "{}" {
            return;
        }

        match fragments_from_record(record) {
            Ok(fragments) => out.extend(fragments),
            Err(error) => {
                self.dropped += 1;
                log_dropped(&error);
            }
        }
    }
}

fn log_dropped(error: &DecodeError) {
    match error {
        DecodeError::Json { record, .. } | DecodeError::NotAnObject { record } => {
            tracing::warn!(%error, record_len = record.len(), "dropping malformed record");
        }
        _ => tracing::warn!(%error, "dropping malformed record"),
    }
}

/// Lazy, cancellable sequence of fragments over a transport byte stream.
///
/// Not restartable: once it yields `None` it stays exhausted.
pub struct FragmentStream {
    source: Option<ByteStream>,
    decoder: NdjsonDecoder,
    pending: VecDeque<Fragment>,
    cancel: CancellationToken,
    done: bool,
}

impl FragmentStream {
    #[must_use]
    pub fn new(source: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            source: Some(source),
            decoder: NdjsonDecoder::default(),
            pending: VecDeque::new(),
            cancel,
            done: false,
        }
    }

    /// Next fragment in arrival order.
    ///
    /// Returns `Err(TransportError::Cancelled)` once when the token fires and
    /// drops the underlying source so no more chunks are read.
    pub async fn next(&mut self) -> Option<Result<Fragment, TransportError>> {
        loop {
            if self.done {
                return None;
            }

            if self.cancel.is_cancelled() {
                return Some(Err(self.close(TransportError::Cancelled)));
            }

            if let Some(fragment) = self.pending.pop_front() {
                return Some(Ok(fragment));
            }

            let Some(source) = self.source.as_mut() else {
                self.done = true;
                return None;
            };

            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                chunk = source.next() => Some(chunk),
            };
            let Some(chunk) = next else {
                return Some(Err(self.close(TransportError::Cancelled)));
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let fragments = self.decoder.feed(&bytes);
                    self.pending.extend(fragments);
                }
                Some(Err(error)) => return Some(Err(self.close(error))),
                None => {
                    self.source = None;
                    let fragments = self.decoder.finish();
                    self.pending.extend(fragments);
                }
            }
        }
    }

    pub fn dropped(&self) -> usize {
        self.decoder.dropped()
    }

    fn close(&mut self, error: TransportError) -> TransportError {
        self.source = None;
        self.pending.clear();
        self.done = true;
        error
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("open", &self.source.is_some())
            .field("pending", &self.pending.len())
            .field("done", &self.done)
            .finish()
    }
}
